// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Platform configuration registers and the policies that bind keys and
//! delegations to them.
//!
//! A policy names a set of registers and the SHA-1 composite digest those
//! registers must hash to at release time. The long and short forms also
//! restrict the localities the object may be used from. The locality check
//! always runs before the digest check.

use crate::crypto::CryptoProvider;
use crate::error::TpmError;
use tpm12_protocol::Digest;
use tpm12_protocol::Load;
use tpm12_protocol::LoadCursor;
use tpm12_protocol::Store;
use tpm12_protocol::StoreBuffer;
use tpm12_protocol::tpm12proto::LocalitySelection;
use tpm12_protocol::tpm12proto::StructureTag;
use tpm12_protocol::tpm12proto::TPM_DIGEST_SIZE;
use tpm12_protocol::tpm12proto::TPM_LOCALITY_MAX;
use tpm12_protocol::tpm12proto::TPM_NUM_PCR;
use tpm12_protocol::tpm12proto::TPM_PCR_SELECT_MAX;

/// `TPM_PCR_SELECTION`: a bitmap of up to 24 registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcrSelection {
    size_of_select: u16,
    select: [u8; TPM_PCR_SELECT_MAX],
}

impl Default for PcrSelection {
    fn default() -> Self {
        Self {
            size_of_select: TPM_PCR_SELECT_MAX as u16,
            select: [0; TPM_PCR_SELECT_MAX],
        }
    }
}

impl PcrSelection {
    /// A selection naming `indices`.
    pub fn from_indices(indices: &[usize]) -> Result<Self, TpmError> {
        let mut selection = Self::default();
        for &index in indices {
            if index >= TPM_NUM_PCR {
                return Err(TpmError::InvalidPcrInfo("pcr index out of range"));
            }
            selection.select[index / 8] |= 1 << (index % 8);
        }
        Ok(selection)
    }

    /// Returns true if PCR `index` is selected.
    pub fn is_selected(&self, index: usize) -> bool {
        index < self.size_of_select as usize * 8 && self.select[index / 8] & (1 << (index % 8)) != 0
    }

    /// Returns true if no register is selected.
    pub fn is_empty(&self) -> bool {
        self.select[..self.size_of_select as usize]
            .iter()
            .all(|&b| b == 0)
    }

    /// Selected register indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..TPM_NUM_PCR).filter(|&i| self.is_selected(i))
    }
}

impl Store for PcrSelection {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append_u16(self.size_of_select);
        buf.append_bytes(&self.select[..self.size_of_select as usize]);
    }
}

impl Load for PcrSelection {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        let size_of_select = cursor.load_u16()?;
        if size_of_select as usize > TPM_PCR_SELECT_MAX {
            return Err(TpmError::InvalidPcrInfo("sizeOfSelect too large"));
        }
        let mut select = [0; TPM_PCR_SELECT_MAX];
        select[..size_of_select as usize].copy_from_slice(cursor.load_bytes(size_of_select as usize)?);
        Ok(Self {
            size_of_select,
            select,
        })
    }
}

/// The live register file.
#[derive(Debug, Clone)]
pub struct PcrBank {
    values: [Digest; TPM_NUM_PCR],
}

impl Default for PcrBank {
    fn default() -> Self {
        Self {
            values: [[0; TPM_DIGEST_SIZE]; TPM_NUM_PCR],
        }
    }
}

impl PcrBank {
    fn check_index(index: usize) -> Result<(), TpmError> {
        if index >= TPM_NUM_PCR {
            return Err(TpmError::BadIndex(index as u32));
        }
        Ok(())
    }

    /// Current value of PCR `index`.
    pub fn read(&self, index: usize) -> Result<Digest, TpmError> {
        Self::check_index(index)?;
        Ok(self.values[index])
    }

    /// Extend PCR `index`: `new = SHA1(old || measurement)`. Returns the new
    /// value.
    pub fn extend(
        &mut self,
        crypto: &dyn CryptoProvider,
        index: usize,
        measurement: &Digest,
    ) -> Result<Digest, TpmError> {
        Self::check_index(index)?;
        let mut input = [0; 2 * TPM_DIGEST_SIZE];
        input[..TPM_DIGEST_SIZE].copy_from_slice(&self.values[index]);
        input[TPM_DIGEST_SIZE..].copy_from_slice(measurement);
        self.values[index] = crypto.sha1(&input);
        tracing::debug!(
            pcr = index,
            value = hex::encode(self.values[index]),
            "pcr extended"
        );
        Ok(self.values[index])
    }

    /// Reset PCR `index` to zero.
    pub fn reset(&mut self, index: usize) -> Result<(), TpmError> {
        Self::check_index(index)?;
        self.values[index] = [0; TPM_DIGEST_SIZE];
        Ok(())
    }

    /// `TPM_COMPOSITE_HASH` of the registers named by `selection`.
    ///
    /// An empty selection hashes to the all-zero digest.
    pub fn composite_digest(&self, crypto: &dyn CryptoProvider, selection: &PcrSelection) -> Digest {
        if selection.is_empty() {
            return [0; TPM_DIGEST_SIZE];
        }
        let mut buf = StoreBuffer::new();
        buf.append(selection);
        buf.append_sized_with(|buf| {
            for index in selection.indices() {
                buf.append_bytes(&self.values[index]);
            }
        });
        crypto.sha1(buf.as_bytes())
    }

    fn check_digest(
        &self,
        crypto: &dyn CryptoProvider,
        selection: &PcrSelection,
        expected: &Digest,
    ) -> Result<(), TpmError> {
        if selection.is_empty() {
            return Ok(());
        }
        let actual = self.composite_digest(crypto, selection);
        if &actual != expected {
            tracing::debug!(
                expected = hex::encode(expected),
                actual = hex::encode(actual),
                "pcr composite mismatch"
            );
            return Err(TpmError::WrongPcrValue);
        }
        Ok(())
    }
}

fn check_locality(allowed: LocalitySelection, locality: u8) -> Result<(), TpmError> {
    if !allowed.contains(locality) {
        return Err(TpmError::BadLocality {
            locality,
            allowed: allowed.into_bits(),
        });
    }
    Ok(())
}

fn load_locality(cursor: &mut LoadCursor<'_>) -> Result<LocalitySelection, TpmError> {
    let locality = LocalitySelection::from_bits(cursor.load_u8()?);
    if !locality.is_valid() {
        return Err(TpmError::InvalidPcrInfo("illegal locality selection"));
    }
    Ok(locality)
}

fn locality_bit(locality: u8) -> Result<LocalitySelection, TpmError> {
    if locality > TPM_LOCALITY_MAX {
        return Err(TpmError::BadLocality {
            locality,
            allowed: LocalitySelection::ALL.into_bits(),
        });
    }
    Ok(LocalitySelection::from_bits(1 << locality))
}

/// `TPM_PCR_INFO`: the version 1.1 policy, usable from any locality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrInfo {
    /// Registers the policy covers.
    pub selection: PcrSelection,
    /// Composite digest required at release.
    pub digest_at_release: Digest,
    /// Composite digest recorded at creation.
    pub digest_at_creation: Digest,
}

impl Store for PcrInfo {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append(&self.selection);
        buf.append_bytes(&self.digest_at_release);
        buf.append_bytes(&self.digest_at_creation);
    }
}

impl Load for PcrInfo {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        Ok(Self {
            selection: cursor.load()?,
            digest_at_release: cursor.load_array()?,
            digest_at_creation: cursor.load_array()?,
        })
    }
}

/// `TPM_PCR_INFO_LONG`: the version 1.2 policy with separate creation and
/// release selections and a locality restriction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrInfoLong {
    /// Locality the object was created from.
    pub locality_at_creation: LocalitySelection,
    /// Localities the object may be used from.
    pub locality_at_release: LocalitySelection,
    /// Registers covered by the creation digest.
    pub creation_selection: PcrSelection,
    /// Registers covered by the release digest.
    pub release_selection: PcrSelection,
    /// Composite digest recorded at creation.
    pub digest_at_creation: Digest,
    /// Composite digest required at release.
    pub digest_at_release: Digest,
}

impl PcrInfoLong {
    /// A policy releasing when `selection` hashes to `digest_at_release` at
    /// one of `locality_at_release`.
    pub fn new(
        selection: PcrSelection,
        digest_at_release: Digest,
        locality_at_release: LocalitySelection,
    ) -> Self {
        Self {
            locality_at_creation: LocalitySelection::new().with_zero(true),
            locality_at_release,
            creation_selection: selection,
            release_selection: selection,
            digest_at_creation: [0; TPM_DIGEST_SIZE],
            digest_at_release,
        }
    }
}

impl Store for PcrInfoLong {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append_u16(StructureTag::PcrInfoLong.into());
        buf.append_u8(self.locality_at_creation.into_bits());
        buf.append_u8(self.locality_at_release.into_bits());
        buf.append(&self.creation_selection);
        buf.append(&self.release_selection);
        buf.append_bytes(&self.digest_at_creation);
        buf.append_bytes(&self.digest_at_release);
    }
}

impl Load for PcrInfoLong {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        cursor.check_tag(StructureTag::PcrInfoLong.into())?;
        Ok(Self {
            locality_at_creation: LocalitySelection::from_bits(cursor.load_u8()?),
            locality_at_release: load_locality(cursor)?,
            creation_selection: cursor.load()?,
            release_selection: cursor.load()?,
            digest_at_creation: cursor.load_array()?,
            digest_at_release: cursor.load_array()?,
        })
    }
}

/// `TPM_PCR_INFO_SHORT`: the release-only policy carried by a delegation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrInfoShort {
    /// Registers the policy covers.
    pub selection: PcrSelection,
    /// Localities the delegation may be used from.
    pub locality_at_release: LocalitySelection,
    /// Composite digest required at release.
    pub digest_at_release: Digest,
}

impl Default for PcrInfoShort {
    /// No registers, any locality.
    fn default() -> Self {
        Self {
            selection: PcrSelection::default(),
            locality_at_release: LocalitySelection::ALL,
            digest_at_release: [0; TPM_DIGEST_SIZE],
        }
    }
}

impl PcrInfoShort {
    /// Check the policy against live registers: locality first, then digest.
    pub fn check_release(
        &self,
        crypto: &dyn CryptoProvider,
        pcrs: &PcrBank,
        locality: u8,
    ) -> Result<(), TpmError> {
        check_locality(self.locality_at_release, locality)?;
        pcrs.check_digest(crypto, &self.selection, &self.digest_at_release)
    }
}

impl Store for PcrInfoShort {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append(&self.selection);
        buf.append_u8(self.locality_at_release.into_bits());
        buf.append_bytes(&self.digest_at_release);
    }
}

impl Load for PcrInfoShort {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        Ok(Self {
            selection: cursor.load()?,
            locality_at_release: load_locality(cursor)?,
            digest_at_release: cursor.load_array()?,
        })
    }
}

/// The PCR policy a key carries, in the form matching its key format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPcrPolicy {
    /// Version 1.1 policy: digest only.
    Info(PcrInfo),
    /// Version 1.2 policy: locality and digest.
    Long(PcrInfoLong),
}

impl KeyPcrPolicy {
    /// Check the policy against the live registers and current locality.
    pub fn check_release(
        &self,
        crypto: &dyn CryptoProvider,
        pcrs: &PcrBank,
        locality: u8,
    ) -> Result<(), TpmError> {
        match self {
            KeyPcrPolicy::Info(info) => {
                pcrs.check_digest(crypto, &info.selection, &info.digest_at_release)
            }
            KeyPcrPolicy::Long(long) => {
                check_locality(long.locality_at_release, locality)?;
                pcrs.check_digest(crypto, &long.release_selection, &long.digest_at_release)
            }
        }
    }

    /// Record the creation digest (and, for the long form, the creation
    /// locality) from the live registers.
    pub fn set_creation_digest(
        &mut self,
        crypto: &dyn CryptoProvider,
        pcrs: &PcrBank,
        locality: u8,
    ) -> Result<(), TpmError> {
        match self {
            KeyPcrPolicy::Info(info) => {
                info.digest_at_creation = pcrs.composite_digest(crypto, &info.selection);
            }
            KeyPcrPolicy::Long(long) => {
                long.locality_at_creation = locality_bit(locality)?;
                long.digest_at_creation = pcrs.composite_digest(crypto, &long.creation_selection);
            }
        }
        Ok(())
    }
}

impl Store for KeyPcrPolicy {
    fn store(&self, buf: &mut StoreBuffer) {
        match self {
            KeyPcrPolicy::Info(info) => info.store(buf),
            KeyPcrPolicy::Long(long) => long.store(buf),
        }
    }
}

/// Evaluate an optional policy. An absent policy always releases.
pub fn check_release(
    policy: Option<&KeyPcrPolicy>,
    crypto: &dyn CryptoProvider,
    pcrs: &PcrBank,
    locality: u8,
) -> Result<(), TpmError> {
    match policy {
        Some(policy) => policy.check_release(crypto, pcrs, locality),
        None => Ok(()),
    }
}
