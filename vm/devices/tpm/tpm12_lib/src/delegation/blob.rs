// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Delegations held outside the TPM.
//!
//! A blob carries the public half in the clear, the sensitive half
//! encrypted under the delegate key, and an HMAC under `tpmProof` computed
//! over the whole blob with the integrity field zeroed.

use super::DelegatePublic;
use crate::crypto::CryptoProvider;
use crate::error::TpmError;
use crate::secret::Secret;
use tpm12_protocol::Digest;
use tpm12_protocol::Load;
use tpm12_protocol::LoadCursor;
use tpm12_protocol::Store;
use tpm12_protocol::StoreBuffer;
use tpm12_protocol::tpm12proto::DelegateType;
use tpm12_protocol::tpm12proto::StructureTag;
use tpm12_protocol::tpm12proto::TPM_DIGEST_SIZE;

const ZERO_DIGEST: Digest = [0; TPM_DIGEST_SIZE];
const OWNER_BLOB: &str = "owner delegation blob";
const KEY_BLOB: &str = "key delegation blob";

fn integrity_hmac(
    crypto: &dyn CryptoProvider,
    tpm_proof: &Secret,
    store: impl FnOnce(&mut StoreBuffer),
) -> Result<Digest, TpmError> {
    let mut buf = StoreBuffer::new();
    store(&mut buf);
    Ok(crypto.hmac_sha1(tpm_proof.as_bytes(), buf.as_bytes())?)
}

fn check_integrity(
    name: &'static str,
    public: &DelegatePublic,
    expected: &Digest,
    found: &Digest,
) -> Result<(), TpmError> {
    if !Secret::new(*expected).matches(found) {
        tracing::warn!(family_id = public.family_id, "{name} failed integrity check");
        return Err(TpmError::Integrity(name));
    }
    Ok(())
}

/// `TPM_DELEGATE_OWNER_BLOB`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerBlob {
    /// Public half; permissions are always owner bits.
    pub public: DelegatePublic,
    /// HMAC over the blob under `tpmProof`.
    pub integrity_digest: Digest,
    /// Vendor data, covered by the HMAC but otherwise unused.
    pub additional_area: Vec<u8>,
    /// Encrypted `TPM_DELEGATE_SENSITIVE`.
    pub sensitive_area: Vec<u8>,
}

impl OwnerBlob {
    fn store_with(&self, buf: &mut StoreBuffer, integrity: &Digest) {
        buf.append_u16(StructureTag::DelegateOwnerBlob.into());
        buf.append(&self.public);
        buf.append_bytes(integrity);
        buf.append_sized(&self.additional_area);
        buf.append_sized(&self.sensitive_area);
    }

    /// HMAC of the blob, with the integrity field zeroed, under `tpm_proof`.
    pub fn compute_integrity(
        &self,
        crypto: &dyn CryptoProvider,
        tpm_proof: &Secret,
    ) -> Result<Digest, TpmError> {
        integrity_hmac(crypto, tpm_proof, |buf| self.store_with(buf, &ZERO_DIGEST))
    }

    /// Check the integrity digest.
    pub fn verify_integrity(
        &self,
        crypto: &dyn CryptoProvider,
        tpm_proof: &Secret,
    ) -> Result<(), TpmError> {
        let expected = self.compute_integrity(crypto, tpm_proof)?;
        check_integrity(OWNER_BLOB, &self.public, &expected, &self.integrity_digest)
    }
}

impl Store for OwnerBlob {
    fn store(&self, buf: &mut StoreBuffer) {
        self.store_with(buf, &self.integrity_digest);
    }
}

impl Load for OwnerBlob {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        cursor.check_tag(StructureTag::DelegateOwnerBlob.into())?;
        let public: DelegatePublic = cursor.load()?;
        if public.permissions.kind != DelegateType::OwnerBits {
            return Err(TpmError::InvalidStructure("owner blob with key permissions"));
        }
        Ok(Self {
            public,
            integrity_digest: cursor.load_array()?,
            additional_area: cursor.load_sized()?.to_vec(),
            sensitive_area: cursor.load_sized()?.to_vec(),
        })
    }
}

/// `TPM_DELEGATE_KEY_BLOB`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlob {
    /// Public half; permissions are always key bits.
    pub public: DelegatePublic,
    /// HMAC over the blob under `tpmProof`.
    pub integrity_digest: Digest,
    /// SHA-1 of the delegated key's public key.
    pub pub_key_digest: Digest,
    /// Vendor data, covered by the HMAC but otherwise unused.
    pub additional_area: Vec<u8>,
    /// Encrypted `TPM_DELEGATE_SENSITIVE`.
    pub sensitive_area: Vec<u8>,
}

impl KeyBlob {
    fn store_with(&self, buf: &mut StoreBuffer, integrity: &Digest) {
        buf.append_u16(StructureTag::DelegateKeyBlob.into());
        buf.append(&self.public);
        buf.append_bytes(integrity);
        buf.append_bytes(&self.pub_key_digest);
        buf.append_sized(&self.additional_area);
        buf.append_sized(&self.sensitive_area);
    }

    /// HMAC of the blob, with the integrity field zeroed, under `tpm_proof`.
    pub fn compute_integrity(
        &self,
        crypto: &dyn CryptoProvider,
        tpm_proof: &Secret,
    ) -> Result<Digest, TpmError> {
        integrity_hmac(crypto, tpm_proof, |buf| self.store_with(buf, &ZERO_DIGEST))
    }

    /// Check the integrity digest.
    pub fn verify_integrity(
        &self,
        crypto: &dyn CryptoProvider,
        tpm_proof: &Secret,
    ) -> Result<(), TpmError> {
        let expected = self.compute_integrity(crypto, tpm_proof)?;
        check_integrity(KEY_BLOB, &self.public, &expected, &self.integrity_digest)
    }
}

impl Store for KeyBlob {
    fn store(&self, buf: &mut StoreBuffer) {
        self.store_with(buf, &self.integrity_digest);
    }
}

impl Load for KeyBlob {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        cursor.check_tag(StructureTag::DelegateKeyBlob.into())?;
        let public: DelegatePublic = cursor.load()?;
        if public.permissions.kind != DelegateType::KeyBits {
            return Err(TpmError::InvalidStructure("key blob with owner permissions"));
        }
        Ok(Self {
            public,
            integrity_digest: cursor.load_array()?,
            pub_key_digest: cursor.load_array()?,
            additional_area: cursor.load_sized()?.to_vec(),
            sensitive_area: cursor.load_sized()?.to_vec(),
        })
    }
}

/// Either kind of delegation blob, distinguished by its leading tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationBlob {
    /// Owner delegation.
    Owner(OwnerBlob),
    /// Key delegation.
    Key(KeyBlob),
}

impl DelegationBlob {
    /// The public half.
    pub fn public(&self) -> &DelegatePublic {
        match self {
            DelegationBlob::Owner(blob) => &blob.public,
            DelegationBlob::Key(blob) => &blob.public,
        }
    }

    fn public_mut(&mut self) -> &mut DelegatePublic {
        match self {
            DelegationBlob::Owner(blob) => &mut blob.public,
            DelegationBlob::Key(blob) => &mut blob.public,
        }
    }

    /// The encrypted sensitive area.
    pub fn sensitive_area(&self) -> &[u8] {
        match self {
            DelegationBlob::Owner(blob) => &blob.sensitive_area,
            DelegationBlob::Key(blob) => &blob.sensitive_area,
        }
    }

    fn integrity_digest_mut(&mut self) -> &mut Digest {
        match self {
            DelegationBlob::Owner(blob) => &mut blob.integrity_digest,
            DelegationBlob::Key(blob) => &mut blob.integrity_digest,
        }
    }

    /// HMAC of the blob, with the integrity field zeroed, under `tpm_proof`.
    pub fn compute_integrity(
        &self,
        crypto: &dyn CryptoProvider,
        tpm_proof: &Secret,
    ) -> Result<Digest, TpmError> {
        match self {
            DelegationBlob::Owner(blob) => blob.compute_integrity(crypto, tpm_proof),
            DelegationBlob::Key(blob) => blob.compute_integrity(crypto, tpm_proof),
        }
    }

    /// Recompute and store the integrity digest.
    pub fn seal(&mut self, crypto: &dyn CryptoProvider, tpm_proof: &Secret) -> Result<(), TpmError> {
        let digest = self.compute_integrity(crypto, tpm_proof)?;
        *self.integrity_digest_mut() = digest;
        Ok(())
    }

    /// Check the integrity digest.
    pub fn verify_integrity(
        &self,
        crypto: &dyn CryptoProvider,
        tpm_proof: &Secret,
    ) -> Result<(), TpmError> {
        match self {
            DelegationBlob::Owner(blob) => blob.verify_integrity(crypto, tpm_proof),
            DelegationBlob::Key(blob) => blob.verify_integrity(crypto, tpm_proof),
        }
    }

    /// Restamp the verification count; the caller reseals.
    pub(super) fn set_verification_count(&mut self, count: u32) {
        self.public_mut().verification_count = count;
    }
}

impl Store for DelegationBlob {
    fn store(&self, buf: &mut StoreBuffer) {
        match self {
            DelegationBlob::Owner(blob) => blob.store(buf),
            DelegationBlob::Key(blob) => blob.store(buf),
        }
    }
}

impl Load for DelegationBlob {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        let tag = cursor.peek_u16()?;
        match StructureTag::from_u16(tag) {
            Some(StructureTag::DelegateOwnerBlob) => Ok(Self::Owner(cursor.load()?)),
            Some(StructureTag::DelegateKeyBlob) => Ok(Self::Key(cursor.load()?)),
            _ => Err(TpmError::BadParameter("not a delegation blob")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SoftwareCrypto;

    fn owner_blob() -> DelegationBlob {
        let mut public = DelegatePublic::owner(4, 1 << 2);
        public.verification_count = 1;
        DelegationBlob::Owner(OwnerBlob {
            public,
            integrity_digest: [0; 20],
            additional_area: vec![],
            sensitive_area: vec![0xee; 38],
        })
    }

    #[test]
    fn integrity_covers_every_field() {
        let proof = Secret::new([0x33; 20]);
        let mut blob = owner_blob();
        blob.seal(&SoftwareCrypto, &proof).unwrap();
        blob.verify_integrity(&SoftwareCrypto, &proof).unwrap();

        let reparsed = DelegationBlob::from_bytes(&blob.to_bytes()).unwrap();
        reparsed.verify_integrity(&SoftwareCrypto, &proof).unwrap();

        let mut tampered = blob.clone();
        if let DelegationBlob::Owner(owner) = &mut tampered {
            owner.public.permissions.per1 |= 1;
        }
        assert!(matches!(
            tampered.verify_integrity(&SoftwareCrypto, &proof),
            Err(TpmError::Integrity(_))
        ));

        let mut tampered = blob.clone();
        if let DelegationBlob::Owner(owner) = &mut tampered {
            owner.additional_area.push(0);
        }
        assert!(tampered.verify_integrity(&SoftwareCrypto, &proof).is_err());

        assert!(
            blob.verify_integrity(&SoftwareCrypto, &Secret::new([0x34; 20]))
                .is_err()
        );
    }

    #[test]
    fn tag_dispatch() {
        let bytes = owner_blob().to_bytes();
        assert!(matches!(
            DelegationBlob::from_bytes(&bytes).unwrap(),
            DelegationBlob::Owner(_)
        ));

        let key = DelegationBlob::Key(KeyBlob {
            public: DelegatePublic::key(4, 1),
            integrity_digest: [1; 20],
            pub_key_digest: [2; 20],
            additional_area: vec![3],
            sensitive_area: vec![4; 38],
        });
        let bytes = key.to_bytes();
        assert_eq!(&bytes[..2], &[0x00, 0x27]);
        assert_eq!(DelegationBlob::from_bytes(&bytes).unwrap(), key);

        let mut unknown = bytes.clone();
        unknown[1] = 0x1c;
        assert!(matches!(
            DelegationBlob::from_bytes(&unknown),
            Err(TpmError::BadParameter(_))
        ));
    }

    #[test]
    fn blob_kind_must_match_permissions() {
        let mut bytes = owner_blob().to_bytes();
        // Owner blob tag over a public half with key permissions.
        let kind_offset = 2 + 2 + 1 + (2 + 3) + 1 + 20 + 2 + 3;
        assert_eq!(bytes[kind_offset], 1);
        bytes[kind_offset] = 2;
        assert!(matches!(
            OwnerBlob::from_bytes(&bytes),
            Err(TpmError::InvalidStructure(_))
        ));
    }
}
