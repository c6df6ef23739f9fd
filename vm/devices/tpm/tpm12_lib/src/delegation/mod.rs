// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Owner and key delegation.
//!
//! A family groups delegations under one verification count. Delegations
//! live either in the fixed-size delegate table or outside the TPM as
//! integrity-protected blobs. Bumping a family's count revokes every
//! delegation stamped with an older one.

pub mod blob;
pub mod family;
mod manage;
pub mod table;

pub use manage::FamilyOp;
pub use manage::TableView;
pub use manage::VerificationTarget;

use crate::error::TpmError;
use crate::pcr::PcrInfoShort;
use crate::secret::Secret;
use tpm12_protocol::Load;
use tpm12_protocol::LoadCursor;
use tpm12_protocol::Store;
use tpm12_protocol::StoreBuffer;
use tpm12_protocol::tpm12proto::DelegateType;
use tpm12_protocol::tpm12proto::StructureTag;

/// `TPM_DELEGATIONS`: which ordinals a delegation grants.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Delegations {
    /// Owner or key layout.
    pub kind: DelegateType,
    /// Primary permission bits.
    pub per1: u32,
    /// Secondary permission bits; no bit is currently defined.
    pub per2: u32,
}

impl Delegations {
    /// Owner permissions.
    pub fn owner(per1: u32) -> Self {
        Self {
            kind: DelegateType::OwnerBits,
            per1,
            per2: 0,
        }
    }

    /// Key permissions.
    pub fn key(per1: u32) -> Self {
        Self {
            kind: DelegateType::KeyBits,
            per1,
            per2: 0,
        }
    }

    /// Reject bits outside the legal mask for this kind.
    pub fn check_masks(&self) -> Result<(), TpmError> {
        let (mask1, mask2) = self.kind.permission_masks();
        if self.per1 & !mask1 != 0 || self.per2 & !mask2 != 0 {
            return Err(TpmError::BadParameter("permission bits outside legal mask"));
        }
        Ok(())
    }
}

impl Store for Delegations {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append_u16(StructureTag::Delegations.into());
        buf.append_u32(self.kind as u32);
        buf.append_u32(self.per1);
        buf.append_u32(self.per2);
    }
}

impl Load for Delegations {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        cursor.check_tag(StructureTag::Delegations.into())?;
        let kind = DelegateType::from_u32(cursor.load_u32()?)
            .ok_or(TpmError::BadParameter("unknown delegate type"))?;
        let delegations = Self {
            kind,
            per1: cursor.load_u32()?,
            per2: cursor.load_u32()?,
        };
        delegations.check_masks()?;
        Ok(delegations)
    }
}

/// `TPM_DELEGATE_PUBLIC`: the public half of a delegation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatePublic {
    /// Caller-chosen label.
    pub row_label: u8,
    /// PCR and locality binding checked at use.
    pub pcr_info: PcrInfoShort,
    /// Granted ordinals.
    pub permissions: Delegations,
    /// Owning family.
    pub family_id: u32,
    /// Family verification count the delegation was stamped with.
    pub verification_count: u32,
}

impl DelegatePublic {
    /// An unbound owner delegation in `family_id` granting `per1`.
    pub fn owner(family_id: u32, per1: u32) -> Self {
        Self {
            row_label: 0,
            pcr_info: PcrInfoShort::default(),
            permissions: Delegations::owner(per1),
            family_id,
            verification_count: 0,
        }
    }

    /// An unbound key delegation in `family_id` granting `per1`.
    pub fn key(family_id: u32, per1: u32) -> Self {
        Self {
            permissions: Delegations::key(per1),
            ..Self::owner(family_id, 0)
        }
    }
}

impl Store for DelegatePublic {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append_u16(StructureTag::DelegatePublic.into());
        buf.append_u8(self.row_label);
        buf.append(&self.pcr_info);
        buf.append(&self.permissions);
        buf.append_u32(self.family_id);
        buf.append_u32(self.verification_count);
    }
}

impl Load for DelegatePublic {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        cursor.check_tag(StructureTag::DelegatePublic.into())?;
        Ok(Self {
            row_label: cursor.load_u8()?,
            pcr_info: cursor.load()?,
            permissions: cursor.load()?,
            family_id: cursor.load_u32()?,
            verification_count: cursor.load_u32()?,
        })
    }
}

/// `TPM_DELEGATE_SENSITIVE`: the secret half, carried encrypted in blobs.
#[derive(Debug, PartialEq, Eq)]
pub struct DelegateSensitive {
    /// Secret a session proves to use the delegation.
    pub auth_value: Secret,
}

impl Store for DelegateSensitive {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append_u16(StructureTag::DelegateSensitive.into());
        buf.append(&self.auth_value);
    }
}

impl Load for DelegateSensitive {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        cursor.check_tag(StructureTag::DelegateSensitive.into())?;
        Ok(Self {
            auth_value: cursor.load()?,
        })
    }
}

/// How the caller of an owner-authorized operation authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authority {
    /// No authorization session.
    Unauthenticated,
    /// The caller proved the owner secret (or the key's usage secret).
    Direct,
    /// The caller proved a delegation's secret; carries its public half.
    Delegated(DelegatePublic),
}
