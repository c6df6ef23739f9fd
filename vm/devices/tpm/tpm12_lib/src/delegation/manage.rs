// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Delegation commands on [`TpmState`].

use super::Authority;
use super::DelegatePublic;
use super::DelegateSensitive;
use super::blob::DelegationBlob;
use super::blob::KeyBlob;
use super::blob::OwnerBlob;
use super::family::FamilyRow;
use super::table::DelegateTableRow;
use crate::error::TpmError;
use crate::key::slots::KeyHandle;
use crate::pcr;
use crate::permission;
use crate::secret::Secret;
use crate::state::TpmState;
use tpm12_protocol::Load;
use tpm12_protocol::Store;
use tpm12_protocol::StoreBuffer;
use tpm12_protocol::tpm12proto::CommandCode;
use tpm12_protocol::tpm12proto::DelegateType;
use tpm12_protocol::tpm12proto::FamilyOperation;
use zeroize::Zeroizing;

/// A `TPM_Delegate_Manage` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyOp {
    /// Create a family with the given label.
    Create {
        /// Label for the new row.
        label: u8,
    },
    /// Set or clear the enabled flag.
    Enable(bool),
    /// Set or clear the admin lock.
    Admin(bool),
    /// Remove the family.
    Invalidate,
}

impl FamilyOp {
    /// Decode an opcode and its `opData`.
    pub fn from_wire(op_code: u32, op_data: &[u8]) -> Result<Self, TpmError> {
        let op = FamilyOperation::from_u32(op_code)
            .ok_or(TpmError::BadParameter("unknown family operation"))?;
        let byte = || match op_data {
            [b] => Ok(*b),
            _ => Err(TpmError::BadParameter("opData must be one byte")),
        };
        Ok(match op {
            FamilyOperation::Create => FamilyOp::Create { label: byte()? },
            FamilyOperation::Enable => FamilyOp::Enable(byte()? != 0),
            FamilyOperation::Admin => FamilyOp::Admin(byte()? != 0),
            FamilyOperation::Invalidate => FamilyOp::Invalidate,
        })
    }
}

/// What `TPM_Delegate_UpdateVerification` restamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationTarget {
    /// The delegate table row at this index.
    Row(u32),
    /// An external blob, returned restamped and resealed.
    Blob(DelegationBlob),
}

/// Snapshot returned by `TPM_Delegate_ReadTable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableView {
    /// Valid family rows.
    pub families: Vec<FamilyRow>,
    /// Valid delegate rows with their index. Secrets are never exposed.
    pub delegates: Vec<(u32, DelegatePublic)>,
}

impl Store for TableView {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append_sized_with(|buf| {
            for row in &self.families {
                buf.append(row);
            }
        });
        buf.append_sized_with(|buf| {
            for (index, public) in &self.delegates {
                buf.append_u32(*index);
                buf.append(public);
            }
        });
    }
}

fn check_same_family(delegation: &DelegatePublic, target: u32) -> Result<(), TpmError> {
    if delegation.family_id != target {
        return Err(TpmError::DelegateFamily {
            caller: delegation.family_id,
            target,
        });
    }
    Ok(())
}

impl TpmState {
    /// Check owner authorization for `ordinal`. Returns the delegation the
    /// caller used, if any.
    fn authorize_owner<'a>(
        &self,
        authority: &'a Authority,
        ordinal: CommandCode,
    ) -> Result<Option<&'a DelegatePublic>, TpmError> {
        match authority {
            Authority::Unauthenticated if self.owner_installed => {
                Err(TpmError::AuthFail("owner authorization required"))
            }
            Authority::Unauthenticated => Ok(None),
            Authority::Direct | Authority::Delegated(_) if !self.owner_installed => {
                Err(TpmError::AuthFail("no owner installed"))
            }
            Authority::Direct => Ok(None),
            Authority::Delegated(public) => {
                permission::check_delegated_use(
                    self.crypto.as_ref(),
                    public,
                    DelegateType::OwnerBits,
                    ordinal.into(),
                    &self.pcrs,
                    self.locality,
                )?;
                Ok(Some(public))
            }
        }
    }

    fn require_owner(&self) -> Result<(), TpmError> {
        if !self.owner_installed {
            return Err(TpmError::AuthFail("no owner installed"));
        }
        Ok(())
    }

    /// `TPM_Delegate_Manage`. Returns the family id acted on; for
    /// [`FamilyOp::Create`] this is the newly assigned id and `family_id` is
    /// ignored.
    ///
    /// Without an owner, only unauthenticated callers are accepted and an
    /// admin-locked family refuses every operation but creation.
    pub fn delegate_manage(
        &mut self,
        family_id: u32,
        op: FamilyOp,
        authority: &Authority,
    ) -> Result<u32, TpmError> {
        match op {
            FamilyOp::Create { label } => self.create_family(label, authority),
            FamilyOp::Enable(enabled) => {
                self.check_manage(family_id, authority)?;
                self.families.get_mut(family_id)?.flags.set_enabled(enabled);
                tracing::info!(family_id, enabled, "family enable changed");
                Ok(family_id)
            }
            FamilyOp::Admin(locked) => {
                self.check_manage(family_id, authority)?;
                self.families.get_mut(family_id)?.flags.set_admin_lock(locked);
                tracing::info!(family_id, locked, "family admin lock changed");
                Ok(family_id)
            }
            FamilyOp::Invalidate => {
                self.check_manage(family_id, authority)?;
                self.families.invalidate(family_id)?;
                let cleared = if self.config.invalidate_rows_with_family {
                    self.delegates.invalidate_family(family_id)
                } else {
                    0
                };
                tracing::info!(family_id, cleared, "family invalidated");
                Ok(family_id)
            }
        }
    }

    fn create_family(&mut self, label: u8, authority: &Authority) -> Result<u32, TpmError> {
        // A new family has no id yet, so there is no same-family check.
        self.authorize_owner(authority, CommandCode::DelegateManage)?;
        if !self.families.has_room() {
            return Err(TpmError::Resources("family table"));
        }
        let family_id = self
            .last_family_id
            .checked_add(1)
            .ok_or(TpmError::Resources("family id space"))?;
        self.families.create(label, family_id)?;
        self.last_family_id = family_id;
        tracing::info!(family_id, label, "family created");
        Ok(family_id)
    }

    /// Authorization for managing an existing family.
    fn check_manage(&self, family_id: u32, authority: &Authority) -> Result<(), TpmError> {
        let family = self.families.get(family_id)?;
        if let Some(delegated) = self.authorize_owner(authority, CommandCode::DelegateManage)? {
            check_same_family(delegated, family_id)?;
        }
        if !self.owner_installed && family.flags.admin_lock() {
            return Err(TpmError::DelegateLock(family_id));
        }
        Ok(())
    }

    /// Validate a new delegation against its family and the caller.
    fn check_new_delegation(
        &self,
        public: &DelegatePublic,
        kind: DelegateType,
        delegated: Option<&DelegatePublic>,
    ) -> Result<u32, TpmError> {
        if public.permissions.kind != kind {
            return Err(TpmError::BadParameter("delegation kind does not match command"));
        }
        public.permissions.check_masks()?;
        let family = self.families.get(public.family_id)?;
        if let Some(delegated) = delegated {
            check_same_family(delegated, public.family_id)?;
            if !family.flags.enabled() {
                return Err(TpmError::DisabledCmd(public.family_id));
            }
            permission::check_no_escalation(&public.permissions, &delegated.permissions)?;
        }
        Ok(family.verification_count)
    }

    fn seal_sensitive(&self, secret: Secret) -> Result<Vec<u8>, TpmError> {
        let plaintext = Zeroizing::new(DelegateSensitive { auth_value: secret }.to_bytes());
        self.crypto
            .sym_encrypt(&self.delegate_key, &plaintext)
            .map_err(|err| TpmError::Encrypt("delegate sensitive area", err))
    }

    fn open_sensitive(&self, sensitive_area: &[u8]) -> Result<DelegateSensitive, TpmError> {
        let plaintext = self
            .crypto
            .sym_decrypt(&self.delegate_key, sensitive_area)
            .map_err(|err| TpmError::Decrypt("delegate sensitive area", err))?;
        DelegateSensitive::from_bytes(&plaintext)
    }

    /// `TPM_Delegate_CreateOwnerDelegation`: issue an owner delegation blob
    /// granting `public`'s permissions, usable with `secret`.
    ///
    /// With `increment`, the family's verification count is bumped first,
    /// revoking every earlier delegation of the family.
    pub fn create_owner_blob(
        &mut self,
        public: DelegatePublic,
        secret: Secret,
        authority: &Authority,
        increment: bool,
    ) -> Result<OwnerBlob, TpmError> {
        self.require_owner()?;
        let delegated =
            self.authorize_owner(authority, CommandCode::DelegateCreateOwnerDelegation)?;
        let count =
            self.check_new_delegation(&public, DelegateType::OwnerBits, delegated)?;
        let count = if increment {
            count.wrapping_add(1)
        } else {
            count
        };

        let mut blob = OwnerBlob {
            public: DelegatePublic {
                verification_count: count,
                ..public
            },
            integrity_digest: Default::default(),
            additional_area: Vec::new(),
            sensitive_area: self.seal_sensitive(secret)?,
        };
        blob.integrity_digest = blob.compute_integrity(self.crypto.as_ref(), &self.tpm_proof)?;

        let family_id = blob.public.family_id;
        if increment {
            self.families.get_mut(family_id)?.verification_count = count;
        }
        tracing::info!(family_id, count, increment, "owner delegation created");
        Ok(blob)
    }

    /// `TPM_Delegate_CreateKeyDelegation`: issue a key delegation blob for
    /// the loaded key at `key`.
    ///
    /// [`Authority::Direct`] means the caller proved the key's usage secret.
    /// A delegated caller must hold a key delegation granting this ordinal.
    /// The key's PCR and locality policy must release it.
    pub fn create_key_blob(
        &self,
        key: KeyHandle,
        public: DelegatePublic,
        secret: Secret,
        authority: &Authority,
    ) -> Result<KeyBlob, TpmError> {
        let key = self.keys.get(key)?;
        let delegated = match authority {
            Authority::Unauthenticated => {
                return Err(TpmError::AuthFail("key authorization required"));
            }
            Authority::Direct => None,
            Authority::Delegated(delegation) => {
                permission::check_delegated_use(
                    self.crypto.as_ref(),
                    delegation,
                    DelegateType::KeyBits,
                    CommandCode::DelegateCreateKeyDelegation.into(),
                    &self.pcrs,
                    self.locality,
                )?;
                Some(delegation)
            }
        };
        pcr::check_release(key.pcr_policy(), self.crypto.as_ref(), &self.pcrs, self.locality)?;
        let count = self.check_new_delegation(&public, DelegateType::KeyBits, delegated)?;

        let mut blob = KeyBlob {
            public: DelegatePublic {
                verification_count: count,
                ..public
            },
            integrity_digest: Default::default(),
            pub_key_digest: key.pubkey_digest(self.crypto.as_ref()),
            additional_area: Vec::new(),
            sensitive_area: self.seal_sensitive(secret)?,
        };
        blob.integrity_digest = blob.compute_integrity(self.crypto.as_ref(), &self.tpm_proof)?;
        tracing::info!(
            family_id = blob.public.family_id,
            count,
            "key delegation created"
        );
        Ok(blob)
    }

    /// `TPM_Delegate_LoadOwnerDelegation`: install an owner blob in the
    /// delegate table at `index`.
    ///
    /// Without an owner the blob is taken as provisioning data: its
    /// sensitive area is the plaintext `TPM_DELEGATE_SENSITIVE` and no
    /// integrity check applies, but an admin-locked family refuses it.
    pub fn load_owner_blob(
        &mut self,
        blob: &OwnerBlob,
        index: u32,
        authority: &Authority,
    ) -> Result<(), TpmError> {
        if blob.public.permissions.kind != DelegateType::OwnerBits {
            return Err(TpmError::InvalidStructure("owner blob with key permissions"));
        }
        let family_id = blob.public.family_id;
        let family = self.families.get(family_id)?;
        let delegated =
            self.authorize_owner(authority, CommandCode::DelegateLoadOwnerDelegation)?;
        if let Some(delegated) = delegated {
            check_same_family(delegated, family_id)?;
        }
        if !self.owner_installed && family.flags.admin_lock() {
            return Err(TpmError::DelegateLock(family_id));
        }
        if !family.flags.enabled() {
            return Err(TpmError::DisabledCmd(family_id));
        }

        let sensitive = if self.owner_installed {
            blob.verify_integrity(self.crypto.as_ref(), &self.tpm_proof)?;
            self.open_sensitive(&blob.sensitive_area)?
        } else {
            DelegateSensitive::from_bytes(&blob.sensitive_area)?
        };
        let slot = self.delegates.slot(index)?;

        self.delegates.write(
            slot,
            DelegateTableRow {
                public: blob.public.clone(),
                auth_value: sensitive.auth_value,
            },
        );
        tracing::info!(index, family_id, "owner delegation loaded");
        Ok(())
    }

    /// `TPM_Delegate_UpdateVerification`: restamp a row or blob with its
    /// family's current verification count.
    ///
    /// Returns the resealed blob for [`VerificationTarget::Blob`].
    pub fn update_verification(
        &mut self,
        target: VerificationTarget,
        authority: &Authority,
    ) -> Result<Option<DelegationBlob>, TpmError> {
        self.require_owner()?;
        let delegated =
            self.authorize_owner(authority, CommandCode::DelegateUpdateVerification)?;
        let family_id = match &target {
            VerificationTarget::Row(index) => self.delegates.row(*index)?.public.family_id,
            VerificationTarget::Blob(blob) => {
                blob.verify_integrity(self.crypto.as_ref(), &self.tpm_proof)?;
                blob.public().family_id
            }
        };
        let family = self.families.get(family_id)?;
        if let Some(delegated) = delegated {
            check_same_family(delegated, family_id)?;
            if !family.flags.enabled() {
                return Err(TpmError::DisabledCmd(family_id));
            }
        }
        let count = family.verification_count;

        match target {
            VerificationTarget::Row(index) => {
                self.delegates.row_mut(index)?.public.verification_count = count;
                tracing::info!(index, family_id, count, "delegate row reverified");
                Ok(None)
            }
            VerificationTarget::Blob(mut blob) => {
                blob.set_verification_count(count);
                blob.seal(self.crypto.as_ref(), &self.tpm_proof)?;
                tracing::info!(family_id, count, "delegation blob reverified");
                Ok(Some(blob))
            }
        }
    }

    /// Open a delegation blob for use: its family must exist and be
    /// enabled, its count must be current and its integrity must verify.
    /// Returns the public half and the secret a session proves.
    pub fn open_delegation_blob(
        &self,
        blob: &DelegationBlob,
    ) -> Result<(DelegatePublic, Secret), TpmError> {
        let public = blob.public();
        let family = self.families.get_enabled(public.family_id)?;
        if public.verification_count != family.verification_count {
            return Err(TpmError::FamilyCount {
                family_id: public.family_id,
                found: public.verification_count,
                current: family.verification_count,
            });
        }
        blob.verify_integrity(self.crypto.as_ref(), &self.tpm_proof)?;
        let sensitive = self.open_sensitive(blob.sensitive_area())?;
        Ok((public.clone(), sensitive.auth_value))
    }

    /// `TPM_Delegate_VerifyDelegation`: check that a blob is currently
    /// usable. Read-only.
    pub fn verify_delegation(&self, blob: &DelegationBlob) -> Result<(), TpmError> {
        self.open_delegation_blob(blob).map(drop)
    }

    /// Check that a key delegation blob is bound to the loaded key at
    /// `key`.
    pub fn verify_key_blob_for(&self, blob: &KeyBlob, key: KeyHandle) -> Result<(), TpmError> {
        let digest = Secret::new(self.keys.get(key)?.pubkey_digest(self.crypto.as_ref()));
        if !digest.matches(&blob.pub_key_digest) {
            return Err(TpmError::AuthFail("key delegation is bound to another key"));
        }
        Ok(())
    }

    /// Resolve a delegate table row for use by a delegated session: the row
    /// must be valid, its family present and enabled, and its count current.
    pub fn lookup_row_for_use(&self, index: u32) -> Result<(&DelegatePublic, &Secret), TpmError> {
        let row = self.delegates.row(index)?;
        let public = &row.public;
        let family = self.families.get_enabled(public.family_id)?;
        if public.verification_count != family.verification_count {
            return Err(TpmError::FamilyCount {
                family_id: public.family_id,
                found: public.verification_count,
                current: family.verification_count,
            });
        }
        Ok((public, &row.auth_value))
    }

    /// `TPM_Delegate_ReadTable`: the public contents of both tables.
    pub fn read_table(&self) -> TableView {
        TableView {
            families: self.families.iter().cloned().collect(),
            delegates: self
                .delegates
                .iter()
                .map(|(index, row)| (index, row.public.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TpmConfig;
    use crate::crypto::SoftwareCrypto;
    use crate::key::KeySecrets;
    use crate::key::KeyTemplate;
    use crate::key::parms::KeyParms;
    use crate::pcr::KeyPcrPolicy;
    use crate::pcr::PcrInfoLong;
    use crate::pcr::PcrInfoShort;
    use crate::pcr::PcrSelection;
    use crate::test_helpers::init_tracing;
    use crate::test_helpers::small_bind_keypair;
    use crate::test_helpers::storage_keypair;
    use std::sync::Arc;
    use tpm12_protocol::tpm12proto::AuthDataUsage;
    use tpm12_protocol::tpm12proto::EncScheme;
    use tpm12_protocol::tpm12proto::KeyFlags;
    use tpm12_protocol::tpm12proto::KeyUsage;
    use tpm12_protocol::tpm12proto::LocalitySelection;
    use tpm12_protocol::tpm12proto::SigScheme;
    use tpm12_protocol::tpm12proto::rc;

    const MANAGE: u32 = 1 << 2;
    const CREATE_OWNER: u32 = 1 << 1;
    const UPDATE_VERIFICATION: u32 = 1 << 5;
    const LOAD_OWNER: u32 = 1 << 24;

    fn owned_state() -> TpmState {
        init_tracing();
        let mut state = TpmState::new(TpmConfig::default(), Arc::new(SoftwareCrypto)).unwrap();
        state.install_owner();
        state
    }

    fn enabled_family(state: &mut TpmState) -> u32 {
        let id = state
            .delegate_manage(0, FamilyOp::Create { label: 1 }, &Authority::Direct)
            .unwrap();
        state
            .delegate_manage(id, FamilyOp::Enable(true), &Authority::Direct)
            .unwrap();
        id
    }

    fn owner_blob(state: &mut TpmState, family: u32, per1: u32, increment: bool) -> OwnerBlob {
        state
            .create_owner_blob(
                DelegatePublic::owner(family, per1),
                Secret::new([0x5a; 20]),
                &Authority::Direct,
                increment,
            )
            .unwrap()
    }

    #[test]
    fn family_ids_are_sequential() {
        let mut state = owned_state();
        let a = enabled_family(&mut state);
        let b = enabled_family(&mut state);
        assert_eq!((a, b), (1, 2));
        let row = state.families().get(b).unwrap();
        assert_eq!(row.verification_count, 1);
        assert!(row.flags.enabled());

        state
            .delegate_manage(a, FamilyOp::Invalidate, &Authority::Direct)
            .unwrap();
        assert_eq!(enabled_family(&mut state), 3);
        assert!(matches!(
            state.delegate_manage(a, FamilyOp::Enable(true), &Authority::Direct),
            Err(TpmError::BadIndex(1))
        ));
    }

    #[test]
    fn family_table_fills_up() {
        let mut state = owned_state();
        for _ in 0..8 {
            enabled_family(&mut state);
        }
        let err = state
            .delegate_manage(0, FamilyOp::Create { label: 0 }, &Authority::Direct)
            .unwrap_err();
        assert_eq!(err.return_code(), rc::TPM_RESOURCES);
        assert_eq!(state.last_family_id(), 8);
    }

    #[test]
    fn admin_lock_without_owner() {
        init_tracing();
        let mut state = TpmState::new(TpmConfig::default(), Arc::new(SoftwareCrypto)).unwrap();
        let none = Authority::Unauthenticated;
        let id = state
            .delegate_manage(0, FamilyOp::Create { label: 7 }, &none)
            .unwrap();
        state
            .delegate_manage(id, FamilyOp::Admin(true), &none)
            .unwrap();
        assert!(matches!(
            state.delegate_manage(id, FamilyOp::Enable(true), &none),
            Err(TpmError::DelegateLock(_))
        ));
        assert!(matches!(
            state.delegate_manage(id, FamilyOp::Admin(false), &none),
            Err(TpmError::DelegateLock(_))
        ));

        // An owner may still manage the locked family.
        state.install_owner();
        state
            .delegate_manage(id, FamilyOp::Admin(false), &Authority::Direct)
            .unwrap();
        assert!(matches!(
            state.delegate_manage(id, FamilyOp::Enable(true), &none),
            Err(TpmError::AuthFail(_))
        ));
    }

    #[test]
    fn owner_blob_load_and_use() {
        let mut state = owned_state();
        let family = enabled_family(&mut state);
        let blob = owner_blob(&mut state, family, MANAGE, false);
        assert_eq!(blob.public.verification_count, 1);

        state.load_owner_blob(&blob, 1, &Authority::Direct).unwrap();
        let (public, secret) = state.lookup_row_for_use(1).unwrap();
        assert_eq!(public.permissions.per1, MANAGE);
        assert_eq!(*secret, Secret::new([0x5a; 20]));
        assert!(matches!(
            state.lookup_row_for_use(0),
            Err(TpmError::BadIndex(0))
        ));
        assert!(matches!(
            state.load_owner_blob(&blob, 2, &Authority::Direct),
            Err(TpmError::BadIndex(2))
        ));

        let view = state.read_table();
        assert_eq!(view.families.len(), 1);
        assert_eq!(view.delegates, [(1, blob.public.clone())]);
    }

    #[test]
    fn tampered_blob_is_rejected() {
        let mut state = owned_state();
        let family = enabled_family(&mut state);
        let mut blob = owner_blob(&mut state, family, MANAGE, false);
        blob.public.permissions.per1 = u32::MAX;
        let err = state
            .load_owner_blob(&blob, 0, &Authority::Direct)
            .unwrap_err();
        assert!(matches!(err, TpmError::Integrity(_)));
        assert_eq!(err.return_code(), rc::TPM_AUTHFAIL);
        assert!(state.delegates().row(0).is_err());
    }

    #[test]
    fn increment_revokes_outstanding_blobs() {
        let mut state = owned_state();
        let family = enabled_family(&mut state);
        let first = DelegationBlob::Owner(owner_blob(&mut state, family, MANAGE, false));
        state.verify_delegation(&first).unwrap();

        let second = DelegationBlob::Owner(owner_blob(&mut state, family, MANAGE, true));
        assert_eq!(state.families().get(family).unwrap().verification_count, 2);
        state.verify_delegation(&second).unwrap();
        let err = state.verify_delegation(&first).unwrap_err();
        assert!(matches!(
            err,
            TpmError::FamilyCount {
                found: 1,
                current: 2,
                ..
            }
        ));
        assert_eq!(err.return_code(), rc::TPM_FAMILYCOUNT);

        let restamped = state
            .update_verification(VerificationTarget::Blob(first), &Authority::Direct)
            .unwrap()
            .unwrap();
        assert_eq!(restamped.public().verification_count, 2);
        state.verify_delegation(&restamped).unwrap();
    }

    #[test]
    fn stale_row_until_reverified() {
        let mut state = owned_state();
        let family = enabled_family(&mut state);
        let blob = owner_blob(&mut state, family, MANAGE, false);
        state.load_owner_blob(&blob, 0, &Authority::Direct).unwrap();
        owner_blob(&mut state, family, MANAGE, true);

        assert!(matches!(
            state.lookup_row_for_use(0),
            Err(TpmError::FamilyCount { .. })
        ));
        let out = state
            .update_verification(VerificationTarget::Row(0), &Authority::Direct)
            .unwrap();
        assert!(out.is_none());
        state.lookup_row_for_use(0).unwrap();
    }

    #[test]
    fn disabled_family_blocks_use() {
        let mut state = owned_state();
        let family = enabled_family(&mut state);
        let blob = owner_blob(&mut state, family, MANAGE, false);
        state.load_owner_blob(&blob, 0, &Authority::Direct).unwrap();
        state
            .delegate_manage(family, FamilyOp::Enable(false), &Authority::Direct)
            .unwrap();
        assert!(matches!(
            state.lookup_row_for_use(0),
            Err(TpmError::DisabledCmd(_))
        ));
        assert!(matches!(
            state.verify_delegation(&DelegationBlob::Owner(blob.clone())),
            Err(TpmError::DisabledCmd(_))
        ));
        assert!(matches!(
            state.load_owner_blob(&blob, 1, &Authority::Direct),
            Err(TpmError::DisabledCmd(_))
        ));
    }

    #[test]
    fn invalidated_family_leaves_stale_row() {
        init_tracing();
        let config = TpmConfig {
            delegate_table_capacity: 4,
            ..Default::default()
        };
        let mut state = TpmState::new(config, Arc::new(SoftwareCrypto)).unwrap();
        state.install_owner();
        let family = enabled_family(&mut state);
        let blob = owner_blob(&mut state, family, MANAGE, false);
        state.load_owner_blob(&blob, 3, &Authority::Direct).unwrap();

        state
            .delegate_manage(family, FamilyOp::Invalidate, &Authority::Direct)
            .unwrap();
        assert_eq!(state.delegates().row(3).unwrap().public.family_id, family);
        assert_eq!(state.read_table().delegates.len(), 1);

        // A new family never reuses the id, so the row stays unusable.
        assert_eq!(enabled_family(&mut state), family + 1);
        assert!(matches!(
            state.lookup_row_for_use(3),
            Err(TpmError::BadIndex(id)) if id == family
        ));
    }

    #[test]
    fn rows_cleared_when_configured() {
        init_tracing();
        let config = TpmConfig {
            invalidate_rows_with_family: true,
            ..Default::default()
        };
        let mut state = TpmState::new(config, Arc::new(SoftwareCrypto)).unwrap();
        state.install_owner();
        let family = enabled_family(&mut state);
        let blob = owner_blob(&mut state, family, MANAGE, false);
        state.load_owner_blob(&blob, 1, &Authority::Direct).unwrap();
        state
            .delegate_manage(family, FamilyOp::Invalidate, &Authority::Direct)
            .unwrap();

        assert!(matches!(
            state.delegates().row(1),
            Err(TpmError::BadIndex(1))
        ));
    }

    #[test]
    fn delegated_caller_creates_family() {
        let mut state = owned_state();
        let mine = enabled_family(&mut state);
        let manager = Authority::Delegated(DelegatePublic::owner(mine, MANAGE));
        let created = state
            .delegate_manage(0, FamilyOp::Create { label: 2 }, &manager)
            .unwrap();
        assert_eq!(created, mine + 1);
        assert_eq!(state.families().get(created).unwrap().label, 2);

        let no_manage = Authority::Delegated(DelegatePublic::owner(mine, CREATE_OWNER));
        assert!(matches!(
            state.delegate_manage(0, FamilyOp::Create { label: 3 }, &no_manage),
            Err(TpmError::AuthFail(_))
        ));
        assert_eq!(state.last_family_id(), created);
    }

    #[test]
    fn delegated_caller_stays_in_family() {
        let mut state = owned_state();
        let mine = enabled_family(&mut state);
        let other = enabled_family(&mut state);
        let mut public = DelegatePublic::owner(mine, MANAGE | CREATE_OWNER);
        public.verification_count = 1;
        let delegated = Authority::Delegated(public);

        assert!(matches!(
            state.delegate_manage(other, FamilyOp::Enable(false), &delegated),
            Err(TpmError::DelegateFamily {
                caller: 1,
                target: 2
            })
        ));
        state
            .delegate_manage(mine, FamilyOp::Enable(true), &delegated)
            .unwrap();

        // Subset of the caller's own grant is fine; anything more is not.
        state
            .create_owner_blob(
                DelegatePublic::owner(mine, MANAGE),
                Secret::new([1; 20]),
                &delegated,
                false,
            )
            .unwrap();
        assert!(matches!(
            state.create_owner_blob(
                DelegatePublic::owner(mine, MANAGE | UPDATE_VERIFICATION),
                Secret::new([1; 20]),
                &delegated,
                false,
            ),
            Err(TpmError::AuthFail(_))
        ));
        assert!(matches!(
            state.create_owner_blob(
                DelegatePublic::owner(other, MANAGE),
                Secret::new([1; 20]),
                &delegated,
                false,
            ),
            Err(TpmError::DelegateFamily { .. })
        ));

        // No LoadOwnerDelegation bit.
        let blob = owner_blob(&mut state, mine, MANAGE, false);
        assert!(matches!(
            state.load_owner_blob(&blob, 0, &delegated),
            Err(TpmError::AuthFail(_))
        ));
        let loader = Authority::Delegated(DelegatePublic::owner(mine, LOAD_OWNER));
        state.load_owner_blob(&blob, 0, &loader).unwrap();
    }

    #[test]
    fn delegation_pcr_binding_is_enforced() {
        let mut state = owned_state();
        let family = enabled_family(&mut state);
        state.extend_pcr(16, &[9; 20]).unwrap();
        let selection = PcrSelection::from_indices(&[16]).unwrap();
        let mut public = DelegatePublic::owner(family, MANAGE);
        public.pcr_info = PcrInfoShort {
            selection,
            locality_at_release: LocalitySelection::ALL,
            digest_at_release: state.pcrs().composite_digest(state.crypto(), &selection),
        };
        let delegated = Authority::Delegated(public);
        state
            .delegate_manage(family, FamilyOp::Enable(true), &delegated)
            .unwrap();

        state.extend_pcr(16, &[1; 20]).unwrap();
        assert!(matches!(
            state.delegate_manage(family, FamilyOp::Enable(true), &delegated),
            Err(TpmError::WrongPcrValue)
        ));
    }

    #[test]
    fn provisioning_load_without_owner() {
        init_tracing();
        let mut state = TpmState::new(TpmConfig::default(), Arc::new(SoftwareCrypto)).unwrap();
        let none = Authority::Unauthenticated;
        let family = state
            .delegate_manage(0, FamilyOp::Create { label: 0 }, &none)
            .unwrap();
        state
            .delegate_manage(family, FamilyOp::Enable(true), &none)
            .unwrap();

        let mut public = DelegatePublic::owner(family, MANAGE);
        public.verification_count = 1;
        let blob = OwnerBlob {
            public,
            integrity_digest: Default::default(),
            additional_area: Vec::new(),
            sensitive_area: DelegateSensitive {
                auth_value: Secret::new([3; 20]),
            }
            .to_bytes(),
        };
        state.load_owner_blob(&blob, 0, &none).unwrap();
        assert_eq!(*state.lookup_row_for_use(0).unwrap().1, Secret::new([3; 20]));

        state
            .delegate_manage(family, FamilyOp::Admin(true), &none)
            .unwrap();
        assert!(matches!(
            state.load_owner_blob(&blob, 1, &none),
            Err(TpmError::DelegateLock(_))
        ));
        assert!(matches!(
            state.create_owner_blob(DelegatePublic::owner(family, 0), Secret::zero(), &none, false),
            Err(TpmError::AuthFail(_))
        ));
    }

    #[test]
    fn key_blob_is_bound_to_its_key() {
        let mut state = owned_state();
        let family = enabled_family(&mut state);
        let srk = state
            .install_root_key_with(
                KeyTemplate {
                    usage: KeyUsage::Storage,
                    flags: KeyFlags::new(),
                    auth_data_usage: AuthDataUsage::Always,
                    parms: KeyParms::rsa(2048, EncScheme::RsaEsOaepSha1Mgf1, SigScheme::None),
                    pcr_policy: None,
                },
                KeySecrets {
                    usage_auth: Secret::new([1; 20]),
                    migration_auth: Secret::new([2; 20]),
                },
                storage_keypair(),
            )
            .unwrap();
        let wrapped = state
            .create_wrap_key_with(
                srk,
                KeyTemplate {
                    usage: KeyUsage::Signing,
                    flags: KeyFlags::new(),
                    auth_data_usage: AuthDataUsage::Always,
                    parms: KeyParms::rsa(512, EncScheme::None, SigScheme::RsaSsaPkcsV15Sha1),
                    pcr_policy: None,
                },
                KeySecrets {
                    usage_auth: Secret::new([3; 20]),
                    migration_auth: Secret::new([4; 20]),
                },
                small_bind_keypair(),
            )
            .unwrap();
        let signer = state.load_key(srk, &wrapped).unwrap();

        let sign = 1 << 14;
        let blob = state
            .create_key_blob(
                signer,
                DelegatePublic::key(family, sign),
                Secret::new([6; 20]),
                &Authority::Direct,
            )
            .unwrap();
        state.verify_key_blob_for(&blob, signer).unwrap();
        assert!(matches!(
            state.verify_key_blob_for(&blob, srk),
            Err(TpmError::AuthFail(_))
        ));
        let (public, secret) = state
            .open_delegation_blob(&DelegationBlob::Key(blob.clone()))
            .unwrap();
        assert_eq!(secret, Secret::new([6; 20]));
        permission::check_permission(
            &public.permissions,
            DelegateType::KeyBits,
            CommandCode::Sign.into(),
        )
        .unwrap();

        assert!(matches!(
            state.create_key_blob(
                signer,
                DelegatePublic::owner(family, 0),
                Secret::zero(),
                &Authority::Direct
            ),
            Err(TpmError::BadParameter(_))
        ));
        assert!(matches!(
            state.create_key_blob(
                signer,
                DelegatePublic::key(family, sign),
                Secret::zero(),
                &Authority::Unauthenticated
            ),
            Err(TpmError::AuthFail(_))
        ));
    }

    #[test]
    fn key_blob_requires_key_pcr_release() {
        let mut state = owned_state();
        let family = enabled_family(&mut state);
        state.extend_pcr(0, &[1; 20]).unwrap();
        let selection = PcrSelection::from_indices(&[0]).unwrap();
        let release = state.pcrs().composite_digest(state.crypto(), &selection);
        let srk = state
            .install_root_key_with(
                KeyTemplate {
                    usage: KeyUsage::Storage,
                    flags: KeyFlags::new(),
                    auth_data_usage: AuthDataUsage::Always,
                    parms: KeyParms::rsa(2048, EncScheme::RsaEsOaepSha1Mgf1, SigScheme::None),
                    pcr_policy: Some(KeyPcrPolicy::Long(PcrInfoLong::new(
                        selection,
                        release,
                        LocalitySelection::ALL,
                    ))),
                },
                KeySecrets {
                    usage_auth: Secret::new([1; 20]),
                    migration_auth: Secret::new([2; 20]),
                },
                storage_keypair(),
            )
            .unwrap();
        let load_key = 1 << 0;
        state
            .create_key_blob(
                srk,
                DelegatePublic::key(family, load_key),
                Secret::new([7; 20]),
                &Authority::Direct,
            )
            .unwrap();

        state.extend_pcr(0, &[2; 20]).unwrap();
        assert!(matches!(
            state.create_key_blob(
                srk,
                DelegatePublic::key(family, load_key),
                Secret::new([7; 20]),
                &Authority::Direct,
            ),
            Err(TpmError::WrongPcrValue)
        ));
    }

    #[test]
    fn manage_opcodes_decode() {
        assert_eq!(
            FamilyOp::from_wire(1, &[0x42]).unwrap(),
            FamilyOp::Create { label: 0x42 }
        );
        assert_eq!(FamilyOp::from_wire(2, &[1]).unwrap(), FamilyOp::Enable(true));
        assert_eq!(FamilyOp::from_wire(3, &[0]).unwrap(), FamilyOp::Admin(false));
        assert_eq!(FamilyOp::from_wire(4, &[]).unwrap(), FamilyOp::Invalidate);
        assert!(FamilyOp::from_wire(2, &[]).is_err());
        assert!(FamilyOp::from_wire(9, &[1]).is_err());
    }

    #[test]
    fn table_view_wire_form() {
        let mut state = owned_state();
        enabled_family(&mut state);
        let bytes = state.read_table().to_bytes();
        // One family entry (15 bytes) and no delegate rows.
        assert_eq!(&bytes[..4], &[0, 0, 0, 15]);
        assert_eq!(&bytes[4..6], &[0x00, 0x25]);
        assert_eq!(&bytes[19..], &[0, 0, 0, 0]);
    }
}
