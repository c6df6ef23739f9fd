// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The TPM state object that owns PCRs, keys and the delegation tables.

use crate::config::TpmConfig;
use crate::crypto::CryptoProvider;
use crate::crypto::RsaKeyPair;
use crate::delegation::family::FamilyTable;
use crate::delegation::table::DelegateTable;
use crate::error::TpmError;
use crate::key::KeyAccess;
use crate::key::KeyObject;
use crate::key::KeySecrets;
use crate::key::KeyTemplate;
use crate::key::slots::KeyHandle;
use crate::key::slots::KeySlots;
use crate::pcr::PcrBank;
use crate::secret::Secret;
use crate::secret::SymmetricKey;
use std::sync::Arc;
use tpm12_protocol::Digest;
use tpm12_protocol::LoadCursor;
use tpm12_protocol::Store;
use tpm12_protocol::StoreBuffer;
use tpm12_protocol::TABLE_FORMAT_VERSION;
use tpm12_protocol::tpm12proto::LocalitySelection;
use tpm12_protocol::tpm12proto::TPM_LOCALITY_MAX;

/// Key custody and delegation state of one TPM.
///
/// Every operation takes `&mut self` or `&self`; share the state across
/// threads with [`SharedTpm`](crate::SharedTpm).
pub struct TpmState {
    pub(crate) config: TpmConfig,
    pub(crate) crypto: Arc<dyn CryptoProvider>,
    pub(crate) pcrs: PcrBank,
    pub(crate) locality: u8,
    pub(crate) owner_installed: bool,
    pub(crate) tpm_proof: Secret,
    pub(crate) delegate_key: SymmetricKey,
    pub(crate) last_family_id: u32,
    pub(crate) families: FamilyTable,
    pub(crate) delegates: DelegateTable,
    pub(crate) keys: KeySlots,
}

impl std::fmt::Debug for TpmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TpmState")
            .field("config", &self.config)
            .field("locality", &self.locality)
            .field("owner_installed", &self.owner_installed)
            .field("last_family_id", &self.last_family_id)
            .field("families", &self.families)
            .field("delegates", &self.delegates)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl TpmState {
    /// Fresh state with no owner, empty tables and newly drawn
    /// `tpmProof` and delegate key.
    pub fn new(config: TpmConfig, crypto: Arc<dyn CryptoProvider>) -> Result<Self, TpmError> {
        config.validate()?;
        let tpm_proof = Secret::random(crypto.as_ref())?;
        let delegate_key = SymmetricKey::random(crypto.as_ref())?;
        tracing::info!(
            families = config.family_table_capacity,
            delegates = config.delegate_table_capacity,
            key_slots = config.key_slot_capacity,
            "tpm state created"
        );
        Ok(Self {
            families: FamilyTable::new(config.family_table_capacity),
            delegates: DelegateTable::new(config.delegate_table_capacity),
            keys: KeySlots::new(config.key_slot_capacity),
            config,
            crypto,
            pcrs: PcrBank::default(),
            locality: 0,
            owner_installed: false,
            tpm_proof,
            delegate_key,
            last_family_id: 0,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &TpmConfig {
        &self.config
    }

    /// The crypto provider.
    pub fn crypto(&self) -> &dyn CryptoProvider {
        self.crypto.as_ref()
    }

    /// The live PCR values.
    pub fn pcrs(&self) -> &PcrBank {
        &self.pcrs
    }

    /// Extend PCR `index` with `measurement`, returning the new value.
    pub fn extend_pcr(&mut self, index: usize, measurement: &Digest) -> Result<Digest, TpmError> {
        self.pcrs.extend(self.crypto.as_ref(), index, measurement)
    }

    /// Locality subsequent commands are issued from.
    pub fn locality(&self) -> u8 {
        self.locality
    }

    /// Change the command locality.
    pub fn set_locality(&mut self, locality: u8) -> Result<(), TpmError> {
        if locality > TPM_LOCALITY_MAX {
            return Err(TpmError::BadLocality {
                locality,
                allowed: LocalitySelection::ALL.into_bits(),
            });
        }
        self.locality = locality;
        Ok(())
    }

    /// Returns true if an owner is installed.
    pub fn owner_installed(&self) -> bool {
        self.owner_installed
    }

    /// Record that an owner has taken ownership.
    pub fn install_owner(&mut self) {
        self.owner_installed = true;
        tracing::info!("owner installed");
    }

    /// Remove the owner: both delegation tables are emptied and the
    /// `tpmProof` and delegate key are replaced, which invalidates every
    /// outstanding delegation blob.
    pub fn owner_clear(&mut self) -> Result<(), TpmError> {
        let tpm_proof = Secret::random(self.crypto.as_ref())?;
        let delegate_key = SymmetricKey::random(self.crypto.as_ref())?;
        self.tpm_proof = tpm_proof;
        self.delegate_key = delegate_key;
        self.owner_installed = false;
        self.families.clear();
        self.delegates.clear();
        self.last_family_id = 0;
        tracing::info!("owner cleared");
        Ok(())
    }

    /// `TPM_Startup(ST_CLEAR)`: volatile keys are flushed, PCRs reset and
    /// the locality returns to zero.
    pub fn startup_clear(&mut self) {
        self.keys.flush_volatile();
        self.pcrs = PcrBank::default();
        self.locality = 0;
        tracing::debug!("startup clear");
    }

    /// The family table.
    pub fn families(&self) -> &FamilyTable {
        &self.families
    }

    /// The delegate table.
    pub fn delegates(&self) -> &DelegateTable {
        &self.delegates
    }

    /// Highest family id issued so far.
    pub fn last_family_id(&self) -> u32 {
        self.last_family_id
    }

    /// Loaded keys.
    pub fn keys(&self) -> &KeySlots {
        &self.keys
    }

    /// The loaded key at `handle`.
    pub fn key(&self, handle: KeyHandle) -> Result<&KeyObject, TpmError> {
        self.keys.get(handle)
    }

    fn generate_keypair(&self, template: &KeyTemplate) -> Result<RsaKeyPair, TpmError> {
        let rsa = template
            .parms
            .rsa_parms()
            .ok_or(TpmError::BadKeyProperty("only RSA keys are supported"))?;
        Ok(self
            .crypto
            .generate_rsa_keypair(rsa.key_length, rsa.effective_exponent())?)
    }

    /// Generate a root key and install it in a key slot.
    pub fn install_root_key(
        &mut self,
        template: KeyTemplate,
        secrets: KeySecrets,
    ) -> Result<KeyHandle, TpmError> {
        let keypair = self.generate_keypair(&template)?;
        self.install_root_key_with(template, secrets, keypair)
    }

    /// Install a root key built from existing key material.
    pub fn install_root_key_with(
        &mut self,
        template: KeyTemplate,
        secrets: KeySecrets,
        keypair: RsaKeyPair,
    ) -> Result<KeyHandle, TpmError> {
        let key = KeyObject::generate(
            self.crypto.as_ref(),
            None,
            template,
            secrets,
            keypair,
            &self.pcrs,
            self.locality,
        )?;
        self.keys.insert_root(key)
    }

    /// Generate a key wrapped under the loaded storage key `parent`,
    /// returning its serialized record.
    pub fn create_wrap_key(
        &self,
        parent: KeyHandle,
        template: KeyTemplate,
        secrets: KeySecrets,
    ) -> Result<Vec<u8>, TpmError> {
        let keypair = self.generate_keypair(&template)?;
        self.create_wrap_key_with(parent, template, secrets, keypair)
    }

    /// Wrap existing key material under the loaded storage key `parent`.
    pub fn create_wrap_key_with(
        &self,
        parent: KeyHandle,
        template: KeyTemplate,
        secrets: KeySecrets,
        keypair: RsaKeyPair,
    ) -> Result<Vec<u8>, TpmError> {
        let crypto = self.crypto.as_ref();
        let parent = self.keys.get(parent)?;
        let mut key = KeyObject::generate(
            crypto,
            Some(parent),
            template,
            secrets,
            keypair,
            &self.pcrs,
            self.locality,
        )?;
        key.encrypt_private_under(crypto, parent)?;
        Ok(key.to_bytes())
    }

    /// Unwrap a serialized key under `parent` and load it.
    pub fn load_key(&mut self, parent: KeyHandle, wrapped: &[u8]) -> Result<KeyHandle, TpmError> {
        self.keys.load_key(self.crypto.as_ref(), parent, wrapped)
    }

    /// Evict a loaded key.
    pub fn flush_key(&mut self, handle: KeyHandle) -> Result<(), TpmError> {
        self.keys.flush(handle)
    }

    /// Decide whether a caller may use the key at `handle` now, given
    /// whether it proved the key's usage secret.
    pub fn authorize_key_use(
        &self,
        handle: KeyHandle,
        caller_proves_secret: bool,
        access: KeyAccess,
    ) -> Result<(), TpmError> {
        self.keys.get(handle)?.authorize_use(
            self.crypto.as_ref(),
            &self.pcrs,
            self.locality,
            caller_proves_secret,
            access,
        )
    }

    /// Serialize the non-volatile state: owner status, secrets, the last
    /// family id and both delegation tables.
    pub fn store_permanent(&self) -> Vec<u8> {
        let mut buf = StoreBuffer::new();
        buf.append_u16(TABLE_FORMAT_VERSION);
        buf.append_bool(self.owner_installed);
        buf.append_u32(self.last_family_id);
        buf.append(&self.tpm_proof);
        buf.append(&self.delegate_key);
        self.families.store_persisted(&mut buf);
        self.delegates.store_persisted(&mut buf);
        buf.into_vec()
    }

    /// Restore state saved by [`TpmState::store_permanent`]. PCRs and key
    /// slots start empty.
    pub fn load_permanent(
        config: TpmConfig,
        crypto: Arc<dyn CryptoProvider>,
        bytes: &[u8],
    ) -> Result<Self, TpmError> {
        config.validate()?;
        let mut cursor = LoadCursor::new(bytes);
        if cursor.load_u16()? != TABLE_FORMAT_VERSION {
            return Err(TpmError::InvalidStructure("unsupported permanent state version"));
        }
        let owner_installed = cursor.load_bool()?;
        let last_family_id = cursor.load_u32()?;
        let tpm_proof: Secret = cursor.load()?;
        let delegate_key: SymmetricKey = cursor.load()?;
        let families = FamilyTable::load_persisted(&mut cursor, config.family_table_capacity)?;
        let delegates = DelegateTable::load_persisted(&mut cursor, config.delegate_table_capacity)?;
        cursor.finish()?;

        if families.iter().any(|row| row.family_id > last_family_id) {
            return Err(TpmError::InvalidStructure(
                "family id beyond last issued id",
            ));
        }
        tracing::info!(
            owner_installed,
            families = families.len(),
            "permanent state restored"
        );
        Ok(Self {
            keys: KeySlots::new(config.key_slot_capacity),
            config,
            crypto,
            pcrs: PcrBank::default(),
            locality: 0,
            owner_installed,
            tpm_proof,
            delegate_key,
            last_family_id,
            families,
            delegates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SoftwareCrypto;
    use crate::key::parms::KeyParms;
    use crate::test_helpers::init_tracing;
    use crate::test_helpers::small_bind_keypair;
    use crate::test_helpers::storage_keypair;
    use tpm12_protocol::tpm12proto::AuthDataUsage;
    use tpm12_protocol::tpm12proto::EncScheme;
    use tpm12_protocol::tpm12proto::KeyFlags;
    use tpm12_protocol::tpm12proto::KeyUsage;
    use tpm12_protocol::tpm12proto::SigScheme;

    fn state() -> TpmState {
        init_tracing();
        TpmState::new(TpmConfig::default(), Arc::new(SoftwareCrypto)).unwrap()
    }

    fn secrets() -> KeySecrets {
        KeySecrets {
            usage_auth: Secret::new([0x21; 20]),
            migration_auth: Secret::new([0x22; 20]),
        }
    }

    fn srk_template() -> KeyTemplate {
        KeyTemplate {
            usage: KeyUsage::Storage,
            flags: KeyFlags::new(),
            auth_data_usage: AuthDataUsage::Always,
            parms: KeyParms::rsa(2048, EncScheme::RsaEsOaepSha1Mgf1, SigScheme::None),
            pcr_policy: None,
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = TpmConfig {
            key_slot_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            TpmState::new(config, Arc::new(SoftwareCrypto)),
            Err(TpmError::Config(_))
        ));
    }

    #[test]
    fn locality_is_bounded() {
        let mut state = state();
        state.set_locality(4).unwrap();
        assert_eq!(state.locality(), 4);
        assert!(matches!(
            state.set_locality(5),
            Err(TpmError::BadLocality { locality: 5, .. })
        ));
        state.startup_clear();
        assert_eq!(state.locality(), 0);
    }

    #[test]
    fn wrap_load_and_use_key() {
        let mut state = state();
        let srk = state
            .install_root_key_with(srk_template(), secrets(), storage_keypair())
            .unwrap();
        let wrapped = state
            .create_wrap_key_with(
                srk,
                KeyTemplate {
                    usage: KeyUsage::Bind,
                    flags: KeyFlags::new(),
                    auth_data_usage: AuthDataUsage::Never,
                    parms: KeyParms::rsa(512, EncScheme::RsaEsOaepSha1Mgf1, SigScheme::None),
                    pcr_policy: None,
                },
                secrets(),
                small_bind_keypair(),
            )
            .unwrap();
        let child = state.load_key(srk, &wrapped).unwrap();
        state
            .authorize_key_use(child, false, KeyAccess::Private)
            .unwrap();
        assert!(matches!(
            state.authorize_key_use(srk, false, KeyAccess::Private),
            Err(TpmError::AuthFail(_))
        ));
        state.flush_key(child).unwrap();
        assert!(state.key(child).is_err());
    }

    #[test]
    fn permanent_state_round_trip() {
        let mut state = state();
        state.install_owner();
        state.last_family_id = 3;
        state.families.create(1, 3).unwrap();
        let bytes = state.store_permanent();

        let restored =
            TpmState::load_permanent(TpmConfig::default(), Arc::new(SoftwareCrypto), &bytes)
                .unwrap();
        assert!(restored.owner_installed());
        assert_eq!(restored.last_family_id(), 3);
        assert_eq!(restored.families().get(3).unwrap().label, 1);
        assert_eq!(restored.tpm_proof, state.tpm_proof);
        assert_eq!(restored.store_permanent(), bytes);

        let larger = TpmConfig {
            family_table_capacity: 16,
            ..Default::default()
        };
        assert!(TpmState::load_permanent(larger, Arc::new(SoftwareCrypto), &bytes).is_ok());
        assert!(
            TpmState::load_permanent(
                TpmConfig::default(),
                Arc::new(SoftwareCrypto),
                &bytes[..bytes.len() - 1]
            )
            .is_err()
        );
    }

    #[test]
    fn owner_clear_forgets_tables() {
        let mut state = state();
        state.install_owner();
        state.families.create(1, 1).unwrap();
        let proof = state.tpm_proof.as_bytes().to_vec();
        state.owner_clear().unwrap();
        assert!(!state.owner_installed());
        assert!(state.families().is_empty());
        assert!(!state.tpm_proof.matches(&proof));
    }
}
