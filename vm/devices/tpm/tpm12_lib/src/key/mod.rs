// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Key objects: `TPM_KEY` and `TPM_KEY12` records, their wrapped private
//! payload (`TPM_STORE_ASYMKEY`) and the authorization checks applied when a
//! key is used.
//!
//! A key's private material exists in clear only after
//! [`KeyObject::decrypt_private_under`] succeeds (or for a freshly generated
//! key), and is wiped when the object is dropped. Only the first prime `p` is
//! stored in the wrapped payload; `q` and `d` are re-derived after decryption.

pub mod parms;
pub mod slots;

use crate::crypto::CryptoProvider;
use crate::crypto::RsaKeyPair;
use crate::crypto::RsaPrivateParts;
use crate::error::TpmError;
use crate::pcr::KeyPcrPolicy;
use crate::pcr::PcrBank;
use crate::pcr::PcrInfo;
use crate::pcr::PcrInfoLong;
use crate::secret::Secret;
use parms::KeyParms;
use subtle::ConstantTimeEq;
use tpm12_protocol::Digest;
use tpm12_protocol::Load;
use tpm12_protocol::LoadCursor;
use tpm12_protocol::Store;
use tpm12_protocol::StoreBuffer;
use tpm12_protocol::tpm12proto::AuthDataUsage;
use tpm12_protocol::tpm12proto::KeyFlags;
use tpm12_protocol::tpm12proto::KeyUsage;
use tpm12_protocol::tpm12proto::PayloadType;
use tpm12_protocol::tpm12proto::StructureTag;
use tpm12_protocol::tpm12proto::TPM_DIGEST_SIZE;
use tpm12_protocol::tpm12proto::TPM_STRUCT_VER_1_1;
use zeroize::Zeroizing;

/// Which key record layout a key uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// `TPM_KEY`, opened by a `TPM_STRUCT_VER`; PCR policy is a
    /// `TPM_PCR_INFO`.
    Key11 {
        /// The structure version as found on the wire.
        version: [u8; 4],
    },
    /// `TPM_KEY12`, opened by `TPM_TAG_KEY12`; PCR policy is a
    /// `TPM_PCR_INFO_LONG`.
    Key12,
}

/// Public attributes of a key about to be generated.
#[derive(Debug, Clone)]
pub struct KeyTemplate {
    /// Key usage.
    pub usage: KeyUsage,
    /// Key flags.
    pub flags: KeyFlags,
    /// When proof of the usage secret is required.
    pub auth_data_usage: AuthDataUsage,
    /// Algorithm parameters.
    pub parms: KeyParms,
    /// Optional PCR policy. A `TPM_PCR_INFO` policy produces a `TPM_KEY`;
    /// anything else produces a `TPM_KEY12`.
    pub pcr_policy: Option<KeyPcrPolicy>,
}

/// Secrets stored in a key's private payload.
#[derive(Debug, Clone)]
pub struct KeySecrets {
    /// Secret a caller proves to use the key.
    pub usage_auth: Secret,
    /// Secret a caller proves to migrate the key.
    pub migration_auth: Secret,
}

/// Kind of access requested by [`KeyObject::authorize_use`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAccess {
    /// An operation using the private key.
    Private,
    /// A read of public key material.
    PublicRead,
}

/// `TPM_STORE_ASYMKEY`, the plaintext of a key's `encData`.
struct StoreAsymKey {
    payload: PayloadType,
    usage_auth: Secret,
    migration_auth: Secret,
    pub_data_digest: Digest,
    p: Zeroizing<Vec<u8>>,
}

impl Load for StoreAsymKey {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        let payload = PayloadType::from_u8(cursor.load_u8()?)
            .ok_or(TpmError::InvalidStructure("unknown payload type"))?;
        Ok(Self {
            payload,
            usage_auth: cursor.load()?,
            migration_auth: cursor.load()?,
            pub_data_digest: cursor.load_array()?,
            p: Zeroizing::new(cursor.load_sized()?.to_vec()),
        })
    }
}

/// Private material cached on a loaded key.
struct PrivateKey {
    payload: PayloadType,
    usage_auth: Secret,
    migration_auth: Secret,
    pub_data_digest: Digest,
    p: Zeroizing<Vec<u8>>,
    q: Zeroizing<Vec<u8>>,
    d: Zeroizing<Vec<u8>>,
}

/// A TPM 1.2 key.
pub struct KeyObject {
    format: KeyFormat,
    usage: KeyUsage,
    flags: KeyFlags,
    auth_data_usage: AuthDataUsage,
    parms: KeyParms,
    pcr_policy: Option<KeyPcrPolicy>,
    pub_key: Vec<u8>,
    enc_data: Vec<u8>,
    private: Option<PrivateKey>,
    root: bool,
}

impl std::fmt::Debug for KeyObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyObject")
            .field("format", &self.format)
            .field("usage", &self.usage)
            .field("flags", &self.flags)
            .field("auth_data_usage", &self.auth_data_usage)
            .field("pub_key_len", &self.pub_key.len())
            .field("has_private", &self.private.is_some())
            .field("root", &self.root)
            .finish()
    }
}

/// Certified-migration keys may only carry these usages.
fn cmk_usage_allowed(usage: KeyUsage) -> bool {
    matches!(
        usage,
        KeyUsage::Signing
            | KeyUsage::Storage
            | KeyUsage::Bind
            | KeyUsage::Legacy
            | KeyUsage::Migrate
    )
}

fn check_flags(usage: KeyUsage, flags: KeyFlags) -> Result<(), TpmError> {
    if flags.into_bits() & !KeyFlags::SUPPORTED_MASK != 0 {
        return Err(TpmError::BadKeyProperty("unsupported key flags"));
    }
    if flags.migrate_authority() && flags.migratable() && !cmk_usage_allowed(usage) {
        return Err(TpmError::BadKeyProperty(
            "key usage not permitted for a certified-migration key",
        ));
    }
    Ok(())
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

impl KeyObject {
    /// Build a key from a freshly generated key pair.
    ///
    /// With `parent`, the key is destined to be wrapped under that storage
    /// key by [`KeyObject::encrypt_private_under`]. Without one, the key is a
    /// root key whose private payload is never serialized.
    pub fn generate(
        crypto: &dyn CryptoProvider,
        parent: Option<&KeyObject>,
        template: KeyTemplate,
        secrets: KeySecrets,
        keypair: RsaKeyPair,
        pcrs: &PcrBank,
        locality: u8,
    ) -> Result<Self, TpmError> {
        if let Some(parent) = parent {
            parent.require_storage()?;
        }
        let KeyTemplate {
            usage,
            flags,
            auth_data_usage,
            parms,
            mut pcr_policy,
        } = template;

        check_flags(usage, flags)?;
        parms.check_properties(usage, keypair.modulus.len())?;
        let rsa = parms
            .rsa_parms()
            .ok_or(TpmError::BadKeyProperty("only RSA keys are supported"))?;
        if strip_leading_zeros(rsa.effective_exponent()) != strip_leading_zeros(&keypair.exponent)
        {
            return Err(TpmError::BadKeyProperty(
                "key pair exponent does not match key parameters",
            ));
        }

        let format = match &pcr_policy {
            Some(KeyPcrPolicy::Info(_)) => KeyFormat::Key11 {
                version: TPM_STRUCT_VER_1_1,
            },
            _ => KeyFormat::Key12,
        };
        if let Some(policy) = &mut pcr_policy {
            policy.set_creation_digest(crypto, pcrs, locality)?;
        }

        let payload = if flags.migrate_authority() {
            PayloadType::MigrateRestricted
        } else {
            PayloadType::Asym
        };
        let RsaKeyPair {
            modulus, p, q, d, ..
        } = keypair;

        let mut key = Self {
            format,
            usage,
            flags,
            auth_data_usage,
            parms,
            pcr_policy,
            pub_key: modulus,
            enc_data: Vec::new(),
            private: Some(PrivateKey {
                payload,
                usage_auth: secrets.usage_auth,
                migration_auth: secrets.migration_auth,
                pub_data_digest: [0; TPM_DIGEST_SIZE],
                p,
                q,
                d,
            }),
            root: parent.is_none(),
        };
        key.recompute_pub_digest(crypto);
        tracing::debug!(
            usage = ?key.usage,
            bits = key.pub_key.len() * 8,
            root = key.root,
            "key generated"
        );
        Ok(key)
    }

    /// Record layout.
    pub fn format(&self) -> KeyFormat {
        self.format
    }

    /// Key usage.
    pub fn usage(&self) -> KeyUsage {
        self.usage
    }

    /// Key flags.
    pub fn flags(&self) -> KeyFlags {
        self.flags
    }

    /// Authorization mode.
    pub fn auth_data_usage(&self) -> AuthDataUsage {
        self.auth_data_usage
    }

    /// Algorithm parameters.
    pub fn parms(&self) -> &KeyParms {
        &self.parms
    }

    /// PCR policy, if any.
    pub fn pcr_policy(&self) -> Option<&KeyPcrPolicy> {
        self.pcr_policy.as_ref()
    }

    /// Public modulus.
    pub fn pub_key(&self) -> &[u8] {
        &self.pub_key
    }

    /// Wrapped private payload; empty until wrapped.
    pub fn enc_data(&self) -> &[u8] {
        &self.enc_data
    }

    /// Returns true once private material is available.
    pub fn has_private(&self) -> bool {
        self.private.is_some()
    }

    /// Returns true for a key generated without a parent.
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Payload type of the loaded private material.
    pub fn payload_type(&self) -> Option<PayloadType> {
        self.private.as_ref().map(|private| private.payload)
    }

    /// Usage secret of the loaded private material.
    pub fn usage_auth(&self) -> Option<&Secret> {
        self.private.as_ref().map(|private| &private.usage_auth)
    }

    /// Migration secret of the loaded private material.
    pub fn migration_auth(&self) -> Option<&Secret> {
        self.private.as_ref().map(|private| &private.migration_auth)
    }

    /// The complete private key, if loaded.
    pub fn private_parts(&self) -> Option<RsaPrivateParts<'_>> {
        let private = self.private.as_ref()?;
        Some(RsaPrivateParts {
            modulus: &self.pub_key,
            exponent: self.parms.rsa_parms()?.effective_exponent(),
            p: &private.p,
            q: &private.q,
            d: &private.d,
        })
    }

    fn require_storage(&self) -> Result<(), TpmError> {
        if self.usage != KeyUsage::Storage {
            return Err(TpmError::InvalidKeyUsage(self.usage.into()));
        }
        Ok(())
    }

    /// Append every field except `encData`.
    pub fn store_pub_data(&self, buf: &mut StoreBuffer) {
        match self.format {
            KeyFormat::Key11 { version } => buf.append_bytes(&version),
            KeyFormat::Key12 => {
                buf.append_u16(StructureTag::Key12.into());
                buf.append_u16(0);
            }
        }
        buf.append_u16(self.usage.into());
        buf.append_u32(self.flags.into_bits());
        buf.append_u8(self.auth_data_usage as u8);
        buf.append(&self.parms);
        buf.append_sized_with(|buf| {
            if let Some(policy) = &self.pcr_policy {
                buf.append(policy);
            }
        });
        buf.append_sized(&self.pub_key);
    }

    /// SHA-1 over the serialization without `encData`.
    pub fn pub_data_digest(&self, crypto: &dyn CryptoProvider) -> Digest {
        let mut buf = StoreBuffer::new();
        self.store_pub_data(&mut buf);
        crypto.sha1(buf.as_bytes())
    }

    /// Recompute the public data digest and refresh the copy held with the
    /// private material.
    pub fn recompute_pub_digest(&mut self, crypto: &dyn CryptoProvider) -> Digest {
        let digest = self.pub_data_digest(crypto);
        if let Some(private) = &mut self.private {
            private.pub_data_digest = digest;
        }
        digest
    }

    /// SHA-1 of the key's `TPM_STORE_PUBKEY`, which key delegations bind to.
    pub fn pubkey_digest(&self, crypto: &dyn CryptoProvider) -> Digest {
        let mut buf = StoreBuffer::new();
        buf.append_sized(&self.pub_key);
        crypto.sha1(buf.as_bytes())
    }

    /// Replace the PCR policy. The policy form must match the key format.
    pub fn set_pcr_policy(
        &mut self,
        crypto: &dyn CryptoProvider,
        policy: Option<KeyPcrPolicy>,
    ) -> Result<(), TpmError> {
        match (&policy, self.format) {
            (None, _)
            | (Some(KeyPcrPolicy::Info(_)), KeyFormat::Key11 { .. })
            | (Some(KeyPcrPolicy::Long(_)), KeyFormat::Key12) => {}
            _ => {
                return Err(TpmError::InvalidPcrInfo(
                    "policy form does not match key format",
                ));
            }
        }
        self.pcr_policy = policy;
        self.recompute_pub_digest(crypto);
        Ok(())
    }

    /// Wrap the private payload under `parent`'s public key. The ciphertext
    /// becomes this key's `encData`.
    pub fn encrypt_private_under(
        &mut self,
        crypto: &dyn CryptoProvider,
        parent: &KeyObject,
    ) -> Result<&[u8], TpmError> {
        if self.root {
            return Err(TpmError::BadParameter("root keys are never wrapped"));
        }
        parent.require_storage()?;
        let parent_exponent = parent
            .parms
            .rsa_parms()
            .ok_or(TpmError::BadKeyProperty("parent is not an RSA key"))?
            .effective_exponent();

        let digest = self.recompute_pub_digest(crypto);
        let private = self
            .private
            .as_ref()
            .ok_or(TpmError::BadParameter("private key is not loaded"))?;
        let mut buf = StoreBuffer::new();
        buf.append_u8(private.payload as u8);
        buf.append(&private.usage_auth);
        buf.append(&private.migration_auth);
        buf.append_bytes(&digest);
        buf.append_sized(&private.p);
        let plaintext = Zeroizing::new(buf.into_vec());

        self.enc_data = crypto
            .rsa_encrypt(&parent.pub_key, parent_exponent, &plaintext)
            .map_err(|err| TpmError::Encrypt("key private payload", err))?;
        Ok(&self.enc_data)
    }

    /// Unwrap `encData` with `parent`'s private key, check it belongs to this
    /// key's public data, and re-derive the rest of the private key.
    ///
    /// The key is left unchanged on failure.
    pub fn decrypt_private_under(
        &mut self,
        crypto: &dyn CryptoProvider,
        parent: &KeyObject,
    ) -> Result<(), TpmError> {
        parent.require_storage()?;
        let parent_key = parent
            .private_parts()
            .ok_or(TpmError::BadParameter("parent private key is not loaded"))?;
        let plaintext = crypto
            .rsa_decrypt(parent_key, &self.enc_data)
            .map_err(|err| TpmError::Decrypt("key private payload", err))?;
        let asym = StoreAsymKey::from_bytes(&plaintext)?;

        let expected = self.pub_data_digest(crypto);
        if !bool::from(asym.pub_data_digest[..].ct_eq(&expected[..])) {
            tracing::warn!(
                usage = ?self.usage,
                "wrapped key payload does not match its public data"
            );
            return Err(TpmError::Integrity("key public data digest"));
        }

        let exponent = self
            .parms
            .rsa_parms()
            .ok_or(TpmError::BadKeyProperty("only RSA keys are supported"))?
            .effective_exponent();
        let derived = crypto
            .derive_rsa_private(&self.pub_key, exponent, &asym.p)
            .map_err(TpmError::InconsistentKey)?;

        self.private = Some(PrivateKey {
            payload: asym.payload,
            usage_auth: asym.usage_auth,
            migration_auth: asym.migration_auth,
            pub_data_digest: asym.pub_data_digest,
            p: asym.p,
            q: derived.q,
            d: derived.d,
        });
        Ok(())
    }

    /// Decide whether a caller may use this key now.
    ///
    /// The usage secret is required according to the key's authorization
    /// mode; the PCR policy is evaluated unless this is a public read of a
    /// key flagged PCRIGNOREDONREAD.
    pub fn authorize_use(
        &self,
        crypto: &dyn CryptoProvider,
        pcrs: &PcrBank,
        locality: u8,
        caller_proves_secret: bool,
        access: KeyAccess,
    ) -> Result<(), TpmError> {
        let secret_required = match self.auth_data_usage {
            AuthDataUsage::Never => false,
            AuthDataUsage::Always => true,
            AuthDataUsage::PrivUseOnly => access == KeyAccess::Private,
        };
        if secret_required && !caller_proves_secret {
            return Err(TpmError::AuthFail("key usage secret not proven"));
        }
        if access == KeyAccess::PublicRead && self.flags.pcr_ignored_on_read() {
            return Ok(());
        }
        crate::pcr::check_release(self.pcr_policy.as_ref(), crypto, pcrs, locality)
    }

    /// Validate usage, scheme, size and flag rules against the public key.
    pub fn check_properties(&self) -> Result<(), TpmError> {
        check_flags(self.usage, self.flags)?;
        self.parms.check_properties(self.usage, self.pub_key.len())
    }
}

impl Store for KeyObject {
    fn store(&self, buf: &mut StoreBuffer) {
        self.store_pub_data(buf);
        buf.append_sized(&self.enc_data);
    }
}

impl Load for KeyObject {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        let format = if cursor.peek_u16()? == u16::from(StructureTag::Key12) {
            cursor.check_tag(StructureTag::Key12.into())?;
            if cursor.load_u16()? != 0 {
                return Err(TpmError::InvalidStructure("TPM_KEY12 fill is not zero"));
            }
            KeyFormat::Key12
        } else {
            let version: [u8; 4] = cursor.load_array()?;
            if version[..2] != TPM_STRUCT_VER_1_1[..2] {
                return Err(TpmError::InvalidStructure("unsupported TPM_KEY version"));
            }
            KeyFormat::Key11 { version }
        };

        let raw_usage = cursor.load_u16()?;
        let usage = KeyUsage::from_u16(raw_usage).ok_or(TpmError::InvalidKeyUsage(raw_usage))?;
        let flags = KeyFlags::from_bits(cursor.load_u32()?);
        if flags.into_bits() & !KeyFlags::SUPPORTED_MASK != 0 {
            return Err(TpmError::BadKeyProperty("unsupported key flags"));
        }
        let auth_data_usage = AuthDataUsage::from_u8(cursor.load_u8()?)
            .ok_or(TpmError::InvalidStructure("unknown auth data usage"))?;
        let parms: KeyParms = cursor.load()?;

        let raw_pcr = cursor.load_sized()?;
        let pcr_policy = match (raw_pcr.is_empty(), format) {
            (true, _) => None,
            (false, KeyFormat::Key11 { .. }) => {
                Some(KeyPcrPolicy::Info(PcrInfo::from_bytes(raw_pcr)?))
            }
            (false, KeyFormat::Key12) => {
                Some(KeyPcrPolicy::Long(PcrInfoLong::from_bytes(raw_pcr)?))
            }
        };

        Ok(Self {
            format,
            usage,
            flags,
            auth_data_usage,
            parms,
            pcr_policy,
            pub_key: cursor.load_sized()?.to_vec(),
            enc_data: cursor.load_sized()?.to_vec(),
            private: None,
            root: false,
        })
    }
}
