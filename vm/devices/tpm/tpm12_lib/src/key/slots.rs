// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Loaded key slots.

use super::KeyObject;
use crate::arena::Handle;
use crate::arena::SlotArena;
use crate::crypto::CryptoProvider;
use crate::error::TpmError;
use tpm12_protocol::Load;

/// Handle to a loaded key.
pub type KeyHandle = Handle<KeyObject>;

/// Fixed-capacity set of keys with private material available.
#[derive(Debug)]
pub struct KeySlots {
    keys: SlotArena<KeyObject>,
}

impl KeySlots {
    /// Slots for up to `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        Self {
            keys: SlotArena::new(capacity),
        }
    }

    /// Number of loaded keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if no key is loaded.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Resolve a raw handle value.
    pub fn handle(&self, raw: u32) -> Result<KeyHandle, TpmError> {
        self.keys
            .handle(raw)
            .filter(|handle| self.keys.get(*handle).is_some())
            .ok_or(TpmError::InvalidKeyHandle(raw))
    }

    /// Install a root key, which must carry its private material.
    pub fn insert_root(&mut self, key: KeyObject) -> Result<KeyHandle, TpmError> {
        if !key.is_root() || !key.has_private() {
            return Err(TpmError::BadParameter(
                "root slot requires a generated root key",
            ));
        }
        let handle = self
            .keys
            .insert(key)
            .ok_or(TpmError::Resources("key slots"))?;
        tracing::info!(handle = handle.index(), "root key installed");
        Ok(handle)
    }

    /// Decode a wrapped key, unwrap it under the loaded key `parent` and
    /// place it in a free slot.
    pub fn load_key(
        &mut self,
        crypto: &dyn CryptoProvider,
        parent: KeyHandle,
        wrapped: &[u8],
    ) -> Result<KeyHandle, TpmError> {
        if self.keys.find_free().is_none() {
            return Err(TpmError::Resources("key slots"));
        }
        let mut key = KeyObject::from_bytes(wrapped)?;
        key.check_properties()?;
        key.decrypt_private_under(crypto, self.get(parent)?)?;

        let handle = self
            .keys
            .insert(key)
            .ok_or(TpmError::Resources("key slots"))?;
        tracing::info!(
            handle = handle.index(),
            parent = parent.index(),
            "key loaded"
        );
        Ok(handle)
    }

    /// The key at `handle`.
    pub fn get(&self, handle: KeyHandle) -> Result<&KeyObject, TpmError> {
        self.keys
            .get(handle)
            .ok_or(TpmError::InvalidKeyHandle(handle.index()))
    }

    /// Mutable access to the key at `handle`.
    pub fn get_mut(&mut self, handle: KeyHandle) -> Result<&mut KeyObject, TpmError> {
        self.keys
            .get_mut(handle)
            .ok_or(TpmError::InvalidKeyHandle(handle.index()))
    }

    /// Evict the key at `handle`. Its private material is wiped.
    pub fn flush(&mut self, handle: KeyHandle) -> Result<(), TpmError> {
        self.keys
            .free(handle)
            .ok_or(TpmError::InvalidKeyHandle(handle.index()))?;
        tracing::debug!(handle = handle.index(), "key flushed");
        Ok(())
    }

    /// Evict every key flagged ISVOLATILE.
    pub fn flush_volatile(&mut self) {
        self.keys.retain(|key| !key.flags().is_volatile());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SoftwareCrypto;
    use crate::key::KeySecrets;
    use crate::key::KeyTemplate;
    use crate::key::parms::KeyParms;
    use crate::pcr::PcrBank;
    use crate::secret::Secret;
    use crate::test_helpers::small_bind_keypair;
    use crate::test_helpers::storage_root;
    use tpm12_protocol::Store;
    use tpm12_protocol::tpm12proto::AuthDataUsage;
    use tpm12_protocol::tpm12proto::EncScheme;
    use tpm12_protocol::tpm12proto::KeyFlags;
    use tpm12_protocol::tpm12proto::KeyUsage;
    use tpm12_protocol::tpm12proto::SigScheme;

    fn wrapped_child(root: &KeyObject, flags: KeyFlags) -> Vec<u8> {
        let mut child = KeyObject::generate(
            &SoftwareCrypto,
            Some(root),
            KeyTemplate {
                usage: KeyUsage::Legacy,
                flags,
                auth_data_usage: AuthDataUsage::Always,
                parms: KeyParms::rsa(
                    512,
                    EncScheme::RsaEsPkcsV15,
                    SigScheme::RsaSsaPkcsV15Sha1,
                ),
                pcr_policy: None,
            },
            KeySecrets {
                usage_auth: Secret::new([1; 20]),
                migration_auth: Secret::new([2; 20]),
            },
            small_bind_keypair(),
            &PcrBank::default(),
            0,
        )
        .unwrap();
        child.encrypt_private_under(&SoftwareCrypto, root).unwrap();
        child.to_bytes()
    }

    #[test]
    fn load_and_flush() {
        let mut slots = KeySlots::new(2);
        let root = slots.insert_root(storage_root()).unwrap();
        let wrapped = wrapped_child(slots.get(root).unwrap(), KeyFlags::new());

        let child = slots.load_key(&SoftwareCrypto, root, &wrapped).unwrap();
        assert!(slots.get(child).unwrap().has_private());
        assert!(matches!(
            slots.load_key(&SoftwareCrypto, root, &wrapped),
            Err(TpmError::Resources(_))
        ));

        slots.flush(child).unwrap();
        assert!(matches!(
            slots.get(child),
            Err(TpmError::InvalidKeyHandle(1))
        ));
        assert!(slots.flush(child).is_err());
        assert!(slots.handle(child.index()).is_err());
        assert_eq!(slots.handle(root.index()).unwrap(), root);
    }

    #[test]
    fn child_cannot_parent() {
        let mut slots = KeySlots::new(4);
        let root = slots.insert_root(storage_root()).unwrap();
        let wrapped = wrapped_child(slots.get(root).unwrap(), KeyFlags::new());
        let child = slots.load_key(&SoftwareCrypto, root, &wrapped).unwrap();
        assert!(matches!(
            slots.load_key(&SoftwareCrypto, child, &wrapped),
            Err(TpmError::InvalidKeyUsage(0x0015))
        ));
    }

    #[test]
    fn volatile_keys_are_flushed() {
        let mut slots = KeySlots::new(4);
        let root = slots.insert_root(storage_root()).unwrap();
        let volatile = wrapped_child(
            slots.get(root).unwrap(),
            KeyFlags::new().with_is_volatile(true),
        );
        let durable = wrapped_child(slots.get(root).unwrap(), KeyFlags::new());
        let v = slots.load_key(&SoftwareCrypto, root, &volatile).unwrap();
        let d = slots.load_key(&SoftwareCrypto, root, &durable).unwrap();

        slots.flush_volatile();
        assert!(slots.get(v).is_err());
        assert!(slots.get(d).is_ok());
        assert_eq!(slots.len(), 2);
    }
}
