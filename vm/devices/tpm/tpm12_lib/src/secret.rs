// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Secret values that are wiped on drop and compared in constant time.

use crate::crypto::CryptoError;
use crate::crypto::CryptoProvider;
use subtle::ConstantTimeEq;
use tpm12_protocol::CodecError;
use tpm12_protocol::Load;
use tpm12_protocol::LoadCursor;
use tpm12_protocol::Store;
use tpm12_protocol::StoreBuffer;
use tpm12_protocol::tpm12proto::TPM_SECRET_SIZE;
use zeroize::Zeroizing;

/// Size in bytes of the delegate key.
pub const SYMMETRIC_KEY_SIZE: usize = 16;

/// A 20-byte authorization secret (`TPM_SECRET`).
#[derive(Clone)]
pub struct Secret(Zeroizing<[u8; TPM_SECRET_SIZE]>);

impl Secret {
    /// Wrap raw secret bytes.
    pub fn new(bytes: [u8; TPM_SECRET_SIZE]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// The all-zero secret.
    pub fn zero() -> Self {
        Self::new([0; TPM_SECRET_SIZE])
    }

    /// A fresh random secret.
    pub fn random(crypto: &dyn CryptoProvider) -> Result<Self, CryptoError> {
        let mut secret = Self::zero();
        crypto.random_bytes(&mut secret.0[..])?;
        Ok(secret)
    }

    /// The secret bytes.
    pub fn as_bytes(&self) -> &[u8; TPM_SECRET_SIZE] {
        &self.0
    }

    /// Constant-time comparison against raw bytes.
    pub fn matches(&self, other: &[u8]) -> bool {
        self.0[..].ct_eq(other).into()
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0[..])
    }
}

impl Eq for Secret {}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl Store for Secret {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append_bytes(&self.0[..]);
    }
}

impl Load for Secret {
    type Error = CodecError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, CodecError> {
        let mut secret = Self::zero();
        secret
            .0
            .copy_from_slice(cursor.load_bytes(TPM_SECRET_SIZE)?);
        Ok(secret)
    }
}

/// The AES-128 key that encrypts delegation sensitive areas.
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<[u8; SYMMETRIC_KEY_SIZE]>);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// A fresh random key.
    pub fn random(crypto: &dyn CryptoProvider) -> Result<Self, CryptoError> {
        let mut key = Self::new([0; SYMMETRIC_KEY_SIZE]);
        crypto.random_bytes(&mut key.0[..])?;
        Ok(key)
    }

    /// The key bytes.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

impl Store for SymmetricKey {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append_bytes(&self.0[..]);
    }
}

impl Load for SymmetricKey {
    type Error = CodecError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, CodecError> {
        let mut key = Self::new([0; SYMMETRIC_KEY_SIZE]);
        key.0.copy_from_slice(cursor.load_bytes(SYMMETRIC_KEY_SIZE)?);
        Ok(key)
    }
}
