// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error type shared by every key and delegation operation.

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use thiserror::Error;
use tpm12_protocol::CodecError;
use tpm12_protocol::tpm12proto::rc;

/// Coarse classification of a [`TpmError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A record is malformed: bad tag, illegal field value, trailing bytes.
    Structure,
    /// A record ended before all of its fields were read.
    Truncation,
    /// The caller did not prove the required authorization.
    Authorization,
    /// An integrity digest did not verify.
    Integrity,
    /// A delegation's verification count is behind its family.
    StaleDelegation,
    /// A fixed-capacity table or slot arena is full.
    Resource,
    /// The crypto provider failed.
    CryptoProvider,
    /// A table index, family or key handle does not resolve.
    Lookup,
    /// PCR or locality binding does not hold.
    PcrPolicy,
    /// A parameter carries a value the operation does not accept.
    Parameter,
    /// The target family is disabled or locked.
    Disabled,
}

/// Errors returned by TPM 1.2 key custody and delegation operations.
#[derive(Debug, Error)]
pub enum TpmError {
    /// A record failed to decode.
    #[error("failed to decode record")]
    Codec(#[from] CodecError),
    /// A record decoded but its contents are not acceptable.
    #[error("invalid structure: {0}")]
    InvalidStructure(&'static str),
    /// Authorization failed.
    #[error("authorization failed: {0}")]
    AuthFail(&'static str),
    /// An HMAC or digest binding did not verify.
    #[error("integrity check failed for {0}")]
    Integrity(&'static str),
    /// A delegation was issued before its family's latest verification
    /// count bump.
    #[error(
        "stale delegation for family {family_id:#x}: verification count {found}, family is at {current}"
    )]
    FamilyCount {
        /// Family the delegation belongs to.
        family_id: u32,
        /// Count stamped into the delegation.
        found: u32,
        /// Family's current count.
        current: u32,
    },
    /// No valid table entry at the given index, or no family with the given
    /// id.
    #[error("no valid entry for {0:#x}")]
    BadIndex(u32),
    /// A parameter value is not accepted.
    #[error("bad parameter: {0}")]
    BadParameter(&'static str),
    /// A fixed-capacity table is full, or a persisted table does not fit.
    #[error("out of space in {0}")]
    Resources(&'static str),
    /// The family is disabled.
    #[error("family {0:#x} is disabled")]
    DisabledCmd(u32),
    /// The family is admin-locked and no owner authorized the operation.
    #[error("family {0:#x} is locked against unauthenticated management")]
    DelegateLock(u32),
    /// A delegated caller tried to act on another family.
    #[error("delegation from family {caller:#x} cannot act on family {target:#x}")]
    DelegateFamily {
        /// Family of the delegation the caller authenticated with.
        caller: u32,
        /// Family the operation targets.
        target: u32,
    },
    /// The composite digest of the selected PCRs does not match.
    #[error("PCR values do not match the release digest")]
    WrongPcrValue,
    /// The current locality is not in the release selection.
    #[error("locality {locality} is not permitted by selection {allowed:#04x}")]
    BadLocality {
        /// Locality the command was issued from.
        locality: u8,
        /// Raw locality-at-release selection.
        allowed: u8,
    },
    /// A PCR selection or locality selection is malformed.
    #[error("invalid PCR info: {0}")]
    InvalidPcrInfo(&'static str),
    /// The key's usage does not permit the operation.
    #[error("key usage {0:#06x} does not permit this operation")]
    InvalidKeyUsage(u16),
    /// The key's parameters violate the usage and scheme rules.
    #[error("bad key property: {0}")]
    BadKeyProperty(&'static str),
    /// Decrypted private material does not match the public key.
    #[error("private key does not match public key")]
    InconsistentKey(#[source] CryptoError),
    /// The ordinal cannot be delegated.
    #[error("ordinal {0:#x} is not delegable")]
    BadOrdinal(u32),
    /// The key handle does not name a loaded key.
    #[error("invalid key handle {0:#x}")]
    InvalidKeyHandle(u32),
    /// Decryption of a wrapped payload failed.
    #[error("failed to decrypt {0}")]
    Decrypt(&'static str, #[source] CryptoError),
    /// Encryption of a payload failed.
    #[error("failed to encrypt {0}")]
    Encrypt(&'static str, #[source] CryptoError),
    /// Any other crypto provider failure.
    #[error("crypto provider failure")]
    Crypto(#[from] CryptoError),
    /// The configuration was rejected.
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
}

impl TpmError {
    /// The coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TpmError::Codec(CodecError::Truncated { .. }) => ErrorKind::Truncation,
            TpmError::Codec(_) | TpmError::InvalidStructure(_) => ErrorKind::Structure,
            TpmError::AuthFail(_) | TpmError::DelegateFamily { .. } => ErrorKind::Authorization,
            TpmError::Integrity(_) | TpmError::InconsistentKey(_) => ErrorKind::Integrity,
            TpmError::FamilyCount { .. } => ErrorKind::StaleDelegation,
            TpmError::Resources(_) => ErrorKind::Resource,
            TpmError::Decrypt(..) | TpmError::Encrypt(..) | TpmError::Crypto(_) => {
                ErrorKind::CryptoProvider
            }
            TpmError::BadIndex(_) | TpmError::InvalidKeyHandle(_) => ErrorKind::Lookup,
            TpmError::WrongPcrValue
            | TpmError::BadLocality { .. }
            | TpmError::InvalidPcrInfo(_) => ErrorKind::PcrPolicy,
            TpmError::BadParameter(_)
            | TpmError::InvalidKeyUsage(_)
            | TpmError::BadKeyProperty(_)
            | TpmError::BadOrdinal(_)
            | TpmError::Config(_) => ErrorKind::Parameter,
            TpmError::DisabledCmd(_) | TpmError::DelegateLock(_) => ErrorKind::Disabled,
        }
    }

    /// The TPM 1.2 return code a command would report for this error.
    pub fn return_code(&self) -> u32 {
        match self {
            TpmError::Codec(CodecError::Truncated { .. }) => rc::TPM_SIZE,
            TpmError::Codec(CodecError::TrailingBytes(_)) => rc::TPM_BAD_DATASIZE,
            TpmError::Codec(_) | TpmError::InvalidStructure(_) => rc::TPM_INVALID_STRUCTURE,
            TpmError::AuthFail(_) | TpmError::Integrity(_) => rc::TPM_AUTHFAIL,
            TpmError::FamilyCount { .. } => rc::TPM_FAMILYCOUNT,
            TpmError::BadIndex(_) => rc::TPM_BADINDEX,
            TpmError::BadParameter(_) | TpmError::Config(_) => rc::TPM_BAD_PARAMETER,
            TpmError::Resources(_) => rc::TPM_RESOURCES,
            TpmError::DisabledCmd(_) => rc::TPM_DISABLED_CMD,
            TpmError::DelegateLock(_) => rc::TPM_DELEGATE_LOCK,
            TpmError::DelegateFamily { .. } => rc::TPM_DELEGATE_FAMILY,
            TpmError::WrongPcrValue => rc::TPM_WRONGPCRVAL,
            TpmError::BadLocality { .. } => rc::TPM_BAD_LOCALITY,
            TpmError::InvalidPcrInfo(_) => rc::TPM_INVALID_PCR_INFO,
            TpmError::InvalidKeyUsage(_) => rc::TPM_INVALID_KEYUSAGE,
            TpmError::BadKeyProperty(_) => rc::TPM_BAD_KEY_PROPERTY,
            TpmError::BadOrdinal(_) => rc::TPM_BAD_ORDINAL,
            TpmError::InvalidKeyHandle(_) => rc::TPM_INVALID_KEYHANDLE,
            TpmError::Decrypt(..) => rc::TPM_DECRYPT_ERROR,
            TpmError::Encrypt(..) => rc::TPM_ENCRYPT_ERROR,
            TpmError::InconsistentKey(_) | TpmError::Crypto(_) => rc::TPM_FAIL,
        }
    }
}
