// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! TPM 1.2 key custody and delegation.
//!
//! [`TpmState`] holds the PCR bank, loaded keys, the family and delegate
//! tables, and the two secrets that protect delegation blobs (`tpmProof`
//! and the delegate key). Key records are unwrapped under their storage
//! parent and released subject to their authorization mode and PCR policy.
//! Delegations grant a subset of owner or key ordinals and are revoked by
//! bumping their family's verification count.
//!
//! Command transport, authorization sessions and non-volatile storage
//! belong to the caller; the caller reports how a command was authorized
//! through [`Authority`].

#![forbid(unsafe_code)]

pub mod arena;
pub mod config;
pub mod crypto;
pub mod delegation;
pub mod error;
mod instance;
pub mod key;
pub mod pcr;
pub mod permission;
pub mod secret;
mod state;

#[cfg(test)]
mod test_helpers;

pub use config::TpmConfig;
pub use delegation::Authority;
pub use error::ErrorKind;
pub use error::TpmError;
pub use instance::SharedTpm;
pub use state::TpmState;
