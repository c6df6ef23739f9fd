// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire-level definitions for the TPM 1.2 key custody and delegation core:
//! the big-endian record codec and the structure tags, enumerations and flag
//! layouts shared by every record.

#![forbid(unsafe_code)]

pub mod codec;
pub mod tpm12proto;

pub use codec::CodecError;
pub use codec::Load;
pub use codec::LoadCursor;
pub use codec::Store;
pub use codec::StoreBuffer;

/// A SHA-1 digest (`TPM_DIGEST`).
pub type Digest = [u8; tpm12proto::TPM_DIGEST_SIZE];

/// Version of the persisted family and delegate table encoding.
pub const TABLE_FORMAT_VERSION: u16 = 1;

static_assertions::const_assert!(tpm12proto::TPM_PCR_SELECT_MAX == 3);
static_assertions::const_assert!(
    tpm12proto::TPM_DELEGATE_PER1_MASK_KEY & !tpm12proto::TPM_DELEGATE_PER1_MASK_OWNER == 0
);
