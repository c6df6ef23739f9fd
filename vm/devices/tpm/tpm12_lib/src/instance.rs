// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A [`TpmState`] shared between threads.

use crate::config::TpmConfig;
use crate::crypto::CryptoProvider;
use crate::delegation::Authority;
use crate::delegation::DelegatePublic;
use crate::delegation::FamilyOp;
use crate::delegation::TableView;
use crate::delegation::blob::DelegationBlob;
use crate::error::TpmError;
use crate::secret::Secret;
use crate::state::TpmState;
use parking_lot::RwLock;
use parking_lot::RwLockReadGuard;
use parking_lot::RwLockWriteGuard;
use std::sync::Arc;

/// Cloneable handle to one TPM instance.
///
/// Read-only commands take the lock shared; anything that changes tables,
/// keys or PCRs takes it exclusively, so every command observes a
/// consistent state.
#[derive(Debug, Clone)]
pub struct SharedTpm {
    state: Arc<RwLock<TpmState>>,
}

impl SharedTpm {
    /// Wrap an existing state.
    pub fn new(state: TpmState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Create fresh state and wrap it.
    pub fn create(config: TpmConfig, crypto: Arc<dyn CryptoProvider>) -> Result<Self, TpmError> {
        Ok(Self::new(TpmState::new(config, crypto)?))
    }

    /// Shared access.
    pub fn read(&self) -> RwLockReadGuard<'_, TpmState> {
        self.state.read()
    }

    /// Exclusive access.
    pub fn write(&self) -> RwLockWriteGuard<'_, TpmState> {
        self.state.write()
    }

    /// See [`TpmState::delegate_manage`].
    pub fn delegate_manage(
        &self,
        family_id: u32,
        op: FamilyOp,
        authority: &Authority,
    ) -> Result<u32, TpmError> {
        self.write().delegate_manage(family_id, op, authority)
    }

    /// See [`TpmState::verify_delegation`].
    pub fn verify_delegation(&self, blob: &DelegationBlob) -> Result<(), TpmError> {
        self.read().verify_delegation(blob)
    }

    /// See [`TpmState::lookup_row_for_use`]. The row is copied out so the
    /// lock is not held by the caller.
    pub fn lookup_row_for_use(&self, index: u32) -> Result<(DelegatePublic, Secret), TpmError> {
        let state = self.read();
        let (public, secret) = state.lookup_row_for_use(index)?;
        Ok((public.clone(), secret.clone()))
    }

    /// See [`TpmState::read_table`].
    pub fn read_table(&self) -> TableView {
        self.read().read_table()
    }
}
