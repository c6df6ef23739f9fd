// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Table sizing and policy knobs.

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tpm12_protocol::tpm12proto::TPM_NUM_DELEGATE_TABLE_ENTRY_MIN;
use tpm12_protocol::tpm12proto::TPM_NUM_FAMILY_TABLE_ENTRY_MIN;

/// Configuration for a [`TpmState`](crate::TpmState).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct TpmConfig {
    /// Number of family table rows.
    pub family_table_capacity: usize,
    /// Number of delegate table rows.
    pub delegate_table_capacity: usize,
    /// Number of loaded-key slots, root keys included.
    pub key_slot_capacity: usize,
    /// Clear delegate table rows of a family when it is invalidated.
    pub invalidate_rows_with_family: bool,
}

impl Default for TpmConfig {
    fn default() -> Self {
        Self {
            family_table_capacity: TPM_NUM_FAMILY_TABLE_ENTRY_MIN,
            delegate_table_capacity: TPM_NUM_DELEGATE_TABLE_ENTRY_MIN,
            key_slot_capacity: 10,
            invalidate_rows_with_family: false,
        }
    }
}

/// Configuration rejected by [`TpmConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Fewer family rows than the minimum.
    #[error("family table needs at least {min} rows, got {requested}")]
    FamilyTableTooSmall {
        /// Configured rows.
        requested: usize,
        /// Required rows.
        min: usize,
    },
    /// Fewer delegate rows than the minimum.
    #[error("delegate table needs at least {min} rows, got {requested}")]
    DelegateTableTooSmall {
        /// Configured rows.
        requested: usize,
        /// Required rows.
        min: usize,
    },
    /// No room for any key.
    #[error("at least one key slot is required")]
    NoKeySlots,
    /// A table capacity does not fit the persisted row count.
    #[error("capacity {0} exceeds the persisted format limit")]
    TooLarge(usize),
}

impl TpmConfig {
    /// Check the configuration against the minimum table sizes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.family_table_capacity < TPM_NUM_FAMILY_TABLE_ENTRY_MIN {
            return Err(ConfigError::FamilyTableTooSmall {
                requested: self.family_table_capacity,
                min: TPM_NUM_FAMILY_TABLE_ENTRY_MIN,
            });
        }
        if self.delegate_table_capacity < TPM_NUM_DELEGATE_TABLE_ENTRY_MIN {
            return Err(ConfigError::DelegateTableTooSmall {
                requested: self.delegate_table_capacity,
                min: TPM_NUM_DELEGATE_TABLE_ENTRY_MIN,
            });
        }
        if self.key_slot_capacity == 0 {
            return Err(ConfigError::NoKeySlots);
        }
        for capacity in [
            self.family_table_capacity,
            self.delegate_table_capacity,
            self.key_slot_capacity,
        ] {
            if u32::try_from(capacity).is_err() {
                return Err(ConfigError::TooLarge(capacity));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TpmConfig::default();
        config.validate().unwrap();
        assert_eq!(config.family_table_capacity, 8);
        assert_eq!(config.delegate_table_capacity, 2);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: TpmConfig =
            serde_json::from_str(r#"{ "delegate_table_capacity": 4 }"#).unwrap();
        assert_eq!(config.delegate_table_capacity, 4);
        assert_eq!(config.family_table_capacity, 8);
        assert!(!config.invalidate_rows_with_family);

        assert!(serde_json::from_str::<TpmConfig>(r#"{ "bogus": 1 }"#).is_err());
    }

    #[test]
    fn undersized_tables_are_rejected() {
        let config = TpmConfig {
            family_table_capacity: 4,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::FamilyTableTooSmall {
                requested: 4,
                min: 8
            })
        );
        let config = TpmConfig {
            delegate_table_capacity: 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DelegateTableTooSmall { .. })
        ));
        let config = TpmConfig {
            key_slot_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoKeySlots));
    }
}
