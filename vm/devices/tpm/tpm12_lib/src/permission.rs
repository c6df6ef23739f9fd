// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Delegation permission evaluation.
//!
//! Every delegable ordinal owns one bit of `per1`, either in the owner
//! layout or the key layout. Some ordinals (`TPM_MakeIdentity`,
//! `TPM_ActivateIdentity`) appear in both.

use crate::crypto::CryptoProvider;
use crate::delegation::DelegatePublic;
use crate::delegation::Delegations;
use crate::error::TpmError;
use crate::pcr::PcrBank;
use tpm12_protocol::tpm12proto::CommandCode;
use tpm12_protocol::tpm12proto::DelegateType;

/// Bit position of `ordinal` in an owner delegation's `per1`.
pub fn owner_per1_bit(ordinal: CommandCode) -> Option<u32> {
    let bit = match ordinal {
        CommandCode::KeyControlOwner => 31,
        CommandCode::SetOrdinalAuditStatus => 30,
        CommandCode::DirWriteAuth => 29,
        CommandCode::CmkApproveMa => 28,
        CommandCode::NvWriteValue => 27,
        CommandCode::CmkCreateTicket => 26,
        CommandCode::NvReadValue => 25,
        CommandCode::DelegateLoadOwnerDelegation => 24,
        CommandCode::DaaJoin => 23,
        CommandCode::AuthorizeMigrationKey => 22,
        CommandCode::CreateMaintenanceArchive => 21,
        CommandCode::LoadMaintenanceArchive => 20,
        CommandCode::KillMaintenanceFeature => 19,
        CommandCode::OwnerReadInternalPub => 18,
        CommandCode::ResetLockValue => 17,
        CommandCode::OwnerClear => 16,
        CommandCode::DisableOwnerClear => 15,
        CommandCode::NvDefineSpace => 14,
        CommandCode::OwnerSetDisable => 13,
        CommandCode::SetCapability => 12,
        CommandCode::MakeIdentity => 11,
        CommandCode::ActivateIdentity => 10,
        CommandCode::OwnerReadPubek => 9,
        CommandCode::DisablePubekRead => 8,
        CommandCode::SetRedirection => 7,
        CommandCode::FieldUpgrade => 6,
        CommandCode::DelegateUpdateVerification => 5,
        CommandCode::CreateCounter => 4,
        CommandCode::ReleaseCounterOwner => 3,
        CommandCode::DelegateManage => 2,
        CommandCode::DelegateCreateOwnerDelegation => 1,
        CommandCode::DaaSign => 0,
        _ => return None,
    };
    Some(bit)
}

/// Bit position of `ordinal` in a key delegation's `per1`.
pub fn key_per1_bit(ordinal: CommandCode) -> Option<u32> {
    let bit = match ordinal {
        CommandCode::CmkConvertMigration => 28,
        CommandCode::TickStampBlob => 27,
        CommandCode::ChangeAuthAsymStart => 26,
        CommandCode::ChangeAuthAsymFinish => 25,
        CommandCode::CmkCreateKey => 24,
        CommandCode::MigrateKey => 23,
        CommandCode::LoadKey2 => 22,
        CommandCode::EstablishTransport => 21,
        CommandCode::ReleaseTransportSigned => 20,
        CommandCode::Quote2 => 19,
        CommandCode::Sealx => 18,
        CommandCode::MakeIdentity => 17,
        CommandCode::ActivateIdentity => 16,
        CommandCode::GetAuditDigestSigned => 15,
        CommandCode::Sign => 14,
        CommandCode::CertifyKey2 => 13,
        CommandCode::CertifyKey => 12,
        CommandCode::CreateWrapKey => 11,
        CommandCode::CmkCreateBlob => 10,
        CommandCode::CreateMigrationBlob => 9,
        CommandCode::ConvertMigrationBlob => 8,
        CommandCode::DelegateCreateKeyDelegation => 7,
        CommandCode::ChangeAuth => 6,
        CommandCode::GetPubKey => 5,
        CommandCode::UnBind => 4,
        CommandCode::Quote => 3,
        CommandCode::Unseal => 2,
        CommandCode::Seal => 1,
        CommandCode::LoadKey => 0,
        _ => return None,
    };
    Some(bit)
}

/// Check that `delegation` grants `ordinal` for an entity authorized as
/// `entity` (the owner or a key).
pub fn check_permission(
    delegation: &Delegations,
    entity: DelegateType,
    ordinal: u32,
) -> Result<(), TpmError> {
    let code = CommandCode::from_u32(ordinal).ok_or(TpmError::BadOrdinal(ordinal))?;
    if delegation.kind != entity {
        return Err(TpmError::AuthFail("delegation kind does not match entity"));
    }
    let bit = match entity {
        DelegateType::OwnerBits => owner_per1_bit(code),
        DelegateType::KeyBits => key_per1_bit(code),
    }
    .ok_or(TpmError::AuthFail("ordinal is not delegable for this entity"))?;

    if delegation.per1 & (1 << bit) == 0 {
        tracing::debug!(?code, bit, per1 = delegation.per1, "permission bit not set");
        return Err(TpmError::AuthFail("ordinal not permitted by delegation"));
    }
    Ok(())
}

/// The full check applied when a delegated session runs `ordinal`: the
/// permission bit, then the delegation's PCR and locality binding.
pub fn check_delegated_use(
    crypto: &dyn CryptoProvider,
    public: &DelegatePublic,
    entity: DelegateType,
    ordinal: u32,
    pcrs: &PcrBank,
    locality: u8,
) -> Result<(), TpmError> {
    check_permission(&public.permissions, entity, ordinal)?;
    public.pcr_info.check_release(crypto, pcrs, locality)
}

/// Reject `new` if it grants any bit `current` does not.
pub fn check_no_escalation(new: &Delegations, current: &Delegations) -> Result<(), TpmError> {
    if new.per1 & !current.per1 != 0 || new.per2 & !current.per2 != 0 {
        return Err(TpmError::AuthFail("delegation would exceed caller's permissions"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SoftwareCrypto;
    use crate::pcr::PcrInfoShort;
    use crate::pcr::PcrSelection;
    use tpm12_protocol::tpm12proto::LocalitySelection;

    #[test]
    fn owner_bits_follow_layout() {
        let grant = Delegations::owner(1 << 2);
        check_permission(
            &grant,
            DelegateType::OwnerBits,
            CommandCode::DelegateManage.into(),
        )
        .unwrap();
        assert!(matches!(
            check_permission(
                &grant,
                DelegateType::OwnerBits,
                CommandCode::OwnerClear.into()
            ),
            Err(TpmError::AuthFail(_))
        ));
        let all = Delegations::owner(u32::MAX);
        for code in [CommandCode::KeyControlOwner, CommandCode::DaaSign] {
            check_permission(&all, DelegateType::OwnerBits, code.into()).unwrap();
        }
    }

    #[test]
    fn kind_mismatch_is_authfail() {
        let key_grant = Delegations::key(1 << 14);
        check_permission(&key_grant, DelegateType::KeyBits, CommandCode::Sign.into()).unwrap();
        assert!(matches!(
            check_permission(&key_grant, DelegateType::OwnerBits, CommandCode::Sign.into()),
            Err(TpmError::AuthFail(_))
        ));
        // LoadKey has no owner bit.
        assert!(matches!(
            check_permission(
                &Delegations::owner(u32::MAX),
                DelegateType::OwnerBits,
                CommandCode::LoadKey.into()
            ),
            Err(TpmError::AuthFail(_))
        ));
    }

    #[test]
    fn shared_ordinals_use_their_own_layout() {
        let owner = Delegations::owner(1 << 11);
        let key = Delegations::key(1 << 17);
        let ordinal = CommandCode::MakeIdentity.into();
        check_permission(&owner, DelegateType::OwnerBits, ordinal).unwrap();
        check_permission(&key, DelegateType::KeyBits, ordinal).unwrap();
        assert_eq!(key_per1_bit(CommandCode::Quote), Some(3));
        assert_eq!(key_per1_bit(CommandCode::CmkConvertMigration), Some(28));
    }

    #[test]
    fn unknown_ordinal() {
        assert!(matches!(
            check_permission(&Delegations::owner(u32::MAX), DelegateType::OwnerBits, 0x9999),
            Err(TpmError::BadOrdinal(0x9999))
        ));
    }

    #[test]
    fn escalation_is_subset_check() {
        let current = Delegations::owner(0b1011);
        check_no_escalation(&Delegations::owner(0b0011), &current).unwrap();
        check_no_escalation(&Delegations::owner(0), &current).unwrap();
        assert!(check_no_escalation(&Delegations::owner(0b0100), &current).is_err());
        let mut per2 = Delegations::owner(0);
        per2.per2 = 1;
        assert!(check_no_escalation(&per2, &current).is_err());
    }

    #[test]
    fn delegated_use_checks_pcr_binding() {
        let mut pcrs = PcrBank::default();
        pcrs.extend(&SoftwareCrypto, 8, &[1; 20]).unwrap();
        let sel = PcrSelection::from_indices(&[8]).unwrap();
        let public = DelegatePublic {
            row_label: 0,
            pcr_info: PcrInfoShort {
                selection: sel,
                locality_at_release: LocalitySelection::new().with_zero(true),
                digest_at_release: pcrs.composite_digest(&SoftwareCrypto, &sel),
            },
            permissions: Delegations::owner(1 << 25),
            family_id: 1,
            verification_count: 1,
        };
        let ordinal = CommandCode::NvReadValue.into();
        check_delegated_use(&SoftwareCrypto, &public, DelegateType::OwnerBits, ordinal, &pcrs, 0)
            .unwrap();
        assert!(matches!(
            check_delegated_use(&SoftwareCrypto, &public, DelegateType::OwnerBits, ordinal, &pcrs, 2),
            Err(TpmError::BadLocality { .. })
        ));
        pcrs.extend(&SoftwareCrypto, 8, &[2; 20]).unwrap();
        assert!(matches!(
            check_delegated_use(&SoftwareCrypto, &public, DelegateType::OwnerBits, ordinal, &pcrs, 0),
            Err(TpmError::WrongPcrValue)
        ));
    }
}
