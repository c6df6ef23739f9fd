// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! TPM 1.2 structure tags, enumerations, ordinals and flag layouts, as defined
//! in "TPM Main Part 2: TPM Structures", version 1.2 revision 116.

use bitfield_struct::bitfield;

/// Size in bytes of a SHA-1 digest (`TPM_DIGEST`).
pub const TPM_DIGEST_SIZE: usize = 20;

/// Size in bytes of an authorization secret (`TPM_SECRET`).
pub const TPM_SECRET_SIZE: usize = 20;

/// Number of platform configuration registers.
pub const TPM_NUM_PCR: usize = 24;

/// Largest legal `sizeOfSelect` in a `TPM_PCR_SELECTION`.
pub const TPM_PCR_SELECT_MAX: usize = TPM_NUM_PCR.div_ceil(8);

/// Highest locality a command can be issued from.
pub const TPM_LOCALITY_MAX: u8 = 4;

/// Minimum number of family table rows a TPM must provide.
pub const TPM_NUM_FAMILY_TABLE_ENTRY_MIN: usize = 8;

/// Minimum number of delegate table rows a TPM must provide.
pub const TPM_NUM_DELEGATE_TABLE_ENTRY_MIN: usize = 2;

/// `TPM_STRUCT_VER` that opens a version 1.1 `TPM_KEY`.
pub const TPM_STRUCT_VER_1_1: [u8; 4] = [0x01, 0x01, 0x00, 0x00];

/// Largest RSA modulus, in bits, a key may declare.
pub const TPM_RSA_KEY_LENGTH_MAX: u32 = 2048;

/// RSA public exponent used when a key's parameters leave it empty.
pub const TPM_DEFAULT_RSA_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

/// Legal `per1` bits for an owner delegation.
pub const TPM_DELEGATE_PER1_MASK_OWNER: u32 = 0xffff_ffff;
/// Legal `per2` bits for an owner delegation.
pub const TPM_DELEGATE_PER2_MASK_OWNER: u32 = 0;
/// Legal `per1` bits for a key delegation.
pub const TPM_DELEGATE_PER1_MASK_KEY: u32 = 0x1fff_ffff;
/// Legal `per2` bits for a key delegation.
pub const TPM_DELEGATE_PER2_MASK_KEY: u32 = 0;

/// Structure tags (`TPM_STRUCTURE_TAG`) that open tagged records.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum StructureTag {
    /// `TPM_TAG_PCR_INFO_LONG`
    PcrInfoLong = 0x0006,
    /// `TPM_TAG_KEY`
    Key = 0x0015,
    /// `TPM_TAG_DELEGATIONS`
    Delegations = 0x001A,
    /// `TPM_TAG_DELEGATE_PUBLIC`
    DelegatePublic = 0x001B,
    /// `TPM_TAG_DELEGATE_TABLE_ROW`
    DelegateTableRow = 0x001C,
    /// `TPM_TAG_FAMILY_TABLE_ENTRY`
    FamilyTableEntry = 0x0025,
    /// `TPM_TAG_DELEGATE_SENSITIVE`
    DelegateSensitive = 0x0026,
    /// `TPM_TAG_DELG_KEY_BLOB`
    DelegateKeyBlob = 0x0027,
    /// `TPM_TAG_KEY12`
    Key12 = 0x0028,
    /// `TPM_TAG_DELEGATE_OWNER_BLOB`
    DelegateOwnerBlob = 0x002A,
}

impl From<StructureTag> for u16 {
    fn from(tag: StructureTag) -> Self {
        tag as u16
    }
}

impl StructureTag {
    /// Map a raw tag to a known structure tag.
    pub fn from_u16(val: u16) -> Option<StructureTag> {
        let ret = match val {
            0x0006 => Self::PcrInfoLong,
            0x0015 => Self::Key,
            0x001A => Self::Delegations,
            0x001B => Self::DelegatePublic,
            0x001C => Self::DelegateTableRow,
            0x0025 => Self::FamilyTableEntry,
            0x0026 => Self::DelegateSensitive,
            0x0027 => Self::DelegateKeyBlob,
            0x0028 => Self::Key12,
            0x002A => Self::DelegateOwnerBlob,
            _ => return None,
        };
        Some(ret)
    }
}

/// `TPM_KEY_USAGE`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum KeyUsage {
    /// Signs data; never encrypts.
    Signing = 0x0010,
    /// Wraps other keys.
    Storage = 0x0011,
    /// Attestation identity key.
    Identity = 0x0012,
    /// Ephemeral key for the asymmetric change-auth protocol.
    AuthChange = 0x0013,
    /// Binds data for `TPM_UnBind`.
    Bind = 0x0014,
    /// Signs and binds, as 1.1 keys could.
    Legacy = 0x0015,
    /// Target of certified migration.
    Migrate = 0x0016,
}

impl From<KeyUsage> for u16 {
    fn from(usage: KeyUsage) -> Self {
        usage as u16
    }
}

impl KeyUsage {
    /// Map a raw usage value.
    pub fn from_u16(val: u16) -> Option<KeyUsage> {
        let ret = match val {
            0x0010 => Self::Signing,
            0x0011 => Self::Storage,
            0x0012 => Self::Identity,
            0x0013 => Self::AuthChange,
            0x0014 => Self::Bind,
            0x0015 => Self::Legacy,
            0x0016 => Self::Migrate,
            _ => return None,
        };
        Some(ret)
    }
}

/// `TPM_ALGORITHM_ID`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum AlgorithmId {
    /// RSA
    Rsa = 0x0000_0001,
    /// SHA-1
    Sha = 0x0000_0004,
    /// HMAC-SHA-1
    Hmac = 0x0000_0005,
    /// AES with a 128-bit key
    Aes128 = 0x0000_0006,
}

impl AlgorithmId {
    /// Map a raw algorithm id.
    pub fn from_u32(val: u32) -> Option<AlgorithmId> {
        let ret = match val {
            0x0000_0001 => Self::Rsa,
            0x0000_0004 => Self::Sha,
            0x0000_0005 => Self::Hmac,
            0x0000_0006 => Self::Aes128,
            _ => return None,
        };
        Some(ret)
    }
}

/// `TPM_ENC_SCHEME`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum EncScheme {
    /// No encryption.
    None = 0x0001,
    /// RSAES PKCS#1 v1.5.
    RsaEsPkcsV15 = 0x0002,
    /// RSAES-OAEP with SHA-1 and MGF1.
    RsaEsOaepSha1Mgf1 = 0x0003,
    /// Symmetric counter mode.
    SymCtr = 0x0004,
    /// Symmetric output feedback mode.
    SymOfb = 0x0005,
}

impl EncScheme {
    /// Map a raw encryption scheme.
    pub fn from_u16(val: u16) -> Option<EncScheme> {
        let ret = match val {
            0x0001 => Self::None,
            0x0002 => Self::RsaEsPkcsV15,
            0x0003 => Self::RsaEsOaepSha1Mgf1,
            0x0004 => Self::SymCtr,
            0x0005 => Self::SymOfb,
            _ => return None,
        };
        Some(ret)
    }
}

/// `TPM_SIG_SCHEME`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum SigScheme {
    /// No signature scheme.
    None = 0x0001,
    /// RSASSA PKCS#1 v1.5 over a SHA-1 digest.
    RsaSsaPkcsV15Sha1 = 0x0002,
    /// RSASSA PKCS#1 v1.5 over a caller-supplied DER digest.
    RsaSsaPkcsV15Der = 0x0003,
    /// RSASSA PKCS#1 v1.5 over a `TPM_SIGN_INFO`.
    RsaSsaPkcsV15Info = 0x0004,
}

impl SigScheme {
    /// Map a raw signature scheme.
    pub fn from_u16(val: u16) -> Option<SigScheme> {
        let ret = match val {
            0x0001 => Self::None,
            0x0002 => Self::RsaSsaPkcsV15Sha1,
            0x0003 => Self::RsaSsaPkcsV15Der,
            0x0004 => Self::RsaSsaPkcsV15Info,
            _ => return None,
        };
        Some(ret)
    }
}

/// `TPM_AUTH_DATA_USAGE`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthDataUsage {
    /// Usage never requires proof of the usage secret.
    Never = 0x00,
    /// Every use requires proof of the usage secret.
    Always = 0x01,
    /// Only private-key operations require proof of the usage secret.
    PrivUseOnly = 0x03,
}

impl AuthDataUsage {
    /// Map a raw auth data usage byte.
    pub fn from_u8(val: u8) -> Option<AuthDataUsage> {
        let ret = match val {
            0x00 => Self::Never,
            0x01 => Self::Always,
            0x03 => Self::PrivUseOnly,
            _ => return None,
        };
        Some(ret)
    }
}

/// `TPM_PAYLOAD_TYPE` carried in a `TPM_STORE_ASYMKEY`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    /// Ordinary asymmetric key.
    Asym = 0x01,
    /// Certified-migration key restricted to approved authorities.
    MigrateRestricted = 0x06,
    /// Certified-migration key imported from outside the TPM.
    MigrateExternal = 0x07,
}

impl PayloadType {
    /// Map a raw payload type byte.
    pub fn from_u8(val: u8) -> Option<PayloadType> {
        let ret = match val {
            0x01 => Self::Asym,
            0x06 => Self::MigrateRestricted,
            0x07 => Self::MigrateExternal,
            _ => return None,
        };
        Some(ret)
    }
}

/// `TPM_DELEGATE_TYPE` discriminator in a `TPM_DELEGATIONS`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum DelegateType {
    /// Delegates owner-authorized ordinals.
    OwnerBits = 0x0000_0001,
    /// Delegates key-authorized ordinals.
    KeyBits = 0x0000_0002,
}

impl DelegateType {
    /// Map a raw delegate type.
    pub fn from_u32(val: u32) -> Option<DelegateType> {
        let ret = match val {
            0x0000_0001 => Self::OwnerBits,
            0x0000_0002 => Self::KeyBits,
            _ => return None,
        };
        Some(ret)
    }

    /// Legal `(per1, per2)` masks for this delegation kind.
    pub fn permission_masks(self) -> (u32, u32) {
        match self {
            Self::OwnerBits => (TPM_DELEGATE_PER1_MASK_OWNER, TPM_DELEGATE_PER2_MASK_OWNER),
            Self::KeyBits => (TPM_DELEGATE_PER1_MASK_KEY, TPM_DELEGATE_PER2_MASK_KEY),
        }
    }
}

/// `TPM_FAMILY_OPERATION` opcodes accepted by `TPM_Delegate_Manage`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum FamilyOperation {
    /// Create a new family.
    Create = 0x0000_0001,
    /// Enable or disable a family.
    Enable = 0x0000_0002,
    /// Lock or unlock unauthenticated management of a family.
    Admin = 0x0000_0003,
    /// Invalidate a family.
    Invalidate = 0x0000_0004,
}

impl FamilyOperation {
    /// Map a raw opcode.
    pub fn from_u32(val: u32) -> Option<FamilyOperation> {
        let ret = match val {
            0x0000_0001 => Self::Create,
            0x0000_0002 => Self::Enable,
            0x0000_0003 => Self::Admin,
            0x0000_0004 => Self::Invalidate,
            _ => return None,
        };
        Some(ret)
    }
}

/// `TPM_COMMAND_CODE` values for every ordinal that can be delegated, plus
/// the delegation management ordinals themselves.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u32)]
#[expect(missing_docs)] // ordinal names match the TPM 1.2 command names
pub enum CommandCode {
    ChangeAuth = 0x0000_000C,
    ChangeAuthAsymStart = 0x0000_000E,
    ChangeAuthAsymFinish = 0x0000_000F,
    CmkCreateTicket = 0x0000_0012,
    CmkCreateKey = 0x0000_0013,
    Quote = 0x0000_0016,
    Seal = 0x0000_0017,
    Unseal = 0x0000_0018,
    DirWriteAuth = 0x0000_0019,
    CmkCreateBlob = 0x0000_001B,
    CmkApproveMa = 0x0000_001D,
    UnBind = 0x0000_001E,
    CreateWrapKey = 0x0000_001F,
    LoadKey = 0x0000_0020,
    GetPubKey = 0x0000_0021,
    KeyControlOwner = 0x0000_0023,
    CmkConvertMigration = 0x0000_0024,
    MigrateKey = 0x0000_0025,
    CreateMigrationBlob = 0x0000_0028,
    DaaJoin = 0x0000_0029,
    ConvertMigrationBlob = 0x0000_002A,
    AuthorizeMigrationKey = 0x0000_002B,
    CreateMaintenanceArchive = 0x0000_002C,
    LoadMaintenanceArchive = 0x0000_002D,
    KillMaintenanceFeature = 0x0000_002E,
    DaaSign = 0x0000_0031,
    CertifyKey = 0x0000_0032,
    CertifyKey2 = 0x0000_0033,
    Sign = 0x0000_003C,
    Sealx = 0x0000_003D,
    Quote2 = 0x0000_003E,
    SetCapability = 0x0000_003F,
    ResetLockValue = 0x0000_0040,
    LoadKey2 = 0x0000_0041,
    OwnerClear = 0x0000_005B,
    DisableOwnerClear = 0x0000_005C,
    OwnerSetDisable = 0x0000_006E,
    MakeIdentity = 0x0000_0079,
    ActivateIdentity = 0x0000_007A,
    OwnerReadPubek = 0x0000_007D,
    DisablePubekRead = 0x0000_007E,
    OwnerReadInternalPub = 0x0000_0081,
    GetAuditDigestSigned = 0x0000_0086,
    SetOrdinalAuditStatus = 0x0000_008D,
    SetRedirection = 0x0000_009A,
    FieldUpgrade = 0x0000_00AA,
    NvDefineSpace = 0x0000_00CC,
    NvWriteValue = 0x0000_00CD,
    NvReadValue = 0x0000_00CF,
    DelegateUpdateVerification = 0x0000_00D1,
    DelegateManage = 0x0000_00D2,
    DelegateCreateKeyDelegation = 0x0000_00D4,
    DelegateCreateOwnerDelegation = 0x0000_00D5,
    DelegateVerifyDelegation = 0x0000_00D6,
    DelegateLoadOwnerDelegation = 0x0000_00D8,
    DelegateReadTable = 0x0000_00DB,
    CreateCounter = 0x0000_00DC,
    ReleaseCounterOwner = 0x0000_00E0,
    EstablishTransport = 0x0000_00E6,
    ReleaseTransportSigned = 0x0000_00E8,
    TickStampBlob = 0x0000_00F2,
}

impl From<CommandCode> for u32 {
    fn from(code: CommandCode) -> Self {
        code as u32
    }
}

impl CommandCode {
    /// Map a raw ordinal to a known command code.
    pub fn from_u32(val: u32) -> Option<CommandCode> {
        let ret = match val {
            0x0000_000C => Self::ChangeAuth,
            0x0000_000E => Self::ChangeAuthAsymStart,
            0x0000_000F => Self::ChangeAuthAsymFinish,
            0x0000_0012 => Self::CmkCreateTicket,
            0x0000_0013 => Self::CmkCreateKey,
            0x0000_0016 => Self::Quote,
            0x0000_0017 => Self::Seal,
            0x0000_0018 => Self::Unseal,
            0x0000_0019 => Self::DirWriteAuth,
            0x0000_001B => Self::CmkCreateBlob,
            0x0000_001D => Self::CmkApproveMa,
            0x0000_001E => Self::UnBind,
            0x0000_001F => Self::CreateWrapKey,
            0x0000_0020 => Self::LoadKey,
            0x0000_0021 => Self::GetPubKey,
            0x0000_0023 => Self::KeyControlOwner,
            0x0000_0024 => Self::CmkConvertMigration,
            0x0000_0025 => Self::MigrateKey,
            0x0000_0028 => Self::CreateMigrationBlob,
            0x0000_0029 => Self::DaaJoin,
            0x0000_002A => Self::ConvertMigrationBlob,
            0x0000_002B => Self::AuthorizeMigrationKey,
            0x0000_002C => Self::CreateMaintenanceArchive,
            0x0000_002D => Self::LoadMaintenanceArchive,
            0x0000_002E => Self::KillMaintenanceFeature,
            0x0000_0031 => Self::DaaSign,
            0x0000_0032 => Self::CertifyKey,
            0x0000_0033 => Self::CertifyKey2,
            0x0000_003C => Self::Sign,
            0x0000_003D => Self::Sealx,
            0x0000_003E => Self::Quote2,
            0x0000_003F => Self::SetCapability,
            0x0000_0040 => Self::ResetLockValue,
            0x0000_0041 => Self::LoadKey2,
            0x0000_005B => Self::OwnerClear,
            0x0000_005C => Self::DisableOwnerClear,
            0x0000_006E => Self::OwnerSetDisable,
            0x0000_0079 => Self::MakeIdentity,
            0x0000_007A => Self::ActivateIdentity,
            0x0000_007D => Self::OwnerReadPubek,
            0x0000_007E => Self::DisablePubekRead,
            0x0000_0081 => Self::OwnerReadInternalPub,
            0x0000_0086 => Self::GetAuditDigestSigned,
            0x0000_008D => Self::SetOrdinalAuditStatus,
            0x0000_009A => Self::SetRedirection,
            0x0000_00AA => Self::FieldUpgrade,
            0x0000_00CC => Self::NvDefineSpace,
            0x0000_00CD => Self::NvWriteValue,
            0x0000_00CF => Self::NvReadValue,
            0x0000_00D1 => Self::DelegateUpdateVerification,
            0x0000_00D2 => Self::DelegateManage,
            0x0000_00D4 => Self::DelegateCreateKeyDelegation,
            0x0000_00D5 => Self::DelegateCreateOwnerDelegation,
            0x0000_00D6 => Self::DelegateVerifyDelegation,
            0x0000_00D8 => Self::DelegateLoadOwnerDelegation,
            0x0000_00DB => Self::DelegateReadTable,
            0x0000_00DC => Self::CreateCounter,
            0x0000_00E0 => Self::ReleaseCounterOwner,
            0x0000_00E6 => Self::EstablishTransport,
            0x0000_00E8 => Self::ReleaseTransportSigned,
            0x0000_00F2 => Self::TickStampBlob,
            _ => return None,
        };
        Some(ret)
    }
}

/// `TPM_KEY_FLAGS`
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct KeyFlags {
    /// `TPM_REDIRECTION`: output goes to a redirection channel. Not supported.
    pub redirection: bool,
    /// `TPM_MIGRATABLE`
    pub migratable: bool,
    /// `TPM_ISVOLATILE`: the key is discarded on `TPM_Startup(ST_CLEAR)`.
    pub is_volatile: bool,
    /// `TPM_PCRIGNOREDONREAD`: PCRs are not checked for public reads.
    pub pcr_ignored_on_read: bool,
    /// `TPM_MIGRATEAUTHORITY`: certified-migration key.
    pub migrate_authority: bool,
    #[bits(27)]
    _reserved: u32,
}

impl KeyFlags {
    /// Flags this implementation accepts when loading a key.
    pub const SUPPORTED_MASK: u32 = 0x0000_001e;
}

/// `TPM_FAMILY_FLAGS`
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct FamilyFlags {
    /// `TPM_FAMFLAG_ENABLED`
    pub enabled: bool,
    /// `TPM_DELEGATE_ADMIN_LOCK`: unauthenticated management is refused.
    pub admin_lock: bool,
    #[bits(30)]
    _reserved: u32,
}

/// `TPM_LOCALITY_SELECTION`
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct LocalitySelection {
    /// `TPM_LOC_ZERO`
    pub zero: bool,
    /// `TPM_LOC_ONE`
    pub one: bool,
    /// `TPM_LOC_TWO`
    pub two: bool,
    /// `TPM_LOC_THREE`
    pub three: bool,
    /// `TPM_LOC_FOUR`
    pub four: bool,
    #[bits(3)]
    _reserved: u8,
}

impl LocalitySelection {
    /// Every locality (`TPM_LOC_ALL`).
    pub const ALL: LocalitySelection = LocalitySelection::from_bits(0x1f);

    /// A selection is legal when it names at least one locality and no bits
    /// beyond locality four.
    pub fn is_valid(&self) -> bool {
        let bits = self.into_bits();
        bits != 0 && bits & !Self::ALL.into_bits() == 0
    }

    /// Returns true if `locality` is a member of this selection.
    pub fn contains(&self, locality: u8) -> bool {
        locality <= TPM_LOCALITY_MAX && self.into_bits() & (1 << locality) != 0
    }
}

/// TPM 1.2 return codes (`TPM_RESULT`) surfaced by this crate family.
pub mod rc {
    #![expect(missing_docs)] // names match the TPM 1.2 return code names

    pub const TPM_SUCCESS: u32 = 0;
    pub const TPM_AUTHFAIL: u32 = 1;
    pub const TPM_BADINDEX: u32 = 2;
    pub const TPM_BAD_PARAMETER: u32 = 3;
    pub const TPM_DISABLED_CMD: u32 = 8;
    pub const TPM_FAIL: u32 = 9;
    pub const TPM_BAD_ORDINAL: u32 = 10;
    pub const TPM_INVALID_KEYHANDLE: u32 = 12;
    pub const TPM_INVALID_PCR_INFO: u32 = 16;
    pub const TPM_RESOURCES: u32 = 21;
    pub const TPM_SIZE: u32 = 23;
    pub const TPM_WRONGPCRVAL: u32 = 24;
    pub const TPM_ENCRYPT_ERROR: u32 = 32;
    pub const TPM_DECRYPT_ERROR: u32 = 33;
    pub const TPM_INVALID_KEYUSAGE: u32 = 36;
    pub const TPM_BAD_KEY_PROPERTY: u32 = 40;
    pub const TPM_BAD_SCHEME: u32 = 42;
    pub const TPM_BAD_DATASIZE: u32 = 43;
    pub const TPM_BAD_LOCALITY: u32 = 61;
    pub const TPM_FAMILYCOUNT: u32 = 64;
    pub const TPM_INVALID_STRUCTURE: u32 = 67;
    pub const TPM_DELEGATE_LOCK: u32 = 75;
    pub const TPM_DELEGATE_FAMILY: u32 = 76;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_raw_values() {
        for tag in [
            StructureTag::PcrInfoLong,
            StructureTag::Delegations,
            StructureTag::DelegatePublic,
            StructureTag::DelegateTableRow,
            StructureTag::FamilyTableEntry,
            StructureTag::DelegateSensitive,
            StructureTag::DelegateKeyBlob,
            StructureTag::Key12,
            StructureTag::DelegateOwnerBlob,
        ] {
            assert_eq!(StructureTag::from_u16(tag.into()), Some(tag));
        }
        assert_eq!(StructureTag::from_u16(0x0029), None);
    }

    #[test]
    fn key_flag_bits() {
        let flags = KeyFlags::new()
            .with_migratable(true)
            .with_pcr_ignored_on_read(true);
        assert_eq!(flags.into_bits(), 0x0a);
        assert!(KeyFlags::from_bits(0x10).migrate_authority());
        assert_eq!(
            KeyFlags::from_bits(0x01).into_bits() & !KeyFlags::SUPPORTED_MASK,
            0x01
        );
    }

    #[test]
    fn locality_selection_membership() {
        let sel = LocalitySelection::new().with_zero(true).with_three(true);
        assert!(sel.is_valid());
        assert!(sel.contains(0));
        assert!(sel.contains(3));
        assert!(!sel.contains(1));
        assert!(!sel.contains(5));

        assert!(!LocalitySelection::from_bits(0).is_valid());
        assert!(!LocalitySelection::from_bits(0x21).is_valid());
        assert!(LocalitySelection::ALL.contains(4));
    }

    #[test]
    fn delegate_masks() {
        assert_eq!(
            DelegateType::KeyBits.permission_masks(),
            (0x1fff_ffff, 0)
        );
        assert_eq!(DelegateType::from_u32(3), None);
    }
}
