// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared fixtures for unit tests.

use crate::crypto::CryptoProvider;
use crate::crypto::RsaKeyPair;
use crate::crypto::SoftwareCrypto;
use crate::key::KeyObject;
use crate::key::KeySecrets;
use crate::key::KeyTemplate;
use crate::key::parms::KeyParms;
use crate::pcr::PcrBank;
use crate::secret::Secret;
use std::sync::OnceLock;
use tpm12_protocol::tpm12proto::AuthDataUsage;
use tpm12_protocol::tpm12proto::EncScheme;
use tpm12_protocol::tpm12proto::KeyFlags;
use tpm12_protocol::tpm12proto::KeyUsage;
use tpm12_protocol::tpm12proto::SigScheme;
use zeroize::Zeroizing;

const STORAGE_MODULUS: &str = "df8680c4fe09948af4ddc9e6e3cd9aa73950f79ae4c4f683ed7b1198097146bc\
26af0a771befebd717636ddd5fd932b88c477e32a7dfca3b28914269e1ccd12ed5cd9144374d91b7b7d5570f9556fa19\
0e5e9c49e2dbd9fd6aec92c7cc29d84a8710593d41b19eb2df4b0af892fe8ac601361764c80bc84387c186c8ccda579a\
ecf924b15e39f10d6e9b4ae597d2882e0c5ba285c67c12ad9a50a8a77e2dad5b5b6d4eb952538f0b0b373e88834793aa\
39ec8f5cc73453877cd9d7f594f46bdd0a4030a986ce032b898cfe1b20bdc9b6052be7c447e54bd0161ced3f46bde377\
14eb60555a6618c22aefa03f40185dd38e82cb121e4ee417051649abf9e085a1";

const STORAGE_PRIME: &str = "f05f3c15986f14fd8cdbb569ab98dff3a33dc1c9e3297cc7deb7122a40d6904e\
59fc380dc44670746a677a4898593e1c9840382f0b49e1fe9e8d1136b2cd9244a1ebc4484127631da61ed585203ae6cb\
7359775c77f264a805e5c914ef14ebd3a1ae42b56184bacf8127d33548e57250775ec8f1282b4fe696647776186c5f53";

const SMALL_MODULUS: &str = "bca3c5304fd3c2867901588e0d322ab1a421949801f1442430d517af3a7a23be\
71f0fa2bc7b458ecf12c41035dbf3c2dd13d399ec1838281e6fdb945b134c875";

const SMALL_PRIME: &str = "cecd34896dc4d010ef2c8eb90a4e237e222287bd0ec0cafd959e011d024f9f91";

/// Route tracing output to the test harness once per binary.
pub(crate) fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

fn keypair_from(modulus: &str, prime: &str) -> RsaKeyPair {
    let modulus = hex::decode(modulus).unwrap();
    let p = hex::decode(prime).unwrap();
    let exponent = vec![0x01, 0x00, 0x01];
    let derived = SoftwareCrypto
        .derive_rsa_private(&modulus, &exponent, &p)
        .unwrap();
    RsaKeyPair {
        modulus,
        exponent,
        p: Zeroizing::new(p),
        q: derived.q,
        d: derived.d,
    }
}

/// A fixed 2048-bit key pair, large enough for storage keys.
pub(crate) fn storage_keypair() -> RsaKeyPair {
    static PAIR: OnceLock<RsaKeyPair> = OnceLock::new();
    PAIR.get_or_init(|| keypair_from(STORAGE_MODULUS, STORAGE_PRIME))
        .clone()
}

/// A fixed 512-bit key pair for bind and legacy keys.
pub(crate) fn small_bind_keypair() -> RsaKeyPair {
    static PAIR: OnceLock<RsaKeyPair> = OnceLock::new();
    PAIR.get_or_init(|| keypair_from(SMALL_MODULUS, SMALL_PRIME))
        .clone()
}

/// A generated 2048-bit storage root key.
pub(crate) fn storage_root() -> KeyObject {
    init_tracing();
    KeyObject::generate(
        &SoftwareCrypto,
        None,
        KeyTemplate {
            usage: KeyUsage::Storage,
            flags: KeyFlags::new(),
            auth_data_usage: AuthDataUsage::Always,
            parms: KeyParms::rsa(2048, EncScheme::RsaEsOaepSha1Mgf1, SigScheme::None),
            pcr_policy: None,
        },
        KeySecrets {
            usage_auth: Secret::new([0x11; 20]),
            migration_auth: Secret::new([0x12; 20]),
        },
        storage_keypair(),
        &PcrBank::default(),
        0,
    )
    .unwrap()
}

#[test]
fn fixture_moduli_have_expected_sizes() {
    assert_eq!(storage_keypair().modulus.len(), 256);
    assert_eq!(small_bind_keypair().modulus.len(), 64);
}
