// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `TPM_KEY_PARMS` and the usage, scheme and size rules every key obeys.

use crate::error::TpmError;
use tpm12_protocol::Load;
use tpm12_protocol::LoadCursor;
use tpm12_protocol::Store;
use tpm12_protocol::StoreBuffer;
use tpm12_protocol::tpm12proto::AlgorithmId;
use tpm12_protocol::tpm12proto::EncScheme;
use tpm12_protocol::tpm12proto::KeyUsage;
use tpm12_protocol::tpm12proto::SigScheme;
use tpm12_protocol::tpm12proto::TPM_DEFAULT_RSA_EXPONENT;
use tpm12_protocol::tpm12proto::TPM_RSA_KEY_LENGTH_MAX;

/// `TPM_RSA_KEY_PARMS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaKeyParms {
    /// Modulus size in bits.
    pub key_length: u32,
    /// Number of primes; only two-prime keys are supported.
    pub num_primes: u32,
    /// Public exponent; empty selects the default 65537.
    pub exponent: Vec<u8>,
}

impl RsaKeyParms {
    /// A two-prime key of `key_length` bits with the default exponent.
    pub fn new(key_length: u32) -> Self {
        Self {
            key_length,
            num_primes: 2,
            exponent: Vec::new(),
        }
    }

    /// The exponent to use in RSA operations.
    pub fn effective_exponent(&self) -> &[u8] {
        if self.exponent.is_empty() {
            &TPM_DEFAULT_RSA_EXPONENT
        } else {
            &self.exponent
        }
    }

    /// Returns true if the exponent is empty or equals 65537, ignoring leading
    /// zero bytes.
    pub fn has_default_exponent(&self) -> bool {
        if self.exponent.is_empty() {
            return true;
        }
        let first = self
            .exponent
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(self.exponent.len());
        self.exponent[first..] == TPM_DEFAULT_RSA_EXPONENT
    }
}

impl Store for RsaKeyParms {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append_u32(self.key_length);
        buf.append_u32(self.num_primes);
        buf.append_sized(&self.exponent);
    }
}

impl Load for RsaKeyParms {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        Ok(Self {
            key_length: cursor.load_u32()?,
            num_primes: cursor.load_u32()?,
            exponent: cursor.load_sized()?.to_vec(),
        })
    }
}

/// Algorithm-specific parameters inside a `TPM_KEY_PARMS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlgorithmParms {
    /// RSA parameters.
    Rsa(RsaKeyParms),
    /// Parameters of an algorithm this crate does not interpret.
    Opaque(Vec<u8>),
}

/// `TPM_KEY_PARMS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParms {
    /// Raw `algorithmID`.
    pub algorithm_id: u32,
    /// Encryption scheme.
    pub enc_scheme: EncScheme,
    /// Signature scheme.
    pub sig_scheme: SigScheme,
    /// Algorithm-specific parameters.
    pub parms: AlgorithmParms,
}

impl KeyParms {
    /// RSA parameters with the given schemes.
    pub fn rsa(key_length: u32, enc_scheme: EncScheme, sig_scheme: SigScheme) -> Self {
        Self {
            algorithm_id: AlgorithmId::Rsa as u32,
            enc_scheme,
            sig_scheme,
            parms: AlgorithmParms::Rsa(RsaKeyParms::new(key_length)),
        }
    }

    /// The RSA parameters, if this is an RSA key.
    pub fn rsa_parms(&self) -> Option<&RsaKeyParms> {
        match &self.parms {
            AlgorithmParms::Rsa(rsa) => Some(rsa),
            AlgorithmParms::Opaque(_) => None,
        }
    }

    /// Validate the parameters for a key of `usage`.
    ///
    /// `modulus_len`, when nonzero, is the length in bytes of the key's
    /// public modulus and must agree with the declared key length.
    pub fn check_properties(&self, usage: KeyUsage, modulus_len: usize) -> Result<(), TpmError> {
        let rsa = self
            .rsa_parms()
            .ok_or(TpmError::BadKeyProperty("only RSA keys are supported"))?;
        if modulus_len != 0 && rsa.key_length as usize != modulus_len * 8 {
            return Err(TpmError::BadKeyProperty(
                "key length does not match the public key",
            ));
        }
        if rsa.key_length > TPM_RSA_KEY_LENGTH_MAX {
            return Err(TpmError::BadKeyProperty("key length too large"));
        }
        if rsa.num_primes != 2 {
            return Err(TpmError::BadKeyProperty("only two-prime keys are supported"));
        }

        let enc = self.enc_scheme;
        let sig = self.sig_scheme;
        let oaep_or_pkcs = matches!(enc, EncScheme::RsaEsOaepSha1Mgf1 | EncScheme::RsaEsPkcsV15);
        let (schemes_ok, min_bits, default_exponent) = match usage {
            KeyUsage::Signing => (
                enc == EncScheme::None
                    && matches!(
                        sig,
                        SigScheme::RsaSsaPkcsV15Sha1
                            | SigScheme::RsaSsaPkcsV15Der
                            | SigScheme::RsaSsaPkcsV15Info
                    ),
                0,
                false,
            ),
            KeyUsage::Storage | KeyUsage::Migrate => (
                enc == EncScheme::RsaEsOaepSha1Mgf1 && sig == SigScheme::None,
                2048,
                true,
            ),
            KeyUsage::Identity => (
                enc == EncScheme::None && sig == SigScheme::RsaSsaPkcsV15Sha1,
                2048,
                true,
            ),
            KeyUsage::AuthChange => (
                enc == EncScheme::RsaEsOaepSha1Mgf1 && sig == SigScheme::None,
                512,
                false,
            ),
            KeyUsage::Bind => (oaep_or_pkcs && sig == SigScheme::None, 0, false),
            KeyUsage::Legacy => (
                oaep_or_pkcs
                    && matches!(
                        sig,
                        SigScheme::RsaSsaPkcsV15Sha1 | SigScheme::RsaSsaPkcsV15Der
                    ),
                0,
                false,
            ),
        };
        if !schemes_ok {
            return Err(TpmError::BadKeyProperty(
                "schemes not permitted for key usage",
            ));
        }
        if rsa.key_length < min_bits {
            return Err(TpmError::BadKeyProperty("key length too small for key usage"));
        }
        if default_exponent && !rsa.has_default_exponent() {
            return Err(TpmError::BadKeyProperty(
                "key usage requires the default exponent",
            ));
        }
        Ok(())
    }
}

impl Store for KeyParms {
    fn store(&self, buf: &mut StoreBuffer) {
        buf.append_u32(self.algorithm_id);
        buf.append_u16(self.enc_scheme as u16);
        buf.append_u16(self.sig_scheme as u16);
        match &self.parms {
            AlgorithmParms::Rsa(rsa) => buf.append_sized_with(|buf| buf.append(rsa)),
            AlgorithmParms::Opaque(raw) => buf.append_sized(raw),
        }
    }
}

impl Load for KeyParms {
    type Error = TpmError;

    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, TpmError> {
        let algorithm_id = cursor.load_u32()?;
        let enc_scheme = EncScheme::from_u16(cursor.load_u16()?)
            .ok_or(TpmError::BadKeyProperty("unknown encryption scheme"))?;
        let sig_scheme = SigScheme::from_u16(cursor.load_u16()?)
            .ok_or(TpmError::BadKeyProperty("unknown signature scheme"))?;
        let raw = cursor.load_sized()?;
        let parms = match AlgorithmId::from_u32(algorithm_id) {
            Some(AlgorithmId::Rsa) => AlgorithmParms::Rsa(RsaKeyParms::from_bytes(raw)?),
            _ => AlgorithmParms::Opaque(raw.to_vec()),
        };
        Ok(Self {
            algorithm_id,
            enc_scheme,
            sig_scheme,
            parms,
        })
    }
}
