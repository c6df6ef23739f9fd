// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The crypto provider seam.
//!
//! Key custody and delegation never touch a primitive directly; every digest,
//! HMAC, RSA and symmetric operation goes through [`CryptoProvider`].
//! [`SoftwareCrypto`] implements it over the RustCrypto crates.

use crate::secret::SymmetricKey;
use aes::Aes128;
use cipher::AsyncStreamCipher;
use cipher::KeyIvInit;
use hmac::Hmac;
use hmac::Mac;
use rsa::BigUint;
use rsa::Oaep;
use rsa::RsaPrivateKey;
use rsa::RsaPublicKey;
use rsa::traits::PrivateKeyParts;
use rsa::traits::PublicKeyParts;
use sha1::Digest as _;
use sha1::Sha1;
use thiserror::Error;
use tpm12_protocol::Digest;
use zeroize::Zeroizing;

/// OAEP encoding parameter TPM 1.2 uses for every wrapped payload.
pub const OAEP_LABEL: &str = "TCPA";

/// Length of the random IV prepended to a symmetric envelope.
pub const SYM_IV_SIZE: usize = 16;

/// Errors reported by a [`CryptoProvider`].
#[derive(Debug, Error)]
pub enum CryptoError {
    /// An RSA operation failed.
    #[error("rsa operation failed")]
    Rsa(#[source] rsa::Error),
    /// A symmetric or MAC key has the wrong length.
    #[error("invalid key length {0}")]
    InvalidKeyLength(usize),
    /// A symmetric envelope is too short to hold its IV.
    #[error("ciphertext of {0} bytes is shorter than its iv")]
    CiphertextTooShort(usize),
    /// The stored prime does not divide the modulus.
    #[error("prime does not divide the modulus")]
    PrimeMismatch,
    /// The generated key did not expose both primes.
    #[error("generated key has {0} primes")]
    PrimeCount(usize),
    /// The system random number generator failed.
    #[error("random number generation failed: {0}")]
    Random(getrandom::Error),
}

/// A freshly generated RSA key pair, big-endian components.
#[derive(Clone)]
pub struct RsaKeyPair {
    /// Public modulus.
    pub modulus: Vec<u8>,
    /// Public exponent.
    pub exponent: Vec<u8>,
    /// First prime. This is the only private value a wrapped key stores.
    pub p: Zeroizing<Vec<u8>>,
    /// Second prime.
    pub q: Zeroizing<Vec<u8>>,
    /// Private exponent.
    pub d: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("modulus_len", &self.modulus.len())
            .finish_non_exhaustive()
    }
}

/// Private values re-derived from a modulus and its first prime.
pub struct DerivedPrivate {
    /// Second prime, `n / p`.
    pub q: Zeroizing<Vec<u8>>,
    /// Private exponent.
    pub d: Zeroizing<Vec<u8>>,
}

/// Borrowed view of a complete RSA private key.
#[derive(Clone, Copy)]
pub struct RsaPrivateParts<'a> {
    /// Public modulus.
    pub modulus: &'a [u8],
    /// Public exponent.
    pub exponent: &'a [u8],
    /// First prime.
    pub p: &'a [u8],
    /// Second prime.
    pub q: &'a [u8],
    /// Private exponent.
    pub d: &'a [u8],
}

/// Cryptographic primitives consumed by the key and delegation code.
pub trait CryptoProvider: Send + Sync {
    /// SHA-1 of `data`.
    fn sha1(&self, data: &[u8]) -> Digest;

    /// HMAC-SHA-1 of `data` under `key`.
    fn hmac_sha1(&self, key: &[u8], data: &[u8]) -> Result<Digest, CryptoError>;

    /// RSAES-OAEP (SHA-1, MGF1, label [`OAEP_LABEL`]) encryption.
    fn rsa_encrypt(
        &self,
        modulus: &[u8],
        exponent: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// RSAES-OAEP (SHA-1, MGF1, label [`OAEP_LABEL`]) decryption.
    fn rsa_decrypt(
        &self,
        key: RsaPrivateParts<'_>,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Encrypt `plaintext` under the delegate key.
    fn sym_encrypt(&self, key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt an envelope produced by [`CryptoProvider::sym_encrypt`].
    fn sym_decrypt(
        &self,
        key: &SymmetricKey,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Generate an RSA key pair with a `bits`-bit modulus.
    fn generate_rsa_keypair(&self, bits: u32, exponent: &[u8]) -> Result<RsaKeyPair, CryptoError>;

    /// Recover `q` and `d` from the modulus, exponent and first prime.
    fn derive_rsa_private(
        &self,
        modulus: &[u8],
        exponent: &[u8],
        p: &[u8],
    ) -> Result<DerivedPrivate, CryptoError>;

    /// Fill `buf` with random bytes.
    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), CryptoError>;
}

/// [`CryptoProvider`] backed by the RustCrypto crates and the system RNG.
///
/// The symmetric envelope is AES-128-CFB with a random IV prepended.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareCrypto;

fn to_digest(bytes: &[u8]) -> Digest {
    let mut out = Digest::default();
    out.copy_from_slice(bytes);
    out
}

impl CryptoProvider for SoftwareCrypto {
    fn sha1(&self, data: &[u8]) -> Digest {
        to_digest(&Sha1::digest(data))
    }

    fn hmac_sha1(&self, key: &[u8], data: &[u8]) -> Result<Digest, CryptoError> {
        let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        mac.update(data);
        Ok(to_digest(&mac.finalize().into_bytes()))
    }

    fn rsa_encrypt(
        &self,
        modulus: &[u8],
        exponent: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let public = RsaPublicKey::new(
            BigUint::from_bytes_be(modulus),
            BigUint::from_bytes_be(exponent),
        )
        .map_err(CryptoError::Rsa)?;
        public
            .encrypt(
                &mut rand::thread_rng(),
                Oaep::new_with_label::<Sha1, _>(OAEP_LABEL),
                plaintext,
            )
            .map_err(CryptoError::Rsa)
    }

    fn rsa_decrypt(
        &self,
        key: RsaPrivateParts<'_>,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let private = RsaPrivateKey::from_components(
            BigUint::from_bytes_be(key.modulus),
            BigUint::from_bytes_be(key.exponent),
            BigUint::from_bytes_be(key.d),
            vec![BigUint::from_bytes_be(key.p), BigUint::from_bytes_be(key.q)],
        )
        .map_err(CryptoError::Rsa)?;
        let plaintext = private
            .decrypt(Oaep::new_with_label::<Sha1, _>(OAEP_LABEL), ciphertext)
            .map_err(CryptoError::Rsa)?;
        Ok(Zeroizing::new(plaintext))
    }

    fn sym_encrypt(&self, key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut iv = [0; SYM_IV_SIZE];
        self.random_bytes(&mut iv)?;

        let mut envelope = Vec::with_capacity(SYM_IV_SIZE + plaintext.len());
        envelope.extend_from_slice(&iv);
        envelope.extend_from_slice(plaintext);
        cfb_mode::Encryptor::<Aes128>::new_from_slices(key.as_bytes(), &iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.as_bytes().len()))?
            .encrypt(&mut envelope[SYM_IV_SIZE..]);
        Ok(envelope)
    }

    fn sym_decrypt(
        &self,
        key: &SymmetricKey,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if ciphertext.len() < SYM_IV_SIZE {
            return Err(CryptoError::CiphertextTooShort(ciphertext.len()));
        }
        let (iv, body) = ciphertext.split_at(SYM_IV_SIZE);
        let mut plaintext = Zeroizing::new(body.to_vec());
        cfb_mode::Decryptor::<Aes128>::new_from_slices(key.as_bytes(), iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.as_bytes().len()))?
            .decrypt(&mut plaintext);
        Ok(plaintext)
    }

    fn generate_rsa_keypair(&self, bits: u32, exponent: &[u8]) -> Result<RsaKeyPair, CryptoError> {
        let private = RsaPrivateKey::new_with_exp(
            &mut rand::thread_rng(),
            bits as usize,
            &BigUint::from_bytes_be(exponent),
        )
        .map_err(CryptoError::Rsa)?;
        let primes = private.primes();
        let [p, q] = primes else {
            return Err(CryptoError::PrimeCount(primes.len()));
        };
        Ok(RsaKeyPair {
            modulus: private.n().to_bytes_be(),
            exponent: private.e().to_bytes_be(),
            p: Zeroizing::new(p.to_bytes_be()),
            q: Zeroizing::new(q.to_bytes_be()),
            d: Zeroizing::new(private.d().to_bytes_be()),
        })
    }

    fn derive_rsa_private(
        &self,
        modulus: &[u8],
        exponent: &[u8],
        p: &[u8],
    ) -> Result<DerivedPrivate, CryptoError> {
        let n = BigUint::from_bytes_be(modulus);
        let p = BigUint::from_bytes_be(p);
        let one = BigUint::from_bytes_be(&[1]);
        if p <= one || p >= n || &n % &p != BigUint::from_bytes_be(&[0]) {
            return Err(CryptoError::PrimeMismatch);
        }
        let q = &n / &p;
        let private = RsaPrivateKey::from_p_q(p, q.clone(), BigUint::from_bytes_be(exponent))
            .map_err(CryptoError::Rsa)?;
        Ok(DerivedPrivate {
            q: Zeroizing::new(q.to_bytes_be()),
            d: Zeroizing::new(private.d().to_bytes_be()),
        })
    }

    fn random_bytes(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        getrandom::fill(buf).map_err(CryptoError::Random)
    }
}
