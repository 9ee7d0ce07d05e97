//! Argon2id + XChaCha20-Poly1305.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use zeroize::Zeroizing;

use super::aad::{self, Algorithm};
use super::fallback::FallbackCipher;
use super::kdf::{self, KdfParams, SALT_LEN};
use super::{Backend, CipherProvider, CryptoError, DerivedKey};
use crate::envelope::{Envelope, VersionedEnvelope, NONCE_LEN};

#[derive(Debug, Clone)]
pub struct PrimaryCipher {
    params: KdfParams,
}

impl PrimaryCipher {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }
}

impl CipherProvider for PrimaryCipher {
    fn backend(&self) -> Backend {
        Backend::Primary
    }

    fn params(&self) -> &KdfParams {
        &self.params
    }

    fn derive_key(&self, password: &[u8], salt: &[u8; SALT_LEN]) -> Result<DerivedKey, CryptoError> {
        kdf::argon2id(password, salt, &self.params)
    }

    fn encrypt(&self, plaintext: &[u8], password: &[u8]) -> Result<VersionedEnvelope, CryptoError> {
        self.params.validate()?;
        let salt = kdf::generate_salt();
        let key = self.derive_key(password, &salt)?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let aad = aad::build(Algorithm::Argon2idXChaCha20Poly1305, &self.params);
        let ciphertext = seal(&key, &nonce, &aad, plaintext)?;
        Ok(VersionedEnvelope {
            salt,
            nonce,
            aad,
            ciphertext,
        })
    }

    fn decrypt(
        &self,
        envelope: &Envelope,
        password: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let env = match envelope {
            Envelope::Versioned(env) => env,
            Envelope::Legacy(_) => return FallbackCipher::new(self.params).decrypt(envelope, password),
        };
        let info = aad::parse(&env.aad)?;
        match info.algorithm {
            Algorithm::Argon2idXChaCha20Poly1305 => {
                self.params.check_envelope_cost(&info.params)?;
                let key = kdf::argon2id(password, &env.salt, &info.params)?;
                open(&key, &env.nonce, &env.aad, &env.ciphertext)
            }
            Algorithm::Sha256IterXChaCha20HmacSha256 => {
                FallbackCipher::new(self.params).decrypt(envelope, password)
            }
        }
    }
}

pub(crate) fn seal(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::Encryption)?;
    cipher
        .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Encryption)
}

pub(crate) fn open(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::Authentication)?;
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::Authentication)?;
    Ok(Zeroizing::new(plaintext))
}

/// Availability check used by backend selection: one minimal-cost derivation.
pub(crate) fn self_test() -> Result<(), CryptoError> {
    let key = kdf::argon2id(b"lockbox-self-test", &[0u8; SALT_LEN], &KdfParams::fast_insecure())?;
    if key.iter().all(|&b| b == 0) {
        return Err(CryptoError::KeyDerivation("argon2 self-test produced a zero key".into()));
    }
    Ok(())
}
