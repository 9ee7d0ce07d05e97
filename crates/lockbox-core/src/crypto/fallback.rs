//! Degraded backend: iterated SHA-256 KDF, XChaCha20 stream, HMAC-SHA256 tag.
//!
//! Encrypt-then-MAC. HKDF-SHA256 splits the derived key into independent
//! encryption and MAC keys. The MAC covers `len(aad) || aad || nonce || ct`.
//!
//! Also opens legacy envelopes, which use the same KDF and MAC with the
//! 12-byte-nonce ChaCha20 and a detached tag.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, XChaCha20};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tracing::warn;
use zeroize::Zeroizing;

use super::aad::{self, Algorithm};
use super::kdf::{self, KdfParams, SALT_LEN};
use super::{Backend, CipherProvider, CryptoError, DerivedKey, KEY_LEN};
use crate::envelope::{Envelope, LegacyEnvelope, VersionedEnvelope, NONCE_LEN};

type HmacSha256 = Hmac<Sha256>;

const TAG_LEN: usize = 32;
const INFO_ENC: &[u8] = b"lockbox/fallback/enc";
const INFO_MAC: &[u8] = b"lockbox/fallback/mac";

#[derive(Debug, Clone)]
pub struct FallbackCipher {
    params: KdfParams,
}

impl FallbackCipher {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    fn open_versioned(
        &self,
        env: &VersionedEnvelope,
        password: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let info = aad::parse(&env.aad)?;
        if info.algorithm != Algorithm::Sha256IterXChaCha20HmacSha256 {
            return Err(CryptoError::BackendUnavailable(Backend::Primary));
        }
        self.params.check_envelope_cost(&info.params)?;
        if env.ciphertext.len() < TAG_LEN {
            return Err(CryptoError::Authentication);
        }
        let master = kdf::iterated_sha256(password, &env.salt, info.params.fallback_iterations)?;
        let keys = SplitKeys::from_master(&master)?;
        let (body, tag) = env.ciphertext.split_at(env.ciphertext.len() - TAG_LEN);
        keys.verify(&env.aad, &env.nonce, body, tag)?;

        let mut plaintext = Zeroizing::new(body.to_vec());
        let mut stream = XChaCha20::new_from_slices(keys.enc.as_ref(), &env.nonce)
            .map_err(|_| CryptoError::Authentication)?;
        stream.apply_keystream(plaintext.as_mut_slice());
        Ok(plaintext)
    }

    fn open_legacy(
        &self,
        env: &LegacyEnvelope,
        password: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        warn!("opening legacy-format envelope; it will be rewritten in the current format");
        let iterations =
            aad::legacy_iterations(&env.aad, self.params.envelope_ceiling().fallback_iterations);
        let master = kdf::iterated_sha256(password, &env.salt, iterations)?;
        let keys = SplitKeys::from_master(&master)?;
        keys.verify(&env.aad, &env.nonce, &env.ciphertext, &env.tag)?;

        let mut plaintext = Zeroizing::new(env.ciphertext.clone());
        let mut stream = ChaCha20::new_from_slices(keys.enc.as_ref(), &env.nonce)
            .map_err(|_| CryptoError::Authentication)?;
        stream.apply_keystream(plaintext.as_mut_slice());
        Ok(plaintext)
    }
}

impl CipherProvider for FallbackCipher {
    fn backend(&self) -> Backend {
        Backend::Fallback
    }

    fn params(&self) -> &KdfParams {
        &self.params
    }

    fn derive_key(&self, password: &[u8], salt: &[u8; SALT_LEN]) -> Result<DerivedKey, CryptoError> {
        kdf::iterated_sha256(password, salt, self.params.fallback_iterations)
    }

    fn encrypt(&self, plaintext: &[u8], password: &[u8]) -> Result<VersionedEnvelope, CryptoError> {
        self.params.validate()?;
        let salt = kdf::generate_salt();
        let master = self.derive_key(password, &salt)?;
        let keys = SplitKeys::from_master(&master)?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let aad = aad::build(Algorithm::Sha256IterXChaCha20HmacSha256, &self.params);

        let mut ciphertext = plaintext.to_vec();
        let mut stream = XChaCha20::new_from_slices(keys.enc.as_ref(), &nonce)
            .map_err(|_| CryptoError::Encryption)?;
        stream.apply_keystream(&mut ciphertext);
        let tag = keys.tag(&aad, &nonce, &ciphertext)?;
        ciphertext.extend_from_slice(&tag);

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
        match envelope {
            Envelope::Versioned(env) => self.open_versioned(env, password),
            Envelope::Legacy(env) => self.open_legacy(env, password),
        }
    }
}

struct SplitKeys {
    enc: Zeroizing<[u8; KEY_LEN]>,
    mac: Zeroizing<[u8; KEY_LEN]>,
}

impl SplitKeys {
    fn from_master(master: &DerivedKey) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, master.as_ref());
        let mut enc = Zeroizing::new([0u8; KEY_LEN]);
        let mut mac = Zeroizing::new([0u8; KEY_LEN]);
        hk.expand(INFO_ENC, enc.as_mut())
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        hk.expand(INFO_MAC, mac.as_mut())
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(Self { enc, mac })
    }

    fn mac(&self, aad: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<HmacSha256, CryptoError> {
        let mut mac = HmacSha256::new_from_slice(self.mac.as_ref())
            .map_err(|e| CryptoError::KeyDerivation(format!("mac init: {e}")))?;
        mac.update(&(aad.len() as u64).to_le_bytes());
        mac.update(aad);
        mac.update(nonce);
        mac.update(ciphertext);
        Ok(mac)
    }

    fn tag(&self, aad: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<[u8; TAG_LEN], CryptoError> {
        let mut out = [0u8; TAG_LEN];
        out.copy_from_slice(&self.mac(aad, nonce, ciphertext)?.finalize().into_bytes());
        Ok(out)
    }

    fn verify(&self, aad: &[u8], nonce: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
        self.mac(aad, nonce, ciphertext)?
            .verify_slice(tag)
            .map_err(|_| CryptoError::Authentication)
    }
}

/// Produces a legacy-layout envelope. Legacy is read-only in the store; this
/// exists to build fixtures for the migration path.
#[cfg(test)]
pub(crate) fn seal_legacy(
    plaintext: &[u8],
    password: &[u8],
    aad: &[u8],
    iterations: u32,
) -> LegacyEnvelope {
    use crate::envelope::{LEGACY_NONCE_LEN, LEGACY_TAG_LEN};

    let salt = kdf::generate_salt();
    let mut nonce = [0u8; LEGACY_NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let master = kdf::iterated_sha256(password, &salt, iterations).unwrap();
    let keys = SplitKeys::from_master(&master).unwrap();
    let mut ciphertext = plaintext.to_vec();
    ChaCha20::new_from_slices(keys.enc.as_ref(), &nonce)
        .unwrap()
        .apply_keystream(&mut ciphertext);
    let tag: [u8; LEGACY_TAG_LEN] = keys.tag(aad, &nonce, &ciphertext).unwrap();
    LegacyEnvelope {
        salt,
        nonce,
        aad: aad.to_vec(),
        tag,
        ciphertext,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{self, Layout};

    fn cipher() -> FallbackCipher {
        FallbackCipher::new(KdfParams::fast_insecure())
    }

    #[test]
    fn roundtrip_appends_32_byte_tag() {
        let c = cipher();
        let env = c.encrypt(b"payload", b"pw").unwrap();
        assert_eq!(env.ciphertext.len(), b"payload".len() + TAG_LEN);
        assert_eq!(c.decrypt(&env.into(), b"pw").unwrap().as_slice(), b"payload");
    }

    #[test]
    fn wrong_password_and_tampering_fail_authentication() {
        let c = cipher();
        let env = c.encrypt(b"payload", b"pw").unwrap();
        assert!(matches!(
            c.decrypt(&env.clone().into(), b"other"),
            Err(CryptoError::Authentication)
        ));
        let mut bad = env;
        let last = bad.ciphertext.len() - 1;
        bad.ciphertext[last] ^= 0x01;
        assert!(matches!(c.decrypt(&bad.into(), b"pw"), Err(CryptoError::Authentication)));
    }

    #[test]
    fn short_ciphertext_fails_authentication() {
        let c = cipher();
        let mut env = c.encrypt(b"x", b"pw").unwrap();
        env.ciphertext.truncate(TAG_LEN - 1);
        assert!(matches!(c.decrypt(&env.into(), b"pw"), Err(CryptoError::Authentication)));
    }

    #[test]
    fn legacy_envelope_decodes_and_decrypts() {
        let legacy = seal_legacy(b"old snapshot", b"pw", b"legacy-vault", 1000);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&legacy.salt);
        bytes.extend_from_slice(&legacy.nonce);
        bytes.extend_from_slice(&(legacy.aad.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&legacy.aad);
        bytes.extend_from_slice(&legacy.tag);
        bytes.extend_from_slice(&legacy.ciphertext);

        let decoded = envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.layout(), Layout::Legacy);
        assert_eq!(cipher().decrypt(&decoded, b"pw").unwrap().as_slice(), b"old snapshot");
        assert!(matches!(cipher().decrypt(&decoded, b"nope"), Err(CryptoError::Authentication)));
    }

    #[test]
    fn legacy_honours_iterations_in_aad() {
        let legacy = seal_legacy(b"tuned", b"pw", b"legacy;i=25", 25);
        let plain = cipher().decrypt(&Envelope::Legacy(legacy), b"pw").unwrap();
        assert_eq!(plain.as_slice(), b"tuned");
    }

    #[test]
    fn inflated_iteration_count_rejected_before_derivation() {
        let c = cipher();
        let mut env = c.encrypt(b"payload", b"pw").unwrap();
        let text = String::from_utf8(env.aad.clone()).unwrap().replace(";i=10", ";i=5000000");
        env.aad = text.into_bytes();
        assert!(matches!(
            c.decrypt(&env.into(), b"pw"),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn refuses_primary_envelopes() {
        let aad = aad::build(Algorithm::Argon2idXChaCha20Poly1305, &KdfParams::fast_insecure());
        let env = VersionedEnvelope {
            salt: [0u8; SALT_LEN],
            nonce: [0u8; NONCE_LEN],
            aad,
            ciphertext: vec![0u8; 48],
        };
        assert!(matches!(
            cipher().decrypt(&env.into(), b"pw"),
            Err(CryptoError::BackendUnavailable(Backend::Primary))
        ));
    }
}
