//! Password-based authenticated encryption for store snapshots.
//!
//! Two interchangeable backends implement [`CipherProvider`]:
//! - `primary`: Argon2id key derivation, XChaCha20-Poly1305 AEAD.
//! - `fallback`: iterated SHA-256 key derivation, XChaCha20 + HMAC-SHA256.
//!   Weaker against offline guessing; selecting it is always reported.
//!
//! The backend is chosen once per process by [`selected_backend`]. Decryption
//! dispatches on the algorithm recorded in the envelope's AAD, so a store sealed
//! by one backend can still be opened when the other is active (as long as the
//! primary is compiled in for primary envelopes).

pub mod aad;
pub mod fallback;
pub mod kdf;
pub mod primary;

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use zeroize::Zeroizing;

use crate::envelope::{Envelope, VersionedEnvelope};
pub use kdf::{KdfParams, SALT_LEN};

pub const KEY_LEN: usize = 32;

/// Derived 256-bit key, wiped on drop.
pub type DerivedKey = Zeroizing<[u8; KEY_LEN]>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Tag mismatch: wrong password, or ciphertext/AAD were modified.
    #[error("authentication failed (wrong password or corrupted data)")]
    Authentication,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid cipher parameters: {0}")]
    InvalidParameters(String),

    #[error("unsupported envelope algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("{0} cipher backend is not available in this build")]
    BackendUnavailable(Backend),

    #[error("encryption failed")]
    Encryption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Standard,
    /// The fallback KDF is in use; passwords are far cheaper to brute force.
    Degraded,
}

impl Backend {
    pub fn is_degraded(self) -> bool {
        matches!(self, Backend::Fallback)
    }

    pub fn security_level(self) -> SecurityLevel {
        if self.is_degraded() {
            SecurityLevel::Degraded
        } else {
            SecurityLevel::Standard
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Primary => f.write_str("primary"),
            Backend::Fallback => f.write_str("fallback"),
        }
    }
}

/// Authenticated encryption keyed by a password.
///
/// `encrypt` draws a fresh salt and nonce on every call, so a key/nonce pair is
/// never reused across snapshots.
pub trait CipherProvider: Send + Sync {
    fn backend(&self) -> Backend;

    fn params(&self) -> &KdfParams;

    fn derive_key(&self, password: &[u8], salt: &[u8; SALT_LEN]) -> Result<DerivedKey, CryptoError>;

    fn encrypt(&self, plaintext: &[u8], password: &[u8]) -> Result<VersionedEnvelope, CryptoError>;

    fn decrypt(&self, envelope: &Envelope, password: &[u8])
        -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}

static SELECTED_BACKEND: OnceLock<Backend> = OnceLock::new();

/// Process-wide backend choice. Probed on first call, cached afterwards.
pub fn selected_backend() -> Backend {
    *SELECTED_BACKEND.get_or_init(detect_backend)
}

fn detect_backend() -> Backend {
    match primary::self_test() {
        Ok(()) => Backend::Primary,
        Err(err) => {
            warn!(
                error = %err,
                "primary cipher backend unavailable; using DEGRADED fallback key derivation"
            );
            Backend::Fallback
        }
    }
}

pub fn provider(backend: Backend, params: KdfParams) -> Box<dyn CipherProvider> {
    match backend {
        Backend::Primary => Box::new(primary::PrimaryCipher::new(params)),
        Backend::Fallback => Box::new(fallback::FallbackCipher::new(params)),
    }
}

/// Provider for the process-wide backend.
pub fn default_provider(params: KdfParams) -> Box<dyn CipherProvider> {
    provider(selected_backend(), params)
}
