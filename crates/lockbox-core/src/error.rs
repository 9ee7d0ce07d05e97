use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::crypto::CryptoError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store is not initialized; call initialize first")]
    NotInitialized,

    #[error("authentication failed (wrong password or corrupted store)")]
    AuthenticationFailure,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("failed to persist store: {0}")]
    Persistence(#[source] io::Error),

    #[error("failed to initialize store at {}: {source}", .path.display())]
    Initialization {
        path: PathBuf,
        #[source]
        source: Box<StoreError>,
    },

    #[error("snapshot serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot version {0} is newer than this build supports")]
    UnsupportedSnapshotVersion(u32),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

impl StoreError {
    /// The underlying failure, looking through `Initialization`.
    pub fn root_cause(&self) -> &StoreError {
        match self {
            StoreError::Initialization { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_authentication_failure(&self) -> bool {
        matches!(self.root_cause(), StoreError::AuthenticationFailure)
    }
}

impl From<CryptoError> for StoreError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication => StoreError::AuthenticationFailure,
            CryptoError::MalformedEnvelope(msg) => StoreError::MalformedEnvelope(msg),
            other => StoreError::Crypto(other),
        }
    }
}
