//! lockbox-core: password-encrypted local store for credential records.
//!
//! # Layers
//! - `crypto`: cipher providers (Argon2id + XChaCha20-Poly1305, or the
//!   degraded iterated-SHA-256 fallback), selected once per process.
//! - `envelope`: versioned / legacy binary layouts on disk.
//! - `store`: `RecordStore`: load, atomic CRUD, whole-snapshot persistence.
//! - `query`: read-only search, filters and stats over a snapshot.

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod paths;
pub mod query;
pub mod record;
pub mod store;

pub use config::{StoreConfig, DEFAULT_STORE_FILE};
pub use crypto::{Backend, CipherProvider, CryptoError, KdfParams, SecurityLevel};
pub use error::StoreError;
pub use query::{ListOptions, Query, StoreStats};
pub use record::{NewRecord, Record, RecordKind, RecordPatch, SecretValue};
pub use store::RecordStore;
