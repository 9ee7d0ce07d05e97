//! The encrypted record store.
//!
//! The whole record set is one snapshot: every successful mutation serialises
//! all records, encrypts them under a fresh salt and nonce, and replaces the
//! file. Mutations are all-or-nothing; if the write fails the in-memory change
//! is undone before the error is returned.
//!
//! Single process, single writer. Two processes sharing a file race with
//! last-writer-wins semantics. No internal locking; callers on several
//! threads must serialise access themselves (all mutators take `&mut self`).

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::StoreConfig;
use crate::crypto::aad::{self, Algorithm};
use crate::crypto::{self, Backend, CipherProvider, SecurityLevel};
use crate::envelope::{self, Envelope, Layout};
use crate::error::StoreError;
use crate::query::Query;
use crate::record::{NewRecord, Record, RecordPatch};

pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Deserialize)]
struct Snapshot {
    version: u32,
    #[allow(dead_code)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    records: BTreeMap<String, Record>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    records: &'a BTreeMap<String, Record>,
}

struct Session {
    path: PathBuf,
    password: Zeroizing<String>,
    records: BTreeMap<String, Record>,
    /// In-memory state differs from the file, or the file needs re-sealing.
    dirty: bool,
}

pub struct RecordStore {
    config: StoreConfig,
    cipher: Box<dyn CipherProvider>,
    session: Option<Session>,
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("backend", &self.cipher.backend())
            .field("path", &self.session.as_ref().map(|s| &s.path))
            .field("records", &self.session.as_ref().map(|s| s.records.len()))
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl RecordStore {
    /// An uninitialized store using the process-wide cipher backend.
    pub fn new(config: StoreConfig) -> Self {
        let cipher = crypto::default_provider(config.kdf);
        Self::with_cipher(config, cipher)
    }

    pub fn with_cipher(config: StoreConfig, cipher: Box<dyn CipherProvider>) -> Self {
        Self {
            config,
            cipher,
            session: None,
        }
    }

    /// `new` followed by `initialize` at `config.path`.
    pub fn open(password: &str, config: StoreConfig) -> Result<Self, StoreError> {
        let mut store = Self::new(config);
        store.initialize(password, None)?;
        Ok(store)
    }

    /// Load the store at `path` (or the configured path), or start empty if the
    /// file does not exist. A file that exists but cannot be decoded, decrypted
    /// or parsed is an error; the store never silently starts empty over it.
    pub fn initialize(&mut self, password: &str, path: Option<&Path>) -> Result<(), StoreError> {
        if self.session.is_some() {
            self.close()?;
        }
        if password.is_empty() {
            return Err(StoreError::Validation("password must not be empty".into()));
        }
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.path.clone());

        let (records, dirty) =
            self.load(&path, password)
                .map_err(|source| StoreError::Initialization {
                    path: path.clone(),
                    source: Box::new(source),
                })?;

        if self.cipher.backend().is_degraded() {
            warn!(
                path = %path.display(),
                "store opened with the DEGRADED fallback cipher; password guessing is cheap"
            );
        }
        info!(path = %path.display(), records = records.len(), "store initialized");
        self.session = Some(Session {
            path,
            password: Zeroizing::new(password.to_string()),
            records,
            dirty,
        });
        Ok(())
    }

    fn load(
        &self,
        path: &Path,
        password: &str,
    ) -> Result<(BTreeMap<String, Record>, bool), StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no store file; starting empty");
                return Ok((BTreeMap::new(), false));
            }
            Err(e) => return Err(StoreError::Persistence(e)),
        };
        if bytes.is_empty() {
            return Ok((BTreeMap::new(), false));
        }

        let envelope = envelope::decode(&bytes)?;
        let plaintext = self.cipher.decrypt(&envelope, password.as_bytes())?;
        let mut snapshot: Snapshot = serde_json::from_slice(&plaintext)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedSnapshotVersion(snapshot.version));
        }
        for (id, record) in snapshot.records.iter_mut() {
            if *id != record.id {
                return Err(StoreError::Validation(format!(
                    "snapshot key {id} does not match record id {}",
                    record.id
                )));
            }
            record.normalize().map_err(|err| match err {
                StoreError::Validation(msg) => {
                    StoreError::Validation(format!("stored record {id}: {msg}"))
                }
                other => other,
            })?;
        }

        let reseal = match sealed_by(&envelope) {
            Some(backend) => backend != self.cipher.backend(),
            None => true,
        };
        if reseal {
            info!(
                layout = ?envelope.layout(),
                "store will be re-sealed with the active backend on next save"
            );
        }
        Ok((snapshot.records, reseal))
    }

    pub fn add(&mut self, fields: NewRecord) -> Result<String, StoreError> {
        let (cipher, session) = self.parts()?;
        let id = fresh_id(&session.records);
        let record = fields.into_record(id.clone(), Utc::now())?;
        session.records.insert(id.clone(), record);
        if let Err(err) = save(cipher, session) {
            session.records.remove(&id);
            return Err(err);
        }
        debug!(id = %id, "record added");
        Ok(id)
    }

    /// Overlay `patch` onto record `id`. `id` and `created_at` never change.
    pub fn update(&mut self, id: &str, patch: RecordPatch) -> Result<(), StoreError> {
        let (cipher, session) = self.parts()?;
        let current = session
            .records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let candidate = current.patched(patch)?;
        let previous = session.records.insert(id.to_string(), candidate);
        if let Err(err) = save(cipher, session) {
            if let Some(previous) = previous {
                session.records.insert(id.to_string(), previous);
            }
            return Err(err);
        }
        debug!(id = %id, "record updated");
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        let (cipher, session) = self.parts()?;
        let removed = session
            .records
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Err(err) = save(cipher, session) {
            session.records.insert(id.to_string(), removed);
            return Err(err);
        }
        debug!(id = %id, "record deleted");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<&Record>, StoreError> {
        Ok(self.session()?.records.get(id))
    }

    pub fn get_all(&self) -> Result<&BTreeMap<String, Record>, StoreError> {
        Ok(&self.session()?.records)
    }

    pub fn query(&self) -> Result<Query<'_>, StoreError> {
        Ok(Query::new(&self.session()?.records).with_horizon(self.config.expiry_horizon()))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.session()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.session()?.records.is_empty())
    }

    /// Write the current snapshot even if nothing changed since the last save.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let (cipher, session) = self.parts()?;
        save(cipher, session)
    }

    /// Write any unsaved state, then drop the records and the password.
    /// If the final write fails the store stays open so the caller can retry.
    pub fn close(&mut self) -> Result<(), StoreError> {
        let (cipher, session) = self.parts()?;
        if session.dirty {
            save(cipher, session)?;
        }
        if let Some(session) = self.session.take() {
            info!(path = %session.path.display(), "store closed");
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path.as_path())
    }

    pub fn backend(&self) -> Backend {
        self.cipher.backend()
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.cipher.backend().security_level()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn session(&self) -> Result<&Session, StoreError> {
        self.session.as_ref().ok_or(StoreError::NotInitialized)
    }

    fn parts(&mut self) -> Result<(&dyn CipherProvider, &mut Session), StoreError> {
        let session = self.session.as_mut().ok_or(StoreError::NotInitialized)?;
        Ok((self.cipher.as_ref(), session))
    }
}

fn save(cipher: &dyn CipherProvider, session: &mut Session) -> Result<(), StoreError> {
    let snapshot = SnapshotRef {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        records: &session.records,
    };
    let plaintext = Zeroizing::new(serde_json::to_vec(&snapshot)?);
    let sealed = cipher.encrypt(&plaintext, session.password.as_bytes())?;
    let bytes = envelope::encode(&sealed)?;
    write_replacing(&session.path, &bytes).map_err(StoreError::Persistence)?;
    session.dirty = false;
    info!(
        path = %session.path.display(),
        records = session.records.len(),
        "store saved"
    );
    Ok(())
}

/// Write to `<file>.tmp` and rename over `path`, so a failed write leaves the
/// previous snapshot in place.
fn write_replacing(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let staging = staging_path(path);
    let result = File::create(&staging)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&staging, path));
    if result.is_err() && staging.is_file() {
        let _ = fs::remove_file(&staging);
    }
    result
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn sealed_by(envelope: &Envelope) -> Option<Backend> {
    if envelope.layout() == Layout::Legacy {
        return None;
    }
    match aad::parse(envelope.aad()).ok()?.algorithm {
        Algorithm::Argon2idXChaCha20Poly1305 => Some(Backend::Primary),
        Algorithm::Sha256IterXChaCha20HmacSha256 => Some(Backend::Fallback),
    }
}

fn fresh_id(records: &BTreeMap<String, Record>) -> String {
    loop {
        let id = Uuid::now_v7().to_string();
        if !records.contains_key(&id) {
            return id;
        }
    }
}
