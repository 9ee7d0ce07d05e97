use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use lockbox_core::paths::default_store_path;
use lockbox_core::{
    ListOptions, NewRecord, Record, RecordKind, RecordPatch, RecordStore, SecurityLevel,
    StoreConfig,
};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const PASSWORD_ENV: &str = "LOCKBOX_PASSWORD";
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Parser, Debug)]
#[command(name = "lockbox", author, version)]
#[command(about = "Encrypted local store for API keys, license keys, tokens and certificates", long_about = None)]
struct Cli {
    /// Store file (defaults to the per-user data directory)
    #[arg(long, global = true, env = "LOCKBOX_STORE")]
    store: Option<PathBuf>,

    /// JSON file with store settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new, empty store
    Init,

    /// Add a record and print its id
    Add {
        name: String,
        /// api_key, license_key, token or certificate
        #[arg(long)]
        kind: String,
        #[arg(long)]
        secret: String,
        #[arg(long, default_value = "")]
        description: String,
        /// RFC 3339 timestamp or YYYY-MM-DD
        #[arg(long)]
        expires: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// key=value, repeatable
        #[arg(long = "meta")]
        meta: Vec<String>,
    },

    /// Show one record
    Get {
        id: String,
        #[arg(long)]
        reveal: bool,
    },

    /// List records, newest first
    List {
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        reveal: bool,
    },

    /// Case-insensitive text search
    Search {
        query: String,
        #[arg(long)]
        reveal: bool,
    },

    /// Change fields of a record
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        secret: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, conflicts_with = "clear_expiry")]
        expires: Option<String>,
        #[arg(long)]
        clear_expiry: bool,
        /// Replaces all tags when given
        #[arg(long = "tag", conflicts_with = "clear_tags")]
        tags: Vec<String>,
        #[arg(long)]
        clear_tags: bool,
        /// Merged into existing metadata
        #[arg(long = "meta")]
        meta: Vec<String>,
    },

    /// Remove a record
    Delete { id: String },

    /// Counts by kind, tag and expiry
    Stats,
}

/// What gets printed for a record. The secret is masked unless revealed.
#[derive(Serialize)]
struct RecordView<'a> {
    id: &'a str,
    name: &'a str,
    kind: RecordKind,
    secret_value: String,
    description: &'a str,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    expired: bool,
    tags: &'a [String],
    metadata: &'a BTreeMap<String, String>,
}

impl<'a> RecordView<'a> {
    fn new(record: &'a Record, reveal: bool) -> Self {
        let secret_value = if reveal {
            record.secret_value.expose().to_string()
        } else {
            record.secret_value.masked()
        };
        Self {
            id: &record.id,
            name: &record.name,
            kind: record.kind,
            secret_value,
            description: &record.description,
            created_at: record.created_at,
            expires_at: record.expires_at,
            expired: record.is_expired(Utc::now()),
            tags: &record.tags,
            metadata: &record.metadata,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.store)?;
    debug!(path = %config.path.display(), "using store");

    match cli.command {
        Commands::Init => init_command(config),
        Commands::Add {
            name,
            kind,
            secret,
            description,
            expires,
            tags,
            meta,
        } => {
            let mut fields = NewRecord::new(name, kind, secret).description(description);
            if let Some(expires) = expires {
                fields = fields.expires_at(parse_expiry(&expires)?);
            }
            fields.tags = tags;
            for entry in &meta {
                let (key, value) = parse_meta(entry)?;
                fields = fields.meta(key, value);
            }
            let mut store = open_store(config)?;
            let id = store.add(fields)?;
            store.close()?;
            println!("{id}");
            Ok(())
        }
        Commands::Get { id, reveal } => {
            let mut store = open_store(config)?;
            let record = store
                .get(&id)?
                .ok_or_else(|| anyhow!("record {id} not found"))?;
            print_json(&RecordView::new(record, reveal))?;
            store.close()?;
            Ok(())
        }
        Commands::List {
            kind,
            tag,
            limit,
            reveal,
        } => {
            if let Some(kind) = kind.as_deref() {
                kind.parse::<RecordKind>()?;
            }
            let mut store = open_store(config)?;
            let options = ListOptions { kind, tag, limit };
            let views: Vec<RecordView> = store
                .query()?
                .list(&options)
                .into_iter()
                .map(|r| RecordView::new(r, reveal))
                .collect();
            print_json(&views)?;
            store.close()?;
            Ok(())
        }
        Commands::Search { query, reveal } => {
            let mut store = open_store(config)?;
            let views: Vec<RecordView> = store
                .query()?
                .search(&query)
                .into_iter()
                .map(|r| RecordView::new(r, reveal))
                .collect();
            print_json(&views)?;
            store.close()?;
            Ok(())
        }
        Commands::Update {
            id,
            name,
            kind,
            secret,
            description,
            expires,
            clear_expiry,
            tags,
            clear_tags,
            meta,
        } => {
            let mut patch = RecordPatch {
                name,
                kind,
                description,
                secret_value: secret.map(Into::into),
                ..RecordPatch::default()
            };
            if clear_expiry {
                patch = patch.expires_at(None);
            } else if let Some(expires) = expires {
                patch = patch.expires_at(Some(parse_expiry(&expires)?));
            }
            if clear_tags {
                patch = patch.tags(Vec::new());
            } else if !tags.is_empty() {
                patch = patch.tags(tags);
            }

            let mut store = open_store(config)?;
            if !meta.is_empty() {
                let mut metadata = store
                    .get(&id)?
                    .map(|r| r.metadata.clone())
                    .ok_or_else(|| anyhow!("record {id} not found"))?;
                for entry in &meta {
                    let (key, value) = parse_meta(entry)?;
                    metadata.insert(key, value);
                }
                patch = patch.metadata(metadata);
            }
            store.update(&id, patch)?;
            if let Some(record) = store.get(&id)? {
                print_json(&RecordView::new(record, false))?;
            }
            store.close()?;
            Ok(())
        }
        Commands::Delete { id } => {
            let mut store = open_store(config)?;
            store.delete(&id)?;
            store.close()?;
            println!("deleted {id}");
            Ok(())
        }
        Commands::Stats => {
            let mut store = open_store(config)?;
            let stats = store.query()?.stats();
            print_json(&stats)?;
            store.close()?;
            Ok(())
        }
    }
}

fn load_config(config_file: Option<&Path>, store: Option<PathBuf>) -> Result<StoreConfig> {
    let mut config = match config_file {
        Some(file) => {
            let raw = fs::read_to_string(file)
                .with_context(|| format!("reading config {}", file.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config {}", file.display()))?
        }
        None => StoreConfig::with_path(default_store_path()?),
    };
    if let Some(path) = store {
        config.path = path;
    }
    Ok(config)
}

fn init_command(config: StoreConfig) -> Result<()> {
    let path = config.path.clone();
    if path.exists() {
        bail!("store already exists at {}", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let password = prompt_password_twice("Create store password")?;
    let mut store = RecordStore::open(&password, config)?;
    warn_if_degraded(&store);
    store.flush()?;
    store.close()?;
    println!("Store created: {}", path.display());
    Ok(())
}

fn open_store(config: StoreConfig) -> Result<RecordStore> {
    if !config.path.exists() {
        bail!(
            "no store at {}; run `lockbox init` first",
            config.path.display()
        );
    }
    let password = prompt_password_once("Store password")?;
    let store = RecordStore::open(&password, config)?;
    warn_if_degraded(&store);
    Ok(store)
}

fn warn_if_degraded(store: &RecordStore) {
    if store.security_level() == SecurityLevel::Degraded {
        eprintln!(
            "WARNING: Argon2id is unavailable; this store uses the DEGRADED fallback key derivation."
        );
    }
}

fn prompt_password_once(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let pw = rpassword::prompt_password(format!("{prompt}: "))
        .map_err(|e| anyhow!("password prompt: {e}"))?;
    Ok(Zeroizing::new(pw))
}

fn prompt_password_twice(prompt: &str) -> Result<Zeroizing<String>> {
    let pw = match std::env::var(PASSWORD_ENV) {
        Ok(pw) if !pw.is_empty() => Zeroizing::new(pw),
        _ => {
            let first = prompt_password_once(prompt)?;
            let second = Zeroizing::new(
                rpassword::prompt_password("Confirm password: ")
                    .map_err(|e| anyhow!("password prompt: {e}"))?,
            );
            if first != second {
                bail!("passwords do not match");
            }
            first
        }
    };
    if pw.chars().count() < MIN_PASSWORD_LEN {
        bail!("password too short; minimum {MIN_PASSWORD_LEN} characters");
    }
    Ok(pw)
}

fn parse_expiry(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{input}' (expected RFC 3339 or YYYY-MM-DD)"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid date '{input}'"))?;
    Ok(Utc.from_utc_datetime(&midnight))
}

fn parse_meta(entry: &str) -> Result<(String, String)> {
    let (key, value) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("metadata must be key=value, got '{entry}'"))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("metadata key must not be empty in '{entry}'");
    }
    Ok((key.to_string(), value.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
