use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::crypto::KdfParams;

pub const DEFAULT_STORE_FILE: &str = "lockbox.bin";
pub const DEFAULT_EXPIRY_HORIZON_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub kdf: KdfParams,
    /// Records expiring within this many days count as "expiring soon".
    pub expiry_horizon_days: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_FILE),
            kdf: KdfParams::default(),
            expiry_horizon_days: DEFAULT_EXPIRY_HORIZON_DAYS,
        }
    }
}

impl StoreConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Negative values count as zero; values too large for a `Duration`
    /// saturate at `Duration::MAX`.
    pub fn expiry_horizon(&self) -> Duration {
        Duration::try_days(self.expiry_horizon_days.max(0)).unwrap_or(Duration::MAX)
    }
}
