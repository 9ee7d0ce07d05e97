//! Credential records and the inputs that create or modify them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    ApiKey,
    LicenseKey,
    Token,
    Certificate,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::ApiKey,
        RecordKind::LicenseKey,
        RecordKind::Token,
        RecordKind::Certificate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::ApiKey => "api_key",
            RecordKind::LicenseKey => "license_key",
            RecordKind::Token => "token",
            RecordKind::Certificate => "certificate",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        RecordKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let known: Vec<&str> = RecordKind::ALL.iter().map(|k| k.as_str()).collect();
                StoreError::Validation(format!(
                    "unknown kind '{wanted}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

/// The sensitive payload of a record. Redacted in `Debug`, wiped on drop.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `abcd...wxyz` for values of 10+ characters, `****` otherwise.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() < 10 {
            return "****".to_string();
        }
        let prefix: String = chars[..4].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{prefix}...{suffix}")
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([REDACTED])")
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub name: String,
    pub kind: RecordKind,
    pub secret_value: SecretValue,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Record {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Not yet expired, but will be within `horizon` of `now`. A horizon that
    /// runs past the representable range has no upper bound.
    pub fn expires_within(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        self.expires_at.is_some_and(|at| {
            at > now
                && now
                    .checked_add_signed(horizon)
                    .map_or(true, |end| at <= end)
        })
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.to_lowercase() == tag.to_lowercase())
    }

    /// Overlay `patch` onto a copy of this record. `id` and `created_at` in the
    /// patch are skipped. The candidate is validated; `self` is never touched.
    pub(crate) fn patched(&self, patch: RecordPatch) -> Result<Record, StoreError> {
        let mut candidate = self.clone();
        let RecordPatch {
            id: _,
            created_at: _,
            name,
            kind,
            secret_value,
            description,
            expires_at,
            tags,
            metadata,
        } = patch;

        if let Some(name) = name {
            candidate.name = name;
        }
        if let Some(kind) = kind {
            candidate.kind = kind.parse()?;
        }
        if let Some(secret) = secret_value {
            candidate.secret_value = secret;
        }
        if let Some(description) = description {
            candidate.description = description;
        }
        if let Some(expires_at) = expires_at {
            candidate.expires_at = expires_at;
        }
        if let Some(tags) = tags {
            candidate.tags = tags;
        }
        if let Some(metadata) = metadata {
            candidate.metadata = metadata;
        }
        candidate.normalize()?;
        Ok(candidate)
    }

    pub(crate) fn normalize(&mut self) -> Result<(), StoreError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("name must not be empty".into()));
        }
        self.name = name.to_string();
        if self.secret_value.is_empty() {
            return Err(StoreError::Validation("secret_value must not be empty".into()));
        }

        let mut tags: Vec<String> = Vec::with_capacity(self.tags.len());
        for tag in &self.tags {
            let tag = tag.trim();
            if tag.is_empty() {
                return Err(StoreError::Validation("tags must not be empty".into()));
            }
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
        self.tags = tags;

        if self.metadata.keys().any(|k| k.trim().is_empty()) {
            return Err(StoreError::Validation("metadata keys must not be empty".into()));
        }
        Ok(())
    }
}

/// Fields for `RecordStore::add`. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRecord {
    pub name: String,
    pub kind: String,
    pub secret_value: SecretValue,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl NewRecord {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        secret_value: impl Into<SecretValue>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            secret_value: secret_value.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub(crate) fn into_record(
        self,
        id: String,
        created_at: DateTime<Utc>,
    ) -> Result<Record, StoreError> {
        let kind = self.kind.parse()?;
        let mut record = Record {
            id,
            name: self.name,
            kind,
            secret_value: self.secret_value,
            description: self.description,
            created_at,
            expires_at: self.expires_at,
            tags: self.tags,
            metadata: self.metadata,
        };
        record.normalize()?;
        Ok(record)
    }
}

/// Partial update for `RecordStore::update`. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecordPatch {
    /// Protected. Accepted so whole records can be fed back in; ignored.
    pub id: Option<String>,
    /// Protected. Accepted so whole records can be fed back in; ignored.
    pub created_at: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub secret_value: Option<SecretValue>,
    pub description: Option<String>,
    /// `Some(None)` clears the expiry.
    #[serde(deserialize_with = "present_or_null")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<BTreeMap<String, String>>,
}

impl RecordPatch {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn secret_value(mut self, secret: impl Into<SecretValue>) -> Self {
        self.secret_value = Some(secret.into());
        self
    }

    pub fn expires_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// Distinguishes a missing field (outer None, via `default`) from an explicit null.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<DateTime<Utc>>::deserialize(deserializer).map(Some)
}
