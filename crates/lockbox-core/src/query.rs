//! Read-only search, filtering and aggregates over a snapshot.
//!
//! Text matching is case-insensitive. Results are ordered newest first
//! (`created_at` descending, ties by id) so output is stable for a given
//! snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_EXPIRY_HORIZON_DAYS;
use crate::record::{Record, RecordKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    pub kind: Option<String>,
    pub tag: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub by_kind: BTreeMap<RecordKind, usize>,
    /// Keyed by lowercase tag.
    pub by_tag: BTreeMap<String, usize>,
    pub expired: usize,
    pub expiring_soon: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    records: &'a BTreeMap<String, Record>,
    horizon: Duration,
}

impl<'a> Query<'a> {
    pub fn new(records: &'a BTreeMap<String, Record>) -> Self {
        Self {
            records,
            horizon: Duration::days(DEFAULT_EXPIRY_HORIZON_DAYS),
        }
    }

    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.horizon = horizon;
        self
    }

    /// Substring match on name, description, kind, tags and metadata keys/values.
    pub fn search(&self, query: &str) -> Vec<&'a Record> {
        let needle = query.to_lowercase();
        self.collect(|rec| matches_text(rec, &needle))
    }

    pub fn filter_by_kind(&self, kind: &str) -> Vec<&'a Record> {
        let kind = kind.trim();
        self.collect(|rec| rec.kind.as_str().eq_ignore_ascii_case(kind))
    }

    pub fn filter_by_tag(&self, tag: &str) -> Vec<&'a Record> {
        let tag = tag.trim();
        self.collect(|rec| rec.has_tag(tag))
    }

    pub fn list(&self, options: &ListOptions) -> Vec<&'a Record> {
        let mut out = self.collect(|rec| {
            options
                .kind
                .as_deref()
                .map_or(true, |k| rec.kind.as_str().eq_ignore_ascii_case(k.trim()))
                && options.tag.as_deref().map_or(true, |t| rec.has_tag(t.trim()))
        });
        if let Some(limit) = options.limit {
            out.truncate(limit);
        }
        out
    }

    pub fn expired_at(&self, now: DateTime<Utc>) -> Vec<&'a Record> {
        self.collect(|rec| rec.is_expired(now))
    }

    pub fn expiring_within(&self, now: DateTime<Utc>, horizon: Duration) -> Vec<&'a Record> {
        self.collect(|rec| rec.expires_within(now, horizon))
    }

    pub fn stats(&self) -> StoreStats {
        self.stats_at(Utc::now(), self.horizon)
    }

    pub fn stats_at(&self, now: DateTime<Utc>, horizon: Duration) -> StoreStats {
        let mut stats = StoreStats {
            total: self.records.len(),
            ..StoreStats::default()
        };
        for rec in self.records.values() {
            *stats.by_kind.entry(rec.kind).or_default() += 1;
            let mut seen: Vec<String> = Vec::with_capacity(rec.tags.len());
            for tag in &rec.tags {
                let key = tag.to_lowercase();
                if !seen.contains(&key) {
                    *stats.by_tag.entry(key.clone()).or_default() += 1;
                    seen.push(key);
                }
            }
            if rec.is_expired(now) {
                stats.expired += 1;
            } else if rec.expires_within(now, horizon) {
                stats.expiring_soon += 1;
            }
        }
        stats
    }

    fn collect(&self, keep: impl Fn(&Record) -> bool) -> Vec<&'a Record> {
        let mut out: Vec<&'a Record> = self.records.values().filter(|r| keep(*r)).collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }
}

fn matches_text(rec: &Record, needle: &str) -> bool {
    fn hit(haystack: &str, needle: &str) -> bool {
        haystack.to_lowercase().contains(needle)
    }
    hit(&rec.name, needle)
        || hit(&rec.description, needle)
        || hit(rec.kind.as_str(), needle)
        || rec.tags.iter().any(|t| hit(t, needle))
        || rec.metadata.iter().any(|(k, v)| hit(k, needle) || hit(v, needle))
}
