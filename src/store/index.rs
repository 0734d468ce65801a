//! Cross-ecosystem repository index.
//!
//! The same upstream project is often listed by several ecosystems (a
//! language server shipped as a VSCode extension and a JetBrains plugin,
//! a mod published on two catalogs). The index remembers the last known
//! SBOM and CodeQL outcome per `owner/repo`, so a run can reuse them
//! instead of spending quota on a repository it already examined.
//!
//! # Example
//!
//! ```no_run
//! use plughub::store::RepoIndex;
//!
//! let index = RepoIndex::load("data/repo-index.json").unwrap();
//! if let Some(entry) = index.get("acme/widget") {
//!     println!("sbom: {:?}", entry.sbom);
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::write_json_atomic;
use crate::error::Result;
use crate::model::FetchStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SbomIndexEntry {
    pub status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeqlIndexEntry {
    pub status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<BTreeMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoIndexEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbom: Option<SbomIndexEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codeql: Option<CodeqlIndexEntry>,
}

/// Persistent `owner/repo` → last enrichment outcome map.
///
/// Keys are lower-cased so that differently capitalized references share
/// one entry.
#[derive(Debug, Default)]
pub struct RepoIndex {
    path: Option<PathBuf>,
    entries: BTreeMap<String, RepoIndexEntry>,
    dirty: bool,
}

impl RepoIndex {
    /// An index that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the index from `path`.
    ///
    /// A missing file yields an empty index. A corrupt file is logged and
    /// also treated as empty: the index is an optimization, and the next
    /// save rewrites it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let entries = if path.exists() {
            let content = fs::read_to_string(path)?;
            match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring unreadable repo index");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
            dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, repo: &str) -> Option<&RepoIndexEntry> {
        self.entries.get(&repo.to_lowercase())
    }

    /// SBOM outcome that can be reused without a network call: only
    /// successful fetches qualify.
    pub fn reusable_sbom(&self, repo: &str) -> Option<&SbomIndexEntry> {
        self.get(repo)?
            .sbom
            .as_ref()
            .filter(|entry| entry.status.is_success() && entry.path.is_some())
    }

    /// CodeQL outcome younger than `max_age`, whatever its status.
    pub fn fresh_codeql(&self, repo: &str, now: DateTime<Utc>, max_age: Duration) -> Option<&CodeqlIndexEntry> {
        self.get(repo)?
            .codeql
            .as_ref()
            .filter(|entry| now - entry.fetched_at <= max_age)
    }

    pub fn record_sbom(&mut self, repo: &str, entry: SbomIndexEntry) {
        self.entries.entry(repo.to_lowercase()).or_default().sbom = Some(entry);
        self.dirty = true;
    }

    pub fn record_codeql(&mut self, repo: &str, entry: CodeqlIndexEntry) {
        self.entries.entry(repo.to_lowercase()).or_default().codeql = Some(entry);
        self.dirty = true;
    }

    /// Writes the index back to its file if anything changed.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(path) = &self.path {
            write_json_atomic(path, &self.entries)?;
        }
        self.dirty = false;
        Ok(())
    }
}
