//! Durable per-ecosystem record storage.
//!
//! Every ecosystem owns a directory under the data root:
//!
//! ```text
//! <data>/<ecosystem>/plugins.json   full record collection
//! <data>/<ecosystem>/top100.json    ranked projection
//! <data>/sbom/<owner>__<repo>.sbom.json
//! <data>/repo-index.json            shared repository index
//! ```
//!
//! [`RecordStore`] is the only way the pipeline touches these files. It
//! keeps the last loaded collection per ecosystem together with a revision
//! counter and a file fingerprint, so repeated loads are served from memory
//! until either this process saves a new revision or another writer changes
//! the file. All writes go to a temporary file that is then renamed over the
//! target, which keeps each file atomic at the single-writer level.

mod index;

pub use index::{CodeqlIndexEntry, RepoIndex, RepoIndexEntry, SbomIndexEntry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Ecosystem, PluginRecord};
use crate::repo::RepoRef;

const PLUGINS_FILE: &str = "plugins.json";
const TOP_FILE: &str = "top100.json";
const SBOM_DIR: &str = "sbom";
const INDEX_FILE: &str = "repo-index.json";

/// On-disk shape of `plugins.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginsDocument<T> {
    plugins: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<DateTime<Utc>>,
}

/// Ranked projection written next to the full collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopDocument {
    pub platform: Ecosystem,
    pub generated_at: DateTime<Utc>,
    pub total_plugins: usize,
    pub top100: Vec<PluginRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

struct Cached {
    revision: u64,
    fingerprint: Option<Fingerprint>,
    records: Vec<PluginRecord>,
}

/// Owner of the per-ecosystem record files.
pub struct RecordStore {
    root: PathBuf,
    cache: Mutex<HashMap<Ecosystem, Cached>>,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn plugins_path(&self, ecosystem: Ecosystem) -> PathBuf {
        self.root.join(ecosystem.as_str()).join(PLUGINS_FILE)
    }

    pub fn top_path(&self, ecosystem: Ecosystem) -> PathBuf {
        self.root.join(ecosystem.as_str()).join(TOP_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Revision of the collection as last seen by this store; 0 if never
    /// loaded or saved.
    pub fn revision(&self, ecosystem: Ecosystem) -> u64 {
        self.lock()
            .get(&ecosystem)
            .map(|cached| cached.revision)
            .unwrap_or(0)
    }

    /// Loads the full record collection of an ecosystem.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreMissing`] if the ecosystem has no
    /// `plugins.json`, and a read or parse error if the file is unusable.
    pub fn load(&self, ecosystem: Ecosystem) -> Result<Vec<PluginRecord>> {
        let path = self.plugins_path(ecosystem);
        let fingerprint = Fingerprint::of(&path).ok_or_else(|| Error::StoreMissing(path.clone()))?;

        let mut cache = self.lock();
        if let Some(cached) = cache.get(&ecosystem) {
            if cached.fingerprint == Some(fingerprint) {
                debug!(%ecosystem, revision = cached.revision, "record store cache hit");
                return Ok(cached.records.clone());
            }
        }

        let content = fs::read_to_string(&path).map_err(|source| Error::StoreRead {
            path: path.clone(),
            source,
        })?;
        let document: PluginsDocument<Vec<Value>> =
            serde_json::from_str(&content).map_err(|source| Error::StoreParse {
                path: path.clone(),
                source,
            })?;
        let records = records_from_values(ecosystem, document.plugins)
            .map_err(|source| Error::StoreParse { path, source })?;

        let revision = cache.get(&ecosystem).map(|c| c.revision + 1).unwrap_or(1);
        cache.insert(
            ecosystem,
            Cached {
                revision,
                fingerprint: Some(fingerprint),
                records: records.clone(),
            },
        );
        debug!(%ecosystem, revision, count = records.len(), "loaded record store");
        Ok(records)
    }

    /// Like [`load`](Self::load), but a missing collection is empty.
    pub fn load_or_default(&self, ecosystem: Ecosystem) -> Result<Vec<PluginRecord>> {
        match self.load(ecosystem) {
            Err(Error::StoreMissing(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Atomically replaces the collection and returns the new revision.
    pub fn save(&self, ecosystem: Ecosystem, records: &[PluginRecord]) -> Result<u64> {
        let path = self.plugins_path(ecosystem);
        let document = PluginsDocument {
            plugins: records,
            last_updated: Some(Utc::now()),
        };
        write_json_atomic(&path, &document)?;

        let mut cache = self.lock();
        let revision = cache.get(&ecosystem).map(|c| c.revision + 1).unwrap_or(1);
        cache.insert(
            ecosystem,
            Cached {
                revision,
                fingerprint: Fingerprint::of(&path),
                records: records.to_vec(),
            },
        );
        debug!(%ecosystem, revision, count = records.len(), "saved record store");
        Ok(revision)
    }

    pub fn save_top(&self, document: &TopDocument) -> Result<()> {
        write_json_atomic(&self.top_path(document.platform), document)
    }

    pub fn load_top(&self, ecosystem: Ecosystem) -> Result<Option<TopDocument>> {
        let path = self.top_path(ecosystem);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|source| Error::StoreRead {
            path: path.clone(),
            source,
        })?;
        let document = serde_json::from_str(&content).map_err(|source| Error::StoreParse { path, source })?;
        Ok(Some(document))
    }

    /// Path of a repository's SBOM document, relative to the data root.
    pub fn sbom_relative_path(repo: &RepoRef) -> String {
        format!("{}/{}.sbom.json", SBOM_DIR, repo.file_stem())
    }

    /// Stores an SBOM document and returns its data-root relative path.
    pub fn write_sbom(&self, repo: &RepoRef, sbom: &Value) -> Result<String> {
        let relative = Self::sbom_relative_path(repo);
        write_json_atomic(&self.root.join(&relative), sbom)?;
        Ok(relative)
    }

    pub fn sbom_exists(&self, relative: &str) -> bool {
        self.root.join(relative).is_file()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Ecosystem, Cached>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Turns raw JSON entries into records of one ecosystem.
///
/// Entries that do not name their ecosystem inherit the collection's.
pub(crate) fn records_from_values(
    ecosystem: Ecosystem,
    values: Vec<Value>,
) -> std::result::Result<Vec<PluginRecord>, serde_json::Error> {
    values
        .into_iter()
        .map(|mut value| {
            if let Value::Object(map) = &mut value {
                if !map.contains_key("ecosystem") && !map.contains_key("platform") {
                    map.insert("ecosystem".into(), Value::from(ecosystem.as_str()));
                }
            }
            let mut record: PluginRecord = serde_json::from_value(value)?;
            record.canonicalize();
            Ok(record)
        })
        .collect()
}

/// Serializes `value` as pretty JSON into a sibling temp file, then renames
/// it over `path`.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let write_err = |source| Error::StoreWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let mut content = serde_json::to_string_pretty(value)?;
    content.push('\n');

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "store".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    fs::write(&tmp, content).map_err(write_err)?;
    if let Err(source) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(write_err(source));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(id: &str, repo: &str, downloads: u64) -> PluginRecord {
        PluginRecord::new(Ecosystem::Obsidian, id)
            .with_repo(repo)
            .with_downloads(downloads)
    }

    #[test]
    fn test_load_missing_store() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());

        assert!(matches!(store.load(Ecosystem::Obsidian), Err(Error::StoreMissing(_))));
        assert!(store.load_or_default(Ecosystem::Obsidian).unwrap().is_empty());
        assert_eq!(store.revision(Ecosystem::Obsidian), 0);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let records = vec![sample("a", "acme/a", 10), sample("b", "acme/b", 20)];

        let revision = store.save(Ecosystem::Obsidian, &records).unwrap();
        assert_eq!(revision, 1);
        assert_eq!(store.load(Ecosystem::Obsidian).unwrap(), records);
        assert_eq!(store.revision(Ecosystem::Obsidian), 1);

        // A second store instance reads the same file from disk.
        let other = RecordStore::new(dir.path());
        assert_eq!(other.load(Ecosystem::Obsidian).unwrap(), records);
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        store.save(Ecosystem::Vscode, &[sample("a", "acme/a", 1)]).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path().join("vscode"))
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["plugins.json"]);
    }

    #[test]
    fn test_external_change_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        store.save(Ecosystem::Obsidian, &[sample("a", "acme/a", 1)]).unwrap();

        let path = store.plugins_path(Ecosystem::Obsidian);
        fs::write(
            &path,
            r#"{ "plugins": [ { "id": "b", "repo": "https://github.com/acme/b.git", "downloads": 5 },
                             { "id": "c", "downloads": 7 } ] }"#,
        )
        .unwrap();

        let records = store.load(Ecosystem::Obsidian).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "obsidian-b");
        assert_eq!(records[0].ecosystem, Ecosystem::Obsidian);
        assert_eq!(records[0].repo.as_deref(), Some("acme/b"));
        assert_eq!(store.revision(Ecosystem::Obsidian), 2);
    }

    #[test]
    fn test_unparsable_store_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let path = store.plugins_path(Ecosystem::Chrome);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(store.load(Ecosystem::Chrome), Err(Error::StoreParse { .. })));
        assert!(matches!(
            store.load_or_default(Ecosystem::Chrome),
            Err(Error::StoreParse { .. })
        ));
    }

    #[test]
    fn test_top_document_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        assert!(store.load_top(Ecosystem::Firefox).unwrap().is_none());

        let document = TopDocument {
            platform: Ecosystem::Firefox,
            generated_at: Utc::now(),
            total_plugins: 3,
            top100: vec![],
        };
        store.save_top(&document).unwrap();
        assert_eq!(store.load_top(Ecosystem::Firefox).unwrap(), Some(document));
    }

    #[test]
    fn test_write_sbom() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let repo = RepoRef::parse("acme/widget").unwrap();

        let relative = store.write_sbom(&repo, &serde_json::json!({ "packages": [] })).unwrap();
        assert_eq!(relative, "sbom/acme__widget.sbom.json");
        assert!(store.sbom_exists(&relative));
        assert!(!store.sbom_exists("sbom/other.sbom.json"));
    }
}
