use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::fill::FillMissing;
use crate::error::{Error, Result};
use crate::model::{Ecosystem, PluginRecord};
use crate::repo::repo_key;
use crate::store::{records_from_values, RecordStore};

/// Records of one origin catalog, tagged with the catalog name.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub name: String,
    pub records: Vec<PluginRecord>,
}

impl Catalog {
    pub fn new(name: impl Into<String>, records: Vec<PluginRecord>) -> Self {
        let name = name.into();
        let records = records
            .into_iter()
            .map(|mut record| {
                record.add_source(name.clone());
                record
            })
            .collect();
        Self { name, records }
    }

    /// Reads a catalog dump: a JSON array of records or an object with
    /// the records under `plugins`.
    pub fn load(ecosystem: Ecosystem, name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content).map_err(|e| Error::document(path, e.to_string()))?;

        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("plugins") {
                Some(Value::Array(items)) => items,
                _ => return Err(Error::document(path, "expected an array under `plugins`")),
            },
            _ => return Err(Error::document(path, "expected a JSON object or array")),
        };

        let records = records_from_values(ecosystem, items).map_err(|e| Error::document(path, e.to_string()))?;
        Ok(Self::new(name, records))
    }
}

/// Counters of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    /// Records read from all catalogs.
    pub ingested: usize,
    /// Catalog records folded into another entry for the same project.
    pub folded: usize,
    /// Identities seen for the first time.
    pub added: usize,
    /// Stored records refreshed from a catalog.
    pub updated: usize,
    /// Stored records no catalog mentioned.
    pub kept: usize,
    pub total: usize,
}

/// Outcome of [`ingest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub ecosystem: Option<Ecosystem>,
    pub merged_sources: Vec<String>,
    /// Catalogs that could not be read, with the reason.
    pub failed_sources: Vec<(String, String)>,
    pub stats: MergeStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

/// Lookup of merged entries by repository, then by id.
#[derive(Default)]
struct Identity {
    by_repo: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
}

impl Identity {
    fn find(&self, record: &PluginRecord) -> Option<usize> {
        record
            .repo
            .as_deref()
            .and_then(repo_key)
            .and_then(|key| self.by_repo.get(&key))
            .or_else(|| self.by_id.get(&record.id))
            .copied()
    }

    fn insert(&mut self, record: &PluginRecord, position: usize) {
        if let Some(key) = record.repo.as_deref().and_then(repo_key) {
            self.by_repo.entry(key).or_insert(position);
        }
        self.by_id.entry(record.id.clone()).or_insert(position);
    }
}

/// Folds `incoming` into `existing`, both fresh from catalogs.
///
/// The more popular listing supplies the catalog fields; the first-seen id
/// and the union of sources are kept.
fn fold_fresh(existing: &mut PluginRecord, incoming: PluginRecord) {
    let mut sources = std::mem::take(&mut existing.sources);
    for source in &incoming.sources {
        if !sources.contains(source) {
            sources.push(source.clone());
        }
    }

    if incoming.downloads > existing.downloads {
        let id = std::mem::take(&mut existing.id);
        let repo = existing.repo.take();
        let mut previous = std::mem::replace(existing, incoming);
        existing.id = id;
        existing.repo = existing.repo.take().or(repo);
        fill_enrichment(existing, &mut previous);
        existing.extra = merge_extra(std::mem::take(&mut previous.extra), std::mem::take(&mut existing.extra));
    } else {
        let mut incoming = incoming;
        if existing.repo.is_none() {
            existing.repo = incoming.repo.take();
        }
        fill_enrichment(existing, &mut incoming);
        existing.extra = merge_extra(incoming.extra, std::mem::take(&mut existing.extra));
    }

    existing.sources = sources;
}

/// Refreshes a stored record from its fresh catalog listing. Enrichment
/// already collected always survives.
///
/// A catalog that already listed the record may lower its downloads; a
/// catalog seen for the first time can only raise them.
fn refresh_stored(stored: &mut PluginRecord, mut fresh: PluginRecord) {
    let same_catalogs = fresh.sources.iter().all(|source| stored.sources.contains(source));
    for source in &fresh.sources {
        stored.add_source(source.clone());
    }
    if fresh.name.is_some() {
        stored.name = fresh.name.take();
    }
    if fresh.downloads > 0 {
        stored.downloads = if same_catalogs {
            fresh.downloads
        } else {
            stored.downloads.max(fresh.downloads)
        };
    }
    if fresh.repo.is_some() {
        stored.repo = fresh.repo.take();
    }
    fill_enrichment(stored, &mut fresh);
    stored.extra = merge_extra(std::mem::take(&mut stored.extra), fresh.extra);
}

/// Keeps `winner`'s enrichment and fills its gaps from `other`.
fn fill_enrichment(winner: &mut PluginRecord, other: &mut PluginRecord) {
    winner.github_stats.fill_missing(&other.github_stats);
    winner.enrichment.fill_missing(&other.enrichment);
    if let Some(at) = other.github_data_fetched_at {
        winner.mark_fetched(at);
    }
    if winner.github_status.is_none() {
        winner.github_status = other.github_status.take();
        winner.github_error = other.github_error.take();
    }
    winner.is_top100 |= other.is_top100;
}

/// Catalog pass-through fields; `newer` wins on conflicts.
fn merge_extra(
    mut older: serde_json::Map<String, Value>,
    newer: serde_json::Map<String, Value>,
) -> serde_json::Map<String, Value> {
    older.extend(newer);
    older
}

/// Collapses records that describe the same project, keeping the first
/// one's fields and filling its gaps from the others.
fn dedup_stored(records: Vec<PluginRecord>) -> (Vec<PluginRecord>, usize) {
    let mut merged: Vec<PluginRecord> = Vec::with_capacity(records.len());
    let mut identity = Identity::default();
    let mut folded = 0;

    for mut record in records {
        match identity.find(&record) {
            Some(position) => {
                let target = &mut merged[position];
                for source in &record.sources {
                    target.add_source(source.clone());
                }
                fill_enrichment(target, &mut record);
                if record.downloads > target.downloads {
                    target.downloads = record.downloads;
                }
                folded += 1;
            }
            None => {
                identity.insert(&record, merged.len());
                merged.push(record);
            }
        }
    }
    (merged, folded)
}

/// Cross-source merge of fresh catalogs onto the stored collection.
///
/// The result has one entry per normalized repository (records without a
/// repository are keyed by id). Stored records keep their position and
/// their enrichment; new identities are appended in catalog order.
pub fn merge_catalogs(previous: Vec<PluginRecord>, catalogs: &[Catalog]) -> (Vec<PluginRecord>, MergeStats) {
    let mut stats = MergeStats::default();

    let mut fresh: Vec<PluginRecord> = Vec::new();
    let mut fresh_identity = Identity::default();
    for catalog in catalogs {
        for record in &catalog.records {
            stats.ingested += 1;
            match fresh_identity.find(record) {
                Some(position) => {
                    fold_fresh(&mut fresh[position], record.clone());
                    // The fold may have resolved a repository.
                    fresh_identity.insert(&fresh[position], position);
                    stats.folded += 1;
                }
                None => {
                    fresh_identity.insert(record, fresh.len());
                    fresh.push(record.clone());
                }
            }
        }
    }

    let (mut merged, _) = dedup_stored(previous);
    let mut stored_identity = Identity::default();
    for (position, record) in merged.iter().enumerate() {
        stored_identity.insert(record, position);
    }

    let mut touched = vec![false; merged.len()];
    for record in fresh {
        match stored_identity.find(&record) {
            Some(position) => {
                refresh_stored(&mut merged[position], record);
                stored_identity.insert(&merged[position], position);
                if !touched[position] {
                    touched[position] = true;
                    stats.updated += 1;
                }
            }
            None => {
                stored_identity.insert(&record, merged.len());
                merged.push(record);
                touched.push(true);
                stats.added += 1;
            }
        }
    }
    stats.kept = touched.iter().filter(|t| !**t).count();

    // A refreshed repo can collide with another stored record.
    let (merged, _) = dedup_stored(merged);
    stats.total = merged.len();
    (merged, stats)
}

/// Loads every named catalog, merges them onto the stored collection and
/// saves the result.
///
/// A catalog that cannot be read is reported and skipped; the others
/// still merge. Nothing is written when no catalog could be read.
pub fn ingest(store: &RecordStore, ecosystem: Ecosystem, sources: &[(String, PathBuf)]) -> Result<MergeReport> {
    let mut report = MergeReport {
        ecosystem: Some(ecosystem),
        ..Default::default()
    };

    let mut catalogs = Vec::new();
    for (name, path) in sources {
        match Catalog::load(ecosystem, name.clone(), path) {
            Ok(catalog) => {
                info!(%ecosystem, source = %name, records = catalog.records.len(), "loaded catalog");
                report.merged_sources.push(name.clone());
                catalogs.push(catalog);
            }
            Err(e) => {
                warn!(%ecosystem, source = %name, error = %e, "skipping catalog");
                report.failed_sources.push((name.clone(), e.to_string()));
            }
        }
    }
    if catalogs.is_empty() {
        return Ok(report);
    }

    let previous = store.load_or_default(ecosystem)?;
    let (merged, stats) = merge_catalogs(previous, &catalogs);
    report.revision = Some(store.save(ecosystem, &merged)?);
    report.stats = stats;
    Ok(report)
}
