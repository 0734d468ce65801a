use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::fill::FillMissing;
use crate::error::{Error, Result};
use crate::model::{Ecosystem, Enrichment, GithubStats, PluginRecord, Scorecard, ScorecardCheck};
use crate::repo::{normalize_repo, repo_key};
use crate::store::RecordStore;

/// One entry of an externally produced analysis document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_stats: Option<GithubStats>,
    #[serde(flatten)]
    pub enrichment: Enrichment,
}

impl EnrichmentEntry {
    fn fill(&self, record: &mut PluginRecord) -> usize {
        record.github_stats.fill_missing(&self.github_stats) + record.enrichment.fill_missing(&self.enrichment)
    }
}

/// Counters reported by [`apply_entries`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichStats {
    /// Records that found a matching entry.
    pub matched: usize,
    /// Records without one.
    pub missing: usize,
    /// Values adopted from the entries.
    pub added: usize,
}

/// Reads an analysis document: a JSON object with the entries under
/// `top100` or `plugins`, or a bare array of entries. Entries that do not
/// parse are skipped with a warning.
pub fn load_document(path: impl AsRef<Path>) -> Result<Vec<EnrichmentEntry>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content).map_err(|e| Error::document(path, e.to_string()))?;

    let entries = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("top100").or_else(|| map.remove("plugins")) {
            Some(Value::Array(items)) => items,
            _ => return Err(Error::document(path, "expected an array under `top100` or `plugins`")),
        },
        _ => return Err(Error::document(path, "expected a JSON object or array")),
    };

    let total = entries.len();
    let parsed: Vec<EnrichmentEntry> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value(item) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), entry = i, error = %e, "skipping unreadable entry");
                None
            }
        })
        .collect();
    debug!(path = %path.display(), total, parsed = parsed.len(), "loaded analysis document");
    Ok(parsed)
}

/// Reads every scorecard result under `dir` and turns it into an entry
/// keyed by repository.
///
/// Results name their repository in `repo.name` (`github.com/owner/name`)
/// or `repo.url`; files without a GitHub repository are ignored.
pub fn load_scorecard_dir(dir: impl AsRef<Path>) -> Result<Vec<EnrichmentEntry>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::document(dir, "not a directory"));
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.path().extension().is_some_and(|ext| ext == "json"))
    {
        let path = entry.path();
        let value: Value = match fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
        {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable scorecard");
                continue;
            }
        };

        match scorecard_entry(&value) {
            Some(entry) => entries.push(entry),
            None => debug!(path = %path.display(), "scorecard without a GitHub repository"),
        }
    }
    Ok(entries)
}

/// Maps one scorecard result onto the record schema.
pub fn scorecard_entry(value: &Value) -> Option<EnrichmentEntry> {
    let repo_field = |key: &str| value.get("repo").and_then(|r| r.get(key)).and_then(Value::as_str);
    let repo = repo_field("name")
        .and_then(normalize_repo)
        .or_else(|| repo_field("url").and_then(normalize_repo))?;

    let raw_checks = value
        .get("checks")
        .or_else(|| value.get("scorecard").and_then(|s| s.get("checks")))
        .and_then(Value::as_array);

    let checks: Vec<ScorecardCheck> = raw_checks
        .into_iter()
        .flatten()
        .filter_map(|check| {
            let name = check.get("name")?.as_str()?.to_string();
            Some(ScorecardCheck {
                name,
                score: check.get("score").and_then(Value::as_f64),
                reason: check.get("reason").and_then(Value::as_str).map(String::from),
            })
        })
        .collect();
    let check_scores: BTreeMap<String, Option<f64>> =
        checks.iter().map(|check| (check.name.clone(), check.score)).collect();

    let scorecard = Scorecard {
        score: value.get("score").and_then(Value::as_f64),
        checks,
        check_scores,
        scorecard_version: value
            .get("scorecard")
            .and_then(|s| s.get("version"))
            .and_then(Value::as_str)
            .map(String::from),
        scan_date: value.get("date").and_then(Value::as_str).map(String::from),
    };

    Some(EnrichmentEntry {
        repo: Some(repo),
        enrichment: Enrichment {
            scorecard: Some(scorecard),
            ..Default::default()
        },
        ..Default::default()
    })
}

/// Folds `entries` into `records` without overwriting anything.
///
/// Each record looks up its entry by id first (prefixed or not), then by
/// lower-cased repository.
pub fn apply_entries(ecosystem: Ecosystem, records: &mut [PluginRecord], entries: &[EnrichmentEntry]) -> EnrichStats {
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut by_repo: HashMap<String, usize> = HashMap::new();
    for (position, entry) in entries.iter().enumerate() {
        if let Some(id) = &entry.id {
            by_id.entry(ecosystem.prefixed_id(id)).or_insert(position);
        }
        if let Some(key) = entry.repo.as_deref().and_then(repo_key) {
            by_repo.entry(key).or_insert(position);
        }
    }

    let mut stats = EnrichStats::default();
    for record in records.iter_mut() {
        let position = by_id.get(&record.id).or_else(|| {
            record
                .repo
                .as_deref()
                .and_then(repo_key)
                .and_then(|key| by_repo.get(&key))
        });

        match position {
            Some(position) => {
                stats.matched += 1;
                stats.added += entries[*position].fill(record);
            }
            None => stats.missing += 1,
        }
    }
    stats
}

/// Outcome of [`enrich_store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichReport {
    pub ecosystem: Ecosystem,
    pub entries: usize,
    pub records: EnrichStats,
    /// Same pass over the stored top-N document, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<EnrichStats>,
}

/// Applies `entries` to an ecosystem's collection and to its top-N
/// document. Files are only rewritten when a value was added.
pub fn enrich_store(store: &RecordStore, ecosystem: Ecosystem, entries: &[EnrichmentEntry]) -> Result<EnrichReport> {
    let mut records = store.load(ecosystem)?;
    let stats = apply_entries(ecosystem, &mut records, entries);
    if stats.added > 0 {
        store.save(ecosystem, &records)?;
    }

    let top = match store.load_top(ecosystem)? {
        Some(mut document) => {
            let top_stats = apply_entries(ecosystem, &mut document.top100, entries);
            if top_stats.added > 0 {
                store.save_top(&document)?;
            }
            Some(top_stats)
        }
        None => None,
    };

    info!(
        %ecosystem,
        matched = stats.matched,
        missing = stats.missing,
        added = stats.added,
        "enrichment merged"
    );
    Ok(EnrichReport {
        ecosystem,
        entries: entries.len(),
        records: stats,
        top,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FetchStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn records() -> Vec<PluginRecord> {
        vec![
            PluginRecord::new(Ecosystem::Vscode, "acme.widget").with_repo("acme/widget"),
            PluginRecord::new(Ecosystem::Vscode, "acme.gadget").with_repo("acme/gadget"),
            PluginRecord::new(Ecosystem::Vscode, "lonely"),
        ]
    }

    fn write(dir: &Path, name: &str, value: &Value) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, serde_json::to_string(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_load_document_shapes() {
        let dir = TempDir::new().unwrap();
        let entry = json!({ "id": "a", "sbomStatus": "ok" });

        for (name, doc) in [
            ("top.json", json!({ "top100": [entry.clone()] })),
            ("plugins.json", json!({ "plugins": [entry.clone()] })),
            ("bare.json", json!([entry.clone()])),
        ] {
            let entries = load_document(write(dir.path(), name, &doc)).unwrap();
            assert_eq!(entries.len(), 1, "{name}");
            assert_eq!(entries[0].enrichment.sbom_status, Some(FetchStatus::Ok));
        }

        let bad = write(dir.path(), "bad.json", &json!({ "items": [] }));
        assert!(matches!(load_document(bad), Err(Error::Document { .. })));
    }

    #[test]
    fn test_load_document_skips_bad_entries() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "doc.json",
            &json!({ "top100": [ { "id": "a" }, { "id": "b", "sbomStatus": "exploded" }, 42 ] }),
        );
        let entries = load_document(path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id.as_deref(), Some("a"));
    }

    #[test]
    fn test_apply_matches_by_id_then_repo() {
        let mut records = records();
        let entries = vec![
            EnrichmentEntry {
                id: Some("acme.widget".into()),
                enrichment: Enrichment {
                    sbom_status: Some(FetchStatus::Ok),
                    ..Default::default()
                },
                ..Default::default()
            },
            EnrichmentEntry {
                repo: Some("https://github.com/ACME/gadget.git".into()),
                enrichment: Enrichment {
                    codeql_alert_count: Some(4),
                    ..Default::default()
                },
                ..Default::default()
            },
        ];

        let stats = apply_entries(Ecosystem::Vscode, &mut records, &entries);
        assert_eq!(stats, EnrichStats { matched: 2, missing: 1, added: 2 });
        assert_eq!(records[0].enrichment.sbom_status, Some(FetchStatus::Ok));
        assert_eq!(records[1].enrichment.codeql_alert_count, Some(4));
    }

    #[test]
    fn test_apply_twice_adds_nothing() {
        let mut records = records();
        records[0].github_stats = Some(GithubStats {
            stars: Some(5),
            ..Default::default()
        });
        let entries = vec![EnrichmentEntry {
            id: Some("vscode-acme.widget".into()),
            github_stats: Some(GithubStats {
                stars: Some(50),
                license: Some("MIT".into()),
                ..Default::default()
            }),
            ..Default::default()
        }];

        let first = apply_entries(Ecosystem::Vscode, &mut records, &entries);
        let snapshot = records.clone();
        let second = apply_entries(Ecosystem::Vscode, &mut records, &entries);

        assert_eq!(first.added, 1);
        assert_eq!(second.added, 0);
        assert_eq!(records, snapshot);
        assert_eq!(records[0].github_stats.as_ref().unwrap().stars, Some(5));
    }

    #[test]
    fn test_scorecard_entry() {
        let value = json!({
            "date": "2025-02-03",
            "repo": { "name": "github.com/acme/widget", "commit": "abc" },
            "scorecard": { "version": "v5.1.0" },
            "score": 7.2,
            "checks": [
                { "name": "Maintained", "score": 10, "reason": "active" },
                { "name": "Fuzzing", "score": -1 },
                { "score": 3 }
            ]
        });

        let entry = scorecard_entry(&value).unwrap();
        assert_eq!(entry.repo.as_deref(), Some("acme/widget"));
        let scorecard = entry.enrichment.scorecard.unwrap();
        assert_eq!(scorecard.score, Some(7.2));
        assert_eq!(scorecard.checks.len(), 2);
        assert_eq!(scorecard.check_scores.get("Maintained"), Some(&Some(10.0)));
        assert_eq!(scorecard.scorecard_version.as_deref(), Some("v5.1.0"));
        assert_eq!(scorecard.scan_date.as_deref(), Some("2025-02-03"));

        assert!(scorecard_entry(&json!({ "repo": { "name": "gitlab.com/a/b" } })).is_none());
    }

    #[test]
    fn test_load_scorecard_dir() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "acme__widget.json",
            &json!({ "repo": { "url": "https://github.com/acme/widget" }, "score": 5.0, "checks": [] }),
        );
        write(dir.path(), "broken.json", &json!("not a scorecard"));
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let entries = load_scorecard_dir(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);

        let mut records = records();
        let stats = apply_entries(Ecosystem::Vscode, &mut records, &entries);
        assert_eq!(stats.matched, 1);
        assert_eq!(records[0].enrichment.scorecard.as_ref().and_then(|s| s.score), Some(5.0));

        assert!(load_scorecard_dir(dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_enrich_store_updates_records_and_top() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let mut records = records();
        store.save(Ecosystem::Vscode, &records).unwrap();
        let document = crate::merge::top_document(Ecosystem::Vscode, &mut records, 10, false);
        store.save_top(&document).unwrap();

        let entries = vec![EnrichmentEntry {
            repo: Some("acme/widget".into()),
            enrichment: Enrichment {
                sbom_status: Some(FetchStatus::Ok),
                ..Default::default()
            },
            ..Default::default()
        }];

        let report = enrich_store(&store, Ecosystem::Vscode, &entries).unwrap();
        assert_eq!(report.records.added, 1);
        assert_eq!(report.top.map(|t| t.added), Some(0));
        assert_eq!(
            store.load(Ecosystem::Vscode).unwrap()[0].enrichment.sbom_status,
            Some(FetchStatus::Ok)
        );

        let again = enrich_store(&store, Ecosystem::Vscode, &entries).unwrap();
        assert_eq!(again.records.added, 0);
    }
}
