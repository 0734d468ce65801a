use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::{Ecosystem, Enrichment, FetchStatus, GithubStats};
use crate::repo::{normalize_repo, repo_key, RepoRef};

/// One catalog-listed plugin, extension, component or mod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRecord {
    /// Ecosystem-prefixed slug, unique within one ecosystem's store.
    pub id: String,
    #[serde(alias = "platform")]
    pub ecosystem: Ecosystem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Origin catalogs that listed this record, in first-seen order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub downloads: u64,
    /// Normalized `owner/name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_stats: Option<GithubStats>,
    /// Most recent stats fetch attempt, successful or not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_data_fetched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_status: Option<FetchStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_error: Option<String>,
    #[serde(default)]
    pub is_top100: bool,
    #[serde(flatten)]
    pub enrichment: Enrichment,
    /// Catalog-specific fields carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginRecord {
    pub fn new(ecosystem: Ecosystem, id: impl AsRef<str>) -> Self {
        Self {
            id: ecosystem.prefixed_id(id.as_ref()),
            ecosystem,
            name: None,
            sources: Vec::new(),
            downloads: 0,
            repo: None,
            github_stats: None,
            github_data_fetched_at: None,
            github_status: None,
            github_error: None,
            is_top100: false,
            enrichment: Enrichment::default(),
            extra: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the upstream repository, normalizing it to `owner/name`.
    pub fn with_repo(mut self, repo: &str) -> Self {
        self.repo = normalize_repo(repo);
        self
    }

    pub fn with_downloads(mut self, downloads: u64) -> Self {
        self.downloads = downloads;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.add_source(source);
        self
    }

    pub fn with_fetched_at(mut self, at: DateTime<Utc>) -> Self {
        self.github_data_fetched_at = Some(at);
        self
    }

    pub fn repo_ref(&self) -> Option<RepoRef> {
        self.repo.as_deref().and_then(RepoRef::parse)
    }

    /// Identity used when reconciling records: the lower-cased repository
    /// when one resolves, otherwise the raw id.
    pub fn dedup_key(&self) -> String {
        match self.repo.as_deref().and_then(repo_key) {
            Some(key) => key,
            None => format!("id:{}", self.id),
        }
    }

    pub fn add_source(&mut self, source: impl Into<String>) {
        let source = source.into();
        if !source.is_empty() && !self.sources.contains(&source) {
            self.sources.push(source);
        }
    }

    /// Advances `github_data_fetched_at`, never moving it backwards.
    pub fn mark_fetched(&mut self, at: DateTime<Utc>) {
        self.github_data_fetched_at = Some(match self.github_data_fetched_at {
            Some(previous) if previous > at => previous,
            _ => at,
        });
    }

    pub fn fetch_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.github_data_fetched_at.map(|at| now - at)
    }

    pub fn has_enrichment(&self) -> bool {
        self.github_stats.is_some() || !self.enrichment.is_empty()
    }

    /// Brings a freshly loaded record into canonical shape: prefixed id,
    /// normalized repo and a populated `downloads` counter.
    pub fn canonicalize(&mut self) {
        self.id = self.ecosystem.prefixed_id(&self.id);
        if let Some(raw) = self.repo.take() {
            self.repo = normalize_repo(&raw);
            if self.repo.is_none() && !raw.trim().is_empty() {
                // Keep non-GitHub references around for humans.
                self.extra.entry("repoUrl").or_insert(Value::String(raw));
            }
        }
        if self.downloads == 0 {
            self.downloads = self.derived_downloads();
        }
    }

    fn derived_downloads(&self) -> u64 {
        let from_catalog = self
            .ecosystem
            .download_fields()
            .iter()
            .filter_map(|field| self.extra.get(*field).and_then(value_as_u64))
            .find(|n| *n > 0);

        match from_catalog {
            Some(n) => n,
            None if self.ecosystem.stars_as_downloads() => {
                self.github_stats.as_ref().and_then(|s| s.stars).unwrap_or(0)
            }
            None => 0,
        }
    }
}

/// Reads a loosely typed JSON counter (integer, float, numeric string).
pub(crate) fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_u64).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_record_prefixes_id() {
        let record = PluginRecord::new(Ecosystem::Vscode, "ms-python.python");
        assert_eq!(record.id, "vscode-ms-python.python");
        assert!(!record.is_top100);
        assert!(!record.has_enrichment());
    }

    #[test]
    fn test_dedup_key() {
        let with_repo = PluginRecord::new(Ecosystem::Obsidian, "a").with_repo("Acme/Widget");
        assert_eq!(with_repo.dedup_key(), "acme/widget");

        let without_repo = PluginRecord::new(Ecosystem::Obsidian, "a");
        assert_eq!(without_repo.dedup_key(), "id:obsidian-a");
    }

    #[test]
    fn test_add_source_dedups() {
        let mut record = PluginRecord::new(Ecosystem::Minecraft, "x")
            .with_source("modrinth")
            .with_source("spiget");
        record.add_source("modrinth");
        record.add_source("");
        assert_eq!(record.sources, vec!["modrinth", "spiget"]);
    }

    #[test]
    fn test_mark_fetched_is_monotonic() {
        let later = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let mut record = PluginRecord::new(Ecosystem::Chrome, "x").with_fetched_at(later);
        record.mark_fetched(earlier);
        assert_eq!(record.github_data_fetched_at, Some(later));

        let newest = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        record.mark_fetched(newest);
        assert_eq!(record.github_data_fetched_at, Some(newest));
    }

    #[test]
    fn test_deserialize_original_shape() {
        let json = r#"{
            "id": "dataview",
            "platform": "obsidian",
            "name": "Dataview",
            "author": "blacksmithgu",
            "downloads": 1520000.0,
            "repo": "blacksmithgu/obsidian-dataview",
            "githubStats": { "stars": 7000, "topics": ["obsidian"], "license": "MIT License" },
            "githubDataFetchedAt": "2025-01-02T03:04:05.000Z",
            "isTop100": true,
            "sbomStatus": "ok",
            "sbomPath": "sbom/blacksmithgu__obsidian-dataview.sbom.json",
            "codeqlStatus": "not_found",
            "scorecard": { "score": 5.4, "checks": [] }
        }"#;

        let record: PluginRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.ecosystem, Ecosystem::Obsidian);
        assert_eq!(record.downloads, 1_520_000);
        assert_eq!(record.github_stats.as_ref().unwrap().stars, Some(7000));
        assert_eq!(record.enrichment.sbom_status, Some(FetchStatus::Ok));
        assert_eq!(record.enrichment.codeql_status, Some(FetchStatus::NotFound));
        assert_eq!(record.enrichment.scorecard.as_ref().unwrap().score, Some(5.4));
        assert_eq!(record.extra.get("author"), Some(&Value::from("blacksmithgu")));
        assert!(!record.extra.contains_key("sbomStatus"));
        assert!(record.is_top100);
    }

    #[test]
    fn test_null_downloads_is_zero() {
        let json = r#"{ "id": "chrome-x", "ecosystem": "chrome", "downloads": null }"#;
        let record: PluginRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.downloads, 0);
    }

    #[test]
    fn test_serialize_keeps_extra_fields() {
        let mut record = PluginRecord::new(Ecosystem::Firefox, "ublock");
        record.extra.insert("users".into(), Value::from(9_000_000u64));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["users"], 9_000_000u64);
        assert_eq!(value["ecosystem"], "firefox");
        assert!(value.get("githubStats").is_none());
    }

    #[test]
    fn test_canonicalize_derives_downloads() {
        let mut vscode = PluginRecord::new(Ecosystem::Vscode, "x");
        vscode.extra.insert("installs".into(), Value::from("1,234"));
        vscode.canonicalize();
        assert_eq!(vscode.downloads, 1234);

        let mut firefox = PluginRecord::new(Ecosystem::Firefox, "y");
        firefox.extra.insert("users".into(), Value::from(0));
        firefox.extra.insert("averageDailyUsers".into(), Value::from(42));
        firefox.canonicalize();
        assert_eq!(firefox.downloads, 42);

        let mut sublime = PluginRecord::new(Ecosystem::Sublime, "z");
        sublime.github_stats = Some(GithubStats {
            stars: Some(321),
            ..Default::default()
        });
        sublime.canonicalize();
        assert_eq!(sublime.downloads, 321);

        let mut chrome = PluginRecord::new(Ecosystem::Chrome, "w");
        chrome.github_stats = Some(GithubStats {
            stars: Some(321),
            ..Default::default()
        });
        chrome.canonicalize();
        assert_eq!(chrome.downloads, 0);
    }

    #[test]
    fn test_canonicalize_normalizes_repo_and_id() {
        let mut record = PluginRecord::new(Ecosystem::WordPress, "seo");
        record.id = "seo".into();
        record.repo = Some("https://github.com/yoast/wordpress-seo.git".into());
        record.canonicalize();
        assert_eq!(record.id, "wordpress-seo");
        assert_eq!(record.repo.as_deref(), Some("yoast/wordpress-seo"));
    }

    #[test]
    fn test_canonicalize_keeps_foreign_repo_url() {
        let mut record = PluginRecord::new(Ecosystem::JetBrains, "x");
        record.repo = Some("https://gitlab.com/acme/x".into());
        record.canonicalize();
        assert_eq!(record.repo, None);
        assert_eq!(
            record.extra.get("repoUrl"),
            Some(&Value::from("https://gitlab.com/acme/x"))
        );
    }
}
