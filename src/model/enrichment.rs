use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome category of one enrichment fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    Cached,
    NotFound,
    RateLimited,
    Forbidden,
    NoRepo,
    Error,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Ok => "ok",
            FetchStatus::Cached => "cached",
            FetchStatus::NotFound => "not_found",
            FetchStatus::RateLimited => "rate_limited",
            FetchStatus::Forbidden => "forbidden",
            FetchStatus::NoRepo => "no_repo",
            FetchStatus::Error => "error",
        }
    }

    /// True when the payload attached alongside this status can be trusted.
    pub fn is_success(&self) -> bool {
        matches!(self, FetchStatus::Ok | FetchStatus::Cached)
    }
}

impl std::fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Repository statistics from the GitHub repository endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GithubStats {
    /// Counters stay `None` until a fetch or a source reports them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stars: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forks: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_issues: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watchers: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub archived: bool,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
}

/// Vulnerability counts derived from scanning an SBOM against OSV.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VulnerabilitySummary {
    pub total: Option<u64>,
    pub unique: Option<u64>,
    pub critical: Option<u64>,
    pub high: Option<u64>,
    pub medium: Option<u64>,
    pub low: Option<u64>,
    pub stale_packages: Option<u64>,
    pub recent_vulns: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScorecardCheck {
    pub name: String,
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// OpenSSF scorecard result for the upstream repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scorecard {
    pub score: Option<f64>,
    pub checks: Vec<ScorecardCheck>,
    pub check_scores: BTreeMap<String, Option<f64>>,
    pub scorecard_version: Option<String>,
    pub scan_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DependencySummary {
    pub sbom_package_count: Option<u64>,
    pub sbom_dependency_count: Option<u64>,
    pub ecosystems: Vec<String>,
}

/// Every externally produced analysis payload a record can carry.
///
/// Each kind is independently optional and independently refreshable. The
/// SBOM and CodeQL fields stay flat to match the on-disk record layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbom_status: Option<FetchStatus>,
    /// Path of the stored SBOM document, relative to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbom_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbom_fetched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbom_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codeql_status: Option<FetchStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codeql_alert_count: Option<u64>,
    /// Alert count per lower-cased severity level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codeql_severity: Option<BTreeMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codeql_last_seen_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codeql_fetched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codeql_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vulnerability_summary: Option<VulnerabilitySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scorecard: Option<Scorecard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_summary: Option<DependencySummary>,
}

impl Enrichment {
    pub fn is_empty(&self) -> bool {
        self == &Enrichment::default()
    }
}
