use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use super::{RateLimiter, RetryPolicy};
use crate::github::{ApiError, CodeqlSummary, GithubApi};
use crate::model::{FetchStatus, GithubStats, PluginRecord};
use crate::repo::RepoRef;
use crate::store::{CodeqlIndexEntry, RepoIndex};

/// One kind of upstream data the fetcher can collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Stats,
    Sbom,
    Codeql,
}

impl Feature {
    pub const ALL: [Feature; 3] = [Feature::Stats, Feature::Sbom, Feature::Codeql];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Stats => "stats",
            Feature::Sbom => "sbom",
            Feature::Codeql => "codeql",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stats" | "github" => Ok(Feature::Stats),
            "sbom" => Ok(Feature::Sbom),
            "codeql" | "code-scanning" => Ok(Feature::Codeql),
            _ => Err(format!("Unknown feature: {}. Valid: stats, sbom, codeql", s)),
        }
    }
}

/// Result of the SBOM step for one repository.
#[derive(Debug, Clone, PartialEq)]
pub enum SbomOutcome {
    /// Freshly downloaded, not yet written to disk.
    Fetched(Value),
    /// Freshly downloaded and stored at `path`.
    Stored { path: String },
    /// Reused from the repository index.
    Cached { path: String, fetched_at: DateTime<Utc> },
    Failed(ApiError),
}

impl SbomOutcome {
    pub fn status(&self) -> FetchStatus {
        match self {
            SbomOutcome::Fetched(_) | SbomOutcome::Stored { .. } => FetchStatus::Ok,
            SbomOutcome::Cached { .. } => FetchStatus::Cached,
            SbomOutcome::Failed(e) => e.status(),
        }
    }
}

/// Result of the CodeQL step for one repository.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeqlOutcome {
    Fetched(CodeqlSummary),
    Cached(CodeqlIndexEntry),
    Failed(ApiError),
}

impl CodeqlOutcome {
    pub fn status(&self) -> FetchStatus {
        match self {
            CodeqlOutcome::Fetched(_) => FetchStatus::Ok,
            CodeqlOutcome::Cached(_) => FetchStatus::Cached,
            CodeqlOutcome::Failed(e) => e.status(),
        }
    }
}

/// Everything learned about one repository in one pass. Produced by
/// [`Fetcher::fetch`], applied to records by [`apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    pub repo: RepoRef,
    pub stats: Option<Result<GithubStats, ApiError>>,
    pub sbom: Option<SbomOutcome>,
    pub codeql: Option<CodeqlOutcome>,
    /// Wall-clock time the last call for this repository finished.
    pub completed_at: DateTime<Utc>,
}

impl FetchReport {
    pub fn new(repo: RepoRef) -> Self {
        Self {
            repo,
            stats: None,
            sbom: None,
            codeql: None,
            completed_at: Utc::now(),
        }
    }

    pub fn stats_status(&self) -> Option<FetchStatus> {
        self.stats.as_ref().map(|r| match r {
            Ok(_) => FetchStatus::Ok,
            Err(e) => e.status(),
        })
    }

    pub fn sbom_status(&self) -> Option<FetchStatus> {
        self.sbom.as_ref().map(SbomOutcome::status)
    }

    pub fn codeql_status(&self) -> Option<FetchStatus> {
        self.codeql.as_ref().map(CodeqlOutcome::status)
    }

    pub fn is_rate_limited(&self) -> bool {
        [self.stats_status(), self.sbom_status(), self.codeql_status()]
            .contains(&Some(FetchStatus::RateLimited))
    }
}

/// Network side of the pipeline: runs the selected features for one
/// repository through the shared limiter and retry policy.
pub struct Fetcher {
    api: Arc<dyn GithubApi>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    features: Vec<Feature>,
    reuse_index: bool,
    codeql_max_age: Duration,
    sbom_exists: Option<SbomCheck>,
}

type SbomCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

impl Fetcher {
    pub fn new(api: Arc<dyn GithubApi>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            api,
            limiter,
            retry: RetryPolicy::default(),
            features: Feature::ALL.to_vec(),
            reuse_index: true,
            codeql_max_age: Duration::days(7),
            sbom_exists: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_features(mut self, features: &[Feature]) -> Self {
        let mut features = features.to_vec();
        features.sort();
        features.dedup();
        self.features = features;
        self
    }

    /// Disables reuse of earlier SBOM and CodeQL outcomes from the index.
    pub fn with_index_reuse(mut self, reuse: bool) -> Self {
        self.reuse_index = reuse;
        self
    }

    pub fn with_codeql_max_age(mut self, max_age: Duration) -> Self {
        self.codeql_max_age = max_age;
        self
    }

    /// Tells whether a stored SBOM path still resolves to a file. Without
    /// it every `ok` index entry with a path is reused.
    pub fn with_sbom_check(mut self, exists: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.sbom_exists = Some(Arc::new(exists));
        self
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn api(&self) -> &dyn GithubApi {
        self.api.as_ref()
    }

    /// Fetches every enabled feature for `repo`.
    ///
    /// Never fails as a whole: each feature's error is classified and kept
    /// in the report. `index` is consulted for reusable SBOM and CodeQL
    /// results but not modified.
    pub async fn fetch(&self, repo: &RepoRef, index: &RepoIndex) -> FetchReport {
        let mut report = FetchReport::new(repo.clone());
        let key = repo.key();

        for feature in &self.features {
            match feature {
                Feature::Stats => {
                    let result = self
                        .retry
                        .run(&self.limiter, "stats", || self.api.repo_stats(repo))
                        .await;
                    report.stats = Some(result);
                }
                Feature::Sbom => {
                    let reusable = index
                        .reusable_sbom(&key)
                        .filter(|_| self.reuse_index)
                        .and_then(|entry| entry.path.clone().map(|path| (path, entry.fetched_at)))
                        .filter(|(path, _)| self.sbom_exists.as_ref().is_none_or(|exists| exists(path)));

                    report.sbom = Some(match reusable {
                        Some((path, fetched_at)) => SbomOutcome::Cached { path, fetched_at },
                        None => match self.retry.run(&self.limiter, "sbom", || self.api.sbom(repo)).await {
                            Ok(document) => SbomOutcome::Fetched(document),
                            Err(e) => SbomOutcome::Failed(e),
                        },
                    });
                }
                Feature::Codeql => {
                    let reusable = index
                        .fresh_codeql(&key, Utc::now(), self.codeql_max_age)
                        .filter(|_| self.reuse_index)
                        .cloned();

                    report.codeql = Some(match reusable {
                        Some(entry) => CodeqlOutcome::Cached(entry),
                        None => {
                            match self
                                .retry
                                .run(&self.limiter, "codeql", || self.api.code_scanning(repo))
                                .await
                            {
                                Ok(summary) => CodeqlOutcome::Fetched(summary),
                                Err(e) => CodeqlOutcome::Failed(e),
                            }
                        }
                    });
                }
            }
        }

        report.completed_at = Utc::now();
        debug!(
            repo = %repo,
            stats = ?report.stats_status(),
            sbom = ?report.sbom_status(),
            codeql = ?report.codeql_status(),
            "fetched"
        );
        report
    }
}

/// Folds a report into a record.
///
/// The fetch timestamp always advances, whatever the outcome. A failed
/// stats call keeps the previous stats but flags them through
/// `githubStatus`/`githubError`; a failed SBOM or CodeQL call clears that
/// feature's payload. Features absent from the report are left alone.
pub fn apply(record: &mut PluginRecord, report: &FetchReport) {
    let at = report.completed_at;
    record.mark_fetched(at);

    if let Some(stats) = &report.stats {
        match stats {
            Ok(stats) => {
                if record.ecosystem.stars_as_downloads() {
                    if let Some(stars) = stats.stars {
                        record.downloads = stars;
                    }
                }
                record.github_stats = Some(stats.clone());
                record.github_status = Some(FetchStatus::Ok);
                record.github_error = None;
            }
            Err(e) => {
                record.github_status = Some(e.status());
                record.github_error = Some(e.to_string());
            }
        }
    }

    let enrichment = &mut record.enrichment;

    if let Some(sbom) = &report.sbom {
        enrichment.sbom_status = Some(sbom.status());
        match sbom {
            SbomOutcome::Fetched(_) => {
                // Not persisted; nothing to point at.
                enrichment.sbom_path = None;
                enrichment.sbom_fetched_at = Some(at);
                enrichment.sbom_error = None;
            }
            SbomOutcome::Stored { path } => {
                enrichment.sbom_path = Some(path.clone());
                enrichment.sbom_fetched_at = Some(at);
                enrichment.sbom_error = None;
            }
            SbomOutcome::Cached { path, fetched_at } => {
                enrichment.sbom_path = Some(path.clone());
                enrichment.sbom_fetched_at = Some(*fetched_at);
                enrichment.sbom_error = None;
            }
            SbomOutcome::Failed(e) => {
                enrichment.sbom_path = None;
                enrichment.sbom_fetched_at = Some(at);
                enrichment.sbom_error = Some(e.to_string());
            }
        }
    }

    if let Some(codeql) = &report.codeql {
        match codeql {
            CodeqlOutcome::Fetched(summary) => {
                enrichment.codeql_status = Some(FetchStatus::Ok);
                enrichment.codeql_alert_count = Some(summary.alert_count);
                enrichment.codeql_severity = Some(summary.severity.clone());
                enrichment.codeql_last_seen_at = summary.last_seen_at.clone();
                enrichment.codeql_fetched_at = Some(at);
                enrichment.codeql_error = None;
            }
            CodeqlOutcome::Cached(entry) => {
                // A reused failure stays a failure.
                enrichment.codeql_status = Some(if entry.status.is_success() {
                    FetchStatus::Cached
                } else {
                    entry.status
                });
                enrichment.codeql_alert_count = entry.alert_count;
                enrichment.codeql_severity = entry.severity.clone();
                enrichment.codeql_last_seen_at = entry.last_seen_at.clone();
                enrichment.codeql_fetched_at = Some(entry.fetched_at);
                if entry.status.is_success() {
                    enrichment.codeql_error = None;
                }
            }
            CodeqlOutcome::Failed(e) => {
                enrichment.codeql_status = Some(e.status());
                enrichment.codeql_alert_count = None;
                enrichment.codeql_severity = None;
                enrichment.codeql_last_seen_at = None;
                enrichment.codeql_fetched_at = Some(at);
                enrichment.codeql_error = Some(e.to_string());
            }
        }
    }
}
