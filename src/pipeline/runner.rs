use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::fetcher::{apply, CodeqlOutcome, FetchReport, Fetcher, SbomOutcome};
use super::scheduler::{select, ScheduleSummary};
use super::QuotaGuard;
use crate::error::Result;
use crate::github::{ApiError, Quota};
use crate::model::{Ecosystem, FetchStatus};
use crate::repo::RepoRef;
use crate::store::{CodeqlIndexEntry, RecordStore, RepoIndex, SbomIndexEntry};

/// Knobs of one incremental refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub max_age: Duration,
    /// Batch size; 0 means every due record.
    pub limit: usize,
    /// Ignore staleness and index reuse.
    pub force: bool,
    /// Schedule only: no network calls, no writes.
    pub offline: bool,
    pub concurrency: usize,
    /// Expected upstream calls per record, for the low-quota warning.
    pub calls_per_record: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_age: Duration::days(7),
            limit: 150,
            force: false,
            offline: false,
            concurrency: 4,
            calls_per_record: 3,
        }
    }
}

/// Per-status tally for one feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub fetched: usize,
    pub cached: usize,
    pub not_found: usize,
    pub rate_limited: usize,
    pub forbidden: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: FetchStatus) {
        match status {
            FetchStatus::Ok => self.fetched += 1,
            FetchStatus::Cached => self.cached += 1,
            FetchStatus::NotFound => self.not_found += 1,
            FetchStatus::RateLimited => self.rate_limited += 1,
            FetchStatus::Forbidden => self.forbidden += 1,
            // No network call is made without a repository, and the
            // scheduler never selects such records.
            FetchStatus::NoRepo => {}
            FetchStatus::Error => self.error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.fetched + self.cached + self.not_found + self.rate_limited + self.forbidden + self.error
    }
}

/// Outcome of [`Runner::refresh`] for one ecosystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub ecosystem: Ecosystem,
    pub schedule: ScheduleSummary,
    /// Records updated and persisted.
    pub processed: usize,
    /// Distinct repositories the updated records point at.
    pub repos: usize,
    pub stats: StatusCounts,
    pub sbom: StatusCounts,
    pub codeql: StatusCounts,
    pub dry_run: bool,
    /// The stop flag was raised before every candidate was fetched.
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_before: Option<Quota>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_after: Option<Quota>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl RunSummary {
    fn new(ecosystem: Ecosystem, schedule: ScheduleSummary) -> Self {
        Self {
            ecosystem,
            schedule,
            processed: 0,
            repos: 0,
            stats: StatusCounts::default(),
            sbom: StatusCounts::default(),
            codeql: StatusCounts::default(),
            dry_run: false,
            stopped: false,
            quota_before: None,
            quota_after: None,
            revision: None,
        }
    }

    /// Feature calls still rate limited after all retries.
    pub fn rate_limited(&self) -> usize {
        self.stats.rate_limited + self.sbom.rate_limited + self.codeql.rate_limited
    }
}

type ProgressFn = Arc<dyn Fn(&FetchReport) + Send + Sync>;

/// Drives scheduler, quota guard, fetch workers and store for each
/// ecosystem in turn.
///
/// Fetch results are kept for the lifetime of the runner, so a repository
/// listed by several ecosystems is fetched once per process.
pub struct Runner {
    store: Arc<RecordStore>,
    fetcher: Fetcher,
    guard: QuotaGuard,
    options: RunOptions,
    index: RepoIndex,
    reports: HashMap<String, FetchReport>,
    stop: Arc<AtomicBool>,
    progress: Option<ProgressFn>,
}

impl Runner {
    pub fn new(store: Arc<RecordStore>, fetcher: Fetcher, guard: QuotaGuard, options: RunOptions) -> Result<Self> {
        let index = RepoIndex::load(store.index_path())?;
        let sboms = store.clone();
        let fetcher = fetcher
            .with_index_reuse(!options.force)
            .with_codeql_max_age(options.max_age)
            .with_sbom_check(move |path| sboms.sbom_exists(path));

        Ok(Self {
            store,
            fetcher,
            guard,
            options,
            index,
            reports: HashMap::new(),
            stop: Arc::new(AtomicBool::new(false)),
            progress: None,
        })
    }

    /// Called after every repository fetch completes.
    pub fn with_progress(mut self, progress: impl Fn(&FetchReport) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Flag that, once raised, stops new fetches from starting. Records
    /// already fetched are still saved.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Refreshes the due records of one ecosystem.
    ///
    /// # Errors
    ///
    /// Fails without touching any record when the store cannot be read or
    /// the quota guard trips. Individual fetch failures are recorded on the
    /// records, not returned.
    pub async fn refresh(&mut self, ecosystem: Ecosystem) -> Result<RunSummary> {
        let mut records = self.store.load(ecosystem)?;
        let schedule = select(
            &records,
            Utc::now(),
            self.options.max_age,
            self.options.limit,
            self.options.force,
        );
        let mut summary = RunSummary::new(ecosystem, schedule.summary);
        info!(
            %ecosystem,
            total = schedule.summary.total,
            never_fetched = schedule.summary.never_fetched,
            outdated = schedule.summary.outdated,
            selected = schedule.summary.selected,
            "scheduled refresh"
        );

        if self.options.offline {
            summary.dry_run = true;
            return Ok(summary);
        }
        if schedule.candidates.is_empty() {
            return Ok(summary);
        }

        summary.quota_before = self.guard.check(self.fetcher.api()).await?;
        if let Some(quota) = &summary.quota_before {
            let planned = schedule.candidates.len() as u64 * self.options.calls_per_record;
            self.guard.warn_if_short(quota, planned);
        }

        // One fetch per repository, in scheduler order.
        let mut groups: Vec<(RepoRef, Vec<usize>)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for index in schedule.candidates {
            let Some(repo) = records[index].repo_ref() else {
                continue;
            };
            match positions.get(&repo.key()) {
                Some(position) => groups[*position].1.push(index),
                None => {
                    positions.insert(repo.key(), groups.len());
                    groups.push((repo, vec![index]));
                }
            }
        }

        let pending: Vec<RepoRef> = groups
            .iter()
            .filter(|(repo, _)| !self.reports.contains_key(&repo.key()))
            .map(|(repo, _)| repo.clone())
            .collect();

        let fetched = self.fetch_all(pending).await;
        summary.stopped = self.stop.load(Ordering::SeqCst);

        for report in fetched {
            let report = self.persist(report);
            self.reports.insert(report.repo.key(), report);
        }

        for (repo, indices) in &groups {
            let Some(report) = self.reports.get(&repo.key()) else {
                continue;
            };
            summary.repos += 1;
            for index in indices {
                apply(&mut records[*index], report);
                summary.processed += 1;
                if let Some(status) = report.stats_status() {
                    summary.stats.record(status);
                }
                if let Some(status) = report.sbom_status() {
                    summary.sbom.record(status);
                }
                if let Some(status) = report.codeql_status() {
                    summary.codeql.record(status);
                }
            }
        }

        if summary.processed > 0 {
            summary.revision = Some(self.store.save(ecosystem, &records)?);
        }
        self.index.save()?;
        summary.quota_after = self.guard.report(self.fetcher.api()).await;

        info!(
            %ecosystem,
            processed = summary.processed,
            repos = summary.repos,
            rate_limited = summary.rate_limited(),
            stopped = summary.stopped,
            "refresh complete"
        );
        Ok(summary)
    }

    async fn fetch_all(&self, pending: Vec<RepoRef>) -> Vec<FetchReport> {
        let fetcher = &self.fetcher;
        let index = &self.index;
        let stop = &self.stop;
        let progress = self.progress.as_ref();

        stream::iter(pending)
            .map(|repo| async move {
                if stop.load(Ordering::SeqCst) {
                    return None;
                }
                let report = fetcher.fetch(&repo, index).await;
                if let Some(progress) = progress {
                    progress(&report);
                }
                Some(report)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .filter_map(|report| async move { report })
            .collect()
            .await
    }

    /// Writes a fresh SBOM to disk and records the outcome in the index.
    fn persist(&mut self, mut report: FetchReport) -> FetchReport {
        let key = report.repo.key();
        let at = report.completed_at;

        if let Some(SbomOutcome::Fetched(document)) = &report.sbom {
            report.sbom = Some(match self.store.write_sbom(&report.repo, document) {
                Ok(path) => SbomOutcome::Stored { path },
                Err(e) => {
                    warn!(repo = %report.repo, error = %e, "could not store SBOM");
                    SbomOutcome::Failed(ApiError::Unexpected(format!("could not store SBOM: {}", e)))
                }
            });
        }

        match &report.sbom {
            Some(SbomOutcome::Stored { path }) => self.index.record_sbom(
                &key,
                SbomIndexEntry {
                    status: FetchStatus::Ok,
                    path: Some(path.clone()),
                    fetched_at: at,
                },
            ),
            Some(SbomOutcome::Failed(e)) if !e.is_rate_limited() => self.index.record_sbom(
                &key,
                SbomIndexEntry {
                    status: e.status(),
                    path: None,
                    fetched_at: at,
                },
            ),
            _ => {}
        }

        match &report.codeql {
            Some(CodeqlOutcome::Fetched(summary)) => self.index.record_codeql(
                &key,
                CodeqlIndexEntry {
                    status: FetchStatus::Ok,
                    alert_count: Some(summary.alert_count),
                    severity: Some(summary.severity.clone()),
                    last_seen_at: summary.last_seen_at.clone(),
                    fetched_at: at,
                },
            ),
            Some(CodeqlOutcome::Failed(e)) if !e.is_rate_limited() => self.index.record_codeql(
                &key,
                CodeqlIndexEntry {
                    status: e.status(),
                    alert_count: None,
                    severity: None,
                    last_seen_at: None,
                    fetched_at: at,
                },
            ),
            _ => {}
        }

        report
    }
}
