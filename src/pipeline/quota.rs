use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::github::{GithubApi, Quota};

/// Pre-run check against the remaining API budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaGuard {
    /// Minimum remaining calls required to start a batch.
    pub floor: u64,
    /// Refuse to run when the quota cannot be queried.
    pub fail_closed: bool,
}

impl Default for QuotaGuard {
    fn default() -> Self {
        Self {
            floor: 100,
            fail_closed: false,
        }
    }
}

impl QuotaGuard {
    pub fn new(floor: u64, fail_closed: bool) -> Self {
        Self { floor, fail_closed }
    }

    /// Queries the quota before a batch.
    ///
    /// Returns `Ok(None)` when the quota could not be read and the guard
    /// fails open.
    ///
    /// # Errors
    ///
    /// [`Error::QuotaExhausted`] when fewer than `floor` calls remain, and
    /// [`Error::QuotaUnavailable`] when the query failed in fail-closed mode.
    pub async fn check(&self, api: &dyn GithubApi) -> Result<Option<Quota>> {
        match api.rate_limit().await {
            Ok(quota) if quota.remaining < self.floor => Err(Error::QuotaExhausted {
                remaining: quota.remaining,
                floor: self.floor,
                reset_at: quota.reset_at,
            }),
            Ok(quota) => {
                info!(
                    remaining = quota.remaining,
                    limit = quota.limit,
                    reset_at = %quota.reset_at,
                    "API quota"
                );
                Ok(Some(quota))
            }
            Err(e) if self.fail_closed => Err(Error::QuotaUnavailable(e.to_string())),
            Err(e) => {
                warn!(error = %e, "could not query API quota, proceeding without gating");
                Ok(None)
            }
        }
    }

    /// Post-run quota readout. Reported, never enforced.
    pub async fn report(&self, api: &dyn GithubApi) -> Option<Quota> {
        match api.rate_limit().await {
            Ok(quota) => {
                info!(remaining = quota.remaining, reset_at = %quota.reset_at, "API quota after run");
                Some(quota)
            }
            Err(e) => {
                warn!(error = %e, "could not query API quota after run");
                None
            }
        }
    }

    /// Warns when the planned batch likely needs more calls than remain.
    /// Returns true when it warned.
    pub fn warn_if_short(&self, quota: &Quota, planned_calls: u64) -> bool {
        if quota.remaining >= planned_calls {
            return false;
        }
        warn!(
            remaining = quota.remaining,
            planned_calls,
            reset_at = %quota.reset_at,
            "remaining quota may not cover this batch"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{ApiError, CodeqlSummary};
    use crate::model::GithubStats;
    use crate::repo::RepoRef;
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixedQuota(std::result::Result<u64, ApiError>);

    #[async_trait]
    impl GithubApi for FixedQuota {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn rate_limit(&self) -> std::result::Result<Quota, ApiError> {
            self.0.clone().map(|remaining| Quota {
                limit: 5000,
                remaining,
                used: 5000 - remaining,
                reset_at: Utc::now(),
            })
        }

        async fn repo_stats(&self, _: &RepoRef) -> std::result::Result<GithubStats, ApiError> {
            Err(ApiError::NotFound)
        }

        async fn sbom(&self, _: &RepoRef) -> std::result::Result<serde_json::Value, ApiError> {
            Err(ApiError::NotFound)
        }

        async fn code_scanning(&self, _: &RepoRef) -> std::result::Result<CodeqlSummary, ApiError> {
            Err(ApiError::NotFound)
        }
    }

    #[tokio::test]
    async fn test_enough_quota() {
        let quota = QuotaGuard::default().check(&FixedQuota(Ok(4000))).await.unwrap();
        assert_eq!(quota.map(|q| q.remaining), Some(4000));
    }

    #[tokio::test]
    async fn test_below_floor_trips() {
        let err = QuotaGuard::default().check(&FixedQuota(Ok(99))).await.unwrap_err();
        assert!(matches!(err, Error::QuotaExhausted { remaining: 99, floor: 100, .. }));
        assert!(err.is_quota());
    }

    #[tokio::test]
    async fn test_query_failure_fails_open_by_default() {
        let api = FixedQuota(Err(ApiError::Transport("dns".into())));
        assert!(QuotaGuard::default().check(&api).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_failure_fails_closed_when_asked() {
        let api = FixedQuota(Err(ApiError::Transport("dns".into())));
        let err = QuotaGuard::new(100, true).check(&api).await.unwrap_err();
        assert!(matches!(err, Error::QuotaUnavailable(_)));
    }

    #[test]
    fn test_warn_if_short() {
        let quota = Quota {
            limit: 5000,
            remaining: 300,
            used: 4700,
            reset_at: Utc::now(),
        };
        let guard = QuotaGuard::default();
        assert!(guard.warn_if_short(&quota, 450));
        assert!(!guard.warn_if_short(&quota, 300));
    }
}
