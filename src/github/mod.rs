//! Read-only access to the GitHub endpoints the pipeline consumes.
//!
//! The [`GithubApi`] trait is the seam between the pipeline and the
//! network: [`GithubClient`] talks to api.github.com, tests plug in
//! in-memory fakes.
//!
//! | Call | Endpoint |
//! |------|----------|
//! | [`GithubApi::rate_limit`] | `GET /rate_limit` |
//! | [`GithubApi::repo_stats`] | `GET /repos/{owner}/{repo}` |
//! | [`GithubApi::sbom`] | `GET /repos/{owner}/{repo}/dependency-graph/sbom` |
//! | [`GithubApi::code_scanning`] | `GET /repos/{owner}/{repo}/code-scanning/alerts` |

mod client;
mod response;

pub use client::GithubClient;
pub use response::{
    classify, parse_code_scanning, parse_rate_limit, parse_repo_stats, parse_sbom,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::model::{FetchStatus, GithubStats};
use crate::repo::RepoRef;

/// Failure of a single upstream call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Not found (404)")]
    NotFound,

    /// Primary or secondary rate limit hit. `retry_after` carries the
    /// server's hint when it sent one.
    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Unexpected response: {0}")]
    Unexpected(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ApiError {
    pub fn status(&self) -> FetchStatus {
        match self {
            ApiError::NotFound => FetchStatus::NotFound,
            ApiError::RateLimited { .. } => FetchStatus::RateLimited,
            ApiError::Forbidden(_) => FetchStatus::Forbidden,
            ApiError::Unexpected(_) | ApiError::Transport(_) => FetchStatus::Error,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}

/// Core API budget as reported by `/rate_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub limit: u64,
    pub remaining: u64,
    pub used: u64,
    pub reset_at: DateTime<Utc>,
}

/// Summary of a repository's CodeQL alerts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeqlSummary {
    pub alert_count: u64,
    /// Alert count per lower-cased severity.
    pub severity: BTreeMap<String, u64>,
    pub last_seen_at: Option<String>,
}

#[async_trait]
pub trait GithubApi: Send + Sync {
    /// Human-readable name of this backend, used in logs.
    fn name(&self) -> &'static str;

    async fn rate_limit(&self) -> Result<Quota, ApiError>;

    async fn repo_stats(&self, repo: &RepoRef) -> Result<GithubStats, ApiError>;

    /// Raw SPDX document from the dependency graph.
    async fn sbom(&self, repo: &RepoRef) -> Result<serde_json::Value, ApiError>;

    async fn code_scanning(&self, repo: &RepoRef) -> Result<CodeqlSummary, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ApiError::NotFound.status(), FetchStatus::NotFound);
        assert_eq!(
            ApiError::RateLimited {
                retry_after: None,
                message: "429".into()
            }
            .status(),
            FetchStatus::RateLimited
        );
        assert_eq!(ApiError::Forbidden("403".into()).status(), FetchStatus::Forbidden);
        assert_eq!(ApiError::Unexpected("HTTP 500".into()).status(), FetchStatus::Error);
        assert_eq!(ApiError::Transport("reset".into()).status(), FetchStatus::Error);
    }
}
