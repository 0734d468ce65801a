use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::debug;

use super::response::{classify, parse_code_scanning, parse_rate_limit, parse_repo_stats, parse_sbom};
use super::{ApiError, CodeqlSummary, GithubApi, Quota};
use crate::model::GithubStats;
use crate::repo::RepoRef;

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("plughub/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// GitHub REST client.
///
/// Unauthenticated use works but is limited to 60 requests per hour; the
/// SBOM and code-scanning endpoints generally require a token.
pub struct GithubClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Points the client at another API root, e.g. a GitHub Enterprise host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    async fn get(&self, path: &str) -> Result<String, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        classify(response.status(), response.headers(), Utc::now())?;
        Ok(response.text().await?)
    }
}

impl Default for GithubClient {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl GithubApi for GithubClient {
    fn name(&self) -> &'static str {
        "GitHub REST"
    }

    async fn rate_limit(&self) -> Result<Quota, ApiError> {
        let body = self.get("/rate_limit").await?;
        parse_rate_limit(&body)
    }

    async fn repo_stats(&self, repo: &RepoRef) -> Result<GithubStats, ApiError> {
        let body = self.get(&format!("/repos/{}/{}", repo.owner, repo.name)).await?;
        parse_repo_stats(&body)
    }

    async fn sbom(&self, repo: &RepoRef) -> Result<serde_json::Value, ApiError> {
        let body = self
            .get(&format!("/repos/{}/{}/dependency-graph/sbom", repo.owner, repo.name))
            .await?;
        parse_sbom(&body)
    }

    async fn code_scanning(&self, repo: &RepoRef) -> Result<CodeqlSummary, ApiError> {
        let body = self
            .get(&format!(
                "/repos/{}/{}/code-scanning/alerts?tool_name=CodeQL&per_page=100",
                repo.owner, repo.name
            ))
            .await?;
        parse_code_scanning(&body)
    }
}
