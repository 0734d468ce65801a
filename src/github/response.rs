use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{ApiError, CodeqlSummary, Quota};
use crate::model::GithubStats;

/// Maps an HTTP status plus rate-limit headers onto the error taxonomy.
///
/// `Ok(())` means the body is worth parsing.
pub fn classify(status: StatusCode, headers: &HeaderMap, now: DateTime<Utc>) -> Result<(), ApiError> {
    if status.is_success() {
        return Ok(());
    }

    let code = status.as_u16();
    let retry_after = header_u64(headers, "retry-after").map(Duration::from_secs);
    let remaining = header_u64(headers, "x-ratelimit-remaining");
    let until_reset = header_u64(headers, "x-ratelimit-reset")
        .and_then(|epoch| Utc.timestamp_opt(epoch as i64, 0).single())
        .map(|reset| (reset - now).to_std().unwrap_or(Duration::ZERO));

    match code {
        404 => Err(ApiError::NotFound),
        429 => Err(ApiError::RateLimited {
            retry_after: retry_after.or(until_reset),
            message: "HTTP 429".to_string(),
        }),
        403 if remaining == Some(0) => Err(ApiError::RateLimited {
            retry_after: retry_after.or(until_reset),
            message: "HTTP 403 with no remaining quota".to_string(),
        }),
        // Secondary rate limits answer 403 with a retry-after hint.
        403 if retry_after.is_some() => Err(ApiError::RateLimited {
            retry_after,
            message: "HTTP 403 secondary rate limit".to_string(),
        }),
        401 | 403 => Err(ApiError::Forbidden(format!("HTTP {}", code))),
        _ => Err(ApiError::Unexpected(format!("HTTP {}", code))),
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn parse_json<'a, T: Deserialize<'a>>(body: &'a str, what: &str) -> Result<T, ApiError> {
    serde_json::from_str(body)
        .map_err(|e| ApiError::Unexpected(format!("Failed to parse {} JSON: {}", what, e)))
}

#[derive(Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Deserialize)]
struct RateLimitResources {
    core: RateLimitCore,
}

#[derive(Deserialize)]
struct RateLimitCore {
    limit: u64,
    remaining: u64,
    #[serde(default)]
    used: u64,
    reset: i64,
}

pub fn parse_rate_limit(body: &str) -> Result<Quota, ApiError> {
    let response: RateLimitResponse = parse_json(body, "rate limit")?;
    let core = response.resources.core;
    let reset_at = Utc
        .timestamp_opt(core.reset, 0)
        .single()
        .ok_or_else(|| ApiError::Unexpected(format!("invalid reset timestamp {}", core.reset)))?;

    Ok(Quota {
        limit: core.limit,
        remaining: core.remaining,
        used: core.used,
        reset_at,
    })
}

#[derive(Deserialize)]
struct RepoResponse {
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    open_issues_count: u64,
    #[serde(default)]
    watchers_count: u64,
    license: Option<LicenseResponse>,
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    disabled: bool,
    created_at: Option<DateTime<Utc>>,
    pushed_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    homepage: Option<String>,
    description: Option<String>,
    default_branch: Option<String>,
}

#[derive(Deserialize)]
struct LicenseResponse {
    name: Option<String>,
}

pub fn parse_repo_stats(body: &str) -> Result<GithubStats, ApiError> {
    let repo: RepoResponse = parse_json(body, "repository")?;

    Ok(GithubStats {
        stars: Some(repo.stargazers_count),
        forks: Some(repo.forks_count),
        open_issues: Some(repo.open_issues_count),
        watchers: Some(repo.watchers_count),
        license: repo.license.and_then(|l| l.name),
        language: repo.language,
        topics: repo.topics,
        size: Some(repo.size),
        archived: repo.archived,
        disabled: repo.disabled,
        created_at: repo.created_at,
        last_updated: repo.pushed_at.or(repo.updated_at),
        homepage: repo.homepage.filter(|h| !h.is_empty()),
        description: repo.description,
        default_branch: repo.default_branch,
    })
}

/// Unwraps the dependency-graph envelope (`{"sbom": {...}}`) when present.
pub fn parse_sbom(body: &str) -> Result<Value, ApiError> {
    let mut parsed: Value = parse_json(body, "SBOM")?;
    match parsed.get_mut("sbom").map(Value::take) {
        Some(inner) if !inner.is_null() => Ok(inner),
        _ => Ok(parsed),
    }
}

#[derive(Deserialize)]
struct AlertResponse {
    rule: Option<AlertRule>,
    most_recent_instance: Option<AlertInstance>,
    created_at: Option<String>,
}

#[derive(Deserialize)]
struct AlertRule {
    severity: Option<String>,
    security_severity_level: Option<String>,
}

#[derive(Deserialize)]
struct AlertInstance {
    last_seen_at: Option<String>,
}

pub fn parse_code_scanning(body: &str) -> Result<CodeqlSummary, ApiError> {
    let alerts: Vec<AlertResponse> = parse_json(body, "code scanning")?;

    let mut severity: BTreeMap<String, u64> = BTreeMap::new();
    let mut last_seen_at: Option<String> = None;

    for alert in &alerts {
        let level = alert
            .rule
            .as_ref()
            .and_then(|r| r.severity.clone().or_else(|| r.security_severity_level.clone()))
            .unwrap_or_else(|| "unknown".to_string())
            .to_lowercase();
        *severity.entry(level).or_insert(0) += 1;

        let seen = alert
            .most_recent_instance
            .as_ref()
            .and_then(|i| i.last_seen_at.clone())
            .or_else(|| alert.created_at.clone());
        // ISO-8601 timestamps order lexicographically.
        if let Some(seen) = seen {
            if last_seen_at.as_ref().map_or(true, |current| &seen > current) {
                last_seen_at = Some(seen);
            }
        }
    }

    Ok(CodeqlSummary {
        alert_count: alerts.len() as u64,
        severity,
        last_seen_at,
    })
}
