//! Configuration file handling.
//!
//! This module provides loading and saving of plughub configuration
//! from a TOML file. Command-line flags override every value.
//!
//! # Configuration Location
//!
//! The configuration file is stored at:
//! - Linux: `~/.config/plughub/config.toml`
//! - macOS: `~/Library/Application Support/plughub/config.toml`
//! - Windows: `%APPDATA%\plughub\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! data_dir = "./data"
//! batch_limit = 150
//! max_age_days = 7
//! request_delay_ms = 50
//! concurrency = 4
//! quota_floor = 100
//! fail_closed_quota = false
//! features = ["stats", "sbom", "codeql"]
//! ecosystems = ["vscode", "obsidian"]
//! ```
//!
//! The GitHub token is never stored here; it is read from `GH_TOKEN` or
//! `GITHUB_TOKEN`.

use anyhow::Result;
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::Ecosystem;
use crate::pipeline::{Feature, QuotaGuard, RateLimiter, RetryPolicy, RunOptions};

/// Environment variables consulted for the GitHub token, in order.
pub const TOKEN_VARS: [&str; 2] = ["GH_TOKEN", "GITHUB_TOKEN"];

/// Application configuration.
///
/// # Example
///
/// ```no_run
/// use plughub::Config;
///
/// // Load from file (or use defaults if file doesn't exist)
/// let config = Config::load().unwrap();
///
/// println!("Data directory: {}", config.data_dir.display());
/// println!("Batch limit: {}", config.batch_limit);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the record store.
    ///
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// Records refreshed per ecosystem and run; 0 refreshes every due record.
    ///
    /// Default: 150
    pub batch_limit: usize,

    /// Age after which a fetched record is due again.
    ///
    /// Default: 7 days
    pub max_age_days: i64,

    /// Minimum spacing between upstream calls, in milliseconds.
    ///
    /// Default: 50
    pub request_delay_ms: u64,

    /// Repositories fetched in parallel.
    ///
    /// Default: 4
    pub concurrency: usize,

    /// A run does not start with fewer API calls left than this.
    ///
    /// Default: 100
    pub quota_floor: u64,

    /// Estimated upstream calls per record, used to warn when the
    /// remaining quota cannot cover a batch.
    ///
    /// Default: 3
    pub calls_per_record: u64,

    /// Attempts per call when rate limited.
    ///
    /// Default: 3
    pub max_retries: u32,

    /// First backoff delay, doubled on each retry.
    ///
    /// Default: 4000
    pub retry_base_ms: u64,

    /// Upper bound for any backoff delay, including server hints.
    ///
    /// Default: 900
    pub max_backoff_secs: u64,

    /// Refuse to run when the quota endpoint cannot be reached.
    ///
    /// Default: false (the run proceeds with a warning)
    pub fail_closed_quota: bool,

    /// Size of the ranked top-N document.
    ///
    /// Default: 100
    pub top_limit: usize,

    /// Upstream data collected by `refresh`.
    ///
    /// Default: all features
    pub features: Vec<Feature>,

    /// Ecosystems processed when no `--ecosystem` flag is given.
    ///
    /// Default: all ecosystems
    pub ecosystems: Vec<Ecosystem>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            batch_limit: 150,
            max_age_days: 7,
            request_delay_ms: 50,
            concurrency: 4,
            quota_floor: 100,
            calls_per_record: 3,
            max_retries: 3,
            retry_base_ms: 4000,
            max_backoff_secs: 900,
            fail_closed_quota: false,
            top_limit: 100,
            features: Feature::ALL.to_vec(),
            ecosystems: Ecosystem::ALL.to_vec(),
        }
    }
}

impl Config {
    /// Loads configuration from the config file.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves the configuration to the config file.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("plughub")
            .join("config.toml")
    }

    /// Generates a string containing the default configuration.
    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            max_age: ChronoDuration::days(self.max_age_days.max(0)),
            limit: self.batch_limit,
            force: false,
            offline: false,
            concurrency: self.concurrency.max(1),
            calls_per_record: self.calls_per_record,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_ms),
            Duration::from_secs(self.max_backoff_secs),
        )
    }

    pub fn quota_guard(&self) -> QuotaGuard {
        QuotaGuard::new(self.quota_floor, self.fail_closed_quota)
    }

    /// Limiter spacing calls `request_delay_ms` apart; a zero delay
    /// disables pacing.
    pub fn rate_limiter(&self) -> RateLimiter {
        if self.request_delay_ms == 0 {
            RateLimiter::unlimited()
        } else {
            RateLimiter::per_interval(Duration::from_millis(self.request_delay_ms))
        }
    }
}

/// GitHub token from the environment, ignoring blank values.
pub fn github_token() -> Option<String> {
    token_from(|name| std::env::var(name).ok())
}

fn token_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    TOKEN_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.batch_limit, 150);
        assert_eq!(config.max_age_days, 7);
        assert_eq!(config.quota_floor, 100);
        assert!(!config.fail_closed_quota);
        assert_eq!(config.features, Feature::ALL.to_vec());
        assert_eq!(config.ecosystems.len(), Ecosystem::ALL.len());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            batch_limit = 20
            features = ["stats"]
            ecosystems = ["obsidian", "vscode"]
            "#,
        )
        .unwrap();

        assert_eq!(config.batch_limit, 20);
        assert_eq!(config.features, vec![Feature::Stats]);
        assert_eq!(config.ecosystems, vec![Ecosystem::Obsidian, Ecosystem::Vscode]);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.retry_base_ms, 4000);
    }

    #[test]
    fn test_default_config_round_trips() {
        let text = Config::generate_default_config();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_derived_settings() {
        let config = Config {
            max_age_days: 3,
            concurrency: 0,
            max_retries: 5,
            retry_base_ms: 10,
            max_backoff_secs: 2,
            request_delay_ms: 0,
            ..Default::default()
        };

        let options = config.run_options();
        assert_eq!(options.max_age, ChronoDuration::days(3));
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.limit, 150);

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.base_delay, Duration::from_millis(10));
        assert_eq!(retry.max_delay, Duration::from_secs(2));

        assert_eq!(config.rate_limiter().interval(), Duration::ZERO);
        assert_eq!(config.quota_guard().floor, 100);
    }

    #[test]
    fn test_token_precedence() {
        let env: HashMap<&str, &str> = [("GH_TOKEN", "  "), ("GITHUB_TOKEN", "ghp_fallback")].into();
        let token = token_from(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(token.as_deref(), Some("ghp_fallback"));

        let env: HashMap<&str, &str> = [("GH_TOKEN", "gho_first"), ("GITHUB_TOKEN", "ghp_fallback")].into();
        let token = token_from(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(token.as_deref(), Some("gho_first"));

        assert_eq!(token_from(|_| None), None);
    }
}
