use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use plughub::{
    config::{github_token, Config},
    github::{GithubApi, GithubClient},
    merge::{
        cleanup_store, enrich_store, ingest, load_document, load_scorecard_dir, top_document, CleanupReport,
    },
    output::{
        print_cleanup, print_ecosystems, print_enrich, print_merge, print_quota, print_refresh, print_top,
        EcosystemListing, OutputFormat,
    },
    pipeline::{Feature, Fetcher, QuotaGuard, RateLimiter, Runner},
    Ecosystem, Error, RecordStore,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit codes for schedulers
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
    /// The quota guard refused to start a run.
    pub const QUOTA: u8 = 3;
}

#[derive(Parser)]
#[command(name = "plughub")]
#[command(
    author,
    version,
    about = "Keep plugin catalogs enriched with GitHub data, a bounded batch at a time"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Record store directory (defaults to the configured data_dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, global = true, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh the stalest records of each ecosystem from GitHub
    Refresh {
        /// Ecosystems to refresh, comma separated (default: configured list)
        #[arg(short, long, value_delimiter = ',')]
        ecosystem: Vec<Ecosystem>,

        /// Records per ecosystem and run (0 = every due record)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Days after which a record is due again
        #[arg(long)]
        max_age_days: Option<i64>,

        /// Refresh every record and ignore the shared repository index
        #[arg(long)]
        force: bool,

        /// Only report what would be fetched
        #[arg(long)]
        offline: bool,

        /// Minimum spacing between API calls, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Repositories fetched in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        /// Data to collect, comma separated (stats, sbom, codeql)
        #[arg(long, value_delimiter = ',')]
        features: Vec<Feature>,

        /// Refuse to run when the quota cannot be queried
        #[arg(long)]
        fail_closed: bool,
    },

    /// Merge catalog dumps into an ecosystem's store
    Ingest {
        #[arg(short, long)]
        ecosystem: Ecosystem,

        /// Catalog dump as NAME=PATH, repeatable
        #[arg(short, long = "catalog", required = true, value_parser = parse_catalog)]
        catalogs: Vec<(String, PathBuf)>,
    },

    /// Recompute the top-N document of each ecosystem
    Rank {
        #[arg(short, long, value_delimiter = ',')]
        ecosystem: Vec<Ecosystem>,

        /// Size of the ranked document
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only rank records that already carry GitHub stats
        #[arg(long)]
        enriched_only: bool,

        /// Rows shown per ecosystem
        #[arg(long, default_value_t = 10)]
        preview: usize,
    },

    /// Fill missing enrichment from an analysis document or scorecard results
    Enrich {
        #[arg(short, long)]
        ecosystem: Ecosystem,

        /// JSON document with entries under `top100` or `plugins`
        #[arg(long, conflicts_with = "scorecard_dir", required_unless_present = "scorecard_dir")]
        document: Option<PathBuf>,

        /// Directory of OpenSSF Scorecard result files
        #[arg(long)]
        scorecard_dir: Option<PathBuf>,
    },

    /// Drop records with neither a repository nor enrichment
    Cleanup {
        #[arg(short, long, value_delimiter = ',')]
        ecosystem: Vec<Ecosystem>,
    },

    /// Show the remaining GitHub API quota
    Quota,

    /// List supported ecosystems and their stores
    ListEcosystems,

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

async fn run() -> Result<u8> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %Config::config_path().display(), error = %e, "ignoring unreadable config file");
            Config::default()
        }
    };
    let format = OutputFormat::from_str(&cli.format).map_err(|e| anyhow::anyhow!(e))?;
    let store = Arc::new(RecordStore::new(
        cli.data_dir.clone().unwrap_or_else(|| config.data_dir.clone()),
    ));

    match cli.command {
        Commands::Refresh {
            ecosystem,
            limit,
            max_age_days,
            force,
            offline,
            delay_ms,
            concurrency,
            features,
            fail_closed,
        } => {
            let mut options = config.run_options();
            if let Some(limit) = limit {
                options.limit = limit;
            }
            if let Some(days) = max_age_days {
                options.max_age = chrono::Duration::days(days.max(0));
            }
            if let Some(concurrency) = concurrency {
                options.concurrency = concurrency.max(1);
            }
            options.force = force;
            options.offline = offline;

            let limiter = match delay_ms {
                Some(ms) => RateLimiter::per_interval(Duration::from_millis(ms)),
                None => config.rate_limiter(),
            };
            let features = if features.is_empty() {
                config.features.clone()
            } else {
                features
            };
            let guard = QuotaGuard::new(config.quota_floor, fail_closed || config.fail_closed_quota);

            let client = GithubClient::new(github_token());
            if !client.is_authenticated() && !offline {
                warn!("no GH_TOKEN or GITHUB_TOKEN set; unauthenticated quota is 60 calls per hour");
            }
            let fetcher = Fetcher::new(Arc::new(client), Arc::new(limiter))
                .with_retry(config.retry_policy())
                .with_features(&features);
            let runner = Runner::new(store, fetcher, guard, options)?;

            let (explicit, ecosystems) = pick_ecosystems(ecosystem, &config);
            run_refresh(runner, explicit, ecosystems, format).await
        }
        Commands::Ingest { ecosystem, catalogs } => {
            let report = ingest(&store, ecosystem, &catalogs)?;
            print_merge(&report, format)?;
            if report.merged_sources.is_empty() {
                return Ok(exit_codes::ERROR);
            }
            Ok(exit_codes::SUCCESS)
        }
        Commands::Rank {
            ecosystem,
            limit,
            enriched_only,
            preview,
        } => {
            let limit = limit.unwrap_or(config.top_limit);
            let (explicit, ecosystems) = pick_ecosystems(ecosystem, &config);

            let mut documents = Vec::new();
            for ecosystem in ecosystems {
                let Some(mut records) = load_records(&store, ecosystem, explicit)? else {
                    continue;
                };
                let document = top_document(ecosystem, &mut records, limit, enriched_only);
                store.save(ecosystem, &records)?;
                store.save_top(&document)?;
                info!(%ecosystem, ranked = document.top100.len(), "wrote top document");
                documents.push(document);
            }
            print_top(&documents, format, preview)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::Enrich {
            ecosystem,
            document,
            scorecard_dir,
        } => {
            let entries = match (document, scorecard_dir) {
                (Some(path), _) => load_document(&path)?,
                (None, Some(dir)) => load_scorecard_dir(&dir)?,
                (None, None) => anyhow::bail!("either --document or --scorecard-dir is required"),
            };
            let report = enrich_store(&store, ecosystem, &entries)?;
            print_enrich(&report, format)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::Cleanup { ecosystem } => {
            let (explicit, ecosystems) = pick_ecosystems(ecosystem, &config);
            let mut reports: Vec<CleanupReport> = Vec::new();
            for ecosystem in ecosystems {
                match cleanup_store(&store, ecosystem) {
                    Ok(report) => reports.push(report),
                    Err(Error::StoreMissing(path)) if !explicit => {
                        info!(%ecosystem, path = %path.display(), "no store, skipping");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            print_cleanup(&reports, format)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::Quota => {
            let client = GithubClient::new(github_token());
            match client.rate_limit().await {
                Ok(quota) => {
                    print_quota(Some(&quota), format)?;
                    Ok(exit_codes::SUCCESS)
                }
                Err(e) => {
                    warn!(error = %e, "rate limit query failed");
                    print_quota(None, format)?;
                    Ok(exit_codes::ERROR)
                }
            }
        }
        Commands::ListEcosystems => {
            list_ecosystems(&store, format)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::Config { init, path } => {
            handle_config(init, path)?;
            Ok(exit_codes::SUCCESS)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Requested ecosystems, or the configured ones. The flag says whether the
/// user named them, in which case a missing store is an error.
fn pick_ecosystems(requested: Vec<Ecosystem>, config: &Config) -> (bool, Vec<Ecosystem>) {
    if requested.is_empty() {
        (false, config.ecosystems.clone())
    } else {
        let mut seen = HashSet::new();
        let unique = requested.into_iter().filter(|e| seen.insert(*e)).collect();
        (true, unique)
    }
}

fn load_records(
    store: &RecordStore,
    ecosystem: Ecosystem,
    explicit: bool,
) -> Result<Option<Vec<plughub::PluginRecord>>> {
    match store.load(ecosystem) {
        Ok(records) => Ok(Some(records)),
        Err(Error::StoreMissing(path)) if !explicit => {
            info!(%ecosystem, path = %path.display(), "no store, skipping");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_refresh(
    runner: Runner,
    explicit: bool,
    ecosystems: Vec<Ecosystem>,
    format: OutputFormat,
) -> Result<u8> {
    let offline = runner.options().offline;
    let progress = if format == OutputFormat::Table && !offline {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} repositories {msg}")?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let mut runner = match &progress {
        Some(pb) => {
            let pb = pb.clone();
            runner.with_progress(move |report| {
                pb.inc(1);
                pb.set_message(report.repo.full_name());
            })
        }
        None => runner,
    };

    let stop = runner.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing in-flight requests");
            stop.store(true, Ordering::SeqCst);
        }
    });
    let stop = runner.stop_handle();

    let mut summaries = Vec::new();
    let mut code = exit_codes::SUCCESS;
    for ecosystem in ecosystems {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if let Some(pb) = &progress {
            pb.set_message(format!("{}", ecosystem));
        }

        match runner.refresh(ecosystem).await {
            Ok(summary) => summaries.push(summary),
            Err(Error::StoreMissing(path)) if !explicit => {
                info!(%ecosystem, path = %path.display(), "no store, skipping");
            }
            Err(e) if e.is_quota() => {
                if let Some(pb) = &progress {
                    pb.suspend(|| eprintln!("Error: {}", e));
                } else {
                    eprintln!("Error: {}", e);
                }
                code = exit_codes::QUOTA;
                break;
            }
            Err(e) => {
                if let Some(pb) = progress {
                    pb.finish_and_clear();
                }
                return Err(e.into());
            }
        }
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    print_refresh(&summaries, format)?;
    Ok(code)
}

fn list_ecosystems(store: &RecordStore, format: OutputFormat) -> Result<()> {
    let listings: Vec<EcosystemListing> = Ecosystem::ALL
        .iter()
        .map(|&ecosystem| {
            let records = match store.load(ecosystem) {
                Ok(records) => Some(records),
                Err(Error::StoreMissing(_)) => None,
                Err(e) => {
                    warn!(%ecosystem, error = %e, "unreadable store");
                    None
                }
            };
            EcosystemListing {
                ecosystem,
                name: ecosystem.display_name(),
                records: records.as_ref().map(Vec::len),
                latest_fetch: records
                    .iter()
                    .flatten()
                    .filter_map(|r| r.github_data_fetched_at)
                    .max(),
            }
        })
        .collect();
    print_ecosystems(&listings, format)
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = Config::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        let config = Config::default();
        config.save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'plughub config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}

/// Parses a `NAME=PATH` catalog argument.
fn parse_catalog(raw: &str) -> std::result::Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
            Ok((name.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected NAME=PATH, got '{}'", raw)),
    }
}
