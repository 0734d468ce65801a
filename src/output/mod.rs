mod cli;
mod json;

pub use cli::{
    render_cleanup, render_ecosystems, render_enrich, render_merge, render_quota, render_refresh, render_top,
};
pub use json::print_json;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::github::Quota;
use crate::merge::{CleanupReport, EnrichReport, MergeReport};
use crate::model::Ecosystem;
use crate::pipeline::RunSummary;
use crate::store::TopDocument;

/// Output format for command summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable tables
    Table,
    /// JSON for programmatic use
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}. Use 'table' or 'json'", s)),
        }
    }
}

/// One line of `list-ecosystems`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EcosystemListing {
    pub ecosystem: Ecosystem,
    pub name: &'static str,
    /// Records in the store, `None` when the ecosystem has no store yet.
    pub records: Option<usize>,
    /// Most recent GitHub fetch across the records.
    pub latest_fetch: Option<DateTime<Utc>>,
}

/// JSON shape of a ranking pass; the full document lives on disk.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RankSummary {
    ecosystem: Ecosystem,
    total_plugins: usize,
    ranked: usize,
    generated_at: DateTime<Utc>,
    top: Vec<String>,
}

pub fn print_refresh(summaries: &[RunSummary], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_refresh(summaries));
            Ok(())
        }
        OutputFormat::Json => print_json(summaries),
    }
}

pub fn print_merge(report: &MergeReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_merge(report));
            Ok(())
        }
        OutputFormat::Json => print_json(report),
    }
}

pub fn print_enrich(report: &EnrichReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_enrich(report));
            Ok(())
        }
        OutputFormat::Json => print_json(report),
    }
}

pub fn print_cleanup(reports: &[CleanupReport], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_cleanup(reports));
            Ok(())
        }
        OutputFormat::Json => print_json(reports),
    }
}

/// Prints ranked documents; `preview` caps the rows shown per ecosystem.
pub fn print_top(documents: &[TopDocument], format: OutputFormat, preview: usize) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_top(documents, preview));
            Ok(())
        }
        OutputFormat::Json => {
            let summaries: Vec<RankSummary> = documents
                .iter()
                .map(|doc| RankSummary {
                    ecosystem: doc.platform,
                    total_plugins: doc.total_plugins,
                    ranked: doc.top100.len(),
                    generated_at: doc.generated_at,
                    top: doc.top100.iter().take(preview).map(|r| r.id.clone()).collect(),
                })
                .collect();
            print_json(&summaries)
        }
    }
}

pub fn print_quota(quota: Option<&Quota>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_quota(quota));
            Ok(())
        }
        OutputFormat::Json => print_json(&quota),
    }
}

pub fn print_ecosystems(listings: &[EcosystemListing], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_ecosystems(listings));
            Ok(())
        }
        OutputFormat::Json => print_json(listings),
    }
}
