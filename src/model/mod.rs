//! Core data types for plugin records and their enrichment payloads.
//!
//! This module contains the fundamental types used throughout plughub:
//!
//! - [`PluginRecord`] - One catalog-listed plugin, extension or mod
//! - [`Ecosystem`] - The platform whose catalog listed the record
//! - [`GithubStats`] - Repository statistics fetched from GitHub
//! - [`Enrichment`] - SBOM, CodeQL, vulnerability and scorecard payloads
//! - [`FetchStatus`] - Outcome category of an enrichment fetch
//!
//! # Example
//!
//! ```
//! use plughub::{Ecosystem, PluginRecord};
//!
//! let record = PluginRecord::new(Ecosystem::Obsidian, "dataview")
//!     .with_repo("https://github.com/blacksmithgu/obsidian-dataview.git")
//!     .with_downloads(2_000_000);
//!
//! assert_eq!(record.id, "obsidian-dataview");
//! assert_eq!(record.repo.as_deref(), Some("blacksmithgu/obsidian-dataview"));
//! ```

mod ecosystem;
mod enrichment;
mod record;

pub use ecosystem::*;
pub use enrichment::*;
pub use record::*;
