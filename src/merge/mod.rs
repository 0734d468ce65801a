//! Whole-store passes that run independently of the fetch pipeline.
//!
//! - [`merge_catalogs`] / [`ingest`]: fold fresh catalog dumps onto the
//!   stored collection, one entry per upstream repository.
//! - [`rank`] / [`top_document`]: recompute the top-N projection.
//! - [`apply_entries`] / [`enrich_store`]: fold analysis documents in, filling only what is
//!   missing (see [`FillMissing`]).
//! - [`cleanup`]: drop records that can never be enriched.

mod cleanup;
mod enrich;
mod fill;
mod rank;
mod sources;

pub use cleanup::{cleanup, cleanup_store, is_retained, CleanupReport};
pub use enrich::{
    apply_entries, enrich_store, load_document, load_scorecard_dir, scorecard_entry, EnrichReport, EnrichStats,
    EnrichmentEntry,
};
pub use fill::FillMissing;
pub use rank::{rank, rank_enriched, top_document, DEFAULT_TOP_LIMIT};
pub use sources::{ingest, merge_catalogs, Catalog, MergeReport, MergeStats};
