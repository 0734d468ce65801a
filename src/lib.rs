//! Incremental GitHub enrichment for plugin and extension catalogs.
//!
//! Records listed by marketplace catalogs are kept per ecosystem in a
//! [`RecordStore`]. The [`pipeline`] refreshes the stalest of them against
//! the GitHub API within a bounded budget, and the [`merge`] passes fold
//! catalog dumps and analysis documents in and rank the result.

pub mod config;
pub mod error;
pub mod github;
pub mod merge;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod repo;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{Ecosystem, FetchStatus, PluginRecord};
pub use store::RecordStore;
