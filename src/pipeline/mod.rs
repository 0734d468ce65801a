//! Incremental enrichment: decide what is stale, gate on quota, fetch
//! through a shared rate limiter and fold the results back into the store.
//!
//! ```text
//! select() ──► QuotaGuard::check ──► Fetcher::fetch (worker pool) ──► apply() ──► RecordStore::save
//! ```
//!
//! [`Runner`] wires the pieces together; each piece is usable on its own.

mod fetcher;
mod limiter;
mod quota;
mod retry;
mod runner;
mod scheduler;

pub use fetcher::{apply, CodeqlOutcome, Feature, FetchReport, Fetcher, SbomOutcome};
pub use limiter::RateLimiter;
pub use quota::QuotaGuard;
pub use retry::RetryPolicy;
pub use runner::{RunOptions, RunSummary, Runner, StatusCounts};
pub use scheduler::{select, Schedule, ScheduleSummary};
