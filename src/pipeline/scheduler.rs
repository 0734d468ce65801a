use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::model::PluginRecord;

/// Staleness bookkeeping for one scheduling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSummary {
    pub total: usize,
    pub never_fetched: usize,
    pub outdated: usize,
    pub up_to_date: usize,
    /// Records without an upstream repository; never scheduled.
    pub no_repo: usize,
    pub selected: usize,
}

/// Ordered refresh candidates, as indices into the scheduled slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub candidates: Vec<usize>,
    pub summary: ScheduleSummary,
}

/// Picks the records due for refresh.
///
/// Never-fetched records come first in store order, followed by records
/// whose last fetch is older than `max_age`, most stale first. The result
/// is truncated to `limit`; a limit of 0 means no bound. With `force`
/// every record that has a repository counts as outdated.
pub fn select(
    records: &[PluginRecord],
    now: DateTime<Utc>,
    max_age: Duration,
    limit: usize,
    force: bool,
) -> Schedule {
    let mut summary = ScheduleSummary {
        total: records.len(),
        ..Default::default()
    };
    let mut never_fetched = Vec::new();
    let mut outdated: Vec<(usize, Duration)> = Vec::new();

    for (index, record) in records.iter().enumerate() {
        if record.repo_ref().is_none() {
            summary.no_repo += 1;
            continue;
        }
        match record.fetch_age(now) {
            None => never_fetched.push(index),
            Some(age) if force || age > max_age => outdated.push((index, age)),
            Some(_) => summary.up_to_date += 1,
        }
    }

    summary.never_fetched = never_fetched.len();
    summary.outdated = outdated.len();

    // Stable, so equally old records keep store order.
    outdated.sort_by(|a, b| b.1.cmp(&a.1));

    let mut candidates = never_fetched;
    candidates.extend(outdated.into_iter().map(|(index, _)| index));
    if limit > 0 {
        candidates.truncate(limit);
    }
    summary.selected = candidates.len();

    Schedule { candidates, summary }
}
