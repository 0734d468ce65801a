use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::model::{Ecosystem, PluginRecord};
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub ecosystem: Ecosystem,
    pub before: usize,
    pub removed: usize,
    pub after: usize,
}

/// A record is worth keeping while it can still be enriched or already is.
pub fn is_retained(record: &PluginRecord) -> bool {
    record.repo_ref().is_some() || record.has_enrichment()
}

/// Drops records with neither a resolvable repository nor any enrichment.
/// Returns the number removed.
pub fn cleanup(records: &mut Vec<PluginRecord>) -> usize {
    let before = records.len();
    records.retain(is_retained);
    before - records.len()
}

/// Cleans one ecosystem's stored collection. The store is only rewritten
/// when something was removed.
pub fn cleanup_store(store: &RecordStore, ecosystem: Ecosystem) -> Result<CleanupReport> {
    let mut records = store.load(ecosystem)?;
    let before = records.len();
    let removed = cleanup(&mut records);
    if removed > 0 {
        store.save(ecosystem, &records)?;
    }
    info!(%ecosystem, before, removed, "cleanup");

    Ok(CleanupReport {
        ecosystem,
        before,
        removed,
        after: records.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FetchStatus, GithubStats};
    use tempfile::TempDir;

    fn samples() -> Vec<PluginRecord> {
        let mut with_stats = PluginRecord::new(Ecosystem::Sublime, "stats-only");
        with_stats.github_stats = Some(GithubStats::default());

        let mut with_sbom = PluginRecord::new(Ecosystem::Sublime, "sbom-only");
        with_sbom.enrichment.sbom_status = Some(FetchStatus::NotFound);

        vec![
            PluginRecord::new(Ecosystem::Sublime, "with-repo").with_repo("acme/x"),
            PluginRecord::new(Ecosystem::Sublime, "bare"),
            with_stats,
            with_sbom,
        ]
    }

    #[test]
    fn test_cleanup_drops_bare_records() {
        let mut records = samples();
        assert_eq!(cleanup(&mut records), 1);
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["sublime-with-repo", "sublime-stats-only", "sublime-sbom-only"]);

        // Nothing left to drop.
        assert_eq!(cleanup(&mut records), 0);
    }

    #[test]
    fn test_cleanup_store() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        store.save(Ecosystem::Sublime, &samples()).unwrap();

        let report = cleanup_store(&store, Ecosystem::Sublime).unwrap();
        assert_eq!((report.before, report.removed, report.after), (4, 1, 3));
        assert_eq!(store.load(Ecosystem::Sublime).unwrap().len(), 3);
        assert_eq!(store.revision(Ecosystem::Sublime), 2);

        let again = cleanup_store(&store, Ecosystem::Sublime).unwrap();
        assert_eq!(again.removed, 0);
        assert_eq!(store.revision(Ecosystem::Sublime), 2);
    }
}
