//! Fill-only-missing merging over the typed enrichment schema.
//!
//! A value is *vacant* when it carries no information: `None`, an empty
//! list or map, or a struct equal to its default. Merging adopts the
//! source wherever the target is vacant, recurses where both sides are
//! populated maps or structs, and otherwise keeps the target. Applying the
//! same source twice therefore changes nothing the second time.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::model::{
    DependencySummary, Enrichment, FetchStatus, GithubStats, Scorecard, VulnerabilitySummary,
};

pub trait FillMissing: Clone {
    fn is_vacant(&self) -> bool {
        false
    }

    /// Copies whatever `source` has and `self` lacks. Returns the number
    /// of values adopted.
    fn fill_missing(&mut self, source: &Self) -> usize;
}

/// Replaces a vacant `target` with a populated `source`.
fn adopt<T: FillMissing>(target: &mut T, source: &T) -> usize {
    if source.is_vacant() {
        return 0;
    }
    *target = source.clone();
    1
}

macro_rules! fill_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FillMissing for $ty {
                fn fill_missing(&mut self, _source: &Self) -> usize {
                    0
                }
            }
        )*
    };
}

fill_scalar!(bool, u64, f64, String, DateTime<Utc>, FetchStatus);

impl<T: FillMissing> FillMissing for Option<T> {
    fn is_vacant(&self) -> bool {
        self.as_ref().map_or(true, FillMissing::is_vacant)
    }

    fn fill_missing(&mut self, source: &Self) -> usize {
        let Some(source) = source else {
            return 0;
        };
        match self {
            Some(target) => target.fill_missing(source),
            None if source.is_vacant() => 0,
            None => {
                *self = Some(source.clone());
                1
            }
        }
    }
}

/// Lists are atomic: an empty target takes the whole source list.
impl<T: Clone> FillMissing for Vec<T> {
    fn is_vacant(&self) -> bool {
        self.is_empty()
    }

    fn fill_missing(&mut self, source: &Self) -> usize {
        if self.is_empty() && !source.is_empty() {
            *self = source.clone();
            1
        } else {
            0
        }
    }
}

impl<V: FillMissing> FillMissing for BTreeMap<String, V> {
    fn is_vacant(&self) -> bool {
        self.is_empty()
    }

    fn fill_missing(&mut self, source: &Self) -> usize {
        if self.is_empty() {
            return adopt(self, source);
        }
        let mut added = 0;
        for (key, value) in source {
            match self.get_mut(key) {
                Some(current) => added += current.fill_missing(value),
                None => {
                    self.insert(key.clone(), value.clone());
                    added += 1;
                }
            }
        }
        added
    }
}

macro_rules! fill_struct {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl FillMissing for $ty {
            fn is_vacant(&self) -> bool {
                *self == <$ty>::default()
            }

            fn fill_missing(&mut self, source: &Self) -> usize {
                if self.is_vacant() {
                    return adopt(self, source);
                }
                0 $(+ self.$field.fill_missing(&source.$field))*
            }
        }
    };
}

fill_struct!(GithubStats {
    stars,
    forks,
    open_issues,
    watchers,
    license,
    language,
    topics,
    size,
    archived,
    disabled,
    created_at,
    last_updated,
    homepage,
    description,
    default_branch,
});

fill_struct!(VulnerabilitySummary {
    total,
    unique,
    critical,
    high,
    medium,
    low,
    stale_packages,
    recent_vulns,
});

fill_struct!(Scorecard {
    score,
    checks,
    check_scores,
    scorecard_version,
    scan_date,
});

fill_struct!(DependencySummary {
    sbom_package_count,
    sbom_dependency_count,
    ecosystems,
});

fill_struct!(Enrichment {
    sbom_status,
    sbom_path,
    sbom_fetched_at,
    sbom_error,
    codeql_status,
    codeql_alert_count,
    codeql_severity,
    codeql_last_seen_at,
    codeql_fetched_at,
    codeql_error,
    vulnerability_summary,
    scorecard,
    dependency_summary,
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScorecardCheck;

    fn populated_source() -> Enrichment {
        Enrichment {
            sbom_status: Some(FetchStatus::Ok),
            sbom_path: Some("sbom/acme__widget.sbom.json".into()),
            vulnerability_summary: Some(VulnerabilitySummary {
                total: Some(4),
                critical: Some(1),
                high: Some(3),
                ..Default::default()
            }),
            scorecard: Some(Scorecard {
                score: Some(6.1),
                checks: vec![ScorecardCheck {
                    name: "Maintained".into(),
                    score: Some(10.0),
                    reason: None,
                }],
                check_scores: BTreeMap::from([("Maintained".to_string(), Some(10.0))]),
                scorecard_version: Some("v5.0.0".into()),
                scan_date: Some("2025-01-01".into()),
            }),
            dependency_summary: Some(DependencySummary {
                sbom_package_count: Some(120),
                sbom_dependency_count: Some(300),
                ecosystems: vec!["npm".into()],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_fills_empty_target() {
        let mut target = Enrichment::default();
        let added = target.fill_missing(&populated_source());
        assert_eq!(added, 1);
        assert_eq!(target, populated_source());
    }

    #[test]
    fn test_is_idempotent() {
        let mut target = Enrichment {
            codeql_alert_count: Some(2),
            ..Default::default()
        };
        let source = populated_source();

        let first = target.fill_missing(&source);
        let once = target.clone();
        let second = target.fill_missing(&source);

        assert!(first > 0);
        assert_eq!(second, 0);
        assert_eq!(target, once);
    }

    #[test]
    fn test_never_overwrites_populated_fields() {
        let mut target = Enrichment {
            sbom_status: Some(FetchStatus::NotFound),
            vulnerability_summary: Some(VulnerabilitySummary {
                total: Some(9),
                ..Default::default()
            }),
            scorecard: Some(Scorecard {
                score: Some(2.0),
                ..Default::default()
            }),
            ..Default::default()
        };

        target.fill_missing(&populated_source());

        assert_eq!(target.sbom_status, Some(FetchStatus::NotFound));
        let vulns = target.vulnerability_summary.as_ref().unwrap();
        assert_eq!(vulns.total, Some(9));
        // Gaps inside a populated object are filled.
        assert_eq!(vulns.critical, Some(1));
        let scorecard = target.scorecard.as_ref().unwrap();
        assert_eq!(scorecard.score, Some(2.0));
        assert_eq!(scorecard.checks.len(), 1);
        assert_eq!(scorecard.scorecard_version.as_deref(), Some("v5.0.0"));
    }

    #[test]
    fn test_map_merges_per_key() {
        let mut target = BTreeMap::from([("high".to_string(), 2u64)]);
        let source = BTreeMap::from([("high".to_string(), 5u64), ("low".to_string(), 1u64)]);

        assert_eq!(target.fill_missing(&source), 1);
        assert_eq!(target.get("high"), Some(&2));
        assert_eq!(target.get("low"), Some(&1));
    }

    #[test]
    fn test_lists_are_atomic() {
        let mut empty: Vec<String> = vec![];
        assert_eq!(empty.fill_missing(&vec!["a".into(), "b".into()]), 1);
        assert_eq!(empty, vec!["a", "b"]);

        let mut populated: Vec<String> = vec!["x".into()];
        assert_eq!(populated.fill_missing(&vec!["a".into()]), 0);
        assert_eq!(populated, vec!["x"]);
    }

    #[test]
    fn test_vacant_source_adds_nothing() {
        let mut target: Option<GithubStats> = None;
        assert_eq!(target.fill_missing(&Some(GithubStats::default())), 0);
        assert!(target.is_none());

        let mut target = Enrichment::default();
        assert_eq!(target.fill_missing(&Enrichment::default()), 0);
    }

    #[test]
    fn test_github_stats_fill_gaps_only() {
        let mut target = Some(GithubStats {
            stars: Some(10),
            ..Default::default()
        });
        let source = Some(GithubStats {
            stars: Some(999),
            license: Some("MIT".into()),
            topics: vec!["cli".into()],
            ..Default::default()
        });

        assert_eq!(target.fill_missing(&source), 2);
        let stats = target.unwrap();
        assert_eq!(stats.stars, Some(10));
        assert_eq!(stats.license.as_deref(), Some("MIT"));
        assert_eq!(stats.topics, vec!["cli"]);
    }

    #[test]
    fn test_missing_counters_are_filled() {
        let mut target = Some(GithubStats {
            license: Some("MIT".into()),
            forks: Some(0),
            ..Default::default()
        });
        let source = Some(GithubStats {
            stars: Some(120),
            forks: Some(8),
            watchers: Some(0),
            ..Default::default()
        });

        assert_eq!(target.fill_missing(&source), 2);
        let stats = target.unwrap();
        assert_eq!(stats.stars, Some(120));
        assert_eq!(stats.forks, Some(0));
        assert_eq!(stats.watchers, Some(0));
        assert_eq!(stats.open_issues, None);
    }
}
