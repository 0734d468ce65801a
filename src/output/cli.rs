use tabled::{settings::Style, Table, Tabled};

use super::EcosystemListing;
use crate::github::Quota;
use crate::merge::{CleanupReport, EnrichReport, EnrichStats, MergeReport};
use crate::pipeline::{RunSummary, StatusCounts};
use crate::store::TopDocument;

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Feature")]
    feature: &'static str,
    #[tabled(rename = "Fetched")]
    fetched: usize,
    #[tabled(rename = "Cached")]
    cached: usize,
    #[tabled(rename = "Not Found")]
    not_found: usize,
    #[tabled(rename = "Rate Limited")]
    rate_limited: usize,
    #[tabled(rename = "Forbidden")]
    forbidden: usize,
    #[tabled(rename = "Error")]
    error: usize,
}

impl StatusRow {
    fn new(feature: &'static str, counts: &StatusCounts) -> Self {
        Self {
            feature,
            fetched: counts.fetched,
            cached: counts.cached,
            not_found: counts.not_found,
            rate_limited: counts.rate_limited,
            forbidden: counts.forbidden,
            error: counts.error,
        }
    }
}

#[derive(Tabled)]
struct TopRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Downloads")]
    downloads: u64,
    #[tabled(rename = "Stars")]
    stars: String,
    #[tabled(rename = "Repository")]
    repo: String,
}

#[derive(Tabled)]
struct EcosystemRow {
    #[tabled(rename = "Ecosystem")]
    id: &'static str,
    #[tabled(rename = "Name")]
    name: &'static str,
    #[tabled(rename = "Records")]
    records: String,
    #[tabled(rename = "Latest Fetch")]
    latest_fetch: String,
}

#[derive(Tabled)]
struct CleanupRow {
    #[tabled(rename = "Ecosystem")]
    ecosystem: String,
    #[tabled(rename = "Before")]
    before: usize,
    #[tabled(rename = "Removed")]
    removed: usize,
    #[tabled(rename = "After")]
    after: usize,
}

#[derive(Tabled)]
struct MatchRow {
    #[tabled(rename = "Target")]
    target: &'static str,
    #[tabled(rename = "Matched")]
    matched: usize,
    #[tabled(rename = "Missing")]
    missing: usize,
    #[tabled(rename = "Values Added")]
    added: usize,
}

impl MatchRow {
    fn new(target: &'static str, stats: &EnrichStats) -> Self {
        Self {
            target,
            matched: stats.matched,
            missing: stats.missing,
            added: stats.added,
        }
    }
}

pub fn render_refresh(summaries: &[RunSummary]) -> String {
    if summaries.is_empty() {
        return "No ecosystems refreshed.".to_string();
    }

    let mut out = Vec::new();
    for summary in summaries {
        let schedule = &summary.schedule;
        let mode = if summary.dry_run { " (dry run)" } else { "" };
        out.push(format!("{}{}", summary.ecosystem, mode));
        out.push(format!(
            "  {} records: {} never fetched, {} outdated, {} up to date, {} without repository",
            schedule.total, schedule.never_fetched, schedule.outdated, schedule.up_to_date, schedule.no_repo
        ));
        out.push(format!(
            "  {} selected, {} updated across {} repositories",
            schedule.selected, summary.processed, summary.repos
        ));

        if summary.processed > 0 {
            let rows = vec![
                StatusRow::new("stats", &summary.stats),
                StatusRow::new("sbom", &summary.sbom),
                StatusRow::new("codeql", &summary.codeql),
            ];
            out.push(Table::new(rows).with(Style::rounded()).to_string());
        }

        if summary.stopped {
            out.push("  Interrupted: remaining records are left for the next run.".to_string());
        }
        if summary.rate_limited() > 0 {
            out.push(format!(
                "  {} calls were still rate limited after retries.",
                summary.rate_limited()
            ));
        }
        if let Some(quota) = summary.quota_after.or(summary.quota_before) {
            out.push(format!(
                "  Quota: {}/{} remaining, resets {}",
                quota.remaining,
                quota.limit,
                quota.reset_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        out.push(String::new());
    }
    out.join("\n").trim_end().to_string()
}

pub fn render_merge(report: &MergeReport) -> String {
    let mut out = Vec::new();
    let ecosystem = report
        .ecosystem
        .map(|e| e.to_string())
        .unwrap_or_else(|| "-".to_string());

    if report.merged_sources.is_empty() {
        out.push(format!("{}: no catalog could be read, store left untouched.", ecosystem));
    } else {
        let stats = &report.stats;
        out.push(format!("{}: merged {}", ecosystem, report.merged_sources.join(", ")));
        out.push(format!(
            "  {} ingested, {} folded, {} added, {} updated, {} kept, {} total",
            stats.ingested, stats.folded, stats.added, stats.updated, stats.kept, stats.total
        ));
    }
    for (name, reason) in &report.failed_sources {
        out.push(format!("  skipped {}: {}", name, reason));
    }
    out.join("\n")
}

pub fn render_enrich(report: &EnrichReport) -> String {
    let mut rows = vec![MatchRow::new("plugins", &report.records)];
    if let Some(top) = &report.top {
        rows.push(MatchRow::new("top", top));
    }

    format!(
        "{}: {} entries\n{}",
        report.ecosystem,
        report.entries,
        Table::new(rows).with(Style::rounded())
    )
}

pub fn render_cleanup(reports: &[CleanupReport]) -> String {
    if reports.is_empty() {
        return "Nothing to clean.".to_string();
    }
    let rows: Vec<CleanupRow> = reports
        .iter()
        .map(|r| CleanupRow {
            ecosystem: r.ecosystem.to_string(),
            before: r.before,
            removed: r.removed,
            after: r.after,
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn render_top(documents: &[TopDocument], preview: usize) -> String {
    let mut out = Vec::new();
    for doc in documents {
        out.push(format!(
            "{}: top {} of {} records",
            doc.platform,
            doc.top100.len(),
            doc.total_plugins
        ));
        if doc.top100.is_empty() || preview == 0 {
            continue;
        }

        let rows: Vec<TopRow> = doc
            .top100
            .iter()
            .take(preview)
            .enumerate()
            .map(|(i, r)| TopRow {
                rank: i + 1,
                id: truncate(&r.id, 45),
                downloads: r.downloads,
                stars: r
                    .github_stats
                    .as_ref()
                    .and_then(|s| s.stars)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                repo: r.repo.clone().unwrap_or_else(|| "-".to_string()),
            })
            .collect();
        out.push(Table::new(rows).with(Style::rounded()).to_string());
    }
    out.join("\n")
}

pub fn render_quota(quota: Option<&Quota>) -> String {
    match quota {
        Some(q) => format!(
            "{}/{} calls remaining ({} used), resets at {}",
            q.remaining,
            q.limit,
            q.used,
            q.reset_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => "Quota unavailable.".to_string(),
    }
}

pub fn render_ecosystems(listings: &[EcosystemListing]) -> String {
    let rows: Vec<EcosystemRow> = listings
        .iter()
        .map(|l| EcosystemRow {
            id: l.ecosystem.as_str(),
            name: l.name,
            records: l.records.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
            latest_fetch: l
                .latest_fetch
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string()),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::MergeStats;
    use crate::model::{Ecosystem, PluginRecord};
    use chrono::Utc;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_render_merge_lists_failures() {
        let report = MergeReport {
            ecosystem: Some(Ecosystem::Minecraft),
            merged_sources: vec!["modrinth".into()],
            failed_sources: vec![("curseforge".into(), "missing file".into())],
            stats: MergeStats {
                ingested: 3,
                total: 2,
                ..Default::default()
            },
            revision: Some(1),
        };

        let text = render_merge(&report);
        assert!(text.contains("minecraft: merged modrinth"));
        assert!(text.contains("skipped curseforge: missing file"));
    }

    #[test]
    fn test_render_top_preview() {
        let doc = TopDocument {
            platform: Ecosystem::Obsidian,
            generated_at: Utc::now(),
            total_plugins: 3,
            top100: vec![
                PluginRecord::new(Ecosystem::Obsidian, "dataview").with_downloads(10),
                PluginRecord::new(Ecosystem::Obsidian, "calendar").with_downloads(5),
            ],
        };

        let text = render_top(&[doc], 1);
        assert!(text.contains("obsidian: top 2 of 3 records"));
        assert!(text.contains("obsidian-dataview"));
        assert!(!text.contains("obsidian-calendar"));
    }

    #[test]
    fn test_render_quota_unavailable() {
        assert_eq!(render_quota(None), "Quota unavailable.");
    }
}
