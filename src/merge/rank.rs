use chrono::Utc;
use std::collections::HashMap;
use tracing::debug;

use crate::model::{Ecosystem, PluginRecord};
use crate::store::TopDocument;

/// Default size of the ranked projection.
pub const DEFAULT_TOP_LIMIT: usize = 100;

/// Positions of the `limit` most downloaded records, most popular first.
///
/// Records without downloads never rank. Ties keep store order, so the
/// same input always ranks the same way. When several records point at
/// the same repository only the best placed one takes a slot; the others
/// are returned in `folded` next to the position they were folded into.
fn ranked_positions(
    records: &[PluginRecord],
    limit: usize,
    eligible: impl Fn(&PluginRecord) -> bool,
) -> (Vec<usize>, Vec<(usize, usize)>) {
    let mut order: Vec<usize> = (0..records.len())
        .filter(|i| records[*i].downloads > 0 && eligible(&records[*i]))
        .collect();
    // sort_by is stable.
    order.sort_by(|a, b| records[*b].downloads.cmp(&records[*a].downloads));

    let mut ranked = Vec::new();
    let mut folded = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    for position in order {
        if ranked.len() == limit {
            break;
        }
        let key = records[position].dedup_key();
        match seen.get(&key) {
            Some(winner) => folded.push((position, *winner)),
            None => {
                seen.insert(key, position);
                ranked.push(position);
            }
        }
    }
    (ranked, folded)
}

/// Recomputes `isTop100` on every record and returns the ranked subset.
///
/// Flags are rebuilt from scratch: a record outside the subset is always
/// cleared, whatever it said before.
pub fn rank(records: &mut [PluginRecord], limit: usize) -> Vec<PluginRecord> {
    rank_where(records, limit, |_| true)
}

/// Like [`rank`], but only records with GitHub stats can take a slot.
pub fn rank_enriched(records: &mut [PluginRecord], limit: usize) -> Vec<PluginRecord> {
    rank_where(records, limit, |record| record.github_stats.is_some())
}

fn rank_where(
    records: &mut [PluginRecord],
    limit: usize,
    eligible: impl Fn(&PluginRecord) -> bool,
) -> Vec<PluginRecord> {
    let (ranked, folded) = ranked_positions(records, limit, eligible);
    let folded_count = folded.len();

    for record in records.iter_mut() {
        record.is_top100 = false;
    }
    for position in &ranked {
        records[*position].is_top100 = true;
    }

    let mut top: Vec<PluginRecord> = ranked.iter().map(|p| records[*p].clone()).collect();
    let slot: HashMap<usize, usize> = ranked.iter().enumerate().map(|(slot, p)| (*p, slot)).collect();
    for (duplicate, winner) in folded {
        if let Some(slot) = slot.get(&winner) {
            for source in &records[duplicate].sources {
                top[*slot].add_source(source.clone());
            }
        }
    }

    debug!(ranked = top.len(), folded = folded_count, "ranked records");
    top
}

/// Ranks an ecosystem's collection into its top-N document.
pub fn top_document(
    ecosystem: Ecosystem,
    records: &mut [PluginRecord],
    limit: usize,
    enriched_only: bool,
) -> TopDocument {
    let top100 = if enriched_only {
        rank_enriched(records, limit)
    } else {
        rank(records, limit)
    };
    TopDocument {
        platform: ecosystem,
        generated_at: Utc::now(),
        total_plugins: records.len(),
        top100,
    }
}
