//! Ranked, length-capped rollups.
//!
//! Every ranking is a stable sort over first-seen order, so entries with
//! exactly equal cost (or timestamp) keep the order they appeared in the input.
//! Entries past the cap are dropped silently.

use std::collections::HashMap;

use crate::models::{
    ActorCost, ActorIdentity, DatasetCost, Pricing, QuerySummary, RawQueryRecord, SLOT_MS_PER_HOUR,
    TableAttribution, TableCost, round2,
};

/// Fractional byte sums become whole bytes only at output.
fn whole_bytes(bytes: f64) -> u64 {
    bytes.round().max(0.0) as u64
}

/// Insertion-ordered accumulator keyed by string.
struct Ordered<T> {
    index: HashMap<String, usize>,
    entries: Vec<T>,
}

impl<T> Ordered<T> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn entry(&mut self, key: &str, init: impl FnOnce() -> T) -> &mut T {
        let idx = match self.index.get(key) {
            Some(&idx) => idx,
            None => {
                self.entries.push(init());
                self.index.insert(key.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx]
    }

    /// Entries ranked by descending `score`, ties in first-seen order, capped at `n`.
    fn ranked(mut self, n: usize, score: impl Fn(&T) -> f64) -> Vec<T> {
        self.entries.sort_by(|a, b| score(b).total_cmp(&score(a)));
        self.entries.truncate(n);
        self.entries
    }
}

struct DatasetAcc {
    dataset_key: String,
    processed: f64,
    billed: f64,
    rebuild_count: u64,
}

/// Top `n` datasets by attributed cost.
pub fn top_datasets<'a>(
    attrs: impl IntoIterator<Item = &'a TableAttribution>,
    n: usize,
    pricing: Pricing,
) -> Vec<DatasetCost> {
    let mut acc: Ordered<DatasetAcc> = Ordered::new();
    for attr in attrs {
        let entry = acc.entry(&attr.dataset_key, || DatasetAcc {
            dataset_key: attr.dataset_key.clone(),
            processed: 0.0,
            billed: 0.0,
            rebuild_count: 0,
        });
        entry.processed += attr.bytes_processed_share;
        entry.billed += attr.bytes_billed_share;
        if attr.is_rebuild {
            entry.rebuild_count += 1;
        }
    }

    acc.ranked(n, |d| pricing.cost_usd(d.billed))
        .into_iter()
        .map(|d| DatasetCost {
            cost_usd: round2(pricing.cost_usd(d.billed)),
            bytes_processed: whole_bytes(d.processed),
            bytes_billed: whole_bytes(d.billed),
            rebuild_count: d.rebuild_count,
            dataset_key: d.dataset_key,
        })
        .collect()
}

struct TableAcc {
    table_key: String,
    dataset_key: String,
    processed: f64,
    billed: f64,
    rebuild_billed: f64,
    rebuild_count: u64,
}

/// Top `n` tables by attributed cost, with rebuild vs incremental split.
pub fn top_tables<'a>(
    attrs: impl IntoIterator<Item = &'a TableAttribution>,
    n: usize,
    pricing: Pricing,
) -> Vec<TableCost> {
    let mut acc: Ordered<TableAcc> = Ordered::new();
    for attr in attrs {
        let entry = acc.entry(&attr.table_key, || TableAcc {
            table_key: attr.table_key.clone(),
            dataset_key: attr.dataset_key.clone(),
            processed: 0.0,
            billed: 0.0,
            rebuild_billed: 0.0,
            rebuild_count: 0,
        });
        entry.processed += attr.bytes_processed_share;
        entry.billed += attr.bytes_billed_share;
        if attr.is_rebuild {
            entry.rebuild_billed += attr.bytes_billed_share;
            entry.rebuild_count += 1;
        }
    }

    acc.ranked(n, |t| pricing.cost_usd(t.billed))
        .into_iter()
        .map(|t| {
            let incremental_billed = t.billed - t.rebuild_billed;
            TableCost {
                cost_usd: round2(pricing.cost_usd(t.billed)),
                bytes_processed: whole_bytes(t.processed),
                bytes_billed: whole_bytes(t.billed),
                is_rebuild: t.rebuild_count > 0,
                rebuild_cost_usd: round2(pricing.cost_usd(t.rebuild_billed)),
                incremental_cost_usd: round2(pricing.cost_usd(incremental_billed)),
                rebuild_count: t.rebuild_count,
                table_key: t.table_key,
                dataset_key: t.dataset_key,
            }
        })
        .collect()
}

/// Build the listing entry for one record.
pub fn query_summary(record: &RawQueryRecord, pricing: Pricing) -> QuerySummary {
    QuerySummary {
        job_id: record.job_id.clone(),
        timestamp: record.timestamp,
        statement_type: record.statement_type.clone(),
        priority: record.priority.clone(),
        bytes_processed: record.bytes_processed,
        bytes_billed: record.bytes_billed,
        cost_usd: round2(pricing.cost_usd(record.bytes_billed as f64)),
        slot_hours: round2(record.slot_milliseconds as f64 / SLOT_MS_PER_HOUR),
        cache_hit: record.cache_hit,
        has_error: record.has_error,
        destination_table: record.destination_table.as_ref().map(|t| t.table_key()),
        referenced_tables: record.referenced_tables.iter().map(|t| t.table_key()).collect(),
        query_text: record.query_text.clone(),
    }
}

/// The `n` most recent records, newest first.
pub fn top_recent_queries<'a>(
    records: impl IntoIterator<Item = &'a RawQueryRecord>,
    n: usize,
    pricing: Pricing,
) -> Vec<QuerySummary> {
    let mut records: Vec<&RawQueryRecord> = records.into_iter().collect();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    records
        .into_iter()
        .take(n)
        .map(|r| query_summary(r, pricing))
        .collect()
}

struct ActorAcc {
    actor: ActorIdentity,
    billed: f64,
    query_count: u64,
    last_record: Option<usize>,
}

/// Top `n` actors by attributed cost within one dataset.
///
/// Entries are `(record_index, actor, attribution)`. A record that touches
/// several tables of the dataset counts as one query.
pub fn top_actors<'a>(
    entries: impl IntoIterator<Item = (usize, &'a ActorIdentity, &'a TableAttribution)>,
    n: usize,
    pricing: Pricing,
) -> Vec<ActorCost> {
    let mut acc: Ordered<ActorAcc> = Ordered::new();
    for (record_index, actor, attr) in entries {
        let entry = acc.entry(&actor.canonical_key, || ActorAcc {
            actor: actor.clone(),
            billed: 0.0,
            query_count: 0,
            last_record: None,
        });
        entry.billed += attr.bytes_billed_share;
        if entry.last_record != Some(record_index) {
            entry.query_count += 1;
            entry.last_record = Some(record_index);
        }
    }

    acc.ranked(n, |a| pricing.cost_usd(a.billed))
        .into_iter()
        .map(|a| ActorCost {
            is_service_account: a.actor.is_service_account(),
            actor: a.actor.canonical_key,
            query_count: a.query_count,
            cost_usd: round2(pricing.cost_usd(a.billed)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ServiceAccountRules;
    use crate::models::BYTES_PER_TERABYTE;
    use chrono::{Duration, TimeZone, Utc};

    const TIB: f64 = BYTES_PER_TERABYTE;

    fn attr(table: &str, dataset: &str, billed: f64, is_rebuild: bool) -> TableAttribution {
        TableAttribution {
            table_key: table.to_string(),
            dataset_key: dataset.to_string(),
            bytes_processed_share: billed,
            bytes_billed_share: billed,
            is_rebuild,
        }
    }

    #[test]
    fn test_top_datasets_sums_and_ranks() {
        let attrs = vec![
            attr("p.small.t", "p.small", TIB * 0.1, false),
            attr("p.big.a", "p.big", TIB, true),
            attr("p.big.b", "p.big", TIB, false),
        ];
        let datasets = top_datasets(&attrs, 10, Pricing::new(5.0));

        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[0].dataset_key, "p.big");
        assert_eq!(datasets[0].cost_usd, 10.0);
        assert_eq!(datasets[0].rebuild_count, 1);
        assert_eq!(datasets[1].cost_usd, 0.5);
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let forward = vec![
            attr("p.a.t", "p.a", 100.0, false),
            attr("p.b.t", "p.b", 100.0, false),
            attr("p.c.t", "p.c", 500.0, false),
        ];
        let backward = vec![
            attr("p.b.t", "p.b", 100.0, false),
            attr("p.a.t", "p.a", 100.0, false),
            attr("p.c.t", "p.c", 500.0, false),
        ];
        let keys = |attrs: &Vec<TableAttribution>| -> Vec<String> {
            top_datasets(attrs, 10, Pricing::new(5.0))
                .into_iter()
                .map(|d| d.dataset_key)
                .collect()
        };
        assert_eq!(keys(&forward), vec!["p.c", "p.a", "p.b"]);
        assert_eq!(keys(&backward), vec!["p.c", "p.b", "p.a"]);
    }

    #[test]
    fn test_truncation_is_silent() {
        let attrs: Vec<_> = (0..15)
            .map(|i| attr(&format!("p.d{i}.t"), &format!("p.d{i}"), i as f64, false))
            .collect();
        let datasets = top_datasets(&attrs, 10, Pricing::new(5.0));
        assert_eq!(datasets.len(), 10);
        assert_eq!(datasets[0].dataset_key, "p.d14");

        assert!(top_tables(&attrs, 0, Pricing::new(5.0)).is_empty());
    }

    #[test]
    fn test_table_rebuild_split() {
        let attrs = vec![
            attr("p.d.orders", "p.d", TIB * 0.5, true),
            attr("p.d.orders", "p.d", TIB * 0.5, false),
            attr("p.d.events", "p.d", TIB * 0.25, false),
        ];
        let tables = top_tables(&attrs, 100, Pricing::new(5.0));

        assert_eq!(tables[0].table_key, "p.d.orders");
        assert!(tables[0].is_rebuild);
        assert_eq!(tables[0].cost_usd, 5.0);
        assert_eq!(tables[0].rebuild_cost_usd, 2.5);
        assert_eq!(tables[0].incremental_cost_usd, 2.5);
        assert_eq!(tables[0].rebuild_count, 1);

        assert!(!tables[1].is_rebuild);
        assert_eq!(tables[1].rebuild_cost_usd, 0.0);
        assert_eq!(tables[1].incremental_cost_usd, 1.25);
    }

    #[test]
    fn test_recent_queries_newest_first_with_stable_ties() {
        let rules = ServiceAccountRules::default();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let actor = rules.classify("a@example.com");
        let records = vec![
            RawQueryRecord::new("old", base, "p", actor.clone()),
            RawQueryRecord::new("tie-1", base + Duration::hours(2), "p", actor.clone()),
            RawQueryRecord::new("tie-2", base + Duration::hours(2), "p", actor.clone()),
            RawQueryRecord::new("mid", base + Duration::hours(1), "p", actor),
        ];

        let ids: Vec<_> = top_recent_queries(&records, 3, Pricing::new(5.0))
            .into_iter()
            .map(|q| q.job_id)
            .collect();
        assert_eq!(ids, vec!["tie-1", "tie-2", "mid"]);
    }

    #[test]
    fn test_top_actors_counts_records_once() {
        let rules = ServiceAccountRules::default();
        let ana = rules.classify("ana@example.com");
        let etl = rules.classify("etl@p.iam.gserviceaccount.com");
        let a1 = attr("p.d.a", "p.d", TIB * 0.5, false);
        let a2 = attr("p.d.b", "p.d", TIB * 0.5, false);
        let a3 = attr("p.d.a", "p.d", TIB * 2.0, false);

        let actors = top_actors(
            vec![(0, &ana, &a1), (0, &ana, &a2), (1, &etl, &a3)],
            10,
            Pricing::new(5.0),
        );

        assert_eq!(actors[0].actor, "etl@p.iam.gserviceaccount.com");
        assert!(actors[0].is_service_account);
        assert_eq!(actors[0].cost_usd, 10.0);
        assert_eq!(actors[1].query_count, 1);
        assert_eq!(actors[1].cost_usd, 5.0);
    }
}
