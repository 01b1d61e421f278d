//! Proportional byte attribution.
//!
//! The job metadata does not say how many bytes came from each input table, so
//! every referenced table receives an equal `1/N` share of the record's bytes.

use crate::models::{RawQueryRecord, TableAttribution};

/// Split a record's bytes evenly across its referenced tables.
///
/// Returns an empty vector when nothing is referenced; such records only
/// count towards actor totals. Output order follows `referenced_tables`.
pub fn attribute(record: &RawQueryRecord) -> Vec<TableAttribution> {
    let n = record.referenced_tables.len();
    if n == 0 {
        return Vec::new();
    }

    let processed_share = record.bytes_processed as f64 / n as f64;
    let billed_share = record.bytes_billed as f64 / n as f64;

    record
        .referenced_tables
        .iter()
        .map(|table| TableAttribution {
            table_key: table.table_key(),
            dataset_key: table.dataset_key(),
            bytes_processed_share: processed_share,
            bytes_billed_share: billed_share,
            is_rebuild: record
                .destination_table
                .as_ref()
                .is_some_and(|dest| dest.same_dataset_table(table)),
        })
        .collect()
}

/// Attribute every record, keeping the result parallel to `records`.
pub fn attribute_all(records: &[RawQueryRecord]) -> Vec<Vec<TableAttribution>> {
    records.iter().map(attribute).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ServiceAccountRules;
    use crate::models::TableRef;
    use chrono::{TimeZone, Utc};

    fn record(billed: u64, tables: Vec<TableRef>) -> RawQueryRecord {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        RawQueryRecord::new("job", ts, "p", ServiceAccountRules::default().classify("a@example.com"))
            .with_bytes(billed * 2, billed)
            .with_referenced(tables)
    }

    #[test]
    fn test_no_referenced_tables_yields_nothing() {
        assert!(attribute(&record(1_000, vec![])).is_empty());
    }

    #[test]
    fn test_shares_conserve_billed_bytes() {
        let tables = vec![
            TableRef::new("p", "d1", "a"),
            TableRef::new("p", "d1", "b"),
            TableRef::new("p", "d2", "c"),
        ];
        for billed in [0, 1, 7, 1_000_003, 1_099_511_627_777] {
            let attrs = attribute(&record(billed, tables.clone()));
            assert_eq!(attrs.len(), 3);
            let total: f64 = attrs.iter().map(|a| a.bytes_billed_share).sum();
            assert!((total - billed as f64).abs() <= 1.0, "billed={billed} total={total}");
        }
    }

    #[test]
    fn test_order_and_keys_follow_referenced_tables() {
        let attrs = attribute(&record(
            90,
            vec![TableRef::new("p", "z", "t2"), TableRef::new("p", "a", "t1")],
        ));
        assert_eq!(attrs[0].table_key, "p.z.t2");
        assert_eq!(attrs[0].dataset_key, "p.z");
        assert_eq!(attrs[1].table_key, "p.a.t1");
        assert_eq!(attrs[0].bytes_billed_share, 45.0);
        assert_eq!(attrs[0].bytes_processed_share, 90.0);
    }

    #[test]
    fn test_rebuild_flag_only_on_destination_table() {
        let target = TableRef::new("p", "mart", "orders");
        let rec = record(
            300,
            vec![
                TableRef::new("p", "raw", "events"),
                target.clone(),
                TableRef::new("p", "mart", "customers"),
            ],
        )
        .with_destination(target);

        let flags: Vec<bool> = attribute(&rec).iter().map(|a| a.is_rebuild).collect();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[test]
    fn test_no_destination_never_rebuild() {
        let attrs = attribute(&record(10, vec![TableRef::new("p", "d", "t")]));
        assert!(!attrs[0].is_rebuild);
    }

    #[test]
    fn test_deterministic() {
        let rec = record(12_345, vec![TableRef::new("p", "d", "a"), TableRef::new("p", "e", "b")]);
        assert_eq!(attribute(&rec), attribute(&rec));
    }
}
