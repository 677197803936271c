//! Batch accumulation and primary-key dedup.
//!
//! Records buffer into size-bounded batches between flushes. At flush time a
//! batch is deduplicated by its key-column values with an explicit
//! last-occurrence-wins policy: re-extracted legacy rows routinely repeat a
//! key within one read, and the later row is the authoritative one.
//! Duplicates are counted for the ledger, never treated as errors.

use crate::error::{MigrateError, Result};
use crate::transform::TargetRecord;
use crate::value::sql_value_to_literal;
use std::collections::HashMap;

/// A flush-ready batch after dedup.
#[derive(Debug)]
pub struct DedupedBatch {
    pub records: Vec<TargetRecord>,
    pub duplicates: usize,
}

/// Resolve key-column positions within the declared column list.
pub fn key_indices(
    migration: &str,
    columns: &[&str],
    key_columns: &[&str],
) -> Result<Vec<usize>> {
    if key_columns.is_empty() {
        return Err(MigrateError::NoPrimaryKey(migration.to_string()));
    }
    key_columns
        .iter()
        .map(|key| {
            columns
                .iter()
                .position(|c| c == key)
                .ok_or_else(|| MigrateError::NoPrimaryKey(migration.to_string()))
        })
        .collect()
}

fn record_key(record: &TargetRecord, key_indices: &[usize]) -> String {
    key_indices
        .iter()
        .map(|&i| sql_value_to_literal(&record.values()[i]))
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Deduplicate by primary key, keeping the last occurrence of each key in
/// its first occurrence's position.
pub fn dedup_last_wins(records: Vec<TargetRecord>, key_indices: &[usize]) -> DedupedBatch {
    let input_len = records.len();
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(input_len);
    let mut out: Vec<TargetRecord> = Vec::with_capacity(input_len);

    for record in records {
        let key = record_key(&record, key_indices);
        match seen.get(&key) {
            Some(&pos) => out[pos] = record,
            None => {
                seen.insert(key, out.len());
                out.push(record);
            }
        }
    }

    DedupedBatch {
        duplicates: input_len - out.len(),
        records: out,
    }
}

/// Size-bounded accumulation buffer between flushes.
#[derive(Debug)]
pub struct BatchAccumulator {
    buf: Vec<TargetRecord>,
    capacity: usize,
}

impl BatchAccumulator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Buffer one record; returns the full batch when the bound is reached.
    pub fn push(&mut self, record: TargetRecord) -> Option<Vec<TargetRecord>> {
        self.buf.push(record);
        if self.buf.len() >= self.capacity {
            Some(std::mem::take(&mut self.buf))
        } else {
            None
        }
    }

    /// Drain whatever is buffered at end of stream.
    pub fn take_remainder(&mut self) -> Vec<TargetRecord> {
        std::mem::take(&mut self.buf)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SqlValue;

    fn rec(id: i32, payload: &str) -> TargetRecord {
        TargetRecord::new(
            id.to_string(),
            vec![SqlValue::I32(id), SqlValue::String(payload.to_string())],
        )
    }

    #[test]
    fn test_dedup_last_wins_scenario() {
        // Three records sharing id 42 with payloads A, B, C added in that
        // order: exactly one row survives with payload C, two duplicates.
        let batch = vec![rec(42, "A"), rec(42, "B"), rec(42, "C")];
        let deduped = dedup_last_wins(batch, &[0]);
        assert_eq!(deduped.records.len(), 1);
        assert_eq!(deduped.duplicates, 2);
        assert_eq!(
            deduped.records[0].values()[1],
            SqlValue::String("C".to_string())
        );
    }

    #[test]
    fn test_dedup_preserves_first_position() {
        let batch = vec![rec(1, "a"), rec(2, "b"), rec(1, "a2"), rec(3, "c")];
        let deduped = dedup_last_wins(batch, &[0]);
        assert_eq!(deduped.duplicates, 1);
        let ids: Vec<&str> = deduped.records.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(
            deduped.records[0].values()[1],
            SqlValue::String("a2".to_string())
        );
    }

    #[test]
    fn test_dedup_composite_key() {
        let pair = |a: i32, b: i32, p: &str| {
            TargetRecord::new(
                format!("{}-{}", a, b),
                vec![
                    SqlValue::I32(a),
                    SqlValue::I32(b),
                    SqlValue::String(p.to_string()),
                ],
            )
        };
        let batch = vec![pair(1, 1, "x"), pair(1, 2, "y"), pair(1, 1, "z")];
        let deduped = dedup_last_wins(batch, &[0, 1]);
        assert_eq!(deduped.records.len(), 2);
        assert_eq!(deduped.duplicates, 1);
        assert_eq!(
            deduped.records[0].values()[2],
            SqlValue::String("z".to_string())
        );
    }

    #[test]
    fn test_accumulator_flushes_at_capacity() {
        let mut acc = BatchAccumulator::new(2);
        assert!(acc.push(rec(1, "a")).is_none());
        let full = acc.push(rec(2, "b")).expect("batch should be full");
        assert_eq!(full.len(), 2);
        assert!(acc.is_empty());

        assert!(acc.push(rec(3, "c")).is_none());
        assert_eq!(acc.take_remainder().len(), 1);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_key_indices_resolution() {
        let cols = ["event_id", "supplier_id", "amount"];
        assert_eq!(
            key_indices("m", &cols, &["event_id", "supplier_id"]).unwrap(),
            vec![0, 1]
        );
        assert!(key_indices("m", &cols, &[]).is_err());
        assert!(key_indices("m", &cols, &["missing"]).is_err());
    }
}
