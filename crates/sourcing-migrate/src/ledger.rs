//! Per-record outcome tracking.
//!
//! The ledger is transport-independent and single-threaded: one migration
//! run owns exactly one ledger and records every source record's fate
//! exactly once. It only ever grows during a run.

use crate::transform::SkipReason;

/// Final tallies for one run. `total` always equals
/// `inserted + skipped + errored`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub errored: u64,
    /// In-batch primary-key duplicates removed by last-wins dedup. Not part
    /// of the total: a duplicate was still inserted, just once.
    pub duplicates: u64,
}

/// Accumulates inserted/skipped/errored outcomes plus a reason ledger for
/// every non-inserted record.
#[derive(Debug, Default)]
pub struct OutcomeLedger {
    inserted: u64,
    skipped: u64,
    errored: u64,
    duplicates: u64,
    entries: Vec<LedgerEntry>,
}

/// One non-inserted record and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub record_id: String,
    pub outcome: Outcome,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Skipped,
    Errored,
}

impl OutcomeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_inserted(&mut self, count: u64) {
        self.inserted += count;
    }

    pub fn record_skipped(&mut self, record_id: impl Into<String>, reason: &SkipReason) {
        self.skipped += 1;
        self.entries.push(LedgerEntry {
            record_id: record_id.into(),
            outcome: Outcome::Skipped,
            reason: reason.to_string(),
        });
    }

    pub fn record_error(&mut self, record_id: impl Into<String>, reason: impl Into<String>) {
        self.errored += 1;
        self.entries.push(LedgerEntry {
            record_id: record_id.into(),
            outcome: Outcome::Errored,
            reason: reason.into(),
        });
    }

    pub fn record_duplicates(&mut self, count: u64) {
        self.duplicates += count;
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.inserted + self.skipped + self.errored,
            inserted: self.inserted,
            skipped: self.skipped,
            errored: self.errored,
            duplicates: self.duplicates,
        }
    }

    /// Every (record id, reason) pair for non-inserted records, in the
    /// order they were observed.
    pub fn skip_ledger(&self) -> &[LedgerEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_add_up() {
        let mut ledger = OutcomeLedger::new();
        ledger.record_inserted(3);
        ledger.record_skipped(
            "501",
            &SkipReason::RequiredNull {
                field: "supplier_id",
            },
        );
        ledger.record_error("502", "constraint violation");
        ledger.record_inserted(1);

        let summary = ledger.summary();
        assert_eq!(summary.total, 6);
        assert_eq!(summary.inserted, 4);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errored, 1);
        assert_eq!(
            summary.total,
            summary.inserted + summary.skipped + summary.errored
        );
    }

    #[test]
    fn test_skip_ledger_has_one_entry_per_exclusion() {
        let mut ledger = OutcomeLedger::new();
        ledger.record_skipped(
            "501",
            &SkipReason::RequiredNull {
                field: "supplier_id",
            },
        );
        ledger.record_error("502", "boom");

        let entries = ledger.skip_ledger();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].record_id, "501");
        assert_eq!(entries[0].outcome, Outcome::Skipped);
        assert!(entries[0].reason.contains("supplier_id"));
        assert!(entries[0].reason.contains("null"));
        assert_eq!(entries[1].outcome, Outcome::Errored);
    }

    #[test]
    fn test_duplicates_do_not_affect_total() {
        let mut ledger = OutcomeLedger::new();
        ledger.record_inserted(5);
        ledger.record_duplicates(2);
        let summary = ledger.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.duplicates, 2);
    }

    #[test]
    fn test_interleaved_entries_preserved() {
        let mut ledger = OutcomeLedger::new();
        for i in 0..10 {
            if i % 2 == 0 {
                ledger.record_inserted(1);
            } else {
                ledger.record_error(i.to_string(), "x");
            }
        }
        assert_eq!(ledger.skip_ledger().len(), 5);
        assert_eq!(ledger.summary().total, 10);
    }
}
