//! Run report artifacts.
//!
//! The reporting sidecar turns one run's outcome ledger into CSV files for
//! human review: a summary sheet and, when anything was excluded, a
//! skipped-records sheet with one (record id, reason) row per exclusion.
//! Paths derive from the migration name and the run's completion timestamp.

use crate::error::Result;
use crate::ledger::Outcome;
use crate::runner::RunReport;
use std::path::{Path, PathBuf};
use tracing::info;

/// Write the report artifacts for one run, returning the created paths.
pub fn write_report(dir: &Path, report: &RunReport) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let stamp = report.completed_at.format("%Y%m%d_%H%M%S");
    let mut written = Vec::new();

    let summary_path = dir.join(format!("{}_{}_summary.csv", report.migration, stamp));
    {
        let mut w = csv::Writer::from_path(&summary_path)?;
        w.write_record(["metric", "value"])?;
        w.write_record(["run_id", report.run_id.as_str()])?;
        w.write_record(["migration", report.migration.as_str()])?;
        w.write_record(["status", report.state.to_string().as_str()])?;
        w.write_record(["duration_seconds", format!("{:.1}", report.duration_seconds).as_str()])?;
        w.write_record(["total", report.summary.total.to_string().as_str()])?;
        w.write_record(["inserted", report.summary.inserted.to_string().as_str()])?;
        w.write_record(["skipped", report.summary.skipped.to_string().as_str()])?;
        w.write_record(["errored", report.summary.errored.to_string().as_str()])?;
        w.write_record(["duplicates", report.summary.duplicates.to_string().as_str()])?;
        w.write_record(["rows_affected", report.rows_affected.to_string().as_str()])?;
        w.flush()?;
    }
    written.push(summary_path);

    if !report.entries.is_empty() {
        let skipped_path = dir.join(format!("{}_{}_skipped.csv", report.migration, stamp));
        let mut w = csv::Writer::from_path(&skipped_path)?;
        w.write_record(["record_id", "outcome", "reason"])?;
        for entry in &report.entries {
            let outcome = match entry.outcome {
                Outcome::Skipped => "skipped",
                Outcome::Errored => "errored",
            };
            w.write_record([entry.record_id.as_str(), outcome, entry.reason.as_str()])?;
        }
        w.flush()?;
        written.push(skipped_path);
    }

    info!(
        "{}: report written to {}",
        report.migration,
        written
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(written)
}
