//! Migration run orchestration.
//!
//! One [`Runner`] drives one migration at a time through the run state
//! machine: open both connections, materialize lookup caches, optionally
//! begin the whole-run target transaction, stream the source query, batch
//! transformed records, flush, and report. Per-flush savepoints confine a
//! bad record's effect to itself while earlier successes in the same outer
//! transaction survive; re-runs converge through upsert on stable keys, so
//! there is no transport-level retry anywhere.

use crate::batch::{dedup_last_wins, key_indices, BatchAccumulator};
use crate::cache::LookupCaches;
use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::ledger::{LedgerEntry, OutcomeLedger, RunSummary};
use crate::source::{self, SourceRow};
use crate::target::{
    self, build_staging_copy, build_staging_ddl, build_staging_upsert, build_upsert_sql,
    SessionExecutor, TargetExecutor, TransactionExecutor,
};
use crate::transform::{Migration, TargetRecord, TransactionMode, WriteMode};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tiberius::QueryItem;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Run lifecycle states, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Connected,
    TransactionOpen,
    Autocommit,
    Streaming,
    Flushing,
    Completed,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Connected => "connected",
            RunState::TransactionOpen => "transaction-open",
            RunState::Autocommit => "autocommit",
            RunState::Streaming => "streaming",
            RunState::Flushing => "flushing",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of one migration run, consumed by the reporting sidecar.
#[derive(Debug)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Migration name.
    pub migration: String,

    /// Final state (completed or failed).
    pub state: RunState,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    pub duration_seconds: f64,

    /// Outcome tallies.
    pub summary: RunSummary,

    /// Upsert-affected row total. On a re-run this reflects only changed or
    /// new rows, which is how convergence shows up in the numbers.
    pub rows_affected: u64,

    /// Every (record id, reason) pair for non-inserted records.
    pub entries: Vec<LedgerEntry>,
}

/// Drives migration runs against one loaded configuration.
pub struct Runner {
    config: Config,
}

impl Runner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Execute one migration run end to end.
    pub async fn run(&self, migration: &dyn Migration) -> Result<RunReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        let name = migration.name();

        info!("{}: starting run {}", name, run_id);

        // Idle -> Connected. Either connection failing is fatal; nothing has
        // been written yet.
        let mut source_client = source::connect(&self.config.source).await?;
        let mut target_client = target::connect(&self.config.target).await?;
        debug!("{}: state {}", name, RunState::Connected);

        // Caches are materialized once, before streaming, from the target.
        let caches = migration
            .load_caches(&target_client, &self.config.migration)
            .await?;

        let batch_size = self
            .config
            .migration
            .batch_size
            .unwrap_or_else(|| migration.batch_size());
        let mut ctx = WriteContext::new(
            migration,
            batch_size,
            self.config.migration.progress_interval(),
        )?;

        let mode = migration.transaction_mode();
        let outcome = match mode {
            TransactionMode::Transactional => {
                let tx = target_client.transaction().await?;
                debug!("{}: state {}", name, RunState::TransactionOpen);
                let mut exec = TransactionExecutor::new(&tx);
                let outcome =
                    stream_source(&mut source_client, migration, &caches, &mut exec, &mut ctx)
                        .await;
                match outcome {
                    Ok(()) => {
                        tx.commit().await?;
                        Ok(())
                    }
                    Err(e) => {
                        // Wholesale rollback: a failed transactional run has
                        // zero net effect on the target.
                        if let Err(rb) = tx.rollback().await {
                            warn!("{}: rollback after failure also failed: {}", name, rb);
                        }
                        Err(e)
                    }
                }
            }
            TransactionMode::Autocommit => {
                debug!("{}: state {}", name, RunState::Autocommit);
                let mut exec = SessionExecutor::new(&target_client);
                stream_source(&mut source_client, migration, &caches, &mut exec, &mut ctx).await
            }
        };

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let summary = ctx.ledger.summary();

        match outcome {
            Ok(()) => {
                info!(
                    "{}: completed - total {}, inserted {}, skipped {}, errored {}, duplicates {} ({:.1}s)",
                    name,
                    summary.total,
                    summary.inserted,
                    summary.skipped,
                    summary.errored,
                    summary.duplicates,
                    duration
                );
                Ok(RunReport {
                    run_id,
                    migration: name.to_string(),
                    state: RunState::Completed,
                    started_at,
                    completed_at,
                    duration_seconds: duration,
                    summary,
                    rows_affected: ctx.rows_affected,
                    entries: ctx.ledger.skip_ledger().to_vec(),
                })
            }
            Err(e) => {
                // Even a failed run reports its tallies; in transactional
                // mode the rollback means none of the inserts survived.
                warn!(
                    "{}: failed after total {}, inserted {}, skipped {}, errored {} ({:.1}s): {}",
                    name,
                    summary.total,
                    summary.inserted,
                    summary.skipped,
                    summary.errored,
                    duration,
                    e
                );
                Err(MigrateError::run(name, e.to_string()))
            }
        }
    }
}

/// Verify both connections can be opened; used by the CLI health check.
pub async fn health_check(config: &Config) -> Result<()> {
    let _source = source::connect(&config.source).await?;
    let target = target::connect(&config.target).await?;
    target.simple_query("SELECT current_database()").await?;
    info!("Both connections healthy");
    Ok(())
}

/// Execute the source SELECT and drive every row through transform and
/// batch-write. Streaming is forward-only; the driver's cursor paces reads.
async fn stream_source(
    source: &mut source::SourceClient,
    migration: &dyn Migration,
    caches: &LookupCaches,
    exec: &mut dyn TargetExecutor,
    ctx: &mut WriteContext<'_>,
) -> Result<()> {
    let query = migration.source_query();
    debug!("{}: state {}", migration.name(), RunState::Streaming);

    let mut stream = source.simple_query(query.as_str()).await?;
    while let Some(item) = stream.try_next().await? {
        if let QueryItem::Row(row) = item {
            let row = SourceRow::from_row(&row);
            ctx.process_row(exec, caches, row).await?;
        }
    }
    drop(stream);

    debug!("{}: state {}", migration.name(), RunState::Flushing);
    ctx.finish(exec).await
}

/// Per-run mutable state for the read-transform-batch-write loop.
struct WriteContext<'a> {
    migration: &'a dyn Migration,
    key_idx: Vec<usize>,
    acc: BatchAccumulator,
    ledger: OutcomeLedger,
    processed: u64,
    rows_affected: u64,
    sp_counter: u64,
    progress_interval: u64,
}

impl<'a> WriteContext<'a> {
    fn new(
        migration: &'a dyn Migration,
        batch_size: usize,
        progress_interval: u64,
    ) -> Result<Self> {
        let key_idx = key_indices(
            migration.name(),
            migration.columns(),
            migration.key_columns(),
        )?;
        Ok(Self {
            migration,
            key_idx,
            acc: BatchAccumulator::new(batch_size),
            ledger: OutcomeLedger::new(),
            processed: 0,
            rows_affected: 0,
            sp_counter: 0,
            progress_interval,
        })
    }

    /// Transform one source row and buffer its target records.
    async fn process_row(
        &mut self,
        exec: &mut dyn TargetExecutor,
        caches: &LookupCaches,
        row: SourceRow,
    ) -> Result<()> {
        self.processed += 1;
        if self.processed % self.progress_interval == 0 {
            info!(
                "{}: processed {} records ({} written so far)",
                self.migration.name(),
                self.processed,
                self.ledger.summary().inserted
            );
        }

        let record_id = self.migration.record_id(&row);
        match self.migration.transform(&row, caches) {
            Err(reason) => {
                debug!("{}: skipping {}: {}", self.migration.name(), record_id, reason);
                self.ledger.record_skipped(record_id, &reason);
            }
            Ok(records) => {
                for record in records {
                    if let Some(full) = self.acc.push(record) {
                        self.flush(exec, full).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Flush any partial batch at end of stream.
    async fn finish(&mut self, exec: &mut dyn TargetExecutor) -> Result<()> {
        let remainder = self.acc.take_remainder();
        if !remainder.is_empty() {
            self.flush(exec, remainder).await?;
        }
        Ok(())
    }

    async fn flush(
        &mut self,
        exec: &mut dyn TargetExecutor,
        records: Vec<TargetRecord>,
    ) -> Result<()> {
        let deduped = dedup_last_wins(records, &self.key_idx);
        if deduped.duplicates > 0 {
            debug!(
                "{}: removed {} in-batch duplicates (last wins)",
                self.migration.name(),
                deduped.duplicates
            );
            self.ledger.record_duplicates(deduped.duplicates as u64);
        }
        self.write_records(exec, deduped.records).await
    }

    /// Write a deduped batch, guarded by a savepoint in transactional mode.
    /// A batch-level failure rolls back only this batch and retries it
    /// row by row so one bad record cannot lose the whole batch.
    async fn write_records(
        &mut self,
        exec: &mut dyn TargetExecutor,
        records: Vec<TargetRecord>,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let use_sp = exec.supports_savepoints();
        let sp = self.next_savepoint();
        if use_sp {
            exec.savepoint(&sp).await?;
        }

        match self.attempt_batch(exec, &records).await {
            Ok(affected) => {
                if use_sp {
                    exec.release_savepoint(&sp).await?;
                }
                self.rows_affected += affected;
                self.ledger.record_inserted(records.len() as u64);
                debug!(
                    "{}: flushed {} records ({} affected)",
                    self.migration.name(),
                    records.len(),
                    affected
                );
            }
            Err(e) => {
                warn!(
                    "{}: batch of {} failed ({}), retrying row by row",
                    self.migration.name(),
                    records.len(),
                    e
                );
                if use_sp {
                    exec.rollback_to_savepoint(&sp).await?;
                }
                self.write_rows_individually(exec, records).await?;
            }
        }
        Ok(())
    }

    /// Row-by-row fallback with per-row error isolation: each row gets its
    /// own savepoint (when available) and a failure is recorded as errored
    /// without aborting the run.
    async fn write_rows_individually(
        &mut self,
        exec: &mut dyn TargetExecutor,
        records: Vec<TargetRecord>,
    ) -> Result<()> {
        let use_sp = exec.supports_savepoints();
        for record in records {
            let sp = self.next_savepoint();
            if use_sp {
                exec.savepoint(&sp).await?;
            }
            match self.attempt_single(exec, &record).await {
                Ok(affected) => {
                    if use_sp {
                        exec.release_savepoint(&sp).await?;
                    }
                    self.rows_affected += affected;
                    self.ledger.record_inserted(1);
                }
                Err(e) => {
                    if use_sp {
                        exec.rollback_to_savepoint(&sp).await?;
                    }
                    warn!(
                        "{}: record {} errored: {}",
                        self.migration.name(),
                        record.id(),
                        e
                    );
                    self.ledger.record_error(record.id(), e.to_string());
                }
            }
        }
        Ok(())
    }

    /// One write attempt for a whole batch, by the migration's write mode.
    async fn attempt_batch(
        &mut self,
        exec: &mut dyn TargetExecutor,
        records: &[TargetRecord],
    ) -> Result<u64> {
        let m = self.migration;
        match m.write_mode() {
            WriteMode::Upsert => {
                let sql = build_upsert_sql(
                    m.target_table(),
                    m.columns(),
                    m.key_columns(),
                    m.immutable_columns(),
                    records,
                );
                exec.execute(&sql).await
            }
            WriteMode::BulkCopy => {
                exec.execute(&build_staging_ddl(m.target_table())).await?;
                let types: Vec<_> = records[0].values().iter().map(|v| v.pg_type()).collect();
                let copy_stmt = build_staging_copy(m.target_table(), m.columns());
                exec.copy_in_rows(&copy_stmt, &types, records).await?;
                let upsert = build_staging_upsert(
                    m.target_table(),
                    m.columns(),
                    m.key_columns(),
                    m.immutable_columns(),
                );
                exec.execute(&upsert).await
            }
        }
    }

    /// One write attempt for a single record; always the plain upsert shape,
    /// also used as the bulk path's fallback.
    async fn attempt_single(
        &mut self,
        exec: &mut dyn TargetExecutor,
        record: &TargetRecord,
    ) -> Result<u64> {
        let m = self.migration;
        let sql = build_upsert_sql(
            m.target_table(),
            m.columns(),
            m.key_columns(),
            m.immutable_columns(),
            std::slice::from_ref(record),
        );
        exec.execute(&sql).await
    }

    fn next_savepoint(&mut self) -> String {
        self.sp_counter += 1;
        format!("sp_{}", self.sp_counter)
    }
}
