//! Record transformation contract.
//!
//! Every concrete migration implements [`Migration`]: the source SELECT, the
//! target column list, and a pure `transform` mapping one source row into
//! zero or more target records or a [`SkipReason`]. The orchestrator owns
//! everything else.
//!
//! Validation ordering inside a transform is fixed: required-field nullity
//! checks run before FK-existence checks before business-rule branching, so
//! the recorded skip reason is always the first failing condition.

use crate::cache::LookupCaches;
use crate::config::MigrationConfig;
use crate::error::Result;
use crate::source::SourceRow;
use crate::value::SqlValue;
use async_trait::async_trait;
use std::fmt;
use tokio_postgres::Client;

/// Why a source record was excluded from the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A NOT NULL target field had no source value.
    RequiredNull { field: &'static str },
    /// A required foreign key did not resolve against its validity cache.
    FkNotFound { field: &'static str, value: String },
    /// A source value could not be coerced to the target type.
    Malformed { field: &'static str, detail: String },
    /// A fan-out row carried no detail values at all.
    Empty { detail: &'static str },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::RequiredNull { field } => write!(f, "{} is null", field),
            SkipReason::FkNotFound { field, value } => {
                write!(f, "{} {} not found in target", field, value)
            }
            SkipReason::Malformed { field, detail } => {
                write!(f, "{} is malformed: {}", field, detail)
            }
            SkipReason::Empty { detail } => write!(f, "{}", detail),
        }
    }
}

/// Outcome of transforming one source row.
pub type TransformResult = std::result::Result<Vec<TargetRecord>, SkipReason>;

/// One row destined for the target store. Values are aligned with the
/// owning migration's declared column list and immutable once produced.
#[derive(Debug, Clone)]
pub struct TargetRecord {
    id: String,
    values: Vec<SqlValue>,
}

impl TargetRecord {
    pub fn new(id: impl Into<String>, values: Vec<SqlValue>) -> Self {
        Self {
            id: id.into(),
            values,
        }
    }

    /// Ledger identifier, derived from the source natural key.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

/// How flushed batches reach the target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Multi-row `INSERT ... ON CONFLICT (pk) DO UPDATE` per batch.
    Upsert,
    /// Binary COPY into a temp table, then a single upsert from it. Falls
    /// back to row-by-row upserts if the bulk path fails.
    BulkCopy,
}

/// Transaction boundary for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// One target transaction for the whole run, savepoint per flush.
    Transactional,
    /// Per-statement commits; failed batches are surfaced and the run
    /// continues with the next one.
    Autocommit,
}

/// The template seam every concrete migration implements.
#[async_trait]
pub trait Migration: Send + Sync + fmt::Debug {
    /// Registry name, also used for report artifact paths.
    fn name(&self) -> &'static str;

    /// The single parameterless SELECT executed once against the source.
    fn source_query(&self) -> String;

    /// Target table name.
    fn target_table(&self) -> &'static str;

    /// Target column list, in insert order.
    fn columns(&self) -> &'static [&'static str];

    /// Primary-key columns for upsert conflict detection and batch dedup.
    fn key_columns(&self) -> &'static [&'static str];

    /// Audit columns never overwritten by a re-run's upsert.
    fn immutable_columns(&self) -> &'static [&'static str] {
        &["created_by", "created_date"]
    }

    fn batch_size(&self) -> usize {
        500
    }

    fn write_mode(&self) -> WriteMode {
        WriteMode::Upsert
    }

    fn transaction_mode(&self) -> TransactionMode {
        TransactionMode::Transactional
    }

    /// Materialize this migration's lookup caches from the target store.
    /// Called exactly once per run, before streaming.
    async fn load_caches(
        &self,
        _target: &Client,
        _config: &MigrationConfig,
    ) -> Result<LookupCaches> {
        Ok(LookupCaches::default())
    }

    /// Ledger identifier for one source row (its natural key).
    fn record_id(&self, row: &SourceRow) -> String;

    /// Map one source row into zero or more target records, or a skip.
    fn transform(&self, row: &SourceRow, caches: &LookupCaches) -> TransformResult;
}

/// One pivoted source column in a fan-out migration: the declared
/// `(position, source column)` table replaces hand-written per-column
/// branches.
#[derive(Debug, Clone, Copy)]
pub struct PivotColumn {
    pub position: i32,
    pub column: &'static str,
}

/// Adapter letting a caller force a transaction mode different from the
/// migration's declared default, leaving everything else untouched.
#[derive(Debug)]
pub struct ModeOverride {
    inner: Box<dyn Migration>,
    mode: TransactionMode,
}

impl ModeOverride {
    pub fn new(inner: Box<dyn Migration>, mode: TransactionMode) -> Self {
        Self { inner, mode }
    }
}

#[async_trait]
impl Migration for ModeOverride {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn source_query(&self) -> String {
        self.inner.source_query()
    }

    fn target_table(&self) -> &'static str {
        self.inner.target_table()
    }

    fn columns(&self) -> &'static [&'static str] {
        self.inner.columns()
    }

    fn key_columns(&self) -> &'static [&'static str] {
        self.inner.key_columns()
    }

    fn immutable_columns(&self) -> &'static [&'static str] {
        self.inner.immutable_columns()
    }

    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn write_mode(&self) -> WriteMode {
        self.inner.write_mode()
    }

    fn transaction_mode(&self) -> TransactionMode {
        self.mode
    }

    async fn load_caches(&self, target: &Client, config: &MigrationConfig) -> Result<LookupCaches> {
        self.inner.load_caches(target, config).await
    }

    fn record_id(&self, row: &SourceRow) -> String {
        self.inner.record_id(row)
    }

    fn transform(&self, row: &SourceRow, caches: &LookupCaches) -> TransformResult {
        self.inner.transform(row, caches)
    }
}

// ---------------------------------------------------------------------------
// Field-policy helpers. Each lookup field's miss policy is explicit at the
// call site: `required_*` skips the whole record, `optional_fk` substitutes
// the configured default.
// ---------------------------------------------------------------------------

/// NOT NULL integer source field.
pub fn require_i32(row: &SourceRow, field: &'static str) -> std::result::Result<i32, SkipReason> {
    row.i32(field).ok_or(SkipReason::RequiredNull { field })
}

/// NOT NULL, non-blank text source field.
pub fn require_str<'a>(
    row: &'a SourceRow,
    field: &'static str,
) -> std::result::Result<&'a str, SkipReason> {
    row.non_blank_str(field)
        .ok_or(SkipReason::RequiredNull { field })
}

/// Required FK: null skips with the nullity reason, an unknown key skips
/// with the FK reason. Nullity is checked first so the recorded reason is
/// the first failing condition.
pub fn required_fk(
    caches: &LookupCaches,
    cache: &str,
    field: &'static str,
    value: Option<i64>,
) -> std::result::Result<i64, SkipReason> {
    let id = value.ok_or(SkipReason::RequiredNull { field })?;
    if caches.contains_id(cache, id) {
        Ok(id)
    } else {
        Err(SkipReason::FkNotFound {
            field,
            value: id.to_string(),
        })
    }
}

/// Optional FK: a null or unknown key substitutes `default` (which may
/// itself be absent, yielding SQL NULL). Never skips.
pub fn optional_fk(
    caches: &LookupCaches,
    cache: &str,
    value: Option<i64>,
    default: Option<i64>,
) -> Option<i64> {
    match value {
        Some(id) if caches.contains_id(cache, id) => Some(id),
        _ => default,
    }
}

/// Required surrogate-key translation through an id->id cache.
pub fn translate_fk(
    caches: &LookupCaches,
    cache: &str,
    field: &'static str,
    value: Option<i64>,
) -> std::result::Result<i64, SkipReason> {
    let id = value.ok_or(SkipReason::RequiredNull { field })?;
    caches.id_for(cache, id).ok_or(SkipReason::FkNotFound {
        field,
        value: id.to_string(),
    })
}
