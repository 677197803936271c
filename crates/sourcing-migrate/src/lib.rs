//! # sourcing-migrate
//!
//! One-shot bulk ETL from the legacy e-sourcing SQL Server schema into the
//! redesigned PostgreSQL schema (events, auctions, POs, NFAs, suppliers).
//!
//! The library is one generic batch-migration runner plus thin per-entity
//! parameterizations of it:
//!
//! - **Streamed reads** through the source driver's forward-only cursor
//! - **Pure transforms** returning target records or explicit skip reasons
//! - **Bounded batches** with last-wins primary-key dedup
//! - **Upsert writes** (`INSERT ... ON CONFLICT DO UPDATE`) for idempotent
//!   re-runs, with a binary COPY staging path for high-volume tables and a
//!   row-by-row fallback for per-record error isolation
//! - **Savepoint-scoped partial rollback** inside one whole-run transaction
//! - **An outcome ledger** feeding CSV report artifacts
//!
//! ## Example
//!
//! ```rust,no_run
//! use sourcing_migrate::{migrations, Config, Runner};
//!
//! #[tokio::main]
//! async fn main() -> sourcing_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let runner = Runner::new(config);
//!     let migration = migrations::find("event_master")?;
//!     let report = runner.run(migration.as_ref()).await?;
//!     println!("Inserted {} records", report.summary.inserted);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod ledger;
pub mod migrations;
pub mod report;
pub mod runner;
pub mod source;
pub mod target;
pub mod transform;
pub mod value;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use ledger::{OutcomeLedger, RunSummary};
pub use runner::{health_check, RunReport, RunState, Runner};
pub use transform::{Migration, SkipReason, TargetRecord, TransactionMode, WriteMode};
pub use value::{SqlNullType, SqlValue};
