//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (SQL Server, legacy schema).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL, redesigned schema).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (SQL Server) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Encrypt connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

/// Target database (PostgreSQL) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,
}

/// Migration behavior configuration.
///
/// Per-run knobs use `Option<T>` so "not set" falls back to each migration's
/// declared default rather than a file-level value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MigrationConfig {
    /// Override batch size for all migrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Directory for run report artifacts (default: "reports").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_dir: Option<PathBuf>,

    /// Narrate progress every N source records (default: 5000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_interval: Option<u64>,

    /// Fixed fallback currency id, bypassing the preferred-currency lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_currency_id: Option<i32>,

    /// Fixed fallback company id, bypassing the first-company lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_company_id: Option<i32>,
}

impl MigrationConfig {
    /// Effective report directory.
    pub fn report_dir(&self) -> PathBuf {
        self.report_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("reports"))
    }

    /// Effective progress narration interval.
    pub fn progress_interval(&self) -> u64 {
        self.progress_interval.unwrap_or(5_000)
    }
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_pg_port() -> u16 {
    5432
}

fn default_true() -> bool {
    true
}
