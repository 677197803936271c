//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing connection settings, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Failure while opening one of the two run-owned connections
    #[error("Failed to connect to {database}: {message}")]
    Connect { database: String, message: String },

    /// A migration declares no key columns, so upsert cannot work
    #[error("Migration {0} declares no key columns - upsert requires a primary key")]
    NoPrimaryKey(String),

    /// Run-level failure for a specific migration
    #[error("Migration {name} failed: {message}")]
    Run { name: String, message: String },

    /// Requested migration name is not registered
    #[error("Unknown migration '{0}' - use `list` to see registered migrations")]
    UnknownMigration(String),

    /// IO error (config file, report artifacts)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// CSV report writing error
    #[error("Report error: {0}")]
    Csv(#[from] csv::Error),
}

impl MigrateError {
    /// Create a Connect error naming the side that failed.
    pub fn connect(database: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Connect {
            database: database.into(),
            message: message.into(),
        }
    }

    /// Create a Run error.
    pub fn run(name: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Run {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for the CLI. Only fatal/startup classes are nonzero
    /// in a distinct band; per-record skips are a reportable outcome, not a
    /// failure of the run.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::UnknownMigration(_) => {
                2
            }
            _ => 1,
        }
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 2);
        assert_eq!(MigrateError::UnknownMigration("x".into()).exit_code(), 2);
        assert_eq!(MigrateError::connect("PostgreSQL", "refused").exit_code(), 1);
    }

    #[test]
    fn test_connect_error_names_side() {
        let err = MigrateError::connect("SQL Server", "timeout");
        assert!(err.to_string().contains("SQL Server"));
        assert!(err.to_string().contains("timeout"));
    }
}
