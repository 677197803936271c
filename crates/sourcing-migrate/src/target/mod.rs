//! PostgreSQL target database operations.
//!
//! One exclusively-owned connection per run. Writes go through the
//! [`TargetExecutor`] seam so the orchestrator is indifferent to whether it
//! is talking to a plain session (autocommit mode) or a whole-run
//! transaction with savepoints, and so write semantics stay testable without
//! a live server.

use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};
use crate::transform::TargetRecord;
use crate::value::sql_value_to_literal;
use async_trait::async_trait;
use futures::pin_mut;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, SimpleQueryMessage, Transaction};
use tracing::{error, info};

/// Open the run-owned target connection. Failure here is fatal for the run.
pub async fn connect(config: &TargetConfig) -> Result<Client> {
    let mut pg_config = tokio_postgres::Config::new();
    pg_config
        .host(&config.host)
        .port(config.port)
        .dbname(&config.database)
        .user(&config.user)
        .password(&config.password);

    let (client, connection) = pg_config
        .connect(NoTls)
        .await
        .map_err(|e| MigrateError::connect("PostgreSQL", e.to_string()))?;

    // The connection object drives the socket; it lives until the client is
    // dropped at the end of the run.
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {}", e);
        }
    });

    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| MigrateError::connect("PostgreSQL", e.to_string()))?;

    info!(
        "Connected to PostgreSQL: {}:{}/{}",
        config.host, config.port, config.database
    );

    Ok(client)
}

/// Execution seam between the orchestrator and the target session.
#[async_trait]
pub trait TargetExecutor: Send {
    /// Execute a statement, returning the affected-row count.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Stream records into `copy_stmt` via binary COPY.
    async fn copy_in_rows(
        &mut self,
        copy_stmt: &str,
        types: &[Type],
        rows: &[TargetRecord],
    ) -> Result<u64>;

    /// Whether savepoints are available (transactional mode only).
    fn supports_savepoints(&self) -> bool;

    async fn savepoint(&mut self, name: &str) -> Result<()>;

    async fn release_savepoint(&mut self, name: &str) -> Result<()>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()>;
}

/// Extract the affected-row count from a simple-query response, taking the
/// last command's completion tag.
fn affected_rows(messages: &[SimpleQueryMessage]) -> u64 {
    messages
        .iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::CommandComplete(n) => Some(*n),
            _ => None,
        })
        .last()
        .unwrap_or(0)
}

async fn write_binary_rows(
    sink: tokio_postgres::CopyInSink<bytes::Bytes>,
    types: &[Type],
    rows: &[TargetRecord],
) -> Result<u64> {
    let writer = BinaryCopyInWriter::new(sink, types);
    pin_mut!(writer);

    for record in rows {
        let params: Vec<Box<dyn ToSql + Sync + Send>> =
            record.values().iter().map(|v| v.to_param()).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        writer.as_mut().write(&refs).await?;
    }

    Ok(writer.finish().await?)
}

/// Autocommit executor: every statement commits on its own. Savepoints are
/// unavailable; callers must check [`TargetExecutor::supports_savepoints`].
pub struct SessionExecutor<'a> {
    client: &'a Client,
}

impl<'a> SessionExecutor<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TargetExecutor for SessionExecutor<'_> {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let messages = self.client.simple_query(sql).await?;
        Ok(affected_rows(&messages))
    }

    async fn copy_in_rows(
        &mut self,
        copy_stmt: &str,
        types: &[Type],
        rows: &[TargetRecord],
    ) -> Result<u64> {
        let sink = self.client.copy_in(copy_stmt).await?;
        write_binary_rows(sink, types, rows).await
    }

    fn supports_savepoints(&self) -> bool {
        false
    }

    async fn savepoint(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn release_savepoint(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// Whole-run transaction executor with named savepoints.
pub struct TransactionExecutor<'a, 'b> {
    tx: &'a Transaction<'b>,
}

impl<'a, 'b> TransactionExecutor<'a, 'b> {
    pub fn new(tx: &'a Transaction<'b>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl TargetExecutor for TransactionExecutor<'_, '_> {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let messages = self.tx.simple_query(sql).await?;
        Ok(affected_rows(&messages))
    }

    async fn copy_in_rows(
        &mut self,
        copy_stmt: &str,
        types: &[Type],
        rows: &[TargetRecord],
    ) -> Result<u64> {
        let sink = self.tx.copy_in(copy_stmt).await?;
        write_binary_rows(sink, types, rows).await
    }

    fn supports_savepoints(&self) -> bool {
        true
    }

    async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.tx.simple_query(&format!("SAVEPOINT {}", name)).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.tx
            .simple_query(&format!("RELEASE SAVEPOINT {}", name))
            .await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.tx
            .simple_query(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Statement builders
// ---------------------------------------------------------------------------

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(cols: &[&str]) -> String {
    cols.iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Columns eligible for the upsert's UPDATE clause: everything that is
/// neither part of the key nor an immutable audit column.
fn updatable_columns<'a>(
    cols: &'a [&'a str],
    key_cols: &[&str],
    immutable_cols: &[&str],
) -> Vec<&'a str> {
    cols.iter()
        .filter(|c| !key_cols.contains(c) && !immutable_cols.contains(c))
        .copied()
        .collect()
}

/// Build a multi-row upsert statement with literal values.
///
/// Immutable audit columns (created_by/created_date and friends) are
/// excluded from the update clause so re-runs never clobber original
/// provenance, and from the change-detection predicate so provenance drift
/// alone never counts as a change.
pub fn build_upsert_sql(
    table: &str,
    cols: &[&str],
    key_cols: &[&str],
    immutable_cols: &[&str],
    records: &[TargetRecord],
) -> String {
    let col_list = column_list(cols);
    let pk_list = column_list(key_cols);

    let update_cols = updatable_columns(cols, key_cols, immutable_cols);

    let value_rows: Vec<String> = records
        .iter()
        .map(|record| {
            let values: Vec<String> = record.values().iter().map(sql_value_to_literal).collect();
            format!("({})", values.join(", "))
        })
        .collect();

    if update_cols.is_empty() {
        return format!(
            "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) DO NOTHING",
            quote_ident(table),
            col_list,
            value_rows.join(", "),
            pk_list
        );
    }

    let update_set: Vec<String> = update_cols
        .iter()
        .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
        .collect();

    let change_detection: Vec<String> = update_cols
        .iter()
        .map(|c| {
            format!(
                "{}.{} IS DISTINCT FROM EXCLUDED.{}",
                quote_ident(table),
                quote_ident(c),
                quote_ident(c)
            )
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) DO UPDATE SET {} WHERE {}",
        quote_ident(table),
        col_list,
        value_rows.join(", "),
        pk_list,
        update_set.join(", "),
        change_detection.join(" OR ")
    )
}

/// Temp staging table name for the bulk COPY path.
pub fn staging_table(table: &str) -> String {
    format!("stage_{}", table)
}

/// Statements creating a fresh staging table mirroring the target's shape.
pub fn build_staging_ddl(table: &str) -> String {
    let stage = staging_table(table);
    format!(
        "DROP TABLE IF EXISTS {stage}; CREATE TEMP TABLE {stage} (LIKE {table} INCLUDING DEFAULTS)",
        stage = quote_ident(&stage),
        table = quote_ident(table),
    )
}

/// COPY statement targeting the staging table.
pub fn build_staging_copy(table: &str, cols: &[&str]) -> String {
    format!(
        "COPY {} ({}) FROM STDIN (FORMAT binary)",
        quote_ident(&staging_table(table)),
        column_list(cols)
    )
}

/// Upsert from the staging table into the real target in one statement.
pub fn build_staging_upsert(
    table: &str,
    cols: &[&str],
    key_cols: &[&str],
    immutable_cols: &[&str],
) -> String {
    let col_list = column_list(cols);
    let pk_list = column_list(key_cols);
    let update_cols = updatable_columns(cols, key_cols, immutable_cols);

    if update_cols.is_empty() {
        return format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} ON CONFLICT ({}) DO NOTHING",
            quote_ident(table),
            col_list,
            col_list,
            quote_ident(&staging_table(table)),
            pk_list
        );
    }

    let update_set: Vec<String> = update_cols
        .iter()
        .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
        .collect();

    let change_detection: Vec<String> = update_cols
        .iter()
        .map(|c| {
            format!(
                "{}.{} IS DISTINCT FROM EXCLUDED.{}",
                quote_ident(table),
                quote_ident(c),
                quote_ident(c)
            )
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} ON CONFLICT ({}) DO UPDATE SET {} WHERE {}",
        quote_ident(table),
        col_list,
        col_list,
        quote_ident(&staging_table(table)),
        pk_list,
        update_set.join(", "),
        change_detection.join(" OR ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{SqlNullType, SqlValue};

    fn record(id: i32, name: &str) -> TargetRecord {
        TargetRecord::new(
            id.to_string(),
            vec![
                SqlValue::I32(id),
                SqlValue::String(name.to_string()),
                SqlValue::Null(SqlNullType::I32),
                SqlValue::DateTime(
                    chrono::NaiveDate::from_ymd_opt(2020, 1, 1)
                        .unwrap()
                        .and_hms_opt(0, 0, 0)
                        .unwrap(),
                ),
            ],
        )
    }

    const COLS: &[&str] = &["event_id", "event_name", "created_by", "created_date"];
    const KEYS: &[&str] = &["event_id"];
    const IMMUTABLE: &[&str] = &["created_by", "created_date"];

    #[test]
    fn test_upsert_excludes_key_and_immutable_from_update() {
        let sql = build_upsert_sql("event_master", COLS, KEYS, IMMUTABLE, &[record(1, "a")]);
        assert!(sql.contains("ON CONFLICT (\"event_id\") DO UPDATE SET"));
        assert!(sql.contains("\"event_name\" = EXCLUDED.\"event_name\""));
        assert!(!sql.contains("\"created_by\" = EXCLUDED"));
        assert!(!sql.contains("\"created_date\" = EXCLUDED"));
        assert!(!sql.contains("\"event_id\" = EXCLUDED"));
    }

    #[test]
    fn test_upsert_has_change_detection() {
        let sql = build_upsert_sql("event_master", COLS, KEYS, IMMUTABLE, &[record(1, "a")]);
        assert!(sql
            .contains("WHERE \"event_master\".\"event_name\" IS DISTINCT FROM EXCLUDED.\"event_name\""));
        assert!(!sql.contains("\"created_by\" IS DISTINCT"));
    }

    #[test]
    fn test_upsert_multi_row_values() {
        let sql = build_upsert_sql(
            "event_master",
            COLS,
            KEYS,
            IMMUTABLE,
            &[record(1, "a"), record(2, "b'c")],
        );
        assert!(sql.contains("(1, 'a', NULL, '2020-01-01 00:00:00.000000'::timestamp)"));
        assert!(sql.contains("(2, 'b''c', NULL,"));
    }

    #[test]
    fn test_upsert_key_only_table_does_nothing_on_conflict() {
        let cols: &[&str] = &["event_id"];
        let recs = vec![TargetRecord::new("1", vec![SqlValue::I32(1)])];
        let sql = build_upsert_sql("link_table", cols, &["event_id"], &[], &recs);
        assert!(sql.ends_with("ON CONFLICT (\"event_id\") DO NOTHING"));
    }

    #[test]
    fn test_staging_statements() {
        let ddl = build_staging_ddl("event_master");
        assert!(ddl.contains("CREATE TEMP TABLE \"stage_event_master\""));
        assert!(ddl.contains("(LIKE \"event_master\" INCLUDING DEFAULTS)"));

        let copy = build_staging_copy("event_master", COLS);
        assert!(copy.starts_with("COPY \"stage_event_master\""));
        assert!(copy.ends_with("FROM STDIN (FORMAT binary)"));

        let upsert = build_staging_upsert("event_master", COLS, KEYS, IMMUTABLE);
        assert!(upsert.contains("SELECT"));
        assert!(upsert.contains("FROM \"stage_event_master\""));
        assert!(upsert.contains("ON CONFLICT (\"event_id\") DO UPDATE SET"));
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
