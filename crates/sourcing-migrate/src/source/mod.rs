//! SQL Server source database operations.
//!
//! Each migration run exclusively owns a single source connection for its
//! whole lifetime; the source side is read-only and streamed through the
//! driver's forward-only cursor.

use crate::config::SourceConfig;
use crate::error::{MigrateError, Result};
use crate::value::{SqlNullType, SqlValue};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, ColumnType, Config, EncryptionLevel, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::info;
use uuid::Uuid;

/// The concrete source client type owned by one migration run.
pub type SourceClient = Client<Compat<TcpStream>>;

fn build_config(config: &SourceConfig) -> Config {
    let mut tib = Config::new();
    tib.host(&config.host);
    tib.port(config.port);
    tib.database(&config.database);
    tib.authentication(AuthMethod::sql_server(&config.user, &config.password));

    if config.encrypt {
        if config.trust_server_cert {
            tib.trust_cert();
        }
        tib.encryption(EncryptionLevel::Required);
    } else {
        tib.encryption(EncryptionLevel::NotSupported);
    }

    tib
}

/// Open the run-owned source connection. Failure here is fatal for the run.
pub async fn connect(config: &SourceConfig) -> Result<SourceClient> {
    let tib_config = build_config(config);

    let tcp = TcpStream::connect(tib_config.get_addr())
        .await
        .map_err(|e| MigrateError::connect("SQL Server", e.to_string()))?;
    tcp.set_nodelay(true).ok();

    let mut client = Client::connect(tib_config, tcp.compat_write())
        .await
        .map_err(|e| MigrateError::connect("SQL Server", e.to_string()))?;

    // Probe the session so a bad login surfaces as a startup error, not
    // halfway through the first query.
    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| MigrateError::connect("SQL Server", e.to_string()))?
        .into_row()
        .await
        .map_err(|e| MigrateError::connect("SQL Server", e.to_string()))?;

    info!(
        "Connected to SQL Server: {}:{}/{}",
        config.host, config.port, config.database
    );

    Ok(client)
}

/// One source row snapshotted into owned, typed values.
///
/// Transient: built from the driver row, consumed by one transform
/// invocation, then dropped.
#[derive(Debug, Clone)]
pub struct SourceRow {
    names: Vec<String>,
    values: Vec<SqlValue>,
}

impl SourceRow {
    /// Snapshot a tiberius row using its column metadata for typing.
    pub fn from_row(row: &Row) -> Self {
        let columns = row.columns();
        let mut names = Vec::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());

        for (idx, col) in columns.iter().enumerate() {
            names.push(col.name().to_string());
            values.push(convert_row_value(row, idx, col.column_type()));
        }

        Self { names, values }
    }

    /// Build a row from (name, value) pairs. Used by tests and by callers
    /// that synthesize rows.
    pub fn from_pairs(pairs: Vec<(&str, SqlValue)>) -> Self {
        let (names, values) = pairs
            .into_iter()
            .map(|(n, v)| (n.to_string(), v))
            .unzip();
        Self { names, values }
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    /// The raw value for a column, if the column exists in the result set.
    pub fn value(&self, name: &str) -> Option<&SqlValue> {
        self.index(name).map(|i| &self.values[i])
    }

    /// Integer accessor; widens i16 and narrows in-range i64 transparently.
    pub fn i32(&self, name: &str) -> Option<i32> {
        match self.value(name)? {
            SqlValue::I16(v) => Some(*v as i32),
            SqlValue::I32(v) => Some(*v),
            SqlValue::I64(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        match self.value(name)? {
            SqlValue::I16(v) => Some(*v as i64),
            SqlValue::I32(v) => Some(*v as i64),
            SqlValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean accessor; legacy integer flags coerce with 0 = false.
    pub fn bool_(&self, name: &str) -> Option<bool> {
        match self.value(name)? {
            SqlValue::Bool(v) => Some(*v),
            SqlValue::I16(v) => Some(*v != 0),
            SqlValue::I32(v) => Some(*v != 0),
            SqlValue::I64(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn str_(&self, name: &str) -> Option<&str> {
        match self.value(name)? {
            SqlValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// String accessor that treats whitespace-only text as absent, matching
    /// how the legacy schema stores "empty".
    pub fn non_blank_str(&self, name: &str) -> Option<&str> {
        self.str_(name).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn decimal(&self, name: &str) -> Option<Decimal> {
        match self.value(name)? {
            SqlValue::Decimal(d) => Some(*d),
            SqlValue::I32(v) => Some(Decimal::from(*v)),
            SqlValue::I64(v) => Some(Decimal::from(*v)),
            _ => None,
        }
    }

    pub fn datetime(&self, name: &str) -> Option<NaiveDateTime> {
        match self.value(name)? {
            SqlValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        match self.value(name)? {
            SqlValue::Date(d) => Some(*d),
            SqlValue::DateTime(dt) => Some(dt.date()),
            _ => None,
        }
    }
}

/// Convert one tiberius column value to a SqlValue based on the wire type.
fn convert_row_value(row: &Row, idx: usize, col_type: ColumnType) -> SqlValue {
    match col_type {
        ColumnType::Bit | ColumnType::Bitn => row
            .try_get::<bool, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null(SqlNullType::Bool)),
        ColumnType::Int1 => row
            .try_get::<u8, _>(idx)
            .ok()
            .flatten()
            .map(|v| SqlValue::I16(v as i16))
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        ColumnType::Int2 => row
            .try_get::<i16, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::I16)
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        ColumnType::Int4 => row
            .try_get::<i32, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::I32)
            .unwrap_or(SqlValue::Null(SqlNullType::I32)),
        ColumnType::Int8 => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null(SqlNullType::I64)),
        // Variable-width integers: the driver reports the width actually on
        // the wire, so try each in descending frequency.
        ColumnType::Intn => row
            .try_get::<i32, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::I32)
            .or_else(|| {
                row.try_get::<i64, _>(idx)
                    .ok()
                    .flatten()
                    .map(SqlValue::I64)
            })
            .or_else(|| {
                row.try_get::<i16, _>(idx)
                    .ok()
                    .flatten()
                    .map(SqlValue::I16)
            })
            .or_else(|| {
                row.try_get::<u8, _>(idx)
                    .ok()
                    .flatten()
                    .map(|v| SqlValue::I16(v as i16))
            })
            .unwrap_or(SqlValue::Null(SqlNullType::I32)),
        ColumnType::Float4 => row
            .try_get::<f32, _>(idx)
            .ok()
            .flatten()
            .map(|v| SqlValue::F64(v as f64))
            .unwrap_or(SqlValue::Null(SqlNullType::F64)),
        ColumnType::Float8 | ColumnType::Floatn => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::F64)
            .or_else(|| {
                row.try_get::<f32, _>(idx)
                    .ok()
                    .flatten()
                    .map(|v| SqlValue::F64(v as f64))
            })
            .unwrap_or(SqlValue::Null(SqlNullType::F64)),
        ColumnType::Decimaln | ColumnType::Numericn | ColumnType::Money | ColumnType::Money4 => {
            row.try_get::<Decimal, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Decimal)
                .or_else(|| {
                    row.try_get::<f64, _>(idx)
                        .ok()
                        .flatten()
                        .and_then(|f| Decimal::try_from(f).ok())
                        .map(SqlValue::Decimal)
                })
                .unwrap_or(SqlValue::Null(SqlNullType::Decimal))
        }
        ColumnType::Guid => row
            .try_get::<Uuid, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Uuid)
            .unwrap_or(SqlValue::Null(SqlNullType::Uuid)),
        ColumnType::Datetime
        | ColumnType::Datetime2
        | ColumnType::Datetime4
        | ColumnType::Datetimen => row
            .try_get::<NaiveDateTime, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTime)),
        ColumnType::Daten => row
            .try_get::<NaiveDate, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Null(SqlNullType::Date)),
        // The target model stores timestamps without zone; offsets normalize
        // to UTC on the way in.
        ColumnType::DatetimeOffsetn => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| SqlValue::DateTime(dt.naive_utc()))
            .unwrap_or(SqlValue::Null(SqlNullType::DateTime)),
        // The target model carries no standalone time-of-day type; render it
        // as text and let the transform decide.
        ColumnType::Timen => row
            .try_get::<NaiveTime, _>(idx)
            .ok()
            .flatten()
            .map(|t| SqlValue::String(t.to_string()))
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row
            .try_get::<&[u8], _>(idx)
            .ok()
            .flatten()
            .map(|v| SqlValue::Bytes(v.to_vec()))
            .unwrap_or(SqlValue::Null(SqlNullType::Bytes)),
        // varchar, nvarchar, char, nchar, text, ntext, xml and anything else
        // the legacy schema throws at us.
        _ => row
            .try_get::<&str, _>(idx)
            .ok()
            .flatten()
            .map(|s| SqlValue::String(s.to_string()))
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
    }
}
