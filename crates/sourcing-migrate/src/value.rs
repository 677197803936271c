//! SQL value model shared by the source reader and the target writer.
//!
//! Values travel from the tiberius row reader through the transformer into
//! the batch writer, which renders them either as SQL literals (multi-row
//! upsert statements executed over `simple_query`) or as typed parameters
//! (binary COPY path). NULLs carry a type hint so both renderings stay
//! well-typed per column.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tokio_postgres::types::{ToSql, Type};
use uuid::Uuid;

/// SQL value enum for type-safe row handling.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(SqlNullType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Decimal(Decimal),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    /// Array packing for text[] target columns.
    TextArray(Vec<String>),
    /// Array packing for integer[] target columns.
    I32Array(Vec<i32>),
}

/// Type hint for NULL values to ensure correct PostgreSQL encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F64,
    Decimal,
    String,
    Bytes,
    Uuid,
    DateTime,
    Date,
    TextArray,
    I32Array,
}

impl SqlValue {
    /// Whether this value is NULL (of any hinted type).
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// The PostgreSQL type for this value, used by the binary COPY path.
    pub fn pg_type(&self) -> Type {
        match self {
            SqlValue::Bool(_) => Type::BOOL,
            SqlValue::I16(_) => Type::INT2,
            SqlValue::I32(_) => Type::INT4,
            SqlValue::I64(_) => Type::INT8,
            SqlValue::F64(_) => Type::FLOAT8,
            SqlValue::Decimal(_) => Type::NUMERIC,
            SqlValue::String(_) => Type::TEXT,
            SqlValue::Bytes(_) => Type::BYTEA,
            SqlValue::Uuid(_) => Type::UUID,
            SqlValue::DateTime(_) => Type::TIMESTAMP,
            SqlValue::Date(_) => Type::DATE,
            SqlValue::TextArray(_) => Type::TEXT_ARRAY,
            SqlValue::I32Array(_) => Type::INT4_ARRAY,
            SqlValue::Null(hint) => hint.pg_type(),
        }
    }

    /// Convert to a boxed `ToSql` parameter for the binary COPY writer.
    pub fn to_param(&self) -> Box<dyn ToSql + Sync + Send> {
        match self {
            SqlValue::Bool(v) => Box::new(*v),
            SqlValue::I16(v) => Box::new(*v),
            SqlValue::I32(v) => Box::new(*v),
            SqlValue::I64(v) => Box::new(*v),
            SqlValue::F64(v) => Box::new(*v),
            SqlValue::Decimal(v) => Box::new(*v),
            SqlValue::String(v) => Box::new(v.clone()),
            SqlValue::Bytes(v) => Box::new(v.clone()),
            SqlValue::Uuid(v) => Box::new(*v),
            SqlValue::DateTime(v) => Box::new(*v),
            SqlValue::Date(v) => Box::new(*v),
            SqlValue::TextArray(v) => Box::new(v.clone()),
            SqlValue::I32Array(v) => Box::new(v.clone()),
            SqlValue::Null(hint) => hint.null_param(),
        }
    }
}

impl SqlNullType {
    fn pg_type(&self) -> Type {
        match self {
            SqlNullType::Bool => Type::BOOL,
            SqlNullType::I16 => Type::INT2,
            SqlNullType::I32 => Type::INT4,
            SqlNullType::I64 => Type::INT8,
            SqlNullType::F64 => Type::FLOAT8,
            SqlNullType::Decimal => Type::NUMERIC,
            SqlNullType::String => Type::TEXT,
            SqlNullType::Bytes => Type::BYTEA,
            SqlNullType::Uuid => Type::UUID,
            SqlNullType::DateTime => Type::TIMESTAMP,
            SqlNullType::Date => Type::DATE,
            SqlNullType::TextArray => Type::TEXT_ARRAY,
            SqlNullType::I32Array => Type::INT4_ARRAY,
        }
    }

    fn null_param(&self) -> Box<dyn ToSql + Sync + Send> {
        match self {
            SqlNullType::Bool => Box::new(None::<bool>),
            SqlNullType::I16 => Box::new(None::<i16>),
            SqlNullType::I32 => Box::new(None::<i32>),
            SqlNullType::I64 => Box::new(None::<i64>),
            SqlNullType::F64 => Box::new(None::<f64>),
            SqlNullType::Decimal => Box::new(None::<Decimal>),
            SqlNullType::String => Box::new(None::<String>),
            SqlNullType::Bytes => Box::new(None::<Vec<u8>>),
            SqlNullType::Uuid => Box::new(None::<Uuid>),
            SqlNullType::DateTime => Box::new(None::<NaiveDateTime>),
            SqlNullType::Date => Box::new(None::<NaiveDate>),
            SqlNullType::TextArray => Box::new(None::<Vec<String>>),
            SqlNullType::I32Array => Box::new(None::<Vec<i32>>),
        }
    }
}

/// Escape a string for SQL literal use.
fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

/// Convert a SqlValue to a SQL literal string for multi-row statements.
pub fn sql_value_to_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null(_) => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        SqlValue::I16(n) => n.to_string(),
        SqlValue::I32(n) => n.to_string(),
        SqlValue::I64(n) => n.to_string(),
        SqlValue::F64(n) => n.to_string(),
        SqlValue::Decimal(d) => format!("{}::numeric", d),
        SqlValue::String(s) => format!("'{}'", escape_sql_string(s)),
        SqlValue::Bytes(b) => format!("'\\x{}'::bytea", hex::encode(b)),
        SqlValue::Uuid(u) => format!("'{}'::uuid", u),
        SqlValue::DateTime(dt) => format!("'{}'::timestamp", dt.format("%Y-%m-%d %H:%M:%S%.6f")),
        SqlValue::Date(d) => format!("'{}'::date", d),
        SqlValue::TextArray(items) => {
            let elems: Vec<String> = items
                .iter()
                .map(|s| format!("'{}'", escape_sql_string(s)))
                .collect();
            format!("ARRAY[{}]::text[]", elems.join(", "))
        }
        SqlValue::I32Array(items) => {
            let elems: Vec<String> = items.iter().map(|n| n.to_string()).collect();
            format!("ARRAY[{}]::integer[]", elems.join(", "))
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<Option<i32>> for SqlValue {
    fn from(v: Option<i32>) -> Self {
        v.map(SqlValue::I32).unwrap_or(SqlValue::Null(SqlNullType::I32))
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(v: Option<i64>) -> Self {
        v.map(SqlValue::I64).unwrap_or(SqlValue::Null(SqlNullType::I64))
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        v.map(SqlValue::String)
            .unwrap_or(SqlValue::Null(SqlNullType::String))
    }
}

impl From<Option<Decimal>> for SqlValue {
    fn from(v: Option<Decimal>) -> Self {
        v.map(SqlValue::Decimal)
            .unwrap_or(SqlValue::Null(SqlNullType::Decimal))
    }
}

impl From<Option<NaiveDateTime>> for SqlValue {
    fn from(v: Option<NaiveDateTime>) -> Self {
        v.map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_null() {
        assert_eq!(sql_value_to_literal(&SqlValue::Null(SqlNullType::I32)), "NULL");
    }

    #[test]
    fn test_literal_string_escaping() {
        let v = SqlValue::String("it's".to_string());
        assert_eq!(sql_value_to_literal(&v), "'it''s'");
    }

    #[test]
    fn test_literal_bool_and_numeric() {
        assert_eq!(sql_value_to_literal(&SqlValue::Bool(true)), "TRUE");
        assert_eq!(sql_value_to_literal(&SqlValue::I32(42)), "42");
        let d: Decimal = "12.50".parse().unwrap();
        assert_eq!(sql_value_to_literal(&SqlValue::Decimal(d)), "12.50::numeric");
    }

    #[test]
    fn test_literal_datetime() {
        let dt = NaiveDate::from_ymd_opt(2021, 3, 14)
            .unwrap()
            .and_hms_opt(9, 26, 53)
            .unwrap();
        assert_eq!(
            sql_value_to_literal(&SqlValue::DateTime(dt)),
            "'2021-03-14 09:26:53.000000'::timestamp"
        );
    }

    #[test]
    fn test_literal_text_array() {
        let v = SqlValue::TextArray(vec!["a".to_string(), "b'c".to_string()]);
        assert_eq!(sql_value_to_literal(&v), "ARRAY['a', 'b''c']::text[]");
    }

    #[test]
    fn test_pg_type_of_null_follows_hint() {
        assert_eq!(SqlValue::Null(SqlNullType::Decimal).pg_type(), Type::NUMERIC);
        assert_eq!(SqlValue::I64(1).pg_type(), Type::INT8);
    }

    #[test]
    fn test_from_option_preserves_hint() {
        let v: SqlValue = Option::<i32>::None.into();
        assert_eq!(v, SqlValue::Null(SqlNullType::I32));
        let v: SqlValue = Some(5i32).into();
        assert_eq!(v, SqlValue::I32(5));
    }
}
