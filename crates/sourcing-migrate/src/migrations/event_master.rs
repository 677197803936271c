//! Event master migration: `TBL_EVENT_MASTER` -> `event_master`.
//!
//! High-volume table, moved through the bulk COPY path. Currency and company
//! references are optional-with-default: the legacy data is full of dangling
//! ids there and the redesigned schema enforces the FKs, so misses substitute
//! the run's resolved default instead of dropping the event.
//!
//! The default currency preference (INR, then USD, then EUR, then whatever
//! exists) mirrors the legacy load scripts; it is business data awaiting
//! stakeholder confirmation, not architecture, which is why it lives in the
//! cache-load step and can be pinned via `migration.default_currency_id`.

use crate::cache::{self, Lookup, LookupCaches};
use crate::config::MigrationConfig;
use crate::error::Result;
use crate::source::SourceRow;
use crate::transform::{
    optional_fk, Migration, SkipReason, TargetRecord, TransformResult, TransactionMode, WriteMode,
};
use crate::value::SqlValue;
use async_trait::async_trait;
use tokio_postgres::Client;
use tracing::warn;

const CACHE_CURRENCIES: &str = "currencies";
const CACHE_COMPANIES: &str = "companies";
const CACHE_DEFAULT_CURRENCY: &str = "default_currency";
const CACHE_DEFAULT_COMPANY: &str = "default_company";

const PREFERRED_CURRENCY_SQL: &str = "SELECT currency_id FROM currency_master \
     WHERE LOWER(currency_code) IN ('inr', 'usd', 'eur') \
       AND (is_deleted = false OR is_deleted IS NULL) \
     ORDER BY CASE LOWER(currency_code) WHEN 'inr' THEN 1 WHEN 'usd' THEN 2 ELSE 3 END \
     LIMIT 1";

#[derive(Debug)]
pub struct EventMasterMigration;

#[async_trait]
impl Migration for EventMasterMigration {
    fn name(&self) -> &'static str {
        "event_master"
    }

    fn source_query(&self) -> String {
        "SELECT EVENTID, EVENTCODE, EVENTNAME, EVENTDESC, ROUND, EVENTTYPE, \
                CURRENTSTATUS, EVENTMODE, EVENTCURRENCYID, CLIENTSAPID, \
                ENTERBY, ENTERDATE \
         FROM TBL_EVENT_MASTER"
            .into()
    }

    fn target_table(&self) -> &'static str {
        "event_master"
    }

    fn columns(&self) -> &'static [&'static str] {
        &[
            "event_id",
            "event_code",
            "event_name",
            "event_desc",
            "round",
            "event_type",
            "current_status",
            "event_mode",
            "event_currency_id",
            "company_id",
            "created_by",
            "created_date",
            "is_deleted",
        ]
    }

    fn key_columns(&self) -> &'static [&'static str] {
        &["event_id"]
    }

    fn batch_size(&self) -> usize {
        5_000
    }

    fn write_mode(&self) -> WriteMode {
        WriteMode::BulkCopy
    }

    fn transaction_mode(&self) -> TransactionMode {
        TransactionMode::Transactional
    }

    async fn load_caches(&self, target: &Client, config: &MigrationConfig) -> Result<LookupCaches> {
        let mut caches = LookupCaches::default();

        let currencies = cache::load_id_set(
            target,
            "currency",
            "SELECT currency_id FROM currency_master WHERE is_deleted = false OR is_deleted IS NULL",
        )
        .await?;
        let companies = cache::load_id_set(
            target,
            "company",
            "SELECT company_id FROM company_master WHERE is_deleted = false OR is_deleted IS NULL",
        )
        .await?;

        let default_currency = match config.default_currency_id {
            Some(id) => id as i64,
            None => resolve_default_currency(target).await?,
        };
        let default_company = match config.default_company_id {
            Some(id) => id as i64,
            None => resolve_default_company(target).await?,
        };

        caches.insert(CACHE_CURRENCIES, Lookup::Ids(currencies));
        caches.insert(CACHE_COMPANIES, Lookup::Ids(companies));
        caches.insert(CACHE_DEFAULT_CURRENCY, Lookup::Scalar(default_currency));
        caches.insert(CACHE_DEFAULT_COMPANY, Lookup::Scalar(default_company));
        Ok(caches)
    }

    fn record_id(&self, row: &SourceRow) -> String {
        row.i32("EVENTID")
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    fn transform(&self, row: &SourceRow, caches: &LookupCaches) -> TransformResult {
        let event_id = row
            .i32("EVENTID")
            .ok_or(SkipReason::RequiredNull { field: "event_id" })?;
        let event_code = row.non_blank_str("EVENTCODE").ok_or(SkipReason::RequiredNull {
            field: "event_code",
        })?;

        // Round 0 means "never advanced" in the legacy schema; the target
        // starts counting at 1.
        let round = row.i32("ROUND").unwrap_or(0).max(1);

        let event_type = match row.i32("EVENTTYPE").unwrap_or(0) {
            1 => "RFQ".to_string(),
            2 => "Reverse Auction".to_string(),
            3 => "Forward Auction".to_string(),
            n => format!("Unknown_{}", n),
        };

        let event_mode = match row.i32("EVENTMODE").unwrap_or(0) {
            1 => "Rank",
            2 => "Color",
            _ => "",
        };

        let currency_id = optional_fk(
            caches,
            CACHE_CURRENCIES,
            row.i64("EVENTCURRENCYID").filter(|&v| v != 0),
            caches.scalar(CACHE_DEFAULT_CURRENCY),
        );
        let company_id = optional_fk(
            caches,
            CACHE_COMPANIES,
            row.i64("CLIENTSAPID").filter(|&v| v != 0),
            caches.scalar(CACHE_DEFAULT_COMPANY),
        );

        Ok(vec![TargetRecord::new(
            event_id.to_string(),
            vec![
                SqlValue::I32(event_id),
                SqlValue::String(event_code.to_string()),
                row.non_blank_str("EVENTNAME").map(str::to_string).into(),
                row.non_blank_str("EVENTDESC").map(str::to_string).into(),
                SqlValue::I32(round),
                SqlValue::String(event_type),
                row.non_blank_str("CURRENTSTATUS").map(str::to_string).into(),
                SqlValue::String(event_mode.to_string()),
                currency_id.map(|v| v as i32).into(),
                company_id.map(|v| v as i32).into(),
                row.i32("ENTERBY").into(),
                row.datetime("ENTERDATE").into(),
                SqlValue::Bool(false),
            ],
        )])
    }
}

/// Resolve the run's fallback currency from the target master data.
async fn resolve_default_currency(target: &Client) -> Result<i64> {
    if let Some(id) = cache::load_scalar(target, PREFERRED_CURRENCY_SQL).await? {
        return Ok(id);
    }
    if let Some(id) =
        cache::load_scalar(target, "SELECT currency_id FROM currency_master LIMIT 1").await?
    {
        return Ok(id);
    }
    warn!("No currency found in currency_master, using fallback id 1");
    Ok(1)
}

async fn resolve_default_company(target: &Client) -> Result<i64> {
    if let Some(id) = cache::load_scalar(
        target,
        "SELECT company_id FROM company_master ORDER BY company_id LIMIT 1",
    )
    .await?
    {
        return Ok(id);
    }
    warn!("No company found in company_master, using fallback id 1");
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SqlNullType;

    fn caches() -> LookupCaches {
        let mut caches = LookupCaches::default();
        caches.insert(CACHE_CURRENCIES, Lookup::Ids([1i64, 86].into_iter().collect()));
        caches.insert(CACHE_COMPANIES, Lookup::Ids([7i64].into_iter().collect()));
        caches.insert(CACHE_DEFAULT_CURRENCY, Lookup::Scalar(1));
        caches.insert(CACHE_DEFAULT_COMPANY, Lookup::Scalar(7));
        caches
    }

    fn base_row() -> Vec<(&'static str, SqlValue)> {
        vec![
            ("EVENTID", SqlValue::I32(7)),
            ("EVENTCODE", SqlValue::String("EV-2020-007".into())),
            ("EVENTNAME", SqlValue::String("Steel RFQ".into())),
            ("EVENTDESC", SqlValue::Null(SqlNullType::String)),
            ("ROUND", SqlValue::I32(0)),
            ("EVENTTYPE", SqlValue::I32(2)),
            ("CURRENTSTATUS", SqlValue::String("Open".into())),
            ("EVENTMODE", SqlValue::I32(9)),
            ("EVENTCURRENCYID", SqlValue::I32(86)),
            ("CLIENTSAPID", SqlValue::I32(7)),
            ("ENTERBY", SqlValue::I32(12)),
            ("ENTERDATE", SqlValue::Null(SqlNullType::DateTime)),
        ]
    }

    fn row_with(overrides: Vec<(&'static str, SqlValue)>) -> SourceRow {
        let mut pairs = base_row();
        for (name, value) in overrides {
            if let Some(slot) = pairs.iter_mut().find(|(n, _)| *n == name) {
                slot.1 = value;
            }
        }
        SourceRow::from_pairs(pairs)
    }

    #[test]
    fn test_transform_happy_path() {
        let m = EventMasterMigration;
        let records = m.transform(&row_with(vec![]), &caches()).unwrap();
        assert_eq!(records.len(), 1);
        let values = records[0].values();
        assert_eq!(values[0], SqlValue::I32(7));
        // Round 0 floors to 1.
        assert_eq!(values[4], SqlValue::I32(1));
        // Event type 2 branches to the auction label.
        assert_eq!(values[5], SqlValue::String("Reverse Auction".into()));
        // Event mode 9 falls through to the documented default.
        assert_eq!(values[7], SqlValue::String("".into()));
        // Valid currency passes through untouched.
        assert_eq!(values[8], SqlValue::I32(86));
        assert_eq!(values[12], SqlValue::Bool(false));
    }

    #[test]
    fn test_unknown_event_type_labelled() {
        let m = EventMasterMigration;
        let row = row_with(vec![("EVENTTYPE", SqlValue::I32(42))]);
        let records = m.transform(&row, &caches()).unwrap();
        assert_eq!(records[0].values()[5], SqlValue::String("Unknown_42".into()));
    }

    #[test]
    fn test_missing_event_code_skips() {
        let m = EventMasterMigration;
        let row = row_with(vec![("EVENTCODE", SqlValue::Null(SqlNullType::String))]);
        let reason = m.transform(&row, &caches()).unwrap_err();
        assert!(reason.to_string().contains("event_code"));
        assert!(reason.to_string().contains("null"));
    }

    #[test]
    fn test_unknown_currency_takes_default_not_skip() {
        // Currency 999 is absent from the valid-currency cache; the field
        // is optional-with-default, so the record keeps the default and is
        // inserted rather than skipped.
        let m = EventMasterMigration;
        let row = row_with(vec![("EVENTCURRENCYID", SqlValue::I32(999))]);
        let records = m.transform(&row, &caches()).unwrap();
        assert_eq!(records[0].values()[8], SqlValue::I32(1));
    }

    #[test]
    fn test_zero_currency_treated_as_absent() {
        let m = EventMasterMigration;
        let row = row_with(vec![("EVENTCURRENCYID", SqlValue::I32(0))]);
        let records = m.transform(&row, &caches()).unwrap();
        assert_eq!(records[0].values()[8], SqlValue::I32(1));
    }

    #[test]
    fn test_null_enter_date_stays_null() {
        let m = EventMasterMigration;
        let records = m.transform(&row_with(vec![]), &caches()).unwrap();
        assert_eq!(records[0].values()[11], SqlValue::Null(SqlNullType::DateTime));
    }
}
