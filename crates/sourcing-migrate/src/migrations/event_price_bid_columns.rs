//! Price-bid column definitions: `TBL_PB_BUYER` -> `event_price_bid_columns`.
//!
//! The legacy table pivots up to twenty column headers into
//! `HEADER1..HEADER10` and `ExtChargeHeader1..ExtChargeHeader10`; each
//! populated header fans out into its own target row. The pivot is declared
//! as a `(position, source column)` table rather than per-column branches,
//! and the target id is derived deterministically from `(PBID, position)` so
//! re-runs upsert convergently instead of minting fresh ids.

use crate::cache::{self, Lookup, LookupCaches};
use crate::config::MigrationConfig;
use crate::error::Result;
use crate::source::SourceRow;
use crate::transform::{
    required_fk, Migration, PivotColumn, SkipReason, TargetRecord, TransformResult,
    TransactionMode, WriteMode,
};
use crate::value::SqlValue;
use async_trait::async_trait;
use tokio_postgres::Client;

const CACHE_EVENTS: &str = "events";

/// Declared pivot: plain headers first, then extended charge headers,
/// each with its stable position in the derived primary key.
const PIVOT_COLUMNS: &[PivotColumn] = &[
    PivotColumn { position: 1, column: "HEADER1" },
    PivotColumn { position: 2, column: "HEADER2" },
    PivotColumn { position: 3, column: "HEADER3" },
    PivotColumn { position: 4, column: "HEADER4" },
    PivotColumn { position: 5, column: "HEADER5" },
    PivotColumn { position: 6, column: "HEADER6" },
    PivotColumn { position: 7, column: "HEADER7" },
    PivotColumn { position: 8, column: "HEADER8" },
    PivotColumn { position: 9, column: "HEADER9" },
    PivotColumn { position: 10, column: "HEADER10" },
    PivotColumn { position: 11, column: "ExtChargeHeader1" },
    PivotColumn { position: 12, column: "ExtChargeHeader2" },
    PivotColumn { position: 13, column: "ExtChargeHeader3" },
    PivotColumn { position: 14, column: "ExtChargeHeader4" },
    PivotColumn { position: 15, column: "ExtChargeHeader5" },
    PivotColumn { position: 16, column: "ExtChargeHeader6" },
    PivotColumn { position: 17, column: "ExtChargeHeader7" },
    PivotColumn { position: 18, column: "ExtChargeHeader8" },
    PivotColumn { position: 19, column: "ExtChargeHeader9" },
    PivotColumn { position: 20, column: "ExtChargeHeader10" },
];

#[derive(Debug)]
pub struct EventPriceBidColumnsMigration;

#[async_trait]
impl Migration for EventPriceBidColumnsMigration {
    fn name(&self) -> &'static str {
        "event_price_bid_columns"
    }

    fn source_query(&self) -> String {
        "SELECT PBID, EVENTID, \
                HEADER1, HEADER2, HEADER3, HEADER4, HEADER5, \
                HEADER6, HEADER7, HEADER8, HEADER9, HEADER10, \
                ExtChargeHeader1, ExtChargeHeader2, ExtChargeHeader3, ExtChargeHeader4, \
                ExtChargeHeader5, ExtChargeHeader6, ExtChargeHeader7, ExtChargeHeader8, \
                ExtChargeHeader9, ExtChargeHeader10 \
         FROM TBL_PB_BUYER \
         WHERE ISNULL(SEQUENCEID, 0) = 0"
            .into()
    }

    fn target_table(&self) -> &'static str {
        "event_price_bid_columns"
    }

    fn columns(&self) -> &'static [&'static str] {
        &[
            "event_price_bid_columns_id",
            "event_id",
            "column_name",
            "column_type",
            "mandatory",
            "sequence_number",
            "is_deleted",
        ]
    }

    fn key_columns(&self) -> &'static [&'static str] {
        &["event_price_bid_columns_id"]
    }

    fn immutable_columns(&self) -> &'static [&'static str] {
        &[]
    }

    fn transaction_mode(&self) -> TransactionMode {
        TransactionMode::Transactional
    }

    fn write_mode(&self) -> WriteMode {
        WriteMode::Upsert
    }

    async fn load_caches(
        &self,
        target: &Client,
        _config: &MigrationConfig,
    ) -> Result<LookupCaches> {
        let mut caches = LookupCaches::default();
        let events =
            cache::load_id_set(target, "event", "SELECT event_id FROM event_master").await?;
        caches.insert(CACHE_EVENTS, Lookup::Ids(events));
        Ok(caches)
    }

    fn record_id(&self, row: &SourceRow) -> String {
        row.i32("PBID").map(|v| v.to_string()).unwrap_or_default()
    }

    fn transform(&self, row: &SourceRow, caches: &LookupCaches) -> TransformResult {
        let pbid = row
            .i32("PBID")
            .ok_or(SkipReason::RequiredNull { field: "pbid" })?;
        let event_id = required_fk(caches, CACHE_EVENTS, "event_id", row.i64("EVENTID"))?;

        let populated: Vec<(&PivotColumn, &str)> = PIVOT_COLUMNS
            .iter()
            .filter_map(|pivot| row.non_blank_str(pivot.column).map(|v| (pivot, v)))
            .collect();

        if populated.is_empty() {
            return Err(SkipReason::Empty {
                detail: "no header values",
            });
        }

        let records = populated
            .into_iter()
            .enumerate()
            .map(|(idx, (pivot, header))| {
                TargetRecord::new(
                    format!("{}:{}", pbid, pivot.column),
                    vec![
                        SqlValue::I64(derive_row_id(pbid, pivot.position)),
                        SqlValue::I32(event_id as i32),
                        SqlValue::String(header.to_string()),
                        SqlValue::String("Text".to_string()),
                        SqlValue::Bool(true),
                        SqlValue::I32(idx as i32 + 1),
                        SqlValue::Bool(false),
                    ],
                )
            })
            .collect();

        Ok(records)
    }
}

/// Stable fan-out row id: pivot positions occupy two decimal digits under
/// the owning PBID.
fn derive_row_id(pbid: i32, position: i32) -> i64 {
    pbid as i64 * 100 + position as i64
}
