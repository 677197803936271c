//! Purchase-order lines: `TBL_PO_Sub` -> `po_line`.
//!
//! Runs in autocommit mode: the table is large, every batch is independent,
//! and a re-run converges through the upsert anyway. The legacy table leaves
//! `Amount`/`NetAmount` null on old rows, so both are backfilled from the
//! already-transformed quantity, rate and charge fields, computed once here
//! rather than re-derived at write time.

use crate::cache::{self, Lookup, LookupCaches};
use crate::config::MigrationConfig;
use crate::error::Result;
use crate::source::SourceRow;
use crate::transform::{
    required_fk, Migration, SkipReason, TargetRecord, TransformResult, TransactionMode,
};
use crate::value::SqlValue;
use async_trait::async_trait;
use tokio_postgres::Client;

const CACHE_PO_HEADERS: &str = "po_headers";

#[derive(Debug)]
pub struct PoLineMigration;

#[async_trait]
impl Migration for PoLineMigration {
    fn name(&self) -> &'static str {
        "po_line"
    }

    fn source_query(&self) -> String {
        "SELECT POSubId, POId, SAP_Item_Code, ItemCode, ItemDescription, \
                ItemLongDescription, UOM, Qty, Rate, Amount, OtherCharges, \
                NetAmount, PRNo, PRItemNO, Plant, TaxCode, DeliveryDate, POCondition \
         FROM TBL_PO_Sub \
         WHERE POSubId IS NOT NULL"
            .into()
    }

    fn target_table(&self) -> &'static str {
        "po_line"
    }

    fn columns(&self) -> &'static [&'static str] {
        &[
            "po_lines_id",
            "po_header_id",
            "po_line_number",
            "material_code",
            "material_name",
            "material_description",
            "uom_code",
            "qty",
            "unit_price",
            "total",
            "other_charges",
            "net_amount",
            "pr_number",
            "pr_line",
            "plant",
            "tax_code",
            "delivery_date",
            "po_condition",
        ]
    }

    fn key_columns(&self) -> &'static [&'static str] {
        &["po_lines_id"]
    }

    fn immutable_columns(&self) -> &'static [&'static str] {
        &[]
    }

    fn transaction_mode(&self) -> TransactionMode {
        TransactionMode::Autocommit
    }

    async fn load_caches(
        &self,
        target: &Client,
        _config: &MigrationConfig,
    ) -> Result<LookupCaches> {
        let mut caches = LookupCaches::default();
        let headers =
            cache::load_id_set(target, "po_header", "SELECT po_header_id FROM po_header").await?;
        caches.insert(CACHE_PO_HEADERS, Lookup::Ids(headers));
        Ok(caches)
    }

    fn record_id(&self, row: &SourceRow) -> String {
        row.i32("POSubId").map(|v| v.to_string()).unwrap_or_default()
    }

    fn transform(&self, row: &SourceRow, caches: &LookupCaches) -> TransformResult {
        let po_lines_id = row.i32("POSubId").ok_or(SkipReason::RequiredNull {
            field: "po_lines_id",
        })?;
        let po_header_id = required_fk(caches, CACHE_PO_HEADERS, "po_header_id", row.i64("POId"))?;

        let qty = row.decimal("Qty");
        let unit_price = row.decimal("Rate");
        let other_charges = row.decimal("OtherCharges");

        // Old rows predate the Amount column; derive line total and net from
        // the fields transformed above.
        let total = row
            .decimal("Amount")
            .or_else(|| qty.zip(unit_price).map(|(q, r)| q * r));
        let net_amount = row
            .decimal("NetAmount")
            .or_else(|| total.map(|t| t + other_charges.unwrap_or_default()));

        let text = |col: &str| {
            SqlValue::String(row.non_blank_str(col).unwrap_or_default().to_string())
        };

        Ok(vec![TargetRecord::new(
            po_lines_id.to_string(),
            vec![
                SqlValue::I32(po_lines_id),
                SqlValue::I32(po_header_id as i32),
                text("SAP_Item_Code"),
                text("ItemCode"),
                text("ItemDescription"),
                text("ItemLongDescription"),
                text("UOM"),
                qty.into(),
                unit_price.into(),
                total.into(),
                SqlValue::String(other_charges.map(|d| d.to_string()).unwrap_or_default()),
                net_amount.into(),
                text("PRNo"),
                text("PRItemNO"),
                text("Plant"),
                text("TaxCode"),
                row.datetime("DeliveryDate").into(),
                text("POCondition"),
            ],
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SqlNullType;
    use rust_decimal::Decimal;

    fn caches() -> LookupCaches {
        let mut caches = LookupCaches::default();
        caches.insert(CACHE_PO_HEADERS, Lookup::Ids([800i64].into_iter().collect()));
        caches
    }

    fn dec(s: &str) -> SqlValue {
        SqlValue::Decimal(s.parse::<Decimal>().unwrap())
    }

    fn row(overrides: Vec<(&'static str, SqlValue)>) -> SourceRow {
        let mut pairs = vec![
            ("POSubId", SqlValue::I32(4001)),
            ("POId", SqlValue::I32(800)),
            ("SAP_Item_Code", SqlValue::String("00010".into())),
            ("ItemCode", SqlValue::String("MAT-7".into())),
            ("ItemDescription", SqlValue::String("Hex bolts".into())),
            ("ItemLongDescription", SqlValue::Null(SqlNullType::String)),
            ("UOM", SqlValue::String("EA".into())),
            ("Qty", dec("2")),
            ("Rate", dec("3.50")),
            ("Amount", dec("7.00")),
            ("OtherCharges", dec("0.50")),
            ("NetAmount", dec("7.50")),
            ("PRNo", SqlValue::Null(SqlNullType::String)),
            ("PRItemNO", SqlValue::Null(SqlNullType::String)),
            ("Plant", SqlValue::String("P100".into())),
            ("TaxCode", SqlValue::Null(SqlNullType::String)),
            ("DeliveryDate", SqlValue::Null(SqlNullType::DateTime)),
            ("POCondition", SqlValue::Null(SqlNullType::String)),
        ];
        for (name, value) in overrides {
            if let Some(slot) = pairs.iter_mut().find(|(n, _)| *n == name) {
                slot.1 = value;
            }
        }
        SourceRow::from_pairs(pairs)
    }

    #[test]
    fn test_direct_amounts_pass_through() {
        let m = PoLineMigration;
        let records = m.transform(&row(vec![]), &caches()).unwrap();
        let values = records[0].values();
        assert_eq!(values[9], dec("7.00"));
        assert_eq!(values[11], dec("7.50"));
        // Decimal other_charges renders as text in the target.
        assert_eq!(values[10], SqlValue::String("0.50".into()));
    }

    #[test]
    fn test_total_calculated_from_qty_and_rate() {
        let m = PoLineMigration;
        let r = row(vec![("Amount", SqlValue::Null(SqlNullType::Decimal))]);
        let records = m.transform(&r, &caches()).unwrap();
        assert_eq!(records[0].values()[9], dec("7.00"));
    }

    #[test]
    fn test_net_amount_calculated_from_total_and_charges() {
        let m = PoLineMigration;
        let r = row(vec![
            ("Amount", SqlValue::Null(SqlNullType::Decimal)),
            ("NetAmount", SqlValue::Null(SqlNullType::Decimal)),
        ]);
        let records = m.transform(&r, &caches()).unwrap();
        // total = 2 * 3.50, net = total + 0.50
        assert_eq!(records[0].values()[9], dec("7.00"));
        assert_eq!(records[0].values()[11], dec("7.50"));
    }

    #[test]
    fn test_amounts_stay_null_when_underivable() {
        let m = PoLineMigration;
        let r = row(vec![
            ("Qty", SqlValue::Null(SqlNullType::Decimal)),
            ("Amount", SqlValue::Null(SqlNullType::Decimal)),
            ("NetAmount", SqlValue::Null(SqlNullType::Decimal)),
        ]);
        let records = m.transform(&r, &caches()).unwrap();
        assert_eq!(records[0].values()[9], SqlValue::Null(SqlNullType::Decimal));
        assert_eq!(records[0].values()[11], SqlValue::Null(SqlNullType::Decimal));
    }

    #[test]
    fn test_null_po_header_skips_with_null_reason() {
        let m = PoLineMigration;
        let r = row(vec![("POId", SqlValue::Null(SqlNullType::I32))]);
        let reason = m.transform(&r, &caches()).unwrap_err();
        assert!(reason.to_string().contains("po_header_id"));
        assert!(reason.to_string().contains("null"));
    }

    #[test]
    fn test_unknown_po_header_skips_with_fk_reason() {
        let m = PoLineMigration;
        let r = row(vec![("POId", SqlValue::I32(999))]);
        let reason = m.transform(&r, &caches()).unwrap_err();
        assert!(reason.to_string().contains("po_header_id"));
        assert!(reason.to_string().contains("not found"));
    }

    #[test]
    fn test_not_null_text_columns_default_to_empty() {
        let m = PoLineMigration;
        let records = m.transform(&row(vec![]), &caches()).unwrap();
        assert_eq!(records[0].values()[12], SqlValue::String("".into()));
        assert_eq!(records[0].values()[15], SqlValue::String("".into()));
    }
}
