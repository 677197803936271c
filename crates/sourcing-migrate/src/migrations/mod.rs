//! Concrete entity migrations.
//!
//! Each migration parameterizes the generic runner: a source SELECT, a
//! target column list, lookup caches, and a pure transform. Registering a
//! new entity means adding a module here and a line to [`all`].

mod event_master;
mod event_price_bid_columns;
mod po_line;

pub use event_master::EventMasterMigration;
pub use event_price_bid_columns::EventPriceBidColumnsMigration;
pub use po_line::PoLineMigration;

use crate::error::{MigrateError, Result};
use crate::transform::Migration;

/// All registered migrations, in their intended run order: masters before
/// the tables referencing them.
pub fn all() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(EventMasterMigration),
        Box::new(EventPriceBidColumnsMigration),
        Box::new(PoLineMigration),
    ]
}

/// Look a migration up by registry name.
pub fn find(name: &str) -> Result<Box<dyn Migration>> {
    all()
        .into_iter()
        .find(|m| m.name() == name)
        .ok_or_else(|| MigrateError::UnknownMigration(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{ModeOverride, TransactionMode, WriteMode};

    #[test]
    fn test_mode_override_changes_only_transaction_mode() {
        let m = ModeOverride::new(Box::new(EventMasterMigration), TransactionMode::Autocommit);
        assert_eq!(m.transaction_mode(), TransactionMode::Autocommit);
        assert_eq!(m.name(), "event_master");
        assert_eq!(m.write_mode(), WriteMode::BulkCopy);
        assert_eq!(m.key_columns(), ["event_id"]);
    }

    #[test]
    fn test_registry_names_are_unique() {
        let names: Vec<&str> = all().iter().map(|m| m.name()).collect();
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }

    #[test]
    fn test_find_known_and_unknown() {
        assert!(find("event_master").is_ok());
        let err = find("nope").unwrap_err();
        assert!(matches!(err, MigrateError::UnknownMigration(_)));
    }

    #[test]
    fn test_every_migration_declares_keys_within_columns() {
        for m in all() {
            for key in m.key_columns() {
                assert!(
                    m.columns().contains(key),
                    "{}: key column {} missing from column list",
                    m.name(),
                    key
                );
            }
            assert!(!m.key_columns().is_empty(), "{}: no key columns", m.name());
        }
    }
}
