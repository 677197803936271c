//! Run-scoped lookup caches.
//!
//! Foreign-key validity sets and translation maps are materialized from the
//! target store exactly once, before streaming begins, then read-only for
//! the rest of the run. An empty result set is a valid cache; it simply
//! causes every referencing record to be skipped (or defaulted, per the
//! field's declared policy).

use crate::error::Result;
use std::collections::{HashMap, HashSet};
use tokio_postgres::Client;
use tracing::info;

/// One named lookup materialized from the target store.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Valid-key set, e.g. "event ids that exist in event_master".
    Ids(HashSet<i64>),
    /// Surrogate-key translation, e.g. buyer charge id -> supplier charge id.
    IdToId(HashMap<i64, i64>),
    /// Text-key translation, e.g. pivoted column name -> column id.
    TextToId(HashMap<String, i64>),
    /// Composite-key translation, e.g. (event id, supplier id) -> bid id.
    PairToId(HashMap<(i64, i64), i64>),
    /// A single configured or resolved default value.
    Scalar(i64),
}

/// Name-keyed bag of lookups, built once per run and never mutated after.
#[derive(Debug, Default)]
pub struct LookupCaches {
    inner: HashMap<&'static str, Lookup>,
}

impl LookupCaches {
    pub fn insert(&mut self, name: &'static str, lookup: Lookup) {
        self.inner.insert(name, lookup);
    }

    /// Whether `id` is a member of the named validity set. A missing or
    /// empty cache answers false for every id.
    pub fn contains_id(&self, name: &str, id: i64) -> bool {
        match self.inner.get(name) {
            Some(Lookup::Ids(set)) => set.contains(&id),
            _ => false,
        }
    }

    pub fn id_for(&self, name: &str, id: i64) -> Option<i64> {
        match self.inner.get(name) {
            Some(Lookup::IdToId(map)) => map.get(&id).copied(),
            _ => None,
        }
    }

    pub fn id_for_text(&self, name: &str, key: &str) -> Option<i64> {
        match self.inner.get(name) {
            Some(Lookup::TextToId(map)) => map.get(key).copied(),
            _ => None,
        }
    }

    pub fn id_for_pair(&self, name: &str, a: i64, b: i64) -> Option<i64> {
        match self.inner.get(name) {
            Some(Lookup::PairToId(map)) => map.get(&(a, b)).copied(),
            _ => None,
        }
    }

    pub fn scalar(&self, name: &str) -> Option<i64> {
        match self.inner.get(name) {
            Some(Lookup::Scalar(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Read column `idx` as an i64 regardless of the integer width PostgreSQL
/// reports for it.
fn get_i64(row: &tokio_postgres::Row, idx: usize) -> Option<i64> {
    row.try_get::<_, i64>(idx)
        .ok()
        .or_else(|| row.try_get::<_, i32>(idx).ok().map(|v| v as i64))
        .or_else(|| row.try_get::<_, i16>(idx).ok().map(|v| v as i64))
}

/// Load a validity set from column 0 of `sql`.
pub async fn load_id_set(client: &Client, name: &str, sql: &str) -> Result<HashSet<i64>> {
    let rows = client.query(sql, &[]).await?;
    let set: HashSet<i64> = rows.iter().filter_map(|r| get_i64(r, 0)).collect();
    info!("Loaded {} {} keys", set.len(), name);
    Ok(set)
}

/// Load a key translation map (column 0 -> column 1). Duplicate keys keep
/// the last row, matching load order.
pub async fn load_id_map(client: &Client, name: &str, sql: &str) -> Result<HashMap<i64, i64>> {
    let rows = client.query(sql, &[]).await?;
    let mut map = HashMap::with_capacity(rows.len());
    for row in &rows {
        if let (Some(k), Some(v)) = (get_i64(row, 0), get_i64(row, 1)) {
            map.insert(k, v);
        }
    }
    info!("Loaded {} {} mappings", map.len(), name);
    Ok(map)
}

/// Load a text-keyed translation map (column 0 -> column 1), last wins.
pub async fn load_text_map(client: &Client, name: &str, sql: &str) -> Result<HashMap<String, i64>> {
    let rows = client.query(sql, &[]).await?;
    let mut map = HashMap::with_capacity(rows.len());
    for row in &rows {
        let key: Option<String> = row.try_get(0).ok();
        if let (Some(k), Some(v)) = (key, get_i64(row, 1)) {
            map.insert(k, v);
        }
    }
    info!("Loaded {} {} mappings", map.len(), name);
    Ok(map)
}

/// Load a composite-keyed translation map ((column 0, column 1) -> column 2),
/// last wins on duplicate key pairs.
pub async fn load_pair_map(
    client: &Client,
    name: &str,
    sql: &str,
) -> Result<HashMap<(i64, i64), i64>> {
    let rows = client.query(sql, &[]).await?;
    let mut map = HashMap::with_capacity(rows.len());
    for row in &rows {
        if let (Some(a), Some(b), Some(v)) = (get_i64(row, 0), get_i64(row, 1), get_i64(row, 2)) {
            map.insert((a, b), v);
        }
    }
    info!("Loaded {} {} mappings", map.len(), name);
    Ok(map)
}

/// Load a single scalar (first row, column 0), e.g. a resolved default id.
pub async fn load_scalar(client: &Client, sql: &str) -> Result<Option<i64>> {
    let rows = client.query(sql, &[]).await?;
    Ok(rows.first().and_then(|r| get_i64(r, 0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caches() -> LookupCaches {
        let mut caches = LookupCaches::default();
        caches.insert("events", Lookup::Ids([1i64, 2, 9].into_iter().collect()));
        caches.insert(
            "charges",
            Lookup::IdToId([(10i64, 100i64), (11, 101)].into_iter().collect()),
        );
        caches.insert(
            "columns",
            Lookup::TextToId([("HEADER1".to_string(), 7i64)].into_iter().collect()),
        );
        caches.insert(
            "bids",
            Lookup::PairToId([((9i64, 4i64), 55i64)].into_iter().collect()),
        );
        caches.insert("default_currency", Lookup::Scalar(1));
        caches
    }

    #[test]
    fn test_contains_id() {
        let caches = caches();
        assert!(caches.contains_id("events", 9));
        assert!(!caches.contains_id("events", 999));
    }

    #[test]
    fn test_missing_cache_answers_empty() {
        let caches = caches();
        assert!(!caches.contains_id("nope", 1));
        assert_eq!(caches.id_for("nope", 1), None);
    }

    #[test]
    fn test_map_lookups() {
        let caches = caches();
        assert_eq!(caches.id_for("charges", 10), Some(100));
        assert_eq!(caches.id_for("charges", 12), None);
        assert_eq!(caches.id_for_text("columns", "HEADER1"), Some(7));
        assert_eq!(caches.id_for_pair("bids", 9, 4), Some(55));
        assert_eq!(caches.id_for_pair("bids", 9, 5), None);
    }

    #[test]
    fn test_scalar() {
        let caches = caches();
        assert_eq!(caches.scalar("default_currency"), Some(1));
        assert_eq!(caches.scalar("default_company"), None);
    }

    #[test]
    fn test_wrong_kind_answers_empty() {
        let caches = caches();
        // "events" is a set, not a map - asking the wrong shape is a miss,
        // not a panic.
        assert_eq!(caches.id_for("events", 1), None);
    }
}
