//! Read-only code-to-id snapshots used to resolve foreign keys.
//!
//! Loaded once per run, after the city and CID catalogues have been
//! imported, and passed by shared reference into the mapping stages.
//! Lookup misses are tolerated everywhere; callers decide whether a miss
//! means "skip the row" (hospitals) or "store NULL" (patients).

use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct CodeLookups {
    cities: HashMap<i32, i32>,
    cids: HashMap<String, i32>,
}

impl CodeLookups {
    /// Snapshot the `cities` and `cids` tables.
    pub async fn load(conn: &mut PoolConnection<Postgres>) -> Result<Self, sqlx::Error> {
        let city_rows: Vec<(i32, i32)> = sqlx::query_as("SELECT city_code, id FROM cities")
            .fetch_all(&mut **conn)
            .await?;
        let cid_rows: Vec<(String, i32)> = sqlx::query_as("SELECT code, id FROM cids")
            .fetch_all(&mut **conn)
            .await?;

        let lookups = Self {
            cities: city_rows.into_iter().collect(),
            cids: cid_rows.into_iter().collect(),
        };
        log::info!(
            "loaded {} city codes and {} cid codes",
            lookups.cities.len(),
            lookups.cids.len()
        );
        Ok(lookups)
    }

    /// Build a snapshot from prepared maps.
    pub fn from_maps(cities: HashMap<i32, i32>, cids: HashMap<String, i32>) -> Self {
        Self { cities, cids }
    }

    /// Resolve an IBGE municipality code to a city id.
    pub fn city_id(&self, code: i32) -> Option<i32> {
        self.cities.get(&code).copied()
    }

    /// Resolve a CID-10 code to a cid id.
    pub fn cid_id(&self, code: &str) -> Option<i32> {
        self.cids.get(code).copied()
    }
}
