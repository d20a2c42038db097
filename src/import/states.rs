//! State reference import (`estados.csv`).

use crate::error::ImportError;
use crate::import::stats::ImportStats;
use serde::Deserialize;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::path::Path;

const BATCH_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct StateRow {
    #[serde(rename = "codigo_uf")]
    code: i16,
    uf: String,
    #[serde(rename = "nome")]
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(rename = "regiao")]
    region: String,
}

#[derive(Debug, Default)]
struct StatesData {
    ids: Vec<i16>,
    ufs: Vec<String>,
    names: Vec<String>,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    regions: Vec<String>,
}

impl StatesData {
    fn push(&mut self, row: StateRow) {
        self.ids.push(row.code);
        self.ufs.push(row.uf);
        self.names.push(row.name);
        self.latitudes.push(row.latitude);
        self.longitudes.push(row.longitude);
        self.regions.push(row.region);
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.ufs.clear();
        self.names.clear();
        self.latitudes.clear();
        self.longitudes.clear();
        self.regions.clear();
    }
}

async fn upsert_states(
    conn: &mut PoolConnection<Postgres>,
    data: &StatesData,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO states (id, uf, name, latitude, longitude, region, created_at, updated_at)
           SELECT id, uf, name, latitude, longitude, region, NOW(), NOW()
           FROM UNNEST($1::smallint[], $2::text[], $3::text[], $4::float8[], $5::float8[], $6::text[])
               AS t(id, uf, name, latitude, longitude, region)
           ON CONFLICT (id) DO UPDATE
           SET uf = EXCLUDED.uf,
               name = EXCLUDED.name,
               latitude = EXCLUDED.latitude,
               longitude = EXCLUDED.longitude,
               region = EXCLUDED.region,
               updated_at = NOW()"#,
    )
    .bind(&data.ids)
    .bind(&data.ufs)
    .bind(&data.names)
    .bind(&data.latitudes)
    .bind(&data.longitudes)
    .bind(&data.regions)
    .execute(&mut **conn)
    .await?;

    Ok(result.rows_affected())
}

/// Upsert every state row, keyed on the state code. Aborts on first error.
pub async fn import_states(
    conn: &mut PoolConnection<Postgres>,
    path: &Path,
) -> Result<ImportStats, ImportError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut data = StatesData::default();
    let mut stats = ImportStats::default();

    for row in reader.deserialize() {
        let row: StateRow = row?;
        data.push(row);
        if data.len() >= BATCH_SIZE {
            stats.inserted += upsert_states(conn, &data).await? as usize;
            stats.batches += 1;
            data.clear();
        }
    }

    if !data.is_empty() {
        stats.inserted += upsert_states(conn, &data).await? as usize;
        stats.batches += 1;
    }

    log::info!("state import complete: {} rows written", stats.inserted);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_the_portuguese_headers() {
        let csv = "codigo_uf,uf,nome,latitude,longitude,regiao\n\
                   35,SP,São Paulo,-23.55,-46.64,Sudeste\n";
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let row: StateRow = reader.deserialize().next().unwrap().unwrap();

        assert_eq!(row.code, 35);
        assert_eq!(row.uf, "SP");
        assert_eq!(row.name, "São Paulo");
        assert_eq!(row.region, "Sudeste");
    }
}
