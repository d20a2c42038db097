//! Municipality reference import (`municipios.csv`).

use crate::error::ImportError;
use crate::import::stats::ImportStats;
use serde::Deserialize;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::path::Path;

const BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct CityRow {
    #[serde(rename = "codigo_ibge")]
    city_code: i32,
    #[serde(rename = "nome")]
    name: String,
    latitude: f64,
    longitude: f64,
    // 0/1 flag in the source data.
    capital: u8,
    #[serde(rename = "codigo_uf")]
    state_id: i16,
    siafi_id: i32,
    ddd: i16,
    #[serde(rename = "fuso_horario")]
    time_zone: String,
    #[serde(rename = "populacao")]
    population: i32,
}

#[derive(Debug, Default)]
struct CitiesData {
    city_codes: Vec<i32>,
    names: Vec<String>,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    capitals: Vec<bool>,
    state_ids: Vec<i16>,
    siafi_ids: Vec<i32>,
    area_codes: Vec<i16>,
    time_zones: Vec<String>,
    populations: Vec<i32>,
}

impl CitiesData {
    fn push(&mut self, row: CityRow) {
        self.city_codes.push(row.city_code);
        self.names.push(row.name);
        self.latitudes.push(row.latitude);
        self.longitudes.push(row.longitude);
        self.capitals.push(row.capital != 0);
        self.state_ids.push(row.state_id);
        self.siafi_ids.push(row.siafi_id);
        self.area_codes.push(row.ddd);
        self.time_zones.push(row.time_zone);
        self.populations.push(row.population);
    }

    fn len(&self) -> usize {
        self.city_codes.len()
    }

    fn is_empty(&self) -> bool {
        self.city_codes.is_empty()
    }

    fn clear(&mut self) {
        self.city_codes.clear();
        self.names.clear();
        self.latitudes.clear();
        self.longitudes.clear();
        self.capitals.clear();
        self.state_ids.clear();
        self.siafi_ids.clear();
        self.area_codes.clear();
        self.time_zones.clear();
        self.populations.clear();
    }
}

async fn upsert_cities(
    conn: &mut PoolConnection<Postgres>,
    data: &CitiesData,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO cities
           (city_code, name, latitude, longitude, is_capital, state_id, siafi_id, area_code, time_zone, population, created_at, updated_at)
           SELECT city_code, name, latitude, longitude, is_capital, state_id, siafi_id, area_code, time_zone, population, NOW(), NOW()
           FROM UNNEST($1::int[], $2::text[], $3::float8[], $4::float8[], $5::bool[], $6::smallint[], $7::int[], $8::smallint[], $9::text[], $10::int[])
               AS t(city_code, name, latitude, longitude, is_capital, state_id, siafi_id, area_code, time_zone, population)
           ON CONFLICT (city_code) DO UPDATE
           SET name = EXCLUDED.name,
               latitude = EXCLUDED.latitude,
               longitude = EXCLUDED.longitude,
               is_capital = EXCLUDED.is_capital,
               state_id = EXCLUDED.state_id,
               siafi_id = EXCLUDED.siafi_id,
               area_code = EXCLUDED.area_code,
               time_zone = EXCLUDED.time_zone,
               population = EXCLUDED.population,
               updated_at = NOW()"#,
    )
    .bind(&data.city_codes)
    .bind(&data.names)
    .bind(&data.latitudes)
    .bind(&data.longitudes)
    .bind(&data.capitals)
    .bind(&data.state_ids)
    .bind(&data.siafi_ids)
    .bind(&data.area_codes)
    .bind(&data.time_zones)
    .bind(&data.populations)
    .execute(&mut **conn)
    .await?;

    Ok(result.rows_affected())
}

/// Upsert every municipality row, keyed on the IBGE code. Aborts on first
/// error. Must run before hospitals and patients so the city lookup
/// snapshot is complete.
pub async fn import_cities(
    conn: &mut PoolConnection<Postgres>,
    path: &Path,
) -> Result<ImportStats, ImportError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut data = CitiesData::default();
    let mut stats = ImportStats::default();

    for row in reader.deserialize() {
        let row: CityRow = row?;
        data.push(row);
        if data.len() >= BATCH_SIZE {
            stats.inserted += upsert_cities(conn, &data).await? as usize;
            stats.batches += 1;
            data.clear();
        }
    }

    if !data.is_empty() {
        stats.inserted += upsert_cities(conn, &data).await? as usize;
        stats.batches += 1;
    }

    log::info!("city import complete: {} rows written", stats.inserted);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capital_flag_is_numeric_in_the_source() {
        let csv = "codigo_ibge,nome,latitude,longitude,capital,codigo_uf,siafi_id,ddd,fuso_horario,populacao\n\
                   3550308,São Paulo,-23.5505,-46.6333,1,35,7107,11,America/Sao_Paulo,12396372\n";
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let row: CityRow = reader.deserialize().next().unwrap().unwrap();

        assert_eq!(row.city_code, 3550308);
        assert_eq!(row.capital, 1);
        assert_eq!(row.ddd, 11);
        assert_eq!(row.time_zone, "America/Sao_Paulo");
    }
}
