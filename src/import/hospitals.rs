//! Hospital and specialty import (`hospitais.csv`).
//!
//! The same source file feeds two tables: one pass writes the hospitals
//! themselves, a second pass explodes the `;`-separated specialty column
//! against the hospital ids created by the first.

use crate::error::ImportError;
use crate::import::stats::ImportStats;
use crate::lookup::CodeLookups;
use serde::Deserialize;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::collections::{HashMap, HashSet};
use std::path::Path;

const BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct HospitalRow {
    codigo: String,
    #[serde(rename = "nome")]
    name: String,
    #[serde(rename = "cidade")]
    city_code: i32,
    #[serde(rename = "bairro")]
    neighborhood: String,
    #[serde(rename = "leitos_totais")]
    total_beds: i32,
}

#[derive(Debug, Deserialize)]
struct SpecialtyRow {
    codigo: String,
    #[serde(default)]
    especialidades: Option<String>,
}

#[derive(Debug, Default)]
struct HospitalsData {
    codes: Vec<String>,
    names: Vec<String>,
    city_ids: Vec<i32>,
    neighborhoods: Vec<String>,
    total_beds: Vec<i32>,
}

impl HospitalsData {
    fn push(&mut self, row: HospitalRow, city_id: i32) {
        self.codes.push(row.codigo);
        self.names.push(row.name);
        self.city_ids.push(city_id);
        self.neighborhoods.push(row.neighborhood);
        self.total_beds.push(row.total_beds);
    }

    fn len(&self) -> usize {
        self.codes.len()
    }

    fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    fn clear(&mut self) {
        self.codes.clear();
        self.names.clear();
        self.city_ids.clear();
        self.neighborhoods.clear();
        self.total_beds.clear();
    }
}

async fn upsert_hospitals(
    conn: &mut PoolConnection<Postgres>,
    data: &HospitalsData,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO hospitals (hospital_code, name, city, neighborhood, total_beds, created_at, updated_at)
           SELECT hospital_code, name, city, neighborhood, total_beds, NOW(), NOW()
           FROM UNNEST($1::text[], $2::text[], $3::int[], $4::text[], $5::int[])
               AS t(hospital_code, name, city, neighborhood, total_beds)
           ON CONFLICT (hospital_code) DO UPDATE
           SET name = EXCLUDED.name,
               city = EXCLUDED.city,
               neighborhood = EXCLUDED.neighborhood,
               total_beds = EXCLUDED.total_beds,
               updated_at = NOW()"#,
    )
    .bind(&data.codes)
    .bind(&data.names)
    .bind(&data.city_ids)
    .bind(&data.neighborhoods)
    .bind(&data.total_beds)
    .execute(&mut **conn)
    .await?;

    Ok(result.rows_affected())
}

/// Upsert hospitals keyed on `hospital_code`. Rows whose city code is not
/// in the snapshot are skipped and counted. Aborts on first database error.
pub async fn import_hospitals(
    conn: &mut PoolConnection<Postgres>,
    path: &Path,
    lookups: &CodeLookups,
) -> Result<ImportStats, ImportError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut data = HospitalsData::default();
    let mut stats = ImportStats::default();

    for row in reader.deserialize() {
        let row: HospitalRow = row?;
        let Some(city_id) = lookups.city_id(row.city_code) else {
            stats.skipped += 1;
            continue;
        };
        data.push(row, city_id);
        if data.len() >= BATCH_SIZE {
            stats.inserted += upsert_hospitals(conn, &data).await? as usize;
            stats.batches += 1;
            data.clear();
        }
    }

    if !data.is_empty() {
        stats.inserted += upsert_hospitals(conn, &data).await? as usize;
        stats.batches += 1;
    }

    if stats.skipped > 0 {
        log::warn!("{} hospital rows skipped: unknown city code", stats.skipped);
    }
    log::info!("hospital import complete: {} rows written", stats.inserted);
    Ok(stats)
}

/// Split the raw specialty column into trimmed, non-empty names.
fn split_specialties(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Populate `specialties` from the hospital file's specialty column.
///
/// Hospital ids are resolved through a freshly loaded code map, so this
/// must run after `import_hospitals`. Pairs are deduplicated before
/// writing: the upsert must not see the same (hospital, name) twice in
/// one statement.
pub async fn import_specialties(
    conn: &mut PoolConnection<Postgres>,
    path: &Path,
) -> Result<ImportStats, ImportError> {
    let hospital_rows: Vec<(String, i32)> =
        sqlx::query_as("SELECT hospital_code, id FROM hospitals")
            .fetch_all(&mut **conn)
            .await?;
    let hospital_ids: HashMap<String, i32> = hospital_rows.into_iter().collect();

    let mut reader = csv::Reader::from_path(path)?;
    let mut pairs: HashSet<(i32, String)> = HashSet::new();
    let mut stats = ImportStats::default();

    for row in reader.deserialize() {
        let row: SpecialtyRow = row?;
        let Some(&hospital_id) = hospital_ids.get(&row.codigo) else {
            stats.skipped += 1;
            continue;
        };
        if let Some(raw) = row.especialidades.as_deref() {
            for name in split_specialties(raw) {
                pairs.insert((hospital_id, name.to_string()));
            }
        }
    }

    let mut ids = Vec::new();
    let mut names = Vec::new();
    for (hospital_id, name) in pairs {
        ids.push(hospital_id);
        names.push(name);

        if ids.len() >= BATCH_SIZE {
            stats.inserted += upsert_specialties(conn, &ids, &names).await? as usize;
            stats.batches += 1;
            ids.clear();
            names.clear();
        }
    }

    if !ids.is_empty() {
        stats.inserted += upsert_specialties(conn, &ids, &names).await? as usize;
        stats.batches += 1;
    }

    log::info!("specialty import complete: {} rows written", stats.inserted);
    Ok(stats)
}

async fn upsert_specialties(
    conn: &mut PoolConnection<Postgres>,
    hospital_ids: &[i32],
    names: &[String],
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO specialties (hospital_id, name, created_at, updated_at)
           SELECT hospital_id, name, NOW(), NOW()
           FROM UNNEST($1::int[], $2::text[]) AS t(hospital_id, name)
           ON CONFLICT (hospital_id, name) DO UPDATE
           SET updated_at = NOW()"#,
    )
    .bind(hospital_ids)
    .bind(names)
    .execute(&mut **conn)
    .await?;

    Ok(result.rows_affected())
}
