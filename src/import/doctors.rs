//! Doctor reference import (`medicos.csv`).

use crate::error::ImportError;
use crate::import::stats::ImportStats;
use serde::Deserialize;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::path::Path;

const BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct DoctorRow {
    codigo: String,
    #[serde(rename = "nome_completo")]
    full_name: String,
    #[serde(rename = "especialidade")]
    specialty: String,
    #[serde(rename = "cidade")]
    city: String,
}

#[derive(Debug, Default)]
struct DoctorsData {
    codes: Vec<String>,
    full_names: Vec<String>,
    specialties: Vec<String>,
    cities: Vec<String>,
}

impl DoctorsData {
    fn push(&mut self, row: DoctorRow) {
        self.codes.push(row.codigo);
        self.full_names.push(row.full_name);
        self.specialties.push(row.specialty);
        self.cities.push(row.city);
    }

    fn len(&self) -> usize {
        self.codes.len()
    }

    fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    fn clear(&mut self) {
        self.codes.clear();
        self.full_names.clear();
        self.specialties.clear();
        self.cities.clear();
    }
}

async fn upsert_doctors(
    conn: &mut PoolConnection<Postgres>,
    data: &DoctorsData,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO doctors (doctor_code, full_name, specialty, city, created_at, updated_at)
           SELECT doctor_code, full_name, specialty, city, NOW(), NOW()
           FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])
               AS t(doctor_code, full_name, specialty, city)
           ON CONFLICT (doctor_code) DO UPDATE
           SET full_name = EXCLUDED.full_name,
               specialty = EXCLUDED.specialty,
               city = EXCLUDED.city,
               updated_at = NOW()"#,
    )
    .bind(&data.codes)
    .bind(&data.full_names)
    .bind(&data.specialties)
    .bind(&data.cities)
    .execute(&mut **conn)
    .await?;

    Ok(result.rows_affected())
}

/// Upsert every doctor row, keyed on `doctor_code`. Aborts on first error.
pub async fn import_doctors(
    conn: &mut PoolConnection<Postgres>,
    path: &Path,
) -> Result<ImportStats, ImportError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut data = DoctorsData::default();
    let mut stats = ImportStats::default();

    for row in reader.deserialize() {
        let row: DoctorRow = row?;
        data.push(row);
        if data.len() >= BATCH_SIZE {
            stats.inserted += upsert_doctors(conn, &data).await? as usize;
            stats.batches += 1;
            data.clear();
        }
    }

    if !data.is_empty() {
        stats.inserted += upsert_doctors(conn, &data).await? as usize;
        stats.batches += 1;
    }

    log::info!("doctor import complete: {} rows written", stats.inserted);
    Ok(stats)
}
