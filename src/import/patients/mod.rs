//! Streaming patient import.
//!
//! The pipeline runs in four sequential stages over one database
//! connection:
//!
//! 1. **Reader** (`xml`): streams `Paciente` elements off the document
//!    without retaining any tree structure.
//! 2. **Mapper**: validates required fields and resolves the city and
//!    CID-10 references against the preloaded snapshots.
//! 3. **Batcher**: accumulates rows in columnar arrays up to the
//!    configured threshold, deduplicating on `codigo` so one upsert
//!    statement never touches the same key twice.
//! 4. **Writer**: one multi-row `UNNEST` upsert per batch, each statement
//!    committing on its own.
//!
//! A failed batch is logged and dropped and the stream continues; the
//! sibling importers abort the run on first database error instead.

pub mod xml;

use crate::error::ImportError;
use crate::import::stats::ImportStats;
use crate::lookup::CodeLookups;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::collections::HashMap;
use std::path::Path;

pub use xml::{PatientRecord, PatientSource};

/// How often to report running totals while the stream is being consumed.
const PROGRESS_EVERY_BATCHES: usize = 20;

/// A validated patient row ready for the upsert batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientRow {
    pub codigo: String,
    pub cpf: String,
    pub full_name: String,
    pub gender: String,
    pub city_id: Option<i32>,
    pub neighborhood: String,
    pub has_insurance: bool,
    pub cid_id: Option<i32>,
}

/// Validate and resolve one raw record. `None` drops the record.
///
/// `codigo`, `cpf` and the name are required. An unresolved or
/// non-numeric city code and an unknown CID-10 code leave the respective
/// reference NULL without dropping the record.
pub fn map_record(record: &PatientRecord, lookups: &CodeLookups) -> Option<PatientRow> {
    if record.codigo.is_empty() || record.cpf.is_empty() || record.full_name.is_empty() {
        return None;
    }

    let city_id = record
        .city_code
        .parse::<i32>()
        .ok()
        .and_then(|code| lookups.city_id(code));
    let cid_id = if record.cid_code.is_empty() {
        None
    } else {
        lookups.cid_id(&record.cid_code)
    };

    Some(PatientRow {
        codigo: record.codigo.clone(),
        cpf: record.cpf.clone(),
        full_name: record.full_name.clone(),
        gender: record.gender.clone(),
        city_id,
        neighborhood: record.neighborhood.clone(),
        has_insurance: record.insurance.eq_ignore_ascii_case("SIM"),
        cid_id,
    })
}

/// Columnar accumulator for one upsert statement.
///
/// Rows repeating a `codigo` overwrite the earlier occurrence in place:
/// `ON CONFLICT DO UPDATE` rejects a statement that touches the same key
/// twice, and the later record is the one the source means to keep.
#[derive(Debug, Default)]
struct PatientBatch {
    codigos: Vec<String>,
    cpfs: Vec<String>,
    full_names: Vec<String>,
    genders: Vec<String>,
    city_ids: Vec<Option<i32>>,
    neighborhoods: Vec<String>,
    has_insurance: Vec<bool>,
    cid_ids: Vec<Option<i32>>,
    index: HashMap<String, usize>,
}

impl PatientBatch {
    fn push(&mut self, row: PatientRow) {
        if let Some(&at) = self.index.get(&row.codigo) {
            self.cpfs[at] = row.cpf;
            self.full_names[at] = row.full_name;
            self.genders[at] = row.gender;
            self.city_ids[at] = row.city_id;
            self.neighborhoods[at] = row.neighborhood;
            self.has_insurance[at] = row.has_insurance;
            self.cid_ids[at] = row.cid_id;
            return;
        }

        self.index.insert(row.codigo.clone(), self.codigos.len());
        self.codigos.push(row.codigo);
        self.cpfs.push(row.cpf);
        self.full_names.push(row.full_name);
        self.genders.push(row.gender);
        self.city_ids.push(row.city_id);
        self.neighborhoods.push(row.neighborhood);
        self.has_insurance.push(row.has_insurance);
        self.cid_ids.push(row.cid_id);
    }

    fn len(&self) -> usize {
        self.codigos.len()
    }

    fn is_empty(&self) -> bool {
        self.codigos.is_empty()
    }

    fn clear(&mut self) {
        self.codigos.clear();
        self.cpfs.clear();
        self.full_names.clear();
        self.genders.clear();
        self.city_ids.clear();
        self.neighborhoods.clear();
        self.has_insurance.clear();
        self.cid_ids.clear();
        self.index.clear();
    }
}

async fn upsert_batch(
    conn: &mut PoolConnection<Postgres>,
    batch: &PatientBatch,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO patients
           (codigo, cpf, full_name, gender, city, neighborhood, has_insurance, cid_id, created_at, updated_at)
           SELECT codigo, cpf, full_name, gender, city, neighborhood, has_insurance, cid_id, NOW(), NOW()
           FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::int[], $6::text[], $7::bool[], $8::int[])
               AS t(codigo, cpf, full_name, gender, city, neighborhood, has_insurance, cid_id)
           ON CONFLICT (codigo) DO UPDATE
           SET cpf = EXCLUDED.cpf,
               full_name = EXCLUDED.full_name,
               gender = EXCLUDED.gender,
               city = EXCLUDED.city,
               neighborhood = EXCLUDED.neighborhood,
               has_insurance = EXCLUDED.has_insurance,
               cid_id = EXCLUDED.cid_id,
               updated_at = NOW()"#,
    )
    .bind(&batch.codigos)
    .bind(&batch.cpfs)
    .bind(&batch.full_names)
    .bind(&batch.genders)
    .bind(&batch.city_ids)
    .bind(&batch.neighborhoods)
    .bind(&batch.has_insurance)
    .bind(&batch.cid_ids)
    .execute(&mut **conn)
    .await?;

    Ok(result.rows_affected())
}

/// Drives the streaming import of the patient document.
pub struct PatientImporter<'a> {
    lookups: &'a CodeLookups,
    batch_size: usize,
}

impl<'a> PatientImporter<'a> {
    pub fn new(lookups: &'a CodeLookups, batch_size: usize) -> Self {
        Self {
            lookups,
            batch_size: batch_size.max(1),
        }
    }

    /// Stream the document at `path` into the `patients` table.
    ///
    /// Parse errors abort the run; batches flushed before the error stay
    /// committed. Database errors on a single batch are logged, the batch
    /// is discarded, and the stream continues.
    pub async fn run(
        &self,
        conn: &mut PoolConnection<Postgres>,
        path: &Path,
    ) -> Result<ImportStats, ImportError> {
        let mut source = PatientSource::open(path)?;
        let mut batch = PatientBatch::default();
        let mut stats = ImportStats::default();

        while let Some(record) = source.next_record()? {
            match map_record(&record, self.lookups) {
                Some(row) => {
                    batch.push(row);
                    if batch.len() >= self.batch_size {
                        self.flush(conn, &mut batch, &mut stats).await;
                    }
                }
                None => stats.skipped += 1,
            }
        }

        if !batch.is_empty() {
            self.flush(conn, &mut batch, &mut stats).await;
        }

        log::info!(
            "patient import complete: {} rows written, {} skipped, {} batches ({} failed)",
            stats.inserted,
            stats.skipped,
            stats.batches,
            stats.failed_batches
        );
        Ok(stats)
    }

    async fn flush(
        &self,
        conn: &mut PoolConnection<Postgres>,
        batch: &mut PatientBatch,
        stats: &mut ImportStats,
    ) {
        stats.batches += 1;
        match upsert_batch(conn, batch).await {
            Ok(rows) => {
                stats.inserted += rows as usize;
                log::debug!("flushed batch {} ({} rows)", stats.batches, rows);
            }
            Err(e) => {
                stats.failed_batches += 1;
                log::error!(
                    "batch {} failed, dropping {} rows: {}",
                    stats.batches,
                    batch.len(),
                    e
                );
            }
        }
        batch.clear();

        if stats.batches % PROGRESS_EVERY_BATCHES == 0 {
            log::info!(
                "progress: {} rows written, {} skipped",
                stats.inserted,
                stats.skipped
            );
        }
    }
}
