//! CID-10 catalogue import from the reference spreadsheet.
//!
//! The first worksheet carries one entry per row in its first column,
//! shaped `"A00 - Cholera"`, interleaved with chapter headers and totals
//! that are not entries.

use crate::error::ImportError;
use crate::import::stats::ImportStats;
use calamine::{open_workbook, Reader, Xlsx};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use std::path::Path;

const BATCH_SIZE: usize = 3000;

/// Parse one first-column cell into a (code, name) pair.
///
/// Chapter headers, total lines and blanks yield `None`. The cell is
/// split on the first `" - "` only; descriptions may contain the
/// separator themselves.
pub fn parse_cid_entry(cell: &str) -> Option<(String, String)> {
    let cell = cell.trim();
    if cell.is_empty() || cell.starts_with("Capítulo") || cell.starts_with("Total") {
        return None;
    }

    let (code, name) = cell.split_once(" - ")?;
    let (code, name) = (code.trim(), name.trim());
    if code.is_empty() || name.is_empty() {
        return None;
    }
    Some((code.to_string(), name.to_string()))
}

async fn upsert_cids(
    conn: &mut PoolConnection<Postgres>,
    codes: &[String],
    names: &[String],
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO cids (code, name, created_at, updated_at)
           SELECT code, name, NOW(), NOW()
           FROM UNNEST($1::text[], $2::text[]) AS t(code, name)
           ON CONFLICT (code) DO UPDATE
           SET name = EXCLUDED.name,
               updated_at = NOW()"#,
    )
    .bind(codes)
    .bind(names)
    .execute(&mut **conn)
    .await?;

    Ok(result.rows_affected())
}

/// Upsert prepared (code, name) entries, keyed on the CID-10 code.
///
/// Split out from the spreadsheet decode so the write path can be
/// exercised without an `.xlsx` fixture.
pub async fn import_cid_entries(
    conn: &mut PoolConnection<Postgres>,
    entries: impl IntoIterator<Item = (String, String)>,
) -> Result<ImportStats, ImportError> {
    let mut codes = Vec::new();
    let mut names = Vec::new();
    let mut stats = ImportStats::default();

    for (code, name) in entries {
        codes.push(code);
        names.push(name);
        if codes.len() >= BATCH_SIZE {
            stats.inserted += upsert_cids(conn, &codes, &names).await? as usize;
            stats.batches += 1;
            codes.clear();
            names.clear();
        }
    }

    if !codes.is_empty() {
        stats.inserted += upsert_cids(conn, &codes, &names).await? as usize;
        stats.batches += 1;
    }

    Ok(stats)
}

/// Read the CID-10 spreadsheet and upsert its entries. A workbook that
/// produces no entries at all is treated as a bad source file.
pub async fn import_cids(
    conn: &mut PoolConnection<Postgres>,
    path: &Path,
) -> Result<ImportStats, ImportError> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::InvalidSource("spreadsheet has no worksheets".to_string()))??;

    let mut entries = Vec::new();
    for row in range.rows() {
        let Some(cell) = row.first() else { continue };
        if let Some(entry) = parse_cid_entry(&cell.to_string()) {
            entries.push(entry);
        }
    }

    if entries.is_empty() {
        return Err(ImportError::InvalidSource(
            "no CID-10 entries found in spreadsheet".to_string(),
        ));
    }

    let stats = import_cid_entries(conn, entries).await?;
    log::info!("cid import complete: {} rows written", stats.inserted);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_code_and_name() {
        assert_eq!(
            parse_cid_entry("A00 - Cólera"),
            Some(("A00".to_string(), "Cólera".to_string()))
        );
    }

    #[test]
    fn splits_on_the_first_separator_only() {
        assert_eq!(
            parse_cid_entry("Z37 - Resultado do parto - complemento"),
            Some((
                "Z37".to_string(),
                "Resultado do parto - complemento".to_string()
            ))
        );
    }

    #[test]
    fn rejects_headers_totals_and_blanks() {
        assert_eq!(parse_cid_entry("Capítulo I - Algumas doenças"), None);
        assert_eq!(parse_cid_entry("Total de registros"), None);
        assert_eq!(parse_cid_entry("   "), None);
        assert_eq!(parse_cid_entry("sem separador"), None);
        assert_eq!(parse_cid_entry(" - nome sem código"), None);
    }
}
