use medimport::import::patients::PatientImporter;
use medimport::lookup::CodeLookups;
use medimport::test_support::TestDatabase;
use medimport::ImportError;
use sqlx::PgPool;
use std::io::Write;
use tempfile::NamedTempFile;

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(err) => {
            eprintln!("skipping test: could not provision a database: {err}");
            None
        }
    }
}

/// Seed one city and one CID row; returns their generated ids.
async fn seed_reference_rows(pool: &PgPool) -> (i32, i32) {
    let (city_id,): (i32,) = sqlx::query_as(
        "INSERT INTO cities (city_code, name, latitude, longitude, is_capital, state_id, siafi_id, area_code, time_zone, population)
         VALUES (3550308, 'São Paulo', -23.5505, -46.6333, TRUE, 35, 7107, 11, 'America/Sao_Paulo', 12396372)
         RETURNING id",
    )
    .fetch_one(pool)
    .await
    .expect("seed city");

    let (cid_id,): (i32,) =
        sqlx::query_as("INSERT INTO cids (code, name) VALUES ('A00', 'Cólera') RETURNING id")
            .fetch_one(pool)
            .await
            .expect("seed cid");

    (city_id, cid_id)
}

fn write_xml(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write xml");
    file.flush().expect("flush xml");
    file
}

fn patient(codigo: &str, cpf: &str, name: &str, city: &str, cid: &str, convenio: &str) -> String {
    format!(
        "<Paciente>\
           <Codigo>{codigo}</Codigo>\
           <CPF>{cpf}</CPF>\
           <Nome_Completo>{name}</Nome_Completo>\
           <Genero>F</Genero>\
           <Cod_municipio>{city}</Cod_municipio>\
           <Bairro>Centro</Bairro>\
           <Convenio>{convenio}</Convenio>\
           <CID-10>{cid}</CID-10>\
         </Paciente>"
    )
}

async fn patient_count(pool: &PgPool) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM patients")
        .fetch_one(pool)
        .await
        .expect("count patients");
    count
}

#[tokio::test]
async fn records_are_validated_resolved_and_upserted() {
    let Some(db) = provision().await else { return };
    let pool = db.pool_clone();
    let (city_id, cid_id) = seed_reference_rows(&pool).await;

    let xml = format!(
        "<Pacientes>{}{}{}{}{}</Pacientes>",
        patient("P001", "11111111111", "Maria da Silva", "3550308", "A00", "SIM"),
        // Missing CPF: the whole record is dropped.
        patient("P002", "", "Joao Souza", "3550308", "A00", "SIM"),
        // Unknown city code: kept, city reference NULL.
        patient("P003", "22222222222", "Ana Lima", "9999999", "A00", "sim"),
        // Non-numeric city code and unknown CID: kept, both references NULL.
        patient("P004", "33333333333", "Rui Alves", "35x", "Z99", "NAO"),
        patient("P005", "44444444444", "Lia Costa", "3550308", "", ""),
    );
    let file = write_xml(&xml);

    let mut conn = pool.acquire().await.expect("acquire");
    let lookups = CodeLookups::load(&mut conn).await.expect("lookups");
    let stats = PatientImporter::new(&lookups, 2)
        .run(&mut conn, file.path())
        .await
        .expect("import");

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.inserted, 4);
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.failed_batches, 0);
    assert_eq!(patient_count(&pool).await, 4);

    let rows: Vec<(String, Option<i32>, Option<i32>, bool)> = sqlx::query_as(
        "SELECT codigo, city, cid_id, has_insurance FROM patients ORDER BY codigo",
    )
    .fetch_all(&pool)
    .await
    .expect("fetch patients");

    assert_eq!(
        rows,
        vec![
            ("P001".to_string(), Some(city_id), Some(cid_id), true),
            ("P003".to_string(), None, Some(cid_id), true),
            ("P004".to_string(), None, None, false),
            ("P005".to_string(), Some(city_id), None, false),
        ]
    );

    db.close().await.expect("drop test database");
}

#[tokio::test]
async fn reimport_is_idempotent() {
    let Some(db) = provision().await else { return };
    let pool = db.pool_clone();
    seed_reference_rows(&pool).await;

    let xml = format!(
        "<Pacientes>{}{}</Pacientes>",
        patient("P001", "11111111111", "Maria da Silva", "3550308", "A00", "SIM"),
        patient("P002", "22222222222", "Joao Souza", "", "", "NAO"),
    );
    let file = write_xml(&xml);

    let mut conn = pool.acquire().await.expect("acquire");
    let lookups = CodeLookups::load(&mut conn).await.expect("lookups");
    let importer = PatientImporter::new(&lookups, 10);

    importer.run(&mut conn, file.path()).await.expect("first run");
    let (created_before, name_before): (chrono::DateTime<chrono::Utc>, String) =
        sqlx::query_as("SELECT created_at, full_name FROM patients WHERE codigo = 'P001'")
            .fetch_one(&pool)
            .await
            .expect("first row");

    importer.run(&mut conn, file.path()).await.expect("second run");

    assert_eq!(patient_count(&pool).await, 2);
    let (created_after, name_after): (chrono::DateTime<chrono::Utc>, String) =
        sqlx::query_as("SELECT created_at, full_name FROM patients WHERE codigo = 'P001'")
            .fetch_one(&pool)
            .await
            .expect("second row");

    assert_eq!(created_before, created_after);
    assert_eq!(name_before, name_after);

    db.close().await.expect("drop test database");
}

#[tokio::test]
async fn empty_document_imports_nothing() {
    let Some(db) = provision().await else { return };
    let pool = db.pool_clone();
    seed_reference_rows(&pool).await;

    let file = write_xml("<Pacientes></Pacientes>");

    let mut conn = pool.acquire().await.expect("acquire");
    let lookups = CodeLookups::load(&mut conn).await.expect("lookups");
    let stats = PatientImporter::new(&lookups, 2)
        .run(&mut conn, file.path())
        .await
        .expect("import");

    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.batches, 0);
    assert_eq!(patient_count(&pool).await, 0);

    db.close().await.expect("drop test database");
}

#[tokio::test]
async fn malformed_document_keeps_batches_flushed_before_the_error() {
    let Some(db) = provision().await else { return };
    let pool = db.pool_clone();
    seed_reference_rows(&pool).await;

    // Three valid records, then the document breaks off inside a fourth.
    let xml = format!(
        "<Pacientes>{}{}{}<Paciente><Codigo>P9",
        patient("P001", "11111111111", "Maria da Silva", "3550308", "A00", "SIM"),
        patient("P002", "22222222222", "Joao Souza", "", "", "NAO"),
        patient("P003", "33333333333", "Ana Lima", "3550308", "", "SIM"),
    );
    let file = write_xml(&xml);

    let mut conn = pool.acquire().await.expect("acquire");
    let lookups = CodeLookups::load(&mut conn).await.expect("lookups");
    let result = PatientImporter::new(&lookups, 2)
        .run(&mut conn, file.path())
        .await;

    assert!(matches!(result, Err(ImportError::Xml(_))));
    // The first full batch was committed; the buffered third record was not.
    assert_eq!(patient_count(&pool).await, 2);

    db.close().await.expect("drop test database");
}

#[tokio::test]
async fn batch_count_is_row_count_over_batch_size_rounded_up() {
    let Some(db) = provision().await else { return };
    let pool = db.pool_clone();
    seed_reference_rows(&pool).await;

    let records: String = (1..=5)
        .map(|i| {
            patient(
                &format!("P{i:03}"),
                &format!("{i:011}"),
                "Paciente Teste",
                "3550308",
                "A00",
                "SIM",
            )
        })
        .collect();
    let file = write_xml(&format!("<Pacientes>{records}</Pacientes>"));

    let mut conn = pool.acquire().await.expect("acquire");
    let lookups = CodeLookups::load(&mut conn).await.expect("lookups");
    let stats = PatientImporter::new(&lookups, 2)
        .run(&mut conn, file.path())
        .await
        .expect("import");

    assert_eq!(stats.inserted, 5);
    assert_eq!(stats.batches, 3);

    db.close().await.expect("drop test database");
}
