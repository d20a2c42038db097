use clap::Parser;
use log::LevelFilter;
use medimport::config::Config;
use medimport::import::patients::PatientImporter;
use medimport::import::{cid, cities, doctors, hospitals, states, ImportStats};
use medimport::lookup::CodeLookups;
use medimport::{db, ImportError};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;

/// Batch importer for the medical reference database.
#[derive(Parser, Debug)]
#[command(
    name = "medimport",
    about = "Import medical reference data (CSV, XML, spreadsheet) into PostgreSQL"
)]
struct Args {
    /// Directory holding the source data files.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Batch size for the patient XML import (overrides IMPORT_BATCH_SIZE).
    #[arg(long)]
    batch_size: Option<usize>,

    /// File receiving a copy of the console log output.
    #[arg(long, default_value = "import.log")]
    log_file: PathBuf,
}

fn init_logging(log_file: &Path) -> Result<(), ImportError> {
    let file = File::create(log_file)?;
    let config = ConfigBuilder::new().build();

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, config, file),
    ])
    .map_err(|e| ImportError::Config(format!("logger init failed: {e}")))
}

/// Run one importer if its source file exists, otherwise warn and move on.
macro_rules! import_if_present {
    ($total:expr, $path:expr, $label:expr, $run:expr) => {
        if $path.exists() {
            let stats = $run.await?;
            log::info!("{} imported: {} ({} skipped)", $label, stats.inserted, stats.skipped);
            $total.merge(&stats);
        } else {
            log::warn!("source file not found, skipping: {}", $path.display());
        }
    };
}

async fn run(args: Args) -> Result<(), ImportError> {
    let mut config = Config::from_env()?;
    if let Some(batch_size) = args.batch_size {
        if batch_size == 0 {
            return Err(ImportError::Config("batch size must be at least 1".to_string()));
        }
        config.batch_size = batch_size;
    }

    log::info!(
        "connecting to {}:{}/{}",
        config.host,
        config.port,
        config.database
    );
    let pool = db::connect(&config).await?;
    let mut conn = pool.acquire().await?;

    let estados = args.data_dir.join("estados.csv");
    let municipios = args.data_dir.join("municipios.csv");
    let hospitais = args.data_dir.join("hospitais.csv");
    let medicos = args.data_dir.join("medicos.csv");
    let cid10 = args.data_dir.join("tabela CID-10.xlsx");
    let pacientes = args.data_dir.join("pacientes.xml");

    let mut total = ImportStats::default();

    // Reference tables first, in foreign-key order, so the code snapshots
    // are complete before anything resolves against them.
    import_if_present!(total, estados, "states", states::import_states(&mut conn, &estados));
    import_if_present!(
        total,
        municipios,
        "cities",
        cities::import_cities(&mut conn, &municipios)
    );
    import_if_present!(total, cid10, "cids", cid::import_cids(&mut conn, &cid10));

    let lookups = CodeLookups::load(&mut conn).await?;

    import_if_present!(
        total,
        hospitais,
        "hospitals",
        hospitals::import_hospitals(&mut conn, &hospitais, &lookups)
    );
    import_if_present!(
        total,
        hospitais,
        "specialties",
        hospitals::import_specialties(&mut conn, &hospitais)
    );
    import_if_present!(
        total,
        medicos,
        "doctors",
        doctors::import_doctors(&mut conn, &medicos)
    );

    if pacientes.exists() {
        let importer = PatientImporter::new(&lookups, config.batch_size);
        let stats = importer.run(&mut conn, &pacientes).await?;
        log::info!(
            "patients imported: {} ({} skipped)",
            stats.inserted,
            stats.skipped
        );
        total.merge(&stats);
    } else {
        log::warn!("source file not found, skipping: {}", pacientes.display());
    }

    log::info!(
        "import finished: {} rows written, {} records skipped",
        total.inserted,
        total.skipped
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(err) = init_logging(&args.log_file) {
        eprintln!("error: {err}");
        process::exit(1);
    }

    if let Err(err) = run(args).await {
        log::error!("import failed: {err}");
        process::exit(1);
    }
}
