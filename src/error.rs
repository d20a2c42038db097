use thiserror::Error;

/// Errors surfaced by the import pipelines.
///
/// Setup and decode errors are fatal to the run; the patient path
/// additionally swallows per-batch database errors (see
/// `import::patients`), so `Database` only escapes from the fail-fast
/// reference importers and from lookup loading.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("xml parse error: {0}")]
    Xml(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::XlsxError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid source data: {0}")]
    InvalidSource(String),
}

impl From<quick_xml::Error> for ImportError {
    fn from(e: quick_xml::Error) -> Self {
        ImportError::Xml(e.to_string())
    }
}
