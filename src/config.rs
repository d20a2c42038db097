use crate::error::ImportError;
use sqlx::postgres::PgConnectOptions;
use std::env;

/// Batch threshold for the patient XML path when `IMPORT_BATCH_SIZE` is unset.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Database connection settings plus the default batch size for the
/// patient import. Read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub batch_size: usize,
}

impl Config {
    /// Build the configuration from `DB_HOST`, `DB_PORT`, `DB_USER`,
    /// `DB_PASSWORD`, `DB_NAME` and `IMPORT_BATCH_SIZE`. Only `DB_NAME`
    /// is required.
    pub fn from_env() -> Result<Self, ImportError> {
        let host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = match env::var("DB_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ImportError::Config(format!("invalid DB_PORT '{raw}'")))?,
            Err(_) => 5432,
        };
        let user = env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string());
        let password = env::var("DB_PASSWORD").unwrap_or_default();
        let database = env::var("DB_NAME")
            .map_err(|_| ImportError::Config("DB_NAME is not set".to_string()))?;
        let batch_size = match env::var("IMPORT_BATCH_SIZE") {
            Ok(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ImportError::Config(format!(
                        "invalid IMPORT_BATCH_SIZE '{raw}'"
                    )));
                }
            },
            Err(_) => DEFAULT_BATCH_SIZE,
        };

        Ok(Self {
            host,
            port,
            user,
            password,
            database,
            batch_size,
        })
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}
