use crate::config::Config;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Connect to the target database.
///
/// The pool is capped at a single connection: every statement in a run is
/// serialized through it, which is all the importer needs.
pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(1)
        .connect_with(config.connect_options())
        .await
}
