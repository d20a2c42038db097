pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod lookup;

pub use error::ImportError;

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    //! Ephemeral-database plumbing for integration tests.
    //!
    //! `TestDatabase` provisions a throwaway PostgreSQL database on the
    //! server named by `TEST_DATABASE_URL` (or inside a disposable
    //! container when unset), creates the reference schema, and drops the
    //! database on `close()`. Tests that cannot provision one should skip
    //! rather than fail.

    use log::LevelFilter;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use sqlx::{ConnectOptions, PgPool};
    use testcontainers_modules::postgres::Postgres;
    use testcontainers_modules::testcontainers::{
        core::error::TestcontainersError, runners::AsyncRunner, ContainerAsync,
    };
    use thiserror::Error;
    use uuid::Uuid;

    #[derive(Debug, Error)]
    pub enum TestDatabaseError {
        #[error("database error: {0}")]
        Sqlx(#[from] sqlx::Error),
        #[error("container error: {0}")]
        Container(#[from] TestcontainersError),
    }

    /// The tables the importer writes into. The importer itself never
    /// creates schema; tests have to.
    const SCHEMA_DDL: &[&str] = &[
        r#"CREATE TABLE IF NOT EXISTS states (
            id SMALLINT PRIMARY KEY,
            uf TEXT NOT NULL,
            name TEXT NOT NULL,
            latitude DOUBLE PRECISION NOT NULL,
            longitude DOUBLE PRECISION NOT NULL,
            region TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS cities (
            id SERIAL PRIMARY KEY,
            city_code INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            latitude DOUBLE PRECISION NOT NULL,
            longitude DOUBLE PRECISION NOT NULL,
            is_capital BOOLEAN NOT NULL DEFAULT FALSE,
            state_id SMALLINT NOT NULL,
            siafi_id INTEGER NOT NULL,
            area_code SMALLINT NOT NULL,
            time_zone TEXT NOT NULL,
            population INTEGER NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS cids (
            id SERIAL PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS hospitals (
            id SERIAL PRIMARY KEY,
            hospital_code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            city INTEGER NOT NULL,
            neighborhood TEXT NOT NULL,
            total_beds INTEGER NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS specialties (
            id SERIAL PRIMARY KEY,
            hospital_id INTEGER NOT NULL REFERENCES hospitals(id),
            name TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (hospital_id, name)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS doctors (
            id SERIAL PRIMARY KEY,
            doctor_code TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            specialty TEXT NOT NULL,
            city TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS patients (
            id SERIAL PRIMARY KEY,
            codigo TEXT NOT NULL UNIQUE,
            cpf TEXT NOT NULL,
            full_name TEXT NOT NULL,
            gender TEXT NOT NULL,
            city INTEGER,
            neighborhood TEXT NOT NULL,
            has_insurance BOOLEAN NOT NULL DEFAULT FALSE,
            cid_id INTEGER,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
    ];

    /// Create every table the importer targets.
    pub async fn create_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
        for ddl in SCHEMA_DDL {
            sqlx::query(ddl).execute(pool).await?;
        }
        Ok(())
    }

    /// Ephemeral database factory for integration tests.
    pub struct TestDatabase {
        pool: Option<PgPool>,
        admin_options: PgConnectOptions,
        database_name: String,
        container: Option<ContainerAsync<Postgres>>,
    }

    impl TestDatabase {
        /// Provision a fresh database: from `TEST_DATABASE_URL` when set,
        /// otherwise by launching a disposable Postgres container.
        pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
            match std::env::var("TEST_DATABASE_URL") {
                Ok(url) => Self::from_admin_url(&url, None).await,
                Err(_) => Self::with_container().await,
            }
        }

        async fn with_container() -> Result<Self, TestDatabaseError> {
            let container = Postgres::default().start().await?;
            let host = container.get_host().await?.to_string();
            let port = container.get_host_port_ipv4(5432).await?;
            let admin_url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
            Self::from_admin_url(&admin_url, Some(container)).await
        }

        async fn from_admin_url(
            admin_url: &str,
            container: Option<ContainerAsync<Postgres>>,
        ) -> Result<Self, TestDatabaseError> {
            let base_options: PgConnectOptions =
                admin_url.parse().map_err(TestDatabaseError::Sqlx)?;
            let base_options = base_options.log_statements(LevelFilter::Off);
            let admin_options = base_options.clone();

            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options.clone())
                .await?;

            let database_name = format!("medimport_test_{}", Uuid::new_v4().simple());
            let create_sql = format!("CREATE DATABASE \"{database_name}\" TEMPLATE template0");
            sqlx::query(&create_sql).execute(&admin_pool).await?;
            admin_pool.close().await;

            let pool = PgPoolOptions::new()
                .max_connections(2)
                .connect_with(base_options.database(&database_name))
                .await?;

            create_schema(&pool).await?;

            Ok(Self {
                pool: Some(pool),
                admin_options,
                database_name,
                container,
            })
        }

        pub fn pool(&self) -> &PgPool {
            self.pool.as_ref().expect("test database pool is available")
        }

        pub fn pool_clone(&self) -> PgPool {
            self.pool().clone()
        }

        /// Close pool connections and drop the ephemeral database.
        pub async fn close(mut self) -> Result<(), TestDatabaseError> {
            if let Some(pool) = self.pool.take() {
                pool.close().await;
            }

            // All sessions are gone once the pool is closed, so a plain
            // DROP works on any server version.
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(self.admin_options.clone())
                .await?;
            let drop_sql = format!("DROP DATABASE \"{}\"", self.database_name);
            sqlx::query(&drop_sql).execute(&admin_pool).await?;
            admin_pool.close().await;

            if let Some(container) = self.container.take() {
                drop(container);
            }

            Ok(())
        }
    }
}
