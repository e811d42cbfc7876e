use harvester_common::{error::Error, state::DatabaseTrait};
use harvester_migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::info;

use crate::mapping::db_error_to_domain;

#[derive(Debug, Clone)]
pub struct PostgresStateDb {
    pub(crate) conn: DatabaseConnection,
}

impl PostgresStateDb {
    pub async fn new(db_url: &str) -> Result<Self, Error> {
        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.sqlx_logging(false);

        Self::connect_with(opt).await
    }

    pub async fn connect_with(opt: ConnectOptions) -> Result<Self, Error> {
        let conn = Database::connect(opt)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to database: {e}")))?;

        Ok(Self { conn })
    }

    /// Applies every pending schema migration
    /// ---
    /// Safe to call on each start, applied migrations are skipped.
    pub async fn run_migrations(&self) -> Result<(), Error> {
        Migrator::up(&self.conn, None)
            .await
            .map_err(db_error_to_domain)?;

        info!("Database schema is up to date");
        Ok(())
    }
}

/// Implements the [DatabaseTrait] for [PostgresStateDb]
/// This is a wrapper trait around the per-table
/// Harvester DB traits, so the API and the engine can
/// share one `Arc<dyn DatabaseTrait>`.
impl DatabaseTrait for PostgresStateDb {}
