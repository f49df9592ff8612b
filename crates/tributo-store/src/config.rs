//! Store configuration and pool construction.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::StoreError;

/// Configuration for the Postgres backend.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Maximum pool size.
    pub max_connections: u32,
}

impl StoreConfig {
    /// Load configuration from the environment.
    ///
    /// Variables:
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (default: 10)
    pub fn from_env() -> Result<Self, StoreError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| StoreError::Config("DATABASE_URL is required".into()))?;
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        Ok(Self {
            database_url,
            max_connections,
        })
    }

    /// Open a connection pool.
    pub async fn connect(&self) -> Result<PgPool, StoreError> {
        Ok(PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await?)
    }
}
