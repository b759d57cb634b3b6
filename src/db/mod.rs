use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use thiserror::Error;
use tracing::info;

use crate::config::AppConfig;

pub mod models;
pub mod services;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Builds connection options from the config. An explicit URL wins; otherwise
/// the database name is combined with the libpq environment (`PGHOST`, `PGUSER`, ...).
pub fn connect_options(config: &AppConfig) -> Result<PgConnectOptions, StoreError> {
    match &config.database_url {
        Some(url) => Ok(url.parse::<PgConnectOptions>()?),
        None => Ok(PgConnectOptions::new().database(&config.database_name)),
    }
}

/// Opens the pool eagerly so an unreachable database fails at startup.
pub async fn connect(config: &AppConfig) -> Result<PgPool, StoreError> {
    let options = connect_options(config)?;
    info!(database = %options.get_database().unwrap_or(config.database_name.as_str()), "db: connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect_with(options)
        .await?;
    info!("db: connected");
    Ok(pool)
}
