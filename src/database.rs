use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, error, info};

use crate::config::AppConfig;

/// Pool bounds per §5: min 5 / max 20 connections, 5-minute idle timeout.
pub async fn get_connection_pool(config: &AppConfig) -> Result<PgPool, sqlx::Error> {
    info!("creating database connection pool");

    debug!("connecting to database");

    PgPoolOptions::new()
        .min_connections(5)
        .max_connections(20)
        .idle_timeout(Duration::from_secs(5 * 60))
        .connect(&config.database_url)
        .await
}

pub async fn migrate_database(pool: &PgPool) -> Result<(), sqlx::Error> {
    info!("running database migrations");
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        error!("migration error: {}", e);
        sqlx::Error::Protocol(format!("migration error: {}", e))
    })
}
