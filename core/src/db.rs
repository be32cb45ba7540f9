use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;

pub mod jobs;

#[cfg(test)]
pub mod test_helpers;

#[cfg(test)]
mod tests;

/// Create a connection pool from database configuration
///
/// Connects eagerly so an unreachable database surfaces here, at startup.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config
        .url
        .as_deref()
        .context("database.url is not configured")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .connect(url)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

/// Run database migrations
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;

    Ok(())
}

/// Check that the jobs table exists
pub async fn check_initialized(pool: &PgPool) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT to_regclass('public.jobs') IS NOT NULL")
        .fetch_one(pool)
        .await
        .context("Failed to check database schema")?;

    if !exists {
        anyhow::bail!(
            "Database has not been initialized\n\n\
            Please run migrations first:\n\
              jobqueue migrate"
        );
    }

    Ok(())
}
