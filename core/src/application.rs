//! Application bootstrap
//!
//! Loads configuration, connects to Postgres, makes sure the schema is in
//! place and hands back an [`Application`] holding the store.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db;
use crate::handler::HandlerRegistry;
use crate::store::{JobStore, PgJobStore};
use crate::worker::WorkerPool;

/// A connected job queue
pub struct Application {
    pub config: Config,
    pub pool: PgPool,
    pub store: PgJobStore,
}

impl Application {
    /// Create a new Application instance (pure instantiation, no I/O)
    pub fn new(config: Config, pool: PgPool) -> Self {
        Self {
            config,
            store: PgJobStore::new(pool.clone()),
            pool,
        }
    }

    /// Connect with an already loaded configuration
    pub async fn connect(config: Config, auto_migrate: bool) -> Result<Self> {
        let pool = db::create_pool(&config.database).await?;

        if auto_migrate {
            db::migrate(&pool)
                .await
                .context("Failed to run automatic migrations")?;
        } else {
            db::check_initialized(&pool).await?;
        }

        Ok(Self::new(config, pool))
    }

    /// Get the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The store as a shareable trait object
    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::new(self.store.clone())
    }

    /// Start `worker.concurrency` loops and a reaper using the configured
    /// timing and retry policy
    pub fn spawn_workers(&self, handlers: HandlerRegistry, cancel: CancellationToken) -> WorkerPool {
        WorkerPool::spawn(
            self.store(),
            handlers,
            Arc::new(self.config.retry.backoff()),
            &self.config.worker,
            cancel,
        )
    }
}

/// Options for initializing the queue
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Database URL (overrides config file and env vars)
    pub database_url: Option<String>,

    /// Config file path (overrides default search)
    pub config_path: Option<String>,

    /// Whether to run migrations on startup; otherwise the schema must exist
    pub auto_migrate: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            database_url: None,
            config_path: None,
            auto_migrate: true,
        }
    }
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.options.database_url = Some(url.into());
        self
    }

    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn auto_migrate(mut self, auto: bool) -> Self {
        self.options.auto_migrate = auto;
        self
    }

    pub async fn init(self) -> Result<Application> {
        initialize(self.options).await
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration and connect
///
/// Failing to connect here is fatal; after startup every store error is
/// handled by the worker loop.
pub async fn initialize(options: InitOptions) -> Result<Application> {
    let config = Config::builder()
        .database_url(options.database_url)
        .config_path(options.config_path.map(std::path::PathBuf::from))
        .build()?;

    Application::connect(config, options.auto_migrate).await
}
