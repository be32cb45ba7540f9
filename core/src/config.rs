//! Configuration loading
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. TOML config file (`--config`, `JOBQUEUE_CONFIG_PATH`, or `./jobqueue.toml`)
//! 3. Environment variables `JOBQUEUE__<SECTION>__<KEY>` (e.g. `JOBQUEUE__WORKER__CONCURRENCY`)
//! 4. `JOBQUEUE_DATABASE_URL`
//! 5. Explicit builder overrides (CLI flags)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::lease::LeaseSettings;
use crate::retry::Backoff;

pub const DEFAULT_CONFIG_FILE: &str = "jobqueue.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Independent worker loops per process, each with one job in flight
    pub concurrency: usize,
    pub lease_duration_secs: u64,
    /// Renew the lease on this interval while a handler runs
    pub renew_interval_secs: Option<u64>,
    /// Sleep when no job is eligible
    pub idle_interval_ms: u64,
    /// Sleep after a failed claim
    pub error_backoff_ms: u64,
    pub reap_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            lease_duration_secs: 30,
            renew_interval_secs: None,
            idle_interval_ms: 2_000,
            error_backoff_ms: 5_000,
            reap_interval_secs: 5,
        }
    }
}

impl WorkerConfig {
    pub fn lease(&self) -> LeaseSettings {
        LeaseSettings {
            duration: Duration::from_secs(self.lease_duration_secs),
            renew_interval: self.renew_interval_secs.map(Duration::from_secs),
        }
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: RetryStrategy,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Linear,
            base_delay_secs: 5,
            max_delay_secs: 3_600,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        let base = Duration::from_secs(self.base_delay_secs);
        let max = Duration::from_secs(self.max_delay_secs);
        match self.strategy {
            RetryStrategy::Fixed => Backoff::Fixed { delay: base },
            RetryStrategy::Linear => Backoff::Linear { base, max },
            RetryStrategy::Exponential => Backoff::Exponential { base, max },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from the default sources
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn validate(&self) -> Result<()> {
        match self.database.url.as_deref() {
            Some(url) if !url.trim().is_empty() => {}
            _ => anyhow::bail!(
                "Database URL is not configured\n\n\
                Set one of:\n\
                  - database.url in {}\n\
                  - JOBQUEUE_DATABASE_URL environment variable\n\
                  - --database-url flag",
                DEFAULT_CONFIG_FILE
            ),
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be greater than 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "database.min_connections ({}) must not exceed database.max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        let worker = &self.worker;
        if worker.concurrency == 0 {
            anyhow::bail!("worker.concurrency must be greater than 0");
        }
        if worker.lease_duration_secs == 0 {
            anyhow::bail!("worker.lease_duration_secs must be greater than 0");
        }
        if worker.idle_interval_ms == 0 {
            anyhow::bail!("worker.idle_interval_ms must be greater than 0");
        }
        if worker.error_backoff_ms == 0 {
            anyhow::bail!("worker.error_backoff_ms must be greater than 0");
        }
        if worker.reap_interval_secs == 0 {
            anyhow::bail!("worker.reap_interval_secs must be greater than 0");
        }
        if let Some(renew) = worker.renew_interval_secs {
            if renew == 0 || renew >= worker.lease_duration_secs {
                anyhow::bail!(
                    "worker.renew_interval_secs ({}) must be between 1 and lease_duration_secs ({})",
                    renew,
                    worker.lease_duration_secs
                );
            }
        }

        if self.retry.base_delay_secs == 0 {
            anyhow::bail!("retry.base_delay_secs must be greater than 0");
        }
        if self.retry.max_delay_secs < self.retry.base_delay_secs {
            anyhow::bail!("retry.max_delay_secs must be at least retry.base_delay_secs");
        }

        Ok(())
    }

    /// Render as TOML with the database password masked
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        shown.database.url = shown.database.url.as_deref().map(redact_url);
        toml::to_string_pretty(&shown).context("Failed to render configuration")
    }
}

/// Replace the password component of a connection URL with `***`
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => url.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    database_url: Option<String>,
    config_path: Option<PathBuf>,
}

impl ConfigBuilder {
    pub fn database_url(mut self, url: Option<String>) -> Self {
        self.database_url = url;
        self
    }

    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Merge all sources, then validate
    pub fn build(self) -> Result<Config> {
        let config = self.build_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn build_unvalidated(self) -> Result<Config> {
        dotenvy::dotenv().ok();

        let mut builder = ::config::Config::builder();

        let explicit_path = self
            .config_path
            .or_else(|| std::env::var("JOBQUEUE_CONFIG_PATH").ok().map(PathBuf::from));

        builder = match explicit_path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                builder.add_source(::config::File::from(path))
            }
            None => builder.add_source(::config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder = builder.add_source(
            ::config::Environment::with_prefix("JOBQUEUE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let database_url = self
            .database_url
            .or_else(|| std::env::var("JOBQUEUE_DATABASE_URL").ok());
        builder = builder
            .set_override_option("database.url", database_url)
            .context("Failed to apply database URL override")?;

        let config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config::default();
        config.database.url = Some("postgres://localhost/jobqueue".to_string());
        config
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.worker.lease_duration_secs, 30);
        assert_eq!(config.worker.idle_interval(), Duration::from_secs(2));
        assert_eq!(config.worker.error_backoff(), Duration::from_secs(5));
        assert_eq!(config.worker.reap_interval(), Duration::from_secs(5));
        assert_eq!(config.retry.strategy, RetryStrategy::Linear);
        assert_eq!(config.retry.base_delay_secs, 5);
    }

    #[test]
    fn missing_url_is_rejected() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("Database URL"));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn renew_interval_must_be_shorter_than_lease() {
        let mut config = valid();
        config.worker.renew_interval_secs = Some(30);
        assert!(config.validate().is_err());

        config.worker.renew_interval_secs = Some(10);
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.lease().renew_interval, Some(Duration::from_secs(10)));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = valid();
        config.worker.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn pool_bounds_are_checked() {
        let mut config = valid();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml_sections() {
        let config: Config = toml::from_str(
            r#"
            [database]
            url = "postgres://app:secret@db/jobs"

            [worker]
            concurrency = 4
            renew_interval_secs = 10

            [retry]
            strategy = "exponential"
            base_delay_secs = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.worker.lease_duration_secs, 30);
        assert_eq!(config.retry.strategy, RetryStrategy::Exponential);
        assert_eq!(config.retry.max_delay_secs, 3_600);
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn redacts_password() {
        assert_eq!(
            redact_url("postgres://app:secret@db:5432/jobs"),
            "postgres://app:***@db:5432/jobs"
        );
        assert_eq!(redact_url("postgres://db/jobs"), "postgres://db/jobs");

        let rendered = {
            let mut config = valid();
            config.database.url = Some("postgres://app:secret@db/jobs".to_string());
            config.to_redacted_toml().unwrap()
        };
        assert!(rendered.contains("app:***@db"));
        assert!(!rendered.contains("secret"));
    }
}
