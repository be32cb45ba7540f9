//! Shared setup for tests that need a real PostgreSQL database
//!
//! Tests using these helpers are `#[ignore]`d by default; run them with
//! `JOBQUEUE_DATABASE_URL` pointing at a scratch database and `--ignored`.

use sqlx::PgPool;
use std::ops::Deref;
use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::DatabaseConfig;

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Test database pool, held together with the lock that serializes tests
pub struct TestPool {
    pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

impl Deref for TestPool {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

/// Connect, migrate and empty the jobs table
///
/// Tests share one table, so they run one at a time.
pub async fn with_test_db() -> TestPool {
    let guard = TEST_DB_LOCK.get_or_init(|| Mutex::new(())).lock().await;

    let config = DatabaseConfig {
        url: Some(
            std::env::var("JOBQUEUE_DATABASE_URL")
                .expect("JOBQUEUE_DATABASE_URL must be set for database tests"),
        ),
        max_connections: 20,
        ..DatabaseConfig::default()
    };

    let pool = super::create_pool(&config)
        .await
        .expect("Failed to connect to test database");
    super::migrate(&pool).await.expect("Failed to migrate test database");

    sqlx::query("TRUNCATE TABLE jobs")
        .execute(&pool)
        .await
        .expect("Failed to truncate jobs");

    TestPool {
        pool,
        _guard: guard,
    }
}

/// Move a job's eligibility time relative to the database clock
pub async fn set_available_in(pool: &PgPool, id: uuid::Uuid, secs: f64) {
    sqlx::query("UPDATE jobs SET available_at = NOW() + make_interval(secs => $2) WHERE id = $1")
        .bind(id)
        .bind(secs)
        .execute(pool)
        .await
        .expect("Failed to update available_at");
}
