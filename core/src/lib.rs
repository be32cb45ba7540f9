//! Durable PostgreSQL-backed job queue
//!
//! Jobs are claimed with a time-bounded lease, run by a registered handler and
//! reported back as succeeded, retried after a backoff, or failed. A reaper
//! returns jobs whose lease expired to pending.

pub mod application;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod lease;
pub mod logging;
pub mod retry;
pub mod store;
pub mod types;
pub mod worker;

// Re-export main types
pub use types::*;

pub use application::{initialize, Application, InitBuilder, InitOptions};
pub use error::StoreError;
pub use handler::{handler_fn, HandlerRegistry, JobContext, JobHandler};
pub use lease::{LeaseSettings, Reaper};
pub use retry::{Backoff, RetryPolicy};
pub use store::{JobStore, MemoryJobStore, PgJobStore};
pub use worker::{Worker, WorkerPool};
