use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::Application;
use crate::config::Config;
use crate::handler::builtin;
use crate::lease::Reaper;
use crate::logging;
use crate::store::JobStore;
use crate::types::{Job, JobFilter, JobState, NewJob};

#[derive(Parser)]
#[command(name = "jobqueue")]
#[command(about = "jobqueue - A durable PostgreSQL-backed job queue", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run database migrations
    Migrate,

    /// Run worker loops and the reaper until Ctrl-C
    Worker {
        /// Number of concurrent worker loops (overrides worker.concurrency)
        #[arg(short = 'c', long)]
        concurrency: Option<usize>,

        /// Only handle these job types (comma-separated)
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
    },

    /// Enqueue a job
    Enqueue {
        /// Job type
        job_type: String,

        /// Payload, stored as raw bytes
        #[arg(short = 'p', long, default_value = "")]
        payload: String,

        /// Total attempt budget
        #[arg(long, default_value = "3")]
        max_attempts: i32,

        /// Seconds before the job becomes eligible
        #[arg(long)]
        delay_secs: Option<u64>,
    },

    /// Show a single job
    Status {
        /// Job ID to query
        job_id: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List jobs, newest first
    List {
        /// Filter by state
        #[arg(short = 's', long = "state")]
        state: Option<String>,

        /// Filter by job type
        #[arg(short = 't', long = "type")]
        job_type: Option<String>,

        /// Number of results (default: 20)
        #[arg(short = 'l', long = "limit", default_value = "20")]
        limit: i64,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Count jobs per state
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Return every job with an expired lease to pending, once
    Reap,

    /// Print the effective configuration, password masked
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let builder = Config::builder()
        .database_url(cli.database_url)
        .config_path(cli.config.map(PathBuf::from));

    // Load and validate before touching the database; `config` only shows it
    let mut config = match cli.command {
        Commands::Config => builder.build_unvalidated()?,
        _ => builder.build()?,
    };
    logging::init(&config.log);

    match cli.command {
        Commands::Migrate => {
            println!("Running migrations...");
            Application::connect(config, true).await?;
            println!("✓ Migrations complete");
        }

        Commands::Worker { concurrency, types } => {
            if let Some(concurrency) = concurrency {
                anyhow::ensure!(concurrency > 0, "--concurrency must be at least 1");
                config.worker.concurrency = concurrency;
            }

            let mut handlers = builtin::registry();
            if !types.is_empty() {
                handlers = handlers.retain(&types);
                anyhow::ensure!(
                    !handlers.is_empty(),
                    "None of the requested types have a handler. Available: {}",
                    builtin::registry().types().join(", ")
                );
            }

            let app = Application::connect(config, false).await?;
            let cancel = CancellationToken::new();
            let pool = app.spawn_workers(handlers, cancel.clone());

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            tracing::info!("shutdown requested, finishing in-flight jobs");

            pool.shutdown();
            pool.join().await?;
        }

        Commands::Enqueue {
            job_type,
            payload,
            max_attempts,
            delay_secs,
        } => {
            let mut job = NewJob::new(job_type, payload.into_bytes()).max_attempts(max_attempts);
            if let Some(secs) = delay_secs {
                job = job.delay(Duration::from_secs(secs));
            }

            let app = Application::connect(config, false).await?;
            let job = app.store.enqueue(job).await?;
            println!("✓ Enqueued job {}", job.id);
        }

        Commands::Status { job_id, json } => {
            let id = Uuid::parse_str(&job_id).with_context(|| format!("Invalid job ID: {}", job_id))?;

            let app = Application::connect(config, false).await?;
            match app.store.get(id).await? {
                Some(job) if json => println!("{}", serde_json::to_string_pretty(&job)?),
                Some(job) => print_job(&job),
                None => {
                    eprintln!("Job {} not found", id);
                    std::process::exit(1);
                }
            }
        }

        Commands::List {
            state,
            job_type,
            limit,
            json,
        } => {
            let state = state
                .as_deref()
                .map(JobState::from_str)
                .transpose()
                .map_err(anyhow::Error::msg)?;

            let filter = JobFilter {
                state,
                job_type,
                limit,
            };

            let app = Application::connect(config, false).await?;
            let jobs = app.store.list(&filter).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
                return Ok(());
            }

            if jobs.is_empty() {
                println!("No jobs found");
                return Ok(());
            }

            println!("Found {} job(s):\n", jobs.len());

            for job in jobs {
                println!(
                    "  {} | {:<10} | {} | {}/{} | {}",
                    job.id, job.state.as_str(), job.job_type, job.attempts, job.max_attempts, job.created_at
                );
            }
        }

        Commands::Stats { json } => {
            let app = Application::connect(config, false).await?;
            let counts = app.store.counts().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                println!("pending:    {}", counts.pending);
                println!("processing: {}", counts.processing);
                println!("succeeded:  {}", counts.succeeded);
                println!("failed:     {}", counts.failed);
                println!("total:      {}", counts.total());
            }
        }

        Commands::Reap => {
            let app = Application::connect(config, false).await?;
            let reaper = Reaper::new(app.store(), app.config.worker.reap_interval());
            let recovered = reaper.reap_once().await?;
            println!("✓ Recovered {} leased job(s)", recovered);
        }

        Commands::Config => {
            print!("{}", config.to_redacted_toml()?);
            if let Err(e) = config.validate() {
                eprintln!("\nWarning: {}", e);
            }
        }
    }

    Ok(())
}

fn print_job(job: &Job) {
    println!("Job: {}", job.id);
    println!("Type: {}", job.job_type);
    println!("State: {}", job.state);
    println!("Attempts: {}/{}", job.attempts, job.max_attempts);
    println!("Available: {}", job.available_at);
    println!("Created: {}", job.created_at);
    println!("Updated: {}", job.updated_at);

    if let Some(started_at) = job.started_at {
        println!("Started: {}", started_at);
    }
    if let Some(lease_expires_at) = job.lease_expires_at {
        println!("Lease expires: {}", lease_expires_at);
    }

    if !job.payload.is_empty() {
        println!("\nPayload:");
        println!("  {}", String::from_utf8_lossy(&job.payload));
    }

    if let Some(error) = &job.last_error {
        println!("\nLast error:");
        println!("  {}", error);
    }
}
