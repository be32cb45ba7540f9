/// jobqueue CLI
///
/// Administrative commands and a standalone worker for the PostgreSQL job
/// queue.
use jobqueue_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
