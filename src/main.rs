//! `llm`: ask a language model questions, with tools from MCP servers.

use std::process::ExitCode;

use clap::Parser;
use mimalloc::MiMalloc;

use llm_mcp_cli::{app, config::Cli, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env (if present)
    let _ = dotenvy::dotenv();

    telemetry::init();

    let cli = Cli::parse();
    match app::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "Exiting with error");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
