//! API Key Rotation CLI
//!
//! This is the main entry point for the CLI application.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use api_key_rotator::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first so --verbose can raise the default level
    let cli = cli::Cli::parse();

    let default_filter = if cli.verbose {
        "info,api_key_rotator=debug"
    } else {
        "info"
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    // Execute the command
    cli::execute(cli).await
}
