#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::multiple_crate_versions)]

//! Main entry point for the BlinkChat server CLI.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::server::Config;
use std::error::Error;
use std::path::PathBuf;

/// Main CLI structure for the BlinkChat server
#[derive(Parser)]
#[command(name = "blinkchat-server")]
#[command(about = "Real-time chat backend: REST API and WebSocket broker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for the BlinkChat CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Start the server
    Serve {
        /// The port number to bind the server to (e.g., 8080). Overrides the configuration.
        #[arg(
            long,
            short,
            help = "The port number to bind the server to (e.g., 8080). Overrides file and environment settings."
        )]
        port: Option<u16>,

        /// Path to the configuration file (optional)
        #[arg(
            long,
            short,
            help = "Path to the configuration file (yaml, json or toml). If not provided, defaults and environment variables are used."
        )]
        config: Option<PathBuf>,
    },
}

/// Initializes environment variables and returns the parsed CLI.
#[must_use]
pub fn initialize_cli() -> Cli {
    dotenv().ok();
    Cli::parse()
}

/// Handles the serve command by loading configuration and starting the server.
///
/// # Errors
/// Returns an error if configuration loading or server startup fails.
pub async fn handle_serve_command(
    port: Option<u16>,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let resolved_config = Config::load_config(config, port)?;
    server::server::run(resolved_config).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    match initialize_cli().command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
    }
}
