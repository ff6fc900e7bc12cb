//! CLI entry point: a thin shell around `ServerContext` and the HTTP
//! surface (spec's Non-goals exclude a richer CLI/TUI).

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "fleetd", about = "Fleet coordination server for subprocess LLM-agent workers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the fleet coordination server.
    Serve {
        /// Override the configured bind address.
        #[arg(long)]
        bind: Option<String>,

        /// Override the configured port.
        #[arg(long)]
        port: Option<u16>,

        /// Override the configured SQLite database path.
        #[arg(long)]
        db: Option<String>,

        /// Load configuration from this YAML file instead of `.fleet/config.yaml`.
        #[arg(long)]
        config: Option<String>,
    },
}
