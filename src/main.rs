//! fleetd binary entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fleetctl::cli::{Cli, Commands};
use fleetctl::http;
use fleetctl::infrastructure::config::ConfigLoader;
use fleetctl::infrastructure::logging::LoggerHandle;
use fleetctl::services::ServerContext;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Commands::Serve { bind, port, db, config } = cli.command;

    let mut server_config = match config {
        Some(path) => ConfigLoader::load_from_file(path).context("failed to load configuration")?,
        None => ConfigLoader::load().context("failed to load configuration")?,
    };

    if let Some(bind) = bind {
        server_config.bind = bind;
    }
    if let Some(port) = port {
        server_config.port = port;
    }
    if let Some(db) = db {
        server_config.database.path = db;
    }

    let _logger = LoggerHandle::init(&server_config.logging).context("failed to initialize logger")?;

    let ctx = Arc::new(ServerContext::build(server_config).await.context("failed to build server context")?);
    ctx.spawn_background_tasks();

    http::serve(ctx).await
}
