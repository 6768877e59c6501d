// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tl-remote: WebSocket front end for the tally sync engine.
//!
//! Serves paged record synchronization over WebSocket, backed by a record
//! catalog from a TOML file and a fixture upstream from a JSON file.

mod config;
mod fixture;
mod server;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{ServerConfig, CONFIG_FILE_NAME};
use fixture::FixtureUpstream;
use tl_core::{ClientMessage, ServerMessage, Upstream};

/// tl-remote: record synchronization server
#[derive(Parser, Debug)]
#[command(name = "tl-remote")]
#[command(about = "WebSocket server for paged record synchronization")]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "0.0.0.0:7890")]
    bind: SocketAddr,

    /// Configuration file with the [sync] table and record catalog
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// JSON file serving as the upstream API
    #[arg(short, long)]
    fixtures: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the JSON Schema of the wire protocol and exit
    #[arg(long)]
    print_schema: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.print_schema {
        let schema = serde_json::json!({
            "client": schemars::schema_for!(ClientMessage),
            "server": schemars::schema_for!(ServerMessage),
        });
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting tl-remote server");
    info!("  Bind address: {}", args.bind);
    info!("  Config: {}", args.config.display());

    let config = if args.config.exists() {
        ServerConfig::load(&args.config)?
    } else {
        info!("  Config file not found, using defaults");
        ServerConfig::default()
    };
    let catalog = config.catalog()?;
    info!("  Record types: {}", catalog.len());

    let upstream: Arc<dyn Upstream> = match &args.fixtures {
        Some(path) => {
            info!("  Fixtures: {}", path.display());
            Arc::new(FixtureUpstream::load(path)?)
        }
        None => Arc::new(FixtureUpstream::default()),
    };

    let root = CancellationToken::new();
    let state = state::ServerState::new(config.sync, catalog, upstream, root)?;
    let _sweepers = state.start_sweepers();

    let shutdown = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shutdown.shutdown();
        }
    });

    server::run(args.bind, state).await?;

    Ok(())
}
