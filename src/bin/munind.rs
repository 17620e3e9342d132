//! munind — Munin daemon.
//!
//! Serves the analysis orchestration pipeline over HTTP so the admin
//! panel and batch tooling share one cache, rate limiter, and usage
//! ledger.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use munin::server::{AppState, Config, Secrets, router};

/// Munin daemon — article analysis orchestration service.
#[derive(Parser)]
#[command(name = "munind")]
#[command(version)]
#[command(about = "Munin article analysis gateway daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Address to bind to (overrides config).
    #[arg(short, long)]
    address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "munin=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(address) = args.address {
        config.server.address = address;
    }

    let secrets = Secrets::load()?;
    let api_key = secrets.api_key();
    if api_key.is_none() {
        warn!("no Anthropic API key configured; analysis requests will fail until one is set");
    }

    let address = config.server.address.clone();
    let state = Arc::new(AppState::new(config, api_key));

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(%address, "munind starting");

    axum::serve(listener, router(state)).await?;

    Ok(())
}
