#![forbid(unsafe_code)]

//! Catalog API server: wires configuration, the store, the rate-limited
//! Provider client, the backfill scheduler, and the HTTP surface together
//! and serves plain HTTP (TLS termination, if any, happens in front of
//! this process).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use catalog_api::assembler::Assembler;
use catalog_api::backfill::BackfillScheduler;
use catalog_api::cache::Caches;
use catalog_api::config::{self, ConfigOverrides};
use catalog_api::http::{self, AppState};
use catalog_api::provider::{ProviderAuth, ProviderClient};
use catalog_api::security::ensure_not_root;
use catalog_api::store::Store;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Command-line overrides for the handful of settings an operator commonly
/// wants to set without touching the environment (§4.6).
#[derive(Debug, Parser)]
#[command(name = "catalog-server", about = "Read-optimized movie/TV catalog API")]
struct Cli {
    /// Path to the embedded store database. Overrides CATALOG_DB.
    #[arg(long)]
    catalog_db: Option<std::path::PathBuf>,

    /// Address to bind the HTTP listener to. Overrides BIND_ADDR.
    #[arg(long)]
    bind_addr: Option<String>,

    /// Port to bind the HTTP listener to. Overrides HTTP_PORT.
    #[arg(long)]
    http_port: Option<u16>,

    /// Path to a `.env`-style file read at startup. Defaults to `.env`.
    #[arg(long)]
    env_file: Option<std::path::PathBuf>,

    /// Skip loading the `.env`-style file entirely.
    #[arg(long)]
    disable_dotenv: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    ensure_not_root("catalog-server")?;

    let cli = Cli::parse();
    let config = config::resolve_config(ConfigOverrides {
        catalog_db: cli.catalog_db,
        bind_addr: cli.bind_addr,
        http_port: cli.http_port,
        env_path: cli.env_file,
        disable_dotenv: cli.disable_dotenv,
    })
    .context("resolving configuration")?;
    let config = Arc::new(config);

    let store = Store::open(&config.catalog_db)
        .await
        .with_context(|| format!("opening store at {}", config.catalog_db.display()))?;

    let provider_auth = config.tmdb_api_key.clone().map(ProviderAuth::ApiKey);
    let provider = ProviderClient::new(provider_auth, config.tmdb_rps, config.tmdb_rps_foreground);

    let backfill = BackfillScheduler::start(
        store.clone(),
        provider.clone(),
        config.backfill_workers,
        config.backfill_queue_limit,
        Duration::from_secs(config.backfill_ttl_secs),
    );

    let caches = Arc::new(Caches::default());
    let assembler = Arc::new(Assembler::new(store, provider, backfill, caches));
    let state = Arc::new(AppState::new(assembler, config.clone()));

    let app = http::router(state);

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.http_port)
        .parse()
        .with_context(|| format!("parsing bind address {}:{}", config.bind_addr, config.http_port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(%addr, "catalog API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("running catalog API server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
    }
}
