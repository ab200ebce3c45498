//! # Crosstown — a payment-gated Nostr relay settling writes over Interledger
//!
//! ## Architecture Overview
//!
//! The process runs two HTTP/WebSocket servers side by side, sharing one
//! event store and one live-event broadcast channel:
//! - **Business Logic Server** (`bls`): `POST /handle-packet` walks incoming
//!   ILP packets through decode, verify, price, and store.
//! - **Relay Front-End** (`relay`): `GET /ws` serves `REQ`/`CLOSE`
//!   subscriptions and streams newly admitted events live.
//!
//! Storage is SQLite-backed when `DATA_DIR` is configured and writable,
//! falling back to an in-memory store (with a warning) otherwise.

use anyhow::{Context, Result};
use clap::Parser;
use crosstown::bls::{self, BlsState};
use crosstown::config::Config;
use crosstown::pricing::PricingConfig;
use crosstown::relay::{self, RelayState};
use crosstown::store::memory::MemoryStore;
use crosstown::store::sqlite::SqliteStore;
use crosstown::EventStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Command-line options for the Crosstown relay process.
#[derive(Debug, Parser)]
#[command(name = "crosstown", about = "A payment-gated Nostr relay settling writes over Interledger")]
struct Cli {
    /// Path to the TOML configuration file. Missing is fine; defaults and
    /// environment variables still apply.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).context("failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the async runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let store = open_store(config.data_dir.as_deref());

    let pricing = PricingConfig {
        base_price_per_byte: config.bls_base_price_per_byte,
        kind_overrides: config.bls_kind_overrides.clone(),
        spsp_kind: config.spsp_kind,
        spsp_min_price: config.spsp_min_price,
    };

    let (publisher, _receiver) = broadcast::channel(1024);

    let bls_state = BlsState {
        store: store.clone(),
        pricing,
        owner_pubkey: config.owner_pubkey.clone(),
        publisher: publisher.clone(),
    };
    let relay_state = RelayState {
        store: store.clone(),
        publisher,
    };

    let bls_addr = format!("0.0.0.0:{}", config.bls_port);
    let ws_addr = format!("0.0.0.0:{}", config.ws_port);

    log::info!("BLS listening on {bls_addr}");
    log::info!("relay listening on {ws_addr}");

    let bls_listener = tokio::net::TcpListener::bind(&bls_addr)
        .await
        .with_context(|| format!("failed to bind BLS listener on {bls_addr}"))?;
    let ws_listener = tokio::net::TcpListener::bind(&ws_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {ws_addr}"))?;

    let bls_server = axum::serve(bls_listener, bls::router(bls_state));
    let relay_server = axum::serve(ws_listener, relay::router(relay_state));

    tokio::try_join!(
        async { bls_server.await.context("BLS server failed") },
        async { relay_server.await.context("relay server failed") },
    )?;

    Ok(())
}

/// Open the SQLite store under `data_dir` if configured and writable;
/// otherwise fall back to an in-memory store.
fn open_store(data_dir: Option<&str>) -> Arc<dyn EventStore> {
    let Some(dir) = data_dir else {
        log::info!("no DATA_DIR configured, using in-memory event store");
        return Arc::new(MemoryStore::new());
    };

    let dir_path = Path::new(dir);
    if let Err(e) = std::fs::create_dir_all(dir_path) {
        log::warn!("DATA_DIR '{dir}' is not usable ({e}), falling back to in-memory event store");
        return Arc::new(MemoryStore::new());
    }

    let db_path = dir_path.join("events.db");
    match SqliteStore::open(&db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::warn!("failed to open SQLite store at '{}' ({e}), falling back to in-memory event store", db_path.display());
            Arc::new(MemoryStore::new())
        }
    }
}
