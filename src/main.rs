//! # Sendloop — scheduled message delivery daemon
//!
//! Polls the message store on a fixed interval, delivers due messages
//! through per-user automation sessions, and serves the scheduling API.
//!
//! Usage:
//!   sendloop                          # Start with ~/.sendloop/config.toml
//!   sendloop --port 8080              # Custom API port
//!   sendloop --memory-store           # Volatile store (demo profile)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sendloop_core::SendloopConfig;
use sendloop_core::traits::MessageStore;
use sendloop_gateway::AppState;
use sendloop_scheduler::SchedulerEngine;
use sendloop_session::{BridgeLinker, SessionManager};
use sendloop_store::{MemoryStore, SqliteStore};
use sendloop_worker::{AutomationWorker, BridgeSurface};

#[derive(Parser)]
#[command(name = "sendloop", version, about = "📬 Sendloop — scheduled message delivery")]
struct Cli {
    /// Path to config.toml (default: ~/.sendloop/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// API bind host override
    #[arg(long)]
    host: Option<String>,

    /// API bind port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Use the in-memory message store instead of SQLite
    #[arg(long)]
    memory_store: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "sendloop=debug,tower_http=debug"
    } else {
        "sendloop=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => {
            let expanded = shellexpand::tilde(path).to_string();
            SendloopConfig::load_from(Path::new(&expanded))?
        }
        None => SendloopConfig::load()?,
    };
    if let Some(host) = cli.host {
        config.gateway.host = host;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    std::fs::create_dir_all(config.session.data_dir())?;

    // Message store
    let store: Arc<dyn MessageStore> = if cli.memory_store || config.store.backend == "memory" {
        tracing::info!("Using in-memory message store — messages do not survive restarts");
        Arc::new(MemoryStore::new())
    } else {
        let path = config.store.db_path();
        tracing::info!("Using SQLite message store at {}", path.display());
        Arc::new(SqliteStore::open(&path)?)
    };

    // Session pool + delivery pipeline
    let sessions = Arc::new(SessionManager::new(
        config.session.clone(),
        Arc::new(BridgeLinker::new(&config.bridge)),
    ));
    let worker = Arc::new(AutomationWorker::new(
        sessions.clone(),
        Arc::new(BridgeSurface::new(&config.bridge)),
        Duration::from_secs(config.scheduler.delivery_timeout_secs),
    ));

    // Scheduler loop
    let engine = Arc::new(SchedulerEngine::new(
        store.clone(),
        worker,
        config.scheduler.clone(),
    ));
    engine.start();

    // Gateway
    let pairing_code = if config.gateway.require_pairing {
        let code = if config.gateway.pairing_code.is_empty() {
            generate_pairing_code()
        } else {
            config.gateway.pairing_code.clone()
        };
        tracing::info!("🔐 Pairing code: {code}");
        Some(code)
    } else {
        None
    };

    let state = AppState {
        store,
        engine: engine.clone(),
        sessions,
        pairing_code,
        start_time: std::time::Instant::now(),
    };

    tokio::select! {
        result = sendloop_gateway::serve(state, &config.gateway.host, config.gateway.port) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    // In-flight dispatches finish on their own; there is no drain guarantee.
    engine.stop();
    Ok(())
}

/// Six-digit pairing code for the gateway.
fn generate_pairing_code() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..6).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect()
}
