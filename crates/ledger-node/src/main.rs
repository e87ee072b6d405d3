mod constants;
mod error;
mod routes;

use anyhow::Context;
use clap::Parser;
use constants::{DEFAULT_DATA_DIR, DEFAULT_LISTEN, PROOF_SECRET_ENV};
use ledger_core::{constants::POW_DIFFICULTY, ChainStore, Ledger, LedgerConfig};
use ledger_storage::SledStore;
use routes::{router, AppState};
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, warn};

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, default_value = DEFAULT_LISTEN)]
    listen: String,

    /// Data directory for sled
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: String,

    /// Leading zero hex digits required of every block hash
    #[arg(long, default_value_t = POW_DIFFICULTY)]
    difficulty: usize,

    /// Secret used to sign document proofs
    #[arg(long, env = PROOF_SECRET_ENV, hide_env_values = true)]
    proof_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.difficulty > 6 {
        warn!(difficulty = args.difficulty, "high difficulty; appends will be slow");
    }

    let store = Arc::new(SledStore::open(&args.data_dir)?);
    let config = LedgerConfig::new(args.proof_secret.into_bytes()).with_difficulty(args.difficulty);
    let ledger = Ledger::new(store.clone(), config)?;

    // An invalid chain must never be served.
    let init_ledger = ledger;
    let ledger = tokio::task::spawn_blocking(move || init_ledger.initialize().map(|_| init_ledger))
        .await?
        .context("ledger failed to initialize")?;
    let (height, hash) = ledger.tip()?;
    info!(height, %hash, "chain ready");

    let state = AppState {
        ledger: Arc::new(ledger),
    };
    let app = router(state);

    let addr: SocketAddr = args.listen.parse()?;
    info!("ledger-node listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close()?;
    info!("ledger-node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
