//! Sender service runner
//!
//! Composition root: loads settings, connects the chain client, builds the
//! signer and the sender registry, starts the transaction sender and the
//! metrics server, and shuts down cleanly on SIGINT/SIGTERM. Submitting
//! agents consume the library surface; this binary keeps a sender alive
//! as a standalone service.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use l2_sender::chain::{ChainClient, RpcClient};
use l2_sender::config::Settings;
use l2_sender::metrics::MetricsServer;
use l2_sender::tx::{SenderRegistry, TransactionSender};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting sender v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    let config = settings.sender.to_config();

    let rpc = Arc::new(ChainClient::connect(&settings.rpc.endpoints).await?);
    info!(chain_id = rpc.chain_id(), "Chain connection established");

    let key = std::env::var(&settings.wallet.private_key_env).with_context(|| {
        format!(
            "Private key environment variable {} not set",
            settings.wallet.private_key_env
        )
    })?;
    let signer = key
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid private key: {e}"))?;

    // One registry per process; a second sender for the same key would be
    // rejected at construction
    let sender_registry = Arc::new(SenderRegistry::new());
    let sender = TransactionSender::new(config, rpc, signer, sender_registry).await?;
    info!(address = %sender.address(), "Transaction sender running");

    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    shutdown_signal().await;
    info!("Shutdown signal received, stopping...");

    sender.close().await;
    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    info!("Sender stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,l2_sender=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
