//! Nonce Keeper - nonce-aware transaction submission and replacement service
//!
//! Serves deployments, transfers and cancellations for one signing account
//! over HTTP, resolving nonces from the chain node on every attempt.

use anyhow::{Context, Result};
use ethers::signers::{LocalWallet, Signer};
use ethers::utils::to_checksum;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use nonce_keeper::api;
use nonce_keeper::chain::ChainProvider;
use nonce_keeper::config::Settings;
use nonce_keeper::error::TxError;
use nonce_keeper::metrics::MetricsServer;
use nonce_keeper::orchestrator::{AccountLocks, DeploymentOrchestrator, OrchestratorConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Nonce Keeper v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {} on chain {} ({})",
        settings.service.instance_id, settings.chain.name, settings.chain.chain_id
    );

    // Load the signing key
    let wallet = load_wallet(&settings)?;
    info!("Signing as {}", to_checksum(&wallet.address(), None));

    // Initialize chain connection
    let provider = Arc::new(ChainProvider::new(settings.chain.clone())?);
    info!("Chain connection initialized via {}", provider.name());

    // Initialize orchestrator
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let locks = Arc::new(AccountLocks::new(
        settings.service.lock_mode,
        settings.lock_timeout(),
    ));
    let orchestrator = Arc::new(DeploymentOrchestrator::new(
        provider,
        Arc::new(wallet),
        locks,
        OrchestratorConfig::from_settings(&settings),
        shutdown_rx.clone(),
    ));
    info!("Orchestrator initialized");

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = api::run_server(config, orchestrator, shutdown).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
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

    info!("Nonce Keeper is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // In-flight waits return Cancelled; broadcast transactions stay broadcast
    let _ = shutdown_tx.send(true);
    if let Err(e) = api_handle.await {
        error!("API server task failed: {}", e);
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Nonce Keeper stopped");
    Ok(())
}

fn load_wallet(settings: &Settings) -> Result<LocalWallet> {
    let var = &settings.wallet.private_key_env;
    let key = std::env::var(var)
        .map_err(|_| TxError::Wallet(format!("environment variable {} is not set", var)))?;

    let wallet: LocalWallet = key
        .trim()
        .trim_start_matches("0x")
        .parse()
        .map_err(|e| TxError::Wallet(format!("invalid private key in {}: {}", var, e)))?;

    Ok(wallet.with_chain_id(settings.chain.chain_id))
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nonce_keeper=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = ctrl_c => {
            if let Err(e) = result {
                error!("{:#}", e);
            }
        },
        _ = terminate => {},
    }
}
