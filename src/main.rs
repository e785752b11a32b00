//! facegate - Motion-gated face recognition door access
//!
//! Main entry point for the daemon.

use facegate::orchestrator::Orchestrator;
use facegate::state::{AppConfig, AppState};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Configuration first: DEBUG decides the default log level
    let config = AppConfig::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.default_log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting facegate v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        recognition_url = %config.recognition_url,
        db_path = %config.db_path.display(),
        clearance_threshold = config.clearance_threshold,
        pretty_sure_threshold = config.pretty_sure_threshold(),
        candidate_policy = ?config.candidate_policy,
        recognition_workers = config.recognition_workers,
        "Configuration loaded"
    );

    let state = AppState::build(config).await?;
    tracing::info!(identities = state.engine.snapshot().await.len(), "AccessEngine initialized");

    let orchestrator = Orchestrator::new(
        state.reader.clone(),
        state.gate.clone(),
        state.recognizer.clone(),
        state.engine.clone(),
        state.config.orchestrator_config(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    orchestrator.run(shutdown_rx).await?;

    tracing::info!(door_opens = state.access_log.count().await, "facegate stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
