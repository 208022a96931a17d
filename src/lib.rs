//! Locus - location scoring over a trained model artifact.
//!
//! Locus turns either a pre-built feature vector or a business-level
//! description of a site (coordinates, establishment type, cuisine, brand)
//! into a schema-ordered vector, runs it through a trained predictor and
//! returns a prediction envelope. Every call is written to a request history.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  HTTP: /forward[/geo] | /model | /history | /stats       │
//! ├──────────────────────────────────────────────────────────┤
//! │  InferenceOrchestrator: validate → vector → predict      │
//! ├──────────────────────────────────────────────────────────┤
//! │  SemanticMapper | FeatureSchema | default policy         │
//! ├──────────────────────────────────────────────────────────┤
//! │  ArtifactLoader (single-flight) → ModelArtifact          │
//! ├──────────────────────────────────────────────────────────┤
//! │  HistorySink                                             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use locus::config::LocusConfig;
//!
//! #[tokio::main]
//! async fn main() -> locus::Result<()> {
//!     let config = LocusConfig::development();
//!     locus::run(config).await
//! }
//! ```

pub mod cli;
pub mod compute;
pub mod config;
pub mod error;
pub mod history;
pub mod observability;
pub mod shutdown;

// Re-exports
pub use error::{ErrorClass, LocusError, Result};

use compute::{ArtifactLoader, InferenceOrchestrator, ModelServer};
use config::LocusConfig;
use history::InMemoryHistory;
use shutdown::{ShutdownCoordinator, SignalHandler};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How often expired history is purged.
const HISTORY_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Run the Locus service with the given configuration.
pub async fn run(config: LocusConfig) -> Result<()> {
    observability::init(&config.observability)?;
    config.validate()?;

    info!(
        artifact = %config.model.artifact_path.display(),
        preload = config.model.preload,
        "Starting Locus"
    );

    let mut handles = Vec::new();

    if config.observability.metrics_enabled {
        info!("Starting metrics server on {}", config.observability.metrics_addr);
        let recorder = observability::install_metrics_recorder()?;
        let obs_config = config.observability.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = observability::run_metrics_server(obs_config, recorder).await {
                error!("Metrics server error: {}", e);
            }
        });
        handles.push(("metrics", handle));
    }

    let loader = Arc::new(ArtifactLoader::new(&config.model.artifact_path));
    if config.model.preload {
        // No traffic is accepted until the artifact is usable.
        loader.preload().await?;
    }

    let history = Arc::new(InMemoryHistory::new(config.history.capacity));
    let orchestrator = Arc::new(InferenceOrchestrator::new(loader, history.clone()));
    let coordinator = ShutdownCoordinator::with_timeout(config.server.shutdown_timeout);

    let purge_history = history.clone();
    let purge_coordinator = coordinator.clone();
    let retention = config.history.retention;
    handles.push((
        "history-retention",
        tokio::spawn(async move {
            run_history_retention(purge_history, retention, purge_coordinator).await;
        }),
    ));

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        SignalHandler::new(signal_coordinator).run().await;
    });

    let server = ModelServer::new(orchestrator, history, &config.server.api_prefix);
    let server_coordinator = coordinator.clone();
    let bind_addr = config.server.bind_addr;
    let mut server_handle = tokio::spawn(async move { server.run(bind_addr, server_coordinator).await });

    tokio::select! {
        _ = coordinator.wait_for_shutdown() => {
            info!("Shutting down Locus gracefully...");
            match tokio::time::timeout(coordinator.timeout(), &mut server_handle).await {
                Ok(Ok(Err(e))) => error!("Model server error: {}", e),
                Ok(Err(e)) => error!("Model server task failed: {}", e),
                Ok(Ok(Ok(()))) => {}
                Err(_) => {
                    warn!("Shutdown timed out after {:?}", coordinator.timeout());
                    server_handle.abort();
                }
            }
        }
        result = &mut server_handle => {
            coordinator.shutdown();
            match result {
                Ok(Err(e)) => {
                    error!("Model server error: {}", e);
                    return Err(e);
                }
                Err(e) => return Err(LocusError::Internal(format!("model server task failed: {}", e))),
                Ok(Ok(())) => {}
            }
        }
    }

    for (name, handle) in handles {
        if !handle.is_finished() {
            warn!(service = %name, "Force aborting service");
            handle.abort();
        }
    }

    info!("Locus shutdown complete");
    Ok(())
}

async fn run_history_retention(
    history: Arc<InMemoryHistory>,
    retention: Duration,
    coordinator: ShutdownCoordinator,
) {
    let mut interval = tokio::time::interval(HISTORY_PURGE_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let purged = history.purge_older_than(retention);
                if purged > 0 {
                    info!(purged, "Purged expired history records");
                }
                observability::update_history_size(history.len());
            }
            _ = coordinator.wait_for_shutdown() => break,
        }
    }
}
