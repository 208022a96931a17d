//! Observability module for Locus.
//!
//! Provides logging initialization and the Prometheus metrics endpoint.

use crate::config::ObservabilityConfig;
use crate::error::{LocusError, Result};
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| LocusError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| LocusError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Install the Prometheus recorder; metrics emitted earlier are dropped.
pub fn install_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| LocusError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();
    Ok(handle)
}

/// Run the Prometheus metrics server.
pub async fn run_metrics_server(config: ObservabilityConfig, handle: PrometheusHandle) -> Result<()> {
    let app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| LocusError::Network(e.to_string()))?;

    Ok(())
}

fn register_metrics() {
    describe_counter!("locus_predictions_total", "Orchestrated predictions by endpoint and status");
    describe_counter!("locus_artifact_loads_total", "Model artifact load attempts by outcome");
    describe_histogram!(
        "locus_prediction_latency_ms",
        Unit::Milliseconds,
        "End-to-end prediction latency"
    );
    describe_gauge!("locus_model_loaded", "1 once the model artifact is loaded");
    describe_gauge!("locus_history_records", "Records retained in the request history");
}

/// Record one orchestrated prediction.
pub fn record_prediction(endpoint: &str, status: u16, latency_ms: f64) {
    counter!(
        "locus_predictions_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("locus_prediction_latency_ms", "endpoint" => endpoint.to_string()).record(latency_ms);
}

/// Record the outcome of an artifact load.
pub fn record_artifact_load(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("locus_artifact_loads_total", "outcome" => outcome).increment(1);
    if success {
        gauge!("locus_model_loaded").set(1.0);
    }
}

/// Update the retained history gauge.
pub fn update_history_size(records: usize) {
    gauge!("locus_history_records").set(records as f64);
}
