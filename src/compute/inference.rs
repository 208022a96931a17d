// Inference orchestration
//
// Each call runs validate -> build vector -> predict -> format, classifies any
// failure exactly once and writes exactly one history record.

use super::artifact::{ModelArtifact, ModelInfo, PredictionResult};
use super::loader::ArtifactLoader;
use super::mapper::{SemanticMapper, SemanticRequest};
use super::registry::Prediction;
use crate::error::{ErrorClass, LocusError, Result};
use crate::history::{HistorySink, NewHistoryRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Endpoint name recorded for raw feature calls.
pub const FORWARD_ENDPOINT: &str = "/forward";
/// Endpoint name recorded for semantic calls.
pub const GEO_ENDPOINT: &str = "/forward/geo";

/// Header carrying the caller's expected feature count.
pub const FEATURES_COUNT_HEADER: &str = "x-features-count";
/// Header carrying the model version the caller asked for.
pub const MODEL_VERSION_HEADER: &str = "x-model-version";

/// Pre-built feature vector in schema order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeatureRequest {
    pub features: Vec<f64>,
}

impl RawFeatureRequest {
    pub fn new(features: Vec<f64>) -> Self {
        Self { features }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum DeclaredCount {
    Valid(usize),
    Invalid(String),
}

/// Transport metadata for one call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub endpoint: String,
    pub method: String,
    /// Header names are lowercased
    pub headers: BTreeMap<String, String>,
    pub requested_version: Option<String>,
    declared_count: Option<DeclaredCount>,
}

impl RequestContext {
    pub fn new(endpoint: &str, method: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            headers: BTreeMap::new(),
            requested_version: None,
            declared_count: None,
        }
    }

    /// Context for a raw feature call.
    pub fn forward() -> Self {
        Self::new(FORWARD_ENDPOINT, "POST")
    }

    /// Context for a semantic call.
    pub fn geo() -> Self {
        Self::new(GEO_ENDPOINT, "POST")
    }

    /// Records a header, picking up the declared count and model version.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        match name.as_str() {
            FEATURES_COUNT_HEADER => {
                self.declared_count = Some(match value.trim().parse::<usize>() {
                    Ok(n) => DeclaredCount::Valid(n),
                    Err(_) => DeclaredCount::Invalid(value.to_string()),
                });
            }
            MODEL_VERSION_HEADER => self.requested_version = Some(value.to_string()),
            _ => {}
        }
        self.headers.insert(name, value.to_string());
        self
    }

    pub fn with_declared_count(mut self, count: usize) -> Self {
        self.declared_count = Some(DeclaredCount::Valid(count));
        self
    }

    fn check_declared_count(&self, actual: usize) -> Result<()> {
        match &self.declared_count {
            None => Ok(()),
            Some(DeclaredCount::Invalid(raw)) => Err(LocusError::Validation(format!(
                "invalid {} header: {:?}",
                FEATURES_COUNT_HEADER, raw
            ))),
            Some(DeclaredCount::Valid(expected)) if *expected != actual => {
                Err(LocusError::Validation(format!(
                    "Expected {} features, got {}",
                    expected, actual
                )))
            }
            Some(DeclaredCount::Valid(_)) => Ok(()),
        }
    }
}

/// Successful response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEnvelope {
    pub success: bool,
    pub prediction: Prediction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub model_type: String,
    pub model_version: String,
    pub features_used: Vec<String>,
    pub features_count: usize,
    pub timestamp: DateTime<Utc>,
    /// Id assigned by the history sink, absent when the write failed
    #[serde(default)]
    pub request_id: Option<u64>,
    pub processing_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_version: Option<String>,
}

impl PredictionEnvelope {
    fn new(artifact: &ModelArtifact, result: PredictionResult, features_count: usize) -> Self {
        Self {
            success: true,
            prediction: result.prediction,
            probabilities: result.probabilities,
            confidence: result.confidence,
            model_type: artifact.model_type().to_string(),
            model_version: artifact.version().to_string(),
            features_used: artifact.schema().names().to_vec(),
            features_count,
            timestamp: Utc::now(),
            request_id: None,
            processing_time_ms: 0.0,
            requested_version: None,
        }
    }
}

/// Failure response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    /// Raw cause, only for validation failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEnvelope {
    pub fn new(class: ErrorClass, detail: &str) -> Self {
        Self {
            success: false,
            error: class.public_message().to_string(),
            detail: class.exposes_detail().then(|| detail.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// A classified failure, ready to hand to a caller.
#[derive(Debug, Clone, Error)]
#[error("{}", .envelope.error)]
pub struct InferenceFailure {
    pub class: ErrorClass,
    pub envelope: ErrorEnvelope,
}

impl InferenceFailure {
    pub fn status_code(&self) -> u16 {
        self.class.status_code()
    }
}

enum Input<'a> {
    Raw(&'a RawFeatureRequest),
    Semantic(&'a SemanticRequest),
}

impl Input<'_> {
    fn validate(&self, ctx: &RequestContext) -> Result<()> {
        match self {
            Input::Raw(request) => {
                if request.features.is_empty() {
                    return Err(LocusError::Validation(
                        "at least one feature is required".to_string(),
                    ));
                }
                ctx.check_declared_count(request.features.len())
            }
            Input::Semantic(request) => validate_coordinates(request.lat, request.lon),
        }
    }

    fn to_vector(&self, artifact: &ModelArtifact) -> Vec<f64> {
        match self {
            Input::Raw(request) => request.features.clone(),
            Input::Semantic(request) => SemanticMapper::new(artifact.schema()).to_vector(request),
        }
    }

    fn to_history(&self, resolved: Option<&[f64]>) -> serde_json::Value {
        match self {
            Input::Raw(request) => json!(request),
            Input::Semantic(request) => json!({
                "request": request,
                "features": resolved,
            }),
        }
    }
}

fn validate_coordinates(lat: f64, lon: f64) -> Result<()> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(LocusError::Validation(format!("latitude out of range: {}", lat)));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(LocusError::Validation(format!("longitude out of range: {}", lon)));
    }
    Ok(())
}

fn round_ms(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}

/// Runs predictions against the shared artifact and records every call.
pub struct InferenceOrchestrator {
    loader: Arc<ArtifactLoader>,
    history: Arc<dyn HistorySink>,
}

impl InferenceOrchestrator {
    pub fn new(loader: Arc<ArtifactLoader>, history: Arc<dyn HistorySink>) -> Self {
        Self { loader, history }
    }

    pub fn loader(&self) -> &Arc<ArtifactLoader> {
        &self.loader
    }

    /// Predicts a pre-built feature vector.
    pub async fn forward(
        &self,
        request: &RawFeatureRequest,
        ctx: &RequestContext,
    ) -> std::result::Result<PredictionEnvelope, InferenceFailure> {
        self.orchestrate(Input::Raw(request), ctx).await
    }

    /// Maps a semantic request onto the schema and predicts it.
    pub async fn forward_semantic(
        &self,
        request: &SemanticRequest,
        ctx: &RequestContext,
    ) -> std::result::Result<PredictionEnvelope, InferenceFailure> {
        self.orchestrate(Input::Semantic(request), ctx).await
    }

    /// Describes the loaded model, loading it if needed.
    pub async fn model_info(&self) -> Result<ModelInfo> {
        Ok(self.loader.load().await?.info())
    }

    async fn orchestrate(
        &self,
        input: Input<'_>,
        ctx: &RequestContext,
    ) -> std::result::Result<PredictionEnvelope, InferenceFailure> {
        let started = Instant::now();
        let mut resolved = None;
        let outcome = self.evaluate(&input, ctx, &mut resolved).await;
        let latency_ms = round_ms(started.elapsed().as_secs_f64() * 1000.0);
        let history_input = input.to_history(resolved.as_deref());

        match outcome {
            Ok((artifact, result, features_count)) => {
                let mut envelope = PredictionEnvelope::new(&artifact, result, features_count);
                envelope.processing_time_ms = latency_ms;
                envelope.requested_version = ctx.requested_version.clone();

                let output = serde_json::to_value(&envelope).ok();
                envelope.request_id = self
                    .write_history(ctx, history_input, output, 200, None, latency_ms)
                    .await;

                crate::observability::record_prediction(&ctx.endpoint, 200, latency_ms);
                debug!(
                    endpoint = %ctx.endpoint,
                    status = 200,
                    latency_ms,
                    prediction = %envelope.prediction,
                    "Prediction served"
                );
                Ok(envelope)
            }
            Err(e) => {
                let class = e.class();
                let status = class.status_code();
                let detail = e.to_string();

                let output = json!({ "error": detail, "class": class.as_str() });
                self.write_history(
                    ctx,
                    history_input,
                    Some(output),
                    status,
                    Some(detail.clone()),
                    latency_ms,
                )
                .await;

                crate::observability::record_prediction(&ctx.endpoint, status, latency_ms);
                warn!(
                    endpoint = %ctx.endpoint,
                    status,
                    class = class.as_str(),
                    latency_ms,
                    error = %detail,
                    "Prediction failed"
                );
                Err(InferenceFailure {
                    class,
                    envelope: ErrorEnvelope::new(class, &detail),
                })
            }
        }
    }

    async fn evaluate(
        &self,
        input: &Input<'_>,
        ctx: &RequestContext,
        resolved: &mut Option<Vec<f64>>,
    ) -> Result<(Arc<ModelArtifact>, PredictionResult, usize)> {
        input.validate(ctx)?;

        let artifact = self.loader.load().await?;
        let vector = resolved.insert(input.to_vector(&artifact));
        let result = artifact.predict(vector)?;
        let features_count = vector.len();

        Ok((artifact, result, features_count))
    }

    async fn write_history(
        &self,
        ctx: &RequestContext,
        input: serde_json::Value,
        output: Option<serde_json::Value>,
        status_code: u16,
        error_message: Option<String>,
        latency_ms: f64,
    ) -> Option<u64> {
        let entry = NewHistoryRecord {
            endpoint: ctx.endpoint.clone(),
            method: ctx.method.clone(),
            input,
            output,
            headers: ctx.headers.clone(),
            status_code,
            error_message,
            latency_ms,
        };

        match self.history.record(entry).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(endpoint = %ctx.endpoint, error = %e, "Failed to record history");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::registry::{LinearRegression, Predictor, PredictorHandle};
    use crate::compute::schema::FeatureSchema;
    use crate::error::{PredictorError, PredictorResult};
    use crate::history::InMemoryHistory;
    use async_trait::async_trait;
    use ndarray::ArrayView2;

    #[derive(Debug)]
    struct Failing {
        n_features: usize,
        error: PredictorError,
    }

    impl Predictor for Failing {
        fn kind(&self) -> &str {
            "failing"
        }

        fn n_features(&self) -> usize {
            self.n_features
        }

        fn predict(&self, _rows: ArrayView2<'_, f64>) -> PredictorResult<Vec<Prediction>> {
            Err(self.error.clone())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl HistorySink for BrokenSink {
        async fn record(&self, _entry: NewHistoryRecord) -> Result<u64> {
            Err(LocusError::Internal("history store unavailable".to_string()))
        }
    }

    fn schema() -> FeatureSchema {
        FeatureSchema::new(
            ["lat", "lon", "type_cafe", "nearest_metro"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap()
    }

    fn linear_artifact() -> ModelArtifact {
        let predictor = LinearRegression::new(vec![1.0, 1.0, 10.0, 0.001], 0.0);
        ModelArtifact::new(schema(), None, PredictorHandle::Plain(Box::new(predictor)), "3.0.0")
            .unwrap()
    }

    fn failing_artifact(error: PredictorError) -> ModelArtifact {
        let predictor = Failing { n_features: 4, error };
        ModelArtifact::new(schema(), None, PredictorHandle::Plain(Box::new(predictor)), "3.0.0")
            .unwrap()
    }

    fn orchestrator(artifact: ModelArtifact) -> (InferenceOrchestrator, Arc<InMemoryHistory>) {
        let history = Arc::new(InMemoryHistory::new(100));
        let orchestrator = InferenceOrchestrator::new(
            Arc::new(ArtifactLoader::preloaded(artifact)),
            history.clone(),
        );
        (orchestrator, history)
    }

    #[tokio::test]
    async fn test_forward_success() {
        let (orchestrator, history) = orchestrator(linear_artifact());
        let ctx = RequestContext::forward()
            .with_header("X-Model-Version", "v3")
            .with_header("X-Custom-Header", "abc");

        let envelope = orchestrator
            .forward(&RawFeatureRequest::new(vec![1.0, 2.0, 1.0, 1000.0]), &ctx)
            .await
            .unwrap();

        assert!(envelope.success);
        assert_eq!(envelope.prediction, Prediction::Number(14.0));
        assert_eq!(envelope.model_type, "linear_regression");
        assert_eq!(envelope.model_version, "3.0.0");
        assert_eq!(envelope.features_count, 4);
        assert_eq!(envelope.features_used.len(), 4);
        assert_eq!(envelope.request_id, Some(1));
        assert_eq!(envelope.requested_version.as_deref(), Some("v3"));

        let record = history.get(1).unwrap();
        assert_eq!(record.endpoint, FORWARD_ENDPOINT);
        assert_eq!(record.status_code, 200);
        assert_eq!(record.headers["x-custom-header"], "abc");
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn test_semantic_success_records_resolved_vector() {
        let (orchestrator, history) = orchestrator(linear_artifact());
        let request = SemanticRequest::new(55.0, 37.0).with_establishment_type("cafe");

        let envelope = orchestrator
            .forward_semantic(&request, &RequestContext::geo())
            .await
            .unwrap();
        assert_eq!(envelope.prediction, Prediction::Number(103.0));

        let record = history.get(envelope.request_id.unwrap()).unwrap();
        assert_eq!(record.endpoint, GEO_ENDPOINT);
        assert_eq!(record.input["features"], json!([55.0, 37.0, 1.0, 1000.0]));
        assert_eq!(record.input["request"]["establishment_type"], "cafe");
    }

    #[tokio::test]
    async fn test_empty_features_is_validation_error() {
        let (orchestrator, history) = orchestrator(linear_artifact());
        let failure = orchestrator
            .forward(&RawFeatureRequest::new(vec![]), &RequestContext::forward())
            .await
            .unwrap_err();

        assert_eq!(failure.class, ErrorClass::Validation);
        assert_eq!(failure.status_code(), 400);
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_declared_count_mismatch() {
        let (orchestrator, history) = orchestrator(linear_artifact());
        let ctx = RequestContext::forward().with_declared_count(5);

        let failure = orchestrator
            .forward(&RawFeatureRequest::new(vec![1.0, 2.0, 3.0, 4.0]), &ctx)
            .await
            .unwrap_err();

        assert_eq!(failure.class, ErrorClass::Validation);
        assert_eq!(failure.envelope.error, "bad request");
        assert_eq!(
            failure.envelope.detail.as_deref(),
            Some("Validation error: Expected 5 features, got 4")
        );
        assert_eq!(history.get(1).unwrap().status_code, 400);
    }

    #[tokio::test]
    async fn test_unparsable_declared_count() {
        let (orchestrator, _) = orchestrator(linear_artifact());
        let ctx = RequestContext::forward().with_header("X-Features-Count", "four");

        let failure = orchestrator
            .forward(&RawFeatureRequest::new(vec![1.0, 2.0, 3.0, 4.0]), &ctx)
            .await
            .unwrap_err();
        assert_eq!(failure.class, ErrorClass::Validation);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_validation_error() {
        let (orchestrator, _) = orchestrator(linear_artifact());
        let failure = orchestrator
            .forward(&RawFeatureRequest::new(vec![1.0, 2.0]), &RequestContext::forward())
            .await
            .unwrap_err();

        assert_eq!(failure.class, ErrorClass::Validation);
        assert!(failure.envelope.detail.unwrap().contains("Expected 4 features, got 2"));
    }

    #[tokio::test]
    async fn test_out_of_range_coordinates() {
        let (orchestrator, history) = orchestrator(linear_artifact());
        let failure = orchestrator
            .forward_semantic(&SemanticRequest::new(91.0, 0.0), &RequestContext::geo())
            .await
            .unwrap_err();

        assert_eq!(failure.class, ErrorClass::Validation);
        assert_eq!(history.get(1).unwrap().input["features"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_refusal_hides_internal_text() {
        let (orchestrator, history) =
            orchestrator(failing_artifact(PredictorError::Refused("secret solver state".into())));

        let failure = orchestrator
            .forward(&RawFeatureRequest::new(vec![1.0; 4]), &RequestContext::forward())
            .await
            .unwrap_err();

        assert_eq!(failure.class, ErrorClass::ModelRefusal);
        assert_eq!(failure.status_code(), 403);
        assert_eq!(failure.envelope.error, "model could not process the data");
        assert!(failure.envelope.detail.is_none());
        assert!(!serde_json::to_string(&failure.envelope).unwrap().contains("secret"));

        assert_eq!(history.len(), 1);
        let record = history.get(1).unwrap();
        assert_eq!(record.status_code, 403);
        assert!(record.error_message.unwrap().contains("secret solver state"));
    }

    #[tokio::test]
    async fn test_internal_predictor_error() {
        let (orchestrator, history) =
            orchestrator(failing_artifact(PredictorError::Internal("matrix exploded".into())));

        let failure = orchestrator
            .forward(&RawFeatureRequest::new(vec![1.0; 4]), &RequestContext::forward())
            .await
            .unwrap_err();

        assert_eq!(failure.class, ErrorClass::Internal);
        assert_eq!(failure.status_code(), 500);
        assert_eq!(failure.envelope.error, "internal error");
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(ArtifactLoader::new(dir.path().join("model.bin")));
        let history = Arc::new(InMemoryHistory::new(10));
        let orchestrator = InferenceOrchestrator::new(loader, history.clone());

        let failure = orchestrator
            .forward(&RawFeatureRequest::new(vec![1.0]), &RequestContext::forward())
            .await
            .unwrap_err();

        assert_eq!(failure.class, ErrorClass::ArtifactNotFound);
        assert_eq!(failure.status_code(), 500);
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_history_failure_does_not_mask_result() {
        let orchestrator = InferenceOrchestrator::new(
            Arc::new(ArtifactLoader::preloaded(linear_artifact())),
            Arc::new(BrokenSink),
        );

        let envelope = orchestrator
            .forward(&RawFeatureRequest::new(vec![0.0; 4]), &RequestContext::forward())
            .await
            .unwrap();
        assert!(envelope.success);
        assert!(envelope.request_id.is_none());

        let failure = orchestrator
            .forward(&RawFeatureRequest::new(vec![0.0; 2]), &RequestContext::forward())
            .await
            .unwrap_err();
        assert_eq!(failure.class, ErrorClass::Validation);
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = ErrorEnvelope::new(ErrorClass::Internal, "boom");
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "internal error");
        assert!(value.get("detail").is_none());
    }

    #[test]
    fn test_round_ms() {
        assert_eq!(round_ms(1.23456), 1.23);
        assert_eq!(round_ms(0.005), 0.01);
    }
}
