//! Model inference for Locus
//!
//! Provides the path from a request to a prediction:
//! - Feature schema and default-value policy
//! - Semantic request mapping
//! - Model artifact format, component registry and single-flight loading
//! - Inference orchestration and HTTP serving

pub mod artifact;
pub mod inference;
pub mod loader;
pub mod mapper;
pub mod registry;
pub mod schema;
pub mod serving;

pub use artifact::{ArtifactFile, ModelArtifact, ModelInfo, PredictionResult};
pub use inference::{
    ErrorEnvelope, InferenceFailure, InferenceOrchestrator, PredictionEnvelope, RawFeatureRequest,
    RequestContext,
};
pub use loader::ArtifactLoader;
pub use mapper::{ParamValue, SemanticMapper, SemanticRequest};
pub use registry::{ComponentRegistry, ComponentSpec, Prediction, Predictor, ProbabilisticPredictor, Scaler};
pub use schema::{default_for, FeatureSchema};
pub use serving::ModelServer;
