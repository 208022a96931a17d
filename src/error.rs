//! Error types for the Locus inference service.
//!
//! This module provides a unified error type [`LocusError`] for all Locus operations,
//! along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Artifact**: the trained model artifact is missing or cannot be decoded
//! - **Inference**: feature-count mismatches and predictor failures
//! - **Validation**: caller input that does not fit the feature schema
//! - **Configuration**: invalid settings or unreadable config files
//!
//! Every error maps onto exactly one caller-facing [`ErrorClass`]:
//!
//! ```rust
//! use locus::error::{ErrorClass, LocusError};
//!
//! let err = LocusError::FeatureCountMismatch { expected: 3, actual: 2 };
//! assert_eq!(err.class(), ErrorClass::Validation);
//! assert_eq!(err.class().status_code(), 400);
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Locus operations.
#[derive(Error, Debug)]
pub enum LocusError {
    // Artifact errors
    #[error("Model artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("Failed to load model artifact: {0}")]
    ArtifactLoad(String),

    // Inference errors
    #[error("Expected {expected} features, got {actual}")]
    FeatureCountMismatch { expected: usize, actual: usize },

    #[error("Model prediction failed: {0}")]
    PredictionFailed(#[from] PredictorError),

    #[error("Validation error: {0}")]
    Validation(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure raised by a predictor or scaler while processing a batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictorError {
    /// The component cannot accept this input.
    #[error("input refused: {0}")]
    Refused(String),

    /// Any other component-internal failure.
    #[error("{0}")]
    Internal(String),
}

/// Result type for predictor and scaler components.
pub type PredictorResult<T> = std::result::Result<T, PredictorError>;

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Feature count or shape does not match the schema.
    Validation,
    /// The predictor rejected the input.
    ModelRefusal,
    /// The artifact file does not exist.
    ArtifactNotFound,
    /// The artifact exists but could not be decoded.
    ArtifactLoad,
    /// Anything else.
    Internal,
}

impl ErrorClass {
    /// HTTP status code for transports that need one.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorClass::Validation => 400,
            ErrorClass::ModelRefusal => 403,
            _ => 500,
        }
    }

    /// Stable message shown to callers.
    pub fn public_message(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "bad request",
            ErrorClass::ModelRefusal => "model could not process the data",
            ErrorClass::ArtifactNotFound | ErrorClass::ArtifactLoad => "model unavailable",
            ErrorClass::Internal => "internal error",
        }
    }

    /// Whether the raw cause may be returned to the caller.
    pub fn exposes_detail(&self) -> bool {
        matches!(self, ErrorClass::Validation)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::ModelRefusal => "model_refusal",
            ErrorClass::ArtifactNotFound => "artifact_not_found",
            ErrorClass::ArtifactLoad => "artifact_load",
            ErrorClass::Internal => "internal",
        }
    }
}

impl LocusError {
    /// Classify this error into the caller-facing taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            LocusError::Validation(_) | LocusError::FeatureCountMismatch { .. } => {
                ErrorClass::Validation
            }
            LocusError::PredictionFailed(PredictorError::Refused(_)) => ErrorClass::ModelRefusal,
            LocusError::ArtifactNotFound(_) => ErrorClass::ArtifactNotFound,
            LocusError::ArtifactLoad(_) => ErrorClass::ArtifactLoad,
            _ => ErrorClass::Internal,
        }
    }

    /// Check if a later attempt may succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LocusError::ArtifactNotFound(_) | LocusError::ArtifactLoad(_) | LocusError::Io(_)
        )
    }
}

impl From<bincode::Error> for LocusError {
    fn from(e: bincode::Error) -> Self {
        LocusError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for LocusError {
    fn from(e: serde_json::Error) -> Self {
        LocusError::Serialization(e.to_string())
    }
}

/// Result type alias for Locus operations.
pub type Result<T> = std::result::Result<T, LocusError>;
