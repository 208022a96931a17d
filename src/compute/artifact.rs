// Model artifact: on-disk format and loaded predictor

use super::registry::{
    ensure_finite, ensure_finite_output, most_probable, ComponentRegistry, ComponentSpec,
    Prediction, PredictorHandle, Scaler,
};
use super::schema::FeatureSchema;
use crate::error::{LocusError, PredictorError, Result};
use chrono::{DateTime, Utc};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use tracing::info;

/// Leading bytes of every artifact file.
pub const ARTIFACT_MAGIC: &[u8; 8] = b"LOCUSMDL";
/// Current artifact format version.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = ARTIFACT_MAGIC.len() + 4;

/// Serialized artifact contents.
///
/// Stored as the magic bytes, the little-endian format version and a
/// bincode payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactFile {
    /// Model version string
    pub version: String,
    /// Feature schema the model was trained against
    pub feature_names: Vec<String>,
    /// Optional input scaler
    pub scaler: Option<ComponentSpec>,
    /// Predictor
    pub predictor: ComponentSpec,
}

impl ArtifactFile {
    pub fn new(version: &str, feature_names: Vec<String>, predictor: ComponentSpec) -> Self {
        Self {
            version: version.to_string(),
            feature_names,
            scaler: None,
            predictor,
        }
    }

    pub fn with_scaler(mut self, scaler: ComponentSpec) -> Self {
        self.scaler = Some(scaler);
        self
    }

    /// Encodes to the binary container format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_LEN + 256);
        buf.extend_from_slice(ARTIFACT_MAGIC);
        buf.extend_from_slice(&ARTIFACT_FORMAT_VERSION.to_le_bytes());
        bincode::serialize_into(&mut buf, self)?;
        Ok(buf)
    }

    /// Decodes from the binary container format.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..ARTIFACT_MAGIC.len()] != ARTIFACT_MAGIC {
            return Err(LocusError::ArtifactLoad(
                "not a model artifact (bad magic)".to_string(),
            ));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[ARTIFACT_MAGIC.len()..HEADER_LEN]);
        let version = u32::from_le_bytes(version);
        if version != ARTIFACT_FORMAT_VERSION {
            return Err(LocusError::ArtifactLoad(format!(
                "unsupported artifact format version {} (expected {})",
                version, ARTIFACT_FORMAT_VERSION
            )));
        }

        bincode::deserialize(&bytes[HEADER_LEN..])
            .map_err(|e| LocusError::ArtifactLoad(format!("corrupt artifact payload: {}", e)))
    }

    /// Writes the encoded artifact to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.encode()?)?;
        Ok(())
    }
}

/// Outcome of a single prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub prediction: Prediction,
    /// Class distribution, for probabilistic models
    pub probabilities: Option<Vec<f64>>,
    /// Largest probability in the distribution
    pub confidence: Option<f64>,
}

/// Description of a loaded model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub version: String,
    pub n_features: usize,
    pub features: Vec<String>,
    pub has_scaler: bool,
    pub probabilistic: bool,
    pub classes: Option<Vec<String>>,
    pub establishment_types: Vec<String>,
    pub cuisines: Vec<String>,
    pub loaded_at: DateTime<Utc>,
}

/// Trained predictor, optional scaler and the schema they expect.
///
/// Immutable once built; shared read-only between concurrent calls.
#[derive(Debug)]
pub struct ModelArtifact {
    schema: FeatureSchema,
    scaler: Option<Box<dyn Scaler>>,
    predictor: PredictorHandle,
    version: String,
    loaded_at: DateTime<Utc>,
}

impl ModelArtifact {
    /// Assembles an artifact from already-built components.
    pub fn new(
        schema: FeatureSchema,
        scaler: Option<Box<dyn Scaler>>,
        predictor: PredictorHandle,
        version: &str,
    ) -> Result<Self> {
        if predictor.n_features() != schema.len() {
            return Err(LocusError::ArtifactLoad(format!(
                "predictor expects {} features, schema has {}",
                predictor.n_features(),
                schema.len()
            )));
        }

        Ok(Self {
            schema,
            scaler,
            predictor,
            version: version.to_string(),
            loaded_at: Utc::now(),
        })
    }

    /// Reads and decodes an artifact file.
    pub fn from_file(path: &Path, registry: &ComponentRegistry) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => LocusError::ArtifactNotFound(path.to_path_buf()),
            _ => LocusError::ArtifactLoad(format!("{}: {}", path.display(), e)),
        })?;

        let artifact = Self::from_bytes(&bytes, registry)?;
        info!(
            path = %path.display(),
            model_type = artifact.model_type(),
            features = artifact.schema.len(),
            has_scaler = artifact.has_scaler(),
            "Model artifact loaded"
        );
        Ok(artifact)
    }

    /// Decodes an artifact from its binary encoding.
    pub fn from_bytes(bytes: &[u8], registry: &ComponentRegistry) -> Result<Self> {
        Self::from_spec(ArtifactFile::decode(bytes)?, registry)
    }

    /// Resolves the components of a decoded artifact.
    pub fn from_spec(file: ArtifactFile, registry: &ComponentRegistry) -> Result<Self> {
        let schema = FeatureSchema::new(file.feature_names)?;
        let scaler = file
            .scaler
            .as_ref()
            .map(|spec| registry.build_scaler(spec, schema.len()))
            .transpose()?;
        let predictor = registry.build_predictor(&file.predictor, schema.len())?;

        Self::new(schema, scaler, predictor, &file.version)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn model_type(&self) -> &str {
        self.predictor.kind()
    }

    pub fn has_scaler(&self) -> bool {
        self.scaler.is_some()
    }

    pub fn is_probabilistic(&self) -> bool {
        self.predictor.probabilistic().is_some()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Predicts a single schema-ordered vector.
    pub fn predict(&self, vector: &[f64]) -> Result<PredictionResult> {
        if vector.len() != self.schema.len() {
            return Err(LocusError::FeatureCountMismatch {
                expected: self.schema.len(),
                actual: vector.len(),
            });
        }

        let row = ArrayView2::from_shape((1, vector.len()), vector)
            .map_err(|e| LocusError::Internal(e.to_string()))?;

        let scaled = match &self.scaler {
            Some(scaler) => {
                let scaled = scaler.transform(row)?;
                ensure_finite(scaled.view())?;
                Some(scaled)
            }
            None => None,
        };
        let input = scaled.as_ref().map(|a| a.view()).unwrap_or(row);

        let (prediction, probabilities) = match self.predictor.probabilistic() {
            Some(model) => {
                let proba = model.predict_proba(input)?;
                let dist = proba.row(0);
                ensure_finite_output(dist)?;
                (most_probable(model.classes(), dist)?, Some(dist.to_vec()))
            }
            None => {
                let prediction = self
                    .predictor
                    .predict(input)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| PredictorError::Internal("predictor returned no label".to_string()))?;
                if let Prediction::Number(n) = &prediction {
                    ensure_finite_output([n])?;
                }
                (prediction, None)
            }
        };
        let confidence = probabilities
            .as_ref()
            .and_then(|p| p.iter().copied().reduce(f64::max));

        Ok(PredictionResult {
            prediction,
            probabilities,
            confidence,
        })
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            model_type: self.model_type().to_string(),
            version: self.version.clone(),
            n_features: self.schema.len(),
            features: self.schema.names().to_vec(),
            has_scaler: self.has_scaler(),
            probabilistic: self.is_probabilistic(),
            classes: self.predictor.probabilistic().map(|p| p.classes().to_vec()),
            establishment_types: self.schema.establishment_types(),
            cuisines: self.schema.cuisines(),
            loaded_at: self.loaded_at,
        }
    }
}
