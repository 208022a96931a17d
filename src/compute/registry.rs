// Component registry for model artifacts
//
// Artifacts name their scaler and predictor by kind. Kinds are resolved here
// against a fixed table of factories; an artifact naming an unregistered kind
// fails to load.

use crate::error::{LocusError, PredictorError, PredictorResult, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Primary label produced by a predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prediction {
    Number(f64),
    Label(String),
}

impl Prediction {
    /// Numeric labels are returned as numbers.
    pub fn from_label(label: &str) -> Self {
        label
            .parse::<f64>()
            .map(Prediction::Number)
            .unwrap_or_else(|_| Prediction::Label(label.to_string()))
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prediction::Number(n) => write!(f, "{}", n),
            Prediction::Label(s) => write!(f, "{}", s),
        }
    }
}

/// A trained model that maps feature rows to labels.
pub trait Predictor: Send + Sync + fmt::Debug {
    /// Registry kind, also reported as the model type.
    fn kind(&self) -> &str;

    /// Number of input features per row.
    fn n_features(&self) -> usize;

    /// One label per input row.
    fn predict(&self, rows: ArrayView2<'_, f64>) -> PredictorResult<Vec<Prediction>>;
}

/// A predictor that can also report a class distribution.
pub trait ProbabilisticPredictor: Predictor {
    /// Class labels in distribution order.
    fn classes(&self) -> &[String];

    /// One distribution per input row.
    fn predict_proba(&self, rows: ArrayView2<'_, f64>) -> PredictorResult<Array2<f64>>;
}

/// Input transform applied before prediction.
pub trait Scaler: Send + Sync + fmt::Debug {
    fn kind(&self) -> &str;

    fn transform(&self, rows: ArrayView2<'_, f64>) -> PredictorResult<Array2<f64>>;
}

/// Predictor with its capabilities resolved at load time.
#[derive(Debug)]
pub enum PredictorHandle {
    Plain(Box<dyn Predictor>),
    Probabilistic(Box<dyn ProbabilisticPredictor>),
}

impl PredictorHandle {
    pub fn kind(&self) -> &str {
        match self {
            PredictorHandle::Plain(p) => p.kind(),
            PredictorHandle::Probabilistic(p) => p.kind(),
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            PredictorHandle::Plain(p) => p.n_features(),
            PredictorHandle::Probabilistic(p) => p.n_features(),
        }
    }

    pub fn predict(&self, rows: ArrayView2<'_, f64>) -> PredictorResult<Vec<Prediction>> {
        match self {
            PredictorHandle::Plain(p) => p.predict(rows),
            PredictorHandle::Probabilistic(p) => p.predict(rows),
        }
    }

    /// The distribution capability, when the predictor has one.
    pub fn probabilistic(&self) -> Option<&dyn ProbabilisticPredictor> {
        match self {
            PredictorHandle::Plain(_) => None,
            PredictorHandle::Probabilistic(p) => Some(p.as_ref()),
        }
    }
}

/// Serialized description of a scaler or predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Registry kind
    pub kind: String,
    /// Named numeric parameters
    pub params: BTreeMap<String, Vec<f64>>,
    /// Class labels, for classifiers
    pub labels: Vec<String>,
}

impl ComponentSpec {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            params: BTreeMap::new(),
            labels: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: &str, values: Vec<f64>) -> Self {
        self.params.insert(name.to_string(), values);
        self
    }

    pub fn with_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    fn param(&self, name: &str) -> std::result::Result<&[f64], String> {
        self.params
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| format!("{}: missing parameter '{}'", self.kind, name))
    }

    fn vector_param(&self, name: &str, len: usize) -> std::result::Result<Array1<f64>, String> {
        let values = self.param(name)?;
        if values.len() != len {
            return Err(format!(
                "{}: parameter '{}' has {} values, expected {}",
                self.kind,
                name,
                values.len(),
                len
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(format!("{}: parameter '{}' is not finite", self.kind, name));
        }
        Ok(Array1::from(values.to_vec()))
    }
}

pub type PredictorFactory = fn(&ComponentSpec, usize) -> std::result::Result<PredictorHandle, String>;
pub type ScalerFactory = fn(&ComponentSpec, usize) -> std::result::Result<Box<dyn Scaler>, String>;

/// Fixed table of component kinds an artifact may reference.
pub struct ComponentRegistry {
    predictors: HashMap<String, PredictorFactory>,
    scalers: HashMap<String, ScalerFactory>,
}

impl ComponentRegistry {
    /// Creates a registry with no kinds.
    pub fn empty() -> Self {
        Self {
            predictors: HashMap::new(),
            scalers: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in kinds.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register_scaler(StandardScaler::KIND, StandardScaler::build);
        registry.register_scaler(MinMaxScaler::KIND, MinMaxScaler::build);
        registry.register_predictor(LinearRegression::KIND, LinearRegression::build);
        registry.register_predictor(LogisticRegression::KIND, LogisticRegression::build);
        registry
    }

    pub fn register_predictor(&mut self, kind: &str, factory: PredictorFactory) {
        self.predictors.insert(kind.to_string(), factory);
    }

    pub fn register_scaler(&mut self, kind: &str, factory: ScalerFactory) {
        self.scalers.insert(kind.to_string(), factory);
    }

    /// Registered predictor kinds, sorted.
    pub fn predictor_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.predictors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Registered scaler kinds, sorted.
    pub fn scaler_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.scalers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Resolves and builds a predictor for `n_features` inputs.
    pub fn build_predictor(&self, spec: &ComponentSpec, n_features: usize) -> Result<PredictorHandle> {
        let factory = self.predictors.get(&spec.kind).ok_or_else(|| {
            LocusError::ArtifactLoad(format!("unregistered predictor kind: {}", spec.kind))
        })?;
        let handle = factory(spec, n_features).map_err(LocusError::ArtifactLoad)?;

        if handle.n_features() != n_features {
            return Err(LocusError::ArtifactLoad(format!(
                "predictor expects {} features, schema has {}",
                handle.n_features(),
                n_features
            )));
        }
        Ok(handle)
    }

    /// Resolves and builds a scaler for `n_features` inputs.
    pub fn build_scaler(&self, spec: &ComponentSpec, n_features: usize) -> Result<Box<dyn Scaler>> {
        let factory = self.scalers.get(&spec.kind).ok_or_else(|| {
            LocusError::ArtifactLoad(format!("unregistered scaler kind: {}", spec.kind))
        })?;
        factory(spec, n_features).map_err(LocusError::ArtifactLoad)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("predictors", &self.predictor_kinds())
            .field("scalers", &self.scaler_kinds())
            .finish()
    }
}

/// Refuses rows containing NaN or infinite values.
pub fn ensure_finite(rows: ArrayView2<'_, f64>) -> PredictorResult<()> {
    for (r, row) in rows.axis_iter(Axis(0)).enumerate() {
        if let Some(c) = row.iter().position(|v| !v.is_finite()) {
            return Err(PredictorError::Refused(format!(
                "non-finite value in row {} at feature {}",
                r, c
            )));
        }
    }
    Ok(())
}

/// Refuses model outputs that overflowed to NaN or infinity.
pub fn ensure_finite_output<'a>(values: impl IntoIterator<Item = &'a f64>) -> PredictorResult<()> {
    if values.into_iter().any(|v| !v.is_finite()) {
        return Err(PredictorError::Refused(
            "model output is not finite".to_string(),
        ));
    }
    Ok(())
}

/// Label of the most probable class in a distribution.
pub fn most_probable(classes: &[String], dist: ArrayView1<'_, f64>) -> PredictorResult<Prediction> {
    dist.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .and_then(|(i, _)| classes.get(i))
        .map(|label| Prediction::from_label(label))
        .ok_or_else(|| PredictorError::Internal("empty distribution".to_string()))
}

fn ensure_width(rows: ArrayView2<'_, f64>, expected: usize) -> PredictorResult<()> {
    if rows.ncols() != expected {
        return Err(PredictorError::Internal(format!(
            "expected {} columns, got {}",
            expected,
            rows.ncols()
        )));
    }
    Ok(())
}

/// Standardizes features: `(x - mean) / scale`.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub const KIND: &'static str = "standard_scaler";

    fn build(spec: &ComponentSpec, n_features: usize) -> std::result::Result<Box<dyn Scaler>, String> {
        let mean = spec.vector_param("mean", n_features)?;
        let scale = spec.vector_param("scale", n_features)?;
        if scale.iter().any(|s| *s == 0.0) {
            return Err(format!("{}: scale contains zero", Self::KIND));
        }
        Ok(Box::new(Self { mean, scale }))
    }
}

impl Scaler for StandardScaler {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn transform(&self, rows: ArrayView2<'_, f64>) -> PredictorResult<Array2<f64>> {
        ensure_width(rows, self.mean.len())?;
        Ok((&rows - &self.mean) / &self.scale)
    }
}

/// Rescales features: `x * scale + min`.
#[derive(Debug, Clone)]
pub struct MinMaxScaler {
    min: Array1<f64>,
    scale: Array1<f64>,
}

impl MinMaxScaler {
    pub const KIND: &'static str = "min_max_scaler";

    fn build(spec: &ComponentSpec, n_features: usize) -> std::result::Result<Box<dyn Scaler>, String> {
        Ok(Box::new(Self {
            min: spec.vector_param("min", n_features)?,
            scale: spec.vector_param("scale", n_features)?,
        }))
    }
}

impl Scaler for MinMaxScaler {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn transform(&self, rows: ArrayView2<'_, f64>) -> PredictorResult<Array2<f64>> {
        ensure_width(rows, self.min.len())?;
        Ok(&rows * &self.scale + &self.min)
    }
}

/// Ordinary least-squares regressor.
#[derive(Debug, Clone)]
pub struct LinearRegression {
    coef: Array1<f64>,
    intercept: f64,
}

impl LinearRegression {
    pub const KIND: &'static str = "linear_regression";

    pub fn new(coef: Vec<f64>, intercept: f64) -> Self {
        Self {
            coef: Array1::from(coef),
            intercept,
        }
    }

    fn build(spec: &ComponentSpec, n_features: usize) -> std::result::Result<PredictorHandle, String> {
        let coef = spec.vector_param("coef", n_features)?;
        let intercept = spec.vector_param("intercept", 1)?[0];
        Ok(PredictorHandle::Plain(Box::new(Self { coef, intercept })))
    }
}

impl Predictor for LinearRegression {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn n_features(&self) -> usize {
        self.coef.len()
    }

    fn predict(&self, rows: ArrayView2<'_, f64>) -> PredictorResult<Vec<Prediction>> {
        ensure_width(rows, self.coef.len())?;
        ensure_finite(rows)?;
        let outputs = rows.dot(&self.coef) + self.intercept;
        ensure_finite_output(&outputs)?;
        Ok(outputs.iter().map(|y| Prediction::Number(*y)).collect())
    }
}

/// Logistic classifier.
///
/// A single coefficient row with two labels is a binary model scored with the
/// sigmoid; otherwise there is one row per class and scores go through softmax.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    coef: Array2<f64>,
    intercept: Array1<f64>,
    classes: Vec<String>,
}

impl LogisticRegression {
    pub const KIND: &'static str = "logistic_regression";

    fn build(spec: &ComponentSpec, n_features: usize) -> std::result::Result<PredictorHandle, String> {
        let n_classes = spec.labels.len();
        if n_classes < 2 {
            return Err(format!("{}: needs at least two labels", Self::KIND));
        }

        let n_rows = if n_classes == 2 { 1 } else { n_classes };
        let flat = spec.vector_param("coef", n_rows * n_features)?;
        let coef = flat
            .into_shape((n_rows, n_features))
            .map_err(|e| format!("{}: {}", Self::KIND, e))?;
        let intercept = spec.vector_param("intercept", n_rows)?;

        Ok(PredictorHandle::Probabilistic(Box::new(Self {
            coef,
            intercept,
            classes: spec.labels.clone(),
        })))
    }

    fn scores(&self, rows: ArrayView2<'_, f64>) -> PredictorResult<Array2<f64>> {
        ensure_width(rows, self.coef.ncols())?;
        ensure_finite(rows)?;
        let scores = rows.dot(&self.coef.t()) + &self.intercept;
        ensure_finite_output(&scores)?;
        Ok(scores)
    }
}

impl Predictor for LogisticRegression {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn n_features(&self) -> usize {
        self.coef.ncols()
    }

    fn predict(&self, rows: ArrayView2<'_, f64>) -> PredictorResult<Vec<Prediction>> {
        let proba = self.predict_proba(rows)?;
        proba
            .axis_iter(Axis(0))
            .map(|dist| most_probable(&self.classes, dist))
            .collect()
    }
}

impl ProbabilisticPredictor for LogisticRegression {
    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn predict_proba(&self, rows: ArrayView2<'_, f64>) -> PredictorResult<Array2<f64>> {
        let scores = self.scores(rows)?;

        if self.coef.nrows() == 1 {
            let mut proba = Array2::zeros((scores.nrows(), 2));
            for (i, z) in scores.column(0).iter().enumerate() {
                let p = 1.0 / (1.0 + (-z).exp());
                proba[[i, 0]] = 1.0 - p;
                proba[[i, 1]] = p;
            }
            return Ok(proba);
        }

        let mut proba = scores;
        for mut row in proba.axis_iter_mut(Axis(0)) {
            let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        ensure_finite_output(&proba)?;
        Ok(proba)
    }
}
