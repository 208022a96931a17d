// Semantic descriptor to feature vector mapping

use super::schema::{FeatureSchema, CUISINE_PREFIX, TYPE_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator between multiple cuisine values.
pub const CUISINE_SEPARATOR: char = ';';

/// Free-form parameter value supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ParamValue {
    /// Numeric value of the parameter.
    ///
    /// Numbers and numeric-looking text are taken as is; anything else is
    /// 1.0 when truthy and 0.0 otherwise.
    pub fn coerce(&self) -> f64 {
        match self {
            ParamValue::Number(n) => *n,
            ParamValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            ParamValue::Text(s) => match s.trim().parse::<f64>() {
                Ok(n) => n,
                Err(_) if s.is_empty() => 0.0,
                Err(_) => 1.0,
            },
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// Business-level description of a location to score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRequest {
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_establishment_type")]
    pub establishment_type: String,
    /// One or more cuisines joined by `;`.
    #[serde(default = "default_cuisine")]
    pub cuisine: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub additional_params: BTreeMap<String, ParamValue>,
}

fn default_establishment_type() -> String {
    "restaurant".to_string()
}

fn default_cuisine() -> String {
    "international".to_string()
}

impl SemanticRequest {
    /// Creates a request with default type and cuisine.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            establishment_type: default_establishment_type(),
            cuisine: default_cuisine(),
            brand: None,
            additional_params: BTreeMap::new(),
        }
    }

    pub fn with_establishment_type(mut self, establishment_type: &str) -> Self {
        self.establishment_type = establishment_type.to_string();
        self
    }

    pub fn with_cuisine(mut self, cuisine: &str) -> Self {
        self.cuisine = cuisine.to_string();
        self
    }

    pub fn with_brand(mut self, brand: &str) -> Self {
        self.brand = Some(brand.to_string());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.additional_params.insert(key.to_string(), value.into());
        self
    }
}

/// Lowercases and replaces spaces with underscores.
pub fn normalize_category(value: &str) -> String {
    value.to_lowercase().replace(' ', "_")
}

/// Indicator feature name for a cuisine value.
///
/// Multiple values are trimmed, normalized one by one and re-joined, so
/// `"Italian; Japanese"` becomes `cuisine_italian;japanese`.
pub fn cuisine_feature(cuisine: &str) -> String {
    let normalized = if cuisine.contains(CUISINE_SEPARATOR) {
        cuisine
            .split(CUISINE_SEPARATOR)
            .map(|part| normalize_category(part.trim()))
            .collect::<Vec<_>>()
            .join(";")
    } else {
        normalize_category(cuisine)
    };
    format!("{}{}", CUISINE_PREFIX, normalized)
}

/// Indicator feature name for an establishment type.
pub fn type_feature(establishment_type: &str) -> String {
    format!("{}{}", TYPE_PREFIX, normalize_category(establishment_type))
}

/// Translates semantic requests into schema-ordered vectors.
///
/// Fields the schema cannot represent are dropped without error, so callers
/// may send forward-compatible extras.
#[derive(Debug, Clone, Copy)]
pub struct SemanticMapper<'a> {
    schema: &'a FeatureSchema,
}

impl<'a> SemanticMapper<'a> {
    pub fn new(schema: &'a FeatureSchema) -> Self {
        Self { schema }
    }

    /// Builds a vector of `schema.len()` values.
    pub fn to_vector(&self, request: &SemanticRequest) -> Vec<f64> {
        let mut vector = self.schema.defaults().to_vec();

        self.set(&mut vector, "lat", request.lat);
        self.set(&mut vector, "lon", request.lon);

        self.set(&mut vector, &type_feature(&request.establishment_type), 1.0);

        // a multi-value cuisine only activates a combined feature of the same name
        self.set(&mut vector, &cuisine_feature(&request.cuisine), 1.0);

        if request.brand.as_deref().is_some_and(|b| !b.is_empty()) {
            self.set(&mut vector, "brand", 1.0);
        }

        for (key, value) in &request.additional_params {
            self.set(&mut vector, key, value.coerce());
        }

        vector
    }

    fn set(&self, vector: &mut [f64], name: &str, value: f64) {
        if let Some(i) = self.schema.position(name) {
            vector[i] = value;
        }
    }
}
