// Feature schema and default-value policy

use crate::error::{LocusError, Result};
use std::collections::HashMap;

/// Prefix of one-hot establishment-type indicators.
pub const TYPE_PREFIX: &str = "type_";
/// Prefix of one-hot cuisine indicators.
pub const CUISINE_PREFIX: &str = "cuisine_";

/// Default distance in meters to the nearest point of interest.
pub const NEAREST_DEFAULT_M: f64 = 1000.0;
/// Default distance in meters to a city-scale reference point.
pub const DISTANCE_DEFAULT_M: f64 = 5000.0;
/// Neutral midpoint of a concentration index.
pub const HHINDEX_DEFAULT: f64 = 0.5;

/// How a default rule matches a feature name.
#[derive(Debug, Clone, Copy)]
enum NameMatch {
    /// Exact, case-sensitive name.
    Exact(&'static [&'static str]),
    /// Case-insensitive substring.
    Contains(&'static [&'static str]),
    /// Case-sensitive prefix.
    Prefix(&'static str),
}

impl NameMatch {
    fn matches(&self, name: &str, lower: &str) -> bool {
        match self {
            NameMatch::Exact(names) => names.contains(&name),
            NameMatch::Contains(markers) => markers.iter().any(|m| lower.contains(m)),
            NameMatch::Prefix(prefix) => name.starts_with(prefix),
        }
    }
}

/// Default rules in precedence order; the first match wins.
const DEFAULT_RULES: &[(NameMatch, f64)] = &[
    (NameMatch::Exact(&["lat", "lon"]), 0.0),
    (NameMatch::Contains(&["review_count"]), 0.0),
    (NameMatch::Contains(&["competitors"]), 0.0),
    (NameMatch::Contains(&["same_brand"]), 0.0),
    (NameMatch::Contains(&["hhindex"]), HHINDEX_DEFAULT),
    (NameMatch::Contains(&["malls", "stations"]), 0.0),
    (NameMatch::Contains(&["nearest"]), NEAREST_DEFAULT_M),
    (NameMatch::Contains(&["distance"]), DISTANCE_DEFAULT_M),
    (
        NameMatch::Contains(&[
            "facilities",
            "schools",
            "centres",
            "museums",
            "theatres",
            "galleries",
            "attractions",
            "parks",
        ]),
        0.0,
    ),
    (NameMatch::Prefix(TYPE_PREFIX), 0.0),
    (NameMatch::Prefix(CUISINE_PREFIX), 0.0),
];

/// Default value for a feature, derived from its name alone.
///
/// Distances default to "far away" so unset proximity features do not read
/// as "nearby"; indicator features default to "absent".
pub fn default_for(name: &str) -> f64 {
    let lower = name.to_lowercase();
    DEFAULT_RULES
        .iter()
        .find(|(rule, _)| rule.matches(name, &lower))
        .map(|(_, value)| *value)
        .unwrap_or(0.0)
}

/// Ordered feature names a trained model expects, with cached defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    names: Vec<String>,
    defaults: Vec<f64>,
    index: HashMap<String, usize>,
}

impl FeatureSchema {
    /// Builds a schema, evaluating the default policy once per name.
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(LocusError::ArtifactLoad(
                "feature schema must not be empty".to_string(),
            ));
        }

        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(LocusError::ArtifactLoad(format!(
                    "feature name at position {} is empty",
                    i
                )));
            }
            if index.insert(name.clone(), i).is_some() {
                return Err(LocusError::ArtifactLoad(format!(
                    "duplicate feature name: {}",
                    name
                )));
            }
        }

        let defaults = names.iter().map(|n| default_for(n)).collect();

        Ok(Self {
            names,
            defaults,
            index,
        })
    }

    /// Feature names in positional order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Default values in positional order.
    pub fn defaults(&self) -> &[f64] {
        &self.defaults
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Position of a feature, if the schema has it.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Cached default of a named feature.
    pub fn default_of(&self, name: &str) -> Option<f64> {
        self.position(name).map(|i| self.defaults[i])
    }

    /// Establishment types representable as one-hot indicators.
    pub fn establishment_types(&self) -> Vec<String> {
        self.stripped(TYPE_PREFIX)
    }

    /// Cuisines representable as one-hot indicators.
    pub fn cuisines(&self) -> Vec<String> {
        self.stripped(CUISINE_PREFIX)
    }

    fn stripped(&self, prefix: &str) -> Vec<String> {
        self.names
            .iter()
            .filter_map(|n| n.strip_prefix(prefix))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(names: &[&str]) -> FeatureSchema {
        FeatureSchema::new(names.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_default_policy_table() {
        assert_eq!(default_for("hhindex_center"), 0.5);
        assert_eq!(default_for("nearest_museum_distance"), 1000.0);
        assert_eq!(default_for("distance_to_center"), 5000.0);
        assert_eq!(default_for("type_cafe"), 0.0);
        assert_eq!(default_for("cuisine_italian"), 0.0);
        assert_eq!(default_for("lat"), 0.0);
    }

    #[test]
    fn test_default_precedence() {
        // earlier rules shadow later ones
        assert_eq!(default_for("competitors_distance_500"), 0.0);
        assert_eq!(default_for("malls_nearest"), 0.0);
        assert_eq!(default_for("nearest_station_distance"), 1000.0);
        assert_eq!(default_for("HHIndex_500m"), 0.5);
        assert_eq!(default_for("Distance_To_Kremlin"), 5000.0);
        assert_eq!(default_for("parks_in_1km"), 0.0);
        assert_eq!(default_for("rating"), 0.0);
    }

    #[test]
    fn test_schema_caches_defaults() {
        let s = schema(&["lat", "lon", "hhindex_1km", "nearest_park", "type_bar"]);
        assert_eq!(s.len(), 5);
        assert_eq!(s.defaults(), &[0.0, 0.0, 0.5, 1000.0, 0.0]);
        assert_eq!(s.position("nearest_park"), Some(3));
        assert_eq!(s.default_of("hhindex_1km"), Some(0.5));
        assert!(s.default_of("missing").is_none());
    }

    #[test]
    fn test_schema_rejects_duplicates() {
        let err = FeatureSchema::new(vec!["lat".into(), "lat".into()]).unwrap_err();
        assert!(matches!(err, LocusError::ArtifactLoad(_)));
    }

    #[test]
    fn test_schema_rejects_empty() {
        assert!(FeatureSchema::new(Vec::new()).is_err());
        assert!(FeatureSchema::new(vec!["lat".into(), String::new()]).is_err());
    }

    #[test]
    fn test_categorical_listing() {
        let s = schema(&["lat", "type_cafe", "type_fast_food", "cuisine_italian"]);
        assert_eq!(s.establishment_types(), vec!["cafe", "fast_food"]);
        assert_eq!(s.cuisines(), vec!["italian"]);
    }
}
