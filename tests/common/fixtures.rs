// Test fixtures and data generators for integration tests

use locus::compute::registry::{LinearRegression, LogisticRegression, StandardScaler};
use locus::compute::{ArtifactFile, ComponentSpec, SemanticRequest};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Feature names of the reference site-scoring model.
pub const SITE_FEATURES: &[&str] = &[
    "lat",
    "lon",
    "type_restaurant",
    "type_cafe",
    "type_bar",
    "cuisine_italian",
    "cuisine_japanese",
    "cuisine_italian;japanese",
    "brand",
    "nearest_metro",
    "distance_to_center",
    "hhindex_center",
    "rating",
];

pub fn site_feature_names() -> Vec<String> {
    SITE_FEATURES.iter().map(|s| s.to_string()).collect()
}

/// Binary classifier over [`SITE_FEATURES`] with a standard scaler.
///
/// Cafes with a brand score high; far-from-center sites score low.
pub fn site_classifier() -> ArtifactFile {
    let n = SITE_FEATURES.len();
    let mut coef = vec![0.0; n];
    coef[3] = 2.0; // type_cafe
    coef[8] = 1.5; // brand
    coef[10] = -0.5; // distance_to_center
    coef[12] = 0.8; // rating

    let mut mean = vec![0.0; n];
    mean[10] = 5000.0;
    let mut scale = vec![1.0; n];
    scale[0] = 90.0;
    scale[1] = 180.0;
    scale[10] = 2500.0;

    ArtifactFile::new(
        "2024.06.1",
        site_feature_names(),
        ComponentSpec::new(LogisticRegression::KIND)
            .with_param("coef", coef)
            .with_param("intercept", vec![-1.0])
            .with_labels(["0", "1"]),
    )
    .with_scaler(
        ComponentSpec::new(StandardScaler::KIND)
            .with_param("mean", mean)
            .with_param("scale", scale),
    )
}

/// Three-class classifier with text labels over [`SITE_FEATURES`].
pub fn site_tier_classifier() -> ArtifactFile {
    let n = SITE_FEATURES.len();
    let mut coef = vec![0.0; 3 * n];
    coef[2] = 1.0; // low: type_restaurant
    coef[n + 3] = 1.0; // medium: type_cafe
    coef[2 * n + 4] = 1.0; // high: type_bar

    ArtifactFile::new(
        "tiers-1",
        site_feature_names(),
        ComponentSpec::new(LogisticRegression::KIND)
            .with_param("coef", coef)
            .with_param("intercept", vec![0.0, 0.0, 0.0])
            .with_labels(["low", "medium", "high"]),
    )
}

/// Linear regressor summing its first two inputs.
pub fn sum_regressor(feature_names: &[&str]) -> ArtifactFile {
    let mut coef = vec![0.0; feature_names.len()];
    coef[0] = 1.0;
    if coef.len() > 1 {
        coef[1] = 1.0;
    }

    ArtifactFile::new(
        "sum-1",
        feature_names.iter().map(|s| s.to_string()).collect(),
        ComponentSpec::new(LinearRegression::KIND)
            .with_param("coef", coef)
            .with_param("intercept", vec![0.0]),
    )
}

/// Deterministic random data generator for reproducible tests
pub struct TestDataGenerator {
    rng: StdRng,
}

impl TestDataGenerator {
    /// Creates a new generator with a fixed seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Finite feature vector of `len` values
    pub fn feature_vector(&mut self, len: usize) -> Vec<f64> {
        (0..len).map(|_| self.rng.gen_range(-100.0..100.0)).collect()
    }

    /// A length in `1..=max` other than `exclude`
    pub fn length_other_than(&mut self, exclude: usize, max: usize) -> usize {
        loop {
            let len = self.rng.gen_range(1..=max);
            if len != exclude {
                return len;
            }
        }
    }

    /// Semantic request with valid coordinates and random categories
    pub fn semantic_request(&mut self) -> SemanticRequest {
        let types = ["restaurant", "cafe", "bar", "Fast Food", "bakery"];
        let cuisines = ["italian", "japanese", "Italian; Japanese", "georgian", ""];

        let mut request = SemanticRequest::new(
            self.rng.gen_range(-90.0..=90.0),
            self.rng.gen_range(-180.0..=180.0),
        )
        .with_establishment_type(types.choose(&mut self.rng).copied().unwrap_or("cafe"))
        .with_cuisine(cuisines.choose(&mut self.rng).copied().unwrap_or("italian"));

        if self.rng.gen_bool(0.5) {
            request = request.with_brand("Chain");
        }
        if self.rng.gen_bool(0.5) {
            request = request.with_param("rating", self.rng.gen_range(1.0..5.0));
        }
        if self.rng.gen_bool(0.3) {
            request = request.with_param("unknown_extra", true);
        }
        request
    }
}

impl Default for TestDataGenerator {
    fn default() -> Self {
        Self::new(42)
    }
}
