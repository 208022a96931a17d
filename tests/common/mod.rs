//! Common test utilities for integration tests.

pub mod fixtures;

use locus::compute::ArtifactFile;
use std::path::PathBuf;
use tempfile::TempDir;

pub use fixtures::*;

/// Test environment that owns a temporary artifact directory.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub artifact_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let artifact_dir = temp_dir.path().join("artifacts");
        std::fs::create_dir_all(&artifact_dir).expect("Failed to create artifact dir");

        Self {
            temp_dir,
            artifact_dir,
        }
    }

    /// Path for an artifact that has not been written yet.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.artifact_dir.join(name)
    }

    /// Writes `file` under `name` and returns its path.
    pub fn write_artifact(&self, name: &str, file: &ArtifactFile) -> PathBuf {
        let path = self.artifact_path(name);
        file.write_to(&path).expect("Failed to write artifact");
        path
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
