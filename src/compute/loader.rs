// Single-flight artifact loader

use super::artifact::ModelArtifact;
use super::registry::ComponentRegistry;
use crate::error::{LocusError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};

/// Loads the model artifact at most once per process.
///
/// Concurrent first callers wait on a single load. A failed load leaves the
/// cell empty, so a later call retries from scratch and never observes a
/// partially built artifact.
#[derive(Debug)]
pub struct ArtifactLoader {
    path: PathBuf,
    registry: Arc<ComponentRegistry>,
    cell: OnceCell<Arc<ModelArtifact>>,
    attempts: AtomicU64,
}

impl ArtifactLoader {
    /// Creates a loader resolving components with the built-in registry.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_registry(path, Arc::new(ComponentRegistry::builtin()))
    }

    pub fn with_registry(path: impl Into<PathBuf>, registry: Arc<ComponentRegistry>) -> Self {
        Self {
            path: path.into(),
            registry,
            cell: OnceCell::new(),
            attempts: AtomicU64::new(0),
        }
    }

    /// Creates a loader that already holds an artifact.
    pub fn preloaded(artifact: ModelArtifact) -> Self {
        Self {
            path: PathBuf::new(),
            registry: Arc::new(ComponentRegistry::builtin()),
            cell: OnceCell::new_with(Some(Arc::new(artifact))),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the artifact, loading it on first use.
    pub async fn load(&self) -> Result<Arc<ModelArtifact>> {
        let artifact = self
            .cell
            .get_or_try_init(|| async {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                let path = self.path.clone();
                let registry = Arc::clone(&self.registry);

                let loaded = tokio::task::spawn_blocking(move || {
                    ModelArtifact::from_file(&path, &registry)
                })
                .await
                .map_err(|e| LocusError::Internal(format!("artifact load task failed: {}", e)))?;

                match loaded {
                    Ok(artifact) => {
                        crate::observability::record_artifact_load(true);
                        Ok(Arc::new(artifact))
                    }
                    Err(e) => {
                        crate::observability::record_artifact_load(false);
                        error!(path = %self.path.display(), error = %e, "Model artifact load failed");
                        Err(e)
                    }
                }
            })
            .await?;

        Ok(Arc::clone(artifact))
    }

    /// Returns the artifact if it has been loaded.
    pub fn get(&self) -> Option<Arc<ModelArtifact>> {
        self.cell.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Number of load attempts that reached the file system.
    pub fn load_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Loads eagerly at startup; failure is fatal to the caller.
    pub async fn preload(&self) -> Result<Arc<ModelArtifact>> {
        let artifact = self.load().await?;
        info!(
            path = %self.path.display(),
            version = artifact.version(),
            "Model artifact ready"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::artifact::ArtifactFile;
    use crate::compute::registry::{ComponentSpec, LinearRegression};

    fn write_artifact(path: &Path) {
        ArtifactFile::new(
            "1",
            vec!["x".to_string()],
            ComponentSpec::new(LinearRegression::KIND)
                .with_param("coef", vec![2.0])
                .with_param("intercept", vec![0.0]),
        )
        .write_to(path)
        .unwrap();
    }

    #[tokio::test]
    async fn test_load_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        write_artifact(&path);

        let loader = ArtifactLoader::new(&path);
        assert!(!loader.is_loaded());

        let first = loader.load().await.unwrap();
        let second = loader.load().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.load_attempts(), 1);
        assert!(loader.get().is_some());
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let loader = ArtifactLoader::new(&path);

        let err = loader.load().await.unwrap_err();
        assert!(matches!(err, LocusError::ArtifactNotFound(_)));
        assert!(loader.get().is_none());

        write_artifact(&path);
        assert!(loader.load().await.is_ok());
        assert_eq!(loader.load_attempts(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, b"not a model").unwrap();

        let loader = ArtifactLoader::new(&path);
        let err = loader.load().await.unwrap_err();
        assert!(matches!(err, LocusError::ArtifactLoad(_)));
        assert!(!loader.is_loaded());
    }
}
