//! Key-value artifact storage for trained models and fitted preprocessors.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{Result, ServiceError};
use crate::model::PredictionAdapter;

pub trait ArtifactStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Vec<u8>>;
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Where a run's artifacts live inside the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub model: String,
    pub preprocessor: String,
}

impl ArtifactLocation {
    pub fn new(experiment_id: &str, run_id: &str, model_id: &str) -> Self {
        Self {
            model: format!("{}/models/{}/artifacts/model.json", experiment_id, model_id),
            preprocessor: format!(
                "{}/{}/artifacts/preprocessor/preprocessor.json",
                experiment_id, run_id
            ),
        }
    }
}

/// Fetch both artifacts for a run and build the adapter from them.
pub fn load_adapter(
    store: &dyn ArtifactStore,
    experiment_id: &str,
    run_id: &str,
    model_id: &str,
) -> Result<PredictionAdapter> {
    let location = ArtifactLocation::new(experiment_id, run_id, model_id);
    debug!(model = %location.model, preprocessor = %location.preprocessor, "fetching artifacts");
    let model = store.get(&location.model)?;
    let preprocessor = store.get(&location.preprocessor)?;
    PredictionAdapter::from_artifacts(&model, &preprocessor)
}

/// Artifact store backed by a local directory; keys are relative paths.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(ServiceError::Artifact {
                key: key.to_string(),
                message: "key must be a relative path without `..`".to_string(),
            });
        }
        Ok(self.root.join(rel))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ServiceError::ArtifactNotFound(key.to_string()),
            _ => ServiceError::Artifact {
                key: key.to_string(),
                message: e.to_string(),
            },
        })
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(())
    }
}
