use crate::encoding::EncodingSpec;
use crate::error::ArtifactError;
use crate::model::{ModelArtifact, RiskModel};
use crate::scoring::{ScoringConfig, ScoringService};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub encoding_spec: PathBuf,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let text = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_encoding_spec(path: &Path) -> Result<EncodingSpec, ArtifactError> {
    read_json(path)
}

pub fn read_model(path: &Path) -> Result<RiskModel, ArtifactError> {
    let artifact: ModelArtifact = read_json(path)?;
    Ok(RiskModel::from_artifact(artifact)?)
}

impl ScoringService {
    /// Reads both artifacts, runs every consistency check and freezes the pipeline.
    ///
    /// Any failure here means the process must not start serving scores.
    pub fn load(paths: &ArtifactPaths, config: ScoringConfig) -> Result<Self, ArtifactError> {
        let spec = read_encoding_spec(&paths.encoding_spec)?;
        let parity_samples = spec.parity_samples.len();
        let (registry, encoder) = spec.compile()?;
        let model = read_model(&paths.model)?;

        let service = ScoringService::new(registry, encoder, model, config)?;

        tracing::info!(
            encoding_spec_version = service.encoder().version(),
            model_version = service.model().version(),
            model_kind = service.model().kind_name(),
            feature_count = service.model().feature_count(),
            layout_signature = %format!("{:#010x}", service.encoder().layout_signature()),
            parity_samples,
            "loaded scoring artifacts"
        );

        Ok(service)
    }
}
