use std::path::PathBuf;
use thiserror::Error;

/// Malformed or missing input. Always names the offending field so the caller can fix it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("missing required field `{field}`")]
    MissingField { field: String },

    #[error("unknown field `{field}`")]
    UnknownField { field: String },

    #[error("field `{field}` expected {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("field `{field}` has an invalid value: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("field `{field}` does not accept unseen category {value:?}")]
    UnknownCategory { field: String, value: String },
}

impl SchemaError {
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField { field }
            | Self::UnknownField { field }
            | Self::TypeMismatch { field, .. }
            | Self::InvalidValue { field, .. }
            | Self::UnknownCategory { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodingError {
    #[error("encoding spec is inconsistent: {0}")]
    SpecMismatch(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("feature vector has {actual} values but the model expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("model artifact is invalid: {0}")]
    InvalidArtifact(String),

    #[error("non-finite value in model input or output: {0}")]
    NonFinite(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributionError {
    #[error("exact attribution is not supported for {model_kind} models")]
    Unsupported { model_kind: &'static str },

    #[error("sampled attribution needs a reference point, but the model artifact has none")]
    MissingReference,

    #[error("sampled attribution needs at least one permutation")]
    NoPermutations,

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Errors raised while reading artifacts at startup. All of them are fatal.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read artifact {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse artifact {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("model and encoding spec disagree: {0}")]
    SignatureMismatch(String),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// How the surrounding application should present a scoring failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input was invalid; the user can correct it.
    InvalidInput,
    /// The loaded artifacts are inconsistent; scoring must halt for this version.
    Misconfigured,
    /// The probability is fine but no explanation can be produced without a fallback.
    ExplanationUnavailable,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Attribution(#[from] AttributionError),
}

impl ScoringError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) => ErrorKind::InvalidInput,
            Self::Encoding(_) | Self::Model(_) => ErrorKind::Misconfigured,
            // A model failure surfacing through the explainer is still a consistency failure.
            Self::Attribution(AttributionError::Model(_)) => ErrorKind::Misconfigured,
            Self::Attribution(_) => ErrorKind::ExplanationUnavailable,
        }
    }
}
