use crate::schema::FieldSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// On-disk encoding spec: the schema plus how every field lands in the feature vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingSpec {
    pub version: String,
    pub feature_count: usize,
    /// Column order the model was trained against.
    pub columns: Vec<String>,
    pub fields: Vec<EncodedField>,
    #[serde(default)]
    pub layout_signature: Option<u32>,
    /// Records with the vector the training-time encoder produced for them.
    #[serde(default)]
    pub parity_samples: Vec<ParitySample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedField {
    #[serde(flatten)]
    pub field: FieldSpec,
    pub encoding: FieldEncoding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldEncoding {
    /// Numeric value copied verbatim.
    Raw,
    /// Numeric value standardized as `(x - mean) / std`.
    Standard { mean: f64, std: f64 },
    /// Boolean as `1.0` / `0.0`.
    Flag,
    /// Vocabulary index in one column; unseen categories take `other_code`.
    Ordinal { other_code: f64 },
    /// One `{field}_{category}` column per vocabulary entry; unseen categories are all zeros.
    OneHot {
        #[serde(default)]
        drop_first: bool,
    },
}

impl FieldEncoding {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Standard { .. } => "standard",
            Self::Flag => "flag",
            Self::Ordinal { .. } => "ordinal",
            Self::OneHot { .. } => "one_hot",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParitySample {
    pub record: Value,
    pub vector: Vec<f64>,
}
