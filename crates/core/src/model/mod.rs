//! The frozen cancellation model.
//!
//! A [`RiskModel`] is built once from a [`ModelArtifact`] and then only read. All
//! inference methods take `&self`, so one instance can be shared across threads.

pub mod tree;

pub use tree::{Node, Tree};

use crate::encoding::FeatureVector;
use crate::error::ModelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_version: String,
    #[serde(default)]
    pub trained_at: Option<DateTime<Utc>>,
    /// Input columns in training order.
    pub feature_names: Vec<String>,
    /// Mean training row; anchors sampled attribution.
    #[serde(default)]
    pub reference: Option<Vec<f64>>,
    pub ensemble: Ensemble,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ensemble {
    /// Sum of leaf values plus `base_score`, in log-odds.
    GradientBoostedTrees { base_score: f64, trees: Vec<Tree> },
    /// Mean of leaf values, each a positive-class probability.
    RandomForest { trees: Vec<Tree> },
    LogisticRegression {
        intercept: f64,
        coefficients: Vec<f64>,
    },
}

impl Ensemble {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::GradientBoostedTrees { .. } => "gradient_boosted_trees",
            Self::RandomForest { .. } => "random_forest",
            Self::LogisticRegression { .. } => "logistic_regression",
        }
    }

    pub fn link(&self) -> Link {
        match self {
            Self::GradientBoostedTrees { .. } | Self::LogisticRegression { .. } => Link::Logistic,
            Self::RandomForest { .. } => Link::Identity,
        }
    }
}

/// Maps the raw ensemble output to a probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    Logistic,
    Identity,
}

impl Link {
    pub fn apply(self, raw: f64) -> f64 {
        match self {
            Self::Logistic => logistic(raw),
            Self::Identity => raw.clamp(0.0, 1.0),
        }
    }
}

/// Logistic function without overflow in `exp` for large |x|.
pub fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Borrowed view of a tree ensemble as the attribution engine needs it:
/// `raw = bias + tree_weight * Σ tree(x)`.
#[derive(Debug, Clone, Copy)]
pub struct TreeEnsembleView<'a> {
    pub trees: &'a [Tree],
    pub tree_weight: f64,
    pub bias: f64,
}

#[derive(Debug, Clone)]
pub struct RiskModel {
    version: String,
    trained_at: Option<DateTime<Utc>>,
    feature_names: Vec<String>,
    reference: Option<Vec<f64>>,
    ensemble: Ensemble,
}

impl RiskModel {
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelError> {
        let invalid = |msg: String| ModelError::InvalidArtifact(msg);
        let feature_count = artifact.feature_names.len();

        if artifact.model_version.trim().is_empty() {
            return Err(invalid("model_version must be non-empty".to_string()));
        }
        if feature_count == 0 {
            return Err(invalid("feature_names must be non-empty".to_string()));
        }
        let mut seen = HashSet::with_capacity(feature_count);
        for name in &artifact.feature_names {
            if !seen.insert(name.as_str()) {
                return Err(invalid(format!("feature `{name}` is listed twice")));
            }
        }

        if let Some(reference) = &artifact.reference {
            if reference.len() != feature_count {
                return Err(invalid(format!(
                    "reference has {} values, model has {feature_count} features",
                    reference.len()
                )));
            }
            if reference.iter().any(|x| !x.is_finite()) {
                return Err(invalid("reference values must be finite".to_string()));
            }
        }

        match &artifact.ensemble {
            Ensemble::GradientBoostedTrees { base_score, trees } => {
                if !base_score.is_finite() {
                    return Err(invalid("base_score must be finite".to_string()));
                }
                validate_trees(trees, feature_count)?;
            }
            Ensemble::RandomForest { trees } => validate_trees(trees, feature_count)?,
            Ensemble::LogisticRegression {
                intercept,
                coefficients,
            } => {
                if coefficients.len() != feature_count {
                    return Err(invalid(format!(
                        "{} coefficients for {feature_count} features",
                        coefficients.len()
                    )));
                }
                if !intercept.is_finite() || coefficients.iter().any(|w| !w.is_finite()) {
                    return Err(invalid("coefficients must be finite".to_string()));
                }
            }
        }

        Ok(Self {
            version: artifact.model_version,
            trained_at: artifact.trained_at,
            feature_names: artifact.feature_names,
            reference: artifact.reference,
            ensemble: artifact.ensemble,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.trained_at
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    pub fn kind_name(&self) -> &'static str {
        self.ensemble.kind_name()
    }

    pub fn link(&self) -> Link {
        self.ensemble.link()
    }

    pub fn reference(&self) -> Option<&[f64]> {
        self.reference.as_deref()
    }

    /// `None` when the model isn't a tree ensemble.
    pub fn tree_ensemble(&self) -> Option<TreeEnsembleView<'_>> {
        match &self.ensemble {
            Ensemble::GradientBoostedTrees { base_score, trees } => Some(TreeEnsembleView {
                trees,
                tree_weight: 1.0,
                bias: *base_score,
            }),
            Ensemble::RandomForest { trees } => Some(TreeEnsembleView {
                trees,
                tree_weight: 1.0 / trees.len() as f64,
                bias: 0.0,
            }),
            Ensemble::LogisticRegression { .. } => None,
        }
    }

    /// Output before the link function (log-odds for boosted trees).
    pub fn raw_score(&self, vector: &FeatureVector) -> Result<f64, ModelError> {
        self.check_dimension(vector.as_slice())?;
        self.raw_score_slice(vector.as_slice())
    }

    /// Cancellation probability in `[0, 1]`.
    pub fn predict(&self, vector: &FeatureVector) -> Result<f64, ModelError> {
        let raw = self.raw_score(vector)?;
        Ok(self.link().apply(raw))
    }

    pub(crate) fn check_dimension(&self, x: &[f64]) -> Result<(), ModelError> {
        if x.len() != self.feature_count() {
            return Err(ModelError::DimensionMismatch {
                expected: self.feature_count(),
                actual: x.len(),
            });
        }
        Ok(())
    }

    /// Raw score of an already dimension-checked slice.
    pub(crate) fn raw_score_slice(&self, x: &[f64]) -> Result<f64, ModelError> {
        if let Some(position) = x.iter().position(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite(format!(
                "feature {} (`{}`) is {}",
                position, self.feature_names[position], x[position]
            )));
        }

        let raw = match &self.ensemble {
            Ensemble::GradientBoostedTrees { base_score, trees } => {
                base_score + trees.iter().map(|t| t.predict(x)).sum::<f64>()
            }
            Ensemble::RandomForest { trees } => {
                trees.iter().map(|t| t.predict(x)).sum::<f64>() / trees.len() as f64
            }
            Ensemble::LogisticRegression {
                intercept,
                coefficients,
            } => intercept + coefficients.iter().zip(x).map(|(w, v)| w * v).sum::<f64>(),
        };

        if raw.is_nan() {
            return Err(ModelError::NonFinite("raw score is NaN".to_string()));
        }
        Ok(raw)
    }
}

fn validate_trees(trees: &[Tree], feature_count: usize) -> Result<(), ModelError> {
    if trees.is_empty() {
        return Err(ModelError::InvalidArtifact(
            "ensemble has no trees".to_string(),
        ));
    }
    for (i, tree) in trees.iter().enumerate() {
        tree.validate(feature_count).map_err(|err| match err {
            ModelError::InvalidArtifact(msg) => {
                ModelError::InvalidArtifact(format!("tree {i}: {msg}"))
            }
            other => other,
        })?;
    }
    Ok(())
}
