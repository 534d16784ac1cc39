//! One call from raw booking JSON to probability, tier and explanation.

use crate::attribution::{self, AttributionMethod, AttributionResult, FeatureContribution};
use crate::encoding::FeatureEncoder;
use crate::error::{ArtifactError, AttributionError, ScoringError};
use crate::model::RiskModel;
use crate::schema::{BookingRecord, SchemaRegistry};
use anyhow::ensure;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn recommended_action(&self) -> &'static str {
        match self {
            Self::High => {
                "Contact the guest now: reconfirm the booking personally and offer a small \
                 incentive for paying a deposit."
            }
            Self::Medium => {
                "Monitor actively: add the booking to a watchlist and send a reminder two weeks \
                 before the free cancellation period ends."
            }
            Self::Low => "No special action needed: the booking is likely secure.",
        }
    }
}

/// Tier cutoffs: `p > high` is high, `p > medium` is medium, anything else is low.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub medium: f64,
    pub high: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            medium: 0.4,
            high: 0.7,
        }
    }
}

impl TierThresholds {
    pub fn new(medium: f64, high: f64) -> anyhow::Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&medium) && (0.0..=1.0).contains(&high),
            "tier thresholds must be within [0, 1] (got medium={medium}, high={high})"
        );
        ensure!(
            medium <= high,
            "medium threshold {medium} must not exceed high threshold {high}"
        );
        Ok(Self { medium, high })
    }

    pub fn tier(&self, probability: f64) -> RiskTier {
        if probability > self.high {
            RiskTier::High
        } else if probability > self.medium {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }
}

/// What to do when exact attribution isn't available for the loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributionFallback {
    /// Propagate the attribution error.
    #[default]
    Fail,
    /// Return the probability without attributions.
    Omit,
    /// Use the permutation-sampled approximation.
    Sampled { permutations: usize, seed: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoringConfig {
    pub thresholds: TierThresholds,
    pub fallback: AttributionFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringResult {
    pub probability: f64,
    pub tier: RiskTier,
    /// Model output before the link function.
    pub raw_score: f64,
    /// Expected raw output; `None` only when attribution was omitted.
    pub baseline: Option<f64>,
    /// Per input field, by descending absolute contribution.
    pub attributions: Vec<FeatureContribution>,
    pub attribution_method: AttributionMethod,
    pub model_version: String,
    pub recommended_action: &'static str,
}

impl ScoringResult {
    pub fn top_feature(&self) -> Option<&str> {
        self.attributions.first().map(|c| c.feature.as_str())
    }
}

/// The loaded pipeline. Immutable after construction and safe to share across threads.
#[derive(Debug, Clone)]
pub struct ScoringService {
    registry: SchemaRegistry,
    encoder: FeatureEncoder,
    model: RiskModel,
    config: ScoringConfig,
}

impl ScoringService {
    /// Pairs an encoder with a model, refusing layouts that disagree in count or order.
    pub fn new(
        registry: SchemaRegistry,
        encoder: FeatureEncoder,
        model: RiskModel,
        config: ScoringConfig,
    ) -> Result<Self, ArtifactError> {
        let columns = encoder.columns();
        let features = model.feature_names();
        if columns.len() != features.len() {
            return Err(ArtifactError::SignatureMismatch(format!(
                "encoding spec {} produces {} columns, model {} expects {}",
                encoder.version(),
                columns.len(),
                model.version(),
                features.len()
            )));
        }
        if let Some(position) = columns.iter().zip(features).position(|(c, f)| c != f) {
            return Err(ArtifactError::SignatureMismatch(format!(
                "column {position} is `{}` in encoding spec {} but `{}` in model {}",
                columns[position],
                encoder.version(),
                features[position],
                model.version()
            )));
        }

        Ok(Self {
            registry,
            encoder,
            model,
            config,
        })
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }

    pub fn model(&self) -> &RiskModel {
        &self.model
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, raw: &Value) -> Result<ScoringResult, ScoringError> {
        let record = self.registry.validate(raw)?;
        self.score_record(&record)
    }

    pub fn score_record(&self, record: &BookingRecord) -> Result<ScoringResult, ScoringError> {
        let vector = self.encoder.encode(record)?;
        let raw_score = self.model.raw_score(&vector)?;
        let probability = self.model.link().apply(raw_score);
        let tier = self.config.thresholds.tier(probability);

        let explanation = match attribution::explain(&vector, &self.model) {
            Ok(result) => Some(result),
            Err(AttributionError::Unsupported { model_kind }) => match self.config.fallback {
                AttributionFallback::Fail => {
                    return Err(AttributionError::Unsupported { model_kind }.into())
                }
                AttributionFallback::Omit => {
                    tracing::warn!(model_kind, "exact attribution unsupported; omitting it");
                    None
                }
                AttributionFallback::Sampled { permutations, seed } => {
                    tracing::warn!(
                        model_kind,
                        permutations,
                        "exact attribution unsupported; using sampled approximation"
                    );
                    Some(attribution::explain_sampled(
                        &vector,
                        &self.model,
                        permutations,
                        seed,
                    )?)
                }
            },
            Err(err) => return Err(err.into()),
        };

        let (baseline, attributions, attribution_method) = match explanation {
            Some(result) => {
                let AttributionResult {
                    baseline,
                    contributions,
                    method,
                    ..
                } = result
                    .by_field(&self.encoder.column_fields())
                    .sorted_by_magnitude();
                (Some(baseline), contributions, method)
            }
            None => (None, Vec::new(), AttributionMethod::Omitted),
        };

        tracing::debug!(
            model_version = self.model.version(),
            probability,
            tier = tier.as_str(),
            method = ?attribution_method,
            "scored booking"
        );

        Ok(ScoringResult {
            probability,
            tier,
            raw_score,
            baseline,
            attributions,
            attribution_method,
            model_version: self.model.version().to_string(),
            recommended_action: tier.recommended_action(),
        })
    }
}
