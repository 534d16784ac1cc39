//! Per-feature explanation of one prediction.
//!
//! Contributions are in raw-output units (log-odds for boosted trees) and satisfy
//! `baseline + Σ contributions == raw_output`.

mod sampling;
mod tree_shap;

pub use sampling::explain_sampled;

use crate::encoding::FeatureVector;
use crate::error::AttributionError;
use crate::model::RiskModel;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    /// Exact tree attribution.
    Exact,
    /// Permutation-sampled approximation.
    Sampled,
    /// No attribution was produced.
    Omitted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributionResult {
    pub baseline: f64,
    pub raw_output: f64,
    pub contributions: Vec<FeatureContribution>,
    pub method: AttributionMethod,
}

impl AttributionResult {
    pub(crate) fn new(
        names: &[String],
        phi: Vec<f64>,
        baseline: f64,
        raw_output: f64,
        method: AttributionMethod,
    ) -> Self {
        let contributions = names
            .iter()
            .zip(phi)
            .map(|(feature, contribution)| FeatureContribution {
                feature: feature.clone(),
                contribution,
            })
            .collect();
        Self {
            baseline,
            raw_output,
            contributions,
            method,
        }
    }

    pub fn total(&self) -> f64 {
        self.baseline + self.contributions.iter().map(|c| c.contribution).sum::<f64>()
    }

    pub fn get(&self, feature: &str) -> Option<f64> {
        self.contributions
            .iter()
            .find(|c| c.feature == feature)
            .map(|c| c.contribution)
    }

    /// Sums column contributions into their source fields, in first-seen order.
    ///
    /// `column_fields[i]` names the field that produced contribution `i`.
    pub fn by_field(&self, column_fields: &[&str]) -> Self {
        let mut folded: Vec<FeatureContribution> = Vec::new();
        for (c, field) in self.contributions.iter().zip(column_fields) {
            match folded.iter_mut().find(|f| f.feature == *field) {
                Some(existing) => existing.contribution += c.contribution,
                None => folded.push(FeatureContribution {
                    feature: (*field).to_string(),
                    contribution: c.contribution,
                }),
            }
        }
        Self {
            baseline: self.baseline,
            raw_output: self.raw_output,
            contributions: folded,
            method: self.method,
        }
    }

    /// Orders by descending |contribution|; ties keep their current order.
    pub fn sorted_by_magnitude(mut self) -> Self {
        self.contributions.sort_by(|a, b| {
            b.contribution
                .abs()
                .partial_cmp(&a.contribution.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self
    }
}

/// Exact attribution for tree ensembles.
///
/// Fails with [`AttributionError::Unsupported`] for any other model kind; callers
/// pick a fallback such as [`explain_sampled`] themselves.
pub fn explain(
    vector: &FeatureVector,
    model: &RiskModel,
) -> Result<AttributionResult, AttributionError> {
    let x = vector.as_slice();
    model.check_dimension(x)?;
    let ensemble = model
        .tree_ensemble()
        .ok_or(AttributionError::Unsupported {
            model_kind: model.kind_name(),
        })?;
    let raw_output = model.raw_score_slice(x)?;

    let mut phi = vec![0.0; x.len()];
    let mut expected = 0.0;
    for tree in ensemble.trees {
        tree_shap::accumulate(tree, x, ensemble.tree_weight, &mut phi);
        expected += tree.expected_value();
    }
    let baseline = ensemble.bias + ensemble.tree_weight * expected;

    Ok(AttributionResult::new(
        model.feature_names(),
        phi,
        baseline,
        raw_output,
        AttributionMethod::Exact,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelArtifact;
    use serde_json::json;

    fn boosted() -> RiskModel {
        let artifact: ModelArtifact = serde_json::from_value(json!({
            "model_version": "gbt-test",
            "feature_names": ["lead_time", "deposit_type_Non Refund", "deposit_type_Refundable"],
            "ensemble": {
                "kind": "gradient_boosted_trees",
                "base_score": -0.5,
                "trees": [
                    {"nodes": [
                        {"type": "split", "feature": 1, "threshold": 0.5, "left": 1, "right": 2, "cover": 100.0},
                        {"type": "split", "feature": 0, "threshold": 100.0, "left": 3, "right": 4, "cover": 88.0},
                        {"type": "leaf", "value": 2.6, "cover": 12.0},
                        {"type": "leaf", "value": -0.9, "cover": 60.0},
                        {"type": "leaf", "value": 0.4, "cover": 28.0}
                    ]},
                    {"nodes": [
                        {"type": "split", "feature": 2, "threshold": 0.5, "left": 1, "right": 2, "cover": 100.0},
                        {"type": "leaf", "value": 0.02, "cover": 98.0},
                        {"type": "leaf", "value": -0.8, "cover": 2.0}
                    ]}
                ]
            }
        }))
        .unwrap();
        RiskModel::from_artifact(artifact).unwrap()
    }

    #[test]
    fn contributions_sum_to_raw_output() {
        let model = boosted();
        let v: FeatureVector = vec![200.0, 1.0, 0.0].into();
        let result = explain(&v, &model).unwrap();
        assert_eq!(result.method, AttributionMethod::Exact);
        assert!((result.total() - model.raw_score(&v).unwrap()).abs() < 1e-9);
    }

    #[test]
    fn hand_computed_stump_values() {
        let model = boosted();
        let v: FeatureVector = vec![200.0, 1.0, 0.0].into();
        let result = explain(&v, &model).unwrap();
        // Two-feature Shapley values of the first tree, worked out by hand.
        assert!((result.get("deposit_type_Non Refund").unwrap() - 2.326).abs() < 1e-9);
        assert!((result.get("lead_time").unwrap() - 0.39).abs() < 1e-9);
        // Second tree: E = 0.98 * 0.02 + 0.02 * -0.8 = 0.0036, x takes the 0.02 leaf.
        assert!((result.get("deposit_type_Refundable").unwrap() - 0.0164).abs() < 1e-9);
    }

    #[test]
    fn folds_columns_into_fields_and_sorts() {
        let model = boosted();
        let v: FeatureVector = vec![200.0, 1.0, 0.0].into();
        let result = explain(&v, &model).unwrap();
        let folded = result
            .by_field(&["lead_time", "deposit_type", "deposit_type"])
            .sorted_by_magnitude();

        assert_eq!(folded.contributions.len(), 2);
        assert_eq!(folded.contributions[0].feature, "deposit_type");
        assert!((folded.total() - result.total()).abs() < 1e-12);
    }

    #[test]
    fn linear_models_are_unsupported() {
        let artifact: ModelArtifact = serde_json::from_value(json!({
            "model_version": "lr",
            "feature_names": ["a"],
            "ensemble": {"kind": "logistic_regression", "intercept": 0.0, "coefficients": [1.0]}
        }))
        .unwrap();
        let model = RiskModel::from_artifact(artifact).unwrap();
        assert_eq!(
            explain(&vec![1.0].into(), &model).unwrap_err(),
            AttributionError::Unsupported {
                model_kind: "logistic_regression"
            }
        );
    }

    #[test]
    fn dimension_mismatch_surfaces_as_model_error() {
        let model = boosted();
        assert!(matches!(
            explain(&vec![1.0].into(), &model),
            Err(AttributionError::Model(_))
        ));
    }
}
