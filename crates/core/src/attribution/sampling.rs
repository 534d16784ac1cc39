use super::{AttributionMethod, AttributionResult};
use crate::encoding::FeatureVector;
use crate::error::AttributionError;
use crate::model::RiskModel;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Approximate Shapley values by permutation sampling against the model's reference row.
///
/// Works for any model kind. Each permutation moves from the reference row to `vector`
/// one feature at a time and credits each feature with the change it causes, so the
/// contributions always sum to `raw(vector) - raw(reference)`. Only the split between
/// features is approximate.
pub fn explain_sampled(
    vector: &FeatureVector,
    model: &RiskModel,
    permutations: usize,
    seed: u64,
) -> Result<AttributionResult, AttributionError> {
    let x = vector.as_slice();
    model.check_dimension(x)?;
    let reference = model
        .reference()
        .ok_or(AttributionError::MissingReference)?;
    if permutations == 0 {
        return Err(AttributionError::NoPermutations);
    }

    let baseline = model.raw_score_slice(reference)?;
    let raw_output = model.raw_score_slice(x)?;

    let n = x.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..n).filter(|&i| x[i] != reference[i]).collect();
    let mut phi = vec![0.0; n];
    let mut current = vec![0.0; n];

    for _ in 0..permutations {
        order.shuffle(&mut rng);
        current.copy_from_slice(reference);
        let mut previous = baseline;
        for &i in &order {
            current[i] = x[i];
            let next = model.raw_score_slice(&current)?;
            phi[i] += next - previous;
            previous = next;
        }
    }

    let scale = 1.0 / permutations as f64;
    for value in &mut phi {
        *value *= scale;
    }

    tracing::debug!(
        model_version = model.version(),
        permutations,
        seed,
        "computed sampled attribution"
    );

    Ok(AttributionResult::new(
        model.feature_names(),
        phi,
        baseline,
        raw_output,
        AttributionMethod::Sampled,
    ))
}
