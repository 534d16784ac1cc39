//! Booking record -> feature vector.
//!
//! The encoder is compiled once from an [`EncodingSpec`] into a position plan and never
//! changes afterwards. Every column the model expects is written by exactly one field.

pub mod layout;
pub mod spec;

pub use layout::layout_signature;
pub use spec::{EncodedField, EncodingSpec, FieldEncoding, ParitySample};

use crate::error::EncodingError;
use crate::schema::{BookingRecord, CategoryCode, FieldKind, FieldValue, SchemaRegistry, Vocabulary};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

#[derive(Debug, Clone)]
enum Plan {
    Raw {
        position: usize,
    },
    Standard {
        position: usize,
        mean: f64,
        std: f64,
    },
    Flag {
        position: usize,
    },
    Ordinal {
        position: usize,
        vocabulary: Vocabulary,
        other_code: f64,
    },
    OneHot {
        vocabulary: Vocabulary,
        // Indexed by vocabulary code; `None` for a dropped reference category.
        positions: Vec<Option<usize>>,
    },
}

#[derive(Debug, Clone)]
struct FieldPlan {
    name: String,
    plan: Plan,
}

#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    version: String,
    columns: Vec<String>,
    column_fields: Vec<usize>,
    fields: Vec<FieldPlan>,
    signature: u32,
}

impl EncodingSpec {
    /// Builds the schema registry and the encoder, then replays every parity sample.
    pub fn compile(&self) -> Result<(SchemaRegistry, FeatureEncoder), EncodingError> {
        let registry =
            SchemaRegistry::new(self.fields.iter().map(|f| f.field.clone()).collect())?;
        let encoder = FeatureEncoder::new(self, &registry)?;

        for (i, sample) in self.parity_samples.iter().enumerate() {
            let record = registry.validate(&sample.record).map_err(|err| {
                EncodingError::SpecMismatch(format!("parity sample {i} does not validate: {err}"))
            })?;
            let vector = encoder.encode(&record)?;
            check_parity(i, &sample.vector, vector.as_slice())?;
        }

        Ok((registry, encoder))
    }
}

fn check_parity(sample: usize, expected: &[f64], actual: &[f64]) -> Result<(), EncodingError> {
    if expected.len() != actual.len() {
        return Err(EncodingError::SpecMismatch(format!(
            "parity sample {sample} has {} values, encoder produced {}",
            expected.len(),
            actual.len()
        )));
    }
    for (position, (e, a)) in expected.iter().zip(actual).enumerate() {
        if e.to_bits() != a.to_bits() {
            return Err(EncodingError::SpecMismatch(format!(
                "parity sample {sample} drifted at column {position}: expected {e}, encoded {a}"
            )));
        }
    }
    Ok(())
}

impl FeatureEncoder {
    pub fn new(spec: &EncodingSpec, registry: &SchemaRegistry) -> Result<Self, EncodingError> {
        let mismatch = |msg: String| EncodingError::SpecMismatch(msg);

        if spec.feature_count != spec.columns.len() {
            return Err(mismatch(format!(
                "declared feature_count {} but {} columns are listed",
                spec.feature_count,
                spec.columns.len()
            )));
        }

        let mut position_of = HashMap::with_capacity(spec.columns.len());
        for (position, column) in spec.columns.iter().enumerate() {
            if position_of.insert(column.as_str(), position).is_some() {
                return Err(mismatch(format!("column `{column}` is listed twice")));
            }
        }

        let signature = layout_signature(&spec.version, &spec.columns);
        if let Some(declared) = spec.layout_signature {
            if declared != signature {
                return Err(mismatch(format!(
                    "layout signature {declared:#010x} does not match columns ({signature:#010x})"
                )));
            }
        }

        let mut column_fields: Vec<Option<usize>> = vec![None; spec.columns.len()];
        let mut claim = |column: String, field_index: usize| -> Result<usize, EncodingError> {
            let position = *position_of
                .get(column.as_str())
                .ok_or_else(|| mismatch(format!("field produces column `{column}` that is not in columns")))?;
            if column_fields[position].replace(field_index).is_some() {
                return Err(mismatch(format!("column `{column}` is produced twice")));
            }
            Ok(position)
        };

        let mut fields = Vec::with_capacity(spec.fields.len());
        for (field_index, encoded) in spec.fields.iter().enumerate() {
            let name = encoded.field.name.clone();
            let incompatible = || {
                mismatch(format!(
                    "field `{name}` cannot use `{}` encoding",
                    encoded.encoding.name()
                ))
            };

            let plan = match (&encoded.field.kind, &encoded.encoding) {
                (FieldKind::Numeric { .. }, FieldEncoding::Raw) => Plan::Raw {
                    position: claim(name.clone(), field_index)?,
                },
                (FieldKind::Numeric { .. }, FieldEncoding::Standard { mean, std }) => {
                    if !mean.is_finite() || !std.is_finite() || *std == 0.0 {
                        return Err(mismatch(format!(
                            "field `{name}` has unusable scaling (mean {mean}, std {std})"
                        )));
                    }
                    Plan::Standard {
                        position: claim(name.clone(), field_index)?,
                        mean: *mean,
                        std: *std,
                    }
                }
                (FieldKind::Boolean, FieldEncoding::Flag) => Plan::Flag {
                    position: claim(name.clone(), field_index)?,
                },
                (FieldKind::Categorical { .. }, FieldEncoding::Ordinal { other_code }) => {
                    let vocabulary = registry
                        .vocabulary(&name)
                        .ok_or_else(|| mismatch(format!("field `{name}` has no vocabulary")))?
                        .clone();
                    let collides = other_code.fract() == 0.0
                        && *other_code >= 0.0
                        && *other_code < vocabulary.len() as f64;
                    if !other_code.is_finite() || collides {
                        return Err(mismatch(format!(
                            "field `{name}` other_code {other_code} collides with a vocabulary code"
                        )));
                    }
                    Plan::Ordinal {
                        position: claim(name.clone(), field_index)?,
                        vocabulary,
                        other_code: *other_code,
                    }
                }
                (FieldKind::Categorical { .. }, FieldEncoding::OneHot { drop_first }) => {
                    let vocabulary = registry
                        .vocabulary(&name)
                        .ok_or_else(|| mismatch(format!("field `{name}` has no vocabulary")))?
                        .clone();
                    let mut positions = Vec::with_capacity(vocabulary.len());
                    for (code, category) in vocabulary.entries().iter().enumerate() {
                        if code == 0 && *drop_first {
                            positions.push(None);
                        } else {
                            positions.push(Some(claim(format!("{name}_{category}"), field_index)?));
                        }
                    }
                    Plan::OneHot {
                        vocabulary,
                        positions,
                    }
                }
                _ => return Err(incompatible()),
            };

            fields.push(FieldPlan { name, plan });
        }

        let column_fields = column_fields
            .into_iter()
            .enumerate()
            .map(|(position, field)| {
                field.ok_or_else(|| {
                    mismatch(format!(
                        "column `{}` is not produced by any field",
                        spec.columns[position]
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            version: spec.version.clone(),
            columns: spec.columns.clone(),
            column_fields,
            fields,
            signature,
        })
    }

    pub fn encode(&self, record: &BookingRecord) -> Result<FeatureVector, EncodingError> {
        let mut values = vec![0.0; self.columns.len()];

        for field in &self.fields {
            let value = record.get(&field.name).ok_or_else(|| {
                EncodingError::SpecMismatch(format!(
                    "record has no `{}` field; it was validated against a different schema",
                    field.name
                ))
            })?;

            match (&field.plan, value) {
                (Plan::Raw { position }, FieldValue::Number(x)) => values[*position] = *x,
                (Plan::Standard { position, mean, std }, FieldValue::Number(x)) => {
                    values[*position] = (*x - *mean) / *std;
                }
                (Plan::Flag { position }, FieldValue::Flag(b)) => {
                    values[*position] = if *b { 1.0 } else { 0.0 };
                }
                (
                    Plan::Ordinal {
                        position,
                        vocabulary,
                        other_code,
                    },
                    FieldValue::Category(category),
                ) => {
                    values[*position] = match vocabulary.code(category) {
                        CategoryCode::Known(code) => code as f64,
                        CategoryCode::Unseen => *other_code,
                    };
                }
                (
                    Plan::OneHot {
                        vocabulary,
                        positions,
                    },
                    FieldValue::Category(category),
                ) => {
                    if let CategoryCode::Known(code) = vocabulary.code(category) {
                        if let Some(position) = positions[code] {
                            values[position] = 1.0;
                        }
                    }
                }
                _ => {
                    return Err(EncodingError::SpecMismatch(format!(
                        "record value for `{}` does not match its encoding",
                        field.name
                    )))
                }
            }
        }

        Ok(FeatureVector(values))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn feature_count(&self) -> usize {
        self.columns.len()
    }

    pub fn layout_signature(&self) -> u32 {
        self.signature
    }

    /// Source field name for every column, in column order.
    pub fn column_fields(&self) -> Vec<&str> {
        self.column_fields
            .iter()
            .map(|&i| self.fields[i].name.as_str())
            .collect()
    }
}
