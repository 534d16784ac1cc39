//! Canonical booking fields and the validation that turns a raw JSON object into a
//! [`BookingRecord`].

use crate::error::{EncodingError, SchemaError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Pseudo field name used when the record itself has the wrong shape.
pub const RECORD_FIELD: &str = "<record>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(f64),
    Category(String),
}

impl FieldValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Flag(_) => "boolean",
            Self::Number(_) => "number",
            Self::Category(_) => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Numeric {
        #[serde(default)]
        integer: bool,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Categorical {
        vocabulary: Vec<String>,
        #[serde(default = "default_allow_unseen")]
        allow_unseen: bool,
    },
    Boolean,
}

fn default_allow_unseen() -> bool {
    true
}

impl FieldKind {
    fn expected(&self) -> &'static str {
        match self {
            Self::Numeric { .. } => "number",
            Self::Categorical { .. } => "string",
            Self::Boolean => "boolean",
        }
    }
}

/// One declared input field. A field without a `default` is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub default: Option<FieldValue>,
}

/// Frozen category-to-code map. Codes are positions in the declared vocabulary.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    entries: Vec<String>,
    codes: HashMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryCode {
    Known(usize),
    Unseen,
}

impl Vocabulary {
    fn new(field: &str, entries: &[String]) -> Result<Self, EncodingError> {
        if entries.is_empty() {
            return Err(EncodingError::SpecMismatch(format!(
                "field `{field}` declares an empty vocabulary"
            )));
        }

        let mut codes = HashMap::with_capacity(entries.len());
        for (code, entry) in entries.iter().enumerate() {
            if codes.insert(entry.clone(), code).is_some() {
                return Err(EncodingError::SpecMismatch(format!(
                    "field `{field}` lists category {entry:?} twice"
                )));
            }
        }

        Ok(Self {
            entries: entries.to_vec(),
            codes,
        })
    }

    pub fn code(&self, category: &str) -> CategoryCode {
        match self.codes.get(category) {
            Some(&code) => CategoryCode::Known(code),
            None => CategoryCode::Unseen,
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A booking whose every declared field is present with the declared type.
///
/// Only [`SchemaRegistry::validate`] builds these, so holding one is proof of validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BookingRecord {
    values: BTreeMap<String, FieldValue>,
}

impl BookingRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
struct RegisteredField {
    spec: FieldSpec,
    vocabulary: Option<Vocabulary>,
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    fields: Vec<RegisteredField>,
    by_name: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub fn new(specs: Vec<FieldSpec>) -> Result<Self, EncodingError> {
        if specs.is_empty() {
            return Err(EncodingError::SpecMismatch(
                "schema declares no fields".to_string(),
            ));
        }

        let mut fields = Vec::with_capacity(specs.len());
        let mut by_name = HashMap::with_capacity(specs.len());

        for spec in specs {
            if spec.name.trim().is_empty() {
                return Err(EncodingError::SpecMismatch(
                    "field name must be non-empty".to_string(),
                ));
            }
            if by_name.insert(spec.name.clone(), fields.len()).is_some() {
                return Err(EncodingError::SpecMismatch(format!(
                    "field `{}` is declared twice",
                    spec.name
                )));
            }

            let vocabulary = match &spec.kind {
                FieldKind::Categorical { vocabulary, .. } => {
                    Some(Vocabulary::new(&spec.name, vocabulary)?)
                }
                FieldKind::Numeric { min, max, .. } => {
                    if let (Some(lo), Some(hi)) = (min, max) {
                        if lo > hi {
                            return Err(EncodingError::SpecMismatch(format!(
                                "field `{}` has min {lo} above max {hi}",
                                spec.name
                            )));
                        }
                    }
                    None
                }
                FieldKind::Boolean => None,
            };

            let field = RegisteredField { spec, vocabulary };
            if let Some(default) = &field.spec.default {
                field.check(default).map_err(|err| {
                    EncodingError::SpecMismatch(format!("default does not validate: {err}"))
                })?;
            }
            fields.push(field);
        }

        Ok(Self { fields, by_name })
    }

    pub fn field_specs(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().map(|f| &f.spec)
    }

    pub fn vocabulary(&self, name: &str) -> Option<&Vocabulary> {
        self.by_name
            .get(name)
            .and_then(|&i| self.fields[i].vocabulary.as_ref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validates a raw record (a JSON object keyed by field name).
    ///
    /// `null` counts as absent. Absent fields take their declared default or fail with
    /// [`SchemaError::MissingField`]. Unseen categories pass through unless the field opts
    /// out with `allow_unseen = false`.
    pub fn validate(&self, raw: &Value) -> Result<BookingRecord, SchemaError> {
        let Value::Object(map) = raw else {
            return Err(SchemaError::TypeMismatch {
                field: RECORD_FIELD.to_string(),
                expected: "object",
                found: json_type_name(raw),
            });
        };
        self.validate_map(map)
    }

    pub fn validate_map(&self, map: &Map<String, Value>) -> Result<BookingRecord, SchemaError> {
        // serde_json::Map iterates in key order unless preserve_order is on; sort to be sure.
        let unknown: BTreeSet<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|k| !self.by_name.contains_key(*k))
            .collect();
        if let Some(field) = unknown.into_iter().next() {
            return Err(SchemaError::UnknownField {
                field: field.to_string(),
            });
        }

        let mut values = BTreeMap::new();
        for field in &self.fields {
            let name = &field.spec.name;
            let value = match map.get(name) {
                None | Some(Value::Null) => match &field.spec.default {
                    Some(default) => default.clone(),
                    None => {
                        return Err(SchemaError::MissingField {
                            field: name.clone(),
                        })
                    }
                },
                Some(raw) => {
                    let value = field.coerce(raw)?;
                    field.check(&value)?;
                    value
                }
            };
            values.insert(name.clone(), value);
        }

        Ok(BookingRecord { values })
    }
}

impl RegisteredField {
    fn coerce(&self, raw: &Value) -> Result<FieldValue, SchemaError> {
        let mismatch = || SchemaError::TypeMismatch {
            field: self.spec.name.clone(),
            expected: self.spec.kind.expected(),
            found: json_type_name(raw),
        };

        match (&self.spec.kind, raw) {
            (FieldKind::Numeric { .. }, Value::Number(n)) => {
                n.as_f64().map(FieldValue::Number).ok_or_else(mismatch)
            }
            (FieldKind::Categorical { .. }, Value::String(s)) => {
                Ok(FieldValue::Category(s.clone()))
            }
            (FieldKind::Boolean, Value::Bool(b)) => Ok(FieldValue::Flag(*b)),
            _ => Err(mismatch()),
        }
    }

    fn check(&self, value: &FieldValue) -> Result<(), SchemaError> {
        let name = &self.spec.name;
        let invalid = |reason: String| SchemaError::InvalidValue {
            field: name.clone(),
            reason,
        };

        match (&self.spec.kind, value) {
            (FieldKind::Numeric { integer, min, max }, FieldValue::Number(x)) => {
                let x = *x;
                if !x.is_finite() {
                    return Err(invalid(format!("{x} is not a finite number")));
                }
                if *integer && x.fract() != 0.0 {
                    return Err(invalid(format!("{x} is not a whole number")));
                }
                if let Some(lo) = min {
                    if x < *lo {
                        return Err(invalid(format!("{x} is below the minimum {lo}")));
                    }
                }
                if let Some(hi) = max {
                    if x > *hi {
                        return Err(invalid(format!("{x} is above the maximum {hi}")));
                    }
                }
                Ok(())
            }
            (FieldKind::Categorical { allow_unseen, .. }, FieldValue::Category(category)) => {
                let known = self
                    .vocabulary
                    .as_ref()
                    .map(|v| v.code(category) != CategoryCode::Unseen)
                    .unwrap_or(false);
                if !known && !allow_unseen {
                    return Err(SchemaError::UnknownCategory {
                        field: name.clone(),
                        value: category.clone(),
                    });
                }
                Ok(())
            }
            (FieldKind::Boolean, FieldValue::Flag(_)) => Ok(()),
            (kind, other) => Err(SchemaError::TypeMismatch {
                field: name.clone(),
                expected: kind.expected(),
                found: other.type_name(),
            }),
        }
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
