// ==============================================================================
// survey.rs - Survey Schema and Feature Encoder
// ==============================================================================
// Description: Declarative survey-field schema and deterministic answer encoding
// Created: 2026-10-13
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Encoding rules per field kind:
//   continuous   → value clamped to [min, max], flagged when clamped
//   ordinal      → index of the level in the declared list
//   one_hot      → one 0/1 feature per level, named "field=level"
//   multi_select → one 0/1 feature per option, named "field=option"
// Missing answers use the declared default and are flagged as imputed.
// Unknown field names are rejected.
// ==============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{DataValidationError, EngineError};
use crate::models::{SurveyFeature, SurveyValue};

/// Canonical form of a categorical answer ("Very Active" → "very_active")
pub fn normalize_level(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '-'], "_")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Continuous { min: f64, max: f64, default: f64 },
    Ordinal { levels: Vec<String>, default: String },
    OneHot { levels: Vec<String>, default: String },
    MultiSelect { options: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyField {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl SurveyField {
    pub fn continuous(name: &str, min: f64, max: f64, default: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Continuous { min, max, default },
        }
    }

    pub fn ordinal(name: &str, levels: &[&str], default: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Ordinal {
                levels: levels.iter().map(|l| l.to_string()).collect(),
                default: default.to_string(),
            },
        }
    }

    pub fn one_hot(name: &str, levels: &[&str], default: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::OneHot {
                levels: levels.iter().map(|l| l.to_string()).collect(),
                default: default.to_string(),
            },
        }
    }

    pub fn multi_select(name: &str, options: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::MultiSelect {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
        }
    }

    /// Names of the features this field encodes to
    pub fn feature_names(&self) -> Vec<String> {
        match &self.kind {
            FieldKind::Continuous { .. } | FieldKind::Ordinal { .. } => vec![self.name.clone()],
            FieldKind::OneHot { levels: values, .. } | FieldKind::MultiSelect { options: values } => values
                .iter()
                .map(|v| format!("{}={}", self.name, v))
                .collect(),
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        let invalid = |details: String| {
            EngineError::InvalidArtifact(format!("survey field '{}': {}", self.name, details))
        };

        match &self.kind {
            FieldKind::Continuous { min, max, default } => {
                if !(min.is_finite() && max.is_finite() && default.is_finite()) || min > max {
                    return Err(invalid(format!("invalid range [{}, {}]", min, max)));
                }
                if default < min || default > max {
                    return Err(invalid(format!("default {} outside [{}, {}]", default, min, max)));
                }
            }
            FieldKind::Ordinal { levels, default } | FieldKind::OneHot { levels, default } => {
                validate_levels(levels).map_err(invalid)?;
                if !levels.contains(default) {
                    return Err(invalid(format!("default '{}' is not a declared level", default)));
                }
            }
            FieldKind::MultiSelect { options } => validate_levels(options).map_err(invalid)?,
        }
        Ok(())
    }

    /// Encode one answer (None when the field was not supplied)
    fn encode(&self, answer: Option<&SurveyValue>) -> Result<Vec<SurveyFeature>, DataValidationError> {
        let answer = match answer {
            None | Some(SurveyValue::Missing) => None,
            Some(value) => Some(value),
        };

        match &self.kind {
            FieldKind::Continuous { min, max, default } => {
                let (raw, imputed) = match answer {
                    None => (*default, true),
                    Some(value) => (self.numeric_answer(value)?, false),
                };
                let value = raw.clamp(*min, *max);
                Ok(vec![SurveyFeature {
                    name: self.name.clone(),
                    value,
                    imputed,
                    clamped: value != raw,
                }])
            }
            FieldKind::Ordinal { levels, default } => {
                let (level, imputed) = match answer {
                    None => (default.clone(), true),
                    Some(value) => (self.level_answer(value, levels)?, false),
                };
                let index = levels.iter().position(|l| *l == level).unwrap_or(0);
                Ok(vec![SurveyFeature {
                    name: self.name.clone(),
                    value: index as f64,
                    imputed,
                    clamped: false,
                }])
            }
            FieldKind::OneHot { levels, default } => {
                let (level, imputed) = match answer {
                    None => (default.clone(), true),
                    Some(value) => (self.level_answer(value, levels)?, false),
                };
                Ok(levels
                    .iter()
                    .map(|l| SurveyFeature {
                        name: format!("{}={}", self.name, l),
                        value: if *l == level { 1.0 } else { 0.0 },
                        imputed,
                        clamped: false,
                    })
                    .collect())
            }
            FieldKind::MultiSelect { options } => {
                let (selected, imputed) = match answer {
                    None => (HashSet::new(), true),
                    Some(value) => (self.selection_answer(value, options)?, false),
                };
                Ok(options
                    .iter()
                    .map(|o| SurveyFeature {
                        name: format!("{}={}", self.name, o),
                        value: if selected.contains(o) { 1.0 } else { 0.0 },
                        imputed,
                        clamped: false,
                    })
                    .collect())
            }
        }
    }

    fn invalid_value(&self, details: impl Into<String>) -> DataValidationError {
        DataValidationError::InvalidSurveyValue {
            field: self.name.clone(),
            details: details.into(),
        }
    }

    fn numeric_answer(&self, value: &SurveyValue) -> Result<f64, DataValidationError> {
        let number = match value {
            SurveyValue::Number(n) => *n,
            SurveyValue::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| self.invalid_value(format!("expected a number, got '{}'", text)))?,
            SurveyValue::List(_) => return Err(self.invalid_value("expected a number, got a list")),
            SurveyValue::Missing => return Err(self.invalid_value("missing value")),
        };
        if !number.is_finite() {
            return Err(self.invalid_value(format!("non-finite value {}", number)));
        }
        Ok(number)
    }

    fn level_answer(&self, value: &SurveyValue, levels: &[String]) -> Result<String, DataValidationError> {
        let SurveyValue::Text(text) = value else {
            return Err(self.invalid_value("expected one of the declared levels as text"));
        };
        let level = normalize_level(text);
        if !levels.contains(&level) {
            return Err(DataValidationError::UnknownCategoryLevel {
                field: self.name.clone(),
                value: text.clone(),
            });
        }
        Ok(level)
    }

    fn selection_answer(
        &self,
        value: &SurveyValue,
        options: &[String],
    ) -> Result<HashSet<String>, DataValidationError> {
        let items: Vec<String> = match value {
            SurveyValue::List(items) => items.clone(),
            SurveyValue::Text(text) => text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => return Err(self.invalid_value("expected a list of options")),
        };

        items
            .iter()
            .map(|item| {
                let option = normalize_level(item);
                if options.contains(&option) {
                    Ok(option)
                } else {
                    Err(DataValidationError::UnknownCategoryLevel {
                        field: self.name.clone(),
                        value: item.clone(),
                    })
                }
            })
            .collect()
    }
}

fn validate_levels(levels: &[String]) -> Result<(), String> {
    if levels.is_empty() {
        return Err("no levels declared".to_string());
    }
    let mut seen = HashSet::new();
    for level in levels {
        if *level != normalize_level(level) || level.is_empty() {
            return Err(format!("level '{}' is not in canonical form", level));
        }
        if !seen.insert(level) {
            return Err(format!("duplicate level '{}'", level));
        }
    }
    Ok(())
}

/// Ordered survey-field schema
///
/// Deserialization runs the same checks as `new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SurveySchemaDef")]
pub struct SurveySchema {
    version: String,
    fields: Vec<SurveyField>,
}

#[derive(Deserialize)]
struct SurveySchemaDef {
    version: String,
    fields: Vec<SurveyField>,
}

impl TryFrom<SurveySchemaDef> for SurveySchema {
    type Error = EngineError;

    fn try_from(def: SurveySchemaDef) -> Result<Self, Self::Error> {
        SurveySchema::new(def.version, def.fields)
    }
}

impl SurveySchema {
    pub fn new(version: impl Into<String>, fields: Vec<SurveyField>) -> Result<Self, EngineError> {
        let schema = Self {
            version: version.into(),
            fields,
        };
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let mut names = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() || field.name.contains('=') {
                return Err(EngineError::InvalidArtifact(format!(
                    "invalid survey field name '{}'",
                    field.name
                )));
            }
            if !names.insert(field.name.as_str()) {
                return Err(EngineError::InvalidArtifact(format!(
                    "duplicate survey field '{}'",
                    field.name
                )));
            }
            field.validate()?;
        }
        Ok(())
    }

    /// Load a schema from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read survey schema {:?}", path.as_ref()))?;
        let schema: SurveySchema =
            serde_json::from_str(&text).context("Failed to parse survey schema")?;
        Ok(schema)
    }

    /// Built-in lifestyle survey used by the nutrition planner
    pub fn nutrition_default() -> Self {
        Self {
            version: "nutrition-survey-1".to_string(),
            fields: vec![
                SurveyField::continuous("age", 18.0, 100.0, 35.0),
                SurveyField::one_hot("sex", &["female", "male", "other"], "other"),
                SurveyField::continuous("height_cm", 120.0, 230.0, 170.0),
                SurveyField::continuous("weight_kg", 35.0, 250.0, 70.0),
                SurveyField::ordinal(
                    "activity_level",
                    &["sedentary", "light", "moderate", "active", "very_active"],
                    "moderate",
                ),
                SurveyField::one_hot("goal", &["weight_loss", "maintenance", "muscle_gain"], "maintenance"),
                SurveyField::one_hot(
                    "cuisine_pref",
                    &["indian", "mediterranean", "east_asian", "western", "other"],
                    "indian",
                ),
                SurveyField::one_hot(
                    "dietary_pref",
                    &["omnivore", "flexitarian", "pescatarian", "vegetarian", "vegan"],
                    "flexitarian",
                ),
                SurveyField::ordinal("budget_level", &["low", "medium", "high"], "medium"),
                SurveyField::multi_select(
                    "constraints",
                    &["lactose_free", "gluten_free", "nut_free", "low_sodium"],
                ),
            ],
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn fields(&self) -> &[SurveyField] {
        &self.fields
    }

    /// Feature names in schema order
    pub fn feature_names(&self) -> Vec<String> {
        self.fields.iter().flat_map(|f| f.feature_names()).collect()
    }

    /// Encode survey answers into features, in schema order
    ///
    /// # Returns
    /// * `Err(DataValidationError::UnknownSurveyField)` - An answer names a field
    ///   outside the schema
    /// * `Err(DataValidationError::InvalidSurveyValue | UnknownCategoryLevel)` -
    ///   An answer does not fit its field
    pub fn encode(
        &self,
        answers: &BTreeMap<String, SurveyValue>,
    ) -> Result<Vec<SurveyFeature>, DataValidationError> {
        if let Some(unknown) = answers
            .keys()
            .find(|name| !self.fields.iter().any(|f| &f.name == *name))
        {
            return Err(DataValidationError::UnknownSurveyField {
                field: unknown.clone(),
            });
        }

        let mut features = Vec::new();
        for field in &self.fields {
            features.extend(field.encode(answers.get(&field.name))?);
        }
        Ok(features)
    }
}
