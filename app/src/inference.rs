// ==============================================================================
// inference.rs - Inference Engine and Model Backends
// ==============================================================================
// Description: Scoring-model capability, linear/ensemble backends, artifact format
// Created: 2026-10-14
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// A model is an opaque capability bound to one feature schema version:
//   expected_schema_version + predict(input) → raw score per category
// The engine refuses vectors stamped with any other schema version and never
// reinterprets a layout. Low-confidence risk entries are replaced with the
// neutral value 0.0 before scoring so they cannot move category thresholds.
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::calibration::Calibration;
use crate::error::EngineError;
use crate::models::{FeatureVector, ModelOutput};
use crate::registry::ModelRegistry;

/// Value substituted for masked (low-confidence) entries
pub const NEUTRAL_VALUE: f64 = 0.0;

/// Provenance of a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub version: String,
    pub trained_on: String,
    pub created_at: DateTime<Utc>,
    pub expected_schema_version: String,
}

/// Model-ready view of a feature vector
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    pub schema_version: String,
    pub feature_names: Vec<String>,
    pub values: Vec<f64>,
    pub masked: Vec<String>,
}

impl ModelInput {
    /// Build the input, masking low-confidence entries
    pub fn from_vector(vector: &FeatureVector) -> Self {
        let mut masked = Vec::new();
        let values = vector
            .entries
            .iter()
            .map(|entry| {
                if entry.low_confidence {
                    masked.push(entry.name.clone());
                    NEUTRAL_VALUE
                } else {
                    entry.value
                }
            })
            .collect();

        Self {
            schema_version: vector.schema_version.clone(),
            feature_names: vector.entries.iter().map(|e| e.name.clone()).collect(),
            values,
            masked,
        }
    }
}

/// Trained scoring model
pub trait ScoringModel: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &ModelDescriptor;

    fn expected_schema_version(&self) -> &str {
        &self.descriptor().expected_schema_version
    }

    /// Calibration fit for this model's raw scores
    fn calibration(&self) -> &Calibration;

    /// Categories in the order `predict` reports them
    fn categories(&self) -> Vec<String>;

    fn backend_type(&self) -> &str;

    /// Raw score per category
    fn predict(&self, input: &ModelInput) -> Result<Vec<(String, f64)>, EngineError>;
}

/// Bias and per-feature weights for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryWeights {
    pub category: String,
    pub bias: f64,
    pub weights: Vec<f64>,
}

/// score(category) = bias + Σ weight_i · x_i
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    #[serde(flatten)]
    pub descriptor: ModelDescriptor,
    pub feature_names: Vec<String>,
    pub calibration: Calibration,
    pub categories: Vec<CategoryWeights>,
}

impl LinearModel {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |details: String| {
            EngineError::InvalidArtifact(format!("model {}: {}", self.descriptor.version, details))
        };

        validate_descriptor(&self.descriptor)?;
        self.calibration.validate()?;

        if self.feature_names.is_empty() {
            return Err(invalid("no feature names".to_string()));
        }
        let mut names = HashSet::new();
        if let Some(duplicate) = self.feature_names.iter().find(|n| !names.insert(n.as_str())) {
            return Err(invalid(format!("duplicate feature name '{}'", duplicate)));
        }

        if self.categories.is_empty() {
            return Err(invalid("no categories".to_string()));
        }
        let mut categories = HashSet::new();
        for weights in &self.categories {
            if !categories.insert(weights.category.as_str()) {
                return Err(invalid(format!("duplicate category '{}'", weights.category)));
            }
            if weights.weights.len() != self.feature_names.len() {
                return Err(invalid(format!(
                    "category '{}' has {} weights for {} features",
                    weights.category,
                    weights.weights.len(),
                    self.feature_names.len()
                )));
            }
            if !weights.bias.is_finite() || weights.weights.iter().any(|w| !w.is_finite()) {
                return Err(invalid(format!("non-finite weight in category '{}'", weights.category)));
            }
        }
        Ok(())
    }

    fn check_layout(&self, input: &ModelInput) -> Result<(), EngineError> {
        let len = self.feature_names.len().max(input.feature_names.len());
        for i in 0..len {
            let expected = self.feature_names.get(i);
            let found = input.feature_names.get(i);
            if expected != found {
                let describe = |name: Option<&String>| {
                    name.cloned().unwrap_or_else(|| "<end of layout>".to_string())
                };
                return Err(EngineError::SchemaMismatch {
                    expected: describe(expected),
                    found: describe(found),
                });
            }
        }
        Ok(())
    }
}

impl ScoringModel for LinearModel {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    fn categories(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.category.clone()).collect()
    }

    fn backend_type(&self) -> &str {
        "linear"
    }

    fn predict(&self, input: &ModelInput) -> Result<Vec<(String, f64)>, EngineError> {
        self.check_layout(input)?;

        Ok(self
            .categories
            .iter()
            .map(|c| {
                let sum: f64 = c.weights.iter().zip(&input.values).map(|(w, x)| w * x).sum();
                (c.category.clone(), c.bias + sum)
            })
            .collect())
    }
}

/// Mean of member scores per category
#[derive(Debug, Clone)]
pub struct EnsembleModel {
    descriptor: ModelDescriptor,
    calibration: Calibration,
    members: Vec<Arc<dyn ScoringModel>>,
    categories: Vec<String>,
}

impl EnsembleModel {
    /// # Returns
    /// * `Err(EngineError::InvalidArtifact)` - No members, or members that disagree
    ///   on schema version or category set
    pub fn new(
        descriptor: ModelDescriptor,
        calibration: Calibration,
        members: Vec<Arc<dyn ScoringModel>>,
    ) -> Result<Self, EngineError> {
        validate_descriptor(&descriptor)?;
        calibration.validate()?;

        let first = members.first().ok_or_else(|| {
            EngineError::InvalidArtifact(format!("ensemble {} has no members", descriptor.version))
        })?;
        let categories = first.categories();
        let category_set: HashSet<&String> = categories.iter().collect();

        for member in &members {
            if member.expected_schema_version() != descriptor.expected_schema_version {
                return Err(EngineError::InvalidArtifact(format!(
                    "ensemble {} member {} expects schema {} instead of {}",
                    descriptor.version,
                    member.descriptor().version,
                    member.expected_schema_version(),
                    descriptor.expected_schema_version
                )));
            }
            let member_categories = member.categories();
            if member_categories.len() != categories.len()
                || member_categories.iter().any(|c| !category_set.contains(c))
            {
                return Err(EngineError::InvalidArtifact(format!(
                    "ensemble {} member {} has a different category set",
                    descriptor.version,
                    member.descriptor().version
                )));
            }
        }

        Ok(Self {
            descriptor,
            calibration,
            members,
            categories,
        })
    }
}

impl ScoringModel for EnsembleModel {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    fn categories(&self) -> Vec<String> {
        self.categories.clone()
    }

    fn backend_type(&self) -> &str {
        "ensemble"
    }

    fn predict(&self, input: &ModelInput) -> Result<Vec<(String, f64)>, EngineError> {
        let mut totals = vec![0.0; self.categories.len()];

        for member in &self.members {
            for (category, score) in member.predict(input)? {
                if let Some(i) = self.categories.iter().position(|c| *c == category) {
                    totals[i] += score;
                }
            }
        }

        let n = self.members.len() as f64;
        Ok(self
            .categories
            .iter()
            .cloned()
            .zip(totals)
            .map(|(category, total)| (category, total / n))
            .collect())
    }
}

fn validate_descriptor(descriptor: &ModelDescriptor) -> Result<(), EngineError> {
    if descriptor.version.trim().is_empty() {
        return Err(EngineError::InvalidArtifact("model with empty version".to_string()));
    }
    if descriptor.expected_schema_version.trim().is_empty() {
        return Err(EngineError::InvalidArtifact(format!(
            "model {} declares no schema version",
            descriptor.version
        )));
    }
    Ok(())
}

/// Ensemble as stored on disk; members are linear artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleArtifact {
    #[serde(flatten)]
    pub descriptor: ModelDescriptor,
    pub calibration: Calibration,
    pub members: Vec<LinearModel>,
}

/// On-disk model artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ModelArtifact {
    Linear(LinearModel),
    Ensemble(EnsembleArtifact),
}

impl ModelArtifact {
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).map_err(|e| EngineError::InvalidArtifact(e.to_string()))
    }

    /// Validate and build the runtime model
    pub fn into_model(self) -> Result<Arc<dyn ScoringModel>, EngineError> {
        match self {
            ModelArtifact::Linear(model) => {
                model.validate()?;
                Ok(Arc::new(model))
            }
            ModelArtifact::Ensemble(artifact) => {
                let members = artifact
                    .members
                    .into_iter()
                    .map(|member| {
                        member.validate()?;
                        Ok(Arc::new(member) as Arc<dyn ScoringModel>)
                    })
                    .collect::<Result<Vec<_>, EngineError>>()?;
                let ensemble = EnsembleModel::new(artifact.descriptor, artifact.calibration, members)?;
                Ok(Arc::new(ensemble))
            }
        }
    }
}

/// Score one vector with one model
///
/// Pure function of (vector, model parameters).
///
/// # Returns
/// * `Err(EngineError::SchemaMismatch)` - The vector was built for another layout
pub fn score(model: &dyn ScoringModel, vector: &FeatureVector) -> Result<Vec<ModelOutput>, EngineError> {
    if vector.schema_version != model.expected_schema_version() {
        return Err(EngineError::SchemaMismatch {
            expected: model.expected_schema_version().to_string(),
            found: vector.schema_version.clone(),
        });
    }

    let input = ModelInput::from_vector(vector);
    if !input.masked.is_empty() {
        debug!("Masked low-confidence features: {}", input.masked.join(", "));
    }

    let version = &model.descriptor().version;
    Ok(model
        .predict(&input)?
        .into_iter()
        .map(|(category, raw_score)| ModelOutput {
            category,
            raw_score,
            model_version: version.clone(),
        })
        .collect())
}

/// Model lookup plus scoring
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    registry: Arc<ModelRegistry>,
}

impl InferenceEngine {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// # Returns
    /// * `Err(EngineError::ModelUnavailable)` - `model_version` is not registered
    /// * `Err(EngineError::SchemaMismatch)` - Vector and model layouts differ
    pub fn infer(&self, vector: &FeatureVector, model_version: &str) -> Result<Vec<ModelOutput>, EngineError> {
        let model = self.registry.get(model_version)?;
        score(model.as_ref(), vector)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{FeatureEntry, FeatureSource};
    use chrono::TimeZone;

    pub(crate) fn descriptor(version: &str, schema: &str) -> ModelDescriptor {
        ModelDescriptor {
            version: version.to_string(),
            trained_on: "synthetic cohort".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap(),
            expected_schema_version: schema.to_string(),
        }
    }

    pub(crate) fn linear(version: &str, schema: &str, weights: &[(&str, f64, [f64; 2])]) -> LinearModel {
        LinearModel {
            descriptor: descriptor(version, schema),
            feature_names: vec!["prs:fat_sensitivity".to_string(), "survey:age".to_string()],
            calibration: Calibration::identity("id-1"),
            categories: weights
                .iter()
                .map(|(category, bias, w)| CategoryWeights {
                    category: category.to_string(),
                    bias: *bias,
                    weights: w.to_vec(),
                })
                .collect(),
        }
    }

    fn vector(schema: &str, prs: f64, low_confidence: bool) -> FeatureVector {
        FeatureVector {
            schema_version: schema.to_string(),
            entries: vec![
                FeatureEntry {
                    name: "prs:fat_sensitivity".to_string(),
                    value: prs,
                    source: FeatureSource::Risk {
                        trait_tag: "fat_sensitivity".to_string(),
                    },
                    low_confidence,
                    imputed: false,
                },
                FeatureEntry {
                    name: "survey:age".to_string(),
                    value: 40.0,
                    source: FeatureSource::Survey {
                        field: "age".to_string(),
                    },
                    low_confidence: false,
                    imputed: false,
                },
            ],
            risk_features: Vec::new(),
        }
    }

    #[test]
    fn test_linear_scores() {
        let model = linear("m1", "v1", &[("reduce_saturated_fat", 0.1, [0.5, 0.01])]);
        model.validate().unwrap();

        let outputs = score(&model, &vector("v1", 2.0, false)).unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].category, "reduce_saturated_fat");
        assert!((outputs[0].raw_score - (0.1 + 1.0 + 0.4)).abs() < 1e-12);
        assert_eq!(outputs[0].model_version, "m1");
    }

    #[test]
    fn test_schema_version_mismatch() {
        let model = linear("m1", "v2", &[("reduce_saturated_fat", 0.0, [1.0, 0.0])]);

        let result = score(&model, &vector("v1", 2.0, false));
        assert_eq!(
            result.unwrap_err(),
            EngineError::SchemaMismatch {
                expected: "v2".to_string(),
                found: "v1".to_string()
            }
        );
    }

    #[test]
    fn test_feature_layout_mismatch() {
        let mut model = linear("m1", "v1", &[("reduce_saturated_fat", 0.0, [1.0, 0.0])]);
        model.feature_names[1] = "survey:height_cm".to_string();

        let result = score(&model, &vector("v1", 2.0, false));
        assert!(matches!(result, Err(EngineError::SchemaMismatch { ref found, .. }) if found == "survey:age"));
    }

    #[test]
    fn test_low_confidence_entries_are_masked() {
        let model = linear("m1", "v1", &[("reduce_saturated_fat", 0.0, [1.0, 0.0])]);

        let confident = score(&model, &vector("v1", 3.0, false)).unwrap();
        let masked = score(&model, &vector("v1", 3.0, true)).unwrap();

        assert_eq!(confident[0].raw_score, 3.0);
        assert_eq!(masked[0].raw_score, NEUTRAL_VALUE);
    }

    #[test]
    fn test_ensemble_averages_members() {
        let a: Arc<dyn ScoringModel> = Arc::new(linear("a", "v1", &[("x", 0.0, [1.0, 0.0]), ("y", 1.0, [0.0, 0.0])]));
        let b: Arc<dyn ScoringModel> = Arc::new(linear("b", "v1", &[("y", 3.0, [0.0, 0.0]), ("x", 0.0, [3.0, 0.0])]));
        let ensemble = EnsembleModel::new(descriptor("ens", "v1"), Calibration::identity("id"), vec![a, b]).unwrap();

        let outputs = score(&ensemble, &vector("v1", 1.0, false)).unwrap();

        assert_eq!(outputs[0].category, "x");
        assert_eq!(outputs[0].raw_score, 2.0);
        assert_eq!(outputs[1].category, "y");
        assert_eq!(outputs[1].raw_score, 2.0);
        assert_eq!(outputs[0].model_version, "ens");
    }

    #[test]
    fn test_ensemble_rejects_mismatched_members() {
        let a: Arc<dyn ScoringModel> = Arc::new(linear("a", "v1", &[("x", 0.0, [1.0, 0.0])]));
        let b: Arc<dyn ScoringModel> = Arc::new(linear("b", "v2", &[("x", 0.0, [1.0, 0.0])]));
        let result = EnsembleModel::new(descriptor("ens", "v1"), Calibration::identity("id"), vec![a, b]);
        assert!(matches!(result, Err(EngineError::InvalidArtifact(_))));

        let a: Arc<dyn ScoringModel> = Arc::new(linear("a", "v1", &[("x", 0.0, [1.0, 0.0])]));
        let c: Arc<dyn ScoringModel> = Arc::new(linear("c", "v1", &[("z", 0.0, [1.0, 0.0])]));
        let result = EnsembleModel::new(descriptor("ens", "v1"), Calibration::identity("id"), vec![a, c]);
        assert!(matches!(result, Err(EngineError::InvalidArtifact(_))));
    }

    #[test]
    fn test_invalid_linear_artifact() {
        let mut model = linear("m1", "v1", &[("x", 0.0, [1.0, 0.0])]);
        model.categories[0].weights.pop();
        assert!(matches!(model.validate(), Err(EngineError::InvalidArtifact(_))));

        let model = linear("m1", "v1", &[("x", 0.0, [1.0, 0.0]), ("x", 0.0, [1.0, 0.0])]);
        assert!(matches!(model.validate(), Err(EngineError::InvalidArtifact(_))));
    }

    #[test]
    fn test_artifact_from_json() {
        let json = r#"{
            "backend": "linear",
            "version": "2026.09-linear",
            "trained_on": "synthetic cohort",
            "created_at": "2026-09-01T00:00:00Z",
            "expected_schema_version": "v1",
            "feature_names": ["prs:fat_sensitivity", "survey:age"],
            "calibration": {"version": "platt-1", "method": "platt", "a": 1.0, "b": 0.0},
            "categories": [{"category": "x", "bias": 0.0, "weights": [1.0, 0.0]}]
        }"#;

        let model = ModelArtifact::from_json(json).unwrap().into_model().unwrap();

        assert_eq!(model.descriptor().version, "2026.09-linear");
        assert_eq!(model.backend_type(), "linear");
        assert_eq!(model.calibration().version, "platt-1");
        assert_eq!(model.categories(), vec!["x"]);
    }
}
