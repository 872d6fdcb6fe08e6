// ==============================================================================
// fusion.rs - Feature Fusion Layer
// ==============================================================================
// Description: Concatenates risk and survey features into a versioned vector
// Created: 2026-10-14
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Layout: "prs:<trait>" entries in annotation-store trait order, followed by
// "survey:<feature>" entries in survey-schema order. The schema version binds
// the layout to the models trained on it. Fusion never zero-fills: an absent
// feature is a schema mismatch.
// ==============================================================================

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

use crate::annotation_store::{AnnotationStore, ScalingRule};
use crate::error::EngineError;
use crate::models::{FeatureEntry, FeatureSource, FeatureVector, RiskFeature, SurveyFeature};
use crate::survey::{SurveyField, SurveySchema};

pub const RISK_PREFIX: &str = "prs:";
pub const SURVEY_PREFIX: &str = "survey:";

/// Risk slot of the layout with its declared scaling rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraitSlot {
    pub trait_tag: String,
    pub scaling: ScalingRule,
}

/// Fused feature layout
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    version: String,
    fingerprint: String,
    traits: Vec<TraitSlot>,
    survey_features: Vec<String>,
}

#[derive(Serialize)]
struct LayoutDigest<'a> {
    traits: &'a [TraitSlot],
    survey_version: &'a str,
    survey_fields: &'a [SurveyField],
}

impl FeatureSchema {
    /// Derive the layout from the current annotation store and survey schema
    ///
    /// # Arguments
    /// * `explicit_tag` - Schema version to stamp instead of the layout hash
    ///
    /// # Returns
    /// * Fingerprint is the first 16 hex chars of the SHA-256 of the layout
    ///   (traits with scaling rules, survey fields with encodings), always computed
    /// * Version is `explicit_tag`, or "fs-" + fingerprint
    pub fn derive(
        store: &AnnotationStore,
        survey: &SurveySchema,
        explicit_tag: Option<&str>,
    ) -> Result<Self, EngineError> {
        let traits: Vec<TraitSlot> = store
            .traits()
            .into_iter()
            .map(|trait_tag| TraitSlot {
                trait_tag: trait_tag.to_string(),
                scaling: store.scaling_for(trait_tag),
            })
            .collect();

        let layout = LayoutDigest {
            traits: &traits,
            survey_version: survey.version(),
            survey_fields: survey.fields(),
        };
        let bytes = serde_json::to_vec(&layout).map_err(|e| {
            EngineError::InvalidArtifact(format!("cannot serialize feature layout: {}", e))
        })?;
        let fingerprint = format!("{:x}", Sha256::digest(&bytes))[..16].to_string();

        let version = match explicit_tag {
            Some(tag) => tag.to_string(),
            None => format!("fs-{}", fingerprint),
        };

        debug!(
            "Feature schema {}: {} traits, {} survey features",
            version,
            traits.len(),
            survey.feature_names().len()
        );

        Ok(Self {
            version,
            fingerprint,
            traits,
            survey_features: survey.feature_names(),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Layout digest; differs whenever names or encoding rules differ, even
    /// under an explicit tag
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn traits(&self) -> &[TraitSlot] {
        &self.traits
    }

    /// Full ordered feature names
    pub fn feature_names(&self) -> Vec<String> {
        self.traits
            .iter()
            .map(|t| format!("{}{}", RISK_PREFIX, t.trait_tag))
            .chain(
                self.survey_features
                    .iter()
                    .map(|s| format!("{}{}", SURVEY_PREFIX, s)),
            )
            .collect()
    }

    pub fn len(&self) -> usize {
        self.traits.len() + self.survey_features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fuse one sample's features into a vector in this layout
    ///
    /// # Returns
    /// * `Err(EngineError::MissingFeature)` - A layout slot has no feature
    /// * `Err(EngineError::UnexpectedFeature)` - A feature has no layout slot
    pub fn fuse(
        &self,
        risk: Vec<RiskFeature>,
        survey: Vec<SurveyFeature>,
    ) -> Result<FeatureVector, EngineError> {
        let mut entries = Vec::with_capacity(self.len());

        let declared: HashSet<&str> = self.traits.iter().map(|t| t.trait_tag.as_str()).collect();
        if let Some(extra) = risk.iter().find(|r| !declared.contains(r.trait_tag.as_str())) {
            return Err(EngineError::UnexpectedFeature {
                feature: format!("{}{}", RISK_PREFIX, extra.trait_tag),
            });
        }

        for slot in &self.traits {
            let feature = risk
                .iter()
                .find(|r| r.trait_tag == slot.trait_tag)
                .ok_or_else(|| EngineError::MissingFeature {
                    feature: format!("{}{}", RISK_PREFIX, slot.trait_tag),
                })?;

            entries.push(FeatureEntry {
                name: format!("{}{}", RISK_PREFIX, slot.trait_tag),
                value: slot.scaling.apply(feature.score),
                source: FeatureSource::Risk {
                    trait_tag: slot.trait_tag.clone(),
                },
                low_confidence: feature.low_confidence,
                imputed: false,
            });
        }

        let declared: HashSet<&str> = self.survey_features.iter().map(String::as_str).collect();
        if let Some(extra) = survey.iter().find(|s| !declared.contains(s.name.as_str())) {
            return Err(EngineError::UnexpectedFeature {
                feature: format!("{}{}", SURVEY_PREFIX, extra.name),
            });
        }

        for name in &self.survey_features {
            let feature = survey
                .iter()
                .find(|s| &s.name == name)
                .ok_or_else(|| EngineError::MissingFeature {
                    feature: format!("{}{}", SURVEY_PREFIX, name),
                })?;

            let field = name.split('=').next().unwrap_or(name).to_string();
            entries.push(FeatureEntry {
                name: format!("{}{}", SURVEY_PREFIX, name),
                value: feature.value,
                source: FeatureSource::Survey { field },
                low_confidence: false,
                imputed: feature.imputed,
            });
        }

        Ok(FeatureVector {
            schema_version: self.version.clone(),
            entries,
            risk_features: risk,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotype_converter::normalize_calls;
    use crate::models::{Allele, GenotypeCall, SurveyValue, VariantAnnotation};
    use crate::risk_features::RiskFeatureBuilder;
    use std::collections::BTreeMap;

    fn annotation(variant_id: &str, trait_tag: &str, risk: Allele, weight: f64, freq: Option<f64>) -> VariantAnnotation {
        VariantAnnotation {
            variant_id: variant_id.to_string(),
            gene: None,
            trait_tag: trait_tag.to_string(),
            risk_allele: risk,
            weight,
            risk_allele_freq: freq,
            source_version: String::new(),
        }
    }

    fn store() -> AnnotationStore {
        AnnotationStore::new(
            "test-1",
            vec![
                annotation("rs1", "fat_sensitivity", Allele::A, 0.5, None),
                annotation("rs2", "lactose_tolerance", Allele::G, 1.0, Some(0.5)),
            ],
        )
        .unwrap()
    }

    fn survey() -> SurveySchema {
        SurveySchema::new(
            "mini-1",
            vec![
                SurveyField::continuous("age", 18.0, 100.0, 35.0),
                SurveyField::one_hot("goal", &["loss", "gain"], "loss"),
            ],
        )
        .unwrap()
    }

    fn features(store: &AnnotationStore, survey: &SurveySchema) -> (Vec<RiskFeature>, Vec<SurveyFeature>) {
        let calls = vec![GenotypeCall::new("rs1", "AA"), GenotypeCall::new("rs2", "GG")];
        let (dosages, _) = normalize_calls(&calls, store).unwrap();
        let (risk, _) = RiskFeatureBuilder::default().build(store, &dosages);

        let mut answers = BTreeMap::new();
        answers.insert("age".to_string(), SurveyValue::Number(40.0));
        answers.insert("goal".to_string(), SurveyValue::Text("gain".to_string()));
        (risk, survey.encode(&answers).unwrap())
    }

    #[test]
    fn test_layout_order_and_scaling() {
        let store = store();
        let survey = survey();
        let schema = FeatureSchema::derive(&store, &survey, None).unwrap();
        let (risk, encoded) = features(&store, &survey);

        let vector = schema.fuse(risk, encoded).unwrap();

        assert_eq!(
            vector.names(),
            vec![
                "prs:fat_sensitivity",
                "prs:lactose_tolerance",
                "survey:age",
                "survey:goal=loss",
                "survey:goal=gain"
            ]
        );
        // Raw trait keeps its score; z-score trait: (2 - 1) / sqrt(0.5)
        assert_eq!(vector.values()[0], 1.0);
        assert!((vector.values()[1] - 1.0 / 0.5f64.sqrt()).abs() < 1e-12);
        assert_eq!(vector.values()[4], 1.0);
        assert_eq!(vector.schema_version, schema.version());
        assert_eq!(
            vector.get("survey:goal=gain").unwrap().source,
            FeatureSource::Survey {
                field: "goal".to_string()
            }
        );
    }

    #[test]
    fn test_schema_version_hash_and_tag() {
        let store = store();
        let survey = survey();

        let hashed = FeatureSchema::derive(&store, &survey, None).unwrap();
        let again = FeatureSchema::derive(&store, &survey, None).unwrap();
        assert!(hashed.version().starts_with("fs-"));
        assert_eq!(hashed.version().len(), 19);
        assert_eq!(hashed.version(), again.version());

        let other_survey = SurveySchema::new(
            "mini-2",
            vec![SurveyField::continuous("age", 18.0, 90.0, 35.0)],
        )
        .unwrap();
        let other = FeatureSchema::derive(&store, &other_survey, None).unwrap();
        assert_ne!(hashed.version(), other.version());

        let tagged = FeatureSchema::derive(&store, &survey, Some("nutri-fs-1")).unwrap();
        assert_eq!(tagged.version(), "nutri-fs-1");
        assert_eq!(tagged.fingerprint(), &hashed.version()[3..]);
    }

    #[test]
    fn test_tagged_schema_still_tracks_scaling() {
        let survey = survey();
        let raw = store();
        // Same trait names, but fat_sensitivity now has frequencies and switches to z-score
        let rescaled = AnnotationStore::new(
            "test-2",
            vec![
                annotation("rs1", "fat_sensitivity", Allele::A, 0.5, Some(0.3)),
                annotation("rs2", "lactose_tolerance", Allele::G, 1.0, Some(0.5)),
            ],
        )
        .unwrap();

        let before = FeatureSchema::derive(&raw, &survey, Some("nutri-fs-1")).unwrap();
        let after = FeatureSchema::derive(&rescaled, &survey, Some("nutri-fs-1")).unwrap();

        assert_eq!(before.version(), after.version());
        assert_eq!(before.feature_names(), after.feature_names());
        assert_ne!(before.fingerprint(), after.fingerprint());
    }

    #[test]
    fn test_missing_feature_is_schema_mismatch() {
        let store = store();
        let survey = survey();
        let schema = FeatureSchema::derive(&store, &survey, None).unwrap();
        let (mut risk, encoded) = features(&store, &survey);
        risk.retain(|r| r.trait_tag != "lactose_tolerance");

        let result = schema.fuse(risk, encoded);
        assert_eq!(
            result.unwrap_err(),
            EngineError::MissingFeature {
                feature: "prs:lactose_tolerance".to_string()
            }
        );
    }

    #[test]
    fn test_unexpected_feature_is_schema_mismatch() {
        let store = store();
        let survey = survey();
        let schema = FeatureSchema::derive(&store, &survey, None).unwrap();
        let (risk, mut encoded) = features(&store, &survey);
        encoded.push(SurveyFeature {
            name: "shoe_size".to_string(),
            value: 42.0,
            imputed: false,
            clamped: false,
        });

        let result = schema.fuse(risk, encoded);
        assert!(matches!(result, Err(EngineError::UnexpectedFeature { .. })));
    }

    #[test]
    fn test_reencoding_yields_identical_vector() {
        let store = store();
        let survey = survey();
        let schema = FeatureSchema::derive(&store, &survey, None).unwrap();

        let (risk_a, survey_a) = features(&store, &survey);
        let (risk_b, survey_b) = features(&store, &survey);

        assert_eq!(schema.fuse(risk_a, survey_a).unwrap(), schema.fuse(risk_b, survey_b).unwrap());
    }
}
