// ==============================================================================
// risk_features.rs - Per-Trait Risk Feature Builder
// ==============================================================================
// Description: Aggregates normalized dosages into polygenic risk features
// Created: 2026-10-13
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// For each trait declared by the annotation store:
//   score    = Σ(dosage × weight) over variants with a readable call
//   coverage = readable variants / expected variants
// Traits at or below the minimum coverage with an incomplete panel are emitted
// flagged low-confidence together with a LowCoverageWarning.
// ==============================================================================

use std::collections::BTreeMap;
use tracing::warn;

use crate::annotation_store::AnnotationStore;
use crate::models::{LowCoverageWarning, NormalizedDosage, RiskFeature, VariantContribution};

/// Default minimum coverage fraction
pub const DEFAULT_MIN_COVERAGE: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct RiskFeatureBuilder {
    min_coverage: f64,
}

impl Default for RiskFeatureBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_COVERAGE)
    }
}

impl RiskFeatureBuilder {
    pub fn new(min_coverage: f64) -> Self {
        Self { min_coverage }
    }

    pub fn min_coverage(&self) -> f64 {
        self.min_coverage
    }

    /// Whether a coverage fraction is too sparse to drive thresholding
    pub fn is_low_coverage(&self, coverage: f64) -> bool {
        coverage < 1.0 && coverage <= self.min_coverage
    }

    /// Build one risk feature per trait in the store
    ///
    /// # Arguments
    /// * `store` - Annotation store the dosages were normalized against
    /// * `dosages` - Output of `genotype_converter::normalize_calls`
    ///
    /// # Returns
    /// * Risk features in the store's trait order
    /// * Warnings for low-coverage traits, in the same order
    pub fn build(
        &self,
        store: &AnnotationStore,
        dosages: &[NormalizedDosage],
    ) -> (Vec<RiskFeature>, Vec<LowCoverageWarning>) {
        let mut by_trait: BTreeMap<&str, Vec<&NormalizedDosage>> = BTreeMap::new();
        for dosage in dosages {
            by_trait.entry(dosage.trait_tag.as_str()).or_default().push(dosage);
        }

        let mut features = Vec::new();
        let mut warnings = Vec::new();

        for trait_tag in store.traits() {
            let expected = store
                .expected_variants_for(trait_tag)
                .map(|set| set.len())
                .unwrap_or(0);

            let mut contributions: Vec<VariantContribution> = by_trait
                .get(trait_tag)
                .into_iter()
                .flatten()
                .filter_map(|d| {
                    d.dosage.map(|dosage| VariantContribution {
                        variant_id: d.variant_id.clone(),
                        contribution: dosage.as_f64() * d.weight,
                    })
                })
                .collect();
            contributions.sort_by(|a, b| a.variant_id.cmp(&b.variant_id));

            let observed = contributions.len();
            let score = contributions.iter().map(|c| c.contribution).sum();
            let coverage = if expected == 0 {
                0.0
            } else {
                (observed as f64 / expected as f64).clamp(0.0, 1.0)
            };
            let low_confidence = self.is_low_coverage(coverage);

            if low_confidence {
                warn!(
                    "Insufficient variant coverage for trait {}: {}/{} ({:.2})",
                    trait_tag, observed, expected, coverage
                );
                warnings.push(LowCoverageWarning {
                    trait_tag: trait_tag.to_string(),
                    coverage,
                    min_coverage: self.min_coverage,
                });
            }

            features.push(RiskFeature {
                trait_tag: trait_tag.to_string(),
                score,
                contributions,
                coverage,
                observed_variants: observed,
                expected_variants: expected,
                low_confidence,
            });
        }

        (features, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotype_converter::normalize_calls;
    use crate::models::{Allele, GenotypeCall, VariantAnnotation};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn annotation(variant_id: &str, trait_tag: &str, risk: Allele, weight: f64) -> VariantAnnotation {
        VariantAnnotation {
            variant_id: variant_id.to_string(),
            gene: None,
            trait_tag: trait_tag.to_string(),
            risk_allele: risk,
            weight,
            risk_allele_freq: None,
            source_version: String::new(),
        }
    }

    fn build(store: &AnnotationStore, calls: &[GenotypeCall]) -> (Vec<RiskFeature>, Vec<LowCoverageWarning>) {
        let (dosages, _) = normalize_calls(calls, store).unwrap();
        RiskFeatureBuilder::default().build(store, &dosages)
    }

    #[test]
    fn test_homozygous_risk_full_coverage() {
        let store = AnnotationStore::new("t", vec![annotation("rs1", "fat_sensitivity", Allele::A, 0.5)]).unwrap();

        let (features, warnings) = build(&store, &[GenotypeCall::new("rs1", "AA")]);

        assert_eq!(features.len(), 1);
        assert!((features[0].score - 1.0).abs() < 1e-12);
        assert_eq!(features[0].coverage, 1.0);
        assert!(!features[0].low_confidence);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_heterozygous_score() {
        let store = AnnotationStore::new("t", vec![annotation("rs1", "fat_sensitivity", Allele::A, 0.5)]).unwrap();

        let (features, _) = build(&store, &[GenotypeCall::new("rs1", "AT")]);

        assert!((features[0].score - 0.5).abs() < 1e-12);
        assert_eq!(features[0].contributions[0].contribution, 0.5);
    }

    #[test]
    fn test_half_coverage_is_low_confidence() {
        let store = AnnotationStore::new(
            "t",
            vec![
                annotation("rs1", "fat_sensitivity", Allele::A, 0.5),
                annotation("rs2", "fat_sensitivity", Allele::G, 0.25),
            ],
        )
        .unwrap();

        let (features, warnings) = build(&store, &[GenotypeCall::new("rs2", "GG")]);

        assert_eq!(features[0].coverage, 0.5);
        assert!((features[0].score - 0.5).abs() < 1e-12); // rs2 alone: 2 × 0.25
        assert!(features[0].low_confidence);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].trait_tag, "fat_sensitivity");
    }

    #[test]
    fn test_missing_call_does_not_count_towards_coverage() {
        let store = AnnotationStore::new(
            "t",
            vec![
                annotation("rs1", "fat_sensitivity", Allele::A, 0.5),
                annotation("rs2", "fat_sensitivity", Allele::G, 0.25),
                annotation("rs3", "fat_sensitivity", Allele::G, 0.25),
            ],
        )
        .unwrap();

        let (features, _) = build(
            &store,
            &[
                GenotypeCall::new("rs1", "--"),
                GenotypeCall::new("rs2", "AG"),
                GenotypeCall::new("rs3", "AA"),
            ],
        );

        assert_eq!(features[0].observed_variants, 2);
        assert!((features[0].coverage - 2.0 / 3.0).abs() < 1e-12);
        assert!(!features[0].low_confidence);
    }

    #[test]
    fn test_trait_without_calls_is_emitted() {
        let store = AnnotationStore::new(
            "t",
            vec![
                annotation("rs1", "fat_sensitivity", Allele::A, 0.5),
                annotation("rs9", "caffeine_sensitivity", Allele::C, 0.8),
            ],
        )
        .unwrap();

        let (features, warnings) = build(&store, &[GenotypeCall::new("rs1", "AA")]);

        assert_eq!(features.len(), 2);
        assert_eq!(features[0].trait_tag, "caffeine_sensitivity");
        assert_eq!(features[0].coverage, 0.0);
        assert_eq!(features[0].score, 0.0);
        assert!(features[0].low_confidence);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_coverage_monotonic_in_supplied_calls() {
        let variants: Vec<String> = (1..=20).map(|i| format!("rs{}", i)).collect();
        let store = AnnotationStore::new(
            "t",
            variants
                .iter()
                .map(|v| annotation(v, "carb_tolerance", Allele::T, 0.1))
                .collect(),
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let genotypes = ["AA", "AT", "TT", "--", "CG"];

        for _ in 0..20 {
            let mut calls: Vec<GenotypeCall> = Vec::new();
            let mut previous = 0.0;

            for variant in &variants {
                let genotype = genotypes[rng.gen_range(0..genotypes.len())];
                calls.push(GenotypeCall::new(variant.clone(), genotype));

                let (features, _) = build(&store, &calls);
                let coverage = features[0].coverage;
                assert!((0.0..=1.0).contains(&coverage));
                assert!(coverage >= previous, "coverage decreased: {} -> {}", previous, coverage);
                previous = coverage;
            }
        }
    }
}
