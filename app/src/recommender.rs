// ==============================================================================
// recommender.rs - Recommendation Aggregator and Explainer
// ==============================================================================
// Description: Turns raw model scores into ranked, explained recommendations
// Created: 2026-10-15
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Steps, all deterministic:
//   1. calibrate each raw score with the model's calibration
//   2. drop categories below the confidence floor
//   3. keep one category per detail text (highest confidence wins)
//   4. sort by confidence descending, ties by catalog priority
//   5. attach the top-N contributing variants and low-coverage traits
// ==============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

use crate::calibration::Calibration;
use crate::error::EngineError;
use crate::models::{
    ExplainedVariant, Explanation, FeatureVector, ModelOutput, Recommendation, TraitCoverage,
};

/// Default confidence floor
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.5;

/// Default number of variants named per explanation
pub const DEFAULT_TOP_N_VARIANTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub category: String,
    pub detail: String,

    /// Traits whose variants explain this category; empty means all traits
    #[serde(default)]
    pub related_traits: Vec<String>,
}

/// Recommendation texts; list order is the fixed category priority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationCatalog {
    entries: Vec<CatalogEntry>,
}

impl RecommendationCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self, EngineError> {
        let catalog = Self { entries };
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if entry.category.trim().is_empty() || entry.detail.trim().is_empty() {
                return Err(EngineError::InvalidArtifact(
                    "catalog entry with empty category or detail".to_string(),
                ));
            }
            if !seen.insert(entry.category.as_str()) {
                return Err(EngineError::InvalidArtifact(format!(
                    "duplicate catalog category '{}'",
                    entry.category
                )));
            }
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read recommendation catalog {:?}", path.as_ref()))?;
        let catalog: RecommendationCatalog =
            serde_json::from_str(&text).context("Failed to parse recommendation catalog")?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Built-in dietary guidelines
    pub fn nutrition_default() -> Self {
        let entry = |category: &str, detail: &str, related: &[&str]| CatalogEntry {
            category: category.to_string(),
            detail: detail.to_string(),
            related_traits: related.iter().map(|t| t.to_string()).collect(),
        };

        Self {
            entries: vec![
                entry(
                    "reduce_saturated_fat",
                    "Reduce saturated fat; prefer MUFA/PUFA sources such as nuts, seeds and mustard or olive oil.",
                    &["fat_sensitivity"],
                ),
                entry(
                    "low_gi_carbohydrates",
                    "Use lower-GI carbohydrates such as millets, legumes and whole grains.",
                    &["carb_tolerance"],
                ),
                entry(
                    "folate_rich_foods",
                    "Add folate-rich foods such as leafy greens, lentils and chickpeas.",
                    &["methylation_support"],
                ),
                entry(
                    "lactose_free_swaps",
                    "Provide lactose-free swaps such as curd, lactose-free milk or fortified plant milk.",
                    &["lactose_tolerance"],
                ),
                entry(
                    "limit_caffeine",
                    "Limit caffeine to one cup of coffee or tea, taken before noon.",
                    &["caffeine_sensitivity"],
                ),
                entry(
                    "high_fibre_meals",
                    "Build meals around high-fibre vegetables, pulses and whole grains.",
                    &["carb_tolerance"],
                ),
                entry(
                    "dairy_alternatives",
                    "Provide lactose-free swaps such as curd, lactose-free milk or fortified plant milk.",
                    &["lactose_tolerance"],
                ),
            ],
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Entry and its priority (0 = highest)
    pub fn lookup(&self, category: &str) -> Option<(usize, &CatalogEntry)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.category == category)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorSettings {
    pub confidence_floor: f64,
    pub top_n_variants: usize,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            top_n_variants: DEFAULT_TOP_N_VARIANTS,
        }
    }
}

struct Candidate<'a> {
    priority: usize,
    entry: &'a CatalogEntry,
    confidence: f64,
}

/// Confidence descending, then priority ascending
fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.priority.cmp(&b.priority))
}

/// Build the ranked recommendation list for one sample
pub fn aggregate(
    outputs: &[ModelOutput],
    calibration: &Calibration,
    vector: &FeatureVector,
    catalog: &RecommendationCatalog,
    settings: &AggregatorSettings,
) -> Vec<Recommendation> {
    let mut by_detail: BTreeMap<&str, Candidate> = BTreeMap::new();

    for output in outputs {
        let Some((priority, entry)) = catalog.lookup(&output.category) else {
            warn!(
                "Model {} produced category '{}' missing from the catalog; skipping",
                output.model_version, output.category
            );
            continue;
        };

        let confidence = calibration.apply(output.raw_score);
        if confidence < settings.confidence_floor {
            debug!(
                "Dropping {} ({:.3} below floor {:.3})",
                output.category, confidence, settings.confidence_floor
            );
            continue;
        }

        let candidate = Candidate {
            priority,
            entry,
            confidence,
        };
        let keep_existing = by_detail
            .get(entry.detail.as_str())
            .is_some_and(|existing| rank_order(existing, &candidate) != Ordering::Greater);
        if !keep_existing {
            by_detail.insert(entry.detail.as_str(), candidate);
        }
    }

    let mut candidates: Vec<Candidate> = by_detail.into_values().collect();
    candidates.sort_by(rank_order);

    candidates
        .into_iter()
        .enumerate()
        .map(|(i, candidate)| Recommendation {
            rank: i + 1,
            category: candidate.entry.category.clone(),
            detail: candidate.entry.detail.clone(),
            confidence: candidate.confidence,
            explanation: explain(candidate.entry, vector, settings.top_n_variants),
        })
        .collect()
}

/// Structured explanation for one catalog entry
///
/// Variants are ranked by absolute weighted contribution, ties by variant id.
pub fn explain(entry: &CatalogEntry, vector: &FeatureVector, top_n: usize) -> Explanation {
    let related = |trait_tag: &str| {
        entry.related_traits.is_empty() || entry.related_traits.iter().any(|t| t == trait_tag)
    };

    let mut variants: Vec<ExplainedVariant> = vector
        .risk_features
        .iter()
        .filter(|feature| related(&feature.trait_tag))
        .flat_map(|feature| {
            feature.contributions.iter().map(|c| ExplainedVariant {
                variant_id: c.variant_id.clone(),
                trait_tag: feature.trait_tag.clone(),
                contribution: c.contribution,
            })
        })
        .collect();

    variants.sort_by(|a, b| {
        b.contribution
            .abs()
            .total_cmp(&a.contribution.abs())
            .then_with(|| a.variant_id.cmp(&b.variant_id))
            .then_with(|| a.trait_tag.cmp(&b.trait_tag))
    });
    variants.truncate(top_n);

    let low_coverage_traits = vector
        .risk_features
        .iter()
        .filter(|feature| feature.low_confidence && related(&feature.trait_tag))
        .map(|feature| TraitCoverage {
            trait_tag: feature.trait_tag.clone(),
            coverage: feature.coverage,
        })
        .collect();

    Explanation {
        category: entry.category.clone(),
        variants,
        low_coverage_traits,
    }
}
