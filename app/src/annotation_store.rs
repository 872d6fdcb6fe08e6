// ==============================================================================
// annotation_store.rs - Variant Annotation Store
// ==============================================================================
// Description: Immutable variant → trait annotation lookup with atomic refresh
// Created: 2026-10-12
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// The store is built once and never mutated. A refresh builds a complete new
// store and swaps the shared pointer, so a reader holding a snapshot never
// observes a partially loaded table.
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::error::EngineError;
use crate::models::VariantAnnotation;

/// Canonical form of a variant identifier ("RS123 " → "rs123")
pub fn normalize_variant_id(variant_id: &str) -> String {
    variant_id.trim().to_ascii_lowercase()
}

/// Declared scaling applied to a trait's aggregate score during fusion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ScalingRule {
    /// Score is used as-is
    Raw,
    /// z = (score - mean) / std_dev; z = 0 when std_dev is 0
    ZScore { mean: f64, std_dev: f64 },
}

impl ScalingRule {
    pub fn apply(&self, score: f64) -> f64 {
        match *self {
            ScalingRule::Raw => score,
            ScalingRule::ZScore { mean, std_dev } => {
                if std_dev > 0.0 {
                    (score - mean) / std_dev
                } else {
                    0.0
                }
            }
        }
    }
}

/// Read-only annotation table
#[derive(Debug, Clone)]
pub struct AnnotationStore {
    source_version: String,
    by_variant: HashMap<String, Vec<VariantAnnotation>>,
    expected: BTreeMap<String, BTreeSet<String>>,
    scaling: BTreeMap<String, ScalingRule>,
    annotation_count: usize,
}

impl AnnotationStore {
    /// Build a store from loaded annotations
    ///
    /// # Arguments
    /// * `source_version` - Version tag of the annotation source; stamped on every row
    /// * `annotations` - Rows to index; at most one per (variant, trait)
    ///
    /// # Returns
    /// * `Err(EngineError::InvalidArtifact)` - Empty ids/traits, non-finite weights,
    ///   out-of-range frequencies or duplicate (variant, trait) pairs
    pub fn new(
        source_version: impl Into<String>,
        annotations: Vec<VariantAnnotation>,
    ) -> Result<Self, EngineError> {
        let source_version = source_version.into();
        let mut by_variant: HashMap<String, Vec<VariantAnnotation>> = HashMap::new();
        let mut expected: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let annotation_count = annotations.len();

        for mut annotation in annotations {
            annotation.variant_id = normalize_variant_id(&annotation.variant_id);
            annotation.trait_tag = annotation.trait_tag.trim().to_string();
            annotation.source_version = source_version.clone();

            if annotation.variant_id.is_empty() || annotation.trait_tag.is_empty() {
                return Err(EngineError::InvalidArtifact(format!(
                    "annotation with empty variant id or trait in source {}",
                    source_version
                )));
            }
            if !annotation.weight.is_finite() {
                return Err(EngineError::InvalidArtifact(format!(
                    "non-finite weight for {} / {}",
                    annotation.variant_id, annotation.trait_tag
                )));
            }
            if let Some(freq) = annotation.risk_allele_freq {
                if !(freq > 0.0 && freq < 1.0) {
                    return Err(EngineError::InvalidArtifact(format!(
                        "risk allele frequency {} for {} outside (0, 1)",
                        freq, annotation.variant_id
                    )));
                }
            }

            let traits = expected.entry(annotation.trait_tag.clone()).or_default();
            if !traits.insert(annotation.variant_id.clone()) {
                return Err(EngineError::InvalidArtifact(format!(
                    "duplicate annotation for {} / {}",
                    annotation.variant_id, annotation.trait_tag
                )));
            }

            by_variant
                .entry(annotation.variant_id.clone())
                .or_default()
                .push(annotation);
        }

        // Stable per-variant order regardless of source row order
        for rows in by_variant.values_mut() {
            rows.sort_by(|a, b| a.trait_tag.cmp(&b.trait_tag));
        }

        let scaling = expected
            .keys()
            .map(|trait_tag| {
                let rows = expected[trait_tag]
                    .iter()
                    .filter_map(|v| by_variant.get(v))
                    .flatten()
                    .filter(|a| &a.trait_tag == trait_tag);
                (trait_tag.clone(), derive_scaling(rows))
            })
            .collect();

        info!(
            "Loaded annotation source {}: {} annotations, {} variants, {} traits",
            source_version,
            annotation_count,
            by_variant.len(),
            expected.len()
        );

        Ok(Self {
            source_version,
            by_variant,
            expected,
            scaling,
            annotation_count,
        })
    }

    pub fn source_version(&self) -> &str {
        &self.source_version
    }

    /// Annotations for a variant; empty when the variant is unknown
    pub fn lookup(&self, variant_id: &str) -> &[VariantAnnotation] {
        self.by_variant
            .get(&normalize_variant_id(variant_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, variant_id: &str) -> bool {
        self.by_variant.contains_key(&normalize_variant_id(variant_id))
    }

    /// Declared trait list, in sorted order
    pub fn traits(&self) -> Vec<&str> {
        self.expected.keys().map(String::as_str).collect()
    }

    /// Variants annotated for a trait (coverage denominator)
    pub fn expected_variants_for(&self, trait_tag: &str) -> Option<&BTreeSet<String>> {
        self.expected.get(trait_tag)
    }

    pub fn scaling_for(&self, trait_tag: &str) -> ScalingRule {
        self.scaling
            .get(trait_tag)
            .copied()
            .unwrap_or(ScalingRule::Raw)
    }

    pub fn len(&self) -> usize {
        self.annotation_count
    }

    pub fn is_empty(&self) -> bool {
        self.annotation_count == 0
    }
}

/// Hardy-Weinberg z-score when every row declares a risk allele frequency
///
/// mean = Σ 2p·w, variance = Σ 2p(1-p)·w²
fn derive_scaling<'a>(rows: impl Iterator<Item = &'a VariantAnnotation>) -> ScalingRule {
    let mut mean = 0.0;
    let mut variance = 0.0;

    for row in rows {
        let Some(p) = row.risk_allele_freq else {
            return ScalingRule::Raw;
        };
        mean += 2.0 * p * row.weight;
        variance += 2.0 * p * (1.0 - p) * row.weight * row.weight;
    }

    ScalingRule::ZScore {
        mean,
        std_dev: variance.sqrt(),
    }
}

/// Shared handle to the current annotation store
#[derive(Debug, Clone)]
pub struct AnnotationHandle {
    current: Arc<RwLock<Arc<AnnotationStore>>>,
}

impl AnnotationHandle {
    pub fn new(store: AnnotationStore) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(store))),
        }
    }

    /// Current store; stays valid for the caller even across a refresh
    pub fn snapshot(&self) -> Arc<AnnotationStore> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the whole store, returning the previous one
    pub fn swap(&self, store: AnnotationStore) -> Arc<AnnotationStore> {
        let next = Arc::new(store);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, next)
    }
}
