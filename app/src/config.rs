// ==============================================================================
// config.rs - Engine Configuration
// ==============================================================================
// Description: Tunable thresholds and pool sizing, loaded from JSON
// Created: 2026-10-16
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

use crate::recommender::{AggregatorSettings, DEFAULT_CONFIDENCE_FLOOR, DEFAULT_TOP_N_VARIANTS};
use crate::risk_features::DEFAULT_MIN_COVERAGE;

pub const DEFAULT_MAX_GENOTYPE_CALLS: usize = 2_000_000;

/// Engine configuration; every field has a default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EngineConfig {
    /// Traits at or below this coverage (with an incomplete panel) are low-confidence
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_coverage: f64,

    /// Recommendations below this calibrated confidence are dropped
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence_floor: f64,

    #[validate(range(min = 1, max = 50))]
    pub top_n_variants: usize,

    /// Batch worker threads; None uses available parallelism
    #[validate(range(min = 1, max = 512))]
    pub worker_threads: Option<usize>,

    /// Model used when the caller names none; None picks the newest
    #[validate(length(min = 1))]
    pub default_model_version: Option<String>,

    /// Explicit feature schema version; None derives it from the layout hash
    #[validate(length(min = 1))]
    pub schema_tag: Option<String>,

    #[validate(range(min = 1))]
    pub max_genotype_calls: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_coverage: DEFAULT_MIN_COVERAGE,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            top_n_variants: DEFAULT_TOP_N_VARIANTS,
            worker_threads: None,
            default_model_version: None,
            schema_tag: None,
            max_genotype_calls: DEFAULT_MAX_GENOTYPE_CALLS,
        }
    }
}

impl EngineConfig {
    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config {:?}", path.as_ref()))?;
        let config: EngineConfig = serde_json::from_str(&text).context("Failed to parse config")?;
        config.check()?;
        Ok(config)
    }

    /// Validate field ranges
    pub fn check(&self) -> Result<()> {
        self.validate().context("Invalid engine configuration")?;
        Ok(())
    }

    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            confidence_floor: self.confidence_floor,
            top_n_variants: self.top_n_variants,
        }
    }
}
