// ==============================================================================
// registry.rs - Model Registry
// ==============================================================================
// Description: Versioned set of loaded scoring models
// Created: 2026-10-14
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Models are loaded once at start-up and the registry is immutable afterwards;
// it is shared between workers behind an Arc.
// ==============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditEventType};
use crate::error::EngineError;
use crate::inference::{ModelArtifact, ScoringModel};

/// Entry returned by `list_model_versions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersionInfo {
    pub version: String,
    pub trained_on: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<dyn ScoringModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model
    ///
    /// # Returns
    /// * `Err(EngineError::InvalidArtifact)` - The version is already registered
    pub fn register(&mut self, model: Arc<dyn ScoringModel>) -> Result<(), EngineError> {
        let version = model.descriptor().version.clone();
        if self.models.contains_key(&version) {
            return Err(EngineError::InvalidArtifact(format!(
                "model version {} registered twice",
                version
            )));
        }

        AuditEvent::new(
            AuditEventType::ModelRegistered,
            serde_json::json!({
                "backend": model.backend_type(),
                "categories": model.categories().len(),
                "calibration_version": model.calibration().version,
            }),
        )
        .with_model(&version)
        .with_schema(model.expected_schema_version())
        .log();

        debug!(
            "Registered {} model {} (schema {})",
            model.backend_type(),
            version,
            model.expected_schema_version()
        );
        self.models.insert(version, model);
        Ok(())
    }

    /// Load every `*.json` artifact in a directory, in file-name order
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read model directory {:?}", dir))?
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("Failed to list model directory {:?}", dir))?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut registry = Self::new();
        for path in &paths {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read model artifact {:?}", path))?;
            let model = ModelArtifact::from_json(&text)
                .and_then(ModelArtifact::into_model)
                .with_context(|| format!("Invalid model artifact {:?}", path))?;
            registry.register(model)?;
        }

        info!("Loaded {} model(s) from {:?}", registry.len(), dir);
        Ok(registry)
    }

    /// # Returns
    /// * `Err(EngineError::ModelUnavailable)` - Version not registered
    pub fn get(&self, version: &str) -> Result<Arc<dyn ScoringModel>, EngineError> {
        self.models
            .get(version)
            .cloned()
            .ok_or_else(|| EngineError::ModelUnavailable {
                version: version.to_string(),
            })
    }

    /// Most recently created model (ties broken by version)
    pub fn latest_version(&self) -> Option<&str> {
        self.models
            .values()
            .max_by(|a, b| {
                let (a, b) = (a.descriptor(), b.descriptor());
                a.created_at.cmp(&b.created_at).then_with(|| a.version.cmp(&b.version))
            })
            .map(|model| model.descriptor().version.as_str())
    }

    /// Registered models sorted by version
    pub fn list_model_versions(&self) -> Vec<ModelVersionInfo> {
        self.models
            .values()
            .map(|model| {
                let descriptor = model.descriptor();
                ModelVersionInfo {
                    version: descriptor.version.clone(),
                    trained_on: descriptor.trained_on.clone(),
                    created_at: descriptor.created_at,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
