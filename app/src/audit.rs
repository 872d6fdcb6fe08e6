// ==============================================================================
// audit.rs - Audit Logging for Inference Operations
// ==============================================================================
// Description: Structured audit trail for inference runs and reference-data changes
// Created: 2026-10-15
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Events are emitted as JSON on the "audit" tracing target. They carry wall-clock
// timestamps and random ids, so they are never copied into inference results.
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::SampleInput;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Inference events
    InferenceStarted,
    InferenceCompleted,
    InferenceFailed,
    BatchCompleted,
    BatchCancelled,

    // Reference data events
    AnnotationsSwapped,
    ModelRegistered,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub sample_id: Option<String>,
    pub model_version: Option<String>,
    pub schema_version: Option<String>,

    /// SHA-256 of the canonical JSON form of the sample input
    pub input_digest: Option<String>,

    pub details: serde_json::Value,
    pub severity: LogSeverity,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, details: serde_json::Value) -> Self {
        let severity = match event_type {
            AuditEventType::BatchCancelled => LogSeverity::Warning,
            AuditEventType::InferenceFailed => LogSeverity::Error,
            _ => LogSeverity::Info,
        };

        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            sample_id: None,
            model_version: None,
            schema_version: None,
            input_digest: None,
            details,
            severity,
        }
    }

    /// Attach the sample id and input digest
    pub fn for_sample(mut self, sample: &SampleInput) -> Self {
        self.sample_id = Some(sample.sample_id.clone());
        self.input_digest = Some(input_digest(sample));
        self
    }

    /// Attach only the sample id, for requests that never decoded
    pub fn for_sample_id(mut self, sample_id: &str) -> Self {
        self.sample_id = Some(sample_id.to_string());
        self
    }

    pub fn with_model(mut self, model_version: &str) -> Self {
        self.model_version = Some(model_version.to_string());
        self
    }

    pub fn with_schema(mut self, schema_version: &str) -> Self {
        self.schema_version = Some(schema_version.to_string());
        self
    }

    /// Emit the event on the audit target
    pub fn log(&self) {
        let payload = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!(target: "audit", "Failed to serialize audit event {}: {}", self.id, e);
                return;
            }
        };

        match self.severity {
            LogSeverity::Info => info!(target: "audit", "{}", payload),
            LogSeverity::Warning => warn!(target: "audit", "{}", payload),
            LogSeverity::Error => error!(target: "audit", "{}", payload),
        }
    }
}

/// Hex SHA-256 of a sample's canonical JSON serialization
pub fn input_digest(sample: &SampleInput) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(sample).unwrap_or_default());
    format!("{:x}", hasher.finalize())
}

/// Convenience function to log an audit event
pub fn log_event(event_type: AuditEventType, details: serde_json::Value) {
    AuditEvent::new(event_type, details).log();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenotypeCall;
    use std::collections::BTreeMap;

    fn sample(genotype: &str) -> SampleInput {
        SampleInput {
            sample_id: "s1".to_string(),
            genotype: vec![GenotypeCall::new("rs1", genotype)],
            survey: BTreeMap::new(),
            schema_version: None,
        }
    }

    #[test]
    fn test_audit_event_creation() {
        let event = AuditEvent::new(
            AuditEventType::InferenceCompleted,
            serde_json::json!({ "recommendations": 3 }),
        )
        .for_sample(&sample("AA"))
        .with_model("2026.09-linear")
        .with_schema("nutri-fs-1");

        assert_eq!(event.sample_id.as_deref(), Some("s1"));
        assert_eq!(event.model_version.as_deref(), Some("2026.09-linear"));
        assert_eq!(event.severity, LogSeverity::Info);
        assert_eq!(event.input_digest.as_ref().map(|d| d.len()), Some(64));
    }

    #[test]
    fn test_failure_event_severity() {
        let event = AuditEvent::new(AuditEventType::InferenceFailed, serde_json::json!({}));
        assert_eq!(event.severity, LogSeverity::Error);

        let event = AuditEvent::new(AuditEventType::BatchCancelled, serde_json::json!({}));
        assert_eq!(event.severity, LogSeverity::Warning);
    }

    #[test]
    fn test_input_digest_is_stable() {
        assert_eq!(input_digest(&sample("AA")), input_digest(&sample("AA")));
        assert_ne!(input_digest(&sample("AA")), input_digest(&sample("AG")));
    }
}
