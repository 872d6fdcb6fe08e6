// ==============================================================================
// error.rs - Engine Error Taxonomy
// ==============================================================================
// Description: Typed errors surfaced by the inference pipeline
// Created: 2026-10-12
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input data that cannot be used as supplied
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataValidationError {
    #[error("Malformed genotype '{genotype}' for variant {variant_id} (expected two of A/C/G/T or a missing marker)")]
    MalformedAllele { variant_id: String, genotype: String },

    #[error("Duplicate genotype call for variant {variant_id}")]
    DuplicateCall { variant_id: String },

    #[error("Unknown survey field '{field}'")]
    UnknownSurveyField { field: String },

    #[error("Invalid value for survey field '{field}': {details}")]
    InvalidSurveyValue { field: String, details: String },

    #[error("Unknown level '{value}' for survey field '{field}'")]
    UnknownCategoryLevel { field: String, value: String },

    #[error("Invalid sample id '{0}' (expected 1-128 characters from [A-Za-z0-9_.-])")]
    InvalidSampleId(String),

    #[error("Too many genotype calls: {count} (max: {max})")]
    TooManyCalls { count: usize, max: usize },

    #[error("Unreadable sample request: {details}")]
    InvalidRequest { details: String },
}

impl DataValidationError {
    /// Identifier of the offending variant, field or sample
    pub fn field(&self) -> String {
        match self {
            DataValidationError::MalformedAllele { variant_id, .. }
            | DataValidationError::DuplicateCall { variant_id } => variant_id.clone(),
            DataValidationError::UnknownSurveyField { field }
            | DataValidationError::InvalidSurveyValue { field, .. }
            | DataValidationError::UnknownCategoryLevel { field, .. } => field.clone(),
            DataValidationError::InvalidSampleId(id) => id.clone(),
            DataValidationError::TooManyCalls { .. } => "genotype".to_string(),
            DataValidationError::InvalidRequest { .. } => "request".to_string(),
        }
    }
}

/// Errors returned by the engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Data validation failed: {0}")]
    DataValidation(#[from] DataValidationError),

    #[error("Schema mismatch: expected '{expected}', found '{found}'")]
    SchemaMismatch { expected: String, found: String },

    #[error("Schema mismatch: required feature '{feature}' is absent")]
    MissingFeature { feature: String },

    #[error("Schema mismatch: feature '{feature}' is not part of the schema")]
    UnexpectedFeature { feature: String },

    #[error("Model version '{version}' is not loaded")]
    ModelUnavailable { version: String },

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),
}

/// Error class reported in per-sample error records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DataValidation,
    SchemaMismatch,
    ModelUnavailable,
    InvalidArtifact,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::DataValidation(_) => ErrorKind::DataValidation,
            EngineError::SchemaMismatch { .. }
            | EngineError::MissingFeature { .. }
            | EngineError::UnexpectedFeature { .. } => ErrorKind::SchemaMismatch,
            EngineError::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            EngineError::InvalidArtifact(_) => ErrorKind::InvalidArtifact,
        }
    }
}
