// ==============================================================================
// lib.rs - Nutrigen Engine Library
// ==============================================================================
// Description: Genotype + survey feature engineering, model inference and
//              explainable recommendation ranking
// Created: 2026-10-12
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

pub mod annotation_store;
pub mod audit;
pub mod calibration;
pub mod config;
pub mod error;
pub mod fusion;
pub mod genotype_converter;
pub mod inference;
pub mod models;
pub mod output;
pub mod parsers;
pub mod processor;
pub mod recommender;
pub mod registry;
pub mod risk_features;
pub mod survey;
pub mod validator;

pub use error::{DataValidationError, EngineError, ErrorKind};
pub use processor::NutritionProcessor;
