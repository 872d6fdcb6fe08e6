// ==============================================================================
// output.rs - Result Rendering
// ==============================================================================
// Description: Renders explanations, inference results and batch reports
// Created: 2026-10-16
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

use crate::models::{BatchReport, Explanation, InferenceResult, Recommendation, SampleOutcome};
use crate::registry::ModelVersionInfo;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Pretty-printed JSON (best for programmatic consumers)
    Json,
    /// Human-readable text
    Text,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Text => "txt",
        }
    }
}

/// One explanation line, e.g.
/// `1. reduce_saturated_fat (0.820): rs5082 [fat_sensitivity] +0.900`
pub fn render_explanation(rank: usize, confidence: f64, explanation: &Explanation) -> String {
    let mut line = format!("{}. {} ({:.3}): ", rank, explanation.category, confidence);

    if explanation.variants.is_empty() {
        line.push_str("no contributing variants");
    } else {
        let variants: Vec<String> = explanation
            .variants
            .iter()
            .map(|v| format!("{} [{}] {:+.3}", v.variant_id, v.trait_tag, v.contribution))
            .collect();
        line.push_str(&variants.join(", "));
    }

    if !explanation.low_coverage_traits.is_empty() {
        let traits: Vec<String> = explanation
            .low_coverage_traits
            .iter()
            .map(|t| format!("{} ({:.2})", t.trait_tag, t.coverage))
            .collect();
        let _ = write!(line, "; insufficient variant coverage: {}", traits.join(", "));
    }

    line
}

/// Explanation text for a ranked list, one line per recommendation
pub fn render_explanations(recommendations: &[Recommendation]) -> String {
    recommendations
        .iter()
        .map(|r| render_explanation(r.rank, r.confidence, &r.explanation))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_result_text(result: &InferenceResult, out: &mut String) {
    let _ = writeln!(out, "Sample: {}", result.sample_id);
    let _ = writeln!(
        out,
        "Model: {} (calibration {}, feature schema {}, annotations {})",
        result.model_version,
        result.calibration_version,
        result.feature_schema_version,
        result.annotation_version
    );

    if result.recommendations.is_empty() {
        let _ = writeln!(out, "No recommendations above the confidence floor.");
    }
    for rec in &result.recommendations {
        let _ = writeln!(out, "  {}. {} ({:.3})", rec.rank, rec.detail, rec.confidence);
    }

    if !result.explanations.is_empty() {
        let _ = writeln!(out, "Why:");
        for line in result.explanations.lines() {
            let _ = writeln!(out, "  {}", line);
        }
    }

    for warning in &result.warnings {
        let _ = writeln!(
            out,
            "Warning: {} coverage {:.2} (minimum {:.2})",
            warning.trait_tag, warning.coverage, warning.min_coverage
        );
    }
}

pub fn render_result(result: &InferenceResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(result).context("Failed to serialize inference result")
        }
        OutputFormat::Text => {
            let mut out = String::new();
            render_result_text(result, &mut out);
            Ok(out)
        }
    }
}

pub fn render_batch(report: &BatchReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(report).context("Failed to serialize batch report")
        }
        OutputFormat::Text => {
            let mut out = String::new();
            for outcome in &report.outcomes {
                match outcome {
                    SampleOutcome::Completed { result } => {
                        render_result_text(result, &mut out);
                    }
                    SampleOutcome::Failed { error } => {
                        let _ = writeln!(out, "Sample: {}", error.sample_id);
                        let _ = writeln!(out, "  FAILED ({:?}): {}", error.kind, error.message);
                    }
                }
                out.push('\n');
            }
            let _ = writeln!(
                out,
                "{} completed, {} failed, {} cancelled",
                report.completed().count(),
                report.failed().count(),
                report.cancelled.len()
            );
            if report.was_cancelled() {
                let _ = writeln!(out, "Cancelled: {}", report.cancelled.join(", "));
            }
            Ok(out)
        }
    }
}

pub fn render_model_versions(versions: &[ModelVersionInfo], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(versions).context("Failed to serialize model versions")
        }
        OutputFormat::Text => Ok(versions
            .iter()
            .map(|v| format!("{}\t{}\t{}", v.version, v.created_at.to_rfc3339(), v.trained_on))
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

/// Write rendered output to a file, or stdout when no path is given
pub fn write_output(rendered: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write output to {:?}", path))?;
            info!("✓ Output written to {:?}", path);
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
