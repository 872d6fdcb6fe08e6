// ==============================================================================
// calibration.rs - Score Calibration
// ==============================================================================
// Description: Versioned monotonic mapping from raw model scores to confidence
// Created: 2026-10-14
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Calibrations are fit offline and shipped inside the model artifact:
//   platt    → p = 1 / (1 + exp(-(a·x + b))), a > 0
//   isotonic → piecewise-linear interpolation over non-decreasing knots,
//              clamped to the first/last value outside the knot range
//   identity → x clamped to [0, 1]
// Every method is non-decreasing in x and returns a value in [0, 1].
// ==============================================================================

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CalibrationMethod {
    Identity,
    Platt { a: f64, b: f64 },
    Isotonic { thresholds: Vec<f64>, values: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub version: String,
    #[serde(flatten)]
    pub method: CalibrationMethod,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Calibration {
    pub fn identity(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            method: CalibrationMethod::Identity,
        }
    }

    pub fn platt(version: impl Into<String>, a: f64, b: f64) -> Self {
        Self {
            version: version.into(),
            method: CalibrationMethod::Platt { a, b },
        }
    }

    /// Check that the mapping is monotonic and well-formed
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |details: &str| {
            EngineError::InvalidArtifact(format!("calibration {}: {}", self.version, details))
        };

        if self.version.trim().is_empty() {
            return Err(invalid("empty version"));
        }

        match &self.method {
            CalibrationMethod::Identity => Ok(()),
            CalibrationMethod::Platt { a, b } => {
                if !a.is_finite() || !b.is_finite() {
                    return Err(invalid("non-finite Platt parameters"));
                }
                if *a <= 0.0 {
                    return Err(invalid("Platt slope must be positive"));
                }
                Ok(())
            }
            CalibrationMethod::Isotonic { thresholds, values } => {
                if thresholds.is_empty() || thresholds.len() != values.len() {
                    return Err(invalid("thresholds and values must be non-empty and of equal length"));
                }
                if thresholds.iter().chain(values).any(|x| !x.is_finite()) {
                    return Err(invalid("non-finite knot"));
                }
                if thresholds.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(invalid("thresholds must be strictly increasing"));
                }
                if values.windows(2).any(|w| w[0] > w[1]) {
                    return Err(invalid("values must be non-decreasing"));
                }
                if values.iter().any(|v| !(0.0..=1.0).contains(v)) {
                    return Err(invalid("values must lie in [0, 1]"));
                }
                Ok(())
            }
        }
    }

    /// Map a raw score to a confidence in [0, 1]
    pub fn apply(&self, raw: f64) -> f64 {
        if raw.is_nan() {
            return 0.0;
        }

        let calibrated = match &self.method {
            CalibrationMethod::Identity => raw,
            CalibrationMethod::Platt { a, b } => sigmoid(a * raw + b),
            CalibrationMethod::Isotonic { thresholds, values } => interpolate(thresholds, values, raw),
        };

        calibrated.clamp(0.0, 1.0)
    }
}

fn interpolate(thresholds: &[f64], values: &[f64], x: f64) -> f64 {
    let (Some(&first), Some(&last)) = (thresholds.first(), thresholds.last()) else {
        return x;
    };
    if x <= first {
        return values[0];
    }
    if x >= last {
        return values[values.len() - 1];
    }

    // First knot strictly above x; x lies in [thresholds[i-1], thresholds[i])
    let i = thresholds.partition_point(|&t| t <= x);
    let (x0, x1) = (thresholds[i - 1], thresholds[i]);
    let (y0, y1) = (values[i - 1], values[i]);
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}
