// ==============================================================================
// models.rs - Engine Data Models
// ==============================================================================
// Description: Data structures flowing through the genotype → recommendation pipeline
// Created: 2026-10-12
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{DataValidationError, EngineError, ErrorKind};
use crate::validator::sanitize_for_log;

/// Nucleotide from the standard four-letter alphabet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Allele {
    A,
    C,
    G,
    T,
}

impl Allele {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(Allele::A),
            'C' => Some(Allele::C),
            'G' => Some(Allele::G),
            'T' => Some(Allele::T),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Allele::A => 'A',
            Allele::C => 'C',
            Allele::G => 'G',
            Allele::T => 'T',
        }
    }
}

impl fmt::Display for Allele {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Trait association for a single variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantAnnotation {
    /// Normalized variant identifier (lowercase rsID, e.g. "rs1801133")
    pub variant_id: String,

    /// Gene symbol, if the source declares one (e.g. "MTHFR")
    pub gene: Option<String>,

    /// Trait/category tag this variant contributes to
    pub trait_tag: String,

    /// Allele counted towards the dosage
    pub risk_allele: Allele,

    /// Signed effect weight per risk-allele copy
    pub weight: f64,

    /// Population frequency of the risk allele, used for PRS standardization
    pub risk_allele_freq: Option<f64>,

    /// Version of the annotation source this row was loaded from
    pub source_version: String,
}

/// Raw genotype call as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenotypeCall {
    pub variant_id: String,

    /// Observed allele pair (e.g. "AG", "a/g", "--")
    pub genotype: String,
}

impl GenotypeCall {
    pub fn new(variant_id: impl Into<String>, genotype: impl Into<String>) -> Self {
        Self {
            variant_id: variant_id.into(),
            genotype: genotype.into(),
        }
    }
}

/// Count of risk-allele copies; always 0, 1 or 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Dosage(u8);

impl Dosage {
    pub fn new(copies: u8) -> Option<Self> {
        (copies <= 2).then_some(Self(copies))
    }

    pub fn copies(&self) -> u8 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.0)
    }
}

/// Dosage of one variant for one trait
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedDosage {
    pub variant_id: String,
    pub trait_tag: String,

    /// None when the call was missing
    pub dosage: Option<Dosage>,

    /// Effect weight copied from the matching annotation
    pub weight: f64,
}

/// Weighted contribution of one variant to a trait score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantContribution {
    pub variant_id: String,
    pub contribution: f64,
}

/// Per-trait aggregate risk feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFeature {
    pub trait_tag: String,

    /// Σ(dosage × weight) over variants with a readable call
    pub score: f64,

    pub contributions: Vec<VariantContribution>,

    /// observed_variants / expected_variants, in [0, 1]
    pub coverage: f64,

    pub observed_variants: usize,
    pub expected_variants: usize,

    /// Coverage too sparse for the trait to drive thresholding
    pub low_confidence: bool,
}

/// Encoded survey answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyFeature {
    pub name: String,
    pub value: f64,

    /// The raw answer was missing and the declared default was used
    pub imputed: bool,

    /// The raw answer was outside the declared range and was clamped
    pub clamped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureSource {
    Risk { trait_tag: String },
    Survey { field: String },
}

/// One named entry of a fused feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEntry {
    pub name: String,
    pub value: f64,
    pub source: FeatureSource,
    pub low_confidence: bool,
    pub imputed: bool,
}

/// Model-ready feature vector stamped with its layout version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_version: String,
    pub entries: Vec<FeatureEntry>,

    /// Risk features the entries were derived from, kept for explanations
    pub risk_features: Vec<RiskFeature>,
}

impl FeatureVector {
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.value).collect()
    }

    pub fn get(&self, name: &str) -> Option<&FeatureEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn risk_feature(&self, trait_tag: &str) -> Option<&RiskFeature> {
        self.risk_features.iter().find(|r| r.trait_tag == trait_tag)
    }
}

/// Raw score for one recommendation category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub category: String,
    pub raw_score: f64,
    pub model_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainedVariant {
    pub variant_id: String,
    pub trait_tag: String,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitCoverage {
    pub trait_tag: String,
    pub coverage: f64,
}

/// Structured explanation; rendering to text happens in `output`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub category: String,
    pub variants: Vec<ExplainedVariant>,
    pub low_coverage_traits: Vec<TraitCoverage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// 1-based position in the result
    pub rank: usize,
    pub category: String,
    pub detail: String,
    pub confidence: f64,
    pub explanation: Explanation,
}

/// Non-fatal notice that a trait was scored from a sparse variant panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowCoverageWarning {
    pub trait_tag: String,
    pub coverage: f64,
    pub min_coverage: f64,
}

/// Raw survey answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SurveyValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
    Missing,
}

/// Single-sample inference request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInput {
    pub sample_id: String,

    /// Genotype map; duplicate keys are preserved so they can be rejected
    #[serde(
        default,
        deserialize_with = "deserialize_genotype_calls",
        serialize_with = "serialize_genotype_calls"
    )]
    pub genotype: Vec<GenotypeCall>,

    #[serde(default)]
    pub survey: BTreeMap<String, SurveyValue>,

    /// Feature schema version the caller expects, if any
    #[serde(default, alias = "schemaVersion")]
    pub schema_version: Option<String>,
}

fn deserialize_genotype_calls<'de, D>(deserializer: D) -> Result<Vec<GenotypeCall>, D::Error>
where
    D: Deserializer<'de>,
{
    struct CallsVisitor;

    impl<'de> Visitor<'de> for CallsVisitor {
        type Value = Vec<GenotypeCall>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of variant id to genotype string")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut calls = Vec::with_capacity(map.size_hint().unwrap_or(0));
            // null is a no-call
            while let Some((variant_id, genotype)) = map.next_entry::<String, Option<String>>()? {
                let genotype = genotype.unwrap_or_else(|| "--".to_string());
                calls.push(GenotypeCall { variant_id, genotype });
            }
            Ok(calls)
        }
    }

    deserializer.deserialize_map(CallsVisitor)
}

fn serialize_genotype_calls<S>(calls: &[GenotypeCall], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(calls.iter().map(|c| (&c.variant_id, &c.genotype)))
}

/// One entry of a batch request file
///
/// Entries that do not decode as a sample are kept in position as a rejection
/// so the rest of the batch still runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchRequest {
    Sample(SampleInput),
    Rejected(SampleErrorRecord),
}

impl BatchRequest {
    pub fn sample_id(&self) -> &str {
        match self {
            BatchRequest::Sample(sample) => &sample.sample_id,
            BatchRequest::Rejected(error) => &error.sample_id,
        }
    }
}

/// Decode a JSON array of sample requests element by element
///
/// # Returns
/// * One `BatchRequest` per array element, in order. A malformed element becomes
///   `Rejected`, named by its `sample_id` when readable, else "sample[<index>]"
/// * `Err` only when the text is not a JSON array
pub fn decode_batch(text: &str) -> Result<Vec<BatchRequest>, serde_json::Error> {
    let values: Vec<serde_json::Value> = serde_json::from_str(text)?;

    Ok(values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let sample_id = value
                .get("sample_id")
                .and_then(serde_json::Value::as_str)
                .map(sanitize_for_log)
                .unwrap_or_else(|| format!("sample[{}]", index));

            match serde_json::from_value::<SampleInput>(value) {
                Ok(sample) => BatchRequest::Sample(sample),
                Err(e) => {
                    let error = EngineError::from(DataValidationError::InvalidRequest {
                        details: e.to_string(),
                    });
                    BatchRequest::Rejected(SampleErrorRecord::new(sample_id, &error))
                }
            }
        })
        .collect())
}

/// Inference result for one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub sample_id: String,
    pub model_version: String,
    pub calibration_version: String,
    pub feature_schema_version: String,

    /// Annotation source the whole run or batch was scored against
    pub annotation_version: String,

    pub recommendations: Vec<Recommendation>,

    /// Rendered explanation text, one line per recommendation
    pub explanations: String,

    pub warnings: Vec<LowCoverageWarning>,
}

/// Per-sample failure reported in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleErrorRecord {
    pub sample_id: String,
    pub kind: ErrorKind,

    /// Offending variant, survey field or feature, when known
    pub field: Option<String>,
    pub message: String,
}

impl SampleErrorRecord {
    pub fn new(sample_id: impl Into<String>, error: &EngineError) -> Self {
        let field = match error {
            EngineError::DataValidation(e) => Some(e.field()),
            EngineError::MissingFeature { feature } | EngineError::UnexpectedFeature { feature } => {
                Some(feature.clone())
            }
            EngineError::ModelUnavailable { version } => Some(version.clone()),
            EngineError::SchemaMismatch { .. } | EngineError::InvalidArtifact(_) => None,
        };

        Self {
            sample_id: sample_id.into(),
            kind: error.kind(),
            field,
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SampleOutcome {
    Completed { result: InferenceResult },
    Failed { error: SampleErrorRecord },
}

impl SampleOutcome {
    pub fn sample_id(&self) -> &str {
        match self {
            SampleOutcome::Completed { result } => &result.sample_id,
            SampleOutcome::Failed { error } => &error.sample_id,
        }
    }
}

/// Batch inference report
///
/// `outcomes` is ordered by input position; `cancelled` lists samples that
/// were not processed because the batch was cancelled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<SampleOutcome>,
    pub cancelled: Vec<String>,
}

impl BatchReport {
    pub fn completed(&self) -> impl Iterator<Item = &InferenceResult> {
        self.outcomes.iter().filter_map(|o| match o {
            SampleOutcome::Completed { result } => Some(result),
            SampleOutcome::Failed { .. } => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = &SampleErrorRecord> {
        self.outcomes.iter().filter_map(|o| match o {
            SampleOutcome::Failed { error } => Some(error),
            SampleOutcome::Completed { .. } => None,
        })
    }

    pub fn was_cancelled(&self) -> bool {
        !self.cancelled.is_empty()
    }
}
