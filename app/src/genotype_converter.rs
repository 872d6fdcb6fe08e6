// ==============================================================================
// genotype_converter.rs - Genotype to Risk Dosage Conversion
// ==============================================================================
// Description: Converts raw genotype calls to risk-allele dosages per annotated trait
// Created: 2026-10-12
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Algorithm:
//   Given the RISK allele from the annotation:
//   - neither allele is RISK (e.g., GG where RISK=A) → 0
//   - one allele is RISK (e.g., AG where RISK=A)     → 1
//   - both alleles are RISK (e.g., AA where RISK=A)  → 2
//   - --, 00, empty, or a half call like "A-"         → None (missing)
//   Anything else (e.g., "A1", "AGT", "DI") is a data validation error.
// ==============================================================================

use std::collections::HashSet;
use tracing::debug;

use crate::annotation_store::{normalize_variant_id, AnnotationStore};
use crate::error::DataValidationError;
use crate::models::{Allele, Dosage, GenotypeCall, NormalizedDosage, VariantAnnotation};

/// Validated genotype
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedGenotype {
    Called(Allele, Allele),
    Missing,
}

/// Parse a raw genotype string
///
/// Input is trimmed and upper-cased; `/` and `|` separators are dropped, so
/// "a/g", "A|G" and "AG" are the same call.
///
/// # Examples
/// ```
/// use nutrigen_engine::genotype_converter::{parse_genotype, ParsedGenotype};
/// use nutrigen_engine::models::Allele;
///
/// assert_eq!(parse_genotype("rs1", "a/g").unwrap(), ParsedGenotype::Called(Allele::A, Allele::G));
/// assert_eq!(parse_genotype("rs1", "--").unwrap(), ParsedGenotype::Missing);
/// assert!(parse_genotype("rs1", "A1").is_err());
/// ```
pub fn parse_genotype(variant_id: &str, raw: &str) -> Result<ParsedGenotype, DataValidationError> {
    let cleaned: Vec<char> = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '|'))
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let malformed = || DataValidationError::MalformedAllele {
        variant_id: variant_id.to_string(),
        genotype: raw.to_string(),
    };

    match cleaned.as_slice() {
        [] | ['-', '-'] | ['0', '0'] => Ok(ParsedGenotype::Missing),
        [first, second] => {
            let first = parse_allele(*first).ok_or_else(malformed)?;
            let second = parse_allele(*second).ok_or_else(malformed)?;
            match (first, second) {
                (Some(a), Some(b)) => Ok(ParsedGenotype::Called(a, b)),
                _ => Ok(ParsedGenotype::Missing),
            }
        }
        _ => Err(malformed()),
    }
}

/// `Some(None)` for the '-' missing marker, `None` for anything unreadable
fn parse_allele(c: char) -> Option<Option<Allele>> {
    if c == '-' {
        return Some(None);
    }
    Allele::from_char(c).map(Some)
}

/// Count risk-allele copies in a parsed genotype
pub fn risk_dosage(genotype: ParsedGenotype, risk_allele: Allele) -> Option<Dosage> {
    match genotype {
        ParsedGenotype::Called(a, b) => {
            let copies = u8::from(a == risk_allele) + u8::from(b == risk_allele);
            Dosage::new(copies)
        }
        ParsedGenotype::Missing => None,
    }
}

/// Normalize one call against its annotations
///
/// # Returns
/// * One `NormalizedDosage` per annotation (variant can feed several traits)
/// * Empty vector when the variant has no annotation
/// * `Err(DataValidationError::MalformedAllele)` - Unreadable genotype, even for
///   unannotated variants
pub fn normalize_call(
    call: &GenotypeCall,
    annotations: &[VariantAnnotation],
) -> Result<Vec<NormalizedDosage>, DataValidationError> {
    let variant_id = normalize_variant_id(&call.variant_id);
    let genotype = parse_genotype(&variant_id, &call.genotype)?;

    Ok(annotations
        .iter()
        .map(|annotation| NormalizedDosage {
            variant_id: variant_id.clone(),
            trait_tag: annotation.trait_tag.clone(),
            dosage: risk_dosage(genotype, annotation.risk_allele),
            weight: annotation.weight,
        })
        .collect())
}

/// Counters describing one sample's genotype input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizationStats {
    pub calls: usize,
    pub annotated: usize,
    pub unannotated: usize,
    pub missing: usize,
}

/// Normalize all calls of one sample
///
/// Fails fast on the first malformed genotype or duplicate variant.
pub fn normalize_calls(
    calls: &[GenotypeCall],
    store: &AnnotationStore,
) -> Result<(Vec<NormalizedDosage>, NormalizationStats), DataValidationError> {
    let mut seen: HashSet<String> = HashSet::with_capacity(calls.len());
    let mut dosages = Vec::new();
    let mut stats = NormalizationStats {
        calls: calls.len(),
        ..Default::default()
    };

    for call in calls {
        let variant_id = normalize_variant_id(&call.variant_id);
        if !seen.insert(variant_id.clone()) {
            return Err(DataValidationError::DuplicateCall { variant_id });
        }

        let annotations = store.lookup(&variant_id);
        let normalized = normalize_call(call, annotations)?;

        if annotations.is_empty() {
            stats.unannotated += 1;
        } else {
            stats.annotated += 1;
            if normalized.iter().all(|d| d.dosage.is_none()) {
                stats.missing += 1;
            }
        }
        dosages.extend(normalized);
    }

    debug!(
        "Normalized {} calls: {} annotated, {} unannotated, {} missing",
        stats.calls, stats.annotated, stats.unannotated, stats.missing
    );

    Ok((dosages, stats))
}
