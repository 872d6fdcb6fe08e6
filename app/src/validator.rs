// ==============================================================================
// validator.rs - Input Validation
// ==============================================================================
// Description: Validates sample requests and raw genome files before inference
// Created: 2026-10-16
// Modified: 2026-10-18
// Version: 1.0.0
// Security: Allowlist-only sample ids, bounded genotype payloads
// ==============================================================================

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

use crate::config::DEFAULT_MAX_GENOTYPE_CALLS;
use crate::error::DataValidationError;
use crate::models::SampleInput;

const MAX_SAMPLE_ID_LEN: usize = 128;
const MAX_GENOME_FILE_SIZE: u64 = 100 * 1024 * 1024; // 100 MB

#[derive(Debug, Clone)]
pub struct SampleValidator {
    max_genotype_calls: usize,
}

impl Default for SampleValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_GENOTYPE_CALLS)
    }
}

impl SampleValidator {
    pub fn new(max_genotype_calls: usize) -> Self {
        Self { max_genotype_calls }
    }

    /// Check request-level limits; allele and survey content is checked by
    /// the normalizer and encoder
    pub fn validate_sample(&self, sample: &SampleInput) -> Result<(), DataValidationError> {
        validate_sample_id(&sample.sample_id)?;

        if sample.genotype.len() > self.max_genotype_calls {
            return Err(DataValidationError::TooManyCalls {
                count: sample.genotype.len(),
                max: self.max_genotype_calls,
            });
        }

        debug!(
            "Sample {} passed request validation ({} calls, {} survey answers)",
            sample.sample_id,
            sample.genotype.len(),
            sample.survey.len()
        );
        Ok(())
    }
}

/// Sample ids must be 1-128 characters from [A-Za-z0-9_.-]
pub fn validate_sample_id(sample_id: &str) -> Result<(), DataValidationError> {
    let valid = !sample_id.is_empty()
        && sample_id.len() <= MAX_SAMPLE_ID_LEN
        && sample_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(DataValidationError::InvalidSampleId(sanitize_for_log(sample_id)))
    }
}

/// Strip characters that could forge log lines, and bound the length
pub(crate) fn sanitize_for_log(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control())
        .take(MAX_SAMPLE_ID_LEN)
        .collect()
}

/// Check a raw 23andMe genome file before parsing
///
/// # Returns
/// * Hex SHA-256 of the file
pub fn validate_genome_file(path: &Path) -> Result<String> {
    info!("Validating genome file: {:?}", path);

    let metadata = std::fs::metadata(path).context("Failed to get file metadata")?;
    if metadata.len() > MAX_GENOME_FILE_SIZE {
        anyhow::bail!(
            "File too large: {} bytes (max: {} bytes)",
            metadata.len(),
            MAX_GENOME_FILE_SIZE
        );
    }

    validate_23andme_format(path)?;
    compute_sha256(path)
}

fn validate_23andme_format(path: &Path) -> Result<()> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line?;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        // First data line: rsid, chromosome, position, genotype
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() != 4 {
            anyhow::bail!(
                "Invalid 23andMe format: expected 4 columns, found {}",
                columns.len()
            );
        }
        return Ok(());
    }

    anyhow::bail!("Genome file contains no genotype rows")
}

fn compute_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
