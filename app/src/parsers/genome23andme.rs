// ==============================================================================
// genome23andme.rs - 23andMe Raw Data Parser
// ==============================================================================
// Description: Parser for 23andMe raw genome files into genotype calls
// Created: 2026-10-15
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Format: Tab-delimited text with header comments
// Example:
//   # rsid    chromosome    position    genotype
//   rs5082    1    161193683    AA
//   rs7903146    10    114758349    CT
//   rs1801133    1    11856378    --
// Genotype strings are passed through untouched; validation happens during
// normalization so malformed alleles are reported with their variant id.
// ==============================================================================

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

use crate::models::GenotypeCall;

/// 23andMe genome record
#[derive(Debug, Clone, PartialEq)]
pub struct Genome23Record {
    /// SNP identifier (e.g., "rs5082")
    pub rsid: String,
    /// Chromosome ("1"-"22", "X", "Y", "MT")
    pub chromosome: String,
    /// Base pair position (GRCh37/hg19)
    pub position: u64,
    /// Two-letter genotype (e.g., "TT", "AG", "--" for no-call)
    pub genotype: String,
}

impl From<Genome23Record> for GenotypeCall {
    fn from(record: Genome23Record) -> Self {
        GenotypeCall::new(record.rsid, record.genotype)
    }
}

/// Parser for 23andMe raw genome files
#[derive(Debug, Clone, Default)]
pub struct Genome23Parser {
    /// Chromosomes to include; empty includes all
    pub include_chromosomes: Vec<String>,
}

/// Errors that can occur during 23andMe file parsing
#[derive(Error, Debug)]
pub enum Genome23ParseError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid line format at line {line}: {details}")]
    InvalidFormat { line: usize, details: String },

    #[error("Invalid position value at line {line}: {value}")]
    InvalidPosition { line: usize, value: String },

    #[error("File is empty or contains only comments")]
    EmptyFile,
}

impl Genome23Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser with specific chromosomes to include
    pub fn with_chromosomes(chromosomes: Vec<String>) -> Self {
        Self {
            include_chromosomes: chromosomes,
        }
    }

    /// Parse a 23andMe genome file
    ///
    /// Lines starting with '#' are comments. Records keep file order and
    /// duplicates, so repeated rsids surface as duplicate calls downstream.
    pub fn parse(&self, path: impl AsRef<Path>) -> Result<Vec<Genome23Record>, Genome23ParseError> {
        let file = File::open(path.as_ref())?;
        self.parse_reader(file)
    }

    pub fn parse_reader<R: Read>(&self, reader: R) -> Result<Vec<Genome23Record>, Genome23ParseError> {
        let reader = BufReader::new(reader);
        let mut records = Vec::new();

        for (index, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let trimmed = line.trim();
            if trimmed.starts_with('#') || trimmed.is_empty() {
                continue;
            }

            let record = self.parse_line(&line, index + 1)?;

            if !self.include_chromosomes.is_empty()
                && !self.include_chromosomes.contains(&record.chromosome)
            {
                continue;
            }

            records.push(record);
        }

        if records.is_empty() {
            return Err(Genome23ParseError::EmptyFile);
        }

        Ok(records)
    }

    /// Parse a file straight into genotype calls
    pub fn parse_calls(&self, path: impl AsRef<Path>) -> Result<Vec<GenotypeCall>, Genome23ParseError> {
        Ok(self.parse(path)?.into_iter().map(GenotypeCall::from).collect())
    }

    fn parse_line(&self, line: &str, line_number: usize) -> Result<Genome23Record, Genome23ParseError> {
        let fields: Vec<&str> = line.split('\t').collect();

        if fields.len() != 4 {
            return Err(Genome23ParseError::InvalidFormat {
                line: line_number,
                details: format!("Expected 4 tab-delimited fields, found {}", fields.len()),
            });
        }

        let rsid = fields[0].trim();
        if rsid.is_empty() {
            return Err(Genome23ParseError::InvalidFormat {
                line: line_number,
                details: "Empty rsid".to_string(),
            });
        }

        let position_str = fields[2].trim();
        let position = position_str
            .parse::<u64>()
            .map_err(|_| Genome23ParseError::InvalidPosition {
                line: line_number,
                value: position_str.to_string(),
            })?;

        Ok(Genome23Record {
            rsid: rsid.to_string(),
            chromosome: fields[1].trim().to_string(),
            position,
            genotype: fields[3].trim().to_string(),
        })
    }
}
