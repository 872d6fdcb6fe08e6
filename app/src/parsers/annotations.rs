// ==============================================================================
// annotations.rs - Variant Annotation Table Parser
// ==============================================================================
// Description: Parser for versioned variant → trait annotation tables
// Created: 2026-10-15
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Format: CSV with a version comment and header, optionally gzip-compressed
// Example:
//   # source_version=nutri-annot-2026.09
//   rsid,gene,trait,risk_allele,weight,risk_allele_freq
//   rs5082,APOA2,fat_sensitivity,A,0.45,0.38
//   rs7903146,TCF7L2,carb_tolerance,T,0.35,
// gene and risk_allele_freq may be empty.
// ==============================================================================

use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::annotation_store::{normalize_variant_id, AnnotationStore};
use crate::error::EngineError;
use crate::models::{Allele, VariantAnnotation};

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];
const VERSION_KEY: &str = "source_version=";

/// Errors that can occur during annotation table parsing
#[derive(Error, Debug)]
pub enum AnnotationParseError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("File has a .gz extension but is not gzip-compressed")]
    NotGzip,

    #[error("Invalid annotation at line {line}: {details}")]
    InvalidRow { line: u64, details: String },

    #[error("No source version: add a '# source_version=<tag>' line or pass one explicitly")]
    MissingSourceVersion,

    #[error("File is empty or contains no annotations")]
    EmptyFile,

    #[error("Invalid annotation table: {0}")]
    InvalidTable(#[from] EngineError),
}

#[derive(Debug, Deserialize)]
struct AnnotationRow {
    rsid: String,
    gene: Option<String>,
    #[serde(rename = "trait")]
    trait_tag: String,
    risk_allele: String,
    weight: f64,
    risk_allele_freq: Option<f64>,
}

/// Parsed annotation table
#[derive(Debug, Clone)]
pub struct AnnotationTable {
    pub source_version: String,
    pub annotations: Vec<VariantAnnotation>,
}

impl AnnotationTable {
    pub fn into_store(self) -> Result<AnnotationStore, EngineError> {
        AnnotationStore::new(self.source_version, self.annotations)
    }
}

pub struct AnnotationParser;

impl AnnotationParser {
    /// Parse an annotation table
    ///
    /// # Arguments
    /// * `path` - `.csv` or `.csv.gz` file
    /// * `source_version` - Overrides the version comment in the file
    ///
    /// # Returns
    /// * `Err(AnnotationParseError::NotGzip)` - `.gz` file without the gzip magic number
    /// * `Err(AnnotationParseError::InvalidRow)` - Bad allele, non-finite weight,
    ///   frequency outside (0, 1) or duplicate (rsid, trait), with its line number
    pub fn parse(
        path: impl AsRef<Path>,
        source_version: Option<&str>,
    ) -> Result<AnnotationTable, AnnotationParseError> {
        let path = path.as_ref();
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;

        let is_gz = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));

        let text = if is_gz {
            if !bytes.starts_with(&GZIP_MAGIC) {
                return Err(AnnotationParseError::NotGzip);
            }
            let mut text = String::new();
            GzDecoder::new(bytes.as_slice()).read_to_string(&mut text)?;
            text
        } else {
            String::from_utf8(bytes).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e)
            })?
        };

        Self::parse_str(&text, source_version)
    }

    /// Parse annotation CSV text
    pub fn parse_str(
        text: &str,
        source_version: Option<&str>,
    ) -> Result<AnnotationTable, AnnotationParseError> {
        let declared = text
            .lines()
            .map(str::trim)
            .take_while(|line| line.is_empty() || line.starts_with('#'))
            .find_map(|line| {
                let comment = line.trim_start_matches('#').trim();
                comment.strip_prefix(VERSION_KEY).map(|v| v.trim().to_string())
            });

        let source_version = source_version
            .map(str::to_string)
            .or(declared)
            .filter(|v| !v.is_empty())
            .ok_or(AnnotationParseError::MissingSourceVersion)?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let headers = reader.headers()?.clone();

        let mut annotations = Vec::new();
        let mut first_seen: HashMap<(String, String), u64> = HashMap::new();

        for result in reader.records() {
            let record = result?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let invalid = |details: String| AnnotationParseError::InvalidRow { line, details };

            let row: AnnotationRow = record
                .deserialize(Some(&headers))
                .map_err(|e| invalid(e.to_string()))?;

            let risk_allele = parse_risk_allele(&row.risk_allele)
                .ok_or_else(|| invalid(format!("risk allele '{}' is not one of A/C/G/T", row.risk_allele)))?;

            if !row.weight.is_finite() {
                return Err(invalid(format!("non-finite weight {}", row.weight)));
            }
            if let Some(freq) = row.risk_allele_freq {
                if !(freq > 0.0 && freq < 1.0) {
                    return Err(invalid(format!("risk allele frequency {} outside (0, 1)", freq)));
                }
            }

            let variant_id = normalize_variant_id(&row.rsid);
            if variant_id.is_empty() || row.trait_tag.is_empty() {
                return Err(invalid("empty rsid or trait".to_string()));
            }

            let key = (variant_id.clone(), row.trait_tag.clone());
            if let Some(previous) = first_seen.insert(key, line) {
                return Err(invalid(format!(
                    "duplicate annotation for {} / {} (first seen at line {})",
                    variant_id, row.trait_tag, previous
                )));
            }

            annotations.push(VariantAnnotation {
                variant_id,
                gene: row.gene.filter(|g| !g.is_empty()),
                trait_tag: row.trait_tag,
                risk_allele,
                weight: row.weight,
                risk_allele_freq: row.risk_allele_freq,
                source_version: source_version.clone(),
            });
        }

        if annotations.is_empty() {
            return Err(AnnotationParseError::EmptyFile);
        }

        debug!(
            "Parsed {} annotations (source {})",
            annotations.len(),
            source_version
        );

        Ok(AnnotationTable {
            source_version,
            annotations,
        })
    }

    /// Parse and index in one step
    pub fn load_store(
        path: impl AsRef<Path>,
        source_version: Option<&str>,
    ) -> Result<AnnotationStore, AnnotationParseError> {
        Ok(Self::parse(path, source_version)?.into_store()?)
    }
}

fn parse_risk_allele(raw: &str) -> Option<Allele> {
    let mut chars = raw.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Allele::from_char(c),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::Builder;

    const TABLE: &str = "\
# source_version=nutri-annot-test
rsid,gene,trait,risk_allele,weight,risk_allele_freq
rs5082,APOA2,fat_sensitivity,A,0.45,0.38
RS7903146,TCF7L2,carb_tolerance,t,0.35,
rs9939609,,carb_tolerance,A,0.20,0.42
";

    #[test]
    fn test_parse_table() {
        let table = AnnotationParser::parse_str(TABLE, None).unwrap();

        assert_eq!(table.source_version, "nutri-annot-test");
        assert_eq!(table.annotations.len(), 3);

        let tcf = &table.annotations[1];
        assert_eq!(tcf.variant_id, "rs7903146");
        assert_eq!(tcf.risk_allele, Allele::T);
        assert_eq!(tcf.gene.as_deref(), Some("TCF7L2"));
        assert_eq!(tcf.risk_allele_freq, None);
        assert_eq!(table.annotations[2].gene, None);
    }

    #[test]
    fn test_explicit_version_overrides_comment() {
        let table = AnnotationParser::parse_str(TABLE, Some("override-1")).unwrap();
        assert_eq!(table.source_version, "override-1");
        assert!(table.annotations.iter().all(|a| a.source_version == "override-1"));
    }

    #[test]
    fn test_missing_version() {
        let text = "rsid,gene,trait,risk_allele,weight,risk_allele_freq\nrs1,,t,A,0.1,\n";
        let result = AnnotationParser::parse_str(text, None);
        assert!(matches!(result, Err(AnnotationParseError::MissingSourceVersion)));
    }

    #[test]
    fn test_invalid_rows_report_line() {
        let header = "rsid,gene,trait,risk_allele,weight,risk_allele_freq\n";
        let parse = |rows: &str| AnnotationParser::parse_str(&format!("{}{}", header, rows), Some("x"));

        let result = parse("rs1,,t,AG,0.1,\n");
        assert!(matches!(result, Err(AnnotationParseError::InvalidRow { line: 2, .. })));

        let result = parse("rs1,,t,A,0.1,\nRS1,,t,G,0.2,\n");
        assert!(matches!(result, Err(AnnotationParseError::InvalidRow { line: 3, .. })));

        let result = parse("rs1,,t,A,0.1,1.5\n");
        assert!(matches!(result, Err(AnnotationParseError::InvalidRow { line: 2, .. })));

        let result = parse("rs1,,t,A,heavy,\n");
        assert!(matches!(result, Err(AnnotationParseError::InvalidRow { line: 2, .. })));
    }

    #[test]
    fn test_parse_gzip_file() {
        let mut file = Builder::new().suffix(".csv.gz").tempfile().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(TABLE.as_bytes()).unwrap();
        file.write_all(&encoder.finish().unwrap()).unwrap();
        file.flush().unwrap();

        let store = AnnotationParser::load_store(file.path(), None).unwrap();
        assert_eq!(store.source_version(), "nutri-annot-test");
        assert_eq!(store.traits(), vec!["carb_tolerance", "fat_sensitivity"]);
    }

    #[test]
    fn test_fake_gzip_rejected() {
        let mut file = Builder::new().suffix(".csv.gz").tempfile().unwrap();
        file.write_all(TABLE.as_bytes()).unwrap();
        file.flush().unwrap();

        let result = AnnotationParser::parse(file.path(), None);
        assert!(matches!(result, Err(AnnotationParseError::NotGzip)));
    }
}
