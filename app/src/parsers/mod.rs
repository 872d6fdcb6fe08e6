// ==============================================================================
// parsers/mod.rs - File parser modules
// ==============================================================================
// Description: Parsers for annotation tables and raw genome exports
// Created: 2026-10-12
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

pub mod annotations;
pub mod genome23andme;

pub use annotations::{AnnotationParseError, AnnotationParser, AnnotationTable};
pub use genome23andme::{Genome23ParseError, Genome23Parser, Genome23Record};
