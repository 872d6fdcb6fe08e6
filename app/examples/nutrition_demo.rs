// ==============================================================================
// nutrition_demo.rs - End-to-end Recommendation Example
// ==============================================================================
// Description: Demonstrates genotype parsing and inference on the bundled data
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use std::path::PathBuf;

use nutrigen_engine::config::EngineConfig;
use nutrigen_engine::genotype_converter::{parse_genotype, risk_dosage};
use nutrigen_engine::models::{Allele, SampleInput};
use nutrigen_engine::output::{render_result, OutputFormat};
use nutrigen_engine::parsers::AnnotationParser;
use nutrigen_engine::recommender::RecommendationCatalog;
use nutrigen_engine::registry::ModelRegistry;
use nutrigen_engine::survey::SurveySchema;
use nutrigen_engine::NutritionProcessor;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Nutrigen Recommendation Example ===\n");

    // Example 1: Genotype normalization
    println!("--- Example 1: Risk Allele Dosage ---");
    println!("{:<10} {:<6} {}", "Genotype", "Risk", "Dosage");
    println!("{:-<30}", "");

    for raw in ["CC", "c/t", "TT", "--", "C-"] {
        let dosage = risk_dosage(parse_genotype("rs5082", raw)?, Allele::C);
        let shown = dosage.map_or("None".to_string(), |d| d.copies().to_string());
        println!("{:<10} {:<6} {}", raw, "C", shown);
    }

    match parse_genotype("rs5082", "C1") {
        Ok(_) => println!("unexpected: C1 accepted"),
        Err(e) => println!("\nRejected: {}", e),
    }

    // Example 2: Full pipeline on the bundled data
    println!("\n--- Example 2: Inference ---");
    let data = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data");

    let processor = NutritionProcessor::new(
        AnnotationParser::load_store(data.join("annotations.csv"), None)?,
        ModelRegistry::load_dir(data.join("models"))?,
        SurveySchema::nutrition_default(),
        RecommendationCatalog::nutrition_default(),
        EngineConfig::load(data.join("engine_config.json"))?,
    )?;

    for info in processor.list_model_versions() {
        println!("Model {} ({})", info.version, info.trained_on);
    }

    let sample: SampleInput =
        serde_json::from_str(&std::fs::read_to_string(data.join("samples/sample_001.json"))?)?;
    let result = processor.run_inference(&sample, None)?;

    println!("\n{}", render_result(&result, OutputFormat::Text)?);

    Ok(())
}
