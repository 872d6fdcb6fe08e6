// ==============================================================================
// main.rs - Nutrigen CLI Entry Point
// ==============================================================================
// Description: Command-line front end for single-sample and batch inference
// Created: 2026-10-12
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nutrigen_engine::config::EngineConfig;
use nutrigen_engine::models::{decode_batch, BatchRequest, SampleInput, SurveyValue};
use nutrigen_engine::output::{self, OutputFormat};
use nutrigen_engine::parsers::{AnnotationParser, Genome23Parser};
use nutrigen_engine::recommender::RecommendationCatalog;
use nutrigen_engine::registry::ModelRegistry;
use nutrigen_engine::survey::SurveySchema;
use nutrigen_engine::validator::validate_genome_file;
use nutrigen_engine::NutritionProcessor;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "NUTRIGEN_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run inference for one sample
    Infer {
        #[command(flatten)]
        engine: EngineArgs,

        /// Sample request JSON (sample_id, genotype, survey)
        #[arg(long, conflicts_with = "genome_file", required_unless_present = "genome_file")]
        sample: Option<PathBuf>,

        /// Raw 23andMe genome export
        #[arg(long, requires = "survey")]
        genome_file: Option<PathBuf>,

        /// Survey answers JSON object, used with --genome-file
        #[arg(long)]
        survey: Option<PathBuf>,

        /// Sample id used with --genome-file
        #[arg(long, default_value = "genome-sample")]
        sample_id: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Run inference for a JSON array of samples
    Batch {
        #[command(flatten)]
        engine: EngineArgs,

        /// JSON array of sample requests
        #[arg(long)]
        samples: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// List registered model versions
    Models {
        /// Directory of model artifacts
        #[arg(long, env = "NUTRIGEN_MODELS")]
        models: PathBuf,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Annotation table (.csv or .csv.gz)
    #[arg(long, env = "NUTRIGEN_ANNOTATIONS")]
    annotations: PathBuf,

    /// Overrides the table's source_version comment
    #[arg(long)]
    annotation_version: Option<String>,

    /// Directory of model artifacts
    #[arg(long, env = "NUTRIGEN_MODELS")]
    models: PathBuf,

    /// Engine config JSON
    #[arg(long, env = "NUTRIGEN_CONFIG")]
    config: Option<PathBuf>,

    /// Survey schema JSON (built-in nutrition schema if omitted)
    #[arg(long)]
    survey_schema: Option<PathBuf>,

    /// Recommendation catalog JSON (built-in nutrition catalog if omitted)
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[arg(long, env = "NUTRIGEN_MIN_COVERAGE")]
    min_coverage: Option<f64>,

    #[arg(long, env = "NUTRIGEN_CONFIDENCE_FLOOR")]
    confidence_floor: Option<f64>,

    #[arg(long, env = "NUTRIGEN_TOP_N_VARIANTS")]
    top_n_variants: Option<usize>,

    #[arg(long, env = "NUTRIGEN_WORKER_THREADS")]
    worker_threads: Option<usize>,

    #[arg(long, env = "NUTRIGEN_SCHEMA_TAG")]
    schema_tag: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Model version (default: configured default, else newest)
    #[arg(long)]
    model_version: Option<String>,

    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Write output here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

impl EngineArgs {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };

        if let Some(value) = self.min_coverage {
            config.min_coverage = value;
        }
        if let Some(value) = self.confidence_floor {
            config.confidence_floor = value;
        }
        if let Some(value) = self.top_n_variants {
            config.top_n_variants = value;
        }
        if let Some(value) = self.worker_threads {
            config.worker_threads = Some(value);
        }
        if let Some(value) = &self.schema_tag {
            config.schema_tag = Some(value.clone());
        }

        config.check()?;
        Ok(config)
    }

    fn build_processor(&self) -> Result<NutritionProcessor> {
        let config = self.engine_config()?;

        let store = AnnotationParser::load_store(&self.annotations, self.annotation_version.as_deref())
            .with_context(|| format!("Failed to load annotations from {:?}", self.annotations))?;
        let registry = ModelRegistry::load_dir(&self.models)?;

        let survey = match &self.survey_schema {
            Some(path) => SurveySchema::load(path)?,
            None => SurveySchema::nutrition_default(),
        };
        let catalog = match &self.catalog {
            Some(path) => RecommendationCatalog::load(path)?,
            None => RecommendationCatalog::nutrition_default(),
        };

        let processor = NutritionProcessor::new(store, registry, survey, catalog, config)?;
        info!("Feature schema: {}", processor.feature_schema()?.version());
        Ok(processor)
    }
}

async fn load_sample(path: &Path) -> Result<SampleInput> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read sample {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse sample {:?}", path))
}

/// Malformed entries come back as `BatchRequest::Rejected`; only a file that is
/// not a JSON array fails the whole load
async fn load_samples(path: &Path) -> Result<Vec<BatchRequest>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read samples {:?}", path))?;
    decode_batch(&text).with_context(|| format!("Failed to parse samples {:?}", path))
}

async fn load_survey(path: &Path) -> Result<BTreeMap<String, SurveyValue>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read survey {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse survey {:?}", path))
}

/// Cancel the token on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling remaining samples");
            token.cancel();
        }
    });
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "nutrigen_engine=info,nutrigen=info,audit=info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Infer {
            engine,
            sample,
            genome_file,
            survey,
            sample_id,
            run,
        } => {
            let processor = engine.build_processor()?;

            let input = match (sample, genome_file, survey) {
                (Some(path), _, _) => load_sample(&path).await?,
                (None, Some(genome), Some(survey)) => {
                    let digest = validate_genome_file(&genome)?;
                    info!("Genome file SHA-256: {}", digest);
                    let calls = Genome23Parser::new()
                        .parse_calls(&genome)
                        .with_context(|| format!("Failed to parse genome file {:?}", genome))?;
                    let survey = load_survey(&survey).await?;
                    processor.sample_from_genome(sample_id, calls, survey)
                }
                _ => anyhow::bail!("Either --sample or --genome-file with --survey is required"),
            };

            let result = processor.run_inference(&input, run.model_version.as_deref())?;
            let rendered = output::render_result(&result, run.format)?;
            output::write_output(&rendered, run.output.as_deref())?;
        }

        Command::Batch { engine, samples, run } => {
            let processor = Arc::new(engine.build_processor()?);
            let samples = load_samples(&samples).await?;
            let rejected = samples
                .iter()
                .filter(|r| matches!(r, BatchRequest::Rejected(_)))
                .count();
            info!("Loaded {} samples ({} unreadable)", samples.len(), rejected);

            let token = CancellationToken::new();
            cancel_on_ctrl_c(token.clone());

            let model_version = run.model_version.clone();
            let worker = Arc::clone(&processor);
            let report = tokio::task::spawn_blocking(move || {
                worker.run_batch_requests(&samples, model_version.as_deref(), &token)
            })
            .await
            .context("Batch worker panicked")?;

            let rendered = output::render_batch(&report, run.format)?;
            output::write_output(&rendered, run.output.as_deref())?;
        }

        Command::Models { models, format } => {
            let registry = ModelRegistry::load_dir(&models)?;
            let rendered = output::render_model_versions(&registry.list_model_versions(), format)?;
            output::write_output(&rendered, None)?;
        }
    }

    Ok(())
}
