// ==============================================================================
// processor.rs - Inference Pipeline
// ==============================================================================
// Description: Runs genotype + survey samples through feature building, scoring
//              and recommendation, singly or as a cancellable parallel batch
// Created: 2026-10-16
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Pipeline per sample:
//   validate → normalize genotypes → risk features → encode survey
//   → fuse (schema check) → score → calibrate, rank, explain
// Every step is a pure function of the sample and the shared read-only state,
// so samples in a batch are processed independently.
// ==============================================================================

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::annotation_store::{AnnotationHandle, AnnotationStore};
use crate::audit::{log_event, AuditEvent, AuditEventType};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::fusion::FeatureSchema;
use crate::genotype_converter::normalize_calls;
use crate::inference::{self, InferenceEngine, ScoringModel};
use crate::models::{
    BatchReport, BatchRequest, FeatureVector, GenotypeCall, InferenceResult, LowCoverageWarning, SampleErrorRecord,
    SampleInput, SampleOutcome, SurveyValue,
};
use crate::output::render_explanations;
use crate::recommender::{aggregate, RecommendationCatalog};
use crate::registry::{ModelRegistry, ModelVersionInfo};
use crate::risk_features::RiskFeatureBuilder;
use crate::survey::SurveySchema;
use crate::validator::SampleValidator;

/// Shared, read-only inference state plus the batch worker pool
pub struct NutritionProcessor {
    annotations: AnnotationHandle,
    survey: Arc<SurveySchema>,
    catalog: Arc<RecommendationCatalog>,
    engine: InferenceEngine,
    config: EngineConfig,
    validator: SampleValidator,
    pool: Arc<rayon::ThreadPool>,

    /// Layout fingerprint the explicit schema tag was issued for
    pinned_layout: Option<String>,
}

/// Annotation store and derived layout shared by every sample of one run or batch
struct PipelineSnapshot {
    store: Arc<AnnotationStore>,
    schema: FeatureSchema,
}

#[derive(Clone, Copy)]
enum BatchItem<'a> {
    Sample(&'a SampleInput),
    Rejected(&'a SampleErrorRecord),
}

impl BatchItem<'_> {
    fn sample_id(&self) -> &str {
        match self {
            BatchItem::Sample(sample) => &sample.sample_id,
            BatchItem::Rejected(error) => &error.sample_id,
        }
    }
}

impl NutritionProcessor {
    pub fn new(
        store: AnnotationStore,
        registry: ModelRegistry,
        survey: SurveySchema,
        catalog: RecommendationCatalog,
        config: EngineConfig,
    ) -> Result<Self> {
        config.check()?;

        if let Some(version) = &config.default_model_version {
            registry
                .get(version)
                .with_context(|| format!("Configured default model {} is not loaded", version))?;
        }

        let pinned_layout = match config.schema_tag.as_deref() {
            Some(tag) => {
                let schema = FeatureSchema::derive(&store, &survey, Some(tag))?;
                info!("Schema tag {} pinned to layout {}", tag, schema.fingerprint());
                Some(schema.fingerprint().to_string())
            }
            None => None,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.unwrap_or(0))
            .thread_name(|i| format!("nutrigen-worker-{}", i))
            .build()
            .context("Failed to build inference worker pool")?;

        info!(
            "Inference engine ready: annotations {} ({} traits), {} model(s), survey {}, {} worker threads",
            store.source_version(),
            store.traits().len(),
            registry.len(),
            survey.version(),
            pool.current_num_threads()
        );

        Ok(Self {
            annotations: AnnotationHandle::new(store),
            survey: Arc::new(survey),
            catalog: Arc::new(catalog),
            engine: InferenceEngine::new(Arc::new(registry)),
            validator: SampleValidator::new(config.max_genotype_calls),
            config,
            pool: Arc::new(pool),
            pinned_layout,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn annotations(&self) -> Arc<AnnotationStore> {
        self.annotations.snapshot()
    }

    /// Replace the annotation store; runs already in flight keep their snapshot
    ///
    /// # Returns
    /// * The previous store
    /// * `Err(EngineError::SchemaMismatch)` - An explicit schema tag is configured
    ///   and the new store changes the layout behind it (trait set or scaling).
    ///   The current store stays in place.
    pub fn refresh_annotations(&self, store: AnnotationStore) -> Result<Arc<AnnotationStore>, EngineError> {
        if let Err(e) = self.derive_schema(&store) {
            warn!(
                "Refusing annotation source {}: {}",
                store.source_version(),
                e
            );
            return Err(e);
        }

        let next_version = store.source_version().to_string();
        let previous = self.annotations.swap(store);

        AuditEvent::new(
            AuditEventType::AnnotationsSwapped,
            serde_json::json!({
                "previous_source_version": previous.source_version(),
                "source_version": next_version,
            }),
        )
        .log();
        info!(
            "Annotation source swapped: {} → {}",
            previous.source_version(),
            next_version
        );

        Ok(previous)
    }

    /// Feature layout for the current annotation store and survey schema
    pub fn feature_schema(&self) -> Result<FeatureSchema, EngineError> {
        self.derive_schema(&self.annotations.snapshot())
    }

    /// Derive the layout, holding an explicit tag to the layout it was issued for
    fn derive_schema(&self, store: &AnnotationStore) -> Result<FeatureSchema, EngineError> {
        let schema = FeatureSchema::derive(store, &self.survey, self.config.schema_tag.as_deref())?;

        if let Some(pinned) = &self.pinned_layout {
            if pinned != schema.fingerprint() {
                return Err(EngineError::SchemaMismatch {
                    expected: format!("{} (layout {})", schema.version(), pinned),
                    found: format!("{} (layout {})", schema.version(), schema.fingerprint()),
                });
            }
        }

        Ok(schema)
    }

    fn snapshot(&self) -> Result<PipelineSnapshot, EngineError> {
        let store = self.annotations.snapshot();
        let schema = self.derive_schema(&store)?;
        Ok(PipelineSnapshot { store, schema })
    }

    pub fn list_model_versions(&self) -> Vec<ModelVersionInfo> {
        self.engine.registry().list_model_versions()
    }

    /// Requested version, else the configured default, else the newest model
    pub fn resolve_model_version(&self, requested: Option<&str>) -> Result<String, EngineError> {
        let version = requested
            .or(self.config.default_model_version.as_deref())
            .or_else(|| self.engine.registry().latest_version())
            .ok_or_else(|| EngineError::ModelUnavailable {
                version: "<none registered>".to_string(),
            })?;

        self.engine.registry().get(version)?;
        Ok(version.to_string())
    }

    /// Resolve the model and take the annotation snapshot for one run
    fn prepare(
        &self,
        model_version: Option<&str>,
    ) -> Result<(Arc<dyn ScoringModel>, PipelineSnapshot), EngineError> {
        let version = self.resolve_model_version(model_version)?;
        let model = self.engine.registry().get(&version)?;
        Ok((model, self.snapshot()?))
    }

    /// Build a sample from a full raw genome, keeping only annotated variants
    pub fn sample_from_genome(
        &self,
        sample_id: impl Into<String>,
        calls: Vec<GenotypeCall>,
        survey: BTreeMap<String, SurveyValue>,
    ) -> SampleInput {
        let store = self.annotations.snapshot();
        let total = calls.len();
        let genotype: Vec<GenotypeCall> = calls
            .into_iter()
            .filter(|call| store.contains(&call.variant_id))
            .collect();

        info!(
            "Kept {} of {} genome calls matching annotated variants",
            genotype.len(),
            total
        );

        SampleInput {
            sample_id: sample_id.into(),
            genotype,
            survey,
            schema_version: None,
        }
    }

    /// Validate, normalize, encode and fuse one sample
    ///
    /// # Returns
    /// * The fused vector and any low-coverage warnings
    /// * `Err(EngineError::DataValidation)` - Bad sample id, allele, duplicate or survey answer
    /// * `Err(EngineError::SchemaMismatch)` - The sample names a schema version other
    ///   than the current layout's, or the current store no longer matches the
    ///   layout pinned to the schema tag
    pub fn build_feature_vector(
        &self,
        sample: &SampleInput,
    ) -> Result<(FeatureVector, Vec<LowCoverageWarning>), EngineError> {
        self.build_with(&self.snapshot()?, sample)
    }

    fn build_with(
        &self,
        snapshot: &PipelineSnapshot,
        sample: &SampleInput,
    ) -> Result<(FeatureVector, Vec<LowCoverageWarning>), EngineError> {
        self.validator.validate_sample(sample)?;
        let PipelineSnapshot { store, schema } = snapshot;

        if let Some(requested) = &sample.schema_version {
            if requested != schema.version() {
                return Err(EngineError::SchemaMismatch {
                    expected: requested.clone(),
                    found: schema.version().to_string(),
                });
            }
        }

        let (dosages, stats) = normalize_calls(&sample.genotype, store)?;
        debug!(
            "Sample {}: {} annotated calls ({} missing), {} unannotated ignored",
            sample.sample_id, stats.annotated, stats.missing, stats.unannotated
        );

        let (risk, warnings) = RiskFeatureBuilder::new(self.config.min_coverage).build(store, &dosages);
        let survey = self.survey.encode(&sample.survey)?;

        let vector = schema.fuse(risk, survey)?;
        Ok((vector, warnings))
    }

    /// Single-sample inference
    ///
    /// Deterministic: identical input and model version give an identical result.
    pub fn run_inference(
        &self,
        sample: &SampleInput,
        model_version: Option<&str>,
    ) -> Result<InferenceResult, EngineError> {
        match self.prepare(model_version) {
            Ok((model, snapshot)) => self.audited_inference(&snapshot, sample, &model),
            Err(e) => {
                AuditEvent::new(AuditEventType::InferenceFailed, serde_json::json!({ "error": e.to_string() }))
                    .for_sample(sample)
                    .log();
                Err(e)
            }
        }
    }

    fn audited_inference(
        &self,
        snapshot: &PipelineSnapshot,
        sample: &SampleInput,
        model: &Arc<dyn ScoringModel>,
    ) -> Result<InferenceResult, EngineError> {
        let version = model.descriptor().version.clone();
        AuditEvent::new(
            AuditEventType::InferenceStarted,
            serde_json::json!({ "annotation_version": snapshot.store.source_version() }),
        )
        .for_sample(sample)
        .with_model(&version)
        .log();

        match self.infer_sample(snapshot, sample, model.as_ref()) {
            Ok(result) => {
                AuditEvent::new(
                    AuditEventType::InferenceCompleted,
                    serde_json::json!({
                        "recommendations": result.recommendations.len(),
                        "warnings": result.warnings.len(),
                    }),
                )
                .for_sample(sample)
                .with_model(&version)
                .with_schema(&result.feature_schema_version)
                .log();
                Ok(result)
            }
            Err(e) => {
                AuditEvent::new(
                    AuditEventType::InferenceFailed,
                    serde_json::json!({ "kind": e.kind(), "error": e.to_string() }),
                )
                .for_sample(sample)
                .with_model(&version)
                .log();
                Err(e)
            }
        }
    }

    fn infer_sample(
        &self,
        snapshot: &PipelineSnapshot,
        sample: &SampleInput,
        model: &dyn ScoringModel,
    ) -> Result<InferenceResult, EngineError> {
        let (vector, warnings) = self.build_with(snapshot, sample)?;
        let outputs = inference::score(model, &vector)?;

        let recommendations = aggregate(
            &outputs,
            model.calibration(),
            &vector,
            &self.catalog,
            &self.config.aggregator_settings(),
        );

        debug!(
            "Sample {}: {} of {} categories recommended",
            sample.sample_id,
            recommendations.len(),
            outputs.len()
        );

        Ok(InferenceResult {
            sample_id: sample.sample_id.clone(),
            model_version: model.descriptor().version.clone(),
            calibration_version: model.calibration().version.clone(),
            feature_schema_version: vector.schema_version.clone(),
            annotation_version: snapshot.store.source_version().to_string(),
            explanations: render_explanations(&recommendations),
            recommendations,
            warnings,
        })
    }

    /// Batch inference on the worker pool
    ///
    /// The model and annotation snapshot are fixed once at batch start, so a
    /// refresh mid-batch never mixes annotation sources. One sample's failure
    /// never affects its siblings. Cancellation is checked before each sample;
    /// samples not started are listed in `cancelled`.
    pub fn run_batch_inference(
        &self,
        samples: &[SampleInput],
        model_version: Option<&str>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let items: Vec<BatchItem<'_>> = samples.iter().map(BatchItem::Sample).collect();
        self.run_batch(&items, model_version, cancel)
    }

    /// Batch inference over decoded request entries
    ///
    /// Entries rejected at decode time are reported as failed in their position.
    pub fn run_batch_requests(
        &self,
        requests: &[BatchRequest],
        model_version: Option<&str>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let items: Vec<BatchItem<'_>> = requests
            .iter()
            .map(|request| match request {
                BatchRequest::Sample(sample) => BatchItem::Sample(sample),
                BatchRequest::Rejected(error) => BatchItem::Rejected(error),
            })
            .collect();
        self.run_batch(&items, model_version, cancel)
    }

    fn run_batch(
        &self,
        items: &[BatchItem<'_>],
        model_version: Option<&str>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        info!("Starting batch inference: {} samples", items.len());

        let prepared = self.prepare(model_version);
        if let Ok((model, snapshot)) = &prepared {
            info!(
                "Batch pinned to model {}, annotations {}, feature schema {}",
                model.descriptor().version,
                snapshot.store.source_version(),
                snapshot.schema.version()
            );
        }

        let results: Vec<Option<SampleOutcome>> = self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let result = match (item, &prepared) {
                        (BatchItem::Rejected(error), _) => {
                            AuditEvent::new(
                                AuditEventType::InferenceFailed,
                                serde_json::json!({ "kind": error.kind, "error": error.message }),
                            )
                            .for_sample_id(&error.sample_id)
                            .log();
                            return Some(SampleOutcome::Failed {
                                error: (*error).clone(),
                            });
                        }
                        (BatchItem::Sample(sample), Ok((model, snapshot))) => {
                            self.audited_inference(snapshot, sample, model)
                        }
                        (BatchItem::Sample(_), Err(e)) => Err(e.clone()),
                    };
                    Some(match result {
                        Ok(result) => SampleOutcome::Completed { result },
                        Err(e) => SampleOutcome::Failed {
                            error: SampleErrorRecord::new(item.sample_id(), &e),
                        },
                    })
                })
                .collect()
        });

        let mut report = BatchReport::default();
        for (item, outcome) in items.iter().zip(results) {
            match outcome {
                Some(outcome) => report.outcomes.push(outcome),
                None => report.cancelled.push(item.sample_id().to_string()),
            }
        }

        let completed = report.completed().count();
        let failed = report.failed().count();
        let details = serde_json::json!({
            "samples": items.len(),
            "completed": completed,
            "failed": failed,
            "cancelled": report.cancelled.len(),
        });

        if report.was_cancelled() {
            warn!(
                "Batch cancelled: {} completed, {} failed, {} not processed",
                completed,
                failed,
                report.cancelled.len()
            );
            log_event(AuditEventType::BatchCancelled, details);
        } else {
            info!("Batch complete: {} completed, {} failed", completed, failed);
            log_event(AuditEventType::BatchCompleted, details);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Calibration;
    use crate::error::{DataValidationError, ErrorKind};
    use crate::inference::tests::descriptor;
    use crate::inference::{CategoryWeights, LinearModel};
    use crate::models::{decode_batch, Allele, VariantAnnotation};
    use crate::survey::SurveyField;
    use std::fmt;
    use std::sync::{Once, OnceLock, Weak};

    fn annotation(variant_id: &str, trait_tag: &str, risk: Allele, weight: f64) -> VariantAnnotation {
        VariantAnnotation {
            variant_id: variant_id.to_string(),
            gene: None,
            trait_tag: trait_tag.to_string(),
            risk_allele: risk,
            weight,
            risk_allele_freq: None,
            source_version: String::new(),
        }
    }

    fn store() -> AnnotationStore {
        AnnotationStore::new(
            "annot-1",
            vec![
                annotation("rs1", "fat_sensitivity", Allele::A, 0.5),
                annotation("rs2", "fat_sensitivity", Allele::G, 0.25),
            ],
        )
        .unwrap()
    }

    fn survey() -> SurveySchema {
        SurveySchema::new("mini-1", vec![SurveyField::continuous("age", 18.0, 100.0, 35.0)]).unwrap()
    }

    fn model(version: &str, schema: &str) -> LinearModel {
        LinearModel {
            descriptor: descriptor(version, schema),
            feature_names: vec!["prs:fat_sensitivity".to_string(), "survey:age".to_string()],
            calibration: Calibration::identity("id-1"),
            categories: vec![
                CategoryWeights {
                    category: "reduce_saturated_fat".to_string(),
                    bias: 0.2,
                    weights: vec![0.5, 0.0],
                },
                CategoryWeights {
                    category: "limit_caffeine".to_string(),
                    bias: 0.55,
                    weights: vec![0.0, 0.0],
                },
            ],
        }
    }

    fn processor(config: EngineConfig) -> NutritionProcessor {
        let mut registry = ModelRegistry::new();
        registry.register(Arc::new(model("m1", "fs-test"))).unwrap();
        registry.register(Arc::new(model("m2", "other-schema"))).unwrap();

        NutritionProcessor::new(
            store(),
            registry,
            survey(),
            RecommendationCatalog::nutrition_default(),
            EngineConfig {
                schema_tag: Some("fs-test".to_string()),
                worker_threads: Some(2),
                ..config
            },
        )
        .unwrap()
    }

    /// Runs `hook` once, on the first predict call, then scores as `inner`
    struct HookedModel {
        inner: LinearModel,
        fired: Once,
        hook: Box<dyn Fn() + Send + Sync>,
    }

    impl fmt::Debug for HookedModel {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("HookedModel").field("inner", &self.inner).finish_non_exhaustive()
        }
    }

    impl ScoringModel for HookedModel {
        fn descriptor(&self) -> &crate::inference::ModelDescriptor {
            self.inner.descriptor()
        }

        fn calibration(&self) -> &Calibration {
            self.inner.calibration()
        }

        fn categories(&self) -> Vec<String> {
            self.inner.categories()
        }

        fn backend_type(&self) -> &str {
            self.inner.backend_type()
        }

        fn predict(&self, input: &crate::inference::ModelInput) -> Result<Vec<(String, f64)>, EngineError> {
            self.fired.call_once(|| (self.hook)());
            self.inner.predict(input)
        }
    }

    /// Single worker thread, so batch samples run in input order
    fn hooked_processor(hook: impl Fn() + Send + Sync + 'static) -> NutritionProcessor {
        let mut registry = ModelRegistry::new();
        registry
            .register(Arc::new(HookedModel {
                inner: model("m1", "fs-test"),
                fired: Once::new(),
                hook: Box::new(hook),
            }))
            .unwrap();

        NutritionProcessor::new(
            store(),
            registry,
            survey(),
            RecommendationCatalog::nutrition_default(),
            EngineConfig {
                schema_tag: Some("fs-test".to_string()),
                worker_threads: Some(1),
                ..Default::default()
            },
        )
        .unwrap()
    }

    /// Same layout as `store()` under a new source version
    fn next_store() -> AnnotationStore {
        AnnotationStore::new(
            "annot-2",
            vec![
                annotation("rs1", "fat_sensitivity", Allele::A, 0.5),
                annotation("rs3", "fat_sensitivity", Allele::C, 0.1),
            ],
        )
        .unwrap()
    }

    fn sample(sample_id: &str, genotype: &[(&str, &str)]) -> SampleInput {
        SampleInput {
            sample_id: sample_id.to_string(),
            genotype: genotype.iter().map(|(v, g)| GenotypeCall::new(*v, *g)).collect(),
            survey: BTreeMap::new(),
            schema_version: None,
        }
    }

    #[test]
    fn test_run_inference() {
        let processor = processor(EngineConfig::default());
        let result = processor
            .run_inference(&sample("s1", &[("rs1", "AA"), ("rs2", "GG")]), Some("m1"))
            .unwrap();

        // fat score = 2 × 0.5 + 2 × 0.25 = 1.5 → raw 0.2 + 0.75
        assert_eq!(result.recommendations.len(), 2);
        assert_eq!(result.recommendations[0].category, "reduce_saturated_fat");
        assert!((result.recommendations[0].confidence - 0.95).abs() < 1e-12);
        assert_eq!(result.recommendations[1].category, "limit_caffeine");
        assert_eq!(result.feature_schema_version, "fs-test");
        assert_eq!(result.calibration_version, "id-1");
        assert_eq!(result.annotation_version, "annot-1");
        assert!(result.warnings.is_empty());
        assert_eq!(result.explanations.lines().count(), 2);
    }

    #[test]
    fn test_low_coverage_trait_is_masked_and_warned() {
        let processor = processor(EngineConfig::default());
        let result = processor
            .run_inference(&sample("s1", &[("rs2", "GG")]), Some("m1"))
            .unwrap();

        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].coverage, 0.5);
        // Masked risk entry: raw score is the bias alone, below the floor
        assert!(result
            .recommendations
            .iter()
            .all(|r| r.category != "reduce_saturated_fat"));
    }

    #[test]
    fn test_malformed_allele_names_variant() {
        let processor = processor(EngineConfig::default());
        let result = processor.run_inference(&sample("s1", &[("rs1", "A1")]), Some("m1"));

        match result {
            Err(EngineError::DataValidation(DataValidationError::MalformedAllele { variant_id, .. })) => {
                assert_eq!(variant_id, "rs1")
            }
            other => panic!("expected malformed allele, got {:?}", other),
        }
    }

    #[test]
    fn test_model_schema_mismatch() {
        let processor = processor(EngineConfig::default());
        let result = processor.run_inference(&sample("s1", &[("rs1", "AA")]), Some("m2"));

        assert_eq!(
            result.unwrap_err(),
            EngineError::SchemaMismatch {
                expected: "other-schema".to_string(),
                found: "fs-test".to_string()
            }
        );
    }

    #[test]
    fn test_sample_schema_version_checked() {
        let processor = processor(EngineConfig::default());
        let mut input = sample("s1", &[("rs1", "AA")]);
        input.schema_version = Some("fs-old".to_string());

        let result = processor.run_inference(&input, Some("m1"));
        assert!(matches!(result, Err(EngineError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_model_resolution() {
        let processor = processor(EngineConfig::default());

        assert_eq!(processor.resolve_model_version(Some("m1")).unwrap(), "m1");
        // Equal created_at: ties broken by version
        assert_eq!(processor.resolve_model_version(None).unwrap(), "m2");
        assert!(matches!(
            processor.resolve_model_version(Some("m9")),
            Err(EngineError::ModelUnavailable { .. })
        ));

        let processor = self::processor(EngineConfig {
            default_model_version: Some("m1".to_string()),
            ..Default::default()
        });
        assert_eq!(processor.resolve_model_version(None).unwrap(), "m1");
    }

    #[test]
    fn test_unknown_default_model_rejected() {
        let result = NutritionProcessor::new(
            store(),
            ModelRegistry::new(),
            survey(),
            RecommendationCatalog::nutrition_default(),
            EngineConfig {
                default_model_version: Some("missing".to_string()),
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_batch_isolates_failures() {
        let processor = processor(EngineConfig::default());
        let samples = vec![
            sample("s1", &[("rs1", "AA")]),
            sample("s2", &[("rs1", "ZZ")]),
            sample("s3", &[("rs1", "AT"), ("rs2", "GG")]),
        ];

        let report = processor.run_batch_inference(&samples, Some("m1"), &CancellationToken::new());

        assert!(report.cancelled.is_empty());
        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.sample_id()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
        assert_eq!(report.completed().count(), 2);

        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].sample_id, "s2");
        assert_eq!(failed[0].kind, ErrorKind::DataValidation);
        assert_eq!(failed[0].field.as_deref(), Some("rs1"));
    }

    #[test]
    fn test_batch_unknown_model_fails_each_sample() {
        let processor = processor(EngineConfig::default());
        let samples = vec![sample("s1", &[("rs1", "AA")]), sample("s2", &[("rs1", "AA")])];

        let report = processor.run_batch_inference(&samples, Some("m9"), &CancellationToken::new());

        assert_eq!(report.failed().count(), 2);
        assert!(report.failed().all(|e| e.kind == ErrorKind::ModelUnavailable));
    }

    #[test]
    fn test_cancelled_batch_lists_unprocessed_samples() {
        let processor = processor(EngineConfig::default());
        let samples = vec![sample("s1", &[("rs1", "AA")]), sample("s2", &[("rs1", "AA")])];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = processor.run_batch_inference(&samples, Some("m1"), &cancel);

        assert!(report.outcomes.is_empty());
        assert_eq!(report.cancelled, vec!["s1", "s2"]);
    }

    #[test]
    fn test_cancellation_mid_batch_keeps_finished_samples() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let processor = hooked_processor(move || trigger.cancel());
        let samples = vec![
            sample("s1", &[("rs1", "AA"), ("rs2", "GG")]),
            sample("s2", &[("rs1", "AA"), ("rs2", "GG")]),
            sample("s3", &[("rs1", "AA"), ("rs2", "GG")]),
        ];

        let report = processor.run_batch_inference(&samples, Some("m1"), &cancel);

        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.sample_id()).collect();
        assert_eq!(ids, vec!["s1"]);
        assert_eq!(report.completed().count(), 1);
        assert_eq!(report.cancelled, vec!["s2", "s3"]);
        assert!(report.was_cancelled());
    }

    #[test]
    fn test_batch_keeps_one_annotation_snapshot() {
        let slot: Arc<OnceLock<Weak<NutritionProcessor>>> = Arc::new(OnceLock::new());
        let hook_slot = Arc::clone(&slot);
        let processor = Arc::new(hooked_processor(move || {
            if let Some(processor) = hook_slot.get().and_then(Weak::upgrade) {
                processor.refresh_annotations(next_store()).unwrap();
            }
        }));
        slot.set(Arc::downgrade(&processor)).unwrap();

        let samples = vec![
            sample("s1", &[("rs1", "AA"), ("rs2", "GG")]),
            sample("s2", &[("rs1", "AA"), ("rs2", "GG")]),
            sample("s3", &[("rs1", "AA"), ("rs2", "GG")]),
        ];
        let report = processor.run_batch_inference(&samples, Some("m1"), &CancellationToken::new());

        // Swapped after s1 scored; s2 and s3 would lose rs2 coverage under annot-2
        assert_eq!(processor.annotations().source_version(), "annot-2");
        assert_eq!(report.completed().count(), 3);
        assert!(report.completed().all(|r| r.annotation_version == "annot-1"));
        assert!(report.completed().all(|r| r.warnings.is_empty()));

        let result = processor.run_inference(&samples[0], Some("m1")).unwrap();
        assert_eq!(result.annotation_version, "annot-2");
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_batch_requests_report_rejected_entries() {
        let processor = processor(EngineConfig::default());
        let requests = decode_batch(
            r#"[
                {"sample_id": "s1", "genotype": {"rs1": "AA", "rs2": "GG"}},
                {"sample_id": "s2", "genotype": ["AA"]},
                {"sample_id": "s3", "genotype": {"rs1": null, "rs2": "GG"}}
            ]"#,
        )
        .unwrap();

        let report = processor.run_batch_requests(&requests, Some("m1"), &CancellationToken::new());

        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.sample_id()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
        assert_eq!(report.completed().count(), 2);

        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].sample_id, "s2");
        assert_eq!(failed[0].kind, ErrorKind::DataValidation);
        assert_eq!(failed[0].field.as_deref(), Some("request"));
    }

    #[test]
    fn test_refresh_annotations_swaps_store() {
        let processor = processor(EngineConfig::default());

        let previous = processor.refresh_annotations(next_store()).unwrap();

        assert_eq!(previous.source_version(), "annot-1");
        assert_eq!(processor.annotations().source_version(), "annot-2");
        assert!(processor.annotations().contains("rs3"));
    }

    #[test]
    fn test_refresh_refuses_layout_change_under_schema_tag() {
        let processor = processor(EngineConfig::default());
        let before = processor.feature_schema().unwrap();

        // Frequencies switch fat_sensitivity to z-score scaling; names are unchanged
        let rescaled = AnnotationStore::new(
            "annot-3",
            vec![
                VariantAnnotation {
                    risk_allele_freq: Some(0.3),
                    ..annotation("rs1", "fat_sensitivity", Allele::A, 0.5)
                },
                VariantAnnotation {
                    risk_allele_freq: Some(0.6),
                    ..annotation("rs2", "fat_sensitivity", Allele::G, 0.25)
                },
            ],
        )
        .unwrap();

        let result = processor.refresh_annotations(rescaled);

        assert!(matches!(result, Err(EngineError::SchemaMismatch { .. })));
        assert_eq!(processor.annotations().source_version(), "annot-1");
        assert_eq!(processor.feature_schema().unwrap(), before);

        let extra_trait = AnnotationStore::new(
            "annot-4",
            vec![
                annotation("rs1", "fat_sensitivity", Allele::A, 0.5),
                annotation("rs9", "caffeine_metabolism", Allele::C, 1.0),
            ],
        )
        .unwrap();
        assert!(processor.refresh_annotations(extra_trait).is_err());
        assert!(processor
            .run_inference(&sample("s1", &[("rs1", "AA")]), Some("m1"))
            .is_ok());
    }

    #[test]
    fn test_sample_from_genome_keeps_annotated_calls() {
        let processor = processor(EngineConfig::default());
        let input = processor.sample_from_genome(
            "s1",
            vec![
                GenotypeCall::new("rs1", "AA"),
                GenotypeCall::new("i700001", "DI"),
                GenotypeCall::new("rs2", "AG"),
            ],
            BTreeMap::new(),
        );

        assert_eq!(input.genotype.len(), 2);
        assert!(processor.run_inference(&input, Some("m1")).is_ok());
    }
}
