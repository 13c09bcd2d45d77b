//! Core Extractor implementation

use crate::chunking::{CharCountEstimator, TextChunker};
use crate::config::PipelineOptions;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::{DispatchError, PipelineError};
use crate::merger::Merger;
use crate::parser::parse_response;
use crate::progress::ProgressTracker;
use crate::prompt::PromptBuilder;
use crate::temporal;
use crate::types::{
    ExtractedFields, ExtractionMetadata, ExtractionOutcome, FewShotExample, NormalizedFields,
    PipelineWarning,
};
use crate::validation::FieldValidator;
use fieldwise_domain::{
    Chunk, FieldSpec, InferenceError, InferenceProvider, InferenceRequest, RunId, SizeEstimator,
    TokenUsage,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument};

/// The Extractor turns a document into one merged record of field values
pub struct Extractor<L> {
    provider: Arc<L>,
    options: PipelineOptions,
    examples: Vec<FewShotExample>,
    estimator: Arc<dyn SizeEstimator>,
}

impl<L> Extractor<L>
where
    L: InferenceProvider + 'static,
{
    /// Create a new Extractor
    pub fn new(provider: L, options: PipelineOptions) -> Self {
        Self {
            provider: Arc::new(provider),
            options,
            examples: Vec::new(),
            estimator: Arc::new(CharCountEstimator),
        }
    }

    /// Show these worked examples in every prompt
    pub fn with_examples(mut self, examples: Vec<FewShotExample>) -> Self {
        self.examples = examples;
        self
    }

    /// Measure chunk sizes with `estimator` instead of character counts
    pub fn with_size_estimator(mut self, estimator: Arc<dyn SizeEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Pipeline options in use
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Extract `fields` from `document`
    pub async fn extract(
        &self,
        document: &str,
        fields: &[FieldSpec],
    ) -> Result<ExtractionOutcome, PipelineError> {
        self.extract_with_progress(document, fields, &ProgressTracker::new())
            .await
    }

    /// Extract `fields` from `document`, reporting chunk progress to `progress`
    pub async fn extract_with_progress(
        &self,
        document: &str,
        fields: &[FieldSpec],
        progress: &ProgressTracker,
    ) -> Result<ExtractionOutcome, PipelineError> {
        let run_id = RunId::new();
        let span = info_span!("extract", run_id = %run_id);
        self.run(run_id, document, fields, progress)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        run_id: RunId,
        document: &str,
        fields: &[FieldSpec],
        progress: &ProgressTracker,
    ) -> Result<ExtractionOutcome, PipelineError> {
        let started = Instant::now();
        self.options.validate().map_err(PipelineError::Config)?;
        let validator = check_fields(fields)?;

        let deadline = self
            .options
            .timeout()
            .map(|t| tokio::time::Instant::now() + t);

        let chunks = TextChunker::new(
            self.options.chunk_strategy,
            self.options.max_chunk_size,
            self.options.overlap_size,
        )
        .with_estimator(Arc::clone(&self.estimator))
        .chunk(document)?;

        let total_chunks = chunks.len();
        info!(
            chunks = total_chunks,
            document_len = document.len(),
            fields = fields.len(),
            "Starting extraction"
        );

        let context = Arc::new(ChunkContext {
            provider: Arc::clone(&self.provider),
            validator,
            fields: fields.to_vec(),
            examples: self.examples.clone(),
            model_name: self.options.model_name.clone(),
            temperature: self.options.temperature,
            request_timeout: self.options.request_timeout(),
        });

        let dispatcher = Dispatcher::from_options(&self.options).with_progress(progress.clone());
        let report = dispatcher
            .dispatch(
                chunks,
                move |chunk, attempt| {
                    let context = Arc::clone(&context);
                    async move { context.process(chunk, attempt).await }
                },
                deadline,
            )
            .await;

        let timeout_ms = self.options.timeout_ms.unwrap_or_default();
        if report.timed_out && !self.options.partial_on_timeout {
            warn!(timeout_ms, "Extraction timed out");
            return Err(PipelineError::Timeout(timeout_ms));
        }
        if total_chunks > 0 && report.completed.is_empty() {
            if report.timed_out {
                return Err(PipelineError::Timeout(timeout_ms));
            }
            return Err(PipelineError::NoChunksSucceeded {
                failures: report
                    .failed
                    .iter()
                    .map(|f| (f.index, f.last_error().to_string()))
                    .collect(),
            });
        }

        let warnings = collect_warnings(&report);
        let DispatchReport {
            completed,
            failed,
            abandoned,
            outcomes,
            ..
        } = report;

        let mut token_usage = TokenUsage::default();
        let normalized: Vec<NormalizedFields> = completed
            .into_iter()
            .map(|success| {
                token_usage += success.value.token_usage;
                temporal::normalize(success.value, fields, &self.options)
            })
            .collect();

        let record = Merger::new(fields, &self.options).merge(&normalized);

        let metadata = ExtractionMetadata {
            run_id,
            model_name: self.options.model_name.clone(),
            total_chunks,
            chunks_succeeded: normalized.len(),
            chunks_failed: failed.len() + abandoned.len(),
            token_usage,
            chunk_outcomes: outcomes,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            succeeded = metadata.chunks_succeeded,
            failed = metadata.chunks_failed,
            warnings = warnings.len(),
            tokens = token_usage.total(),
            elapsed_ms = metadata.processing_time_ms,
            "Extraction complete"
        );

        Ok(ExtractionOutcome {
            record,
            warnings,
            metadata,
        })
    }
}

/// Validate the field set and compile it for per-chunk use
fn check_fields(fields: &[FieldSpec]) -> Result<FieldValidator, PipelineError> {
    if fields.is_empty() {
        return Err(PipelineError::Config("no fields requested".to_string()));
    }
    let mut seen = HashSet::new();
    for spec in fields {
        if !seen.insert(spec.name.as_str()) {
            return Err(PipelineError::InvalidFieldSpec {
                field: spec.name.clone(),
                reason: "duplicate field name".to_string(),
            });
        }
    }
    FieldValidator::new(fields)
}

/// Warnings in chunk order
fn collect_warnings(report: &DispatchReport<ExtractedFields>) -> Vec<PipelineWarning> {
    let mut warnings = Vec::new();
    for failure in &report.failed {
        warnings.push(PipelineWarning::ChunkFailed {
            chunk: failure.index,
            attempts: failure.attempts,
            reason: failure.last_error().to_string(),
        });
    }
    for &chunk in &report.abandoned {
        warnings.push(PipelineWarning::ChunkAbandoned { chunk });
    }
    for success in &report.completed {
        for issue in &success.value.issues {
            warnings.push(PipelineWarning::Validation {
                chunk: success.index,
                issue: issue.clone(),
            });
        }
    }
    warnings.sort_by_key(PipelineWarning::chunk);
    warnings
}

/// Everything a chunk task needs, shared across tasks
struct ChunkContext<L> {
    provider: Arc<L>,
    validator: FieldValidator,
    fields: Vec<FieldSpec>,
    examples: Vec<FewShotExample>,
    model_name: String,
    temperature: f64,
    request_timeout: Duration,
}

impl<L: InferenceProvider> ChunkContext<L> {
    /// One attempt: prompt, invoke, parse, validate
    async fn process(&self, chunk: Chunk, attempt: u32) -> Result<ExtractedFields, DispatchError> {
        let prompt = PromptBuilder::new(&chunk.text, &self.fields)
            .with_examples(&self.examples)
            .build();
        debug!(attempt, prompt_len = prompt.len(), "Invoking model");

        let request = InferenceRequest {
            prompt,
            model_name: self.model_name.clone(),
            temperature: self.temperature,
            timeout_ms: self.request_timeout.as_millis() as u64,
        };
        let response = timeout(self.request_timeout, self.provider.invoke(request))
            .await
            .map_err(|_| InferenceError::Timeout)??;
        debug!(attempt, response_len = response.text.len(), "Model responded");

        let parsed = parse_response(&response.text)?;
        let mut fields = self.validator.validate(chunk.index, &parsed);
        fields.token_usage = response.token_usage;
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldwise_domain::FieldType;
    use fieldwise_llm::MockProvider;
    use tokio_test::{assert_err, assert_ok};

    fn name_field() -> Vec<FieldSpec> {
        vec![FieldSpec::new("name", "Person's name", FieldType::String).unique()]
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            model_name: "test-model".to_string(),
            retry_base_delay_ms: 10,
            ..PipelineOptions::default()
        }
    }

    #[tokio::test]
    async fn test_extract_single_chunk() {
        let provider = MockProvider::new(r#"{"name": "Ada Lovelace"}"#);
        let extractor = Extractor::new(provider.clone(), options());

        let outcome = assert_ok!(extractor.extract("Ada Lovelace wrote notes.", &name_field()).await);

        assert_eq!(outcome.record.get("name"), Some(&serde_json::json!("Ada Lovelace")));
        assert_eq!(outcome.metadata.total_chunks, 1);
        assert_eq!(outcome.metadata.chunks_succeeded, 1);
        assert!(outcome.warnings.is_empty());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_request_uses_options() {
        let provider = MockProvider::new(r#"{"name": "x"}"#);
        let extractor = Extractor::new(provider.clone(), options());
        assert_ok!(extractor.extract("some text", &name_field()).await);

        let requests = provider.requests();
        assert_eq!(requests[0].model_name, "test-model");
        assert_eq!(requests[0].temperature, 0.0);
        assert_eq!(requests[0].timeout_ms, 60_000);
        assert!(requests[0].prompt.contains("some text"));
    }

    #[tokio::test]
    async fn test_examples_reach_prompt() {
        let provider = MockProvider::new(r#"{"name": "x"}"#);
        let extractor = Extractor::new(provider.clone(), options()).with_examples(vec![FewShotExample {
            text: "Patient: Jane Roe".to_string(),
            output: r#"{"name": "Jane Roe"}"#.to_string(),
        }]);
        assert_ok!(extractor.extract("some text", &name_field()).await);
        assert!(provider.requests()[0].prompt.contains("Patient: Jane Roe"));
    }

    #[tokio::test]
    async fn test_empty_document_yields_empty_record() {
        let provider = MockProvider::default();
        let extractor = Extractor::new(provider.clone(), options());

        let outcome = assert_ok!(extractor.extract("   ", &name_field()).await);

        assert_eq!(outcome.metadata.total_chunks, 0);
        assert_eq!(outcome.record.get("name"), Some(&serde_json::Value::Null));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let mut bad = options();
        bad.max_concurrency = 0;
        let extractor = Extractor::new(MockProvider::default(), bad);
        let err = assert_err!(extractor.extract("text", &name_field()).await);
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn test_duplicate_fields_rejected() {
        let extractor = Extractor::new(MockProvider::default(), options());
        let mut fields = name_field();
        fields.extend(name_field());
        let err = assert_err!(extractor.extract("text", &fields).await);
        assert!(matches!(err, PipelineError::InvalidFieldSpec { .. }));
    }

    #[tokio::test]
    async fn test_unique_timeline_field_rejected() {
        let provider = MockProvider::default();
        let extractor = Extractor::new(provider.clone(), options());
        let fields = vec![FieldSpec::new("visits", "Visits", FieldType::Timeline)
            .with_date_field("date")
            .unique()];

        let err = assert_err!(extractor.extract("Visit on 2020-01-01.", &fields).await);
        assert!(matches!(err, PipelineError::InvalidFieldSpec { field, .. } if field == "visits"));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_no_fields_rejected() {
        let extractor = Extractor::new(MockProvider::default(), options());
        assert_err!(extractor.extract("text", &[]).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_hits_request_timeout() {
        let provider = MockProvider::new(r#"{"name": "x"}"#).with_latency(Duration::from_secs(5));
        let mut opts = options();
        opts.request_timeout_ms = 1_000;
        opts.retry_attempts = 2;
        let extractor = Extractor::new(provider.clone(), opts);

        let err = assert_err!(extractor.extract("text", &name_field()).await);
        match err {
            PipelineError::NoChunksSucceeded { failures } => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].1.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_token_usage_summed() {
        let provider = MockProvider::new(r#"{"name": "x"}"#);
        let extractor = Extractor::new(provider, options());
        let outcome = assert_ok!(extractor.extract("text", &name_field()).await);
        assert!(outcome.metadata.token_usage.total() > 0);
    }
}
