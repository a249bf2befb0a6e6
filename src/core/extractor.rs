use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Configuration;
use crate::core::alignment::WordAligner;
use crate::core::chunking::{ChunkIterator, TextChunk};
use crate::core::data::{AnnotatedDocument, Document, Extraction, FormatType};
use crate::core::llm_client::{InferenceError, InferenceRequest, LanguageModel};
use crate::core::merge::merge_non_overlapping;
use crate::core::prompting::{PromptBuilder, SchemaBuilder};
use crate::core::resolver::{Resolver, ResolverError};
use crate::core::tokenizer::tokenize;
use crate::handlers::DocumentProcessor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub id: String,
    pub document: AnnotatedDocument,
    pub source: String,
    pub model_id: String,
    pub temperature: f32,
    pub extraction_timestamp: DateTime<Utc>,
    pub processing_time_seconds: f64,
    pub passes: usize,
    pub chunk_count: usize,
    #[serde(default)]
    pub used_fallback: bool,
    /// The source could not be loaded or extracted at all.
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ExtractionResult {
    pub fn new(document: AnnotatedDocument, source: String, model_id: String, temperature: f32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document,
            source,
            model_id,
            temperature,
            extraction_timestamp: Utc::now(),
            processing_time_seconds: 0.0,
            passes: 0,
            chunk_count: 0,
            used_fallback: false,
            failed: false,
            errors: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.errors.push(error);
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn extractions(&self) -> &[Extraction] {
        &self.document.extractions
    }

    /// Compact view written next to the JSONL output.
    pub fn summary_json(&self) -> Value {
        let extractions: Vec<Value> = self
            .document
            .extractions
            .iter()
            .map(|e| {
                json!({
                    "class": e.extraction_class,
                    "text": e.extraction_text,
                    "attributes": e.attributes,
                    "char_interval": e.char_interval.map(|i| json!({
                        "start": i.start_pos,
                        "end": i.end_pos,
                    })),
                })
            })
            .collect();

        json!({
            "model_id": self.model_id,
            "temperature": self.temperature,
            "input_text": self.document.text,
            "extractions": extractions,
        })
    }
}

/// Why a single chunk produced no extractions.
#[derive(Error, Debug)]
enum ChunkError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Resolve(#[from] ResolverError),
}

impl ChunkError {
    fn into_anyhow(self) -> anyhow::Error {
        match self {
            ChunkError::Inference(e) => anyhow::Error::new(e),
            ChunkError::Resolve(e) => anyhow::Error::new(e),
        }
    }
}

/// Knobs that differ between the primary run and the fallback run.
#[derive(Debug, Clone)]
struct RunSettings {
    prompt_description: String,
    temperature: f32,
    passes: usize,
    max_workers: usize,
    max_char_buffer: usize,
}

impl RunSettings {
    fn primary(config: &Configuration) -> Self {
        Self {
            prompt_description: config.prompt_description.clone(),
            temperature: config.llm_settings.temperature,
            passes: config.extraction.extraction_passes,
            max_workers: config.extraction.max_workers,
            max_char_buffer: config.extraction.max_char_buffer,
        }
    }

    fn fallback(config: &Configuration) -> Option<Self> {
        config.fallback.as_ref().map(|fallback| Self {
            prompt_description: fallback
                .prompt_description
                .clone()
                .unwrap_or_else(|| config.prompt_description.clone()),
            temperature: fallback.temperature,
            passes: fallback.extraction_passes,
            max_workers: fallback.max_workers,
            max_char_buffer: fallback.max_char_buffer,
        })
    }
}

pub struct Extractor {
    config: Configuration,
    model: Arc<dyn LanguageModel>,
    document_processor: DocumentProcessor,
    resolver: Resolver,
    show_progress: bool,
}

impl Extractor {
    pub fn new(config: Configuration, model: Arc<dyn LanguageModel>) -> Self {
        let document_processor =
            DocumentProcessor::new().with_quote_normalization(config.extraction.normalize_quotes);
        let resolver = Resolver::new(config.llm_settings.format_type);
        Self {
            config,
            model,
            document_processor,
            resolver,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Runs the configured passes over one document.
    pub async fn extract(&self, document: Document) -> Result<ExtractionResult> {
        self.run(document, &RunSettings::primary(&self.config)).await
    }

    /// Like [`Extractor::extract`], retrying once with the fallback settings when the primary run fails.
    pub async fn extract_with_fallback(&self, document: Document) -> Result<ExtractionResult> {
        let primary_error = match self.extract(document.clone()).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let Some(settings) = RunSettings::fallback(&self.config) else {
            return Err(primary_error);
        };

        warn!("Primary extraction failed: {:#}. Retrying with simpler settings", primary_error);
        let mut result = self
            .run(document, &settings)
            .await
            .with_context(|| format!("Fallback extraction also failed after: {:#}", primary_error))?;
        result.used_fallback = true;
        result.errors.insert(0, format!("Primary extraction failed: {:#}", primary_error));
        Ok(result)
    }

    /// Loads a document from a path or URL and extracts from it.
    pub async fn extract_from_source(&self, source: &str) -> Result<ExtractionResult> {
        info!("Starting extraction from document: {}", source);

        let processed = self
            .document_processor
            .process(source)
            .await
            .with_context(|| format!("Failed to process document: {}", source))?;

        debug!("Document processed, text length: {}", processed.text.chars().count());

        let mut result = self.extract_with_fallback(Document::new(processed.text)).await?;
        result.source = source.to_string();
        Ok(result.with_metadata(processed.metadata))
    }

    /// Processes sources one after another. A failing source yields a result with
    /// `failed` set, its error, and a `hint` metadata entry when one applies.
    pub async fn extract_from_multiple(&self, sources: &[String]) -> Vec<ExtractionResult> {
        let mut results = Vec::with_capacity(sources.len());

        for source in sources {
            match self.extract_from_source(source).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    let error_msg = format!("{:#}", e);
                    warn!("{}", error_msg);
                    let empty = AnnotatedDocument::new(Document::new(String::new()), Vec::new());
                    let mut failed = ExtractionResult::new(
                        empty,
                        source.clone(),
                        self.model.model_id().to_string(),
                        self.config.llm_settings.temperature,
                    )
                    .with_error(error_msg);
                    failed.failed = true;

                    let hint = e
                        .chain()
                        .find_map(|cause| cause.downcast_ref::<InferenceError>())
                        .and_then(InferenceError::hint);
                    if let Some(hint) = hint {
                        failed.metadata.insert("hint".to_string(), hint);
                    }
                    results.push(failed);
                }
            }
        }

        results
    }

    async fn run(&self, document: Document, settings: &RunSettings) -> Result<ExtractionResult> {
        let start_time = Instant::now();
        let extraction = &self.config.extraction;

        let tokenized = tokenize(&document.text, extraction.tokenize_cjk_by_char);
        let chunks: Vec<TextChunk> = ChunkIterator::new(&tokenized, settings.max_char_buffer).collect();

        info!(
            "Extracting from {} ({} chars) in {} chunks, {} pass(es), {} workers",
            document.document_id,
            document.text.chars().count(),
            chunks.len(),
            settings.passes,
            settings.max_workers
        );

        let requests = self.build_requests(&chunks, settings)?;
        let aligner = WordAligner::new(
            extraction.tokenize_cjk_by_char,
            extraction.fuzzy_alignment_threshold,
        );

        let progress = self.progress_bar((chunks.len() * settings.passes) as u64);
        let mut pass_results: Vec<Vec<Extraction>> = Vec::with_capacity(settings.passes);
        let mut errors = Vec::new();
        let mut first_failure: Option<ChunkError> = None;
        let mut succeeded = 0;

        for pass in 0..settings.passes {
            progress.set_message(format!("pass {}/{}", pass + 1, settings.passes));
            let outcomes = self.run_pass(&requests, settings.max_workers, &progress).await?;

            let mut pass_extractions = Vec::new();
            for (index, outcome) in outcomes {
                let chunk = &chunks[index];
                match outcome {
                    Ok(extractions) => {
                        succeeded += 1;
                        pass_extractions.extend(aligner.align(extractions, &chunk.text, chunk.char_offset));
                    }
                    Err(e) => {
                        let error_msg = format!("Pass {} chunk {}: {}", pass + 1, index + 1, e);
                        warn!("{}", error_msg);
                        errors.push(error_msg);
                        first_failure.get_or_insert(e);
                    }
                }
            }

            debug!("Pass {} produced {} extractions", pass + 1, pass_extractions.len());
            pass_results.push(pass_extractions);
        }
        progress.finish_and_clear();

        if succeeded == 0 {
            if let Some(failure) = first_failure {
                return Err(failure.into_anyhow().context(format!(
                    "All {} chunk requests failed",
                    chunks.len() * settings.passes
                )));
            }
        }

        let extractions = merge_non_overlapping(pass_results);
        let processing_time = start_time.elapsed().as_secs_f64();

        let mut metadata = HashMap::new();
        metadata.insert("extraction_config".to_string(), self.config.name.clone());
        metadata.insert("llm_model".to_string(), self.model.model_id().to_string());
        metadata.insert("max_char_buffer".to_string(), settings.max_char_buffer.to_string());
        metadata.insert("max_workers".to_string(), settings.max_workers.to_string());
        metadata.insert("failed_chunks".to_string(), errors.len().to_string());

        info!(
            "Extraction completed: {} extractions in {:.2}s",
            extractions.len(),
            processing_time
        );

        let mut result = ExtractionResult::new(
            AnnotatedDocument::new(document, extractions),
            String::new(),
            self.model.model_id().to_string(),
            settings.temperature,
        )
        .with_metadata(metadata);
        result.processing_time_seconds = processing_time;
        result.passes = settings.passes;
        result.chunk_count = chunks.len();
        result.errors = errors;
        Ok(result)
    }

    fn build_requests(&self, chunks: &[TextChunk], settings: &RunSettings) -> Result<Vec<InferenceRequest>> {
        let format_type = self.config.llm_settings.format_type;
        let format = if self.config.extraction.use_schema_constraints && format_type == FormatType::Json {
            Some(SchemaBuilder::from_examples(&self.config.examples))
        } else if format_type == FormatType::Json {
            Some(Value::String("json".to_string()))
        } else {
            None
        };

        chunks
            .iter()
            .map(|chunk| {
                let prompt = PromptBuilder::build_extraction_prompt(
                    &settings.prompt_description,
                    &self.config.examples,
                    &chunk.text,
                    format_type,
                )?;
                Ok(InferenceRequest {
                    prompt,
                    system: Some(PromptBuilder::get_system_prompt(format_type).to_string()),
                    format: format.clone(),
                    temperature: settings.temperature,
                })
            })
            .collect()
    }

    /// Sends every chunk once, at most `max_workers` at a time. Outcomes come back in chunk order.
    async fn run_pass(
        &self,
        requests: &[InferenceRequest],
        max_workers: usize,
        progress: &ProgressBar,
    ) -> Result<Vec<(usize, Result<Vec<Extraction>, ChunkError>)>> {
        let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
        let mut tasks = JoinSet::new();

        for (index, request) in requests.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let model = Arc::clone(&self.model);
            let request = request.clone();
            let resolver = self.resolver;
            let max_parse_retries = self.config.extraction.max_parse_retries;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = infer_chunk(model.as_ref(), &request, resolver, max_parse_retries).await;
                (index, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(requests.len());
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined.context("Chunk task panicked")?);
            progress.inc(1);
        }
        outcomes.sort_by_key(|(index, _)| *index);
        Ok(outcomes)
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{bar:40}] {pos}/{len} chunks ({elapsed})") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar
    }
}

/// Asks the model about one chunk, re-asking when the answer cannot be parsed.
async fn infer_chunk(
    model: &dyn LanguageModel,
    request: &InferenceRequest,
    resolver: Resolver,
    max_parse_retries: usize,
) -> Result<Vec<Extraction>, ChunkError> {
    let mut attempt = 0;
    loop {
        let raw = model.infer(request).await?;
        match resolver.parse(&raw) {
            Ok(extractions) => return Ok(extractions),
            Err(e) if attempt < max_parse_retries => {
                attempt += 1;
                warn!("Malformed model output ({}), asking again ({}/{})", e, attempt, max_parse_retries);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::CharInterval;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers with every known entity found in the chunk being asked about.
    struct LookupModel {
        entities: Vec<(&'static str, &'static str)>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
        garbage_first: usize,
        fail_at_temperature: Option<f32>,
        seen_temperatures: Mutex<Vec<f32>>,
    }

    impl LookupModel {
        fn new(entities: Vec<(&'static str, &'static str)>) -> Self {
            Self {
                entities,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                garbage_first: 0,
                fail_at_temperature: None,
                seen_temperatures: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for LookupModel {
        fn model_id(&self) -> &str {
            "lookup:test"
        }

        async fn infer(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_temperatures.lock().unwrap().push(request.temperature);
            if self.fail_at_temperature == Some(request.temperature) {
                return Err(InferenceError::Api { status: 500, message: "overloaded".to_string() });
            }

            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if call < self.garbage_first {
                return Ok("Sure! Here are the entities: {\"extractions\": [".to_string());
            }

            let question = request.prompt.rsplit("Q: ").next().unwrap_or_default();
            let items: Vec<Value> = self
                .entities
                .iter()
                .filter(|(_, text)| question.contains(text))
                .map(|(class, text)| json!({ class.to_string(): text }))
                .collect();
            Ok(json!({ "extractions": items }).to_string())
        }
    }

    fn config(passes: usize, max_workers: usize, max_char_buffer: usize) -> Configuration {
        let mut config = Configuration::literary_example();
        config.extraction.extraction_passes = passes;
        config.extraction.max_workers = max_workers;
        config.extraction.max_char_buffer = max_char_buffer;
        config
    }

    const BALCONY: &str = "ROMEO. But soft! What light through yonder window breaks?\n\
                           It is the east, and Juliet is the sun.\n\
                           JULIET. O Romeo, Romeo! Wherefore art thou Romeo?";

    #[tokio::test]
    async fn test_extract_aligns_to_document_offsets() {
        let model = Arc::new(LookupModel::new(vec![
            ("character", "ROMEO"),
            ("emotion", "But soft!"),
            ("character", "JULIET"),
        ]));
        let extractor = Extractor::new(config(1, 2, 1000), model);

        let result = extractor.extract(Document::new(BALCONY)).await.unwrap();
        assert!(result.errors.is_empty());
        assert_eq!(result.chunk_count, 1);

        let extractions = result.extractions();
        assert_eq!(extractions.len(), 3);
        assert_eq!(extractions[0].char_interval, Some(CharInterval::new(0, 5)));
        assert_eq!(extractions[1].char_interval, Some(CharInterval::new(7, 16)));
        let juliet = extractions[2].char_interval.unwrap();
        let matched = result.document.slice(&juliet).unwrap();
        assert!(matched.eq_ignore_ascii_case("juliet"));
    }

    #[tokio::test]
    async fn test_chunks_respect_worker_limit() {
        let model = Arc::new(LookupModel::new(vec![("character", "ROMEO"), ("character", "JULIET")]));
        let extractor = Extractor::new(config(1, 2, 40), Arc::clone(&model) as Arc<dyn LanguageModel>);

        let result = extractor.extract(Document::new(BALCONY)).await.unwrap();
        assert!(result.chunk_count > 2);
        assert_eq!(model.calls.load(Ordering::SeqCst), result.chunk_count);
        assert!(model.max_in_flight.load(Ordering::SeqCst) <= 2);

        let texts: Vec<&str> = result.extractions().iter().map(|e| e.extraction_text.as_str()).collect();
        assert_eq!(texts, vec!["ROMEO", "JULIET"]);
    }

    #[tokio::test]
    async fn test_malformed_output_is_retried() {
        let mut model = LookupModel::new(vec![("character", "ROMEO")]);
        model.garbage_first = 1;
        let extractor = Extractor::new(config(1, 1, 1000), Arc::new(model));

        let result = extractor.extract(Document::new(BALCONY)).await.unwrap();
        assert!(result.errors.is_empty());
        assert_eq!(result.extractions().len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_chunk_is_recorded_and_skipped() {
        let mut model = LookupModel::new(vec![("character", "ROMEO"), ("character", "JULIET")]);
        model.garbage_first = 1;
        let mut config = config(1, 1, 60);
        config.extraction.max_parse_retries = 0;
        let extractor = Extractor::new(config, Arc::new(model));

        let result = extractor.extract(Document::new(BALCONY)).await.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Pass 1 chunk"));
        assert!(result.chunk_count > 1);
    }

    #[tokio::test]
    async fn test_every_chunk_failing_is_an_error() {
        let mut model = LookupModel::new(vec![]);
        model.fail_at_temperature = Some(0.3);
        let extractor = Extractor::new(config(2, 4, 1000), Arc::new(model));

        let err = extractor.extract(Document::new(BALCONY)).await.unwrap_err();
        assert!(err.to_string().contains("All 2 chunk requests failed"));
        assert!(matches!(
            err.downcast_ref::<InferenceError>(),
            Some(InferenceError::Api { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_fallback_runs_with_its_own_settings() {
        let mut model = LookupModel::new(vec![("character", "ROMEO")]);
        model.fail_at_temperature = Some(0.3);
        let model = Arc::new(model);

        let mut config = config(2, 4, 1000);
        config.fallback = Some(crate::config::FallbackSettings::default());
        let extractor = Extractor::new(config, Arc::clone(&model) as Arc<dyn LanguageModel>);

        let result = extractor.extract_with_fallback(Document::new(BALCONY)).await.unwrap();
        assert!(result.used_fallback);
        assert_eq!(result.passes, 1);
        assert_eq!(result.temperature, 0.05);
        assert_eq!(result.extractions().len(), 1);
        assert!(result.errors[0].starts_with("Primary extraction failed"));
        assert!(model.seen_temperatures.lock().unwrap().contains(&0.05));
    }

    #[tokio::test]
    async fn test_empty_document_yields_no_extractions() {
        let model = Arc::new(LookupModel::new(vec![("character", "ROMEO")]));
        let extractor = Extractor::new(config(1, 1, 1000), Arc::clone(&model) as Arc<dyn LanguageModel>);

        let result = extractor.extract(Document::new("")).await.unwrap();
        assert_eq!(result.chunk_count, 0);
        assert!(result.extractions().is_empty());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_summary_json_shape() {
        let document = AnnotatedDocument::new(
            Document::new("ROMEO. But soft!"),
            vec![
                Extraction::new("character", "ROMEO")
                    .with_attribute("emotional_state", "wonder")
                    .with_char_interval(0, 5),
                Extraction::new("character", "Mercutio"),
            ],
        );
        let result = ExtractionResult::new(document, "balcony.txt".to_string(), "qwen3:8b".to_string(), 0.3);
        let summary = result.summary_json();
        assert_eq!(summary["model_id"], "qwen3:8b");
        assert_eq!(summary["input_text"], "ROMEO. But soft!");
        assert_eq!(summary["extractions"][0]["class"], "character");
        assert_eq!(summary["extractions"][0]["char_interval"]["end"], 5);
        assert_eq!(summary["extractions"][0]["attributes"]["emotional_state"], "wonder");
        assert!(summary["extractions"][1]["char_interval"].is_null());
    }

    struct UnreachableModel;

    #[async_trait]
    impl LanguageModel for UnreachableModel {
        fn model_id(&self) -> &str {
            "qwen3:8b"
        }

        async fn infer(&self, _request: &InferenceRequest) -> Result<String, InferenceError> {
            Err(InferenceError::Connection {
                url: "http://localhost:11434".to_string(),
                message: "connection refused".to_string(),
            })
        }
    }

    fn write_balcony(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("balcony.txt");
        std::fs::write(&path, BALCONY).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_extract_from_multiple_loads_sources_and_records_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_balcony(&dir);
        let missing = dir.path().join("missing.txt").to_string_lossy().to_string();

        let model = Arc::new(LookupModel::new(vec![("character", "ROMEO"), ("emotion", "But soft!")]));
        let extractor = Extractor::new(config(1, 2, 1000), model);
        let results = extractor
            .extract_from_multiple(&[good.clone(), missing.clone()])
            .await;
        assert_eq!(results.len(), 2);

        let loaded = &results[0];
        assert!(!loaded.failed);
        assert!(loaded.errors.is_empty());
        assert_eq!(loaded.source, good);
        assert_eq!(loaded.metadata.get("type").map(String::as_str), Some("text"));
        assert_eq!(loaded.metadata.get("file_name").map(String::as_str), Some("balcony.txt"));
        assert_eq!(loaded.extractions().len(), 2);
        assert_eq!(loaded.extractions()[0].char_interval, Some(CharInterval::new(0, 5)));
        assert_eq!(loaded.extractions()[1].char_interval, Some(CharInterval::new(7, 16)));

        let failed = &results[1];
        assert!(failed.failed);
        assert_eq!(failed.source, missing);
        assert_eq!(failed.model_id, "lookup:test");
        assert_eq!(failed.errors.len(), 1);
        assert!(failed.errors[0].contains("missing.txt"));
        assert!(failed.extractions().is_empty());
        assert!(!failed.metadata.contains_key("hint"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_reported_with_hint() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_balcony(&dir);
        let extractor = Extractor::new(config(1, 1, 1000), Arc::new(UnreachableModel));

        let err = extractor.extract_from_source(&source).await.unwrap_err();
        assert!(err.chain().any(|cause| cause.downcast_ref::<InferenceError>().is_some()));

        let results = extractor.extract_from_multiple(&[source]).await;
        assert!(results[0].failed);
        assert!(results[0].metadata["hint"].contains("ollama serve"));
    }
}
