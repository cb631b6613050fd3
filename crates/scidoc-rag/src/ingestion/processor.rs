//! Document processing orchestration

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::chunker::{chunk_statistics, ChunkStatistics, EnhancedChunker};
use super::reader::{DocumentInput, DocumentReader, SourceDocument};
use crate::classification::{classification_summary, ClassificationSummary, ContentClassifier};
use crate::config::PipelineConfig;
use crate::error::{Error, Result, Stage};
use crate::export::{self, ExportFormat, RetrievalUnit};
use crate::monitoring::{HealthSnapshot, HealthStatus, ProcessingMonitor, ProcessingStats};
use crate::processing::{
    asset_statistics, glossary_statistics, AssetProcessor, AssetStatistics, Canonicalizer,
    GlossaryExtractor, GlossaryStatistics, MathematicalProcessor,
};
use crate::types::{Chunk, ContentType};

/// Operation name for whole-document timings
const DOCUMENT_OPERATION: &str = "process_document";
const READ_OPERATION: &str = "read_document";
const INDEX_OPERATION: &str = "index_chunks";

/// Embedding/indexing collaborator that receives finished chunks
#[cfg_attr(test, mockall::automock)]
pub trait ChunkIndexer: Send + Sync {
    /// Index the retrieval units of one document; returns how many were stored
    fn index_chunks(&self, source_id: &str, units: &[RetrievalUnit]) -> Result<usize>;
}

/// Running totals across every document handled by one processor
#[derive(Debug, Default)]
struct Counters {
    documents_processed: AtomicU64,
    documents_failed: AtomicU64,
    chunks_created: AtomicU64,
    mathematical_contents: AtomicU64,
    asset_contents: AtomicU64,
    glossary_contents: AtomicU64,
    errors: AtomicU64,
    skipped_enrichments: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, count: u64) {
        counter.fetch_add(count, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ProcessingCounters {
        ProcessingCounters {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_created: self.chunks_created.load(Ordering::Relaxed),
            mathematical_contents: self.mathematical_contents.load(Ordering::Relaxed),
            asset_contents: self.asset_contents.load(Ordering::Relaxed),
            glossary_contents: self.glossary_contents.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            skipped_enrichments: self.skipped_enrichments.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the processor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingCounters {
    pub documents_processed: u64,
    pub documents_failed: u64,
    pub chunks_created: u64,
    pub mathematical_contents: u64,
    pub asset_contents: u64,
    pub glossary_contents: u64,
    pub errors: u64,
    /// Enrichments not attempted because a stage was disabled or auto fallback was active
    pub skipped_enrichments: u64,
}

/// Summary over a processed chunk list plus the processor's own state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatistics {
    pub counters: ProcessingCounters,
    pub chunks: ChunkStatistics,
    pub assets: AssetStatistics,
    pub glossary: GlossaryStatistics,
    pub classification: ClassificationSummary,
    pub monitor: ProcessingStats,
    pub enabled_stages: Vec<Stage>,
    pub auto_fallback_active: bool,
}

/// Outcome of one enrichment stage
enum Enrichment {
    Attached,
    Empty,
}

/// Reads, chunks and enriches documents
pub struct DocumentProcessor {
    config: PipelineConfig,
    reader: DocumentReader,
    chunker: EnhancedChunker,
    math: MathematicalProcessor,
    assets: AssetProcessor,
    glossary: GlossaryExtractor,
    monitor: Arc<ProcessingMonitor>,
    counters: Counters,
}

impl DocumentProcessor {
    /// Create a processor with its own monitor; fails on invalid configuration
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let config = config.validated()?;
        let monitor = Arc::new(ProcessingMonitor::new(&config.monitoring));
        Self::with_monitor(config, monitor)
    }

    /// Create a processor reporting to a shared monitor
    pub fn with_monitor(config: PipelineConfig, monitor: Arc<ProcessingMonitor>) -> Result<Self> {
        let config = config.validated()?;
        let classifier = ContentClassifier::new(config.classification.clone());
        let chunker = EnhancedChunker::new(config.chunking.clone(), classifier)?;
        let math = MathematicalProcessor::new(config.math.clone());

        let processor = Self {
            reader: DocumentReader::new(),
            chunker,
            math,
            assets: AssetProcessor::new(),
            glossary: GlossaryExtractor::new(),
            monitor,
            counters: Counters::default(),
            config,
        };
        processor.register_components();

        tracing::info!(
            "Document processor ready: chunk_size={}, overlap_ratio={}, stages={:?}",
            processor.config.chunking.chunk_size,
            processor.config.chunking.overlap_ratio,
            processor.enabled_stages()
        );
        Ok(processor)
    }

    /// Install a symbolic canonicalizer for equations
    pub fn with_canonicalizer(mut self, canonicalizer: Arc<dyn Canonicalizer>) -> Self {
        self.math = self.math.with_canonicalizer(canonicalizer);
        self.register_components();
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<ProcessingMonitor> {
        &self.monitor
    }

    /// Stages enabled by configuration
    pub fn enabled_stages(&self) -> Vec<Stage> {
        [Stage::Mathematical, Stage::Asset, Stage::Glossary]
            .into_iter()
            .filter(|stage| self.stage_enabled(*stage))
            .collect()
    }

    fn stage_enabled(&self, stage: Stage) -> bool {
        let enrichment = &self.config.enrichment;
        match stage {
            Stage::Mathematical => enrichment.enable_mathematical_processing,
            Stage::Asset => enrichment.enable_asset_processing,
            Stage::Glossary => enrichment.enable_glossary_extraction,
        }
    }

    fn register_components(&self) {
        for stage in [Stage::Mathematical, Stage::Asset, Stage::Glossary] {
            let enabled = self.stage_enabled(stage);
            let mut details = HashMap::new();
            details.insert("enabled".to_string(), serde_json::json!(enabled));
            if stage == Stage::Mathematical {
                details.insert(
                    "canonicalizer".to_string(),
                    serde_json::json!(self.math.has_canonicalizer()),
                );
            }
            let status = if enabled {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            };
            self.monitor.set_component_health(stage.operation(), status, details);
        }
    }

    /// Read, chunk and enrich one document.
    ///
    /// Read failures are returned as errors. Stage failures fall back to the
    /// base-classified chunk unless `fallback_on_error` is off.
    pub fn process_document(
        &self,
        input: impl Into<DocumentInput>,
        source_id: &str,
    ) -> Result<Vec<Chunk>> {
        let started = Instant::now();
        let input = input.into();
        tracing::info!("Processing document {}", source_id);

        let document = match self.reader.read(&input, source_id) {
            Ok(document) => document,
            Err(e) => {
                tracing::error!("Failed to read document {}: {}", source_id, e);
                Counters::add(&self.counters.documents_failed, 1);
                Counters::add(&self.counters.errors, 1);
                self.monitor.record_error(READ_OPERATION, &e.to_string());
                return Err(e);
            }
        };

        match self.process_source(&document) {
            Ok(chunks) => {
                let elapsed = started.elapsed();
                Counters::add(&self.counters.documents_processed, 1);
                self.monitor.record_success(DOCUMENT_OPERATION, elapsed);
                tracing::info!(
                    "Processed document {}: {} chunks in {:.2}ms",
                    source_id,
                    chunks.len(),
                    elapsed.as_secs_f64() * 1000.0
                );
                Ok(chunks)
            }
            Err(e) => {
                tracing::error!("Failed to process document {}: {}", source_id, e);
                Counters::add(&self.counters.documents_failed, 1);
                self.monitor.record_error(DOCUMENT_OPERATION, &e.to_string());
                Err(e)
            }
        }
    }

    /// Process in-memory text
    pub fn process_text(&self, text: &str, source_id: &str) -> Result<Vec<Chunk>> {
        self.process_document(DocumentInput::Text(text.to_string()), source_id)
    }

    /// Process a batch on a worker pool. The result keeps input order; a
    /// document that fails contributes no chunks.
    pub fn process_multiple_documents<I>(&self, documents: I) -> Vec<Chunk>
    where
        I: IntoIterator<Item = (DocumentInput, String)>,
    {
        let documents: Vec<(DocumentInput, String)> = documents.into_iter().collect();
        let workers = self.config.processing.worker_count();
        tracing::info!("Processing {} documents with {} workers", documents.len(), workers);

        let run = || -> Vec<Vec<Chunk>> {
            documents
                .par_iter()
                .map(|(input, source_id)| {
                    self.process_document(input.clone(), source_id)
                        .unwrap_or_default()
                })
                .collect()
        };

        let per_document = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(run),
            Err(e) => {
                tracing::warn!("Failed to build worker pool, using the global pool: {}", e);
                run()
            }
        };

        per_document.into_iter().flatten().collect()
    }

    /// Process one document and hand its retrieval units to `indexer`
    pub fn process_and_index(
        &self,
        input: impl Into<DocumentInput>,
        source_id: &str,
        indexer: &dyn ChunkIndexer,
    ) -> Result<Vec<Chunk>> {
        let chunks = self.process_document(input, source_id)?;
        let units = export::retrieval_units(&chunks);
        if units.is_empty() {
            return Ok(chunks);
        }

        let started = Instant::now();
        match indexer.index_chunks(source_id, &units) {
            Ok(indexed) => {
                self.monitor.record_success(INDEX_OPERATION, started.elapsed());
                tracing::info!("Indexed {} of {} units from {}", indexed, units.len(), source_id);
                Ok(chunks)
            }
            Err(e) => {
                Counters::add(&self.counters.errors, 1);
                self.monitor.record_error(INDEX_OPERATION, &e.to_string());
                tracing::error!("Failed to index {}: {}", source_id, e);
                Err(e)
            }
        }
    }

    fn process_source(&self, document: &SourceDocument) -> Result<Vec<Chunk>> {
        if document.is_empty() {
            tracing::warn!("Document {} is empty", document.source_id);
            return Ok(Vec::new());
        }

        let mut chunks = self.chunker.chunk_document(&document.content, &document.source_id);
        Counters::add(&self.counters.chunks_created, chunks.len() as u64);

        let suspended = self.auto_fallback_active();
        if suspended {
            tracing::warn!(
                "Auto fallback active, skipping enrichment for {}",
                document.source_id
            );
        }

        for chunk in &mut chunks {
            chunk.metadata.insert(
                "content_hash".to_string(),
                serde_json::json!(document.content_hash),
            );
            chunk.metadata.insert(
                "document_format".to_string(),
                serde_json::json!(document.format.as_str()),
            );
            if let Some(path) = &document.path {
                chunk.metadata.insert(
                    "source_path".to_string(),
                    serde_json::json!(path.display().to_string()),
                );
            }

            if suspended {
                if stage_for(chunk.content_type()).is_some() {
                    Counters::add(&self.counters.skipped_enrichments, 1);
                }
                continue;
            }
            self.enrich_chunk(chunk)?;
        }

        Ok(chunks)
    }

    /// Dispatch a chunk to the stage matching its content type
    fn enrich_chunk(&self, chunk: &mut Chunk) -> Result<()> {
        let Some(stage) = stage_for(chunk.content_type()) else {
            return Ok(());
        };

        let started = Instant::now();
        let outcome = self.run_stage(stage, chunk);
        let elapsed = started.elapsed();
        chunk.processing_time_ms += elapsed.as_secs_f64() * 1000.0;

        match outcome {
            Ok(Enrichment::Attached) => {
                let counter = match stage {
                    Stage::Mathematical => &self.counters.mathematical_contents,
                    Stage::Asset => &self.counters.asset_contents,
                    Stage::Glossary => &self.counters.glossary_contents,
                };
                Counters::add(counter, 1);
                self.monitor.record_success(stage.operation(), elapsed);
                Ok(())
            }
            Ok(Enrichment::Empty) => {
                tracing::debug!(
                    "No {} payload found in chunk {} of {}",
                    stage,
                    chunk.chunk_index,
                    chunk.source_id
                );
                self.monitor.record_success(stage.operation(), elapsed);
                Ok(())
            }
            Err(Error::StageUnavailable(_)) => {
                Counters::add(&self.counters.skipped_enrichments, 1);
                Ok(())
            }
            Err(e) => {
                Counters::add(&self.counters.errors, 1);
                chunk.error_count += 1;
                self.monitor.record_error(stage.operation(), &e.to_string());

                if self.config.enrichment.fallback_on_error && e.is_recoverable() {
                    tracing::warn!(
                        "Falling back to base classification for chunk {} of {}: {}",
                        chunk.chunk_index,
                        chunk.source_id,
                        e
                    );
                    chunk
                        .metadata
                        .insert("enrichment_error".to_string(), serde_json::json!(e.to_string()));
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    fn run_stage(&self, stage: Stage, chunk: &mut Chunk) -> Result<Enrichment> {
        if !self.stage_enabled(stage) {
            return Err(Error::StageUnavailable(stage));
        }

        match stage {
            Stage::Mathematical => {
                let markup = self.math.extract_equation_markup(&chunk.text);
                let math = self.math.process_equation(&markup);
                if let Some(error) = &math.error {
                    return Err(Error::stage(stage, error.clone()));
                }
                if math.math_tokens.is_empty() {
                    return Ok(Enrichment::Empty);
                }
                chunk
                    .attach_math(math)
                    .map_err(|e| Error::stage(stage, e.to_string()))?;
            }
            Stage::Asset => {
                let Some(asset) = self.assets.process_asset(&chunk.text, &chunk.source_id) else {
                    return Ok(Enrichment::Empty);
                };
                chunk
                    .attach_asset(asset)
                    .map_err(|e| Error::stage(stage, e.to_string()))?;
            }
            Stage::Glossary => {
                let entry = self
                    .glossary
                    .extract_glossary_terms(&chunk.text, &chunk.source_id)
                    .into_iter()
                    .reduce(|best, next| if next.confidence > best.confidence { next } else { best });
                let Some(entry) = entry else {
                    return Ok(Enrichment::Empty);
                };
                chunk
                    .attach_glossary(entry)
                    .map_err(|e| Error::stage(stage, e.to_string()))?;
            }
        }
        Ok(Enrichment::Attached)
    }

    /// Enrichment is suspended once enough errors pile up at a high rate
    pub fn auto_fallback_active(&self) -> bool {
        let enrichment = &self.config.enrichment;
        if !enrichment.enable_auto_fallback {
            return false;
        }
        self.monitor.error_count() >= enrichment.max_errors_before_fallback
            && self.monitor.error_rate() > self.monitor.thresholds().max_error_rate
    }

    pub fn counters(&self) -> ProcessingCounters {
        self.counters.snapshot()
    }

    /// Counters, chunk/asset/glossary summaries and monitor metrics
    pub fn processing_statistics(&self, chunks: &[Chunk]) -> ProcessingStatistics {
        let assets: Vec<_> = chunks.iter().filter_map(|c| c.asset().cloned()).collect();
        let entries: Vec<_> = chunks.iter().filter_map(|c| c.glossary().cloned()).collect();

        ProcessingStatistics {
            counters: self.counters(),
            chunks: chunk_statistics(chunks),
            assets: asset_statistics(&assets),
            glossary: glossary_statistics(&entries),
            classification: classification_summary(
                chunks.iter().map(|c| (c.content_type(), c.confidence)),
            ),
            monitor: self.monitor.get_metrics(),
            enabled_stages: self.enabled_stages(),
            auto_fallback_active: self.auto_fallback_active(),
        }
    }

    pub fn export_chunks(&self, chunks: &[Chunk], format: ExportFormat) -> Result<String> {
        export::export_chunks(chunks, format)
    }

    pub fn health(&self) -> HealthSnapshot {
        self.monitor.check_health()
    }

    /// Zero the counters and the monitor metrics
    pub fn reset_statistics(&self) {
        for counter in [
            &self.counters.documents_processed,
            &self.counters.documents_failed,
            &self.counters.chunks_created,
            &self.counters.mathematical_contents,
            &self.counters.asset_contents,
            &self.counters.glossary_contents,
            &self.counters.errors,
            &self.counters.skipped_enrichments,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.monitor.reset_metrics();
    }
}

fn stage_for(content_type: ContentType) -> Option<Stage> {
    match content_type {
        ContentType::Equation => Some(Stage::Mathematical),
        ContentType::Figure | ContentType::Table => Some(Stage::Asset),
        ContentType::Definition => Some(Stage::Glossary),
        _ => None,
    }
}
