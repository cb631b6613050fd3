//! scidoc-rag: content-aware chunking and enrichment of scientific documents
//!
//! Documents mixing prose, equations, figures, tables and inline definitions are
//! split into typed chunks without bisecting atomic spans. Equation chunks carry
//! normalized tokens and k-grams, figure/table chunks carry captions and cell
//! data, and definition chunks carry term/definition pairs ready for retrieval.

pub mod classification;
pub mod config;
pub mod error;
pub mod export;
pub mod ingestion;
pub mod markup;
pub mod monitoring;
pub mod processing;
pub mod types;

pub use classification::{ClassificationHints, ContentClassifier};
pub use config::PipelineConfig;
pub use error::{Error, Result, Stage};
pub use export::{export_chunks, retrieval_units, ExportFormat, RetrievalUnit};
pub use ingestion::{ChunkIndexer, DocumentInput, DocumentProcessor, EnhancedChunker};
pub use monitoring::{HealthSnapshot, HealthStatus, ProcessingMonitor};
pub use processing::{AssetProcessor, GlossaryExtractor, MathematicalProcessor};
pub use types::{
    reconstruct_text, AssetContent, Chunk, ChunkContent, ContentType, GlossaryContent,
    MathematicalContent,
};
