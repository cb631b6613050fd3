//! Document ingestion: reading, boundary-aware chunking and enrichment

pub mod boundaries;
mod chunker;
mod processor;
mod reader;

pub use boundaries::{detect_atomic_spans, AtomicKind, AtomicSpan};
pub use chunker::{chunk_statistics, ChunkStatistics, EnhancedChunker};
pub use processor::{
    ChunkIndexer, DocumentProcessor, ProcessingCounters, ProcessingStatistics,
};
pub use reader::{hash_content, DocumentFormat, DocumentInput, DocumentReader, SourceDocument};
