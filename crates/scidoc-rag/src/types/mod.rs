//! Core types for the document pipeline

pub mod chunk;
pub mod content;

pub use chunk::{reconstruct_text, Chunk, ChunkContent, CHUNK_SCHEMA_VERSION};
pub use content::{
    AssetContent, AssetType, ContentType, EquationType, GlossaryContent, MathematicalContent,
};
