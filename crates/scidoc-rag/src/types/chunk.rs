//! Chunk type with its typed enrichment payload

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::content::{AssetContent, ContentType, GlossaryContent, MathematicalContent};
use crate::error::{Error, Result};

/// Schema version stamped on every chunk
pub const CHUNK_SCHEMA_VERSION: &str = "1.0";

fn default_version() -> String {
    CHUNK_SCHEMA_VERSION.to_string()
}

/// Content type of a chunk together with the payload that type allows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "content_type", content = "payload", rename_all = "lowercase")]
pub enum ChunkContent {
    Prose,
    Equation(Option<MathematicalContent>),
    Figure(Option<AssetContent>),
    Table(Option<AssetContent>),
    #[serde(alias = "glossary")]
    Definition(Option<GlossaryContent>),
    Code,
    Reference,
    Mixed,
    Other,
}

impl ChunkContent {
    /// Variant for `content_type` without any payload
    pub fn empty(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Prose => ChunkContent::Prose,
            ContentType::Equation => ChunkContent::Equation(None),
            ContentType::Figure => ChunkContent::Figure(None),
            ContentType::Table => ChunkContent::Table(None),
            ContentType::Definition => ChunkContent::Definition(None),
            ContentType::Code => ChunkContent::Code,
            ContentType::Reference => ChunkContent::Reference,
            ContentType::Mixed => ChunkContent::Mixed,
            ContentType::Other => ChunkContent::Other,
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            ChunkContent::Prose => ContentType::Prose,
            ChunkContent::Equation(_) => ContentType::Equation,
            ChunkContent::Figure(_) => ContentType::Figure,
            ChunkContent::Table(_) => ContentType::Table,
            ChunkContent::Definition(_) => ContentType::Definition,
            ChunkContent::Code => ContentType::Code,
            ChunkContent::Reference => ContentType::Reference,
            ChunkContent::Mixed => ContentType::Mixed,
            ChunkContent::Other => ContentType::Other,
        }
    }

    /// Name of the attached payload, if any
    pub fn payload_name(&self) -> Option<&'static str> {
        match self {
            ChunkContent::Equation(Some(_)) => Some("mathematical"),
            ChunkContent::Figure(Some(_)) | ChunkContent::Table(Some(_)) => Some("asset"),
            ChunkContent::Definition(Some(_)) => Some("glossary"),
            _ => None,
        }
    }
}

/// A classified span of a source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk ID
    pub id: Uuid,
    /// Literal text, including any overlap carried from the previous chunk
    pub text: String,
    /// Source document identifier
    pub source_id: String,
    /// Zero-based position within the source
    pub chunk_index: u32,
    /// Byte range of `text` in the source document
    pub char_start: usize,
    pub char_end: usize,
    /// Leading bytes of `text` repeated from the previous chunk
    #[serde(default)]
    pub overlap_len: usize,
    /// Primary classification and payload
    content: ChunkContent,
    /// Classification confidence in [0, 1]
    pub confidence: f32,
    /// Processing metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Number of errors hit while enriching this chunk
    #[serde(default)]
    pub error_count: u32,
    /// Cumulative enrichment time
    #[serde(default)]
    pub processing_time_ms: f64,
    #[serde(default = "default_version")]
    pub version: String,
}

impl Chunk {
    /// Create an unclassified (prose) chunk
    pub fn new(
        text: String,
        source_id: impl Into<String>,
        chunk_index: u32,
        char_start: usize,
        char_end: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            source_id: source_id.into(),
            chunk_index,
            char_start,
            char_end,
            overlap_len: 0,
            content: ChunkContent::Prose,
            confidence: 0.0,
            metadata: HashMap::new(),
            error_count: 0,
            processing_time_ms: 0.0,
            version: default_version(),
        }
    }

    pub fn content_type(&self) -> ContentType {
        self.content.content_type()
    }

    pub fn content(&self) -> &ChunkContent {
        &self.content
    }

    /// Set the primary classification. A payload survives only if the type is unchanged.
    pub fn classify(&mut self, content_type: ContentType, confidence: f32) {
        if self.content.content_type() != content_type {
            self.content = ChunkContent::empty(content_type);
        }
        self.confidence = confidence.clamp(0.0, 1.0);
    }

    /// Attach equation data; only valid on equation chunks
    pub fn attach_math(&mut self, math: MathematicalContent) -> Result<()> {
        match &mut self.content {
            ChunkContent::Equation(slot) => {
                *slot = Some(math);
                Ok(())
            }
            other => Err(mismatch("mathematical", other)),
        }
    }

    /// Attach figure/table data; the asset type must match the chunk type
    pub fn attach_asset(&mut self, asset: AssetContent) -> Result<()> {
        if !asset.is_consistent() {
            return Err(Error::PayloadMismatch {
                payload: "asset",
                content_type: asset.asset_type.to_string(),
            });
        }
        match (&mut self.content, asset.asset_type.content_type()) {
            (ChunkContent::Figure(slot), ContentType::Figure)
            | (ChunkContent::Table(slot), ContentType::Table) => {
                *slot = Some(asset);
                Ok(())
            }
            (other, _) => Err(mismatch("asset", other)),
        }
    }

    /// Attach a glossary entry; only valid on definition chunks
    pub fn attach_glossary(&mut self, entry: GlossaryContent) -> Result<()> {
        match &mut self.content {
            ChunkContent::Definition(slot) => {
                *slot = Some(entry);
                Ok(())
            }
            other => Err(mismatch("glossary", other)),
        }
    }

    pub fn math(&self) -> Option<&MathematicalContent> {
        match &self.content {
            ChunkContent::Equation(math) => math.as_ref(),
            _ => None,
        }
    }

    pub fn asset(&self) -> Option<&AssetContent> {
        match &self.content {
            ChunkContent::Figure(asset) | ChunkContent::Table(asset) => asset.as_ref(),
            _ => None,
        }
    }

    pub fn glossary(&self) -> Option<&GlossaryContent> {
        match &self.content {
            ChunkContent::Definition(entry) => entry.as_ref(),
            _ => None,
        }
    }

    pub fn has_payload(&self) -> bool {
        self.content.payload_name().is_some()
    }

    /// Text of this chunk without the overlap prefix
    pub fn own_text(&self) -> &str {
        self.text.get(self.overlap_len..).unwrap_or(&self.text)
    }

    /// Unit handed to the embedding layer
    pub fn retrieval_text(&self) -> String {
        if let Some(math) = self.math() {
            if !math.math_norm.is_empty() {
                return math.math_norm.clone();
            }
        }
        if let Some(entry) = self.glossary() {
            return entry.retrieval_text();
        }
        self.text.clone()
    }

    /// Convert to vector metadata for storage
    pub fn to_vector_metadata(&self) -> HashMap<String, serde_json::Value> {
        let mut meta = HashMap::new();
        meta.insert("chunk_id".to_string(), serde_json::json!(self.id.to_string()));
        meta.insert("source_id".to_string(), serde_json::json!(self.source_id));
        meta.insert("chunk_index".to_string(), serde_json::json!(self.chunk_index));
        meta.insert("content_type".to_string(), serde_json::json!(self.content_type().as_str()));
        meta.insert("confidence".to_string(), serde_json::json!(self.confidence));
        meta.insert("char_start".to_string(), serde_json::json!(self.char_start));
        meta.insert("char_end".to_string(), serde_json::json!(self.char_end));
        meta.insert("content".to_string(), serde_json::json!(self.text));
        meta.insert("version".to_string(), serde_json::json!(self.version));

        if let Some(math) = self.math() {
            meta.insert("math_norm".to_string(), serde_json::json!(math.math_norm));
            meta.insert("equation_type".to_string(), serde_json::json!(math.equation_type.as_str()));
            meta.insert("complexity_score".to_string(), serde_json::json!(math.complexity_score));
        }

        if let Some(asset) = self.asset() {
            meta.insert("asset_type".to_string(), serde_json::json!(asset.asset_type.to_string()));
            if let Some(caption) = &asset.caption {
                meta.insert("caption".to_string(), serde_json::json!(caption));
            }
            if let Some(label) = &asset.label {
                meta.insert("label".to_string(), serde_json::json!(label));
            }
        }

        if let Some(entry) = self.glossary() {
            meta.insert("term".to_string(), serde_json::json!(entry.term));
            meta.insert("definition".to_string(), serde_json::json!(entry.definition));
        }

        for key in ["content_hash", "document_format"] {
            if let Some(value) = self.metadata.get(key) {
                meta.insert(key.to_string(), value.clone());
            }
        }

        meta
    }
}

fn mismatch(payload: &'static str, content: &ChunkContent) -> Error {
    Error::PayloadMismatch {
        payload,
        content_type: content.content_type().to_string(),
    }
}

/// Rebuild the source text from an ordered chunk list, dropping overlaps
pub fn reconstruct_text(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::own_text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::content::{AssetType, EquationType};

    fn math() -> MathematicalContent {
        MathematicalContent {
            equation_tex: "E = mc^2".to_string(),
            math_norm: "E = mc^2".to_string(),
            math_tokens: vec!["E".into(), "=".into(), "mc".into(), "^".into(), "2".into()],
            math_kgrams: vec!["E = mc".into(), "= mc ^".into(), "mc ^ 2".into()],
            equation_type: EquationType::Equation,
            complexity_score: 1.2,
            variables: vec!["E".into(), "mc".into()],
            operators: vec!["=".into(), "^".into()],
            math_canonical: None,
            error: None,
        }
    }

    #[test]
    fn test_new_chunk_is_prose() {
        let chunk = Chunk::new("Hello".to_string(), "doc", 0, 0, 5);
        assert_eq!(chunk.content_type(), ContentType::Prose);
        assert!(!chunk.has_payload());
        assert_eq!(chunk.version, CHUNK_SCHEMA_VERSION);
    }

    #[test]
    fn test_payload_must_match_type() {
        let mut chunk = Chunk::new("$x$".to_string(), "doc", 0, 0, 3);
        assert!(matches!(
            chunk.attach_math(math()),
            Err(Error::PayloadMismatch { payload: "mathematical", .. })
        ));

        chunk.classify(ContentType::Equation, 0.9);
        chunk.attach_math(math()).unwrap();
        assert!(chunk.math().is_some());
        assert!(chunk.attach_asset(AssetContent::figure("doc")).is_err());
    }

    #[test]
    fn test_reclassification_drops_payload() {
        let mut chunk = Chunk::new("$x$".to_string(), "doc", 0, 0, 3);
        chunk.classify(ContentType::Equation, 0.9);
        chunk.attach_math(math()).unwrap();

        chunk.classify(ContentType::Equation, 0.95);
        assert!(chunk.math().is_some());

        chunk.classify(ContentType::Prose, 0.3);
        assert!(chunk.math().is_none());
    }

    #[test]
    fn test_asset_type_must_match_chunk() {
        let mut chunk = Chunk::new("table".to_string(), "doc", 0, 0, 5);
        chunk.classify(ContentType::Table, 0.9);
        assert!(chunk.attach_asset(AssetContent::figure("doc")).is_err());

        let mut table = AssetContent::table("doc");
        table.table_data = Some(vec![vec!["a".into(), "b".into()]]);
        chunk.attach_asset(table).unwrap();
        assert_eq!(chunk.asset().map(|a| a.asset_type), Some(AssetType::Table));
    }

    #[test]
    fn test_retrieval_text() {
        let mut chunk = Chunk::new("$$\\alpha$$".to_string(), "doc", 0, 0, 10);
        assert_eq!(chunk.retrieval_text(), "$$\\alpha$$");

        chunk.classify(ContentType::Equation, 0.9);
        let mut payload = math();
        payload.math_norm = "alpha".to_string();
        chunk.attach_math(payload).unwrap();
        assert_eq!(chunk.retrieval_text(), "alpha");

        let mut def = Chunk::new("**Spin**: intrinsic angular momentum".to_string(), "doc", 1, 10, 46);
        def.classify(ContentType::Definition, 0.8);
        def.attach_glossary(GlossaryContent::new("Spin", "intrinsic angular momentum", 0.9).unwrap())
            .unwrap();
        assert_eq!(def.retrieval_text(), "Spin: intrinsic angular momentum");
    }

    #[test]
    fn test_reconstruct_skips_overlap() {
        let mut first = Chunk::new("Alpha beta ".to_string(), "doc", 0, 0, 11);
        first.overlap_len = 0;
        let mut second = Chunk::new("beta gamma".to_string(), "doc", 1, 6, 16);
        second.overlap_len = 5;
        assert_eq!(reconstruct_text(&[first, second]), "Alpha beta gamma");
    }

    #[test]
    fn test_serialization_keeps_payload() {
        let mut chunk = Chunk::new("$x$".to_string(), "doc", 0, 0, 3);
        chunk.classify(ContentType::Equation, 0.9);
        chunk.attach_math(math()).unwrap();

        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("\"content_type\":\"equation\""));
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content(), chunk.content());
        assert_eq!(back.id, chunk.id);
    }

    #[test]
    fn test_vector_metadata() {
        let mut chunk = Chunk::new("text".to_string(), "paper-1", 3, 100, 104);
        chunk
            .metadata
            .insert("content_hash".to_string(), serde_json::json!("abc"));
        let meta = chunk.to_vector_metadata();
        assert_eq!(meta["source_id"], serde_json::json!("paper-1"));
        assert_eq!(meta["chunk_index"], serde_json::json!(3));
        assert_eq!(meta["content_type"], serde_json::json!("prose"));
        assert_eq!(meta["content_hash"], serde_json::json!("abc"));
    }
}
