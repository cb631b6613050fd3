//! Chunk export for persistence and bulk analytics

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Chunk, ContentType};

/// Columns of the flattened tabular export
pub const CSV_HEADER: [&str; 5] = ["id", "text", "content_type", "source_id", "chunk_index"];

/// Supported export encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Field-for-field records
    Json,
    /// Flattened rows
    Csv,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Csv => write!(f, "csv"),
        }
    }
}

/// What the embedding collaborator indexes for one chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalUnit {
    pub chunk_id: Uuid,
    pub source_id: String,
    pub chunk_index: u32,
    pub content_type: ContentType,
    /// Normalized equation, "term: definition", or the raw text
    pub text: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl From<&Chunk> for RetrievalUnit {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id,
            source_id: chunk.source_id.clone(),
            chunk_index: chunk.chunk_index,
            content_type: chunk.content_type(),
            text: chunk.retrieval_text(),
            metadata: chunk.to_vector_metadata(),
        }
    }
}

/// Serialize chunks in the requested format
pub fn export_chunks(chunks: &[Chunk], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(chunks)?),
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record(CSV_HEADER)?;
            for chunk in chunks {
                writer.write_record([
                    chunk.id.to_string(),
                    chunk.text.clone(),
                    chunk.content_type().to_string(),
                    chunk.source_id.clone(),
                    chunk.chunk_index.to_string(),
                ])?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|e| Error::internal(format!("CSV flush failed: {}", e)))?;
            String::from_utf8(bytes).map_err(|e| Error::internal(e.to_string()))
        }
    }
}

/// Retrieval units in chunk order, skipping chunks with blank retrieval text
pub fn retrieval_units(chunks: &[Chunk]) -> Vec<RetrievalUnit> {
    chunks
        .iter()
        .map(RetrievalUnit::from)
        .filter(|unit| !unit.text.trim().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GlossaryContent;

    fn chunks() -> Vec<Chunk> {
        let mut definition = Chunk::new(
            "**Dark Matter**: A form of matter, \"unseen\".".to_string(),
            "doc",
            0,
            0,
            44,
        );
        definition.classify(ContentType::Definition, 0.8);
        definition
            .attach_glossary(GlossaryContent::new("Dark Matter", "A form of matter", 0.9).unwrap())
            .unwrap();
        let prose = Chunk::new("Plain text\nover two lines".to_string(), "doc", 1, 44, 69);
        vec![definition, prose]
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!(" csv ".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        let err = "xml".parse::<ExportFormat>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(ref f) if f == "xml"));
    }

    #[test]
    fn test_json_export_round_trips_payload() {
        let json = export_chunks(&chunks(), ExportFormat::Json).unwrap();
        let parsed: Vec<Chunk> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].glossary().unwrap().term, "Dark Matter");
        assert_eq!(parsed[1].content_type(), ContentType::Prose);
    }

    #[test]
    fn test_csv_export_rows() {
        let csv_text = export_chunks(&chunks(), ExportFormat::Csv).unwrap();
        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, CSV_HEADER.to_vec());

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "**Dark Matter**: A form of matter, \"unseen\".");
        assert_eq!(&rows[0][2], "definition");
        assert_eq!(&rows[1][1], "Plain text\nover two lines");
        assert_eq!(&rows[1][4], "1");
    }

    #[test]
    fn test_retrieval_units() {
        let units = retrieval_units(&chunks());
        assert_eq!(units[0].text, "Dark Matter: A form of matter");
        assert_eq!(units[1].text, "Plain text\nover two lines");
        assert_eq!(units[0].metadata["term"], serde_json::json!("Dark Matter"));
    }
}
