//! Document reading and format detection

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Where a document comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentInput {
    /// File on disk, decoded as UTF-8
    Path(PathBuf),
    /// In-memory text
    Text(String),
    /// Raw bytes, decoded as UTF-8
    Bytes(Vec<u8>),
}

impl From<&Path> for DocumentInput {
    fn from(path: &Path) -> Self {
        DocumentInput::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for DocumentInput {
    fn from(path: PathBuf) -> Self {
        DocumentInput::Path(path)
    }
}

impl From<String> for DocumentInput {
    fn from(text: String) -> Self {
        DocumentInput::Text(text)
    }
}

impl From<&str> for DocumentInput {
    fn from(text: &str) -> Self {
        DocumentInput::Text(text.to_string())
    }
}

impl From<Vec<u8>> for DocumentInput {
    fn from(bytes: Vec<u8>) -> Self {
        DocumentInput::Bytes(bytes)
    }
}

/// Markup flavor of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Markdown,
    Latex,
    Text,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Latex => "latex",
            DocumentFormat::Text => "text",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "md" | "markdown" | "mdx" | "rmd" | "qmd" => Some(DocumentFormat::Markdown),
            "tex" | "latex" | "ltx" | "sty" | "cls" | "bbl" => Some(DocumentFormat::Latex),
            "txt" | "text" => Some(DocumentFormat::Text),
            _ => None,
        }
    }

    /// Guess the format from content markers
    pub fn detect(content: &str) -> Self {
        let latex_markers = ["\\documentclass", "\\begin{", "\\section", "\\usepackage", "\\cite{"];
        if latex_markers.iter().any(|m| content.contains(m)) {
            return DocumentFormat::Latex;
        }
        let markdown = content.lines().any(|line| {
            let line = line.trim_start();
            line.starts_with("# ")
                || line.starts_with("## ")
                || line.starts_with("```")
                || line.starts_with("![")
                || (line.starts_with('|') && line.ends_with('|'))
        }) || content.contains("**");
        if markdown {
            DocumentFormat::Markdown
        } else {
            DocumentFormat::Text
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded document ready for chunking
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub source_id: String,
    pub content: String,
    pub format: DocumentFormat,
    /// SHA-256 of the decoded content, hex encoded
    pub content_hash: String,
    pub path: Option<PathBuf>,
}

impl SourceDocument {
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Reads documents from disk or memory
#[derive(Debug, Clone, Default)]
pub struct DocumentReader;

impl DocumentReader {
    pub fn new() -> Self {
        Self
    }

    /// Read and decode a document. Missing files and invalid UTF-8 are errors;
    /// an empty document is not.
    pub fn read(&self, input: &DocumentInput, source_id: &str) -> Result<SourceDocument> {
        let (content, path) = match input {
            DocumentInput::Path(path) => {
                let bytes = std::fs::read(path)
                    .map_err(|e| Error::read(source_id, format!("{}: {}", path.display(), e)))?;
                (decode(&bytes, source_id)?, Some(path.clone()))
            }
            DocumentInput::Text(text) => (strip_bom(text).to_string(), None),
            DocumentInput::Bytes(bytes) => (decode(bytes, source_id)?, None),
        };

        let format = path
            .as_deref()
            .and_then(|p| p.extension())
            .and_then(|ext| ext.to_str())
            .and_then(DocumentFormat::from_extension)
            .unwrap_or_else(|| DocumentFormat::detect(&content));

        Ok(SourceDocument {
            source_id: source_id.to_string(),
            content_hash: hash_content(&content),
            content,
            format,
            path,
        })
    }
}

fn decode(bytes: &[u8], source_id: &str) -> Result<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::read(source_id, format!("invalid UTF-8: {}", e)))?;
    Ok(strip_bom(text).to_string())
}

fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Hash content for deduplication
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
