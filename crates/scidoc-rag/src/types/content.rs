//! Content types and the specialized payloads attached to enriched chunks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Primary classification of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Running text
    Prose,
    /// Inline or display mathematics
    Equation,
    /// Figure block or image
    Figure,
    /// Tabular data
    Table,
    /// Term/definition pair (glossary entry)
    #[serde(alias = "glossary")]
    Definition,
    /// Source code or verbatim listing
    Code,
    /// Citation, cross-reference or link
    Reference,
    /// Several content types without a clear winner
    Mixed,
    /// Anything else
    Other,
}

impl ContentType {
    /// Every content type, in declaration order
    pub const ALL: [ContentType; 9] = [
        ContentType::Prose,
        ContentType::Equation,
        ContentType::Figure,
        ContentType::Table,
        ContentType::Definition,
        ContentType::Code,
        ContentType::Reference,
        ContentType::Mixed,
        ContentType::Other,
    ];

    /// Lowercase name used in exports and metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Prose => "prose",
            ContentType::Equation => "equation",
            ContentType::Figure => "figure",
            ContentType::Table => "table",
            ContentType::Definition => "definition",
            ContentType::Code => "code",
            ContentType::Reference => "reference",
            ContentType::Mixed => "mixed",
            ContentType::Other => "other",
        }
    }

    /// Whether chunks of this type are never split by the chunker
    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            ContentType::Equation | ContentType::Figure | ContentType::Table | ContentType::Code
        )
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "prose" | "text" => Ok(ContentType::Prose),
            "equation" | "math" => Ok(ContentType::Equation),
            "figure" | "image" => Ok(ContentType::Figure),
            "table" => Ok(ContentType::Table),
            "definition" | "glossary" => Ok(ContentType::Definition),
            "code" => Ok(ContentType::Code),
            "reference" | "citation" => Ok(ContentType::Reference),
            "mixed" => Ok(ContentType::Mixed),
            "other" => Ok(ContentType::Other),
            other => Err(format!("unknown content type: {}", other)),
        }
    }
}

/// Structural category of an equation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquationType {
    Fraction,
    Summation,
    Integral,
    Radical,
    Equation,
    SetMembership,
    SetRelation,
    Expression,
    Unknown,
}

impl EquationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquationType::Fraction => "fraction",
            EquationType::Summation => "summation",
            EquationType::Integral => "integral",
            EquationType::Radical => "radical",
            EquationType::Equation => "equation",
            EquationType::SetMembership => "set_membership",
            EquationType::SetRelation => "set_relation",
            EquationType::Expression => "expression",
            EquationType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EquationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processed equation attached to `Equation` chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MathematicalContent {
    /// Original equation markup
    pub equation_tex: String,
    /// Canonical ASCII-like form, free of markup control characters
    pub math_norm: String,
    /// Tokens of the normalized form, left to right
    pub math_tokens: Vec<String>,
    /// Sliding windows of `k` space-joined tokens
    pub math_kgrams: Vec<String>,
    /// Structural category
    pub equation_type: EquationType,
    /// Heuristic difficulty score, capped at 10.0
    pub complexity_score: f32,
    /// Distinct identifiers in order of first appearance
    #[serde(default)]
    pub variables: Vec<String>,
    /// Distinct operators in order of first appearance
    #[serde(default)]
    pub operators: Vec<String>,
    /// Simplified form, only present when a canonicalizer is installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math_canonical: Option<String>,
    /// Set when processing fell back to the raw markup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MathematicalContent {
    /// Result for empty markup
    pub fn empty() -> Self {
        Self {
            equation_tex: String::new(),
            math_norm: String::new(),
            math_tokens: Vec::new(),
            math_kgrams: Vec::new(),
            equation_type: EquationType::Unknown,
            complexity_score: 0.0,
            variables: Vec::new(),
            operators: Vec::new(),
            math_canonical: None,
            error: None,
        }
    }

    /// Fallback result that carries the raw markup as its only token and k-gram
    pub fn fallback(equation_tex: &str, error: impl Into<String>) -> Self {
        Self {
            equation_tex: equation_tex.to_string(),
            math_norm: equation_tex.to_string(),
            math_tokens: vec![equation_tex.to_string()],
            math_kgrams: vec![equation_tex.to_string()],
            equation_type: EquationType::Unknown,
            complexity_score: 0.0,
            variables: Vec::new(),
            operators: Vec::new(),
            math_canonical: None,
            error: Some(error.into()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// Kind of visual asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Figure,
    Table,
}

impl AssetType {
    /// Content type a chunk carrying this asset must have
    pub fn content_type(&self) -> ContentType {
        match self {
            AssetType::Figure => ContentType::Figure,
            AssetType::Table => ContentType::Table,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetType::Figure => write!(f, "figure"),
            AssetType::Table => write!(f, "table"),
        }
    }
}

/// Figure or table metadata attached to `Figure`/`Table` chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetContent {
    pub asset_type: AssetType,
    /// Source document identifier
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Image path (figures only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    /// Row-major cell matrix (tables only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_data: Option<Vec<Vec<String>>>,
}

impl AssetContent {
    /// Create figure metadata
    pub fn figure(source_id: impl Into<String>) -> Self {
        Self {
            asset_type: AssetType::Figure,
            source_id: source_id.into(),
            caption: None,
            label: None,
            file_reference: None,
            alt_text: None,
            table_data: None,
        }
    }

    /// Create table metadata
    pub fn table(source_id: impl Into<String>) -> Self {
        Self {
            asset_type: AssetType::Table,
            ..Self::figure(source_id)
        }
    }

    /// File references only on figures, cell data only on tables
    pub fn is_consistent(&self) -> bool {
        match self.asset_type {
            AssetType::Figure => self.table_data.is_none(),
            AssetType::Table => self.file_reference.is_none(),
        }
    }
}

/// Term/definition pair attached to `Definition` chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossaryContent {
    pub term: String,
    pub definition: String,
    /// Field or setting the definition applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Distinct related terms in order of appearance
    #[serde(default)]
    pub related_terms: Vec<String>,
    pub confidence: f32,
}

impl GlossaryContent {
    /// Build an entry; `None` unless both term and definition are non-empty
    pub fn new(term: impl Into<String>, definition: impl Into<String>, confidence: f32) -> Option<Self> {
        let term = term.into().trim().to_string();
        let definition = definition.into().trim().to_string();
        if term.is_empty() || definition.is_empty() {
            return None;
        }
        Some(Self {
            term,
            definition,
            context: None,
            related_terms: Vec::new(),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    /// Text handed to the embedding layer
    pub fn retrieval_text(&self) -> String {
        format!("{}: {}", self.term, self.definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parsing() {
        assert_eq!("glossary".parse::<ContentType>().unwrap(), ContentType::Definition);
        assert_eq!("Equation".parse::<ContentType>().unwrap(), ContentType::Equation);
        assert!("diagram".parse::<ContentType>().is_err());
    }

    #[test]
    fn test_content_type_serde_accepts_glossary_alias() {
        let ty: ContentType = serde_json::from_str("\"glossary\"").unwrap();
        assert_eq!(ty, ContentType::Definition);
        assert_eq!(serde_json::to_string(&ty).unwrap(), "\"definition\"");
    }

    #[test]
    fn test_fallback_math_content() {
        let content = MathematicalContent::fallback("$x", "unterminated");
        assert_eq!(content.math_tokens, vec!["$x".to_string()]);
        assert_eq!(content.math_kgrams, vec!["$x".to_string()]);
        assert!(content.is_fallback());
    }

    #[test]
    fn test_asset_consistency() {
        let mut figure = AssetContent::figure("paper");
        figure.file_reference = Some("plot.png".to_string());
        assert!(figure.is_consistent());

        let mut table = AssetContent::table("paper");
        table.file_reference = Some("plot.png".to_string());
        assert!(!table.is_consistent());
    }

    #[test]
    fn test_glossary_requires_both_halves() {
        assert!(GlossaryContent::new("Term", "  ", 0.9).is_none());
        assert!(GlossaryContent::new("", "definition", 0.9).is_none());
        let entry = GlossaryContent::new(" Dark Matter ", "Matter that emits no light", 1.4).unwrap();
        assert_eq!(entry.term, "Dark Matter");
        assert_eq!(entry.confidence, 1.0);
        assert_eq!(entry.retrieval_text(), "Dark Matter: Matter that emits no light");
    }
}
