//! Type-signature detectors
//!
//! Each detector scores one content type in [0, 1] from marker presence and
//! density. Detectors are independent; the classifier combines them.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::markup;
use crate::processing::math::{detect_equations, MATH_ENVIRONMENTS};
use crate::types::ContentType;

/// Detector signature
pub type Detector = fn(&str) -> f32;

/// Detectors in tie-break priority order
pub const DETECTORS: &[(ContentType, Detector)] = &[
    (ContentType::Equation, equation_score),
    (ContentType::Table, table_score),
    (ContentType::Figure, figure_score),
    (ContentType::Definition, definition_score),
    (ContentType::Code, code_score),
    (ContentType::Reference, reference_score),
];

static MD_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\|?\s*:?-{3,}:?\s*(?:\|\s*:?-{3,}:?\s*)+\|?\s*$").unwrap());
static MD_IMAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)\s]+[^)]*\)").unwrap());
static BOLD_TERM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:[-*+]\s+)?(?:\*\*[^*\n]+\*\*\s*:|\*\*[^*\n]+:\*\*|__[^_\n]+__\s*:|\\(?:textbf|emph|term)\{[^}\n]+\}\s*:)").unwrap()
});
static DEFINED_AS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:is|are)\s+defined\s+(?:as|to\s+be)\b").unwrap());
static REFERS_TO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:refers?\s+to|denotes)\b").unwrap());
static BARE_TERM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[A-Z][A-Za-z \-]{1,40}:\s+\S").unwrap());
static MEANS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmeans\b").unwrap());
static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*(?:```|~~~)").unwrap());
static INLINE_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]+`").unwrap());
static CITE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:cite[a-z]*|bibitem)\*?(?:\[[^\]]*\])?\{").unwrap());
static MD_LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|[^!])\[[^\]\n]+\]\([^)\s]+\)").unwrap());
static DOI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b10\.\d{4,9}/\S+").unwrap());
static REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\(?:eq|auto|page|c)?ref\{").unwrap());
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());
static NUMERIC_CITATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\d+(?:\s*[,\-]\s*\d+)*\]").unwrap());

/// Delimited math: environments and display math score high, inline math by density
pub fn equation_score(text: &str) -> f32 {
    let spans = detect_equations(text);
    if spans.is_empty() {
        return 0.0;
    }
    if !markup::find_environments(text, MATH_ENVIRONMENTS).is_empty() {
        return 0.9;
    }
    if spans.iter().any(|span| span.delimiter.is_display()) {
        return 0.8;
    }

    let math_len: usize = spans.iter().map(|span| span.end - span.start).sum();
    let density = math_len as f32 / text.trim().len().max(1) as f32;
    (0.45 + 0.3 * density).min(0.75)
}

/// Row/column delimiters
pub fn table_score(text: &str) -> f32 {
    if !markup::find_environments(text, &["table", "tabular", "tabularx", "longtable"]).is_empty() {
        return 0.9;
    }
    let pipe_rows = text
        .lines()
        .filter(|line| line.trim_start().starts_with('|') && line.matches('|').count() >= 2)
        .count();
    if pipe_rows >= 2 && MD_SEPARATOR_RE.is_match(text) {
        return 0.8;
    }
    if pipe_rows >= 2 {
        return 0.5;
    }
    0.0
}

/// Caption/graphics markers
pub fn figure_score(text: &str) -> f32 {
    if let Some(env) = markup::find_environments(text, &["figure", "wrapfigure"]).first() {
        let body = env.body(text);
        return if body.contains("\\includegraphics") || body.contains("\\caption") {
            0.95
        } else {
            0.85
        };
    }
    if !markup::find_environments(text, &["tikzpicture"]).is_empty() {
        return 0.8;
    }
    if text.contains("\\includegraphics") || MD_IMAGE_RE.is_match(text) {
        return 0.7;
    }
    0.0
}

/// Term-then-colon and definitional phrasing
pub fn definition_score(text: &str) -> f32 {
    if BOLD_TERM_RE.is_match(text) {
        0.8
    } else if DEFINED_AS_RE.is_match(text) {
        0.6
    } else if BARE_TERM_RE.is_match(text) {
        0.45
    } else if REFERS_TO_RE.is_match(text) {
        0.4
    } else if MEANS_RE.is_match(text) {
        0.35
    } else {
        0.0
    }
}

/// Whether `text` names a term that whatever follows goes on to define
pub fn introduces_term(text: &str) -> bool {
    BOLD_TERM_RE.is_match(text) || DEFINED_AS_RE.is_match(text)
}

/// Fenced, verbatim or inline code
pub fn code_score(text: &str) -> f32 {
    if FENCE_RE.is_match(text) {
        return 0.9;
    }
    if !markup::find_environments(text, &["verbatim", "lstlisting", "minted", "Verbatim"]).is_empty() {
        return 0.85;
    }
    if INLINE_CODE_RE.is_match(text) {
        return 0.4;
    }
    0.0
}

/// Citation, cross-reference and link markers
pub fn reference_score(text: &str) -> f32 {
    if CITE_RE.is_match(text) {
        0.8
    } else if MD_LINK_RE.is_match(text) || DOI_RE.is_match(text) {
        0.6
    } else if REF_RE.is_match(text) {
        0.5
    } else if URL_RE.is_match(text) {
        0.45
    } else if NUMERIC_CITATION_RE.is_match(text) {
        0.4
    } else {
        0.0
    }
}
