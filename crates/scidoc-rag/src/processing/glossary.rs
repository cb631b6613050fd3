//! Term/definition extraction from running text

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::markup;
use crate::types::GlossaryContent;

/// Terms longer than this are treated as sentence fragments
const MAX_TERM_WORDS: usize = 10;

/// Words whose trailing period does not end a sentence
const ABBREVIATIONS: &[&str] = &[
    "e.g", "i.e", "cf", "etc", "al", "fig", "figs", "eq", "eqs", "vs", "dr", "no", "approx", "resp",
];

static EMPHASIS_COLON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)^\s*(?:[-*+]\s+|\\item\s*|\d+\.\s+)?(?:\*\*([^*]+?)\*\*\s*:|\*\*([^*]+?):\*\*|__([^_]+?)__\s*:|\\(?:textbf|textit|emph|term)\{([^{}]+)\}\s*:)\s*(.+)$",
    )
    .unwrap()
});
static DEFINED_AS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(.+?)\s+(?:is|are)\s+defined\s+(?:as|to\s+be)\s+(.+)$").unwrap()
});
static REFERS_TO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^(.+?)\s+(?:refers?\s+to|denotes?)\s+(.+)$").unwrap());
static MEANS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^(.+?)\s+means\s+(.+)$").unwrap());
static BARE_COLON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*([A-Za-z][^:\n]{0,80}?)\s*:\s+(.+)$").unwrap());
static EMPHASIS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\*\*([^*]+)\*\*|__([^_]+)__|\\(?:textbf|textit|emph|term)\{([^{}]+)\}|\*([^*\s][^*]*)\*").unwrap()
});
static DEFINITION_CUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[(\[,;]?\s*\b(?:see\s+also|compare\s+with)\b|[(\[,;]?\s*\bcf\.").unwrap());
static RELATED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:see\s+also|related\s+to|similar\s+to|compare\s+with)\b|\bcf\.").unwrap()
});
static RELATED_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)[,;]|\s+(?:and|or)\s+").unwrap());
static CONTEXT_PHRASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bin\s+the\s+(?:context|field)\s+of\s+([^,.;:]+)").unwrap());
static CONTEXT_FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bin\s+(mathematics|physics|chemistry|biology|computer\s+science|statistics|astronomy)\b").unwrap()
});
static INLINE_COMMAND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\[A-Za-z]+\*?\{([^{}]*)\}").unwrap());
static BARE_COMMAND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\[A-Za-z]+\*?").unwrap());
static PARAGRAPH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Definition signatures in priority order with their confidence
static MARKERS: Lazy<Vec<(&'static Regex, f32)>> = Lazy::new(|| {
    vec![
        (&*DEFINED_AS_RE, 0.8),
        (&*REFERS_TO_RE, 0.7),
        (&*MEANS_RE, 0.6),
        (&*BARE_COLON_RE, 0.5),
    ]
});

/// Summary over a set of glossary entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlossaryStatistics {
    pub total_terms: usize,
    pub terms_with_context: usize,
    pub terms_with_related: usize,
    pub context_rate: f64,
    pub related_rate: f64,
    pub average_definition_length: f64,
    pub total_related_terms: usize,
}

/// Glossary term and definition extractor
#[derive(Debug, Clone, Default)]
pub struct GlossaryExtractor;

impl GlossaryExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Every term/definition pair found sentence by sentence
    pub fn extract_glossary_terms(&self, text: &str, source_id: &str) -> Vec<GlossaryContent> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let entries: Vec<GlossaryContent> = split_sentences(text)
            .into_iter()
            .filter_map(extract_from_sentence)
            .collect();

        if !entries.is_empty() {
            tracing::debug!("Extracted {} glossary terms from {}", entries.len(), source_id);
        }
        entries
    }

    /// Paragraph-wise extraction over a whole document
    pub fn extract_glossary_from_document(&self, document: &str, source_id: &str) -> Vec<GlossaryContent> {
        PARAGRAPH_RE
            .split(document)
            .filter(|paragraph| !paragraph.trim().is_empty())
            .flat_map(|paragraph| self.extract_glossary_terms(paragraph, source_id))
            .collect()
    }
}

fn extract_from_sentence(sentence: &str) -> Option<GlossaryContent> {
    let (term, definition, confidence) = if let Some(caps) = EMPHASIS_COLON_RE.captures(sentence) {
        let term = (1..=4).find_map(|i| caps.get(i)).map(|m| m.as_str())?;
        (term.to_string(), caps.get(5)?.as_str().to_string(), 0.9)
    } else {
        MARKERS.iter().find_map(|(re, confidence)| {
            let caps = re.captures(sentence)?;
            let head = caps.get(1)?.as_str();
            let term = emphasized(head).unwrap_or_else(|| head.to_string());
            Some((term, caps.get(2)?.as_str().to_string(), *confidence))
        })?
    };

    let term = clean_term(&term)?;
    let definition = clean_definition(&definition);
    let mut entry = GlossaryContent::new(term, definition, confidence)?;
    entry.context = extract_context(sentence);
    entry.related_terms = extract_related_terms(sentence);
    Some(entry)
}

/// Split on terminal punctuation followed by whitespace, and before list items
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let chars: Vec<(usize, char)> = text.char_indices().collect();

    for (pos, &(i, c)) in chars.iter().enumerate() {
        let next = chars.get(pos + 1).map(|&(_, c)| c);
        let boundary = match c {
            '.' | '!' | '?' => {
                next.map_or(true, char::is_whitespace) && !(c == '.' && ends_with_abbreviation(&text[start..i]))
            }
            '\n' => starts_list_item(&text[i + 1..]),
            _ => false,
        };
        if boundary {
            push_sentence(&mut sentences, &text[start..i + c.len_utf8()]);
            start = i + c.len_utf8();
        }
    }
    push_sentence(&mut sentences, &text[start..]);
    sentences
}

fn push_sentence<'a>(sentences: &mut Vec<&'a str>, raw: &'a str) {
    let sentence = raw.trim().trim_end_matches(&['.', '!', '?'][..]).trim_end();
    if !sentence.is_empty() {
        sentences.push(sentence);
    }
}

fn ends_with_abbreviation(before: &str) -> bool {
    let word = before
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or("")
        .trim_start_matches(&['(', '['][..])
        .to_lowercase();
    ABBREVIATIONS.contains(&word.as_str()) || (word.len() == 1 && word.chars().all(char::is_alphabetic))
}

fn starts_list_item(rest: &str) -> bool {
    let line = rest.trim_start_matches(&[' ', '\t'][..]);
    line.starts_with("- ")
        || line.starts_with("* ")
        || line.starts_with("**")
        || line.starts_with("+ ")
        || line.starts_with("\\item")
        || line.starts_with("\\textbf")
        || line
            .split_once(". ")
            .map_or(false, |(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

fn emphasized(text: &str) -> Option<String> {
    let caps = EMPHASIS_RE.captures(text)?;
    (1..=4)
        .find_map(|i| caps.get(i))
        .map(|m| m.as_str().trim().to_string())
}

fn strip_markup(text: &str) -> String {
    let text = INLINE_COMMAND_RE.replace_all(text, "$1");
    let text = BARE_COMMAND_RE.replace_all(&text, " ");
    let text: String = text
        .chars()
        .filter(|c| !matches!(c, '{' | '}' | '*' | '`'))
        .collect();
    markup::collapse_whitespace(&text.replace("__", ""))
}

fn clean_term(raw: &str) -> Option<String> {
    let mut term = strip_markup(raw);
    // drop a leading "In physics," style qualifier
    if term.to_lowercase().starts_with("in ") {
        if let Some((_, rest)) = term.split_once(',') {
            term = rest.trim().to_string();
        }
    }
    for marker in ["- ", "+ ", "\\item "] {
        if let Some(rest) = term.strip_prefix(marker) {
            term = rest.to_string();
        }
    }
    let lowered = term.to_lowercase();
    for article in ["the ", "a ", "an "] {
        if lowered.starts_with(article) && term.len() > article.len() {
            term = term[article.len()..].to_string();
            break;
        }
    }
    let term = term
        .trim_matches(|c: char| !c.is_alphanumeric() && c != ')' && c != '(')
        .to_string();

    let words = term.split_whitespace().count();
    (words > 0 && words <= MAX_TERM_WORDS).then_some(term)
}

fn clean_definition(raw: &str) -> String {
    let cut = DEFINITION_CUT_RE.find(raw).map_or(raw.len(), |m| m.start());
    strip_markup(&raw[..cut])
        .trim_end_matches(&[',', ';', '(', ':', ' '][..])
        .to_string()
}

fn extract_context(sentence: &str) -> Option<String> {
    if let Some(caps) = CONTEXT_PHRASE_RE.captures(sentence) {
        let context = strip_markup(&caps[1]);
        if !context.is_empty() {
            return Some(context);
        }
    }
    CONTEXT_FIELD_RE
        .captures(sentence)
        .map(|caps| markup::collapse_whitespace(&caps[1].to_lowercase()))
}

fn extract_related_terms(sentence: &str) -> Vec<String> {
    let mut related: Vec<String> = Vec::new();

    for marker in RELATED_RE.find_iter(sentence) {
        let tail = &sentence[marker.end()..];
        let tail = tail.split(&[')', ']'][..]).next().unwrap_or("");
        for piece in RELATED_SPLIT_RE.split(tail) {
            let term = strip_markup(piece)
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_string();
            if !term.is_empty() && !related.contains(&term) {
                related.push(term);
            }
        }
    }

    related
}

/// Coverage and size statistics
pub fn glossary_statistics(entries: &[GlossaryContent]) -> GlossaryStatistics {
    if entries.is_empty() {
        return GlossaryStatistics::default();
    }
    let total = entries.len();
    let terms_with_context = entries.iter().filter(|e| e.context.is_some()).count();
    let terms_with_related = entries.iter().filter(|e| !e.related_terms.is_empty()).count();
    let definition_chars: usize = entries.iter().map(|e| e.definition.chars().count()).sum();

    GlossaryStatistics {
        total_terms: total,
        terms_with_context,
        terms_with_related,
        context_rate: terms_with_context as f64 / total as f64,
        related_rate: terms_with_related as f64 / total as f64,
        average_definition_length: definition_chars as f64 / total as f64,
        total_related_terms: entries.iter().map(|e| e.related_terms.len()).sum(),
    }
}

/// Case-insensitive search over term, definition, context and related terms
pub fn search_glossary_terms(entries: &[GlossaryContent], query: &str) -> Vec<GlossaryContent> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }
    entries
        .iter()
        .filter(|entry| {
            entry.term.to_lowercase().contains(&query)
                || entry.definition.to_lowercase().contains(&query)
                || entry
                    .context
                    .as_ref()
                    .map_or(false, |c| c.to_lowercase().contains(&query))
                || entry
                    .related_terms
                    .iter()
                    .any(|r| r.to_lowercase().contains(&query))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Vec<GlossaryContent> {
        GlossaryExtractor::new().extract_glossary_terms(text, "doc")
    }

    #[test]
    fn test_bold_term_with_colon() {
        let entries = extract("**Dark Matter**: A form of matter that does not emit light.");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].term, "Dark Matter");
        assert_eq!(entries[0].definition, "A form of matter that does not emit light");
        assert_eq!(entries[0].confidence, 0.9);
    }

    #[test]
    fn test_latex_emphasis() {
        let entries = extract(r"\textbf{Entropy}: a measure of disorder in a system.");
        assert_eq!(entries[0].term, "Entropy");
        assert_eq!(entries[0].definition, "a measure of disorder in a system");
    }

    #[test]
    fn test_defined_as_uses_emphasized_term() {
        let entries = extract(r"A \emph{photon} is defined as a quantum of the electromagnetic field.");
        assert_eq!(entries[0].term, "photon");
        assert_eq!(entries[0].definition, "a quantum of the electromagnetic field");
        assert_eq!(entries[0].confidence, 0.8);
    }

    #[test]
    fn test_marker_priority_and_confidence() {
        let entries = extract("Redshift refers to the stretching of light toward longer wavelengths.");
        assert_eq!(entries[0].term, "Redshift");
        assert_eq!(entries[0].confidence, 0.7);

        let entries = extract("Homeostasis means the maintenance of a stable internal state.");
        assert_eq!(entries[0].term, "Homeostasis");
        assert_eq!(entries[0].confidence, 0.6);

        let entries = extract("Albedo: the fraction of light reflected by a surface.");
        assert_eq!(entries[0].term, "Albedo");
        assert_eq!(entries[0].confidence, 0.5);
    }

    #[test]
    fn test_candidates_missing_a_half_are_discarded() {
        assert!(extract("**Orphan**:").is_empty());
        assert!(extract("This sentence has no definition at all.").is_empty());
        // a whole clause is not a term
        assert!(extract(
            "When the results of the experiment were finally compiled by the team it became clear this means nothing."
        )
        .is_empty());
    }

    #[test]
    fn test_related_terms_and_cut() {
        let entries = extract(
            "**Boson**: a particle with integer spin (see also fermion, gluon and photon).",
        );
        assert_eq!(entries[0].definition, "a particle with integer spin");
        assert_eq!(entries[0].related_terms, vec!["fermion", "gluon", "photon"]);
    }

    #[test]
    fn test_context_extraction() {
        let entries = extract("In physics, work is defined as force times displacement.");
        assert_eq!(entries[0].term, "work");
        assert_eq!(entries[0].context.as_deref(), Some("physics"));

        let entries = extract(
            "In the context of machine learning, overfitting refers to memorizing noise.",
        );
        assert_eq!(entries[0].term, "overfitting");
        assert_eq!(entries[0].context.as_deref(), Some("machine learning"));
    }

    #[test]
    fn test_sentence_split_respects_abbreviations() {
        let sentences = split_sentences("See Fig. 3 for details, e.g. the peak. Next one! Pi is 3.14 roughly.");
        assert_eq!(
            sentences,
            vec!["See Fig. 3 for details, e.g. the peak", "Next one", "Pi is 3.14 roughly"]
        );
    }

    #[test]
    fn test_list_items_are_separate_sentences() {
        let entries = extract("- **Flux**: flow per unit area\n- **Field**: a quantity defined at every point");
        let terms: Vec<&str> = entries.iter().map(|e| e.term.as_str()).collect();
        assert_eq!(terms, vec!["Flux", "Field"]);
    }

    #[test]
    fn test_document_extraction_statistics_and_search() {
        let doc = "**Quark**: an elementary particle.\n\nPlain paragraph.\n\n\
                   In physics, a lepton is defined as a fermion without color charge (see also muon).";
        let entries = GlossaryExtractor::new().extract_glossary_from_document(doc, "doc");
        assert_eq!(entries.len(), 2);

        let stats = glossary_statistics(&entries);
        assert_eq!(stats.total_terms, 2);
        assert_eq!(stats.terms_with_context, 1);
        assert_eq!(stats.terms_with_related, 1);
        assert_eq!(stats.total_related_terms, 1);

        let hits = search_glossary_terms(&entries, "MUON");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].term, "lepton");
        assert!(search_glossary_terms(&entries, " ").is_empty());
    }
}
