//! Content classifier combining the detector table

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::detectors::DETECTORS;
use crate::config::ClassificationConfig;
use crate::types::ContentType;

/// Detector confidence at which caller hints stop having any effect
const STRONG_SIGNAL: f32 = 0.8;

/// Highest confidence a hint alone can lift a detector to
const MAX_HINTED: f32 = 0.79;

/// Optional caller-supplied bias
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationHints {
    /// Expected content type
    pub content_type: Option<ContentType>,
}

impl ClassificationHints {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            content_type: Some(content_type),
        }
    }

    /// Read a `content_type` entry from chunk or document metadata
    pub fn from_metadata(metadata: &HashMap<String, serde_json::Value>) -> Self {
        let content_type = metadata
            .get("content_type")
            .and_then(|value| value.as_str())
            .and_then(|s| s.parse().ok());
        Self { content_type }
    }
}

/// Count and mean confidence per content type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub total: usize,
    pub type_counts: BTreeMap<String, usize>,
    pub average_confidence: f32,
}

/// Heuristic content classifier
#[derive(Debug, Clone, Default)]
pub struct ContentClassifier {
    config: ClassificationConfig,
}

impl ContentClassifier {
    pub fn new(config: ClassificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassificationConfig {
        &self.config
    }

    /// Classify one span. Pure in `(text, hints)`.
    pub fn classify(&self, text: &str, hints: Option<&ClassificationHints>) -> (ContentType, f32) {
        let hinted = hints.and_then(|h| h.content_type);

        let mut best: Option<(ContentType, f32)> = None;
        for (content_type, score) in self.candidates(text, hinted) {
            if score < self.config.floor_for(content_type) {
                continue;
            }
            // strictly greater, so earlier (higher priority) detectors win ties
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((content_type, score));
            }
        }

        best.unwrap_or((ContentType::Prose, self.config.confidence_floor))
    }

    /// Classify many spans in parallel, preserving input order
    pub fn classify_many<S>(&self, texts: &[S]) -> Vec<(ContentType, f32)>
    where
        S: AsRef<str> + Sync,
    {
        texts
            .par_iter()
            .map(|text| self.classify(text.as_ref(), None))
            .collect()
    }

    /// Raw detector scores in priority order, without floors or hints
    pub fn detector_scores(&self, text: &str) -> Vec<(ContentType, f32)> {
        DETECTORS
            .iter()
            .map(|(content_type, detect)| (*content_type, detect(text).clamp(0.0, 1.0)))
            .collect()
    }

    fn candidates(&self, text: &str, hinted: Option<ContentType>) -> Vec<(ContentType, f32)> {
        let mut scores = self.detector_scores(text);

        let Some(hinted) = hinted else {
            return scores;
        };

        match scores.iter_mut().find(|(content_type, _)| *content_type == hinted) {
            Some((_, score)) if *score < STRONG_SIGNAL => {
                *score = (*score + self.config.hint_weight).min(MAX_HINTED);
            }
            Some(_) => {}
            // types without a detector (prose, mixed, other) compete on the hint alone
            None => scores.push((hinted, self.config.hint_weight.min(MAX_HINTED))),
        }
        scores
    }
}

/// Summarize `(type, confidence)` pairs
pub fn classification_summary<I>(results: I) -> ClassificationSummary
where
    I: IntoIterator<Item = (ContentType, f32)>,
{
    let mut summary = ClassificationSummary::default();
    let mut confidence_sum = 0.0f32;

    for (content_type, confidence) in results {
        summary.total += 1;
        confidence_sum += confidence;
        *summary
            .type_counts
            .entry(content_type.as_str().to_string())
            .or_insert(0) += 1;
    }

    if summary.total > 0 {
        summary.average_confidence = confidence_sum / summary.total as f32;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn classifier() -> ContentClassifier {
        ContentClassifier::default()
    }

    #[test]
    fn test_plain_text_is_prose_at_floor() {
        let (ty, conf) = classifier().classify("Just a normal sentence about stars.", None);
        assert_eq!(ty, ContentType::Prose);
        assert_eq!(conf, 0.3);
    }

    #[test]
    fn test_strongest_detector_wins() {
        let c = classifier();
        assert_eq!(c.classify("The equation $E = mc^2$", None).0, ContentType::Equation);
        assert_eq!(
            c.classify("**Dark Matter**: A form of matter that does not emit light.", None).0,
            ContentType::Definition
        );
        assert_eq!(
            c.classify("```python\nprint(1)\n```", None).0,
            ContentType::Code
        );
        assert_eq!(
            c.classify(r"This was shown earlier \cite{knuth1984}.", None).0,
            ContentType::Reference
        );
    }

    #[test]
    fn test_ties_break_by_priority() {
        // equation environment (0.9) and LaTeX table (0.9) in one span
        let text = "\\begin{equation}x\\end{equation}\\begin{tabular}{c}1\\end{tabular}";
        assert_eq!(classifier().classify(text, None), (ContentType::Equation, 0.9));
    }

    #[test]
    fn test_floor_filters_weak_detectors() {
        let mut config = ClassificationConfig::default();
        config.type_floors.insert("code".to_string(), 0.5);
        let c = ContentClassifier::new(config);
        // inline code scores 0.4, below the code floor
        assert_eq!(c.classify("run `make` now", None), (ContentType::Prose, 0.3));
        assert_eq!(classifier().classify("run `make` now", None).0, ContentType::Code);
    }

    #[test]
    fn test_hints_bias_but_never_override_strong_signal() {
        let c = classifier();
        let code = ClassificationHints::new(ContentType::Code);

        let (ty, conf) = c.classify("run `make` now, see [3]", Some(&code));
        assert_eq!(ty, ContentType::Code);
        assert!((conf - 0.75).abs() < 1e-6);

        let text = "\\begin{figure}\\includegraphics{a.png}\\end{figure}";
        assert_eq!(c.classify(text, Some(&code)).0, ContentType::Figure);

        let mixed = ClassificationHints::new(ContentType::Mixed);
        assert_eq!(c.classify("nothing special", Some(&mixed)).0, ContentType::Mixed);
    }

    #[test]
    fn test_hints_from_metadata() {
        let mut meta = HashMap::new();
        meta.insert("content_type".to_string(), serde_json::json!("glossary"));
        assert_eq!(
            ClassificationHints::from_metadata(&meta).content_type,
            Some(ContentType::Definition)
        );
        meta.insert("content_type".to_string(), serde_json::json!(7));
        assert_eq!(ClassificationHints::from_metadata(&meta).content_type, None);
    }

    #[test]
    fn test_classify_many_preserves_order() {
        let texts = vec!["plain", "$$x$$", "| a | b |\n|---|---|\n| 1 | 2 |"];
        let types: Vec<ContentType> = classifier()
            .classify_many(&texts)
            .into_iter()
            .map(|(ty, _)| ty)
            .collect();
        assert_eq!(types, vec![ContentType::Prose, ContentType::Equation, ContentType::Table]);
    }

    #[test]
    fn test_classification_summary() {
        let summary = classification_summary(vec![
            (ContentType::Prose, 0.3),
            (ContentType::Prose, 0.5),
            (ContentType::Equation, 1.0),
        ]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.type_counts["prose"], 2);
        assert!((summary.average_confidence - 0.6).abs() < 1e-6);
        assert_eq!(classification_summary(Vec::new()).total, 0);
    }

    proptest! {
        #[test]
        fn prop_classify_is_deterministic(text in "[ -~\\n]{0,200}") {
            let c = classifier();
            let first = c.classify(&text, None);
            prop_assert_eq!(first, c.classify(&text, None));
            prop_assert!((0.0..=1.0).contains(&first.1));
        }
    }
}
