//! Atomic span detection: regions the chunker must never split

use std::cmp::Reverse;

use crate::markup;
use crate::processing::asset::{detect_asset_blocks, AssetBlockKind};
use crate::processing::math::detect_equations;
use crate::types::ContentType;

const VERBATIM_ENVIRONMENTS: &[&str] = &["verbatim", "Verbatim", "lstlisting", "minted"];

/// What an atomic span contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicKind {
    Equation,
    Figure,
    Table,
    Code,
}

impl AtomicKind {
    pub fn content_type(&self) -> ContentType {
        match self {
            AtomicKind::Equation => ContentType::Equation,
            AtomicKind::Figure => ContentType::Figure,
            AtomicKind::Table => ContentType::Table,
            AtomicKind::Code => ContentType::Code,
        }
    }
}

/// Byte range that must stay inside a single chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicSpan {
    pub start: usize,
    pub end: usize,
    pub kind: AtomicKind,
}

impl AtomicSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Whether `offset` falls strictly inside the span
    pub fn contains_strictly(&self, offset: usize) -> bool {
        offset > self.start && offset < self.end
    }
}

/// Equations, figure/table blocks and code listings, sorted and non-overlapping.
///
/// Overlapping detections collapse into one span that keeps the kind of the
/// outermost (earliest, then longest) detection.
pub fn detect_atomic_spans(text: &str) -> Vec<AtomicSpan> {
    let mut spans: Vec<AtomicSpan> = Vec::new();

    spans.extend(detect_equations(text).into_iter().map(|eq| AtomicSpan {
        start: eq.start,
        end: eq.end,
        kind: AtomicKind::Equation,
    }));

    spans.extend(detect_asset_blocks(text).into_iter().map(|block| AtomicSpan {
        start: block.start,
        end: block.end,
        kind: match block.kind {
            AssetBlockKind::LatexFigure | AssetBlockKind::MarkdownImage => AtomicKind::Figure,
            AssetBlockKind::LatexTable | AssetBlockKind::MarkdownTable => AtomicKind::Table,
        },
    }));

    spans.extend(
        markup::find_environments(text, VERBATIM_ENVIRONMENTS)
            .into_iter()
            .map(|env| AtomicSpan {
                start: env.start,
                end: env.end,
                kind: AtomicKind::Code,
            }),
    );

    spans.extend(code_fences(text).into_iter().map(|(start, end)| AtomicSpan {
        start,
        end,
        kind: AtomicKind::Code,
    }));

    merge(spans)
}

fn merge(mut spans: Vec<AtomicSpan>) -> Vec<AtomicSpan> {
    spans.retain(|span| !span.is_empty());
    spans.sort_by_key(|span| (span.start, Reverse(span.end)));

    let mut merged: Vec<AtomicSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start < last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// Fenced code blocks (``` or ~~~), from the opening fence line through the closing one.
/// An unclosed fence runs to the end of the text.
pub fn code_fences(text: &str) -> Vec<(usize, usize)> {
    let mut fences = Vec::new();
    let mut open: Option<(usize, &str)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let marker = if trimmed.starts_with("```") {
            Some("```")
        } else if trimmed.starts_with("~~~") {
            Some("~~~")
        } else {
            None
        };

        match (open, marker) {
            (None, Some(marker)) => open = Some((offset, marker)),
            (Some((start, fence)), Some(marker)) if marker == fence => {
                let end = offset + line.trim_end_matches(&['\n', '\r'][..]).len();
                fences.push((start, end));
                open = None;
            }
            _ => {}
        }
        offset += line.len();
    }

    if let Some((start, _)) = open {
        fences.push((start, text.trim_end().len().max(start)));
    }
    fences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_each_kind() {
        let text = "Intro $x$.\n\n\\begin{figure}\\caption{A}\\end{figure}\n\n\
                    | a | b |\n|---|---|\n| 1 | 2 |\n\n```rust\nlet x = 1;\n```\n";
        let kinds: Vec<AtomicKind> = detect_atomic_spans(text).iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![AtomicKind::Equation, AtomicKind::Figure, AtomicKind::Table, AtomicKind::Code]
        );
    }

    #[test]
    fn test_nested_detections_collapse_to_outer_kind() {
        let text = "```\necho $HOME and $PATH\n```";
        let spans = detect_atomic_spans(text);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, AtomicKind::Code);
        assert_eq!((spans[0].start, spans[0].end), (0, text.len()));
    }

    #[test]
    fn test_equation_inside_figure_is_absorbed() {
        let text = r"\begin{figure}\caption{Plot of $y = x^2$}\end{figure}";
        let spans = detect_atomic_spans(text);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, AtomicKind::Figure);
    }

    #[test]
    fn test_unclosed_fence_runs_to_end() {
        let text = "before\n```\ncode\n";
        assert_eq!(code_fences(text), vec![(7, 15)]);
    }

    #[test]
    fn test_contains_strictly() {
        let span = AtomicSpan { start: 2, end: 5, kind: AtomicKind::Equation };
        assert!(!span.contains_strictly(2));
        assert!(span.contains_strictly(3));
        assert!(!span.contains_strictly(5));
        assert_eq!(span.len(), 3);
    }
}
