//! Boundary-aware chunking with overlap

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use super::boundaries::{detect_atomic_spans, AtomicKind, AtomicSpan};
use crate::classification::{detectors, ContentClassifier};
use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::types::Chunk;

/// Contiguous stretch of the source, either splittable text or one atomic span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Unit {
    start: usize,
    end: usize,
    atomic: Option<AtomicKind>,
}

/// Planned chunk: own byte range plus the overlap repeated in front of it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkRange {
    start: usize,
    end: usize,
    overlap_len: usize,
}

/// Length and type statistics for a chunk list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkStatistics {
    pub total_chunks: usize,
    pub total_characters: usize,
    pub average_chunk_length: f64,
    pub min_chunk_length: usize,
    pub max_chunk_length: usize,
    pub content_type_distribution: BTreeMap<String, usize>,
    pub atomic_chunks: usize,
    pub chunks_with_overlap: usize,
}

/// Splits documents into classified chunks without bisecting equations,
/// figures, tables or code listings
#[derive(Debug, Clone)]
pub struct EnhancedChunker {
    config: ChunkingConfig,
    classifier: ContentClassifier,
}

impl EnhancedChunker {
    /// Create a chunker; an out-of-range configuration is rejected with every problem listed
    pub fn new(config: ChunkingConfig, classifier: ContentClassifier) -> Result<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(Error::InvalidConfig(problems));
        }
        Ok(Self { config, classifier })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk a whole document. Empty or whitespace-only input yields no chunks.
    pub fn chunk_document(&self, text: &str, source_id: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let spans = detect_atomic_spans(text);
        let ranges = if self.config.isolate_atomic_spans {
            self.isolated_ranges(text, &spans)
        } else {
            self.pack(text, 0, text.len(), &spans)
        };

        let mut chunks = Vec::with_capacity(ranges.len());
        for range in ranges {
            let start = range.start - range.overlap_len;
            let chunk_text = &text[start..range.end];
            let (content_type, confidence) = self.classifier.classify(chunk_text, None);

            let mut chunk = Chunk::new(
                chunk_text.to_string(),
                source_id,
                chunks.len() as u32,
                start,
                range.end,
            );
            chunk.overlap_len = range.overlap_len;
            chunk.classify(content_type, confidence);
            chunks.push(chunk);
        }

        tracing::debug!(
            "Chunked {} ({} bytes, {} atomic spans) into {} chunks",
            source_id,
            text.len(),
            spans.len(),
            chunks.len()
        );
        chunks
    }

    /// Atomic spans become their own chunks; text between them is packed
    fn isolated_ranges(&self, text: &str, spans: &[AtomicSpan]) -> Vec<ChunkRange> {
        let mut ranges = Vec::new();
        for unit in self.units(text, spans) {
            if unit.atomic.is_some() {
                ranges.push(ChunkRange {
                    start: unit.start,
                    end: unit.end,
                    overlap_len: 0,
                });
            } else {
                ranges.extend(self.pack(text, unit.start, unit.end, spans));
            }
        }
        ranges
    }

    fn units(&self, text: &str, spans: &[AtomicSpan]) -> Vec<Unit> {
        let mut units: Vec<Unit> = Vec::new();
        let mut pos = 0;

        for span in spans {
            let gap = &text[pos..span.start];
            let lead_in = gap.len() < self.config.min_fragment_size && !gap.contains("\n\n");

            if lead_in && detectors::introduces_term(gap) {
                // a defined term stays in one text chunk with its formula
                push_text(&mut units, pos, span.end);
                pos = span.end;
                continue;
            }

            if lead_in {
                // runs of inline math separated by short text stay together
                if let Some(last) = units.last_mut() {
                    if last.atomic == Some(AtomicKind::Equation)
                        && span.kind == AtomicKind::Equation
                        && last.end == pos
                        && span.end - last.start <= self.config.chunk_size
                    {
                        last.end = span.end;
                        pos = span.end;
                        continue;
                    }
                }
                units.push(Unit {
                    start: pos,
                    end: span.end,
                    atomic: Some(span.kind),
                });
            } else {
                push_text(&mut units, pos, span.start);
                units.push(Unit {
                    start: span.start,
                    end: span.end,
                    atomic: Some(span.kind),
                });
            }
            pos = span.end;
        }
        push_text(&mut units, pos, text.len());

        absorb_blank_units(text, units)
    }

    /// Greedy packing of `[start, end)` into chunks of at most `chunk_size`
    /// bytes including overlap. A single atomic piece may exceed the limit.
    fn pack(&self, text: &str, start: usize, end: usize, spans: &[AtomicSpan]) -> Vec<ChunkRange> {
        let chunk_size = self.config.chunk_size;
        let mut ranges: Vec<ChunkRange> = Vec::new();
        let mut current: Option<ChunkRange> = None;

        for (piece_start, piece_end, atomic) in self.pieces(text, start, end, spans) {
            let Some(mut range) = current else {
                current = Some(ChunkRange {
                    start: piece_start,
                    end: piece_end,
                    overlap_len: 0,
                });
                continue;
            };

            let blank = text[range.start..range.end].trim().is_empty();
            if range.overlap_len + (piece_end - range.start) <= chunk_size {
                range.end = piece_end;
            } else if blank {
                // never emit a whitespace-only chunk; drop the overlap instead
                range.overlap_len = 0;
                range.end = piece_end;
            } else {
                ranges.push(range);
                let overlap_len = if atomic {
                    0
                } else {
                    self.overlap_len(text, range.start, range.end, spans)
                };
                range = ChunkRange {
                    start: piece_start,
                    end: piece_end,
                    overlap_len,
                };
            }
            current = Some(range);
        }

        if let Some(range) = current {
            match ranges.last_mut() {
                Some(last) if text[range.start..range.end].trim().is_empty() => last.end = range.end,
                _ => ranges.push(range),
            }
        }
        ranges
    }

    /// Sentence pieces of the text between atomic spans, plus the spans themselves
    fn pieces(&self, text: &str, start: usize, end: usize, spans: &[AtomicSpan]) -> Vec<(usize, usize, bool)> {
        let max_piece = self
            .config
            .chunk_size
            .saturating_sub(self.config.overlap_size())
            .max(1);
        let mut pieces = Vec::new();
        let mut pos = start;

        for span in spans.iter().filter(|s| s.start >= start && s.end <= end) {
            text_pieces(text, pos, span.start, max_piece, &mut pieces);
            pieces.push((span.start, span.end, true));
            pos = span.end;
        }
        text_pieces(text, pos, end, max_piece, &mut pieces);
        pieces
    }

    /// Bytes at the end of `[own_start, own_end)` to repeat at the start of the next chunk
    fn overlap_len(&self, text: &str, own_start: usize, own_end: usize, spans: &[AtomicSpan]) -> usize {
        let own_len = own_end - own_start;
        let target = self.config.overlap_size().min(own_len.saturating_sub(1));
        if target == 0 {
            return 0;
        }

        let mut start = own_end - target;
        while !text.is_char_boundary(start) {
            start += 1;
        }

        // begin at a word
        if let Some(ws) = text[start..own_end].find(char::is_whitespace) {
            let after = start + ws;
            if let Some(word) = text[after..own_end].find(|c: char| !c.is_whitespace()) {
                start = after + word;
            }
        }

        if let Some(span) = spans.iter().find(|span| span.contains_strictly(start)) {
            start = span.end;
        }

        own_end.saturating_sub(start)
    }
}

/// Append a text unit, extending a text unit that ends where this one starts
fn push_text(units: &mut Vec<Unit>, start: usize, end: usize) {
    if start >= end {
        return;
    }
    match units.last_mut() {
        Some(last) if last.atomic.is_none() && last.end == start => last.end = end,
        _ => units.push(Unit {
            start,
            end,
            atomic: None,
        }),
    }
}

/// Fold whitespace-only text units into their neighbour
fn absorb_blank_units(text: &str, units: Vec<Unit>) -> Vec<Unit> {
    let mut result: Vec<Unit> = Vec::with_capacity(units.len());
    let mut pending_start: Option<usize> = None;

    for mut unit in units {
        if unit.start == unit.end {
            continue;
        }
        let blank = unit.atomic.is_none() && text[unit.start..unit.end].trim().is_empty();
        if blank {
            match result.last_mut() {
                Some(last) => last.end = unit.end,
                None => pending_start = pending_start.or(Some(unit.start)),
            }
            continue;
        }
        if let Some(start) = pending_start.take() {
            unit.start = start;
        }
        result.push(unit);
    }
    result
}

fn text_pieces(text: &str, start: usize, end: usize, max_piece: usize, pieces: &mut Vec<(usize, usize, bool)>) {
    if start >= end {
        return;
    }
    for (offset, sentence) in text[start..end].split_sentence_bound_indices() {
        let piece_start = start + offset;
        let piece_end = piece_start + sentence.len();
        if sentence.len() <= max_piece {
            pieces.push((piece_start, piece_end, false));
        } else {
            split_oversized(text, piece_start, piece_end, max_piece, pieces);
        }
    }
}

/// Split a long sentence at word boundaries, or at character boundaries as a last resort
fn split_oversized(text: &str, start: usize, end: usize, max_piece: usize, pieces: &mut Vec<(usize, usize, bool)>) {
    let mut from = start;
    while end - from > max_piece {
        let mut cut = from + max_piece;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        if let Some(ws) = text[from..cut].rfind(char::is_whitespace) {
            if ws > 0 {
                cut = from + ws + text[from + ws..].chars().next().map_or(1, char::len_utf8);
            }
        }
        if cut <= from {
            cut = from + text[from..].chars().next().map_or(1, char::len_utf8);
        }
        pieces.push((from, cut, false));
        from = cut;
    }
    if from < end {
        pieces.push((from, end, false));
    }
}

/// Totals, per-type counts and length range
pub fn chunk_statistics(chunks: &[Chunk]) -> ChunkStatistics {
    if chunks.is_empty() {
        return ChunkStatistics::default();
    }

    let lengths: Vec<usize> = chunks.iter().map(|c| c.text.chars().count()).collect();
    let total_characters: usize = lengths.iter().sum();

    let mut content_type_distribution = BTreeMap::new();
    for chunk in chunks {
        *content_type_distribution
            .entry(chunk.content_type().as_str().to_string())
            .or_insert(0) += 1;
    }

    ChunkStatistics {
        total_chunks: chunks.len(),
        total_characters,
        average_chunk_length: total_characters as f64 / chunks.len() as f64,
        min_chunk_length: lengths.iter().copied().min().unwrap_or(0),
        max_chunk_length: lengths.iter().copied().max().unwrap_or(0),
        content_type_distribution,
        atomic_chunks: chunks.iter().filter(|c| c.content_type().is_atomic()).count(),
        chunks_with_overlap: chunks.iter().filter(|c| c.overlap_len > 0).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::collapse_whitespace;
    use crate::types::{reconstruct_text, ContentType};
    use proptest::prelude::*;

    fn chunker() -> EnhancedChunker {
        EnhancedChunker::new(ChunkingConfig::default(), ContentClassifier::default()).unwrap()
    }

    fn protecting_chunker() -> EnhancedChunker {
        let config = ChunkingConfig {
            isolate_atomic_spans: false,
            ..ChunkingConfig::default()
        };
        EnhancedChunker::new(config, ContentClassifier::default()).unwrap()
    }

    fn prose(min_len: usize) -> String {
        let mut text = String::new();
        let mut i = 0;
        while text.len() < min_len {
            text.push_str(&format!("Stars fuse hydrogen {}. ", i));
            i += 1;
        }
        text
    }

    #[test]
    fn test_empty_document() {
        assert!(chunker().chunk_document("", "doc").is_empty());
        assert!(chunker().chunk_document(" \n\t ", "doc").is_empty());
    }

    #[test]
    fn test_short_document_is_one_chunk() {
        let chunks = chunker().chunk_document("A short note about comets.", "doc");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "A short note about comets.");
        assert_eq!(chunks[0].content_type(), ContentType::Prose);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_inline_equation_is_isolated() {
        let chunks = chunker().chunk_document("The equation $E = mc^2$ is famous.", "doc");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "The equation $E = mc^2$");
        assert_eq!(chunks[0].content_type(), ContentType::Equation);
        assert_eq!(chunks[1].text, " is famous.");
        assert_eq!(chunks[1].content_type(), ContentType::Prose);
    }

    #[test]
    fn test_long_prose_respects_size_and_count() {
        let text = prose(10_000);
        let chunks = chunker().chunk_document(&text, "doc");

        let expected = text.len() as f64 / (320.0 * (1.0 - 0.12));
        let actual = chunks.len() as f64;
        assert!((actual - expected).abs() / expected < 0.15, "{} vs {}", actual, expected);

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
            assert!(chunk.text.len() <= 320, "chunk {} has {} bytes", i, chunk.text.len());
        }
        assert_eq!(reconstruct_text(&chunks), text);
    }

    #[test]
    fn test_overlap_repeats_previous_tail() {
        let text = prose(2_000);
        let chunks = chunker().chunk_document(&text, "doc");
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let overlap = &pair[1].text[..pair[1].overlap_len];
            assert!(pair[0].text.ends_with(overlap));
            assert!(pair[1].overlap_len <= 38);
            assert_eq!(pair[0].char_end, pair[1].char_start + pair[1].overlap_len);
        }
        assert!(chunks[1..].iter().all(|c| c.overlap_len > 0));
    }

    #[test]
    fn test_figure_block_is_one_chunk() {
        let text = format!(
            "{}\n\n\\begin{{figure}}\n\\includegraphics{{water.png}}\n\\caption{{Phase diagram of water}}\n\\end{{figure}}\n\nThe diagram shows three phases.",
            prose(400)
        );
        let chunks = chunker().chunk_document(&text, "doc");
        let figures: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.content_type() == ContentType::Figure)
            .collect();
        assert_eq!(figures.len(), 1);
        assert!(figures[0].text.trim_start().starts_with("\\begin{figure}"));
        assert!(figures[0].text.trim_end().ends_with("\\end{figure}"));
    }

    #[test]
    fn test_oversized_atomic_span_is_kept_whole() {
        let body = "x + ".repeat(200);
        let text = format!("Intro text that is long enough to stand alone as prose here.\n\n$${}y$$\n\nOutro.", body);
        for c in [chunker(), protecting_chunker()] {
            let chunks = c.chunk_document(&text, "doc");
            assert!(chunks.iter().any(|ch| ch.text.contains(&format!("$${}y$$", body))));
        }
    }

    #[test]
    fn test_inline_math_runs_stay_together() {
        let chunks = chunker().chunk_document("Let $x$ be real and $y$ be complex.", "doc");
        assert_eq!(chunks[0].text, "Let $x$ be real and $y$");
        assert_eq!(chunks[1].text, " be complex.");
    }

    #[test]
    fn test_long_word_is_split_at_char_boundary() {
        let text = "é".repeat(400);
        let chunks = chunker().chunk_document(&text, "doc");
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.len() <= 320));
        assert_eq!(reconstruct_text(&chunks), text);
    }

    #[test]
    fn test_chunk_statistics() {
        let chunks = chunker().chunk_document("The equation $E = mc^2$ is famous.", "doc");
        let stats = chunk_statistics(&chunks);
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.atomic_chunks, 1);
        assert_eq!(stats.content_type_distribution["equation"], 1);
        assert_eq!(stats.min_chunk_length, 11);
        assert_eq!(stats.max_chunk_length, 23);
        assert_eq!(chunk_statistics(&[]), ChunkStatistics::default());
    }

    fn document() -> impl Strategy<Value = String> {
        let piece = prop_oneof![
            4 => "[a-z]{1,12}[ .,\n]{1,2}",
            1 => Just("$$ a + b = c $$ ".to_string()),
            1 => Just("with $x^2$ inline ".to_string()),
            1 => Just("\\begin{equation} \\frac{a}{b} \\end{equation}\n".to_string()),
            1 => Just("\n| a | b |\n|---|---|\n| 1 | 2 |\n".to_string()),
            1 => Just("\n```\nlet x = 1;\n```\n".to_string()),
        ];
        prop::collection::vec(piece, 0..150).prop_map(|pieces| pieces.concat())
    }

    #[test]
    fn test_out_of_range_config_is_rejected() {
        let config = ChunkingConfig {
            chunk_size: 0,
            overlap_ratio: 1.5,
            ..ChunkingConfig::default()
        };
        match EnhancedChunker::new(config, ContentClassifier::default()) {
            Err(Error::InvalidConfig(problems)) => assert_eq!(
                problems,
                vec![
                    "chunk_size must be positive".to_string(),
                    "overlap_ratio must be between 0 and 1".to_string(),
                ]
            ),
            other => panic!("expected invalid config, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_defined_term_keeps_its_formula() {
        let text = "**Velocity**: $v = dx/dt$, the rate.";
        let chunks = chunker().chunk_document(text, "doc");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].content_type(), ContentType::Definition);

        let chunks = chunker().chunk_document("Speed is defined as $v = dx/dt$ here.", "doc");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content_type(), ContentType::Definition);
    }

    #[test]
    fn test_defined_term_before_display_equation() {
        let text = "**Energy**: \\[ E = mc^2 \\]\n\nStars fuse hydrogen.";
        let chunks = chunker().chunk_document(text, "doc");
        let spans = detect_atomic_spans(text);
        for chunk in &chunks {
            for span in &spans {
                assert!(!span.contains_strictly(chunk.char_start));
                assert!(!span.contains_strictly(chunk.char_end));
            }
        }
        assert!(chunks[0].text.starts_with("**Energy**: \\[ E = mc^2 \\]"));
        assert_eq!(collapse_whitespace(&reconstruct_text(&chunks)), collapse_whitespace(text));
    }

    proptest! {
        #[test]
        fn prop_reconstruction_is_lossless(text in "[a-zA-Z0-9 .,$|\\-\n]{0,800}") {
            for c in [chunker(), protecting_chunker()] {
                let chunks = c.chunk_document(&text, "doc");
                prop_assert_eq!(
                    collapse_whitespace(&reconstruct_text(&chunks)),
                    collapse_whitespace(&text)
                );
            }
        }

        #[test]
        fn prop_atomic_spans_are_never_split(text in document()) {
            let spans = detect_atomic_spans(&text);
            for c in [chunker(), protecting_chunker()] {
                for chunk in c.chunk_document(&text, "doc") {
                    for span in &spans {
                        prop_assert!(!span.contains_strictly(chunk.char_start));
                        prop_assert!(!span.contains_strictly(chunk.char_end));
                    }
                }
            }
        }

        #[test]
        fn prop_chunking_is_deterministic(text in document()) {
            let c = chunker();
            let first: Vec<(String, ContentType)> = c
                .chunk_document(&text, "doc")
                .into_iter()
                .map(|ch| (ch.text.clone(), ch.content_type()))
                .collect();
            let second: Vec<(String, ContentType)> = c
                .chunk_document(&text, "doc")
                .into_iter()
                .map(|ch| (ch.text.clone(), ch.content_type()))
                .collect();
            prop_assert_eq!(first, second);
        }
    }
}
