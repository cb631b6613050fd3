//! Figure and table extraction

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::markup::{self, command_argument, is_escaped};
use crate::types::{AssetContent, AssetType};

/// LaTeX environments that form a figure or table block
const BLOCK_ENVIRONMENTS: &[&str] = &[
    "figure",
    "wrapfigure",
    "sidewaysfigure",
    "subfigure",
    "tikzpicture",
    "picture",
    "table",
    "sidewaystable",
    "tabular",
    "tabularx",
    "longtable",
];

const FIGURE_ENVIRONMENTS: &[&str] = &[
    "figure",
    "wrapfigure",
    "sidewaysfigure",
    "subfigure",
    "tikzpicture",
    "picture",
];

const TABLE_ENVIRONMENTS: &[&str] = &["table", "sidewaystable", "tabular", "tabularx", "longtable", "array"];

const GRID_ENVIRONMENTS: &[&str] = &["tabular", "tabularx", "longtable", "array"];

static MD_IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[([^\]]*)\]\(\s*([^)\s]+)(?:\s+"([^"]*)")?\s*\)(\{[^}]*\})?"#).unwrap()
});
static CAPTION_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*[*_]*(?:Figure|Fig\.|Table)\s+[0-9A-Za-z.]+[*_]*\s*[:.]\s*[*_]*\s*(.+?)\s*$").unwrap()
});
static PANDOC_LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#((?:fig|tbl|tab):[^\s}]+)").unwrap());
static ALT_OPTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"alt\s*=\s*\{([^}]*)\}").unwrap());
static MD_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\|?\s*:?-{3,}:?\s*(?:\|\s*:?-{3,}:?\s*)*\|?\s*$").unwrap());
static RULE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\\(?:hline|toprule|midrule|bottomrule|endhead|endfirsthead|endfoot|endlastfoot)\b|\\cline\{[^}]*\}|\\(?:caption|label)\{[^{}]*\}",
    )
    .unwrap()
});

/// Where an asset block came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetBlockKind {
    LatexFigure,
    LatexTable,
    MarkdownImage,
    MarkdownTable,
}

/// Byte range of a figure or table block inside a larger text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetBlock {
    pub start: usize,
    pub end: usize,
    pub kind: AssetBlockKind,
}

impl AssetBlock {
    pub fn text<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }

    pub fn asset_type(&self) -> AssetType {
        match self.kind {
            AssetBlockKind::LatexFigure | AssetBlockKind::MarkdownImage => AssetType::Figure,
            AssetBlockKind::LatexTable | AssetBlockKind::MarkdownTable => AssetType::Table,
        }
    }
}

/// Summary over a set of extracted assets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetStatistics {
    pub total_assets: usize,
    pub asset_type_distribution: BTreeMap<String, usize>,
    pub assets_with_captions: usize,
    pub assets_with_labels: usize,
    pub caption_rate: f64,
    pub label_rate: f64,
}

/// Figure/table metadata extractor
#[derive(Debug, Clone, Default)]
pub struct AssetProcessor;

impl AssetProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Extract metadata from one block; `None` when no figure or table anchor is present
    pub fn process_asset(&self, text: &str, source_id: &str) -> Option<AssetContent> {
        if text.trim().is_empty() {
            return None;
        }
        if is_figure(text) {
            return Some(self.process_figure(text, source_id));
        }
        if is_table(text) {
            return Some(self.process_table(text, source_id));
        }
        None
    }

    /// Every figure and table in a document, in order
    pub fn extract_all_assets(&self, text: &str, source_id: &str) -> Vec<AssetContent> {
        detect_asset_blocks(text)
            .iter()
            .filter_map(|block| self.process_asset(block.text(text), source_id))
            .collect()
    }

    /// Block ranges used by the chunker
    pub fn detect_asset_blocks(&self, text: &str) -> Vec<AssetBlock> {
        detect_asset_blocks(text)
    }

    fn process_figure(&self, text: &str, source_id: &str) -> AssetContent {
        let image = MD_IMAGE_RE.captures(text);
        let mut figure = AssetContent::figure(source_id);

        figure.caption = extract_caption(text).or_else(|| {
            image
                .as_ref()
                .and_then(|caps| caps.get(3))
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty())
        });
        figure.label = extract_label(text);
        figure.file_reference = command_argument(text, "includegraphics")
            .map(|path| path.trim().to_string())
            .or_else(|| image.as_ref().map(|caps| caps[2].to_string()))
            .filter(|s| !s.is_empty());
        figure.alt_text = ALT_OPTION_RE
            .captures(text)
            .map(|caps| caps[1].trim().to_string())
            .or_else(|| image.as_ref().map(|caps| caps[1].trim().to_string()))
            .filter(|s| !s.is_empty());

        figure
    }

    fn process_table(&self, text: &str, source_id: &str) -> AssetContent {
        let mut table = AssetContent::table(source_id);
        table.caption = extract_caption(text);
        table.label = extract_label(text);
        table.table_data = latex_table_data(text).or_else(|| markdown_table_data(text));
        table
    }
}

fn is_figure(text: &str) -> bool {
    has_environment(text, FIGURE_ENVIRONMENTS)
        || command_argument(text, "includegraphics").is_some()
        || MD_IMAGE_RE.is_match(text)
}

fn is_table(text: &str) -> bool {
    has_environment(text, TABLE_ENVIRONMENTS) || !markdown_table_runs(text).is_empty()
}

fn has_environment(text: &str, names: &[&str]) -> bool {
    names.iter().any(|name| {
        text.contains(&format!("\\begin{{{}}}", name)) || text.contains(&format!("\\begin{{{}*}}", name))
    })
}

/// Explicit `\caption{}` first, then a "Figure N:" / "Table N:" line
fn extract_caption(text: &str) -> Option<String> {
    command_argument(text, "caption")
        .map(|caption| markup::collapse_whitespace(caption))
        .filter(|caption| !caption.is_empty())
        .or_else(|| {
            CAPTION_LINE_RE
                .captures(text)
                .map(|caps| caps[1].trim_end_matches(&['*', '_'][..]).trim().to_string())
                .filter(|caption| !caption.is_empty())
        })
}

fn extract_label(text: &str) -> Option<String> {
    command_argument(text, "label")
        .map(|label| label.trim().to_string())
        .or_else(|| PANDOC_LABEL_RE.captures(text).map(|caps| caps[1].to_string()))
        .filter(|label| !label.is_empty())
}

/// Rectangular cell matrix of the first LaTeX grid environment
fn latex_table_data(text: &str) -> Option<Vec<Vec<String>>> {
    let env = markup::find_environments(text, GRID_ENVIRONMENTS).into_iter().next()?;
    let mut body = env.body(text);

    // column spec, plus the width argument of tabularx
    let leading_args = if env.base_name() == "tabularx" { 2 } else { 1 };
    let trimmed = body.trim_start();
    if trimmed.starts_with('[') {
        if let Some(close) = trimmed.find(']') {
            body = &trimmed[close + 1..];
        }
    }
    for _ in 0..leading_args {
        let trimmed = body.trim_start();
        if !trimmed.starts_with('{') {
            break;
        }
        match markup::balanced_braces(trimmed, 0) {
            Some((_, end)) => body = &trimmed[end + 1..],
            None => break,
        }
    }

    let rows = body
        .split("\\\\")
        .map(|row| RULE_RE.replace_all(row, "").to_string())
        .filter(|row| !row.trim().is_empty())
        .map(|row| split_unescaped(&row, '&'))
        .collect();

    rectangular(rows)
}

fn split_unescaped(row: &str, separator: char) -> Vec<String> {
    let mut cells = Vec::new();
    let mut last = 0;
    for (i, c) in row.char_indices() {
        if c == separator && !is_escaped(row, i) {
            cells.push(row[last..i].trim().to_string());
            last = i + c.len_utf8();
        }
    }
    cells.push(row[last..].trim().to_string());
    cells
}

/// Drop trailing all-empty rows and pad the rest to equal width
fn rectangular(mut rows: Vec<Vec<String>>) -> Option<Vec<Vec<String>>> {
    while rows
        .last()
        .map_or(false, |row| row.iter().all(|cell| cell.is_empty()))
    {
        rows.pop();
    }
    if rows.is_empty() {
        return None;
    }
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    for row in &mut rows {
        row.resize(width, String::new());
    }
    Some(rows)
}

/// Line ranges `(start, end)` of Markdown pipe tables (header, separator, body)
fn markdown_table_runs(text: &str) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut lines: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        lines.push((offset, line.trim_end_matches(&['\n', '\r'][..])));
        offset += line.len();
    }

    let mut i = 0;
    while i + 1 < lines.len() {
        let (start, header) = lines[i];
        let (_, separator) = lines[i + 1];
        if header.contains('|') && MD_SEPARATOR_RE.is_match(separator) {
            let mut j = i + 2;
            while j < lines.len() && lines[j].1.contains('|') && !lines[j].1.trim().is_empty() {
                j += 1;
            }
            let (last_start, last) = lines[j - 1];
            runs.push((start, last_start + last.len()));
            i = j;
        } else {
            i += 1;
        }
    }

    runs
}

fn markdown_table_data(text: &str) -> Option<Vec<Vec<String>>> {
    let (start, end) = markdown_table_runs(text).into_iter().next()?;
    let rows = text[start..end]
        .lines()
        .filter(|line| !MD_SEPARATOR_RE.is_match(line))
        .map(|line| {
            let line = line.trim();
            let line = line.strip_prefix('|').unwrap_or(line);
            let line = line.strip_suffix('|').unwrap_or(line);
            split_unescaped(line, '|')
        })
        .collect();
    rectangular(rows)
}

/// Byte range of the line containing `pos`, without its newline
fn line_bounds(text: &str, pos: usize) -> (usize, usize) {
    let start = text[..pos].rfind('\n').map_or(0, |p| p + 1);
    let end = text[pos..].find('\n').map_or(text.len(), |p| p + pos);
    (start, end)
}

/// Figure and table blocks, ordered and non-overlapping
pub fn detect_asset_blocks(text: &str) -> Vec<AssetBlock> {
    let mut blocks: Vec<AssetBlock> = markup::find_environments(text, BLOCK_ENVIRONMENTS)
        .into_iter()
        .map(|env| AssetBlock {
            start: env.start,
            end: env.end,
            kind: if FIGURE_ENVIRONMENTS.contains(&env.base_name()) {
                AssetBlockKind::LatexFigure
            } else {
                AssetBlockKind::LatexTable
            },
        })
        .collect();

    let overlaps = |blocks: &[AssetBlock], start: usize, end: usize| {
        blocks.iter().any(|b| start < b.end && b.start < end)
    };

    for m in MD_IMAGE_RE.find_iter(text) {
        // an image is a block when it sits on its own line
        let (line_start, line_end) = line_bounds(text, m.start());
        if !text[line_start..m.start()].trim().is_empty() || !text[m.end()..line_end].trim().is_empty() {
            continue;
        }
        let mut end = line_end;
        if let Some(next) = text.get(line_end + 1..) {
            let (_, next_end) = line_bounds(text, line_end + 1);
            if CAPTION_LINE_RE.is_match(&next[..next_end - line_end - 1]) {
                end = next_end;
            }
        }
        if !overlaps(&blocks, m.start(), end) {
            blocks.push(AssetBlock {
                start: m.start(),
                end,
                kind: AssetBlockKind::MarkdownImage,
            });
        }
    }

    for (mut start, end) in markdown_table_runs(text) {
        if start > 0 {
            let (prev_start, prev_end) = line_bounds(text, start - 1);
            if CAPTION_LINE_RE.is_match(&text[prev_start..prev_end]) {
                start = prev_start;
            }
        }
        if !overlaps(&blocks, start, end) {
            blocks.push(AssetBlock {
                start,
                end,
                kind: AssetBlockKind::MarkdownTable,
            });
        }
    }

    blocks.sort_by_key(|block| block.start);
    blocks
}

/// Counts by type and caption/label coverage
pub fn asset_statistics(assets: &[AssetContent]) -> AssetStatistics {
    if assets.is_empty() {
        return AssetStatistics::default();
    }

    let mut asset_type_distribution = BTreeMap::new();
    for asset in assets {
        *asset_type_distribution
            .entry(asset.asset_type.to_string())
            .or_insert(0) += 1;
    }
    let assets_with_captions = assets.iter().filter(|a| a.caption.is_some()).count();
    let assets_with_labels = assets.iter().filter(|a| a.label.is_some()).count();
    let total = assets.len();

    AssetStatistics {
        total_assets: total,
        asset_type_distribution,
        assets_with_captions,
        assets_with_labels,
        caption_rate: assets_with_captions as f64 / total as f64,
        label_rate: assets_with_labels as f64 / total as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIGURE: &str = r"\begin{figure}[t]
  \centering
  \includegraphics[width=0.8\linewidth, alt={Loss curve}]{plots/loss.pdf}
  \caption{Training loss of the {\em baseline} model.}
  \label{fig:loss}
\end{figure}";

    const TABLE: &str = r"\begin{table}
\caption{Results}
\label{tab:results}
\begin{tabular}{lcc}
\toprule
Model & Accuracy & F1 \\
\midrule
Base & 0.81 & 0.79 \\
Ours & 0.88 \\
\bottomrule
\end{tabular}
\end{table}";

    #[test]
    fn test_latex_figure() {
        let asset = AssetProcessor::new().process_asset(FIGURE, "paper").unwrap();
        assert_eq!(asset.asset_type, AssetType::Figure);
        assert_eq!(
            asset.caption.as_deref(),
            Some(r"Training loss of the {\em baseline} model.")
        );
        assert_eq!(asset.label.as_deref(), Some("fig:loss"));
        assert_eq!(asset.file_reference.as_deref(), Some("plots/loss.pdf"));
        assert_eq!(asset.alt_text.as_deref(), Some("Loss curve"));
        assert!(asset.table_data.is_none());
        assert_eq!(asset.source_id, "paper");
    }

    #[test]
    fn test_latex_table_is_rectangular() {
        let asset = AssetProcessor::new().process_asset(TABLE, "paper").unwrap();
        assert_eq!(asset.asset_type, AssetType::Table);
        assert_eq!(asset.caption.as_deref(), Some("Results"));
        assert_eq!(asset.label.as_deref(), Some("tab:results"));
        assert!(asset.file_reference.is_none());
        assert_eq!(
            asset.table_data.unwrap(),
            vec![
                vec!["Model", "Accuracy", "F1"],
                vec!["Base", "0.81", "0.79"],
                vec!["Ours", "0.88", ""],
            ]
        );
    }

    #[test]
    fn test_escaped_ampersand_stays_in_cell() {
        let text = r"\begin{tabular}{ll} R\&D & 5 \\ \end{tabular}";
        let asset = AssetProcessor::new().process_asset(text, "doc").unwrap();
        assert_eq!(asset.table_data.unwrap(), vec![vec![r"R\&D", "5"]]);
    }

    #[test]
    fn test_markdown_image_with_caption_line() {
        let text = "Intro.\n\n![Phase diagram](img/phase.png \"Phase diagram of water\"){#fig:phase}\n\nMore text.";
        let blocks = detect_asset_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, AssetBlockKind::MarkdownImage);

        let asset = AssetProcessor::new()
            .process_asset(blocks[0].text(text), "doc")
            .unwrap();
        assert_eq!(asset.caption.as_deref(), Some("Phase diagram of water"));
        assert_eq!(asset.file_reference.as_deref(), Some("img/phase.png"));
        assert_eq!(asset.alt_text.as_deref(), Some("Phase diagram"));
        assert_eq!(asset.label.as_deref(), Some("fig:phase"));

        let text = "![](a.png)\nFigure 2: Sample output.\n";
        let blocks = detect_asset_blocks(text);
        let asset = AssetProcessor::new()
            .process_asset(blocks[0].text(text), "doc")
            .unwrap();
        assert_eq!(asset.caption.as_deref(), Some("Sample output."));
        assert!(asset.alt_text.is_none());
    }

    #[test]
    fn test_markdown_table() {
        let text = "Table 1: Constants\n| Name | Value |\n|------|------:|\n| c | 299792458 |\n| h | 6.626e-34 |\n\nAfter.";
        let blocks = detect_asset_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, AssetBlockKind::MarkdownTable);
        assert!(blocks[0].text(text).starts_with("Table 1"));
        assert!(blocks[0].text(text).ends_with("6.626e-34 |"));

        let asset = AssetProcessor::new()
            .process_asset(blocks[0].text(text), "doc")
            .unwrap();
        assert_eq!(asset.caption.as_deref(), Some("Constants"));
        assert_eq!(
            asset.table_data.unwrap(),
            vec![
                vec!["Name", "Value"],
                vec!["c", "299792458"],
                vec!["h", "6.626e-34"],
            ]
        );
    }

    #[test]
    fn test_unrecognized_block_is_absent() {
        let processor = AssetProcessor::new();
        assert!(processor.process_asset("Just a paragraph | with a pipe.", "doc").is_none());
        assert!(processor.process_asset("", "doc").is_none());
    }

    #[test]
    fn test_nested_tabular_is_one_block() {
        let blocks = detect_asset_blocks(TABLE);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, AssetBlockKind::LatexTable);
        assert_eq!(blocks[0].text(TABLE), TABLE);
    }

    #[test]
    fn test_extract_all_assets_and_statistics() {
        let doc = format!("Intro text.\n\n{}\n\nMiddle.\n\n{}\n", FIGURE, TABLE);
        let assets = AssetProcessor::new().extract_all_assets(&doc, "doc");
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].asset_type, AssetType::Figure);
        assert_eq!(assets[1].asset_type, AssetType::Table);

        let stats = asset_statistics(&assets);
        assert_eq!(stats.total_assets, 2);
        assert_eq!(stats.asset_type_distribution["figure"], 1);
        assert_eq!(stats.caption_rate, 1.0);
        assert_eq!(asset_statistics(&[]), AssetStatistics::default());
    }
}
