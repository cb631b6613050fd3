//! Low-level scanning helpers for LaTeX/Markdown flavored markup
//!
//! All offsets are byte offsets into the scanned text and always fall on
//! character boundaries.

/// A `\begin{name} ... \end{name}` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSpan {
    /// Environment name as written, including any trailing `*`
    pub name: String,
    /// Offset of `\begin`
    pub start: usize,
    /// Offset just past the closing `\end{name}`
    pub end: usize,
    /// Range of the environment body
    pub body_start: usize,
    pub body_end: usize,
}

impl EnvSpan {
    pub fn body<'a>(&self, text: &'a str) -> &'a str {
        &text[self.body_start..self.body_end]
    }

    /// Name without the starred suffix
    pub fn base_name(&self) -> &str {
        self.name.trim_end_matches('*')
    }
}

/// Whether the byte at `idx` is preceded by an odd number of backslashes
pub fn is_escaped(text: &str, idx: usize) -> bool {
    let bytes = text.as_bytes();
    let mut count = 0;
    let mut i = idx;
    while i > 0 && bytes[i - 1] == b'\\' {
        count += 1;
        i -= 1;
    }
    count % 2 == 1
}

/// Given the offset of an opening `{`, return the range of its contents
pub fn balanced_braces(text: &str, open: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' if !is_escaped(text, i) => depth += 1,
            b'}' if !is_escaped(text, i) => {
                depth -= 1;
                if depth == 0 {
                    return Some((open + 1, i));
                }
            }
            _ => {}
        }
    }
    None
}

/// Net count of unescaped `{` minus `}`; negative as soon as a `}` is unmatched
pub fn brace_balance(text: &str) -> i64 {
    let mut depth = 0i64;
    for (i, b) in text.bytes().enumerate() {
        match b {
            b'{' if !is_escaped(text, i) => depth += 1,
            b'}' if !is_escaped(text, i) => {
                depth -= 1;
                if depth < 0 {
                    return depth;
                }
            }
            _ => {}
        }
    }
    depth
}

/// Contents of the first `\command{...}` (an optional `[...]` argument is skipped)
pub fn command_argument<'a>(text: &'a str, command: &str) -> Option<&'a str> {
    command_arguments(text, command).into_iter().next()
}

/// Contents of every `\command{...}` in order
pub fn command_arguments<'a>(text: &'a str, command: &str) -> Vec<&'a str> {
    let needle = format!("\\{}", command);
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut from = 0;

    while let Some(rel) = text[from..].find(&needle) {
        let at = from + rel;
        let mut i = at + needle.len();
        from = i;

        // \caption must not match \captionof or \captions
        if bytes.get(i).map_or(false, |b| b.is_ascii_alphabetic()) {
            continue;
        }
        if is_escaped(text, at) {
            continue;
        }
        i = skip_whitespace(bytes, i);
        if bytes.get(i) == Some(&b'[') {
            match text[i..].find(']') {
                Some(close) => i = skip_whitespace(bytes, i + close + 1),
                None => continue,
            }
        }
        if let Some((start, end)) = balanced_braces(text, i) {
            found.push(&text[start..end]);
            from = end;
        }
    }

    found
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while bytes.get(i).map_or(false, |b| b.is_ascii_whitespace()) {
        i += 1;
    }
    i
}

/// Find every top-level environment whose base name is in `names`.
///
/// Nested environments of the same name are matched by depth. A `\begin`
/// without its `\end` is skipped.
pub fn find_environments(text: &str, names: &[&str]) -> Vec<EnvSpan> {
    let mut spans: Vec<EnvSpan> = Vec::new();
    let mut from = 0;

    while let Some(rel) = text[from..].find("\\begin{") {
        let start = from + rel;
        let name_start = start + "\\begin{".len();
        let Some(name_len) = text[name_start..].find('}') else {
            break;
        };
        let name = &text[name_start..name_start + name_len];
        let body_start = name_start + name_len + 1;
        from = body_start;

        if !names.contains(&name.trim_end_matches('*')) {
            continue;
        }

        if let Some((body_end, end)) = matching_end(text, name, body_start) {
            spans.push(EnvSpan {
                name: name.to_string(),
                start,
                end,
                body_start,
                body_end,
            });
            from = end;
        }
    }

    spans
}

/// Offsets of the `\end{name}` closing a block whose body starts at `from`
fn matching_end(text: &str, name: &str, from: usize) -> Option<(usize, usize)> {
    let open = format!("\\begin{{{}}}", name);
    let close = format!("\\end{{{}}}", name);
    let mut depth = 1usize;
    let mut i = from;

    loop {
        let next_close = text[i..].find(&close).map(|p| p + i)?;
        match text[i..].find(&open).map(|p| p + i) {
            Some(next_open) if next_open < next_close => {
                depth += 1;
                i = next_open + open.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some((next_close, next_close + close.len()));
                }
                i = next_close + close.len();
            }
        }
    }
}

/// Names of environments opened with `\begin` but never closed
pub fn unclosed_environments(text: &str) -> Vec<String> {
    let mut stack: Vec<String> = Vec::new();
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];
        let (marker, is_begin) = if rest.starts_with("\\begin{") {
            ("\\begin{", true)
        } else if rest.starts_with("\\end{") {
            ("\\end{", false)
        } else {
            i += rest.chars().next().map_or(1, char::len_utf8);
            continue;
        };

        let name_start = i + marker.len();
        let Some(len) = text[name_start..].find('}') else {
            break;
        };
        let name = text[name_start..name_start + len].to_string();
        if is_begin {
            stack.push(name);
        } else if let Some(pos) = stack.iter().rposition(|open| *open == name) {
            stack.truncate(pos);
        }
        i = name_start + len + 1;
    }

    stack
}

/// Collapse runs of whitespace into single spaces and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_braces_nested() {
        let text = r"\frac{a+{b}}{c}";
        let open = text.find('{').unwrap();
        let (start, end) = balanced_braces(text, open).unwrap();
        assert_eq!(&text[start..end], "a+{b}");
    }

    #[test]
    fn test_escaped_braces_are_ignored() {
        assert_eq!(brace_balance(r"\{ x \}"), 0);
        assert_eq!(brace_balance("{x"), 1);
        assert!(brace_balance("x}{") < 0);
    }

    #[test]
    fn test_command_argument_skips_optional() {
        let text = r"\includegraphics[width=0.5\textwidth]{plots/loss.png}";
        assert_eq!(command_argument(text, "includegraphics"), Some("plots/loss.png"));
        assert_eq!(command_argument(r"\captionof{figure}{x}", "caption"), None);
    }

    #[test]
    fn test_find_environments_handles_nesting_and_stars() {
        let text = r"a \begin{figure}\begin{figure}x\end{figure}\end{figure} b \begin{align*}y\end{align*}";
        let spans = find_environments(text, &["figure", "align"]);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].body(text), r"\begin{figure}x\end{figure}");
        assert_eq!(spans[1].name, "align*");
        assert_eq!(spans[1].base_name(), "align");
        assert_eq!(spans[1].body(text), "y");
    }

    #[test]
    fn test_unclosed_environment_is_skipped() {
        let text = r"\begin{equation} x = 1";
        assert!(find_environments(text, &["equation"]).is_empty());
        assert_eq!(unclosed_environments(text), vec!["equation".to_string()]);
        assert!(unclosed_environments(r"\begin{a}\end{a}").is_empty());
    }
}
