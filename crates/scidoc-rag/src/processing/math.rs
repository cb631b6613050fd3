//! Equation detection, normalization and tokenization

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

use crate::config::MathConfig;
use crate::markup::{self, balanced_braces, brace_balance, is_escaped};
use crate::types::{EquationType, MathematicalContent};

/// Display math environments recognized as equations
pub const MATH_ENVIRONMENTS: &[&str] = &[
    "equation",
    "align",
    "alignat",
    "eqnarray",
    "gather",
    "multline",
    "flalign",
    "displaymath",
    "math",
];

/// Characters that must never survive normalization
const CONTROL_CHARS: &[char] = &['\\', '$', '{', '}', '&', '~', '#'];

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*|\d+(?:\.\d+)?|<=|>=|!=|[+\-*/=<>()\[\]^|!,]").unwrap()
});
static COMMAND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\([A-Za-z]+)").unwrap());
static OPERATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[+\-*/=<>^]").unwrap());
static BRACKET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[(){}\[\]|]").unwrap());
static VARIABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z_][a-zA-Z0-9_]*").unwrap());
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.?\d*").unwrap());
static ENV_WRAPPER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:begin|end)\{[A-Za-z*]+\}").unwrap());
static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:label|tag)\{[^{}]*\}|\\no(?:number|tag)\b").unwrap());
static SIZING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:left|right|[bB]igg?[lr]?|displaystyle|textstyle|limits)\b").unwrap()
});
static SPACING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\\\|\\[,;:! ]|\\q?quad\b").unwrap());
// `\b` would reject `\int_0`, so the name must be followed by a non-letter
static INTEGRAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:int|iint|iiint|oint)(?:[^A-Za-z]|$)").unwrap());
static MEMBERSHIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:in|notin|ni)(?:[^A-Za-z]|$)|∈|∉").unwrap());
static SET_RELATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:subset|subseteq|supset|supseteq|subsetneq|cup|cap|setminus)(?:[^A-Za-z]|$)|[⊂⊆⊃⊇]")
        .unwrap()
});

/// Tokens treated as functions rather than variables
const FUNCTION_NAMES: &[&str] = &[
    "sum", "int", "prod", "sqrt", "lim", "log", "ln", "exp", "sin", "cos", "tan", "max", "min",
    "to", "inf",
];

const OPERATOR_TOKENS: &[&str] = &["+", "-", "*", "/", "=", "<", ">", "<=", ">=", "!=", "^", "!"];

/// Why an equation could not be normalized
#[derive(Debug, Error, PartialEq)]
pub enum MathError {
    #[error("unbalanced braces in equation markup")]
    UnbalancedBraces,
    #[error("unterminated math delimiter '{0}'")]
    UnterminatedDelimiter(&'static str),
    #[error("unclosed environment '{0}'")]
    UnclosedEnvironment(String),
    #[error("normalized form still contains markup: {0}")]
    ResidualMarkup(String),
}

/// How an equation span is delimited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EquationDelimiter {
    /// `\begin{name} ... \end{name}`
    Environment(String),
    /// `$$ ... $$`
    DisplayDollar,
    /// `\[ ... \]`
    DisplayBracket,
    /// `\( ... \)`
    InlineParen,
    /// `$ ... $`
    InlineDollar,
}

impl EquationDelimiter {
    pub fn is_display(&self) -> bool {
        !matches!(self, EquationDelimiter::InlineParen | EquationDelimiter::InlineDollar)
    }
}

/// Byte range of an equation inside a larger text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquationSpan {
    pub start: usize,
    pub end: usize,
    pub delimiter: EquationDelimiter,
}

impl EquationSpan {
    pub fn markup<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// Optional symbolic simplification backend
#[cfg_attr(test, mockall::automock)]
pub trait Canonicalizer: Send + Sync {
    /// Simplified form of a normalized equation
    fn canonicalize(&self, normalized: &str) -> crate::Result<String>;
}

/// Equation processor
#[derive(Clone)]
pub struct MathematicalProcessor {
    config: MathConfig,
    canonicalizer: Option<Arc<dyn Canonicalizer>>,
}

impl MathematicalProcessor {
    /// Create a processor without a canonicalizer
    pub fn new(config: MathConfig) -> Self {
        Self {
            config,
            canonicalizer: None,
        }
    }

    /// Install a symbolic backend
    pub fn with_canonicalizer(mut self, canonicalizer: Arc<dyn Canonicalizer>) -> Self {
        self.canonicalizer = Some(canonicalizer);
        self
    }

    pub fn has_canonicalizer(&self) -> bool {
        self.canonicalizer.is_some()
    }

    /// Normalize, tokenize and score one equation. Never fails: malformed
    /// markup yields a fallback result with `error` set.
    pub fn process_equation(&self, markup: &str) -> MathematicalContent {
        if markup.trim().is_empty() {
            return MathematicalContent::empty();
        }

        let math_norm = match validate(markup).and_then(|_| normalize(markup)) {
            Ok(norm) => norm,
            Err(e) => {
                tracing::debug!("Equation fallback ({}): {}", e, markup);
                return MathematicalContent::fallback(markup, e.to_string());
            }
        };

        let math_tokens = tokenize(&math_norm);
        let math_kgrams = kgrams(&math_tokens, self.config.kgram_size);
        let (variables, operators) = split_symbols(&math_tokens);

        MathematicalContent {
            equation_tex: markup.to_string(),
            math_canonical: self.canonicalize(&math_norm),
            math_norm,
            math_tokens,
            math_kgrams,
            equation_type: classify_equation_type(markup),
            complexity_score: complexity_score(markup),
            variables,
            operators,
            error: None,
        }
    }

    fn canonicalize(&self, normalized: &str) -> Option<String> {
        if !self.config.enable_canonicalization || normalized.is_empty() {
            return None;
        }
        let backend = self.canonicalizer.as_ref()?;
        match backend.canonicalize(normalized) {
            Ok(canonical) if !canonical.trim().is_empty() => Some(canonical),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Canonicalization skipped: {}", e);
                None
            }
        }
    }

    /// All equation spans in `text`, ordered by position
    pub fn detect_equations(&self, text: &str) -> Vec<EquationSpan> {
        detect_equations(text)
    }

    /// Markup of the first equation in `text`, or the trimmed text itself
    pub fn extract_equation_markup(&self, text: &str) -> String {
        extract_equation_markup(text)
    }
}

impl Default for MathematicalProcessor {
    fn default() -> Self {
        Self::new(MathConfig::default())
    }
}

/// All equation spans in `text`, ordered by position
pub fn detect_equations(text: &str) -> Vec<EquationSpan> {
    let mut spans: Vec<EquationSpan> = markup::find_environments(text, MATH_ENVIRONMENTS)
        .into_iter()
        .map(|env| EquationSpan {
            start: env.start,
            end: env.end,
            delimiter: EquationDelimiter::Environment(env.name),
        })
        .collect();

    let bytes = text.as_bytes();
    let mut env_iter = spans.clone().into_iter().peekable();
    let mut i = 0;

    while i < bytes.len() {
        if let Some(env) = env_iter.peek() {
            if i >= env.start {
                i = i.max(env.end);
                env_iter.next();
                continue;
            }
        }
        let limit = env_iter.peek().map_or(bytes.len(), |env| env.start);

        match bytes[i] {
            b'\\' => {
                let (close, delimiter) = match bytes.get(i + 1) {
                    Some(b'[') => ("\\]", EquationDelimiter::DisplayBracket),
                    Some(b'(') => ("\\)", EquationDelimiter::InlineParen),
                    _ => {
                        // escaped char or line break
                        i += 2;
                        continue;
                    }
                };
                match find_closing(text, i + 2, close, limit) {
                    Some(end) => {
                        spans.push(EquationSpan { start: i, end, delimiter });
                        i = end;
                    }
                    None => i += 2,
                }
            }
            b'$' if bytes.get(i + 1) == Some(&b'$') => match find_closing(text, i + 2, "$$", limit) {
                Some(end) => {
                    spans.push(EquationSpan {
                        start: i,
                        end,
                        delimiter: EquationDelimiter::DisplayDollar,
                    });
                    i = end;
                }
                None => i += 2,
            },
            b'$' => {
                let paragraph_end = text[i..limit].find("\n\n").map_or(limit, |p| p + i);
                match find_closing(text, i + 1, "$", paragraph_end) {
                    Some(end) if end > i + 2 => {
                        spans.push(EquationSpan {
                            start: i,
                            end,
                            delimiter: EquationDelimiter::InlineDollar,
                        });
                        i = end;
                    }
                    _ => i += 1,
                }
            }
            _ => i += 1,
        }
    }

    spans.sort_by_key(|span| span.start);
    spans
}

/// End offset (past the delimiter) of the first unescaped `close` in `[from, limit)`
fn find_closing(text: &str, from: usize, close: &str, limit: usize) -> Option<usize> {
    let mut at = from;
    while at < limit {
        let found = text.get(at..limit)?.find(close)? + at;
        let escaped = close.starts_with('$') && is_escaped(text, found);
        if !escaped {
            return Some(found + close.len());
        }
        at = found + 1;
    }
    None
}

/// Markup of the first equation in `text`, or the trimmed text itself
pub fn extract_equation_markup(text: &str) -> String {
    match detect_equations(text).first() {
        Some(span) => span.markup(text).to_string(),
        None => text.trim().to_string(),
    }
}

/// Reject markup that cannot be normalized reliably
pub fn validate(markup: &str) -> Result<(), MathError> {
    if brace_balance(markup) != 0 {
        return Err(MathError::UnbalancedBraces);
    }
    if let Some(name) = markup::unclosed_environments(markup).into_iter().next() {
        return Err(MathError::UnclosedEnvironment(name));
    }

    let dollars = markup
        .match_indices('$')
        .filter(|(i, _)| !is_escaped(markup, *i))
        .count();
    if dollars % 2 == 1 {
        return Err(MathError::UnterminatedDelimiter("$"));
    }
    if count_unescaped(markup, "\\[") != count_unescaped(markup, "\\]") {
        return Err(MathError::UnterminatedDelimiter("\\["));
    }
    if count_unescaped(markup, "\\(") != count_unescaped(markup, "\\)") {
        return Err(MathError::UnterminatedDelimiter("\\("));
    }
    Ok(())
}

fn count_unescaped(text: &str, pattern: &str) -> usize {
    text.match_indices(pattern)
        .filter(|(i, _)| !is_escaped(text, *i))
        .count()
}

/// Map equation markup to its canonical ASCII-like form
pub fn normalize(markup: &str) -> Result<String, MathError> {
    let mut s = strip_delimiters(markup.trim()).to_string();

    s = ENV_WRAPPER_RE.replace_all(&s, " ").into_owned();
    s = LABEL_RE.replace_all(&s, " ").into_owned();
    s = SPACING_RE.replace_all(&s, " ").into_owned();
    s = SIZING_RE.replace_all(&s, "").into_owned();

    for style in [
        "text", "mathrm", "mathbf", "mathit", "mathsf", "mathcal", "mathbb", "boldsymbol",
        "operatorname", "mbox",
    ] {
        s = rewrite_command(&s, style, |args| Some(args.first()?.to_string()));
    }

    // Structural rewrites can nest, so repeat until nothing changes
    for _ in 0..32 {
        let before = s.clone();
        for frac in ["frac", "dfrac", "tfrac"] {
            s = rewrite_command(&s, frac, |args| {
                Some(format!("({})/({})", args.first()?, args.get(1)?))
            });
        }
        s = rewrite_command(&s, "sqrt", |args| Some(format!("sqrt({})", args.first()?)));
        for (command, name) in [("sum", "sum"), ("int", "int"), ("prod", "prod")] {
            s = rewrite_bounded(&s, command, name);
        }
        if s == before {
            break;
        }
    }

    s = s
        .replace("\\{", "(")
        .replace("\\}", ")")
        .replace("\\|", "|")
        .replace("\\%", "%")
        .replace("\\_", "_");

    s = COMMAND_RE
        .replace_all(&s, |caps: &regex::Captures| {
            let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
            let word_char = |c: Option<char>| c.map_or(false, |c| c.is_ascii_alphanumeric() || c == '_');
            format!(
                "{}{}{}",
                if word_char(s[..start].chars().next_back()) { " " } else { "" },
                symbol_name(&caps[1]),
                if word_char(s[end..].chars().next()) { " " } else { "" },
            )
        })
        .into_owned();

    let s: String = s
        .chars()
        .map(|c| match c {
            '{' => '(',
            '}' => ')',
            '\\' | '$' | '&' | '~' | '#' => ' ',
            other => other,
        })
        .collect();
    let normalized = markup::collapse_whitespace(&s);

    if normalized.contains(CONTROL_CHARS) {
        return Err(MathError::ResidualMarkup(normalized));
    }
    Ok(normalized)
}

fn strip_delimiters(s: &str) -> &str {
    for (open, close) in [("$$", "$$"), ("\\[", "\\]"), ("\\(", "\\)"), ("$", "$")] {
        if s.len() >= open.len() + close.len() && s.starts_with(open) && s.ends_with(close) {
            return s[open.len()..s.len() - close.len()].trim();
        }
    }
    s
}

/// Replacement for a command name outside the structural table
fn symbol_name(command: &str) -> &str {
    match command {
        "cdot" | "times" | "ast" => "*",
        "div" => "/",
        "pm" => "+-",
        "mp" => "-+",
        "leq" | "le" | "leqslant" => "<=",
        "geq" | "ge" | "geqslant" => ">=",
        "neq" | "ne" => "!=",
        "infty" => "inf",
        "to" | "rightarrow" | "mapsto" => "->",
        "ldots" | "cdots" | "dots" | "vdots" => "...",
        "varepsilon" => "epsilon",
        "vartheta" => "theta",
        "varphi" => "phi",
        "varrho" => "rho",
        other => other,
    }
}

/// Parse one macro argument at `i`: a braced group or a single character
fn parse_argument(s: &str, i: usize) -> Option<(String, usize)> {
    let bytes = s.as_bytes();
    let mut i = i;
    while bytes.get(i).map_or(false, |b| *b == b' ') {
        i += 1;
    }
    match bytes.get(i)? {
        b'{' => {
            let (start, end) = balanced_braces(s, i)?;
            Some((s[start..end].to_string(), end + 1))
        }
        b'\\' => {
            // single command argument such as \frac\pi2
            let rest = &s[i + 1..];
            let len = rest.chars().take_while(|c| c.is_ascii_alphabetic()).count();
            if len == 0 {
                return None;
            }
            Some((s[i..i + 1 + len].to_string(), i + 1 + len))
        }
        b'}' | b'^' | b'_' => None,
        _ => {
            let c = s[i..].chars().next()?;
            Some((c.to_string(), i + c.len_utf8()))
        }
    }
}

/// Rewrite every `\command` with its arguments through `f`
fn rewrite_command<F>(s: &str, command: &str, f: F) -> String
where
    F: Fn(&[String]) -> Option<String>,
{
    let needle = format!("\\{}", command);
    let arity = match command {
        "frac" | "dfrac" | "tfrac" => 2,
        _ => 1,
    };
    let mut out = String::with_capacity(s.len());
    let mut from = 0;

    while let Some(rel) = s[from..].find(&needle) {
        let at = from + rel;
        let after = at + needle.len();
        out.push_str(&s[from..at]);

        let continues_name = s.as_bytes().get(after).map_or(false, u8::is_ascii_alphabetic);
        if continues_name {
            out.push_str(&needle);
            from = after;
            continue;
        }

        let mut cursor = after;
        // \sqrt[n]{x}: drop the root index
        if command == "sqrt" && s.as_bytes().get(cursor) == Some(&b'[') {
            if let Some(close) = s[cursor..].find(']') {
                cursor += close + 1;
            }
        }

        let mut args = Vec::with_capacity(arity);
        for _ in 0..arity {
            match parse_argument(s, cursor) {
                Some((arg, next)) => {
                    args.push(arg);
                    cursor = next;
                }
                None => break,
            }
        }

        match (args.len() == arity).then(|| f(&args)).flatten() {
            Some(replacement) => {
                out.push_str(&replacement);
                from = cursor;
            }
            None => {
                out.push_str(&needle);
                from = after;
            }
        }
    }

    out.push_str(&s[from..]);
    out
}

/// Rewrite `\sum_{a}^{b}` style operators to `sum(a to b)`
fn rewrite_bounded(s: &str, command: &str, name: &str) -> String {
    let needle = format!("\\{}", command);
    let mut out = String::with_capacity(s.len());
    let mut from = 0;

    while let Some(rel) = s[from..].find(&needle) {
        let at = from + rel;
        let after = at + needle.len();
        out.push_str(&s[from..at]);

        if s.as_bytes().get(after).map_or(false, u8::is_ascii_alphabetic) {
            out.push_str(&needle);
            from = after;
            continue;
        }

        let mut lower = None;
        let mut upper = None;
        let mut cursor = after;
        for _ in 0..2 {
            let marker = s.as_bytes().get(cursor).copied();
            let slot = match marker {
                Some(b'_') if lower.is_none() => &mut lower,
                Some(b'^') if upper.is_none() => &mut upper,
                _ => break,
            };
            match parse_argument(s, cursor + 1) {
                Some((arg, next)) => {
                    *slot = Some(arg);
                    cursor = next;
                }
                None => break,
            }
        }

        match (lower, upper) {
            (Some(a), Some(b)) => out.push_str(&format!("{}({} to {})", name, a, b)),
            (Some(a), None) => out.push_str(&format!("{}({})", name, a)),
            (None, Some(b)) => out.push_str(&format!("{}(to {})", name, b)),
            (None, None) => out.push_str(&format!(" {} ", name)),
        }
        from = cursor;
    }

    out.push_str(&s[from..]);
    out
}

/// Split a normalized form into identifier, number and operator tokens
pub fn tokenize(normalized: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(normalized)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Sliding windows of `k` space-joined tokens; empty when there are fewer than `k`
pub fn kgrams(tokens: &[String], k: usize) -> Vec<String> {
    if k == 0 || tokens.len() < k {
        return Vec::new();
    }
    tokens.windows(k).map(|window| window.join(" ")).collect()
}

fn split_symbols(tokens: &[String]) -> (Vec<String>, Vec<String>) {
    let mut variables: Vec<String> = Vec::new();
    let mut operators: Vec<String> = Vec::new();

    for token in tokens {
        let is_identifier = token
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
        if is_identifier && !FUNCTION_NAMES.contains(&token.as_str()) {
            if !variables.contains(token) {
                variables.push(token.clone());
            }
        } else if OPERATOR_TOKENS.contains(&token.as_str()) && !operators.contains(token) {
            operators.push(token.clone());
        }
    }

    (variables, operators)
}

/// Weighted count of commands, operators, brackets and symbols, capped at 10
pub fn complexity_score(markup: &str) -> f32 {
    if markup.is_empty() {
        return 0.0;
    }
    let commands = COMMAND_RE.find_iter(markup).count() as f32;
    let operators = OPERATOR_RE.find_iter(markup).count() as f32;
    let brackets = BRACKET_RE.find_iter(markup).count() as f32;
    let symbols = (VARIABLE_RE.find_iter(markup).count() + NUMBER_RE.find_iter(markup).count()) as f32;

    (commands * 0.5 + operators * 0.3 + brackets * 0.2 + symbols * 0.1).min(10.0)
}

/// First matching structural category
pub fn classify_equation_type(markup: &str) -> EquationType {
    if markup.trim().is_empty() {
        return EquationType::Unknown;
    }
    let has_command = |name: &str| {
        let needle = format!("\\{}", name);
        markup.match_indices(&needle).any(|(i, _)| {
            !markup
                .as_bytes()
                .get(i + needle.len())
                .map_or(false, u8::is_ascii_alphabetic)
        })
    };

    if has_command("frac") || has_command("dfrac") || has_command("tfrac") || markup.contains('/') {
        EquationType::Fraction
    } else if has_command("sum") {
        EquationType::Summation
    } else if INTEGRAL_RE.is_match(markup) {
        EquationType::Integral
    } else if has_command("sqrt") {
        EquationType::Radical
    } else if markup.contains('=') {
        EquationType::Equation
    } else if MEMBERSHIP_RE.is_match(markup) {
        EquationType::SetMembership
    } else if SET_RELATION_RE.is_match(markup) {
        EquationType::SetRelation
    } else {
        EquationType::Expression
    }
}
