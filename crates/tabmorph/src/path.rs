//! Dotted path expressions with bracket selectors.
//!
//! Supported per segment: `name`, `name[N]`, `name?[N]` (safe index),
//! `name[*]` (wildcard) and `name[?field<op>literal]` (filter, where op is
//! one of `==`, `!=`, `>`, `<`, `>=`, `<=`, `~=`). Selectors can be chained:
//! `user.emails[?type=="work"]?[0].value`.

use std::borrow::Cow;

use regex::Regex;
use serde_json::Value as JsonValue;

use crate::value::{to_float, to_text};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    Empty,
    EmptySegment,
    MissingName(String),
    UnclosedBracket(String),
    UnexpectedText(String),
    InvalidSelector(String),
    InvalidFilter(String),
    InvalidRegex(String),
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::Empty => write!(f, "path is empty"),
            PathError::EmptySegment => write!(f, "path contains an empty segment"),
            PathError::MissingName(seg) => {
                write!(f, "segment '{}' must start with a field name", seg)
            }
            PathError::UnclosedBracket(at) => write!(f, "unclosed bracket at '{}'", at),
            PathError::UnexpectedText(at) => write!(f, "malformed path at '{}'", at),
            PathError::InvalidSelector(sel) => write!(f, "unsupported selector '[{}]'", sel),
            PathError::InvalidFilter(sel) => {
                write!(f, "filter '[{}]' needs a field and a comparison operator", sel)
            }
            PathError::InvalidRegex(pattern) => {
                write!(f, "invalid regex '{}' in filter", pattern)
            }
        }
    }
}

impl std::error::Error for PathError {}

#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    source: String,
    pub segments: Vec<Segment>,
}

impl PathExpr {
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for PathExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub name: String,
    pub selectors: Vec<Selector>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// `[N]`, or `?[N]` when `safe` is set. Both yield `null` out of range.
    Index { index: usize, safe: bool },
    Wildcard,
    Filter(FilterExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Match,
}

impl FilterOp {
    const TOKENS: [(&'static str, FilterOp); 7] = [
        ("==", FilterOp::Eq),
        ("!=", FilterOp::Ne),
        (">=", FilterOp::Gte),
        ("<=", FilterOp::Lte),
        ("~=", FilterOp::Match),
        (">", FilterOp::Gt),
        ("<", FilterOp::Lt),
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterLiteral {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct FilterExpr {
    pub field: String,
    pub op: FilterOp,
    pub literal: FilterLiteral,
    raw_literal: String,
    regex: Option<Regex>,
}

impl PartialEq for FilterExpr {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.op == other.op && self.literal == other.literal
    }
}

impl FilterExpr {
    fn matches(&self, value: &JsonValue) -> bool {
        match self.op {
            FilterOp::Eq => self.literal_equals(value),
            FilterOp::Ne => !self.literal_equals(value),
            FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte => {
                let (Some(left), FilterLiteral::Number(right)) = (to_float(value), &self.literal)
                else {
                    return false;
                };
                match self.op {
                    FilterOp::Gt => left > *right,
                    FilterOp::Lt => left < *right,
                    FilterOp::Gte => left >= *right,
                    _ => left <= *right,
                }
            }
            FilterOp::Match => {
                if value.is_null() {
                    return false;
                }
                self.regex
                    .as_ref()
                    .is_some_and(|re| re.is_match(&to_text(value)))
            }
        }
    }

    fn literal_equals(&self, value: &JsonValue) -> bool {
        match (&self.literal, value) {
            (FilterLiteral::Number(lit), JsonValue::Number(n)) => n.as_f64() == Some(*lit),
            (FilterLiteral::Text(lit), JsonValue::String(s)) => s == lit,
            _ => false,
        }
    }
}

pub fn parse_path(path: &str) -> Result<PathExpr, PathError> {
    if path.trim().is_empty() {
        return Err(PathError::Empty);
    }
    let segments = split_segments(path)?
        .into_iter()
        .map(parse_segment)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PathExpr {
        source: path.to_string(),
        segments,
    })
}

/// Splits on `.` outside of brackets, so filter literals may contain dots.
fn split_segments(path: &str) -> Result<Vec<&str>, PathError> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in path.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                segments.push(&path[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    segments.push(&path[start..]);
    if segments.iter().any(|seg| seg.is_empty()) {
        return Err(PathError::EmptySegment);
    }
    Ok(segments)
}

fn parse_segment(segment: &str) -> Result<Segment, PathError> {
    let bracket = segment.find('[').unwrap_or(segment.len());
    let mut name = &segment[..bracket];
    let mut rest = &segment[bracket..];
    if !rest.is_empty() && name.ends_with('?') {
        name = &name[..name.len() - 1];
        rest = &segment[bracket - 1..];
    }
    if name.is_empty() {
        return Err(PathError::MissingName(segment.to_string()));
    }
    if name.contains(']') || name.chars().any(char::is_whitespace) {
        return Err(PathError::UnexpectedText(segment.to_string()));
    }

    let mut selectors = Vec::new();
    while !rest.is_empty() {
        let safe = rest.starts_with("?[");
        if safe {
            rest = &rest[1..];
        }
        if !rest.starts_with('[') {
            return Err(PathError::UnexpectedText(rest.to_string()));
        }
        let close = matching_bracket(rest).ok_or_else(|| PathError::UnclosedBracket(rest.to_string()))?;
        selectors.push(parse_selector(&rest[1..close], safe)?);
        rest = &rest[close + 1..];
    }

    Ok(Segment {
        name: name.to_string(),
        selectors,
    })
}

/// Index of the `]` closing the `[` at the start of `text`.
fn matching_bracket(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in text.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_selector(content: &str, safe: bool) -> Result<Selector, PathError> {
    if content == "*" {
        return Ok(Selector::Wildcard);
    }
    if !content.is_empty() && content.bytes().all(|b| b.is_ascii_digit()) {
        let index = content
            .parse::<usize>()
            .map_err(|_| PathError::InvalidSelector(content.to_string()))?;
        return Ok(Selector::Index { index, safe });
    }
    if let Some(expr) = content.strip_prefix('?') {
        return parse_filter(expr, content).map(Selector::Filter);
    }
    Err(PathError::InvalidSelector(content.to_string()))
}

/// Picks the leftmost operator, preferring the longer token on ties
/// (`>=` over `>`).
fn parse_filter(expr: &str, content: &str) -> Result<FilterExpr, PathError> {
    let invalid = || PathError::InvalidFilter(content.to_string());
    let (pos, token, op) = FilterOp::TOKENS
        .iter()
        .filter_map(|(token, op)| expr.find(token).map(|pos| (pos, *token, *op)))
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.len().cmp(&a.1.len())))
        .ok_or_else(invalid)?;

    let field = expr[..pos].trim();
    if field.is_empty() {
        return Err(invalid());
    }
    let raw_literal = expr[pos + token.len()..]
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_string();
    let literal = match raw_literal.parse::<f64>() {
        Ok(num) => FilterLiteral::Number(num),
        Err(_) => FilterLiteral::Text(raw_literal.clone()),
    };
    let regex = match op {
        FilterOp::Match => Some(
            Regex::new(&raw_literal).map_err(|_| PathError::InvalidRegex(raw_literal.clone()))?,
        ),
        _ => None,
    };

    Ok(FilterExpr {
        field: field.to_string(),
        op,
        literal,
        raw_literal,
        regex,
    })
}

impl FilterExpr {
    pub fn literal_text(&self) -> &str {
        &self.raw_literal
    }
}

/// Resolves `path` against `root`. Missing data yields `null`, never an error.
///
/// Once the current value is an array, each following segment is applied to
/// every element; element results that are arrays are spliced in one level.
pub fn resolve(root: &JsonValue, path: &PathExpr) -> JsonValue {
    let mut current: Cow<'_, JsonValue> = Cow::Borrowed(root);
    for segment in &path.segments {
        current = match current {
            Cow::Borrowed(value) => step(value, segment),
            Cow::Owned(value) => Cow::Owned(step(&value, segment).into_owned()),
        };
    }
    current.into_owned()
}

/// Parses and resolves in one go.
pub fn get_path(root: &JsonValue, path: &str) -> Result<JsonValue, PathError> {
    Ok(resolve(root, &parse_path(path)?))
}

fn step<'v>(value: &'v JsonValue, segment: &Segment) -> Cow<'v, JsonValue> {
    match value {
        JsonValue::Null => Cow::Owned(JsonValue::Null),
        JsonValue::Array(items) => {
            let mut mapped = Vec::with_capacity(items.len());
            for item in items {
                match apply_segment(item, segment).into_owned() {
                    JsonValue::Array(inner) => mapped.extend(inner),
                    other => mapped.push(other),
                }
            }
            Cow::Owned(JsonValue::Array(mapped))
        }
        other => apply_segment(other, segment),
    }
}

fn apply_segment<'v>(base: &'v JsonValue, segment: &Segment) -> Cow<'v, JsonValue> {
    let JsonValue::Object(map) = base else {
        return Cow::Owned(JsonValue::Null);
    };
    let mut current = match map.get(&segment.name) {
        Some(value) => Cow::Borrowed(value),
        None => Cow::Owned(JsonValue::Null),
    };
    for selector in &segment.selectors {
        current = match current {
            Cow::Borrowed(value) => select(value, selector),
            Cow::Owned(value) => Cow::Owned(select(&value, selector).into_owned()),
        };
    }
    current
}

fn select<'v>(value: &'v JsonValue, selector: &Selector) -> Cow<'v, JsonValue> {
    match (selector, value) {
        (Selector::Wildcard, JsonValue::Array(_)) => Cow::Borrowed(value),
        (Selector::Wildcard, JsonValue::Object(map)) => {
            Cow::Owned(JsonValue::Array(map.values().cloned().collect()))
        }
        (Selector::Index { index, .. }, JsonValue::Array(items)) => match items.get(*index) {
            Some(item) => Cow::Borrowed(item),
            None => Cow::Owned(JsonValue::Null),
        },
        (Selector::Filter(filter), JsonValue::Array(items)) => {
            let kept = items
                .iter()
                .filter(|item| match item {
                    JsonValue::Object(obj) => {
                        filter.matches(obj.get(&filter.field).unwrap_or(&JsonValue::Null))
                    }
                    _ => false,
                })
                .cloned()
                .collect();
            Cow::Owned(JsonValue::Array(kept))
        }
        _ => Cow::Owned(JsonValue::Null),
    }
}
