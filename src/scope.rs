//! Hierarchical variable scope: a stack of immutable mapping frames
//! over the caller-supplied data context. Lookups walk innermost frame
//! outward; frames are pushed per iteration/case body and popped when
//! that body finishes, so loop bindings never leak across siblings.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Splits `a.b[0]["key"]` into lookup segments. Returns `None` for
/// text that is not a path; resolution then falls through to the
/// variable's default.
fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let chars: Vec<char> = path.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                if i >= chars.len() {
                    return None;
                }
            }
            '[' => {
                i += 1;
                if i >= chars.len() {
                    return None;
                }
                if chars[i] == '"' || chars[i] == '\'' {
                    let quote = chars[i];
                    i += 1;
                    let start = i;
                    while i < chars.len() && chars[i] != quote {
                        i += 1;
                    }
                    if i >= chars.len() {
                        return None;
                    }
                    segments.push(Segment::Key(chars[start..i].iter().collect()));
                    i += 1;
                } else {
                    let start = i;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    if start == i {
                        return None;
                    }
                    let digits: String = chars[start..i].iter().collect();
                    segments.push(Segment::Index(digits.parse().ok()?));
                }
                if i >= chars.len() || chars[i] != ']' {
                    return None;
                }
                i += 1;
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '-')
                {
                    i += 1;
                }
                segments.push(Segment::Key(chars[start..i].iter().collect()));
            }
            _ => return None,
        }
    }
    if segments.is_empty() { None } else { Some(segments) }
}

/// The lookup chain for one render. The bottom frame borrows the
/// caller's data context; each pushed frame owns only its loop/case
/// bindings.
#[derive(Debug)]
pub struct Scope<'a> {
    base: &'a Map<String, Value>,
    frames: Vec<Map<String, Value>>,
}

impl<'a> Scope<'a> {
    pub fn new(base: &'a Map<String, Value>) -> Self {
        Self { base, frames: Vec::new() }
    }

    pub(crate) fn push_frame(&mut self, frame: Map<String, Value>) {
        self.frames.push(frame);
    }

    pub(crate) fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Resolves a dotted/bracketed path against the chain, innermost
    /// frame first. `None` means the path (or any segment of it) is
    /// undefined; that is never an error at this layer.
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let segments = parse_path(path)?;
        let first = match segments.first()? {
            Segment::Key(name) => name,
            Segment::Index(_) => return None,
        };
        let mut current = self
            .frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(first))
            .or_else(|| self.base.get(first))?;
        for segment in &segments[1..] {
            current = match (segment, current) {
                (Segment::Key(name), Value::Object(map)) => map.get(name)?,
                (Segment::Index(idx), Value::Array(items)) => items.get(*idx)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }
}

/// Scalars render verbatim (no quotes), `null` renders empty, and
/// non-scalar values serialize as compact JSON.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

/// Indented JSON for non-scalars, used by the examples directive.
pub(crate) fn stringify_pretty(value: &Value) -> String {
    match value {
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_default()
        }
        other => stringify(other),
    }
}

/// Falsy: null, false, 0, empty string, empty array, empty object.
/// Empty iterables counting as false follows the engine's treatment of
/// absent iteration sources.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
