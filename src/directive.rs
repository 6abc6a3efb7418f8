//! Directive dispatch.
//!
//! The built-in directives (section, if/elif/else, each, switch/case/
//! default, include, extends, examples) are a closed set that the
//! parser and engine handle structurally. Anything else goes through
//! the [`DirectiveHandler`] escape hatch: a fixed capability interface
//! registered at engine construction, after which the name becomes a
//! known keyword for the tokenizer.

use std::collections::HashMap;
use std::sync::Arc;

use crate::args::parse_attributes;
use crate::ast::Node;
use crate::error::RuntimeError;
use crate::scope::{Scope, stringify, stringify_pretty};

/// Capability interface for registered directives.
pub trait DirectiveHandler: Send + Sync {
    /// Unique directive name (matched case-insensitively in source).
    fn name(&self) -> &str;

    /// Whether the directive owns a nested body closed by `@end`.
    fn has_body(&self) -> bool {
        false
    }

    /// Argument-shape check invoked before execution.
    fn validate(&self, _node: &Node) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Produces the directive's output text.
    fn execute(&self, node: &Node, scope: &Scope<'_>) -> Result<String, RuntimeError>;
}

/// Static mapping from directive name to handler, built once per
/// engine. Only custom handlers live here; built-ins are dispatched
/// structurally.
#[derive(Clone, Default)]
pub(crate) struct DirectiveRegistry {
    custom: HashMap<String, Arc<dyn DirectiveHandler>>,
}

impl DirectiveRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, handler: Arc<dyn DirectiveHandler>) {
        self.custom.insert(handler.name().to_ascii_lowercase(), handler);
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Arc<dyn DirectiveHandler>> {
        self.custom.get(name)
    }

    pub(crate) fn has_body(&self, name: &str) -> bool {
        self.custom.get(name).is_some_and(|h| h.has_body())
    }

    /// Names the tokenizer should accept beyond the built-in keywords.
    pub(crate) fn extra_keywords(&self) -> Vec<String> {
        self.custom.keys().cloned().collect()
    }
}

impl std::fmt::Debug for DirectiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectiveRegistry")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Runtime validation for `@switch`: the parser permits an empty
/// argument, so its absence only surfaces here.
pub(crate) fn validate_switch_subject(subject: &str) -> Result<(), RuntimeError> {
    if subject.trim().is_empty() {
        return Err(RuntimeError::new(
            "Switch directive requires a value or variable argument",
        ));
    }
    Ok(())
}

/// Renders an `@examples` block: each `@case input="…" output="…"`
/// entry becomes an `Input:`/`Output:` line pair, consecutive cases
/// separated by exactly one blank line. No cases, no output.
pub(crate) fn execute_examples(
    cases: &[Node],
    scope: &Scope<'_>,
) -> Result<String, RuntimeError> {
    let mut rendered = Vec::new();
    for case in cases {
        let Node::Directive { raw_args, line, column, .. } = case else {
            continue;
        };
        let attrs = parse_attributes(raw_args, *line, *column)
            .map_err(|e| RuntimeError::new(e.to_string()))?;
        let input = substitute_refs(attrs.get("input").map_or("", String::as_str), scope);
        let output = substitute_refs(attrs.get("output").map_or("", String::as_str), scope);
        rendered.push(format!("Input: {input}\nOutput: {output}"));
    }
    Ok(rendered.join("\n\n"))
}

/// Replaces `{name}`/`{name.path}` references inside an example value.
/// This is deliberately distinct from the `@{…}` interpolation syntax
/// used elsewhere. Unresolved references render as empty string;
/// non-scalar values render as indented JSON.
fn substitute_refs(text: &str, scope: &Scope<'_>) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '{' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && chars[j] != '}' {
            j += 1;
        }
        if j >= chars.len() {
            out.push('{');
            i += 1;
            continue;
        }
        let inner: String = chars[i + 1..j].iter().collect();
        let is_ref = !inner.is_empty()
            && inner.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && inner.chars().all(|c| {
                c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '[' || c == ']'
            });
        if is_ref {
            if let Some(value) = scope.resolve(&inner) {
                let text = match value {
                    serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                        stringify_pretty(&value)
                    }
                    scalar => stringify(&scalar),
                };
                out.push_str(&text);
            }
            // Unresolved reference: empty string, never a failure.
            i = j + 1;
        } else {
            out.push('{');
            i += 1;
        }
    }
    out
}
