//! The rendering engine: compiles template source through the
//! tokenizer and parser, resolves inheritance, and walks the tree
//! against a data context to produce output text.
//!
//! One engine instance is meant to be shared: it is `Send + Sync`, the
//! parse cache sits behind an `RwLock`, and concurrent renders against
//! the same instance are safe. Losing a race to populate a cache key
//! costs a redundant parse, nothing more.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use crate::ast::{Alternate, Conditional, Node};
use crate::directive::{
    DirectiveHandler, DirectiveRegistry, execute_examples, validate_switch_subject,
};
use crate::error::{PromptmlError, PromptmlResult};
use crate::expr::{evaluate_condition, resolve_operand, values_equal};
use crate::fs::TemplateFileSystem;
use crate::inherit::resolve_inheritance;
use crate::parser::parse;
use crate::scope::{Scope, stringify};
use crate::token::{TokenizerOptions, tokenize};

/// Appended when a template name's final segment has no extension and
/// the bare name does not exist.
const DEFAULT_EXTENSION: &str = ".prompt";

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Memoize parsed templates per path, revalidated by content hash.
    pub cache: bool,
    /// Wrap runtime failures into a single wrapped error kind.
    pub strict: bool,
    /// Skip the output whitespace cleanup pass.
    pub preserve_whitespace: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { cache: true, strict: false, preserve_whitespace: false }
    }
}

struct CacheEntry {
    /// Hash of the source the entry was parsed from; a mismatch on
    /// lookup forces a reparse, so stale files never render.
    hash: u64,
    nodes: Arc<Vec<Node>>,
}

pub struct Engine {
    fs: Arc<dyn TemplateFileSystem>,
    options: EngineOptions,
    registry: DirectiveRegistry,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl Engine {
    pub fn new(fs: impl TemplateFileSystem + 'static, options: EngineOptions) -> Self {
        Self {
            fs: Arc::new(fs),
            options,
            registry: DirectiveRegistry::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a custom directive handler. The handler's name becomes
    /// a recognized keyword for every subsequent compile.
    pub fn register_directive(&mut self, handler: Arc<dyn DirectiveHandler>) {
        self.registry.register(handler);
    }

    /// Drops all memoized parses.
    pub fn clear_cache(&self) {
        self.cache.write().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
    }

    /// Renders an inline template string against `data`, which must be
    /// a JSON object (or null for an empty context).
    pub fn render(&self, source: &str, data: &Value) -> PromptmlResult<String> {
        self.finish(self.render_source(source, data))
    }

    /// Fetches `path` through the filesystem collaborator and renders
    /// it. A name without an extension falls back to `.prompt`.
    pub fn render_file(&self, path: &str, data: &Value) -> PromptmlResult<String> {
        self.finish(self.render_path(path, data))
    }

    fn render_source(&self, source: &str, data: &Value) -> PromptmlResult<String> {
        let context = context_map(data)?;
        let parsed = self.compile(source)?;
        let mut loader = |name: &str| self.load_parsed(name);
        let resolved = resolve_inheritance(parsed, &mut loader, &mut Vec::new())?;
        self.evaluate(&resolved, context, Vec::new())
    }

    fn render_path(&self, path: &str, data: &Value) -> PromptmlResult<String> {
        let context = context_map(data)?;
        let resolved = self.load_resolved(path)?;
        self.evaluate(&resolved, context, vec![path.to_string()])
    }

    fn evaluate(
        &self,
        nodes: &[Node],
        context: &Map<String, Value>,
        include_stack: Vec<String>,
    ) -> PromptmlResult<String> {
        let mut scope = Scope::new(context);
        let mut out = String::new();
        let mut evaluator = Evaluator { engine: self, include_stack };
        evaluator.eval_nodes(nodes, &mut scope, &mut out)?;
        Ok(out)
    }

    /// Applies the strict-mode error policy and the whitespace pass.
    fn finish(&self, result: PromptmlResult<String>) -> PromptmlResult<String> {
        let output = result.map_err(|e| if self.options.strict { e.into_strict() } else { e })?;
        if self.options.preserve_whitespace {
            Ok(output)
        } else {
            Ok(tidy_whitespace(&output))
        }
    }

    fn compile(&self, source: &str) -> PromptmlResult<Vec<Node>> {
        let extra = self.registry.extra_keywords();
        let tokens = tokenize(source, &extra, TokenizerOptions::default())?;
        Ok(parse(tokens, &self.registry)?)
    }

    fn resolve_path(&self, name: &str) -> PromptmlResult<String> {
        if self.fs.exists(name) {
            return Ok(name.to_string());
        }
        let last = name.rsplit('/').next().unwrap_or(name);
        if !last.contains('.') {
            let fallback = format!("{name}{DEFAULT_EXTENSION}");
            if self.fs.exists(&fallback) {
                return Ok(fallback);
            }
        }
        Err(PromptmlError::TemplateNotFound { name: name.to_string() })
    }

    /// Loads and parses a template by name, consulting the cache. The
    /// cached tree is pre-inheritance: parent merging depends on other
    /// files, so it runs on every render.
    fn load_parsed(&self, name: &str) -> PromptmlResult<Vec<Node>> {
        let path = self.resolve_path(name)?;
        let source = self.fs.read_file(&path)?;
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        let hash = hasher.finish();

        if self.options.cache {
            let cache = self.cache.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(entry) = cache.get(&path) {
                if entry.hash == hash {
                    tracing::debug!(path = %path, "template cache hit");
                    return Ok((*entry.nodes).clone());
                }
            }
            tracing::debug!(path = %path, "template cache miss");
        }

        let nodes = Arc::new(self.compile(&source)?);
        if self.options.cache {
            self.cache
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(path, CacheEntry { hash, nodes: Arc::clone(&nodes) });
        }
        Ok((*nodes).clone())
    }

    fn load_resolved(&self, name: &str) -> PromptmlResult<Vec<Node>> {
        let parsed = self.load_parsed(name)?;
        let mut chain = vec![name.to_string()];
        let mut loader = |n: &str| self.load_parsed(n);
        resolve_inheritance(parsed, &mut loader, &mut chain)
    }
}

fn context_map(data: &Value) -> PromptmlResult<&Map<String, Value>> {
    static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();
    match data {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(EMPTY.get_or_init(Map::new)),
        other => Err(PromptmlError::runtime(format!(
            "Template data must be a JSON object, got {other}"
        ))),
    }
}

struct Evaluator<'e> {
    engine: &'e Engine,
    /// Template names currently being rendered via `@include`.
    include_stack: Vec<String>,
}

impl Evaluator<'_> {
    fn eval_nodes(
        &mut self,
        nodes: &[Node],
        scope: &mut Scope<'_>,
        out: &mut String,
    ) -> PromptmlResult<()> {
        for node in nodes {
            self.eval_node(node, scope, out)?;
        }
        Ok(())
    }

    fn eval_node(
        &mut self,
        node: &Node,
        scope: &mut Scope<'_>,
        out: &mut String,
    ) -> PromptmlResult<()> {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Variable { path, default } => match scope.resolve(path) {
                Some(value) => out.push_str(&stringify(&value)),
                None => {
                    if let Some(default) = default {
                        out.push_str(default);
                    }
                }
            },
            Node::Section { children, .. } => self.eval_nodes(children, scope, out)?,
            Node::Conditional(conditional) => self.eval_conditional(conditional, scope, out)?,
            Node::Iteration { item_name, index_name, array_path, children } => {
                // Absent or non-list sources render nothing.
                let Some(Value::Array(items)) = scope.resolve(array_path) else {
                    return Ok(());
                };
                for (index, item) in items.into_iter().enumerate() {
                    let mut frame = Map::new();
                    frame.insert(item_name.clone(), item);
                    if let Some(index_name) = index_name {
                        frame.insert(index_name.clone(), Value::from(index));
                    }
                    scope.push_frame(frame);
                    let result = self.eval_nodes(children, scope, out);
                    scope.pop_frame();
                    result?;
                }
            }
            Node::Switch { subject, cases, default, line, column } => {
                validate_switch_subject(subject)?;
                let subject = resolve_operand(subject, scope, *line, *column)?;
                for arm in cases {
                    let value = resolve_operand(&arm.value, scope, *line, *column)?;
                    if values_equal(&subject, &value) {
                        return self.eval_nodes(&arm.children, scope, out);
                    }
                }
                if let Some(default) = default {
                    self.eval_nodes(default, scope, out)?;
                }
            }
            Node::Directive { name, raw_args, children, .. } => match name.as_str() {
                "include" => self.eval_include(raw_args, scope, out)?,
                "examples" => {
                    let cases = children.as_deref().unwrap_or(&[]);
                    out.push_str(&execute_examples(cases, scope)?);
                }
                // The inheritance resolver consumes well-placed
                // @extends nodes; one surviving to evaluation was
                // nested somewhere it cannot apply.
                "extends" => {
                    return Err(PromptmlError::runtime(
                        "@extends must be the first directive in a template",
                    ));
                }
                other => {
                    let handler = self.engine.registry.get(other).ok_or_else(|| {
                        PromptmlError::runtime(format!("No handler registered for '@{other}'"))
                    })?;
                    handler.validate(node)?;
                    out.push_str(&handler.execute(node, scope)?);
                }
            },
        }
        Ok(())
    }

    fn eval_conditional(
        &mut self,
        conditional: &Conditional,
        scope: &mut Scope<'_>,
        out: &mut String,
    ) -> PromptmlResult<()> {
        let Conditional { condition, consequent, alternate, line, column } = conditional;
        if evaluate_condition(condition, scope, *line, *column)? {
            return self.eval_nodes(consequent, scope, out);
        }
        match alternate.as_deref() {
            Some(Alternate::Elif(next)) => self.eval_conditional(next, scope, out),
            Some(Alternate::Else(body)) => self.eval_nodes(body, scope, out),
            None => Ok(()),
        }
    }

    fn eval_include(
        &mut self,
        name: &str,
        scope: &mut Scope<'_>,
        out: &mut String,
    ) -> PromptmlResult<()> {
        if self.include_stack.iter().any(|n| n == name) {
            let mut cycle = self.include_stack.clone();
            cycle.push(name.to_string());
            return Err(PromptmlError::runtime(format!(
                "Include cycle detected: {}",
                cycle.join(" -> ")
            )));
        }
        tracing::debug!(template = %name, "including template");
        let nodes = self.engine.load_resolved(name)?;
        self.include_stack.push(name.to_string());
        // The current scope chain passes through unchanged, so loop
        // bindings at the include site are visible inside.
        let result = self.eval_nodes(&nodes, scope, out);
        self.include_stack.pop();
        result
    }
}

/// Output cleanup for the default `preserve_whitespace: false` mode:
/// trailing spaces/tabs stripped per line, runs of blank lines
/// collapsed to one, trailing blank lines dropped. A final newline is
/// kept (singly) when the raw output had one.
fn tidy_whitespace(output: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut blanks = 0usize;
    for line in output.split('\n') {
        let line = line.trim_end_matches([' ', '\t']);
        if line.is_empty() {
            blanks += 1;
            if blanks <= 1 {
                kept.push(line);
            }
        } else {
            blanks = 0;
            kept.push(line);
        }
    }
    while kept.last() == Some(&"") {
        kept.pop();
    }
    let mut result = kept.join("\n");
    if output.ends_with('\n') && !result.is_empty() {
        result.push('\n');
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::fs::MemoryFileSystem;
    use serde_json::json;

    fn engine() -> Engine {
        Engine::new(MemoryFileSystem::new(), EngineOptions::default())
    }

    fn engine_with(files: &[(&str, &str)], options: EngineOptions) -> Engine {
        Engine::new(MemoryFileSystem::from_files(files.iter().copied()), options)
    }

    #[test]
    #[ntest::timeout(100)]
    fn renders_variable_with_default() {
        let engine = engine();
        assert_eq!(engine.render("Hello @{name|\"Guest\"}", &json!({})).unwrap(), "Hello Guest");
        assert_eq!(
            engine.render("Hello @{name|\"Guest\"}", &json!({"name": "Ana"})).unwrap(),
            "Hello Ana"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn null_data_is_an_empty_context() {
        let engine = engine();
        assert_eq!(engine.render("Hi @{x|\"d\"}", &Value::Null).unwrap(), "Hi d");
    }

    #[test]
    #[ntest::timeout(100)]
    fn non_object_data_is_rejected() {
        let engine = engine();
        let err = engine.render("x", &json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn null_value_renders_empty_not_default() {
        let engine = engine();
        assert_eq!(engine.render("[@{x|\"d\"}]", &json!({"x": null})).unwrap(), "[]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn conditional_chain_picks_first_true_branch() {
        let engine = engine();
        let template = "@if score >= 90\nA\n@elif score >= 80\nB\n@else\nC\n@end";
        assert_eq!(engine.render(template, &json!({"score": 95})).unwrap(), "A\n");
        assert_eq!(engine.render(template, &json!({"score": 85})).unwrap(), "B\n");
        assert_eq!(engine.render(template, &json!({"score": 10})).unwrap(), "C\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn iteration_binds_item_and_index() {
        let engine = engine();
        let out = engine
            .render("@each fruit, i in fruits\n@{i}: @{fruit}\n@end", &json!({"fruits": ["a", "b"]}))
            .unwrap();
        assert_eq!(out, "0: a\n1: b\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn iteration_over_absent_or_non_list_renders_nothing() {
        let engine = engine();
        let template = "@each x in xs\n@{x}\n@end";
        assert_eq!(engine.render(template, &json!({})).unwrap(), "");
        assert_eq!(engine.render(template, &json!({"xs": "nope"})).unwrap(), "");
    }

    #[test]
    #[ntest::timeout(100)]
    fn switch_matches_strictly_and_first_match_wins() {
        let engine = engine();
        let template = "@switch value\n@case \"0\"\nstring\n@case 0\nnumber\n@end";
        assert_eq!(engine.render(template, &json!({"value": "0"})).unwrap(), "string\n");
        assert_eq!(engine.render(template, &json!({"value": 0})).unwrap(), "number\n");
        assert_eq!(engine.render(template, &json!({"value": 7})).unwrap(), "");
    }

    #[test]
    #[ntest::timeout(100)]
    fn switch_without_subject_fails_in_both_modes() {
        let template = "@switch\n@case \"test\"\nTest\n@end";
        let lenient = engine();
        let err = lenient.render(template, &json!({})).unwrap_err();
        assert!(
            err.to_string().contains("Switch directive requires a value or variable argument"),
            "got: {err}"
        );

        let strict = Engine::new(
            MemoryFileSystem::new(),
            EngineOptions { strict: true, ..EngineOptions::default() },
        );
        match strict.render(template, &json!({})).unwrap_err() {
            PromptmlError::Runtime(inner) => {
                assert!(inner.wrapped);
                assert_eq!(inner.message, "Switch directive requires a value or variable argument");
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn strict_mode_leaves_syntax_errors_alone() {
        let strict = Engine::new(
            MemoryFileSystem::new(),
            EngineOptions { strict: true, ..EngineOptions::default() },
        );
        let err = strict.render("@{oops", &json!({})).unwrap_err();
        assert!(matches!(err, PromptmlError::Syntax(_)), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn render_file_with_extension_fallback() {
        let engine = engine_with(
            &[("greet.prompt", "Hello @{who}\n")],
            EngineOptions::default(),
        );
        assert_eq!(engine.render_file("greet", &json!({"who": "Ana"})).unwrap(), "Hello Ana\n");
        assert_eq!(
            engine.render_file("greet.prompt", &json!({"who": "Ana"})).unwrap(),
            "Hello Ana\n"
        );
        let err = engine.render_file("missing", &json!({})).unwrap_err();
        assert!(matches!(err, PromptmlError::TemplateNotFound { .. }), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn include_sees_loop_bindings() {
        let engine = engine_with(
            &[("row.prompt", "- @{item} (#@{i})\n")],
            EngineOptions::default(),
        );
        let out = engine
            .render("@each item, i in xs\n@include row\n@end", &json!({"xs": ["a", "b"]}))
            .unwrap();
        assert_eq!(out, "- a (#0)\n- b (#1)\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn include_cycle_is_detected() {
        let engine = engine_with(
            &[("a.prompt", "@include b\n"), ("b.prompt", "@include a\n")],
            EngineOptions::default(),
        );
        let err = engine.render_file("a.prompt", &json!({})).unwrap_err();
        assert!(err.to_string().contains("Include cycle detected"), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn cache_revalidates_on_content_change() {
        let fs = MemoryFileSystem::from_files([("t.prompt", "one\n")]);
        let engine = Engine::new(fs, EngineOptions::default());
        assert_eq!(engine.render_file("t.prompt", &json!({})).unwrap(), "one\n");
        engine.fs.write_file("t.prompt", "two\n").unwrap();
        assert_eq!(engine.render_file("t.prompt", &json!({})).unwrap(), "two\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn clear_cache_drops_entries() {
        let engine = engine_with(&[("t.prompt", "x\n")], EngineOptions::default());
        engine.render_file("t.prompt", &json!({})).unwrap();
        assert!(!engine.cache.read().unwrap().is_empty());
        engine.clear_cache();
        assert!(engine.cache.read().unwrap().is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn cache_disabled_stores_nothing() {
        let engine = engine_with(
            &[("t.prompt", "x\n")],
            EngineOptions { cache: false, ..EngineOptions::default() },
        );
        engine.render_file("t.prompt", &json!({})).unwrap();
        assert!(engine.cache.read().unwrap().is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn whitespace_cleanup_is_on_by_default() {
        let engine = engine();
        let out = engine.render("a  \n\n\n\nb\n\n\n", &json!({})).unwrap();
        assert_eq!(out, "a\n\nb\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn preserve_whitespace_returns_raw_output() {
        let engine = Engine::new(
            MemoryFileSystem::new(),
            EngineOptions { preserve_whitespace: true, ..EngineOptions::default() },
        );
        let out = engine.render("a  \n\n\n\nb", &json!({})).unwrap();
        assert_eq!(out, "a  \n\n\n\nb");
    }

    #[test]
    #[ntest::timeout(100)]
    fn custom_directive_dispatch() {
        struct Shout;
        impl DirectiveHandler for Shout {
            fn name(&self) -> &str {
                "shout"
            }
            fn execute(&self, node: &Node, _scope: &Scope<'_>) -> Result<String, RuntimeError> {
                let Node::Directive { raw_args, .. } = node else {
                    return Err(RuntimeError::new("shout expects a directive node"));
                };
                Ok(raw_args.to_ascii_uppercase())
            }
        }
        let mut engine = engine();
        engine.register_directive(Arc::new(Shout));
        assert_eq!(engine.render("@shout hey there\n", &json!({})).unwrap(), "HEY THERE");
    }

    #[test]
    #[ntest::timeout(100)]
    fn examples_directive_end_to_end() {
        let engine = engine();
        let template = "@examples\n@case input=\"Q {topic}\" output=\"A\"\n@end";
        let out = engine.render(template, &json!({"topic": "rust"})).unwrap();
        assert_eq!(out, "Input: Q rust\nOutput: A");
    }

    #[test]
    #[ntest::timeout(100)]
    fn nested_extends_directive_is_a_runtime_error() {
        let engine = engine();
        let err = engine.render("@if x\n@extends \"base\"\n@end", &json!({"x": true})).unwrap_err();
        assert!(err.to_string().contains("must be the first directive"), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn inheritance_renders_with_caller_data() {
        let base = "@section \"s\"(overridable=true)\n@{x|\"d\"}\n@end";
        let engine = engine_with(
            &[("base.prompt", base), ("child.prompt", "@extends \"base\"\n")],
            EngineOptions::default(),
        );
        assert_eq!(engine.render_file("child.prompt", &json!({"x": "V"})).unwrap(), "V\n");
    }
}
