//! Template inheritance.
//!
//! A template opening with `@extends "base"` contributes sections to
//! its parent's tree instead of rendering standalone. Resolution runs
//! root-first: the parent chain is flattened before the child's
//! sections are merged in, so a grandchild always merges against an
//! already-resolved tree.

use std::collections::HashMap;

use crate::ast::{Attributes, Node};
use crate::error::{PromptmlError, PromptmlResult};

/// Loads and parses a template by name. Inheritance for the loaded
/// template is resolved here, not by the loader.
pub(crate) type TemplateLoader<'a> = dyn FnMut(&str) -> PromptmlResult<Vec<Node>> + 'a;

fn flag(attributes: &Attributes, key: &str) -> bool {
    attributes.get(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Resolves the `@extends` chain for an already-parsed template.
///
/// `chain` carries the template names currently being resolved, for
/// cycle detection; the engine seeds it with the entry template's name
/// when one exists.
pub(crate) fn resolve_inheritance(
    nodes: Vec<Node>,
    loader: &mut TemplateLoader<'_>,
    chain: &mut Vec<String>,
) -> PromptmlResult<Vec<Node>> {
    let mut parent_name: Option<String> = None;
    let mut body = Vec::with_capacity(nodes.len());
    let mut significant_seen = false;

    for node in nodes {
        match &node {
            Node::Directive { name, raw_args, .. } if name == "extends" => {
                if significant_seen || parent_name.is_some() {
                    return Err(PromptmlError::runtime(
                        "@extends must be the first directive in a template",
                    ));
                }
                parent_name = Some(raw_args.clone());
            }
            Node::Text(text) if text.trim().is_empty() => body.push(node),
            _ => {
                significant_seen = true;
                body.push(node);
            }
        }
    }

    let Some(parent) = parent_name else {
        return Ok(body);
    };

    if chain.iter().any(|name| name == &parent) {
        let mut path = chain.clone();
        path.push(parent);
        return Err(PromptmlError::runtime(format!(
            "Inheritance cycle detected: {}",
            path.join(" -> ")
        )));
    }
    tracing::debug!(parent = %parent, "resolving template inheritance");

    let parent_nodes = loader(&parent)?;
    chain.push(parent);
    let resolved_parent = resolve_inheritance(parent_nodes, loader, chain)?;
    chain.pop();

    merge(resolved_parent, body)
}

/// Merges a child template's top-level nodes into the resolved parent
/// tree. Overridden sections stay in place; new sections and any
/// non-section child nodes append after the parent's content.
fn merge(parent: Vec<Node>, child: Vec<Node>) -> PromptmlResult<Vec<Node>> {
    let mut merged = parent;
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, node) in merged.iter().enumerate() {
        if let Some((name, _)) = node.as_section() {
            index.insert(name.to_string(), i);
        }
    }

    let mut appended = Vec::new();
    for node in child {
        let Node::Section { name, mut attributes, children } = node else {
            appended.push(node);
            continue;
        };
        let override_flag = flag(&attributes, "override");
        let new_flag = flag(&attributes, "new");
        attributes.remove("override");
        attributes.remove("new");

        match index.get(&name).copied() {
            Some(i) => {
                let (_, parent_attrs) =
                    merged[i].as_section().unwrap_or_else(|| {
                        unreachable!("section index points at non-section")
                    });
                if !override_flag {
                    let message = if new_flag {
                        format!(
                            "Section '{name}' is marked new=true but already exists in the \
                             parent template"
                        )
                    } else {
                        format!(
                            "Section '{name}' conflicts with a parent section. \
                             Use override=true to replace it"
                        )
                    };
                    return Err(PromptmlError::runtime(message));
                }
                if !flag(parent_attrs, "overridable") {
                    return Err(PromptmlError::runtime(format!(
                        "Cannot override section '{name}': it is not marked overridable \
                         in the parent template"
                    )));
                }
                // A replaced overridable section stays overridable so a
                // further descendant can replace it again.
                if !attributes.contains_key("overridable") {
                    attributes.insert("overridable".to_string(), "true".to_string());
                }
                merged[i] = Node::Section { name, attributes, children };
            }
            None => {
                if override_flag {
                    return Err(PromptmlError::runtime(format!(
                        "Cannot override section '{name}': parent template has no such section"
                    )));
                }
                appended.push(Node::Section { name, attributes, children });
            }
        }
    }

    merged.extend(appended);
    Ok(merged)
}
