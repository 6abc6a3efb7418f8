use std::collections::BTreeMap;

/// Raw string value of an attribute, quoted values already decoded.
pub type Attributes = BTreeMap<String, String>;

/// A node of the parsed template tree.
///
/// Block-owning variants only ever carry a complete, closed body: the
/// parser refuses to emit a node whose `@end` was not observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A literal run of text, whitespace preserved exactly.
    Text(String),
    Variable {
        /// Dotted/bracketed lookup path, e.g. `user.roles[0]`.
        path: String,
        /// Decoded default literal from `@{path|"default"}`.
        default: Option<String>,
    },
    Section {
        name: String,
        attributes: Attributes,
        children: Vec<Node>,
    },
    Conditional(Conditional),
    Iteration {
        item_name: String,
        index_name: Option<String>,
        array_path: String,
        children: Vec<Node>,
    },
    Switch {
        /// Raw subject expression; may be empty at parse time, which the
        /// switch executor rejects when the node runs.
        subject: String,
        cases: Vec<CaseArm>,
        default: Option<Vec<Node>>,
        line: usize,
        column: usize,
    },
    /// Extensible directives: include, extends, examples, custom.
    /// The parser carries `raw_args` forward uninterpreted; the
    /// directive's handler owns argument parsing and validation.
    Directive {
        name: String,
        raw_args: String,
        children: Option<Vec<Node>>,
        line: usize,
        column: usize,
    },
}

/// One `@if`/`@elif` link. `@elif` chains are right-nested: each link's
/// alternate is either a plain `@else` body or another conditional.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    /// Raw condition expression, evaluated at render time.
    pub condition: String,
    pub consequent: Vec<Node>,
    pub alternate: Option<Box<Alternate>>,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Alternate {
    Elif(Conditional),
    Else(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    /// Raw case value: a literal or a variable path, resolved against
    /// the current scope when the switch executes.
    pub value: String,
    pub children: Vec<Node>,
}

impl Node {
    /// Section accessor used by the inheritance resolver.
    pub(crate) fn as_section(&self) -> Option<(&str, &Attributes)> {
        match self {
            Node::Section { name, attributes, .. } => Some((name.as_str(), attributes)),
            _ => None,
        }
    }
}
