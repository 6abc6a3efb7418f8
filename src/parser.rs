use crate::args::{parse_conditional, parse_iteration, parse_section_args, parse_simple_arg};
use crate::ast::{Alternate, CaseArm, Conditional, Node};
use crate::directive::DirectiveRegistry;
use crate::error::{SyntaxError, SyntaxErrorKind};
use crate::token::{Keyword, Token, TokenKind};

type ParseResult<T> = Result<T, SyntaxError>;

/// Directive keywords that may close the body currently being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Term {
    End,
    Elif,
    Else,
    Case,
    Default,
}

impl Term {
    fn matches(self, keyword: &Keyword) -> bool {
        matches!(
            (self, keyword),
            (Self::End, Keyword::End)
                | (Self::Elif, Keyword::Elif)
                | (Self::Else, Keyword::Else)
                | (Self::Case, Keyword::Case)
                | (Self::Default, Keyword::Default)
        )
    }
}

/// The block whose body is being parsed, for unclosed-block reporting.
#[derive(Debug, Clone, Copy)]
struct OpenBlock<'a> {
    directive: &'a str,
    line: usize,
    column: usize,
}

struct Parser<'r> {
    tokens: Vec<Token>,
    pos: usize,
    registry: &'r DirectiveRegistry,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    /// Parses a node sequence until a terminator directive (left
    /// unconsumed) or end of input. Adjacent text/newline tokens are
    /// coalesced into a single Text node with whitespace intact.
    fn parse_nodes(&mut self, terms: &[Term], open: Option<OpenBlock<'_>>) -> ParseResult<Vec<Node>> {
        let mut nodes = Vec::new();
        let mut text = String::new();

        macro_rules! flush {
            () => {
                if !text.is_empty() {
                    nodes.push(Node::Text(std::mem::take(&mut text)));
                }
            };
        }

        loop {
            let kind = self.peek().kind.clone();
            match kind {
                TokenKind::Eof => {
                    if let Some(block) = open {
                        return Err(SyntaxError::new(
                            block.line,
                            block.column,
                            SyntaxErrorKind::UnclosedBlock {
                                directive: block.directive.to_string(),
                            },
                        ));
                    }
                    flush!();
                    return Ok(nodes);
                }
                TokenKind::Text | TokenKind::Newline => {
                    let token = self.bump();
                    text.push_str(&token.text);
                }
                TokenKind::CommentLine | TokenKind::CommentBlock => {
                    self.bump();
                }
                TokenKind::Variable => {
                    flush!();
                    let token = self.bump();
                    nodes.push(parse_variable(&token)?);
                }
                TokenKind::Directive(keyword) => {
                    if terms.iter().any(|t| t.matches(&keyword)) {
                        flush!();
                        return Ok(nodes);
                    }
                    flush!();
                    let node = self.parse_directive()?;
                    nodes.push(node);
                }
                // Inline kinds never appear in the document stream.
                _ => {
                    let token = self.bump();
                    return Err(SyntaxError::new(
                        token.line,
                        token.column,
                        SyntaxErrorKind::Expected {
                            description: format!("template content, found '{}'", token.text),
                        },
                    ));
                }
            }
        }
    }

    fn parse_directive(&mut self) -> ParseResult<Node> {
        let token = self.bump();
        let TokenKind::Directive(keyword) = token.kind.clone() else {
            unreachable!("parse_directive called on non-directive token");
        };
        let (line, column) = (token.line, token.column);
        match keyword {
            Keyword::Section => {
                let args = parse_section_args(&token.text, line, column)?;
                let open = OpenBlock { directive: "section", line, column };
                let children = self.parse_nodes(&[Term::End], Some(open))?;
                self.bump(); // @end
                Ok(Node::Section { name: args.name, attributes: args.attributes, children })
            }
            Keyword::If => {
                let condition = parse_conditional(&token.text, line, column)?;
                let chain = self.parse_if_chain(condition, line, column)?;
                Ok(Node::Conditional(chain))
            }
            Keyword::Each => {
                let args = parse_iteration(&token.text, line, column)?;
                let open = OpenBlock { directive: "each", line, column };
                let children = self.parse_nodes(&[Term::End], Some(open))?;
                self.bump();
                Ok(Node::Iteration {
                    item_name: args.item_name,
                    index_name: args.index_name,
                    array_path: args.array_path,
                    children,
                })
            }
            Keyword::Switch => self.parse_switch(token.text.clone(), line, column),
            Keyword::Examples => self.parse_examples(token.text.clone(), line, column),
            Keyword::Include | Keyword::Extends => {
                let name = keyword.name().to_string();
                let raw_args = parse_simple_arg(&token.text, line, column)?;
                Ok(Node::Directive { name, raw_args, children: None, line, column })
            }
            Keyword::Custom(name) => {
                let children = if self.registry.has_body(&name) {
                    let open = OpenBlock { directive: &name, line, column };
                    let body = self.parse_nodes(&[Term::End], Some(open))?;
                    self.bump();
                    Some(body)
                } else {
                    None
                };
                Ok(Node::Directive { name, raw_args: token.text.clone(), children, line, column })
            }
            // Control keywords with no enclosing block to close.
            Keyword::End | Keyword::Elif | Keyword::Else | Keyword::Case | Keyword::Default => {
                Err(SyntaxError::new(
                    line,
                    column,
                    SyntaxErrorKind::UnexpectedKeyword { keyword: keyword.name().to_string() },
                ))
            }
        }
    }

    /// `@if`/`@elif`/`@else` chains are right-nested: each `@elif`
    /// becomes the alternate of the previous link, wrapped as another
    /// conditional; a trailing `@else` is the innermost alternate.
    fn parse_if_chain(
        &mut self,
        condition: String,
        line: usize,
        column: usize,
    ) -> ParseResult<Conditional> {
        let open = OpenBlock { directive: "if", line, column };
        let consequent = self.parse_nodes(&[Term::Elif, Term::Else, Term::End], Some(open))?;

        let next = self.bump();
        let alternate = match next.kind {
            TokenKind::Directive(Keyword::Elif) => {
                let elif_condition = parse_conditional(&next.text, next.line, next.column)?;
                let nested = self.parse_if_chain(elif_condition, next.line, next.column)?;
                Some(Box::new(Alternate::Elif(nested)))
            }
            TokenKind::Directive(Keyword::Else) => {
                let body = self.parse_nodes(&[Term::End], Some(open))?;
                self.bump(); // @end
                Some(Box::new(Alternate::Else(body)))
            }
            TokenKind::Directive(Keyword::End) => None,
            _ => unreachable!("if body terminated on unexpected token"),
        };

        Ok(Conditional { condition, consequent, alternate, line, column })
    }

    fn parse_switch(&mut self, subject: String, line: usize, column: usize) -> ParseResult<Node> {
        let open = OpenBlock { directive: "switch", line, column };

        // Anything before the first @case is structural whitespace at
        // best; it is discarded.
        self.parse_nodes(&[Term::Case, Term::Default, Term::End], Some(open))?;

        let mut cases = Vec::new();
        let mut default = None;
        loop {
            let token = self.bump();
            match token.kind {
                TokenKind::Directive(Keyword::Case) => {
                    let value = token.text.trim().to_string();
                    if value.is_empty() {
                        return Err(SyntaxError::message(
                            token.line,
                            token.column,
                            "Case directive requires a value argument",
                        ));
                    }
                    let children =
                        self.parse_nodes(&[Term::Case, Term::Default, Term::End], Some(open))?;
                    cases.push(CaseArm { value, children });
                }
                TokenKind::Directive(Keyword::Default) => {
                    if !token.text.trim().is_empty() {
                        return Err(SyntaxError::message(
                            token.line,
                            token.column,
                            "@default directive does not accept arguments",
                        ));
                    }
                    let children = self.parse_nodes(&[Term::End], Some(open))?;
                    default = Some(children);
                }
                TokenKind::Directive(Keyword::End) => {
                    return Ok(Node::Switch { subject, cases, default, line, column });
                }
                _ => unreachable!("switch body terminated on unexpected token"),
            }
        }
    }

    /// `@examples` owns `case` as its own body keyword: each `@case`
    /// is a leaf entry carrying attribute text, not a block arm.
    fn parse_examples(&mut self, raw_args: String, line: usize, column: usize) -> ParseResult<Node> {
        let mut cases = Vec::new();
        loop {
            let token = self.bump();
            match &token.kind {
                TokenKind::Directive(Keyword::Case) => {
                    cases.push(Node::Directive {
                        name: "case".to_string(),
                        raw_args: token.text.clone(),
                        children: None,
                        line: token.line,
                        column: token.column,
                    });
                }
                TokenKind::Directive(Keyword::End) => {
                    return Ok(Node::Directive {
                        name: "examples".to_string(),
                        raw_args,
                        children: Some(cases),
                        line,
                        column,
                    });
                }
                TokenKind::Text | TokenKind::Newline
                | TokenKind::CommentLine | TokenKind::CommentBlock => {}
                TokenKind::Eof => {
                    return Err(SyntaxError::new(
                        line,
                        column,
                        SyntaxErrorKind::UnclosedBlock { directive: "examples".to_string() },
                    ));
                }
                _ => {
                    return Err(SyntaxError::message(
                        token.line,
                        token.column,
                        "Only @case entries are allowed inside @examples",
                    ));
                }
            }
        }
    }
}

/// Decomposes `@{path}` / `@{path|"default"}` inner text. The split is
/// on the first `|` outside quotes; the default literal is decoded
/// when quoted, kept verbatim otherwise.
fn parse_variable(token: &Token) -> ParseResult<Node> {
    let inner = &token.text;
    let mut split = None;
    let mut quote: Option<char> = None;
    let mut prev_backslash = false;
    for (i, c) in inner.char_indices() {
        match quote {
            Some(q) => {
                if c == q && !prev_backslash {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '|' => {
                    split = Some(i);
                    break;
                }
                _ => {}
            },
        }
        prev_backslash = c == '\\' && !prev_backslash;
    }

    let (path_raw, default_raw) = match split {
        Some(i) => (&inner[..i], Some(&inner[i + 1..])),
        None => (inner.as_str(), None),
    };
    let path = path_raw.trim().to_string();
    if path.is_empty() {
        return Err(SyntaxError::new(
            token.line,
            token.column,
            SyntaxErrorKind::Expected { description: "variable path".to_string() },
        ));
    }
    let default = match default_raw {
        Some(raw) => Some(parse_simple_arg(raw, token.line, token.column)?),
        None => None,
    };
    Ok(Node::Variable { path, default })
}

/// Consumes the token stream once and builds the template tree.
pub(crate) fn parse(tokens: Vec<Token>, registry: &DirectiveRegistry) -> ParseResult<Vec<Node>> {
    let mut parser = Parser { tokens, pos: 0, registry };
    parser.parse_nodes(&[], None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{TokenizerOptions, tokenize};

    fn parse_source(source: &str) -> ParseResult<Vec<Node>> {
        let registry = DirectiveRegistry::new();
        let tokens = tokenize(source, &[], TokenizerOptions::default())?;
        parse(tokens, &registry)
    }

    fn must_parse(source: &str) -> Vec<Node> {
        parse_source(source).unwrap()
    }

    #[test]
    #[ntest::timeout(100)]
    fn empty_template_is_empty_tree() {
        assert_eq!(must_parse(""), Vec::<Node>::new());
    }

    #[test]
    #[ntest::timeout(100)]
    fn adjacent_text_and_newlines_coalesce() {
        let nodes = must_parse("line one\nline two\n");
        assert_eq!(nodes, vec![Node::Text("line one\nline two\n".to_string())]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn variable_with_default() {
        let nodes = must_parse("Hello @{name|\"Guest\"}!");
        assert_eq!(
            nodes,
            vec![
                Node::Text("Hello ".to_string()),
                Node::Variable { path: "name".to_string(), default: Some("Guest".to_string()) },
                Node::Text("!".to_string()),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn variable_without_default() {
        let nodes = must_parse("@{user.name}");
        assert_eq!(nodes, vec![Node::Variable { path: "user.name".to_string(), default: None }]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn variable_bare_default_kept_verbatim() {
        let nodes = must_parse("@{count|0}");
        assert_eq!(
            nodes,
            vec![Node::Variable { path: "count".to_string(), default: Some("0".to_string()) }]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn section_with_attributes_and_body() {
        let nodes = must_parse("@section rules(overridable=true)\ncontent\n@end");
        match &nodes[0] {
            Node::Section { name, attributes, children } => {
                assert_eq!(name, "rules");
                assert_eq!(attributes.get("overridable").unwrap(), "true");
                assert_eq!(children, &vec![Node::Text("content\n".to_string())]);
            }
            other => panic!("expected section, got {other:?}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn elif_chain_is_right_nested() {
        let nodes = must_parse("@if a\nA\n@elif b\nB\n@else\nC\n@end");
        let Node::Conditional(chain) = &nodes[0] else {
            panic!("expected conditional, got {:?}", nodes[0]);
        };
        assert_eq!(chain.condition, "a");
        assert_eq!(chain.consequent, vec![Node::Text("A\n".to_string())]);
        let Some(alternate) = &chain.alternate else { panic!("missing alternate") };
        let Alternate::Elif(elif) = alternate.as_ref() else {
            panic!("expected elif link, got {alternate:?}");
        };
        assert_eq!(elif.condition, "b");
        assert_eq!(elif.consequent, vec![Node::Text("B\n".to_string())]);
        let Some(inner) = &elif.alternate else { panic!("missing else") };
        let Alternate::Else(body) = inner.as_ref() else {
            panic!("expected else body, got {inner:?}");
        };
        assert_eq!(body, &vec![Node::Text("C\n".to_string())]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn if_without_else_has_no_alternate() {
        let nodes = must_parse("@if ready\ngo\n@end");
        let Node::Conditional(chain) = &nodes[0] else { panic!() };
        assert!(chain.alternate.is_none());
    }

    #[test]
    #[ntest::timeout(100)]
    fn each_with_index() {
        let nodes = must_parse("@each item, i in items\n@{item}\n@end");
        match &nodes[0] {
            Node::Iteration { item_name, index_name, array_path, children } => {
                assert_eq!(item_name, "item");
                assert_eq!(index_name.as_deref(), Some("i"));
                assert_eq!(array_path, "items");
                assert_eq!(children.len(), 2);
            }
            other => panic!("expected iteration, got {other:?}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn switch_cases_and_default() {
        let nodes = must_parse("@switch mode\n@case \"fast\"\nF\n@case \"slow\"\nS\n@default\nD\n@end");
        match &nodes[0] {
            Node::Switch { subject, cases, default, .. } => {
                assert_eq!(subject, "mode");
                assert_eq!(cases.len(), 2);
                assert_eq!(cases[0].value, "\"fast\"");
                assert_eq!(cases[0].children, vec![Node::Text("F\n".to_string())]);
                assert_eq!(default.as_ref().unwrap(), &vec![Node::Text("D\n".to_string())]);
            }
            other => panic!("expected switch, got {other:?}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn switch_with_empty_subject_parses() {
        let nodes = must_parse("@switch\n@case \"x\"\nX\n@end");
        match &nodes[0] {
            Node::Switch { subject, .. } => assert!(subject.is_empty()),
            other => panic!("expected switch, got {other:?}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn case_without_value_is_a_syntax_error() {
        let err = parse_source("@switch mode\n@case\nX\n@end").unwrap_err();
        assert!(err.to_string().contains("Case directive requires a value argument"), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn default_with_arguments_is_a_syntax_error() {
        let err = parse_source("@switch mode\n@case \"x\"\nX\n@default oops\nD\n@end").unwrap_err();
        assert!(
            err.to_string().contains("@default directive does not accept arguments"),
            "got: {err}"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn unclosed_section_reports_opening_location() {
        let err = parse_source("text\n@section intro\nbody").unwrap_err();
        assert_eq!((err.line, err.column), (2, 1));
        assert!(err.to_string().contains("Unclosed @section"), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn unclosed_if_reports_opening_location() {
        let err = parse_source("@if a\nbody").unwrap_err();
        assert!(err.to_string().contains("Unclosed @if"), "got: {err}");
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    #[ntest::timeout(100)]
    fn bare_end_is_a_syntax_error() {
        let err = parse_source("text\n@end").unwrap_err();
        assert!(err.to_string().contains("Unexpected @end"), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn stray_else_is_a_syntax_error() {
        let err = parse_source("@else\n").unwrap_err();
        assert!(err.to_string().contains("Unexpected @else"), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn examples_collects_leaf_cases() {
        let nodes =
            must_parse("@examples\n@case input=\"a\" output=\"b\"\n@case input=\"c\" output=\"d\"\n@end");
        match &nodes[0] {
            Node::Directive { name, children, .. } => {
                assert_eq!(name, "examples");
                assert_eq!(children.as_ref().unwrap().len(), 2);
            }
            other => panic!("expected directive, got {other:?}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn include_and_extends_carry_raw_args() {
        let nodes = must_parse("@extends \"base\"\n@include header\n");
        match &nodes[0] {
            Node::Directive { name, raw_args, children, .. } => {
                assert_eq!(name, "extends");
                assert_eq!(raw_args, "base");
                assert!(children.is_none());
            }
            other => panic!("expected directive, got {other:?}"),
        }
        match &nodes[1] {
            Node::Directive { name, raw_args, .. } => {
                assert_eq!(name, "include");
                assert_eq!(raw_args, "header");
            }
            other => panic!("expected directive, got {other:?}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn nested_blocks_close_in_order() {
        let nodes = must_parse("@each u in users\n@if u.active\n@{u.name}\n@end\n@end");
        let Node::Iteration { children, .. } = &nodes[0] else { panic!() };
        assert!(matches!(children[0], Node::Conditional(_)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn empty_iteration_expression_fails() {
        let err = parse_source("@each\nx\n@end").unwrap_err();
        assert!(err.to_string().contains("Empty iteration expression"), "got: {err}");
    }
}
