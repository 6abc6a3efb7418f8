//! Conditional expression evaluation.
//!
//! Conditions stay raw strings in the AST; this module lexes them with
//! the inline tokenizer and evaluates them against the scope in one
//! pass. Precedence, loosest first: or, and, not, comparison, primary.
//! `and`/`or`/`not` keyword forms and `&&`/`||`/`!` symbol forms are
//! interchangeable. Comparisons are type-aware: numbers compare as
//! numbers, strings as strings, and mismatched types are never equal
//! and never ordered.

use serde_json::Value;

use crate::error::RuntimeError;
use crate::scope::{Scope, truthy};
use crate::token::{Token, TokenKind, tokenize_inline};

/// Either an already-collapsed boolean (from a logical operator or a
/// parenthesized group) or a resolved operand value. Undefined
/// variables carry `None`.
enum Operand {
    Bool(bool),
    Value(Option<Value>),
}

impl Operand {
    fn truthy(&self) -> bool {
        match self {
            Operand::Bool(b) => *b,
            Operand::Value(Some(v)) => truthy(v),
            Operand::Value(None) => false,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Operand::Bool(b) => Value::Bool(b),
            Operand::Value(Some(v)) => v,
            Operand::Value(None) => Value::Null,
        }
    }
}

struct ExprParser<'a, 'b> {
    tokens: Vec<Token>,
    pos: usize,
    scope: &'a Scope<'b>,
}

impl ExprParser<'_, '_> {
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

    fn eat_operator(&mut self, symbol: &str, word: Option<&str>) -> bool {
        let token = self.peek();
        let matches = match &token.kind {
            TokenKind::Operator => token.text == symbol,
            TokenKind::Ident => word.is_some_and(|w| token.text == w),
            _ => false,
        };
        if matches {
            self.bump();
        }
        matches
    }

    fn parse_or(&mut self) -> Result<Operand, RuntimeError> {
        let mut left = self.parse_and()?;
        while self.eat_operator("||", Some("or")) {
            let right = self.parse_and()?;
            // No short-circuit skipping here: the right side has
            // already been resolved, which is side-effect free.
            left = Operand::Bool(left.truthy() || right.truthy());
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Operand, RuntimeError> {
        let mut left = self.parse_not()?;
        while self.eat_operator("&&", Some("and")) {
            let right = self.parse_not()?;
            left = Operand::Bool(left.truthy() && right.truthy());
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Operand, RuntimeError> {
        if self.eat_operator("!", Some("not")) {
            let inner = self.parse_not()?;
            return Ok(Operand::Bool(!inner.truthy()));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Operand, RuntimeError> {
        let left = self.parse_primary()?;
        let op = {
            let token = self.peek();
            if token.kind == TokenKind::Operator
                && matches!(token.text.as_str(), "==" | "!=" | ">" | "<" | ">=" | "<=")
            {
                Some(self.bump().text)
            } else {
                None
            }
        };
        let Some(op) = op else {
            return Ok(left);
        };
        let right = self.parse_primary()?;
        let left = left.into_value();
        let right = right.into_value();
        let result = match op.as_str() {
            "==" => values_equal(&left, &right),
            "!=" => !values_equal(&left, &right),
            other => values_ordered(&left, &right, other),
        };
        Ok(Operand::Bool(result))
    }

    fn parse_primary(&mut self) -> Result<Operand, RuntimeError> {
        let token = self.bump();
        match token.kind {
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                if self.peek().kind != TokenKind::RParen {
                    return Err(RuntimeError::new(
                        "Invalid conditional expression: expected ')'",
                    ));
                }
                self.bump();
                Ok(inner)
            }
            TokenKind::StringLit => Ok(Operand::Value(Some(Value::String(token.text)))),
            TokenKind::Number => Ok(Operand::Value(Some(parse_number(&token.text)?))),
            TokenKind::Ident => match token.text.as_str() {
                "true" => Ok(Operand::Value(Some(Value::Bool(true)))),
                "false" => Ok(Operand::Value(Some(Value::Bool(false)))),
                "null" => Ok(Operand::Value(Some(Value::Null))),
                "and" | "or" | "not" => Err(RuntimeError::new(format!(
                    "Invalid conditional expression: unexpected '{}'",
                    token.text
                ))),
                path => Ok(Operand::Value(self.scope.resolve(path))),
            },
            TokenKind::Eof => {
                Err(RuntimeError::new("Invalid conditional expression: unexpected end"))
            }
            _ => Err(RuntimeError::new(format!(
                "Invalid conditional expression: unexpected '{}'",
                token.text
            ))),
        }
    }
}

fn parse_number(text: &str) -> Result<Value, RuntimeError> {
    if text.contains('.') {
        let parsed: f64 = text
            .parse()
            .map_err(|_| RuntimeError::new(format!("Invalid numeric literal '{text}'")))?;
        serde_json::Number::from_f64(parsed)
            .map(Value::Number)
            .ok_or_else(|| RuntimeError::new(format!("Invalid numeric literal '{text}'")))
    } else {
        let parsed: i64 = text
            .parse()
            .map_err(|_| RuntimeError::new(format!("Invalid numeric literal '{text}'")))?;
        Ok(Value::Number(parsed.into()))
    }
}

/// Strict equality: same type and same value. Numbers are compared
/// numerically so `1` equals `1.0`, but `"0"` never equals `0`.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        _ => left == right,
    }
}

/// Ordering comparisons: numeric for number pairs, lexical for string
/// pairs, false for any mismatched pair.
fn values_ordered(left: &Value, right: &Value, op: &str) -> bool {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        ">" => ordering.is_gt(),
        "<" => ordering.is_lt(),
        ">=" => ordering.is_ge(),
        "<=" => ordering.is_le(),
        _ => false,
    }
}

/// Evaluates a raw condition string to a boolean. Lex or grammar
/// failures surface as runtime errors since conditions are only given
/// structure at evaluation time.
pub(crate) fn evaluate_condition(
    condition: &str,
    scope: &Scope<'_>,
    line: usize,
    column: usize,
) -> Result<bool, RuntimeError> {
    let tokens = tokenize_inline(condition, line, column).map_err(|e| {
        RuntimeError::new(format!("Invalid conditional expression: {}", e.kind))
    })?;
    let mut parser = ExprParser { tokens, pos: 0, scope };
    let result = parser.parse_or()?;
    if parser.peek().kind != TokenKind::Eof {
        return Err(RuntimeError::new(format!(
            "Invalid conditional expression: unexpected '{}'",
            parser.peek().text
        )));
    }
    Ok(result.truthy())
}

/// Resolves a single operand — literal or variable path — for switch
/// subjects and case values. Undefined variables resolve to null.
pub(crate) fn resolve_operand(
    raw: &str,
    scope: &Scope<'_>,
    line: usize,
    column: usize,
) -> Result<Value, RuntimeError> {
    let tokens = tokenize_inline(raw, line, column)
        .map_err(|e| RuntimeError::new(format!("Invalid value expression: {}", e.kind)))?;
    if tokens.len() != 2 || tokens[1].kind != TokenKind::Eof {
        return Err(RuntimeError::new(format!("Invalid value expression '{raw}'")));
    }
    let token = &tokens[0];
    match token.kind {
        TokenKind::StringLit => Ok(Value::String(token.text.clone())),
        TokenKind::Number => parse_number(&token.text),
        TokenKind::Ident => match token.text.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "null" => Ok(Value::Null),
            path => Ok(scope.resolve(path).unwrap_or(Value::Null)),
        },
        _ => Err(RuntimeError::new(format!("Invalid value expression '{raw}'"))),
    }
}
