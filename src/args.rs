//! Argument grammars: small total parsers over the raw text that
//! follows a directive keyword. Used by the parser to fill node
//! metadata and by directive handlers validating at run time.

use crate::ast::Attributes;
use crate::error::{SyntaxError, SyntaxErrorKind};
use crate::token::decode_escapes;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SectionArgs {
    pub name: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationArgs {
    pub item_name: String,
    pub index_name: Option<String>,
    pub array_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NamedParams {
    pub named: Attributes,
    pub positional: Vec<String>,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_path_char(c: char) -> bool {
    is_ident_char(c) || c == '.' || c == '[' || c == ']' || c == '"' || c == '\''
}

/// Strips one outer parenthesis pair when the pair actually encloses
/// the whole string.
fn strip_outer_parens(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with('(') || !trimmed.ends_with(')') {
        return trimmed;
    }
    let mut depth = 0usize;
    for (i, c) in trimmed.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 && i + 1 < trimmed.len() {
                    // The opening paren closes before the end, so the
                    // pair is not an outer wrapper.
                    return trimmed;
                }
            }
            _ => {}
        }
    }
    trimmed[1..trimmed.len() - 1].trim()
}

/// Reads a quoted value starting at `chars[start]` (which must be a
/// quote). Returns the decoded value and the index just past the
/// closing quote.
fn read_quoted(
    chars: &[char],
    start: usize,
    line: usize,
    column: usize,
) -> Result<(String, usize), SyntaxError> {
    let quote = chars[start];
    let mut raw = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            raw.push(c);
            raw.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if c == quote {
            return Ok((decode_escapes(&raw), i + 1));
        }
        raw.push(c);
        i += 1;
    }
    Err(SyntaxError::new(line, column, SyntaxErrorKind::UnterminatedString))
}

/// Parses `key="value", key2=value2, …` into an attribute map.
///
/// One outer parenthesis pair is stripped first. Commas separate
/// pairs; empty, duplicate and trailing commas are tolerated. Values
/// may be double- or single-quoted (escapes decoded) or bare, captured
/// verbatim up to the next comma or end. Duplicate keys: last write
/// wins.
pub fn parse_attributes(
    text: &str,
    line: usize,
    column: usize,
) -> Result<Attributes, SyntaxError> {
    let inner = strip_outer_parens(text);
    let chars: Vec<char> = inner.chars().collect();
    let mut attributes = Attributes::new();
    let mut i = 0;

    loop {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        if i >= chars.len() {
            return Ok(attributes);
        }

        let key_start = i;
        while i < chars.len() && is_ident_char(chars[i]) {
            i += 1;
        }
        let key: String = chars[key_start..i].iter().collect();
        if key.is_empty() {
            return Err(SyntaxError::new(
                line,
                column,
                SyntaxErrorKind::Expected { description: "attribute name".to_string() },
            ));
        }

        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() || chars[i] != '=' {
            return Err(SyntaxError::new(
                line,
                column,
                SyntaxErrorKind::Expected { description: "'='".to_string() },
            ));
        }
        i += 1;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() || chars[i] == ',' {
            return Err(SyntaxError::new(
                line,
                column,
                SyntaxErrorKind::Expected { description: "value".to_string() },
            ));
        }

        if chars[i] == '"' || chars[i] == '\'' {
            let (value, next) = read_quoted(&chars, i, line, column)?;
            attributes.insert(key, value);
            i = next;
            continue;
        }

        // Bare value: verbatim up to the next comma or end. If another
        // `key=` pair starts mid-value, the author forgot a comma.
        let value_start = i;
        while i < chars.len() && chars[i] != ',' {
            i += 1;
        }
        let bare: String = chars[value_start..i].iter().collect();
        if let Some(split) = missing_comma_split(&bare) {
            let before: String = chars[..value_start + split].iter().collect();
            let after: String = chars[value_start + split..].iter().collect();
            let corrected = format!("{}, {}", before.trim_end(), after.trim_start());
            return Err(SyntaxError::message(
                line,
                column,
                format!(
                    "Invalid attribute syntax: attributes must be separated by commas. \
                     Did you mean '{corrected}'?"
                ),
            ));
        }
        attributes.insert(key, bare.trim_end().to_string());
    }
}

/// Detects `… value key2=…` inside a bare value capture: whitespace
/// followed by an identifier followed by `=`. Returns the offset of
/// the second pair's start.
fn missing_comma_split(bare: &str) -> Option<usize> {
    let chars: Vec<char> = bare.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let ident_start = j;
            while j < chars.len() && is_ident_char(chars[j]) {
                j += 1;
            }
            if j > ident_start && chars.get(j) == Some(&'=') {
                return Some(ident_start);
            }
            i = ident_start.max(i + 1);
        } else {
            i += 1;
        }
    }
    None
}

/// Parses a section header: `name`, `name(attr…)`, or
/// `"quoted name" attr…`. Empty input is a nameless section.
pub fn parse_section_args(
    text: &str,
    line: usize,
    column: usize,
) -> Result<SectionArgs, SyntaxError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(SectionArgs::default());
    }
    let chars: Vec<char> = trimmed.chars().collect();
    let (name, rest_at) = if chars[0] == '"' || chars[0] == '\'' {
        read_quoted(&chars, 0, line, column)?
    } else if is_ident_char(chars[0]) {
        let mut i = 0;
        while i < chars.len() && (is_ident_char(chars[i]) || chars[i] == '.') {
            i += 1;
        }
        (chars[..i].iter().collect(), i)
    } else {
        return Err(SyntaxError::message(line, column, "Invalid section header"));
    };

    let rest: String = chars[rest_at..].iter().collect();
    let rest = rest.trim();
    let attributes =
        if rest.is_empty() { Attributes::new() } else { parse_attributes(rest, line, column)? };
    Ok(SectionArgs { name, attributes })
}

/// Parses `item[, index] in path` into its three parts.
pub fn parse_iteration(
    text: &str,
    line: usize,
    column: usize,
) -> Result<IterationArgs, SyntaxError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SyntaxError::message(line, column, "Empty iteration expression"));
    }

    // Commas become token breaks so `item,index in xs` splits cleanly.
    let tokens: Vec<&str> = trimmed
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();
    let in_pos = tokens.iter().position(|t| *t == "in").ok_or_else(|| {
        SyntaxError::message(line, column, "Invalid iteration syntax: missing 'in' keyword")
    })?;

    let names = &tokens[..in_pos];
    let rest = &tokens[in_pos + 1..];
    if names.is_empty() {
        return Err(SyntaxError::message(
            line,
            column,
            "Invalid iteration syntax: missing item name",
        ));
    }
    if names.len() > 2 {
        return Err(SyntaxError::message(
            line,
            column,
            "Invalid iteration syntax: too many loop variables",
        ));
    }
    if rest.is_empty() {
        return Err(SyntaxError::message(
            line,
            column,
            "Invalid iteration syntax: missing iterable path",
        ));
    }
    if rest.len() > 1 {
        return Err(SyntaxError::message(line, column, "Invalid iteration syntax"));
    }
    if names.iter().any(|n| !n.chars().all(is_ident_char))
        || !rest[0].chars().all(is_path_char)
    {
        return Err(SyntaxError::message(line, column, "Invalid iteration syntax"));
    }

    Ok(IterationArgs {
        item_name: names[0].to_string(),
        index_name: names.get(1).map(|s| s.to_string()),
        array_path: rest[0].to_string(),
    })
}

/// Returns the trimmed condition text verbatim; the expression
/// evaluator gives it structure at render time.
pub fn parse_conditional(text: &str, line: usize, column: usize) -> Result<String, SyntaxError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SyntaxError::message(line, column, "Empty conditional expression"));
    }
    Ok(trimmed.to_string())
}

/// One free-form argument, trimmed; a fully quoted value is decoded.
pub fn parse_simple_arg(text: &str, line: usize, column: usize) -> Result<String, SyntaxError> {
    let trimmed = text.trim();
    if trimmed.len() >= 2 {
        let first = trimmed.chars().next().unwrap_or('\0');
        if first == '"' || first == '\'' {
            let chars: Vec<char> = trimmed.chars().collect();
            let (value, next) = read_quoted(&chars, 0, line, column)?;
            if next == chars.len() {
                return Ok(value);
            }
        }
    }
    Ok(trimmed.to_string())
}

/// Parses a comma-separated mix of `key=value` pairs and bare/quoted
/// positional tokens, preserving positional order. Duplicate keys:
/// last write wins.
pub fn parse_named_params(
    text: &str,
    line: usize,
    column: usize,
) -> Result<NamedParams, SyntaxError> {
    let chars: Vec<char> = text.trim().chars().collect();
    let mut params = NamedParams::default();
    let mut i = 0;

    loop {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        if i >= chars.len() {
            return Ok(params);
        }

        if chars[i] == '"' || chars[i] == '\'' {
            let (value, next) = read_quoted(&chars, i, line, column)?;
            params.positional.push(value);
            i = next;
            continue;
        }

        let start = i;
        while i < chars.len() && is_ident_char(chars[i]) {
            i += 1;
        }
        let word: String = chars[start..i].iter().collect();
        let mut ws = i;
        while ws < chars.len() && chars[ws].is_whitespace() {
            ws += 1;
        }

        if !word.is_empty() && chars.get(ws) == Some(&'=') {
            i = ws + 1;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            if i >= chars.len() || chars[i] == ',' {
                return Err(SyntaxError::new(
                    line,
                    column,
                    SyntaxErrorKind::Expected { description: "value".to_string() },
                ));
            }
            if chars[i] == '"' || chars[i] == '\'' {
                let (value, next) = read_quoted(&chars, i, line, column)?;
                params.named.insert(word, value);
                i = next;
            } else {
                let value_start = i;
                while i < chars.len() && chars[i] != ',' {
                    i += 1;
                }
                let value: String = chars[value_start..i].iter().collect();
                params.named.insert(word, value.trim_end().to_string());
            }
            continue;
        }

        // Bare positional token: verbatim up to the next comma.
        let mut end = start;
        while end < chars.len() && chars[end] != ',' {
            end += 1;
        }
        let token: String = chars[start..end].iter().collect();
        params.positional.push(token.trim().to_string());
        i = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn attributes_round_trip_formatting() {
        let mut expected = Attributes::new();
        expected.insert("k1".to_string(), "v1".to_string());
        expected.insert("k2".to_string(), "v 2".to_string());
        let formatted: Vec<String> =
            expected.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
        let parsed = parse_attributes(&formatted.join(", "), 1, 1).unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    #[ntest::timeout(100)]
    fn attributes_accept_parens_bare_values_and_stray_commas() {
        let parsed = parse_attributes("(a=\"x\", , b=plain, c='y',)", 1, 1).unwrap();
        assert_eq!(parsed.get("a").unwrap(), "x");
        assert_eq!(parsed.get("b").unwrap(), "plain");
        assert_eq!(parsed.get("c").unwrap(), "y");
    }

    #[test]
    #[ntest::timeout(100)]
    fn attributes_decode_escapes() {
        let parsed = parse_attributes(r#"msg="line1\nline2\t\"q\"""#, 1, 1).unwrap();
        assert_eq!(parsed.get("msg").unwrap(), "line1\nline2\t\"q\"");
    }

    #[test]
    #[ntest::timeout(100)]
    fn attributes_duplicate_key_last_write_wins() {
        let parsed = parse_attributes("a=\"1\", a=\"2\"", 1, 1).unwrap();
        assert_eq!(parsed.get("a").unwrap(), "2");
    }

    #[test]
    #[ntest::timeout(100)]
    fn attribute_key_without_equals_fails() {
        let err = parse_attributes("key", 2, 9).unwrap_err();
        assert_eq!((err.line, err.column), (2, 9));
        assert!(err.to_string().contains("Expected '='"), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn attribute_equals_without_value_fails() {
        let err = parse_attributes("key=", 1, 1).unwrap_err();
        assert!(err.to_string().contains("Expected value"), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn adjacent_bare_pairs_get_the_comma_hint() {
        let err = parse_attributes("a=1 b=2", 1, 1).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("attributes must be separated by commas"), "got: {message}");
        assert!(message.contains("a=1, b=2"), "got: {message}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn section_args_plain_name() {
        let args = parse_section_args("intro", 1, 1).unwrap();
        assert_eq!(args.name, "intro");
        assert!(args.attributes.is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn section_args_name_with_parenthesized_attributes() {
        let args = parse_section_args("rules(overridable=true)", 1, 1).unwrap();
        assert_eq!(args.name, "rules");
        assert_eq!(args.attributes.get("overridable").unwrap(), "true");
    }

    #[test]
    #[ntest::timeout(100)]
    fn section_args_quoted_name_with_bare_attributes() {
        let args = parse_section_args("\"system prompt\" overridable=true", 1, 1).unwrap();
        assert_eq!(args.name, "system prompt");
        assert_eq!(args.attributes.get("overridable").unwrap(), "true");
    }

    #[test]
    #[ntest::timeout(100)]
    fn section_args_empty_is_nameless() {
        let args = parse_section_args("   ", 1, 1).unwrap();
        assert_eq!(args, SectionArgs::default());
    }

    #[test]
    #[ntest::timeout(100)]
    fn section_args_reject_garbage_header() {
        let err = parse_section_args("(=", 4, 2).unwrap_err();
        assert!(err.to_string().contains("Invalid section header"), "got: {err}");
        assert_eq!((err.line, err.column), (4, 2));
    }

    #[test]
    #[ntest::timeout(100)]
    fn iteration_item_index_and_path() {
        let args = parse_iteration("item, index in items", 1, 1).unwrap();
        assert_eq!(args.item_name, "item");
        assert_eq!(args.index_name.as_deref(), Some("index"));
        assert_eq!(args.array_path, "items");
    }

    #[test]
    #[ntest::timeout(100)]
    fn iteration_without_index() {
        let args = parse_iteration("item in items", 1, 1).unwrap();
        assert_eq!(args.index_name, None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn iteration_failure_messages_are_distinct() {
        let empty = parse_iteration("  ", 1, 1).unwrap_err().to_string();
        assert!(empty.contains("Empty iteration expression"), "got: {empty}");

        let no_in = parse_iteration("item items", 1, 1).unwrap_err().to_string();
        assert!(no_in.contains("missing 'in' keyword"), "got: {no_in}");

        let no_item = parse_iteration("in items", 1, 1).unwrap_err().to_string();
        assert!(no_item.contains("missing item name"), "got: {no_item}");

        let no_path = parse_iteration("item in", 1, 1).unwrap_err().to_string();
        assert!(no_path.contains("missing iterable path"), "got: {no_path}");

        let too_many = parse_iteration("a,b,c in items", 1, 1).unwrap_err().to_string();
        assert!(too_many.contains("too many loop variables"), "got: {too_many}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn iteration_path_may_be_nested() {
        let args = parse_iteration("entry in data.groups[0].members", 1, 1).unwrap();
        assert_eq!(args.array_path, "data.groups[0].members");
    }

    #[test]
    #[ntest::timeout(100)]
    fn conditional_is_verbatim_and_rejects_blank() {
        assert_eq!(parse_conditional("  a == b ", 1, 1).unwrap(), "a == b");
        let err = parse_conditional("   ", 3, 4).unwrap_err();
        assert!(err.to_string().contains("Empty conditional expression"), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn simple_arg_trims_and_unquotes() {
        assert_eq!(parse_simple_arg("  header ", 1, 1).unwrap(), "header");
        assert_eq!(parse_simple_arg("\"base layout\"", 1, 1).unwrap(), "base layout");
    }

    #[test]
    #[ntest::timeout(100)]
    fn named_params_mix_positional_and_named() {
        let params = parse_named_params("\"first\", key=val, second, n=\"x, y\"", 1, 1).unwrap();
        assert_eq!(params.positional, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(params.named.get("key").unwrap(), "val");
        assert_eq!(params.named.get("n").unwrap(), "x, y");
    }

    #[test]
    #[ntest::timeout(100)]
    fn named_params_empty_value_fails() {
        let err = parse_named_params("key=", 1, 1).unwrap_err();
        assert!(err.to_string().contains("Expected value"), "got: {err}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn named_params_tolerate_duplicate_commas() {
        let params = parse_named_params(",, a ,, b=c ,", 1, 1).unwrap();
        assert_eq!(params.positional, vec!["a".to_string()]);
        assert_eq!(params.named.get("b").unwrap(), "c");
    }
}
