use crate::error::{SyntaxError, SyntaxErrorKind};

/// Directive keywords recognized after the `@` introducer.
///
/// The set is closed over the built-ins; `Custom` covers handlers
/// registered with the engine at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Keyword {
    Section,
    If,
    Elif,
    Else,
    Each,
    End,
    Switch,
    Case,
    Default,
    Include,
    Extends,
    Examples,
    Custom(String),
}

impl Keyword {
    /// Keyword lookup is case-insensitive; `extra` holds the names of
    /// custom directives registered with the engine.
    fn from_word(word: &str, extra: &[String]) -> Option<Self> {
        let lower = word.to_ascii_lowercase();
        let keyword = match lower.as_str() {
            "section" => Self::Section,
            "if" => Self::If,
            "elif" => Self::Elif,
            "else" => Self::Else,
            "each" => Self::Each,
            "end" => Self::End,
            "switch" => Self::Switch,
            "case" => Self::Case,
            "default" => Self::Default,
            "include" => Self::Include,
            "extends" => Self::Extends,
            "examples" => Self::Examples,
            _ => {
                if extra.iter().any(|name| name.eq_ignore_ascii_case(word)) {
                    return Some(Self::Custom(lower));
                }
                return None;
            }
        };
        Some(keyword)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Section => "section",
            Self::If => "if",
            Self::Elif => "elif",
            Self::Else => "else",
            Self::Each => "each",
            Self::End => "end",
            Self::Switch => "switch",
            Self::Case => "case",
            Self::Default => "default",
            Self::Include => "include",
            Self::Extends => "extends",
            Self::Examples => "examples",
            Self::Custom(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// A literal run of template text.
    Text,
    /// A single `\n` (line endings are normalized before scanning).
    Newline,
    /// `@{…}` interpolation; `text` holds the raw inner content verbatim,
    /// including any `|` default separator. Decomposed by the parser.
    Variable,
    /// `@keyword`; `text` holds the raw remainder of the line, trimmed.
    Directive(Keyword),
    CommentLine,
    CommentBlock,
    // Inline kinds, produced when re-scanning directive argument text.
    Ident,
    Number,
    StringLit,
    Operator,
    Assign,
    LParen,
    RParen,
    Comma,
    /// Always the final token of any stream.
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Self {
        Self { kind, text: text.into(), line, column }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenizerOptions {
    /// When set, comments are emitted as tokens instead of being
    /// discarded. The parser never renders them either way; this exists
    /// for tooling that wants to round-trip source.
    pub preserve_comments: bool,
}

struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed).
    line: usize,
    /// Byte offset where the current line starts.
    line_start_pos: usize,
    extra_keywords: &'a [String],
    options: TokenizerOptions,
    tokens: Vec<Token>,
    buf: String,
    buf_line: usize,
    buf_column: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str, extra_keywords: &'a [String], options: TokenizerOptions) -> Self {
        Tokenizer {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            extra_keywords,
            options,
            tokens: Vec::new(),
            buf: String::new(),
            buf_line: 1,
            buf_column: 1,
        }
    }

    #[inline]
    fn column(&self) -> usize {
        self.input[self.line_start_pos..self.pos].chars().count() + 1
    }

    #[inline]
    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    #[inline]
    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    #[inline]
    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(offset)
    }

    /// Advances past one char, keeping line/column tracking honest.
    #[inline]
    fn advance(&mut self, ch: char) {
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos;
        }
    }

    fn push_text(&mut self, ch: char) {
        if self.buf.is_empty() {
            self.buf_line = self.line;
            self.buf_column = self.column();
        }
        self.buf.push(ch);
    }

    fn flush_text(&mut self) {
        if !self.buf.is_empty() {
            let text = std::mem::take(&mut self.buf);
            self.tokens.push(Token::new(TokenKind::Text, text, self.buf_line, self.buf_column));
        }
    }

    /// True when nothing but whitespace precedes the cursor on this line.
    /// Comments are only recognized in that position so that `//` inside
    /// running text (URLs, paths) stays literal.
    fn at_line_start(&self) -> bool {
        self.input[self.line_start_pos..self.pos].chars().all(|c| c == ' ' || c == '\t')
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        while !self.eof() {
            let ch = match self.peek_char() {
                Some(c) => c,
                None => break,
            };
            match ch {
                '@' => self.scan_at()?,
                '\n' => {
                    self.flush_text();
                    let (line, column) = (self.line, self.column());
                    self.advance('\n');
                    self.tokens.push(Token::new(TokenKind::Newline, "\n", line, column));
                }
                '/' if self.at_line_start() && matches!(self.peek_at(1), Some('/' | '*')) => {
                    self.scan_comment();
                }
                _ => {
                    self.push_text(ch);
                    self.advance(ch);
                }
            }
        }
        self.flush_text();
        let (line, column) = (self.line, self.column());
        self.tokens.push(Token::new(TokenKind::Eof, "", line, column));
        Ok(self.tokens)
    }

    fn scan_at(&mut self) -> Result<(), SyntaxError> {
        let (line, column) = (self.line, self.column());
        match self.peek_at(1) {
            Some('{') => {
                self.flush_text();
                self.scan_interpolation(line, column)
            }
            // `@@` escapes the directive introducer.
            Some('@') => {
                self.push_text('@');
                self.advance('@');
                self.advance('@');
                Ok(())
            }
            Some(c) if c.is_ascii_alphabetic() => self.scan_directive(line, column),
            // A lone `@` (before a digit, punctuation, EOF, ...) is text.
            _ => {
                self.push_text('@');
                self.advance('@');
                Ok(())
            }
        }
    }

    fn scan_interpolation(&mut self, line: usize, column: usize) -> Result<(), SyntaxError> {
        self.advance('@');
        self.advance('{');
        let start = self.pos;
        let mut prev_backslash = false;
        while let Some(ch) = self.peek_char() {
            if ch == '}' && !prev_backslash {
                let inner = self.input[start..self.pos].to_string();
                self.advance('}');
                self.tokens.push(Token::new(TokenKind::Variable, inner, line, column));
                return Ok(());
            }
            prev_backslash = ch == '\\' && !prev_backslash;
            self.advance(ch);
        }
        Err(SyntaxError::new(line, column, SyntaxErrorKind::UnterminatedInterpolation))
    }

    fn scan_directive(&mut self, line: usize, column: usize) -> Result<(), SyntaxError> {
        self.advance('@');
        let word_start = self.pos;
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance(ch);
            } else {
                break;
            }
        }
        let word = &self.input[word_start..self.pos];
        let keyword = Keyword::from_word(word, self.extra_keywords).ok_or_else(|| {
            SyntaxError::new(
                line,
                column,
                SyntaxErrorKind::UnknownDirective { name: word.to_string() },
            )
        })?;

        // The remainder of the line is carried raw; argument grammars
        // re-scan it. The directive owns its whole line, trailing
        // newline included, so block structure emits no output.
        self.flush_text();
        let args_start = self.pos;
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.advance(ch);
        }
        let args = self.input[args_start..self.pos].trim().to_string();
        if self.peek_char() == Some('\n') {
            self.advance('\n');
        }
        self.tokens.push(Token::new(TokenKind::Directive(keyword), args, line, column));
        Ok(())
    }

    fn scan_comment(&mut self) {
        let (line, column) = (self.line, self.column());
        // The indentation before the comment is still sitting in the text
        // buffer; a comment line contributes nothing, so drop it.
        let indent = self.pos - self.line_start_pos;
        self.buf.truncate(self.buf.len().saturating_sub(indent));

        let block = self.peek_at(1) == Some('*');
        self.advance('/');
        self.advance(if block { '*' } else { '/' });
        let start = self.pos;
        let mut content_end;
        if block {
            // Tolerant of an unterminated block comment at EOF.
            loop {
                content_end = self.pos;
                if self.eof() {
                    break;
                }
                if self.peek_char() == Some('*') && self.peek_at(1) == Some('/') {
                    self.advance('*');
                    self.advance('/');
                    break;
                }
                let ch = match self.peek_char() {
                    Some(c) => c,
                    None => break,
                };
                self.advance(ch);
            }
        } else {
            while let Some(ch) = self.peek_char() {
                if ch == '\n' {
                    break;
                }
                self.advance(ch);
            }
            content_end = self.pos;
        }
        // Swallow the newline so the comment line vanishes entirely.
        if self.peek_char() == Some('\n') {
            self.advance('\n');
        }
        if self.options.preserve_comments {
            let kind = if block { TokenKind::CommentBlock } else { TokenKind::CommentLine };
            let content = self.input[start..content_end].to_string();
            self.tokens.push(Token::new(kind, content, line, column));
        }
    }
}

/// Converts raw template source into a flat token stream.
///
/// Pure function of the input plus options: `\r\n` and `\r` are
/// normalized to `\n` first, positions are 1-based, and the stream
/// always ends with a single [`TokenKind::Eof`] token.
pub fn tokenize(
    source: &str,
    extra_keywords: &[String],
    options: TokenizerOptions,
) -> Result<Vec<Token>, SyntaxError> {
    let normalized;
    let input = if source.contains('\r') {
        normalized = source.replace("\r\n", "\n").replace('\r', "\n");
        normalized.as_str()
    } else {
        source
    };
    Tokenizer::new(input, extra_keywords, options).run()
}

// ---------------------------------------------------------------------
// Inline scanning, used to re-tokenize directive argument text for the
// expression evaluator and the argument grammars.
// ---------------------------------------------------------------------

/// Decodes the escapes recognized in quoted values: `\"`, `\'`, `\\`,
/// `\n`, `\t`. Anything else keeps the backslash.
pub(crate) fn decode_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('}') => out.push('}'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Tokenizes an argument/expression string into the inline token kinds.
///
/// `line`/`base_column` locate the first character of `text` in the
/// original source, so errors point at the template, not the substring.
pub(crate) fn tokenize_inline(
    text: &str,
    line: usize,
    base_column: usize,
) -> Result<Vec<Token>, SyntaxError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let column = base_column + i;
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        if ch == '"' || ch == '\'' {
            let quote = ch;
            let mut raw = String::new();
            let mut j = i + 1;
            let mut closed = false;
            while j < chars.len() {
                let c = chars[j];
                if c == '\\' && j + 1 < chars.len() {
                    raw.push(c);
                    raw.push(chars[j + 1]);
                    j += 2;
                    continue;
                }
                if c == quote {
                    closed = true;
                    break;
                }
                raw.push(c);
                j += 1;
            }
            if !closed {
                return Err(SyntaxError::new(line, column, SyntaxErrorKind::UnterminatedString));
            }
            tokens.push(Token::new(TokenKind::StringLit, decode_escapes(&raw), line, column));
            i = j + 1;
            continue;
        }
        if ch.is_ascii_digit() || (ch == '-' && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()))
        {
            let mut j = i + 1;
            while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                j += 1;
            }
            let num: String = chars[i..j].iter().collect();
            tokens.push(Token::new(TokenKind::Number, num, line, column));
            i = j;
            continue;
        }
        if ch.is_ascii_alphabetic() || ch == '_' {
            // A full variable path is one operand: dotted segments and
            // bracketed indices stay attached to the identifier.
            let mut j = i;
            while j < chars.len() {
                let c = chars[j];
                if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                    j += 1;
                } else if c == '[' {
                    let mut depth = 1;
                    j += 1;
                    while j < chars.len() && depth > 0 {
                        match chars[j] {
                            '[' => depth += 1,
                            ']' => depth -= 1,
                            _ => {}
                        }
                        j += 1;
                    }
                } else {
                    break;
                }
            }
            let ident: String = chars[i..j].iter().collect();
            tokens.push(Token::new(TokenKind::Ident, ident, line, column));
            i = j;
            continue;
        }
        let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
        match two.as_str() {
            "==" | "!=" | ">=" | "<=" | "&&" | "||" => {
                tokens.push(Token::new(TokenKind::Operator, two, line, column));
                i += 2;
                continue;
            }
            _ => {}
        }
        match ch {
            // Bare `=` is assignment, disambiguated from `==` above.
            '=' => tokens.push(Token::new(TokenKind::Assign, "=", line, column)),
            '>' | '<' | '!' => tokens.push(Token::new(TokenKind::Operator, ch, line, column)),
            '(' => tokens.push(Token::new(TokenKind::LParen, "(", line, column)),
            ')' => tokens.push(Token::new(TokenKind::RParen, ")", line, column)),
            ',' => tokens.push(Token::new(TokenKind::Comma, ",", line, column)),
            other => {
                return Err(SyntaxError::new(
                    line,
                    column,
                    SyntaxErrorKind::Expected {
                        description: format!("expression token, found '{other}'"),
                    },
                ));
            }
        }
        i += 1;
    }
    tokens.push(Token::new(TokenKind::Eof, "", line, base_column + chars.len()));
    Ok(tokens)
}
