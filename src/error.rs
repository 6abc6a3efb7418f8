pub type PromptmlResult<T> = std::result::Result<T, PromptmlError>;

/// What went wrong while compiling a template.
///
/// Every kind is paired with a location by [`SyntaxError`]; the kinds
/// themselves stay location-free so argument grammars can build them
/// before the caller attaches the directive's position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum SyntaxErrorKind {
    #[error("Unknown directive '@{name}'. To output a literal '@', escape it by doubling it: '@@'")]
    UnknownDirective { name: String },
    #[error("Unterminated variable interpolation (expected '}}')")]
    UnterminatedInterpolation,
    #[error("Unterminated string literal")]
    UnterminatedString,
    #[error("Unclosed @{directive} (expected '@end')")]
    UnclosedBlock { directive: String },
    #[error("Unexpected @{keyword} outside of its enclosing block")]
    UnexpectedKeyword { keyword: String },
    #[error("Expected {description}")]
    Expected { description: String },
    #[error("{0}")]
    Message(String),
}

/// A template that cannot be compiled: produced by the tokenizer, the
/// parser, or an argument grammar. Always carries the 1-based line and
/// column of the offending token or text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Syntax error at line {line}, column {column}: {kind}")]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: SyntaxErrorKind,
}

impl SyntaxError {
    pub(crate) fn new(line: usize, column: usize, kind: SyntaxErrorKind) -> Self {
        Self { line, column, kind }
    }

    pub(crate) fn message(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::new(line, column, SyntaxErrorKind::Message(message.into()))
    }
}

/// A failure surfaced during evaluation rather than compilation, e.g. a
/// directive whose arguments are only discovered to be invalid once the
/// engine tries to execute it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    /// True when the engine re-wrapped the error under strict mode.
    pub wrapped: bool,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), wrapped: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum PromptmlError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("Render error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },
}

impl PromptmlError {
    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(RuntimeError::new(message))
    }

    /// Strict-mode policy: runtime failures (including missing template
    /// files discovered mid-render) collapse into one wrapped
    /// [`RuntimeError`] preserving the original message. Syntax errors
    /// always propagate unchanged.
    pub(crate) fn into_strict(self) -> Self {
        match self {
            Self::Syntax(_) => self,
            Self::Runtime(inner) => {
                Self::Runtime(RuntimeError { message: inner.message, wrapped: true })
            }
            Self::TemplateNotFound { name } => Self::Runtime(RuntimeError {
                message: format!("Template not found: {name}"),
                wrapped: true,
            }),
        }
    }
}
