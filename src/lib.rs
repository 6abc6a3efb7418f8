//! A directive-based template language for composing structured,
//! data-driven text, notably AI prompt documents.
//!
//! Templates mix literal text with `@directive` lines (`@section`,
//! `@if`/`@elif`/`@else`, `@each`, `@switch`/`@case`/`@default`,
//! `@include`, `@extends`, `@examples`), `@{path|"default"}` variable
//! interpolations, and `//` / `/* */` comments. Rendering walks the
//! parsed tree against a `serde_json` data context.
//!
//! ```
//! use promptml::{Engine, EngineOptions, MemoryFileSystem};
//! use serde_json::json;
//!
//! let engine = Engine::new(MemoryFileSystem::new(), EngineOptions::default());
//! let out = engine.render("Hello @{name|\"Guest\"}!", &json!({}))?;
//! assert_eq!(out, "Hello Guest!");
//! # Ok::<(), promptml::PromptmlError>(())
//! ```

mod args;
mod ast;
mod directive;
mod engine;
mod error;
mod expr;
mod fs;
mod inherit;
mod parser;
mod scope;
mod token;

// Public exports.
pub use args::{IterationArgs, NamedParams, SectionArgs, parse_attributes, parse_named_params};
pub use ast::{Alternate, Attributes, CaseArm, Conditional, Node};
pub use directive::DirectiveHandler;
pub use engine::{Engine, EngineOptions};
pub use error::{PromptmlError, PromptmlResult, RuntimeError, SyntaxError, SyntaxErrorKind};
pub use fs::{DirEntry, DiskFileSystem, FileStat, MemoryFileSystem, TemplateFileSystem};
pub use scope::Scope;
pub use token::{Keyword, Token, TokenKind, TokenizerOptions, tokenize};
