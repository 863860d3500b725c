//! The Steward configuration language.
//!
//! This crate turns DSL source text into a compiled object graph:
//!
//! ```text
//! source text -> Lexer -> Parser -> AST -> Evaluator -> Model
//! ```
//!
//! The deployment engine consumes the resulting [`Compiled`] model; this
//! crate never performs I/O beyond reading source files, the environment
//! and the files the bundled `std` library is asked to read.

pub mod context;
pub mod defs;
pub mod eval;
pub mod importer;
pub mod lexer;
pub mod ops;
pub mod parser;
pub mod plugin;
pub mod stdlib;

pub use context::{Binding, ContextTree, ScopeId, ROOT};
pub use eval::{Compiled, Compiler};
pub use importer::{Importer, SOURCE_EXTENSION};
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::Parser;
