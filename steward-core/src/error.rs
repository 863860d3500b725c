//! Error types for the Steward compiler and deployment engine.

use crate::span::Span;
use thiserror::Error;

/// Errors raised while turning source text into a compiled model.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    /// The lexer rejected a character or a malformed literal.
    #[error("SyntaxError: {reason}")]
    Syntax { reason: String, span: Span },

    /// The parser encountered an unexpected token.
    #[error("SyntaxError: {reason}")]
    Parser { reason: String, span: Span },

    /// Type mismatch, missing property, reassignment, unknown name,
    /// bad arity or a failed typedef condition.
    #[error("CompilationError: {reason}")]
    Compilation { reason: String, span: Option<Span> },

    /// A plugin failed or returned a value outside its signature.
    #[error("PluginError: {reason}")]
    Plugin { reason: String, span: Option<Span> },

    /// An engine invariant was violated. Always a bug.
    #[error("PANIC!! {reason}")]
    Internal { reason: String },
}

impl CompileError {
    pub fn compilation(reason: impl Into<String>, span: Option<Span>) -> Self {
        Self::Compilation {
            reason: reason.into(),
            span,
        }
    }

    pub fn plugin(reason: impl Into<String>, span: Option<Span>) -> Self {
        Self::Plugin {
            reason: reason.into(),
            span,
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    pub fn span(&self) -> Option<&Span> {
        match self {
            Self::Syntax { span, .. } | Self::Parser { span, .. } => Some(span),
            Self::Compilation { span, .. } | Self::Plugin { span, .. } => span.as_ref(),
            Self::Internal { .. } => None,
        }
    }

    /// Error message followed by the source excerpt, when one is available.
    pub fn render(&self) -> String {
        match self.span() {
            Some(span) => match span.excerpt() {
                Some(excerpt) => format!("{self}\n    File {span}\n{excerpt}"),
                None => format!("{self}\n    File {span}"),
            },
            None => self.to_string(),
        }
    }
}

/// Errors raised while exporting or deploying a compiled model.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// A cycle was detected or a resource could not become a task.
    #[error("ExportError: {reason}")]
    Export { reason: String, span: Option<Span> },

    /// A handler failed or reported failure without deploying.
    #[error("DeployError: {reason}")]
    Deploy { reason: String },

    /// An unfulfilled promise was read after its owner completed.
    #[error("UnresolvedPromiseError: promise '{promise}' of '{index}' was never fulfilled")]
    UnresolvedPromise { index: String, promise: String },

    /// An engine invariant was violated. Always a bug.
    #[error("PANIC!! {reason}")]
    Internal { reason: String },
}

impl EngineError {
    pub fn export(reason: impl Into<String>) -> Self {
        Self::Export {
            reason: reason.into(),
            span: None,
        }
    }

    pub fn deploy(reason: impl Into<String>) -> Self {
        Self::Deploy {
            reason: reason.into(),
        }
    }
}
