//! Compilation error taxonomy.
//!
//! Every failure aborts the whole module compile; there is no partial output.
//!
//! ```text
//! CompileError
//! ├── UnsupportedConstruct  - a node or argument shape with no compiling rule
//! ├── NameResolution        - a name not found in any local/closure/global/builtin scope
//! └── InternalInvariant     - a compiler defect (bad native read, unbalanced save/restore)
//! ```

use thiserror::Error;

use crate::Span;

/// The category of a [`CompileError`], for callers that only branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedConstruct,
    NameResolution,
    InternalInvariant,
}

/// A fatal compilation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// An AST node or argument shape has no compiling rule.
    #[error("at {span}: unsupported construct: {what}")]
    UnsupportedConstruct {
        /// Description of the rejected construct.
        what: String,
        /// Where the construct appears.
        span: Span,
    },

    /// A variable is referenced but cannot be found in any scope.
    #[error("at {span}: name '{name}' is not defined")]
    NameResolution {
        /// The unresolved name.
        name: String,
        /// Where the name was referenced.
        span: Span,
    },

    /// A compiler defect, never a property of the input program.
    #[error("at {span}: internal compiler error: {detail}")]
    InternalInvariant {
        /// What invariant was violated.
        detail: String,
        /// Closest source location.
        span: Span,
    },
}

impl CompileError {
    /// Build an [`CompileError::UnsupportedConstruct`].
    pub fn unsupported(what: impl Into<String>, span: Span) -> Self {
        CompileError::UnsupportedConstruct {
            what: what.into(),
            span,
        }
    }

    /// Build a [`CompileError::NameResolution`].
    pub fn unresolved(name: impl Into<String>, span: Span) -> Self {
        CompileError::NameResolution {
            name: name.into(),
            span,
        }
    }

    /// Build a [`CompileError::InternalInvariant`].
    pub fn internal(detail: impl Into<String>, span: Span) -> Self {
        CompileError::InternalInvariant {
            detail: detail.into(),
            span,
        }
    }

    /// Get the span where this error occurred.
    pub fn span(&self) -> Span {
        match self {
            CompileError::UnsupportedConstruct { span, .. } => *span,
            CompileError::NameResolution { span, .. } => *span,
            CompileError::InternalInvariant { span, .. } => *span,
        }
    }

    /// Get the error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::UnsupportedConstruct { .. } => ErrorKind::UnsupportedConstruct,
            CompileError::NameResolution { .. } => ErrorKind::NameResolution,
            CompileError::InternalInvariant { .. } => ErrorKind::InternalInvariant,
        }
    }
}

/// Result alias used throughout the compiler crates.
pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location() {
        let err = CompileError::unsupported("async function", Span::new(4, 1));
        assert_eq!(
            err.to_string(),
            "at 4:1: unsupported construct: async function"
        );
    }

    #[test]
    fn name_resolution_message() {
        let err = CompileError::unresolved("undefined_thing", Span::new(2, 7));
        assert_eq!(err.to_string(), "at 2:7: name 'undefined_thing' is not defined");
        assert_eq!(err.kind(), ErrorKind::NameResolution);
    }

    #[test]
    fn span_accessor() {
        let span = Span::new(9, 3);
        assert_eq!(CompileError::internal("boom", span).span(), span);
    }
}
