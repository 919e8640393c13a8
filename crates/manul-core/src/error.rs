//! Error and diagnostic types for the compiler backend.
//!
//! Errors split into three families, matching how the backend reacts to
//! them:
//!
//! - *Structural* errors (assert misuse, dead code, type mismatches) and
//!   *resolution* errors (no applicable overload, ambiguous call) become
//!   [`Diagnostic`]s: they are accumulated against the unit being checked
//!   and compilation of sibling units continues.
//! - *Internal* errors indicate a defect in an earlier phase (a block with a
//!   missing successor, a signature translated before registration
//!   completed) and are unrecoverable.

use thiserror::Error;

use crate::Span;

/// Errors produced while checking and compiling a unit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    // ========================================================================
    // Structural errors
    // ========================================================================
    /// `assert` used outside a test body.
    #[error("at {span}: assert not allowed here")]
    AssertNotAllowed { span: Span },

    /// A condition that must be boolean has some other type.
    #[error("at {span}: boolean expected, found '{found}'")]
    BooleanExpected { span: Span, found: String },

    /// Two types that must agree do not.
    #[error("at {span}: expected '{expected}', found '{found}'")]
    TypeMismatch {
        span: Span,
        expected: String,
        found: String,
    },

    /// Code textually follows a command that always transfers control away.
    #[error("at {span}: dead code")]
    DeadCode { span: Span },

    /// A name that is not in scope.
    #[error("at {span}: unknown variable '{name}'")]
    UnknownVariable { span: Span, name: String },

    /// A type name that is not registered.
    #[error("at {span}: unknown class '{name}'")]
    UnknownClass { span: Span, name: String },

    /// A field access that resolves to nothing.
    #[error("at {span}: unknown field '{name}'")]
    UnknownField { span: Span, name: String },

    /// A missing or mistyped return at the end of a unit body.
    #[error("at {span}: {message}")]
    BadReturn { span: Span, message: String },

    /// Assignment to something that is not a variable or field.
    #[error("at {span}: expression is not assignable")]
    NotAssignable { span: Span },

    // ========================================================================
    // Resolution errors
    // ========================================================================
    /// Overload lookup found no applicable signature.
    #[error("at {span}: no applicable signature for '{name}({args})'")]
    NoApplicable {
        span: Span,
        name: String,
        args: String,
    },

    /// Overload lookup found several equally specific signatures.
    #[error("at {span}: ambiguous call to '{name}': could be {candidates}")]
    AmbiguousCall {
        span: Span,
        name: String,
        candidates: String,
    },

    // ========================================================================
    // Internal invariant violations
    // ========================================================================
    /// A defect in an earlier phase, not a user error. Fatal.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CompileError {
    /// The source span this error points at, if it has one.
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::AssertNotAllowed { span }
            | CompileError::BooleanExpected { span, .. }
            | CompileError::TypeMismatch { span, .. }
            | CompileError::DeadCode { span }
            | CompileError::UnknownVariable { span, .. }
            | CompileError::UnknownClass { span, .. }
            | CompileError::UnknownField { span, .. }
            | CompileError::BadReturn { span, .. }
            | CompileError::NotAssignable { span }
            | CompileError::NoApplicable { span, .. }
            | CompileError::AmbiguousCall { span, .. } => Some(*span),
            CompileError::Internal { .. } => None,
        }
    }
}

/// A reported problem, pinned to a source position.
///
/// Rendered as `<line:col>\t<message>`, the format the command-line driver
/// prints before any artifact is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    /// Build a diagnostic from a span and message.
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }

    /// Render in the reporting format.
    pub fn render(&self) -> String {
        format!("{}\t{}", self.span, self.message)
    }
}

impl From<CompileError> for Diagnostic {
    fn from(err: CompileError) -> Self {
        let span = err.span().unwrap_or_default();
        // The span already leads the rendered line; strip the `at span:`
        // prefix the Display form carries.
        let text = err.to_string();
        let message = match text.split_once(": ") {
            Some((head, rest)) if head.starts_with("at ") => rest.to_string(),
            _ => text,
        };
        Diagnostic::new(span, message)
    }
}
