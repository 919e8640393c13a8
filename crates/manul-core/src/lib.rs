//! Core types shared by the manul compiler backend.
//!
//! This crate holds the pieces every phase needs: source spans, the
//! diagnostic/error taxonomy, and the semantic type model (primitive types,
//! the class hierarchy, and the comparison categories that drive branching
//! instruction selection).

pub mod error;
pub mod span;
pub mod types;

pub use error::{CompileError, Diagnostic};
pub use span::Span;
pub use types::{ClassId, ClassTable, CompareCategory, Type};
