// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! AST types for the ktrace tracing DSL
//!
//! This crate contains the AST node definitions, the type system and the
//! foundation types (source spans, diagnostics, configuration, kernel
//! feature descriptors) shared by the parser and the semantic analyser.

pub mod ast;
pub mod error;
pub mod foundation;

// Re-export commonly used types
pub use error::{Diagnostic, DiagnosticPrinter, Diagnostics, Severity};
pub use foundation::{
    AddrSpace, AggKind, Config, ConfigError, Features, Field, Record, RecordRegistry, SizedType,
    SourceFile, SourceMap, Span, StackMode, TimestampMode, TypeKind,
};

pub use ast::*;
