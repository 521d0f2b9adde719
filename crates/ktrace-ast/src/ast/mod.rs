//! AST node definitions.
//!
//! The tree is produced by the parser and the early rewrite passes; the
//! semantic analyser decorates it in place (every expression carries its
//! resolved `SizedType`, seeded as `none`). Nodes are plain boxed trees;
//! diagnostics refer to them by `Span` only.

pub mod expr;
pub mod probe;
pub mod stmt;

pub use expr::{BinOp, Expr, ExprKind, OffsetofBase, SizeofArg, UnOp};
pub use probe::{AttachPoint, Probe, ProbeType};
pub use stmt::{Block, JumpKind, Stmt, StmtKind};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Diagnostics;
use crate::foundation::{RecordRegistry, SourceMap, Span};

/// An unresolved type written in the program: cast targets, `let`
/// annotations and `sizeof`/`offsetof` subjects.
///
/// Resolution to a `SizedType` happens during semantic analysis, where
/// unknown names produce diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeSpec {
    /// A bare identifier: `int32`, `bool`, `string`, but also rejected
    /// C spellings like `char` and unknown names
    Ident(String),
    /// `struct foo` / `union foo` (the name keeps its keyword)
    Record(String),
    /// `enum foo`
    Enum(String),
    Pointer(Box<TypeSpec>),
    /// `int8[8]`; `None` length means "infer from the operand"
    Array(Box<TypeSpec>, Option<u64>),
}

impl TypeSpec {
    pub fn ident(name: impl Into<String>) -> Self {
        TypeSpec::Ident(name.into())
    }

    pub fn record(name: impl Into<String>) -> Self {
        TypeSpec::Record(name.into())
    }

    pub fn pointer(inner: TypeSpec) -> Self {
        TypeSpec::Pointer(Box::new(inner))
    }

    pub fn array(elem: TypeSpec, len: Option<u64>) -> Self {
        TypeSpec::Array(Box::new(elem), len)
    }

    /// The source spelling, used in cast diagnostics.
    pub fn display_name(&self) -> String {
        match self {
            TypeSpec::Ident(name) => name.clone(),
            TypeSpec::Record(name) => name.clone(),
            TypeSpec::Enum(name) => format!("enum {name}"),
            TypeSpec::Pointer(inner) => format!("{} *", inner.display_name()),
            TypeSpec::Array(elem, Some(len)) => format!("{}[{}]", elem.display_name(), len),
            TypeSpec::Array(elem, None) => format!("{}[]", elem.display_name()),
        }
    }
}

/// A subprogram: `fn name($p: T, ...): R { ... }`.
#[derive(Debug, Clone)]
pub struct Subprog {
    pub name: String,
    pub params: Vec<(String, TypeSpec)>,
    pub return_ty: TypeSpec,
    pub block: Block,
    pub span: Span,
}

/// A `let @name = storage(max_entries);` declaration.
#[derive(Debug, Clone)]
pub struct MapDecl {
    pub name: String,
    pub storage: String,
    pub max_entries: u64,
    pub span: Span,
}

/// One `key=value` entry of a `config = { ... }` block.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub span: Span,
}

/// A parsed program.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub config: Vec<ConfigEntry>,
    pub map_decls: Vec<MapDecl>,
    pub functions: Vec<Subprog>,
    pub probes: Vec<Probe>,
    /// C declarations accumulated by earlier passes (embedded definitions,
    /// tracepoint format structs)
    pub c_definitions: String,
}

/// The per-compilation context: sources, AST root, interned records and the
/// diagnostics sink. Passes hand this around; nothing in it is shared
/// across compilations.
#[derive(Debug, Default)]
pub struct AstContext {
    pub sources: SourceMap,
    pub root: Program,
    pub records: RecordRegistry,
    pub diagnostics: Diagnostics,
}

impl AstContext {
    pub fn new(filename: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        let mut sources = SourceMap::new();
        sources.add_file(filename.into(), source.into());
        Self {
            sources,
            root: Program::default(),
            records: RecordRegistry::default(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Span for a byte range in the (single) root file.
    ///
    /// Convenience for tests that build ASTs by hand.
    pub fn span(&self, start: u32, end: u32) -> Span {
        let span = Span::new(0, start, end, 1);
        let (line, _) = self.sources.line_col(&span);
        Span::new(0, start, end, line as u16)
    }
}
