//! Lexical scoping for scratch variables.
//!
//! Each `{ ... }` block pushes a frame; lookups search innermost to
//! outermost. Declaration goes to the innermost frame. Shadowing is
//! forbidden: declaring a name visible in any enclosing frame is an error,
//! diagnosed at the new declaration with a pointer at the original one.

use indexmap::IndexMap;
use ktrace_ast::foundation::{SizedType, Span};

/// One scratch variable.
#[derive(Debug, Clone)]
pub struct VarInfo {
    pub ty: SizedType,
    /// Where the variable was introduced (`let` or first assignment)
    pub decl_span: Span,
    /// Introduced by `let` (as opposed to first assignment)
    pub let_decl: bool,
    /// Carried an explicit `let $x: ty` annotation
    pub explicit_ty: bool,
    /// A value has actually been assigned
    pub assigned: bool,
    /// Read before any assignment (warning fodder)
    pub read_before_assign: bool,
    /// Induction variable of a for-loop; not re-assignable
    pub loop_induction: bool,
}

impl VarInfo {
    pub fn new(ty: SizedType, decl_span: Span) -> Self {
        Self {
            ty,
            decl_span,
            let_decl: false,
            explicit_ty: false,
            assigned: false,
            read_before_assign: false,
            loop_induction: false,
        }
    }
}

/// The scratch-variable scope stack of one probe or subprogram.
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<IndexMap<String, VarInfo>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self) {
        self.frames.push(IndexMap::new());
    }

    /// Pop the innermost frame, returning its bindings for end-of-scope
    /// checks (unused / never-assigned warnings).
    pub fn pop(&mut self) -> IndexMap<String, VarInfo> {
        self.frames.pop().expect("scope stack underflow")
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Innermost binding for `name`, searching outwards.
    pub fn lookup(&self, name: &str) -> Option<&VarInfo> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut VarInfo> {
        self.frames.iter_mut().rev().find_map(|f| f.get_mut(name))
    }

    /// Bind `name` in the innermost frame.
    ///
    /// # Panics
    /// Panics if no frame is active (programming error).
    pub fn bind(&mut self, name: &str, info: VarInfo) {
        self.frames
            .last_mut()
            .expect("bind outside any scope")
            .insert(name.to_string(), info);
    }

    /// Whether `name` is bound in the innermost frame itself.
    pub fn bound_here(&self, name: &str) -> bool {
        self.frames
            .last()
            .map(|f| f.contains_key(name))
            .unwrap_or(false)
    }
}
