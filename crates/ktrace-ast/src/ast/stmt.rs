//! Statement and block nodes.

use crate::ast::expr::{BinOp, Expr};
use crate::ast::TypeSpec;
use crate::foundation::Span;

/// `break` / `continue` / `return`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Break,
    Continue,
    Return,
}

impl JumpKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            JumpKind::Break => "break",
            JumpKind::Continue => "continue",
            JumpKind::Return => "return",
        }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    /// `let $name;` / `let $name: ty;` / `let $name [= init]`
    VarDecl {
        name: String,
        ty: Option<TypeSpec>,
        init: Option<Expr>,
    },
    /// `$name = expr` or a compound form carrying `op`
    AssignVar {
        var: Expr,
        expr: Expr,
        op: Option<BinOp>,
    },
    /// `@name[key] = expr` or a compound form carrying `op`.
    /// `map` is an `ExprKind::Map` node holding name and key.
    AssignMap {
        map: Expr,
        expr: Expr,
        op: Option<BinOp>,
    },
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        cond: Expr,
        block: Block,
    },
    Unroll {
        count: Expr,
        block: Block,
    },
    /// `for ($decl : @map) { ... }`; `map` is an `ExprKind::Map` node
    ForMap {
        decl: String,
        decl_span: Span,
        map: Expr,
        block: Block,
    },
    /// `for ($decl : start..end) { ... }`
    ForRange {
        decl: String,
        decl_span: Span,
        start: Expr,
        end: Expr,
        block: Block,
    },
    Jump {
        kind: JumpKind,
        /// Only `return` inside a subprogram carries a value
        value: Option<Expr>,
    },
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn expr(expr: Expr) -> Self {
        let span = expr.span;
        Self::new(StmtKind::Expr(expr), span)
    }

    pub fn assign_var(var: Expr, expr: Expr) -> Self {
        let span = var.span.merge(&expr.span);
        Self::new(
            StmtKind::AssignVar {
                var,
                expr,
                op: None,
            },
            span,
        )
    }

    pub fn assign_map(map: Expr, expr: Expr) -> Self {
        let span = map.span.merge(&expr.span);
        Self::new(
            StmtKind::AssignMap {
                map,
                expr,
                op: None,
            },
            span,
        )
    }

    pub fn compound_var(var: Expr, op: BinOp, expr: Expr) -> Self {
        let span = var.span.merge(&expr.span);
        Self::new(
            StmtKind::AssignVar {
                var,
                expr,
                op: Some(op),
            },
            span,
        )
    }

    pub fn compound_map(map: Expr, op: BinOp, expr: Expr) -> Self {
        let span = map.span.merge(&expr.span);
        Self::new(
            StmtKind::AssignMap {
                map,
                expr,
                op: Some(op),
            },
            span,
        )
    }
}

/// A `{ ... }` statement block. Entering one pushes a scratch-variable
/// scope frame.
#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>, span: Span) -> Self {
        Self { stmts, span }
    }
}
