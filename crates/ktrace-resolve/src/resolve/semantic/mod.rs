//! The semantic analyser.
//!
//! A visitor over the whole program that resolves names, infers and checks
//! types, and validates builtin calls, control flow and probe-family
//! constraints. It runs as a fixed-point loop: inference passes repeat
//! while types are still settling (map types may be fixed by a later
//! probe), their diagnostics are discarded, and one final pass re-checks
//! everything and keeps its diagnostics.
//!
//! "Failure" is always a recorded diagnostic; the visitor hands back a type
//! (possibly `none`) for every expression so downstream nodes keep getting
//! checked.

pub mod calls;
pub mod exprs;

#[cfg(test)]
mod tests_control_flow;

use ktrace_ast::ast::{
    AttachPoint, BinOp, Block, Expr, ExprKind, JumpKind, Probe, ProbeType, Program, Stmt,
    StmtKind, Subprog, TypeSpec,
};
use ktrace_ast::error::Diagnostics;
use ktrace_ast::foundation::{RecordRegistry, SizedType, Span, TypeKind};
use ktrace_ast::AstContext;

use crate::pass::{CompileEnv, Pass, PassOutcome};
use crate::resolve::maps::{DeclInfo, MapTable, StorageClass};
use crate::resolve::scopes::{ScopeStack, VarInfo};
use crate::resolve::types::{
    map_value_unify, resolve_type_spec, var_value_unify, ValueFit,
};

/// Backstop for the inference loop; real programs converge in a handful of
/// passes (one per link in the longest map-assignment chain).
const MAX_INFERENCE_PASSES: usize = 64;

/// Create the semantic analysis pass.
pub fn create_semantic_pass() -> Pass {
    Pass::new("semantic", |ast, env| {
        analyse(ast, env);
        PassOutcome::Continue
    })
}

/// Run semantic analysis over the context. Returns true when the program is
/// semantically valid.
pub fn analyse(ctx: &mut AstContext, env: &CompileEnv) -> bool {
    let AstContext {
        root,
        records,
        diagnostics,
        ..
    } = ctx;

    let mut maps = MapTable::new();
    let prior = diagnostics.take();

    let mut passes = 0;
    loop {
        passes += 1;
        let mut analyser = Analyser::new(records, diagnostics, env, &mut maps, false);
        analyser.visit_program(root);
        let changed = analyser.type_changed;
        let _ = diagnostics.take();
        if !changed || passes >= MAX_INFERENCE_PASSES {
            break;
        }
    }
    tracing::debug!(passes, "semantic inference converged");

    let mut analyser = Analyser::new(records, diagnostics, env, &mut maps, true);
    analyser.visit_program(root);

    let emitted = diagnostics.take();
    for diag in prior.into_iter().chain(emitted) {
        diagnostics.push(diag);
    }
    diagnostics.ok()
}

/// Probe-side context of the statement being analysed.
struct ProbeCtx {
    ty: ProbeType,
    single_type: bool,
    /// target/func of the first attach point, for `args` resolution
    target: String,
    func: String,
}

struct SubprogCtx {
    name: String,
    ret: SizedType,
}

pub(crate) struct Analyser<'a> {
    pub(crate) records: &'a RecordRegistry,
    pub(crate) diags: &'a mut Diagnostics,
    pub(crate) env: &'a CompileEnv,
    pub(crate) maps: &'a mut MapTable,
    pub(crate) scopes: ScopeStack,
    probe: Option<ProbeCtx>,
    subprog: Option<SubprogCtx>,
    pub(crate) loop_depth: usize,
    pub(crate) for_depth: usize,
    /// Visiting an argument of `str()`/`buf()`: positional parameters act
    /// as strings and pointer-offset arithmetic on them is permitted
    pub(crate) in_str_arg: bool,
    /// The next call visited is the direct RHS of a map assignment
    pub(crate) map_assign_rhs: bool,
    pub(crate) final_pass: bool,
    pub(crate) type_changed: bool,
}

impl<'a> Analyser<'a> {
    fn new(
        records: &'a RecordRegistry,
        diags: &'a mut Diagnostics,
        env: &'a CompileEnv,
        maps: &'a mut MapTable,
        final_pass: bool,
    ) -> Self {
        Self {
            records,
            diags,
            env,
            maps,
            scopes: ScopeStack::new(),
            probe: None,
            subprog: None,
            loop_depth: 0,
            for_depth: 0,
            in_str_arg: false,
            map_assign_rhs: false,
            final_pass,
            type_changed: false,
        }
    }

    /// Record a resolved type on an expression, tracking whether anything
    /// moved this pass (drives the fixed-point loop).
    pub(crate) fn set_type(&mut self, expr: &mut Expr, ty: SizedType) -> SizedType {
        if expr.ty != ty || expr.ty.ctx != ty.ctx {
            self.type_changed = true;
        }
        expr.ty = ty.clone();
        ty
    }

    pub(crate) fn probe_type(&self) -> Option<ProbeType> {
        self.probe.as_ref().map(|p| p.ty)
    }

    pub(crate) fn probe_single_type(&self) -> bool {
        self.probe.as_ref().map(|p| p.single_type).unwrap_or(true)
    }

    pub(crate) fn probe_target(&self) -> (&str, &str) {
        self.probe
            .as_ref()
            .map(|p| (p.target.as_str(), p.func.as_str()))
            .unwrap_or(("", ""))
    }

    pub(crate) fn in_subprog(&self) -> bool {
        self.subprog.is_some()
    }

    // ---------------------------------------------------------------------
    // Program structure
    // ---------------------------------------------------------------------

    fn visit_program(&mut self, program: &mut Program) {
        self.register_map_decls(program);

        for func in &mut program.functions {
            self.visit_subprog(func);
        }

        let mut begin_seen = false;
        let mut end_seen = false;
        for probe in &mut program.probes {
            for ap in &probe.attach_points {
                match ap.probe_type() {
                    ProbeType::Begin => {
                        if begin_seen {
                            self.diags
                                .error(ap.span, "More than one BEGIN probe defined");
                        }
                        begin_seen = true;
                    }
                    ProbeType::End => {
                        if end_seen {
                            self.diags.error(ap.span, "More than one END probe defined");
                        }
                        end_seen = true;
                    }
                    _ => {}
                }
            }
            self.visit_probe(probe);
        }

        self.finish_map_checks();
    }

    fn register_map_decls(&mut self, program: &Program) {
        for decl in &program.map_decls {
            let Some(storage) = StorageClass::from_ident(&decl.storage) else {
                self.diags
                    .error(decl.span, format!("Invalid bpf map type: {}", decl.storage))
                    .hint(format!("Valid map types: {}", StorageClass::NAMES));
                continue;
            };
            if storage == StorageClass::PercpuArray && decl.max_entries != 1 {
                self.diags.error(
                    decl.span,
                    "Max entries can only be 1 for map type percpuarray",
                );
            }
            self.maps.declare(
                &decl.name,
                DeclInfo {
                    storage,
                    max_entries: decl.max_entries,
                    span: decl.span,
                },
            );
        }
    }

    fn finish_map_checks(&mut self) {
        if !self.final_pass {
            return;
        }
        let mut unused = Vec::new();
        for (name, info) in self.maps.iter() {
            if let Some(decl) = &info.decl {
                if !info.assigned && !info.used {
                    unused.push((name.clone(), decl.span));
                }
            }
        }
        for (name, span) in unused {
            self.diags.warning(span, format!("Unused map: @{name}"));
        }
    }

    fn visit_probe(&mut self, probe: &mut Probe) {
        self.check_attach_points(probe);

        let first = probe.attach_points.first();
        self.probe = Some(ProbeCtx {
            ty: probe.probe_type(),
            single_type: probe.single_type(),
            target: first.map(|ap| ap.target().to_string()).unwrap_or_default(),
            func: first.map(|ap| ap.func().to_string()).unwrap_or_default(),
        });
        self.subprog = None;

        self.scopes.push();
        if let Some(pred) = &mut probe.predicate {
            let ty = self.visit_value(pred);
            self.check_predicate(&ty, pred.span);
        }
        self.visit_block_stmts(&mut probe.block);
        self.leave_scope();
        self.probe = None;
    }

    fn visit_subprog(&mut self, func: &mut Subprog) {
        let ret = match resolve_type_spec(&func.return_ty, &self.env.config) {
            Ok(ty) => ty,
            Err(err) => {
                self.diags.error(
                    func.span,
                    format!("Cannot resolve unknown type \"{}\"", err.name),
                );
                SizedType::none()
            }
        };
        self.probe = None;
        self.subprog = Some(SubprogCtx {
            name: func.name.clone(),
            ret,
        });

        self.scopes.push();
        for (name, spec) in &func.params {
            let ty = match resolve_type_spec(spec, &self.env.config) {
                Ok(ty) => ty,
                Err(err) => {
                    self.diags.error(
                        func.span,
                        format!("Cannot resolve unknown type \"{}\"", err.name),
                    );
                    SizedType::none()
                }
            };
            let mut info = VarInfo::new(ty, func.span);
            info.let_decl = true;
            info.explicit_ty = true;
            info.assigned = true;
            self.scopes.bind(name, info);
        }
        self.visit_block_stmts(&mut func.block);
        self.leave_scope();
        self.subprog = None;
    }

    // ---------------------------------------------------------------------
    // Blocks and statements
    // ---------------------------------------------------------------------

    /// Visit a block that opens its own scope frame.
    pub(crate) fn visit_block(&mut self, block: &mut Block) {
        self.scopes.push();
        self.visit_block_stmts(block);
        self.leave_scope();
    }

    /// Visit statements in the current frame (the caller owns the frame).
    pub(crate) fn visit_block_stmts(&mut self, block: &mut Block) {
        let mut exited: Option<JumpKind> = None;
        for stmt in &mut block.stmts {
            if let Some(kind) = exited.take() {
                self.diags.warning(
                    stmt.span,
                    format!(
                        "code after a '{}' statement will never be executed",
                        kind.keyword()
                    ),
                );
            }
            if let StmtKind::Jump { kind, .. } = &stmt.kind {
                exited = Some(*kind);
            }
            self.visit_stmt(stmt);
        }
    }

    /// Pop the current frame, emitting end-of-scope warnings.
    pub(crate) fn leave_scope(&mut self) {
        let frame = self.scopes.pop();
        if !self.final_pass {
            return;
        }
        for (name, info) in frame {
            if info.let_decl && !info.assigned {
                self.diags
                    .warning(info.decl_span, format!("Variable ${name} never assigned to."));
            }
        }
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::Expr(expr) => {
                self.visit_expr(expr);
                self.check_discarded_result(expr);
            }
            StmtKind::VarDecl { name, ty, init } => {
                let name = name.clone();
                let ty = ty.clone();
                self.visit_var_decl(span, &name, ty.as_ref(), init.as_mut());
            }
            StmtKind::AssignVar { var, expr, op } => {
                let op = *op;
                self.visit_assign_var(span, var, expr, op);
            }
            StmtKind::AssignMap { map, expr, op } => {
                let op = *op;
                self.visit_assign_map(span, map, expr, op);
            }
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                let ty = self.visit_value(cond);
                self.check_predicate(&ty, cond.span);
                self.visit_block(then_block);
                if let Some(else_block) = else_block {
                    self.visit_block(else_block);
                }
            }
            StmtKind::While { cond, block } => {
                let ty = self.visit_value(cond);
                self.check_predicate(&ty, cond.span);
                self.loop_depth += 1;
                self.visit_block(block);
                self.loop_depth -= 1;
            }
            StmtKind::Unroll { count, block } => {
                self.check_unroll_count(count);
                self.visit_block(block);
            }
            StmtKind::ForMap {
                decl,
                decl_span,
                map,
                block,
            } => {
                let decl = decl.clone();
                let decl_span = *decl_span;
                self.visit_for_map(span, &decl, decl_span, map, block);
            }
            StmtKind::ForRange {
                decl,
                decl_span,
                start,
                end,
                block,
            } => {
                let decl = decl.clone();
                let decl_span = *decl_span;
                self.visit_for_range(&decl, decl_span, start, end, block);
            }
            StmtKind::Jump { kind, value } => {
                let kind = *kind;
                self.visit_jump(span, kind, value.as_mut());
            }
        }
    }

    // ---------------------------------------------------------------------
    // Variable assignment
    // ---------------------------------------------------------------------

    fn visit_var_decl(
        &mut self,
        span: Span,
        name: &str,
        ty: Option<&TypeSpec>,
        init: Option<&mut Expr>,
    ) {
        if let Some(existing) = self.scopes.lookup(name) {
            if existing.let_decl {
                let decl_span = existing.decl_span;
                self.diags.error(
                    span,
                    format!(
                        "Variable ${name} was already declared. \
                         Variable shadowing is not allowed."
                    ),
                );
                self.diags
                    .warning(decl_span, "This is the initial declaration.");
            } else {
                self.diags.error(
                    span,
                    format!(
                        "Variable declarations need to occur before variable usage or \
                         assignment. Variable: ${name}"
                    ),
                );
            }
            return;
        }

        let declared_ty = match ty {
            Some(spec) => match resolve_type_spec(spec, &self.env.config) {
                Ok(resolved) => {
                    if resolved.is_agg() {
                        self.diags.error(
                            span,
                            format!("Invalid variable declaration type: {resolved}"),
                        );
                        None
                    } else {
                        Some(resolved)
                    }
                }
                Err(err) => {
                    self.diags.error(
                        span,
                        format!("Cannot resolve unknown type \"{}\"", err.name),
                    );
                    None
                }
            },
            None => None,
        };

        let mut info = VarInfo::new(
            declared_ty.clone().unwrap_or_else(SizedType::none),
            span,
        );
        info.let_decl = true;
        info.explicit_ty = declared_ty.is_some();

        if let Some(init) = init {
            let vty = self.rhs_value_for_scratch(span, init);
            if let Some(vty) = vty {
                match &declared_ty {
                    Some(decl_ty) => {
                        if self.check_var_assign_typed(span, name, decl_ty, &vty, init, true) {
                            info.assigned = true;
                        }
                    }
                    None => {
                        if !vty.is_none() {
                            info.ty = vty;
                            info.assigned = true;
                        }
                    }
                }
            }
        }

        self.scopes.bind(name, info);
    }

    fn visit_assign_var(&mut self, span: Span, var: &mut Expr, value: &mut Expr, op: Option<BinOp>) {
        let name = match &var.kind {
            ExprKind::Variable(name) => name.clone(),
            _ => return,
        };

        if let Some(op) = op {
            // compound assignment requires an existing binding
            let Some(info) = self.scopes.lookup(&name) else {
                self.diags.error(
                    var.span,
                    format!("Undefined or undeclared variable: ${name}"),
                );
                return;
            };
            let lhs_ty = info.ty.clone();
            let rhs_ty = self.visit_value(value);
            let result = self.compound_result(span, &lhs_ty, op, &rhs_ty, value);
            self.store_var_value(span, &name, &result, None);
            self.set_type(var, result);
            return;
        }

        // a plain assignment introduces the variable on first sight
        let vty = self.rhs_value_for_scratch(span, value);
        let Some(vty) = vty else {
            // aggregation rejected; leave any existing binding untouched
            if self.scopes.lookup(&name).is_none() {
                let mut info = VarInfo::new(SizedType::none(), span);
                info.assigned = false;
                self.scopes.bind(&name, info);
            }
            return;
        };

        if self.scopes.lookup(&name).is_none() {
            let mut info = VarInfo::new(vty.clone(), span);
            info.assigned = !vty.is_none();
            self.scopes.bind(&name, info);
            self.set_type(var, vty);
            return;
        }
        self.store_var_value(span, &name, &vty, Some(value));
        let ty = self
            .scopes
            .lookup(&name)
            .map(|i| i.ty.clone())
            .unwrap_or_else(SizedType::none);
        self.set_type(var, ty);
    }

    /// Type of an assignment RHS bound for a scratch variable. Returns
    /// `None` when the value may not live in a variable at all.
    fn rhs_value_for_scratch(&mut self, span: Span, value: &mut Expr) -> Option<SizedType> {
        if value.is_map() {
            let ty = self.visit_map_read(value);
            if let Some(kind) = ty.agg_kind() {
                if kind.is_castable() {
                    self.require_percpu_read(value.span);
                    let int = SizedType::integer(64, kind.read_signed());
                    return Some(self.set_type(value, int));
                }
                self.diags.error(
                    span,
                    format!("Value '{ty}' cannot be assigned to a scratch variable."),
                );
                return None;
            }
            return Some(ty);
        }
        let ty = self.visit_value(value);
        if ty.is_void() {
            self.diags
                .error(span, "Can not assign a value of type 'void'");
            return None;
        }
        Some(ty)
    }

    /// Check `value` against a variable's settled type, emitting the
    /// integer-aware diagnostics. `declared` selects the "has a type"
    /// wording used before the first assignment. Returns success.
    fn check_var_assign_typed(
        &mut self,
        span: Span,
        name: &str,
        stored: &SizedType,
        value: &SizedType,
        value_expr: &Expr,
        declared: bool,
    ) -> bool {
        if value.is_none() || stored.is_none() {
            return !value.is_none();
        }
        let wording = if declared {
            "has a type"
        } else {
            "contains a value of type"
        };
        if stored.is_int() && value.is_int() {
            if let Some((magnitude, negative)) = value_expr.as_literal_int() {
                if negative && !stored.is_signed() {
                    self.diags.error(
                        span,
                        format!(
                            "Type mismatch for ${name}: trying to assign value of type \
                             '{value}' when variable already {wording} '{stored}'"
                        ),
                    );
                    return false;
                }
                if !stored.literal_fits(magnitude, negative) {
                    let lit = format_literal(magnitude, negative);
                    self.diags.error(
                        span,
                        format!(
                            "Type mismatch for ${name}: trying to assign value '{lit}' \
                             which does not fit into the variable of type '{stored}'"
                        ),
                    );
                    return false;
                }
                return true;
            }
            if stored.is_signed() != value.is_signed() {
                self.diags.error(
                    span,
                    format!(
                        "Type mismatch for ${name}: trying to assign value of type \
                         '{value}' when variable already {wording} '{stored}'"
                    ),
                );
                return false;
            }
            let (sb, vb) = (stored.int_bits().unwrap_or(64), value.int_bits().unwrap_or(64));
            if vb > sb {
                self.diags.error(
                    span,
                    format!(
                        "Integer size mismatch. Assignment type '{value}' is larger than \
                         the variable type '{stored}'."
                    ),
                );
                return false;
            }
            return true;
        }

        let mut widened = stored.clone();
        if var_value_unify(&mut widened, value) {
            if widened != *stored || widened.string_cap() != stored.string_cap() {
                // capacity widening counts as a refinement
                self.update_var_type(name, widened);
            }
            true
        } else {
            self.diags.error(
                span,
                format!(
                    "Type mismatch for ${name}: trying to assign value of type '{value}' \
                     when variable already {wording} '{stored}'"
                ),
            );
            false
        }
    }

    fn store_var_value(&mut self, span: Span, name: &str, value: &SizedType, expr: Option<&Expr>) {
        let Some(info) = self.scopes.lookup(name) else {
            return;
        };
        let stored = info.ty.clone();
        let let_decl = info.let_decl;
        let assigned = info.assigned;
        let explicit = info.explicit_ty;

        if stored.is_none() {
            // `let $x;` without a type adopts the first assignment
            if !value.is_none() {
                self.update_var_type(name, value.clone());
                self.mark_var_assigned(name);
            }
            return;
        }

        let declared_wording = let_decl && !assigned && explicit;
        let dummy = Expr::new(ExprKind::Bool(false), span);
        let value_expr = expr.unwrap_or(&dummy);
        if self.check_var_assign_typed(span, name, &stored, value, value_expr, declared_wording) {
            self.mark_var_assigned(name);
        }
    }

    fn update_var_type(&mut self, name: &str, ty: SizedType) {
        if let Some(info) = self.scopes.lookup_mut(name) {
            if info.ty != ty || info.ty.string_cap() != ty.string_cap() {
                info.ty = ty;
                self.type_changed = true;
            }
        }
    }

    fn mark_var_assigned(&mut self, name: &str) {
        if let Some(info) = self.scopes.lookup_mut(name) {
            info.assigned = true;
        }
    }

    // ---------------------------------------------------------------------
    // Map assignment
    // ---------------------------------------------------------------------

    fn visit_assign_map(&mut self, span: Span, map: &mut Expr, value: &mut Expr, op: Option<BinOp>) {
        let Some(name) = map.map_name().map(str::to_string) else {
            return;
        };

        self.check_map_key(map, true);

        let mut void_rhs = false;
        let vty = if let Some(op) = op {
            let stored = self
                .maps
                .get(&name)
                .map(|i| i.value_type.clone())
                .unwrap_or_else(SizedType::none);
            let lhs_ty = match stored.agg_kind() {
                Some(kind) if kind.is_castable() => SizedType::integer(64, kind.read_signed()),
                _ if stored.is_none() => SizedType::int64(),
                _ => stored.clone(),
            };
            let rhs_ty = self.visit_value(value);
            self.compound_result(span, &lhs_ty, op, &rhs_ty, value)
        } else if value.is_map() {
            match self.map_to_map_rhs(span, &name, value) {
                Some(ty) => ty,
                None => return,
            }
        } else {
            self.map_assign_rhs = matches!(value.kind, ExprKind::Call { .. });
            let ty = self.visit_value(value);
            self.map_assign_rhs = false;
            void_rhs = ty.is_void();
            ty
        };

        if void_rhs {
            self.diags
                .error(span, "Can not assign a value of type 'void'");
            return;
        }
        self.store_map_value(span, &name, map.span, &vty, Some(value));
        let final_ty = self
            .maps
            .get(&name)
            .map(|i| i.value_type.clone())
            .unwrap_or_else(SizedType::none);
        self.set_type(map, final_ty);
    }

    /// RHS of `@lhs = @rhs`: aggregations do not travel between maps.
    /// Castable aggregations implicitly read back as integers when the
    /// destination already holds integers; everything else is an error.
    fn map_to_map_rhs(&mut self, span: Span, lhs: &str, value: &mut Expr) -> Option<SizedType> {
        let ty = self.visit_map_read(value);
        let Some(kind) = ty.agg_kind() else {
            return Some(ty);
        };

        let lhs_int = self
            .maps
            .get(lhs)
            .map(|i| i.value_type.clone())
            .filter(SizedType::is_int);
        if kind.is_castable() {
            if let Some(int) = lhs_int {
                // the implicit cast adopts the destination's integer type
                self.require_percpu_read(value.span);
                return Some(self.set_type(value, int));
            }
        }

        let rhs_name = value.map_name().unwrap_or_default().to_string();
        let diag = self.diags.error(
            span,
            format!(
                "Map value '{ty}' cannot be assigned from one map to another. The function \
                 that returns this type must be called directly e.g. `@{lhs} = {}`.",
                kind.example()
            ),
        );
        if kind.is_castable() {
            diag.hint(format!(
                "Add a cast to integer if you want the value of the aggregate, \
                 e.g. `@{lhs} = (int64)@{rhs_name};`."
            ));
        }
        // keep checking against the stored type so double faults surface
        let lhs_seeded = self
            .maps
            .get(lhs)
            .map(|i| !i.value_type.is_none())
            .unwrap_or(false);
        if lhs_seeded {
            Some(ty)
        } else {
            None
        }
    }

    fn store_map_value(
        &mut self,
        span: Span,
        name: &str,
        map_span: Span,
        value: &SizedType,
        value_expr: Option<&Expr>,
    ) {
        {
            let entry = self.maps.entry(name, map_span);
            entry.assigned = true;
        }
        if value.is_none() {
            return;
        }

        let stored = self.maps.entry(name, map_span).value_type.clone();
        if stored.is_none() {
            let seeded = match &value.kind {
                TypeKind::Integer { .. } => value.promoted(),
                _ => value.clone(),
            };
            self.maps.entry(name, map_span).value_type = seeded;
            self.type_changed = true;
        } else {
            let mut widened = stored.clone();
            match map_value_unify(&mut widened, value, value_expr) {
                ValueFit::Ok => {
                    if widened.string_cap() != stored.string_cap() || widened != stored {
                        self.maps.entry(name, map_span).value_type = widened;
                        self.type_changed = true;
                    }
                }
                ValueFit::LiteralOverflow => {
                    let (magnitude, negative) = value_expr
                        .and_then(Expr::as_literal_int)
                        .unwrap_or((0, false));
                    let lit = format_literal(magnitude, negative);
                    self.diags.error(
                        span,
                        format!(
                            "Type mismatch for @{name}: trying to assign value '{lit}' \
                             which does not fit into the map of type '{stored}'"
                        ),
                    );
                }
                ValueFit::Mismatch => {
                    self.diags.error(
                        span,
                        format!(
                            "Type mismatch for @{name}: trying to assign value of type \
                             '{value}' when map already contains a value of type '{stored}'"
                        ),
                    );
                }
            }
        }

        self.check_map_storage(name, map_span);
    }

    fn check_map_storage(&mut self, name: &str, span: Span) {
        let Some(info) = self.maps.get(name) else {
            return;
        };
        if info.value_type.is_none() || info.scalar.is_none() {
            return;
        }
        let Some(decl) = &info.decl else {
            return;
        };
        let required = info.required_storage();
        if !decl.storage.satisfies(required) {
            let declared = decl.storage;
            self.diags.error(
                span,
                format!(
                    "Incompatible map types. Type from declaration: {declared}. \
                     Type from value/key type: {required}"
                ),
            );
        }
    }

    // ---------------------------------------------------------------------
    // Binary-operator result typing for compound assignments
    // ---------------------------------------------------------------------

    /// Result type of `lhs <op> rhs` in a compound assignment; shares the
    /// expression binop rules but pins the diagnostics to the statement.
    fn compound_result(
        &mut self,
        span: Span,
        lhs: &SizedType,
        op: BinOp,
        rhs: &SizedType,
        rhs_expr: &Expr,
    ) -> SizedType {
        self.binop_result(span, op, lhs, rhs, None, Some(rhs_expr), span, span)
    }

    // ---------------------------------------------------------------------
    // Control flow
    // ---------------------------------------------------------------------

    fn check_unroll_count(&mut self, count: &mut Expr) {
        let value = match &count.kind {
            ExprKind::Integer { .. } => count.as_unsigned_literal(),
            ExprKind::PositionalParam(n) => {
                let raw = self.env.param(*n).to_string();
                match raw.parse::<u64>() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        self.diags.error(
                            count.span,
                            format!("unroll() count must be a number, got \"{raw}\""),
                        );
                        return;
                    }
                }
            }
            ExprKind::ParamCount => Some(self.env.params.len() as u64),
            _ => None,
        };
        match value {
            Some(n) if (1..=100).contains(&n) => {}
            Some(n) => {
                self.diags.error(
                    count.span,
                    format!("unroll() count must be between 1 and 100, got {n}"),
                );
            }
            None => {
                self.diags
                    .error(count.span, "unroll() count must be an integer literal");
            }
        }
        self.set_type(count, SizedType::int64());
    }

    fn visit_for_map(
        &mut self,
        span: Span,
        decl: &str,
        decl_span: Span,
        map: &mut Expr,
        block: &mut Block,
    ) {
        if !self.env.features.for_each_map_elem {
            self.diags
                .error(span, "Missing required kernel feature: for_each_map_elem");
        }

        let Some(name) = map.map_name().map(str::to_string) else {
            return;
        };

        if self.scopes.lookup(decl).is_some() {
            self.diags.error(
                decl_span,
                format!("Loop declaration shadows existing variable: ${decl}"),
            );
        }

        // the loop source must be a keyed map
        let mut induction = SizedType::none();
        {
            let entry = self.maps.entry(&name, map.span);
            entry.used = true;
        }
        let info = self.maps.get(&name).cloned();
        if let Some(info) = info {
            if self.final_pass && !info.assigned {
                self.diags.error(map.span, format!("Undefined map: @{name}"));
            } else if info.scalar == Some(true) {
                self.diags.error(
                    map.span,
                    format!(
                        "@{name} has no explicit keys (scalar map), \
                         and cannot be used for iteration"
                    ),
                );
            } else {
                let value_ty = match info.value_type.agg_kind() {
                    Some(kind) if !kind.is_castable() => {
                        self.diags.error(
                            map.span,
                            format!("Loop expression does not support type: {}", info.value_type),
                        );
                        SizedType::none()
                    }
                    Some(kind) => SizedType::integer(64, kind.read_signed()),
                    None => info.value_type.clone(),
                };
                if !info.key_type.is_none() && !value_ty.is_none() {
                    induction = SizedType::tuple(vec![info.key_type.clone(), value_ty]);
                }
            }
        }
        self.set_type(map, induction.clone());

        self.scopes.push();
        let mut var = VarInfo::new(induction, decl_span);
        var.assigned = true;
        var.loop_induction = true;
        self.scopes.bind(decl, var);

        self.loop_depth += 1;
        self.for_depth += 1;
        self.visit_block_stmts(block);
        self.for_depth -= 1;
        self.loop_depth -= 1;
        self.leave_scope();
    }

    fn visit_for_range(
        &mut self,
        decl: &str,
        decl_span: Span,
        start: &mut Expr,
        end: &mut Expr,
        block: &mut Block,
    ) {
        let start_ty = self.visit_value(start);
        let end_ty = self.visit_value(end);

        let range_span = start.span.merge(&end.span);
        if !start_ty.is_none() && !start_ty.is_int() {
            self.diags.error(
                range_span,
                "Loop range requires an integer for the start value",
            );
        }
        if !end_ty.is_none() && !end_ty.is_int() {
            self.diags
                .error(range_span, "Loop range requires an integer for the end value");
        }

        if self.scopes.lookup(decl).is_some() {
            self.diags.error(
                decl_span,
                format!("Loop declaration shadows existing variable: ${decl}"),
            );
        }

        // the induction variable takes the common type of the endpoints;
        // an empty range (start >= end) is legal and iterates zero times
        let induction = match (start_ty.is_int(), end_ty.is_int()) {
            (true, true) => crate::resolve::types::unify(&start_ty, &end_ty)
                .unwrap_or_else(SizedType::int64),
            _ => SizedType::int64(),
        };

        self.scopes.push();
        let mut var = VarInfo::new(induction, decl_span);
        var.assigned = true;
        var.loop_induction = true;
        self.scopes.bind(decl, var);

        self.loop_depth += 1;
        self.for_depth += 1;
        self.visit_block_stmts(block);
        self.for_depth -= 1;
        self.loop_depth -= 1;
        self.leave_scope();
    }

    fn visit_jump(&mut self, span: Span, kind: JumpKind, value: Option<&mut Expr>) {
        match kind {
            JumpKind::Break | JumpKind::Continue => {
                if self.loop_depth == 0 {
                    self.diags.error(
                        span,
                        format!(
                            "'{}' statement is not allowed outside of a loop",
                            kind.keyword()
                        ),
                    );
                }
            }
            JumpKind::Return => {
                if self.for_depth > 0 {
                    self.diags
                        .error(span, "'return' statement is not allowed in a for-loop");
                    return;
                }
                let value_ty = match value {
                    Some(expr) => self.visit_value(expr),
                    None => SizedType::void(),
                };
                if let Some(sub) = &self.subprog {
                    let expected = sub.ret.clone();
                    let name = sub.name.clone();
                    if !expected.is_none() && expected != value_ty {
                        self.diags.error(
                            span,
                            format!(
                                "Function {name} is of type {expected}, \
                                 cannot return {value_ty}"
                            ),
                        );
                    }
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Attach points
    // ---------------------------------------------------------------------

    fn check_attach_points(&mut self, probe: &Probe) {
        let has_iter = probe.has_type(ProbeType::Iter);
        if has_iter && probe.attach_points.len() > 1 {
            if let Some(first) = probe.attach_points.first() {
                self.diags
                    .error(first.span, "Only single iter attach point is allowed.");
            }
        }

        for ap in &probe.attach_points {
            self.check_attach_point(ap);
        }
    }

    fn check_attach_point(&mut self, ap: &AttachPoint) {
        match ap.probe_type() {
            ProbeType::Invalid => {
                self.diags
                    .error(ap.span, format!("Invalid probe type: {}", ap.provider));
            }
            ProbeType::Fentry | ProbeType::Fexit => {
                if !self.env.features.fentry {
                    self.diags
                        .error(ap.span, "fentry/fexit not available for your kernel version.");
                }
            }
            ProbeType::SelfTrigger => self.check_self_probe(ap),
            ProbeType::Profile | ProbeType::Interval => {
                let unit = ap.target();
                if !matches!(unit, "hz" | "s" | "ms" | "us") {
                    self.diags.error(
                        ap.span,
                        format!("{unit} is not a valid unit for {}", ap.provider),
                    );
                }
            }
            ProbeType::Watchpoint | ProbeType::AsyncWatchpoint => self.check_watchpoint(ap),
            _ => {}
        }
    }

    fn check_self_probe(&mut self, ap: &AttachPoint) {
        let trigger = ap.target();
        if trigger != "signal" {
            self.diags
                .error(ap.span, format!("{trigger} is not a supported trigger"));
            return;
        }
        let sig = ap.func();
        if !is_supported_signal(sig) {
            self.diags
                .error(ap.span, format!("{sig} is not a supported signal"));
        }
    }

    fn check_watchpoint(&mut self, ap: &AttachPoint) {
        let spec = ap.target();
        let len = ap.parts.get(1).and_then(|l| l.parse::<u64>().ok());
        let mode = ap.parts.get(2).map(String::as_str).unwrap_or("");

        match len {
            Some(1) | Some(2) | Some(4) | Some(8) => {}
            _ => {
                self.diags.error(
                    ap.span,
                    "watchpoint length must be one of 1, 2, 4, 8".to_string(),
                );
            }
        }
        if !matches!(mode, "w" | "rw" | "x") {
            self.diags
                .error(ap.span, format!("Invalid watchpoint mode: {mode}"));
        }

        let absolute = parse_address(spec);
        match absolute {
            Some(0) => {
                self.diags
                    .error(ap.span, "watchpoint cannot be attached to address 0");
            }
            Some(_) => {
                if ap.probe_type() == ProbeType::AsyncWatchpoint {
                    self.diags.error(
                        ap.span,
                        "asyncwatchpoint cannot be attached to an absolute address",
                    );
                }
            }
            None => {
                // symbolic form: func+argN, resolved against a running process
                if !self.env.has_procmon {
                    self.diags.error(
                        ap.span,
                        "watchpoints on function arguments require a traced process",
                    );
                }
                if let Some(arg) = spec.split('+').nth(1) {
                    let n = arg.trim_start_matches("arg").parse::<u64>().ok();
                    if !matches!(n, Some(0..=5)) {
                        self.diags
                            .error(ap.span, format!("Invalid watchpoint argument: {arg}"));
                    }
                }
            }
        }
    }

    /// Warn when the result of a side-effect-free builtin is discarded.
    fn check_discarded_result(&mut self, expr: &Expr) {
        let ExprKind::Call { name, .. } = &expr.kind else {
            return;
        };
        if calls::PURE_CALLS.contains(&name.as_str()) {
            self.diags.warning(
                expr.span,
                format!("Return value discarded for {name}. It should be used"),
            );
        }
    }
}

pub(crate) fn format_literal(magnitude: u64, negative: bool) -> String {
    if negative {
        format!("-{magnitude}")
    } else {
        format!("{magnitude}")
    }
}

fn parse_address(spec: &str) -> Option<u64> {
    if let Some(hex) = spec.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else {
        spec.parse::<u64>().ok()
    }
}

/// Signal names accepted by `self:signal:` and `signal()`. Lowercase or
/// unknown names are rejected.
pub(crate) fn is_supported_signal(name: &str) -> bool {
    let bare = name.strip_prefix("SIG").unwrap_or(name);
    matches!(
        bare,
        "HUP" | "INT"
            | "QUIT"
            | "ILL"
            | "TRAP"
            | "ABRT"
            | "BUS"
            | "FPE"
            | "KILL"
            | "USR1"
            | "SEGV"
            | "USR2"
            | "PIPE"
            | "ALRM"
            | "TERM"
            | "CHLD"
            | "CONT"
            | "STOP"
    )
}
