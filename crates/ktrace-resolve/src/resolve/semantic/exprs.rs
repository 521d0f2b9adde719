//! Expression typing.
//!
//! `visit_expr` resolves one node; `visit_value` additionally applies the
//! aggregation read rule: a map holding a castable aggregation (count, sum,
//! min, max, avg) reads back as a 64-bit integer wherever a plain value is
//! expected, which needs the per-cpu lookup feature. Non-castable
//! aggregations stay as they are and the consuming context rejects them
//! with its own message.

use ktrace_ast::ast::{
    BinOp, Expr, ExprKind, OffsetofBase, ProbeType, SizeofArg, TypeSpec, UnOp,
};
use ktrace_ast::foundation::{AddrSpace, SizedType, Span, StackMode, TimestampMode, TypeKind};

use super::{format_literal, Analyser};
use crate::resolve::types::{key_unify, resolve_type_spec};

/// Effective signedness of an integer operand: non-negative literals adapt
/// to the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    Signed,
    Unsigned,
    Flexible,
}

fn effective_sign(ty: &SizedType, expr: Option<&Expr>) -> Sign {
    if let Some((_, negative)) = expr.and_then(Expr::as_literal_int) {
        return if negative { Sign::Signed } else { Sign::Flexible };
    }
    if ty.is_signed() {
        Sign::Signed
    } else {
        Sign::Unsigned
    }
}

/// Builtins bound to the probe context; they cannot be read from a
/// for-loop body or a subprogram.
fn is_ctx_builtin(name: &str) -> bool {
    matches!(
        name,
        "args" | "retval" | "func" | "ctx" | "curtask" | "kstack" | "ustack" | "probe"
    ) || name.strip_prefix("sarg").map_or(false, |n| n.parse::<u8>().is_ok())
        || name.strip_prefix("arg").map_or(false, |n| n.parse::<u8>().is_ok())
}

impl Analyser<'_> {
    /// Resolve an expression where a plain value is expected.
    pub(crate) fn visit_value(&mut self, expr: &mut Expr) -> SizedType {
        if expr.is_map() {
            let ty = self.visit_map_read(expr);
            if let Some(kind) = ty.agg_kind() {
                if kind.is_castable() {
                    self.require_percpu_read(expr.span);
                    let int = SizedType::integer(64, kind.read_signed());
                    return self.set_type(expr, int);
                }
            }
            return ty;
        }
        self.visit_expr(expr)
    }

    pub(crate) fn require_percpu_read(&mut self, span: Span) {
        if !self.env.features.map_lookup_percpu_elem {
            self.diags.error(
                span,
                "Missing required kernel feature: map_lookup_percpu_elem",
            );
        }
    }

    pub(crate) fn visit_expr(&mut self, expr: &mut Expr) -> SizedType {
        let span = expr.span;
        let ty = match &mut expr.kind {
            ExprKind::Integer {
                magnitude,
                negative,
            } => {
                if !*negative && *magnitude > i64::MAX as u64 {
                    SizedType::uint64()
                } else {
                    SizedType::int64()
                }
            }
            ExprKind::Str(value) => SizedType::string(value.len() as u64 + 1),
            ExprKind::Bool(_) => SizedType::bool(),
            ExprKind::Builtin(name) => {
                let name = name.clone();
                self.visit_builtin(&name, span)
            }
            ExprKind::Identifier(name) => {
                let name = name.clone();
                self.visit_identifier(&name, span)
            }
            ExprKind::PositionalParam(n) => {
                let n = *n;
                self.visit_positional_param(n, span)
            }
            ExprKind::ParamCount => SizedType::int64(),
            ExprKind::Map { .. } => return self.visit_map_read(expr),
            ExprKind::Variable(name) => {
                let name = name.clone();
                self.visit_variable(&name, span)
            }
            ExprKind::Binop { .. } => return self.visit_binop(expr),
            ExprKind::Unop { .. } => return self.visit_unop(expr),
            ExprKind::Ternary { .. } => return self.visit_ternary(expr),
            ExprKind::Call { .. } => return self.check_call(expr),
            ExprKind::Cast { .. } => return self.visit_cast(expr),
            ExprKind::Tuple(_) => return self.visit_tuple(expr),
            ExprKind::TupleAccess { .. } => return self.visit_tuple_access(expr),
            ExprKind::FieldAccess { .. } => return self.visit_field_access(expr),
            ExprKind::ArrayAccess { .. } => return self.visit_array_access(expr),
            ExprKind::Sizeof(_) => return self.visit_sizeof(expr),
            ExprKind::Offsetof { .. } => return self.visit_offsetof(expr),
            ExprKind::Block { .. } => return self.visit_block_expr(expr),
        };
        self.set_type(expr, ty)
    }

    // -----------------------------------------------------------------
    // Leaves
    // -----------------------------------------------------------------

    fn visit_variable(&mut self, name: &str, span: Span) -> SizedType {
        let Some(info) = self.scopes.lookup(name) else {
            if self.final_pass {
                self.diags
                    .error(span, format!("Undefined or undeclared variable: ${name}"));
            }
            return SizedType::none();
        };
        let ty = info.ty.clone();
        let warn_unassigned = info.let_decl && !info.assigned;
        if warn_unassigned && self.final_pass {
            self.diags
                .warning(span, format!("Variable used before it was assigned: ${name}"));
        }
        if let Some(info) = self.scopes.lookup_mut(name) {
            if !info.assigned {
                info.read_before_assign = true;
            }
        }
        ty
    }

    fn visit_identifier(&mut self, name: &str, span: Span) -> SizedType {
        if self.records.enum_value(name).is_some() {
            return SizedType::uint64();
        }
        if self.final_pass {
            self.diags
                .error(span, format!("Unknown identifier: '{name}'"));
        }
        SizedType::none()
    }

    fn visit_positional_param(&mut self, n: usize, span: Span) -> SizedType {
        let raw = self.env.param(n).to_string();
        if self.in_str_arg {
            return SizedType::string(raw.len() as u64 + 1);
        }
        if raw.is_empty() {
            self.diags.warning(
                span,
                format!("Positional parameter ${n} is empty or not provided."),
            );
            return SizedType::int64();
        }
        match parse_param_int(&raw) {
            Some(_) => SizedType::int64(),
            None => {
                self.diags
                    .error(span, format!("${n} used numerically but given \"{raw}\""));
                SizedType::none()
            }
        }
    }

    fn visit_builtin(&mut self, name: &str, span: Span) -> SizedType {
        if self.for_depth > 0 && is_ctx_builtin(name) {
            self.diags.error(
                span,
                format!("'{name}' builtin is not allowed in a for-loop"),
            );
            return SizedType::none();
        }
        if self.in_subprog() && is_ctx_builtin(name) {
            self.diags
                .error(span, format!("Builtin {name} not supported outside probe"));
            return SizedType::none();
        }

        let probe_ty = self.probe_type();
        match name {
            "pid" | "tid" => SizedType::uint32(),
            "uid" | "gid" | "cgroup" | "elapsed" | "ncpus" | "jiffies" => {
                if name == "jiffies" && !self.env.features.jiffies64 {
                    self.diags.error(
                        span,
                        "BPF_FUNC_jiffies64 not available for your kernel version",
                    );
                }
                SizedType::uint64()
            }
            "nsecs" => SizedType::uint64().with_ts_mode(TimestampMode::Boot),
            "numaid" | "cpu" | "rand" => SizedType::uint32(),
            "cpid" => {
                if !self.env.has_child {
                    self.diags.error(
                        span,
                        "cpid can only be used when a child process is attached",
                    );
                }
                SizedType::uint32()
            }
            "curtask" => {
                SizedType::pointer(SizedType::record("struct task_struct"), AddrSpace::Kernel)
                    .as_ctx()
            }
            "comm" => SizedType::string(16),
            "username" => SizedType::string(self.env.config.max_strlen),
            "kstack" => SizedType::stack(false, self.env.config.stack_mode, 127),
            "ustack" => SizedType::stack(true, self.env.config.stack_mode, 127),
            "probe" => SizedType::string(self.env.config.max_strlen),
            "retval" => self.builtin_retval(span, probe_ty),
            "func" => self.builtin_func(span, probe_ty),
            "args" => self.builtin_args(span, probe_ty),
            "ctx" => self.builtin_ctx(span, probe_ty),
            _ if name.starts_with("sarg") => match probe_ty {
                Some(ProbeType::Kprobe) | None => SizedType::uint64().as_ctx(),
                Some(other) => {
                    self.diags.error(
                        span,
                        format!("The {name} builtin can only be used with 'kprobe' probes ({other} used here)"),
                    );
                    SizedType::none()
                }
            },
            _ if name.starts_with("arg") => match probe_ty {
                Some(
                    ProbeType::Kprobe
                    | ProbeType::Uprobe
                    | ProbeType::Usdt
                    | ProbeType::RawTracepoint
                    | ProbeType::Watchpoint
                    | ProbeType::AsyncWatchpoint,
                )
                | None => SizedType::uint64().as_ctx(),
                Some(other) => {
                    self.diags.error(
                        span,
                        format!(
                            "The {name} builtin can only be used with \
                             'kprobe', 'uprobe' and 'usdt' probes ({other} used here)"
                        ),
                    );
                    SizedType::none()
                }
            },
            _ => {
                if self.final_pass {
                    self.diags
                        .error(span, format!("Unknown identifier: '{name}'"));
                }
                SizedType::none()
            }
        }
    }

    fn builtin_retval(&mut self, span: Span, probe_ty: Option<ProbeType>) -> SizedType {
        match probe_ty {
            Some(ProbeType::Kretprobe | ProbeType::Uretprobe | ProbeType::Fexit) | None => {
                SizedType::uint64().as_ctx()
            }
            Some(other) => {
                self.diags.error(
                    span,
                    format!(
                        "The retval builtin can only be used with 'kretprobe', \
                         'uretprobe' and 'fexit' probes ({other} used here)"
                    ),
                );
                SizedType::none()
            }
        }
    }

    fn builtin_func(&mut self, span: Span, probe_ty: Option<ProbeType>) -> SizedType {
        match probe_ty {
            Some(ProbeType::Kprobe | ProbeType::Uprobe) => SizedType::new(TypeKind::Ksym),
            Some(ProbeType::Kretprobe) => {
                if !self.env.features.get_func_ip {
                    self.diags.error(
                        span,
                        "The 'func' builtin is not available for kretprobes on kernels \
                         without the get_func_ip BPF feature. Consider using the 'probe' \
                         builtin instead.",
                    );
                }
                SizedType::new(TypeKind::Ksym)
            }
            Some(ProbeType::Uretprobe) => {
                if !self.env.features.get_func_ip {
                    self.diags.error(
                        span,
                        "The 'func' builtin is not available for uretprobes on kernels \
                         without the get_func_ip BPF feature. Consider using the 'probe' \
                         builtin instead.",
                    );
                }
                SizedType::new(TypeKind::Usym)
            }
            Some(ProbeType::Fentry | ProbeType::Fexit) => {
                if !self.env.features.get_func_ip {
                    self.diags.error(
                        span,
                        "BPF_FUNC_get_func_ip not available for your kernel version",
                    );
                }
                SizedType::new(TypeKind::Ksym)
            }
            None => SizedType::new(TypeKind::Ksym),
            Some(other) => {
                self.diags.error(
                    span,
                    format!("The func builtin can not be used with {other} probes"),
                );
                SizedType::none()
            }
        }
    }

    fn builtin_args(&mut self, span: Span, probe_ty: Option<ProbeType>) -> SizedType {
        let Some(probe_ty) = probe_ty else {
            return SizedType::none();
        };
        if !self.probe_single_type() {
            self.diags.error(
                span,
                "The args builtin can only be used within the context of a single probe \
                 type, e.g. \"probe1 {args}\" is valid while \"probe1,probe2 {args}\" is not.",
            );
            return SizedType::none();
        }
        if !probe_ty.supports_args() {
            self.diags.error(
                span,
                format!(
                    "The args builtin can only be used with \
                     tracepoint/fentry/uprobe probes ({probe_ty} used here)"
                ),
            );
            return SizedType::none();
        }
        let (target, func) = self.probe_target();
        let record = match probe_ty {
            ProbeType::Tracepoint => format!("struct _tracepoint_{target}_{func}"),
            _ => {
                let name = if func.is_empty() { target } else { func };
                format!("struct {name}_args")
            }
        };
        SizedType::record(record).as_ctx()
    }

    fn builtin_ctx(&mut self, span: Span, probe_ty: Option<ProbeType>) -> SizedType {
        match probe_ty {
            Some(ProbeType::Kprobe | ProbeType::Kretprobe) => {
                SizedType::new(TypeKind::Ctx).as_ctx()
            }
            Some(ProbeType::Iter) => {
                let (target, _) = self.probe_target();
                SizedType::pointer(
                    SizedType::record(format!("struct bpf_iter__{target}")),
                    AddrSpace::Kernel,
                )
                .as_ctx()
            }
            None => SizedType::none(),
            Some(other) => {
                self.diags.error(
                    span,
                    format!("The ctx builtin can not be used with {other} probes"),
                );
                SizedType::none()
            }
        }
    }

    // -----------------------------------------------------------------
    // Maps
    // -----------------------------------------------------------------

    /// Resolve a map read without the aggregation conversion.
    pub(crate) fn visit_map_read(&mut self, expr: &mut Expr) -> SizedType {
        let Some(name) = expr.map_name().map(str::to_string) else {
            return SizedType::none();
        };
        self.check_map_key(expr, false);
        let entry = self.maps.entry(&name, expr.span);
        entry.used = true;
        let ty = entry.value_type.clone();
        let assigned = entry.assigned;
        if self.final_pass && !assigned {
            self.diags.error(expr.span, format!("Undefined map: @{name}"));
        }
        self.set_type(expr, ty)
    }

    /// Validate the key part of a map access: scalarity consistency and key
    /// type agreement, seeding both on first use.
    pub(crate) fn check_map_key(&mut self, map_expr: &mut Expr, _writing: bool) {
        let span = map_expr.span;
        let ExprKind::Map { name, key } = &mut map_expr.kind else {
            return;
        };
        let name = name.clone();
        let has_key = key.is_some();

        let access = match key.as_deref_mut() {
            Some(key_expr) => {
                let kty = self.visit_key_expr(key_expr);
                Some(kty)
            }
            None => None,
        };

        let entry = self.maps.entry(&name, span);
        match entry.scalar {
            None => {
                entry.scalar = Some(!has_key);
                entry.first_use = span;
            }
            Some(true) if has_key => {
                self.diags.error(
                    span,
                    format!(
                        "@{name} used as a map with an explicit key (non-scalar map), \
                         previously used without an explicit key (scalar map)"
                    ),
                );
                return;
            }
            Some(false) if !has_key => {
                self.diags.error(
                    span,
                    format!(
                        "@{name} used as a map without an explicit key (scalar map), \
                         previously used with an explicit key (non-scalar map)"
                    ),
                );
                return;
            }
            Some(_) => {}
        }

        if let Some(kty) = access {
            let key_expr = map_expr_key(map_expr);
            self.unify_key_for(&name, &kty, key_expr, span);
        }
    }

    /// Check one access key type against the stored key type of `name`,
    /// seeding it on first contact. `err_span` points at the access site.
    pub(crate) fn unify_key_for(
        &mut self,
        name: &str,
        access: &SizedType,
        key_expr: Option<&Expr>,
        err_span: Span,
    ) {
        if access.is_none() || contains_none(access) {
            return;
        }
        let previous = self.maps.entry(name, err_span).key_type.clone();
        if previous.is_none() {
            self.maps.entry(name, err_span).key_type = promote_key(access);
            self.type_changed = true;
            return;
        }
        let mut stored = previous.clone();
        if key_unify(&mut stored, access, key_expr) {
            if stored != previous || stored.string_cap() != previous.string_cap() {
                self.maps.entry(name, err_span).key_type = stored;
                self.type_changed = true;
            }
            return;
        }

        let stored = previous;
        if let Some((magnitude, negative)) = key_expr.and_then(Expr::as_literal_int) {
            if stored.is_int() {
                let lit = format_literal(magnitude, negative);
                self.diags.error(
                    err_span,
                    format!(
                        "Argument mismatch for @{name}: trying to access with argument \
                         '{lit}' which does not fit into the map of key type '{stored}'"
                    ),
                );
                return;
            }
        }
        self.diags.error(
            err_span,
            format!(
                "Argument mismatch for @{name}: trying to access with arguments: \
                 '{access}' when map expects arguments: '{stored}'"
            ),
        );
    }

    fn visit_key_expr(&mut self, key: &mut Expr) -> SizedType {
        if let ExprKind::Tuple(elems) = &mut key.kind {
            let mut tys = Vec::with_capacity(elems.len());
            for elem in elems.iter_mut() {
                tys.push(self.visit_key_elem(elem));
            }
            let ty = if tys.iter().any(SizedType::is_none) {
                SizedType::none()
            } else {
                SizedType::tuple(tys)
            };
            return self.set_type(key, ty);
        }
        self.visit_key_elem(key)
    }

    fn visit_key_elem(&mut self, elem: &mut Expr) -> SizedType {
        let ty = self.visit_value(elem);
        if let Some(kind) = ty.agg_kind() {
            // castable aggregations were already converted by visit_value
            debug_assert!(!kind.is_castable());
            self.diags
                .error(elem.span, format!("{ty} cannot be used as a map key"));
            return SizedType::none();
        }
        ty
    }

    // -----------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------

    fn visit_binop(&mut self, expr: &mut Expr) -> SizedType {
        let span = expr.span;
        let ExprKind::Binop { op, lhs, rhs } = &mut expr.kind else {
            return SizedType::none();
        };
        let op = *op;
        let lty = self.visit_value(lhs);
        let rty = self.visit_value(rhs);
        let (lhs_span, rhs_span) = (lhs.span, rhs.span);
        let (lhs_expr, rhs_expr) = (lhs.as_ref().clone(), rhs.as_ref().clone());
        let ty = self.binop_result(
            span,
            op,
            &lty,
            &rty,
            Some(&lhs_expr),
            Some(&rhs_expr),
            lhs_span,
            rhs_span,
        );
        self.set_type(expr, ty)
    }

    /// Result type of `lhs <op> rhs`, with the full coercion rules.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn binop_result(
        &mut self,
        span: Span,
        op: BinOp,
        lty: &SizedType,
        rty: &SizedType,
        lhs_expr: Option<&Expr>,
        rhs_expr: Option<&Expr>,
        lhs_span: Span,
        rhs_span: Span,
    ) -> SizedType {
        if self.in_str_arg {
            // pointer-offset arithmetic on positional parameters inside
            // str()/buf(); sizes are resolved by the runtime
            return SizedType::uint64();
        }
        if lty.is_none() || rty.is_none() {
            return SizedType::none();
        }

        if op.is_logical() {
            let ok = |t: &SizedType| t.is_int() || t.is_bool() || t.is_pointer() || t.is_ctx();
            if ok(lty) && ok(rty) {
                return SizedType::bool();
            }
            return self.binop_mismatch(span, op, lty, rty, lhs_span, rhs_span);
        }

        match (&lty.kind, &rty.kind) {
            (TypeKind::Integer { .. }, TypeKind::Integer { .. }) => {
                self.int_binop(span, op, lty, rty, lhs_expr, rhs_expr)
            }
            (TypeKind::Bool, TypeKind::Bool) => SizedType::uint64(),
            (TypeKind::Bool, TypeKind::Integer { .. })
            | (TypeKind::Integer { .. }, TypeKind::Bool) => SizedType::uint64(),
            (TypeKind::String { cap: lc }, TypeKind::String { cap: rc }) => {
                if !op.is_equality() {
                    return self.binop_mismatch(span, op, lty, rty, lhs_span, rhs_span);
                }
                let (lc, rc) = (*lc, *rc);
                let llit = lhs_expr.and_then(|e| e.as_string_literal().map(str::to_string));
                let rlit = rhs_expr.and_then(|e| e.as_string_literal().map(str::to_string));
                if llit.map(|s| s.len() as u64 + 1 > rc).unwrap_or(false)
                    || rlit.map(|s| s.len() as u64 + 1 > lc).unwrap_or(false)
                {
                    self.diags.warning(
                        span,
                        "the condition is always false: literal is longer than the \
                         compared string",
                    );
                }
                SizedType::uint64()
            }
            (TypeKind::Array { elem: le, len: ll }, TypeKind::Array { elem: re, len: rl }) => {
                if op.is_equality() && le == re && ll == rl {
                    SizedType::uint64()
                } else {
                    self.binop_mismatch(span, op, lty, rty, lhs_span, rhs_span)
                }
            }
            // char arrays compare against strings byte-wise
            (TypeKind::String { .. }, TypeKind::Array { elem, len })
                if op.is_equality() && elem.int_bits() == Some(8) =>
            {
                let len = *len;
                if lhs_expr
                    .and_then(Expr::as_string_literal)
                    .map(|s| s.len() as u64 + 1 > len)
                    .unwrap_or(false)
                {
                    self.diags.warning(
                        span,
                        "the condition is always false: literal is longer than the \
                         compared string",
                    );
                }
                SizedType::uint64()
            }
            (TypeKind::Array { elem, len }, TypeKind::String { .. })
                if op.is_equality() && elem.int_bits() == Some(8) =>
            {
                let len = *len;
                if rhs_expr
                    .and_then(Expr::as_string_literal)
                    .map(|s| s.len() as u64 + 1 > len)
                    .unwrap_or(false)
                {
                    self.diags.warning(
                        span,
                        "the condition is always false: literal is longer than the \
                         compared string",
                    );
                }
                SizedType::uint64()
            }
            (TypeKind::Pointer { pointee: lp, .. }, TypeKind::Pointer { pointee: rp, .. }) => {
                if op.is_comparison() {
                    if lp != rp {
                        self.diags.warning(
                            span,
                            format!("comparison of distinct pointer types: {lp}, {rp}"),
                        );
                    }
                    SizedType::uint64()
                } else if op == BinOp::Sub {
                    // byte-offset difference
                    SizedType::int64()
                } else {
                    self.binop_mismatch(span, op, lty, rty, lhs_span, rhs_span)
                }
            }
            (TypeKind::Pointer { .. }, TypeKind::Integer { .. }) => match op {
                BinOp::Add | BinOp::Sub => lty.clone(),
                _ if op.is_comparison() => SizedType::uint64(),
                _ => self.binop_mismatch(span, op, lty, rty, lhs_span, rhs_span),
            },
            (TypeKind::Integer { .. }, TypeKind::Pointer { .. }) => match op {
                BinOp::Add => rty.clone(),
                _ if op.is_comparison() => SizedType::uint64(),
                _ => self.binop_mismatch(span, op, lty, rty, lhs_span, rhs_span),
            },
            (TypeKind::Ctx, TypeKind::Integer { .. })
            | (TypeKind::Integer { .. }, TypeKind::Ctx) => SizedType::uint64(),
            _ => self.binop_mismatch(span, op, lty, rty, lhs_span, rhs_span),
        }
    }

    fn int_binop(
        &mut self,
        span: Span,
        op: BinOp,
        lty: &SizedType,
        rty: &SizedType,
        lhs_expr: Option<&Expr>,
        rhs_expr: Option<&Expr>,
    ) -> SizedType {
        let lsign = effective_sign(lty, lhs_expr);
        let rsign = effective_sign(rty, rhs_expr);
        let mixed = matches!(
            (lsign, rsign),
            (Sign::Signed, Sign::Unsigned) | (Sign::Unsigned, Sign::Signed)
        );

        if op.is_comparison() {
            if mixed {
                self.diags.warning(
                    span,
                    format!(
                        "comparison of integers of different signs: '{lty}' and '{rty}' \
                         can lead to undefined behavior"
                    ),
                );
            }
            let signed = lsign != Sign::Unsigned && rsign != Sign::Unsigned;
            return SizedType::integer(64, signed);
        }

        if mixed {
            self.diags.warning(
                span,
                format!(
                    "arithmetic on integers of different signs: '{lty}' and '{rty}' \
                     can lead to undefined behavior"
                ),
            );
        }
        if matches!(op, BinOp::Div | BinOp::Mod)
            && (lsign == Sign::Signed || rsign == Sign::Signed)
        {
            self.diags.warning(
                span,
                format!(
                    "signed operands for '{}' can lead to undefined behavior \
                     (cast to unsigned if intended)",
                    op.symbol()
                ),
            );
        }

        let l_lit = lhs_expr.and_then(Expr::as_literal_int).is_some();
        let r_lit = rhs_expr.and_then(Expr::as_literal_int).is_some();
        let bits = match (l_lit, r_lit) {
            (true, true) => 64,
            (true, false) => rty.int_bits().unwrap_or(64),
            (false, true) => lty.int_bits().unwrap_or(64),
            (false, false) => lty
                .int_bits()
                .unwrap_or(64)
                .max(rty.int_bits().unwrap_or(64)),
        };
        let signed = lsign != Sign::Unsigned && rsign != Sign::Unsigned;
        SizedType::integer(bits, signed)
    }

    fn binop_mismatch(
        &mut self,
        span: Span,
        op: BinOp,
        lty: &SizedType,
        rty: &SizedType,
        lhs_span: Span,
        rhs_span: Span,
    ) -> SizedType {
        self.diags.error(
            span,
            format!(
                "Type mismatch for '{}': comparing {lty} with {rty}",
                op.symbol()
            ),
        );
        self.diags.error(lhs_span, format!("left ({lty})"));
        self.diags.error(rhs_span, format!("right ({rty})"));
        SizedType::none()
    }

    fn visit_unop(&mut self, expr: &mut Expr) -> SizedType {
        let span = expr.span;
        let ExprKind::Unop { op, expr: inner } = &mut expr.kind else {
            return SizedType::none();
        };
        let op = *op;

        if matches!(op, UnOp::Increment { .. } | UnOp::Decrement { .. }) {
            let ty = self.visit_step_target(inner, span);
            return self.set_type(expr, ty);
        }

        let ity = self.visit_value(inner);
        if ity.is_none() {
            return self.set_type(expr, SizedType::none());
        }
        let ty = match op {
            UnOp::LNot => {
                if ity.is_bool() {
                    SizedType::bool()
                } else if ity.is_int() {
                    SizedType::uint64()
                } else {
                    self.diags.error(
                        span,
                        format!("The '!' operator can not be used on expressions of type '{ity}'"),
                    );
                    SizedType::none()
                }
            }
            UnOp::BNot => {
                if ity.is_int() {
                    ity.clone()
                } else {
                    self.diags.error(
                        span,
                        format!("The '~' operator can not be used on expressions of type '{ity}'"),
                    );
                    SizedType::none()
                }
            }
            UnOp::Minus => {
                if ity.is_int() {
                    SizedType::integer(ity.int_bits().unwrap_or(64), true)
                } else {
                    self.diags.error(
                        span,
                        format!("The '-' operator can not be used on expressions of type '{ity}'"),
                    );
                    SizedType::none()
                }
            }
            UnOp::Deref => match &ity.kind {
                TypeKind::Pointer { pointee, .. } => {
                    let mut result = pointee.as_ref().clone();
                    if ity.ctx {
                        result = result.as_ctx();
                    }
                    result
                }
                TypeKind::Integer { .. } => SizedType::int64(),
                _ => {
                    self.diags.error(
                        span,
                        format!("Can not dereference an expression of type '{ity}'"),
                    );
                    SizedType::none()
                }
            },
            UnOp::Increment { .. } | UnOp::Decrement { .. } => unreachable!(),
        };
        self.set_type(expr, ty)
    }

    /// `++`/`--` target: a scratch variable or a map, stepping integers and
    /// pointers (pointers step by the pointee size).
    fn visit_step_target(&mut self, inner: &mut Expr, span: Span) -> SizedType {
        match &inner.kind {
            ExprKind::Variable(name) => {
                let name = name.clone();
                if self.scopes.lookup(&name).is_none() {
                    self.diags.error(
                        inner.span,
                        format!("Undefined or undeclared variable: ${name}"),
                    );
                    return SizedType::none();
                }
                let ty = self.visit_variable(&name, inner.span);
                self.set_type(inner, ty.clone());
                if ty.is_none() || ty.is_int() || ty.is_pointer() {
                    ty
                } else {
                    self.diags.error(
                        span,
                        format!(
                            "The '++' and '--' operators can not be used on expressions \
                             of type '{ty}'"
                        ),
                    );
                    SizedType::none()
                }
            }
            ExprKind::Map { .. } => {
                let ty = self.visit_map_read(inner);
                let name = inner.map_name().unwrap_or_default().to_string();
                if ty.is_none() {
                    // `@x++` on a fresh map starts from zero
                    let seeded = SizedType::int64();
                    let map_span = inner.span;
                    self.store_map_value_for_step(&name, map_span, &seeded);
                    return seeded;
                }
                let entry = self.maps.entry(&name, inner.span);
                entry.assigned = true;
                if ty.is_int() || ty.is_pointer() {
                    ty
                } else {
                    self.diags.error(
                        span,
                        format!(
                            "The '++' and '--' operators can not be used on expressions \
                             of type '{ty}'"
                        ),
                    );
                    SizedType::none()
                }
            }
            _ => {
                self.diags.error(
                    span,
                    "The '++' and '--' operators must be applied to a map or variable",
                );
                SizedType::none()
            }
        }
    }

    fn store_map_value_for_step(&mut self, name: &str, span: Span, ty: &SizedType) {
        let entry = self.maps.entry(name, span);
        entry.assigned = true;
        if entry.value_type.is_none() {
            entry.value_type = ty.clone();
            self.type_changed = true;
        }
    }

    fn visit_ternary(&mut self, expr: &mut Expr) -> SizedType {
        let span = expr.span;
        let ExprKind::Ternary { cond, left, right } = &mut expr.kind else {
            return SizedType::none();
        };
        let cty = self.visit_value(cond);
        let cond_span = cond.span;
        let lty = self.visit_value(left);
        let rty = self.visit_value(right);
        self.check_predicate(&cty, cond_span);

        let ty = if lty.is_void() && rty.is_void() {
            SizedType::void()
        } else if lty.is_stack() && rty.is_stack() {
            if lty.kind == rty.kind {
                lty
            } else {
                self.diags.error(
                    span,
                    "Ternary operator must have the same stack type on the right and \
                     left sides.",
                );
                SizedType::none()
            }
        } else {
            match crate::resolve::types::unify(&lty, &rty) {
                Some(ty) => ty,
                None => {
                    self.diags.error(
                        span,
                        format!(
                            "Ternary operator must return the same type: \
                             have '{lty}' and '{rty}'"
                        ),
                    );
                    SizedType::none()
                }
            }
        };
        self.set_type(expr, ty)
    }

    pub(crate) fn check_predicate(&mut self, ty: &SizedType, span: Span) {
        if ty.is_none() || ty.is_void() {
            return;
        }
        if !(ty.is_int() || ty.is_bool() || ty.is_pointer() || ty.is_ctx()) {
            self.diags
                .error(span, format!("Invalid type for predicate: {ty}"));
        }
    }

    // -----------------------------------------------------------------
    // Casts
    // -----------------------------------------------------------------

    fn visit_cast(&mut self, expr: &mut Expr) -> SizedType {
        let span = expr.span;
        let ExprKind::Cast { target, expr: inner } = &mut expr.kind else {
            return SizedType::none();
        };
        let target = target.clone();
        let ity = self.visit_value(inner);
        let inner_lit = inner.as_literal_int();
        let inner_ctx = ity.ctx || ity.is_ctx();
        let ty = self.cast_type(span, &target, &ity, inner_lit);
        let ty = if inner_ctx { ty.as_ctx() } else { ty };
        self.set_type(expr, ty)
    }

    fn cast_type(
        &mut self,
        span: Span,
        target: &TypeSpec,
        ity: &SizedType,
        literal: Option<(u64, bool)>,
    ) -> SizedType {
        match target {
            TypeSpec::Enum(name) => {
                let Some(variants) = self.records.enum_variants(name) else {
                    self.diags.error(span, format!("Unknown enum: {name}"));
                    return SizedType::none();
                };
                if ity.is_string() {
                    self.diags.error(
                        span,
                        format!("Cannot cast from \"{ity}\" to \"enum {name}\""),
                    );
                    return SizedType::none();
                }
                if let Some((magnitude, false)) = literal {
                    if !variants.values().any(|v| *v == magnitude) {
                        self.diags.error(
                            span,
                            format!("Enum: {name} doesn't contain a variant value of {magnitude}"),
                        );
                        return SizedType::none();
                    }
                }
                SizedType::uint64()
            }
            TypeSpec::Record(name) => {
                self.diags
                    .error(span, format!("Cannot cast to \"{name}\""));
                SizedType::none()
            }
            TypeSpec::Pointer(_) => {
                match resolve_type_spec(target, &self.env.config) {
                    Ok(ty) => {
                        // pointer casts are always allowed, but the pointee
                        // record must be known
                        if let Some(pointee) = ty.pointee() {
                            if let Some(name) = pointee.record_name() {
                                if !self.records.contains(name) && self.final_pass {
                                    self.diags.error(
                                        span,
                                        format!("Cannot resolve unknown type \"{name}\""),
                                    );
                                    return SizedType::none();
                                }
                            }
                        }
                        ty
                    }
                    Err(err) => {
                        self.diags.error(
                            span,
                            format!("Cannot resolve unknown type \"{}\"", err.name),
                        );
                        SizedType::none()
                    }
                }
            }
            TypeSpec::Array(elem_spec, len) => {
                self.cast_array(span, target, elem_spec, *len, ity)
            }
            TypeSpec::Ident(name) => match resolve_type_spec(target, &self.env.config) {
                Ok(resolved) if resolved.is_int() => self.cast_int(span, &resolved, ity),
                Ok(resolved) if resolved.is_bool() => {
                    if ity.is_none()
                        || ity.is_int()
                        || ity.is_bool()
                        || ity.is_string()
                        || ity.is_pointer()
                    {
                        SizedType::bool()
                    } else {
                        self.diags
                            .error(span, format!("Cannot cast from \"{ity}\" to \"bool\""));
                        SizedType::none()
                    }
                }
                Ok(_) => {
                    self.diags
                        .error(span, format!("Cannot cast to \"{name}\""));
                    SizedType::none()
                }
                Err(err) => {
                    self.diags.error(
                        span,
                        format!("Cannot resolve unknown type \"{}\"", err.name),
                    );
                    let diag = self
                        .diags
                        .error(span, format!("Cannot cast to \"{}\"", err.name));
                    if let Some(suggestion) = err.suggestion {
                        diag.hint(format!("Did you mean \"{suggestion}\"?"));
                    }
                    SizedType::none()
                }
            },
        }
    }

    fn cast_int(&mut self, span: Span, target: &SizedType, ity: &SizedType) -> SizedType {
        match &ity.kind {
            TypeKind::None
            | TypeKind::Integer { .. }
            | TypeKind::Bool
            | TypeKind::Pointer { .. }
            | TypeKind::Ctx => target.clone(),
            TypeKind::Array { elem, len } => {
                let elem_bits = u64::from(elem.int_bits().unwrap_or(8));
                let total = elem_bits * len;
                if elem.is_int() && total == u64::from(target.int_bits().unwrap_or(64)) {
                    target.clone()
                } else {
                    self.diags.error(
                        span,
                        format!("Cannot cast from \"{ity}\" to \"{target}\""),
                    );
                    SizedType::none()
                }
            }
            TypeKind::Record { name } => {
                self.diags
                    .error(span, format!("Cannot cast from struct type \"{name}\""));
                self.diags.error(
                    span,
                    format!("Cannot cast from \"{name}\" to \"{target}\""),
                );
                SizedType::none()
            }
            _ => {
                self.diags.error(
                    span,
                    format!("Cannot cast from \"{ity}\" to \"{target}\""),
                );
                SizedType::none()
            }
        }
    }

    fn cast_array(
        &mut self,
        span: Span,
        target: &TypeSpec,
        elem_spec: &TypeSpec,
        len: Option<u64>,
        ity: &SizedType,
    ) -> SizedType {
        let elem = match resolve_type_spec(elem_spec, &self.env.config) {
            Ok(elem) if elem.is_int() || elem.is_bool() => elem,
            _ => {
                self.diags.error(
                    span,
                    format!("Cannot cast to \"{}\"", target.display_name()),
                );
                return SizedType::none();
            }
        };
        if ity.is_none() {
            return SizedType::none();
        }
        let Some(src_bits) = ity.int_bits().map(u64::from) else {
            self.diags.error(
                span,
                format!(
                    "Cannot cast from \"{ity}\" to \"{}\"",
                    target.display_name()
                ),
            );
            return SizedType::none();
        };
        let elem_bits = u64::from(elem.int_bits().unwrap_or(8));
        let len = match len {
            Some(len) => len,
            None => {
                if src_bits % elem_bits == 0 && src_bits / elem_bits > 0 {
                    src_bits / elem_bits
                } else {
                    self.diags.error(
                        span,
                        format!(
                            "Cannot cast from \"{ity}\" to \"{}\"",
                            target.display_name()
                        ),
                    );
                    return SizedType::none();
                }
            }
        };
        if elem_bits * len != src_bits {
            self.diags.error(
                span,
                format!(
                    "Cannot cast from \"{ity}\" to \"{}\"",
                    target.display_name()
                ),
            );
            return SizedType::none();
        }
        SizedType::array(elem, len)
    }

    // -----------------------------------------------------------------
    // Compound values
    // -----------------------------------------------------------------

    fn visit_tuple(&mut self, expr: &mut Expr) -> SizedType {
        let ExprKind::Tuple(elems) = &mut expr.kind else {
            return SizedType::none();
        };
        let mut tys = Vec::with_capacity(elems.len());
        let mut pending = false;
        let mut errors = Vec::new();
        for elem in elems.iter_mut() {
            let ty = self.visit_value(elem);
            if ty.agg_kind().is_some() {
                errors.push((elem.span, format!("Map type {ty} cannot exist inside a tuple.")));
                pending = true;
            } else if ty.is_none() || ty.is_void() {
                pending = true;
            }
            tys.push(ty);
        }
        for (span, msg) in errors {
            self.diags.error(span, msg);
        }
        let ty = if pending {
            SizedType::none()
        } else {
            SizedType::tuple(tys)
        };
        self.set_type(expr, ty)
    }

    fn visit_tuple_access(&mut self, expr: &mut Expr) -> SizedType {
        let span = expr.span;
        let ExprKind::TupleAccess { expr: base, index } = &mut expr.kind else {
            return SizedType::none();
        };
        let index = *index;
        let bty = self.visit_value(base);
        if bty.is_none() {
            return self.set_type(expr, SizedType::none());
        }
        let ty = match bty.tuple_fields() {
            Some(fields) if index < fields.len() => fields[index].clone(),
            _ => {
                self.diags.error(
                    span,
                    format!("Can not access index '{index}' on expression of type '{bty}'"),
                );
                SizedType::none()
            }
        };
        self.set_type(expr, ty)
    }

    fn visit_field_access(&mut self, expr: &mut Expr) -> SizedType {
        let span = expr.span;
        let ExprKind::FieldAccess {
            expr: base,
            field,
            arrow,
        } = &mut expr.kind
        else {
            return SizedType::none();
        };
        let field = field.clone();
        let arrow = *arrow;
        let args_base = matches!(&base.kind, ExprKind::Builtin(name) if name == "args");
        let bty = self.visit_value(base);
        if bty.is_none() {
            return self.set_type(expr, SizedType::none());
        }

        let record_name = if args_base {
            // `args.x` and the legacy `args->x` both resolve on the record
            bty.record_name().map(str::to_string)
        } else if arrow {
            match &bty.kind {
                TypeKind::Pointer { pointee, .. } => match pointee.record_name() {
                    Some(name) => Some(name.to_string()),
                    None => {
                        self.diags.error(
                            span,
                            format!("Can not access field '{field}' on expression of type '{bty}'"),
                        );
                        None
                    }
                },
                _ => {
                    self.diags.error(
                        span,
                        format!("Can not access field '{field}' on expression of type '{bty}'"),
                    );
                    None
                }
            }
        } else {
            match &bty.kind {
                TypeKind::Record { name } => Some(name.clone()),
                TypeKind::Pointer { .. } => {
                    self.diags.error(
                        span,
                        format!(
                            "Can not access field '{field}' on a pointer of type '{bty}'; \
                             use '->' instead"
                        ),
                    );
                    None
                }
                _ => {
                    self.diags.error(
                        span,
                        format!("Can not access field '{field}' on expression of type '{bty}'"),
                    );
                    None
                }
            }
        };

        let Some(record_name) = record_name else {
            return self.set_type(expr, SizedType::none());
        };

        let probe_ty = self.probe_type();
        let fn_args_probe = matches!(
            probe_ty,
            Some(ProbeType::Fentry | ProbeType::Fexit | ProbeType::RawTracepoint)
        );

        let field_ty = match self.records.get(&record_name) {
            Some(record) => match record.field(&field) {
                Some(f) => Some(f.ty.clone()),
                None => {
                    if args_base && fn_args_probe {
                        self.diags
                            .error(base.span, format!("Can't find function parameter {field}"));
                    } else {
                        self.diags.error(
                            span,
                            format!("'{record_name}' has no field named '{field}'"),
                        );
                    }
                    None
                }
            },
            None => {
                if args_base && fn_args_probe {
                    self.diags
                        .error(base.span, format!("Can't find function parameter {field}"));
                } else if self.final_pass {
                    self.diags.error(
                        span,
                        format!("Cannot resolve unknown type \"{record_name}\""),
                    );
                }
                None
            }
        };

        let ty = match field_ty {
            Some(mut ty) => {
                if bty.ctx {
                    ty = ty.as_ctx();
                }
                ty
            }
            None => SizedType::none(),
        };
        self.set_type(expr, ty)
    }

    fn visit_array_access(&mut self, expr: &mut Expr) -> SizedType {
        let span = expr.span;
        let ExprKind::ArrayAccess { expr: base, index } = &mut expr.kind else {
            return SizedType::none();
        };
        let bty = self.visit_value(base);
        let ity = self.visit_value(index);
        let idx_literal = match &index.kind {
            ExprKind::Integer { .. } => index.as_literal_int(),
            ExprKind::PositionalParam(n) => {
                parse_param_int(self.env.param(*n)).map(|v| (v.unsigned_abs(), v < 0))
            }
            _ => None,
        };

        if bty.is_none() {
            return self.set_type(expr, SizedType::none());
        }
        let ty = match &bty.kind {
            TypeKind::Array { elem, len } => {
                let len = *len;
                let elem = elem.as_ref().clone();
                match idx_literal {
                    Some((magnitude, false)) if magnitude < len => elem,
                    Some((magnitude, negative)) => {
                        let lit = format_literal(magnitude, negative);
                        self.diags.error(
                            span,
                            format!("Index {lit} out of bounds for array of size {len}"),
                        );
                        SizedType::none()
                    }
                    None => {
                        self.diags.error(
                            span,
                            "Array index must be an integer literal or positional parameter",
                        );
                        SizedType::none()
                    }
                }
            }
            TypeKind::Pointer { pointee, .. } => {
                if !ity.is_none() && !ity.is_int() {
                    self.diags.error(
                        span,
                        format!("Array index must be an integer, got '{ity}'"),
                    );
                    SizedType::none()
                } else {
                    let mut elem = pointee.as_ref().clone();
                    if bty.ctx {
                        elem = elem.as_ctx();
                    }
                    elem
                }
            }
            _ => {
                self.diags.error(
                    span,
                    format!("Can not index an expression of type '{bty}'"),
                );
                SizedType::none()
            }
        };
        let ty = if bty.ctx && !ty.is_none() {
            ty.as_ctx()
        } else {
            ty
        };
        self.set_type(expr, ty)
    }

    fn visit_sizeof(&mut self, expr: &mut Expr) -> SizedType {
        let span = expr.span;
        let ExprKind::Sizeof(arg) = &mut expr.kind else {
            return SizedType::none();
        };
        match arg {
            SizeofArg::Type(spec) => {
                let spec = spec.clone();
                match resolve_type_spec(&spec, &self.env.config) {
                    Ok(ty) => self.require_sized(&ty, span),
                    Err(err) => {
                        self.diags.error(
                            span,
                            format!("Cannot resolve unknown type \"{}\"", err.name),
                        );
                    }
                }
            }
            SizeofArg::Expr(inner) => {
                self.visit_value(inner);
            }
        }
        self.set_type(expr, SizedType::uint64())
    }

    fn require_sized(&mut self, ty: &SizedType, span: Span) {
        if let Some(name) = ty.record_name() {
            if !self.records.contains(name) && self.final_pass {
                self.diags
                    .error(span, format!("Cannot resolve unknown type \"{name}\""));
            }
        }
    }

    fn visit_offsetof(&mut self, expr: &mut Expr) -> SizedType {
        let span = expr.span;
        let ExprKind::Offsetof { base, path } = &mut expr.kind else {
            return SizedType::none();
        };
        let path = path.clone();
        let record_name = match base {
            OffsetofBase::Type(spec) => match spec {
                TypeSpec::Record(name) => Some(name.clone()),
                other => {
                    self.diags.error(
                        span,
                        format!("'{}' is not a record type.", other.display_name()),
                    );
                    None
                }
            },
            OffsetofBase::Expr(inner) => {
                let bty = self.visit_value(inner);
                match bty.record_name() {
                    Some(name) => Some(name.to_string()),
                    None => {
                        if !bty.is_none() {
                            self.diags
                                .error(span, format!("'{bty}' is not a record type."));
                        }
                        None
                    }
                }
            }
        };

        if let Some(mut current) = record_name {
            for field in &path {
                let Some(record) = self.records.get(&current) else {
                    if self.final_pass {
                        self.diags.error(
                            span,
                            format!("Cannot resolve unknown type \"{current}\""),
                        );
                    }
                    break;
                };
                let Some(found) = record.field(field) else {
                    self.diags.error(
                        span,
                        format!("'{current}' has no field named '{field}'"),
                    );
                    break;
                };
                match found.ty.record_name() {
                    Some(name) => current = name.to_string(),
                    None => {
                        if found.ty.is_pointer() || !found.ty.is_record() {
                            // a non-record leaf is fine at the end of the
                            // path but cannot be descended into
                            if field != path.last().expect("non-empty path") {
                                self.diags.error(
                                    span,
                                    format!("'{}' is not a record type.", found.ty),
                                );
                                break;
                            }
                        }
                        break;
                    }
                }
            }
        }
        self.set_type(expr, SizedType::uint64())
    }

    fn visit_block_expr(&mut self, expr: &mut Expr) -> SizedType {
        let ExprKind::Block { stmts, tail } = &mut expr.kind else {
            return SizedType::none();
        };
        self.scopes.push();
        let mut block = ktrace_ast::ast::Block::new(std::mem::take(stmts), expr.span);
        self.visit_block_stmts(&mut block);
        *stmts = block.stmts;
        let ty = match tail {
            Some(tail) => self.visit_value(tail),
            None => SizedType::void(),
        };
        self.leave_scope();
        self.set_type(expr, ty)
    }
}

/// Extract the key expression of a map node, when present.
fn map_expr_key(map_expr: &Expr) -> Option<&Expr> {
    match &map_expr.kind {
        ExprKind::Map { key, .. } => key.as_deref(),
        _ => None,
    }
}

/// `none` anywhere in a composite type means inference is still pending.
fn contains_none(ty: &SizedType) -> bool {
    match &ty.kind {
        TypeKind::None => true,
        TypeKind::Tuple { fields } => fields.iter().any(contains_none),
        _ => false,
    }
}

fn promote_key(ty: &SizedType) -> SizedType {
    match &ty.kind {
        TypeKind::Integer { .. } => ty.promoted(),
        _ => ty.clone(),
    }
}

/// Parse a positional parameter as an integer. Deliberately strict:
/// values with surprising leading zeros do not count as numbers.
pub(crate) fn parse_param_int(raw: &str) -> Option<i64> {
    if let Some(hex) = raw.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).ok();
    }
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    raw.parse::<i64>().ok()
}

/// Stack mode identifiers accepted by `kstack()`/`ustack()`.
pub(crate) fn stack_mode_from_expr(expr: &Expr) -> Option<StackMode> {
    match &expr.kind {
        ExprKind::Identifier(name) => StackMode::from_ident(name),
        _ => None,
    }
}
