//! Builtin call checkers.
//!
//! One entry per builtin: arity, per-argument constraints, probe-family
//! domain, feature gates and the assignment constraint shared by the
//! aggregation constructors ("must be assigned directly to a map").

use ktrace_ast::ast::{Expr, ExprKind, ProbeType};
use ktrace_ast::foundation::{AddrSpace, AggKind, SizedType, Span, TimestampMode, TypeKind};

use super::exprs::{parse_param_int, stack_mode_from_expr};
use super::{is_supported_signal, Analyser};

/// Side-effect-free builtins whose discarded results deserve a warning.
pub(crate) const PURE_CALLS: &[&str] = &[
    "bswap",
    "buf",
    "cgroup_path",
    "cgroupid",
    "has_key",
    "kaddr",
    "kptr",
    "ksym",
    "kstack",
    "len",
    "macaddr",
    "ntop",
    "nsecs",
    "path",
    "percpu_kaddr",
    "pid",
    "pton",
    "reg",
    "str",
    "strcontains",
    "strerror",
    "strftime",
    "strncmp",
    "tid",
    "uaddr",
    "uptr",
    "ustack",
    "usym",
];

/// Aggregation constructors; only valid as the direct RHS of a map
/// assignment.
fn agg_ctor(name: &str) -> bool {
    matches!(
        name,
        "hist" | "lhist" | "tseries" | "count" | "sum" | "min" | "max" | "avg" | "stats"
    )
}

impl Analyser<'_> {
    pub(crate) fn check_call(&mut self, expr: &mut Expr) -> SizedType {
        let span = expr.span;
        let direct_map_assign = std::mem::take(&mut self.map_assign_rhs);
        let ExprKind::Call { name, args } = &mut expr.kind else {
            return SizedType::none();
        };
        let name = name.clone();
        let mut args = std::mem::take(args);

        let ty = self.dispatch_call(&name, span, &mut args, direct_map_assign);

        if let ExprKind::Call { args: slot, .. } = &mut expr.kind {
            *slot = args;
        }
        self.set_type(expr, ty)
    }

    fn dispatch_call(
        &mut self,
        name: &str,
        span: Span,
        args: &mut [Expr],
        direct_map_assign: bool,
    ) -> SizedType {
        if agg_ctor(name) && !direct_map_assign {
            self.diags.error(
                span,
                format!("{name}() must be assigned directly to a map"),
            );
            // still walk the arguments so nested mistakes surface
            for arg in args.iter_mut() {
                self.visit_value(arg);
            }
            return SizedType::none();
        }

        match name {
            "hist" => self.call_hist(span, args),
            "lhist" => self.call_lhist(span, args),
            "tseries" => self.call_tseries(span, args),
            "count" => self.call_count(span, args),
            "sum" | "min" | "max" | "avg" | "stats" => self.call_agg(name, span, args),
            "delete" => self.call_delete(span, args),
            "print" => self.call_print(span, args),
            "clear" | "zero" => self.call_clear_zero(name, span, args),
            "len" => self.call_len(span, args),
            "has_key" => self.call_has_key(span, args),
            "exit" => self.call_exit(span, args),
            "printf" | "debugf" => self.call_printf(name, span, args),
            "system" => self.call_system(span, args),
            "cat" => self.call_cat(span, args),
            "time" => self.call_time(span, args),
            "join" => self.call_join(span, args),
            "str" => self.call_str(span, args),
            "buf" => self.call_buf(span, args),
            "ksym" | "usym" => self.call_sym(name, span, args),
            "kaddr" => self.call_kaddr(span, args),
            "uaddr" => self.call_uaddr(span, args),
            "cgroupid" => self.call_cgroupid(span, args),
            "cgroup_path" => self.call_cgroup_path(span, args),
            "strerror" => self.call_strerror(span, args),
            "strftime" => self.call_strftime(span, args),
            "nsecs" => self.call_nsecs(span, args),
            "pid" | "tid" => self.call_pid_tid(name, span, args),
            "kstack" | "ustack" => self.call_stack(name, span, args),
            "signal" => self.call_signal(span, args),
            "override" => self.call_override(span, args),
            "unwatch" => self.call_unwatch(span, args),
            "ntop" => self.call_ntop(span, args),
            "pton" => self.call_pton(span, args),
            "strncmp" => self.call_strncmp(span, args),
            "strcontains" => self.call_strcontains(span, args),
            "bswap" => self.call_bswap(span, args),
            "macaddr" => self.call_macaddr(span, args),
            "kptr" | "uptr" => self.call_ptr_tag(name, span, args),
            "path" => self.call_path(span, args),
            "skboutput" => self.call_skboutput(span, args),
            "socket_cookie" => self.call_socket_cookie(span, args),
            "percpu_kaddr" => self.call_percpu_kaddr(span, args),
            "reg" => self.call_reg(span, args),
            _ => {
                if self.final_pass {
                    self.diags
                        .error(span, format!("Unknown function: {name}"));
                }
                SizedType::none()
            }
        }
    }

    // -----------------------------------------------------------------
    // Arity helpers
    // -----------------------------------------------------------------

    fn require_exact(&mut self, name: &str, span: Span, args: &[Expr], n: usize) -> bool {
        if args.len() != n {
            let noun = plural_args(n);
            self.diags.error(
                span,
                format!("{name}() requires {noun} ({} provided)", args.len()),
            );
            return false;
        }
        true
    }

    fn require_at_least(&mut self, name: &str, span: Span, args: &[Expr], n: usize) -> bool {
        if args.len() < n {
            let noun = plural_args_at_least(n);
            self.diags.error(
                span,
                format!("{name}() requires at least {noun} ({} provided)", args.len()),
            );
            return false;
        }
        true
    }

    fn require_up_to(&mut self, name: &str, span: Span, args: &[Expr], n: usize) -> bool {
        if args.len() > n {
            let noun = plural_args(n);
            self.diags.error(
                span,
                format!("{name}() takes up to {noun} ({} provided)", args.len()),
            );
            return false;
        }
        true
    }

    /// Restrict a call to a set of probe families.
    fn require_probe_family(&mut self, name: &str, span: Span, allowed: &[ProbeType]) -> bool {
        let Some(probe_ty) = self.probe_type() else {
            return true;
        };
        if allowed.contains(&probe_ty) {
            return true;
        }
        self.diags.error(
            span,
            format!("{name} can not be used with \"{probe_ty}\" probes"),
        );
        false
    }

    /// Literal integer argument, allowing numeric positional parameters.
    /// Emits no diagnostics; callers decide how strict to be.
    fn literal_int(&mut self, expr: &mut Expr) -> Option<i64> {
        let value = match &expr.kind {
            ExprKind::Integer {
                magnitude,
                negative,
            } => {
                let v = *magnitude as i64;
                Some(if *negative { -v } else { v })
            }
            ExprKind::PositionalParam(n) => parse_param_int(self.env.param(*n)),
            ExprKind::ParamCount => Some(self.env.params.len() as i64),
            _ => None,
        };
        if value.is_some() {
            self.set_type(expr, SizedType::int64());
        }
        value
    }

    fn string_literal(&self, expr: &Expr) -> Option<String> {
        match &expr.kind {
            ExprKind::Str(s) => Some(s.clone()),
            ExprKind::PositionalParam(n) => Some(self.env.param(*n).to_string()),
            _ => None,
        }
    }

    /// A whole-map argument (`print(@x)` and friends): must be an unkeyed
    /// map; marks it used and reports undefined maps at the call site.
    fn whole_map_arg(
        &mut self,
        expr: &mut Expr,
        call_span: Span,
    ) -> Option<(String, SizedType, Option<bool>)> {
        let ExprKind::Map { name, key: None } = &expr.kind else {
            return None;
        };
        let name = name.clone();
        let entry = self.maps.entry(&name, expr.span);
        entry.used = true;
        let value_ty = entry.value_type.clone();
        let scalar = entry.scalar;
        let assigned = entry.assigned;
        if self.final_pass && !assigned {
            self.diags
                .error(call_span, format!("Undefined map: @{name}"));
        }
        self.set_type(expr, value_ty.clone());
        Some((name, value_ty, scalar))
    }

    // -----------------------------------------------------------------
    // Aggregation constructors
    // -----------------------------------------------------------------

    fn call_hist(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_at_least("hist", span, args, 1) || !self.require_up_to("hist", span, args, 2)
        {
            return SizedType::agg(AggKind::Hist);
        }
        let vty = self.visit_value(&mut args[0]);
        if !vty.is_none() && !vty.is_int() {
            self.diags
                .error(span, format!("hist() expects an integer ({vty} provided)"));
        }
        if let Some(bits_arg) = args.get_mut(1) {
            match self.literal_int(bits_arg) {
                Some(bits) if (0..=5).contains(&bits) => {}
                Some(bits) => {
                    self.diags
                        .error(span, format!("hist: bits {bits} must be 0..5"));
                }
                None => {
                    self.visit_value(bits_arg);
                    self.diags
                        .error(span, "hist() expects a int literal (int provided)");
                }
            }
        }
        SizedType::agg(AggKind::Hist)
    }

    fn call_lhist(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if args.len() != 4 {
            self.diags.error(
                span,
                format!("lhist() requires 4 arguments ({} provided)", args.len()),
            );
            return SizedType::agg(AggKind::Lhist);
        }
        let vty = self.visit_value(&mut args[0]);
        if !vty.is_none() && !vty.is_int() {
            self.diags
                .error(span, format!("lhist() expects an integer ({vty} provided)"));
        }
        let names = ["min", "max", "step"];
        let mut values = [0i64; 3];
        for (i, label) in names.iter().enumerate() {
            match self.literal_int(&mut args[i + 1]) {
                Some(v) if v >= 0 => values[i] = v,
                _ => {
                    self.visit_value(&mut args[i + 1]);
                    self.diags.error(
                        span,
                        format!("lhist: invalid {label} value (must be non-negative literal)"),
                    );
                    return SizedType::agg(AggKind::Lhist);
                }
            }
        }
        if values[1] <= values[0] {
            self.diags
                .error(span, "lhist: max must be larger than min");
        }
        SizedType::agg(AggKind::Lhist)
    }

    fn call_tseries(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_at_least("tseries", span, args, 3)
            || !self.require_up_to("tseries", span, args, 4)
        {
            return SizedType::agg(AggKind::Tseries);
        }
        let vty = self.visit_value(&mut args[0]);
        if !vty.is_none() && !vty.is_int() {
            self.diags.error(
                span,
                format!("tseries() expects an integer ({vty} provided)"),
            );
        }

        let interval = self.duration_literal(&mut args[1]);
        match interval {
            Some(ns) if ns >= 1 => {}
            Some(ns) if ns >= 0 => {
                self.diags.error(
                    span,
                    format!("tseries() interval_ns must be >= 1 ({ns} provided)"),
                );
            }
            _ => {
                self.diags.error(
                    span,
                    "tseries: invalid interval_ns value (must be non-negative literal)",
                );
            }
        }

        match self.literal_int(&mut args[2]) {
            Some(n) if n >= 1 && n < 1_000_000 => {}
            Some(n) if n >= 1_000_000 => {
                self.diags.error(
                    span,
                    format!("tseries() num_intervals must be < 1000000 ({n} provided)"),
                );
            }
            Some(n) if n >= 0 => {
                self.diags.error(
                    span,
                    format!("tseries() num_intervals must be >= 1 ({n} provided)"),
                );
            }
            _ => {
                self.diags.error(
                    span,
                    "tseries: invalid num_intervals value (must be non-negative literal)",
                );
            }
        }

        if let Some(agg_arg) = args.get_mut(3) {
            match self.string_literal(agg_arg) {
                Some(agg) if matches!(agg.as_str(), "avg" | "max" | "min" | "sum") => {
                    self.set_type(agg_arg, SizedType::string(agg.len() as u64 + 1));
                }
                Some(agg) => {
                    self.diags.error(
                        span,
                        format!(
                            "tseries() expects one of the following aggregation functions: \
                             avg, max, min, sum (\"{agg}\" provided)"
                        ),
                    );
                }
                None => {
                    self.diags.error(
                        span,
                        "tseries() aggregation function must be a string literal",
                    );
                }
            }
        }
        SizedType::agg(AggKind::Tseries)
    }

    /// A duration literal folded to nanoseconds, or a positional parameter
    /// with a `ns`/`us`/`ms`/`s` suffix.
    fn duration_literal(&mut self, expr: &mut Expr) -> Option<i64> {
        if let ExprKind::PositionalParam(n) = &expr.kind {
            let raw = self.env.param(*n).to_string();
            let ns = parse_duration(&raw);
            if ns.is_some() {
                self.set_type(expr, SizedType::int64());
            }
            return ns;
        }
        self.literal_int(expr)
    }

    fn call_count(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !args.is_empty() {
            self.diags.error(
                span,
                format!("count() takes no arguments ({} provided)", args.len()),
            );
        }
        SizedType::agg(AggKind::Count)
    }

    fn call_agg(&mut self, name: &str, span: Span, args: &mut [Expr]) -> SizedType {
        let signed = if self.require_exact(name, span, args, 1) {
            let vty = self.visit_value(&mut args[0]);
            if !vty.is_none() && !vty.is_int() {
                self.diags.error(
                    span,
                    format!("{name}() expects an integer ({vty} provided)"),
                );
            }
            // non-negative literals aggregate unsigned
            match args[0].as_literal_int() {
                Some((_, negative)) => negative,
                None => vty.is_signed(),
            }
        } else {
            false
        };
        let kind = match name {
            "sum" => AggKind::Sum { signed },
            "min" => AggKind::Min { signed },
            "max" => AggKind::Max { signed },
            "avg" => AggKind::Avg { signed },
            _ => AggKind::Stats { signed },
        };
        SizedType::agg(kind)
    }

    // -----------------------------------------------------------------
    // Map builtins
    // -----------------------------------------------------------------

    fn call_delete(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if args.is_empty() || args.len() > 2 {
            self.diags.error(
                span,
                format!("delete() requires 1 or 2 arguments ({} provided)", args.len()),
            );
            return SizedType::uint64();
        }

        if args.len() == 2 {
            let ExprKind::Map { name, key: None } = &args[0].kind else {
                self.diags.error(span, "delete() expects a map argument");
                return SizedType::uint64();
            };
            let name = name.clone();
            let entry = self.maps.entry(&name, args[0].span);
            entry.used = true;
            let scalar = entry.scalar;
            if scalar == Some(true) {
                self.diags.error(
                    span,
                    "call to delete() expects a map with explicit keys (non-scalar map)",
                );
                return SizedType::uint64();
            }
            let (key_ty, key_span) = {
                let key_expr = &mut args[1];
                let kty = self.visit_key_arg(key_expr);
                (kty, key_expr.span)
            };
            if !key_ty.is_none() {
                let key_snapshot = args[1].clone();
                self.unify_key_for(&name, &key_ty, Some(&key_snapshot), key_span);
            }
            return SizedType::uint64();
        }

        // single-argument form: scalar delete or the legacy keyed delete
        match &args[0].kind {
            ExprKind::Map { name, key } => {
                let name = name.clone();
                let keyed = key.is_some();
                let scalar = self.maps.entry(&name, args[0].span).scalar;
                match (keyed, scalar) {
                    (false, Some(false)) => {
                        self.maps.entry(&name, args[0].span).used = true;
                        self.diags.error(
                            span,
                            "call to delete() expects a map without explicit keys (scalar map)",
                        );
                    }
                    (true, Some(true)) => {
                        self.maps.entry(&name, args[0].span).used = true;
                        self.diags.error(
                            span,
                            "call to delete() expects a map with explicit keys (non-scalar map)",
                        );
                    }
                    _ => {
                        self.visit_map_read(&mut args[0]);
                    }
                }
            }
            _ => {
                self.visit_value(&mut args[0]);
                self.diags.error(span, "delete() expects a map argument");
            }
        }
        SizedType::uint64()
    }

    /// Visit a key argument of `delete`/`has_key` the way inline map keys
    /// are visited.
    fn visit_key_arg(&mut self, key: &mut Expr) -> SizedType {
        if let ExprKind::Tuple(elems) = &mut key.kind {
            let mut tys = Vec::with_capacity(elems.len());
            for elem in elems.iter_mut() {
                tys.push(self.visit_value(elem));
            }
            let ty = if tys.iter().any(SizedType::is_none) {
                SizedType::none()
            } else {
                SizedType::tuple(tys)
            };
            return self.set_type(key, ty);
        }
        self.visit_value(key)
    }

    fn call_print(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if args.is_empty() {
            self.diags
                .error(span, "print() requires at least one argument (0 provided)");
            return SizedType::void();
        }

        let is_whole_map = matches!(&args[0].kind, ExprKind::Map { key: None, .. });
        if is_whole_map {
            if args.len() > 3 {
                self.diags.error(
                    span,
                    format!("print() takes up to 3 arguments ({} provided)", args.len()),
                );
            }
            let info = {
                let (first, rest) = args.split_at_mut(1);
                let info = self.whole_map_arg(&mut first[0], span);
                for arg in rest {
                    self.visit_value(arg);
                }
                info
            };
            if let Some((_, value_ty, _)) = info {
                if let Some(kind) = value_ty.agg_kind() {
                    if !kind.is_castable() && args.len() > 1 {
                        self.diags
                            .warning(span, "top and div arguments are ignored");
                    }
                }
            }
            if self.loop_depth > 0 {
                self.diags.warning(
                    span,
                    "using 'print()' in a loop can lead to out-of-order or dropped output",
                );
            }
            return SizedType::void();
        }

        if args.len() > 1 {
            self.diags.error(
                span,
                format!("Non-map print() only takes 1 argument, {} found", args.len()),
            );
        }

        // keyed map element: aggregations print per-map, not per-key
        if args[0].is_map() {
            let ty = self.visit_map_read(&mut args[0]);
            if let Some(kind) = ty.agg_kind() {
                if kind.is_castable() {
                    self.require_percpu_read(span);
                } else {
                    self.diags.error(
                        span,
                        format!(
                            "Map type {ty} cannot print the value of individual keys. \
                             You must print the whole map."
                        ),
                    );
                }
            }
            return SizedType::void();
        }

        let ty = self.visit_value(&mut args[0]);
        if ty.is_ctx() || ty.is_void() {
            self.diags
                .error(span, format!("Invalid expression for print(): {ty}"));
        }
        SizedType::void()
    }

    fn call_clear_zero(&mut self, name: &str, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact(name, span, args, 1) {
            return SizedType::void();
        }
        if self.whole_map_arg(&mut args[0], span).is_none() {
            self.visit_value(&mut args[0]);
            self.diags
                .error(span, format!("{name}() expects a map argument"));
        }
        SizedType::void()
    }

    fn call_len(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact("len", span, args, 1) {
            return SizedType::int64();
        }
        if matches!(&args[0].kind, ExprKind::Builtin(name) if name == "kstack" || name == "ustack")
        {
            self.visit_value(&mut args[0]);
            return SizedType::int64();
        }
        if let ExprKind::Call { name, .. } = &args[0].kind {
            if name == "kstack" || name == "ustack" {
                self.visit_value(&mut args[0]);
                return SizedType::int64();
            }
        }
        match self.whole_map_arg(&mut args[0], span) {
            Some((_, _, scalar)) => {
                if scalar == Some(true) {
                    self.diags.error(
                        span,
                        "call to len() expects a map with explicit keys (non-scalar map)",
                    );
                }
            }
            None => {
                self.visit_value(&mut args[0]);
                self.diags
                    .error(span, "len() expects a map or stack to be provided");
            }
        }
        SizedType::int64()
    }

    fn call_has_key(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact("has_key", span, args, 2) {
            return SizedType::bool();
        }
        let ExprKind::Map { name, key: None } = &args[0].kind else {
            for arg in args.iter_mut() {
                self.visit_value(arg);
            }
            self.diags.error(span, "has_key() expects a map argument");
            return SizedType::bool();
        };
        let name = name.clone();
        {
            let entry = self.maps.entry(&name, args[0].span);
            entry.used = true;
        }
        let scalar = self.maps.entry(&name, args[0].span).scalar;
        if scalar == Some(true) {
            self.diags.error(
                span,
                "call to has_key() expects a map with explicit keys (non-scalar map)",
            );
            return SizedType::bool();
        }
        let kty = self.visit_key_arg(&mut args[1]);
        if !kty.is_none() {
            let key_snapshot = args[1].clone();
            let key_span = args[1].span;
            self.unify_key_for(&name, &kty, Some(&key_snapshot), key_span);
        }
        SizedType::bool()
    }

    // -----------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------

    fn call_exit(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if args.len() > 1 {
            self.diags.error(
                span,
                format!("exit() takes up to one argument ({} provided)", args.len()),
            );
            return SizedType::void();
        }
        if let Some(arg) = args.first_mut() {
            let ty = self.visit_value(arg);
            if !ty.is_none() && !ty.is_int() {
                self.diags.error(
                    span,
                    format!("exit() only supports int arguments ({ty} provided)"),
                );
            }
        }
        SizedType::void()
    }

    fn call_printf(&mut self, name: &str, span: Span, args: &mut [Expr]) -> SizedType {
        if name == "debugf" {
            self.diags.warning(
                span,
                "The debugf() builtin is not recommended for production use.",
            );
        }
        if !self.require_at_least(name, span, args, 1) {
            return SizedType::void();
        }
        let Some(fmt) = args[0].as_string_literal().map(str::to_string) else {
            self.visit_value(&mut args[0]);
            self.diags.error(
                span,
                format!("{name}() expects a string literal as the format string"),
            );
            return SizedType::void();
        };
        self.set_type(&mut args[0], SizedType::string(fmt.len() as u64 + 1));

        let specs = parse_format_specs(&fmt);
        let values = &mut args[1..];
        if name == "debugf" && values.len() > 3 {
            self.diags
                .error(span, "debugf() can only take up to 3 arguments");
        }
        if specs.len() != values.len() {
            self.diags.error(
                span,
                format!(
                    "{name}: format string expects {} arguments, {} provided",
                    specs.len(),
                    values.len()
                ),
            );
        }
        for (spec, value) in specs.iter().zip(values.iter_mut()) {
            let ty = self.visit_value(value);
            if ty.is_none() {
                continue;
            }
            match spec {
                FormatSpec::Int => {
                    if !(ty.is_int() || ty.is_bool() || ty.is_pointer() || ty.is_ctx()) {
                        self.diags.error(
                            span,
                            format!(
                                "{name}: %d specifier expects a value of type integer \
                                 ({} supplied)",
                                short_type_name(&ty)
                            ),
                        );
                    }
                }
                FormatSpec::Str => {
                    if !is_string_like(&ty) {
                        self.diags.error(
                            span,
                            format!(
                                "{name}: %s specifier expects a value of type string \
                                 ({} supplied)",
                                short_type_name(&ty)
                            ),
                        );
                    }
                }
                FormatSpec::Buf => {
                    if !ty.is_buffer() {
                        self.diags.error(
                            span,
                            format!(
                                "{name}: %r specifier expects a value of type buffer \
                                 ({} supplied)",
                                short_type_name(&ty)
                            ),
                        );
                    }
                }
                FormatSpec::Invalid(c) => {
                    self.diags
                        .error(span, format!("{name}: invalid format specifier %{c}"));
                }
            }
        }
        // surplus specifier with no argument already reported above; also
        // reject invalid specifiers that had no pairing argument
        for spec in specs.iter().skip(values.len()) {
            if let FormatSpec::Invalid(c) = spec {
                self.diags
                    .error(span, format!("{name}: invalid format specifier %{c}"));
            }
        }
        SizedType::void()
    }

    fn call_system(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if self.env.config.safe_mode {
            self.diags.error(
                span,
                "system() is an unsafe function being used in safe mode",
            );
        }
        if !self.require_at_least("system", span, args, 1) {
            return SizedType::void();
        }
        if args[0].as_string_literal().is_none() {
            self.visit_value(&mut args[0]);
            self.diags
                .error(span, "system() expects a string literal as the format string");
            return SizedType::void();
        }
        let len = args[0].as_string_literal().map(|s| s.len() as u64).unwrap_or(0);
        self.set_type(&mut args[0], SizedType::string(len + 1));
        for arg in &mut args[1..] {
            self.visit_value(arg);
        }
        SizedType::void()
    }

    fn call_cat(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_at_least("cat", span, args, 1) {
            return SizedType::none();
        }
        if args[0].as_string_literal().is_none() {
            self.visit_value(&mut args[0]);
            self.diags
                .error(span, "cat() expects a string literal as the file name");
        } else {
            let len = args[0].as_string_literal().map(|s| s.len() as u64).unwrap_or(0);
            self.set_type(&mut args[0], SizedType::string(len + 1));
        }
        for arg in &mut args[1..] {
            self.visit_value(arg);
        }
        // cat produces output only; there is no value to carry
        SizedType::none()
    }

    fn call_time(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_up_to("time", span, args, 1) {
            return SizedType::void();
        }
        if let Some(arg) = args.first_mut() {
            if arg.as_string_literal().is_none() {
                self.visit_value(arg);
                self.diags
                    .error(span, "time() expects a string literal as the format");
            } else {
                let len = arg.as_string_literal().map(|s| s.len() as u64).unwrap_or(0);
                self.set_type(arg, SizedType::string(len + 1));
            }
        }
        SizedType::void()
    }

    fn call_join(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_at_least("join", span, args, 1) || !self.require_up_to("join", span, args, 2)
        {
            return SizedType::void();
        }
        let ty = self.visit_value(&mut args[0]);
        if !ty.is_none() && !ty.is_int() && !ty.is_pointer() {
            self.diags.error(
                span,
                format!("join() only supports int or pointer arguments ({ty} provided)"),
            );
        }
        if let Some(sep) = args.get_mut(1) {
            if sep.as_string_literal().is_none() {
                self.visit_value(sep);
                self.diags
                    .error(span, "join() expects a string literal as the delimiter");
            } else {
                let len = sep.as_string_literal().map(|s| s.len() as u64).unwrap_or(0);
                self.set_type(sep, SizedType::string(len + 1));
            }
        }
        SizedType::void()
    }

    // -----------------------------------------------------------------
    // Strings and buffers
    // -----------------------------------------------------------------

    fn call_str(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_at_least("str", span, args, 1) || !self.require_up_to("str", span, args, 2)
        {
            return SizedType::string(self.env.config.max_strlen);
        }
        let prev = std::mem::replace(&mut self.in_str_arg, true);
        let ty = self.visit_value(&mut args[0]);
        self.in_str_arg = prev;
        if !ty.is_none() && !ty.is_int() && !ty.is_pointer() && !ty.is_string() {
            self.diags.error(
                span,
                format!("str() expects an integer or pointer argument ({ty} provided)"),
            );
        }

        let mut cap = self.env.config.max_strlen;
        if let Some(len_arg) = args.get_mut(1) {
            match self.literal_int(len_arg) {
                Some(n) if n > 0 => cap = (n as u64).min(self.env.config.max_strlen),
                Some(n) => {
                    self.diags.error(
                        span,
                        format!("str() length must be a positive integer ({n} provided)"),
                    );
                }
                None => {
                    let lty = self.visit_value(len_arg);
                    if !lty.is_none() && !lty.is_int() {
                        self.diags.error(
                            span,
                            format!("str() expects an integer length ({lty} provided)"),
                        );
                    }
                }
            }
        }
        SizedType::string(cap)
    }

    fn call_buf(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        let max = self.env.config.max_strlen;
        if max > u32::MAX as u64 {
            self.diags.error(
                span,
                format!(
                    "KTRACE_MAX_STRLEN too large to use on buffer ({max} > {})",
                    u32::MAX
                ),
            );
            return SizedType::buffer(0);
        }
        if !self.require_at_least("buf", span, args, 1) || !self.require_up_to("buf", span, args, 2)
        {
            return SizedType::buffer(max);
        }
        let prev = std::mem::replace(&mut self.in_str_arg, true);
        let ty = self.visit_value(&mut args[0]);
        self.in_str_arg = prev;
        let implied = match &ty.kind {
            TypeKind::Array { elem, len } => elem.int_bits().map(|b| u64::from(b) / 8 * len),
            _ => None,
        };
        if args.len() == 1 && implied.is_none() && !ty.is_none() && !ty.is_int() && !ty.is_pointer()
        {
            self.diags.error(
                span,
                format!("buf() expects a length for arguments of type '{ty}'"),
            );
        }
        if !ty.is_none() && ty.is_string() && args[0].as_string_literal().is_some() {
            // a literal string has a known length; but its use is suspect
            self.diags
                .error(span, "buf() expects a pointer or array argument");
        }

        let mut cap = implied.unwrap_or(max);
        if let Some(len_arg) = args.get_mut(1) {
            match self.literal_int(len_arg) {
                Some(n) if n > 0 => cap = (n as u64).min(max),
                Some(n) => {
                    self.diags.error(
                        span,
                        format!("buf() length must be a positive integer ({n} provided)"),
                    );
                }
                None => {
                    let lty = self.visit_value(len_arg);
                    if !lty.is_none() && !lty.is_int() {
                        self.diags.error(
                            span,
                            format!("buf() expects an integer length ({lty} provided)"),
                        );
                    }
                }
            }
        }
        SizedType::buffer(cap)
    }

    fn call_strncmp(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact("strncmp", span, args, 3) {
            return SizedType::uint64();
        }
        for arg in args[..2].iter_mut() {
            let ty = self.visit_value(arg);
            if !ty.is_none() && !ty.is_string() {
                self.diags.error(
                    span,
                    format!("strncmp() only supports string arguments ({ty} provided)"),
                );
            }
        }
        match self.literal_int(&mut args[2]) {
            Some(n) if n >= 0 => {}
            _ => {
                self.visit_value(&mut args[2]);
                self.diags.error(
                    span,
                    "strncmp() expects a non-negative integer literal length",
                );
            }
        }
        SizedType::uint64()
    }

    fn call_strcontains(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact("strcontains", span, args, 2) {
            return SizedType::uint64();
        }
        let mut caps = [0u64; 2];
        for (i, arg) in args.iter_mut().enumerate() {
            let ty = self.visit_value(arg);
            if !ty.is_none() && !ty.is_string() {
                self.diags.error(
                    span,
                    format!("strcontains() only supports string arguments ({ty} provided)"),
                );
            }
            caps[i] = ty.string_cap().unwrap_or(0);
        }
        if caps[0] * caps[1] > 1024 {
            self.diags.warning(
                span,
                "strcontains() with both string sizes is larger than 1024 bytes may \
                 fail to load",
            );
        }
        SizedType::uint64()
    }

    // -----------------------------------------------------------------
    // Symbols and addresses
    // -----------------------------------------------------------------

    fn call_sym(&mut self, name: &str, span: Span, args: &mut [Expr]) -> SizedType {
        let kind = if name == "ksym" {
            TypeKind::Ksym
        } else {
            TypeKind::Usym
        };
        if !self.require_exact(name, span, args, 1) {
            return SizedType::new(kind);
        }
        let ty = self.visit_value(&mut args[0]);
        if !ty.is_none() && !ty.is_int() && !ty.is_pointer() {
            self.diags.error(
                span,
                format!("{name}() expects an integer address ({ty} provided)"),
            );
        }
        SizedType::new(kind)
    }

    fn call_kaddr(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact("kaddr", span, args, 1) {
            return SizedType::uint64();
        }
        match self.string_literal(&args[0]) {
            Some(sym) => {
                self.set_type(&mut args[0], SizedType::string(sym.len() as u64 + 1));
            }
            None => {
                self.visit_value(&mut args[0]);
                self.diags
                    .error(span, "kaddr() expects a string literal symbol name");
            }
        }
        SizedType::uint64()
    }

    fn call_uaddr(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_probe_family(
            "uaddr",
            span,
            &[ProbeType::Uprobe, ProbeType::Uretprobe, ProbeType::Usdt],
        ) {
            return SizedType::none();
        }
        if !self.require_exact("uaddr", span, args, 1) {
            return SizedType::none();
        }
        let Some(sym) = self.string_literal(&args[0]) else {
            self.visit_value(&mut args[0]);
            self.diags
                .error(span, "uaddr() expects a string literal symbol name");
            return SizedType::none();
        };
        if sym.is_empty()
            || !sym
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/'))
        {
            self.diags
                .error(span, format!("uaddr() symbol is invalid: {sym}"));
            return SizedType::none();
        }
        self.set_type(&mut args[0], SizedType::string(sym.len() as u64 + 1));
        SizedType::pointer(SizedType::uint64(), AddrSpace::User)
    }

    fn call_cgroupid(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact("cgroupid", span, args, 1) {
            return SizedType::uint64();
        }
        match self.string_literal(&args[0]) {
            Some(path) => {
                // cgroup paths may exceed max_strlen; they resolve at attach
                self.set_type(&mut args[0], SizedType::string(path.len() as u64 + 1));
            }
            None => {
                self.visit_value(&mut args[0]);
                self.diags
                    .error(span, "cgroupid() expects a string literal path");
            }
        }
        SizedType::uint64()
    }

    fn call_cgroup_path(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_at_least("cgroup_path", span, args, 1)
            || !self.require_up_to("cgroup_path", span, args, 2)
        {
            return SizedType::new(TypeKind::CgroupPath);
        }
        let ty = self.visit_value(&mut args[0]);
        if !ty.is_none() && !ty.is_int() {
            self.diags.error(
                span,
                format!("cgroup_path() only supports int arguments ({ty} provided)"),
            );
        }
        if let Some(fmt) = args.get_mut(1) {
            if fmt.as_string_literal().is_none() {
                self.visit_value(fmt);
                self.diags
                    .error(span, "cgroup_path() expects a string literal format");
            } else {
                let len = fmt.as_string_literal().map(|s| s.len() as u64).unwrap_or(0);
                self.set_type(fmt, SizedType::string(len + 1));
            }
        }
        SizedType::new(TypeKind::CgroupPath)
    }

    fn call_strerror(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact("strerror", span, args, 1) {
            return SizedType::new(TypeKind::Strerror);
        }
        let ty = self.visit_value(&mut args[0]);
        if !ty.is_none() && !ty.is_int() {
            self.diags.error(
                span,
                format!("strerror() only supports int arguments ({ty} provided)"),
            );
        }
        SizedType::new(TypeKind::Strerror)
    }

    fn call_strftime(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact("strftime", span, args, 2) {
            return SizedType::timestamp(TimestampMode::Boot);
        }
        if args[0].as_string_literal().is_none() {
            self.visit_value(&mut args[0]);
            self.diags
                .error(span, "strftime() expects a string literal format");
        } else {
            let len = args[0].as_string_literal().map(|s| s.len() as u64).unwrap_or(0);
            self.set_type(&mut args[0], SizedType::string(len + 1));
        }
        let ts = self.visit_value(&mut args[1]);
        if !ts.is_none() && !ts.is_int() {
            self.diags.error(
                span,
                format!("strftime() expects an integer timestamp ({ts} provided)"),
            );
        }
        let mode = ts.ts_mode.unwrap_or(TimestampMode::Boot);
        if mode == TimestampMode::Monotonic {
            self.diags.error(
                span,
                "strftime() can not take a timestamp from the monotonic clock",
            );
        }
        SizedType::timestamp(mode)
    }

    fn call_nsecs(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_up_to("nsecs", span, args, 1) {
            return SizedType::uint64().with_ts_mode(TimestampMode::Boot);
        }
        let mut mode = TimestampMode::Boot;
        if let Some(arg) = args.first_mut() {
            match &arg.kind {
                ExprKind::Identifier(name) => match TimestampMode::from_ident(name) {
                    Some(m) => {
                        mode = m;
                        self.set_type(arg, SizedType::uint64());
                    }
                    None => {
                        self.diags
                            .error(span, format!("Invalid timestamp mode: {name}"));
                    }
                },
                _ => {
                    self.visit_value(arg);
                    self.diags
                        .error(span, "nsecs() expects a timestamp mode identifier");
                }
            }
        }
        SizedType::uint64().with_ts_mode(mode)
    }

    fn call_pid_tid(&mut self, name: &str, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_up_to(name, span, args, 1) {
            return SizedType::uint32();
        }
        if let Some(arg) = args.first_mut() {
            match &arg.kind {
                ExprKind::Identifier(mode) => {
                    if !matches!(mode.as_str(), "curr_ns" | "init") {
                        self.diags.error(
                            span,
                            format!("Invalid PID namespace mode: {mode} (expects: curr_ns or init)"),
                        );
                    } else {
                        self.set_type(arg, SizedType::uint64());
                    }
                }
                _ => {
                    let ty = self.visit_value(arg);
                    let shown = if ty.is_int() { "int".to_string() } else { ty.to_string() };
                    self.diags.error(
                        span,
                        format!(
                            "{name}() only supports curr_ns and init as the argument \
                             ({shown} provided)"
                        ),
                    );
                }
            }
        }
        SizedType::uint32()
    }

    fn call_stack(&mut self, name: &str, span: Span, args: &mut [Expr]) -> SizedType {
        let user = name == "ustack";
        let mut mode = self.env.config.stack_mode;
        let mut limit = 127u32;

        let parse_limit = |this: &mut Self, arg: &mut Expr| -> Option<u32> {
            match this.literal_int(arg) {
                Some(n) if n > 0 && n <= 1024 => Some(n as u32),
                _ => None,
            }
        };

        match args.len() {
            0 => {}
            1 => {
                if let Some(m) = stack_mode_from_expr(&args[0]) {
                    mode = m;
                    self.set_type(&mut args[0], SizedType::uint64());
                } else if let Some(n) = parse_limit(self, &mut args[0]) {
                    limit = n;
                } else {
                    self.diags.error(
                        span,
                        format!("{name}() expects a stack mode or a positive literal limit"),
                    );
                }
            }
            2 => {
                match stack_mode_from_expr(&args[0]) {
                    Some(m) => {
                        mode = m;
                        self.set_type(&mut args[0], SizedType::uint64());
                    }
                    None => {
                        self.diags
                            .error(span, format!("{name}() expects a stack mode first"));
                    }
                }
                match parse_limit(self, &mut args[1]) {
                    Some(n) => limit = n,
                    None => {
                        self.diags.error(
                            span,
                            format!("{name}() expects a positive literal stack limit"),
                        );
                    }
                }
            }
            _ => {
                self.diags.error(
                    span,
                    format!("{name}() takes up to 2 arguments ({} provided)", args.len()),
                );
            }
        }
        SizedType::stack(user, mode, limit)
    }

    // -----------------------------------------------------------------
    // Process control
    // -----------------------------------------------------------------

    fn call_signal(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_probe_family(
            "signal",
            span,
            &[
                ProbeType::Kprobe,
                ProbeType::Kretprobe,
                ProbeType::Uprobe,
                ProbeType::Uretprobe,
                ProbeType::Profile,
            ],
        ) {
            return SizedType::void();
        }
        if self.env.config.safe_mode {
            self.diags.error(
                span,
                "signal() is an unsafe function being used in safe mode",
            );
        }
        if !self.env.features.signal {
            self.diags
                .error(span, "Missing required kernel feature: send_signal");
        }
        if !self.require_exact("signal", span, args, 1) {
            return SizedType::void();
        }
        if let Some(name) = args[0].as_string_literal().map(str::to_string) {
            if !is_supported_signal(&name) {
                self.diags
                    .error(span, format!("{name} is not a supported signal"));
            }
            self.set_type(&mut args[0], SizedType::string(name.len() as u64 + 1));
            return SizedType::void();
        }
        if let Some(n) = self.literal_int(&mut args[0]) {
            if !(1..=64).contains(&n) {
                self.diags
                    .error(span, format!("{n} is not a valid signal number"));
            }
            return SizedType::void();
        }
        let ty = self.visit_value(&mut args[0]);
        if !ty.is_none() && !ty.is_int() {
            self.diags.error(
                span,
                format!("signal() only supports int or string arguments ({ty} provided)"),
            );
        }
        SizedType::void()
    }

    fn call_override(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_probe_family("override", span, &[ProbeType::Kprobe]) {
            return SizedType::void();
        }
        if self.env.config.safe_mode {
            self.diags.error(
                span,
                "override() is an unsafe function being used in safe mode",
            );
        }
        if !self.env.features.override_return {
            self.diags
                .error(span, "Missing required kernel feature: override_return");
        }
        if self.require_exact("override", span, args, 1) {
            let ty = self.visit_value(&mut args[0]);
            if !ty.is_none() && !ty.is_int() {
                self.diags.error(
                    span,
                    format!("override() only supports int arguments ({ty} provided)"),
                );
            }
        }
        SizedType::void()
    }

    fn call_unwatch(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if self.require_exact("unwatch", span, args, 1) {
            let ty = self.visit_value(&mut args[0]);
            if !ty.is_none() && !ty.is_int() {
                self.diags.error(
                    span,
                    format!("unwatch() only supports int arguments ({ty} provided)"),
                );
            }
        }
        SizedType::void()
    }

    // -----------------------------------------------------------------
    // Conversions
    // -----------------------------------------------------------------

    fn call_ntop(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_at_least("ntop", span, args, 1) || !self.require_up_to("ntop", span, args, 2)
        {
            return SizedType::new(TypeKind::Inet);
        }
        let addr_idx = args.len() - 1;
        if args.len() == 2 {
            let ty = self.visit_value(&mut args[0]);
            if !ty.is_none() && !ty.is_int() {
                self.diags.error(
                    span,
                    format!("ntop() address family must be an integer ({ty} provided)"),
                );
            }
        }
        let ty = self.visit_value(&mut args[addr_idx]);
        let ok = match &ty.kind {
            TypeKind::None | TypeKind::Integer { .. } => true,
            TypeKind::Array { elem, len } => elem.is_int() && matches!(*len, 4 | 16),
            _ => false,
        };
        if !ok {
            self.diags.error(
                span,
                format!("ntop() expects an integer or a 4/16 byte array ({ty} provided)"),
            );
        }
        SizedType::new(TypeKind::Inet)
    }

    fn call_pton(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact("pton", span, args, 1) {
            return SizedType::none();
        }
        let Some(addr) = args[0].as_string_literal().map(str::to_string) else {
            self.visit_value(&mut args[0]);
            self.diags
                .error(span, "pton() expects a string literal address");
            return SizedType::none();
        };
        self.set_type(&mut args[0], SizedType::string(addr.len() as u64 + 1));
        if parse_ipv4(&addr) {
            SizedType::array(SizedType::integer(8, false), 4)
        } else if parse_ipv6(&addr) {
            SizedType::array(SizedType::integer(8, false), 16)
        } else {
            self.diags.error(
                span,
                format!("pton() expects a valid IPv4/IPv6 address (\"{addr}\" provided)"),
            );
            SizedType::none()
        }
    }

    fn call_bswap(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact("bswap", span, args, 1) {
            return SizedType::uint64();
        }
        let ty = self.visit_value(&mut args[0]);
        if ty.is_none() {
            return SizedType::none();
        }
        if !ty.is_int() {
            self.diags.error(
                span,
                format!("bswap() only supports integer arguments ({ty} provided)"),
            );
            return SizedType::none();
        }
        SizedType::integer(ty.int_bits().unwrap_or(64), false)
    }

    fn call_macaddr(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact("macaddr", span, args, 1) {
            return SizedType::new(TypeKind::MacAddr);
        }
        let ty = self.visit_value(&mut args[0]);
        let ok = match &ty.kind {
            TypeKind::None | TypeKind::Integer { .. } => true,
            TypeKind::Pointer { pointee, .. } => {
                // the pointee must be a 6-byte buffer
                match pointee.record_name() {
                    Some(name) => self
                        .records
                        .size_of(name)
                        .map(|size| size == 6)
                        .unwrap_or(true),
                    None => pointee.is_int(),
                }
            }
            TypeKind::Array { elem, len } => elem.is_int() && *len == 6,
            _ => false,
        };
        if !ok {
            self.diags.error(
                span,
                format!("macaddr() expects a 6 byte address ({ty} provided)"),
            );
        }
        SizedType::new(TypeKind::MacAddr)
    }

    fn call_ptr_tag(&mut self, name: &str, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_exact(name, span, args, 1) {
            return SizedType::none();
        }
        let addr_space = if name == "kptr" {
            AddrSpace::Kernel
        } else {
            AddrSpace::User
        };
        let ty = self.visit_value(&mut args[0]);
        match &ty.kind {
            TypeKind::Pointer { pointee, .. } => {
                SizedType::pointer(pointee.as_ref().clone(), addr_space)
            }
            TypeKind::Integer { .. } | TypeKind::None => ty,
            _ => {
                self.diags.error(
                    span,
                    format!("{name}() expects an integer or pointer argument ({ty} provided)"),
                );
                SizedType::none()
            }
        }
    }

    // -----------------------------------------------------------------
    // fentry/fexit helpers
    // -----------------------------------------------------------------

    fn call_path(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_probe_family("path", span, &[ProbeType::Fentry, ProbeType::Fexit]) {
            return SizedType::none();
        }
        if !self.require_at_least("path", span, args, 1) || !self.require_up_to("path", span, args, 2)
        {
            return SizedType::string(self.env.config.max_strlen);
        }
        self.visit_value(&mut args[0]);
        let mut cap = self.env.config.max_strlen;
        if let Some(size) = args.get_mut(1) {
            match self.literal_int(size) {
                Some(n) if n > 0 => cap = n as u64,
                _ => {
                    self.visit_value(size);
                    self.diags
                        .error(span, "path() size must be a positive integer literal");
                }
            }
        }
        SizedType::string(cap)
    }

    fn call_skboutput(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_probe_family("skboutput", span, &[ProbeType::Fentry, ProbeType::Fexit]) {
            return SizedType::uint64();
        }
        if !self.env.features.skb_output {
            self.diags
                .error(span, "Missing required kernel feature: skb_output");
        }
        if !self.require_exact("skboutput", span, args, 4) {
            return SizedType::uint64();
        }
        if args[0].as_string_literal().is_none() {
            self.visit_value(&mut args[0]);
            self.diags
                .error(span, "skboutput() expects a string literal file name");
        } else {
            let len = args[0].as_string_literal().map(|s| s.len() as u64).unwrap_or(0);
            self.set_type(&mut args[0], SizedType::string(len + 1));
        }
        for arg in &mut args[1..] {
            let ty = self.visit_value(arg);
            if !ty.is_none() && !ty.is_int() && !ty.is_pointer() {
                self.diags.error(
                    span,
                    format!("skboutput() expects integer arguments ({ty} provided)"),
                );
            }
        }
        SizedType::uint64()
    }

    fn call_socket_cookie(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_probe_family(
            "socket_cookie",
            span,
            &[ProbeType::Fentry, ProbeType::Fexit],
        ) {
            return SizedType::uint64();
        }
        if !self.env.features.socket_cookie {
            self.diags
                .error(span, "Missing required kernel feature: get_socket_cookie");
        }
        if args.len() != 1 {
            self.diags.error(
                span,
                format!(
                    "socket_cookie() requires one argument ({} provided)",
                    args.len()
                ),
            );
            return SizedType::uint64();
        }
        let ty = self.visit_value(&mut args[0]);
        let is_sock_ptr = ty
            .pointee()
            .and_then(SizedType::record_name)
            .map(|name| name == "struct sock")
            .unwrap_or(false);
        if !ty.is_none() && !is_sock_ptr {
            let shown = if ty.is_int() {
                "int".to_string()
            } else {
                format!("'{ty}'")
            };
            self.diags.error(
                span,
                format!("socket_cookie() only supports 'struct sock *' as the argument ({shown} provided)"),
            );
        }
        SizedType::uint64()
    }

    fn call_percpu_kaddr(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_at_least("percpu_kaddr", span, args, 1)
            || !self.require_up_to("percpu_kaddr", span, args, 2)
        {
            return SizedType::none();
        }
        match self.string_literal(&args[0]) {
            Some(sym) => {
                self.set_type(&mut args[0], SizedType::string(sym.len() as u64 + 1));
            }
            None => {
                self.visit_value(&mut args[0]);
                self.diags
                    .error(span, "percpu_kaddr() expects a string literal symbol name");
                return SizedType::none();
            }
        }
        if let Some(cpu) = args.get_mut(1) {
            let ty = self.visit_value(cpu);
            if !ty.is_none() && !ty.is_int() {
                self.diags.error(
                    span,
                    format!("percpu_kaddr() cpu must be an integer ({ty} provided)"),
                );
            }
        }
        SizedType::pointer(SizedType::uint64(), AddrSpace::Kernel)
    }

    fn call_reg(&mut self, span: Span, args: &mut [Expr]) -> SizedType {
        if !self.require_probe_family(
            "reg",
            span,
            &[
                ProbeType::Kprobe,
                ProbeType::Kretprobe,
                ProbeType::Uprobe,
                ProbeType::Uretprobe,
                ProbeType::Profile,
                ProbeType::Interval,
            ],
        ) {
            return SizedType::none();
        }
        if !self.require_exact("reg", span, args, 1) {
            return SizedType::none();
        }
        let Some(name) = self.string_literal(&args[0]) else {
            self.visit_value(&mut args[0]);
            self.diags
                .error(span, "reg() expects a string literal register name");
            return SizedType::none();
        };
        if !is_register_name(&name) {
            self.diags
                .error(span, format!("'{name}' is not a valid register name"));
            return SizedType::none();
        }
        self.set_type(&mut args[0], SizedType::string(name.len() as u64 + 1));
        SizedType::uint64()
    }
}

fn plural_args(n: usize) -> String {
    match n {
        0 => "no arguments".to_string(),
        1 => "one argument".to_string(),
        n => format!("{n} arguments"),
    }
}

fn plural_args_at_least(n: usize) -> String {
    match n {
        1 => "one argument".to_string(),
        n => format!("{n} arguments"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormatSpec {
    Int,
    Str,
    Buf,
    Invalid(char),
}

/// Scan a printf-style format string for conversion specifiers.
fn parse_format_specs(fmt: &str) -> Vec<FormatSpec> {
    let mut specs = Vec::new();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        // flags, field width and precision
        while matches!(
            chars.peek(),
            Some('-' | '+' | ' ' | '#' | '0'..='9' | '.' | '*')
        ) {
            chars.next();
        }
        // length modifiers
        while matches!(chars.peek(), Some('h' | 'l' | 'j' | 'z' | 't')) {
            chars.next();
        }
        match chars.next() {
            Some('%') => {}
            Some('d' | 'i' | 'u' | 'o' | 'x' | 'X' | 'p' | 'c') => specs.push(FormatSpec::Int),
            Some('s') => specs.push(FormatSpec::Str),
            Some('r') => {
                // %r, %rx and %rh all print buffers
                if matches!(chars.peek(), Some('x' | 'h')) {
                    chars.next();
                }
                specs.push(FormatSpec::Buf);
            }
            Some(other) => specs.push(FormatSpec::Invalid(other)),
            None => {}
        }
    }
    specs
}

fn is_string_like(ty: &SizedType) -> bool {
    matches!(
        ty.kind,
        TypeKind::String { .. }
            | TypeKind::Ksym
            | TypeKind::Usym
            | TypeKind::Strerror
            | TypeKind::CgroupPath
            | TypeKind::MacAddr
            | TypeKind::Inet
            | TypeKind::Timestamp { .. }
    )
}

fn short_type_name(ty: &SizedType) -> String {
    if ty.is_int() {
        "int".to_string()
    } else {
        ty.to_string()
    }
}

fn parse_duration(raw: &str) -> Option<i64> {
    let (digits, scale) = if let Some(d) = raw.strip_suffix("ns") {
        (d, 1)
    } else if let Some(d) = raw.strip_suffix("us") {
        (d, 1_000)
    } else if let Some(d) = raw.strip_suffix("ms") {
        (d, 1_000_000)
    } else if let Some(d) = raw.strip_suffix('s') {
        (d, 1_000_000_000)
    } else {
        (raw, 1)
    };
    digits.parse::<i64>().ok().map(|n| n * scale)
}

fn parse_ipv4(addr: &str) -> bool {
    let octets: Vec<&str> = addr.split('.').collect();
    octets.len() == 4
        && octets
            .iter()
            .all(|o| !o.is_empty() && o.parse::<u64>().map(|v| v <= 255).unwrap_or(false))
}

fn parse_ipv6(addr: &str) -> bool {
    if !addr.contains(':') {
        return false;
    }
    let compressed = addr.matches("::").count();
    if compressed > 1 {
        return false;
    }
    let groups: Vec<&str> = addr.split(':').filter(|g| !g.is_empty()).collect();
    if groups.is_empty() && compressed == 1 {
        // "::" alone is the all-zero address
        return addr == "::";
    }
    let max = if compressed == 1 { 7 } else { 8 };
    if groups.len() > max || (compressed == 0 && groups.len() != 8) {
        return false;
    }
    groups
        .iter()
        .all(|g| g.len() <= 4 && g.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_register_name(name: &str) -> bool {
    matches!(
        name,
        "ip" | "sp"
            | "bp"
            | "ax"
            | "bx"
            | "cx"
            | "dx"
            | "si"
            | "di"
            | "r8"
            | "r9"
            | "r10"
            | "r11"
            | "r12"
            | "r13"
            | "r14"
            | "r15"
    )
}
