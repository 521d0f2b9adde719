//! Type-spec resolution and the unification rules shared by assignments,
//! map accesses and ternaries.
//!
//! Three unification policies exist because the language is asymmetric:
//!
//! - map cells are 64-bit: top-level integer keys and values promote, and
//!   literals are checked against the promoted type;
//! - tuple *keys* widen integer elements to the widest use and let literals
//!   adopt the stored element type when they fit;
//! - scratch variables fix their exact integer width at declaration and
//!   only accept narrower values of the same signedness.

use ktrace_ast::ast::{Expr, ExprKind, TypeSpec};
use ktrace_ast::foundation::{AggKind, Config, SizedType, TypeKind};

/// Why a `TypeSpec` did not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecError {
    /// The spelling that failed, e.g. `char` or `struct faketype`
    pub name: String,
    /// Sized spelling to suggest for C integer names
    pub suggestion: Option<&'static str>,
}

/// Sized replacement for C integer type names.
pub fn int_suggestion(name: &str) -> Option<&'static str> {
    match name {
        "char" => Some("int8"),
        "short" => Some("int16"),
        "int" => Some("int32"),
        "long" => Some("int64"),
        _ => None,
    }
}

fn ident_type(name: &str, config: &Config) -> Option<SizedType> {
    let ty = match name {
        "int8" => SizedType::integer(8, true),
        "int16" => SizedType::integer(16, true),
        "int32" => SizedType::integer(32, true),
        "int64" => SizedType::integer(64, true),
        "uint8" => SizedType::integer(8, false),
        "uint16" => SizedType::integer(16, false),
        "uint32" => SizedType::integer(32, false),
        "uint64" => SizedType::integer(64, false),
        "bool" => SizedType::bool(),
        "void" => SizedType::void(),
        "string" => SizedType::string(config.max_strlen),
        "count_t" => SizedType::agg(AggKind::Count),
        "sum_t" => SizedType::agg(AggKind::Sum { signed: true }),
        "usum_t" => SizedType::agg(AggKind::Sum { signed: false }),
        "min_t" => SizedType::agg(AggKind::Min { signed: true }),
        "umin_t" => SizedType::agg(AggKind::Min { signed: false }),
        "max_t" => SizedType::agg(AggKind::Max { signed: true }),
        "umax_t" => SizedType::agg(AggKind::Max { signed: false }),
        "avg_t" => SizedType::agg(AggKind::Avg { signed: true }),
        "uavg_t" => SizedType::agg(AggKind::Avg { signed: false }),
        "stats_t" => SizedType::agg(AggKind::Stats { signed: true }),
        "ustats_t" => SizedType::agg(AggKind::Stats { signed: false }),
        "hist_t" => SizedType::agg(AggKind::Hist),
        "lhist_t" => SizedType::agg(AggKind::Lhist),
        "tseries_t" => SizedType::agg(AggKind::Tseries),
        _ => return None,
    };
    Some(ty)
}

/// Resolve a written type to a `SizedType`.
///
/// Record names resolve without an existence check; whether the record must
/// be known depends on the context (a `let` annotation may name a struct
/// that only BTF will provide, a by-value cast may not).
pub fn resolve_type_spec(spec: &TypeSpec, config: &Config) -> Result<SizedType, SpecError> {
    match spec {
        TypeSpec::Ident(name) => ident_type(name, config).ok_or_else(|| SpecError {
            name: name.clone(),
            suggestion: int_suggestion(name),
        }),
        TypeSpec::Record(name) => Ok(SizedType::record(name.clone())),
        // Enum casts carry their own rules; elsewhere an enum value is an int
        TypeSpec::Enum(_) => Ok(SizedType::uint64()),
        TypeSpec::Pointer(inner) => {
            let pointee = resolve_type_spec(inner, config)?;
            Ok(SizedType::pointer(
                pointee,
                ktrace_ast::foundation::AddrSpace::None,
            ))
        }
        TypeSpec::Array(elem, Some(len)) => {
            let elem = resolve_type_spec(elem, config)?;
            Ok(SizedType::array(elem, *len))
        }
        TypeSpec::Array(_, None) => Err(SpecError {
            name: spec.display_name(),
            suggestion: None,
        }),
    }
}

/// Common type of two branches (ternary arms, range endpoints).
///
/// Returns `None` when there is no common type; stack-vs-stack conflicts
/// get their own diagnostic at the call site.
pub fn unify(a: &SizedType, b: &SizedType) -> Option<SizedType> {
    match (&a.kind, &b.kind) {
        (
            TypeKind::Integer { bits: ab, signed: asg },
            TypeKind::Integer { bits: bb, signed: bsg },
        ) => {
            if asg != bsg {
                return None;
            }
            Some(SizedType::integer(*ab.max(bb), *asg))
        }
        (TypeKind::String { cap: ac }, TypeKind::String { cap: bc }) => {
            Some(SizedType::string(*ac.max(bc)))
        }
        (TypeKind::Buffer { cap: ac }, TypeKind::Buffer { cap: bc }) => {
            Some(SizedType::buffer(*ac.max(bc)))
        }
        (TypeKind::Tuple { fields: af }, TypeKind::Tuple { fields: bf }) => {
            if af.len() != bf.len() {
                return None;
            }
            let fields = af
                .iter()
                .zip(bf.iter())
                .map(|(x, y)| unify(x, y))
                .collect::<Option<Vec<_>>>()?;
            Some(SizedType::tuple(fields))
        }
        _ => {
            if a == b {
                Some(a.clone())
            } else {
                None
            }
        }
    }
}

fn literal_of(expr: Option<&Expr>) -> Option<(u64, bool)> {
    expr.and_then(Expr::as_literal_int)
}

/// Unify a map access key against the stored key type, widening the stored
/// side where the language allows it. Returns false on a mismatch; the
/// caller owns the diagnostic.
pub fn key_unify(stored: &mut SizedType, access: &SizedType, access_expr: Option<&Expr>) -> bool {
    match (&mut stored.kind, &access.kind) {
        (
            TypeKind::Integer {
                bits: sb,
                signed: ss,
            },
            TypeKind::Integer {
                bits: ab,
                signed: asg,
            },
        ) => {
            if let Some((magnitude, negative)) = literal_of(access_expr) {
                // literals adopt the stored element type when they fit
                let probe = SizedType::integer(*sb, *ss);
                probe.literal_fits(magnitude, negative)
            } else if *ss == *asg {
                *sb = (*sb).max(*ab);
                true
            } else {
                false
            }
        }
        (TypeKind::String { cap: sc }, TypeKind::String { cap: ac }) => {
            *sc = (*sc).max(*ac);
            true
        }
        (TypeKind::Tuple { fields: sf }, TypeKind::Tuple { fields: af }) => {
            if sf.len() != af.len() {
                return false;
            }
            let elems: Vec<Option<&Expr>> = match access_expr.map(|e| &e.kind) {
                Some(ExprKind::Tuple(items)) if items.len() == af.len() => {
                    items.iter().map(Some).collect()
                }
                _ => vec![None; af.len()],
            };
            sf.iter_mut()
                .zip(af.iter())
                .zip(elems)
                .all(|((s, a), e)| key_unify(s, a, e))
        }
        _ => *stored == *access,
    }
}

/// Result of unifying an assigned value against the stored map value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFit {
    Ok,
    /// An integer literal that does not fit the stored type
    LiteralOverflow,
    Mismatch,
}

/// Unify a value written into a map against the stored value type.
/// Top-level integers are already promoted to 64-bit on both sides.
pub fn map_value_unify(
    stored: &mut SizedType,
    access: &SizedType,
    access_expr: Option<&Expr>,
) -> ValueFit {
    match (&mut stored.kind, &access.kind) {
        (
            TypeKind::Integer {
                bits: sb,
                signed: ss,
            },
            TypeKind::Integer { signed: asg, .. },
        ) => {
            let (bits, signed) = (*sb, *ss);
            if let Some((magnitude, negative)) = literal_of(access_expr) {
                if negative && !signed {
                    ValueFit::Mismatch
                } else if SizedType::integer(bits, signed).literal_fits(magnitude, negative) {
                    ValueFit::Ok
                } else {
                    ValueFit::LiteralOverflow
                }
            } else if signed == *asg {
                ValueFit::Ok
            } else {
                ValueFit::Mismatch
            }
        }
        (TypeKind::String { cap: sc }, TypeKind::String { cap: ac }) => {
            *sc = (*sc).max(*ac);
            ValueFit::Ok
        }
        (TypeKind::Tuple { fields: sf }, TypeKind::Tuple { fields: af }) => {
            if sf.len() != af.len() {
                return ValueFit::Mismatch;
            }
            let elems: Vec<Option<&Expr>> = match access_expr.map(|e| &e.kind) {
                Some(ExprKind::Tuple(items)) if items.len() == af.len() => {
                    items.iter().map(Some).collect()
                }
                _ => vec![None; af.len()],
            };
            for ((s, a), e) in sf.iter_mut().zip(af.iter()).zip(elems) {
                if tuple_elem_unify(s, a, e) != ValueFit::Ok {
                    return ValueFit::Mismatch;
                }
            }
            ValueFit::Ok
        }
        _ => {
            if *stored == *access {
                ValueFit::Ok
            } else {
                ValueFit::Mismatch
            }
        }
    }
}

/// Tuple elements keep their exact integer widths: a wider element is a
/// mismatch, a narrower one of the same signedness fits.
fn tuple_elem_unify(stored: &mut SizedType, access: &SizedType, expr: Option<&Expr>) -> ValueFit {
    match (&mut stored.kind, &access.kind) {
        (
            TypeKind::Integer {
                bits: sb,
                signed: ss,
            },
            TypeKind::Integer {
                bits: ab,
                signed: asg,
            },
        ) => {
            let _ = expr;
            if *ss == *asg && *ab <= *sb {
                ValueFit::Ok
            } else {
                ValueFit::Mismatch
            }
        }
        (TypeKind::String { cap: sc }, TypeKind::String { cap: ac }) => {
            *sc = (*sc).max(*ac);
            ValueFit::Ok
        }
        (TypeKind::Tuple { fields: sf }, TypeKind::Tuple { fields: af }) => {
            if sf.len() != af.len() {
                return ValueFit::Mismatch;
            }
            for (s, a) in sf.iter_mut().zip(af.iter()) {
                if tuple_elem_unify(s, a, None) != ValueFit::Ok {
                    return ValueFit::Mismatch;
                }
            }
            ValueFit::Ok
        }
        _ => {
            if *stored == *access {
                ValueFit::Ok
            } else {
                ValueFit::Mismatch
            }
        }
    }
}

/// Unify a value assigned to an already-typed scratch variable (tuple and
/// string cases; integer variables have their own width/sign rules at the
/// assignment site).
pub fn var_value_unify(stored: &mut SizedType, access: &SizedType) -> bool {
    match (&mut stored.kind, &access.kind) {
        (TypeKind::String { cap: sc }, TypeKind::String { cap: ac }) => {
            *sc = (*sc).max(*ac);
            true
        }
        (TypeKind::Tuple { .. }, TypeKind::Tuple { .. }) => {
            let mut probe = stored.clone();
            if map_tuple_like(&mut probe, access) {
                *stored = probe;
                true
            } else {
                false
            }
        }
        _ => *stored == *access,
    }
}

fn map_tuple_like(stored: &mut SizedType, access: &SizedType) -> bool {
    match (&mut stored.kind, &access.kind) {
        (TypeKind::Tuple { fields: sf }, TypeKind::Tuple { fields: af }) => {
            sf.len() == af.len()
                && sf
                    .iter_mut()
                    .zip(af.iter())
                    .all(|(s, a)| tuple_elem_unify(s, a, None) == ValueFit::Ok)
        }
        _ => false,
    }
}
