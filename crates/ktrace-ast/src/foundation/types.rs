//! Type system for the ktrace DSL
//!
//! Every value flowing through a probe body has a `SizedType`: a closed sum
//! over integers, strings, buffers, pointers, arrays, records, tuples,
//! stacks, aggregations and a handful of opaque builtin types.
//!
//! Aggregations (`count_t`, `hist_t`, ...) are distinct variants so the
//! "aggregations live only in maps" rules are plain discriminant tests.
//!
//! A `SizedType` additionally carries a context-access flag: values derived
//! from the probe context (`ctx` and friends) are tagged so code generation
//! can route their loads through the right helpers. The flag does not
//! participate in type equality.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A type plus codegen metadata tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizedType {
    pub kind: TypeKind,
    /// Value is derived from the probe context
    pub ctx: bool,
    /// Set on integers produced by `nsecs()`: which clock they came from.
    /// `strftime()` refuses clocks it cannot translate.
    pub ts_mode: Option<TimestampMode>,
}

impl PartialEq for SizedType {
    fn eq(&self, other: &Self) -> bool {
        // the tags are codegen metadata, not part of the type
        self.kind == other.kind
    }
}

impl Eq for SizedType {}

/// The type discriminant and payload.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    /// Bottom type: not yet inferred, or no value at all
    None,
    /// Result of calls that produce nothing assignable
    Void,
    Integer {
        bits: u8,
        signed: bool,
    },
    Bool,
    /// NUL-terminated string with a fixed buffer capacity
    String {
        cap: u64,
    },
    /// Length-delimited byte buffer
    Buffer {
        cap: u64,
    },
    Pointer {
        pointee: Box<SizedType>,
        addr_space: AddrSpace,
    },
    Array {
        elem: Box<SizedType>,
        len: u64,
    },
    /// Named C record; field layout lives in the `RecordRegistry`.
    /// The name carries its keyword, e.g. `struct task_struct`.
    Record {
        name: String,
    },
    /// Anonymous product type, compared structurally
    Tuple {
        fields: Vec<SizedType>,
    },
    Stack {
        user: bool,
        mode: StackMode,
        limit: u32,
    },
    /// Per-cpu aggregation value
    Agg(AggKind),
    Ksym,
    Usym,
    Inet,
    MacAddr,
    CgroupPath,
    Strerror,
    Timestamp {
        mode: TimestampMode,
    },
    /// The raw probe context
    Ctx,
}

impl PartialEq for TypeKind {
    /// Structural equality, ignoring what is storage detail rather than
    /// identity: pointer address spaces, string/buffer capacities (they
    /// widen on unification) and timestamp clocks.
    fn eq(&self, other: &Self) -> bool {
        use TypeKind::*;
        match (self, other) {
            (None, None)
            | (Void, Void)
            | (Bool, Bool)
            | (Ksym, Ksym)
            | (Usym, Usym)
            | (Inet, Inet)
            | (MacAddr, MacAddr)
            | (CgroupPath, CgroupPath)
            | (Strerror, Strerror)
            | (Ctx, Ctx)
            | (String { .. }, String { .. })
            | (Buffer { .. }, Buffer { .. })
            | (Timestamp { .. }, Timestamp { .. }) => true,
            (
                Integer { bits: a, signed: s },
                Integer {
                    bits: b,
                    signed: t,
                },
            ) => a == b && s == t,
            (Pointer { pointee: a, .. }, Pointer { pointee: b, .. }) => a == b,
            (Array { elem: a, len: la }, Array { elem: b, len: lb }) => a == b && la == lb,
            (Record { name: a }, Record { name: b }) => a == b,
            (Tuple { fields: a }, Tuple { fields: b }) => a == b,
            (
                Stack {
                    user: a,
                    mode: ma,
                    limit: la,
                },
                Stack {
                    user: b,
                    mode: mb,
                    limit: lb,
                },
            ) => a == b && ma == mb && la == lb,
            (Agg(a), Agg(b)) => a == b,
            _ => false,
        }
    }
}

/// Address space of a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddrSpace {
    None,
    Kernel,
    User,
}

/// Stack walk flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackMode {
    Bpftrace,
    Perf,
    Raw,
}

impl StackMode {
    pub fn from_ident(name: &str) -> Option<Self> {
        match name {
            "bpftrace" => Some(StackMode::Bpftrace),
            "perf" => Some(StackMode::Perf),
            "raw" => Some(StackMode::Raw),
            _ => None,
        }
    }
}

/// Clock selecting the epoch of `nsecs()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampMode {
    Boot,
    Monotonic,
    Tai,
    SwTai,
}

impl TimestampMode {
    pub fn from_ident(name: &str) -> Option<Self> {
        match name {
            "boot" => Some(TimestampMode::Boot),
            "monotonic" => Some(TimestampMode::Monotonic),
            "tai" => Some(TimestampMode::Tai),
            "sw_tai" => Some(TimestampMode::SwTai),
            _ => None,
        }
    }
}

/// Aggregation kind. The signed flavors track the signedness of the
/// aggregated operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggKind {
    Count,
    Sum { signed: bool },
    Min { signed: bool },
    Max { signed: bool },
    Avg { signed: bool },
    Stats { signed: bool },
    Hist,
    Lhist,
    Tseries,
}

impl AggKind {
    /// Aggregations whose current value reads back as a plain integer.
    pub fn is_castable(&self) -> bool {
        matches!(
            self,
            AggKind::Count
                | AggKind::Sum { .. }
                | AggKind::Min { .. }
                | AggKind::Max { .. }
                | AggKind::Avg { .. }
        )
    }

    /// Signedness of the integer a castable aggregation reads back as.
    pub fn read_signed(&self) -> bool {
        match self {
            AggKind::Count => false,
            AggKind::Sum { signed }
            | AggKind::Min { signed }
            | AggKind::Max { signed }
            | AggKind::Avg { signed }
            | AggKind::Stats { signed } => *signed,
            AggKind::Hist | AggKind::Lhist | AggKind::Tseries => false,
        }
    }

    /// Example call for the "must be called directly" diagnostics.
    pub fn example(&self) -> &'static str {
        match self {
            AggKind::Count => "count();",
            AggKind::Sum { .. } => "sum(retval);",
            AggKind::Min { .. } => "min(retval);",
            AggKind::Max { .. } => "max(retval);",
            AggKind::Avg { .. } => "avg(retval);",
            AggKind::Stats { .. } => "stats(arg2);",
            AggKind::Hist => "hist(retval);",
            AggKind::Lhist => "lhist(rand %10, 0, 10, 1);",
            AggKind::Tseries => "tseries(rand %10, 10s, 1);",
        }
    }
}

impl fmt::Display for AggKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggKind::Count => "count_t",
            AggKind::Sum { signed: true } => "sum_t",
            AggKind::Sum { signed: false } => "usum_t",
            AggKind::Min { signed: true } => "min_t",
            AggKind::Min { signed: false } => "umin_t",
            AggKind::Max { signed: true } => "max_t",
            AggKind::Max { signed: false } => "umax_t",
            AggKind::Avg { signed: true } => "avg_t",
            AggKind::Avg { signed: false } => "uavg_t",
            AggKind::Stats { signed: true } => "stats_t",
            AggKind::Stats { signed: false } => "ustats_t",
            AggKind::Hist => "hist_t",
            AggKind::Lhist => "lhist_t",
            AggKind::Tseries => "tseries_t",
        };
        write!(f, "{name}")
    }
}

impl SizedType {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            ctx: false,
            ts_mode: None,
        }
    }

    pub fn none() -> Self {
        Self::new(TypeKind::None)
    }

    pub fn void() -> Self {
        Self::new(TypeKind::Void)
    }

    pub fn bool() -> Self {
        Self::new(TypeKind::Bool)
    }

    pub fn integer(bits: u8, signed: bool) -> Self {
        Self::new(TypeKind::Integer { bits, signed })
    }

    pub fn int64() -> Self {
        Self::integer(64, true)
    }

    pub fn uint64() -> Self {
        Self::integer(64, false)
    }

    pub fn uint32() -> Self {
        Self::integer(32, false)
    }

    pub fn string(cap: u64) -> Self {
        Self::new(TypeKind::String { cap })
    }

    pub fn buffer(cap: u64) -> Self {
        Self::new(TypeKind::Buffer { cap })
    }

    pub fn pointer(pointee: SizedType, addr_space: AddrSpace) -> Self {
        Self::new(TypeKind::Pointer {
            pointee: Box::new(pointee),
            addr_space,
        })
    }

    pub fn array(elem: SizedType, len: u64) -> Self {
        Self::new(TypeKind::Array {
            elem: Box::new(elem),
            len,
        })
    }

    pub fn record(name: impl Into<String>) -> Self {
        Self::new(TypeKind::Record { name: name.into() })
    }

    pub fn tuple(fields: Vec<SizedType>) -> Self {
        Self::new(TypeKind::Tuple { fields })
    }

    pub fn stack(user: bool, mode: StackMode, limit: u32) -> Self {
        Self::new(TypeKind::Stack { user, mode, limit })
    }

    pub fn agg(kind: AggKind) -> Self {
        Self::new(TypeKind::Agg(kind))
    }

    pub fn timestamp(mode: TimestampMode) -> Self {
        Self::new(TypeKind::Timestamp { mode })
    }

    /// Copy of `self` with the context-access tag set.
    pub fn as_ctx(mut self) -> Self {
        self.ctx = true;
        self
    }

    /// Copy of `self` tagged with the clock it was read from.
    pub fn with_ts_mode(mut self, mode: TimestampMode) -> Self {
        self.ts_mode = Some(mode);
        self
    }

    pub fn is_none(&self) -> bool {
        matches!(self.kind, TypeKind::None)
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    pub fn is_int(&self) -> bool {
        matches!(self.kind, TypeKind::Integer { .. })
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.kind, TypeKind::Bool)
    }

    pub fn is_string(&self) -> bool {
        matches!(self.kind, TypeKind::String { .. })
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self.kind, TypeKind::Buffer { .. })
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    pub fn is_record(&self) -> bool {
        matches!(self.kind, TypeKind::Record { .. })
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self.kind, TypeKind::Tuple { .. })
    }

    pub fn is_stack(&self) -> bool {
        matches!(self.kind, TypeKind::Stack { .. })
    }

    pub fn is_agg(&self) -> bool {
        matches!(self.kind, TypeKind::Agg(_))
    }

    pub fn is_ctx(&self) -> bool {
        matches!(self.kind, TypeKind::Ctx)
    }

    pub fn agg_kind(&self) -> Option<AggKind> {
        match self.kind {
            TypeKind::Agg(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn int_bits(&self) -> Option<u8> {
        match self.kind {
            TypeKind::Integer { bits, .. } => Some(bits),
            _ => None,
        }
    }

    /// Signedness of integers; non-integers report unsigned.
    pub fn is_signed(&self) -> bool {
        matches!(self.kind, TypeKind::Integer { signed: true, .. })
    }

    pub fn pointee(&self) -> Option<&SizedType> {
        match &self.kind {
            TypeKind::Pointer { pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    pub fn record_name(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Record { name } => Some(name),
            _ => None,
        }
    }

    pub fn tuple_fields(&self) -> Option<&[SizedType]> {
        match &self.kind {
            TypeKind::Tuple { fields } => Some(fields),
            _ => None,
        }
    }

    pub fn string_cap(&self) -> Option<u64> {
        match self.kind {
            TypeKind::String { cap } => Some(cap),
            _ => None,
        }
    }

    /// Size of the value in bytes, where it has one.
    pub fn size_bytes(&self, records: &dyn Fn(&str) -> Option<u64>) -> Option<u64> {
        match &self.kind {
            TypeKind::Integer { bits, .. } => Some(u64::from(*bits) / 8),
            TypeKind::Bool => Some(1),
            TypeKind::String { cap } | TypeKind::Buffer { cap } => Some(*cap),
            TypeKind::Pointer { .. } => Some(8),
            TypeKind::Array { elem, len } => Some(elem.size_bytes(records)? * len),
            TypeKind::Record { name } => records(name),
            _ => None,
        }
    }

    /// Whether an integer literal fits this integer type.
    ///
    /// `negative` means the literal value is `-(magnitude)`.
    pub fn literal_fits(&self, magnitude: u64, negative: bool) -> bool {
        let TypeKind::Integer { bits, signed } = self.kind else {
            return false;
        };
        if negative {
            if !signed {
                return false;
            }
            // magnitude of i<bits>::MIN
            let min_mag = 1u64 << (bits - 1);
            return magnitude <= min_mag;
        }
        let max = if signed {
            (1u128 << (bits - 1)) - 1
        } else if bits == 64 {
            u64::MAX as u128
        } else {
            (1u128 << bits) - 1
        };
        u128::from(magnitude) <= max
    }

    /// Widen an integer type to 64 bits, keeping signedness. Used for map
    /// keys and values, which are always stored as 64-bit cells.
    pub fn promoted(&self) -> SizedType {
        match self.kind {
            TypeKind::Integer { signed, .. } => SizedType::integer(64, signed),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for SizedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::None => write!(f, "none"),
            TypeKind::Void => write!(f, "void"),
            TypeKind::Integer { bits, signed } => {
                if *signed {
                    write!(f, "int{bits}")
                } else {
                    write!(f, "uint{bits}")
                }
            }
            TypeKind::Bool => write!(f, "bool"),
            TypeKind::String { .. } => write!(f, "string"),
            TypeKind::Buffer { .. } => write!(f, "buffer"),
            TypeKind::Pointer { pointee, .. } => {
                if pointee.is_pointer() {
                    write!(f, "{pointee}*")
                } else {
                    write!(f, "{pointee} *")
                }
            }
            TypeKind::Array { elem, len } => write!(f, "{elem}[{len}]"),
            TypeKind::Record { name } => write!(f, "{name}"),
            TypeKind::Tuple { fields } => {
                write!(f, "(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i != 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, ")")
            }
            TypeKind::Stack { user: true, .. } => write!(f, "ustack"),
            TypeKind::Stack { user: false, .. } => write!(f, "kstack"),
            TypeKind::Agg(kind) => write!(f, "{kind}"),
            TypeKind::Ksym => write!(f, "ksym"),
            TypeKind::Usym => write!(f, "usym"),
            TypeKind::Inet => write!(f, "inet"),
            TypeKind::MacAddr => write!(f, "mac_address"),
            TypeKind::CgroupPath => write!(f, "cgroup_path_t"),
            TypeKind::Strerror => write!(f, "strerror_t"),
            TypeKind::Timestamp { .. } => write!(f, "timestamp"),
            TypeKind::Ctx => write!(f, "ctx"),
        }
    }
}
