//! The global map table.
//!
//! Maps are process-global and typed by their first use: the first
//! assignment fixes the value type, the first access fixes scalarity and
//! the key type. Everything after that must agree. The table persists
//! across analyser passes so types settled in one pass carry into the next.

use std::fmt;

use indexmap::IndexMap;
use ktrace_ast::foundation::{SizedType, Span};

/// Map storage class, from `let @m = <class>(<max_entries>);`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Hash,
    LruHash,
    PercpuHash,
    PercpuLruHash,
    PercpuArray,
}

impl StorageClass {
    pub fn from_ident(name: &str) -> Option<Self> {
        match name {
            "hash" => Some(StorageClass::Hash),
            "lruhash" => Some(StorageClass::LruHash),
            "percpuhash" => Some(StorageClass::PercpuHash),
            "percpulruhash" => Some(StorageClass::PercpuLruHash),
            "percpuarray" => Some(StorageClass::PercpuArray),
            _ => None,
        }
    }

    /// All accepted spellings, for the invalid-class hint.
    pub const NAMES: &'static str = "percpulruhash, percpuarray, percpuhash, lruhash, hash";

    /// Whether this declared class can hold a map whose value/key shape
    /// demands `required`.
    pub fn satisfies(&self, required: StorageClass) -> bool {
        match required {
            StorageClass::Hash => matches!(self, StorageClass::Hash | StorageClass::LruHash),
            StorageClass::PercpuHash => {
                matches!(self, StorageClass::PercpuHash | StorageClass::PercpuLruHash)
            }
            StorageClass::PercpuArray => matches!(self, StorageClass::PercpuArray),
            // lruhash / percpulruhash are never *required*, only declared
            other => *self == other,
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageClass::Hash => "hash",
            StorageClass::LruHash => "lruhash",
            StorageClass::PercpuHash => "percpuhash",
            StorageClass::PercpuLruHash => "percpulruhash",
            StorageClass::PercpuArray => "percpuarray",
        };
        write!(f, "{name}")
    }
}

/// An explicit `let @m = class(n);` declaration.
#[derive(Debug, Clone)]
pub struct DeclInfo {
    pub storage: StorageClass,
    pub max_entries: u64,
    pub span: Span,
}

/// Everything the analyser knows about one map.
#[derive(Debug, Clone)]
pub struct MapInfo {
    /// `none` until the first assignment settles it
    pub value_type: SizedType,
    /// Key type of a non-scalar map; meaningless while `scalar` is unset
    pub key_type: SizedType,
    /// `Some(true)` = used without a key, `Some(false)` = used with one
    pub scalar: Option<bool>,
    /// Span of the use that fixed `scalar`
    pub first_use: Span,
    pub decl: Option<DeclInfo>,
    /// An assignment was seen somewhere in the program
    pub assigned: bool,
    /// The map is read or passed to a map builtin
    pub used: bool,
}

impl MapInfo {
    fn new(first_use: Span) -> Self {
        Self {
            value_type: SizedType::none(),
            key_type: SizedType::none(),
            scalar: None,
            first_use,
            decl: None,
            assigned: false,
            used: false,
        }
    }

    /// Storage class implied by the value type and scalarity.
    pub fn required_storage(&self) -> StorageClass {
        let per_cpu = self.value_type.is_agg();
        match (per_cpu, self.scalar.unwrap_or(true)) {
            (true, true) => StorageClass::PercpuArray,
            (true, false) => StorageClass::PercpuHash,
            (false, _) => StorageClass::Hash,
        }
    }
}

/// Name-indexed map table; insertion order is program order, which keeps
/// diagnostics and generated output deterministic.
#[derive(Debug, Clone, Default)]
pub struct MapTable {
    maps: IndexMap<String, MapInfo>,
}

impl MapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&MapInfo> {
        self.maps.get(name)
    }

    pub fn entry(&mut self, name: &str, use_span: Span) -> &mut MapInfo {
        self.maps
            .entry(name.to_string())
            .or_insert_with(|| MapInfo::new(use_span))
    }

    pub fn declare(&mut self, name: &str, decl: DeclInfo) {
        let info = self.entry(name, decl.span);
        info.decl = Some(decl);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MapInfo)> {
        self.maps.iter()
    }
}
