//! Named C records (structs, unions, enums) and the registry interning them.
//!
//! Records are produced by the earlier C-definition passes (clang parsing,
//! tracepoint format parsing) and are sealed by the time semantic analysis
//! runs; the analyser only reads them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::types::SizedType;

/// One field of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: SizedType,
    /// Byte offset within the record
    pub offset: u64,
    /// Set for bitfield members; (bit offset, bit width)
    pub bitfield: Option<(u8, u8)>,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: SizedType, offset: u64) -> Self {
        Self {
            name: name.into(),
            ty,
            offset,
            bitfield: None,
        }
    }
}

/// A named record type.
///
/// The name includes the C keyword, e.g. `struct task_struct` or
/// `union sigval`, matching how the type is written in diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub fields: Vec<Field>,
    pub size: u64,
}

impl Record {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            size: 0,
        }
    }

    pub fn with_fields(name: impl Into<String>, fields: Vec<Field>, size: u64) -> Self {
        Self {
            name: name.into(),
            fields,
            size,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

/// Process-wide table of records, interned by name.
///
/// Insertion order is preserved so generated C declarations and diagnostics
/// come out in first-seen order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordRegistry {
    records: IndexMap<String, Record>,
    /// Enum variant tables: enum name -> (variant name -> value)
    enums: IndexMap<String, IndexMap<String, u64>>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a record. The first definition wins; redefinitions of the same
    /// name are ignored, matching the dedup behavior of the C passes.
    pub fn add(&mut self, record: Record) {
        self.records.entry(record.name.clone()).or_insert(record);
    }

    pub fn get(&self, name: &str) -> Option<&Record> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn size_of(&self, name: &str) -> Option<u64> {
        self.records.get(name).map(|r| r.size)
    }

    pub fn add_enum(&mut self, name: impl Into<String>, variants: IndexMap<String, u64>) {
        self.enums.entry(name.into()).or_insert(variants);
    }

    pub fn enum_variants(&self, name: &str) -> Option<&IndexMap<String, u64>> {
        self.enums.get(name)
    }

    /// Look up an enum variant by bare identifier across all enums.
    pub fn enum_value(&self, ident: &str) -> Option<(String, u64)> {
        for (enum_name, variants) in &self.enums {
            if let Some(val) = variants.get(ident) {
                return Some((enum_name.clone(), *val));
            }
        }
        None
    }
}
