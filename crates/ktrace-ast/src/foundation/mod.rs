//! Foundation types: source tracking, the type system, configuration and
//! kernel feature descriptors.

pub mod config;
pub mod features;
pub mod record;
pub mod span;
pub mod types;

pub use config::{Config, ConfigError, MacroGate};
pub use features::Features;
pub use record::{Field, Record, RecordRegistry};
pub use span::{SourceFile, SourceMap, Span};
pub use types::{AddrSpace, AggKind, SizedType, StackMode, TimestampMode, TypeKind};
