//! Resolution passes: symbol tables, type algebra, the semantic analyser
//! and the tracepoint format parser.
//!
//! ```text
//! Parse → (macro/attachpoint/C passes) → Tracepoint formats → Semantic analysis
//!                                              ^^^^^^^^            ^^^^^^^^
//!                                              tracefmt            semantic
//! ```
//!
//! The semantic analyser is the centerpiece: a visitor that walks every
//! probe bottom-up, resolving names against the map table and the lexical
//! scratch-variable scopes, inferring types to a fixed point, and checking
//! builtin calls, control flow and probe-family constraints. Diagnostics
//! accumulate in the context sink; analysis never throws.

pub mod maps;
pub mod scopes;
pub mod semantic;
pub mod tracefmt;
pub mod types;
pub mod wildcard;
