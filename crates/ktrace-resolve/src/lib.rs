// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Semantic analysis for the ktrace tracing DSL
//!
//! This crate holds the pass pipeline that turns a parsed program into a
//! fully decorated one: configuration application, tracepoint format
//! parsing, and the semantic analyser (name resolution, type inference and
//! checking, builtin call validation).

pub mod pass;
pub mod resolve;

pub use pass::{CompileEnv, Pass, PassManager};
pub use resolve::semantic::create_semantic_pass;
pub use resolve::tracefmt::create_tracepoint_format_pass;
