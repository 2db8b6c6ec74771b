//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod fallback;
pub mod heuristics;
pub mod invariants;
pub mod machine;
pub mod normalize;
pub mod rules;
pub mod script;
pub mod session;
pub mod static_check;
pub mod types;
