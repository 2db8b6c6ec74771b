//! Multi-role generate, validate and repair pipeline for single-file
//! browser games.
//!
//! A request flows through an architect (design and plan), an engineer
//! (implementation) and a validate/debugger loop bounded by a repair budget.
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (phase table, normalization,
//!   static rules, heuristics). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (generation backends, headless
//!   environment, filesystem, progress fan-out). Behind traits so tests can
//!   substitute doubles.
//!
//! [`pipeline`] and [`validate`] coordinate core logic with I/O to implement
//! the CLI commands and the HTTP server.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
