//! Side-effecting adapters used by the pipeline.

pub mod artifact_store;
pub mod backend;
pub mod config;
pub mod environment;
pub mod generation;
pub mod progress;
pub mod prompt;
pub mod sessions;
