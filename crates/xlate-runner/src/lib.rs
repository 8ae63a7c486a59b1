//! Model backends and runtime configuration for translation sessions.

pub mod backends;
pub mod config;

pub use config::{BackendKind, RunnerConfig};
