//! # scour-config
//!
//! Configuration for the scour orchestrator. Settings come from `scour.toml`
//! with environment-variable overrides; the active embedding model and
//! per-provider API credentials can additionally be resolved from the
//! application SQLite database at startup.

pub mod appdb;
pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::ScourConfig;
