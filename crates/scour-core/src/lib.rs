//! # scour-core
//!
//! Core types and primitives for the scour live-search orchestrator.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace: the unified error type, the research task data model, and the
//! SSE event stream flowing from a running task to its client.

pub mod error;
pub mod event;
pub mod types;

pub use error::{Result, ScourError};
pub use event::{EventQueue, EventReceiver, TaskEvent};
pub use types::*;
