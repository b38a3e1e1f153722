//! # scour-graph
//!
//! The research pipeline: a linear chain of stages over a per-task state
//! object, emitting progress into the task's event queue as it goes.
//!
//! ```text
//! START → initialize_task → generate_search_queries → web_search
//!       → process_content → synthesize_report → finalize_task → END
//! ```
//!
//! Stages never raise: each returns a state delta, or enqueues a terminal
//! error event and sets the cancellation signal.

pub mod citations;
pub mod stages;
pub mod state;

pub use stages::{run_research_graph, Services};
pub use state::{OverallState, StateDelta};
