//! Persistent, crash-recoverable media job queue with pluggable processors
//! and an AI provider fallback chain.
//!
//! Five components, leaves first: [`path_safety`] guards every filesystem
//! path the core touches; [`store`] is the synchronous embedded relational
//! store backing every job; [`filter_graph`] is a pure function mapping a
//! multi-clip timeline to a filter-graph string; [`ai_fallback`] iterates an
//! ordered chain of AI model configurations; [`queue`] is the state machine,
//! worker pool and recovery procedure that composes all of the above.

pub mod ai_fallback;
pub mod config;
pub mod error;
pub mod filter_graph;
pub mod path_safety;
pub mod queue;
pub mod store;
mod sync_ext;
pub mod toolchain;

pub use config::Config;
pub use queue::{Queue, JobSubmission};

/// Initializes a `tracing` subscriber reading `RUST_LOG` (or `info` if
/// unset). Call once near process start; safe to call more than once, later
/// calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
