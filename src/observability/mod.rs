//! Observability module providing structured logging.
//!
//! Operator diagnostics flow through `tracing`; the user-facing job log lives
//! in [`crate::job::LogEntry`] and is mirrored here at the matching level.

mod tracing_init;

pub use tracing_init::*;
