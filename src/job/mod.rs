//! The resumable scan/delete job engine.
//!
//! A [`JobController`] owns the session (progress, checkpoint, job log) and
//! runs at most one job at a time on a background task:
//!
//! - a **scan** enumerates communities and conversations and records which
//!   ones hold authored messages;
//! - a **deletion** walks the selected targets, deleting page by page and
//!   checkpointing after every message so it can resume after a restart.
//!
//! Pause and cancel are cooperative: the job observes them before each page
//! search and before each delete, never in the middle of a remote call.

mod context;
mod control;
mod controller;
mod model;
mod orchestrator;
mod scanner;
#[cfg(test)]
pub(crate) mod testing;

pub use control::JobControl;
pub use controller::JobController;
pub use model::*;
use thiserror::Error;

use crate::{api::ApiError, store::StoreError};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("No auth token captured. Provide a token with --token or capture_credential.")]
    MissingCredential,

    #[error("No scan results. Run a scan first.")]
    NoScanResults,

    #[error("No selected targets to resume.")]
    NoSelectedTargets,

    #[error("Unknown user identity. Run a scan first.")]
    MissingIdentity,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Checkpoint store error: {0}")]
    Store(#[from] StoreError),
}

pub type JobResult<T> = Result<T, JobError>;
