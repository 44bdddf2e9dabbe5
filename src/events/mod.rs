//! State broadcasting for job observers.
//!
//! The job engine publishes an immutable [`StateUpdate`] after every state
//! change. Observers (the CLI progress printer, the `serve` loop) subscribe
//! and render whatever they receive; nothing here affects job correctness.
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────────┐     ┌─────────────────┐
//! │   Job engine    │────>│ StateBroadcaster  │────>│    Observers    │
//! │ (scan, delete)  │     │    (broadcast)    │     │ (cli, serve)    │
//! └─────────────────┘     └───────────────────┘     └─────────────────┘
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{JobProgress, LogEntry};

/// Default channel capacity.
/// Slow receivers that fall further behind than this see `Lagged` and skip
/// to the newest snapshots, which is harmless since each update is complete.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Full snapshot of job state and the job log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub state: JobProgress,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone)]
pub struct StateBroadcaster {
    sender: broadcast::Sender<StateUpdate>,
    /// Total updates published.
    published: Arc<AtomicU64>,
    /// Updates published while nobody was listening.
    dropped: Arc<AtomicU64>,
}

impl StateBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish a snapshot. Returns the number of subscribers reached.
    pub fn publish(&self, update: StateUpdate) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(update) {
            Ok(count) => count,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for StateBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
