//! Ordered background persistence for the job engine.
//!
//! Progress is saved after every handled message. Those saves are queued and
//! applied in order by one background task, so the engine never waits on the
//! store mid-target; [`CheckpointWriter::flush`] waits for everything queued
//! before it when a durable boundary is needed, and reports the most recent
//! write failure since the previous flush.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{KeyValueStore, StoreError, StoreResult};
use crate::job::{Checkpoint, LogEntry};

/// Store key of the checkpoint record.
pub const CHECKPOINT_KEY: &str = "sweeper_progress";
/// Store key of the job log ring.
pub const LOGS_KEY: &str = "sweeper_logs";

enum WriteOp {
    Set { key: &'static str, bytes: Vec<u8> },
    Delete { key: &'static str },
    Flush(oneshot::Sender<StoreResult<()>>),
}

/// Handle to the background writer. Dropping every clone stops the task
/// once the queue is drained.
#[derive(Clone)]
pub struct CheckpointWriter {
    store: Arc<dyn KeyValueStore>,
    sender: mpsc::UnboundedSender<WriteOp>,
    max_logs: usize,
}

impl CheckpointWriter {
    /// Start the writer task on the current runtime.
    pub fn spawn(store: Arc<dyn KeyValueStore>, max_logs: usize) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let worker_store = Arc::clone(&store);

        tokio::spawn(async move {
            let mut last_error: Option<StoreError> = None;
            while let Some(op) = receiver.recv().await {
                let result = match op {
                    WriteOp::Set { key, bytes } => worker_store.set(key, &bytes).await,
                    WriteOp::Delete { key } => worker_store.delete(key).await,
                    WriteOp::Flush(done) => {
                        let _ = done.send(last_error.take().map_or(Ok(()), Err));
                        continue;
                    }
                };
                if let Err(error) = result {
                    warn!(error = %error, "Failed to persist job state");
                    last_error = Some(error);
                }
            }
            debug!("Checkpoint writer stopped");
        });

        Self {
            store,
            sender,
            max_logs: max_logs.max(1),
        }
    }

    /// Read the stored checkpoint. Unreadable fields fall back to defaults.
    pub async fn load_checkpoint(&self) -> StoreResult<Option<Checkpoint>> {
        Ok(self
            .store
            .get(CHECKPOINT_KEY)
            .await?
            .map(|bytes| Checkpoint::restore(&bytes)))
    }

    /// Read the stored job log. A corrupt log is discarded.
    pub async fn load_logs(&self) -> StoreResult<Vec<LogEntry>> {
        let Some(bytes) = self.store.get(LOGS_KEY).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice::<Vec<LogEntry>>(&bytes) {
            Ok(mut logs) => {
                let excess = logs.len().saturating_sub(self.max_logs);
                logs.drain(..excess);
                Ok(logs)
            }
            Err(error) => {
                warn!(error = %error, "Discarding unreadable job log");
                Ok(Vec::new())
            }
        }
    }

    /// Queue a checkpoint save without waiting for it.
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) {
        self.queue_json(CHECKPOINT_KEY, checkpoint);
    }

    /// Queue a save of the newest `max_logs` entries.
    pub fn save_logs(&self, logs: &[LogEntry]) {
        let start = logs.len().saturating_sub(self.max_logs);
        self.queue_json(LOGS_KEY, &logs[start..]);
    }

    pub fn clear_checkpoint(&self) {
        self.send(WriteOp::Delete {
            key: CHECKPOINT_KEY,
        });
    }

    pub fn clear_logs(&self) {
        self.send(WriteOp::Delete { key: LOGS_KEY });
    }

    /// Wait until every previously queued write has been applied. Fails with
    /// the latest write error seen since the last flush, if any.
    pub async fn flush(&self) -> StoreResult<()> {
        let (done, wait) = oneshot::channel();
        self.sender
            .send(WriteOp::Flush(done))
            .map_err(|_| StoreError::WriterClosed)?;
        wait.await.map_err(|_| StoreError::WriterClosed)?
    }

    fn queue_json<T: serde::Serialize + ?Sized>(&self, key: &'static str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.send(WriteOp::Set { key, bytes }),
            Err(error) => warn!(key, error = %error, "Failed to serialize job state"),
        }
    }

    fn send(&self, op: WriteOp) {
        if self.sender.send(op).is_err() {
            warn!("Checkpoint writer has shut down; dropping write");
        }
    }
}
