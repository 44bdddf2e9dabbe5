//! Cooperative pause and cancellation for a running job.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Pause/cancel signals shared between a job task and its controller.
///
/// Both are cooperative: the job observes them at its suspension points and
/// loop boundaries, never in the middle of a remote call.
#[derive(Debug, Clone)]
pub struct JobControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

impl JobControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Signal cancellation. Also releases a paused wait.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Block while paused. Returns `false` if cancelled first.
    pub async fn wait_resumed(&self) -> bool {
        let mut paused = self.paused.subscribe();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = paused.wait_for(|paused| !*paused) => !self.is_cancelled(),
        }
    }

    /// Sleep for `duration`. Returns `false` if cancelled first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Drive `future` to completion unless cancelled first.
    ///
    /// Dropping a remote call here abandons the wait for it; a request the
    /// rate limiter has already started still runs to completion.
    pub async fn run<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            output = future => Some(output),
        }
    }
}
