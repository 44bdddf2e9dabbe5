//! Shared session state and the handle a running job uses to touch it.

use std::{future::Future, sync::Arc};

use parking_lot::Mutex;

use super::{Checkpoint, JobControl, JobLog, JobProgress, JobResult, LogEntry, Phase, Severity};
use crate::{
    api::RemoteClient,
    config::JobConfig,
    events::{StateBroadcaster, StateUpdate},
    store::CheckpointWriter,
};

/// Everything a job reads and writes, guarded by one lock.
pub(crate) struct Session {
    pub progress: JobProgress,
    pub checkpoint: Checkpoint,
    pub log: JobLog,
    /// Selection of the most recent deletion, used by retry.
    pub last_target_ids: Vec<String>,
}

impl Session {
    pub fn new(max_logs: usize) -> Self {
        Self {
            progress: JobProgress::default(),
            checkpoint: Checkpoint::default(),
            log: JobLog::new(max_logs),
            last_target_ids: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> StateUpdate {
        StateUpdate {
            state: self.progress.clone(),
            logs: self.log.to_vec(),
        }
    }

    /// Copy progress into the checkpoint and stamp it.
    pub fn sync_checkpoint(&mut self) {
        self.checkpoint.state = self.progress.clone();
        self.checkpoint.updated_at = super::model::now_millis();
    }

    /// Back to a blank idle job, keeping only the credential flag.
    pub fn reset(&mut self) {
        let has_credential = self.progress.has_credential;
        self.progress = JobProgress {
            has_credential,
            ..Default::default()
        };
        self.checkpoint = Checkpoint::fresh(&self.progress);
        self.log.clear();
        self.last_target_ids.clear();
    }
}

/// Collaborators shared by the controller and every job it runs.
pub(crate) struct Shared {
    pub remote: Arc<dyn RemoteClient>,
    pub writer: CheckpointWriter,
    pub events: StateBroadcaster,
    pub config: JobConfig,
    pub session: Mutex<Session>,
}

impl Shared {
    /// Publish a snapshot. Called with the session lock held so updates go
    /// out in mutation order.
    pub fn publish_locked(&self, session: &mut Session) {
        session.progress.has_credential = self.remote.has_credential();
        self.events.publish(session.snapshot());
    }

    /// Append to the job log, persist it and publish.
    pub fn log_locked(&self, session: &mut Session, level: Severity, message: String) {
        match level {
            Severity::Info | Severity::Success => tracing::info!(target: "sweeper::job", "{message}"),
            Severity::Warn => tracing::warn!(target: "sweeper::job", "{message}"),
            Severity::Error => tracing::error!(target: "sweeper::job", "{message}"),
        }
        session.log.push(LogEntry::now(level, message));
        self.writer.save_logs(&session.log.to_vec());
        self.publish_locked(session);
    }

    pub fn save_checkpoint_locked(&self, session: &mut Session) {
        session.sync_checkpoint();
        self.writer.save_checkpoint(&session.checkpoint);
    }
}

/// A job's view of the shared session.
///
/// Every mutation re-checks cancellation while holding the session lock. The
/// controller cancels before it takes the lock to reset, so once a job is
/// cancelled none of its writes can land after the reset.
#[derive(Clone)]
pub(crate) struct JobContext {
    pub shared: Arc<Shared>,
    pub control: JobControl,
}

impl JobContext {
    pub fn new(shared: Arc<Shared>, control: JobControl) -> Self {
        Self { shared, control }
    }

    pub fn remote(&self) -> &dyn RemoteClient {
        self.shared.remote.as_ref()
    }

    pub fn config(&self) -> &JobConfig {
        &self.shared.config
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Run `f` against the session unless the job has been cancelled.
    pub fn update<R>(&self, f: impl FnOnce(&Shared, &mut Session) -> R) -> Option<R> {
        let mut session = self.shared.session.lock();
        if self.control.is_cancelled() {
            return None;
        }
        Some(f(&self.shared, &mut session))
    }

    pub fn broadcast(&self) {
        self.update(|shared, session| shared.publish_locked(session));
    }

    pub fn log(&self, level: Severity, message: impl Into<String>) {
        let message = message.into();
        self.update(|shared, session| shared.log_locked(session, level, message));
    }

    /// Save the checkpoint and wait until it is durable.
    pub async fn persist_checkpoint(&self) -> JobResult<()> {
        if self.update(|shared, session| shared.save_checkpoint_locked(session)).is_some() {
            self.shared.writer.flush().await?;
        }
        Ok(())
    }

    pub fn set_phase(&self, phase: Phase) {
        self.update(|shared, session| {
            session.progress.phase = phase;
            shared.publish_locked(session);
        });
    }

    /// Drive a remote call unless cancelled first.
    pub async fn call<F: Future>(&self, future: F) -> Option<F::Output> {
        self.control.run(future).await
    }

    /// Suspend while paused. Returns `false` if the job was cancelled.
    pub async fn wait_if_paused(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if !self.control.is_paused() {
            return true;
        }

        self.set_phase(Phase::Paused);
        if !self.control.wait_resumed().await {
            return false;
        }
        self.update(|shared, session| {
            if session.progress.phase == Phase::Paused {
                session.progress.phase = Phase::Deleting;
                shared.publish_locked(session);
            }
        });
        true
    }
}
