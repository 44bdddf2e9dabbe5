//! Job lifecycle and command handling.

use std::{future::Future, sync::Arc};

use parking_lot::Mutex;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{error, info};

use super::{
    JobControl, JobError, JobResult, Phase,
    context::{JobContext, Session, Shared},
    orchestrator, scanner,
};
use crate::{
    api::RemoteClient,
    commands::{Command, Response},
    config::JobConfig,
    events::{StateBroadcaster, StateUpdate},
    store::{CheckpointWriter, KeyValueStore, StoreResult},
};

/// The job currently (or most recently) running.
struct ActiveJob {
    control: JobControl,
    handle: Option<JoinHandle<()>>,
    /// Flips to `true` when the job task returns.
    done: watch::Receiver<bool>,
}

impl Default for ActiveJob {
    fn default() -> Self {
        let (_, done) = watch::channel(true);
        Self {
            control: JobControl::new(),
            handle: None,
            done,
        }
    }
}

/// Owns the job session and runs at most one job at a time.
///
/// Construct once per process and share by reference; every front-end
/// command goes through [`JobController::handle`] or the matching method.
pub struct JobController {
    shared: Arc<Shared>,
    active: Mutex<ActiveJob>,
    /// Serialises job replacement so two starts cannot interleave.
    lifecycle: tokio::sync::Mutex<()>,
}

impl JobController {
    /// Create an idle controller. Must be called inside a Tokio runtime.
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        store: Arc<dyn KeyValueStore>,
        config: JobConfig,
        events: StateBroadcaster,
    ) -> Self {
        let writer = CheckpointWriter::spawn(store, config.max_log_entries);
        let mut session = Session::new(config.max_log_entries);
        session.progress.has_credential = remote.has_credential();

        Self {
            shared: Arc::new(Shared {
                remote,
                writer,
                events,
                config,
                session: parking_lot::Mutex::new(session),
            }),
            active: Mutex::new(ActiveJob::default()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the stored checkpoint and job log.
    ///
    /// A job that was interrupted mid-flight comes back `Paused` and can be
    /// continued with [`retry`](Self::retry).
    pub async fn restore(&self) -> StoreResult<()> {
        let checkpoint = self.shared.writer.load_checkpoint().await?;
        let logs = self.shared.writer.load_logs().await?;

        let mut session = self.shared.session.lock();
        session.log = super::JobLog::with_entries(self.shared.config.max_log_entries, logs);
        if let Some(checkpoint) = checkpoint {
            let mut progress = checkpoint.state.clone();
            if progress.phase.was_interrupted() {
                info!(phase = %progress.phase, "Restored interrupted job as paused");
                progress.phase = Phase::Paused;
            }
            session.last_target_ids = checkpoint.selected_target_ids.clone();
            session.progress = progress;
            session.checkpoint = checkpoint;
        }
        self.shared.publish_locked(&mut session);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.shared.events.subscribe()
    }

    /// Copy of the current state and log.
    pub fn snapshot(&self) -> StateUpdate {
        let mut session = self.shared.session.lock();
        session.progress.has_credential = self.shared.remote.has_credential();
        session.snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.shared.session.lock().progress.phase
    }

    pub fn capture_credential(&self, credential: String) {
        self.shared.remote.set_credential(credential);
        let mut session = self.shared.session.lock();
        self.shared.publish_locked(&mut session);
    }

    /// Cancel any running job and start a fresh scan.
    pub async fn start_scan(&self) -> JobResult<()> {
        self.ensure_credential()?;
        let shared = Arc::clone(&self.shared);
        self.replace_job(
            move |session| {
                session.reset();
                session.progress.phase = Phase::Scanning;
                shared.writer.clear_logs();
                shared.writer.clear_checkpoint();
            },
            scanner::run_scan,
        )
        .await;
        Ok(())
    }

    /// Cancel any running job and start deleting in `target_ids`.
    pub async fn start_deletion(&self, target_ids: Vec<String>) -> JobResult<()> {
        self.ensure_credential()?;
        if self.shared.session.lock().progress.scan_targets.is_empty() {
            return Err(JobError::NoScanResults);
        }
        self.launch_deletion(target_ids, false).await;
        Ok(())
    }

    pub fn pause(&self) {
        self.active.lock().control.pause();
    }

    pub fn resume(&self) {
        self.active.lock().control.resume();
    }

    /// Stop the running job and forget everything about it.
    pub async fn cancel(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let (control, handle) = {
            let mut active = self.active.lock();
            (active.control.clone(), active.handle.take())
        };
        control.cancel();

        {
            let mut session = self.shared.session.lock();
            session.reset();
            self.shared.writer.clear_checkpoint();
            self.shared.writer.clear_logs();
            self.shared.publish_locked(&mut session);
        }
        info!("Job cancelled");
        join(handle).await;
    }

    /// Continue the most sensible way: resume an interrupted run, repeat the
    /// last selection, or fall back to a new scan.
    pub async fn retry(&self) -> JobResult<()> {
        self.ensure_credential()?;

        let (phase, has_targets, checkpoint_ids, last_ids) = {
            let session = self.shared.session.lock();
            (
                session.progress.phase,
                !session.progress.scan_targets.is_empty(),
                session.checkpoint.selected_target_ids.clone(),
                session.last_target_ids.clone(),
            )
        };

        if has_targets
            && !checkpoint_ids.is_empty()
            && matches!(phase, Phase::Paused | Phase::Error)
        {
            self.launch_deletion(checkpoint_ids, true).await;
            Ok(())
        } else if has_targets && !last_ids.is_empty() {
            self.launch_deletion(last_ids, false).await;
            Ok(())
        } else {
            self.start_scan().await
        }
    }

    /// Wait for the current job task to return.
    pub async fn wait(&self) {
        let mut done = self.active.lock().done.clone();
        // An error means the task is gone, which is just as final.
        let _ = done.wait_for(|done| *done).await;
    }

    /// Wait until every queued store write has been applied.
    pub async fn flush(&self) -> StoreResult<()> {
        self.shared.writer.flush().await
    }

    pub async fn handle(&self, command: Command) -> Response {
        let result = match command {
            Command::CaptureCredential { credential } => {
                self.capture_credential(credential);
                Ok(())
            }
            Command::GetState => return Response::State(self.snapshot()),
            Command::StartScan => self.start_scan().await,
            Command::StartDeletion { target_ids } => self.start_deletion(target_ids).await,
            Command::Pause => {
                self.pause();
                Ok(())
            }
            Command::Resume => {
                self.resume();
                Ok(())
            }
            Command::Cancel => {
                self.cancel().await;
                Ok(())
            }
            Command::Retry => self.retry().await,
        };

        match result {
            Ok(()) => Response::Ack,
            Err(error) => Response::error(error.to_string()),
        }
    }

    fn ensure_credential(&self) -> JobResult<()> {
        if self.shared.remote.has_credential() {
            Ok(())
        } else {
            Err(JobError::MissingCredential)
        }
    }

    async fn launch_deletion(&self, target_ids: Vec<String>, resume: bool) {
        self.replace_job(
            |_| {},
            move |ctx| orchestrator::run_deletion(ctx, target_ids, resume),
        )
        .await;
    }

    /// Stop the current job, apply `prepare` to the session, then spawn `job`.
    async fn replace_job<P, J, Fut>(&self, prepare: P, job: J)
    where
        P: FnOnce(&mut Session),
        J: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let _lifecycle = self.lifecycle.lock().await;

        let (previous, handle) = {
            let mut active = self.active.lock();
            (active.control.clone(), active.handle.take())
        };
        previous.cancel();
        join(handle).await;

        let control = JobControl::new();
        {
            let mut session = self.shared.session.lock();
            prepare(&mut session);
            self.shared.publish_locked(&mut session);
        }

        let (done_tx, done) = watch::channel(false);
        let task = job(JobContext::new(Arc::clone(&self.shared), control.clone()));
        let handle = tokio::spawn(async move {
            task.await;
            done_tx.send_replace(true);
        });

        *self.active.lock() = ActiveJob {
            control,
            handle: Some(handle),
            done,
        };
    }
}

async fn join(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle
        && let Err(e) = handle.await
        && e.is_panic()
    {
        error!(error = %e, "Job task panicked");
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        self.active.get_mut().control.cancel();
    }
}
