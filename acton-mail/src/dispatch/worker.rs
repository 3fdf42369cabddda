//! Long-lived delivery workers
//!
//! A worker loops through three states:
//!
//! ```text
//!            announce            job arrives
//!   ┌──────► Idle ─────────────────────────► Processing
//!   │         │                                  │
//!   │         │ stop                             │ pipeline done
//!   │         ▼                                  │
//!   │      Stopped                               │
//!   └────────────────────────────────────────────┘
//! ```
//!
//! Stop is only honoured while idle. A job that is already processing runs to
//! completion and the stop takes effect before the worker announces itself again.

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info};

use super::{CancellationToken, DispatchEvent, MailJob, MailPipeline};

/// Worker identity, starting at 1
pub type WorkerId = usize;

/// Observable worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a job
    Idle,
    /// Running a job through the pipeline
    Processing,
    /// Finished; never announces again
    Stopped,
}

/// A worker's announcement that it can take one job
///
/// Consumed by exactly one matching step.
#[derive(Debug)]
pub struct IdleWorker {
    id: WorkerId,
    slot: oneshot::Sender<MailJob>,
}

impl IdleWorker {
    /// The announcing worker
    #[must_use]
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    /// Hand a job to the announcing worker
    ///
    /// # Errors
    ///
    /// Returns the job if the worker stopped after announcing.
    pub fn assign(self, job: MailJob) -> Result<(), MailJob> {
        self.slot.send(job)
    }
}

/// Control and observation handle for one worker
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    stop: CancellationToken,
    state: watch::Receiver<WorkerState>,
}

impl WorkerHandle {
    /// The worker's identity
    #[must_use]
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    /// The worker's current state
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Ask the worker to stop at its next idle point
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait until the worker reaches `state`
    ///
    /// Returns immediately if the worker is already in `state`. Returns early if the
    /// worker task has gone away.
    pub async fn wait_for(&self, state: WorkerState) {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|current| *current == state).await;
    }
}

pub struct Worker {
    id: WorkerId,
    pipeline: MailPipeline,
    registry: mpsc::Sender<IdleWorker>,
    stop: CancellationToken,
    state: watch::Sender<WorkerState>,
    events: broadcast::Sender<DispatchEvent>,
}

impl Worker {
    pub(crate) fn new(
        id: WorkerId,
        pipeline: MailPipeline,
        registry: mpsc::Sender<IdleWorker>,
        events: broadcast::Sender<DispatchEvent>,
    ) -> (Self, WorkerHandle) {
        let stop = CancellationToken::new();
        let (state, state_rx) = watch::channel(WorkerState::Idle);

        let handle = WorkerHandle {
            id,
            stop: stop.clone(),
            state: state_rx,
        };
        let worker = Self {
            id,
            pipeline,
            registry,
            stop,
            state,
            events,
        };
        (worker, handle)
    }

    pub(crate) async fn run(self) {
        debug!(worker = self.id, "Worker started");

        while let Some(job) = self.next_job().await {
            self.process(job).await;
        }

        self.state.send_replace(WorkerState::Stopped);
        let _ = self.events.send(DispatchEvent::WorkerStopped { worker: self.id });
        info!(worker = self.id, "Worker stopped");
    }

    /// Announce, then wait for a job. `None` means stop.
    async fn next_job(&self) -> Option<MailJob> {
        if self.stop.is_cancelled() {
            return None;
        }

        let (slot, mut intake) = oneshot::channel();
        let announcement = IdleWorker { id: self.id, slot };
        if self.registry.send(announcement).await.is_err() {
            debug!(worker = self.id, "Idle registry closed");
            return None;
        }
        debug!(worker = self.id, "Worker idle");

        tokio::select! {
            biased;
            () = self.stop.cancelled() => {
                // Refuse further assignment; a job that already landed still runs.
                intake.close();
                intake.try_recv().ok()
            }
            received = &mut intake => received.ok(),
        }
    }

    async fn process(&self, job: MailJob) {
        let job_id = job.id();
        let template = self.pipeline.renderer().resolve(job.payload()).to_string();

        self.state.send_replace(WorkerState::Processing);
        let _ = self.events.send(DispatchEvent::JobStarted {
            job: job_id,
            worker: self.id,
        });
        debug!(worker = self.id, job = %job_id, template = %template, "Processing mail job");

        match self.pipeline.process(&job).await {
            Ok(()) => {
                info!(worker = self.id, job = %job_id, template = %template, "Mail job sent");
                let _ = self.events.send(DispatchEvent::JobSent {
                    job: job_id,
                    worker: self.id,
                });
            }
            Err(e) => {
                error!(
                    worker = self.id,
                    job = %job_id,
                    template = %template,
                    error = %e,
                    "Mail job abandoned"
                );
                let _ = self.events.send(DispatchEvent::JobAbandoned {
                    job: job_id,
                    worker: Some(self.id),
                    reason: e.to_string(),
                });
            }
        }

        self.state.send_replace(WorkerState::Idle);
    }
}
