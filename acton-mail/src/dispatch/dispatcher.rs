//! Job intake and worker matching

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    CancellationToken, DispatchError, IdleWorker, JobId, MailJob, MailPipeline, Worker,
    WorkerHandle, WorkerId,
};
use crate::config::{DispatchSettings, PreferenceStore};
use crate::email::MailPayload;

const EVENT_CAPACITY: usize = 256;

type Registry = Arc<Mutex<mpsc::Receiver<IdleWorker>>>;

/// Something that happened to a job or worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// A worker began processing a job
    JobStarted {
        /// Job being processed
        job: JobId,
        /// Worker processing it
        worker: WorkerId,
    },
    /// A job's message was accepted by the transport
    JobSent {
        /// Job that was sent
        job: JobId,
        /// Worker that sent it
        worker: WorkerId,
    },
    /// A job was dropped without being sent
    JobAbandoned {
        /// Job that was dropped
        job: JobId,
        /// Worker that was processing it, if one was assigned
        worker: Option<WorkerId>,
        /// Why it was dropped
        reason: String,
    },
    /// A worker reached its terminal state
    WorkerStopped {
        /// Worker that stopped
        worker: WorkerId,
    },
}

/// Submits payloads to a running dispatcher
///
/// Cheap to clone. Submission is fire-and-forget: success means the job was
/// queued, not that it was sent.
#[derive(Debug, Clone)]
pub struct MailQueue {
    jobs: mpsc::Sender<MailJob>,
    preferences: PreferenceStore,
    capacity: usize,
}

impl MailQueue {
    /// Queue a payload, waiting only while the queue is full
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::QueueClosed` if the dispatcher has shut down.
    pub async fn submit(&self, payload: MailPayload) -> Result<(), DispatchError> {
        let job = self.prepare(payload);
        let job_id = job.id();
        self.jobs
            .send(job)
            .await
            .map_err(|_| DispatchError::QueueClosed)?;
        debug!(job = %job_id, "Mail job queued");
        Ok(())
    }

    /// Queue a payload without waiting
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::QueueFull` if the queue has no room and
    /// `DispatchError::QueueClosed` if the dispatcher has shut down.
    pub fn try_submit(&self, payload: MailPayload) -> Result<(), DispatchError> {
        let job = self.prepare(payload);
        let job_id = job.id();
        self.jobs.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull(self.capacity),
            mpsc::error::TrySendError::Closed(_) => DispatchError::QueueClosed,
        })?;
        debug!(job = %job_id, "Mail job queued");
        Ok(())
    }

    /// Maximum number of jobs waiting to be matched
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn prepare(&self, mut payload: MailPayload) -> MailJob {
        let preferences = self.preferences.snapshot();
        payload.apply_default_sender(
            preferences.get_non_empty("smtp_from_email"),
            preferences.get_non_empty("smtp_from_name"),
        );
        MailJob::new(payload)
    }
}

/// Configures and starts the worker pool
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use acton_mail::config::{MailConfig, PreferenceStore, Preferences};
/// use acton_mail::dispatch::{Dispatcher, MailPipeline};
/// use acton_mail::email::{MailPayload, SmtpTransport};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = MailConfig::load_for_service("monitor")?;
/// let preferences = PreferenceStore::new(
///     Preferences::new()
///         .with("smtp_server", "smtp.example.com")
///         .with("smtp_port", "587")
///         .with("smtp_from_email", "monitor@example.com"),
/// );
///
/// let pipeline = MailPipeline::from_config(&config, Arc::new(SmtpTransport), preferences)?;
/// let dispatcher = Dispatcher::new(config.dispatch, pipeline).start();
///
/// dispatcher
///     .queue()
///     .submit(MailPayload::new().to("ops@example.com").subject("Host down"))
///     .await?;
///
/// dispatcher.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Dispatcher {
    settings: DispatchSettings,
    pipeline: MailPipeline,
}

impl Dispatcher {
    /// Create a dispatcher; nothing runs until [`Dispatcher::start`]
    #[must_use]
    pub const fn new(settings: DispatchSettings, pipeline: MailPipeline) -> Self {
        Self { settings, pipeline }
    }

    /// Spawn the workers and the matching loop
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(self) -> DispatcherHandle {
        let worker_count = self.settings.workers.max(1);
        let capacity = self.settings.queue_capacity.max(1);

        let (jobs_tx, jobs_rx) = mpsc::channel(capacity);
        let (registry_tx, registry_rx) = mpsc::channel(worker_count);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut workers = Vec::with_capacity(worker_count);
        let mut tasks = Vec::with_capacity(worker_count);
        for id in 1..=worker_count {
            let (worker, handle) = Worker::new(
                id,
                self.pipeline.clone(),
                registry_tx.clone(),
                events.clone(),
            );
            tasks.push(tokio::spawn(worker.run()));
            workers.push(handle);
        }
        // Only workers hold the registry sender, so it closes when the last one stops.
        drop(registry_tx);

        let shutdown = CancellationToken::new();
        let matcher = tokio::spawn(match_jobs(
            jobs_rx,
            Arc::new(Mutex::new(registry_rx)),
            events.clone(),
            shutdown.clone(),
        ));

        info!(workers = worker_count, queue_capacity = capacity, "Mail dispatcher started");

        DispatcherHandle {
            queue: MailQueue {
                jobs: jobs_tx,
                preferences: self.pipeline.preferences().clone(),
                capacity,
            },
            workers,
            tasks,
            matcher,
            shutdown,
            events,
        }
    }
}

/// Control handle for a running dispatcher
#[derive(Debug)]
pub struct DispatcherHandle {
    queue: MailQueue,
    workers: Vec<WorkerHandle>,
    tasks: Vec<JoinHandle<()>>,
    matcher: JoinHandle<()>,
    shutdown: CancellationToken,
    events: broadcast::Sender<DispatchEvent>,
}

impl DispatcherHandle {
    /// A submitter for this dispatcher
    #[must_use]
    pub fn queue(&self) -> MailQueue {
        self.queue.clone()
    }

    /// Handles for every worker, ordered by id
    #[must_use]
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Ask one worker to stop at its next idle point
    ///
    /// Returns `false` if no worker has that id.
    pub fn stop_worker(&self, id: WorkerId) -> bool {
        self.workers
            .iter()
            .find(|worker| worker.id() == id)
            .map(WorkerHandle::stop)
            .is_some()
    }

    /// Observe job and worker events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// Stop every worker and the matching loop, then wait for the workers to exit
    ///
    /// Jobs already being processed finish. Jobs still queued are dropped.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in &self.workers {
            worker.stop();
        }

        if let Err(e) = self.matcher.await {
            error!(error = %e, "Matching loop failed");
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Worker task failed");
            }
        }

        info!("Mail dispatcher stopped");
    }
}

async fn match_jobs(
    mut jobs: mpsc::Receiver<MailJob>,
    registry: Registry,
    events: broadcast::Sender<DispatchEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        // Matching runs beside the loop so admission never waits for a free worker.
        tokio::spawn(assign(job, Arc::clone(&registry), events.clone()));
    }

    jobs.close();
    let mut dropped = 0usize;
    while jobs.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!(dropped, "Queued mail jobs dropped at shutdown");
    }
    debug!("Matching loop stopped");
}

async fn assign(mut job: MailJob, registry: Registry, events: broadcast::Sender<DispatchEvent>) {
    loop {
        let announcement = registry.lock().await.recv().await;

        let Some(idle) = announcement else {
            warn!(job = %job.id(), "No workers left, mail job abandoned");
            let _ = events.send(DispatchEvent::JobAbandoned {
                job: job.id(),
                worker: None,
                reason: "no workers available".to_string(),
            });
            return;
        };

        let worker = idle.id();
        match idle.assign(job) {
            Ok(()) => {
                debug!(worker, "Mail job assigned");
                return;
            }
            Err(returned) => {
                debug!(worker, job = %returned.id(), "Worker stopped after announcing, rematching");
                job = returned;
            }
        }
    }
}
