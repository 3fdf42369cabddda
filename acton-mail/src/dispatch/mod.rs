//! Bounded worker pool for outbound mail
//!
//! A [`Dispatcher`] owns a bounded intake queue and a fixed set of workers.
//! Collaborators submit payloads through a [`MailQueue`]; the dispatcher's matching
//! loop pairs each queued job with the next worker that announces itself idle, and
//! that worker runs the job through the [`MailPipeline`].
//!
//! # Architecture
//!
//! ```text
//! MailQueue ──► intake (mpsc, bounded) ──► matching loop
//!                                              │ spawns one matching task per job
//!                                              ▼
//!              idle registry (mpsc) ◄── IdleWorker announcements
//!                                              │ job sent through the worker's slot
//!                                              ▼
//!                                  Worker ──► MailPipeline ──► MailTransport
//! ```
//!
//! Submission is fire-and-forget. Outcomes are logged and, for callers that want
//! them, published as [`DispatchEvent`]s.

mod cancellation;
mod dispatcher;
mod error;
mod job;
mod pipeline;
mod worker;

pub use cancellation::CancellationToken;
pub use dispatcher::{DispatchEvent, Dispatcher, DispatcherHandle, MailQueue};
pub use error::DispatchError;
pub use job::{JobId, MailJob};
pub use pipeline::MailPipeline;
pub use worker::{IdleWorker, WorkerHandle, WorkerId, WorkerState};

pub(crate) use worker::Worker;
