//! Delivery job types

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::email::MailPayload;

/// Unique identifier for a delivery job
///
/// Only used to correlate a job's log lines and events; submitters never see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random job ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of work: a payload waiting to be rendered and sent
#[derive(Debug, Clone)]
pub struct MailJob {
    id: JobId,
    payload: MailPayload,
}

impl MailJob {
    /// Wrap a payload in a new job
    #[must_use]
    pub fn new(payload: MailPayload) -> Self {
        Self {
            id: JobId::new(),
            payload,
        }
    }

    /// The job's identifier
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// The payload to deliver
    #[must_use]
    pub const fn payload(&self) -> &MailPayload {
        &self.payload
    }
}
