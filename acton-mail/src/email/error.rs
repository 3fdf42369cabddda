//! Email error types

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while turning a payload into a delivered message
///
/// Every variant except [`EmailError::Inline`] and [`EmailError::TextExtraction`]
/// abandons the job that produced it. Those two are recovered by the content
/// transformer with a degraded fallback.
#[derive(Debug, Error)]
pub enum EmailError {
    /// No template registered under the requested identifier
    #[error("could not get mail template {0}")]
    TemplateNotFound(String),

    /// A template failed to compile when the cache was built
    #[error("invalid mail template {name}: {source}")]
    TemplateSyntax {
        /// Template identifier
        name: String,
        /// Underlying compiler error
        #[source]
        source: minijinja::Error,
    },

    /// A template failed while executing against a job's data
    #[error("failed to render mail template: {0}")]
    Render(#[source] minijinja::Error),

    /// A required preference key is absent
    #[error("missing mail configuration key: {0}")]
    MissingConfig(&'static str),

    /// A preference value could not be interpreted
    #[error("invalid mail configuration: {0}")]
    InvalidConfig(String),

    /// Style inlining failed
    #[error("failed to inline styles: {0}")]
    Inline(String),

    /// Plain-text extraction failed
    #[error("failed to extract plain text: {0}")]
    TextExtraction(String),

    /// Invalid email address format
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    /// An attachment could not be read
    #[error("failed to attach {path}: {source}")]
    Attachment {
        /// Attachment path as given in the payload
        path: String,
        /// I/O error from reading the file
        #[source]
        source: std::io::Error,
    },

    /// The transport message could not be assembled
    #[error("failed to build message: {0}")]
    Build(String),

    /// Connecting to the SMTP server failed
    #[error("SMTP connection error: {0}")]
    Connection(String),

    /// The SMTP server rejected or dropped the message
    #[error("SMTP error: {0}")]
    Send(String),

    /// Sending did not finish in time
    #[error("SMTP send timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EmailError {
    /// Create an SMTP send error from a string message
    #[must_use]
    pub fn smtp<T: Into<String>>(msg: T) -> Self {
        Self::Send(msg.into())
    }

    /// Create a connection error from a string message
    #[must_use]
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a configuration error from a string message
    #[must_use]
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the content transformer recovers from this error locally
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Inline(_) | Self::TextExtraction(_))
    }
}
