//! Submission error types

use thiserror::Error;

/// Errors returned when handing a payload to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The intake queue is full and the caller asked not to wait
    #[error("mail queue is full (max: {0})")]
    QueueFull(usize),

    /// The dispatcher has shut down
    #[error("mail queue is closed")]
    QueueClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(DispatchError::QueueFull(5).to_string(), "mail queue is full (max: 5)");
        assert_eq!(DispatchError::QueueClosed.to_string(), "mail queue is closed");
    }
}
