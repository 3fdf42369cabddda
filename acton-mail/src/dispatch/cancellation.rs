//! Stop signal for workers and the matching loop

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// A two-state continue/stop signal
///
/// Clones share the same state. Once cancelled a token stays cancelled.
///
/// ```rust
/// use acton_mail::dispatch::CancellationToken;
///
/// # async fn example() {
/// let token = CancellationToken::new();
/// let waiter = token.clone();
///
/// let task = tokio::spawn(async move {
///     waiter.cancelled().await;
/// });
///
/// token.cancel();
/// task.await.unwrap();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<CancellationState>,
}

#[derive(Debug)]
struct CancellationState {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    /// Create a token in the "continue" state
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            state: Arc::new(CancellationState { tx, rx }),
        }
    }

    /// Whether a stop has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.state.rx.borrow()
    }

    /// Request a stop
    pub fn cancel(&self) {
        let _ = self.state.tx.send(true);
        debug!("Stop requested");
    }

    /// Wait until a stop is requested
    ///
    /// Returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.rx.clone();
        // The sender lives as long as `self`, so `changed` cannot fail here.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_token_starts_running() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_shared_by_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();

        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();

        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }
}
