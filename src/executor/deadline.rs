//! Cancellable execution deadline
//!
//! A bounded context arms a timer task on the current runtime. The context settles exactly
//! once: either the timer fires (`Expired`) or the owner cancels it (`Cancelled`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Lifecycle of a deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineState {
    /// Still running; neither expired nor cancelled
    Active,
    /// Cancelled before expiry, typically after the process finished
    Cancelled,
    /// The timeout elapsed first
    Expired,
}

/// Shared handle to an execution deadline
#[derive(Debug, Clone)]
pub struct DeadlineContext {
    state: Arc<watch::Sender<DeadlineState>>,
    timeout: Option<Duration>,
}

impl DeadlineContext {
    /// A context that never expires
    pub fn unbounded() -> Self {
        let (tx, _) = watch::channel(DeadlineState::Active);
        Self {
            state: Arc::new(tx),
            timeout: None,
        }
    }

    /// Start a deadline; a zero timeout arms no timer
    ///
    /// Must be called within a Tokio runtime when `timeout` is non-zero.
    pub fn start(timeout: Duration) -> Self {
        if timeout.is_zero() {
            return Self::unbounded();
        }

        let (tx, _) = watch::channel(DeadlineState::Active);
        let state = Arc::new(tx);
        let timer = Arc::clone(&state);

        tokio::spawn(async move {
            let mut rx = timer.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if settle(&timer, DeadlineState::Expired) {
                        tracing::debug!(timeout_ms = timeout.as_millis() as u64, "deadline expired");
                    }
                }
                _ = rx.wait_for(|s| *s != DeadlineState::Active) => {}
            }
        });

        Self {
            state,
            timeout: Some(timeout),
        }
    }

    /// The configured timeout, if bounded
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Cancel the deadline; no effect once it has expired
    pub fn cancel(&self) {
        settle(&self.state, DeadlineState::Cancelled);
    }

    /// Current state
    pub fn state(&self) -> DeadlineState {
        *self.state.borrow()
    }

    pub fn is_expired(&self) -> bool {
        self.state() == DeadlineState::Expired
    }

    /// Wait until the context is settled either way
    pub async fn done(&self) -> DeadlineState {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|s| *s != DeadlineState::Active)
            .await
            .map(|s| *s);
        settled.unwrap_or(DeadlineState::Cancelled)
    }

    /// Resolve when the deadline expires; pend forever if it is cancelled instead
    pub async fn expired(&self) {
        if self.done().await != DeadlineState::Expired {
            std::future::pending::<()>().await;
        }
    }
}

/// Move an active deadline into `to`; returns whether this call settled it
fn settle(state: &watch::Sender<DeadlineState>, to: DeadlineState) -> bool {
    state.send_if_modified(|current| {
        if *current == DeadlineState::Active {
            *current = to;
            true
        } else {
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_stays_active() {
        let deadline = DeadlineContext::unbounded();
        assert_eq!(deadline.state(), DeadlineState::Active);
        assert!(deadline.timeout().is_none());
        assert!(!deadline.is_expired());
    }

    #[test]
    fn test_zero_timeout_is_unbounded() {
        // No runtime needed: nothing is spawned
        let deadline = DeadlineContext::start(Duration::ZERO);
        assert!(deadline.timeout().is_none());
    }

    #[test]
    fn test_cancel_settles_once() {
        let deadline = DeadlineContext::unbounded();
        deadline.cancel();
        assert_eq!(deadline.state(), DeadlineState::Cancelled);
        deadline.cancel();
        assert_eq!(deadline.state(), DeadlineState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_timeout() {
        let deadline = DeadlineContext::start(Duration::from_secs(3));
        assert_eq!(deadline.state(), DeadlineState::Active);

        deadline.expired().await;
        assert!(deadline.is_expired());

        // Cancelling after expiry does not change the outcome
        deadline.cancel();
        assert_eq!(deadline.state(), DeadlineState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_expiry() {
        let deadline = DeadlineContext::start(Duration::from_secs(10));
        let observer = deadline.clone();

        deadline.cancel();
        assert_eq!(observer.done().await, DeadlineState::Cancelled);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(observer.state(), DeadlineState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_pends_when_cancelled() {
        let deadline = DeadlineContext::start(Duration::from_secs(1));
        deadline.cancel();

        let waited =
            tokio::time::timeout(Duration::from_secs(5), deadline.expired()).await;
        assert!(waited.is_err());
    }
}
