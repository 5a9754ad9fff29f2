use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const NOT_CANCELLED: u8 = 0;
const CANCELLED: u8 = 1;
const DEADLINE_EXCEEDED: u8 = 2;

/// Where a call stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// The request was handed to the transport; the caller has not waited on it yet.
    Created,
    /// The caller is waiting for the response headers.
    Sending,
    HeadersReceived,
    /// At least one response frame has been read.
    Streaming,
    Finished,
    Cancelled,
    DeadlineExceeded,
    Disposed,
}

/// Why a call was torn down before it finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    /// The caller cancelled the call, directly or through a linked token.
    Cancelled,
    /// The deadline timer fired first.
    DeadlineExceeded,
}

impl Cancellation {
    pub fn to_status(self) -> tonic::Status {
        match self {
            Cancellation::Cancelled => tonic::Status::cancelled("Call cancelled"),
            Cancellation::DeadlineExceeded => tonic::Status::deadline_exceeded("Deadline exceeded"),
        }
    }
}

/// Cancellation signal and deadline timer shared by everything working on one call.
///
/// The first of explicit cancellation, the deadline timer and a linked parent token to fire
/// wins; the reason is recorded once and never overwritten, so the failure reported afterwards
/// tells a timeout apart from a user cancellation.
#[derive(Debug)]
pub struct CallState {
    token: CancellationToken,
    reason: AtomicU8,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl CallState {
    /// Creates the state of a new call and arms its deadline timer.
    ///
    /// `parent` cancels the call when it fires. Must be called from within a Tokio runtime when
    /// a deadline is given. A deadline already in the past fires right away.
    pub fn new(deadline: Option<Instant>, parent: Option<&CancellationToken>) -> Arc<Self> {
        let token = parent.map_or_else(CancellationToken::new, CancellationToken::child_token);

        let state = Arc::new(Self {
            token,
            reason: AtomicU8::new(NOT_CANCELLED),
            timer: Mutex::new(None),
        });

        if let Some(deadline) = deadline {
            let token = state.token.clone();
            let weak = Arc::downgrade(&state);
            let handle = tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        if weak.upgrade().is_some_and(|state| state.fire(DEADLINE_EXCEEDED)) {
                            tracing::debug!("call deadline exceeded");
                        }
                    }
                }
            });
            *state.timer.lock() = Some(handle);
        }

        state
    }

    /// Cancels the call. Returns `false` if it was already cancelled. Idempotent.
    pub fn cancel(&self) -> bool {
        let fired = self.fire(CANCELLED);
        if fired {
            tracing::debug!("call cancelled");
        }
        fired
    }

    fn fire(&self, reason: u8) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let won = self
            .reason
            .compare_exchange(NOT_CANCELLED, reason, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.token.cancel();
        }
        won
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Why the call was cancelled, if it was.
    pub fn cancellation(&self) -> Option<Cancellation> {
        if !self.token.is_cancelled() {
            return None;
        }
        match self.reason.load(Ordering::Acquire) {
            DEADLINE_EXCEEDED => Some(Cancellation::DeadlineExceeded),
            _ => Some(Cancellation::Cancelled),
        }
    }

    /// Completes when the call is cancelled for any reason.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stops the deadline timer. Safe to call any number of times.
    pub fn release(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

impl Drop for CallState {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn deadline_firing_first_reports_deadline_exceeded() {
        let state = CallState::new(Some(Instant::now() + Duration::from_secs(1)), None);
        assert_eq!(state.cancellation(), None);

        state.cancelled().await;
        assert_eq!(state.cancellation(), Some(Cancellation::DeadlineExceeded));

        // A late explicit cancellation does not rewrite history.
        assert!(!state.cancel());
        assert_eq!(state.cancellation(), Some(Cancellation::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_cancel_before_deadline_reports_cancelled() {
        let state = CallState::new(Some(Instant::now() + Duration::from_secs(10)), None);

        assert!(state.cancel());
        assert!(!state.cancel());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(state.cancellation(), Some(Cancellation::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_immediately() {
        let state = CallState::new(Some(Instant::now() - Duration::from_secs(1)), None);

        state.cancelled().await;
        assert_eq!(state.cancellation(), Some(Cancellation::DeadlineExceeded));
    }

    #[tokio::test]
    async fn parent_token_cancels_the_call() {
        let parent = CancellationToken::new();
        let state = CallState::new(None, Some(&parent));

        parent.cancel();
        state.cancelled().await;
        assert_eq!(state.cancellation(), Some(Cancellation::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn released_timer_never_fires() {
        let state = CallState::new(Some(Instant::now() + Duration::from_secs(1)), None);
        state.release();
        state.release();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!state.is_cancelled());
    }

    #[test]
    fn cancellation_maps_to_distinct_codes() {
        assert_eq!(
            Cancellation::Cancelled.to_status().code(),
            tonic::Code::Cancelled
        );
        assert_eq!(
            Cancellation::DeadlineExceeded.to_status().code(),
            tonic::Code::DeadlineExceeded
        );
    }
}
