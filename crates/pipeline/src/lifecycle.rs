//! Lifecycle state machine shared by sinks and sources
//!
//! ```text
//!   IDLE ──→ START ──→ STOP
//!     │        ↑ │       ↑
//!     │        │ ↓       │
//!     └─────→ ERROR ─────┘
//! ```
//!
//! `STOP` is terminal. State changes are published on a `watch` channel so
//! callers can wait for a state without polling.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::LifecycleError;

/// Component lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Idle,
    Start,
    Stop,
    Error,
}

impl LifecycleState {
    /// Running, or failed while trying to run
    pub const START_OR_ERROR: &'static [Self] = &[Self::Start, Self::Error];

    /// Stopped, or failed while stopping
    pub const STOP_OR_ERROR: &'static [Self] = &[Self::Stop, Self::Error];

    /// Whether `self -> next` is an allowed transition
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Start | Self::Error)
                | (Self::Start, Self::Stop | Self::Error)
                | (Self::Error, Self::Start | Self::Stop)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owned lifecycle of one component
#[derive(Debug)]
pub struct Lifecycle {
    component: String,
    state: watch::Sender<LifecycleState>,
    last_error: Mutex<Option<String>>,
}

impl Lifecycle {
    /// New lifecycle in `Idle`
    pub fn new(component: impl Into<String>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            component: component.into(),
            state,
            last_error: Mutex::new(None),
        }
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the move is not allowed; the state is
    /// left unchanged.
    pub fn transition(&self, next: LifecycleState) -> Result<(), LifecycleError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                outcome = Err(LifecycleError::InvalidTransition {
                    component: self.component.clone(),
                    from: *current,
                    to: next,
                });
                false
            }
        });

        if outcome.is_ok() {
            tracing::debug!(component = %self.component, state = %next, "lifecycle transition");
        }
        outcome
    }

    /// Move to `Error`, recording the failure
    pub fn fail(&self, error: impl fmt::Display) -> Result<(), LifecycleError> {
        *self.last_error.lock() = Some(error.to_string());
        self.transition(LifecycleState::Error)
    }

    /// Message of the most recent failure
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Cloneable read-only view
    pub fn handle(&self) -> LifecycleHandle {
        LifecycleHandle {
            state: self.state.subscribe(),
        }
    }
}

/// Read-only view of a [`Lifecycle`] for waiters
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    state: watch::Receiver<LifecycleState>,
}

impl LifecycleHandle {
    #[inline]
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Wait until the state is one of `states`
    ///
    /// Returns `false` if `timeout` elapses first, or if the lifecycle is
    /// dropped in a state not in `states`.
    pub async fn wait_for_one_of(&self, states: &[LifecycleState], timeout: Duration) -> bool {
        let mut rx = self.state.clone();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| states.contains(s)))
            .await
            .map(|seen| seen.is_ok());
        match waited {
            Ok(true) => true,
            Ok(false) => states.contains(&*rx.borrow()),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use LifecycleState::*;

    #[test]
    fn test_allowed_transitions() {
        let allowed = [
            (Idle, Start),
            (Idle, Error),
            (Start, Stop),
            (Start, Error),
            (Error, Start),
            (Error, Stop),
        ];
        for from in [Idle, Start, Stop, Error] {
            for to in [Idle, Start, Stop, Error] {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_stop_is_terminal() {
        let lifecycle = Lifecycle::new("sink");
        lifecycle.transition(Start).unwrap();
        lifecycle.transition(Stop).unwrap();

        let err = lifecycle.transition(Start).unwrap_err();
        assert!(err.to_string().contains("STOP -> START"));
        assert_eq!(lifecycle.state(), Stop);
    }

    #[test]
    fn test_fail_records_error() {
        let lifecycle = Lifecycle::new("source");
        assert!(lifecycle.last_error().is_none());
        lifecycle.fail("address in use").unwrap();
        assert_eq!(lifecycle.state(), Error);
        assert_eq!(lifecycle.last_error().as_deref(), Some("address in use"));

        // Recover
        lifecycle.transition(Start).unwrap();
        assert_eq!(lifecycle.state(), Start);
    }

    #[tokio::test]
    async fn test_wait_for_one_of_sees_transition() {
        let lifecycle = Lifecycle::new("sink");
        let handle = lifecycle.handle();

        let waiter = tokio::spawn(async move {
            handle
                .wait_for_one_of(LifecycleState::START_OR_ERROR, Duration::from_secs(5))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        lifecycle.transition(Start).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_one_of_times_out() {
        let lifecycle = Lifecycle::new("sink");
        let handle = lifecycle.handle();
        let reached = handle
            .wait_for_one_of(LifecycleState::STOP_OR_ERROR, Duration::from_millis(50))
            .await;
        assert!(!reached);
        assert_eq!(handle.state(), Idle);
    }

    #[tokio::test]
    async fn test_wait_for_current_state_returns_immediately() {
        let lifecycle = Lifecycle::new("sink");
        lifecycle.transition(Start).unwrap();
        let handle = lifecycle.handle();
        assert!(
            handle
                .wait_for_one_of(&[Start], Duration::from_millis(1))
                .await
        );
    }
}
