//! Per-call control.
//!
//! A controller tracks one outstanding call at a time: whether it is in
//! flight, how it finished, and whether it has been cancelled. Session
//! shutdown closes the controller, which wakes any waiter blocked on the call
//! with a connection-closed outcome.

use crate::error::{CallError, ReleaseError};
use async_trait::async_trait;
use tokio::sync::watch;

/// State of the call tracked by a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    /// No call has started since construction or the last reset.
    Idle,
    /// A call is outstanding.
    InFlight,
    /// The last call returned a response.
    Completed,
    /// The last call failed with the given reason.
    Failed(String),
    /// Cancellation was requested with no call in flight. The next call
    /// fails with `Cancelled` without being sent.
    CancelRequested,
    /// The call was cancelled by the caller.
    Cancelled,
    /// The owning session shut down. Terminal.
    Closed,
}

impl CallStatus {
    /// The error an outstanding call should resolve with, if this status
    /// interrupts it.
    pub fn interruption(&self) -> Option<CallError> {
        match self {
            CallStatus::Cancelled => Some(CallError::Cancelled),
            CallStatus::Closed => Some(CallError::ConnectionClosed),
            _ => None,
        }
    }
}

/// Tracks and cancels a single in-flight call.
///
/// Implementations must be thread-safe: the caller waiting on a call, a
/// task cancelling it and the session shutting down may all touch the
/// controller at once.
#[async_trait]
pub trait RpcController: Send + Sync + 'static {
    /// Return to `Idle` so the controller can track a new call. Clears a
    /// pending cancellation request.
    ///
    /// Has no effect while a call is in flight or once closed.
    fn reset(&self);

    /// Mark a call as started.
    ///
    /// Fails if a call is already in flight or the controller has been
    /// closed. A pending cancellation request is consumed here: the call
    /// fails with `Cancelled` and the controller records it as cancelled.
    fn begin(&self) -> Result<(), CallError>;

    /// Record that the in-flight call returned a response.
    fn complete(&self);

    /// Record that the in-flight call failed.
    fn set_failed(&self, reason: String);

    /// Current status.
    fn status(&self) -> CallStatus;

    /// Cancel the in-flight call. With no call in flight, the request is
    /// held until the next `begin` (or dropped by `reset`).
    fn start_cancel(&self);

    /// Force the controller into the terminal closed state.
    fn close(&self) -> Result<(), ReleaseError>;

    /// Resolves once the controller is cancelled or closed, with the error
    /// an outstanding call should report.
    async fn interrupted(&self) -> CallError;

    fn failed(&self) -> bool {
        matches!(self.status(), CallStatus::Failed(_))
    }

    fn error_text(&self) -> Option<String> {
        match self.status() {
            CallStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    fn is_canceled(&self) -> bool {
        matches!(
            self.status(),
            CallStatus::CancelRequested | CallStatus::Cancelled | CallStatus::Closed
        )
    }
}

/// Default controller backed by a `watch` channel so that waiters are woken
/// on every status change.
#[derive(Debug)]
pub struct CallController {
    status: watch::Sender<CallStatus>,
}

impl CallController {
    pub fn new() -> Self {
        let (status, _) = watch::channel(CallStatus::Idle);
        Self { status }
    }

    /// Apply `f` to the status, notifying waiters if it returns true.
    fn transition<T>(&self, f: impl FnOnce(&mut CallStatus) -> (bool, T)) -> T {
        let mut out = None;
        self.status.send_if_modified(|status| {
            let (modified, value) = f(status);
            out = Some(value);
            modified
        });
        // send_if_modified always runs the closure exactly once
        match out {
            Some(value) => value,
            None => unreachable!("status closure not invoked"),
        }
    }
}

impl Default for CallController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RpcController for CallController {
    fn reset(&self) {
        self.transition(|status| match status {
            CallStatus::InFlight | CallStatus::Closed | CallStatus::Idle => (false, ()),
            _ => {
                *status = CallStatus::Idle;
                (true, ())
            }
        })
    }

    fn begin(&self) -> Result<(), CallError> {
        self.transition(|status| match status {
            CallStatus::Idle
            | CallStatus::Completed
            | CallStatus::Failed(_)
            | CallStatus::Cancelled => {
                *status = CallStatus::InFlight;
                (true, Ok(()))
            }
            CallStatus::CancelRequested => {
                *status = CallStatus::Cancelled;
                (true, Err(CallError::Cancelled))
            }
            CallStatus::InFlight => (false, Err(CallError::ControllerBusy)),
            CallStatus::Closed => (false, Err(CallError::ConnectionClosed)),
        })
    }

    fn complete(&self) {
        self.transition(|status| {
            if *status == CallStatus::InFlight {
                *status = CallStatus::Completed;
                (true, ())
            } else {
                (false, ())
            }
        })
    }

    fn set_failed(&self, reason: String) {
        self.transition(|status| {
            if *status == CallStatus::InFlight {
                *status = CallStatus::Failed(reason);
                (true, ())
            } else {
                (false, ())
            }
        })
    }

    fn status(&self) -> CallStatus {
        self.status.borrow().clone()
    }

    fn start_cancel(&self) {
        self.transition(|status| match status {
            CallStatus::InFlight => {
                *status = CallStatus::Cancelled;
                (true, ())
            }
            CallStatus::Idle | CallStatus::Completed | CallStatus::Failed(_) | CallStatus::Cancelled => {
                *status = CallStatus::CancelRequested;
                (true, ())
            }
            CallStatus::CancelRequested | CallStatus::Closed => (false, ()),
        })
    }

    fn close(&self) -> Result<(), ReleaseError> {
        self.transition(|status| {
            if *status == CallStatus::Closed {
                (false, Err(ReleaseError::AlreadyClosed))
            } else {
                *status = CallStatus::Closed;
                (true, Ok(()))
            }
        })
    }

    async fn interrupted(&self) -> CallError {
        let mut rx = self.status.subscribe();
        let cause = match rx.wait_for(|status| status.interruption().is_some()).await {
            Ok(status) => status.interruption(),
            Err(_) => None,
        };
        cause.unwrap_or(CallError::ConnectionClosed)
    }
}
