//! Error types for the session library.

use crate::peer::PeerId;
use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by [`PeerSession`](crate::PeerSession) to its callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The channel or controller was requested after the session was shut down.
    ///
    /// This is a programming error on the caller's side, distinct from any
    /// network failure.
    #[error("session with peer {peer} used after shutdown")]
    UseAfterShutdown { peer: PeerId },
    /// A call issued through the session failed.
    #[error(transparent)]
    Call(#[from] CallError),
}

/// Outcome of a single RPC call that did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The connection went away before or while the call was outstanding.
    #[error("connection closed")]
    ConnectionClosed,
    /// The call was cancelled through its controller.
    #[error("call cancelled")]
    Cancelled,
    /// The remote handler reported a failure.
    #[error("remote error: {0}")]
    Remote(String),
    /// The remote side has no handler for the requested method.
    #[error("method not implemented: {0}")]
    Unimplemented(String),
    /// The channel already has its maximum number of outstanding calls.
    #[error("too many pending calls (limit {limit})")]
    TooManyPending { limit: usize },
    /// The controller is already tracking another call.
    #[error("controller busy with another call")]
    ControllerBusy,
}

impl CallError {
    /// True for outcomes caused by the connection (or call) being torn down
    /// rather than by the remote peer's answer.
    pub fn is_interruption(&self) -> bool {
        matches!(self, CallError::ConnectionClosed | CallError::Cancelled)
    }
}

/// Failure reported by a collaborator while it is being released.
///
/// Session shutdown absorbs these: they are logged and never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReleaseError {
    /// The resource had already been released (for example the remote end
    /// closed the connection first).
    #[error("already closed")]
    AlreadyClosed,
    /// The underlying transport failed while closing.
    #[error("transport error during release: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_use_after_shutdown_message_names_peer() {
        let err = SessionError::UseAfterShutdown { peer: PeerId(0xab) };
        assert_eq!(
            err.to_string(),
            "session with peer 000000000000000000000000000000ab used after shutdown"
        );
    }

    #[test]
    fn test_call_error_converts_into_session_error() {
        let err: SessionError = CallError::ConnectionClosed.into();
        assert_eq!(err, SessionError::Call(CallError::ConnectionClosed));
        assert_eq!(err.to_string(), "connection closed");
    }

    #[test]
    fn test_interruption_classification() {
        assert!(CallError::ConnectionClosed.is_interruption());
        assert!(CallError::Cancelled.is_interruption());
        assert!(!CallError::Remote("boom".into()).is_interruption());
        assert!(!CallError::TooManyPending { limit: 1 }.is_interruption());
    }
}
