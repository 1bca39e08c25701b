//! Peer session lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//! Active ──shutdown()──▶ ShuttingDown ──release done──▶ ShutDown
//! ```
//!
//! A session starts `Active` once the transport is up. `shutdown()` is the
//! only transition trigger and is idempotent: the release path runs exactly
//! once no matter how many callers invoke it, and every caller returns only
//! after the session has reached `ShutDown`.
//!
//! # Thread Safety
//!
//! Sessions are meant to be shared behind an `Arc`. The lifecycle state is an
//! atomic so reads never lock; the collaborators sit behind a mutex that is
//! only held long enough to clone or take them. Once any caller observes
//! `ShutDown`, the collaborators have already been taken, so no later call to
//! [`PeerSession::channel`] or [`PeerSession::controller`] can succeed.

use crate::channel::RpcChannel;
use crate::controller::{CallController, RpcController};
use crate::error::{ReleaseError, Result, SessionError};
use crate::peer::Peer;
use bytes::Bytes;
use parking_lot::{Mutex, Once};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`PeerSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Active = 0,
    ShuttingDown = 1,
    ShutDown = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Active,
            1 => SessionState::ShuttingDown,
            _ => SessionState::ShutDown,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Active => "active",
            SessionState::ShuttingDown => "shutting-down",
            SessionState::ShutDown => "shut-down",
        };
        f.write_str(s)
    }
}

struct Parts<Ch, Ctl> {
    channel: Arc<Ch>,
    controller: Arc<Ctl>,
}

/// One established bidirectional RPC connection to a remote peer.
///
/// Owns the channel used to call the peer and the controller tracking the
/// current call. Both are handed out as cheap `Arc` clones while the session
/// is active; after [`shutdown`](PeerSession::shutdown) they are closed, and
/// asking the session for them fails with [`SessionError::UseAfterShutdown`].
///
/// # Example
///
/// ```ignore
/// let session = Arc::new(PeerSession::new(peer, channel, CallController::new()));
/// let reply = session.call("Orders.Place", request).await?;
/// session.shutdown();
/// assert!(session.channel().is_err());
/// ```
pub struct PeerSession<Ch: RpcChannel, Ctl: RpcController = CallController> {
    peer: Peer,
    state: AtomicU8,
    parts: Mutex<Option<Parts<Ch, Ctl>>>,
    release: Once,
}

impl<Ch: RpcChannel, Ctl: RpcController> PeerSession<Ch, Ctl> {
    /// Wrap an established connection. The session starts `Active`.
    pub fn new(peer: Peer, channel: Ch, controller: Ctl) -> Self {
        debug!(peer = %peer.id, name = %peer.name, "peer session established");
        Self {
            peer,
            state: AtomicU8::new(SessionState::Active as u8),
            parts: Mutex::new(Some(Parts {
                channel: Arc::new(channel),
                controller: Arc::new(controller),
            })),
            release: Once::new(),
        }
    }

    /// The remote peer. Available in every state.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn is_shut_down(&self) -> bool {
        self.state() == SessionState::ShutDown
    }

    /// The channel for calling the peer.
    ///
    /// # Errors
    /// [`SessionError::UseAfterShutdown`] once shutdown has begun.
    pub fn channel(&self) -> Result<Arc<Ch>> {
        self.with_parts(|parts| Arc::clone(&parts.channel))
    }

    /// The controller for the current call.
    ///
    /// # Errors
    /// [`SessionError::UseAfterShutdown`] once shutdown has begun.
    pub fn controller(&self) -> Result<Arc<Ctl>> {
        self.with_parts(|parts| Arc::clone(&parts.controller))
    }

    /// Issue one call to the peer through the session's controller.
    ///
    /// A cancellation requested on the controller before this call fails
    /// it with `Cancelled`.
    pub async fn call(&self, method: &str, request: Bytes) -> Result<Bytes> {
        let (channel, controller) = self.with_parts(|parts| {
            (Arc::clone(&parts.channel), Arc::clone(&parts.controller))
        })?;
        let response = channel.call(method, request, controller.as_ref()).await?;
        Ok(response)
    }

    /// Tear the session down.
    ///
    /// Closes the controller (interrupting any in-flight call with a
    /// connection-closed outcome) and then the channel. Safe to call any
    /// number of times from any number of threads; the release runs once and
    /// every caller returns after it has finished. Never fails: release
    /// errors from the collaborators are logged, and a collaborator that
    /// panics while closing is logged and skipped.
    pub fn shutdown(&self) {
        self.release.call_once(|| self.release_parts());
    }

    fn release_parts(&self) {
        self.state
            .store(SessionState::ShuttingDown as u8, Ordering::Release);
        debug!(peer = %self.peer.id, "peer session shutting down");

        let parts = self.parts.lock().take();
        if let Some(Parts { channel, controller }) = parts {
            self.release_one("controller", || controller.close());
            self.release_one("channel", || channel.close());
        }

        self.state
            .store(SessionState::ShutDown as u8, Ordering::Release);
        info!(peer = %self.peer.id, name = %self.peer.name, "peer session shut down");
    }

    /// Run one collaborator's close. A panic must not escape: it would
    /// poison the release guard and leave the session `ShuttingDown`.
    fn release_one(&self, what: &str, close: impl FnOnce() -> std::result::Result<(), ReleaseError>) {
        match panic::catch_unwind(AssertUnwindSafe(close)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(peer = %self.peer.id, error = %err, "{} release failed during shutdown", what)
            }
            Err(_) => error!(peer = %self.peer.id, "{} panicked during shutdown", what),
        }
    }

    fn with_parts<T>(&self, f: impl FnOnce(&Parts<Ch, Ctl>) -> T) -> Result<T> {
        if !self.is_active() {
            return Err(self.use_after_shutdown());
        }
        let parts = self.parts.lock();
        parts.as_ref().map(f).ok_or_else(|| self.use_after_shutdown())
    }

    fn use_after_shutdown(&self) -> SessionError {
        SessionError::UseAfterShutdown { peer: self.peer.id }
    }
}

impl<Ch: RpcChannel, Ctl: RpcController> fmt::Debug for PeerSession<Ch, Ctl> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

impl<Ch: RpcChannel, Ctl: RpcController> Drop for PeerSession<Ch, Ctl> {
    fn drop(&mut self) {
        if self.is_active() {
            warn!(peer = %self.peer.id, "peer session dropped without shutdown; releasing");
            self.shutdown();
        }
    }
}
