//! Core library for peer RPC sessions.
//!
//! This crate provides the session abstraction used between marketplace peers:
//! - Peer identity
//! - Channel and call-handler contracts for the transport collaborator
//! - Per-call controllers with cancellation
//! - The `PeerSession` lifecycle with exactly-once shutdown

pub mod channel;
pub mod controller;
pub mod error;
pub mod peer;
pub mod session;

pub use channel::{drive_call, CallHandler, RpcChannel};
pub use controller::{CallController, CallStatus, RpcController};
pub use error::{CallError, ReleaseError, Result, SessionError};
pub use peer::{Peer, PeerId};
pub use session::{PeerSession, SessionState};
