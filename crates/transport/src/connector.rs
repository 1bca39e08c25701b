//! Connection establishment for duplex sessions.

use crate::config::{ConfigError, TransportConfig};
use crate::duplex::{DuplexChannel, Endpoint};
use session::{CallController, PeerSession};

/// A session whose calls travel over a [`DuplexChannel`].
pub type DuplexSession = PeerSession<DuplexChannel, CallController>;

/// Connect two endpoints and hand each side a session with the other.
///
/// The first session belongs to `left` (its peer is `right`); the second
/// belongs to `right`. Each gets a fresh [`CallController`].
pub fn connect_pair(
    config: &TransportConfig,
    left: Endpoint,
    right: Endpoint,
) -> Result<(DuplexSession, DuplexSession), ConfigError> {
    let left_peer = left.peer.clone();
    let right_peer = right.peer.clone();
    let (left_channel, right_channel) = DuplexChannel::pair(config, left, right)?;

    Ok((
        PeerSession::new(right_peer, left_channel, CallController::new()),
        PeerSession::new(left_peer, right_channel, CallController::new()),
    ))
}
