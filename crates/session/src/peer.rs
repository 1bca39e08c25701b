//! Peer identity.
//!
//! A peer is the remote endpoint of a session. Peers are identified by a
//! compact `PeerId` that is cheap to compare, hash and log.

use siphasher::sip128::{Hasher128, SipHasher13};
use std::fmt;
use std::hash::Hasher;

/// Compact identifier for a remote peer.
///
/// Newtype over `u128` so it can be copied freely into log fields and error
/// values.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PeerId(pub u128);

impl PeerId {
    /// Derive a stable id from a peer name (SipHash-1-3, 128 bit).
    pub fn from_name(name: &str) -> Self {
        let mut hasher = SipHasher13::new();
        hasher.write(name.as_bytes());
        PeerId(hasher.finish128().as_u128())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Remote peer of a session.
///
/// Descriptive metadata only; the connection itself lives in the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    /// Human‑readable name.
    pub name: String,
    /// Transport address, if the transport has one.
    pub address: Option<String>,
}

impl Peer {
    /// Construct a peer with an id derived from its name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: PeerId::from_name(&name),
            name,
            address: None,
        }
    }

    pub fn with_address(name: impl Into<String>, address: impl Into<Option<String>>) -> Self {
        Self {
            address: address.into(),
            ..Self::new(name)
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(addr) => write!(f, "{}@{}", self.name, addr),
            None => write!(f, "{}", self.name),
        }
    }
}
