//! Envelopes exchanged between the two ends of a duplex channel.
//!
//! The channel is in-process, so envelopes travel as Rust values; there is no
//! wire encoding. Closing is not an envelope: it is signalled on the link
//! shared by both ends so it cannot be stuck behind a full queue.

use bytes::Bytes;
use session::CallError;

/// Call identifier, unique per channel direction and never reused.
pub type CallId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// A call from the sending end to the receiving end's handler.
    Request {
        id: CallId,
        method: String,
        payload: Bytes,
    },
    /// The answer to a request previously sent by the receiving end.
    Response {
        id: CallId,
        result: Result<Bytes, CallError>,
    },
}

impl Envelope {
    pub fn id(&self) -> CallId {
        match self {
            Envelope::Request { id, .. } | Envelope::Response { id, .. } => *id,
        }
    }
}
