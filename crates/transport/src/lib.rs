//! Duplex transport for peer sessions.
//!
//! This crate provides the concrete channel collaborator for `session`:
//! - An in-process duplex channel where both ends serve and issue calls
//! - The envelope protocol carried between the two ends
//! - Configuration for queue sizes and call limits
//! - Connection establishment that yields a connected pair of sessions

pub mod config;
pub mod connector;
pub mod duplex;
pub mod protocol;

pub use config::{ConfigError, TransportConfig};
pub use connector::{connect_pair, DuplexSession};
pub use duplex::{DuplexChannel, Endpoint};
pub use protocol::{CallId, Envelope};
