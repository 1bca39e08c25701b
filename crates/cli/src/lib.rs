//! CLI tool for exercising peer RPC sessions.
//!
//! Provides commands for:
//! - Opening a connected session pair
//! - Issuing calls in both directions
//! - Shutting sessions down, including mid-call and concurrently

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
