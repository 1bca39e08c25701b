//! Transport configuration.

use serde::Deserialize;
use thiserror::Error;

/// Default capacity of each direction's envelope queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
/// Default limit on outstanding outbound calls per channel.
pub const DEFAULT_MAX_PENDING_CALLS: usize = 1024;

/// Settings for a duplex channel pair.
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Capacity of each direction's envelope queue. Senders wait when full.
    pub queue_capacity: usize,
    /// Outbound calls beyond this many in flight fail immediately.
    pub max_pending_calls: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_pending_calls: DEFAULT_MAX_PENDING_CALLS,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue_capacity"));
        }
        if self.max_pending_calls == 0 {
            return Err(ConfigError::Zero("max_pending_calls"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: TransportConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TransportConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_overrides() {
        let config: TransportConfig = serde_json::from_str(r#"{"max_pending_calls": 2}"#).unwrap();
        assert_eq!(config.max_pending_calls, 2);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = TransportConfig {
            queue_capacity: 0,
            ..TransportConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("queue_capacity")));

        let config = TransportConfig {
            max_pending_calls: 0,
            ..TransportConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "max_pending_calls must be greater than zero"
        );
    }
}
