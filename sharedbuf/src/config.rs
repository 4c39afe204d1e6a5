//! Device configuration
//!
//! The ceiling is supplied once at startup and never changes afterwards.
//! Configuration can be built in code or read from a JSON document:
//!
//! ```
//! use sharedbuf::DeviceConfig;
//!
//! let config = DeviceConfig::from_reader(&br#"{"max_capacity": 4096}"#[..]).unwrap();
//! assert_eq!(config.max_capacity, 4096);
//! assert_eq!(config.initial_capacity, 1024);
//! ```

use serde::Deserialize;
use thiserror::Error;

/// Default ceiling: 10 MiB
pub const DEFAULT_MAX_CAPACITY: usize = 10 * 1024 * 1024;
pub const DEFAULT_INITIAL_CAPACITY: usize = 1024;
pub const DEFAULT_LISTENER_CHANNEL_CAPACITY: usize = 16;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse device config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid device config: {0}")]
    Invalid(String),

    #[error("failed to allocate initial storage: {0}")]
    Storage(#[from] crate::error::Error),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Hard ceiling for the buffer's capacity in bytes
    pub max_capacity: usize,
    /// Capacity allocated when the device starts
    pub initial_capacity: usize,
    /// Number of undelivered signals a listener may lag behind before it
    /// starts losing the oldest ones
    pub listener_channel_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_capacity: DEFAULT_MAX_CAPACITY,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            listener_channel_capacity: DEFAULT_LISTENER_CHANNEL_CAPACITY,
        }
    }
}

impl DeviceConfig {
    /// Default configuration with a different ceiling
    #[must_use]
    pub fn with_max_capacity(max_capacity: usize) -> Self {
        Self {
            max_capacity,
            ..Self::default()
        }
    }

    /// Read a JSON config document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed, contains unknown fields,
    /// or describes an invalid configuration.
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the capacity relations the buffer store relies on.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the violated relation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_capacity == 0 {
            return Err(ConfigError::Invalid(
                "initial_capacity must be greater than zero".to_string(),
            ));
        }
        if self.initial_capacity > self.max_capacity {
            return Err(ConfigError::Invalid(format!(
                "initial_capacity ({}) exceeds max_capacity ({})",
                self.initial_capacity, self.max_capacity
            )));
        }
        if self.listener_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "listener_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DeviceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_capacity, 10 * 1024 * 1024);
        assert_eq!(config.initial_capacity, 1024);
    }

    #[test]
    fn test_from_reader_fills_missing_fields() {
        let json = br#"{"max_capacity": 65536, "listener_channel_capacity": 4}"#;
        let config = DeviceConfig::from_reader(&json[..]).unwrap();
        assert_eq!(config.max_capacity, 65536);
        assert_eq!(config.initial_capacity, DEFAULT_INITIAL_CAPACITY);
        assert_eq!(config.listener_channel_capacity, 4);
    }

    #[test]
    fn test_from_reader_rejects_unknown_field() {
        let json = br#"{"max_capacity": 65536, "buckets": 10}"#;
        let err = DeviceConfig::from_reader(&json[..]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_initial_above_max_is_invalid() {
        let config = DeviceConfig {
            max_capacity: 512,
            ..DeviceConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds max_capacity"));
    }

    #[test]
    fn test_zero_initial_capacity_is_invalid() {
        let config = DeviceConfig {
            initial_capacity: 0,
            ..DeviceConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
