use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BusError, LogLevel, Result};

/// Top-level configuration for an engine and the handles attached to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum number of events retained per handle.
    pub queue_capacity: usize,
    /// Name of the thread that executes asynchronous requests.
    pub dispatcher_name: String,
    /// Log threshold new handles start with.
    pub default_log_level: LogLevel,
    /// Prefix for automatically assigned client names.
    pub client_name_prefix: String,
    /// Name given to the handle returned by standalone creation.
    pub main_client_name: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            dispatcher_name: "bus-dispatch".to_string(),
            default_log_level: LogLevel::No,
            client_name_prefix: "client".to_string(),
            main_client_name: "main".to_string(),
        }
    }
}

impl BusConfig {
    /// Reads a JSON config file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: BusConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 || self.main_client_name.is_empty() {
            return Err(BusError::InvalidParameter);
        }
        Ok(())
    }
}

/// Failure to obtain a usable [`BusConfig`] from disk.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] BusError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: BusConfig =
            serde_json::from_str(r#"{"queue_capacity": 8, "default_log_level": "warn"}"#).unwrap();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.default_log_level, LogLevel::Warn);
        assert_eq!(config.dispatcher_name, BusConfig::default().dispatcher_name);
    }

    #[test]
    fn rejects_unknown_log_levels() {
        let parsed = serde_json::from_str::<BusConfig>(r#"{"default_log_level": "loud"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let config = BusConfig {
            queue_capacity: 0,
            ..BusConfig::default()
        };
        assert_eq!(config.validate(), Err(BusError::InvalidParameter));
    }

    #[test]
    fn loads_from_disk() {
        let path = std::env::temp_dir().join(format!("mediabus-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"main_client_name": "host"}"#).unwrap();
        let config = BusConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.main_client_name, "host");
        assert_eq!(config.queue_capacity, 1000);
    }
}
