// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Engine configuration.
//!
//! Settings the wiring binary reads at startup: channel, velocity,
//! capacities, client name. Stored as YAML next to the rest of the
//! user's configuration; every field has a default so a partial file
//! is fine.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::midi::DEFAULT_OUTBOX_CAPACITY;
use crate::recording::DEFAULT_RECORD_CAPACITY;
use crate::ui::DEFAULT_FEED_DEPTH;

/// Problems a configuration can have beyond parse errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("MIDI channel {0} out of range (0-15)")]
    ChannelOutOfRange(u8),
    #[error("velocity {0} out of range (0-127)")]
    VelocityOutOfRange(u8),
    #[error("outbox capacity must be at least 1")]
    EmptyOutbox,
    #[error("record buffer capacity must be at least 1")]
    EmptyRecordBuffer,
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Client name announced to the MIDI system
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Outgoing MIDI channel (0-15)
    #[serde(default)]
    pub channel: u8,
    /// Note-on velocity (0-127)
    #[serde(default = "default_velocity")]
    pub velocity: u8,
    /// Slots in the outgoing staging table
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// Capacity of each record buffer
    #[serde(default = "default_record_capacity")]
    pub record_capacity: usize,
    /// Depth of the UI note feed
    #[serde(default = "default_feed_depth")]
    pub feed_depth: usize,
}

fn default_client_name() -> String {
    "claviature".to_string()
}
fn default_velocity() -> u8 {
    127
}
fn default_outbox_capacity() -> usize {
    DEFAULT_OUTBOX_CAPACITY
}
fn default_record_capacity() -> usize {
    DEFAULT_RECORD_CAPACITY
}
fn default_feed_depth() -> usize {
    DEFAULT_FEED_DEPTH
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            channel: 0,
            velocity: default_velocity(),
            outbox_capacity: default_outbox_capacity(),
            record_capacity: default_record_capacity(),
            feed_depth: default_feed_depth(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&contents)
    }

    /// Parse a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Serialize to a YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize configuration to YAML")
    }

    /// Save the configuration to a YAML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = self.to_yaml()?;
        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))
    }

    /// Check value ranges. Parse errors are separate; this catches
    /// values that parse fine but make no sense.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.channel > 15 {
            return Err(ConfigError::ChannelOutOfRange(self.channel));
        }
        if self.velocity > 127 {
            return Err(ConfigError::VelocityOutOfRange(self.velocity));
        }
        if self.outbox_capacity == 0 {
            return Err(ConfigError::EmptyOutbox);
        }
        if self.record_capacity == 0 {
            return Err(ConfigError::EmptyRecordBuffer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.client_name, "claviature");
        assert_eq!(config.channel, 0);
        assert_eq!(config.velocity, 127);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = EngineConfig::from_yaml("channel: 3\n").unwrap();
        assert_eq!(config.channel, 3);
        assert_eq!(config.velocity, 127);
        assert_eq!(config.record_capacity, DEFAULT_RECORD_CAPACITY);
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(EngineConfig::from_yaml("channel: [not a number").is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("claviature.yaml");

        let mut config = EngineConfig::default();
        config.channel = 9;
        config.velocity = 100;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate_catches_bad_ranges() {
        let mut config = EngineConfig::default();
        config.channel = 16;
        assert_eq!(config.validate(), Err(ConfigError::ChannelOutOfRange(16)));

        config.channel = 0;
        config.velocity = 200;
        assert_eq!(config.validate(), Err(ConfigError::VelocityOutOfRange(200)));

        config.velocity = 127;
        config.outbox_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::EmptyOutbox));

        config.outbox_capacity = 4;
        config.record_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::EmptyRecordBuffer));
    }
}
