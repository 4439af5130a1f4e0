//! Centralized configuration for the plugin host.
//!
//! Constants live on the `*Config` holder structs; runtime options are read
//! into [`HostConfig`], which can be deserialized from JSON.

use crate::error::{PluginHostError, Result};
use crate::platform::Platform;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sandbox registry configuration.
pub struct SandboxConfig;

impl SandboxConfig {
    /// Storage key the full record set is written under.
    pub const STORAGE_KEY: &'static str = "daft.plugin-sandbox.records";
    /// Delay after the last mutation before a durable write fires.
    pub const PERSIST_DEBOUNCE: Duration = Duration::from_millis(150);
    /// Directory name used by the JSON file store.
    pub const STORE_DIR_NAME: &'static str = "plugin-host";
}

/// Storage permission configuration.
pub struct PermissionConfig;

impl PermissionConfig {
    /// Android API level from which shared storage no longer needs the
    /// runtime storage permission.
    pub const SCOPED_STORAGE_API_LEVEL: u32 = 33;
}

/// Event channel configuration.
pub struct EventConfig;

impl EventConfig {
    /// Capacity of the backend event broadcast channel.
    pub const CHANNEL_CAPACITY: usize = 64;
}

/// Runtime configuration for a [`PluginHost`](crate::PluginHost).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// Platform the host runs on. Detected when absent.
    #[serde(default = "Platform::current")]
    pub platform: Platform,
    /// Debounce window for sandbox persistence, in milliseconds.
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
    /// Storage key for the sandbox record set.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

fn default_persist_debounce_ms() -> u64 {
    SandboxConfig::PERSIST_DEBOUNCE.as_millis() as u64
}

fn default_storage_key() -> String {
    SandboxConfig::STORAGE_KEY.to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            platform: Platform::current(),
            persist_debounce_ms: default_persist_debounce_ms(),
            storage_key: default_storage_key(),
        }
    }
}

impl HostConfig {
    /// Parse a configuration from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: HostConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the registry cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.storage_key.trim().is_empty() {
            return Err(PluginHostError::Config {
                message: "storageKey must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }
}
