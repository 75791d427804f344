// Chunk: docs/chunks/bridge_config - Bridge configuration file
//!
//! Bridge configuration.
//!
//! ## File Location
//!
//! The configuration file is looked up at:
//! - Linux: `~/.config/loop-bridge/bridge.json`
//! - macOS: `~/Library/Application Support/loop-bridge/bridge.json`
//!
//! Every field is optional; missing fields take their defaults. A missing or
//! unreadable file falls back to [`BridgeConfig::default`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Current schema version for the configuration file.
pub const SCHEMA_VERSION: u32 = 1;

/// Application name used for the config directory.
const APP_NAME: &str = "loop-bridge";

/// Configuration file name.
const CONFIG_FILENAME: &str = "bridge.json";

/// Tunables for [`LoopBridge`](crate::LoopBridge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    /// Name given to the poll thread.
    pub thread_name: String,
    /// Stack size of the poll thread in bytes (platform default if unset).
    pub stack_size: Option<usize>,
    /// Upper bound on a single blocking poll, in milliseconds.
    ///
    /// Unset means the poll may block until the next timer or wakeup.
    pub max_poll_timeout_ms: Option<u64>,
    /// Number of I/O events collected per poll.
    pub events_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            thread_name: "embed-poll".to_string(),
            stack_size: None,
            max_poll_timeout_ms: None,
            events_capacity: 1024,
        }
    }
}

impl BridgeConfig {
    /// The poll cap as a duration.
    pub fn max_poll_timeout(&self) -> Option<Duration> {
        self.max_poll_timeout_ms.map(Duration::from_millis)
    }

    /// Reads and validates a configuration file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: BridgeConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if config.schema_version != SCHEMA_VERSION {
            return Err(ConfigError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                found: config.schema_version,
            });
        }
        Ok(config)
    }

    /// Loads the configuration from the platform config directory.
    ///
    /// Never fails: any problem is logged and the defaults are returned.
    pub fn load() -> Self {
        let Some(path) = config_file_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(%err, "ignoring bridge config, using defaults");
                Self::default()
            }
        }
    }
}

/// Returns the path to the configuration file, or `None` if the platform has
/// no config directory.
pub fn config_file_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join(APP_NAME).join(CONFIG_FILENAME))
}
