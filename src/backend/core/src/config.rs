//! Configuration management.
//!
//! Values come from an optional file plus `LAPSYNC__*` environment variables
//! (`LAPSYNC__TRANSPORT__HUB_CAPACITY=256`). Every field has a default, so an
//! empty environment yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::telemetry::TelemetryConfig;
use crate::transport::HubConfig;

const ENV_PREFIX: &str = "LAPSYNC";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Local replica settings
    #[serde(default)]
    pub replica: ReplicaConfig,

    /// Transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Checkpoint settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Logging and metrics
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplicaConfig {
    /// Number of watches on the board
    #[serde(default = "default_watch_count")]
    pub watch_count: usize,

    /// Human-readable label for this replica in logs
    #[serde(default)]
    pub peer_label: Option<String>,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            watch_count: default_watch_count(),
            peer_label: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Buffer size of the in-memory hub
    #[serde(default = "default_hub_capacity")]
    pub hub_capacity: usize,

    /// Deliver every hub message twice
    #[serde(default)]
    pub duplicate_delivery: bool,

    /// How long to wait for a catch-up answer
    #[serde(default = "default_catch_up_timeout", with = "humantime_serde")]
    pub catch_up_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            hub_capacity: default_hub_capacity(),
            duplicate_delivery: false,
            catch_up_timeout: default_catch_up_timeout(),
        }
    }
}

impl TransportConfig {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            capacity: self.hub_capacity,
            duplicate_delivery: self.duplicate_delivery,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    /// Checkpoint file
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
        }
    }
}

// Default value functions
fn default_watch_count() -> usize {
    9
}

fn default_hub_capacity() -> usize {
    1024
}

fn default_catch_up_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("lapsync.json")
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// [`from_file`](Self::from_file) when a path is given, else [`load`](Self::load).
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::load(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.replica.watch_count == 0 {
            return Err(SyncError::configuration("replica.watch_count must be at least 1"));
        }
        if self.transport.hub_capacity == 0 {
            return Err(SyncError::configuration("transport.hub_capacity must be at least 1"));
        }
        Ok(())
    }
}
