//! Board checkpoints.
//!
//! A checkpoint is everything needed to bring a board back after a restart:
//! the clock offset, watch names, each watch's value with its last update
//! time, marks, and the selection. Restoring never rewinds a peer. Values go
//! back in through the normal container operations, so a restored replica
//! merges with the session like any other.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::events::WatchValue;

/// Saved state of one watch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatchCheckpoint {
    pub value: WatchValue,
    /// Score the value is restored under; `-inf` for an untouched watch
    #[serde(with = "crate::crdt::translator::float_serde")]
    pub last_update_time: f64,
}

/// Saved state of a whole board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(with = "crate::crdt::translator::float_serde")]
    pub offset: f64,
    pub names: Vec<String>,
    pub states: Vec<WatchCheckpoint>,
    pub marks: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<usize>,
}

impl Checkpoint {
    pub fn watch_count(&self) -> usize {
        self.states.len()
    }
}

/// Somewhere to keep the last checkpoint.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// The last saved checkpoint, or `None` if nothing was ever saved.
    async fn load(&self) -> Result<Option<Checkpoint>>;

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Checkpoint as a JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl Persistence for JsonFilePersistence {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No checkpoint found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let checkpoint: Checkpoint = serde_json::from_slice(&bytes).map_err(|e| {
            SyncError::persistence(format!("{} is not a valid checkpoint", self.path.display()))
                .with_internal_message(e.to_string())
                .with_source(e)
        })?;

        info!(
            path = %self.path.display(),
            watches = checkpoint.watch_count(),
            "Checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        info!(path = %self.path.display(), bytes = bytes.len(), "Checkpoint saved");
        Ok(())
    }
}

/// In-memory store for tests and simulations.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    slot: Mutex<Option<Checkpoint>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        Ok(self.slot.lock().clone())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        *self.slot.lock() = Some(checkpoint.clone());
        Ok(())
    }
}
