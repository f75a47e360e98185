//! Named handle onto the shared multiplexer.

use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};

use super::envelope::Body;
use super::multiplexer::Multiplexer;
use crate::crdt::Replicated;
use crate::error::Result;

/// Separator between a parent channel name and a derived suffix.
pub const DERIVE_SEPARATOR: char = '/';

/// A channel name bound to the multiplexer its messages travel over.
///
/// Cloning is cheap; every clone addresses the same channel.
#[derive(Clone)]
pub struct ReplicaChannel {
    name: String,
    mux: Arc<Multiplexer>,
}

impl ReplicaChannel {
    pub fn new(name: impl Into<String>, mux: Arc<Multiplexer>) -> Self {
        Self {
            name: name.into(),
            mux,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.mux
    }

    /// An independent sub-channel sharing this channel's transport and peers.
    pub fn derive(&self, suffix: &str) -> Self {
        Self {
            name: format!("{}{}{}", self.name, DERIVE_SEPARATOR, suffix),
            mux: self.mux.clone(),
        }
    }

    /// Register the container that owns this channel.
    pub fn register(&self, target: Weak<dyn Replicated>) -> Result<()> {
        self.mux.register(&self.name, target)
    }

    /// Broadcast a locally produced delta. Failures are logged, not returned.
    pub fn publish_delta(&self, value: Value) {
        if let Err(e) = self.mux.publish(&self.name, Body::Delta(value)) {
            e.on_channel(self.name.clone()).log();
        }
    }
}

impl fmt::Debug for ReplicaChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaChannel")
            .field("name", &self.name)
            .field("peer", &self.mux.peer_id())
            .finish()
    }
}
