//! Channel multiplexer.
//!
//! One `Multiplexer` per replica. It maps channel names to the containers that
//! own them and moves envelopes between those containers and a single
//! [`Transport`]. It only holds `Weak` references: a dropped container simply
//! stops receiving, and its entry is pruned the next time it is looked up.
//!
//! Nothing here waits on peers. Local publishes are fire-and-forget, inbound
//! messages are merged or dropped immediately, and catch-up is a best-effort
//! request with a deadline.

use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::channel::ReplicaChannel;
use super::envelope::{Body, Envelope, PeerId};
use super::Transport;
use crate::crdt::Replicated;
use crate::error::{ErrorCode, Result, SyncError};
use crate::telemetry::metrics::SyncMetrics;

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Merged into the local container.
    Merged { changed: bool },
    /// A catch-up request, answered with a snapshot.
    Answered,
    /// Our own message coming back from the broadcast.
    Echo,
    /// No live container on that channel.
    UnknownChannel,
    /// Discarded without touching any state.
    Dropped(ErrorCode),
}

/// Result of [`Multiplexer::request_catch_up`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchUpOutcome {
    /// At least one peer answered with a snapshot before the deadline.
    Responded,
    /// Nobody answered. The replica carries on from its identity state.
    NoResponse,
    /// No channels are registered, so there is nothing to ask for.
    NothingToSync,
}

impl CatchUpOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Responded => "responded",
            Self::NoResponse => "no_response",
            Self::NothingToSync => "nothing_to_sync",
        }
    }
}

pub struct Multiplexer {
    peer_id: PeerId,
    channels: DashMap<String, Weak<dyn Replicated>>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    peers: DashSet<PeerId>,
    /// Bumped for every snapshot merged from a peer.
    snapshots: watch::Sender<u64>,
}

impl Multiplexer {
    /// A detached multiplexer with a fresh peer id.
    pub fn new() -> Arc<Self> {
        Self::with_peer_id(PeerId::new())
    }

    pub fn with_peer_id(peer_id: PeerId) -> Arc<Self> {
        let (snapshots, _) = watch::channel(0);
        Arc::new(Self {
            peer_id,
            channels: DashMap::new(),
            transport: RwLock::new(None),
            peers: DashSet::new(),
            snapshots,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// A handle for the channel `name` on this multiplexer.
    pub fn channel(self: &Arc<Self>, name: impl Into<String>) -> ReplicaChannel {
        ReplicaChannel::new(name, self.clone())
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Route `name` to `target`. Fails if a live container already owns it.
    pub fn register(&self, name: &str, target: Weak<dyn Replicated>) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.channels.entry(name.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().strong_count() > 0 {
                    return Err(SyncError::duplicate_channel(name));
                }
                slot.insert(target);
            }
            Entry::Vacant(slot) => {
                slot.insert(target);
            }
        }

        debug!(channel = %name, peer = %self.peer_id, "Channel registered");
        SyncMetrics::set_registered_channels(self.channels.len());
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.channels.remove(name).is_some();
        if removed {
            debug!(channel = %name, "Channel unregistered");
            SyncMetrics::set_registered_channels(self.channels.len());
        }
        removed
    }

    /// Names of channels whose container is still alive, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        self.prune();
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Replicated>> {
        let target = self.channels.get(name)?.upgrade();
        if target.is_none() {
            self.channels.remove_if(name, |_, weak| weak.strong_count() == 0);
            SyncMetrics::set_registered_channels(self.channels.len());
        }
        target
    }

    fn live_channels(&self) -> Vec<Arc<dyn Replicated>> {
        self.prune();
        self.channels.iter().filter_map(|e| e.value().upgrade()).collect()
    }

    fn prune(&self) {
        let before = self.channels.len();
        self.channels.retain(|_, weak| weak.strong_count() > 0);
        if self.channels.len() != before {
            SyncMetrics::set_registered_channels(self.channels.len());
        }
    }

    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------

    pub fn attach(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = Some(transport);
        info!(peer = %self.peer_id, "Transport attached");
    }

    pub fn detach(&self) {
        *self.transport.write() = None;
        self.peers.clear();
        info!(peer = %self.peer_id, "Transport detached");
    }

    pub fn is_attached(&self) -> bool {
        self.transport.read().is_some()
    }

    /// Peers currently known to be on the channel.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.peers.iter().map(|p| *p).collect();
        peers.sort();
        peers
    }

    /// Send `body` on `channel`. Offline replicas drop the message silently.
    pub fn publish(&self, channel: &str, body: Body) -> Result<()> {
        let transport = match self.transport.read().clone() {
            Some(t) => t,
            None => {
                trace!(channel = %channel, kind = body.kind(), "No transport, message not sent");
                return Ok(());
            }
        };

        let kind = body.kind();
        let bytes = Envelope::new(self.peer_id, body).to_bytes()?;
        transport
            .send(channel, bytes)
            .map_err(|e| e.on_channel(channel))?;

        debug!(channel = %channel, kind = kind, peer = %self.peer_id, "Message published");
        SyncMetrics::delta_sent(channel);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Handle one payload received on `channel`.
    ///
    /// Never fails: a bad message is logged and dropped, leaving every
    /// container as it was.
    pub fn on_receive(&self, channel: &str, payload: &[u8]) -> Delivery {
        let envelope = match Envelope::from_bytes(payload) {
            Ok(env) => env,
            Err(e) => return self.drop_message(channel, e),
        };

        if envelope.sender == self.peer_id {
            return Delivery::Echo;
        }

        let Some(target) = self.lookup(channel) else {
            SyncError::unknown_channel(channel).log();
            SyncMetrics::delta_dropped("unknown_channel");
            return Delivery::UnknownChannel;
        };

        SyncMetrics::delta_received(channel);

        match envelope.body {
            Body::Delta(value) => self.merge_into(target.as_ref(), &value, envelope.sender, false),
            Body::Snapshot(value) => {
                self.merge_into(target.as_ref(), &value, envelope.sender, true)
            }
            Body::CatchUpRequest => {
                debug!(channel = %channel, peer = %envelope.sender, "Answering catch-up request");
                match target
                    .encoded_snapshot()
                    .and_then(|snapshot| self.publish(channel, Body::Snapshot(snapshot)))
                {
                    Ok(()) => Delivery::Answered,
                    Err(e) => self.drop_message(channel, e),
                }
            }
        }
    }

    fn merge_into(
        &self,
        target: &dyn Replicated,
        value: &serde_json::Value,
        sender: PeerId,
        snapshot: bool,
    ) -> Delivery {
        match target.merge_encoded(value) {
            Ok(changed) => {
                debug!(
                    channel = %target.channel_name(),
                    peer = %sender,
                    snapshot = snapshot,
                    changed = changed,
                    "Remote value merged"
                );
                SyncMetrics::merge(changed);
                if snapshot {
                    self.snapshots.send_modify(|n| *n += 1);
                }
                Delivery::Merged { changed }
            }
            Err(e) => self.drop_message(target.channel_name(), e),
        }
    }

    fn drop_message(&self, channel: &str, error: SyncError) -> Delivery {
        let code = error.code();
        warn!(channel = %channel, error_code = %code, "Inbound message dropped");
        error.on_channel(channel).log();
        SyncMetrics::delta_dropped(code.category());
        Delivery::Dropped(code)
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// A peer joined: push it a snapshot of every channel we hold.
    pub fn on_peer_joined(&self, peer: PeerId) {
        if peer == self.peer_id || !self.peers.insert(peer) {
            return;
        }

        let channels = self.live_channels();
        info!(peer = %peer, channels = channels.len(), "Peer joined, sending snapshots");

        for target in channels {
            let name = target.channel_name().to_string();
            if let Err(e) = target
                .encoded_snapshot()
                .and_then(|snapshot| self.publish(&name, Body::Snapshot(snapshot)))
            {
                e.on_channel(name).log();
            }
        }
    }

    pub fn on_peer_left(&self, peer: PeerId) {
        if self.peers.remove(&peer).is_some() {
            info!(peer = %peer, "Peer left");
        }
    }

    /// Ask every peer for a snapshot of every registered channel and wait up
    /// to `timeout` for the first answer.
    pub async fn request_catch_up(&self, timeout: Duration) -> CatchUpOutcome {
        let channels = self.channel_names();
        if channels.is_empty() {
            SyncMetrics::catch_up(CatchUpOutcome::NothingToSync.as_str());
            return CatchUpOutcome::NothingToSync;
        }

        let mut answers = self.snapshots.subscribe();

        for name in &channels {
            if let Err(e) = self.publish(name, Body::CatchUpRequest) {
                e.on_channel(name.clone()).log();
            }
        }

        let outcome = if self.is_attached()
            && matches!(tokio::time::timeout(timeout, answers.changed()).await, Ok(Ok(())))
        {
            info!(channels = channels.len(), "Catch-up answered");
            CatchUpOutcome::Responded
        } else {
            SyncError::stale_catch_up(channels.len(), timeout).log();
            warn!(
                channels = channels.len(),
                "Catch-up got no answer, continuing from identity state"
            );
            CatchUpOutcome::NoResponse
        };

        SyncMetrics::catch_up(outcome.as_str());
        outcome
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("peer_id", &self.peer_id)
            .field("channels", &self.channels.len())
            .field("peers", &self.peers.len())
            .field("attached", &self.is_attached())
            .finish()
    }
}
