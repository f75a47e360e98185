//! In-process broadcast hub.
//!
//! Stands in for a real broadcast connection in tests and in `lapsync
//! simulate`. Every joined replica gets a delivery task reading from one
//! shared `tokio::sync::broadcast` channel, so delivery is asynchronous and
//! interleaves across replicas the way a network would. The hub can also
//! deliver every message twice and cut links between pairs of peers.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::envelope::PeerId;
use super::multiplexer::Multiplexer;
use super::Transport;
use crate::error::{Result, SyncError};

/// Hub settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Broadcast buffer size; slow replicas lose messages past this
    pub capacity: usize,
    /// Deliver every message twice
    pub duplicate_delivery: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            duplicate_delivery: false,
        }
    }
}

/// One item on the shared broadcast channel.
#[derive(Debug, Clone)]
pub enum HubEvent {
    Message {
        origin: PeerId,
        channel: Arc<str>,
        payload: Arc<[u8]>,
    },
    Joined(PeerId),
    Left(PeerId),
}

/// Hub counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStats {
    pub members: usize,
    pub messages_sent: u64,
    pub deliveries: u64,
    pub blocked_by_partition: u64,
    pub lagged: u64,
}

struct Member {
    mux: Weak<Multiplexer>,
    /// Dropping this also stops the delivery task
    shutdown: watch::Sender<bool>,
}

struct HubInner {
    sender: broadcast::Sender<HubEvent>,
    duplicate_delivery: bool,
    members: DashMap<PeerId, Member>,
    partitions: RwLock<HashSet<(PeerId, PeerId)>>,
    /// Deliveries queued but not yet handled, summed over receivers
    outstanding: AtomicU64,
    messages_sent: AtomicU64,
    deliveries: AtomicU64,
    blocked_by_partition: AtomicU64,
    lagged: AtomicU64,
}

impl HubInner {
    fn send_event(&self, event: HubEvent) -> Result<()> {
        // Count before sending so a fast receiver cannot decrement first.
        let receivers = self.sender.receiver_count() as u64;
        self.outstanding.fetch_add(receivers, Ordering::SeqCst);
        match self.sender.send(event) {
            Ok(delivered) => {
                let unused = receivers.saturating_sub(delivered as u64);
                self.outstanding.fetch_sub(unused, Ordering::SeqCst);
                Ok(())
            }
            Err(_) => {
                self.outstanding.fetch_sub(receivers, Ordering::SeqCst);
                Err(SyncError::transport("hub has no members"))
            }
        }
    }

    fn done(&self, count: u64) {
        // Saturating: a receiver dropped mid-flight may have been counted short.
        let _ = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(count)));
    }

    fn is_blocked(&self, from: PeerId, to: PeerId) -> bool {
        self.partitions.read().contains(&(from, to))
    }
}

/// In-memory broadcast connection shared by any number of replicas.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new(config: HubConfig) -> Self {
        let (sender, _) = broadcast::channel(config.capacity.max(1));
        Self {
            inner: Arc::new(HubInner {
                sender,
                duplicate_delivery: config.duplicate_delivery,
                members: DashMap::new(),
                partitions: RwLock::new(HashSet::new()),
                outstanding: AtomicU64::new(0),
                messages_sent: AtomicU64::new(0),
                deliveries: AtomicU64::new(0),
                blocked_by_partition: AtomicU64::new(0),
                lagged: AtomicU64::new(0),
            }),
        }
    }

    /// Connect `mux` to the hub.
    ///
    /// Existing members are told about the newcomer and push it their
    /// snapshots; the newcomer does the same towards them.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn join(&self, mux: &Arc<Multiplexer>) -> Result<()> {
        let peer = mux.peer_id();
        if self.inner.members.contains_key(&peer) {
            return Err(SyncError::transport(format!("peer {} already joined", peer)));
        }

        let receiver = self.inner.sender.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(deliver(
            peer,
            Arc::downgrade(mux),
            Arc::downgrade(&self.inner),
            receiver,
            shutdown_rx,
        ));

        let existing: Vec<PeerId> = self.inner.members.iter().map(|m| *m.key()).collect();
        self.inner.members.insert(
            peer,
            Member {
                mux: Arc::downgrade(mux),
                shutdown: shutdown_tx,
            },
        );

        mux.attach(Arc::new(MemoryTransport {
            peer,
            hub: self.inner.clone(),
        }));
        self.inner.send_event(HubEvent::Joined(peer))?;
        for other in existing {
            mux.on_peer_joined(other);
        }

        info!(peer = %peer, members = self.inner.members.len(), "Replica joined hub");
        Ok(())
    }

    /// Disconnect a replica. Its queued deliveries are discarded.
    pub fn leave(&self, peer: PeerId) -> bool {
        let Some((_, member)) = self.inner.members.remove(&peer) else {
            return false;
        };

        if self.inner.send_event(HubEvent::Left(peer)).is_err() {
            debug!(peer = %peer, "Last replica left hub");
        }
        let _ = member.shutdown.send(true);
        if let Some(mux) = member.mux.upgrade() {
            mux.detach();
        }

        info!(peer = %peer, members = self.inner.members.len(), "Replica left hub");
        true
    }

    /// Stop delivering messages between `a` and `b`, both ways.
    pub fn partition(&self, a: PeerId, b: PeerId) {
        let mut partitions = self.inner.partitions.write();
        partitions.insert((a, b));
        partitions.insert((b, a));
        warn!(a = %a, b = %b, "Link partitioned");
    }

    pub fn heal(&self, a: PeerId, b: PeerId) {
        let mut partitions = self.inner.partitions.write();
        partitions.remove(&(a, b));
        partitions.remove(&(b, a));
        info!(a = %a, b = %b, "Link healed");
    }

    pub fn heal_all(&self) {
        self.inner.partitions.write().clear();
    }

    pub fn members(&self) -> Vec<PeerId> {
        let mut members: Vec<PeerId> = self.inner.members.iter().map(|m| *m.key()).collect();
        members.sort();
        members
    }

    /// Wait until every queued delivery has been handled, or `timeout` passes.
    ///
    /// Returns `true` if the hub went quiet in time.
    pub async fn settle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inner.outstanding.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            members: self.inner.members.len(),
            messages_sent: self.inner.messages_sent.load(Ordering::Relaxed),
            deliveries: self.inner.deliveries.load(Ordering::Relaxed),
            blocked_by_partition: self.inner.blocked_by_partition.load(Ordering::Relaxed),
            lagged: self.inner.lagged.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// Outbound side handed to each joined multiplexer.
pub struct MemoryTransport {
    peer: PeerId,
    hub: Arc<HubInner>,
}

impl Transport for MemoryTransport {
    fn send(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        self.hub.send_event(HubEvent::Message {
            origin: self.peer,
            channel: Arc::from(channel),
            payload: Arc::from(payload),
        })?;
        self.hub.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Delivery loop for one replica.
async fn deliver(
    peer: PeerId,
    mux: Weak<Multiplexer>,
    hub: Weak<HubInner>,
    mut receiver: broadcast::Receiver<HubEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(peer = %peer, "Hub delivery task started");

    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = receiver.recv() => received,
        };

        let Some(hub) = hub.upgrade() else { break };

        let event = match received {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(peer = %peer, missed = missed, "Replica lagged, messages lost");
                hub.lagged.fetch_add(missed, Ordering::Relaxed);
                hub.done(missed);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let Some(mux) = mux.upgrade() else {
            hub.done(1);
            break;
        };

        match event {
            HubEvent::Message {
                origin,
                channel,
                payload,
            } => {
                if hub.is_blocked(origin, peer) {
                    hub.blocked_by_partition.fetch_add(1, Ordering::Relaxed);
                } else {
                    let copies = if hub.duplicate_delivery { 2 } else { 1 };
                    for _ in 0..copies {
                        mux.on_receive(&channel, &payload);
                        hub.deliveries.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            HubEvent::Joined(other) if other != peer => mux.on_peer_joined(other),
            HubEvent::Left(other) => mux.on_peer_left(other),
            HubEvent::Joined(_) => {}
        }

        hub.done(1);
    }

    // Whatever is still queued for this replica will never be handled.
    if let Some(hub) = hub.upgrade() {
        let mut dropped = 0;
        while receiver.try_recv().is_ok() {
            dropped += 1;
        }
        hub.done(dropped);
    }

    debug!(peer = %peer, "Hub delivery task stopped");
}
