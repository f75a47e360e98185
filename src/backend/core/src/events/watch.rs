//! The replicated stopwatch.
//!
//! A `WatchModel` is two containers under one channel name:
//!
//! - the event log, an `AddOnlySortedSet<Event>` on the channel itself
//! - the base snapshot, a `HighScore<WatchValue>` on the derived
//!   `<channel>/basestate` sub-channel
//!
//! Its value is the base folded through every logged event whose timestamp is
//! strictly greater than the base's score. A base with a higher score therefore
//! supersedes all older events without removing them from the log.
//!
//! Recomputation is a full replay under the model's own lock, so concurrent
//! triggers can never publish an older value after a newer one. Local calls
//! recompute immediately; remote merges recompute on a background task fed by
//! the two containers' notification queues.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, trace};

use super::aggregate::{Aggregate, WatchValue, WatchValueTranslator};
use super::event::{Event, EventKind, EventTranslator};
use crate::clock::ClockOffset;
use crate::crdt::{AddOnlySortedSet, HighScore, ListenerHandle, Notifier, Scored, Subscription};
use crate::error::Result;
use crate::telemetry::metrics::SyncMetrics;
use crate::transport::ReplicaChannel;

/// Suffix of the sub-channel carrying the base snapshot.
pub const BASE_SUFFIX: &str = "basestate";

struct WatchInner {
    channel: ReplicaChannel,
    clock: ClockOffset,
    history: AddOnlySortedSet<Event>,
    base: Arc<HighScore<WatchValue>>,
    value: Mutex<WatchValue>,
    notifier: Notifier<WatchValue>,
}

impl WatchInner {
    /// Replay and store. Notifies only when the value actually changed.
    fn refresh(&self) -> WatchValue {
        let started = Instant::now();
        let mut current = self.value.lock();

        let base = self.base.get();
        let (value, replayed) = self.history.with_values(|events| {
            let start = events
                .partition_point(|e| e.timestamp.total_cmp(&base.score) != Ordering::Greater);
            (base.value.replay(&events[start..]), events.len() - start)
        });

        SyncMetrics::replay(started.elapsed());
        trace!(channel = %self.channel.name(), replayed = replayed, "Watch replayed");

        if value != *current {
            debug!(
                channel = %self.channel.name(),
                state = %value.state,
                timeval = value.timeval,
                "Watch value changed"
            );
            *current = value;
            self.notifier.notify(value);
        }
        value
    }
}

/// A stopwatch replicated over a channel.
pub struct WatchModel {
    inner: Arc<WatchInner>,
}

impl WatchModel {
    /// Open the watch on `channel`, starting from the identity state.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(channel: ReplicaChannel, clock: ClockOffset) -> Result<Self> {
        let history = AddOnlySortedSet::new(channel.clone(), EventTranslator)?;
        let base = HighScore::new(
            channel.derive(BASE_SUFFIX),
            WatchValue::default(),
            f64::NEG_INFINITY,
            WatchValueTranslator,
        )?;

        let inner = Arc::new(WatchInner {
            channel,
            clock,
            history,
            base,
            value: Mutex::new(WatchValue::default()),
            notifier: Notifier::new(),
        });

        tokio::spawn(follow(
            Arc::downgrade(&inner),
            inner.history.subscribe(),
            inner.base.subscribe(),
        ));

        Ok(Self { inner })
    }

    pub fn channel(&self) -> &ReplicaChannel {
        &self.inner.channel
    }

    pub fn clock(&self) -> &ClockOffset {
        &self.inner.clock
    }

    /// Current derived value.
    pub fn state(&self) -> WatchValue {
        *self.inner.value.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Log an event and return the value after it.
    pub fn add_event(&self, event: Event) -> Result<WatchValue> {
        self.inner.history.add(event)?;
        Ok(self.inner.refresh())
    }

    /// Log an event of `kind` stamped with the shared-timeline now.
    pub fn record(&self, kind: EventKind) -> Result<WatchValue> {
        let now = self.inner.clock.shared_now();
        self.add_event(Event::new(now, kind))
    }

    /// Offer a new base snapshot. Ignored unless `score` beats the current base.
    pub fn reset(&self, value: WatchValue, score: f64) -> bool {
        let accepted = self.inner.base.set(value, score);
        if accepted {
            self.inner.refresh();
        }
        accepted
    }

    /// Fold the current value into a new base scored at the last update time.
    ///
    /// Returns `false` when there is nothing newer than the base to fold.
    pub fn compact(&self) -> bool {
        let score = self.last_update_time();
        if score.total_cmp(&self.inner.base.score()) != Ordering::Greater {
            return false;
        }
        let value = self.inner.refresh();
        self.reset(value, score)
    }

    /// Latest of the last logged event and the base score; `-inf` for a fresh watch.
    pub fn last_update_time(&self) -> f64 {
        let base = self.inner.base.score();
        match self.inner.history.last() {
            Some(event) if event.timestamp.total_cmp(&base) == Ordering::Greater => {
                event.timestamp
            }
            _ => base,
        }
    }

    /// Elapsed time now, on the shared timeline.
    pub fn instantaneous(&self) -> f64 {
        self.instantaneous_at(self.inner.clock.shared_now())
    }

    pub fn instantaneous_at(&self, now: f64) -> f64 {
        self.state().instantaneous(now)
    }

    /// Force a replay. Normally unnecessary.
    pub fn refresh(&self) -> WatchValue {
        self.inner.refresh()
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.history.values()
    }

    pub fn base(&self) -> Scored<WatchValue> {
        self.inner.base.get()
    }

    pub fn subscribe(&self) -> Subscription<WatchValue> {
        self.inner.notifier.subscribe()
    }

    pub fn register_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: FnMut(WatchValue) + Send + 'static,
    {
        self.inner.notifier.register_listener(callback)
    }
}

impl fmt::Debug for WatchModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchModel")
            .field("channel", &self.inner.channel.name())
            .field("value", &self.state())
            .field("events", &self.inner.history.len())
            .finish()
    }
}

/// Replays the watch whenever either container changes.
async fn follow(
    inner: Weak<WatchInner>,
    mut history: Subscription<Vec<Event>>,
    mut base: Subscription<Scored<WatchValue>>,
) {
    loop {
        tokio::select! {
            changed = history.recv() => if changed.is_none() { break },
            changed = base.recv() => if changed.is_none() { break },
        }
        // Collapse a burst of changes into one replay.
        history.drain();
        base.drain();

        let Some(inner) = inner.upgrade() else { break };
        inner.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::aggregate::WatchState;
    use crate::transport::Multiplexer;

    fn watch(start: f64) -> (WatchModel, Arc<ManualClock>) {
        let mux = Multiplexer::new();
        let clock = ManualClock::new(start);
        let offset = ClockOffset::new("watch0", clock.clone());
        let model = WatchModel::new(mux.channel("watch0"), offset).unwrap();
        (model, clock)
    }

    #[tokio::test]
    async fn test_scenario_run() {
        let (w, _) = watch(0.0);
        let v = w.add_event(Event::run(10.0)).unwrap();
        assert_eq!(v, WatchValue::running(10.0));
        assert_eq!(w.instantaneous_at(15.0), 5.0);
    }

    #[tokio::test]
    async fn test_scenario_run_pause() {
        let (w, _) = watch(0.0);
        w.add_event(Event::run(10.0)).unwrap();
        assert_eq!(w.add_event(Event::pause(15.0)).unwrap(), WatchValue::paused(5.0));
    }

    #[tokio::test]
    async fn test_scenario_run_reset() {
        let (w, _) = watch(0.0);
        w.add_event(Event::run(10.0)).unwrap();
        w.add_event(Event::reset(12.0)).unwrap();
        assert_eq!(w.state(), WatchValue::running(12.0));
        assert_eq!(w.instantaneous_at(20.0), 8.0);
    }

    #[tokio::test]
    async fn test_out_of_order_events_replay_in_time_order() {
        let (w, _) = watch(0.0);
        w.add_event(Event::pause(15.0)).unwrap();
        w.add_event(Event::run(10.0)).unwrap();
        assert_eq!(w.state(), WatchValue::paused(5.0));
    }

    #[tokio::test]
    async fn test_record_uses_shared_clock() {
        let (w, clock) = watch(100.0);
        w.clock().set_offset(-50.0);
        w.record(EventKind::Run).unwrap();
        clock.advance(3.0);
        assert_eq!(w.state(), WatchValue::running(50.0));
        assert_eq!(w.instantaneous(), 3.0);
        assert!(w.is_running());
    }

    #[tokio::test]
    async fn test_base_supersedes_older_events() {
        let (w, _) = watch(0.0);
        w.add_event(Event::run(10.0)).unwrap();
        assert!(w.reset(WatchValue::paused(2.0), 20.0));
        assert_eq!(w.state(), WatchValue::paused(2.0));

        // Older than the base: logged but ignored.
        w.add_event(Event::reset(15.0)).unwrap();
        assert_eq!(w.state(), WatchValue::paused(2.0));

        w.add_event(Event::run(30.0)).unwrap();
        assert_eq!(w.instantaneous_at(31.0), 3.0);

        assert!(!w.reset(WatchValue::default(), 20.0));
    }

    #[tokio::test]
    async fn test_compact_preserves_value() {
        let (w, _) = watch(0.0);
        assert!(!w.compact());
        w.add_event(Event::run(10.0)).unwrap();
        w.add_event(Event::pause(14.0)).unwrap();
        let before = w.state();

        assert!(w.compact());
        assert_eq!(w.base(), Scored::new(14.0, before));
        assert_eq!(w.state(), before);
        assert!(!w.compact());

        w.add_event(Event::run(20.0)).unwrap();
        assert_eq!(w.instantaneous_at(21.0), 5.0);
    }

    #[tokio::test]
    async fn test_last_update_time() {
        let (w, _) = watch(0.0);
        assert_eq!(w.last_update_time(), f64::NEG_INFINITY);
        w.add_event(Event::run(3.0)).unwrap();
        assert_eq!(w.last_update_time(), 3.0);
        w.reset(WatchValue::paused(1.0), 8.0);
        assert_eq!(w.last_update_time(), 8.0);
    }

    #[tokio::test]
    async fn test_notifies_only_on_change() {
        let (w, _) = watch(0.0);
        let mut sub = w.subscribe();
        w.add_event(Event::run(1.0)).unwrap();
        w.add_event(Event::run(2.0)).unwrap();
        w.refresh();
        assert_eq!(sub.drain(), vec![WatchValue::running(1.0)]);
        assert_eq!(w.state().state, WatchState::Running);
    }

    #[tokio::test]
    async fn test_remote_merge_recomputes_in_background() {
        use crate::transport::{Body, Envelope, PeerId};
        use serde_json::json;

        let mux = Multiplexer::new();
        let offset = ClockOffset::new("watch0", ManualClock::new(0.0));
        let w = WatchModel::new(mux.channel("watch0"), offset).unwrap();
        let mut sub = w.subscribe();

        let env = Envelope::new(PeerId::new(), Body::Delta(json!([[4.0, 1]])));
        mux.on_receive("watch0", &env.to_bytes().unwrap());

        let v = tokio::time::timeout(std::time::Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v, WatchValue::running(4.0));
        assert_eq!(
            mux.channel_names(),
            vec!["watch0".to_string(), "watch0/basestate".to_string()]
        );
    }
}
