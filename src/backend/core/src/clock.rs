//! Wall clock and clock offset.
//!
//! Replicas do not share a clock. Each one keeps an offset that maps its own
//! wall-clock reading onto the session's shared timeline:
//!
//! ```text
//! shared = local + offset
//! local  = shared - offset
//! ```
//!
//! Every timestamp written into a container is on the shared timeline. The
//! offset is set from a checkpoint at load time, or aligned to a reference
//! reading handed over by whatever handshake admitted this replica to the
//! session. The replica that opens a session keeps offset `0`, so its clock
//! defines the shared timeline.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Source of wall-clock time in seconds. Monotonicity is not required.
pub trait WallClock: Send + Sync + fmt::Debug {
    fn now(&self) -> f64;
}

/// Real time, as seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

/// Per-namespace correction from local time to shared time.
///
/// Clones share the same offset.
#[derive(Clone)]
pub struct ClockOffset {
    namespace: Arc<str>,
    clock: Arc<dyn WallClock>,
    offset_bits: Arc<AtomicU64>,
}

impl ClockOffset {
    pub fn new(namespace: impl Into<Arc<str>>, clock: Arc<dyn WallClock>) -> Self {
        Self {
            namespace: namespace.into(),
            clock,
            offset_bits: Arc::new(AtomicU64::new(0f64.to_bits())),
        }
    }

    /// An offset over the real system clock.
    pub fn system(namespace: impl Into<Arc<str>>) -> Self {
        Self::new(namespace, Arc::new(SystemClock))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get_offset(&self) -> f64 {
        f64::from_bits(self.offset_bits.load(Ordering::Acquire))
    }

    pub fn set_offset(&self, offset: f64) {
        self.offset_bits.store(offset.to_bits(), Ordering::Release);
        debug!(namespace = %self.namespace, offset = offset, "Clock offset set");
    }

    /// Raw wall-clock reading.
    pub fn local_now(&self) -> f64 {
        self.clock.now()
    }

    /// Current time on the shared timeline.
    pub fn shared_now(&self) -> f64 {
        self.to_shared(self.local_now())
    }

    pub fn to_shared(&self, local: f64) -> f64 {
        local + self.get_offset()
    }

    pub fn to_local(&self, shared: f64) -> f64 {
        shared - self.get_offset()
    }

    /// Set the offset so that `shared_now()` currently reads `reference`.
    pub fn align_to(&self, reference: f64) {
        self.set_offset(reference - self.local_now());
    }
}

impl fmt::Debug for ClockOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockOffset")
            .field("namespace", &self.namespace)
            .field("offset", &self.get_offset())
            .finish()
    }
}
