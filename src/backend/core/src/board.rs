//! A board of replicated stopwatches.
//!
//! Watch `i` is made of three containers on the shared multiplexer:
//!
//! | channel | container |
//! |---|---|
//! | `name{i}` | `Latest<String>`, default `"Stopwatch {i+1}"` |
//! | `watch{i}` (+ `watch{i}/basestate`) | `WatchModel` |
//! | `marks{i}` | `AddOnlySet<f64>` of recorded elapsed times |
//!
//! The selection is local to this replica and never replicated. Every local
//! action is stamped with the board's shared clock.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::ClockOffset;
use crate::crdt::{AddOnlySet, FloatTranslator, Latest, StringTranslator};
use crate::error::{Result, SyncError};
use crate::events::{EventKind, WatchModel, WatchValue};
use crate::inhibit::{InhibitGuard, SuspendInhibitor};
use crate::persistence::{Checkpoint, WatchCheckpoint};
use crate::transport::Multiplexer;

/// How many marks a watch shows at once.
pub const RECENT_MARKS: usize = 16;

/// Render seconds the way the board displays them; negatives clamp to zero.
pub fn format_seconds(seconds: f64) -> String {
    format!("{:.2}", seconds.max(0.0))
}

pub fn default_name(index: usize) -> String {
    format!("Stopwatch {}", index + 1)
}

struct Watch {
    name: Arc<Latest<String>>,
    model: WatchModel,
    marks: Arc<AddOnlySet<f64>>,
    guard: Mutex<Option<InhibitGuard>>,
}

pub struct Board {
    mux: Arc<Multiplexer>,
    clock: ClockOffset,
    inhibitor: Arc<SuspendInhibitor>,
    watches: Vec<Watch>,
    selected: AtomicUsize,
}

impl Board {
    /// Open `watch_count` watches on `mux`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(
        mux: Arc<Multiplexer>,
        clock: ClockOffset,
        watch_count: usize,
        inhibitor: Arc<SuspendInhibitor>,
    ) -> Result<Self> {
        let watches = (0..watch_count)
            .map(|i| {
                Ok(Watch {
                    name: Latest::new(
                        mux.channel(format!("name{}", i)),
                        default_name(i),
                        clock.clone(),
                        StringTranslator,
                    )?,
                    model: WatchModel::new(mux.channel(format!("watch{}", i)), clock.clone())?,
                    marks: AddOnlySet::with_order(
                        mux.channel(format!("marks{}", i)),
                        f64::total_cmp,
                        FloatTranslator,
                    )?,
                    guard: Mutex::new(None),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(peer = %mux.peer_id(), watches = watch_count, "Board opened");

        Ok(Self {
            mux,
            clock,
            inhibitor,
            watches,
            selected: AtomicUsize::new(0),
        })
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.mux
    }

    pub fn clock(&self) -> &ClockOffset {
        &self.clock
    }

    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    fn get(&self, index: usize) -> Result<&Watch> {
        self.watches
            .get(index)
            .ok_or_else(|| SyncError::invalid_watch_index(index, self.watches.len()))
    }

    pub fn watch(&self, index: usize) -> Result<&WatchModel> {
        Ok(&self.get(index)?.model)
    }

    // -------------------------------------------------------------------------
    // Actions
    // -------------------------------------------------------------------------

    /// Start a paused watch, pause a running one.
    pub fn toggle(&self, index: usize) -> Result<WatchValue> {
        let watch = self.get(index)?;
        let kind = if watch.model.is_running() {
            EventKind::Pause
        } else {
            EventKind::Run
        };
        self.record(index, kind)
    }

    pub fn start(&self, index: usize) -> Result<WatchValue> {
        let watch = self.get(index)?;
        if watch.model.is_running() {
            return Ok(watch.model.state());
        }
        self.record(index, EventKind::Run)
    }

    pub fn stop(&self, index: usize) -> Result<WatchValue> {
        let watch = self.get(index)?;
        if !watch.model.is_running() {
            return Ok(watch.model.state());
        }
        self.record(index, EventKind::Pause)
    }

    /// Zero the watch. A running watch keeps running from zero.
    pub fn reset(&self, index: usize) -> Result<WatchValue> {
        self.record(index, EventKind::Reset)
    }

    fn record(&self, index: usize, kind: EventKind) -> Result<WatchValue> {
        let watch = self.get(index)?;
        let value = watch.model.record(kind)?;
        self.sync_guard(watch);
        info!(watch = index, event = %kind, state = %value.state, "Watch event recorded");
        Ok(value)
    }

    /// Record the current elapsed time as a mark and return it.
    pub fn mark(&self, index: usize) -> Result<f64> {
        let watch = self.get(index)?;
        let elapsed = self.elapsed(index)?;
        watch.marks.add(elapsed)?;
        Ok(elapsed)
    }

    pub fn rename(&self, index: usize, name: impl Into<String>) -> Result<bool> {
        self.get(index)?.name.set(name.into())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn name(&self, index: usize) -> Result<String> {
        Ok(self.get(index)?.name.value())
    }

    pub fn state(&self, index: usize) -> Result<WatchValue> {
        Ok(self.get(index)?.model.state())
    }

    /// Elapsed time now. Never negative, even under clock skew.
    pub fn elapsed(&self, index: usize) -> Result<f64> {
        Ok(self.get(index)?.model.instantaneous().max(0.0))
    }

    /// All marks, ascending.
    pub fn marks(&self, index: usize) -> Result<Vec<f64>> {
        Ok(self.get(index)?.marks.values())
    }

    /// The largest `count` marks, ascending.
    pub fn recent_marks(&self, index: usize, count: usize) -> Result<Vec<f64>> {
        let mut marks = self.marks(index)?;
        let skip = marks.len().saturating_sub(count);
        marks.drain(..skip);
        Ok(marks)
    }

    // -------------------------------------------------------------------------
    // Selection
    // -------------------------------------------------------------------------

    pub fn selected(&self) -> usize {
        self.selected.load(Ordering::Relaxed)
    }

    pub fn select(&self, index: usize) -> Result<()> {
        self.get(index)?;
        self.selected.store(index, Ordering::Relaxed);
        Ok(())
    }

    /// Move the selection up one, stopping at the first watch.
    pub fn select_up(&self) -> usize {
        let next = self.selected().saturating_sub(1);
        self.selected.store(next, Ordering::Relaxed);
        next
    }

    /// Move the selection down one, stopping at the last watch.
    pub fn select_down(&self) -> usize {
        let current = self.selected();
        let next = if current + 1 < self.watches.len() {
            current + 1
        } else {
            current
        };
        self.selected.store(next, Ordering::Relaxed);
        next
    }

    // -------------------------------------------------------------------------
    // Suspend inhibition
    // -------------------------------------------------------------------------

    fn sync_guard(&self, watch: &Watch) {
        let mut guard = watch.guard.lock();
        match (watch.model.is_running(), guard.is_some()) {
            (true, false) => *guard = Some(self.inhibitor.acquire()),
            (false, true) => *guard = None,
            _ => {}
        }
    }

    /// Hold a guard for exactly the watches that are running now.
    ///
    /// Local actions keep this in step on their own; call it after remote
    /// changes if inhibition should follow them too.
    pub fn sync_inhibitor(&self) {
        for watch in &self.watches {
            self.sync_guard(watch);
        }
    }

    // -------------------------------------------------------------------------
    // Checkpoints
    // -------------------------------------------------------------------------

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            offset: self.clock.get_offset(),
            names: self.watches.iter().map(|w| w.name.value()).collect(),
            states: self
                .watches
                .iter()
                .map(|w| WatchCheckpoint {
                    value: w.model.state(),
                    last_update_time: w.model.last_update_time(),
                })
                .collect(),
            marks: self.watches.iter().map(|w| w.marks.values()).collect(),
            selected: Some(self.selected()),
        }
    }

    /// Load a checkpoint into the board.
    ///
    /// Each watch's saved value becomes a base snapshot scored at its last
    /// update time, so anything newer from peers still wins.
    pub fn restore(&self, checkpoint: &Checkpoint) -> Result<()> {
        if checkpoint.watch_count() != self.watches.len() {
            warn!(
                saved = checkpoint.watch_count(),
                board = self.watches.len(),
                "Checkpoint size differs from board, restoring the overlap"
            );
        }

        self.clock.set_offset(checkpoint.offset);

        for (watch, name) in self.watches.iter().zip(&checkpoint.names) {
            if watch.name.value() != *name {
                watch.name.set(name.clone())?;
            }
        }

        for (watch, saved) in self.watches.iter().zip(&checkpoint.states) {
            watch.model.reset(saved.value, saved.last_update_time);
            self.sync_guard(watch);
        }

        for (watch, marks) in self.watches.iter().zip(&checkpoint.marks) {
            watch.marks.update(marks.clone())?;
        }

        let selected = checkpoint
            .selected
            .filter(|&s| s < self.watches.len())
            .unwrap_or(0);
        self.selected.store(selected, Ordering::Relaxed);

        info!(
            watches = checkpoint.watch_count(),
            offset = checkpoint.offset,
            selected = selected,
            "Checkpoint restored"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board")
            .field("peer", &self.mux.peer_id())
            .field("watches", &self.watches.len())
            .field("selected", &self.selected())
            .finish()
    }
}
