//! Replay state machine for a single watch.
//!
//! A watch's value is rebuilt by folding its base snapshot through the event
//! log in ascending order. The fold is pure and cheap, so it is always re-run
//! in full rather than patched incrementally.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::event::{Event, EventKind};
use crate::crdt::translator::{decode_float, decode_tuple, encode_float, Translator};
use crate::error::{Result, SyncError};

// =============================================================================
// Aggregate Trait
// =============================================================================

/// State that can be rebuilt from a sequence of events.
///
/// Implementations start from `Default` (or any base value) and fold each
/// event with `apply`. Given the same base and events, the result is the same
/// on every replica.
pub trait Aggregate: Default {
    /// Fold one event into the state. Must be pure and infallible.
    fn apply(&mut self, event: &Event);

    /// Fold every event, in iteration order.
    fn replay<'a, I>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = &'a Event>,
    {
        for event in events {
            self.apply(event);
        }
        self
    }
}

// =============================================================================
// Watch Value
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchState {
    #[default]
    Paused = 1,
    Running = 2,
}

impl WatchState {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            1 => Ok(Self::Paused),
            2 => Ok(Self::Running),
            other => Err(SyncError::decode(format!("unknown watch state {}", other))),
        }
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused => write!(f, "PAUSED"),
            Self::Running => write!(f, "RUNNING"),
        }
    }
}

/// Derived watch value.
///
/// While paused, `timeval` is the accumulated elapsed time. While running, it
/// is the shared-timeline instant the current run would have started at had
/// it never been paused, so elapsed time is `now - timeval`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WatchValue {
    #[serde(with = "crate::crdt::translator::float_serde")]
    pub timeval: f64,
    pub state: WatchState,
}

impl WatchValue {
    pub fn new(timeval: f64, state: WatchState) -> Self {
        Self { timeval, state }
    }

    pub fn paused(elapsed: f64) -> Self {
        Self::new(elapsed, WatchState::Paused)
    }

    pub fn running(started: f64) -> Self {
        Self::new(started, WatchState::Running)
    }

    pub fn is_running(&self) -> bool {
        self.state == WatchState::Running
    }

    /// Elapsed time at shared-timeline instant `now`.
    pub fn instantaneous(&self, now: f64) -> f64 {
        match self.state {
            WatchState::Running => now - self.timeval,
            WatchState::Paused => self.timeval,
        }
    }
}

impl Aggregate for WatchValue {
    fn apply(&mut self, event: &Event) {
        let t = event.timestamp;
        match (self.state, event.kind) {
            (WatchState::Paused, EventKind::Run) => {
                self.state = WatchState::Running;
                self.timeval = t - self.timeval;
            }
            (WatchState::Paused, EventKind::Reset) => {
                self.timeval = 0.0;
            }
            (WatchState::Running, EventKind::Pause) => {
                self.state = WatchState::Paused;
                self.timeval = t - self.timeval;
            }
            (WatchState::Running, EventKind::Reset) => {
                self.timeval = t;
            }
            // Pausing a paused watch or running a running one changes nothing.
            (WatchState::Paused, EventKind::Pause) | (WatchState::Running, EventKind::Run) => {}
        }
    }
}

impl fmt::Display for WatchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, timeval={})", self.state, self.timeval)
    }
}

// =============================================================================
// Translator
// =============================================================================

/// Wire form `[timeval, state_code]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchValueTranslator;

impl Translator<WatchValue> for WatchValueTranslator {
    fn encode(&self, value: &WatchValue) -> Result<Value> {
        Ok(Value::Array(vec![
            encode_float(value.timeval),
            Value::from(value.state.code()),
        ]))
    }

    fn decode(&self, value: &Value) -> Result<WatchValue> {
        let [timeval, state] = decode_tuple::<2>(value)?;
        let code = state.as_u64().ok_or_else(|| {
            SyncError::decode(format!("expected a watch state code, got {}", state))
        })?;
        Ok(WatchValue::new(decode_float(timeval)?, WatchState::from_code(code)?))
    }
}
