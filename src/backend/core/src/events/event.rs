//! Stopwatch events.
//!
//! An event is a point on the shared timeline plus what happened there. Events
//! are totally ordered by timestamp (`f64::total_cmp`), then by kind code, so
//! every replica replays the same log in the same order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use crate::crdt::translator::{decode_float, decode_tuple, encode_float, Translator};
use crate::error::{Result, SyncError};

// =============================================================================
// Event Kind
// =============================================================================

/// What an event does to a watch. The discriminant is the wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Run = 1,
    Pause = 2,
    Reset = 3,
}

impl EventKind {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            1 => Ok(Self::Run),
            2 => Ok(Self::Pause),
            3 => Ok(Self::Reset),
            other => Err(SyncError::decode(format!("unknown event kind {}", other))),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Run => "RUN",
            Self::Pause => "PAUSE",
            Self::Reset => "RESET",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EventKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "run" => Ok(Self::Run),
            "pause" => Ok(Self::Pause),
            "reset" => Ok(Self::Reset),
            other => Err(SyncError::decode(format!("unknown event kind {:?}", other))),
        }
    }
}

// =============================================================================
// Event
// =============================================================================

/// An immutable point on the shared timeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Event {
    #[serde(with = "crate::crdt::translator::float_serde")]
    pub timestamp: f64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(timestamp: f64, kind: EventKind) -> Self {
        Self { timestamp, kind }
    }

    pub fn run(timestamp: f64) -> Self {
        Self::new(timestamp, EventKind::Run)
    }

    pub fn pause(timestamp: f64) -> Self {
        Self::new(timestamp, EventKind::Pause)
    }

    pub fn reset(timestamp: f64) -> Self {
        Self::new(timestamp, EventKind::Reset)
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .total_cmp(&other.timestamp)
            .then(self.kind.code().cmp(&other.kind.code()))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.timestamp)
    }
}

// =============================================================================
// Translator
// =============================================================================

/// Wire form `[timestamp, kind_code]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventTranslator;

impl Translator<Event> for EventTranslator {
    fn encode(&self, event: &Event) -> Result<Value> {
        Ok(Value::Array(vec![
            encode_float(event.timestamp),
            Value::from(event.kind.code()),
        ]))
    }

    fn decode(&self, value: &Value) -> Result<Event> {
        let [timestamp, kind] = decode_tuple::<2>(value)?;
        let code = kind.as_u64().ok_or_else(|| {
            SyncError::decode(format!("expected an event kind code, got {}", kind))
        })?;
        Ok(Event::new(decode_float(timestamp)?, EventKind::from_code(code)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_order_by_time_then_kind() {
        let mut events = vec![
            Event::reset(5.0),
            Event::pause(1.0),
            Event::run(5.0),
            Event::pause(5.0),
        ];
        events.sort();
        assert_eq!(
            events,
            vec![Event::pause(1.0), Event::run(5.0), Event::pause(5.0), Event::reset(5.0)]
        );
    }

    #[test]
    fn test_equality_is_total() {
        assert_eq!(Event::run(1.0), Event::run(1.0));
        assert_ne!(Event::run(1.0), Event::pause(1.0));
        assert_eq!(Event::run(f64::NAN), Event::run(f64::NAN));
    }

    #[test]
    fn test_translator_wire_form() {
        let t = EventTranslator;
        assert_eq!(t.encode(&Event::run(10.5)).unwrap(), json!([10.5, 1]));
        assert_eq!(t.decode(&json!([12, 3])).unwrap(), Event::reset(12.0));
    }

    #[test]
    fn test_translator_rejects_unknown_kind() {
        let t = EventTranslator;
        assert!(t.decode(&json!([1.0, 9])).is_err());
        assert!(t.decode(&json!([1.0, "run"])).is_err());
        assert!(t.decode(&json!([1.0])).is_err());
    }

    #[test]
    fn test_translator_rejects_nan_timestamp() {
        let t = EventTranslator;
        assert!(t.decode(&json!(["nan", 1])).is_err());
        assert_eq!(t.decode(&json!(["inf", 2])).unwrap(), Event::pause(f64::INFINITY));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("RUN".parse::<EventKind>().unwrap(), EventKind::Run);
        assert_eq!("reset".parse::<EventKind>().unwrap(), EventKind::Reset);
        assert!("stop".parse::<EventKind>().is_err());
    }
}
