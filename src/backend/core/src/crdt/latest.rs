//! Last-writer-wins register on the shared timeline.
//!
//! The newest timestamp wins. Equal timestamps fall back to comparing the
//! canonical text of the encoded values, larger wins, so concurrent writes
//! resolve the same way everywhere. Wire form: `[timestamp, value]`.

use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

use super::notify::{ListenerHandle, Notifier, Subscription};
use super::translator::{canonical_form, decode_float, decode_tuple, encode_float, Translator};
use super::Replicated;
use crate::clock::ClockOffset;
use crate::error::Result;
use crate::transport::ReplicaChannel;

/// A value paired with the shared-timeline time it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    pub timestamp: f64,
    pub value: T,
}

impl<T> Stamped<T> {
    pub fn new(timestamp: f64, value: T) -> Self {
        Self { timestamp, value }
    }
}

pub struct Latest<T> {
    channel: ReplicaChannel,
    clock: ClockOffset,
    translator: Box<dyn Translator<T>>,
    state: Mutex<Stamped<T>>,
    notifier: Notifier<T>,
}

impl<T> Latest<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create the register holding `default` at timestamp `-inf`.
    pub fn new(
        channel: ReplicaChannel,
        default: T,
        clock: ClockOffset,
        translator: impl Translator<T> + 'static,
    ) -> Result<Arc<Self>> {
        let register = Arc::new(Self {
            channel,
            clock,
            translator: Box::new(translator),
            state: Mutex::new(Stamped::new(f64::NEG_INFINITY, default)),
            notifier: Notifier::new(),
        });
        let weak: Weak<dyn Replicated> = Arc::downgrade(&register) as Weak<dyn Replicated>;
        register.channel.register(weak)?;
        Ok(register)
    }

    /// Write `value` stamped with the shared-timeline now.
    pub fn set(&self, value: T) -> Result<bool> {
        let now = self.clock.shared_now();
        self.set_at(value, now)
    }

    /// Write `value` at an explicit timestamp. Loses to anything newer.
    pub fn set_at(&self, value: T, timestamp: f64) -> Result<bool> {
        let candidate = Stamped::new(timestamp, value);
        let encoded = self.encode(&candidate)?;
        if !self.offer(candidate, &encoded)? {
            return Ok(false);
        }
        self.channel.publish_delta(encoded);
        Ok(true)
    }

    /// Merge a remote pair. Returns `true` if it replaced the local one.
    pub fn merge(&self, remote: Stamped<T>) -> Result<bool> {
        let encoded = self.encode(&remote)?;
        let timestamp = remote.timestamp;
        let changed = self.offer(remote, &encoded)?;
        if changed {
            debug!(
                channel = %self.channel.name(),
                timestamp = timestamp,
                "Latest value replaced by merge"
            );
        }
        Ok(changed)
    }

    fn offer(&self, candidate: Stamped<T>, encoded: &Value) -> Result<bool> {
        let mut state = self.state.lock();
        let wins = match candidate.timestamp.total_cmp(&state.timestamp) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => {
                let current = self.translator.encode(&state.value)?;
                canonical_form(&encoded[1]) > canonical_form(&current)
            }
        };
        if !wins {
            return Ok(false);
        }
        *state = candidate;
        self.notifier.notify(state.value.clone());
        Ok(true)
    }

    pub fn value(&self) -> T {
        self.state.lock().value.clone()
    }

    pub fn timestamp(&self) -> f64 {
        self.state.lock().timestamp
    }

    pub fn get(&self) -> Stamped<T> {
        self.state.lock().clone()
    }

    pub fn channel(&self) -> &ReplicaChannel {
        &self.channel
    }

    pub fn subscribe(&self) -> Subscription<T> {
        self.notifier.subscribe()
    }

    pub fn register_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: FnMut(T) + Send + 'static,
    {
        self.notifier.register_listener(callback)
    }

    fn encode(&self, stamped: &Stamped<T>) -> Result<Value> {
        Ok(Value::Array(vec![
            encode_float(stamped.timestamp),
            self.translator.encode(&stamped.value)?,
        ]))
    }

    fn decode(&self, value: &Value) -> Result<Stamped<T>> {
        let [timestamp, inner] = decode_tuple::<2>(value)?;
        Ok(Stamped::new(decode_float(timestamp)?, self.translator.decode(inner)?))
    }
}

impl<T> Replicated for Latest<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn channel_name(&self) -> &str {
        self.channel.name()
    }

    fn encoded_snapshot(&self) -> Result<Value> {
        let current = self.get();
        self.encode(&current)
    }

    fn merge_encoded(&self, value: &Value) -> Result<bool> {
        let remote = self.decode(value)?;
        self.merge(remote)
    }
}

impl<T> fmt::Debug for Latest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latest")
            .field("channel", &self.channel.name())
            .field("timestamp", &self.state.lock().timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crdt::translator::StringTranslator;
    use crate::error::ErrorCode;
    use crate::transport::Multiplexer;
    use serde_json::json;

    fn name_register(mux: &Arc<Multiplexer>, clock: ClockOffset) -> Arc<Latest<String>> {
        Latest::new(
            mux.channel("name0"),
            "Stopwatch 1".to_string(),
            clock,
            StringTranslator,
        )
        .unwrap()
    }

    #[test]
    fn test_set_stamps_with_shared_time() {
        let mux = Multiplexer::new();
        let clock = ManualClock::new(100.0);
        let offset = ClockOffset::new("name0", clock.clone());
        offset.set_offset(-90.0);
        let reg = name_register(&mux, offset);

        assert_eq!(reg.timestamp(), f64::NEG_INFINITY);
        assert!(reg.set("Lap".into()).unwrap());
        assert_eq!(reg.get(), Stamped::new(10.0, "Lap".to_string()));
    }

    #[test]
    fn test_newer_wins_older_loses() {
        let mux = Multiplexer::new();
        let reg = name_register(&mux, ClockOffset::new("n", ManualClock::new(0.0)));
        assert!(reg.set_at("a".into(), 5.0).unwrap());
        assert!(!reg.merge(Stamped::new(4.0, "b".into())).unwrap());
        assert!(reg.merge(Stamped::new(6.0, "c".into())).unwrap());
        assert_eq!(reg.value(), "c");
    }

    #[test]
    fn test_tie_breaks_on_encoded_value() {
        let mux = Multiplexer::new();
        let a = Latest::new(
            mux.channel("a"),
            String::new(),
            ClockOffset::new("a", ManualClock::new(0.0)),
            StringTranslator,
        )
        .unwrap();
        let b = Latest::new(
            mux.channel("b"),
            String::new(),
            ClockOffset::new("b", ManualClock::new(0.0)),
            StringTranslator,
        )
        .unwrap();

        let x = Stamped::new(7.0, "apple".to_string());
        let y = Stamped::new(7.0, "pear".to_string());

        a.merge(x.clone()).unwrap();
        a.merge(y.clone()).unwrap();
        b.merge(y).unwrap();
        b.merge(x).unwrap();

        assert_eq!(a.get(), b.get());
        assert_eq!(a.value(), "pear");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mux = Multiplexer::new();
        let reg = name_register(&mux, ClockOffset::new("n", ManualClock::new(0.0)));
        let s = Stamped::new(3.0, "x".to_string());
        assert!(reg.merge(s.clone()).unwrap());
        assert!(!reg.merge(s).unwrap());
    }

    #[test]
    fn test_wire_form_and_decode_errors() {
        let mux = Multiplexer::new();
        let reg = name_register(&mux, ClockOffset::new("n", ManualClock::new(0.0)));
        assert_eq!(reg.encoded_snapshot().unwrap(), json!(["-inf", "Stopwatch 1"]));

        assert!(reg.merge_encoded(&json!([2.0, "Remote"])).unwrap());
        let err = reg.merge_encoded(&json!(["soon", "x"])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecodeError);
        assert_eq!(reg.value(), "Remote");
    }
}
