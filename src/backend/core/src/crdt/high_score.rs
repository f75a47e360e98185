//! Max-register.
//!
//! Holds the value that came with the highest score seen so far. Scores are
//! compared with `f64::total_cmp`. Equal scores fall back to the canonical
//! text of the encoded values, larger wins, so every replica settles on the
//! same pair whatever order merges arrive in. Wire form: `[score, value]`.

use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

use super::notify::{ListenerHandle, Notifier, Subscription};
use super::translator::{canonical_form, decode_float, decode_tuple, encode_float, Translator};
use super::Replicated;
use crate::error::Result;
use crate::transport::ReplicaChannel;

/// A value paired with the score it was set under.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<V> {
    pub score: f64,
    pub value: V,
}

impl<V> Scored<V> {
    pub fn new(score: f64, value: V) -> Self {
        Self { score, value }
    }
}

pub struct HighScore<V> {
    channel: ReplicaChannel,
    translator: Box<dyn Translator<V>>,
    state: Mutex<Scored<V>>,
    notifier: Notifier<Scored<V>>,
}

impl<V> HighScore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create the register at `(init_score, init_value)` and register it.
    ///
    /// Use `f64::NEG_INFINITY` as the score for an identity register that any
    /// real value replaces.
    pub fn new(
        channel: ReplicaChannel,
        init_value: V,
        init_score: f64,
        translator: impl Translator<V> + 'static,
    ) -> Result<Arc<Self>> {
        let register = Arc::new(Self {
            channel,
            translator: Box::new(translator),
            state: Mutex::new(Scored::new(init_score, init_value)),
            notifier: Notifier::new(),
        });
        let weak: Weak<dyn Replicated> = Arc::downgrade(&register) as Weak<dyn Replicated>;
        register.channel.register(weak)?;
        Ok(register)
    }

    /// Offer `value` under `score`. Accepted and broadcast only if it beats
    /// the current pair.
    pub fn set(&self, value: V, score: f64) -> bool {
        let candidate = Scored::new(score, value);
        let accepted = self.encode(&candidate).and_then(|encoded| {
            let changed = self.offer(candidate, &encoded)?;
            if changed {
                self.channel.publish_delta(encoded);
            }
            Ok(changed)
        });
        match accepted {
            Ok(changed) => changed,
            Err(e) => {
                e.on_channel(self.channel.name()).log();
                false
            }
        }
    }

    /// Merge a remote pair. Returns `true` if it replaced the local one.
    pub fn merge(&self, remote: Scored<V>) -> Result<bool> {
        let encoded = self.encode(&remote)?;
        let score = remote.score;
        let changed = self.offer(remote, &encoded)?;
        if changed {
            debug!(
                channel = %self.channel.name(),
                score = score,
                "High score replaced by merge"
            );
        }
        Ok(changed)
    }

    fn offer(&self, candidate: Scored<V>, encoded: &Value) -> Result<bool> {
        let mut state = self.state.lock();
        let wins = match candidate.score.total_cmp(&state.score) {
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
        self.notifier.notify(state.clone());
        Ok(true)
    }

    pub fn get(&self) -> Scored<V> {
        self.state.lock().clone()
    }

    pub fn value(&self) -> V {
        self.state.lock().value.clone()
    }

    pub fn score(&self) -> f64 {
        self.state.lock().score
    }

    pub fn channel(&self) -> &ReplicaChannel {
        &self.channel
    }

    pub fn subscribe(&self) -> Subscription<Scored<V>> {
        self.notifier.subscribe()
    }

    pub fn register_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: FnMut(Scored<V>) + Send + 'static,
    {
        self.notifier.register_listener(callback)
    }

    fn encode(&self, scored: &Scored<V>) -> Result<Value> {
        Ok(Value::Array(vec![
            encode_float(scored.score),
            self.translator.encode(&scored.value)?,
        ]))
    }

    fn decode(&self, value: &Value) -> Result<Scored<V>> {
        let [score, inner] = decode_tuple::<2>(value)?;
        Ok(Scored::new(decode_float(score)?, self.translator.decode(inner)?))
    }
}

impl<V> Replicated for HighScore<V>
where
    V: Clone + Send + Sync + 'static,
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

impl<V> fmt::Debug for HighScore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HighScore")
            .field("channel", &self.channel.name())
            .field("score", &self.state.lock().score)
            .finish()
    }
}
