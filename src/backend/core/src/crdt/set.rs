//! Grow-only sets.
//!
//! The value is a strictly ascending `Vec` under the set's comparator, so a
//! merge is one linear [`union_by`](crate::merge::union_by) pass. The wire form
//! of both a delta and a snapshot is a JSON array of encoded elements.

use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

use super::notify::{ListenerHandle, Notifier, Subscription};
use super::translator::Translator;
use super::Replicated;
use crate::error::{Result, SyncError};
use crate::merge::{difference_by, normalize_by, union_by, Comparator};
use crate::transport::ReplicaChannel;

/// Grow-only set. Listeners receive the elements each change added.
pub struct AddOnlySet<T> {
    channel: ReplicaChannel,
    order: Comparator<T>,
    translator: Box<dyn Translator<T>>,
    values: Mutex<Vec<T>>,
    notifier: Notifier<Vec<T>>,
}

impl<T> AddOnlySet<T>
where
    T: Ord + Clone + Send + Sync + 'static,
{
    pub fn new(
        channel: ReplicaChannel,
        translator: impl Translator<T> + 'static,
    ) -> Result<Arc<Self>> {
        Self::with_order(channel, T::cmp, translator)
    }
}

impl<T> AddOnlySet<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a set ordered by `order` and register it on `channel`.
    pub fn with_order(
        channel: ReplicaChannel,
        order: Comparator<T>,
        translator: impl Translator<T> + 'static,
    ) -> Result<Arc<Self>> {
        let set = Arc::new(Self {
            channel,
            order,
            translator: Box::new(translator),
            values: Mutex::new(Vec::new()),
            notifier: Notifier::new(),
        });
        let weak: Weak<dyn Replicated> = Arc::downgrade(&set) as Weak<dyn Replicated>;
        set.channel.register(weak)?;
        Ok(set)
    }

    /// Add one value. Returns `true` if it was new.
    pub fn add(&self, value: T) -> Result<bool> {
        Ok(!self.update(vec![value])?.is_empty())
    }

    /// Add many values at once and broadcast the ones that were new.
    pub fn update(&self, values: Vec<T>) -> Result<Vec<T>> {
        let added = self.apply(values)?;
        if !added.is_empty() {
            match self.encode_all(&added) {
                Ok(delta) => self.channel.publish_delta(delta),
                Err(e) => e.on_channel(self.channel.name()).log(),
            }
        }
        Ok(added)
    }

    /// Merge a remote value. Returns `true` if anything was added.
    pub fn merge(&self, remote: Vec<T>) -> Result<bool> {
        let added = self.apply(remote)?;
        if !added.is_empty() {
            debug!(channel = %self.channel.name(), added = added.len(), "Set grew from merge");
        }
        Ok(!added.is_empty())
    }

    fn apply(&self, incoming: Vec<T>) -> Result<Vec<T>> {
        let incoming = normalize_by(incoming, self.order);
        if incoming.is_empty() {
            return Ok(Vec::new());
        }

        let mut values = self.values.lock();
        let added = difference_by(&incoming, &values, self.order)?;
        if added.is_empty() {
            return Ok(added);
        }
        *values = union_by(&values, &added, self.order)?;
        self.notifier.notify(added.clone());
        Ok(added)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.values
            .lock()
            .binary_search_by(|probe| (self.order)(probe, value))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    /// Current elements in comparator order.
    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }

    pub fn channel(&self) -> &ReplicaChannel {
        &self.channel
    }

    pub fn order(&self) -> Comparator<T> {
        self.order
    }

    pub fn subscribe(&self) -> Subscription<Vec<T>> {
        self.notifier.subscribe()
    }

    pub fn register_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: FnMut(Vec<T>) + Send + 'static,
    {
        self.notifier.register_listener(callback)
    }

    fn encode_all(&self, values: &[T]) -> Result<Value> {
        values
            .iter()
            .map(|v| self.translator.encode(v))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array)
    }

    fn decode_all(&self, value: &Value) -> Result<Vec<T>> {
        let items = value.as_array().ok_or_else(|| {
            SyncError::decode(format!("expected an array of elements, got {}", value))
        })?;
        items.iter().map(|v| self.translator.decode(v)).collect()
    }
}

impl<T> Replicated for AddOnlySet<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn channel_name(&self) -> &str {
        self.channel.name()
    }

    fn encoded_snapshot(&self) -> Result<Value> {
        let values = self.values();
        self.encode_all(&values)
    }

    fn merge_encoded(&self, value: &Value) -> Result<bool> {
        let remote = self.decode_all(value)?;
        self.merge(remote)
    }
}

impl<T> fmt::Debug for AddOnlySet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddOnlySet")
            .field("channel", &self.channel.name())
            .field("len", &self.values.lock().len())
            .finish()
    }
}

/// Grow-only set with ordered access; the event log.
///
/// Same merge semantics as [`AddOnlySet`]. Cloning shares the underlying set.
pub struct AddOnlySortedSet<T> {
    inner: Arc<AddOnlySet<T>>,
}

impl<T> Clone for AddOnlySortedSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> AddOnlySortedSet<T>
where
    T: Ord + Clone + Send + Sync + 'static,
{
    pub fn new(channel: ReplicaChannel, translator: impl Translator<T> + 'static) -> Result<Self> {
        Self::with_order(channel, T::cmp, translator)
    }
}

impl<T> AddOnlySortedSet<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn with_order(
        channel: ReplicaChannel,
        order: Comparator<T>,
        translator: impl Translator<T> + 'static,
    ) -> Result<Self> {
        Ok(Self {
            inner: AddOnlySet::with_order(channel, order, translator)?,
        })
    }

    pub fn add(&self, value: T) -> Result<bool> {
        self.inner.add(value)
    }

    pub fn update(&self, values: Vec<T>) -> Result<Vec<T>> {
        self.inner.update(values)
    }

    pub fn merge(&self, remote: Vec<T>) -> Result<bool> {
        self.inner.merge(remote)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.contains(value)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Smallest element.
    pub fn first(&self) -> Option<T> {
        self.inner.values.lock().first().cloned()
    }

    /// Largest element.
    pub fn last(&self) -> Option<T> {
        self.inner.values.lock().last().cloned()
    }

    /// All elements, ascending.
    pub fn values(&self) -> Vec<T> {
        self.inner.values()
    }

    /// Elements strictly greater than `bound`, ascending.
    pub fn values_after(&self, bound: &T) -> Vec<T> {
        let values = self.inner.values.lock();
        let start = values
            .partition_point(|v| (self.inner.order)(v, bound) != std::cmp::Ordering::Greater);
        values[start..].to_vec()
    }

    /// Run `f` over the ascending elements while the set is locked.
    ///
    /// Gives a consistent view without cloning; `f` must not touch this set.
    pub fn with_values<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.inner.values.lock())
    }

    pub fn channel(&self) -> &ReplicaChannel {
        self.inner.channel()
    }

    pub fn subscribe(&self) -> Subscription<Vec<T>> {
        self.inner.subscribe()
    }

    pub fn register_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: FnMut(Vec<T>) + Send + 'static,
    {
        self.inner.register_listener(callback)
    }
}

impl<T> fmt::Debug for AddOnlySortedSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AddOnlySortedSet").field(&self.inner).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::translator::{FloatTranslator, StringTranslator};
    use crate::error::ErrorCode;
    use crate::transport::Multiplexer;
    use serde_json::json;

    fn marks(mux: &Arc<Multiplexer>, name: &str) -> Arc<AddOnlySet<f64>> {
        AddOnlySet::with_order(mux.channel(name), f64::total_cmp, FloatTranslator).unwrap()
    }

    #[test]
    fn test_add_and_contains() {
        let mux = Multiplexer::new();
        let set = marks(&mux, "marks0");
        assert!(set.add(2.0).unwrap());
        assert!(!set.add(2.0).unwrap());
        assert!(set.add(1.0).unwrap());
        assert!(set.contains(&1.0));
        assert!(!set.contains(&3.0));
        assert_eq!(set.values(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_update_returns_only_new_values() {
        let mux = Multiplexer::new();
        let set = marks(&mux, "marks0");
        set.add(1.0).unwrap();
        let added = set.update(vec![3.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(added, vec![2.0, 3.0]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_merge_is_idempotent_and_commutative() {
        let mux = Multiplexer::new();
        let a = marks(&mux, "a");
        let b = marks(&mux, "b");

        let x = vec![1.0, 5.0];
        let y = vec![5.0, 3.0];

        assert!(a.merge(x.clone()).unwrap());
        assert!(a.merge(y.clone()).unwrap());
        assert!(b.merge(y.clone()).unwrap());
        assert!(b.merge(x.clone()).unwrap());
        assert_eq!(a.values(), b.values());

        assert!(!a.merge(x).unwrap());
        assert!(!a.merge(a.values()).unwrap());
    }

    #[test]
    fn test_merge_encoded_rejects_bad_input_without_change() {
        let mux = Multiplexer::new();
        let set = marks(&mux, "marks0");
        set.add(1.0).unwrap();

        let err = set.merge_encoded(&json!([2.0, "bogus"])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecodeError);
        assert!(set.merge_encoded(&json!({"a": 1})).is_err());
        assert_eq!(set.values(), vec![1.0]);

        assert!(set.merge_encoded(&json!([2.0, "inf"])).unwrap());
        assert_eq!(set.values(), vec![1.0, 2.0, f64::INFINITY]);
    }

    #[test]
    fn test_snapshot_wire_form() {
        let mux = Multiplexer::new();
        let set = AddOnlySet::new(mux.channel("names"), StringTranslator).unwrap();
        set.update(vec!["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(set.encoded_snapshot().unwrap(), json!(["a", "b"]));
    }

    #[test]
    fn test_notifications_carry_added_values_in_order() {
        let mux = Multiplexer::new();
        let set = marks(&mux, "marks0");
        let mut sub = set.subscribe();

        set.add(2.0).unwrap();
        set.merge(vec![1.0, 2.0]).unwrap();
        set.merge(vec![1.0]).unwrap();

        assert_eq!(sub.drain(), vec![vec![2.0], vec![1.0]]);
    }

    #[test]
    fn test_sorted_set_first_last() {
        let mux = Multiplexer::new();
        let translator = crate::crdt::translator::SerdeTranslator::<i64>::new();
        let log = AddOnlySortedSet::new(mux.channel("log"), translator).unwrap();
        assert_eq!(log.first(), None);
        log.update(vec![5, 1, 9]).unwrap();
        assert_eq!(log.first(), Some(1));
        assert_eq!(log.last(), Some(9));
        assert_eq!(log.values(), vec![1, 5, 9]);
        assert_eq!(log.values_after(&1), vec![5, 9]);
        assert_eq!(log.values_after(&0), vec![1, 5, 9]);
        assert!(log.values_after(&9).is_empty());
        assert_eq!(log.with_values(|v| v.len()), 3);
    }

    #[test]
    fn test_channel_is_taken_while_alive() {
        let mux = Multiplexer::new();
        let set = marks(&mux, "marks0");
        let err = AddOnlySet::with_order(mux.channel("marks0"), f64::total_cmp, FloatTranslator)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateChannel);
        drop(set);
        assert!(
            AddOnlySet::with_order(mux.channel("marks0"), f64::total_cmp, FloatTranslator).is_ok()
        );
    }
}
