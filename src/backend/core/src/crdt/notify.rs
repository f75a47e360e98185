//! Change notification for containers.
//!
//! Each subscriber owns an unbounded queue. A container pushes onto every queue
//! while it still holds its own lock, so two racing mutations land in the
//! queues in the same order they were applied; a subscriber can never see an
//! older value after a newer one. Pushing never blocks and never runs
//! subscriber code, so it is safe under the lock. Listener callbacks run later,
//! on whatever task drains the queue.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Fan-out of change notifications to any number of subscribers.
pub struct Notifier<T> {
    senders: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone + Send + 'static> Notifier<T> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Open a new queue that receives every notification from now on.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        Subscription { receiver: rx }
    }

    /// Run `callback` on a spawned task for every notification.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn register_listener<F>(&self, mut callback: F) -> ListenerHandle
    where
        F: FnMut(T) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        let task = tokio::spawn(async move {
            while let Some(value) = subscription.recv().await {
                callback(value);
            }
        });
        ListenerHandle { task }
    }

    /// Push `value` to every live subscriber, dropping closed queues.
    pub fn notify(&self, value: T) {
        let mut senders = self.senders.lock();
        senders.retain(|tx| tx.send(value.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }
}

impl<T: Clone + Send + 'static> Default for Notifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of one subscriber queue.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Wait for the next notification. `None` once the container is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Everything queued right now, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(value) = self.receiver.try_recv() {
            out.push(value);
        }
        out
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<T> {
        UnboundedReceiverStream::new(self.receiver)
    }
}

/// Handle to a spawned listener task.
///
/// Dropping the handle leaves the listener running; it stops by itself once
/// the container it listens to is dropped.
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop the listener. Queued notifications are discarded.
    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
