//! Lossless one-to-many delivery.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Hands every published value to every live subscriber, in publish order.
///
/// Each subscriber owns an unbounded queue, so a slow reader never loses
/// values. Subscribers whose receiver was dropped are pruned on the next
/// publish.
pub(crate) struct Fanout<T> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> Fanout<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Receive every value published from now on.
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn publish(&self, value: T) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(value.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
