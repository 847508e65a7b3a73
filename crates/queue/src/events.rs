//! Publish/subscribe plumbing for queue notifications.
//!
//! Each subscriber owns an unbounded channel, so publishing never blocks
//! the queue and a slow consumer only delays itself.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::types::TaskId;

struct Subscriber<T> {
    id: u64,
    filter: Option<TaskId>,
    tx: mpsc::UnboundedSender<T>,
}

struct TopicInner<T> {
    next_id: u64,
    closed: bool,
    subscribers: Vec<Subscriber<T>>,
}

/// Fan-out point for one kind of event.
pub(crate) struct Topic<T> {
    inner: Arc<Mutex<TopicInner<T>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone> Topic<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TopicInner {
                next_id: 0,
                closed: false,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Registers a subscriber. With `filter` set, only events published
    /// for that task are delivered.
    pub(crate) fn subscribe(&self, filter: Option<TaskId>) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        // A closed topic hands out subscriptions that end immediately.
        if !inner.closed {
            inner.subscribers.push(Subscriber { id, filter, tx });
        }
        Subscription {
            id,
            rx,
            topic: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `event` to every matching subscriber, pruning dropped ones.
    pub(crate) fn publish(&self, task: Option<&TaskId>, event: &T) {
        let mut inner = lock(&self.inner);
        inner.subscribers.retain(|sub| {
            let wanted = match (&sub.filter, task) {
                (None, _) => true,
                (Some(filter), Some(task)) => filter == task,
                (Some(_), None) => false,
            };
            if !wanted {
                return !sub.tx.is_closed();
            }
            sub.tx.send(event.clone()).is_ok()
        });
    }

    /// Drops every subscriber and refuses new ones.
    pub(crate) fn close(&self) {
        let mut inner = lock(&self.inner);
        inner.closed = true;
        inner.subscribers.clear();
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }
}

/// Stream of events from the queue.
///
/// Dropping the subscription (or calling [`Subscription::unsubscribe`])
/// stops delivery. `recv` returns `None` once the queue is disposed.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    topic: Weak<Mutex<TopicInner<T>>>,
}

impl<T> Subscription<T> {
    /// Waits for the next event.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drains every buffered event.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Stops delivery. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(topic) = self.topic.upgrade() {
            lock(&topic).subscribers.retain(|sub| sub.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_to_all_subscribers() {
        let topic = Topic::<u32>::new();
        let mut a = topic.subscribe(None);
        let mut b = topic.subscribe(None);
        topic.publish(None, &7);
        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[test]
    fn filtered_subscription_sees_only_its_task() {
        let topic = Topic::<&'static str>::new();
        let one = TaskId::from("one");
        let two = TaskId::from("two");
        let mut sub = topic.subscribe(Some(one.clone()));
        topic.publish(Some(&two), &"for two");
        topic.publish(Some(&one), &"for one");
        assert_eq!(sub.drain(), vec!["for one"]);
    }

    #[test]
    fn drop_unsubscribes() {
        let topic = Topic::<u32>::new();
        let sub = topic.subscribe(None);
        let kept = topic.subscribe(None);
        assert_eq!(topic.subscriber_count(), 2);
        sub.unsubscribe();
        assert_eq!(topic.subscriber_count(), 1);
        drop(kept);
        assert_eq!(topic.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn close_ends_streams() {
        let topic = Topic::<u32>::new();
        let mut sub = topic.subscribe(None);
        topic.publish(None, &1);
        topic.close();
        topic.publish(None, &2);
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, None);

        let mut late = topic.subscribe(None);
        assert_eq!(late.recv().await, None);
    }
}
