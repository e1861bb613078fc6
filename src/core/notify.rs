//! Notification sink.
//!
//! The pipeline only publishes. Subscribers are plain callbacks registered
//! on an [`EventBus`] and removed explicitly through their handle.

use crate::models::notification::Notification;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Anything that accepts pipeline notifications.
pub trait Notifier: Send + Sync {
    fn publish(&self, notification: Notification);
}

/// Shared handle passed into commands and managers.
pub type SharedNotifier = Arc<dyn Notifier>;

/// Publish through an optional notifier.
pub(crate) fn emit(notifier: &Option<SharedNotifier>, notification: Notification) {
    if let Some(n) = notifier {
        n.publish(notification);
    }
}

type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// In-process observer list.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(Subscription, Callback)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every notification.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let handle = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push((handle, Arc::new(callback)));
        }
        handle
    }

    /// Remove a callback. Returns false for an unknown handle.
    pub fn unsubscribe(&self, handle: Subscription) -> bool {
        match self.subscribers.lock() {
            Ok(mut subs) => {
                let before = subs.len();
                subs.retain(|(h, _)| *h != handle);
                subs.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Notifier for EventBus {
    fn publish(&self, notification: Notification) {
        // Callbacks run outside the lock so they may subscribe or publish.
        let callbacks: Vec<Callback> = match self.subscribers.lock() {
            Ok(subs) => subs.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            Err(_) => return,
        };

        tracing::debug!("Publishing {}", notification.name());
        for cb in callbacks {
            cb(&notification);
        }
    }
}

/// Collects every notification. Handy for tests and for replaying events.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Names of the recorded events in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .map(|e| e.iter().map(Notification::name).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }

    pub fn clear(&self) {
        if let Ok(mut e) = self.events.lock() {
            e.clear();
        }
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, notification: Notification) {
        if let Ok(mut e) = self.events.lock() {
            e.push(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn sample() -> Notification {
        Notification::TaskStarted {
            task_id: Uuid::new_v4(),
            name: "t".to_string(),
        }
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handle = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(sample());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));
        bus.publish(sample());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_recording_notifier() {
        let rec = RecordingNotifier::new();
        rec.publish(sample());
        rec.publish(sample());
        assert_eq!(rec.count("task_started"), 2);
        rec.clear();
        assert!(rec.events().is_empty());
    }
}
