//! Event fan-out to registered subscriber queues.
//!
//! The lock guards only the subscriber list; events are copied into each
//! subscriber's channel after the list has been snapshotted.

use crate::types::AfEvent;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Mutex;

#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<AfEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a caller-owned queue.
    pub fn register(&self, queue: Sender<AfEvent>) {
        self.subscribers.lock().expect("lock poisoned").push(queue);
    }

    /// Create a new queue, register its sending side and hand back the
    /// receiving side.
    pub fn subscribe(&self) -> Receiver<AfEvent> {
        let (tx, rx) = unbounded();
        self.register(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("lock poisoned").len()
    }

    /// Deliver `event` to every subscriber. Subscribers whose receiver is
    /// gone are dropped from the list.
    pub fn publish(&self, event: AfEvent) {
        let snapshot: Vec<Sender<AfEvent>> =
            self.subscribers.lock().expect("lock poisoned").clone();

        let gone: Vec<&Sender<AfEvent>> = snapshot
            .iter()
            .filter(|queue| queue.send(event).is_err())
            .collect();

        if !gone.is_empty() {
            let mut subscribers = self.subscribers.lock().expect("lock poisoned");
            let before = subscribers.len();
            subscribers.retain(|queue| !gone.iter().any(|g| g.same_channel(queue)));
            log::debug!(
                "dropped {} disconnected event queue(s)",
                before - subscribers.len()
            );
        }

        log::debug!("published {:?} to {} queue(s)", event, snapshot.len());
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = AfEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_gets_a_copy() {
        let hub = EventHub::new();
        let first = hub.subscribe();
        let second = hub.subscribe();

        hub.publish(AfEvent::AutofocusMove { start: true });

        assert_eq!(first.try_recv().unwrap(), AfEvent::AutofocusMove { start: true });
        assert_eq!(second.try_recv().unwrap(), AfEvent::AutofocusMove { start: true });
        assert!(first.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let hub = EventHub::new();
        let kept = hub.subscribe();
        let gone = hub.subscribe();
        drop(gone);

        hub.publish(AfEvent::AutofocusFinished { focus: true });

        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(kept.len(), 1);
    }
}
