//! Event bus built on a tokio broadcast channel

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{Event, EventEnvelope};

/// A full run of the standard domains publishes a few hundred state changes;
/// leave headroom so late readers do not lag.
const DEFAULT_CAPACITY: usize = 4096;

/// Event bus for publishing and subscribing to phase events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    /// Number of events published (for monitoring)
    event_count: Arc<AtomicUsize>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            event_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish an envelope to all subscribers
    ///
    /// Returns the number of subscribers that received it. With no
    /// subscribers the envelope is dropped and 0 is returned.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.event_count.fetch_add(1, Ordering::Relaxed);
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Wrap an unsequenced event and publish it
    pub fn emit(&self, event: Event) -> usize {
        self.publish(EventEnvelope::new(event))
    }

    /// Subscribe to events
    ///
    /// Events published before subscribing are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Take everything already queued on `rx` without waiting.
    ///
    /// Lagged receivers skip the overwritten events and keep reading.
    pub fn drain(rx: &mut broadcast::Receiver<EventEnvelope>) -> Vec<EventEnvelope> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(envelope) => out.push(envelope),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the total number of events published
    pub fn event_count(&self) -> usize {
        self.event_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .field("event_count", &self.event_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phase_core::PhaseState;

    fn state_change(next: PhaseState) -> Event {
        Event::PhaseStateChanged {
            node: 0,
            phase: "common".to_string(),
            prev: PhaseState::Dormant,
            next,
            jump_target: None,
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let envelope = EventEnvelope::new(state_change(PhaseState::Scheduled));

        let sent = bus.publish(envelope.clone());
        assert_eq!(sent, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, envelope.id);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let sent = bus.emit(state_change(PhaseState::Syncing));
        assert_eq!(sent, 2);

        let received1 = rx1.recv().await.unwrap();
        let received2 = rx2.recv().await.unwrap();
        assert_eq!(received1.id, received2.id);
        assert_eq!(received1.event.entered_state(), Some(PhaseState::Syncing));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(state_change(PhaseState::Done)), 0);
        assert_eq!(bus.event_count(), 1);
    }

    #[test]
    fn test_drain_collects_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(state_change(PhaseState::Scheduled));
        bus.emit(state_change(PhaseState::Syncing));
        bus.emit(state_change(PhaseState::Started));

        let states: Vec<_> = EventBus::drain(&mut rx)
            .into_iter()
            .filter_map(|e| e.event.entered_state())
            .collect();
        assert_eq!(
            states,
            vec![PhaseState::Scheduled, PhaseState::Syncing, PhaseState::Started]
        );
        assert!(EventBus::drain(&mut rx).is_empty());
    }

    #[test]
    fn test_drain_skips_lagged() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        for next in [PhaseState::Scheduled, PhaseState::Syncing, PhaseState::Started] {
            bus.emit(state_change(next));
        }

        let drained = EventBus::drain(&mut rx);
        assert_eq!(drained.len(), 2);
        assert_eq!(
            drained.last().and_then(|e| e.event.entered_state()),
            Some(PhaseState::Started)
        );
    }

    #[test]
    fn test_clone_shares_channel() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();

        let _rx = bus2.subscribe();
        assert_eq!(bus1.subscriber_count(), 1);
        assert_eq!(bus2.subscriber_count(), 1);
    }
}
