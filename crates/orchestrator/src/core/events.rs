//! Ordered event emitter with sequence guarantees.
//!
//! Every event leaving the phasing engine goes through one emitter so
//! observers can order state changes, jumps and objection activity on a
//! single monotonically increasing sequence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use events::{Event, EventBus, EventEnvelope};
use tokio::sync::broadcast;

/// Event emitter with sequence number guarantees.
#[derive(Clone)]
pub struct OrderedEventEmitter {
    bus: EventBus,
    sequence: Arc<AtomicU64>,
}

impl OrderedEventEmitter {
    /// Create a new ordered event emitter wrapping the given bus.
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event with the next sequence number, which is returned.
    pub fn emit(&self, event: Event) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.bus.publish(EventEnvelope::sequenced(event, sequence));
        sequence
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }

    /// Get a reference to the underlying event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(phase: &str) -> Event {
        Event::AllPhasesDone {
            phase: phase.to_string(),
        }
    }

    #[test]
    fn test_sequence_increments() {
        let emitter = OrderedEventEmitter::new(EventBus::new());
        assert_eq!(emitter.current_sequence(), 0);

        assert_eq!(emitter.emit(done("a")), 1);
        assert_eq!(emitter.emit(done("b")), 2);
        assert_eq!(emitter.current_sequence(), 2);
    }

    #[test]
    fn test_clone_shares_sequence() {
        let emitter1 = OrderedEventEmitter::new(EventBus::new());
        let emitter2 = emitter1.clone();

        emitter1.emit(done("a"));
        assert_eq!(emitter2.current_sequence(), 1);

        emitter2.emit(done("b"));
        assert_eq!(emitter1.current_sequence(), 2);
    }

    #[tokio::test]
    async fn test_envelopes_carry_sequence() {
        let emitter = OrderedEventEmitter::new(EventBus::new());
        let mut rx = emitter.subscribe();

        emitter.emit(done("a"));
        emitter.emit(done("b"));

        let received = EventBus::drain(&mut rx);
        let sequences: Vec<u64> = received.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }
}
