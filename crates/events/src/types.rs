//! Event types published by the phasing engine

use chrono::{DateTime, Utc};
use phase_core::{JumpDirection, PhaseState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Position in the publishing emitter's stream (0 when unsequenced)
    pub sequence: u64,
    /// Wall-clock time the event was published
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self::sequenced(event, 0)
    }

    /// Create an envelope carrying an emitter sequence number
    pub fn sequenced(event: Event, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            timestamp: Utc::now(),
            event,
        }
    }
}

/// All possible events in the system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Phase events
    /// A phase node changed state
    #[serde(rename = "phase.state_changed")]
    PhaseStateChanged {
        node: usize,
        phase: String,
        prev: PhaseState,
        next: PhaseState,
        jump_target: Option<String>,
    },

    /// A phase requested a jump
    #[serde(rename = "phase.jump")]
    PhaseJump {
        node: usize,
        phase: String,
        target: String,
        direction: JumpDirection,
    },

    /// The last phase of the run completed
    #[serde(rename = "phase.all_done")]
    AllPhasesDone { phase: String },

    // Objection events
    #[serde(rename = "objection.raised")]
    ObjectionRaised {
        objection: String,
        contributor: String,
        description: String,
        count: u32,
        total: u32,
    },

    #[serde(rename = "objection.dropped")]
    ObjectionDropped {
        objection: String,
        contributor: String,
        description: String,
        count: u32,
        total: u32,
    },

    /// The objection total at the top scope returned to zero
    #[serde(rename = "objection.all_dropped")]
    AllDropped { objection: String },

    // Component events
    /// A component hook returned an error or panicked
    #[serde(rename = "hook.failed")]
    HookFailed {
        phase: String,
        component: String,
        message: String,
    },
}

impl Event {
    /// Get the full phase name associated with this event, if any
    pub fn phase(&self) -> Option<&str> {
        match self {
            Event::PhaseStateChanged { phase, .. } => Some(phase),
            Event::PhaseJump { phase, .. } => Some(phase),
            Event::AllPhasesDone { phase } => Some(phase),
            Event::HookFailed { phase, .. } => Some(phase),
            Event::ObjectionRaised { .. } => None,
            Event::ObjectionDropped { .. } => None,
            Event::AllDropped { .. } => None,
        }
    }

    /// The `next` state of a state-change event
    pub fn entered_state(&self) -> Option<PhaseState> {
        match self {
            Event::PhaseStateChanged { next, .. } => Some(*next),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_creation() {
        let event = Event::AllPhasesDone {
            phase: "common.final".to_string(),
        };
        let envelope = EventEnvelope::new(event);

        assert!(!envelope.id.is_nil());
        assert_eq!(envelope.sequence, 0);
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::PhaseStateChanged {
            node: 3,
            phase: "common.build".to_string(),
            prev: PhaseState::Scheduled,
            next: PhaseState::Syncing,
            jump_target: None,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("phase.state_changed"));
        assert!(json.contains("\"prev\":\"scheduled\""));
        assert!(json.contains("\"next\":\"syncing\""));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"phase.jump","node":7,"phase":"uvm.uvm_sched.main","target":"uvm.uvm_sched.reset","direction":"backward"}"#;
        let event: Event = serde_json::from_str(json).unwrap();

        match event {
            Event::PhaseJump {
                node,
                target,
                direction,
                ..
            } => {
                assert_eq!(node, 7);
                assert_eq!(target, "uvm.uvm_sched.reset");
                assert_eq!(direction, JumpDirection::Backward);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_phase() {
        let event = Event::HookFailed {
            phase: "common.run".to_string(),
            component: "env.driver".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(event.phase(), Some("common.run"));

        let objection_event = Event::AllDropped {
            objection: "common.run".to_string(),
        };
        assert_eq!(objection_event.phase(), None);
    }

    #[test]
    fn test_entered_state() {
        let event = Event::PhaseStateChanged {
            node: 1,
            phase: "common".to_string(),
            prev: PhaseState::Ended,
            next: PhaseState::Cleanup,
            jump_target: None,
        };
        assert_eq!(event.entered_state(), Some(PhaseState::Cleanup));
        assert_eq!(
            Event::AllPhasesDone {
                phase: "common".to_string()
            }
            .entered_state(),
            None
        );
    }
}
