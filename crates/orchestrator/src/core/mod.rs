//! Core abstractions for the phasing execution model.
//!
//! - [`PhaseCtx`] - Handle passed to component hooks
//! - [`ExecutionEngine`] - Drives a single phase node through its states
//! - [`OrderedEventEmitter`] - Event emitter with sequence guarantees
//! - [`next_quantum`] - Zero-time yield used after every state change

mod events;
mod execution;
mod phase;
mod quantum;

pub use events::OrderedEventEmitter;
pub(crate) use execution::ExecutionEngine;
pub use phase::PhaseCtx;
pub use quantum::next_quantum;
