//! Event system for the phasing engine
//!
//! This crate provides the event bus and event types that observers use
//! to follow phase state changes, jumps and objection activity.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
