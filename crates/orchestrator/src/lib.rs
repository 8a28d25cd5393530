//! Phase-driven lifecycle orchestration for verification testbenches.
//!
//! A [`Phasing`] context owns a DAG of phase nodes grouped into schedules and
//! domains. A [`PhaseExecutor`] walks that graph over a [`ComponentTree`],
//! calling each component's hooks as phases move through their states.
//! Task phases run concurrently and end through [`Objection`] negotiation.

pub mod component;
pub mod config;
pub mod context;
pub mod core;
mod domain;
pub mod error;
pub mod executor;
pub mod graph;
pub mod objection;
pub mod phases;
pub mod resources;
pub mod state_machine;
pub mod traversal;

pub use component::{Component, ComponentId, ComponentTree, Sequencer};
pub use config::RunConfig;
pub use context::{NodeSnapshot, Phasing, COMMON_DOMAIN, UVM_DOMAIN, UVM_SCHEDULE};
pub use crate::core::{next_quantum, OrderedEventEmitter, PhaseCtx};
pub use error::{HookError, HookResult, OrchestratorError, Result};
pub use executor::{PhaseExecutor, RunReport};
pub use graph::{Addable, NodeId, PendingJump, PhaseGraph, PhaseRef, Placement};
pub use objection::{Objection, ObjectionError};
pub use phases::{ImpRegistry, PhaseImp, StandardPhase};
pub use resources::HookFailure;
pub use state_machine::PhaseStateMachine;

pub use phase_core::{JumpDirection, NodeType, PhaseKind, PhaseState, StateOp};
