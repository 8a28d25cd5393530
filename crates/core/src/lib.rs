//! Plain domain types shared by the phasing engine and its observers.

pub mod domain;
pub mod error;

pub use domain::{JumpDirection, NodeType, PhaseKind, PhaseState, StateOp};
pub use error::CoreError;
