mod node;
mod state;

pub use node::{JumpDirection, NodeType, PhaseKind};
pub use state::{PhaseState, StateOp};
