//! RAII resource guards for automatic cleanup.
//!
//! - [`TaskPhaseGuard`] - Aborts task-phase work items at cleanup or on drop

mod task_guard;

pub use task_guard::{FailureLog, HookFailure, TaskPhaseGuard};
