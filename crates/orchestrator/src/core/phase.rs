//! Handle given to component hooks.

use std::fmt;
use std::sync::Arc;

use phase_core::{PhaseState, StateOp};
use tracing::error;

use crate::context::Phasing;
use crate::error::Result;
use crate::graph::{NodeId, PhaseRef};
use crate::objection::Objection;

/// The phase a hook is running in, as seen by one component.
///
/// Cheap to clone; task-phase work items own theirs.
#[derive(Clone)]
pub struct PhaseCtx {
    phasing: Phasing,
    node: NodeId,
    name: Arc<str>,
    component: Arc<str>,
}

impl PhaseCtx {
    pub(crate) fn new(phasing: Phasing, node: NodeId, name: &str, component: &str) -> Self {
        Self {
            phasing,
            node,
            name: Arc::from(name),
            component: Arc::from(component),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Behavior name, e.g. `main`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hierarchical name, e.g. `uvm.uvm_sched.main`.
    pub fn full_name(&self) -> String {
        self.phasing
            .full_name(self.node)
            .unwrap_or_else(|_| self.name.to_string())
    }

    /// Hierarchical name of the component being visited.
    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn phasing(&self) -> &Phasing {
        &self.phasing
    }

    pub fn state(&self) -> PhaseState {
        self.phasing.state(self.node).unwrap_or_default()
    }

    pub fn objection(&self) -> Result<Arc<Objection>> {
        self.phasing.objection(self.node).map_err(|e| {
            error!(phase = %self.full_name(), component = %self.component, error = %e, "Objection unavailable");
            e
        })
    }

    pub fn raise_objection(&self, description: &str) -> Result<u32> {
        self.raise_objection_n(description, 1)
    }

    pub fn raise_objection_n(&self, description: &str, count: u32) -> Result<u32> {
        let objection = self.escalate(self.objection())?;
        Ok(objection.raise(&self.component, description, count))
    }

    pub fn drop_objection(&self, description: &str) -> Result<u32> {
        self.drop_objection_n(description, 1)
    }

    pub fn drop_objection_n(&self, description: &str, count: u32) -> Result<u32> {
        let objection = self.escalate(self.objection())?;
        Ok(objection.drop_objection(&self.component, description, count)?)
    }

    /// Request a jump from this phase; see [`Phasing::jump`].
    ///
    /// An unresolvable target ends the whole run, not just this hook.
    pub fn jump(&self, target: impl Into<PhaseRef>) -> Result<()> {
        self.escalate(self.phasing.jump(self.node, target))
    }

    fn escalate<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Err(e) if e.is_fatal() => Err(self.phasing.abort(e)),
            other => other,
        }
    }

    /// Suspend until this phase's state satisfies `op` against `state`.
    pub async fn wait_for_state(&self, state: PhaseState, op: StateOp) -> Result<()> {
        self.phasing.wait_for_state(self.node, state, op).await
    }
}

impl fmt::Debug for PhaseCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseCtx")
            .field("node", &self.node)
            .field("name", &self.name)
            .field("component", &self.component)
            .finish()
    }
}
