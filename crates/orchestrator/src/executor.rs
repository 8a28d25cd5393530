//! Phase executor: the run loop.
//!
//! Scheduled nodes arrive on an unbounded hopper channel; each one gets its
//! own execution future on a `JoinSet`. The loop ends when a node with no
//! successors reaches DONE, when any phase execution fails, or when a hook
//! raises a fatal error through its [`PhaseCtx`](crate::PhaseCtx).

use std::sync::Arc;

use phase_core::PhaseState;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::component::ComponentTree;
use crate::context::{NodeSnapshot, Phasing};
use crate::core::ExecutionEngine;
use crate::error::{OrchestratorError, Result};
use crate::graph::NodeId;
use crate::resources::{FailureLog, HookFailure};

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Full names of nodes that reached DONE naturally, in order.
    pub completed: Vec<String>,
    /// Task-phase work items that failed. Function-hook failures end the run instead.
    pub hook_failures: Vec<HookFailure>,
    pub final_states: Vec<NodeSnapshot>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.hook_failures.is_empty()
    }

    pub fn state_of(&self, full_name: &str) -> Option<PhaseState> {
        self.final_states
            .iter()
            .find(|node| node.full_name == full_name)
            .map(|node| node.state)
    }

    /// Position of `full_name` in the completion order.
    pub fn position(&self, full_name: &str) -> Option<usize> {
        self.completed.iter().position(|name| name == full_name)
    }
}

pub struct PhaseExecutor {
    phasing: Phasing,
    tree: Arc<ComponentTree>,
}

impl PhaseExecutor {
    pub fn new(phasing: Phasing, tree: ComponentTree) -> Self {
        Self::with_shared_tree(phasing, Arc::new(tree))
    }

    pub fn with_shared_tree(phasing: Phasing, tree: Arc<ComponentTree>) -> Self {
        Self { phasing, tree }
    }

    pub fn phasing(&self) -> &Phasing {
        &self.phasing
    }

    pub fn tree(&self) -> &ComponentTree {
        &self.tree
    }

    /// Run the standard phases from the top of the `common` domain.
    pub async fn run_phases(&self) -> Result<RunReport> {
        let common = self.phasing.common_domain()?;
        self.run_from(common).await
    }

    /// Run every phase reachable from `root` until a node with no successors
    /// completes.
    pub async fn run_from(&self, root: NodeId) -> Result<RunReport> {
        let phasing = &self.phasing;
        let root_name = phasing.full_name(root)?;
        info!(root = %root_name, components = self.tree.len(), "Starting phase execution");

        phasing.rearm();
        let mut aborted = phasing.watch_aborted();

        let (hopper_tx, mut hopper_rx) = mpsc::unbounded_channel();
        let (done_tx, mut done_rx) = watch::channel(false);
        let failures = FailureLog::new();
        let engine = Arc::new(ExecutionEngine::new(
            phasing.clone(),
            Arc::clone(&self.tree),
            hopper_tx.clone(),
            done_tx,
            failures.clone(),
        ));

        phasing.force_state(root, PhaseState::Scheduled)?;
        hopper_tx
            .send(root)
            .map_err(|_| OrchestratorError::ExecutionAborted("hopper closed".to_string()))?;

        let mut running = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                Ok(()) = aborted.changed() => {
                    let Some(e) = phasing.take_fatal() else { continue };
                    running.shutdown().await;
                    error!(root = %root_name, error = %e, "Phase execution aborted");
                    return Err(e);
                }
                _ = done_rx.wait_for(|done| *done) => break,
                Some(id) = hopper_rx.recv() => {
                    debug!(phase = %phasing.full_name(id)?, "Phase taken from hopper");
                    let engine = Arc::clone(&engine);
                    running.spawn(async move { (id, engine.execute(id).await) });
                }
                Some(joined) = running.join_next() => match joined {
                    Ok((_, Ok(()))) => {}
                    Ok((id, Err(e))) => {
                        error!(
                            phase = %phasing.full_name(id).unwrap_or_else(|_| id.to_string()),
                            error = %e,
                            "Phase execution failed"
                        );
                        return Err(e);
                    }
                    Err(e) => {
                        return Err(OrchestratorError::ExecutionAborted(format!(
                            "phase execution task failed: {}",
                            e
                        )));
                    }
                },
            }
        }

        if !running.is_empty() {
            debug!(remaining = running.len(), "Aborting idle phase activations");
        }
        running.shutdown().await;

        let completed = engine
            .completed()
            .into_iter()
            .map(|id| phasing.full_name(id))
            .collect::<Result<Vec<_>>>()?;
        let report = RunReport {
            completed,
            hook_failures: failures.snapshot(),
            final_states: phasing.snapshot(),
        };
        info!(
            root = %root_name,
            completed = report.completed.len(),
            hook_failures = report.hook_failures.len(),
            "Phase execution finished"
        );
        Ok(report)
    }
}
