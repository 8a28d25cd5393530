//! RAII guard for the concurrent work items of one task-phase execution.
//!
//! Work items are detached tokio tasks. The guard tracks them so the phase
//! can abort whatever is still running once it reaches CLEANUP, and kills
//! them on drop if the phase execution itself is torn down early.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use events::Event;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use crate::core::OrderedEventEmitter;
use crate::error::HookResult;

/// A hook that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookFailure {
    pub phase: String,
    pub component: String,
    pub message: String,
}

/// Shared sink collecting work-item failures for the run report.
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    inner: Arc<Mutex<Vec<HookFailure>>>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, failure: HookFailure) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }

    pub fn snapshot(&self) -> Vec<HookFailure> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decrements the outstanding counter when the work item finishes or is aborted.
struct Outstanding(Arc<AtomicUsize>);

impl Outstanding {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct TaskPhaseGuard {
    phase: String,
    handles: Vec<AbortHandle>,
    outstanding: Arc<AtomicUsize>,
    failures: FailureLog,
    emitter: Option<OrderedEventEmitter>,
    killed: bool,
}

impl TaskPhaseGuard {
    pub fn new(
        phase: impl Into<String>,
        outstanding: Arc<AtomicUsize>,
        failures: FailureLog,
        emitter: Option<OrderedEventEmitter>,
    ) -> Self {
        Self {
            phase: phase.into(),
            handles: Vec::new(),
            outstanding,
            failures,
            emitter,
            killed: false,
        }
    }

    /// Spawn a work item on behalf of `component`.
    pub fn spawn(&mut self, component: String, work: BoxFuture<'static, HookResult>) {
        let ticket = Outstanding::enter(&self.outstanding);
        let phase = self.phase.clone();
        let failures = self.failures.clone();
        let emitter = self.emitter.clone();

        let handle = tokio::spawn(async move {
            let _ticket = ticket;
            let message = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };
            error!(phase = %phase, component = %component, error = %message, "Task phase work item failed");
            if let Some(emitter) = &emitter {
                emitter.emit(Event::HookFailed {
                    phase: phase.clone(),
                    component: component.clone(),
                    message: message.clone(),
                });
            }
            failures.record(HookFailure {
                phase,
                component,
                message,
            });
        });
        self.handles.push(handle.abort_handle());
    }

    /// Work items spawned through this guard.
    pub fn spawned(&self) -> usize {
        self.handles.len()
    }

    /// Work items still running.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Abort every work item. Returns how many were still running.
    pub fn kill(&mut self) -> usize {
        let running = self.outstanding();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        self.killed = true;
        if running > 0 {
            debug!(phase = %self.phase, running, "Killed outstanding task phase work");
        }
        running
    }
}

impl Drop for TaskPhaseGuard {
    fn drop(&mut self) {
        if !self.killed && !self.handles.is_empty() {
            warn!(
                phase = %self.phase,
                spawned = self.handles.len(),
                "Task phase guard dropped before cleanup - aborting work items"
            );
            self.kill();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::HookError;

    async fn sleep_forever() -> HookResult {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn fail() -> HookResult {
        Err(HookError::new("bus error"))
    }

    async fn explode() -> HookResult {
        panic!("monitor exploded")
    }

    fn guard(failures: &FailureLog) -> TaskPhaseGuard {
        TaskPhaseGuard::new(
            "common.run",
            Arc::new(AtomicUsize::new(0)),
            failures.clone(),
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_aborts_running_work() {
        let failures = FailureLog::new();
        let mut procs = guard(&failures);
        procs.spawn("env".to_string(), Box::pin(sleep_forever()));
        tokio::task::yield_now().await;
        assert_eq!(procs.outstanding(), 1);

        assert_eq!(procs.kill(), 1);
        tokio::task::yield_now().await;
        assert_eq!(procs.outstanding(), 0);
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_recorded() {
        let failures = FailureLog::new();
        let mut procs = guard(&failures);
        procs.spawn("env.driver".to_string(), Box::pin(fail()));
        procs.spawn("env.monitor".to_string(), Box::pin(explode()));
        while procs.outstanding() > 0 {
            tokio::task::yield_now().await;
        }

        let mut recorded = failures.snapshot();
        recorded.sort_by(|a, b| a.component.cmp(&b.component));
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].component, "env.driver");
        assert_eq!(recorded[0].message, "bus error");
        assert!(recorded[1].message.contains("monitor exploded"));
        assert_eq!(procs.spawned(), 2);
    }

    #[tokio::test]
    async fn test_drop_kills_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let mut procs =
                TaskPhaseGuard::new("p", Arc::clone(&counter), FailureLog::new(), None);
            procs.spawn("c".to_string(), Box::pin(sleep_forever()));
            tokio::task::yield_now().await;
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
