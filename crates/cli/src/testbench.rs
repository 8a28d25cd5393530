//! Demo testbench: a driver feeding a scoreboard through a monitor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use orchestrator::{
    Component, ComponentTree, HookError, HookResult, PhaseCtx, Sequencer, StandardPhase,
};
use tracing::{debug, info};

pub struct TestbenchOptions {
    pub transactions: u32,
    pub period: Duration,
    pub reset_jump: bool,
}

#[derive(Clone, Default)]
struct Channel {
    items: Arc<Mutex<Vec<u32>>>,
}

impl Channel {
    fn push(&self, item: u32) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);
    }

    fn take(&self) -> Vec<u32> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

struct Env;

impl Component for Env {
    fn build_phase(&self, phase: &PhaseCtx) -> HookResult {
        debug!(component = %phase.component(), "Building environment");
        Ok(())
    }
}

struct Driver {
    wire: Channel,
    transactions: u32,
    period: Duration,
    reset_jump: AtomicBool,
}

#[async_trait]
impl Component for Driver {
    async fn reset_phase(&self, phase: PhaseCtx) -> HookResult {
        phase.raise_objection("reset")?;
        tokio::time::sleep(self.period).await;
        self.wire.take();
        phase.drop_objection("reset")?;
        Ok(())
    }

    async fn main_phase(&self, phase: PhaseCtx) -> HookResult {
        if self.reset_jump.swap(false, Ordering::SeqCst) {
            info!(component = %phase.component(), "Requesting reset from main");
            phase.jump(StandardPhase::Reset)?;
            return Ok(());
        }

        phase.raise_objection("driving")?;
        for item in 0..self.transactions {
            tokio::time::sleep(self.period).await;
            debug!(component = %phase.component(), item, "Driving transaction");
            self.wire.push(item);
        }
        phase.drop_objection("driving")?;
        Ok(())
    }
}

/// Moves transactions from the wire to the scoreboard for as long as `run` lasts.
struct Monitor {
    wire: Channel,
    observed: Channel,
    period: Duration,
}

#[async_trait]
impl Component for Monitor {
    async fn run_phase(&self, _phase: PhaseCtx) -> HookResult {
        loop {
            tokio::time::sleep(self.period / 2).await;
            for item in self.wire.take() {
                self.observed.push(item);
            }
        }
    }

    fn extract_phase(&self, _phase: &PhaseCtx) -> HookResult {
        for item in self.wire.take() {
            self.observed.push(item);
        }
        Ok(())
    }
}

struct Scoreboard {
    observed: Channel,
    expected: u32,
    checked: Mutex<Vec<u32>>,
}

impl Component for Scoreboard {
    fn check_phase(&self, phase: &PhaseCtx) -> HookResult {
        let seen = self.observed.take();
        let expected: Vec<u32> = (0..self.expected).collect();
        if seen != expected {
            return Err(HookError::new(format!(
                "expected {:?}, observed {:?}",
                expected, seen
            )));
        }
        debug!(component = %phase.component(), count = seen.len(), "Scoreboard matched");
        *self.checked.lock().unwrap_or_else(PoisonError::into_inner) = seen;
        Ok(())
    }

    fn report_phase(&self, phase: &PhaseCtx) -> HookResult {
        let checked = self.checked.lock().unwrap_or_else(PoisonError::into_inner);
        info!(component = %phase.component(), transactions = checked.len(), "Scoreboard report");
        Ok(())
    }
}

/// Logs the default sequence boundaries of every task phase.
struct SequencerStub;

impl Sequencer for SequencerStub {
    fn start_phase_sequence(&self, phase: &PhaseCtx) {
        debug!(phase = %phase.name(), "Starting default sequence");
    }

    fn stop_phase_sequence(&self, phase: &PhaseCtx) {
        debug!(phase = %phase.name(), "Stopping default sequence");
    }
}

impl Component for SequencerStub {
    fn as_sequencer(&self) -> Option<&dyn Sequencer> {
        Some(self)
    }
}

pub fn build(options: TestbenchOptions) -> orchestrator::Result<ComponentTree> {
    let wire = Channel::default();
    let observed = Channel::default();

    let mut tree = ComponentTree::new();
    let env = tree.add(tree.root(), "env", Arc::new(Env))?;
    let agent = tree.add(env, "agent", Arc::new(Env))?;
    tree.add(
        agent,
        "driver",
        Arc::new(Driver {
            wire: wire.clone(),
            transactions: options.transactions,
            period: options.period,
            reset_jump: AtomicBool::new(options.reset_jump),
        }),
    )?;
    tree.add(agent, "sequencer", Arc::new(SequencerStub))?;
    tree.add(
        agent,
        "monitor",
        Arc::new(Monitor {
            wire,
            observed: observed.clone(),
            period: options.period,
        }),
    )?;
    tree.add(
        env,
        "scoreboard",
        Arc::new(Scoreboard {
            observed,
            expected: options.transactions,
            checked: Mutex::new(Vec::new()),
        }),
    )?;
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator::{PhaseExecutor, Phasing, RunConfig};

    fn options(reset_jump: bool) -> TestbenchOptions {
        TestbenchOptions {
            transactions: 3,
            period: Duration::from_millis(10),
            reset_jump,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_run_is_clean() {
        let phasing = Phasing::new(RunConfig::default());
        let executor = PhaseExecutor::new(phasing, build(options(false)).unwrap());
        let started = tokio::time::Instant::now();

        let report = executor.run_phases().await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.position("common.final"), Some(report.completed.len() - 2));
        // reset plus three transactions
        assert_eq!(started.elapsed(), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_jump_reruns_reset() {
        let phasing = Phasing::new(RunConfig::default());
        let executor = PhaseExecutor::new(phasing.clone(), build(options(true)).unwrap());

        executor.run_phases().await.unwrap();

        let schedule = phasing.uvm_schedule().unwrap();
        let reset = phasing
            .find(schedule, StandardPhase::Reset, true)
            .unwrap()
            .unwrap();
        assert_eq!(phasing.run_count(reset).unwrap(), 2);
    }
}
