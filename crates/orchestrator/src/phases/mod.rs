//! Phase behaviors.
//!
//! A [`PhaseImp`] is the reusable behavior bound to a leaf node: a name plus
//! a traversal strategy that decides how components are visited. The
//! standard behaviors are singletons served by [`ImpRegistry`]:
//!
//! - [`common`] - build, connect, end_of_elaboration, start_of_simulation,
//!   run, extract, check, report, final
//! - [`runtime`] - the twelve task phases of the `uvm_sched` schedule

pub mod common;
pub mod runtime;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use phase_core::PhaseKind;

use crate::component::Component;
use crate::core::PhaseCtx;
use crate::error::HookResult;
use crate::traversal::{
    BottomUpTraversal, FuncHook, TaskHook, TaskTraversal, TopDownTraversal, Traversal,
};

pub struct PhaseImp {
    name: String,
    behavior: PhaseBehavior,
}

pub enum PhaseBehavior {
    BottomUp(BottomUpTraversal),
    TopDown(TopDownTraversal),
    Task(TaskTraversal),
}

impl PhaseImp {
    /// Function phase visiting children before parents.
    pub fn bottom_up<F>(name: impl Into<String>, hook: F) -> Arc<Self>
    where
        F: Fn(&dyn Component, &PhaseCtx) -> HookResult + Send + Sync + 'static,
    {
        let hook: FuncHook = Arc::new(hook);
        Arc::new(Self {
            name: name.into(),
            behavior: PhaseBehavior::BottomUp(BottomUpTraversal::new(hook)),
        })
    }

    /// Function phase visiting parents before children.
    pub fn top_down<F>(name: impl Into<String>, hook: F) -> Arc<Self>
    where
        F: Fn(&dyn Component, &PhaseCtx) -> HookResult + Send + Sync + 'static,
    {
        let hook: FuncHook = Arc::new(hook);
        Arc::new(Self {
            name: name.into(),
            behavior: PhaseBehavior::TopDown(TopDownTraversal::new(hook)),
        })
    }

    /// Task phase: the hook runs as one concurrent work item per component
    /// and the phase ends when its objection is fully dropped.
    pub fn task<F, Fut>(name: impl Into<String>, hook: F) -> Arc<Self>
    where
        F: Fn(Arc<dyn Component>, PhaseCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        let hook: TaskHook = Arc::new(move |component, ctx| Box::pin(hook(component, ctx)));
        Arc::new(Self {
            name: name.into(),
            behavior: PhaseBehavior::Task(TaskTraversal::new(hook)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PhaseKind {
        self.traversal().kind()
    }

    pub fn behavior(&self) -> &PhaseBehavior {
        &self.behavior
    }

    pub fn traversal(&self) -> &dyn Traversal {
        match &self.behavior {
            PhaseBehavior::BottomUp(t) => t,
            PhaseBehavior::TopDown(t) => t,
            PhaseBehavior::Task(t) => t,
        }
    }
}

impl fmt::Debug for PhaseImp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseImp")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StandardPhase {
    Build,
    Connect,
    EndOfElaboration,
    StartOfSimulation,
    Run,
    Extract,
    Check,
    Report,
    Final,
    PreReset,
    Reset,
    PostReset,
    PreConfigure,
    Configure,
    PostConfigure,
    PreMain,
    Main,
    PostMain,
    PreShutdown,
    Shutdown,
    PostShutdown,
}

impl StandardPhase {
    /// The common domain, in execution order.
    pub const COMMON: [Self; 9] = [
        Self::Build,
        Self::Connect,
        Self::EndOfElaboration,
        Self::StartOfSimulation,
        Self::Run,
        Self::Extract,
        Self::Check,
        Self::Report,
        Self::Final,
    ];

    /// The runtime schedule, in execution order.
    pub const RUNTIME: [Self; 12] = [
        Self::PreReset,
        Self::Reset,
        Self::PostReset,
        Self::PreConfigure,
        Self::Configure,
        Self::PostConfigure,
        Self::PreMain,
        Self::Main,
        Self::PostMain,
        Self::PreShutdown,
        Self::Shutdown,
        Self::PostShutdown,
    ];

    pub const ALL: [Self; 21] = [
        Self::Build,
        Self::Connect,
        Self::EndOfElaboration,
        Self::StartOfSimulation,
        Self::Run,
        Self::Extract,
        Self::Check,
        Self::Report,
        Self::Final,
        Self::PreReset,
        Self::Reset,
        Self::PostReset,
        Self::PreConfigure,
        Self::Configure,
        Self::PostConfigure,
        Self::PreMain,
        Self::Main,
        Self::PostMain,
        Self::PreShutdown,
        Self::Shutdown,
        Self::PostShutdown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Connect => "connect",
            Self::EndOfElaboration => "end_of_elaboration",
            Self::StartOfSimulation => "start_of_simulation",
            Self::Run => "run",
            Self::Extract => "extract",
            Self::Check => "check",
            Self::Report => "report",
            Self::Final => "final",
            Self::PreReset => "pre_reset",
            Self::Reset => "reset",
            Self::PostReset => "post_reset",
            Self::PreConfigure => "pre_configure",
            Self::Configure => "configure",
            Self::PostConfigure => "post_configure",
            Self::PreMain => "pre_main",
            Self::Main => "main",
            Self::PostMain => "post_main",
            Self::PreShutdown => "pre_shutdown",
            Self::Shutdown => "shutdown",
            Self::PostShutdown => "post_shutdown",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|phase| phase.name() == name)
    }

    pub fn kind(self) -> PhaseKind {
        match self {
            Self::Build | Self::Final => PhaseKind::TopDown,
            Self::Connect
            | Self::EndOfElaboration
            | Self::StartOfSimulation
            | Self::Extract
            | Self::Check
            | Self::Report => PhaseKind::BottomUp,
            _ => PhaseKind::Task,
        }
    }

    /// The shared singleton behavior for this phase.
    pub fn imp(self) -> Arc<PhaseImp> {
        ImpRegistry::global().get(self)
    }

    fn build(self) -> Arc<PhaseImp> {
        match self {
            Self::Build => common::build(),
            Self::Connect => common::connect(),
            Self::EndOfElaboration => common::end_of_elaboration(),
            Self::StartOfSimulation => common::start_of_simulation(),
            Self::Run => common::run(),
            Self::Extract => common::extract(),
            Self::Check => common::check(),
            Self::Report => common::report(),
            Self::Final => common::final_phase(),
            Self::PreReset => runtime::pre_reset(),
            Self::Reset => runtime::reset(),
            Self::PostReset => runtime::post_reset(),
            Self::PreConfigure => runtime::pre_configure(),
            Self::Configure => runtime::configure(),
            Self::PostConfigure => runtime::post_configure(),
            Self::PreMain => runtime::pre_main(),
            Self::Main => runtime::main(),
            Self::PostMain => runtime::post_main(),
            Self::PreShutdown => runtime::pre_shutdown(),
            Self::Shutdown => runtime::shutdown(),
            Self::PostShutdown => runtime::post_shutdown(),
        }
    }
}

impl fmt::Display for StandardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lazily-built process-wide singletons for the standard behaviors.
pub struct ImpRegistry {
    slots: [OnceLock<Arc<PhaseImp>>; 21],
}

impl ImpRegistry {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    pub fn global() -> &'static ImpRegistry {
        static REGISTRY: OnceLock<ImpRegistry> = OnceLock::new();
        REGISTRY.get_or_init(ImpRegistry::new)
    }

    /// Returns the singleton, building it on first use.
    pub fn get(&self, phase: StandardPhase) -> Arc<PhaseImp> {
        Arc::clone(self.slots[phase as usize].get_or_init(|| phase.build()))
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<PhaseImp>> {
        StandardPhase::parse(name).map(|phase| self.get(phase))
    }

    pub fn is_built(&self, phase: StandardPhase) -> bool {
        self.slots[phase as usize].get().is_some()
    }
}
