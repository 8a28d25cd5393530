//! Behaviors of the runtime schedule. All are task phases running
//! concurrently with `run`.

use std::sync::Arc;

use super::PhaseImp;

pub fn pre_reset() -> Arc<PhaseImp> {
    PhaseImp::task("pre_reset", |component, phase| async move {
        component.pre_reset_phase(phase).await
    })
}

pub fn reset() -> Arc<PhaseImp> {
    PhaseImp::task("reset", |component, phase| async move {
        component.reset_phase(phase).await
    })
}

pub fn post_reset() -> Arc<PhaseImp> {
    PhaseImp::task("post_reset", |component, phase| async move {
        component.post_reset_phase(phase).await
    })
}

pub fn pre_configure() -> Arc<PhaseImp> {
    PhaseImp::task("pre_configure", |component, phase| async move {
        component.pre_configure_phase(phase).await
    })
}

pub fn configure() -> Arc<PhaseImp> {
    PhaseImp::task("configure", |component, phase| async move {
        component.configure_phase(phase).await
    })
}

pub fn post_configure() -> Arc<PhaseImp> {
    PhaseImp::task("post_configure", |component, phase| async move {
        component.post_configure_phase(phase).await
    })
}

pub fn pre_main() -> Arc<PhaseImp> {
    PhaseImp::task("pre_main", |component, phase| async move {
        component.pre_main_phase(phase).await
    })
}

pub fn main() -> Arc<PhaseImp> {
    PhaseImp::task("main", |component, phase| async move {
        component.main_phase(phase).await
    })
}

pub fn post_main() -> Arc<PhaseImp> {
    PhaseImp::task("post_main", |component, phase| async move {
        component.post_main_phase(phase).await
    })
}

pub fn pre_shutdown() -> Arc<PhaseImp> {
    PhaseImp::task("pre_shutdown", |component, phase| async move {
        component.pre_shutdown_phase(phase).await
    })
}

pub fn shutdown() -> Arc<PhaseImp> {
    PhaseImp::task("shutdown", |component, phase| async move {
        component.shutdown_phase(phase).await
    })
}

pub fn post_shutdown() -> Arc<PhaseImp> {
    PhaseImp::task("post_shutdown", |component, phase| async move {
        component.post_shutdown_phase(phase).await
    })
}
