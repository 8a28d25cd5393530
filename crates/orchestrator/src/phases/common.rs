//! Behaviors of the common domain.

use std::sync::Arc;

use super::PhaseImp;

pub fn build() -> Arc<PhaseImp> {
    PhaseImp::top_down("build", |component, phase| component.build_phase(phase))
}

pub fn connect() -> Arc<PhaseImp> {
    PhaseImp::bottom_up("connect", |component, phase| component.connect_phase(phase))
}

pub fn end_of_elaboration() -> Arc<PhaseImp> {
    PhaseImp::bottom_up("end_of_elaboration", |component, phase| {
        component.end_of_elaboration_phase(phase)
    })
}

pub fn start_of_simulation() -> Arc<PhaseImp> {
    PhaseImp::bottom_up("start_of_simulation", |component, phase| {
        component.start_of_simulation_phase(phase)
    })
}

pub fn run() -> Arc<PhaseImp> {
    PhaseImp::task("run", |component, phase| async move {
        component.run_phase(phase).await
    })
}

pub fn extract() -> Arc<PhaseImp> {
    PhaseImp::bottom_up("extract", |component, phase| component.extract_phase(phase))
}

pub fn check() -> Arc<PhaseImp> {
    PhaseImp::bottom_up("check", |component, phase| component.check_phase(phase))
}

pub fn report() -> Arc<PhaseImp> {
    PhaseImp::bottom_up("report", |component, phase| component.report_phase(phase))
}

pub fn final_phase() -> Arc<PhaseImp> {
    PhaseImp::top_down("final", |component, phase| component.final_phase(phase))
}
