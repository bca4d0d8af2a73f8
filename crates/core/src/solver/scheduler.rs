//! Tick sequencing
//!
//! The [`StepScheduler`] records one simulation tick as a [`CommandList`]:
//!
//! ```text
//! inject → diffuse velocity (x, y, z) → project → advect velocity → project
//!        → diffuse density → advect density → composite
//! ```
//!
//! A barrier follows every dispatch whose output a later command reads or
//! overwrites, and every swap sits after the barrier that publishes the write it
//! promotes. Recording never touches field data; the device validates and
//! executes the list.

use super::command::{CommandList, Dispatch};
use super::composite::CompositeSettings;
use super::diffusion::diffusion_coefficient;
use crate::config::{SolverSettings, StepConstants};
use crate::core_types::InjectionSource;
use crate::grid::{BufferRef, FieldId, FieldLayout, GridDimensions};
use std::fmt;
use tracing::trace;

/// Phase of the tick currently being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TickStage {
    #[default]
    Idle,
    Injecting,
    DiffusingVelocity,
    ProjectingA,
    Advecting,
    ProjectingB,
    DiffusingDensity,
    AdvectingDensity,
    Compositing,
}

impl TickStage {
    /// Stage that follows this one in a tick; `Compositing` wraps to `Idle`
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Idle => Self::Injecting,
            Self::Injecting => Self::DiffusingVelocity,
            Self::DiffusingVelocity => Self::ProjectingA,
            Self::ProjectingA => Self::Advecting,
            Self::Advecting => Self::ProjectingB,
            Self::ProjectingB => Self::DiffusingDensity,
            Self::DiffusingDensity => Self::AdvectingDensity,
            Self::AdvectingDensity => Self::Compositing,
            Self::Compositing => Self::Idle,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Injecting => "inject",
            Self::DiffusingVelocity => "diffuse_velocity",
            Self::ProjectingA => "project_a",
            Self::Advecting => "advect_velocity",
            Self::ProjectingB => "project_b",
            Self::DiffusingDensity => "diffuse_density",
            Self::AdvectingDensity => "advect_density",
            Self::Compositing => "composite",
        }
    }
}

impl fmt::Display for TickStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-tick inputs, read-only while the tick is recorded
#[derive(Debug, Clone, Copy)]
pub struct TickInputs<'a> {
    pub dt: f32,
    pub step: &'a StepConstants,
    pub solver: &'a SolverSettings,
    pub composite: &'a CompositeSettings,
    /// Emitters already evaluated at the tick's elapsed time
    pub sources: &'a [InjectionSource],
}

/// Records ticks for one field layout
#[derive(Debug, Clone)]
pub struct StepScheduler {
    layout: FieldLayout,
    stage: TickStage,
}

impl StepScheduler {
    #[must_use]
    pub fn new(layout: FieldLayout) -> Self {
        Self {
            layout,
            stage: TickStage::Idle,
        }
    }

    #[must_use]
    pub fn stage(&self) -> TickStage {
        self.stage
    }

    #[must_use]
    pub fn layout(&self) -> FieldLayout {
        self.layout
    }

    fn enter(&mut self, list: &mut CommandList, stage: TickStage) {
        debug_assert_eq!(self.stage.next(), stage, "tick stages out of order");
        self.stage = stage;
        list.stage(stage);
    }

    /// Record one complete tick
    #[must_use]
    pub fn record_tick(&mut self, inputs: &TickInputs<'_>) -> CommandList {
        let dims = self.layout.grid;
        let mut list = CommandList::new();
        self.stage = TickStage::Idle;

        self.enter(&mut list, TickStage::Injecting);
        record_injection(&mut list, dims, inputs.sources);

        self.enter(&mut list, TickStage::DiffusingVelocity);
        let a = diffusion_coefficient(inputs.step.viscosity, inputs.dt);
        for field in FieldId::VELOCITY {
            record_diffusion(&mut list, dims, field, a, inputs.solver.diffusion_iterations);
        }

        self.enter(&mut list, TickStage::ProjectingA);
        record_projection(&mut list, dims, inputs.solver.pressure_iterations);

        self.enter(&mut list, TickStage::Advecting);
        record_velocity_advection(&mut list, dims, inputs.dt);

        self.enter(&mut list, TickStage::ProjectingB);
        record_projection(&mut list, dims, inputs.solver.pressure_iterations);

        self.enter(&mut list, TickStage::DiffusingDensity);
        let a = diffusion_coefficient(inputs.step.diffusion_rate, inputs.dt);
        record_diffusion(
            &mut list,
            dims,
            FieldId::Density,
            a,
            inputs.solver.diffusion_iterations,
        );

        self.enter(&mut list, TickStage::AdvectingDensity);
        list.dispatch(Dispatch::advect(dims, FieldId::Density, inputs.dt));
        list.barrier();
        list.swap(FieldId::Density);

        self.enter(&mut list, TickStage::Compositing);
        list.dispatch(Dispatch::composite(
            dims,
            self.layout.backbone,
            inputs.composite,
        ));
        list.barrier();

        self.stage = TickStage::Idle;
        trace!(
            "Recorded tick: {} commands, {} dispatches",
            list.len(),
            list.dispatch_count()
        );
        list
    }
}

/// One dispatch per source; each reads the state the previous one published
pub fn record_injection(list: &mut CommandList, dims: GridDimensions, sources: &[InjectionSource]) {
    for source in sources {
        list.dispatch(Dispatch::inject(dims, source));
        list.barrier();
        for field in FieldId::SIMULATED {
            list.swap(field);
        }
    }
}

/// Jacobi sweeps ping-ponging through [`FieldId::Scratch`]; the last sweep
/// writes the field's own scratch slot, which is then promoted
pub fn record_diffusion(
    list: &mut CommandList,
    dims: GridDimensions,
    field: FieldId,
    a: f32,
    iterations: u32,
) {
    for i in 0..iterations {
        let guess = if i == 0 {
            BufferRef::Current(field)
        } else {
            BufferRef::Current(FieldId::Scratch)
        };
        let last = i + 1 == iterations;
        let target = if last {
            BufferRef::Scratch(field)
        } else {
            BufferRef::Scratch(FieldId::Scratch)
        };
        list.dispatch(Dispatch::diffuse_step(dims, field, a, guess, target));
        list.barrier();
        list.swap(if last { field } else { FieldId::Scratch });
    }
}

/// Divergence, pressure sweeps and gradient subtraction; skipped entirely for
/// zero iterations
pub fn record_projection(list: &mut CommandList, dims: GridDimensions, iterations: u32) {
    if iterations == 0 {
        return;
    }
    list.dispatch(Dispatch::divergence(dims));
    list.barrier();

    for i in 0..iterations {
        list.dispatch(Dispatch::pressure_step(dims, i == 0));
        list.barrier();
        list.swap(FieldId::Scratch);
    }

    list.dispatch(Dispatch::subtract_gradient(dims));
    list.barrier();
    for field in FieldId::VELOCITY {
        list.swap(field);
    }
}

/// Self-advection: all three axes read the same current velocity, then swap together
pub fn record_velocity_advection(list: &mut CommandList, dims: GridDimensions, dt: f32) {
    for field in FieldId::VELOCITY {
        list.dispatch(Dispatch::advect(dims, field, dt));
    }
    list.barrier();
    for field in FieldId::VELOCITY {
        list.swap(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{FalloffKernel, Vec3};
    use crate::grid::BufferBindings;
    use crate::solver::command::{Command, Kernel};

    fn inputs<'a>(
        step: &'a StepConstants,
        solver: &'a SolverSettings,
        composite: &'a CompositeSettings,
        sources: &'a [InjectionSource],
    ) -> TickInputs<'a> {
        TickInputs {
            dt: 1.0 / 60.0,
            step,
            solver,
            composite,
            sources,
        }
    }

    fn source() -> InjectionSource {
        InjectionSource {
            position: Vec3::new(4.0, 4.0, 4.0),
            radius: 2.0,
            velocity: Vec3::new(0.0, 1.0, 0.0),
            density_amount: 1.0,
            falloff: FalloffKernel::Smooth,
        }
    }

    fn layout() -> FieldLayout {
        FieldLayout::new(GridDimensions::cubic(8), GridDimensions::cubic(16))
    }

    #[test]
    fn test_recorded_tick_validates() {
        let (step, solver, composite) = (
            StepConstants::default(),
            SolverSettings::default(),
            CompositeSettings::default(),
        );
        let sources = [source(), source()];
        let mut scheduler = StepScheduler::new(layout());
        let list = scheduler.record_tick(&inputs(&step, &solver, &composite, &sources));
        assert!(list.validate(BufferBindings::default()).is_ok());
        assert_eq!(scheduler.stage(), TickStage::Idle);
    }

    #[test]
    fn test_stage_order() {
        let (step, solver, composite) = (
            StepConstants::default(),
            SolverSettings::default(),
            CompositeSettings::default(),
        );
        let mut scheduler = StepScheduler::new(layout());
        let list = scheduler.record_tick(&inputs(&step, &solver, &composite, &[]));
        let stages: Vec<TickStage> = list
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Stage(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                TickStage::Injecting,
                TickStage::DiffusingVelocity,
                TickStage::ProjectingA,
                TickStage::Advecting,
                TickStage::ProjectingB,
                TickStage::DiffusingDensity,
                TickStage::AdvectingDensity,
                TickStage::Compositing,
            ]
        );
    }

    #[test]
    fn test_dispatch_counts() {
        let step = StepConstants::default();
        let solver = SolverSettings {
            diffusion_iterations: 3,
            pressure_iterations: 5,
            ..SolverSettings::default()
        };
        let composite = CompositeSettings::default();
        let sources = [source()];
        let mut scheduler = StepScheduler::new(layout());
        let list = scheduler.record_tick(&inputs(&step, &solver, &composite, &sources));

        let count = |kernel: Kernel| {
            list.commands()
                .iter()
                .filter(|c| matches!(c, Command::Dispatch(d) if d.kernel == kernel))
                .count()
        };
        assert_eq!(count(Kernel::Inject), 1);
        assert_eq!(count(Kernel::DiffuseStep), 4 * 3);
        assert_eq!(count(Kernel::Divergence), 2);
        assert_eq!(count(Kernel::PressureStep), 2 * 5);
        assert_eq!(count(Kernel::SubtractGradient), 2);
        assert_eq!(count(Kernel::Advect), 4);
        assert_eq!(count(Kernel::Composite), 1);
    }

    #[test]
    fn test_zero_iterations_still_validate() {
        let step = StepConstants::default();
        let solver = SolverSettings {
            diffusion_iterations: 0,
            pressure_iterations: 0,
            ..SolverSettings::default()
        };
        let composite = CompositeSettings::default();
        let mut scheduler = StepScheduler::new(layout());
        let list = scheduler.record_tick(&inputs(&step, &solver, &composite, &[]));
        assert!(list.validate(BufferBindings::default()).is_ok());
        assert!(!list
            .commands()
            .iter()
            .any(|c| matches!(c, Command::Dispatch(d) if d.kernel == Kernel::PressureStep)));
    }

    #[test]
    fn test_stage_cycle() {
        let mut stage = TickStage::Idle;
        for _ in 0..9 {
            stage = stage.next();
        }
        assert_eq!(stage, TickStage::Idle);
    }
}
