//! Recorded command lists against the hazard validator and the CPU device
//!
//! The CPU device must execute exactly what the host-memory kernels compute when
//! fed the same sweep sequence, and must refuse lists with ordering hazards.

use approx::assert_relative_eq;
use nebula_sim_core::grid::BufferBindings;
use nebula_sim_core::solver::diffusion::diffuse_cpu;
use nebula_sim_core::solver::projection::project_cpu;
use nebula_sim_core::solver::scheduler::{record_diffusion, record_projection};
use nebula_sim_core::solver::{
    Command, CommandList, CpuDevice, Dispatch, Hazard, StepScheduler, TickInputs, TickStage,
};
use nebula_sim_core::{
    CompositeSettings, ComputeDevice, Emitter, FieldId, FieldLayout, GridDimensions,
    InjectionSource, SimError, SolverSettings, StepConstants, Vec3,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn layout() -> FieldLayout {
    FieldLayout::new(GridDimensions::cubic(10), GridDimensions::cubic(16))
}

fn sources(count: usize) -> Vec<InjectionSource> {
    (0..count)
        .map(|i| {
            Emitter::new(Vec3::new(2.0 + 2.0 * i as f32, 5.0, 5.0), 2.5)
                .with_velocity(Vec3::new(1.0, 0.5, -0.5))
                .with_density(0.7)
                .source_at(0.0)
        })
        .collect()
}

fn record(solver: &SolverSettings, source_count: usize) -> CommandList {
    let step = StepConstants::default();
    let composite = CompositeSettings::default();
    let sources = sources(source_count);
    StepScheduler::new(layout()).record_tick(&TickInputs {
        dt: 1.0 / 60.0,
        step: &step,
        solver,
        composite: &composite,
        sources: &sources,
    })
}

fn random_field(n: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.random::<f32>() - 0.5).collect()
}

#[test]
fn test_recorded_ticks_validate_for_any_settings() {
    for diffusion_iterations in [0, 1, 4] {
        for pressure_iterations in [0, 1, 5] {
            for source_count in [0, 1, 3] {
                let solver = SolverSettings {
                    diffusion_iterations,
                    pressure_iterations,
                    ..SolverSettings::default()
                };
                let list = record(&solver, source_count);
                assert!(
                    list.validate(BufferBindings::default()).is_ok(),
                    "diffusion {diffusion_iterations}, pressure {pressure_iterations}, {source_count} sources"
                );
                assert!(matches!(list.commands().last(), Some(Command::Barrier)));
            }
        }
    }
}

#[test]
fn test_recorded_tick_visits_every_stage() {
    let list = record(&SolverSettings::default(), 1);
    let stages: Vec<TickStage> = list
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::Stage(stage) => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(
        stages,
        [
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
fn test_missing_barrier_rejected_before_execution() {
    // Injection recorded with its swaps ahead of the barrier that publishes it
    let dims = layout().grid;
    let mut list = CommandList::new();
    for source in &sources(2) {
        list.dispatch(Dispatch::inject(dims, source));
        for field in FieldId::SIMULATED {
            list.swap(field);
        }
    }
    list.barrier();

    assert!(matches!(
        list.validate(BufferBindings::default()),
        Err(Hazard::SwapBeforeBarrier { .. })
    ));

    let mut device = CpuDevice::new(layout()).unwrap();
    let before = device.bindings();
    let err = device.submit(&list).unwrap_err();
    assert!(matches!(err, SimError::Submission(_)));
    assert_eq!(device.bindings(), before);
    assert_eq!(device.submissions(), 0);
    assert!(device
        .read_field(FieldId::Density)
        .unwrap()
        .iter()
        .all(|v| *v == 0.0));
}

#[test]
fn test_device_bindings_match_validation() {
    let list = record(&SolverSettings::default(), 2);
    let expected = list.validate(BufferBindings::default()).unwrap();

    let mut device = CpuDevice::new(layout()).unwrap();
    device.submit(&list).unwrap();
    device.wait_idle(Duration::from_millis(10)).unwrap();

    assert_eq!(device.bindings(), expected);
    assert_eq!(device.submissions(), 1);
}

#[test]
fn test_device_projection_matches_host_kernels() {
    let dims = layout().grid;
    let n = dims.cell_count();
    let (mut vx, mut vy, mut vz) = (random_field(n, 1), random_field(n, 2), random_field(n, 3));

    let mut device = CpuDevice::new(layout()).unwrap();
    device.write_field(FieldId::VelocityX, &vx).unwrap();
    device.write_field(FieldId::VelocityY, &vy).unwrap();
    device.write_field(FieldId::VelocityZ, &vz).unwrap();

    let mut list = CommandList::new();
    record_projection(&mut list, dims, 6);
    device.submit(&list).unwrap();

    project_cpu(dims, 6, &mut vx, &mut vy, &mut vz);
    for (field, host) in [
        (FieldId::VelocityX, &vx),
        (FieldId::VelocityY, &vy),
        (FieldId::VelocityZ, &vz),
    ] {
        let on_device = device.read_field(field).unwrap();
        for (d, h) in on_device.iter().zip(host.iter()) {
            assert_relative_eq!(*d, *h, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_device_diffusion_matches_host_kernels() {
    let dims = layout().grid;
    let mut density: Vec<f32> = random_field(dims.cell_count(), 9)
        .iter()
        .map(|v| v.abs())
        .collect();
    let a = 0.3;

    let mut device = CpuDevice::new(layout()).unwrap();
    device.write_field(FieldId::Density, &density).unwrap();

    let mut list = CommandList::new();
    record_diffusion(&mut list, dims, FieldId::Density, a, 5);
    device.submit(&list).unwrap();

    diffuse_cpu(dims, a, 5, &mut density);
    let on_device = device.read_field(FieldId::Density).unwrap();
    for (d, h) in on_device.iter().zip(&density) {
        assert_relative_eq!(*d, *h, epsilon = 1e-6);
    }
}

#[test]
fn test_write_field_rejects_wrong_length() {
    let mut device = CpuDevice::new(layout()).unwrap();
    let err = device.write_field(FieldId::Backbone, &[0.0; 8]).unwrap_err();
    assert!(matches!(err, SimError::Submission(_)));
}
