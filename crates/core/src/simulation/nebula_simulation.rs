//! Nebula simulation session
//!
//! [`NebulaSimulation`] owns one compute device and drives it: it seeds the
//! backbone, records one tick per `step` through the [`StepScheduler`], submits it
//! and waits for completion within the configured budget. A fatal device error
//! poisons the session; every later mutating call reports `SessionFailed`.

use crate::config::SimulationConfig;
use crate::core_types::{Emitter, InjectionSource};
use crate::error::{SimError, SimResult};
use crate::grid::{FieldId, FieldLayout, GridDimensions, ScalarField};
use crate::solver::{
    create_device, ComputeDevice, FrameTimer, ProceduralSeeder, SeedVector, StepScheduler,
    TickInputs,
};
use std::borrow::Cow;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Read-only view of the backbone for the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct FieldHandle<'a> {
    pub dimensions: GridDimensions,
    pub data: Cow<'a, [f32]>,
}

/// A running nebula simulation on one compute device
pub struct NebulaSimulation {
    config: SimulationConfig,
    device: Box<dyn ComputeDevice>,
    scheduler: StepScheduler,
    seeder: ProceduralSeeder,
    emitters: Vec<Emitter>,

    /// Seed the backbone was last generated from
    seed: SeedVector,
    elapsed: f32,
    tick_count: u64,
    timer: FrameTimer,

    /// First fatal error; set once, never cleared
    failure: Option<SimError>,
}

impl NebulaSimulation {
    /// Allocate every field, select a backend and seed the backbone
    ///
    /// # Errors
    ///
    /// `SimError::InvalidConfig` for a rejected configuration, otherwise whatever
    /// device creation or the initial seeding reports.
    pub fn initialize_field(config: SimulationConfig) -> SimResult<Self> {
        config.validate()?;
        let device = create_device(&config)?;
        Self::with_device(config, device)
    }

    /// Build a session on an existing device
    ///
    /// # Errors
    ///
    /// `SimError::InvalidConfig` if the device layout differs from the
    /// configuration's, otherwise any error from the initial seeding.
    pub fn with_device(config: SimulationConfig, device: Box<dyn ComputeDevice>) -> SimResult<Self> {
        config.validate()?;
        let layout = config.layout();
        if device.layout() != layout {
            return Err(SimError::InvalidConfig(format!(
                "device holds a {} / {} layout, configuration asks for {} / {}",
                device.layout().grid,
                device.layout().backbone,
                layout.grid,
                layout.backbone
            )));
        }

        let emitters = config.resolved_emitters();
        let seed = SeedVector::from_seed(config.seed);

        info!(
            "Nebula simulation initialized: grid {}, backbone {}, {} emitters, backend {}",
            layout.grid,
            layout.backbone,
            emitters.len(),
            device.backend_name()
        );

        let mut simulation = Self {
            scheduler: StepScheduler::new(layout),
            seeder: ProceduralSeeder::new(config.noise),
            emitters,
            seed,
            elapsed: 0.0,
            tick_count: 0,
            timer: FrameTimer::new(),
            failure: None,
            device,
            config,
        };
        simulation.regenerate(seed)?;
        Ok(simulation)
    }

    fn ensure_live(&self) -> SimResult<()> {
        if self.failure.is_some() {
            Err(SimError::SessionFailed)
        } else {
            Ok(())
        }
    }

    /// Record a fatal error and pass it through
    fn poison(&mut self, error: SimError) -> SimError {
        if error.is_fatal() && self.failure.is_none() {
            warn!("Nebula simulation failed: {}", error);
            self.failure = Some(error.clone());
        }
        error
    }

    /// Re-seed the backbone and zero every transient field
    ///
    /// Elapsed time and the tick counter restart from zero; emitters are kept.
    ///
    /// # Errors
    ///
    /// `SimError::SessionFailed` after an earlier fatal error, otherwise any
    /// device error while uploading the backbone.
    pub fn regenerate(&mut self, seed: SeedVector) -> SimResult<()> {
        self.ensure_live()?;
        let started = Instant::now();

        let result = self.upload_backbone(&seed);
        if let Err(e) = result {
            return Err(self.poison(e));
        }

        self.seed = seed;
        self.elapsed = 0.0;
        self.tick_count = 0;
        info!(
            "Regenerated backbone from seed offset ({:.2}, {:.2}, {:.2}) in {:.1} ms",
            seed.offset.x,
            seed.offset.y,
            seed.offset.z,
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    /// [`regenerate`](Self::regenerate) with a seed derived from `seed`
    pub fn regenerate_from_seed(&mut self, seed: u64) -> SimResult<()> {
        self.regenerate(SeedVector::from_seed(seed))
    }

    /// Reset the effect with a fresh random seed vector
    pub fn regenerate_random(&mut self) -> SimResult<()> {
        self.regenerate(SeedVector::random())
    }

    fn upload_backbone(&mut self, seed: &SeedVector) -> SimResult<()> {
        let mut backbone = ScalarField::try_new(self.layout().backbone, "backbone staging")?;
        self.seeder.generate(&mut backbone, seed);
        self.device.write_field(FieldId::Backbone, backbone.as_slice())?;
        self.device.clear_transient()?;
        self.device.wait_idle(self.config.solver.sync_timeout())
    }

    /// Advance one tick of `dt` seconds, evaluating emitters at the running elapsed time
    ///
    /// # Errors
    ///
    /// `SimError::InvalidConfig` for a negative or non-finite `dt` (the session
    /// stays usable), `SimError::SessionFailed` after an earlier fatal error, or the
    /// device error that aborted this tick.
    pub fn step(&mut self, dt: f32) -> SimResult<()> {
        self.step_at(dt, self.elapsed)
    }

    /// Advance one tick with emitters evaluated at `elapsed` seconds
    ///
    /// Afterwards [`elapsed`](Self::elapsed) reads `elapsed + dt`.
    pub fn step_at(&mut self, dt: f32, elapsed: f32) -> SimResult<()> {
        self.ensure_live()?;
        if !dt.is_finite() || dt < 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "timestep must be finite and non-negative, got {dt}"
            )));
        }
        if !elapsed.is_finite() {
            return Err(SimError::InvalidConfig(format!(
                "elapsed time must be finite, got {elapsed}"
            )));
        }

        let started = Instant::now();
        let sources: Vec<InjectionSource> = self
            .emitters
            .iter()
            .map(|e| e.source_at(elapsed))
            .collect();
        let commands = self.scheduler.record_tick(&TickInputs {
            dt,
            step: &self.config.step,
            solver: &self.config.solver,
            composite: &self.config.composite,
            sources: &sources,
        });

        let timeout = self.config.solver.sync_timeout();
        let result = self
            .device
            .submit(&commands)
            .and_then(|()| self.device.wait_idle(timeout));
        if let Err(e) = result {
            return Err(self.poison(e));
        }

        self.elapsed = elapsed + dt;
        self.tick_count += 1;
        self.timer.record_since(started);
        debug!(
            "Tick {}: t={:.3}s, dt={:.4}s, {} dispatches, {:.2} ms",
            self.tick_count,
            self.elapsed,
            dt,
            commands.dispatch_count(),
            self.timer.last_frame_time_ms()
        );
        Ok(())
    }

    /// Backbone dimensions and contents for the renderer
    ///
    /// # Errors
    ///
    /// `SimError::SessionFailed` after a fatal error, or a readback failure.
    pub fn renderable_field(&self) -> SimResult<FieldHandle<'_>> {
        self.ensure_live()?;
        Ok(FieldHandle {
            dimensions: self.layout().backbone,
            data: self.device.read_field(FieldId::Backbone)?,
        })
    }

    /// Current contents of any field
    pub fn read_field(&self, field: FieldId) -> SimResult<Cow<'_, [f32]>> {
        self.ensure_live()?;
        self.device.read_field(field)
    }

    #[must_use]
    pub fn emitters(&self) -> &[Emitter] {
        &self.emitters
    }

    /// Replace every emitter
    ///
    /// # Errors
    ///
    /// `SimError::InvalidConfig` if any emitter has non-finite values or a
    /// negative radius; the current emitters are kept in that case.
    pub fn set_emitters(&mut self, emitters: Vec<Emitter>) -> SimResult<()> {
        if let Some(i) = emitters.iter().position(|e| !e.is_valid()) {
            return Err(SimError::InvalidConfig(format!(
                "emitter {i} has a non-finite value or negative radius"
            )));
        }
        self.emitters = emitters;
        Ok(())
    }

    /// Simulated seconds since the last regeneration
    #[must_use]
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Ticks since the last regeneration
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    #[must_use]
    pub fn last_frame_time_ms(&self) -> f64 {
        self.timer.last_frame_time_ms()
    }

    #[must_use]
    pub fn average_frame_time_ms(&self) -> f64 {
        self.timer.average_frame_time_ms()
    }

    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.device.backend_name()
    }

    #[must_use]
    pub fn is_gpu_accelerated(&self) -> bool {
        self.device.is_gpu_accelerated()
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// The error that failed the session, if any
    #[must_use]
    pub fn failure(&self) -> Option<&SimError> {
        self.failure.as_ref()
    }

    #[must_use]
    pub fn seed(&self) -> SeedVector {
        self.seed
    }

    #[must_use]
    pub fn layout(&self) -> FieldLayout {
        self.device.layout()
    }

    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendPreference;
    use crate::core_types::{FalloffKernel, Vec3};
    use crate::solver::CpuDevice;
    use approx::assert_relative_eq;

    fn small_config() -> SimulationConfig {
        SimulationConfig {
            grid: Some(GridDimensions::cubic(12)),
            backbone: Some(GridDimensions::cubic(16)),
            backend: BackendPreference::Cpu,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_initialize_seeds_backbone() {
        let sim = NebulaSimulation::initialize_field(small_config()).unwrap();
        let field = sim.renderable_field().unwrap();
        assert_eq!(field.dimensions, GridDimensions::cubic(16));
        assert_eq!(field.data.len(), 16 * 16 * 16);
        assert!(field.data.iter().any(|&v| v > 0.0));
        assert_eq!(sim.emitters().len(), 3);
        assert!(!sim.is_gpu_accelerated());
    }

    #[test]
    fn test_step_advances_time() {
        let mut sim = NebulaSimulation::initialize_field(small_config()).unwrap();
        sim.step(0.5).unwrap();
        sim.step(0.25).unwrap();
        assert_eq!(sim.tick_count(), 2);
        assert_eq!(sim.elapsed(), 0.75);

        sim.step_at(0.1, 10.0).unwrap();
        assert_relative_eq!(sim.elapsed(), 10.1);
    }

    #[test]
    fn test_invalid_dt_is_not_fatal() {
        let mut sim = NebulaSimulation::initialize_field(small_config()).unwrap();
        assert!(matches!(sim.step(-1.0), Err(SimError::InvalidConfig(_))));
        assert!(matches!(sim.step(f32::NAN), Err(SimError::InvalidConfig(_))));
        assert!(!sim.is_failed());
        sim.step(0.016).unwrap();
    }

    #[test]
    fn test_regenerate_resets_transient_state() {
        let mut sim = NebulaSimulation::initialize_field(small_config()).unwrap();
        sim.set_emitters(vec![Emitter::new(Vec3::new(6.0, 6.0, 6.0), 3.0)
            .with_density(1.0)
            .with_falloff(FalloffKernel::Constant)])
            .unwrap();
        sim.step(0.1).unwrap();
        assert!(sim.read_field(FieldId::Density).unwrap().iter().any(|&v| v > 0.0));

        sim.regenerate_from_seed(7).unwrap();
        assert_eq!(sim.tick_count(), 0);
        assert_eq!(sim.elapsed(), 0.0);
        assert!(sim.read_field(FieldId::Density).unwrap().iter().all(|&v| v == 0.0));
        assert_eq!(sim.emitters().len(), 1);
    }

    #[test]
    fn test_regenerate_random_reseeds() {
        let mut sim = NebulaSimulation::initialize_field(small_config()).unwrap();
        let seeded = sim.renderable_field().unwrap().data.into_owned();
        sim.step(0.1).unwrap();

        sim.regenerate_random().unwrap();
        assert_ne!(sim.seed(), SeedVector::from_seed(sim.config().seed));
        assert_ne!(sim.renderable_field().unwrap().data.as_ref(), seeded.as_slice());
        assert_eq!(sim.tick_count(), 0);
        assert!(sim.read_field(FieldId::Density).unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_set_emitters_rejects_invalid() {
        let mut sim = NebulaSimulation::initialize_field(small_config()).unwrap();
        let bad = vec![Emitter::new(Vec3::new(f32::NAN, 0.0, 0.0), 1.0)];
        assert!(sim.set_emitters(bad).is_err());
        assert_eq!(sim.emitters().len(), 3);

        sim.set_emitters(Vec::new()).unwrap();
        assert!(sim.emitters().is_empty());
    }

    #[test]
    fn test_rejected_emitter_never_reaches_step() {
        let mut sim = NebulaSimulation::initialize_field(small_config()).unwrap();
        let good = Emitter::new(Vec3::new(6.0, 6.0, 6.0), 3.0).with_density(1.0);
        sim.set_emitters(vec![good.clone()]).unwrap();

        for bad in [
            Emitter::new(Vec3::new(6.0, 6.0, 6.0), f32::NAN).with_density(1.0),
            Emitter::new(Vec3::new(6.0, 6.0, 6.0), -2.0),
            good.clone().with_density(f32::INFINITY),
        ] {
            assert!(matches!(
                sim.set_emitters(vec![good.clone(), bad]),
                Err(SimError::InvalidConfig(_))
            ));
            assert_eq!(sim.emitters(), &[good.clone()]);
        }

        sim.step(0.1).unwrap();
        let density = sim.read_field(FieldId::Density).unwrap();
        assert!(density.iter().all(|v| v.is_finite()));
        assert!(density.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_with_device_layout_mismatch() {
        let device = CpuDevice::new(FieldLayout::new(
            GridDimensions::cubic(8),
            GridDimensions::cubic(8),
        ))
        .unwrap();
        let result = NebulaSimulation::with_device(small_config(), Box::new(device));
        assert!(matches!(result, Err(SimError::InvalidConfig(_))));
    }
}
