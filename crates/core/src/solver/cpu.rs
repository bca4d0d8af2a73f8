//! CPU compute device
//!
//! This module provides a CPU implementation of the `ComputeDevice` trait using
//! `Vec<f32>` buffers and Rayon for parallelism. This backend is always available
//! and serves as the reference implementation and the fallback when GPU
//! acceleration is not available.
//!
//! Execution is synchronous: by the time `submit` returns every command has run,
//! so barriers need no work and `wait_idle` returns immediately.

use super::advection::advect_cpu;
use super::command::{Command, CommandList, Dispatch, Kernel, PRESSURE_SEED};
use super::composite::composite_cpu;
use super::diffusion::diffuse_step_cpu;
use super::injection::inject_cpu;
use super::profiler::ProfilerScope;
use super::projection::{divergence_cpu, pressure_step_cpu, subtract_gradient_cpu};
use super::ComputeDevice;
use crate::error::{SimError, SimResult};
use crate::grid::{BufferBindings, FieldId, FieldLayout, GridFieldStore, PhysicalBuffer, ScalarField};
use std::borrow::Cow;
use std::time::Duration;
use tracing::{debug, trace};

/// CPU device owning a [`GridFieldStore`]
#[derive(Debug)]
pub struct CpuDevice {
    store: GridFieldStore,
    submissions: u64,
}

impl CpuDevice {
    /// Allocate every field for `layout`
    ///
    /// # Errors
    ///
    /// Propagates allocation failures from the store.
    pub fn new(layout: FieldLayout) -> SimResult<Self> {
        let store = GridFieldStore::allocate(layout)?;
        debug!(
            "CPU device ready: grid {}, backbone {}, {} worker threads",
            layout.grid,
            layout.backbone,
            rayon::current_num_threads()
        );
        Ok(Self {
            store,
            submissions: 0,
        })
    }

    /// Direct access to the field store
    #[must_use]
    pub fn store(&self) -> &GridFieldStore {
        &self.store
    }

    /// Number of command lists executed so far
    #[must_use]
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    fn execute(&mut self, index: usize, dispatch: &Dispatch) -> SimResult<()> {
        let bindings = self.store.bindings();
        let reads: Vec<PhysicalBuffer> = dispatch.reads.iter().map(|r| r.resolve(&bindings)).collect();
        let writes: Vec<PhysicalBuffer> =
            dispatch.writes.iter().map(|w| w.resolve(&bindings)).collect();

        // Outputs leave the store for the duration of the kernel so inputs can be
        // borrowed alongside them; validation guarantees the two sets are disjoint.
        let mut outputs: Vec<ScalarField> = writes.iter().map(|&b| self.store.take(b)).collect();
        let result = {
            let inputs: Vec<&[f32]> = reads
                .iter()
                .map(|&b| self.store.buffer(b).as_slice())
                .collect();
            run_kernel(index, dispatch, &inputs, &mut outputs)
        };
        for (buffer, field) in writes.into_iter().zip(outputs) {
            self.store.restore(buffer, field);
        }
        result
    }
}

fn malformed(index: usize, kernel: Kernel) -> SimError {
    SimError::Submission(format!(
        "command {index}: {kernel:?} dispatch has unexpected bindings or parameters"
    ))
}

fn run_kernel(
    index: usize,
    dispatch: &Dispatch,
    inputs: &[&[f32]],
    outputs: &mut [ScalarField],
) -> SimResult<()> {
    let kernel = dispatch.kernel;
    let params = &dispatch.params;
    let dims = params.dimensions();

    if outputs.iter().any(|o| o.dimensions() != dims) {
        return Err(malformed(index, kernel));
    }

    match kernel {
        Kernel::Inject => {
            let source = params
                .injection_source()
                .ok_or_else(|| malformed(index, kernel))?;
            let ([vx, vy, vz, rho], [ox, oy, oz, orho]) = (inputs, outputs) else {
                return Err(malformed(index, kernel));
            };
            inject_cpu(
                dims,
                &source,
                [*vx, *vy, *vz, *rho],
                [
                    ox.as_mut_slice(),
                    oy.as_mut_slice(),
                    oz.as_mut_slice(),
                    orho.as_mut_slice(),
                ],
            );
        }
        Kernel::DiffuseStep => {
            let ([prev, guess], [out]) = (inputs, outputs) else {
                return Err(malformed(index, kernel));
            };
            diffuse_step_cpu(dims, params.rate(), prev, guess, out.as_mut_slice());
        }
        Kernel::Divergence => {
            let ([vx, vy, vz], [out]) = (inputs, outputs) else {
                return Err(malformed(index, kernel));
            };
            divergence_cpu(dims, vx, vy, vz, out.as_mut_slice());
        }
        Kernel::PressureStep => {
            let [out] = outputs else {
                return Err(malformed(index, kernel));
            };
            match (params.variant(), inputs) {
                (PRESSURE_SEED, [div]) => pressure_step_cpu(dims, div, None, out.as_mut_slice()),
                (_, [div, guess]) => {
                    pressure_step_cpu(dims, div, Some(*guess), out.as_mut_slice());
                }
                _ => return Err(malformed(index, kernel)),
            }
        }
        Kernel::SubtractGradient => {
            let ([vx, vy, vz, pressure], [ox, oy, oz]) = (inputs, outputs) else {
                return Err(malformed(index, kernel));
            };
            subtract_gradient_cpu(
                dims,
                [*vx, *vy, *vz],
                pressure,
                [ox.as_mut_slice(), oy.as_mut_slice(), oz.as_mut_slice()],
            );
        }
        Kernel::Advect => {
            let ([source, vx, vy, vz], [out]) = (inputs, outputs) else {
                return Err(malformed(index, kernel));
            };
            advect_cpu(dims, params.dt(), source, [*vx, *vy, *vz], out.as_mut_slice());
        }
        Kernel::Composite => {
            let (settings, sim) = params.composite().ok_or_else(|| malformed(index, kernel))?;
            let ([density], [backbone]) = (inputs, outputs) else {
                return Err(malformed(index, kernel));
            };
            if density.len() != sim.cell_count() {
                return Err(malformed(index, kernel));
            }
            composite_cpu(sim, dims, &settings, density, backbone.as_mut_slice());
        }
    }
    Ok(())
}

impl ComputeDevice for CpuDevice {
    fn layout(&self) -> FieldLayout {
        self.store.layout()
    }

    fn bindings(&self) -> BufferBindings {
        self.store.bindings()
    }

    fn submit(&mut self, commands: &CommandList) -> SimResult<()> {
        commands.validate(self.store.bindings())?;

        let mut stage_scope: Option<ProfilerScope> = None;
        for (index, command) in commands.commands().iter().enumerate() {
            match command {
                Command::Stage(stage) => {
                    // Dropping the previous scope logs its duration
                    stage_scope = Some(ProfilerScope::new(stage.name()));
                }
                Command::Dispatch(dispatch) => self.execute(index, dispatch)?,
                Command::Barrier => {}
                Command::Swap(field) => self.store.swap(*field),
            }
        }
        drop(stage_scope);

        self.submissions += 1;
        trace!(
            "CPU submission {} executed {} commands",
            self.submissions,
            commands.len()
        );
        Ok(())
    }

    fn wait_idle(&mut self, _timeout: Duration) -> SimResult<()> {
        Ok(())
    }

    fn read_field(&self, field: FieldId) -> SimResult<Cow<'_, [f32]>> {
        Ok(Cow::Borrowed(self.store.current(field).as_slice()))
    }

    fn write_field(&mut self, field: FieldId, data: &[f32]) -> SimResult<()> {
        self.store.current_mut(field).copy_from(data)
    }

    fn clear_transient(&mut self) -> SimResult<()> {
        self.store.clear_transient();
        Ok(())
    }

    fn is_gpu_accelerated(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &str {
        "CPU (rayon)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{FalloffKernel, InjectionSource, Vec3};
    use crate::grid::{BufferRef, GridDimensions};
    use approx::assert_relative_eq;

    fn device() -> CpuDevice {
        CpuDevice::new(FieldLayout::new(
            GridDimensions::cubic(8),
            GridDimensions::cubic(8),
        ))
        .unwrap()
    }

    fn source() -> InjectionSource {
        InjectionSource {
            position: Vec3::new(4.0, 4.0, 4.0),
            radius: 2.0,
            velocity: Vec3::new(1.0, 0.0, 0.0),
            density_amount: 2.0,
            falloff: FalloffKernel::Constant,
        }
    }

    #[test]
    fn test_inject_then_swap() {
        let mut dev = device();
        let dims = dev.layout().grid;
        let mut list = CommandList::new();
        list.dispatch(Dispatch::inject(dims, &source()));
        list.barrier();
        for field in FieldId::SIMULATED {
            list.swap(field);
        }
        dev.submit(&list).unwrap();

        let density = dev.read_field(FieldId::Density).unwrap();
        assert_relative_eq!(density[dims.index(4, 4, 4)], 2.0);
        assert_eq!(density[0], 0.0);
        let vx = dev.read_field(FieldId::VelocityX).unwrap();
        assert_relative_eq!(vx[dims.index(5, 4, 4)], 1.0);
        assert_eq!(dev.submissions(), 1);
    }

    #[test]
    fn test_missing_barrier_rejected_before_execution() {
        let mut dev = device();
        let dims = dev.layout().grid;
        let mut list = CommandList::new();
        list.dispatch(Dispatch::inject(dims, &source()));
        list.swap(FieldId::Density);
        list.barrier();

        assert!(matches!(dev.submit(&list), Err(SimError::Submission(_))));
        // Nothing ran: both slots are still zero and no swap was applied
        assert_eq!(dev.bindings(), BufferBindings::default());
        assert_eq!(dev.store().current(FieldId::Density).max(), 0.0);
        assert_eq!(
            dev.store()
                .buffer(BufferRef::Scratch(FieldId::Density).resolve(&dev.bindings()))
                .max(),
            0.0
        );
    }

    #[test]
    fn test_write_and_clear() {
        let mut dev = device();
        let n = dev.layout().backbone.cell_count();
        dev.write_field(FieldId::Backbone, &vec![0.5; n]).unwrap();
        dev.write_field(FieldId::Density, &vec![1.0; n]).unwrap();
        assert!(dev.write_field(FieldId::Density, &[1.0]).is_err());

        dev.clear_transient().unwrap();
        assert_eq!(dev.read_field(FieldId::Density).unwrap().iter().sum::<f32>(), 0.0);
        assert_eq!(dev.read_field(FieldId::Backbone).unwrap()[0], 0.5);
    }

    #[test]
    fn test_wrong_extent_rejected() {
        let mut dev = device();
        let mut list = CommandList::new();
        list.dispatch(Dispatch::divergence(GridDimensions::cubic(4)));
        list.barrier();
        assert!(dev.submit(&list).is_err());
    }
}
