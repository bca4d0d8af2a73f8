//! Recorded device commands and hazard validation
//!
//! A tick is recorded as an ordered [`CommandList`] of dispatches, barriers and
//! swaps. Dispatches name their buffers relative to the ping-pong state
//! ([`BufferRef`]); swaps flip that state as the list executes. Both devices replay
//! the list in order, and both validate it first so a missing barrier is caught
//! before any data is touched.

use crate::core_types::{FalloffKernel, InjectionSource, Vec3};
use crate::error::SimError;
use crate::grid::{BufferBindings, BufferRef, FieldId, GridDimensions, PhysicalBuffer};
use rustc_hash::FxHashSet;
use thiserror::Error;

use super::composite::{CompositeMode, CompositeSettings};
use super::scheduler::TickStage;

// Helper to convert u32 to f32, centralizing the intentional precision loss
#[inline]
#[expect(clippy::cast_precision_loss)]
fn u32_to_f32(v: u32) -> f32 {
    v as f32
}

#[inline]
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn f32_to_u32(v: f32) -> u32 {
    v.max(0.0).round() as u32
}

/// Compute kernel selected by a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Inject,
    DiffuseStep,
    Divergence,
    PressureStep,
    SubtractGradient,
    Advect,
    Composite,
}

impl Kernel {
    pub const ALL: [Self; 7] = [
        Self::Inject,
        Self::DiffuseStep,
        Self::Divergence,
        Self::PressureStep,
        Self::SubtractGradient,
        Self::Advect,
        Self::Composite,
    ];

    /// WGSL entry point implementing this kernel
    #[must_use]
    pub const fn entry_point(self) -> &'static str {
        match self {
            Self::Inject => "inject",
            Self::DiffuseStep => "diffuse_step",
            Self::Divergence => "divergence",
            Self::PressureStep => "pressure_step",
            Self::SubtractGradient => "subtract_gradient",
            Self::Advect => "advect",
            Self::Composite => "composite",
        }
    }

    /// Accepted `(reads, writes)` buffer counts
    const fn arity(self) -> (std::ops::RangeInclusive<usize>, usize) {
        match self {
            Self::Inject => (4..=4, 4),
            Self::DiffuseStep => (2..=2, 1),
            Self::Divergence => (3..=3, 1),
            Self::PressureStep => (1..=2, 1),
            Self::SubtractGradient => (4..=4, 3),
            Self::Advect => (4..=4, 1),
            Self::Composite => (1..=1, 1),
        }
    }

    /// Whether the kernel reads back its own output per cell
    #[must_use]
    pub const fn updates_in_place(self) -> bool {
        matches!(self, Self::Composite)
    }
}

/// 64-byte per-dispatch parameter block
///
/// Layout is shared with the WGSL `Params` struct:
///
/// - `grid_size`: dispatch extent, `w` selects the kernel variant
/// - `scalars`: `dt`, `rate`/coefficient, `blend`, `threshold`
/// - `position_radius`: emitter position and radius
/// - `velocity_density`: emitter velocity and density amount
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "gpu", derive(bytemuck::Pod, bytemuck::Zeroable))]
pub struct ParamBlock {
    pub grid_size: [u32; 4],
    pub scalars: [f32; 4],
    pub position_radius: [f32; 4],
    pub velocity_density: [f32; 4],
}

impl ParamBlock {
    fn for_grid(dims: GridDimensions, variant: u32) -> Self {
        Self {
            grid_size: [dims.width, dims.height, dims.depth, variant],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> GridDimensions {
        GridDimensions::new(self.grid_size[0], self.grid_size[1], self.grid_size[2])
    }

    #[must_use]
    pub const fn variant(&self) -> u32 {
        self.grid_size[3]
    }

    #[must_use]
    pub const fn dt(&self) -> f32 {
        self.scalars[0]
    }

    #[must_use]
    pub const fn rate(&self) -> f32 {
        self.scalars[1]
    }

    /// Emitter encoded by [`Dispatch::inject`]
    #[must_use]
    pub fn injection_source(&self) -> Option<InjectionSource> {
        let [px, py, pz, radius] = self.position_radius;
        let [vx, vy, vz, density_amount] = self.velocity_density;
        Some(InjectionSource {
            position: Vec3::new(px, py, pz),
            radius,
            velocity: Vec3::new(vx, vy, vz),
            density_amount,
            falloff: FalloffKernel::from_selector(self.variant())?,
        })
    }

    /// Compositing settings and source grid encoded by [`Dispatch::composite`]
    #[must_use]
    pub fn composite(&self) -> Option<(CompositeSettings, GridDimensions)> {
        let mode = CompositeMode::from_selector(self.variant())?;
        let settings = CompositeSettings {
            mode,
            strength: self.scalars[2],
            threshold: self.scalars[3],
            ceiling: self.scalars[1],
        };
        let [w, h, d, _] = self.velocity_density;
        let source = GridDimensions::new(f32_to_u32(w), f32_to_u32(h), f32_to_u32(d));
        Some((settings, source))
    }
}

/// Pressure sweep variants
pub const PRESSURE_SEED: u32 = 0;
pub const PRESSURE_ITERATE: u32 = 1;

/// One kernel invocation over a grid
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub kernel: Kernel,
    /// Read-only inputs, bound in order
    pub reads: Vec<BufferRef>,
    /// Outputs, bound in order after the inputs
    pub writes: Vec<BufferRef>,
    pub params: ParamBlock,
}

impl Dispatch {
    /// `scratch = current + forcing` for the three velocity axes and density
    #[must_use]
    pub fn inject(dims: GridDimensions, source: &InjectionSource) -> Self {
        let mut params = ParamBlock::for_grid(dims, source.falloff.selector());
        params.position_radius = [
            source.position.x,
            source.position.y,
            source.position.z,
            source.radius,
        ];
        params.velocity_density = [
            source.velocity.x,
            source.velocity.y,
            source.velocity.z,
            source.density_amount,
        ];
        Self {
            kernel: Kernel::Inject,
            reads: vec![
                BufferRef::Current(FieldId::VelocityX),
                BufferRef::Current(FieldId::VelocityY),
                BufferRef::Current(FieldId::VelocityZ),
                BufferRef::Current(FieldId::Density),
            ],
            writes: vec![
                BufferRef::Scratch(FieldId::VelocityX),
                BufferRef::Scratch(FieldId::VelocityY),
                BufferRef::Scratch(FieldId::VelocityZ),
                BufferRef::Scratch(FieldId::Density),
            ],
            params,
        }
    }

    /// One Jacobi diffusion sweep of `field` with coefficient `a = rate · dt`
    #[must_use]
    pub fn diffuse_step(
        dims: GridDimensions,
        field: FieldId,
        a: f32,
        guess: BufferRef,
        target: BufferRef,
    ) -> Self {
        let mut params = ParamBlock::for_grid(dims, 0);
        params.scalars[1] = a;
        Self {
            kernel: Kernel::DiffuseStep,
            reads: vec![BufferRef::Current(field), guess],
            writes: vec![target],
            params,
        }
    }

    #[must_use]
    pub fn divergence(dims: GridDimensions) -> Self {
        Self {
            kernel: Kernel::Divergence,
            reads: FieldId::VELOCITY.map(BufferRef::Current).to_vec(),
            writes: vec![BufferRef::Current(FieldId::Divergence)],
            params: ParamBlock::for_grid(dims, 0),
        }
    }

    /// Pressure sweep into the scratch slot of [`FieldId::Scratch`]
    ///
    /// The seed sweep reads only the divergence; later sweeps also read the
    /// current pressure iterate.
    #[must_use]
    pub fn pressure_step(dims: GridDimensions, seed: bool) -> Self {
        let (variant, reads) = if seed {
            (PRESSURE_SEED, vec![BufferRef::Current(FieldId::Divergence)])
        } else {
            (
                PRESSURE_ITERATE,
                vec![
                    BufferRef::Current(FieldId::Divergence),
                    BufferRef::Current(FieldId::Scratch),
                ],
            )
        };
        Self {
            kernel: Kernel::PressureStep,
            reads,
            writes: vec![BufferRef::Scratch(FieldId::Scratch)],
            params: ParamBlock::for_grid(dims, variant),
        }
    }

    #[must_use]
    pub fn subtract_gradient(dims: GridDimensions) -> Self {
        let mut reads = FieldId::VELOCITY.map(BufferRef::Current).to_vec();
        reads.push(BufferRef::Current(FieldId::Scratch));
        Self {
            kernel: Kernel::SubtractGradient,
            reads,
            writes: FieldId::VELOCITY.map(BufferRef::Scratch).to_vec(),
            params: ParamBlock::for_grid(dims, 0),
        }
    }

    /// Advect `field` along the current velocity into its scratch slot
    #[must_use]
    pub fn advect(dims: GridDimensions, field: FieldId, dt: f32) -> Self {
        let mut params = ParamBlock::for_grid(dims, 0);
        params.scalars[0] = dt;
        let mut reads = vec![BufferRef::Current(field)];
        reads.extend(FieldId::VELOCITY.map(BufferRef::Current));
        Self {
            kernel: Kernel::Advect,
            reads,
            writes: vec![BufferRef::Scratch(field)],
            params,
        }
    }

    /// Blend current density into the backbone in place
    #[must_use]
    pub fn composite(
        sim: GridDimensions,
        backbone: GridDimensions,
        settings: &CompositeSettings,
    ) -> Self {
        let mut params = ParamBlock::for_grid(backbone, settings.mode.selector());
        params.scalars = [0.0, settings.ceiling, settings.strength, settings.threshold];
        params.velocity_density = [
            u32_to_f32(sim.width),
            u32_to_f32(sim.height),
            u32_to_f32(sim.depth),
            0.0,
        ];
        Self {
            kernel: Kernel::Composite,
            reads: vec![BufferRef::Current(FieldId::Density)],
            writes: vec![BufferRef::Current(FieldId::Backbone)],
            params,
        }
    }
}

/// One recorded command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Marks the start of a tick stage (profiling and logging only)
    Stage(TickStage),
    Dispatch(Dispatch),
    /// Every write before the barrier is visible to every command after it
    Barrier,
    /// Flip the current slot of a double-buffered field
    Swap(FieldId),
}

/// Ordering violation found while validating a command list
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Hazard {
    #[error("command {index}: {kernel:?} dispatch reads {buffer} written since the last barrier")]
    ReadAfterWrite {
        index: usize,
        kernel: Kernel,
        buffer: PhysicalBuffer,
    },
    #[error("command {index}: {kernel:?} dispatch writes {buffer} already written since the last barrier")]
    WriteAfterWrite {
        index: usize,
        kernel: Kernel,
        buffer: PhysicalBuffer,
    },
    #[error("command {index}: {kernel:?} dispatch writes {buffer} read since the last barrier")]
    WriteAfterRead {
        index: usize,
        kernel: Kernel,
        buffer: PhysicalBuffer,
    },
    #[error("command {index}: {kernel:?} dispatch reads and writes {buffer}")]
    Aliased {
        index: usize,
        kernel: Kernel,
        buffer: PhysicalBuffer,
    },
    #[error("command {index}: in-place {kernel:?} dispatch targets double-buffered {field}")]
    InPlaceOnDoubleBuffered {
        index: usize,
        kernel: Kernel,
        field: FieldId,
    },
    #[error("command {index}: swap of {field} written since the last barrier")]
    SwapBeforeBarrier { index: usize, field: FieldId },
    #[error("command {index}: {kernel:?} dispatch binds {reads} inputs and {writes} outputs")]
    Malformed {
        index: usize,
        kernel: Kernel,
        reads: usize,
        writes: usize,
    },
    #[error("command list ends with writes not followed by a barrier")]
    MissingFinalBarrier,
}

impl From<Hazard> for SimError {
    fn from(hazard: Hazard) -> Self {
        Self::Submission(hazard.to_string())
    }
}

/// Ordered commands for one submission
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, stage: TickStage) {
        self.commands.push(Command::Stage(stage));
    }

    pub fn dispatch(&mut self, dispatch: Dispatch) {
        self.commands.push(Command::Dispatch(dispatch));
    }

    pub fn barrier(&mut self) {
        self.commands.push(Command::Barrier);
    }

    pub fn swap(&mut self, field: FieldId) {
        self.commands.push(Command::Swap(field));
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn dispatch_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Dispatch(_)))
            .count()
    }

    /// Replay the list against `initial` bindings and check ordering
    ///
    /// Returns the bindings after every swap has been applied.
    ///
    /// # Errors
    ///
    /// The first [`Hazard`] found, in command order.
    pub fn validate(&self, initial: BufferBindings) -> Result<BufferBindings, Hazard> {
        let mut bindings = initial;
        let mut pending_writes: FxHashSet<PhysicalBuffer> = FxHashSet::default();
        let mut pending_reads: FxHashSet<PhysicalBuffer> = FxHashSet::default();

        for (index, command) in self.commands.iter().enumerate() {
            match command {
                Command::Stage(_) => {}
                Command::Barrier => {
                    pending_writes.clear();
                    pending_reads.clear();
                }
                Command::Swap(field) => {
                    if pending_writes.iter().any(|b| b.field == *field) {
                        return Err(Hazard::SwapBeforeBarrier {
                            index,
                            field: *field,
                        });
                    }
                    bindings.swap(*field);
                }
                Command::Dispatch(dispatch) => {
                    Self::validate_dispatch(
                        index,
                        dispatch,
                        &bindings,
                        &mut pending_writes,
                        &mut pending_reads,
                    )?;
                }
            }
        }

        if pending_writes.is_empty() {
            Ok(bindings)
        } else {
            Err(Hazard::MissingFinalBarrier)
        }
    }

    fn validate_dispatch(
        index: usize,
        dispatch: &Dispatch,
        bindings: &BufferBindings,
        pending_writes: &mut FxHashSet<PhysicalBuffer>,
        pending_reads: &mut FxHashSet<PhysicalBuffer>,
    ) -> Result<(), Hazard> {
        let kernel = dispatch.kernel;
        let (read_arity, write_arity) = kernel.arity();
        if !read_arity.contains(&dispatch.reads.len()) || dispatch.writes.len() != write_arity {
            return Err(Hazard::Malformed {
                index,
                kernel,
                reads: dispatch.reads.len(),
                writes: dispatch.writes.len(),
            });
        }

        let reads: Vec<PhysicalBuffer> = dispatch.reads.iter().map(|r| r.resolve(bindings)).collect();
        let writes: Vec<PhysicalBuffer> =
            dispatch.writes.iter().map(|w| w.resolve(bindings)).collect();

        for read in &reads {
            if writes.contains(read) {
                return Err(Hazard::Aliased {
                    index,
                    kernel,
                    buffer: *read,
                });
            }
            if pending_writes.contains(read) {
                return Err(Hazard::ReadAfterWrite {
                    index,
                    kernel,
                    buffer: *read,
                });
            }
        }

        for (i, write) in writes.iter().enumerate() {
            if writes[..i].contains(write) {
                return Err(Hazard::Aliased {
                    index,
                    kernel,
                    buffer: *write,
                });
            }
            if kernel.updates_in_place() && write.field.is_double_buffered() {
                return Err(Hazard::InPlaceOnDoubleBuffered {
                    index,
                    kernel,
                    field: write.field,
                });
            }
            if pending_writes.contains(write) {
                return Err(Hazard::WriteAfterWrite {
                    index,
                    kernel,
                    buffer: *write,
                });
            }
            if pending_reads.contains(write) {
                return Err(Hazard::WriteAfterRead {
                    index,
                    kernel,
                    buffer: *write,
                });
            }
        }

        pending_reads.extend(reads);
        pending_writes.extend(writes.iter().copied());
        if kernel.updates_in_place() {
            // In-place outputs are also inputs for later writers
            pending_reads.extend(writes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> GridDimensions {
        GridDimensions::cubic(8)
    }

    fn advect_all(list: &mut CommandList) {
        for field in FieldId::VELOCITY {
            list.dispatch(Dispatch::advect(dims(), field, 0.1));
        }
    }

    #[test]
    fn test_param_block_is_64_bytes() {
        assert_eq!(std::mem::size_of::<ParamBlock>(), 64);
    }

    #[test]
    fn test_injection_params_round_trip() {
        let source = InjectionSource {
            position: Vec3::new(1.0, 2.0, 3.0),
            radius: 4.0,
            velocity: Vec3::new(-1.0, 0.5, 0.0),
            density_amount: 0.8,
            falloff: FalloffKernel::Gaussian,
        };
        let dispatch = Dispatch::inject(dims(), &source);
        assert_eq!(dispatch.params.injection_source(), Some(source));
        assert_eq!(dispatch.params.dimensions(), dims());
    }

    #[test]
    fn test_composite_params_round_trip() {
        let settings = CompositeSettings {
            mode: CompositeMode::Threshold,
            strength: 0.25,
            threshold: 0.1,
            ceiling: 2.0,
        };
        let dispatch = Dispatch::composite(dims(), GridDimensions::cubic(16), &settings);
        assert_eq!(dispatch.params.composite(), Some((settings, dims())));
        assert_eq!(dispatch.params.dimensions(), GridDimensions::cubic(16));
    }

    #[test]
    fn test_parallel_advection_then_barrier_is_valid() {
        let mut list = CommandList::new();
        advect_all(&mut list);
        list.barrier();
        for field in FieldId::VELOCITY {
            list.swap(field);
        }
        let bindings = list.validate(BufferBindings::default()).unwrap();
        for field in FieldId::VELOCITY {
            assert_eq!(bindings.current_slot(field), crate::grid::Slot::B);
        }
    }

    #[test]
    fn test_swap_before_barrier_rejected() {
        let mut list = CommandList::new();
        advect_all(&mut list);
        list.swap(FieldId::VelocityX);
        assert!(matches!(
            list.validate(BufferBindings::default()),
            Err(Hazard::SwapBeforeBarrier {
                field: FieldId::VelocityX,
                ..
            })
        ));
    }

    #[test]
    fn test_read_after_write_rejected() {
        let mut list = CommandList::new();
        list.dispatch(Dispatch::divergence(dims()));
        list.dispatch(Dispatch::pressure_step(dims(), true));
        assert!(matches!(
            list.validate(BufferBindings::default()),
            Err(Hazard::ReadAfterWrite {
                kernel: Kernel::PressureStep,
                ..
            })
        ));
    }

    #[test]
    fn test_write_after_write_rejected() {
        let mut list = CommandList::new();
        list.dispatch(Dispatch::pressure_step(dims(), true));
        list.dispatch(Dispatch::pressure_step(dims(), true));
        assert!(matches!(
            list.validate(BufferBindings::default()),
            Err(Hazard::WriteAfterWrite { .. })
        ));
    }

    #[test]
    fn test_write_after_read_rejected() {
        let mut list = CommandList::new();
        list.dispatch(Dispatch::pressure_step(dims(), true));
        list.barrier();
        list.dispatch(Dispatch::subtract_gradient(dims()));
        // Overwrites the pressure the subtract pass is still reading
        list.dispatch(Dispatch::diffuse_step(
            dims(),
            FieldId::Density,
            0.1,
            BufferRef::Current(FieldId::Density),
            BufferRef::Current(FieldId::Scratch),
        ));
        assert!(matches!(
            list.validate(BufferBindings::default()),
            Err(Hazard::WriteAfterRead { .. })
        ));
    }

    #[test]
    fn test_aliasing_rejected() {
        let mut list = CommandList::new();
        list.dispatch(Dispatch::diffuse_step(
            dims(),
            FieldId::Density,
            0.1,
            BufferRef::Current(FieldId::Density),
            BufferRef::Current(FieldId::Density),
        ));
        list.barrier();
        assert!(matches!(
            list.validate(BufferBindings::default()),
            Err(Hazard::Aliased { .. })
        ));
    }

    #[test]
    fn test_in_place_composite_allowed_on_backbone() {
        let mut list = CommandList::new();
        list.dispatch(Dispatch::composite(
            dims(),
            GridDimensions::cubic(16),
            &CompositeSettings::default(),
        ));
        list.barrier();
        assert!(list.validate(BufferBindings::default()).is_ok());

        let mut bad = Dispatch::composite(dims(), dims(), &CompositeSettings::default());
        bad.writes = vec![BufferRef::Current(FieldId::Density)];
        bad.reads = vec![BufferRef::Current(FieldId::VelocityX)];
        let mut list = CommandList::new();
        list.dispatch(bad);
        list.barrier();
        assert!(matches!(
            list.validate(BufferBindings::default()),
            Err(Hazard::InPlaceOnDoubleBuffered { .. })
        ));
    }

    #[test]
    fn test_missing_final_barrier_rejected() {
        let mut list = CommandList::new();
        list.dispatch(Dispatch::divergence(dims()));
        assert_eq!(
            list.validate(BufferBindings::default()),
            Err(Hazard::MissingFinalBarrier)
        );
    }

    #[test]
    fn test_malformed_dispatch_rejected() {
        let mut dispatch = Dispatch::divergence(dims());
        dispatch.reads.pop();
        let mut list = CommandList::new();
        list.dispatch(dispatch);
        list.barrier();
        assert!(matches!(
            list.validate(BufferBindings::default()),
            Err(Hazard::Malformed { reads: 2, .. })
        ));
    }

    #[test]
    fn test_hazard_maps_to_submission_error() {
        let err: SimError = Hazard::MissingFinalBarrier.into();
        assert!(matches!(err, SimError::Submission(_)));
    }
}
