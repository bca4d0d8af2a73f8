//! Field storage with ping-pong slots
//!
//! Every double-buffered field owns two physical slots (A and B) and one bit in
//! [`BufferBindings`] that selects which slot is current. Swapping flips the bit;
//! data is never copied. Kernels read the current slot and write the scratch slot,
//! and the command list validator checks that discipline before anything runs.

use super::dimensions::{FieldLayout, GridDimensions};
use super::field::ScalarField;
use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Logical field identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldId {
    Density,
    VelocityX,
    VelocityY,
    VelocityZ,
    /// Relaxation iterate and pressure (double-buffered, solver-internal)
    Scratch,
    /// Velocity divergence (single-buffered, solver-internal)
    Divergence,
    /// Persistent seeded density sampled by the renderer (single-buffered)
    Backbone,
}

impl FieldId {
    pub const ALL: [Self; 7] = [
        Self::Density,
        Self::VelocityX,
        Self::VelocityY,
        Self::VelocityZ,
        Self::Scratch,
        Self::Divergence,
        Self::Backbone,
    ];

    pub const VELOCITY: [Self; 3] = [Self::VelocityX, Self::VelocityY, Self::VelocityZ];

    /// Fields carrying simulation state between ticks
    pub const SIMULATED: [Self; 4] = [
        Self::Density,
        Self::VelocityX,
        Self::VelocityY,
        Self::VelocityZ,
    ];

    /// Position in [`ALL`](Self::ALL)
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn is_double_buffered(self) -> bool {
        !matches!(self, Self::Divergence | Self::Backbone)
    }

    /// Everything except the backbone lives on the simulation grid
    #[must_use]
    pub const fn on_backbone_grid(self) -> bool {
        matches!(self, Self::Backbone)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Density => "density",
            Self::VelocityX => "velocity_x",
            Self::VelocityY => "velocity_y",
            Self::VelocityZ => "velocity_z",
            Self::Scratch => "scratch",
            Self::Divergence => "divergence",
            Self::Backbone => "backbone",
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One of the two physical instances of a double-buffered field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

/// A concrete storage buffer: field plus slot
///
/// Single-buffered fields only ever use slot A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalBuffer {
    pub field: FieldId,
    pub slot: Slot,
}

impl fmt::Display for PhysicalBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_double_buffered() {
            write!(f, "{}[{:?}]", self.field, self.slot)
        } else {
            write!(f, "{}", self.field)
        }
    }
}

/// Buffer named relative to the ping-pong state at the time a command executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRef {
    Current(FieldId),
    Scratch(FieldId),
}

impl BufferRef {
    #[must_use]
    pub const fn field(self) -> FieldId {
        match self {
            Self::Current(field) | Self::Scratch(field) => field,
        }
    }

    /// Resolve against the given bindings
    ///
    /// The scratch slot of a single-buffered field is its only slot.
    #[must_use]
    pub fn resolve(self, bindings: &BufferBindings) -> PhysicalBuffer {
        let field = self.field();
        let slot = match self {
            Self::Current(_) => bindings.current_slot(field),
            Self::Scratch(_) => bindings.scratch_slot(field),
        };
        PhysicalBuffer { field, slot }
    }
}

/// Current-slot bits for every double-buffered field
///
/// A set bit means slot B is current.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferBindings {
    bits: u8,
}

impl BufferBindings {
    #[must_use]
    pub fn current_slot(&self, field: FieldId) -> Slot {
        if field.is_double_buffered() && self.bits & (1 << field.index()) != 0 {
            Slot::B
        } else {
            Slot::A
        }
    }

    #[must_use]
    pub fn scratch_slot(&self, field: FieldId) -> Slot {
        if field.is_double_buffered() {
            self.current_slot(field).other()
        } else {
            Slot::A
        }
    }

    /// Flip the current bit; single-buffered fields are unaffected
    pub fn swap(&mut self, field: FieldId) {
        if field.is_double_buffered() {
            self.bits ^= 1 << field.index();
        }
    }
}

/// Owner of every field buffer on the CPU device
#[derive(Debug)]
pub struct GridFieldStore {
    layout: FieldLayout,
    bindings: BufferBindings,
    /// Indexed by `FieldId::index()`, then `Slot::index()`; single-buffered fields
    /// keep an empty placeholder in slot B.
    buffers: Vec<[ScalarField; 2]>,
}

impl GridFieldStore {
    /// Allocate zero-filled storage for every field
    ///
    /// # Errors
    ///
    /// `SimError::InvalidConfig` for zero dimensions, `SimError::ResourceAllocation`
    /// if any buffer cannot be reserved.
    pub fn allocate(layout: FieldLayout) -> SimResult<Self> {
        layout.validate()?;

        let mut buffers = Vec::new();
        buffers
            .try_reserve_exact(FieldId::ALL.len())
            .map_err(|_| SimError::ResourceAllocation {
                what: "field table".to_string(),
                bytes: 0,
            })?;

        for field in FieldId::ALL {
            let dims = Self::dimensions_for(layout, field);
            let a = ScalarField::try_new(dims, &format!("{field} A"))?;
            let b = if field.is_double_buffered() {
                ScalarField::try_new(dims, &format!("{field} B"))?
            } else {
                ScalarField::default()
            };
            buffers.push([a, b]);
        }

        let simulated_bytes = layout.grid.byte_size() * 11;
        debug!(
            "Allocated field store: grid {}, backbone {} ({} MiB)",
            layout.grid,
            layout.backbone,
            (simulated_bytes + layout.backbone.byte_size()) / (1024 * 1024)
        );

        Ok(Self {
            layout,
            bindings: BufferBindings::default(),
            buffers,
        })
    }

    fn dimensions_for(layout: FieldLayout, field: FieldId) -> GridDimensions {
        if field.on_backbone_grid() {
            layout.backbone
        } else {
            layout.grid
        }
    }

    #[must_use]
    pub fn layout(&self) -> FieldLayout {
        self.layout
    }

    #[must_use]
    pub fn bindings(&self) -> BufferBindings {
        self.bindings
    }

    /// Flip the current slot of a double-buffered field. Never copies.
    pub fn swap(&mut self, field: FieldId) {
        self.bindings.swap(field);
    }

    #[must_use]
    pub fn buffer(&self, buffer: PhysicalBuffer) -> &ScalarField {
        &self.buffers[buffer.field.index()][buffer.slot.index()]
    }

    pub fn buffer_mut(&mut self, buffer: PhysicalBuffer) -> &mut ScalarField {
        &mut self.buffers[buffer.field.index()][buffer.slot.index()]
    }

    /// Move a buffer out, leaving an empty placeholder until [`restore`](Self::restore)
    pub fn take(&mut self, buffer: PhysicalBuffer) -> ScalarField {
        std::mem::take(self.buffer_mut(buffer))
    }

    pub fn restore(&mut self, buffer: PhysicalBuffer, field: ScalarField) {
        *self.buffer_mut(buffer) = field;
    }

    #[must_use]
    pub fn current(&self, field: FieldId) -> &ScalarField {
        self.buffer(BufferRef::Current(field).resolve(&self.bindings))
    }

    pub fn current_mut(&mut self, field: FieldId) -> &mut ScalarField {
        let buffer = BufferRef::Current(field).resolve(&self.bindings);
        self.buffer_mut(buffer)
    }

    pub fn scratch_mut(&mut self, field: FieldId) -> &mut ScalarField {
        let buffer = BufferRef::Scratch(field).resolve(&self.bindings);
        self.buffer_mut(buffer)
    }

    #[must_use]
    pub fn backbone(&self) -> &ScalarField {
        self.current(FieldId::Backbone)
    }

    pub fn backbone_mut(&mut self) -> &mut ScalarField {
        self.current_mut(FieldId::Backbone)
    }

    /// Zero every field except the backbone and reset the ping-pong bits
    pub fn clear_transient(&mut self) {
        for field in FieldId::ALL {
            if field == FieldId::Backbone {
                continue;
            }
            for slot in &mut self.buffers[field.index()] {
                slot.fill(0.0);
            }
        }
        self.bindings = BufferBindings::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_layout() -> FieldLayout {
        FieldLayout::new(GridDimensions::cubic(4), GridDimensions::cubic(8))
    }

    #[test]
    fn test_allocate_zeroed() {
        let store = GridFieldStore::allocate(small_layout()).unwrap();
        for field in FieldId::SIMULATED {
            assert_eq!(store.current(field).len(), 64);
            assert!(store.current(field).as_slice().iter().all(|&v| v == 0.0));
        }
        assert_eq!(store.backbone().len(), 512);
        assert_eq!(store.current(FieldId::Divergence).len(), 64);
    }

    #[test]
    fn test_allocate_rejects_zero_dimensions() {
        let layout = FieldLayout::new(GridDimensions::new(4, 0, 4), GridDimensions::cubic(8));
        assert!(matches!(
            GridFieldStore::allocate(layout),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_swap_flips_without_copy() {
        let mut store = GridFieldStore::allocate(small_layout()).unwrap();
        store.scratch_mut(FieldId::Density).fill(2.0);
        assert_eq!(store.current(FieldId::Density).max(), 0.0);

        store.swap(FieldId::Density);
        assert_eq!(store.current(FieldId::Density).max(), 2.0);
        assert_eq!(
            store.bindings().current_slot(FieldId::Density),
            Slot::B
        );

        store.swap(FieldId::Density);
        assert_eq!(store.current(FieldId::Density).max(), 0.0);
    }

    #[test]
    fn test_single_buffered_swap_is_noop() {
        let mut store = GridFieldStore::allocate(small_layout()).unwrap();
        store.backbone_mut().fill(1.0);
        store.swap(FieldId::Backbone);
        assert_eq!(store.backbone().max(), 1.0);
        assert_eq!(
            BufferRef::Scratch(FieldId::Backbone).resolve(&store.bindings()),
            BufferRef::Current(FieldId::Backbone).resolve(&store.bindings())
        );
    }

    #[test]
    fn test_clear_transient_keeps_backbone() {
        let mut store = GridFieldStore::allocate(small_layout()).unwrap();
        store.backbone_mut().fill(0.7);
        store.scratch_mut(FieldId::VelocityX).fill(3.0);
        store.swap(FieldId::VelocityX);

        store.clear_transient();
        assert_eq!(store.bindings(), BufferBindings::default());
        assert_eq!(store.current(FieldId::VelocityX).max(), 0.0);
        assert_eq!(store.backbone().max(), 0.7);
    }

    #[test]
    fn test_take_restore() {
        let mut store = GridFieldStore::allocate(small_layout()).unwrap();
        let buffer = BufferRef::Scratch(FieldId::Density).resolve(&store.bindings());
        let mut field = store.take(buffer);
        assert!(store.buffer(buffer).is_empty());
        field.fill(5.0);
        store.restore(buffer, field);
        assert_eq!(store.buffer(buffer).max(), 5.0);
    }
}
