//! Grid geometry and field storage

pub mod dimensions;
pub mod field;
pub mod store;

pub use dimensions::{FieldLayout, GridDimensions, Neighbors};
pub use field::ScalarField;
pub use store::{BufferBindings, BufferRef, FieldId, GridFieldStore, PhysicalBuffer, Slot};
