//! Compute device trait definition
//!
//! This module defines the `ComputeDevice` trait, the backend-agnostic interface
//! the simulation submits recorded ticks to. Both the CPU and GPU backends own
//! every field buffer of one session and implement this trait.

use super::command::CommandList;
use crate::error::SimResult;
use crate::grid::{BufferBindings, FieldId, FieldLayout};
use std::borrow::Cow;
use std::time::Duration;

/// Backend-agnostic command submission and field access
///
/// A device executes a [`CommandList`] in order: dispatches run their kernel,
/// barriers make earlier writes visible to later commands, and swaps flip the
/// device's ping-pong bits. Devices validate each list against their current
/// bindings before executing any of it.
pub trait ComputeDevice: Send + Sync {
    /// Grid extents of the simulation and backbone fields
    fn layout(&self) -> FieldLayout;

    /// Current ping-pong bits, as of the last submitted swap
    fn bindings(&self) -> BufferBindings;

    /// Validate and enqueue one command list
    ///
    /// # Errors
    ///
    /// `SimError::Submission` if the list is invalid or the device rejects it.
    fn submit(&mut self, commands: &CommandList) -> SimResult<()>;

    /// Block until submitted work completes or `timeout` expires
    ///
    /// # Errors
    ///
    /// `SimError::SynchronizationTimeout` when the wait expires.
    fn wait_idle(&mut self, timeout: Duration) -> SimResult<()>;

    /// Copy of a field's current slot
    ///
    /// CPU backend returns a borrowed slice, GPU backend reads back into an owned Vec.
    fn read_field(&self, field: FieldId) -> SimResult<Cow<'_, [f32]>>;

    /// Overwrite a field's current slot
    ///
    /// # Errors
    ///
    /// `SimError::Submission` if `data` does not match the field's cell count.
    fn write_field(&mut self, field: FieldId, data: &[f32]) -> SimResult<()>;

    /// Zero every field except the backbone and reset the ping-pong bits
    fn clear_transient(&mut self) -> SimResult<()>;

    /// `true` if GPU-accelerated, `false` if CPU-only
    fn is_gpu_accelerated(&self) -> bool;

    /// Short human-readable backend description
    fn backend_name(&self) -> &str;
}
