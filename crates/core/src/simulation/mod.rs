//! Simulation sessions
//!
//! This module provides [`NebulaSimulation`], the facade hosts drive: initialize,
//! regenerate, step, and read the renderable backbone.

mod nebula_simulation;

pub use nebula_simulation::{FieldHandle, NebulaSimulation};
