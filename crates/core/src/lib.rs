//! Nebula Simulation Core Library
//!
//! A Stable-Fluids style gas simulation that animates a procedurally seeded nebula
//! density volume for a raymarching renderer. Each tick injects emitter forcing,
//! diffuses and projects velocity, advects velocity and density semi-Lagrangianly,
//! and composites the simulated density into a finer static backbone field.
//!
//! ## Structure
//!
//! - `grid`: field layout, scalar fields and the ping-pong field store
//! - `solver`: compute kernels, tick recording with explicit barriers, and the
//!   CPU/GPU compute devices
//! - `simulation`: the `NebulaSimulation` session hosts drive
//! - `config`: JSON-loadable session configuration

// Core types and utilities
pub mod core_types;
pub mod error;

// Grid storage and solvers
pub mod grid;
pub mod solver;

// Session facade and configuration
pub mod config;
pub mod simulation;

// Re-export core types
pub use core_types::{Emitter, EmitterMotion, FalloffKernel, InjectionSource, Vec3};
pub use error::{SimError, SimResult};

// Re-export grid and solver types
pub use grid::{FieldId, FieldLayout, GridDimensions, ScalarField};
pub use solver::{
    CompositeMode, CompositeSettings, ComputeDevice, NoiseSettings, QualityPreset, SeedVector,
};

// Re-export session types
pub use config::{BackendPreference, ConfigError, SimulationConfig, SolverSettings, StepConstants};
pub use simulation::{FieldHandle, NebulaSimulation};
