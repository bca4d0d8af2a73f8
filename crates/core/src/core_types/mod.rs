//! Core types and utilities

pub mod emitter;
pub mod vec3;

pub use emitter::{Emitter, EmitterMotion, FalloffKernel, InjectionSource};
pub use vec3::{transverse_basis, Vec3};
