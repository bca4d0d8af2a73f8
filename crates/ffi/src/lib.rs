//! C ABI for the nebula simulation
//!
//! Hosts create an opaque [`NebulaInstance`] with `nebula_initialize_field`, drive
//! it with `nebula_step`, read the composited density through
//! `nebula_get_renderable_field`, and release it with `nebula_destroy`. Failures
//! are reported through return values plus a thread-local last-error message
//! (`nebula_get_last_error`). The header `NebulaSimFFI.h` is generated by the
//! build script.

mod error;
mod helpers;
mod instance;
mod simulation;

pub use error::{nebula_get_last_error, nebula_get_last_error_code, NebulaErrorCode};
pub use instance::{nebula_destroy, nebula_initialize_field, NebulaFieldConfig, NebulaInstance};
pub use simulation::{
    nebula_get_renderable_field, nebula_get_tick_count, nebula_is_gpu_accelerated,
    nebula_regenerate, nebula_regenerate_random, nebula_step, NebulaFieldView,
};
