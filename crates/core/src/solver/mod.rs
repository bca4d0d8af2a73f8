//! Stable-fluids solver module
//!
//! This module provides the compute kernels, the per-tick command recording and a
//! unified GPU/CPU device abstraction. The core abstraction is the `ComputeDevice`
//! trait, which has both CPU and GPU implementations executing the same
//! [`CommandList`].
//!
//! # Feature Flags
//!
//! - `gpu`: Enables GPU acceleration via wgpu. Without it only the CPU device is
//!   built.
//!
//! # Backend Selection
//!
//! [`create_device`] picks a backend from the configured preference:
//! 1. Try GPU (if `gpu` feature enabled, not forced to CPU, and hardware available)
//! 2. Fall back to CPU (always available)
//!
//! # Example
//!
//! ```rust,ignore
//! use nebula_sim_core::solver::create_device;
//! use nebula_sim_core::SimulationConfig;
//!
//! let device = create_device(&SimulationConfig::default())?;
//! println!("running on {}", device.backend_name());
//! ```

pub mod advection;
pub mod command;
pub mod composite;
mod context;
mod cpu;
pub mod diffusion;
pub mod injection;
pub mod noise;
pub mod profiler;
pub mod projection;
mod quality;
pub mod scheduler;
#[allow(clippy::module_name_repetitions)]
mod r#trait;

#[cfg(feature = "gpu")]
mod gpu;

// Re-exports
pub use command::{Command, CommandList, Dispatch, Hazard, Kernel, ParamBlock};
pub use composite::{CompositeMode, CompositeSettings};
pub use context::GpuInitResult;
pub use cpu::CpuDevice;
pub use noise::{NoiseSettings, ProceduralSeeder, SeedVector};
pub use profiler::{FrameTimer, ProfilerScope};
pub use quality::QualityPreset;
pub use r#trait::ComputeDevice;
pub use scheduler::{StepScheduler, TickInputs, TickStage};

#[cfg(feature = "gpu")]
pub use context::GpuContext;
#[cfg(feature = "gpu")]
pub use gpu::GpuDevice;

use crate::config::{BackendPreference, SimulationConfig};
use crate::error::SimResult;
use tracing::{info, warn};

/// Create a compute device with automatic backend selection
///
/// Tries GPU acceleration unless the configuration forces the CPU, falling back
/// to the CPU device when no GPU is usable. A GPU that exists but cannot be used
/// is logged as a warning; a missing GPU only at info level.
///
/// # Errors
///
/// Returns the CPU device's allocation error if even the fallback cannot be
/// created.
pub fn create_device(config: &SimulationConfig) -> SimResult<Box<dyn ComputeDevice>> {
    let layout = config.layout();

    if config.backend == BackendPreference::Cpu {
        info!("CPU backend requested ({} grid)", layout.grid);
        return Ok(Box::new(CpuDevice::new(layout)?));
    }

    #[cfg(feature = "gpu")]
    {
        match GpuContext::new() {
            GpuInitResult::Success(gpu_context) => {
                if gpu_context.can_allocate(layout) {
                    info!(
                        "Using GPU backend: {} ({} grid, {} backbone)",
                        gpu_context.adapter_name(),
                        layout.grid,
                        layout.backbone
                    );
                    match GpuDevice::new(gpu_context, layout) {
                        Ok(device) => return Ok(Box::new(device)),
                        Err(e) => warn!("GPU device creation failed: {}. Falling back to CPU.", e),
                    }
                } else {
                    warn!(
                        "GPU has insufficient memory for {} grid with {} backbone, falling back to CPU",
                        layout.grid, layout.backbone
                    );
                }
            }
            GpuInitResult::NoGpuFound => {
                if config.backend == BackendPreference::Gpu {
                    warn!("GPU backend requested but no GPU found, using CPU backend");
                } else {
                    info!("No GPU found, using CPU backend");
                }
            }
            GpuInitResult::InitFailed {
                adapter_name,
                error,
            } => {
                warn!(
                    "GPU '{}' found but failed to initialize: {}. Falling back to CPU.",
                    adapter_name, error
                );
            }
        }
    }

    #[cfg(not(feature = "gpu"))]
    {
        if config.backend == BackendPreference::Gpu {
            warn!("GPU backend requested but the gpu feature is disabled, using CPU backend");
        } else {
            info!("GPU feature disabled, using CPU backend");
        }
    }

    Ok(Box::new(CpuDevice::new(layout)?))
}
