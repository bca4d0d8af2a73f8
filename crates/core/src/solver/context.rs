//! GPU context and initialization
//!
//! This module handles GPU device initialization and capability detection.
//! It distinguishes between "no GPU found" (expected on headless machines)
//! and "GPU found but failed to initialize" (potential driver issue).

/// Result of GPU initialization attempt
///
/// - `NoGpuFound`: No compatible GPU adapter (silent fallback to CPU)
/// - `InitFailed`: GPU found but initialization failed (log warning)
#[derive(Debug)]
pub enum GpuInitResult {
    /// GPU initialized successfully
    #[cfg(feature = "gpu")]
    Success(GpuContext),
    /// No GPU adapter found (silent fallback to CPU)
    NoGpuFound,
    /// GPU found but initialization failed (log warning, fallback to CPU)
    InitFailed {
        /// Name of the adapter that failed
        adapter_name: String,
        /// Error message
        error: String,
    },
}

#[cfg(feature = "gpu")]
mod gpu_impl {
    use super::GpuInitResult;
    use crate::grid::{FieldId, FieldLayout};
    use tracing::{debug, info};

    /// GPU context managing device and queue
    #[derive(Debug)]
    pub struct GpuContext {
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_info: wgpu::AdapterInfo,
    }

    impl GpuContext {
        /// Initialize GPU context
        ///
        /// # Returns
        ///
        /// - `GpuInitResult::Success` - GPU ready to use
        /// - `GpuInitResult::NoGpuFound` - No compatible GPU adapter
        /// - `GpuInitResult::InitFailed` - GPU found but device creation failed
        #[allow(clippy::new_ret_no_self)]
        pub fn new() -> GpuInitResult {
            info!("Attempting to initialize GPU context");

            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });

            let adapter =
                if let Some(a) = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })) {
                    debug!("Found GPU adapter: {}", a.get_info().name);
                    a
                } else {
                    debug!("No GPU adapter found");
                    return GpuInitResult::NoGpuFound;
                };

            let adapter_info = adapter.get_info();
            let adapter_name = adapter_info.name.clone();

            // Large backbones need storage buffers beyond the default 128 MiB binding limit
            let adapter_limits = adapter.limits();
            let required_limits = wgpu::Limits {
                max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                max_buffer_size: adapter_limits.max_buffer_size,
                max_storage_buffers_per_shader_stage: adapter_limits
                    .max_storage_buffers_per_shader_stage
                    .max(8),
                ..wgpu::Limits::default()
            };

            match pollster::block_on(adapter.request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("NebulaSim GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )) {
                Ok((device, queue)) => {
                    info!("GPU context initialized successfully: {}", adapter_name);
                    GpuInitResult::Success(Self {
                        device,
                        queue,
                        adapter_info,
                    })
                }
                Err(e) => {
                    debug!("Failed to create GPU device: {}", e);
                    GpuInitResult::InitFailed {
                        adapter_name,
                        error: e.to_string(),
                    }
                }
            }
        }

        /// GPU adapter name (e.g., "NVIDIA `GeForce` GTX 1660")
        #[must_use]
        pub fn adapter_name(&self) -> &str {
            &self.adapter_info.name
        }

        /// Check if the device can hold every buffer of `layout`
        ///
        /// Each field is its own storage buffer, so each must fit both the
        /// storage binding limit and the maximum buffer size.
        #[must_use]
        pub fn can_allocate(&self, layout: FieldLayout) -> bool {
            let limits = self.device.limits();
            let binding_limit = u64::from(limits.max_storage_buffer_binding_size);
            let fits = |bytes: u64| bytes <= binding_limit && bytes <= limits.max_buffer_size;

            FieldId::ALL.iter().all(|field| {
                let dims = if field.on_backbone_grid() {
                    layout.backbone
                } else {
                    layout.grid
                };
                fits(dims.byte_size())
            })
        }

        /// Hand the device and queue to a backend that owns them
        #[must_use]
        pub fn into_device_queue(self) -> (wgpu::Device, wgpu::Queue, String) {
            (self.device, self.queue, self.adapter_info.name)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::grid::GridDimensions;

        #[test]
        fn test_gpu_init_returns_valid_result() {
            // Which variant comes back depends on the hardware
            match GpuContext::new() {
                GpuInitResult::Success(ctx) => {
                    assert!(!ctx.adapter_name().is_empty());
                }
                GpuInitResult::NoGpuFound => {}
                GpuInitResult::InitFailed {
                    adapter_name,
                    error,
                } => {
                    assert!(!adapter_name.is_empty());
                    assert!(!error.is_empty());
                }
            }
        }

        #[test]
        fn test_can_allocate_checks_each_buffer() {
            let GpuInitResult::Success(ctx) = GpuContext::new() else {
                eprintln!("skipping test_can_allocate_checks_each_buffer: no usable GPU adapter");
                return;
            };
            assert!(ctx.can_allocate(FieldLayout::new(
                GridDimensions::cubic(32),
                GridDimensions::cubic(64)
            )));
            // 4096³ floats is 256 GiB per buffer
            assert!(!ctx.can_allocate(FieldLayout::new(
                GridDimensions::cubic(32),
                GridDimensions::cubic(4096)
            )));
            // An oversized simulation grid fails even with a tiny backbone
            assert!(!ctx.can_allocate(FieldLayout::new(
                GridDimensions::cubic(4096),
                GridDimensions::cubic(8)
            )));
        }
    }
}

#[cfg(feature = "gpu")]
pub use gpu_impl::GpuContext;
