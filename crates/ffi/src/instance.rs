use crate::error::{DefaultNebulaError, NebulaErrorCode};
use crate::helpers::{track_error, track_result};
use nebula_sim_core::{
    BackendPreference, GridDimensions, NebulaSimulation, QualityPreset, SimulationConfig,
};
use std::ptr;
use std::sync::{Mutex, RwLock};

/// Creation parameters for a nebula simulation instance.
///
/// A grid whose width, height and depth are all zero selects the quality preset's
/// dimensions. The same holds for the backbone grid.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NebulaFieldConfig {
    /// Quality preset: 0 = Low, 1 = Medium, 2 = High
    pub quality: u8,
    pub grid_width: u32,
    pub grid_height: u32,
    pub grid_depth: u32,
    pub backbone_width: u32,
    pub backbone_height: u32,
    pub backbone_depth: u32,
    /// Seed for the initial procedural backbone
    pub seed: u64,
    /// Skip GPU detection and run on the CPU
    pub force_cpu: bool,
}

impl NebulaFieldConfig {
    fn to_simulation_config(self) -> Result<SimulationConfig, DefaultNebulaError> {
        let quality = match self.quality {
            0 => QualityPreset::Low,
            1 => QualityPreset::Medium,
            2 => QualityPreset::High,
            other => {
                return Err(DefaultNebulaError::invalid_parameter(format!(
                    "Invalid quality preset: {other}. Must be 0-2"
                )))
            }
        };

        Ok(SimulationConfig {
            quality,
            grid: explicit_dimensions(self.grid_width, self.grid_height, self.grid_depth),
            backbone: explicit_dimensions(
                self.backbone_width,
                self.backbone_height,
                self.backbone_depth,
            ),
            backend: if self.force_cpu {
                BackendPreference::Cpu
            } else {
                BackendPreference::Auto
            },
            seed: self.seed,
            ..SimulationConfig::default()
        })
    }
}

fn explicit_dimensions(width: u32, height: u32, depth: u32) -> Option<GridDimensions> {
    if width == 0 && height == 0 && depth == 0 {
        None
    } else {
        Some(GridDimensions::new(width, height, depth))
    }
}

/// Opaque nebula simulation handle for C/C++ hosts.
///
/// The simulation sits behind an `RwLock`: stepping and regeneration take the
/// write lock, field views take the read lock. Field data copied back from a GPU
/// device is cached in `field_snapshot` so the pointer handed to the host stays
/// valid until the next mutating call.
///
/// Example (C++):
/// ```cpp
/// NebulaFieldConfig config = {};
/// config.quality = 1;
/// config.seed = 42;
///
/// NebulaInstance* sim = nullptr;
/// if (nebula_initialize_field(&config, &sim) != NebulaErrorCode::Ok) {
///     fprintf(stderr, "%s\n", nebula_get_last_error());
///     return;
/// }
///
/// while (running) {
///     if (!nebula_step(sim, frame_dt)) {
///         fprintf(stderr, "%s\n", nebula_get_last_error());
///         break;
///     }
///     NebulaFieldView view;
///     if (nebula_get_renderable_field(sim, &view) == NebulaErrorCode::Ok) {
///         upload_volume_texture(view.data, view.width, view.height, view.depth);
///     }
/// }
///
/// nebula_destroy(sim);
/// ```
pub struct NebulaInstance {
    pub(crate) sim: RwLock<NebulaSimulation>,
    /// Host-side copy of the renderable field when the device cannot lend one.
    pub(crate) field_snapshot: Mutex<Vec<f32>>,
}

impl NebulaInstance {
    /// Creates the simulation described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an unknown quality preset or a rejected grid,
    /// and `ResourceAllocation` when field storage cannot be created.
    pub(crate) fn new(config: NebulaFieldConfig) -> Result<Box<Self>, DefaultNebulaError> {
        let config = config.to_simulation_config()?;
        let sim = NebulaSimulation::initialize_field(config)?;
        tracing::info!(
            "Nebula FFI instance created on {} ({} grid)",
            sim.backend_name(),
            sim.layout().grid
        );

        Ok(Box::new(Self {
            sim: RwLock::new(sim),
            field_snapshot: Mutex::new(Vec::new()),
        }))
    }
}

/// Create a nebula simulation and seed its backbone field.
///
/// - `config`: creation parameters. Must be non-null; read and copied.
/// - `out_instance`: receives the created instance. Must be non-null.
///   - On success: set to a valid `NebulaInstance` pointer
///   - On failure: set to null
///
/// Returns
/// - `NebulaErrorCode::Ok` (0) on success
/// - `NebulaErrorCode::NullPointer` if `config` or `out_instance` is null
/// - `NebulaErrorCode::InvalidParameter` for an unknown preset or zero-sized grid
/// - `NebulaErrorCode::ResourceAllocation` if the field storage cannot be allocated
///
/// Call `nebula_get_last_error()` for a human-readable description.
///
/// # Safety
///
/// - `config` must be null or point to a readable `NebulaFieldConfig`.
/// - `out_instance` must be a valid, non-null pointer to writable memory.
/// - The caller owns the returned instance and MUST call `nebula_destroy` exactly once.
#[no_mangle]
pub unsafe extern "C" fn nebula_initialize_field(
    config: *const NebulaFieldConfig,
    out_instance: *mut *mut NebulaInstance,
) -> NebulaErrorCode {
    if out_instance.is_null() {
        return track_error(&DefaultNebulaError::null_pointer("out_instance"));
    }

    // SAFETY: caller guarantees `config` is null or readable.
    let Some(config) = (unsafe { config.as_ref() }).copied() else {
        unsafe {
            *out_instance = ptr::null_mut();
        }
        return track_error(&DefaultNebulaError::null_pointer("config"));
    };

    match track_result(NebulaInstance::new(config)) {
        Ok(instance) => {
            unsafe {
                *out_instance = Box::into_raw(instance);
            }
            NebulaErrorCode::Ok
        }
        Err(code) => {
            unsafe {
                *out_instance = ptr::null_mut();
            }
            code
        }
    }
}

/// Destroys an instance previously created by `nebula_initialize_field`.
///
/// Passing null is a no-op.
///
/// # Safety
///
/// - The pointer MUST have been created by `nebula_initialize_field`.
/// - The pointer MUST NOT have been freed already.
/// - No other thread may be using the instance, and the caller must not use the
///   pointer again afterwards.
#[no_mangle]
pub unsafe extern "C" fn nebula_destroy(ptr: *mut NebulaInstance) {
    if ptr.is_null() {
        return;
    }

    // SAFETY: `ptr` came from `Box::into_raw` in `nebula_initialize_field` and
    // has not been freed.
    unsafe {
        drop(Box::from_raw(ptr));
    }
}
