use crate::error::{DefaultNebulaError, NebulaErrorCode};
use crate::helpers::{
    handle_ffi_result_error, instance_from_ptr, track_error, with_simulation, with_simulation_mut,
};
use crate::instance::NebulaInstance;
use nebula_sim_core::NebulaSimulation;
use std::borrow::Cow;
use std::ptr;

/// Borrowed view of the renderable density volume.
///
/// `data` holds `len` floats laid out x-fastest, then y, then z.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NebulaFieldView {
    pub data: *const f32,
    pub len: usize,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl NebulaFieldView {
    const fn empty() -> Self {
        Self {
            data: ptr::null(),
            len: 0,
            width: 0,
            height: 0,
            depth: 0,
        }
    }
}

/// Advance the simulation by `dt` seconds.
///
/// Thread-safe: acquires the `RwLock` write lock for the whole tick.
///
/// Returns `true` on success. On `false`, `nebula_get_last_error()` describes the
/// failure. A negative or non-finite `dt` leaves the instance usable; any device
/// failure is sticky and every later call fails with `SessionFailed`.
///
/// # Safety
///
/// `ptr` must be null or a valid pointer returned by `nebula_initialize_field`.
#[no_mangle]
pub unsafe extern "C" fn nebula_step(ptr: *const NebulaInstance, dt: f32) -> bool {
    let code = handle_ffi_result_error(|| {
        // SAFETY: forwarded from the caller's contract.
        let instance = unsafe { instance_from_ptr(ptr) }?;
        with_simulation_mut(instance, |sim| sim.step(dt))??;
        Ok(())
    });
    code == NebulaErrorCode::Ok
}

/// Regenerate the procedural backbone from `seed` and reset the simulated fields.
///
/// Emitters are kept; elapsed time and the tick counter restart from zero.
///
/// Returns `true` on success, `false` with the last error set otherwise.
///
/// # Safety
///
/// `ptr` must be null or a valid pointer returned by `nebula_initialize_field`.
#[no_mangle]
pub unsafe extern "C" fn nebula_regenerate(ptr: *const NebulaInstance, seed: u64) -> bool {
    let code = handle_ffi_result_error(|| {
        // SAFETY: forwarded from the caller's contract.
        let instance = unsafe { instance_from_ptr(ptr) }?;
        with_simulation_mut(instance, |sim| sim.regenerate_from_seed(seed))??;
        Ok(())
    });
    code == NebulaErrorCode::Ok
}

/// Reset the effect: regenerate the backbone from a fresh random seed vector.
///
/// Same contract as [`nebula_regenerate`], but the result is not reproducible.
///
/// # Safety
///
/// `ptr` must be null or a valid pointer returned by `nebula_initialize_field`.
#[no_mangle]
pub unsafe extern "C" fn nebula_regenerate_random(ptr: *const NebulaInstance) -> bool {
    let code = handle_ffi_result_error(|| {
        // SAFETY: forwarded from the caller's contract.
        let instance = unsafe { instance_from_ptr(ptr) }?;
        with_simulation_mut(instance, NebulaSimulation::regenerate_random)??;
        Ok(())
    });
    code == NebulaErrorCode::Ok
}

/// Expose the composited density volume for rendering.
///
/// - The view borrows memory owned by the instance. **DO NOT FREE `data`**.
/// - `data` stays valid until the next `nebula_step`, `nebula_regenerate[_random]`,
///   `nebula_get_renderable_field` or `nebula_destroy` call on this instance.
///
/// Returns
/// - `NebulaErrorCode::Ok` (0) with `out_view` filled in
/// - `NebulaErrorCode::NullPointer` if `ptr` or `out_view` is null
/// - `NebulaErrorCode::LockPoisoned` if the internal lock is poisoned
/// - `NebulaErrorCode::SessionFailed` if an earlier tick failed
///
/// On error `out_view` is set to an empty view.
///
/// # Safety
///
/// - `ptr` must be null or a valid pointer returned by `nebula_initialize_field`.
/// - `out_view` must be null or point to writable memory for one `NebulaFieldView`.
#[no_mangle]
pub unsafe extern "C" fn nebula_get_renderable_field(
    ptr: *const NebulaInstance,
    out_view: *mut NebulaFieldView,
) -> NebulaErrorCode {
    if out_view.is_null() {
        return track_error(&DefaultNebulaError::null_pointer("out_view"));
    }

    let mut view = NebulaFieldView::empty();
    let code = handle_ffi_result_error(|| {
        // SAFETY: forwarded from the caller's contract.
        let instance = unsafe { instance_from_ptr(ptr) }?;
        let mut snapshot = instance
            .field_snapshot
            .lock()
            .map_err(|_| DefaultNebulaError::lock_poisoned("field_snapshot"))?;

        view = with_simulation(instance, |sim| {
            let handle = sim.renderable_field()?;
            let data = match handle.data {
                Cow::Borrowed(slice) => slice.as_ptr(),
                Cow::Owned(values) => {
                    *snapshot = values;
                    snapshot.as_ptr()
                }
            };
            Ok::<_, DefaultNebulaError>(NebulaFieldView {
                data,
                len: handle.dimensions.cell_count(),
                width: handle.dimensions.width,
                height: handle.dimensions.height,
                depth: handle.dimensions.depth,
            })
        })??;
        Ok(())
    });

    unsafe {
        *out_view = view;
    }
    code
}

/// Number of completed ticks since creation or the last regeneration.
///
/// Returns 0 if `ptr` is null or the lock is poisoned.
///
/// # Safety
///
/// `ptr` must be null or a valid pointer returned by `nebula_initialize_field`.
#[no_mangle]
pub unsafe extern "C" fn nebula_get_tick_count(ptr: *const NebulaInstance) -> u64 {
    // SAFETY: forwarded from the caller's contract.
    let Ok(instance) = (unsafe { instance_from_ptr(ptr) }) else {
        return 0;
    };
    with_simulation(instance, |sim| sim.tick_count()).unwrap_or(0)
}

/// Whether the instance runs on a GPU device.
///
/// # Safety
///
/// `ptr` must be null or a valid pointer returned by `nebula_initialize_field`.
#[no_mangle]
pub unsafe extern "C" fn nebula_is_gpu_accelerated(ptr: *const NebulaInstance) -> bool {
    // SAFETY: forwarded from the caller's contract.
    let Ok(instance) = (unsafe { instance_from_ptr(ptr) }) else {
        return false;
    };
    with_simulation(instance, |sim| sim.is_gpu_accelerated()).unwrap_or(false)
}
