use crate::error::{with_last_error_mut, DefaultNebulaError, NebulaError, NebulaErrorCode};
use crate::instance::NebulaInstance;
use nebula_sim_core::NebulaSimulation;
use std::ffi::CString;

/// Set the thread-local error message and code.
/// Accepts any type implementing `NebulaError` trait.
pub(crate) fn set_last_error(error: &impl NebulaError) {
    with_last_error_mut(|(cstring, code)| {
        *cstring = CString::new(error.msg()).ok();
        *code = error.code();
    });
}

/// Track an error by setting it in thread-local storage and returning its code.
#[inline]
pub(crate) fn track_error(error: &impl NebulaError) -> NebulaErrorCode {
    set_last_error(error);
    error.code()
}

/// Record the outcome of a fallible operation in thread-local storage.
///
/// Success clears the last error; failure stores it and yields its code.
pub(crate) fn track_result<T, E: NebulaError>(result: Result<T, E>) -> Result<T, NebulaErrorCode> {
    match result {
        Ok(value) => {
            clear_last_error();
            Ok(value)
        }
        Err(error) => Err(track_error(&error)),
    }
}

/// Clear the thread-local error message and code.
pub(crate) fn clear_last_error() {
    with_last_error_mut(|(cstring, code)| {
        *cstring = None;
        *code = NebulaErrorCode::Ok;
    });
}

/// Run an FFI body and translate its outcome into an error code.
///
/// Success clears the thread-local error; failure records it.
pub(crate) fn handle_ffi_result_error<F>(body: F) -> NebulaErrorCode
where
    F: FnOnce() -> Result<(), DefaultNebulaError>,
{
    match track_result(body()) {
        Ok(()) => NebulaErrorCode::Ok,
        Err(code) => code,
    }
}

/// Borrow the instance behind an FFI handle.
///
/// # Safety
///
/// `ptr` must be null or a live pointer returned by `nebula_initialize_field`.
pub(crate) unsafe fn instance_from_ptr<'a>(
    ptr: *const NebulaInstance,
) -> Result<&'a NebulaInstance, DefaultNebulaError> {
    // SAFETY: caller guarantees `ptr` is null or a live instance.
    unsafe { ptr.as_ref() }.ok_or_else(|| DefaultNebulaError::null_pointer("instance"))
}

/// Run `func` with shared access to the simulation.
pub(crate) fn with_simulation<F, T>(
    instance: &NebulaInstance,
    func: F,
) -> Result<T, DefaultNebulaError>
where
    F: FnOnce(&NebulaSimulation) -> T,
{
    let sim = instance
        .sim
        .read()
        .map_err(|_| DefaultNebulaError::lock_poisoned("simulation"))?;
    Ok(func(&sim))
}

/// Run `func` with exclusive access to the simulation.
pub(crate) fn with_simulation_mut<F, T>(
    instance: &NebulaInstance,
    func: F,
) -> Result<T, DefaultNebulaError>
where
    F: FnOnce(&mut NebulaSimulation) -> T,
{
    let mut sim = instance
        .sim
        .write()
        .map_err(|_| DefaultNebulaError::lock_poisoned("simulation"))?;
    Ok(func(&mut sim))
}
