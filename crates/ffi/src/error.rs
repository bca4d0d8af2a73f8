use nebula_sim_core::SimError;
use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;
use std::ptr;

/// Common interface for FFI error types.
///
/// - `code()` - Returns the error code to be passed across FFI boundary
/// - `msg()` - Returns the error message for diagnostic purposes
pub(crate) trait NebulaError {
    /// Returns the error code to be returned across the FFI boundary.
    fn code(&self) -> NebulaErrorCode;

    /// Returns the human-readable error message.
    fn msg(&self) -> &str;
}

/// Default implementation of `NebulaError` for FFI error scenarios.
///
/// Wraps a `NebulaErrorCode` with a message, with constructors for argument
/// errors raised in the FFI layer and a conversion from core `SimError`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DefaultNebulaError {
    code: NebulaErrorCode,
    msg: String,
}

impl DefaultNebulaError {
    /// Create error for null pointer passed where non-null required.
    ///
    /// # Arguments
    /// * `param_name` - The name of the parameter that was null (e.g., `"out_instance"`)
    pub fn null_pointer(param_name: &str) -> Self {
        Self {
            code: NebulaErrorCode::NullPointer,
            msg: format!("Parameter '{param_name}' cannot be null"),
        }
    }

    /// Create error for poisoned lock.
    ///
    /// # Arguments
    /// * `lock_name` - The name of the lock that was poisoned (e.g., `"simulation"`)
    pub fn lock_poisoned(lock_name: &str) -> Self {
        Self {
            code: NebulaErrorCode::LockPoisoned,
            msg: format!("Lock '{lock_name}' was poisoned by a panic in another thread"),
        }
    }

    /// Create error for an invalid argument.
    pub fn invalid_parameter(message: String) -> Self {
        Self {
            code: NebulaErrorCode::InvalidParameter,
            msg: message,
        }
    }
}

impl From<SimError> for DefaultNebulaError {
    fn from(error: SimError) -> Self {
        let code = match error {
            SimError::ResourceAllocation { .. } => NebulaErrorCode::ResourceAllocation,
            SimError::Submission(_) => NebulaErrorCode::SubmissionFailed,
            SimError::SynchronizationTimeout { .. } => NebulaErrorCode::SynchronizationTimeout,
            SimError::InvalidConfig(_) => NebulaErrorCode::InvalidParameter,
            SimError::SessionFailed => NebulaErrorCode::SessionFailed,
        };
        Self {
            code,
            msg: error.to_string(),
        }
    }
}

impl NebulaError for DefaultNebulaError {
    fn code(&self) -> NebulaErrorCode {
        self.code
    }

    fn msg(&self) -> &str {
        &self.msg
    }
}

/// FFI error codes returned by nebula simulation functions.
/// Follows standard C convention: 0 = success, non-zero = error.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NebulaErrorCode {
    /// Operation completed successfully.
    Ok = 0,

    /// Invalid pointer: null pointer passed where non-null required.
    NullPointer = 1,

    /// Lock poisoned: internal synchronization primitive was poisoned by a panic.
    LockPoisoned = 2,

    /// Invalid parameter: zero grid dimension, unknown quality preset, negative or
    /// non-finite timestep.
    InvalidParameter = 3,

    /// Field storage could not be allocated.
    ResourceAllocation = 4,

    /// The compute device rejected a submission.
    SubmissionFailed = 5,

    /// The device did not finish a tick within the synchronization budget.
    SynchronizationTimeout = 6,

    /// An earlier failure invalidated the instance; destroy and recreate it.
    SessionFailed = 7,
}

impl From<DefaultNebulaError> for NebulaErrorCode {
    fn from(error: DefaultNebulaError) -> Self {
        error.code
    }
}

thread_local! {
    /// Thread-local storage for the most recent FFI error (C string, error code).
    /// The CString is stored to prevent memory leaks when returning raw pointers via FFI.
    static LAST_ERROR: RefCell<(Option<CString>, NebulaErrorCode)> = const { RefCell::new((None, NebulaErrorCode::Ok)) };
}

/// Internal helper to read `LAST_ERROR` thread-local storage (cstring, code).
pub(crate) fn with_last_error<F, R>(f: F) -> R
where
    F: FnOnce(&(Option<CString>, NebulaErrorCode)) -> R,
{
    LAST_ERROR.with_borrow(f)
}

/// Internal helper to mutate `LAST_ERROR` thread-local storage (cstring, code).
pub(crate) fn with_last_error_mut<F, R>(f: F) -> R
where
    F: FnOnce(&mut (Option<CString>, NebulaErrorCode)) -> R,
{
    LAST_ERROR.with_borrow_mut(f)
}

/// Retrieve the most recent FFI error message as a null-terminated C string.
///
/// Returns:
/// - A borrowed pointer to the error message if the last call on this thread failed.
/// - `null` if the last call succeeded or the message cannot be converted to a C string.
///
/// # Thread Safety
/// Error messages are stored per-thread (thread-local storage). Each thread has
/// its own independent error state.
///
/// # Lifetime
/// The returned pointer is valid until the next FFI call on this thread that sets
/// or clears the error, or until the thread terminates.
///
/// **DO NOT FREE THIS POINTER** - it is managed internally.
///
/// Example:
/// ```cpp
/// if (!nebula_step(sim, dt)) {
///     const char* error = nebula_get_last_error();
///     if (error) {
///         printf("Nebula step failed: %s\n", error);
///     }
/// }
/// ```
#[no_mangle]
pub extern "C" fn nebula_get_last_error() -> *const c_char {
    with_last_error(|(cstring, _code)| cstring.as_ref().map_or(ptr::null(), |cs| cs.as_ptr()))
}

/// Retrieve the most recent FFI error code.
///
/// Returns `NebulaErrorCode::Ok` (0) if the last call on this thread succeeded,
/// otherwise the code of the failure.
#[no_mangle]
pub extern "C" fn nebula_get_last_error_code() -> NebulaErrorCode {
    with_last_error(|(_cstring, code)| *code)
}
