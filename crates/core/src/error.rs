//! Error taxonomy for the simulation core
//!
//! Every fallible operation in the core returns [`SimResult`]. The core never
//! decides recovery policy; callers (the FFI layer, the CLI) map these errors to
//! status codes, log them, and decide whether to disable the effect.

use thiserror::Error;

/// Result alias used throughout the core.
pub type SimResult<T> = Result<T, SimError>;

/// Failures surfaced by the simulation core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// Grid storage could not be created. Fatal to the whole subsystem.
    #[error("failed to allocate {what} ({bytes} bytes)")]
    ResourceAllocation {
        /// Which resource failed (field label or device buffer name)
        what: String,
        /// Requested size in bytes
        bytes: u64,
    },

    /// The device rejected or failed a submission, or the command list was invalid.
    #[error("submission failed: {0}")]
    Submission(String),

    /// The bounded wait for device completion expired.
    #[error("device did not complete within {waited_ms} ms")]
    SynchronizationTimeout {
        /// How long the host waited before giving up
        waited_ms: u64,
    },

    /// Configuration rejected before any allocation took place.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A previous tick failed; field contents are of unknown validity.
    #[error("simulation session failed and must be recreated")]
    SessionFailed,
}

impl SimError {
    /// Whether this error invalidates the whole simulation session
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SimError::ResourceAllocation {
            what: "density A".to_string(),
            bytes: 1024,
        };
        assert_eq!(err.to_string(), "failed to allocate density A (1024 bytes)");

        let err = SimError::SynchronizationTimeout { waited_ms: 250 };
        assert_eq!(err.to_string(), "device did not complete within 250 ms");
    }

    #[test]
    fn test_fatality() {
        assert!(SimError::SessionFailed.is_fatal());
        assert!(SimError::Submission("lost device".into()).is_fatal());
        assert!(!SimError::InvalidConfig("dt".into()).is_fatal());
    }
}
