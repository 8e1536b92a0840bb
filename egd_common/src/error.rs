//! Error codes shared by the driver runtime and the supervisor.
//!
//! Everything that crosses the process boundary is an errno-style `i32`.
//! `DeviceError` wraps such a code with a bit of context for logging;
//! [`DeviceError::code`] and [`DeviceError::from_code`] convert back and
//! forth without losing the numeric value.

use thiserror::Error;

/// Errno-style status carried in reply headers. `0` means success.
pub type ErrorCode = i32;

/// Error returned by device operations and protocol handling.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Malformed or truncated read on control-in, or lost driver process.
    #[error("communication with driver process broken")]
    CommBroken,

    /// Growth of an internal table failed.
    #[error("allocation failure")]
    OutOfMemory,

    /// Argument rejected before reaching the device.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Command not valid in the current runtime state.
    #[error("operation not permitted in state {0}")]
    InvalidState(&'static str),

    /// Failure reported by the device itself, passed through unchanged.
    #[error("device error (errno {0})")]
    Device(ErrorCode),

    /// I/O error on one of the byte channels.
    #[error("I/O error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },
}

impl DeviceError {
    /// Errno-style code sent on the wire for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CommBroken => libc::ECHILD,
            Self::OutOfMemory => libc::ENOMEM,
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::InvalidState(_) => libc::EBUSY,
            Self::Device(code) => *code,
            Self::Io { source } => match source.kind() {
                std::io::ErrorKind::UnexpectedEof => libc::ECHILD,
                std::io::ErrorKind::BrokenPipe => libc::EPIPE,
                _ => source.raw_os_error().unwrap_or(libc::EIO),
            },
        }
    }

    /// Rebuild an error from a status received on the wire.
    ///
    /// Codes with a dedicated variant map back to it; anything else is
    /// kept verbatim as [`DeviceError::Device`].
    pub fn from_code(code: ErrorCode) -> Self {
        match code {
            libc::ECHILD => Self::CommBroken,
            libc::ENOMEM => Self::OutOfMemory,
            other => Self::Device(other),
        }
    }

    /// Shorthand for an invalid-argument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Map a reply status to a `Result`.
pub fn status_to_result(status: ErrorCode) -> Result<(), DeviceError> {
    if status == 0 {
        Ok(())
    } else {
        Err(DeviceError::from_code(status))
    }
}

/// Result type for device and protocol operations.
pub type DeviceResult<T> = Result<T, DeviceError>;
