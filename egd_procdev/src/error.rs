//! Error type of the driver host and acquisition binaries.

use egd_common::config::ConfigError;
use egd_common::error::DeviceError;
use thiserror::Error;

/// Error types for driver host operations.
#[derive(Debug, Error)]
pub enum DriverHostError {
    /// Driver not found
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// Device or channel failure
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Acquisition check failed
    #[error("Check failed: {0}")]
    CheckFailed(String),
}

impl DriverHostError {
    /// Errno-style code for reporting across the process boundary.
    pub fn code(&self) -> i32 {
        match self {
            Self::DriverNotFound(_) => libc::ENODEV,
            Self::Device(err) => err.code(),
            Self::Config(_) | Self::CheckFailed(_) => libc::EINVAL,
        }
    }
}
