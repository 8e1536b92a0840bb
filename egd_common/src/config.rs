//! Configuration loading traits and types.
//!
//! TOML files are loaded through the blanket [`ConfigLoader`] trait. Every
//! application config embeds a [`SharedConfig`] under `[shared]`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use egd_common::config::{AcqConfig, ConfigError, ConfigLoader};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = AcqConfig::load(Path::new("acq.toml"))?;
//!     config.validate()?;
//!     println!("Driver: {}", config.driver.name);
//!     Ok(())
//! }
//! ```

use crate::consts::DRIVER_HOST_BIN;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across applications.
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "egd-acq-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_driver_name() -> String {
    "simulation".to_string()
}

fn default_numch() -> u32 {
    64
}

fn default_duration_s() -> f64 {
    5.0
}

fn default_chunk_frames() -> u32 {
    32
}

/// Which driver to spawn and how to open it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSection {
    /// Driver host executable. Resolved next to the running binary if omitted.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Registered driver name.
    #[serde(default = "default_driver_name")]
    pub name: String,

    /// Device option string, `name|value|name|value`.
    #[serde(default)]
    pub path: String,

    /// Requested EEG channel count.
    #[serde(default = "default_numch")]
    pub numch: u32,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            executable: None,
            name: default_driver_name(),
            path: String::new(),
            numch: default_numch(),
        }
    }
}

impl DriverSection {
    /// Driver host executable to spawn.
    ///
    /// Falls back to [`DRIVER_HOST_BIN`] in the directory of `current_exe`.
    pub fn resolve_executable(&self, current_exe: &Path) -> PathBuf {
        match &self.executable {
            Some(path) => path.clone(),
            None => current_exe
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(DRIVER_HOST_BIN),
        }
    }
}

/// How long to acquire and how much to read at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionSection {
    /// Acquisition duration in seconds.
    #[serde(default = "default_duration_s")]
    pub duration_s: f64,

    /// Frames converted per read.
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: u32,
}

impl Default for AcquisitionSection {
    fn default() -> Self {
        Self {
            duration_s: default_duration_s(),
            chunk_frames: default_chunk_frames(),
        }
    }
}

/// Configuration of the `egd_acq` acquisition client.
///
/// ```toml
/// [shared]
/// service_name = "egd-acq"
///
/// [driver]
/// name = "simulation"
/// path = "fs|512|trigger|7"
/// numch = 16
///
/// [acquisition]
/// duration_s = 2.0
/// chunk_frames = 64
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcqConfig {
    /// Common fields.
    pub shared: SharedConfig,

    /// Driver selection.
    #[serde(default)]
    pub driver: DriverSection,

    /// Acquisition parameters.
    #[serde(default)]
    pub acquisition: AcquisitionSection,
}

impl AcqConfig {
    /// Validate the configuration.
    ///
    /// # Validation Rules
    /// 1. `shared` is valid
    /// 2. `driver.name` is not empty
    /// 3. `acquisition.duration_s` is finite and > 0
    /// 4. `acquisition.chunk_frames` > 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.driver.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "driver.name cannot be empty".to_string(),
            ));
        }
        if !self.acquisition.duration_s.is_finite() || self.acquisition.duration_s <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "acquisition.duration_s must be positive, got {}",
                self.acquisition.duration_s
            )));
        }
        if self.acquisition.chunk_frames == 0 {
            return Err(ConfigError::ValidationError(
                "acquisition.chunk_frames must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
