//! System-wide constants for the EGD workspace.
//!
//! Single source of truth for wire sizes, bounded text lengths and
//! growth increments. Imported by both crates.

/// Number of sensor types a device can report channel counts for.
pub const NUM_SENSOR_TYPES: usize = 3;

/// Byte length of the label field in a channel info record (NUL included).
pub const LABEL_LEN: usize = 32;

/// Byte length of the unit field in a channel info record (NUL included).
pub const UNIT_LEN: usize = 16;

/// Byte length of the transducer field in a channel info record (NUL included).
pub const TRANSDUCER_LEN: usize = 128;

/// Byte length of the prefiltering field in a channel info record (NUL included).
pub const PREFILTERING_LEN: usize = 128;

/// File descriptor number of the data-out channel inside the driver process.
///
/// Control-in and control-out are the process' stdin and stdout.
pub const DATA_FD: i32 = 3;

/// Upper bound on a command payload read from control-in.
pub const MAX_COMMAND_PAYLOAD: usize = 1 << 20;

/// Increment (in bytes) of the settings text buffer.
pub const SETTINGS_BUFFER_INCREMENT: usize = 1024;

/// Increment (in entries) of the settings index.
pub const SETTINGS_ENTRIES_INCREMENT: usize = 32;

/// Name of the driver host binary.
pub const DRIVER_HOST_BIN: &str = "egd_procdev";
