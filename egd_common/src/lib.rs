//! EGD Common Library
//!
//! Shared building blocks for isolated-process acquisition drivers. Both
//! the driver runtime and the supervisor depend on this crate, so
//! everything that crosses the process boundary is defined here once.
//!
//! # Module Structure
//!
//! - [`types`] - Sensor/data types, channel groups, channel info, capabilities
//! - [`protocol`] - Command ids, headers and wire records
//! - [`cast`] - Cast dispatch table for the sample hot path
//! - [`channels`] - Channel-group resolution against a raw frame layout
//! - [`demux`] - Raw frame to strided array conversion
//! - [`settings`] - Flat name/value configuration store
//! - [`config`] - TOML configuration loading
//! - [`error`] - Errno-style device errors
//! - [`consts`] - Workspace constants
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use egd_common::prelude::*;
//!
//! let cast = get_cast_fn(DataType::Int32, DataType::Float, true);
//! let mut out = [0u8; 4];
//! cast(&mut out, &64i32.to_ne_bytes(), &Scale::gain(0.5));
//! assert_eq!(f32::from_ne_bytes(out), 32.0);
//! ```

#![deny(missing_docs)]

pub mod cast;
pub mod channels;
pub mod config;
pub mod consts;
pub mod demux;
pub mod error;
pub mod prelude;
pub mod protocol;
pub mod settings;
pub mod types;
