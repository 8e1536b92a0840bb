//! # EGD isolated driver layer
//!
//! Runs each acquisition device driver in its own process and drives it from
//! the application through a small command/reply protocol.
//!
//! # Module Structure
//!
//! - [`device`] - `EegDevice` trait implemented by every driver
//! - [`driver_registry`] - Driver factory registration
//! - [`drivers`] - Built-in driver implementations
//! - [`link`] - Control-out and data-out channels of the driver process
//! - [`runtime`] - Command loop of the driver process
//! - [`supervisor`] - `DeviceProxy`, the application side of the protocol
//! - [`acquisition`] - Sample queue and typed `get_data`
//!
//! # Architecture
//!
//! ```text
//! ┌──────────── application ────────────┐        ┌──────────── egd_procdev ─────────────┐
//! │                                     │ stdin  │                                      │
//! │  DeviceProxy ───── commands ────────┼───────►│  DriverRuntime ──► EegDevice         │
//! │      ▲                              │ stdout │      │                  │            │
//! │      └────── replies / errors ──────┼◄───────┼── DeviceLink ◄── capture thread      │
//! │                                     │  fd 3  │      │                               │
//! │  SampleBuffer ◄──── raw frames ─────┼◄───────┼──────┘                               │
//! │      │                              │        │                                      │
//! │  FrameDemux ──► typed arrays        │        │                                      │
//! └─────────────────────────────────────┘        └──────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod acquisition;
pub mod device;
pub mod driver_registry;
pub mod drivers;
pub mod error;
pub mod link;
pub mod runtime;
pub mod supervisor;

// Re-export key types for convenience
pub use crate::acquisition::{Acquisition, SampleBuffer};
pub use crate::device::{EegDevice, OpenOptions};
pub use crate::driver_registry::DriverRegistry;
pub use crate::error::DriverHostError;
pub use crate::link::DeviceLink;
pub use crate::runtime::{DriverRuntime, RunOutcome};
pub use crate::supervisor::{DeviceProxy, ProxyOptions, SampleSink};
