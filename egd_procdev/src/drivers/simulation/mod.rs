//! Simulation driver module.
//!
//! A software amplifier shaped like a 24-bit EEG system: `numch` EEG
//! channels, 8 auxiliary sensors and one trigger line, all native `Int32`.
//! Useful for exercising the whole process boundary without hardware.
//!
//! # Options
//!
//! Passed in the device path as `name|value|name|value`:
//!
//! | Name | Default | Meaning |
//! |------|---------|---------|
//! | `fs` | 2048 | Sampling frequency in Hz |
//! | `numch` | 64 | EEG channel count (the process argument wins if non-zero) |
//! | `trigger` | 0 | Constant value of the trigger line |
//! | `chunk` | 32 | Frames per data-out write |
//! | `fail` | 0 | Non-zero makes open fail with `ENODEV` |

mod driver;
mod generator;

pub use driver::{SimulationDriver, SimulationOptions};
pub use generator::SignalGenerator;

use crate::device::{EegDevice, OpenOptions};
use crate::link::DeviceLink;
use egd_common::error::DeviceResult;

/// Registered name of the simulation driver.
pub const DRIVER_NAME: &str = "simulation";

/// Factory function opening a simulated device.
pub fn open_device(options: &OpenOptions, link: DeviceLink) -> DeviceResult<Box<dyn EegDevice>> {
    let options = SimulationOptions::parse(options)?;
    Ok(Box::new(SimulationDriver::open(options, link)?))
}
