//! Device driver implementations.
//!
//! - [`simulation`] - Software amplifier for development and testing
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the `EegDevice` trait from [`crate::device`]
//! 3. Register its factory in [`register_all_drivers`]

pub mod simulation;

use crate::driver_registry::DriverRegistry;

/// Register every built-in driver.
pub fn register_all_drivers(registry: &mut DriverRegistry) {
    registry.register(simulation::DRIVER_NAME, simulation::open_device);
}
