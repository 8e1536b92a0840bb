//! Driver registry.
//!
//! Maps driver family names to [`DriverFactory`] functions. Built once at
//! startup of the driver host and consulted once to open the device.

use crate::device::{DriverFactory, EegDevice, OpenOptions};
use crate::error::DriverHostError;
use crate::link::DeviceLink;
use std::collections::HashMap;

/// Registry of available device drivers.
pub struct DriverRegistry {
    factories: HashMap<&'static str, DriverFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry holding every built-in driver.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::drivers::register_all_drivers(&mut registry);
        registry
    }

    /// Register a driver factory.
    ///
    /// # Panics
    /// Panics if a driver with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: DriverFactory) {
        if self.factories.contains_key(name) {
            panic!("Driver '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Get a driver factory by name.
    pub fn get_factory(&self, name: &str) -> Option<DriverFactory> {
        self.factories.get(name).copied()
    }

    /// Open a device with the named driver.
    ///
    /// # Errors
    /// Returns `DriverHostError::DriverNotFound` if no driver with the given
    /// name is registered, or the device error from the factory.
    pub fn open_device(
        &self,
        name: &str,
        options: &OpenOptions,
        link: DeviceLink,
    ) -> Result<Box<dyn EegDevice>, DriverHostError> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| DriverHostError::DriverNotFound(name.to_string()))?;
        Ok(factory(options, link)?)
    }

    /// List all registered driver names.
    pub fn list_drivers(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egd_common::error::{DeviceError, DeviceResult};
    use egd_common::types::{ChannelGroup, ChannelInfo, SelectedChannel, SensorType};

    struct NullDevice;

    impl EegDevice for NullDevice {
        fn name(&self) -> &'static str {
            "null"
        }

        fn start_acq(&mut self) -> DeviceResult<()> {
            Ok(())
        }

        fn stop_acq(&mut self) -> DeviceResult<()> {
            Ok(())
        }

        fn set_channel_groups(
            &mut self,
            _groups: &[ChannelGroup],
        ) -> DeviceResult<Vec<SelectedChannel>> {
            Ok(Vec::new())
        }

        fn fill_chinfo(&mut self, _stype: SensorType, _index: u32) -> DeviceResult<ChannelInfo> {
            Err(DeviceError::Device(libc::ENOSYS))
        }

        fn close_device(&mut self) -> DeviceResult<()> {
            Ok(())
        }
    }

    fn open_null(_options: &OpenOptions, _link: DeviceLink) -> DeviceResult<Box<dyn EegDevice>> {
        Ok(Box::new(NullDevice))
    }

    fn open_broken(_options: &OpenOptions, _link: DeviceLink) -> DeviceResult<Box<dyn EegDevice>> {
        Err(DeviceError::Device(libc::ENODEV))
    }

    #[test]
    fn registry_register_and_open() {
        let mut reg = DriverRegistry::new();
        reg.register("null", open_null);

        let device = reg
            .open_device("null", &OpenOptions::default(), DeviceLink::sink())
            .expect("should open");
        assert_eq!(device.name(), "null");
    }

    #[test]
    fn registry_driver_not_found() {
        let reg = DriverRegistry::new();
        let result = reg.open_device("nonexistent", &OpenOptions::default(), DeviceLink::sink());
        assert!(matches!(result, Err(DriverHostError::DriverNotFound(_))));
    }

    #[test]
    fn registry_factory_error_passed_through() {
        let mut reg = DriverRegistry::new();
        reg.register("broken", open_broken);
        let err = reg
            .open_device("broken", &OpenOptions::default(), DeviceLink::sink())
            .err()
            .expect("open should fail");
        assert_eq!(err.code(), libc::ENODEV);
    }

    #[test]
    fn registry_builtin_has_simulation() {
        let reg = DriverRegistry::with_builtin();
        assert!(reg.list_drivers().contains(&"simulation"));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registry_duplicate_panics() {
        let mut reg = DriverRegistry::new();
        reg.register("dup", open_null);
        reg.register("dup", open_null);
    }
}
