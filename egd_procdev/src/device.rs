//! Device trait and factory types.
//!
//! This module defines:
//! - `EegDevice` trait - Operation table of one opened device
//! - `OpenOptions` - Arguments the driver host was started with
//! - `DriverFactory` type alias - Opens a device of one family
//!
//! # Lifecycle
//!
//! 1. `DriverFactory` - Opens the device. Must report capabilities and the
//!    raw frame length through the [`DeviceLink`] before returning.
//! 2. `set_channel_groups()` / `fill_chinfo()` - Any time before close
//! 3. `start_acq()` / `stop_acq()` - Capture thread pushes raw frames with
//!    [`DeviceLink::update_ringbuffer`]
//! 4. `close_device()` - Called exactly once, never while acquiring

use crate::link::DeviceLink;
use egd_common::error::DeviceResult;
use egd_common::types::{ChannelGroup, ChannelInfo, SelectedChannel, SensorType};

/// Arguments of the driver host process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Device option string, `name|value|name|value`.
    pub path: String,
    /// Requested EEG channel count (0 = driver default).
    pub numch: u32,
}

/// Factory function type for opening a device.
pub type DriverFactory = fn(&OpenOptions, DeviceLink) -> DeviceResult<Box<dyn EegDevice>>;

/// Operation table of an opened device.
///
/// The runtime owns the trait object for the whole session and calls it
/// from the command loop only. Errors carry errno-style codes that are
/// forwarded to the supervisor unchanged.
pub trait EegDevice: Send {
    /// Driver family name, as registered.
    fn name(&self) -> &'static str;

    /// Start pushing raw frames.
    fn start_acq(&mut self) -> DeviceResult<()>;

    /// Stop pushing raw frames. No frame is written after this returns.
    fn stop_acq(&mut self) -> DeviceResult<()>;

    /// Build the selected-channel table for `groups`.
    ///
    /// Must not touch device state on error; the previous table stays active.
    fn set_channel_groups(&mut self, groups: &[ChannelGroup]) -> DeviceResult<Vec<SelectedChannel>>;

    /// Static metadata of one channel. `index` is already range-checked.
    fn fill_chinfo(&mut self, stype: SensorType, index: u32) -> DeviceResult<ChannelInfo>;

    /// Release the device.
    fn close_device(&mut self) -> DeviceResult<()>;
}
