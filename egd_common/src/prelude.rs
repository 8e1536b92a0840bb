//! Prelude module for common re-exports.
//!
//! ```rust
//! use egd_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{AcqConfig, ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::settings::{Settings, SettingsError};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{DeviceError, DeviceResult, ErrorCode};

// ─── Data model ─────────────────────────────────────────────────────
pub use crate::types::{
    Capabilities, ChannelGroup, ChannelInfo, DataType, NativeValue, Scale, SelectedChannel,
    SensorType,
};

// ─── Data path ──────────────────────────────────────────────────────
pub use crate::cast::{get_cast_fn, CastFn};
pub use crate::channels::{resolve_channel_groups, InputLayout, SensorLayout};
pub use crate::demux::FrameDemux;

// ─── Protocol ───────────────────────────────────────────────────────
pub use crate::protocol::{Command, Header, ProtocolError, WireRecord};
