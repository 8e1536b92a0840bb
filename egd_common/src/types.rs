//! Channel, capability and datatype definitions.
//!
//! This module defines the data model shared by both sides of the
//! process boundary:
//! - `SensorType` / `DataType` - Enumerated tags as sent on the wire
//! - `ChannelGroup` - One contiguous run of channels requested by a client
//! - `SelectedChannel` - One resolved channel of the active selection
//! - `ChannelInfo` - Static per-channel metadata
//! - `Capabilities` - Device-wide summary

use crate::consts::{LABEL_LEN, NUM_SENSOR_TYPES, PREFILTERING_LEN, TRANSDUCER_LEN, UNIT_LEN};
use crate::error::DeviceError;
use heapless::String as BoundedString;

/// Category of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SensorType {
    /// Electroencephalography electrode.
    Eeg = 0,
    /// Trigger / status line.
    Trigger = 1,
    /// Any other sensor (EXG, accelerometer, ...).
    Sensor = 2,
}

impl SensorType {
    /// All sensor types, in wire order.
    pub const ALL: [SensorType; NUM_SENSOR_TYPES] = [Self::Eeg, Self::Trigger, Self::Sensor];

    /// Convert from the raw wire value. Returns `None` for invalid values.
    #[inline]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Eeg),
            1 => Some(Self::Trigger),
            2 => Some(Self::Sensor),
            _ => None,
        }
    }

    /// Index into per-sensor-type arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short lowercase name, as used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eeg => "eeg",
            Self::Trigger => "trigger",
            Self::Sensor => "sensor",
        }
    }
}

impl TryFrom<i32> for SensorType {
    type Error = DeviceError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_i32(value)
            .ok_or_else(|| DeviceError::invalid(format!("unknown sensor type {value}")))
    }
}

/// Numeric representation of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DataType {
    /// Fixed-point 32-bit signed integer.
    Int32 = 0,
    /// Single-precision float.
    Float = 1,
    /// Double-precision float.
    Double = 2,
}

impl DataType {
    /// All datatypes, in wire order.
    pub const ALL: [DataType; 3] = [Self::Int32, Self::Float, Self::Double];

    /// Convert from the raw wire value. Returns `None` for invalid values.
    #[inline]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Int32),
            1 => Some(Self::Float),
            2 => Some(Self::Double),
            _ => None,
        }
    }

    /// Size of one value in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Int32 | Self::Float => 4,
            Self::Double => 8,
        }
    }

    /// Whether this type is an integer representation.
    #[inline]
    pub const fn is_int(self) -> bool {
        matches!(self, Self::Int32)
    }
}

impl TryFrom<i32> for DataType {
    type Error = DeviceError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_i32(value)
            .ok_or_else(|| DeviceError::invalid(format!("unknown datatype {value}")))
    }
}

/// A value expressed in its native datatype.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeValue {
    /// 32-bit integer value.
    Int32(i32),
    /// Single-precision value.
    Float(f32),
    /// Double-precision value.
    Double(f64),
}

impl NativeValue {
    /// Datatype tag of this value.
    pub const fn dtype(self) -> DataType {
        match self {
            Self::Int32(_) => DataType::Int32,
            Self::Float(_) => DataType::Float,
            Self::Double(_) => DataType::Double,
        }
    }

    /// Widen to `f64` (exact for every variant).
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int32(v) => f64::from(v),
            Self::Float(v) => f64::from(v),
            Self::Double(v) => v,
        }
    }

    /// Rebuild a value of `dtype` from its `f64` widening.
    pub fn from_f64(dtype: DataType, value: f64) -> Self {
        match dtype {
            DataType::Int32 => Self::Int32(value as i32),
            DataType::Float => Self::Float(value as f32),
            DataType::Double => Self::Double(value),
        }
    }
}

/// Linear transform applied after the type cast: `value * multiplier + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    /// Additive term.
    pub offset: f64,
    /// Multiplicative term.
    pub multiplier: f64,
}

impl Scale {
    /// Identity transform.
    pub const IDENTITY: Scale = Scale {
        offset: 0.0,
        multiplier: 1.0,
    };

    /// Create a pure gain.
    pub const fn gain(multiplier: f64) -> Self {
        Self {
            offset: 0.0,
            multiplier,
        }
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One contiguous run of channels a client wants delivered together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelGroup {
    /// Sensor type of the channels.
    pub sensor_type: SensorType,
    /// Index of the first channel within its sensor type.
    pub index: u32,
    /// Number of channels.
    pub nch: u32,
    /// Destination array index.
    pub iarray: u32,
    /// Byte offset of the first channel within the destination stride.
    pub arr_offset: u32,
    /// Requested output datatype.
    pub datatype: DataType,
}

/// One channel of the active selection, fully resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedChannel {
    /// Byte offset of the value in the raw input frame.
    pub in_offset: u32,
    /// Native datatype of the value.
    pub in_type: DataType,
    /// Output datatype.
    pub out_type: DataType,
    /// Destination array index.
    pub iarray: u32,
    /// Byte offset within the destination stride.
    pub arr_offset: u32,
    /// Apply `scale` after the cast.
    pub scaling: bool,
    /// Linear transform.
    pub scale: Scale,
}

/// Label text, truncated to fit the wire field.
pub type Label = BoundedString<{ LABEL_LEN - 1 }>;
/// Unit text, truncated to fit the wire field.
pub type Unit = BoundedString<{ UNIT_LEN - 1 }>;
/// Transducer description, truncated to fit the wire field.
pub type Transducer = BoundedString<{ TRANSDUCER_LEN - 1 }>;
/// Prefiltering description, truncated to fit the wire field.
pub type Prefiltering = BoundedString<{ PREFILTERING_LEN - 1 }>;

/// Copy `src` into a bounded string, cutting at the last char that fits.
pub fn bounded<const N: usize>(src: &str) -> BoundedString<N> {
    let mut out = BoundedString::new();
    for c in src.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Static metadata of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    /// Human-readable label.
    pub label: Label,
    /// Physical unit.
    pub unit: Unit,
    /// Transducer description.
    pub transducer: Transducer,
    /// Prefiltering description.
    pub prefiltering: Prefiltering,
    /// Integer channel.
    pub isint: bool,
    /// Native datatype.
    pub dtype: DataType,
    /// Minimum representable value.
    pub min: NativeValue,
    /// Maximum representable value.
    pub max: NativeValue,
}

impl ChannelInfo {
    /// Build a record from arbitrary text, truncating each field.
    pub fn new(
        label: &str,
        unit: &str,
        transducer: &str,
        prefiltering: &str,
        min: NativeValue,
        max: NativeValue,
    ) -> Self {
        let dtype = min.dtype();
        Self {
            label: bounded(label),
            unit: bounded(unit),
            transducer: bounded(transducer),
            prefiltering: bounded(prefiltering),
            isint: dtype.is_int(),
            dtype,
            min,
            max,
        }
    }
}

/// Device-wide capability summary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Sampling frequency in Hz.
    pub sampling_freq: u32,
    /// Channel count per sensor type, indexed by [`SensorType::index`].
    pub type_nch: [u32; NUM_SENSOR_TYPES],
    /// Free-form device type.
    pub device_type: String,
    /// Free-form device identifier.
    pub device_id: String,
}

impl Capabilities {
    /// Number of channels of `stype`.
    #[inline]
    pub fn nch(&self, stype: SensorType) -> u32 {
        self.type_nch[stype.index()]
    }

    /// Total number of channels over all sensor types.
    pub fn total_channels(&self) -> u32 {
        self.type_nch.iter().sum()
    }
}
