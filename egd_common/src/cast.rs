//! Cast dispatch for the sample hot path.
//!
//! A [`CastFn`] converts exactly one native value into one output value
//! and optionally applies a linear [`Scale`]. The function is picked once at
//! setup from a fixed table keyed by `(native type, output type, scaled)`;
//! nothing on the per-sample path branches on datatypes.
//!
//! ## Semantics
//!
//! - Integer targets truncate (saturating at the `i32` range).
//! - Same-type float conversions propagate the value exactly.
//! - Scaling is applied after the cast: `value * multiplier + offset`,
//!   computed in the output type (`f64` then truncated for `Int32`).

use crate::types::{DataType, Scale};

/// Convert one value: `input` holds one native value, `out` receives one
/// output value. Both slices are at least the size of their datatype.
pub type CastFn = fn(out: &mut [u8], input: &[u8], scale: &Scale);

/// Native-endian numeric representation usable on the data path.
pub trait Sample: Copy {
    /// Datatype tag.
    const DTYPE: DataType;

    /// Read one value from the start of `bytes`.
    fn read(bytes: &[u8]) -> Self;

    /// Write one value to the start of `bytes`.
    fn write(self, bytes: &mut [u8]);

    /// Exact widening to `f64`.
    fn to_f64(self) -> f64;

    /// Conversion from `f64` with Rust `as` semantics.
    fn from_f64(value: f64) -> Self;

    /// Apply a linear transform in this type's arithmetic.
    fn apply_scale(self, scale: &Scale) -> Self;
}

impl Sample for i32 {
    const DTYPE: DataType = DataType::Int32;

    #[inline(always)]
    fn read(bytes: &[u8]) -> Self {
        i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline(always)]
    fn write(self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.to_ne_bytes());
    }

    #[inline(always)]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        value as i32
    }

    #[inline(always)]
    fn apply_scale(self, scale: &Scale) -> Self {
        (f64::from(self) * scale.multiplier + scale.offset) as i32
    }
}

impl Sample for f32 {
    const DTYPE: DataType = DataType::Float;

    #[inline(always)]
    fn read(bytes: &[u8]) -> Self {
        f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline(always)]
    fn write(self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.to_ne_bytes());
    }

    #[inline(always)]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    #[inline(always)]
    fn apply_scale(self, scale: &Scale) -> Self {
        self * scale.multiplier as f32 + scale.offset as f32
    }
}

impl Sample for f64 {
    const DTYPE: DataType = DataType::Double;

    #[inline(always)]
    fn read(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        f64::from_ne_bytes(raw)
    }

    #[inline(always)]
    fn write(self, bytes: &mut [u8]) {
        bytes[..8].copy_from_slice(&self.to_ne_bytes());
    }

    #[inline(always)]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline(always)]
    fn apply_scale(self, scale: &Scale) -> Self {
        self * scale.multiplier + scale.offset
    }
}

/// Generic body behind every table entry.
///
/// Going through `f64` is exact for all three input types, so the result
/// equals a direct `as` cast from `I` to `O`.
fn cast_one<I: Sample, O: Sample, const SCALED: bool>(
    out: &mut [u8],
    input: &[u8],
    scale: &Scale,
) {
    let value = O::from_f64(I::read(input).to_f64());
    let value = if SCALED { value.apply_scale(scale) } else { value };
    value.write(out);
}

macro_rules! cast_row {
    ($in:ty) => {
        [
            [cast_one::<$in, i32, false>, cast_one::<$in, i32, true>],
            [cast_one::<$in, f32, false>, cast_one::<$in, f32, true>],
            [cast_one::<$in, f64, false>, cast_one::<$in, f64, true>],
        ]
    };
}

/// Dispatch table indexed `[in as usize][out as usize][scaled as usize]`.
static CAST_TABLE: [[[CastFn; 2]; 3]; 3] = [cast_row!(i32), cast_row!(f32), cast_row!(f64)];

/// Select the conversion for a `(native, requested, scaled)` triple.
#[inline]
pub fn get_cast_fn(in_type: DataType, out_type: DataType, scaled: bool) -> CastFn {
    CAST_TABLE[in_type as usize][out_type as usize][scaled as usize]
}

/// Select the conversion from raw wire tags.
///
/// Returns `None` when either tag is not a supported datatype.
pub fn get_cast_fn_raw(in_type: i32, out_type: i32, scaled: bool) -> Option<CastFn> {
    let in_type = DataType::from_i32(in_type)?;
    let out_type = DataType::from_i32(out_type)?;
    Some(get_cast_fn(in_type, out_type, scaled))
}
