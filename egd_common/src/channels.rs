//! Channel-group resolution.
//!
//! A driver describes where each sensor type lives in its raw frame with an
//! [`InputLayout`]. [`resolve_channel_groups`] expands client groups into
//! one [`SelectedChannel`] per channel against that layout.

use crate::consts::NUM_SENSOR_TYPES;
use crate::error::{DeviceError, DeviceResult};
use crate::types::{Capabilities, ChannelGroup, DataType, Scale, SelectedChannel, SensorType};

/// Placement of one sensor type inside the raw frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorLayout {
    /// Byte offset of channel 0 of this type.
    pub offset: u32,
    /// Native datatype of every channel of this type.
    pub dtype: DataType,
    /// Scale applied when delivering values, if any.
    pub scale: Option<Scale>,
}

impl Default for SensorLayout {
    fn default() -> Self {
        Self {
            offset: 0,
            dtype: DataType::Int32,
            scale: None,
        }
    }
}

/// Raw frame layout of a device, per sensor type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputLayout {
    sensors: [SensorLayout; NUM_SENSOR_TYPES],
}

impl InputLayout {
    /// Create a layout with every type at offset 0, `Int32`, unscaled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the placement of one sensor type.
    pub fn with(mut self, stype: SensorType, layout: SensorLayout) -> Self {
        self.sensors[stype.index()] = layout;
        self
    }

    /// Lay the given types back to back in the order listed, all of `dtype`.
    pub fn packed(caps: &Capabilities, order: &[(SensorType, Option<Scale>)], dtype: DataType) -> Self {
        let mut layout = Self::new();
        let mut offset = 0u32;
        for &(stype, scale) in order {
            layout.sensors[stype.index()] = SensorLayout {
                offset,
                dtype,
                scale,
            };
            offset += caps.nch(stype) * dtype.size() as u32;
        }
        layout
    }

    /// Placement of one sensor type.
    #[inline]
    pub fn sensor(&self, stype: SensorType) -> &SensorLayout {
        &self.sensors[stype.index()]
    }

    /// Raw frame length in bytes for the channel counts in `caps`.
    pub fn frame_size(&self, caps: &Capabilities) -> u32 {
        SensorType::ALL
            .iter()
            .filter(|&&stype| caps.nch(stype) > 0)
            .map(|&stype| {
                let s = self.sensor(stype);
                s.offset + caps.nch(stype) * s.dtype.size() as u32
            })
            .max()
            .unwrap_or(0)
    }
}

/// Expand `groups` into a selected-channel table.
///
/// Every group is validated before anything is built, so an error never
/// yields a partial table. The table is reserved in one step; a failed
/// reservation is reported as [`DeviceError::OutOfMemory`].
pub fn resolve_channel_groups(
    groups: &[ChannelGroup],
    caps: &Capabilities,
    layout: &InputLayout,
) -> DeviceResult<Vec<SelectedChannel>> {
    let mut total = 0usize;
    for (i, group) in groups.iter().enumerate() {
        let available = caps.nch(group.sensor_type);
        let end = group.index.checked_add(group.nch);
        if end.is_none_or(|end| end > available) {
            return Err(DeviceError::invalid(format!(
                "group {i}: {} channels {}..+{} exceed {available}",
                group.sensor_type.name(),
                group.index,
                group.nch
            )));
        }
        if group.nch > 0 && last_offsets(group, layout).is_none() {
            return Err(DeviceError::invalid(format!(
                "group {i}: offsets of {} channels from {} overflow",
                group.nch, group.arr_offset
            )));
        }
        total += group.nch as usize;
    }

    let mut table = Vec::new();
    table
        .try_reserve_exact(total)
        .map_err(|_| DeviceError::OutOfMemory)?;

    for group in groups {
        let sensor = layout.sensor(group.sensor_type);
        let in_size = sensor.dtype.size() as u32;
        let out_size = group.datatype.size() as u32;

        for k in 0..group.nch {
            table.push(SelectedChannel {
                in_offset: sensor.offset + (group.index + k) * in_size,
                in_type: sensor.dtype,
                out_type: group.datatype,
                iarray: group.iarray,
                arr_offset: group.arr_offset + k * out_size,
                scaling: sensor.scale.is_some(),
                scale: sensor.scale.unwrap_or_default(),
            });
        }
    }

    Ok(table)
}

/// Input and output byte offsets of the last channel of a non-empty group.
fn last_offsets(group: &ChannelGroup, layout: &InputLayout) -> Option<(u32, u32)> {
    let sensor = layout.sensor(group.sensor_type);
    let last = group.nch.checked_sub(1)?;
    let in_offset = group
        .index
        .checked_add(last)?
        .checked_mul(sensor.dtype.size() as u32)?
        .checked_add(sensor.offset)?;
    let arr_offset = last
        .checked_mul(group.datatype.size() as u32)?
        .checked_add(group.arr_offset)?;
    Some((in_offset, arr_offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities {
            sampling_freq: 2048,
            type_nch: [64, 1, 8],
            device_type: "sim".into(),
            device_id: "0".into(),
        }
    }

    fn layout() -> InputLayout {
        InputLayout::packed(
            &caps(),
            &[
                (SensorType::Eeg, Some(Scale::gain(1.0 / 32.0))),
                (SensorType::Sensor, Some(Scale::gain(1.0 / 32.0))),
                (SensorType::Trigger, None),
            ],
            DataType::Int32,
        )
    }

    fn group(stype: SensorType, index: u32, nch: u32, iarray: u32, off: u32, dt: DataType) -> ChannelGroup {
        ChannelGroup {
            sensor_type: stype,
            index,
            nch,
            iarray,
            arr_offset: off,
            datatype: dt,
        }
    }

    #[test]
    fn test_packed_layout_offsets() {
        let layout = layout();
        assert_eq!(layout.sensor(SensorType::Eeg).offset, 0);
        assert_eq!(layout.sensor(SensorType::Sensor).offset, 64 * 4);
        assert_eq!(layout.sensor(SensorType::Trigger).offset, 72 * 4);
        assert_eq!(layout.frame_size(&caps()), 73 * 4);
    }

    #[test]
    fn test_full_selection() {
        let groups = [
            group(SensorType::Eeg, 0, 64, 0, 0, DataType::Float),
            group(SensorType::Sensor, 0, 8, 0, 64 * 4, DataType::Float),
            group(SensorType::Trigger, 0, 1, 1, 0, DataType::Int32),
        ];
        let table = resolve_channel_groups(&groups, &caps(), &layout()).unwrap();
        assert_eq!(table.len(), 73);

        let last_eeg = &table[63];
        assert_eq!(last_eeg.in_offset, 63 * 4);
        assert_eq!(last_eeg.arr_offset, 63 * 4);
        assert!(last_eeg.scaling);

        let first_sensor = &table[64];
        assert_eq!(first_sensor.in_offset, 64 * 4);
        assert_eq!(first_sensor.arr_offset, 64 * 4);

        let trigger = &table[72];
        assert_eq!(trigger.in_offset, 72 * 4);
        assert_eq!(trigger.iarray, 1);
        assert!(!trigger.scaling);
        assert_eq!(trigger.out_type, DataType::Int32);
    }

    #[test]
    fn test_double_output_stride() {
        let groups = [group(SensorType::Eeg, 10, 3, 0, 16, DataType::Double)];
        let table = resolve_channel_groups(&groups, &caps(), &layout()).unwrap();
        let offsets: Vec<u32> = table.iter().map(|c| c.arr_offset).collect();
        assert_eq!(offsets, vec![16, 24, 32]);
        assert_eq!(table[0].in_offset, 40);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let groups = [
            group(SensorType::Eeg, 0, 4, 0, 0, DataType::Float),
            group(SensorType::Trigger, 1, 1, 1, 0, DataType::Int32),
        ];
        let err = resolve_channel_groups(&groups, &caps(), &layout()).unwrap_err();
        assert_eq!(err.code(), libc::EINVAL);
    }

    #[test]
    fn test_index_overflow_rejected() {
        let groups = [group(SensorType::Eeg, u32::MAX, 2, 0, 0, DataType::Float)];
        assert!(resolve_channel_groups(&groups, &caps(), &layout()).is_err());
    }

    #[test]
    fn test_output_offset_overflow_rejected() {
        let groups = [group(SensorType::Eeg, 0, 2, 0, u32::MAX - 2, DataType::Float)];
        let err = resolve_channel_groups(&groups, &caps(), &layout()).unwrap_err();
        assert_eq!(err.code(), libc::EINVAL);

        // The last channel lands exactly on the largest offset.
        let groups = [group(SensorType::Eeg, 0, 2, 0, u32::MAX - 4, DataType::Float)];
        let table = resolve_channel_groups(&groups, &caps(), &layout()).unwrap();
        assert_eq!(table[1].arr_offset, u32::MAX);
    }

    #[test]
    fn test_input_offset_overflow_rejected() {
        let caps = Capabilities {
            type_nch: [u32::MAX, 0, 0],
            ..caps()
        };
        let groups = [group(SensorType::Eeg, u32::MAX - 2, 2, 0, 0, DataType::Float)];
        let err = resolve_channel_groups(&groups, &caps, &layout()).unwrap_err();
        assert_eq!(err.code(), libc::EINVAL);
    }

    #[test]
    fn test_empty_groups() {
        let table = resolve_channel_groups(&[], &caps(), &layout()).unwrap();
        assert!(table.is_empty());
    }
}
