//! Wire protocol between the supervisor and an isolated driver process.
//!
//! Three unidirectional byte streams connect the two processes:
//!
//! ```text
//! ┌──────────────┐  control-in  (stdin)   ┌──────────────────┐
//! │              ├───────────────────────►│                  │
//! │  Supervisor  │  control-out (stdout)  │  Driver runtime  │
//! │    proxy     │◄───────────────────────┤   (egd_procdev)  │
//! │              │  data-out    (fd 3)    │                  │
//! │              │◄───────────────────────┤                  │
//! └──────────────┘                        └──────────────────┘
//! ```
//!
//! Control messages are a [`Header`] `{command, aux}` of two native-endian
//! `i32`, optionally followed by a payload. On control-in `aux` is the
//! payload size; on control-out it is a status (0 = success) or a value,
//! and a reply payload follows only when the status is 0. Data-out carries
//! raw sample frames with no framing at all.
//!
//! Every record that crosses the boundary is serialized field by field
//! through [`WireRecord`]; no in-memory layout is shared.

use crate::consts::{
    LABEL_LEN, MAX_COMMAND_PAYLOAD, NUM_SENSOR_TYPES, PREFILTERING_LEN, TRANSDUCER_LEN, UNIT_LEN,
};
use crate::error::DeviceError;
use crate::types::{
    bounded, Capabilities, ChannelGroup, ChannelInfo, DataType, NativeValue, Scale,
    SelectedChannel, SensorType,
};
use static_assertions::const_assert_eq;
use std::io::{self, Read};
use thiserror::Error;

/// Size of a command/reply header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Longest device-type or device-id string accepted from a driver.
pub const MAX_IDENTITY_LEN: usize = 4096;

/// Command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Command {
    /// Runtime → supervisor, once: device open finished (status in `aux`).
    CreationEnded = 0,
    /// Replace the active channel selection.
    SetChannelGroups = 1,
    /// Start sample generation.
    StartAcq = 2,
    /// Stop sample generation.
    StopAcq = 3,
    /// Query one channel's static metadata.
    FillChinfo = 4,
    /// Release the device; last command processed.
    CloseDevice = 5,
    /// Runtime → supervisor: asynchronous device fault (code in `aux`).
    ReportError = 6,
    /// Runtime → supervisor: capability record follows.
    UpdateCapabilities = 7,
    /// Runtime → supervisor: new raw frame length in `aux`.
    SetSamlen = 8,
}

impl Command {
    /// Convert from raw `i32` value. Returns `None` for invalid values.
    #[inline]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::CreationEnded),
            1 => Some(Self::SetChannelGroups),
            2 => Some(Self::StartAcq),
            3 => Some(Self::StopAcq),
            4 => Some(Self::FillChinfo),
            5 => Some(Self::CloseDevice),
            6 => Some(Self::ReportError),
            7 => Some(Self::UpdateCapabilities),
            8 => Some(Self::SetSamlen),
            _ => None,
        }
    }

    /// Whether the runtime sends this message without being asked.
    #[inline]
    pub const fn is_unsolicited(self) -> bool {
        matches!(
            self,
            Self::CreationEnded | Self::ReportError | Self::UpdateCapabilities | Self::SetSamlen
        )
    }
}

/// Error type for protocol decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Stream ended cleanly on a message boundary.
    #[error("channel closed")]
    Closed,

    /// Stream ended in the middle of a message.
    #[error("truncated message")]
    Truncated,

    /// Unknown command identifier.
    #[error("unknown command id {0}")]
    UnknownCommand(i32),

    /// Structurally invalid payload.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: io::Error,
    },
}

impl From<ProtocolError> for DeviceError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io { source } => DeviceError::Io { source },
            ProtocolError::Malformed(msg) => DeviceError::InvalidArgument(msg),
            ProtocolError::Closed | ProtocolError::Truncated | ProtocolError::UnknownCommand(_) => {
                DeviceError::CommBroken
            }
        }
    }
}

/// Command/reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw command identifier.
    pub command: i32,
    /// Payload size, status or value depending on the command.
    pub aux: i32,
}

impl Header {
    /// Create a header for a known command.
    pub const fn new(command: Command, aux: i32) -> Self {
        Self {
            command: command as i32,
            aux,
        }
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.command.to_ne_bytes());
        out[4..].copy_from_slice(&self.aux.to_ne_bytes());
        out
    }

    /// Deserialize from wire bytes.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            command: i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            aux: i32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// Decoded command, if known.
    pub fn command(self) -> Option<Command> {
        Command::from_i32(self.command)
    }
}

/// Read one header.
///
/// A stream that ends before the first byte yields [`ProtocolError::Closed`];
/// one that ends inside the header yields [`ProtocolError::Truncated`].
pub fn read_header<R: Read + ?Sized>(reader: &mut R) -> Result<Header, ProtocolError> {
    let mut raw = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        match reader.read(&mut raw[filled..]) {
            Ok(0) if filled == 0 => return Err(ProtocolError::Closed),
            Ok(0) => return Err(ProtocolError::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Header::from_bytes(&raw))
}

/// Read exactly `len` payload bytes. A short read is [`ProtocolError::Truncated`].
pub fn read_payload<R: Read + ?Sized>(reader: &mut R, len: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = vec![0u8; len];
    read_exact(reader, &mut buf)?;
    Ok(buf)
}

fn read_exact<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated
        } else {
            e.into()
        }
    })
}

/// Build a complete message: header followed by `payload`.
pub fn encode_message(command: Command, aux: i32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&Header::new(command, aux).to_bytes());
    out.extend_from_slice(payload);
    out
}

// ─── Field helpers ──────────────────────────────────────────────────

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_ne_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_ne_bytes());
}

fn put_f64(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&v.to_ne_bytes());
}

/// Write `text` into a fixed field of `len` bytes, NUL-terminated.
fn put_text(out: &mut Vec<u8>, text: &str, len: usize) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(len - 1);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + (len - n), 0);
}

/// Sequential reader over a fixed-size record.
struct Fields<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> &'a [u8] {
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        out
    }

    fn i32(&mut self) -> i32 {
        let b = self.take(4);
        i32::from_ne_bytes([b[0], b[1], b[2], b[3]])
    }

    fn u32(&mut self) -> u32 {
        let b = self.take(4);
        u32::from_ne_bytes([b[0], b[1], b[2], b[3]])
    }

    fn f64(&mut self) -> f64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8));
        f64::from_ne_bytes(raw)
    }

    /// Text up to the first NUL of a fixed field; never reads past `len`.
    fn text(&mut self, len: usize) -> String {
        let field = self.take(len);
        let end = field.iter().position(|&b| b == 0).unwrap_or(len);
        String::from_utf8_lossy(&field[..end]).into_owned()
    }
}

fn sensor_type(raw: i32) -> Result<SensorType, ProtocolError> {
    SensorType::from_i32(raw).ok_or_else(|| ProtocolError::Malformed(format!("sensor type {raw}")))
}

fn data_type(raw: i32) -> Result<DataType, ProtocolError> {
    DataType::from_i32(raw).ok_or_else(|| ProtocolError::Malformed(format!("datatype {raw}")))
}

/// A fixed-size record with an explicit field-by-field encoding.
pub trait WireRecord: Sized {
    /// Encoded size in bytes.
    const WIRE_SIZE: usize;

    /// Append the encoding of `self` to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Decode from exactly [`Self::WIRE_SIZE`] bytes.
    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError>;
}

impl WireRecord for ChannelGroup {
    const WIRE_SIZE: usize = 24;

    fn encode(&self, out: &mut Vec<u8>) {
        put_i32(out, self.sensor_type as i32);
        put_u32(out, self.index);
        put_u32(out, self.nch);
        put_u32(out, self.iarray);
        put_u32(out, self.arr_offset);
        put_i32(out, self.datatype as i32);
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_len::<Self>(bytes)?;
        let mut f = Fields::new(bytes);
        let sensor_type = sensor_type(f.i32())?;
        let index = f.u32();
        let nch = f.u32();
        let iarray = f.u32();
        let arr_offset = f.u32();
        let datatype = data_type(f.i32())?;
        Ok(Self {
            sensor_type,
            index,
            nch,
            iarray,
            arr_offset,
            datatype,
        })
    }
}

impl WireRecord for SelectedChannel {
    const WIRE_SIZE: usize = 40;

    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, self.in_offset);
        put_i32(out, self.in_type as i32);
        put_i32(out, self.out_type as i32);
        put_u32(out, self.iarray);
        put_u32(out, self.arr_offset);
        put_i32(out, self.scaling as i32);
        put_f64(out, self.scale.offset);
        put_f64(out, self.scale.multiplier);
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_len::<Self>(bytes)?;
        let mut f = Fields::new(bytes);
        let in_offset = f.u32();
        let in_type = data_type(f.i32())?;
        let out_type = data_type(f.i32())?;
        let iarray = f.u32();
        let arr_offset = f.u32();
        let scaling = f.i32() != 0;
        let offset = f.f64();
        let multiplier = f.f64();
        Ok(Self {
            in_offset,
            in_type,
            out_type,
            iarray,
            arr_offset,
            scaling,
            scale: Scale { offset, multiplier },
        })
    }
}

impl WireRecord for ChannelInfo {
    const WIRE_SIZE: usize = LABEL_LEN + UNIT_LEN + TRANSDUCER_LEN + PREFILTERING_LEN + 4 + 4 + 8 + 8;

    fn encode(&self, out: &mut Vec<u8>) {
        put_text(out, &self.label, LABEL_LEN);
        put_text(out, &self.unit, UNIT_LEN);
        put_text(out, &self.transducer, TRANSDUCER_LEN);
        put_text(out, &self.prefiltering, PREFILTERING_LEN);
        put_i32(out, self.isint as i32);
        put_i32(out, self.dtype as i32);
        put_f64(out, self.min.as_f64());
        put_f64(out, self.max.as_f64());
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_len::<Self>(bytes)?;
        let mut f = Fields::new(bytes);
        let label = f.text(LABEL_LEN);
        let unit = f.text(UNIT_LEN);
        let transducer = f.text(TRANSDUCER_LEN);
        let prefiltering = f.text(PREFILTERING_LEN);
        let isint = f.i32() != 0;
        let dtype = data_type(f.i32())?;
        let min = NativeValue::from_f64(dtype, f.f64());
        let max = NativeValue::from_f64(dtype, f.f64());
        Ok(Self {
            label: bounded(&label),
            unit: bounded(&unit),
            transducer: bounded(&transducer),
            prefiltering: bounded(&prefiltering),
            isint,
            dtype,
            min,
            max,
        })
    }
}

/// Payload of a FILL_CHINFO request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChinfoRequest {
    /// Sensor type of the channel.
    pub sensor_type: SensorType,
    /// Channel index within its sensor type.
    pub index: u32,
}

impl WireRecord for ChinfoRequest {
    const WIRE_SIZE: usize = 8;

    fn encode(&self, out: &mut Vec<u8>) {
        put_i32(out, self.sensor_type as i32);
        put_u32(out, self.index);
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_len::<Self>(bytes)?;
        let mut f = Fields::new(bytes);
        Ok(Self {
            sensor_type: sensor_type(f.i32())?,
            index: f.u32(),
        })
    }
}

/// Fixed-size part of the capability payload.
const CAPS_FIXED_SIZE: usize = 4 + 4 * NUM_SENSOR_TYPES + 4 + 4;

const_assert_eq!(<ChannelGroup as WireRecord>::WIRE_SIZE, 6 * 4);
const_assert_eq!(<SelectedChannel as WireRecord>::WIRE_SIZE, 6 * 4 + 2 * 8);
const_assert_eq!(<ChannelInfo as WireRecord>::WIRE_SIZE, 328);
const_assert_eq!(CAPS_FIXED_SIZE, 24);

fn check_len<T: WireRecord>(bytes: &[u8]) -> Result<(), ProtocolError> {
    if bytes.len() == T::WIRE_SIZE {
        Ok(())
    } else {
        Err(ProtocolError::Malformed(format!(
            "record of {} bytes, expected {}",
            bytes.len(),
            T::WIRE_SIZE
        )))
    }
}

/// Encode a list of records back to back.
pub fn encode_records<T: WireRecord>(records: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * T::WIRE_SIZE);
    for record in records {
        record.encode(&mut out);
    }
    out
}

/// Decode a buffer holding whole records back to back.
pub fn decode_records<T: WireRecord>(bytes: &[u8]) -> Result<Vec<T>, ProtocolError> {
    if bytes.len() % T::WIRE_SIZE != 0 {
        return Err(ProtocolError::Malformed(format!(
            "{} bytes is not a multiple of {}",
            bytes.len(),
            T::WIRE_SIZE
        )));
    }
    bytes.chunks_exact(T::WIRE_SIZE).map(T::decode).collect()
}

/// Read one record from a stream.
pub fn read_record<T: WireRecord, R: Read + ?Sized>(reader: &mut R) -> Result<T, ProtocolError> {
    let bytes = read_payload(reader, T::WIRE_SIZE)?;
    T::decode(&bytes)
}

/// Encode a SET_CHANNEL_GROUPS reply payload: entry count then entries.
pub fn encode_selection(table: &[SelectedChannel]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + table.len() * SelectedChannel::WIRE_SIZE);
    put_u32(&mut out, table.len() as u32);
    for entry in table {
        entry.encode(&mut out);
    }
    out
}

/// Largest entry count accepted in a SET_CHANNEL_GROUPS reply.
pub const MAX_SELECTION_ENTRIES: usize = MAX_COMMAND_PAYLOAD / SelectedChannel::WIRE_SIZE;

/// Read a SET_CHANNEL_GROUPS reply payload.
///
/// The entry count is checked before anything is allocated.
pub fn read_selection<R: Read + ?Sized>(
    reader: &mut R,
) -> Result<Vec<SelectedChannel>, ProtocolError> {
    let mut raw = [0u8; 4];
    read_exact(reader, &mut raw)?;
    let count = u32::from_ne_bytes(raw) as usize;
    let size = count
        .checked_mul(SelectedChannel::WIRE_SIZE)
        .filter(|_| count <= MAX_SELECTION_ENTRIES)
        .ok_or_else(|| {
            ProtocolError::Malformed(format!(
                "selection of {count} entries exceeds {MAX_SELECTION_ENTRIES}"
            ))
        })?;
    let bytes = read_payload(reader, size)?;
    decode_records(&bytes)
}

/// Encode an UPDATE_CAPABILITIES payload.
pub fn encode_capabilities(caps: &Capabilities) -> Vec<u8> {
    let devtype_len = caps.device_type.len() + 1;
    let devid_len = caps.device_id.len() + 1;

    let mut out = Vec::with_capacity(CAPS_FIXED_SIZE + devtype_len + devid_len);
    put_u32(&mut out, caps.sampling_freq);
    for nch in caps.type_nch {
        put_u32(&mut out, nch);
    }
    put_u32(&mut out, devtype_len as u32);
    put_u32(&mut out, devid_len as u32);
    out.extend_from_slice(caps.device_type.as_bytes());
    out.push(0);
    out.extend_from_slice(caps.device_id.as_bytes());
    out.push(0);
    out
}

/// Read an UPDATE_CAPABILITIES payload.
pub fn read_capabilities<R: Read + ?Sized>(reader: &mut R) -> Result<Capabilities, ProtocolError> {
    let fixed = read_payload(reader, CAPS_FIXED_SIZE)?;
    let mut f = Fields::new(&fixed);

    let sampling_freq = f.u32();
    let mut type_nch = [0u32; NUM_SENSOR_TYPES];
    for nch in type_nch.iter_mut() {
        *nch = f.u32();
    }
    let devtype_len = f.u32() as usize;
    let devid_len = f.u32() as usize;

    let device_type = read_identity(reader, devtype_len)?;
    let device_id = read_identity(reader, devid_len)?;

    Ok(Capabilities {
        sampling_freq,
        type_nch,
        device_type,
        device_id,
    })
}

fn read_identity<R: Read + ?Sized>(reader: &mut R, len: usize) -> Result<String, ProtocolError> {
    if len == 0 || len > MAX_IDENTITY_LEN {
        return Err(ProtocolError::Malformed(format!("identity string of {len} bytes")));
    }
    let raw = read_payload(reader, len)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}
