//! Consumer side of the data path.
//!
//! [`SampleBuffer`] is the [`SampleSink`] given to a [`DeviceProxy`]: it
//! queues raw data-out bytes until the application asks for them.
//! [`Acquisition`] pairs it with the [`FrameDemux`] of the current channel
//! selection, so `get_data` hands out typed, scaled samples.
//!
//! A new selection replaces the demultiplexer between two `get_data`
//! calls. Bytes are only consumed in whole frames.
//!
//! The queue is bounded. When the consumer falls behind, incoming bytes are
//! dropped, the next `take` reports `EOVERFLOW`, and queuing resumes at the
//! next frame boundary.

use crate::supervisor::{DeviceProxy, SampleLength, SampleSink};
use egd_common::demux::FrameDemux;
use egd_common::error::{DeviceError, DeviceResult};
use egd_common::types::{ChannelGroup, SelectedChannel};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Queue limit before any frame layout is known.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 << 20;

/// Seconds of signal the queue holds once the frame layout is known.
pub const BUFFER_SECONDS: usize = 10;

struct BufferState {
    bytes: VecDeque<u8>,
    ended: bool,
    error: Option<DeviceError>,
    capacity: usize,
    frame_size: usize,
    /// Stream bytes received so far, dropped ones included.
    position: u64,
    overflow: bool,
    resync: bool,
}

impl Default for BufferState {
    fn default() -> Self {
        Self {
            bytes: VecDeque::new(),
            ended: false,
            error: None,
            capacity: DEFAULT_BUFFER_CAPACITY,
            frame_size: 1,
            position: 0,
            overflow: false,
            resync: false,
        }
    }
}

impl BufferState {
    /// Queue `bytes`, or drop them and flag an overflow if they do not fit.
    fn push(&mut self, mut bytes: &[u8]) {
        let start = self.position;
        self.position += bytes.len() as u64;

        if self.resync {
            let frame = self.frame_size as u64;
            let skip = ((frame - start % frame) % frame) as usize;
            if skip >= bytes.len() {
                return;
            }
            bytes = &bytes[skip..];
            self.resync = false;
        }

        if self.bytes.len() + bytes.len() > self.capacity {
            if !self.overflow {
                warn!(
                    queued = self.bytes.len(),
                    capacity = self.capacity,
                    "sample buffer overflow, dropping data"
                );
            }
            self.overflow = true;
            self.resync = true;
            let whole = self.bytes.len() / self.frame_size * self.frame_size;
            self.bytes.truncate(whole);
            return;
        }
        self.bytes.extend(bytes);
    }
}

#[derive(Default)]
struct BufferInner {
    state: Mutex<BufferState>,
    ready: Condvar,
}

/// Shared queue of raw sample bytes.
#[derive(Clone, Default)]
pub struct SampleBuffer {
    inner: Arc<BufferInner>,
}

impl SampleBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued bytes.
    pub fn len(&self) -> usize {
        self.inner.state.lock().bytes.len()
    }

    /// Whether no bytes are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the stream has ended.
    pub fn is_ended(&self) -> bool {
        self.inner.state.lock().ended
    }

    /// Drop all queued bytes.
    pub fn clear(&self) {
        self.inner.state.lock().bytes.clear();
    }

    /// Current queue limit in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity
    }

    /// Bound the queue to `max_frames` frames of `frame_size` bytes.
    ///
    /// The frame size also sets where queuing resumes after an overflow.
    pub fn set_frames(&self, frame_size: usize, max_frames: usize) {
        let frame_size = frame_size.max(1);
        let mut state = self.inner.state.lock();
        state.frame_size = frame_size;
        state.capacity = frame_size.saturating_mul(max_frames.max(1));
        debug!(frame_size, capacity = state.capacity, "sample buffer bounded");
    }

    /// Remove up to `max_frames` whole frames of `frame_size` bytes.
    ///
    /// Waits up to `timeout` for at least one frame. Returns an empty vector
    /// on timeout, `ECHILD` (or the read error) once the stream has ended and
    /// fewer than one frame is left. `EOVERFLOW` is returned once after data
    /// had to be dropped; queued frames stay available to the next call.
    pub fn take(&self, frame_size: usize, max_frames: usize, timeout: Duration) -> DeviceResult<Vec<u8>> {
        if frame_size == 0 || max_frames == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.bytes.len() < frame_size && !state.ended && !state.overflow {
            if self.inner.ready.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        if state.overflow {
            state.overflow = false;
            return Err(DeviceError::Device(libc::EOVERFLOW));
        }

        let frames = (state.bytes.len() / frame_size).min(max_frames);
        if frames == 0 && state.ended {
            return Err(match state.error.take() {
                Some(err) => err,
                None => DeviceError::CommBroken,
            });
        }
        Ok(state.bytes.drain(..frames * frame_size).collect())
    }
}

impl SampleSink for SampleBuffer {
    fn on_samples(&mut self, bytes: &[u8]) {
        let mut state = self.inner.state.lock();
        state.push(bytes);
        drop(state);
        self.inner.ready.notify_all();
    }

    fn on_end(&mut self, error: Option<DeviceError>) {
        let mut state = self.inner.state.lock();
        state.ended = true;
        state.error = error;
        drop(state);
        self.inner.ready.notify_all();
    }
}

/// Typed sample acquisition on top of a [`DeviceProxy`].
#[derive(Default)]
pub struct Acquisition {
    buffer: SampleBuffer,
    demux: Mutex<Option<Arc<FrameDemux>>>,
    samlen: Mutex<Option<SampleLength>>,
}

impl Acquisition {
    /// Create an unconfigured acquisition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink to pass to [`DeviceProxy::spawn`].
    pub fn sink(&self) -> SampleBuffer {
        self.buffer.clone()
    }

    /// Apply channel groups on the device and rebuild the demultiplexer.
    ///
    /// `strides[i]` is the byte size of one sample in destination array `i`.
    /// On failure the previous selection stays active. The sample queue is
    /// bounded to [`BUFFER_SECONDS`] of raw frames.
    pub fn configure(
        &self,
        proxy: &mut DeviceProxy,
        groups: &[ChannelGroup],
        strides: &[usize],
    ) -> DeviceResult<Vec<SelectedChannel>> {
        let table = proxy.set_channel_groups(groups)?;
        let samlen = proxy.sample_length();
        let frame_size = samlen.get() as usize;
        let demux = FrameDemux::new(&table, frame_size, strides)?;
        debug!(channels = table.len(), ?strides, "selection applied");

        let fs = proxy.capabilities().sampling_freq as usize;
        self.buffer
            .set_frames(frame_size, fs.saturating_mul(BUFFER_SECONDS));
        *self.demux.lock() = Some(Arc::new(demux));
        *self.samlen.lock() = Some(samlen);
        Ok(table)
    }

    /// Install a demultiplexer built elsewhere.
    ///
    /// With `samlen`, `get_data` fails once the driver announces a frame
    /// length other than the one `demux` was built for.
    pub fn set_demux(&self, demux: FrameDemux, samlen: Option<SampleLength>) {
        *self.demux.lock() = Some(Arc::new(demux));
        *self.samlen.lock() = samlen;
    }

    /// Fill `outputs` with as many frames as fit, waiting up to `timeout`
    /// for the first one. Returns the number of frames written.
    pub fn get_data(
        &self,
        outputs: &mut [&mut [u8]],
        max_frames: usize,
        timeout: Duration,
    ) -> DeviceResult<usize> {
        let demux = self
            .demux
            .lock()
            .clone()
            .ok_or(DeviceError::InvalidState("unconfigured"))?;

        if let Some(samlen) = self.samlen.lock().as_ref() {
            let current = samlen.get() as usize;
            if current != demux.samlen() {
                warn!(
                    current,
                    configured = demux.samlen(),
                    "input frame length changed, selection must be reapplied"
                );
                return Err(DeviceError::InvalidState("input frame length changed"));
            }
        }

        let capacity = outputs
            .iter()
            .zip(demux.strides())
            .filter(|(_, stride)| **stride > 0)
            .map(|(out, stride)| out.len() / stride)
            .min()
            .unwrap_or(max_frames)
            .min(max_frames);

        let raw = self.buffer.take(demux.samlen(), capacity, timeout)?;
        let frames = demux.demux(&raw, outputs)?;
        if frames * demux.samlen() != raw.len() {
            warn!(bytes = raw.len(), "partial frame dropped");
        }
        Ok(frames)
    }

    /// Whether the driver's data stream has ended.
    pub fn is_ended(&self) -> bool {
        self.buffer.is_ended()
    }
}
