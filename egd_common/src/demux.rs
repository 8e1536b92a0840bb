//! Frame demultiplexing on the consuming side.
//!
//! [`FrameDemux`] is built once from a selected-channel table. Each entry
//! carries its resolved [`CastFn`], so scattering a chunk of raw frames into
//! the destination arrays is a flat loop with no datatype dispatch.

use crate::cast::{get_cast_fn, CastFn};
use crate::error::{DeviceError, DeviceResult};
use crate::types::{Scale, SelectedChannel};
use tracing::debug;

#[derive(Clone, Copy)]
struct Route {
    in_offset: usize,
    in_size: usize,
    iarray: usize,
    out_offset: usize,
    out_size: usize,
    cast: CastFn,
    scale: Scale,
}

/// Scatters raw frames into per-array strided buffers.
#[derive(Clone)]
pub struct FrameDemux {
    routes: Vec<Route>,
    samlen: usize,
    strides: Vec<usize>,
}

impl FrameDemux {
    /// Build from a selected-channel table.
    ///
    /// `samlen` is the raw frame length; `strides[i]` is the byte length of
    /// one sample in destination array `i`. Entries that would read past the
    /// frame or write past their stride are rejected.
    pub fn new(selch: &[SelectedChannel], samlen: usize, strides: &[usize]) -> DeviceResult<Self> {
        let mut routes = Vec::new();
        routes
            .try_reserve_exact(selch.len())
            .map_err(|_| DeviceError::OutOfMemory)?;

        for (i, ch) in selch.iter().enumerate() {
            let iarray = ch.iarray as usize;
            let stride = *strides
                .get(iarray)
                .ok_or_else(|| DeviceError::invalid(format!("channel {i}: no array {iarray}")))?;

            let route = Route {
                in_offset: ch.in_offset as usize,
                in_size: ch.in_type.size(),
                iarray,
                out_offset: ch.arr_offset as usize,
                out_size: ch.out_type.size(),
                cast: get_cast_fn(ch.in_type, ch.out_type, ch.scaling),
                scale: ch.scale,
            };

            if route.in_offset + route.in_size > samlen {
                return Err(DeviceError::invalid(format!(
                    "channel {i}: input offset {} outside frame of {samlen} bytes",
                    route.in_offset
                )));
            }
            if route.out_offset + route.out_size > stride {
                return Err(DeviceError::invalid(format!(
                    "channel {i}: output offset {} outside stride {stride}",
                    route.out_offset
                )));
            }
            routes.push(route);
        }

        debug!(channels = routes.len(), samlen, arrays = strides.len(), "frame demux built");
        Ok(Self {
            routes,
            samlen,
            strides: strides.to_vec(),
        })
    }

    /// Raw frame length in bytes.
    #[inline]
    pub fn samlen(&self) -> usize {
        self.samlen
    }

    /// Destination strides, one per array.
    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Number of routed channels.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.routes.len()
    }

    /// Convert every whole frame of `input` into `outputs`.
    ///
    /// Returns the number of frames written. Each output must hold at least
    /// that many strides. A trailing partial frame is ignored.
    pub fn demux(&self, input: &[u8], outputs: &mut [&mut [u8]]) -> DeviceResult<usize> {
        if self.samlen == 0 {
            return Ok(0);
        }
        let frames = input.len() / self.samlen;

        if outputs.len() < self.strides.len() {
            return Err(DeviceError::invalid(format!(
                "{} output arrays, expected {}",
                outputs.len(),
                self.strides.len()
            )));
        }
        for (i, (out, stride)) in outputs.iter().zip(&self.strides).enumerate() {
            if out.len() < frames * stride {
                return Err(DeviceError::invalid(format!(
                    "array {i} holds {} bytes, needs {}",
                    out.len(),
                    frames * stride
                )));
            }
        }

        for (frame_idx, frame) in input.chunks_exact(self.samlen).enumerate() {
            for route in &self.routes {
                let src = &frame[route.in_offset..route.in_offset + route.in_size];
                let base = frame_idx * self.strides[route.iarray] + route.out_offset;
                let dst = &mut outputs[route.iarray][base..base + route.out_size];
                (route.cast)(dst, src, &route.scale);
            }
        }

        Ok(frames)
    }
}

impl std::fmt::Debug for FrameDemux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDemux")
            .field("channels", &self.routes.len())
            .field("samlen", &self.samlen)
            .field("strides", &self.strides)
            .finish()
    }
}
