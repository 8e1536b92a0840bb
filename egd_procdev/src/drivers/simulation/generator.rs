//! Deterministic raw frame generation.

use std::f64::consts::TAU;

/// Full-scale magnitude of the simulated 24-bit converter.
const FULL_SCALE: f64 = 8_388_607.0;

/// Produces raw `Int32` frames laid out as EEG, sensors, trigger.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    fs: f64,
    neeg: usize,
    nsensor: usize,
    trigger: i32,
    frame: u64,
}

impl SignalGenerator {
    /// Create a generator at frame 0.
    pub fn new(fs: u32, neeg: usize, nsensor: usize, trigger: i32) -> Self {
        Self {
            fs: f64::from(fs.max(1)),
            neeg,
            nsensor,
            trigger,
            frame: 0,
        }
    }

    /// Bytes per frame.
    pub fn frame_size(&self) -> usize {
        (self.neeg + self.nsensor + 1) * std::mem::size_of::<i32>()
    }

    /// Frames generated so far.
    pub fn position(&self) -> u64 {
        self.frame
    }

    /// Append `frames` frames to `out`.
    pub fn fill(&mut self, out: &mut Vec<u8>, frames: usize) {
        out.reserve(frames * self.frame_size());
        for _ in 0..frames {
            let t = self.frame as f64 / self.fs;

            // EEG: one sine per channel, 1 to 16 Hz, quarter scale
            for ch in 0..self.neeg {
                let freq = 1.0 + (ch % 16) as f64;
                let v = 0.25 * FULL_SCALE * (TAU * freq * t).sin();
                out.extend_from_slice(&(v as i32).to_ne_bytes());
            }

            // Sensors: 1 Hz sawtooth with a per-channel phase
            for ch in 0..self.nsensor {
                let phase = (t + ch as f64 / self.nsensor.max(1) as f64).fract();
                let v = (2.0 * phase - 1.0) * 0.5 * FULL_SCALE;
                out.extend_from_slice(&(v as i32).to_ne_bytes());
            }

            out.extend_from_slice(&self.trigger.to_ne_bytes());
            self.frame += 1;
        }
    }
}
