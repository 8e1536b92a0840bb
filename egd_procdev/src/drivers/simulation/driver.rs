//! Simulation driver implementation.
//!
//! `SimulationDriver` implements `EegDevice` for a software amplifier. A
//! capture thread paces chunks of [`SignalGenerator`] frames to the
//! sampling frequency and pushes them on data-out.

use super::generator::SignalGenerator;
use super::DRIVER_NAME;
use crate::device::{EegDevice, OpenOptions};
use crate::link::DeviceLink;
use egd_common::channels::{resolve_channel_groups, InputLayout};
use egd_common::error::{DeviceError, DeviceResult};
use egd_common::settings::Settings;
use egd_common::types::{
    Capabilities, ChannelGroup, ChannelInfo, DataType, NativeValue, Scale, SelectedChannel,
    SensorType,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Number of auxiliary sensor channels.
const NUM_SENSORS: u32 = 8;

/// Largest accepted EEG channel count.
const MAX_EEG: u32 = 1024;

/// Gain from raw converter units to microvolts.
const UV_PER_LSB: f64 = 1.0 / 32.0;

/// Parsed device options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationOptions {
    /// Sampling frequency in Hz.
    pub fs: u32,
    /// EEG channel count.
    pub numch: u32,
    /// Constant trigger value.
    pub trigger: i32,
    /// Frames per data-out write.
    pub chunk: u32,
    /// Make open fail.
    pub fail: bool,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            fs: 2048,
            numch: 64,
            trigger: 0,
            chunk: 32,
            fail: false,
        }
    }
}

impl SimulationOptions {
    /// Parse the device option string and channel count argument.
    pub fn parse(options: &OpenOptions) -> DeviceResult<Self> {
        let settings = Settings::parse_options(&options.path)?;
        let defaults = Self::default();

        let numch = match options.numch {
            0 => settings.get_parsed("numch", defaults.numch)?,
            n => n,
        };
        let parsed = Self {
            fs: settings.get_parsed("fs", defaults.fs)?,
            numch,
            trigger: settings.get_parsed("trigger", defaults.trigger)?,
            chunk: settings.get_parsed("chunk", defaults.chunk)?,
            fail: settings.get_parsed::<u32>("fail", 0)? != 0,
        };

        if parsed.fs == 0 {
            return Err(DeviceError::invalid("fs must be greater than 0"));
        }
        if parsed.numch == 0 || parsed.numch > MAX_EEG {
            return Err(DeviceError::invalid(format!(
                "numch {} outside 1..={MAX_EEG}",
                parsed.numch
            )));
        }
        if parsed.chunk == 0 {
            return Err(DeviceError::invalid("chunk must be greater than 0"));
        }
        Ok(parsed)
    }
}

/// Running capture thread.
struct Capture {
    running: Arc<AtomicBool>,
    handle: JoinHandle<SignalGenerator>,
}

/// Simulated amplifier.
pub struct SimulationDriver {
    options: SimulationOptions,
    caps: Capabilities,
    layout: InputLayout,
    link: DeviceLink,
    generator: Option<SignalGenerator>,
    capture: Option<Capture>,
}

impl SimulationDriver {
    /// Open the device and publish its capabilities and frame length.
    pub fn open(options: SimulationOptions, link: DeviceLink) -> DeviceResult<Self> {
        if options.fail {
            warn!("simulated open failure requested");
            return Err(DeviceError::Device(libc::ENODEV));
        }

        let mut type_nch = [0u32; 3];
        type_nch[SensorType::Eeg.index()] = options.numch;
        type_nch[SensorType::Trigger.index()] = 1;
        type_nch[SensorType::Sensor.index()] = NUM_SENSORS;

        let caps = Capabilities {
            sampling_freq: options.fs,
            type_nch,
            device_type: "Simulated 24-bit amplifier".to_string(),
            device_id: format!("sim-{}ch", options.numch),
        };
        let layout = InputLayout::packed(
            &caps,
            &[
                (SensorType::Eeg, Some(Scale::gain(UV_PER_LSB))),
                (SensorType::Sensor, Some(Scale::gain(UV_PER_LSB))),
                (SensorType::Trigger, None),
            ],
            DataType::Int32,
        );

        link.update_capabilities(&caps)?;
        link.set_input_samlen(layout.frame_size(&caps))?;

        info!(
            fs = options.fs,
            eeg = options.numch,
            sensors = NUM_SENSORS,
            "simulated amplifier opened"
        );

        let generator = SignalGenerator::new(
            options.fs,
            options.numch as usize,
            NUM_SENSORS as usize,
            options.trigger,
        );

        Ok(Self {
            options,
            caps,
            layout,
            link,
            generator: Some(generator),
            capture: None,
        })
    }

    /// Raw frame layout.
    pub fn layout(&self) -> &InputLayout {
        &self.layout
    }

    fn join_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.running.store(false, Ordering::Release);
            match capture.handle.join() {
                Ok(generator) => self.generator = Some(generator),
                Err(_) => warn!("capture thread panicked"),
            }
        }
    }
}

fn capture_loop(
    mut generator: SignalGenerator,
    link: DeviceLink,
    running: Arc<AtomicBool>,
    fs: u32,
    chunk: u32,
) -> SignalGenerator {
    let period = Duration::from_secs_f64(f64::from(chunk) / f64::from(fs));
    let mut buf = Vec::new();
    let mut deadline = Instant::now();

    while running.load(Ordering::Acquire) {
        buf.clear();
        generator.fill(&mut buf, chunk as usize);
        if link.update_ringbuffer(&buf).is_err() {
            // Already reported on control-out.
            break;
        }

        deadline += period;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        } else {
            deadline = now;
        }
    }
    debug!(frames = generator.position(), "capture loop finished");
    generator
}

impl EegDevice for SimulationDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn start_acq(&mut self) -> DeviceResult<()> {
        if self.capture.is_some() {
            return Err(DeviceError::InvalidState("acquiring"));
        }
        let generator = self
            .generator
            .take()
            .ok_or(DeviceError::InvalidState("capture thread lost"))?;

        let running = Arc::new(AtomicBool::new(true));
        let link = self.link.clone();
        let flag = running.clone();
        let fs = self.options.fs;
        let chunk = self.options.chunk;

        let handle = std::thread::Builder::new()
            .name("sim-capture".into())
            .spawn(move || capture_loop(generator, link, flag, fs, chunk))?;

        self.capture = Some(Capture { running, handle });
        Ok(())
    }

    fn stop_acq(&mut self) -> DeviceResult<()> {
        self.join_capture();
        Ok(())
    }

    fn set_channel_groups(&mut self, groups: &[ChannelGroup]) -> DeviceResult<Vec<SelectedChannel>> {
        resolve_channel_groups(groups, &self.caps, &self.layout)
    }

    fn fill_chinfo(&mut self, stype: SensorType, index: u32) -> DeviceResult<ChannelInfo> {
        let min_uv = -8_388_608.0 * UV_PER_LSB;
        let max_uv = 8_388_607.0 * UV_PER_LSB;

        Ok(match stype {
            SensorType::Eeg => ChannelInfo::new(
                &format!("EEG{}", index + 1),
                "uV",
                "Active electrode",
                "HP: DC; LP: 417 Hz",
                NativeValue::Float(min_uv as f32),
                NativeValue::Float(max_uv as f32),
            ),
            SensorType::Sensor => ChannelInfo::new(
                &format!("EXG{}", index + 1),
                "uV",
                "Passive electrode",
                "HP: DC; LP: 417 Hz",
                NativeValue::Float(min_uv as f32),
                NativeValue::Float(max_uv as f32),
            ),
            SensorType::Trigger => ChannelInfo::new(
                "Status",
                "Boolean",
                "Triggers and Status",
                "No filtering",
                NativeValue::Int32(-8_388_608),
                NativeValue::Int32(8_388_607),
            ),
        })
    }

    fn close_device(&mut self) -> DeviceResult<()> {
        self.join_capture();
        info!("simulated amplifier closed");
        Ok(())
    }
}

impl Drop for SimulationDriver {
    fn drop(&mut self) {
        self.join_capture();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::tests::SharedBuf;
    use egd_common::protocol::{read_capabilities, read_header, Command};
    use std::io::Cursor;

    fn opts(path: &str, numch: u32) -> OpenOptions {
        OpenOptions {
            path: path.to_string(),
            numch,
        }
    }

    #[test]
    fn options_defaults_and_overrides() {
        let parsed = SimulationOptions::parse(&opts("", 0)).unwrap();
        assert_eq!(parsed, SimulationOptions::default());

        let parsed = SimulationOptions::parse(&opts("fs|512|numch|16|trigger|7", 0)).unwrap();
        assert_eq!(parsed.fs, 512);
        assert_eq!(parsed.numch, 16);
        assert_eq!(parsed.trigger, 7);

        // Process argument wins over the option string.
        let parsed = SimulationOptions::parse(&opts("numch|16", 32)).unwrap();
        assert_eq!(parsed.numch, 32);
    }

    #[test]
    fn options_rejected() {
        for path in ["fs|0", "numch|5000", "chunk|0", "fs|fast", "fs"] {
            let err = SimulationOptions::parse(&opts(path, 0)).unwrap_err();
            assert_eq!(err.code(), libc::EINVAL, "{path}");
        }
    }

    #[test]
    fn fail_option_is_enodev() {
        let options = SimulationOptions::parse(&opts("fail|1", 0)).unwrap();
        let err = SimulationDriver::open(options, DeviceLink::sink()).err().unwrap();
        assert_eq!(err.code(), libc::ENODEV);
    }

    #[test]
    fn open_publishes_capabilities() {
        let control = SharedBuf::default();
        let link = DeviceLink::new(control.clone(), std::io::sink());
        let driver = SimulationDriver::open(SimulationOptions::default(), link.clone()).unwrap();

        let mut stream = Cursor::new(control.take());
        let header = read_header(&mut stream).unwrap();
        assert_eq!(header.command(), Some(Command::UpdateCapabilities));
        let caps = read_capabilities(&mut stream).unwrap();
        assert_eq!(caps.type_nch, [64, 1, 8]);
        assert_eq!(caps.sampling_freq, 2048);

        let header = read_header(&mut stream).unwrap();
        assert_eq!(header.command(), Some(Command::SetSamlen));
        assert_eq!(header.aux, 73 * 4);
        assert_eq!(driver.layout().frame_size(&caps), 73 * 4);
    }

    #[test]
    fn chinfo_ranges() {
        let mut driver = SimulationDriver::open(SimulationOptions::default(), DeviceLink::sink()).unwrap();

        for stype in [SensorType::Eeg, SensorType::Sensor] {
            let info = driver.fill_chinfo(stype, 0).unwrap();
            assert!(!info.isint);
            assert_eq!(info.min, NativeValue::Float(-262144.0));
            assert_eq!(info.max, NativeValue::Float(262143.96875));
        }

        let info = driver.fill_chinfo(SensorType::Trigger, 0).unwrap();
        assert!(info.isint);
        assert_eq!(info.min, NativeValue::Int32(-8388608));
        assert_eq!(info.max, NativeValue::Int32(8388607));
        assert_eq!(info.label.as_str(), "Status");
    }

    #[test]
    fn capture_streams_whole_chunks() {
        let data = SharedBuf::default();
        let link = DeviceLink::new(std::io::sink(), data.clone());
        let options = SimulationOptions {
            fs: 4096,
            numch: 4,
            trigger: 9,
            chunk: 16,
            fail: false,
        };
        let mut driver = SimulationDriver::open(options, link).unwrap();

        driver.start_acq().unwrap();
        assert!(driver.start_acq().is_err());
        std::thread::sleep(Duration::from_millis(50));
        driver.stop_acq().unwrap();

        let bytes = data.take();
        let frame = (4 + 8 + 1) * 4;
        assert!(!bytes.is_empty());
        assert_eq!(bytes.len() % (16 * frame), 0);
        for f in bytes.chunks_exact(frame) {
            let trig = i32::from_ne_bytes(f[frame - 4..].try_into().unwrap());
            assert_eq!(trig, 9);
        }

        // Nothing more arrives once stopped; restart continues the stream.
        std::thread::sleep(Duration::from_millis(10));
        assert!(data.take().is_empty());
        driver.start_acq().unwrap();
        driver.close_device().unwrap();
    }
}
