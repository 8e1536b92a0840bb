//! Driver runtime: the command loop of an isolated driver process.
//!
//! ```text
//!            open ok           START_ACQ
//! Opening ───────────► Ready ───────────► Acquiring
//!    │                  ▲  │  ◄─────────────  │
//!    │ open failed      │  │    STOP_ACQ      │
//!    ▼                  │  │ CLOSE_DEVICE     │ CLOSE_DEVICE
//!  Failed               │  ▼                  │ (stops first)
//!                       │ Closed ◄────────────┘
//! ```
//!
//! The loop reads one header at a time from control-in, runs the device
//! operation and writes exactly one reply. Control-in EOF or a read error
//! is an implicit close: acquisition is stopped, the device closed, no
//! reply is sent and the run ends with a failure outcome.

use crate::device::EegDevice;
use crate::link::DeviceLink;
use egd_common::consts::MAX_COMMAND_PAYLOAD;
use egd_common::error::{DeviceError, DeviceResult, ErrorCode};
use egd_common::protocol::{
    decode_records, encode_records, encode_selection, read_header, read_payload, ChinfoRequest,
    Command, Header, ProtocolError, WireRecord,
};
use egd_common::types::{ChannelGroup, SelectedChannel};
use std::io::Read;
use tracing::{debug, error, info, warn};

/// Runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Device open in progress.
    Opening,
    /// Open, not acquiring.
    Ready,
    /// Capture running.
    Acquiring,
    /// Closed; terminal.
    Closed,
    /// Open failed; terminal.
    Failed,
}

impl RuntimeState {
    /// Short name, as used in errors and logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Ready => "ready",
            Self::Acquiring => "acquiring",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

/// How a run ended.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// CLOSE_DEVICE processed and acknowledged.
    Closed,
    /// Device open failed with this code.
    OpenFailed(ErrorCode),
    /// Control-in closed or broke without CLOSE_DEVICE.
    ControlLost,
    /// Control-out could not be written.
    ChannelFault(ErrorCode),
}

impl RunOutcome {
    /// Whether the process should exit successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

enum Flow {
    Continue,
    Exit,
    Abort,
}

/// Command loop of one device.
pub struct DriverRuntime<R: Read> {
    control_in: R,
    link: DeviceLink,
    device: Option<Box<dyn EegDevice>>,
    state: RuntimeState,
    open_error: ErrorCode,
    selected: Vec<SelectedChannel>,
}

impl<R: Read> DriverRuntime<R> {
    /// Open the device and report the result with CREATION_ENDED.
    ///
    /// `open` receives a clone of `link` and must publish capabilities
    /// through it before returning. A device that does not is closed again
    /// and the open reported as failed with `EINVAL`.
    pub fn open<F>(control_in: R, link: DeviceLink, open: F) -> Self
    where
        F: FnOnce(DeviceLink) -> DeviceResult<Box<dyn EegDevice>>,
    {
        let mut runtime = Self {
            control_in,
            link: link.clone(),
            device: None,
            state: RuntimeState::Opening,
            open_error: 0,
            selected: Vec::new(),
        };

        let opened = open(link).and_then(|mut device| {
            if runtime.link.capabilities().is_some() {
                Ok(device)
            } else {
                let _ = device.close_device();
                Err(DeviceError::invalid("device did not report capabilities"))
            }
        });

        let status = match opened {
            Ok(device) => {
                info!(driver = device.name(), samlen = runtime.link.input_samlen(), "device opened");
                runtime.device = Some(device);
                runtime.state = RuntimeState::Ready;
                0
            }
            Err(err) => {
                error!(code = err.code(), "device open failed: {err}");
                runtime.state = RuntimeState::Failed;
                runtime.open_error = err.code();
                err.code()
            }
        };

        if let Err(err) = runtime.link.send(Command::CreationEnded, status, &[]) {
            error!("could not send CREATION_ENDED: {err}");
        }
        runtime
    }

    /// Current state.
    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Active selected-channel table.
    pub fn selected(&self) -> &[SelectedChannel] {
        &self.selected
    }

    /// Process commands until CLOSE_DEVICE or loss of control-in.
    pub fn run(&mut self) -> RunOutcome {
        if self.state == RuntimeState::Failed {
            return RunOutcome::OpenFailed(self.open_error);
        }

        loop {
            let header = match read_header(&mut self.control_in) {
                Ok(header) => header,
                Err(ProtocolError::Closed) => {
                    warn!("control-in closed without CLOSE_DEVICE");
                    self.implicit_close();
                    return RunOutcome::ControlLost;
                }
                Err(err) => {
                    error!("control-in read failed: {err}");
                    self.implicit_close();
                    return RunOutcome::ControlLost;
                }
            };

            match self.dispatch(header) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => return RunOutcome::Closed,
                Ok(Flow::Abort) => return RunOutcome::ControlLost,
                Err(err) => {
                    error!("control-out write failed: {err}");
                    self.implicit_close();
                    return RunOutcome::ChannelFault(err.code());
                }
            }
        }
    }

    /// Run one command. `Err` means the reply could not be written.
    fn dispatch(&mut self, header: Header) -> DeviceResult<Flow> {
        let Some(command) = header.command() else {
            return self.reject(header);
        };
        debug!(?command, aux = header.aux, state = self.state.name(), "command received");

        match command {
            Command::SetChannelGroups | Command::FillChinfo => {
                let Some(size) = payload_size(header.aux) else {
                    // Payload cannot be drained, control-in is out of sync.
                    error!(?command, aux = header.aux, "payload size out of range");
                    let err = DeviceError::invalid(format!("payload size {}", header.aux));
                    self.link.reply(command, Err(err))?;
                    self.implicit_close();
                    return Ok(Flow::Abort);
                };
                let result = if command == Command::SetChannelGroups {
                    self.set_channel_groups(size)
                } else {
                    self.fill_chinfo(size)
                };
                self.link.reply(command, result)?;
            }
            Command::StartAcq => {
                let result = self.start_acq().map(|()| Vec::new());
                self.link.reply(command, result)?;
            }
            Command::StopAcq => {
                self.stop_acq();
                self.link.reply(command, Ok(Vec::new()))?;
            }
            Command::CloseDevice => {
                let result = self.close_device().map(|()| Vec::new());
                self.link.reply(command, result)?;
                info!("device closed");
                return Ok(Flow::Exit);
            }
            Command::CreationEnded
            | Command::ReportError
            | Command::UpdateCapabilities
            | Command::SetSamlen => return self.reject(header),
        }
        Ok(Flow::Continue)
    }

    /// Answer a command id the runtime never accepts and end the session.
    fn reject(&mut self, header: Header) -> DeviceResult<Flow> {
        error!(id = header.command, aux = header.aux, "unexpected command");
        let reply = Header {
            command: header.command,
            aux: libc::ECHILD,
        };
        self.link.send_raw(reply, &[])?;
        self.implicit_close();
        Ok(Flow::Abort)
    }

    fn device(&mut self) -> DeviceResult<&mut Box<dyn EegDevice>> {
        self.device
            .as_mut()
            .ok_or(DeviceError::InvalidState(self.state.name()))
    }

    fn set_channel_groups(&mut self, size: usize) -> DeviceResult<Vec<u8>> {
        let bytes = read_payload(&mut self.control_in, size)?;
        if size % ChannelGroup::WIRE_SIZE != 0 {
            return Err(DeviceError::invalid(format!(
                "group payload of {size} bytes"
            )));
        }
        let groups: Vec<ChannelGroup> = decode_records(&bytes)?;

        let table = self.device()?.set_channel_groups(&groups)?;
        let expected: usize = groups.iter().map(|g| g.nch as usize).sum();
        if table.len() != expected {
            return Err(DeviceError::invalid(format!(
                "driver resolved {} channels, expected {expected}",
                table.len()
            )));
        }

        debug!(groups = groups.len(), channels = table.len(), "channel groups set");
        let reply = encode_selection(&table);
        self.selected = table;
        Ok(reply)
    }

    fn start_acq(&mut self) -> DeviceResult<()> {
        if self.state == RuntimeState::Acquiring {
            return Err(DeviceError::InvalidState(self.state.name()));
        }
        self.device()?.start_acq()?;
        self.state = RuntimeState::Acquiring;
        info!("acquisition started");
        Ok(())
    }

    fn stop_acq(&mut self) {
        if self.state != RuntimeState::Acquiring {
            return;
        }
        if let Some(device) = self.device.as_mut() {
            if let Err(err) = device.stop_acq() {
                warn!(code = err.code(), "stop_acq failed: {err}");
            }
        }
        self.state = RuntimeState::Ready;
        info!("acquisition stopped");
    }

    fn fill_chinfo(&mut self, size: usize) -> DeviceResult<Vec<u8>> {
        let bytes = read_payload(&mut self.control_in, size)?;
        if size != ChinfoRequest::WIRE_SIZE {
            return Err(DeviceError::invalid(format!(
                "chinfo request of {size} bytes"
            )));
        }
        let request = ChinfoRequest::decode(&bytes)?;

        let available = self
            .link
            .capabilities()
            .map(|caps| caps.nch(request.sensor_type))
            .unwrap_or(0);
        if request.index >= available {
            return Err(DeviceError::invalid(format!(
                "{} channel {} of {available}",
                request.sensor_type.name(),
                request.index
            )));
        }

        let info = self
            .device()?
            .fill_chinfo(request.sensor_type, request.index)?;
        Ok(encode_records(&[info]))
    }

    fn close_device(&mut self) -> DeviceResult<()> {
        self.stop_acq();
        let result = match self.device.as_mut() {
            Some(device) => device.close_device(),
            None => Ok(()),
        };
        self.device = None;
        self.selected = Vec::new();
        self.state = RuntimeState::Closed;
        result
    }

    fn implicit_close(&mut self) {
        if let Err(err) = self.close_device() {
            warn!(code = err.code(), "close after control loss failed: {err}");
        }
    }
}

fn payload_size(aux: i32) -> Option<usize> {
    usize::try_from(aux)
        .ok()
        .filter(|&size| size <= MAX_COMMAND_PAYLOAD)
}
