//! Supervisor side of the isolated driver.
//!
//! [`DeviceProxy`] spawns the driver host process, wires up the three byte
//! channels and turns every device operation into one command/reply exchange.
//!
//! Two background threads run per proxy:
//!
//! - the **control reader** decodes control-out. Unsolicited messages
//!   (errors, capabilities, frame length) update shared state directly;
//!   replies are handed to the waiting command through a channel.
//! - the **data reader** forwards data-out bytes to a [`SampleSink`].
//!
//! A lost control channel surfaces as [`DeviceError::CommBroken`] on the
//! next command.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use egd_common::consts::DATA_FD;
use egd_common::error::{status_to_result, DeviceError, DeviceResult, ErrorCode};
use egd_common::protocol::{
    encode_message, encode_records, read_capabilities, read_header, read_record, read_selection,
    ChinfoRequest, Command, ProtocolError,
};
use egd_common::types::{Capabilities, ChannelGroup, ChannelInfo, SelectedChannel, SensorType};
use nix::fcntl::OFlag;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{pipe2, Pid};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, ExitStatus, Stdio};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Size of one data-out read.
const DATA_READ_SIZE: usize = 64 * 1024;

/// Grace period between closing control-in and escalating to signals.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Consumer of the raw sample stream.
///
/// Called from the data reader thread. Bytes arrive in arbitrary pieces;
/// frame boundaries are not preserved.
pub trait SampleSink: Send + 'static {
    /// Raw bytes received on data-out.
    fn on_samples(&mut self, bytes: &[u8]);

    /// Data-out reached end of stream (`None`) or failed.
    fn on_end(&mut self, error: Option<DeviceError>) {
        let _ = error;
    }
}

/// Sink discarding everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn on_samples(&mut self, _bytes: &[u8]) {}
}

/// How to start the driver host.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyOptions {
    /// Driver host executable.
    pub executable: PathBuf,
    /// Driver family name.
    pub driver: String,
    /// Device option string.
    pub path: String,
    /// Requested EEG channel count (0 = driver default).
    pub numch: u32,
    /// Longest wait for any reply, CREATION_ENDED included.
    pub reply_timeout: Duration,
}

impl ProxyOptions {
    /// Options for `driver` hosted by `executable`, default path and timeout.
    pub fn new(executable: impl Into<PathBuf>, driver: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            driver: driver.into(),
            path: String::new(),
            numch: 0,
            reply_timeout: Duration::from_secs(10),
        }
    }
}

/// Decoded reply payload.
#[derive(Debug)]
enum ReplyBody {
    None,
    Selection(Vec<SelectedChannel>),
    Chinfo(Box<ChannelInfo>),
}

#[derive(Debug)]
struct Reply {
    command: Command,
    status: ErrorCode,
    body: ReplyBody,
}

/// Raw frame length announced by a driver, shared with its control reader.
///
/// A clone observes every later SET_SAMLEN from the same driver.
#[derive(Debug, Clone, Default)]
pub struct SampleLength(Arc<AtomicU32>);

impl SampleLength {
    /// Current frame length in bytes.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, samlen: u32) {
        self.0.store(samlen, Ordering::Release);
    }
}

/// State updated by unsolicited messages.
#[derive(Default)]
struct ControlState {
    error: AtomicI32,
    samlen: SampleLength,
    caps: Mutex<Option<Capabilities>>,
}

/// Handle on one isolated driver process.
pub struct DeviceProxy {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    replies: Receiver<Reply>,
    state: Arc<ControlState>,
    caps: Capabilities,
    reply_timeout: Duration,
    broken: bool,
    control_thread: Option<JoinHandle<()>>,
    data_thread: Option<JoinHandle<()>>,
}

impl DeviceProxy {
    /// Start the driver host and wait until the device is open.
    ///
    /// # Errors
    /// Spawn failures, the device's open status, `ECHILD` if the process
    /// dies before reporting, `ETIMEDOUT` if it never reports.
    pub fn spawn(options: &ProxyOptions, sink: impl SampleSink) -> DeviceResult<Self> {
        let (data_read, data_write) = pipe2(OFlag::O_CLOEXEC).map_err(io::Error::from)?;
        let data_raw = data_write.as_raw_fd();

        let mut command = std::process::Command::new(&options.executable);
        command
            .arg("--driver")
            .arg(&options.driver)
            .arg(&options.path)
            .arg(options.numch.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        // SAFETY: the closure only calls async-signal-safe fcntl/dup2.
        unsafe {
            command.pre_exec(move || {
                if data_raw == DATA_FD {
                    let flags = libc::fcntl(DATA_FD, libc::F_GETFD);
                    if flags == -1
                        || libc::fcntl(DATA_FD, libc::F_SETFD, flags & !libc::FD_CLOEXEC) == -1
                    {
                        return Err(io::Error::last_os_error());
                    }
                } else if libc::dup2(data_raw, DATA_FD) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = command.spawn()?;
        // Only the child may hold the write end, so EOF follows its exit.
        drop(data_write);

        let pid = child.id();
        info!(
            pid,
            driver = %options.driver,
            executable = %options.executable.display(),
            "driver process spawned"
        );

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                reap(&mut child);
                return Err(DeviceError::CommBroken);
            }
        };

        let state = Arc::new(ControlState::default());
        let (tx, rx) = channel::unbounded();

        let mut proxy = Self {
            child: Some(child),
            stdin: Some(stdin),
            replies: rx,
            state: state.clone(),
            caps: Capabilities::default(),
            reply_timeout: options.reply_timeout,
            broken: false,
            control_thread: None,
            data_thread: None,
        };
        // On failure the proxy is dropped, which reaps the child.
        proxy.control_thread = Some(spawn_thread("egd-control", move || {
            control_reader(stdout, tx, state)
        })?);
        let data = File::from(data_read);
        proxy.data_thread = Some(spawn_thread("egd-data", move || data_reader(data, sink))?);

        let reply = proxy.wait_reply(Command::CreationEnded)?;
        if let Err(err) = status_to_result(reply.status) {
            warn!(code = reply.status, "driver failed to open device");
            proxy.shutdown();
            return Err(err);
        }

        proxy.caps = proxy
            .state
            .caps
            .lock()
            .clone()
            .ok_or(DeviceError::CommBroken)?;
        info!(
            fs = proxy.caps.sampling_freq,
            nch = ?proxy.caps.type_nch,
            device = %proxy.caps.device_type,
            "device opened"
        );
        Ok(proxy)
    }

    /// Capability record reported while opening.
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Last raw frame length announced by the driver.
    pub fn input_samlen(&self) -> u32 {
        self.state.samlen.get()
    }

    /// Live handle on the raw frame length.
    pub fn sample_length(&self) -> SampleLength {
        self.state.samlen.clone()
    }

    /// Last asynchronous error reported by the driver (0 if none).
    pub fn last_error(&self) -> ErrorCode {
        self.state.error.load(Ordering::Acquire)
    }

    /// Process id of the driver host.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Replace the channel selection; returns the new selected-channel table.
    pub fn set_channel_groups(&mut self, groups: &[ChannelGroup]) -> DeviceResult<Vec<SelectedChannel>> {
        let payload = encode_records(groups);
        let aux = i32::try_from(payload.len())
            .map_err(|_| DeviceError::invalid("too many channel groups"))?;
        match self.transact(Command::SetChannelGroups, aux, &payload)? {
            ReplyBody::Selection(table) => Ok(table),
            _ => Err(DeviceError::CommBroken),
        }
    }

    /// Start acquisition.
    pub fn start_acq(&mut self) -> DeviceResult<()> {
        self.transact(Command::StartAcq, 0, &[]).map(drop)
    }

    /// Stop acquisition.
    pub fn stop_acq(&mut self) -> DeviceResult<()> {
        self.transact(Command::StopAcq, 0, &[]).map(drop)
    }

    /// Query the static metadata of one channel.
    pub fn fill_chinfo(&mut self, stype: SensorType, index: u32) -> DeviceResult<ChannelInfo> {
        let request = encode_records(&[ChinfoRequest {
            sensor_type: stype,
            index,
        }]);
        match self.transact(Command::FillChinfo, request.len() as i32, &request)? {
            ReplyBody::Chinfo(info) => Ok(*info),
            _ => Err(DeviceError::CommBroken),
        }
    }

    /// Close the device and wait for the driver process to exit.
    pub fn close(mut self) -> DeviceResult<()> {
        let result = self.transact(Command::CloseDevice, 0, &[]).map(drop);
        if let Some(status) = self.shutdown() {
            debug!(%status, "driver process exited");
        }
        result
    }

    fn transact(&mut self, command: Command, aux: i32, payload: &[u8]) -> DeviceResult<ReplyBody> {
        if self.broken {
            return Err(DeviceError::CommBroken);
        }
        debug!(?command, aux, "sending command");
        self.send(command, aux, payload)?;

        let reply = self.wait_reply(command)?;
        status_to_result(reply.status)?;
        Ok(reply.body)
    }

    fn send(&mut self, command: Command, aux: i32, payload: &[u8]) -> DeviceResult<()> {
        let stdin = self.stdin.as_mut().ok_or(DeviceError::CommBroken)?;
        let msg = encode_message(command, aux, payload);
        if let Err(err) = stdin.write_all(&msg).and_then(|()| stdin.flush()) {
            error!(?command, "control-in write failed: {err}");
            self.broken = true;
            return Err(match err.kind() {
                io::ErrorKind::BrokenPipe => DeviceError::CommBroken,
                _ => err.into(),
            });
        }
        Ok(())
    }

    fn wait_reply(&mut self, expected: Command) -> DeviceResult<Reply> {
        let reply = match self.replies.recv_timeout(self.reply_timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                error!(?expected, "driver did not reply in time");
                self.broken = true;
                return Err(DeviceError::Device(libc::ETIMEDOUT));
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!(?expected, "control channel lost");
                self.broken = true;
                return Err(DeviceError::CommBroken);
            }
        };

        if reply.command != expected {
            error!(?expected, got = ?reply.command, "out-of-order reply");
            self.broken = true;
            return Err(DeviceError::CommBroken);
        }
        Ok(reply)
    }

    /// Close control-in, then wait, escalating to SIGTERM and SIGKILL.
    fn shutdown(&mut self) -> Option<ExitStatus> {
        drop(self.stdin.take());

        let status = self.child.as_mut().map(|child| {
            wait_until(child, EXIT_GRACE).unwrap_or_else(|| {
                warn!(pid = child.id(), "driver still running, sending SIGTERM");
                if let Err(err) = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
                    warn!("SIGTERM failed: {err}");
                }
                wait_until(child, EXIT_GRACE).unwrap_or_else(|| {
                    warn!(pid = child.id(), "driver ignored SIGTERM, killing");
                    reap(child)
                })
            })
        });
        self.child = None;

        for handle in [self.control_thread.take(), self.data_thread.take()]
            .into_iter()
            .flatten()
        {
            if handle.join().is_err() {
                error!("proxy reader thread panicked");
            }
        }
        status.flatten()
    }
}

impl Drop for DeviceProxy {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.shutdown();
        }
    }
}

fn spawn_thread(name: &str, f: impl FnOnce() + Send + 'static) -> DeviceResult<JoinHandle<()>> {
    Ok(std::thread::Builder::new().name(name.into()).spawn(f)?)
}

fn wait_until(child: &mut Child, grace: Duration) -> Option<Option<ExitStatus>> {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(Some(status)),
            Ok(None) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(10)),
            Ok(None) => return None,
            Err(err) => {
                warn!("failed to check driver status: {err}");
                return Some(None);
            }
        }
    }
}

fn reap(child: &mut Child) -> Option<ExitStatus> {
    if let Err(err) = child.kill() {
        warn!("kill failed: {err}");
    }
    child.wait().ok()
}

fn control_reader(mut stdout: ChildStdout, replies: Sender<Reply>, state: Arc<ControlState>) {
    loop {
        match read_control_message(&mut stdout, &state) {
            Ok(Some(reply)) => {
                if replies.send(reply).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(ProtocolError::Closed) => {
                debug!("control-out closed");
                break;
            }
            Err(err) => {
                error!("control-out broken: {err}");
                break;
            }
        }
    }
}

/// Read one control-out message. Unsolicited ones are applied to `state`.
fn read_control_message<R: Read>(
    stream: &mut R,
    state: &ControlState,
) -> Result<Option<Reply>, ProtocolError> {
    let header = read_header(stream)?;
    let command = header
        .command()
        .ok_or(ProtocolError::UnknownCommand(header.command))?;

    let body = match command {
        Command::ReportError => {
            warn!(code = header.aux, "driver reported error");
            state.error.store(header.aux, Ordering::Release);
            return Ok(None);
        }
        Command::UpdateCapabilities => {
            let caps = read_capabilities(stream)?;
            debug!(?caps, "capabilities received");
            *state.caps.lock() = Some(caps);
            return Ok(None);
        }
        Command::SetSamlen => {
            let samlen = u32::try_from(header.aux)
                .map_err(|_| ProtocolError::Malformed(format!("sample length {}", header.aux)))?;
            debug!(samlen, "input sample length");
            state.samlen.set(samlen);
            return Ok(None);
        }
        _ if header.aux != 0 => ReplyBody::None,
        Command::SetChannelGroups => ReplyBody::Selection(read_selection(stream)?),
        Command::FillChinfo => ReplyBody::Chinfo(Box::new(read_record(stream)?)),
        _ => ReplyBody::None,
    };

    Ok(Some(Reply {
        command,
        status: header.aux,
        body,
    }))
}

fn data_reader(mut data: File, mut sink: impl SampleSink) {
    let mut buf = vec![0u8; DATA_READ_SIZE];
    loop {
        match data.read(&mut buf) {
            Ok(0) => {
                debug!("data-out closed");
                sink.on_end(None);
                return;
            }
            Ok(n) => sink.on_samples(&buf[..n]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                error!("data-out read failed: {err}");
                sink.on_end(Some(err.into()));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egd_common::protocol::{encode_capabilities, encode_selection, WireRecord};
    use egd_common::types::{DataType, NativeValue, Scale};
    use std::io::Cursor;

    fn message(command: Command, aux: i32, payload: &[u8]) -> Vec<u8> {
        encode_message(command, aux, payload)
    }

    #[test]
    fn unsolicited_messages_update_state() {
        let caps = Capabilities {
            sampling_freq: 256,
            type_nch: [4, 1, 0],
            device_type: "t".into(),
            device_id: "0".into(),
        };
        let mut bytes = message(Command::UpdateCapabilities, 0, &encode_capabilities(&caps));
        bytes.extend(message(Command::SetSamlen, 0, &[]));
        bytes.extend(message(Command::SetSamlen, 20, &[]));
        bytes.extend(message(Command::ReportError, libc::EIO, &[]));
        bytes.extend(message(Command::CreationEnded, 0, &[]));

        let state = ControlState::default();
        let mut stream = Cursor::new(bytes);
        for _ in 0..4 {
            assert!(read_control_message(&mut stream, &state).unwrap().is_none());
        }
        let reply = read_control_message(&mut stream, &state).unwrap().unwrap();
        assert_eq!(reply.command, Command::CreationEnded);
        assert_eq!(reply.status, 0);

        assert_eq!(state.caps.lock().clone(), Some(caps));
        assert_eq!(state.samlen.get(), 20);
        assert_eq!(state.error.load(Ordering::Acquire), libc::EIO);
    }

    #[test]
    fn reply_payload_only_on_success() {
        let table = vec![SelectedChannel {
            in_offset: 4,
            in_type: DataType::Int32,
            out_type: DataType::Float,
            iarray: 0,
            arr_offset: 0,
            scaling: true,
            scale: Scale::gain(0.5),
        }];
        let mut bytes = message(Command::SetChannelGroups, 0, &encode_selection(&table));
        bytes.extend(message(Command::SetChannelGroups, libc::EINVAL, &[]));
        let info = ChannelInfo::new(
            "Status",
            "Boolean",
            "",
            "",
            NativeValue::Int32(0),
            NativeValue::Int32(1),
        );
        let mut encoded = Vec::new();
        info.encode(&mut encoded);
        bytes.extend(message(Command::FillChinfo, 0, &encoded));

        let state = ControlState::default();
        let mut stream = Cursor::new(bytes);

        let reply = read_control_message(&mut stream, &state).unwrap().unwrap();
        assert!(matches!(reply.body, ReplyBody::Selection(ref t) if *t == table));

        let reply = read_control_message(&mut stream, &state).unwrap().unwrap();
        assert_eq!(reply.status, libc::EINVAL);
        assert!(matches!(reply.body, ReplyBody::None));

        let reply = read_control_message(&mut stream, &state).unwrap().unwrap();
        assert!(matches!(reply.body, ReplyBody::Chinfo(ref i) if **i == info));
    }

    #[test]
    fn unknown_message_breaks_stream() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&42i32.to_ne_bytes());
        bytes.extend_from_slice(&0i32.to_ne_bytes());
        let err = read_control_message(&mut Cursor::new(bytes), &ControlState::default()).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCommand(42)));
    }

    #[test]
    fn oversized_selection_breaks_stream() {
        let bytes = message(Command::SetChannelGroups, 0, &u32::MAX.to_ne_bytes());
        let err = read_control_message(&mut Cursor::new(bytes), &ControlState::default()).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn spawn_missing_executable_fails() {
        let options = ProxyOptions::new("/nonexistent/egd_procdev", "simulation");
        let err = DeviceProxy::spawn(&options, NullSink).err().unwrap();
        assert_eq!(err.code(), libc::ENOENT);
    }

    #[test]
    fn silent_child_is_comm_broken() {
        // `true` exits without ever writing CREATION_ENDED.
        let options = ProxyOptions::new("true", "simulation");
        let err = DeviceProxy::spawn(&options, NullSink).err().unwrap();
        assert!(matches!(err, DeviceError::CommBroken));
    }
}
