//! Runtime side of the control-out and data-out channels.
//!
//! [`DeviceLink`] is shared by the command loop and the device's capture
//! thread(s). Each logical control message (header plus payload) is written
//! under the control-out lock, so messages from different threads never
//! interleave. Data-out has its own lock and carries raw frames only.

use egd_common::consts::DATA_FD;
use egd_common::error::{DeviceError, DeviceResult, ErrorCode};
use egd_common::protocol::{encode_capabilities, Command, Header, HEADER_SIZE};
use egd_common::types::Capabilities;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, FromRawFd};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

type Channel = Mutex<Box<dyn Write + Send>>;

struct LinkInner {
    control_out: Channel,
    data_out: Channel,
    error: AtomicI32,
    samlen: AtomicU32,
    caps: Mutex<Option<Capabilities>>,
}

/// Handle on the outgoing channels of one driver process.
#[derive(Clone)]
pub struct DeviceLink {
    inner: Arc<LinkInner>,
}

impl DeviceLink {
    /// Create a link over arbitrary writers.
    pub fn new(
        control_out: impl Write + Send + 'static,
        data_out: impl Write + Send + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                control_out: Mutex::new(Box::new(control_out)),
                data_out: Mutex::new(Box::new(data_out)),
                error: AtomicI32::new(0),
                samlen: AtomicU32::new(0),
                caps: Mutex::new(None),
            }),
        }
    }

    /// Create a link that discards everything.
    pub fn sink() -> Self {
        Self::new(io::sink(), io::sink())
    }

    /// Create the link of a driver host process: control-out is stdout,
    /// data-out is file descriptor [`DATA_FD`].
    ///
    /// Stdout is duplicated for exclusive use and fd 1 is then pointed at
    /// stderr, so stray prints can never corrupt the control stream.
    pub fn from_stdio() -> io::Result<Self> {
        // SAFETY: F_GETFD only queries descriptor flags.
        if unsafe { libc::fcntl(DATA_FD, libc::F_GETFD) } == -1 {
            return Err(io::Error::last_os_error());
        }

        let control_out = File::from(io::stdout().as_fd().try_clone_to_owned()?);

        // SAFETY: both descriptors are open for the whole process lifetime.
        if unsafe { libc::dup2(libc::STDERR_FILENO, libc::STDOUT_FILENO) } == -1 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: DATA_FD was checked open above and is owned by nothing
        // else in this process; the File takes ownership of it.
        let data_out = unsafe { File::from_raw_fd(DATA_FD) };

        Ok(Self::new(control_out, data_out))
    }

    /// Write one control message under the control-out lock.
    pub fn send(&self, command: Command, aux: i32, payload: &[u8]) -> DeviceResult<()> {
        self.send_raw(Header::new(command, aux), payload)
    }

    /// Write one control message with a raw header.
    pub fn send_raw(&self, header: Header, payload: &[u8]) -> DeviceResult<()> {
        let mut msg = Vec::with_capacity(HEADER_SIZE + payload.len());
        msg.extend_from_slice(&header.to_bytes());
        msg.extend_from_slice(payload);

        let mut out = self.inner.control_out.lock();
        out.write_all(&msg)?;
        out.flush()?;
        Ok(())
    }

    /// Send the reply of a synchronous command.
    ///
    /// On success the status is 0 and `payload` follows; on failure the
    /// status is the error code and nothing follows.
    pub fn reply(&self, command: Command, result: DeviceResult<Vec<u8>>) -> DeviceResult<()> {
        match result {
            Ok(payload) => self.send(command, 0, &payload),
            Err(err) => {
                debug!(?command, code = err.code(), "command failed: {err}");
                self.send(command, err.code(), &[])
            }
        }
    }

    /// Push raw frames on data-out.
    ///
    /// Partial writes are continued until every byte is out. A failed or
    /// zero-length write aborts the transfer and is reported through
    /// [`Command::ReportError`].
    pub fn update_ringbuffer(&self, bytes: &[u8]) -> DeviceResult<()> {
        let result = {
            let mut out = self.inner.data_out.lock();
            write_fully(out.as_mut(), bytes)
        };

        result.map_err(|err| {
            let err = DeviceError::from(err);
            error!(code = err.code(), "data-out write failed: {err}");
            if let Err(report) = self.report_error(err.code()) {
                error!("could not report data-out failure: {report}");
            }
            err
        })
    }

    /// Record an asynchronous device fault and forward it to the supervisor.
    pub fn report_error(&self, code: ErrorCode) -> DeviceResult<()> {
        self.inner.error.store(code, Ordering::Release);
        warn!(code, "device error reported");
        self.send(Command::ReportError, code, &[])
    }

    /// Publish the capability record. Called once while opening.
    pub fn update_capabilities(&self, caps: &Capabilities) -> DeviceResult<()> {
        self.send(Command::UpdateCapabilities, 0, &encode_capabilities(caps))?;
        *self.inner.caps.lock() = Some(caps.clone());
        Ok(())
    }

    /// Publish a new raw frame length.
    pub fn set_input_samlen(&self, samlen: u32) -> DeviceResult<()> {
        let aux = i32::try_from(samlen)
            .map_err(|_| DeviceError::invalid(format!("sample length {samlen} too large")))?;
        self.send(Command::SetSamlen, aux, &[])?;
        self.inner.samlen.store(samlen, Ordering::Release);
        Ok(())
    }

    /// Last published capability record.
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.inner.caps.lock().clone()
    }

    /// Last published raw frame length.
    pub fn input_samlen(&self) -> u32 {
        self.inner.samlen.load(Ordering::Acquire)
    }

    /// Last reported device error (0 if none).
    pub fn last_error(&self) -> ErrorCode {
        self.inner.error.load(Ordering::Acquire)
    }
}

fn write_fully(out: &mut dyn Write, mut bytes: &[u8]) -> io::Result<()> {
    while !bytes.is_empty() {
        match out.write(bytes) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use egd_common::protocol::{read_capabilities, read_header};
    use std::io::Cursor;

    /// Cloneable in-memory writer.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub(crate) fn take(&self) -> Vec<u8> {
            std::mem::take(&mut *self.0.lock())
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Writer accepting at most `chunk` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        chunk: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from_raw_os_error(libc::EPIPE))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_writes_are_completed() {
        let mut out = Trickle {
            data: Vec::new(),
            chunk: 3,
        };
        let bytes: Vec<u8> = (0..100).collect();
        write_fully(&mut out, &bytes).unwrap();
        assert_eq!(out.data, bytes);
    }

    #[test]
    fn zero_write_is_an_error() {
        let mut out = Trickle {
            data: Vec::new(),
            chunk: 0,
        };
        let err = write_fully(&mut out, &[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn data_failure_reported_on_control_out() {
        let control = SharedBuf::default();
        let link = DeviceLink::new(control.clone(), Broken);

        let err = link.update_ringbuffer(&[0u8; 16]).unwrap_err();
        assert_eq!(err.code(), libc::EPIPE);
        assert_eq!(link.last_error(), libc::EPIPE);

        let mut stream = Cursor::new(control.take());
        let header = read_header(&mut stream).unwrap();
        assert_eq!(header.command(), Some(Command::ReportError));
        assert_eq!(header.aux, libc::EPIPE);
    }

    #[test]
    fn capabilities_and_samlen_messages() {
        let control = SharedBuf::default();
        let link = DeviceLink::new(control.clone(), io::sink());
        let caps = Capabilities {
            sampling_freq: 512,
            type_nch: [8, 1, 0],
            device_type: "test".into(),
            device_id: "1".into(),
        };
        link.update_capabilities(&caps).unwrap();
        link.set_input_samlen(36).unwrap();

        assert_eq!(link.capabilities(), Some(caps.clone()));
        assert_eq!(link.input_samlen(), 36);

        let mut stream = Cursor::new(control.take());
        let header = read_header(&mut stream).unwrap();
        assert_eq!(header.command(), Some(Command::UpdateCapabilities));
        assert_eq!(read_capabilities(&mut stream).unwrap(), caps);

        let header = read_header(&mut stream).unwrap();
        assert_eq!(header.command(), Some(Command::SetSamlen));
        assert_eq!(header.aux, 36);
    }

    #[test]
    fn failed_reply_has_no_payload() {
        let control = SharedBuf::default();
        let link = DeviceLink::new(control.clone(), io::sink());
        link.reply(Command::FillChinfo, Err(DeviceError::Device(libc::ENODEV)))
            .unwrap();
        let bytes = control.take();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let header = Header::from_bytes(bytes[..HEADER_SIZE].try_into().unwrap());
        assert_eq!(header.aux, libc::ENODEV);
    }

    #[test]
    fn concurrent_messages_do_not_interleave() {
        let control = SharedBuf::default();
        let link = DeviceLink::new(control.clone(), io::sink());

        let threads: Vec<_> = (0..4)
            .map(|i| {
                let link = link.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        link.send(Command::SetSamlen, i, &[]).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let bytes = control.take();
        assert_eq!(bytes.len(), 200 * HEADER_SIZE);
        let mut stream = Cursor::new(bytes);
        for _ in 0..200 {
            let header = read_header(&mut stream).unwrap();
            assert_eq!(header.command(), Some(Command::SetSamlen));
            assert!((0..4).contains(&header.aux));
        }
    }
}
