//! Byte transports

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::debug;

use crate::constants::{BAUD_RATE, DEFAULT_DEVICE, DEFAULT_TIMEOUT};
use crate::error::{LinkError, Result};

/// A blocking byte stream to the target.
///
/// Reads must return `ErrorKind::TimedOut` (or `Ok(0)`) once the per-read
/// timeout elapses without data.
pub trait Transport: Read + Write {
    /// Drop any bytes received but not yet read
    fn discard_input(&mut self) -> io::Result<()>;
}

/// Serial port settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Device path (`/dev/ttyUSB2`, `COM3`, ...)
    pub path: String,
    pub baud_rate: u32,
    /// Bound on every individual read
    pub timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DEVICE.to_string(),
            baud_rate: BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl LinkConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A serial port opened with 8N1 framing
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(config: &LinkConfig) -> Result<Self> {
        let port = serialport::new(config.path.as_str(), config.baud_rate)
            .timeout(config.timeout)
            .open()
            .map_err(|e| LinkError::Open {
                path: config.path.clone(),
                message: e.to_string(),
            })?;
        debug!(path = %config.path, baud = config.baud_rate, "Opened serial port");
        Ok(Self { port })
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn discard_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Read until `buf` is full or a read times out; returns the number of bytes read
pub(crate) fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
