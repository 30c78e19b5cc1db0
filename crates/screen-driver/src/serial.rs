//! Blocking serial transport.
//!
//! Opens the port with the fixed line settings of the screen protocol
//! (2400 baud, 8N1, no flow control) and writes frames with `write_all`
//! followed by `flush`.
//!
//! # Example
//!
//! ```rust,ignore
//! use screen_driver::serial::SerialTransport;
//!
//! let transport = SerialTransport::open("/dev/ttyUSB0", Duration::from_millis(1000))?;
//! let screen = BlockingScreenDriver::new(Box::new(transport), &config)?;
//! ```

use std::io::Write;
use std::time::Duration;

use screen_core::{ScreenError, ScreenResult, Transport};

/// Line speed of the screen protocol.
pub const BAUD_RATE: u32 = 2400;

/// Default write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

// =============================================================================
// IoTransport
// =============================================================================

/// Transport over any blocking writer.
///
/// Used for real serial ports and, in tests, for in-memory buffers.
#[derive(Debug)]
pub struct IoTransport<W: Write + Send> {
    writer: Option<W>,
    label: String,
}

impl<W: Write + Send> IoTransport<W> {
    /// Wrap a writer. `label` identifies it in log output.
    pub fn new(writer: W, label: impl Into<String>) -> Self {
        Self {
            writer: Some(writer),
            label: label.into(),
        }
    }

    /// Borrow the writer, unless closed.
    pub fn get_ref(&self) -> Option<&W> {
        self.writer.as_ref()
    }
}

impl<W: Write + Send> Transport for IoTransport<W> {
    fn write_frame(&mut self, frame: &[u8]) -> ScreenResult<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "serial port closed")
        })?;
        writer.write_all(frame)?;
        writer.flush()?;
        tracing::trace!(port = %self.label, bytes = frame.len(), "Frame written");
        Ok(())
    }

    fn close(&mut self) -> ScreenResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            tracing::info!(port = %self.label, "Closed serial port");
        }
        Ok(())
    }
}

// =============================================================================
// SerialTransport
// =============================================================================

/// Blocking transport over a native serial port.
pub type SerialTransport = IoTransport<Box<dyn serialport::SerialPort>>;

impl SerialTransport {
    /// Open `port_path` at 2400 baud, 8N1, no flow control.
    pub fn open(port_path: &str, timeout: Duration) -> ScreenResult<Self> {
        let port = serialport::new(port_path, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| {
                let kind = match e.kind() {
                    serialport::ErrorKind::NoDevice => std::io::ErrorKind::NotFound,
                    serialport::ErrorKind::InvalidInput => std::io::ErrorKind::InvalidInput,
                    serialport::ErrorKind::Io(kind) => kind,
                    serialport::ErrorKind::Unknown => std::io::ErrorKind::Other,
                };
                ScreenError::Transport(std::io::Error::new(
                    kind,
                    format!("Failed to open serial port {}: {}", port_path, e),
                ))
            })?;

        tracing::info!(port = port_path, timeout_ms = ?timeout.as_millis(), "Opened screen serial port");
        Ok(Self::new(port, port_path))
    }
}
