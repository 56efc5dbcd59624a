//! Port abstraction for serial communication.
//!
//! The protocol layer (handshake, XMODEM, sequencing) only ever talks to the
//! `Port` trait, so it can be driven by the native `serialport` backend in
//! production and by a scripted in-memory port in tests.
//!
//! ```text
//! +---------------------------------------+
//! |   Protocol Layer                      |
//! |  (handshake, xmodem, sequencer)       |
//! +-------------------+-------------------+
//!                     |
//!                     v
//! +-------------------+-------------------+
//! |   Port Trait                          |
//! +-------------------+-------------------+
//!                     |
//!          +----------+----------+
//!          v                     v
//! +--------+---------+  +--------+---------+
//! | NativePort       |  | MockPort         |
//! |   (serialport)   |  |   (tests only)   |
//! +------------------+  +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use we2flash::port::Port;
//!
//! fn poke<P: Port>(port: &mut P) -> we2flash::Result<()> {
//!     port.write_all_bytes(b"1")?;
//!
//!     let mut buf = [0u8; 64];
//!     let n = port.read_available(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Unified port trait for serial communication.
///
/// A port is exclusively owned by one flashing session for its whole
/// lifetime. Exclusivity between sessions is left to the OS: opening a port
/// that is already open fails.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard pending bytes in both the input and output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Discard pending bytes in the input buffer only.
    fn clear_input(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Read whatever is available within the port timeout.
    ///
    /// A timeout is not an error here: it yields `Ok(0)`.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};

#[cfg(test)]
mod tests {
    use super::mock::MockPort;
    use super::*;

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyACM0", 921600).with_timeout(Duration::from_secs(2));

        assert_eq!(config.port_name, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 921600);
        assert_eq!(config.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_set_timeout_is_recorded() {
        let mut port = MockPort::new("mock");
        port.set_timeout(Duration::from_millis(250))
            .unwrap();

        assert_eq!(port.timeout(), Duration::from_millis(250));
        assert_eq!(port.handle().state().timeouts, vec![Duration::from_millis(250)]);
    }

    #[test]
    fn test_read_available_maps_timeout_to_zero() {
        let mut port = MockPort::new("mock");
        let mut buf = [0u8; 8];
        assert_eq!(port.read_available(&mut buf).unwrap(), 0);

        port.handle().push_rx(b"abc");
        assert_eq!(port.read_available(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
    }
}
