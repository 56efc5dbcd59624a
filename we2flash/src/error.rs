//! Error types for we2flash.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for we2flash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for we2flash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The main serial port is not present on this host.
    #[error("Port {0} not found")]
    PortNotFound(String),

    /// No serial port looks like a Himax WE2 board.
    #[error("No Himax WE2 device found, connect the board or pass --port")]
    DeviceNotFound,

    /// The bootloader menu banner never appeared.
    #[error("Bootloader menu not detected within {0:?}, press RESET and try again")]
    HandshakeTimeout(Duration),

    /// The bootloader never signalled it is ready for an XMODEM transfer.
    #[error("No XMODEM ready signal ('C') within {0:?}")]
    XmodemReadyTimeout(Duration),

    /// The bootloader never asked whether to reboot after a transfer.
    #[error("Reboot prompt not seen within {0:?}")]
    RebootPromptTimeout(Duration),

    /// The XMODEM primitive reported a failed transfer.
    #[error("Transfer of {payload} failed: {reason}")]
    TransferFailed {
        /// Payload being transferred (firmware, preamble or model id).
        payload: String,
        /// Failure reported by the transfer layer.
        reason: String,
    },

    /// Base firmware image is missing.
    #[error("Firmware file not found: {}", .0.display())]
    FirmwareFileMissing(PathBuf),

    /// A selected model file is missing.
    #[error("Model file for '{id}' not found: {}", .path.display())]
    ModelFileMissing {
        /// Model identifier.
        id: String,
        /// Resolved local path.
        path: PathBuf,
    },

    /// The companion chip could not be held in reset. Never fatal.
    #[error("Companion reset hold unavailable on {port}: {reason}")]
    ResetHoldUnavailable {
        /// Companion port name.
        port: String,
        /// Underlying open/control-line failure.
        reason: String,
    },

    /// Malformed hexadecimal address or offset.
    #[error("Invalid hex value '{0}'")]
    InvalidHex(String),

    /// XMODEM framing error.
    #[error("XMODEM error: {0}")]
    Xmodem(String),

    /// Operation cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// A packet is not a valid address preamble.
    #[error("Invalid preamble: {0}")]
    InvalidPreamble(String),
}

impl Error {
    /// Whether the error is a protocol timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout(_) | Self::XmodemReadyTimeout(_) | Self::RebootPromptTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(Error::HandshakeTimeout(Duration::from_secs(30)).is_timeout());
        assert!(Error::RebootPromptTimeout(Duration::from_secs(30)).is_timeout());
        assert!(!Error::Cancelled.is_timeout());
    }

    #[test]
    fn test_sub_second_budget_is_reported() {
        let err = Error::XmodemReadyTimeout(Duration::from_millis(500));
        assert_eq!(err.to_string(), "No XMODEM ready signal ('C') within 500ms");
        assert!(
            Error::HandshakeTimeout(Duration::from_secs(30))
                .to_string()
                .contains("within 30s")
        );
    }

    #[test]
    fn test_messages_carry_reason() {
        let err = Error::TransferFailed {
            payload: "model face".into(),
            reason: "receiver cancelled".into(),
        };
        assert_eq!(
            err.to_string(),
            "Transfer of model face failed: receiver cancelled"
        );
    }
}
