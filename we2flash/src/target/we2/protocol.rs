//! Himax WE2 bootloader wire protocol.
//!
//! The bootloader speaks a small text menu over the serial line. Binary
//! payloads travel as XMODEM transfers; between transfers the bootloader asks
//! whether to reboot, and a synthetic "preamble" transfer moves the write
//! address for the next payload.
//!
//! ## Preamble Packet
//!
//! ```text
//! +-----------+------------+------------+-----------+-----------------+
//! |  Header   |  Address   |   Offset   |  Footer   |     Padding     |
//! +-----------+------------+------------+-----------+-----------------+
//! |  2 bytes  |  4 bytes   |  4 bytes   |  2 bytes  |  to 128 / 1024  |
//! +-----------+------------+------------+-----------+-----------------+
//! | 0xC0 0x5A | u32 LE     | u32 LE     | 0x5A 0xC0 | 0xFF ...        |
//! +-----------+------------+------------+-----------+-----------------+
//! ```

use crate::error::{Error, Result};
use crate::image::model::parse_hex_u32;
use crate::protocol::xmodem::XmodemVariant;
use byteorder::{ByteOrder, LittleEndian};

/// Default main channel baud rate.
pub const DEFAULT_BAUD: u32 = 921600;

/// Companion channel baud rate.
pub const COMPANION_BAUD: u32 = 115200;

/// Menu selection byte sent until the menu shows up, then once more.
pub const MENU_TRIGGER: u8 = b'1';

/// Banner identifying the XMODEM download menu entry.
pub const MENU_MARKER: &[u8] = b"Xmodem download and burn FW image";

/// XMODEM-CRC ready signal.
pub const XMODEM_READY: u8 = b'C';

/// Prompt printed after every completed transfer.
pub const REBOOT_PROMPT: &[u8] = b"Do you want to end file transmission and reboot";

/// Answer that keeps the session open for another transfer.
pub const DECLINE_REBOOT: u8 = b'n';

/// Answer that commits and reboots the device.
pub const CONFIRM_REBOOT: u8 = b'y';

/// Preamble header magic.
pub const PREAMBLE_HEADER: [u8; 2] = [0xC0, 0x5A];

/// Preamble footer magic.
pub const PREAMBLE_FOOTER: [u8; 2] = [0x5A, 0xC0];

/// Preamble padding byte.
pub const PREAMBLE_PAD: u8 = 0xFF;

/// Rolling buffer capacity before trimming.
pub const BUFFER_CAP: usize = 4096;

/// Bytes kept after a trim.
pub const BUFFER_KEEP: usize = 2048;

/// Address-redirect packet sent ahead of every model payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    /// Target flash address.
    pub address: u32,
    /// Offset within the target region.
    pub offset: u32,
}

impl Preamble {
    /// Length of the meaningful part, before padding.
    pub const LEN: usize = 12;

    /// Create a preamble.
    pub fn new(address: u32, offset: u32) -> Self {
        Self { address, offset }
    }

    /// Create a preamble from hex strings.
    pub fn from_hex(address: &str, offset: &str) -> Result<Self> {
        Ok(Self::new(parse_hex_u32(address)?, parse_hex_u32(offset)?))
    }

    /// Encode into a packet of exactly one block of `variant`.
    pub fn encode(&self, variant: XmodemVariant) -> Vec<u8> {
        let mut buf = vec![PREAMBLE_PAD; variant.block_size()];
        buf[0..2].copy_from_slice(&PREAMBLE_HEADER);
        LittleEndian::write_u32(&mut buf[2..6], self.address);
        LittleEndian::write_u32(&mut buf[6..10], self.offset);
        buf[10..12].copy_from_slice(&PREAMBLE_FOOTER);
        buf
    }

    /// Decode a packet, checking magic and padding.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LEN {
            return Err(Error::InvalidPreamble(format!(
                "too short: {} bytes",
                data.len()
            )));
        }
        if data[0..2] != PREAMBLE_HEADER || data[10..12] != PREAMBLE_FOOTER {
            return Err(Error::InvalidPreamble("magic mismatch".into()));
        }
        if data[Self::LEN..]
            .iter()
            .any(|b| *b != PREAMBLE_PAD)
        {
            return Err(Error::InvalidPreamble("padding is not 0xFF".into()));
        }
        Ok(Self {
            address: LittleEndian::read_u32(&data[2..6]),
            offset: LittleEndian::read_u32(&data[6..10]),
        })
    }
}

/// Encode a preamble straight from hex strings.
pub fn encode_preamble(address: &str, offset: &str, variant: XmodemVariant) -> Result<Vec<u8>> {
    Ok(Preamble::from_hex(address, offset)?.encode(variant))
}

/// Bounded byte window for spotting text markers in a serial stream.
///
/// Trimming happens before new bytes are appended and keeps the newest
/// `keep` bytes, so a marker split across reads survives as long as it is
/// shorter than `keep`.
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    buf: Vec<u8>,
    cap: usize,
    keep: usize,
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingBuffer {
    /// Buffer with the default 4096/2048 limits.
    pub fn new() -> Self {
        Self::with_limits(BUFFER_CAP, BUFFER_KEEP)
    }

    /// Buffer with custom limits. `keep` is clamped to `cap`.
    pub fn with_limits(cap: usize, keep: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
            cap,
            keep: keep.min(cap),
        }
    }

    /// Append bytes, trimming old data first if the cap would be exceeded.
    pub fn extend(&mut self, data: &[u8]) {
        if self.buf.len() + data.len() > self.cap && self.buf.len() > self.keep {
            let excess = self.buf.len() - self.keep;
            self.buf
                .drain(..excess);
        }
        self.buf
            .extend_from_slice(data);
    }

    /// Whether `marker` occurs anywhere in the window.
    pub fn contains(&self, marker: &[u8]) -> bool {
        contains_marker(&self.buf, marker)
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.buf
            .clear();
    }

    /// Current window length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.buf
            .is_empty()
    }

    /// Window contents as lossy text, for logging.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// Substring search over raw bytes.
pub fn contains_marker(data: &[u8], marker: &[u8]) -> bool {
    if marker.is_empty() {
        return true;
    }
    data.len() >= marker.len()
        && data
            .windows(marker.len())
            .any(|w| w == marker)
}
