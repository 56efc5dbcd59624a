//! XMODEM / XMODEM-1K sender.
//!
//! The Himax WE2 bootloader receives every payload (base firmware, preamble
//! packets, model files) as one XMODEM transfer. Two block sizes exist and
//! are selected by configuration, each behind the [`BlockTransfer`] trait:
//!
//! ```text
//! Block format:
//! +---------+-----+------+----------------+----------------+
//! | SOH/STX | SEQ | ~SEQ |  DATA (128/1K) | CRC16 / SUM    |
//! +---------+-----+------+----------------+----------------+
//! | 1       | 1   | 1    |  128 or 1024   | 2 (CRC) / 1    |
//! +---------+-----+------+----------------+----------------+
//! ```
//!
//! The last block is padded with `SUB` (0x1A). The receiver picks CRC mode
//! by sending `'C'` and checksum mode by sending `NAK`.

use crate::CancelToken;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::crc::crc16_xmodem;
use log::{debug, trace};
use std::fmt;
use std::io::Read;
use std::time::{Duration, Instant};

/// XMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// Start of Text (1024-byte block).
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// Padding byte for the final block.
    pub const SUB: u8 = 0x1A;
    /// CRC mode request character.
    pub const C: u8 = b'C';
}

/// Block size for SOH packets.
pub const SOH_BLOCK_SIZE: usize = 128;

/// Block size for STX packets (XMODEM-1K).
pub const STX_BLOCK_SIZE: usize = 1024;

/// Protocol variant, which also fixes the preamble packet size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum XmodemVariant {
    /// Classic XMODEM, 128-byte blocks.
    #[default]
    Xmodem,
    /// XMODEM-1K, 1024-byte blocks.
    Xmodem1k,
}

impl XmodemVariant {
    /// Data bytes per block.
    #[must_use]
    pub fn block_size(self) -> usize {
        match self {
            Self::Xmodem => SOH_BLOCK_SIZE,
            Self::Xmodem1k => STX_BLOCK_SIZE,
        }
    }

    /// Build the transfer primitive for this variant.
    #[must_use]
    pub fn transfer(self, config: XmodemConfig) -> Box<dyn BlockTransfer + Send + Sync> {
        match self {
            Self::Xmodem => Box::new(Xmodem::with_config(config)),
            Self::Xmodem1k => Box::new(Xmodem1k::with_config(config)),
        }
    }
}

impl fmt::Display for XmodemVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xmodem => write!(f, "xmodem"),
            Self::Xmodem1k => write!(f, "xmodem1k"),
        }
    }
}

/// XMODEM configuration options.
#[derive(Debug, Clone)]
pub struct XmodemConfig {
    /// How long to wait for the receiver's start character.
    pub start_timeout: Duration,
    /// Maximum attempts per block (and for the final EOT).
    pub max_retries: u32,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(10),
            max_retries: 16,
        }
    }
}

/// One complete payload transfer over an already prepared port.
///
/// Implementations own the framing, checksum and retry logic. Callers are
/// responsible for putting the port into a sane state beforehand.
pub trait BlockTransfer {
    /// Variant implemented by this primitive.
    fn variant(&self) -> XmodemVariant;

    /// Send `data` as one transfer. `progress` receives `(sent, total)`.
    ///
    /// `cancel` is checked before every block; once it fires the receiver
    /// is aborted and [`Error::Cancelled`] is returned.
    fn send(
        &self,
        port: &mut dyn Port,
        data: &[u8],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()>;
}

/// XMODEM sender with 128-byte blocks.
#[derive(Debug, Clone, Default)]
pub struct Xmodem {
    config: XmodemConfig,
}

impl Xmodem {
    /// Create a sender with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sender with custom configuration.
    pub fn with_config(config: XmodemConfig) -> Self {
        Self { config }
    }
}

impl BlockTransfer for Xmodem {
    fn variant(&self) -> XmodemVariant {
        XmodemVariant::Xmodem
    }

    fn send(
        &self,
        port: &mut dyn Port,
        data: &[u8],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        Sender::new(port, &self.config, cancel, SOH_BLOCK_SIZE).transfer(data, progress)
    }
}

/// XMODEM-1K sender with 1024-byte blocks.
#[derive(Debug, Clone, Default)]
pub struct Xmodem1k {
    config: XmodemConfig,
}

impl Xmodem1k {
    /// Create a sender with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sender with custom configuration.
    pub fn with_config(config: XmodemConfig) -> Self {
        Self { config }
    }
}

impl BlockTransfer for Xmodem1k {
    fn variant(&self) -> XmodemVariant {
        XmodemVariant::Xmodem1k
    }

    fn send(
        &self,
        port: &mut dyn Port,
        data: &[u8],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        Sender::new(port, &self.config, cancel, STX_BLOCK_SIZE).transfer(data, progress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    Crc16,
    Checksum,
}

struct Sender<'a> {
    port: &'a mut dyn Port,
    config: &'a XmodemConfig,
    cancel: &'a CancelToken,
    block_size: usize,
}

impl<'a> Sender<'a> {
    fn new(
        port: &'a mut dyn Port,
        config: &'a XmodemConfig,
        cancel: &'a CancelToken,
        block_size: usize,
    ) -> Self {
        Self {
            port,
            config,
            cancel,
            block_size,
        }
    }

    /// Abort the receiver so the bootloader returns to its menu.
    fn abort(&mut self) -> Result<()> {
        debug!("Transfer cancelled, sending CAN CAN");
        self.port
            .write_all_bytes(&[control::CAN, control::CAN])?;
        Err(Error::Cancelled)
    }

    /// Read a single byte, `None` on timeout.
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => Ok(Some(buf[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Wait for the receiver to pick a checksum mode.
    fn wait_for_start(&mut self) -> Result<Check> {
        debug!("Waiting for XMODEM start character...");
        let start = Instant::now();
        let mut cancels = 0;

        while start.elapsed() < self.config.start_timeout {
            self.cancel
                .check()?;
            match self.read_byte()? {
                Some(control::C) => return Ok(Check::Crc16),
                Some(control::NAK) => return Ok(Check::Checksum),
                Some(control::CAN) => {
                    cancels += 1;
                    if cancels >= 2 {
                        return Err(Error::Xmodem("Transfer cancelled by receiver".into()));
                    }
                },
                Some(c) => trace!("Ignoring 0x{c:02X} before start"),
                None => {},
            }
        }

        Err(Error::Xmodem("Receiver never requested the transfer".into()))
    }

    fn build_block(&self, seq: u8, data: &[u8], check: Check) -> Vec<u8> {
        let header = if self.block_size == STX_BLOCK_SIZE {
            control::STX
        } else {
            control::SOH
        };

        let mut block = Vec::with_capacity(3 + self.block_size + 2);
        block.push(header);
        block.push(seq);
        block.push(!seq);
        block.extend_from_slice(data);
        block.resize(3 + self.block_size, control::SUB);

        let payload = &block[3..];
        match check {
            Check::Crc16 => {
                let crc = crc16_xmodem(payload);
                block.extend_from_slice(&crc.to_be_bytes());
            },
            Check::Checksum => {
                let sum = payload
                    .iter()
                    .fold(0u8, |acc, b| acc.wrapping_add(*b));
                block.push(sum);
            },
        }

        block
    }

    fn send_block(&mut self, seq: u8, block: &[u8]) -> Result<()> {
        for attempt in 1..=self.config.max_retries {
            trace!("Sending block {seq} (attempt {attempt})");
            self.port
                .write_all_bytes(block)?;

            match self.read_byte()? {
                Some(control::ACK) => return Ok(()),
                Some(control::NAK) => debug!("Block {seq} NAKed, retrying..."),
                Some(control::CAN) => {
                    return Err(Error::Xmodem("Transfer cancelled by receiver".into()));
                },
                Some(c) => debug!("Unexpected response 0x{c:02X} to block {seq}, retrying..."),
                None => debug!("Timeout waiting for ACK of block {seq}, retrying..."),
            }
        }

        Err(Error::Xmodem(format!(
            "Block {seq} failed after {} attempts",
            self.config.max_retries
        )))
    }

    fn send_eot(&mut self) -> Result<()> {
        for _ in 0..self.config.max_retries {
            self.port
                .write_all_bytes(&[control::EOT])?;
            if self.read_byte()? == Some(control::ACK) {
                debug!("EOT ACKed");
                return Ok(());
            }
        }

        Err(Error::Xmodem("EOT was never acknowledged".into()))
    }

    fn transfer(mut self, data: &[u8], progress: &mut dyn FnMut(usize, usize)) -> Result<()> {
        debug!(
            "Starting XMODEM transfer: {} bytes in {}-byte blocks",
            data.len(),
            self.block_size
        );

        let check = self.wait_for_start()?;
        debug!("Receiver selected {check:?} mode");

        let total = data.len();
        let mut seq: u8 = 1;
        for (i, chunk) in data
            .chunks(self.block_size)
            .enumerate()
        {
            if self
                .cancel
                .is_cancelled()
            {
                return self.abort();
            }
            let block = self.build_block(seq, chunk, check);
            self.send_block(seq, &block)?;
            seq = seq.wrapping_add(1);
            progress((i * self.block_size + chunk.len()).min(total), total);
        }

        self.send_eot()?;
        debug!("XMODEM transfer complete");
        Ok(())
    }
}
