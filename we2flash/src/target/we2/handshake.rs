//! Bootloader menu handshake and prompt handling.
//!
//! [`BootloaderLink`] owns the text side of the conversation with the WE2
//! bootloader: entering the XMODEM menu, waiting for the `'C'` ready signal,
//! and answering the reboot prompt between transfers. Every wait polls with
//! short sleeps, checks for cancellation, and gives up after its budget.

use crate::CancelToken;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::target::config::FlashConfig;
use crate::target::we2::protocol::{
    CONFIRM_REBOOT, DECLINE_REBOOT, MENU_MARKER, MENU_TRIGGER, REBOOT_PROMPT, RollingBuffer,
    XMODEM_READY,
};
use log::{debug, info, trace};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on bytes discarded by a single drain.
const DRAIN_LIMIT: usize = 64 * 1024;

/// Read chunk size while polling.
const POLL_CHUNK: usize = 256;

/// Main serial line bound to one bootloader conversation.
pub struct BootloaderLink<'a, P: Port> {
    pub(crate) port: &'a mut P,
    pub(crate) config: &'a FlashConfig,
    pub(crate) cancel: &'a CancelToken,
    buffer: RollingBuffer,
}

impl<'a, P: Port> BootloaderLink<'a, P> {
    /// Bind a link to an open port.
    pub fn new(port: &'a mut P, config: &'a FlashConfig, cancel: &'a CancelToken) -> Self {
        Self {
            port,
            config,
            cancel,
            buffer: RollingBuffer::new(),
        }
    }

    /// Drive the bootloader from its menu to "XMODEM ready".
    pub fn handshake(&mut self) -> Result<()> {
        self.enter_menu()?;
        self.wait_for_xmodem_ready()
    }

    /// Send `"1"` until the XMODEM menu banner shows up, then confirm it.
    pub fn enter_menu(&mut self) -> Result<()> {
        let budget = self.config.handshake_timeout;
        info!("Waiting for bootloader menu on {}...", self.port.name());

        self.port
            .set_timeout(self.config.poll_interval)?;
        self.port
            .clear_input()?;
        self.buffer
            .clear();

        let start = Instant::now();
        while start.elapsed() < budget {
            self.check_cancelled()?;
            self.send_byte(MENU_TRIGGER)?;
            thread::sleep(self.config.poll_interval);
            self.pump()?;

            if self
                .buffer
                .contains(MENU_MARKER)
            {
                info!("Bootloader menu detected");
                self.buffer
                    .clear();
                return self.send_byte(MENU_TRIGGER);
            }
        }

        debug!("Last bootloader output: {:?}", self.buffer.text());
        Err(Error::HandshakeTimeout(budget))
    }

    /// Wait for `'C'`, then drain the banner text the bootloader keeps
    /// printing after it.
    pub fn wait_for_xmodem_ready(&mut self) -> Result<()> {
        let budget = self.config.ready_timeout;
        let start = Instant::now();
        let mut byte = [0u8; 1];

        loop {
            if start.elapsed() >= budget {
                return Err(Error::XmodemReadyTimeout(budget));
            }
            self.check_cancelled()?;

            match self
                .port
                .read_available(&mut byte)?
            {
                1 if byte[0] == XMODEM_READY => break,
                1 => trace!("Skipping 0x{:02X} while waiting for 'C'", byte[0]),
                _ => thread::sleep(self.config.poll_interval),
            }
        }

        debug!("Bootloader ready for XMODEM");
        thread::sleep(self.config.drain_delay);
        let drained = self.drain()?;
        if drained > 0 {
            debug!("Drained {drained} bytes of bootloader output");
        }
        Ok(())
    }

    /// Wait for the "reboot now?" prompt.
    pub fn wait_for_reboot_prompt(&mut self, budget: Duration) -> Result<()> {
        self.buffer
            .clear();
        let start = Instant::now();

        while start.elapsed() < budget {
            self.check_cancelled()?;
            self.pump()?;
            if self
                .buffer
                .contains(REBOOT_PROMPT)
            {
                debug!("Reboot prompt received");
                self.buffer
                    .clear();
                return Ok(());
            }
            thread::sleep(self.config.poll_interval);
        }

        debug!("Last bootloader output: {:?}", self.buffer.text());
        Err(Error::RebootPromptTimeout(budget))
    }

    /// Answer the reboot prompt with `"n"` and let the bootloader settle.
    pub fn decline_reboot(&mut self) -> Result<()> {
        self.send_byte(DECLINE_REBOOT)?;
        thread::sleep(self.config.decline_settle);
        self.port
            .clear_input()?;
        Ok(())
    }

    /// Answer the reboot prompt with `"y"`.
    pub fn confirm_reboot(&mut self) -> Result<()> {
        self.send_byte(CONFIRM_REBOOT)
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        self.cancel
            .check()
    }

    fn send_byte(&mut self, byte: u8) -> Result<()> {
        trace!("-> {:?}", char::from(byte));
        self.port
            .write_all_bytes(&[byte])
    }

    /// Move every immediately-available byte into the rolling buffer.
    fn pump(&mut self) -> Result<usize> {
        let mut chunk = [0u8; POLL_CHUNK];
        let mut total = 0;
        loop {
            let n = self
                .port
                .read_available(&mut chunk)?;
            if n == 0 {
                return Ok(total);
            }
            trace!("<- {:?}", String::from_utf8_lossy(&chunk[..n]));
            self.buffer
                .extend(&chunk[..n]);
            total += n;
            if n < chunk.len() {
                return Ok(total);
            }
        }
    }

    /// Discard every immediately-available byte.
    fn drain(&mut self) -> Result<usize> {
        let mut chunk = [0u8; POLL_CHUNK];
        let mut total = 0;
        while total < DRAIN_LIMIT {
            let n = self
                .port
                .read_available(&mut chunk)?;
            if n == 0 {
                break;
            }
            trace!("drained {:?}", String::from_utf8_lossy(&chunk[..n]));
            total += n;
        }
        Ok(total)
    }
}
