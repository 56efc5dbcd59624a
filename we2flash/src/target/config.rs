//! Flashing session configuration.

use crate::protocol::xmodem::{XmodemConfig, XmodemVariant};
use crate::target::we2::protocol::{COMPANION_BAUD, DEFAULT_BAUD};
use std::time::Duration;

/// Timing budgets and link parameters for one flashing session.
///
/// Every wait in the protocol is bounded by one of these budgets.
#[derive(Debug, Clone)]
pub struct FlashConfig {
    /// Main channel baud rate.
    pub baud_rate: u32,
    /// Companion channel baud rate (control lines only).
    pub companion_baud: u32,
    /// Transfer protocol, which also fixes the preamble packet size.
    pub variant: XmodemVariant,
    /// Budget for the bootloader menu banner.
    pub handshake_timeout: Duration,
    /// Budget for the `'C'` ready signal.
    pub ready_timeout: Duration,
    /// Budget for each reboot prompt.
    pub reboot_prompt_timeout: Duration,
    /// Read timeout while an XMODEM transfer runs.
    pub transfer_timeout: Duration,
    /// How long the XMODEM sender waits for the receiver to start.
    pub xmodem_start_timeout: Duration,
    /// XMODEM attempts per block.
    pub xmodem_retries: u32,
    /// Sleep between polls, also the read timeout while polling.
    pub poll_interval: Duration,
    /// Pause after `'C'` before draining trailing banner text.
    pub drain_delay: Duration,
    /// Pause after declining a reboot.
    pub decline_settle: Duration,
    /// Pause after releasing the companion control lines.
    pub release_settle: Duration,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD,
            companion_baud: COMPANION_BAUD,
            variant: XmodemVariant::default(),
            handshake_timeout: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(5),
            reboot_prompt_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(2),
            xmodem_start_timeout: Duration::from_secs(10),
            xmodem_retries: 16,
            poll_interval: Duration::from_millis(10),
            drain_delay: Duration::from_millis(500),
            decline_settle: Duration::from_secs(1),
            release_settle: Duration::from_millis(100),
        }
    }
}

impl FlashConfig {
    /// Create a configuration with default budgets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the main channel baud rate.
    #[must_use]
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Set the transfer protocol.
    #[must_use]
    pub fn with_variant(mut self, variant: XmodemVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Set the bootloader menu budget.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the `'C'` ready budget.
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set the reboot prompt budget.
    #[must_use]
    pub fn with_reboot_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.reboot_prompt_timeout = timeout;
        self
    }

    /// Set the XMODEM attempts per block.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.xmodem_retries = retries;
        self
    }

    /// XMODEM settings derived from this configuration.
    pub fn xmodem_config(&self) -> XmodemConfig {
        XmodemConfig {
            start_timeout: self.xmodem_start_timeout,
            max_retries: self.xmodem_retries,
        }
    }
}
