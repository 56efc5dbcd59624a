//! Multi-payload sequencing.
//!
//! The bootloader accepts one XMODEM transfer at a time and asks after each
//! one whether to reboot. Chaining the base firmware and every model into a
//! single session means declining that prompt after every transfer except
//! the last:
//!
//! ```text
//! AwaitBootloader -> AwaitXmodemReady -> TransferringBase
//!   -> [ AwaitRebootPrompt -> SendPreamble -> AwaitRebootPrompt -> SendModel ] x N
//!   -> FinalReboot -> Done
//! ```
//!
//! Each `Send*` state includes its own XMODEM-ready wait.

use crate::error::{Error, Result};
use crate::image::payload::{ModelPayload, Payload};
use crate::port::Port;
use crate::protocol::xmodem::BlockTransfer;
use crate::target::we2::handshake::BootloaderLink;
use crate::target::we2::protocol::Preamble;
use log::{debug, info, warn};
use std::fmt;

/// Progress step reported by the sequencer.
pub const FLASH_STEP: &str = "flash";

/// Sequencer position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// Looking for the bootloader menu.
    AwaitBootloader,
    /// Waiting for the `'C'` ready signal.
    AwaitXmodemReady,
    /// Sending the base firmware.
    TransferringBase,
    /// Waiting for the "reboot now?" prompt.
    AwaitRebootPrompt,
    /// Sending the address preamble for model `index`.
    SendPreamble {
        /// Position in the selected model list.
        index: usize,
    },
    /// Sending the file bytes of model `index`.
    SendModel {
        /// Position in the selected model list.
        index: usize,
    },
    /// Committing with `"y"`.
    FinalReboot,
    /// Everything sent.
    Done,
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitBootloader => write!(f, "waiting for bootloader"),
            Self::AwaitXmodemReady => write!(f, "waiting for XMODEM ready"),
            Self::TransferringBase => write!(f, "sending firmware"),
            Self::AwaitRebootPrompt => write!(f, "waiting for reboot prompt"),
            Self::SendPreamble { index } => write!(f, "sending preamble #{}", index + 1),
            Self::SendModel { index } => write!(f, "sending model #{}", index + 1),
            Self::FinalReboot => write!(f, "rebooting"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Percentage reached after model `done` of `total`, within 35..=90.
fn model_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 90;
    }
    let span = 55 * done.min(total) / total;
    35 + u8::try_from(span).unwrap_or(55)
}

/// Percentage within `[from, to]` for `sent` of `total` bytes.
fn scaled(from: u8, to: u8, sent: usize, total: usize) -> u8 {
    if total == 0 {
        return to;
    }
    let span = usize::from(to.saturating_sub(from)) * sent.min(total) / total;
    from + u8::try_from(span).unwrap_or(0)
}

/// Drives one bootloader session through every payload.
pub struct Sequencer<'a, P: Port> {
    link: BootloaderLink<'a, P>,
    transfer: &'a dyn BlockTransfer,
    state: SequencerState,
}

impl<'a, P: Port> Sequencer<'a, P> {
    /// Create a sequencer over a bound link.
    pub fn new(link: BootloaderLink<'a, P>, transfer: &'a dyn BlockTransfer) -> Self {
        Self {
            link,
            transfer,
            state: SequencerState::AwaitBootloader,
        }
    }

    /// Current position.
    pub fn state(&self) -> SequencerState {
        self.state
    }

    fn enter(&mut self, state: SequencerState) {
        debug!("Sequencer: {} -> {}", self.state, state);
        self.state = state;
    }

    /// Send `firmware`, then every model in order, then commit.
    ///
    /// `progress` receives `("flash", percent, message)` checkpoints. Any
    /// error is fatal and leaves the state where it happened.
    pub fn run(
        &mut self,
        firmware: &Payload,
        models: &[ModelPayload],
        progress: &mut dyn FnMut(&str, u8, &str),
    ) -> Result<()> {
        self.enter(SequencerState::AwaitBootloader);
        progress(FLASH_STEP, 10, "Waiting for bootloader menu...");
        self.link
            .enter_menu()?;
        progress(FLASH_STEP, 15, "Bootloader menu detected");

        self.enter(SequencerState::AwaitXmodemReady);
        self.link
            .wait_for_xmodem_ready()?;
        progress(FLASH_STEP, 20, "Bootloader ready for XMODEM");

        self.enter(SequencerState::TransferringBase);
        progress(FLASH_STEP, 25, "Sending firmware...");
        let transfer = self.transfer;
        let mut last = 25;
        self.link
            .send_payload(
                transfer,
                &firmware.name,
                &firmware.data,
                &mut |sent, total| {
                    let pct = scaled(25, 30, sent, total);
                    if pct > last {
                        last = pct;
                        progress(FLASH_STEP, pct, "Sending firmware...");
                    }
                },
            )?;
        progress(FLASH_STEP, 30, "Firmware sent");

        for (index, model) in models
            .iter()
            .enumerate()
        {
            self.send_model(index, models.len(), model, progress)?;
        }

        self.finish(progress)
    }

    fn send_model(
        &mut self,
        index: usize,
        count: usize,
        model: &ModelPayload,
        progress: &mut dyn FnMut(&str, u8, &str),
    ) -> Result<()> {
        let from = model_percent(index, count);
        let to = model_percent(index + 1, count);
        info!(
            "Model {}/{count}: {} -> 0x{:08X}+0x{:X}",
            index + 1,
            model.id,
            model.address,
            model.offset
        );
        progress(
            FLASH_STEP,
            from,
            &format!("Flashing model {} ({}/{count})...", model.id, index + 1),
        );

        self.continue_session()?;
        self.enter(SequencerState::SendPreamble { index });
        let preamble = Preamble::new(model.address, model.offset).encode(
            self.transfer
                .variant(),
        );
        self.link
            .send_payload(
                self.transfer,
                &format!("preamble for {}", model.id),
                &preamble,
                &mut |_, _| {},
            )?;

        self.continue_session()?;
        self.enter(SequencerState::SendModel { index });
        let message = format!("Flashing model {}...", model.id);
        let mut last = from;
        self.link
            .send_payload(
                self.transfer,
                &format!("model {}", model.id),
                &model.data,
                &mut |sent, total| {
                    let pct = scaled(from, to, sent, total);
                    if pct > last {
                        last = pct;
                        progress(FLASH_STEP, pct, &message);
                    }
                },
            )?;

        progress(FLASH_STEP, to, &format!("Model {} flashed", model.id));
        Ok(())
    }

    /// Decline the reboot prompt and wait until the next transfer can start.
    fn continue_session(&mut self) -> Result<()> {
        self.enter(SequencerState::AwaitRebootPrompt);
        let budget = self
            .link
            .config
            .reboot_prompt_timeout;
        self.link
            .wait_for_reboot_prompt(budget)?;
        self.link
            .decline_reboot()?;
        self.enter(SequencerState::AwaitXmodemReady);
        self.link
            .wait_for_xmodem_ready()
    }

    fn finish(&mut self, progress: &mut dyn FnMut(&str, u8, &str)) -> Result<()> {
        self.enter(SequencerState::FinalReboot);
        progress(FLASH_STEP, 90, "Rebooting device...");
        let budget = self
            .link
            .config
            .reboot_prompt_timeout;
        match self
            .link
            .wait_for_reboot_prompt(budget)
        {
            Ok(()) => self
                .link
                .confirm_reboot()?,
            Err(Error::RebootPromptTimeout(budget)) => {
                warn!("No reboot prompt after the last transfer within {budget:?}, reset the device manually");
            },
            Err(e) => return Err(e),
        }
        self.enter(SequencerState::Done);
        Ok(())
    }
}
