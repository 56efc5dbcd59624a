//! Flash session controller.
//!
//! [`FlashSession`] is the entry point for one end-to-end flashing run:
//!
//! 1. Check that the main port exists (`detect` 0/100)
//! 2. Load the firmware and every selected model into memory
//! 3. Hold the companion in reset, if requested and possible
//! 4. Open the main port and run the [`Sequencer`] (`flash` 5..=90)
//! 5. Release the companion, whatever happened
//! 6. Report `("flash", 100, ..)` or `("flash", 0, reason)`
//!
//! Progress is reported through a `(step, percent, message)` callback.

use crate::CancelToken;
use crate::error::{Error, Result};
use crate::image::model::ModelDescriptor;
use crate::image::payload::{ModelPayload, Payload};
use crate::port::Port;
use crate::protocol::xmodem::BlockTransfer;
use crate::target::config::FlashConfig;
use crate::target::reset::ResetHold;
use crate::target::we2::handshake::BootloaderLink;
use crate::target::we2::sequencer::{FLASH_STEP, Sequencer};
use log::{error, info, warn};
use std::fmt;
use std::path::PathBuf;

#[cfg(feature = "native")]
use crate::{
    device,
    port::{NativePort, SerialConfig},
    target::reset,
};

/// Progress step for port detection.
pub const DETECT_STEP: &str = "detect";

/// Inputs of one flashing run.
#[derive(Debug, Clone)]
pub struct FlashRequest {
    /// Main (Himax) port.
    pub port: String,
    /// ESP32 companion port, if the board has one.
    pub companion_port: Option<String>,
    /// Whether the companion must be held in reset while flashing.
    pub requires_reset_hold: bool,
    /// Base firmware image.
    pub firmware: PathBuf,
    /// Models to flash after the firmware, in order.
    pub models: Vec<ModelDescriptor>,
}

impl FlashRequest {
    /// Flash `firmware` through `port`, without models or companion.
    pub fn new(port: impl Into<String>, firmware: impl Into<PathBuf>) -> Self {
        Self {
            port: port.into(),
            companion_port: None,
            requires_reset_hold: true,
            firmware: firmware.into(),
            models: Vec::new(),
        }
    }

    /// Set the companion port.
    #[must_use]
    pub fn with_companion(mut self, port: impl Into<String>) -> Self {
        self.companion_port = Some(port.into());
        self
    }

    /// Enable or disable the companion reset hold.
    #[must_use]
    pub fn with_reset_hold(mut self, required: bool) -> Self {
        self.requires_reset_hold = required;
        self
    }

    /// Set the models, already selected and ordered.
    #[must_use]
    pub fn with_models(mut self, models: Vec<ModelDescriptor>) -> Self {
        self.models = models;
        self
    }

    /// Companion port to hold, if any.
    pub fn hold_port(&self) -> Option<&str> {
        self.companion_port
            .as_deref()
            .filter(|_| self.requires_reset_hold)
    }

    /// Read the firmware and every model into memory.
    pub fn load_payloads(&self) -> Result<(Payload, Vec<ModelPayload>)> {
        let firmware = Payload::firmware(&self.firmware)?;
        let models = ModelPayload::load_all(&self.models)?;
        Ok((firmware, models))
    }
}

/// Terminal state of a flashing run.
#[derive(Debug)]
pub enum FlashOutcome {
    /// Every payload was sent.
    Succeeded,
    /// The run stopped on this error.
    Failed(Error),
}

impl FlashOutcome {
    /// Whether the run succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Failure reason, for display.
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Succeeded => None,
            Self::Failed(e) => Some(e.to_string()),
        }
    }

    /// Convert into a `Result`.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Succeeded => Ok(()),
            Self::Failed(e) => Err(e),
        }
    }
}

impl fmt::Display for FlashOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// One flashing session.
///
/// Sessions share nothing mutable, so several boards can be flashed from
/// separate threads at once.
pub struct FlashSession {
    config: FlashConfig,
    transfer: Box<dyn BlockTransfer + Send + Sync>,
    cancel: CancelToken,
}

impl FlashSession {
    /// Create a session using the configured XMODEM variant.
    pub fn new(config: FlashConfig) -> Self {
        let transfer = config
            .variant
            .transfer(config.xmodem_config());
        Self {
            config,
            transfer,
            cancel: CancelToken::new(),
        }
    }

    /// Replace the transfer primitive.
    #[must_use]
    pub fn with_transfer(mut self, transfer: Box<dyn BlockTransfer + Send + Sync>) -> Self {
        self.transfer = transfer;
        self
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this session.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel
            .clone()
    }

    /// Session configuration.
    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Run `request` against native serial ports.
    #[cfg(feature = "native")]
    pub fn run(
        &self,
        request: &FlashRequest,
        progress: &mut dyn FnMut(&str, u8, &str),
    ) -> FlashOutcome {
        progress(DETECT_STEP, 0, "Detecting Himax WE2 device...");
        if !device::port_exists(&request.port) {
            let err = Error::PortNotFound(request.port.clone());
            error!("{err}");
            progress(DETECT_STEP, 0, &err.to_string());
            return FlashOutcome::Failed(err);
        }
        progress(
            DETECT_STEP,
            100,
            &format!("Device detected on {}", request.port),
        );

        let (firmware, models) = match request.load_payloads() {
            Ok(loaded) => loaded,
            Err(e) => return Self::fail(e, progress),
        };

        let hold = request
            .hold_port()
            .and_then(|companion| reset::hold(companion, &self.config));

        let config = SerialConfig::new(&request.port, self.config.baud_rate)
            .with_timeout(self.config.poll_interval);
        let main = match NativePort::open(&config) {
            Ok(port) => port,
            Err(e) => {
                drop(hold);
                return Self::fail(e, progress);
            },
        };

        self.run_with_ports(main, hold, &firmware, &models, progress)
    }

    /// Run the sequence over already opened ports.
    ///
    /// `hold` is released before the final progress report on every path.
    pub fn run_with_ports<P: Port, C: Port>(
        &self,
        mut main: P,
        hold: Option<ResetHold<C>>,
        firmware: &Payload,
        models: &[ModelPayload],
        progress: &mut dyn FnMut(&str, u8, &str),
    ) -> FlashOutcome {
        info!(
            "Flashing {} ({} bytes) and {} model(s) via {} at {} baud",
            firmware.name,
            firmware.data.len(),
            models.len(),
            main.name(),
            main.baud_rate()
        );
        progress(
            FLASH_STEP,
            5,
            &format!("Connected to {}", main.name()),
        );

        let link = BootloaderLink::new(&mut main, &self.config, &self.cancel);
        let result = Sequencer::new(link, &*self.transfer).run(firmware, models, progress);

        if let Some(hold) = hold {
            let name = hold
                .port_name()
                .to_string();
            if let Err(e) = hold.release() {
                warn!("Failed to release companion on {name}: {e}");
            }
        }
        if let Err(e) = main.close() {
            warn!("Failed to close {}: {e}", main.name());
        }

        match result {
            Ok(()) => {
                info!("Flashing complete");
                progress(FLASH_STEP, 100, "Firmware flashed successfully");
                FlashOutcome::Succeeded
            },
            Err(e) => Self::fail(e, progress),
        }
    }

    fn fail(err: Error, progress: &mut dyn FnMut(&str, u8, &str)) -> FlashOutcome {
        error!("Flashing failed: {err}");
        progress(FLASH_STEP, 0, &err.to_string());
        FlashOutcome::Failed(err)
    }
}
