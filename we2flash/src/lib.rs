//! # we2flash
//!
//! A library for flashing Himax WE2 boards over their vendor bootloader.
//!
//! This crate provides:
//!
//! - Bootloader menu handshake and reboot-prompt handling
//! - XMODEM / XMODEM-1K transfers
//! - Preamble packets that move the write address between transfers
//! - Multi-payload sequencing (firmware, then any number of models)
//! - ESP32 companion reset hold for dual-chip boards
//! - Serial port discovery for WE2 boards
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Deserialization of model descriptors and protocol variants
//!
//! ## Example
//!
//! ```rust,no_run
//! use we2flash::{FlashConfig, FlashRequest, FlashSession, ModelDescriptor};
//!
//! let request = FlashRequest::new("/dev/cu.usbmodem5A7A0574651", "firmware.img")
//!     .with_companion("/dev/cu.wchusbserial5A7A0574653")
//!     .with_models(vec![
//!         ModelDescriptor::new("face", "face_detection.tflite", "0x400000"),
//!     ]);
//!
//! let session = FlashSession::new(FlashConfig::default());
//! let outcome = session.run(&request, &mut |step, percent, message| {
//!     println!("[{step}] {percent:3}% {message}");
//! });
//!
//! if let Some(reason) = outcome.reason() {
//!     eprintln!("Flashing failed: {reason}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when every running operation should
/// stop (for example after receiving Ctrl-C in CLI applications). Only the
/// first registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Cancellation flag for a single flashing session.
///
/// Clones share the flag. A session also stops when the global interrupt
/// checker fires.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0
            .store(true, Ordering::Relaxed);
    }

    /// Whether this token or the global interrupt checker asks to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0
            .load(Ordering::Relaxed)
            || is_interrupted_requested()
    }

    /// `Err(Error::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, DeviceKind},
    error::{Error, Result},
    image::{ModelDescriptor, ModelPayload, Payload, select_models},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::xmodem::{BlockTransfer, XmodemVariant},
    target::{
        FlashConfig, FlashOutcome, FlashRequest, FlashSession, ResetHold,
        we2::{Preamble, SequencerState, encode_preamble},
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_tokens_are_independent() {
        let a = CancelToken::new();
        let b = CancelToken::new();
        a.cancel();
        assert!(!b.is_cancelled());
    }

    #[test]
    fn test_interrupt_checker_default_false() {
        assert!(!is_interrupted_requested());
    }
}
