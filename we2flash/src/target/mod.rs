//! Flashing targets.
//!
//! The Himax WE2 is the only target today. Its companion-chip reset hold
//! lives next to it because it is board wiring, not bootloader protocol.

pub mod config;
pub mod reset;
pub mod we2;

pub use config::FlashConfig;
pub use reset::ResetHold;
pub use we2::{FlashOutcome, FlashRequest, FlashSession};
