//! Protocol implementations.

pub mod crc;
pub mod xmodem;

// Re-export common types
pub use xmodem::{BlockTransfer, Xmodem, Xmodem1k, XmodemConfig, XmodemVariant};
