//! Himax WE2 target.
//!
//! Flashing a WE2 board is a single serial conversation with its vendor
//! bootloader:
//!
//! 1. Hold the ESP32 companion chip in reset, if there is one
//! 2. Enter the bootloader's XMODEM menu
//! 3. Send the base firmware
//! 4. For every model: send an address preamble, then the model file
//! 5. Answer the final reboot prompt with `"y"`
//! 6. Release the companion
//!
//! See [`protocol`] for the wire format and [`sequencer`] for the state
//! machine.

pub mod flasher;
pub mod handshake;
pub mod protocol;
pub mod sequencer;
pub mod transfer;

pub use flasher::{FlashOutcome, FlashRequest, FlashSession};
pub use handshake::BootloaderLink;
pub use protocol::{Preamble, RollingBuffer, encode_preamble};
pub use sequencer::{Sequencer, SequencerState};

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted bootloader and transfer doubles shared by the WE2 tests.

    use super::protocol::{MENU_MARKER, REBOOT_PROMPT};
    use crate::CancelToken;
    use crate::error::{Error, Result};
    use crate::port::Port;
    use crate::port::mock::MockPort;
    use crate::protocol::xmodem::{BlockTransfer, XmodemVariant, control};
    use crate::target::config::FlashConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Millisecond budgets so protocol tests run fast.
    pub fn fast_config() -> FlashConfig {
        FlashConfig {
            handshake_timeout: Duration::from_millis(500),
            ready_timeout: Duration::from_millis(500),
            reboot_prompt_timeout: Duration::from_millis(500),
            transfer_timeout: Duration::from_millis(20),
            xmodem_start_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(1),
            drain_delay: Duration::from_millis(1),
            decline_settle: Duration::from_millis(1),
            release_settle: Duration::from_millis(1),
            ..FlashConfig::default()
        }
    }

    /// A port that behaves like the WE2 bootloader.
    ///
    /// The first `"1"` prints the menu, the second one (and every `"n"`)
    /// makes `'C'` available followed by debug chatter, and every
    /// multi-byte write counts as a completed transfer that ends in the
    /// reboot prompt.
    pub fn mock_bootloader() -> MockPort {
        let mut menu_shown = false;
        MockPort::new("himax").with_responder(move |written, wire| match written {
            b"1" if !menu_shown => {
                menu_shown = true;
                let mut banner = b"\r\nHimax WE2 bootloader\r\n".to_vec();
                banner.extend_from_slice(b"1. ");
                banner.extend_from_slice(MENU_MARKER);
                banner.extend_from_slice(b"\r\n2. boot\r\n");
                wire.push(&banner);
            },
            b"1" | b"n" => {
                wire.defer(b"C");
                wire.defer(b"\r\nsend data using xmodem protocol...\r\n");
            },
            b"y" => wire.push(b"\r\nrebooting...\r\n"),
            _ if written.len() > 1 => {
                let mut prompt = b"\r\nburn done\r\n".to_vec();
                prompt.extend_from_slice(REBOOT_PROMPT);
                prompt.extend_from_slice(b" system? (y/n)\r\n");
                wire.push(&prompt);
            },
            _ => {},
        })
    }

    /// Like [`mock_bootloader`], but speaking real XMODEM: `'C'` is repeated
    /// while the receiver is idle, every block is ACKed, and the reboot
    /// prompt follows the ACK of `EOT`.
    pub fn xmodem_bootloader() -> MockPort {
        let mut menu_shown = false;
        MockPort::new("himax").with_responder(move |written, wire| match written {
            b"1" if !menu_shown => {
                menu_shown = true;
                let mut banner = b"\r\nHimax WE2 bootloader\r\n1. ".to_vec();
                banner.extend_from_slice(MENU_MARKER);
                banner.extend_from_slice(b"\r\n");
                wire.push(&banner);
            },
            b"1" | b"n" => {
                wire.defer(b"C");
                wire.defer(b"\r\nsend data using xmodem protocol...\r\n");
                wire.beacon = Some(control::C);
            },
            b"y" => wire.push(b"\r\nrebooting...\r\n"),
            [control::EOT] => {
                wire.push(&[control::ACK]);
                let mut prompt = b"\r\nburn done\r\n".to_vec();
                prompt.extend_from_slice(REBOOT_PROMPT);
                prompt.extend_from_slice(b" system? (y/n)\r\n");
                wire.push(&prompt);
            },
            [control::CAN, control::CAN] => wire.beacon = None,
            [control::SOH | control::STX, ..] => {
                wire.beacon = None;
                wire.push(&[control::ACK]);
            },
            _ => {},
        })
    }

    /// Transfer double that writes each payload in a single call.
    #[derive(Clone)]
    pub struct RawTransfer {
        variant: XmodemVariant,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl RawTransfer {
        pub fn new() -> Self {
            Self::with_variant(XmodemVariant::Xmodem)
        }

        pub fn with_variant(variant: XmodemVariant) -> Self {
            Self {
                variant,
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Payloads handed to `send`, in order.
        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }
    }

    impl BlockTransfer for RawTransfer {
        fn variant(&self) -> XmodemVariant {
            self.variant
        }

        fn send(
            &self,
            port: &mut dyn Port,
            data: &[u8],
            cancel: &CancelToken,
            progress: &mut dyn FnMut(usize, usize),
        ) -> Result<()> {
            cancel.check()?;
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(data.to_vec());
            port.write_all_bytes(data)?;
            progress(data.len(), data.len());
            Ok(())
        }
    }

    /// Transfer double that fails on its `n`-th call (1-based).
    pub struct FailingTransfer {
        inner: RawTransfer,
        fail_on: usize,
        calls: AtomicUsize,
    }

    impl FailingTransfer {
        pub fn on_call(fail_on: usize) -> Self {
            Self {
                inner: RawTransfer::new(),
                fail_on,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl BlockTransfer for FailingTransfer {
        fn variant(&self) -> XmodemVariant {
            self.inner
                .variant()
        }

        fn send(
            &self,
            port: &mut dyn Port,
            data: &[u8],
            cancel: &CancelToken,
            progress: &mut dyn FnMut(usize, usize),
        ) -> Result<()> {
            let call = self
                .calls
                .fetch_add(1, Ordering::SeqCst)
                + 1;
            if call == self.fail_on {
                return Err(Error::Xmodem(format!("Block 1 failed after 16 attempts (call {call})")));
            }
            self.inner
                .send(port, data, cancel, progress)
        }
    }
}
