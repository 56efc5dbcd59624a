//! Payload transfers over the bootloader link.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::xmodem::BlockTransfer;
use crate::target::we2::handshake::BootloaderLink;
use log::{debug, info};

impl<P: Port> BootloaderLink<'_, P> {
    /// Send one payload with `transfer`.
    ///
    /// The port gets the transfer read timeout and fresh buffers for the
    /// duration of the transfer, then goes back to polling mode. Any failure
    /// other than cancellation is reported as [`Error::TransferFailed`]
    /// naming `payload`.
    pub fn send_payload(
        &mut self,
        transfer: &dyn BlockTransfer,
        payload: &str,
        data: &[u8],
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        self.check_cancelled()?;
        info!(
            "Sending {payload} ({} bytes, {})",
            data.len(),
            transfer.variant()
        );

        self.port
            .set_timeout(self.config.transfer_timeout)?;
        self.port
            .clear_buffers()?;

        let result = transfer.send(&mut *self.port, data, self.cancel, progress);

        self.port
            .set_timeout(self.config.poll_interval)?;

        match result {
            Ok(()) => {
                debug!("{payload} sent");
                Ok(())
            },
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => Err(Error::TransferFailed {
                payload: payload.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::CancelToken;
    use crate::error::Error;
    use crate::port::mock::MockPort;
    use crate::protocol::xmodem::{Xmodem, XmodemConfig, control};
    use crate::target::we2::handshake::BootloaderLink;
    use crate::target::we2::testing::{RawTransfer, fast_config};
    use std::time::Duration;

    #[test]
    fn test_payload_goes_out_in_one_write() {
        let config = fast_config();
        let cancel = CancelToken::new();
        let transfer = RawTransfer::new();
        let mut port = MockPort::new("himax");
        let handle = port.handle();

        BootloaderLink::new(&mut port, &config, &cancel)
            .send_payload(&transfer, "firmware", b"FIRMWARE", &mut |_, _| {})
            .unwrap();

        assert_eq!(handle.writes(), vec![b"FIRMWARE".to_vec()]);
        assert_eq!(transfer.sent(), vec![b"FIRMWARE".to_vec()]);
        // Transfer timeout while sending, poll interval afterwards
        let timeouts = handle.state().timeouts.clone();
        assert_eq!(
            timeouts,
            vec![config.transfer_timeout, config.poll_interval]
        );
        assert_eq!(handle.state().clears, 1);
    }

    #[test]
    fn test_failure_names_payload() {
        let config = fast_config();
        let cancel = CancelToken::new();
        // Receiver cancels right away
        let mut port = MockPort::new("himax");
        port.handle()
            .state()
            .wire
            .defer(&[control::CAN, control::CAN]);
        let transfer = Xmodem::with_config(XmodemConfig {
            start_timeout: Duration::from_millis(200),
            max_retries: 2,
        });

        let err = BootloaderLink::new(&mut port, &config, &cancel)
            .send_payload(&transfer, "model face", &[0u8; 64], &mut |_, _| {})
            .unwrap_err();

        match err {
            Error::TransferFailed { payload, reason } => {
                assert_eq!(payload, "model face");
                assert!(reason.contains("cancelled by receiver"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cancelled_before_transfer() {
        let config = fast_config();
        let cancel = CancelToken::new();
        cancel.cancel();
        let transfer = RawTransfer::new();
        let mut port = MockPort::new("himax");

        let err = BootloaderLink::new(&mut port, &config, &cancel)
            .send_payload(&transfer, "firmware", b"x", &mut |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(transfer.sent().is_empty());
    }
}
