//! Companion chip reset hold.
//!
//! Boards pairing a WE2 with an ESP32 wire the ESP32's EN and IO0 pins to the
//! RTS and DTR lines of its USB serial bridge. While the WE2 is being
//! flashed the ESP32 is kept in reset so it does not talk over the shared
//! lines:
//!
//! | Line | Pin | Held              | Released |
//! |------|-----|-------------------|----------|
//! | RTS  | EN  | asserted (low)    | high     |
//! | DTR  | IO0 | deasserted (high) | high     |
//!
//! The hold is a guard: dropping it releases the lines, so every exit path
//! of a session releases the companion exactly once.

use crate::error::Result;
use crate::port::Port;
use log::{debug, warn};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "native")]
use {
    crate::error::Error,
    crate::port::{NativePort, SerialConfig},
    crate::target::config::FlashConfig,
    log::info,
};

/// Companion chip held in reset for as long as this value lives.
pub struct ResetHold<P: Port> {
    port: Option<P>,
    name: String,
    since: Instant,
    settle: Duration,
}

impl<P: Port> ResetHold<P> {
    /// Put the companion on `port` into reset.
    ///
    /// On failure the lines are restored as far as possible and the port is
    /// closed before the error is returned.
    pub fn acquire(mut port: P, settle: Duration) -> Result<Self> {
        let name = port
            .name()
            .to_string();
        let held = port
            .set_dtr(false)
            .and_then(|()| port.set_rts(true));

        if let Err(e) = held {
            let _ = port.set_rts(false);
            let _ = port.set_dtr(false);
            let _ = port.close();
            return Err(e);
        }

        debug!("Companion on {name} held in reset");
        Ok(Self {
            port: Some(port),
            name,
            since: Instant::now(),
            settle,
        })
    }

    /// Companion port name.
    pub fn port_name(&self) -> &str {
        &self.name
    }

    /// How long the companion has been held.
    pub fn held_for(&self) -> Duration {
        self.since
            .elapsed()
    }

    /// Whether the lines are still held.
    pub fn is_held(&self) -> bool {
        self.port
            .is_some()
    }

    /// Release the companion and close its port.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        let Some(mut port) = self
            .port
            .take()
        else {
            return Ok(());
        };

        // Every step runs even if an earlier one failed
        let rts = port.set_rts(false);
        let dtr = port.set_dtr(false);
        thread::sleep(self.settle);
        let closed = port.close();

        debug!(
            "Companion on {} released after {:.1}s",
            self.name,
            self.held_for()
                .as_secs_f32()
        );
        rts.and(dtr)
            .and(closed)
    }
}

impl<P: Port> Drop for ResetHold<P> {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!("Failed to release companion on {}: {e}", self.name);
        }
    }
}

/// Hold the companion on `companion` in reset, if possible.
///
/// Failing to open the port or drive its lines is not fatal: the session
/// continues without a hold and `None` is returned.
#[cfg(feature = "native")]
pub fn hold(companion: &str, config: &FlashConfig) -> Option<ResetHold<NativePort>> {
    let acquired = NativePort::open(&SerialConfig::new(companion, config.companion_baud))
        .and_then(|port| ResetHold::acquire(port, config.release_settle));

    match acquired {
        Ok(hold) => {
            info!("Holding companion on {companion} in reset");
            Some(hold)
        },
        Err(e) => {
            let err = Error::ResetHoldUnavailable {
                port: companion.to_string(),
                reason: e.to_string(),
            };
            warn!("{err}, continuing without it");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::port::mock::MockPort;
    use std::io;

    #[test]
    fn test_acquire_sets_lines() {
        let port = MockPort::new("/dev/cu.wchusbserial1");
        let handle = port.handle();

        let hold = ResetHold::acquire(port, Duration::ZERO).unwrap();
        assert!(hold.is_held());
        assert_eq!(hold.port_name(), "/dev/cu.wchusbserial1");
        assert!(hold.held_for() < Duration::from_secs(5));

        let state = handle.state();
        assert_eq!(state.dtr, vec![false]);
        assert_eq!(state.rts, vec![true]);
        assert_eq!(state.closes, 0);
    }

    #[test]
    fn test_release_restores_and_closes() {
        let port = MockPort::new("esp");
        let handle = port.handle();

        ResetHold::acquire(port, Duration::ZERO)
            .unwrap()
            .release()
            .unwrap();

        let state = handle.state();
        assert_eq!(state.rts, vec![true, false]);
        assert_eq!(state.dtr, vec![false, false]);
        assert_eq!(state.closes, 1);
    }

    #[test]
    fn test_drop_releases_once() {
        let port = MockPort::new("esp");
        let handle = port.handle();

        {
            let _hold = ResetHold::acquire(port, Duration::ZERO).unwrap();
        }

        assert_eq!(handle.closes(), 1);
        assert_eq!(handle.state().rts, vec![true, false]);
    }

    #[test]
    fn test_release_on_error_path() {
        fn failing_step(_hold: &ResetHold<MockPort>) -> Result<()> {
            Err(Error::Io(io::Error::other("transfer broke")))
        }

        let port = MockPort::new("esp");
        let handle = port.handle();

        let result = (|| {
            let hold = ResetHold::acquire(port, Duration::ZERO)?;
            failing_step(&hold)?;
            hold.release()
        })();

        assert!(result.is_err());
        assert_eq!(handle.closes(), 1);
        assert_eq!(handle.state().rts, vec![true, false]);
    }

    #[test]
    fn test_settle_delay() {
        let hold = ResetHold::acquire(MockPort::new("esp"), Duration::from_millis(30)).unwrap();
        let start = Instant::now();
        hold.release()
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[cfg(feature = "native")]
    #[test]
    fn test_hold_missing_port_is_none() {
        let config = FlashConfig::default();
        assert!(hold("/dev/we2flash-no-companion", &config).is_none());
    }
}
