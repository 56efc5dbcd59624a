//! Scripted in-memory port for protocol tests.
//!
//! All state lives behind an `Arc<Mutex<_>>` so a test keeps a
//! [`MockHandle`] for assertions after the port itself has been moved into
//! (and dropped by) the code under test.

use crate::error::Result;
use crate::port::Port;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Device side of the wire, as seen by a responder.
#[derive(Default)]
pub(crate) struct Wire {
    /// Bytes waiting to be read by the host.
    pub rx: VecDeque<u8>,
    /// Bytes handed out on the next read once `rx` runs dry.
    ///
    /// Survives `clear_input`, which models output the device has not
    /// produced yet at the time of the flush.
    pub deferred: VecDeque<u8>,
    /// Byte the device repeats while idle, like an XMODEM receiver
    /// re-sending `'C'`. Handed out on a read that follows an empty one.
    pub beacon: Option<u8>,
    starved: bool,
}

impl Wire {
    pub fn push(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    pub fn defer(&mut self, bytes: &[u8]) {
        self.deferred.extend(bytes.iter().copied());
    }
}

type Responder = Box<dyn FnMut(&[u8], &mut Wire) + Send>;

#[derive(Default)]
pub(crate) struct MockState {
    pub wire: Wire,
    pub writes: Vec<Vec<u8>>,
    pub dtr: Vec<bool>,
    pub rts: Vec<bool>,
    pub closes: usize,
    pub clears: usize,
    pub timeouts: Vec<Duration>,
    responder: Option<Responder>,
}

/// Shared view on a mock port's state.
#[derive(Clone)]
pub(crate) struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn push_rx(&self, bytes: &[u8]) {
        self.state()
            .wire
            .push(bytes);
    }

    /// Every byte the host wrote, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.state()
            .writes
            .concat()
    }

    /// Every write call, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state()
            .writes
            .clone()
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }
}

/// In-memory port driven by an optional responder closure.
pub(crate) struct MockPort {
    name: String,
    timeout: Duration,
    baud_rate: u32,
    handle: MockHandle,
}

impl MockPort {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            timeout: Duration::from_millis(10),
            baud_rate: 921600,
            handle: MockHandle(Arc::new(Mutex::new(MockState::default()))),
        }
    }

    /// Attach a responder invoked on every host write.
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(&[u8], &mut Wire) + Send + 'static,
    {
        self.handle
            .state()
            .responder = Some(Box::new(responder));
        self
    }

    pub fn handle(&self) -> MockHandle {
        self.handle
            .clone()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.handle.state();
        let wire = &mut state.wire;
        if wire.rx.is_empty() {
            if let Some(b) = wire.deferred.pop_front() {
                wire.rx.push_back(b);
            } else if let (true, Some(b)) = (wire.starved, wire.beacon) {
                wire.rx.push_back(b);
            }
        }
        if wire.rx.is_empty() {
            wire.starved = true;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        wire.starved = false;
        let n = buf.len().min(wire.rx.len());
        for (slot, b) in buf.iter_mut().zip(wire.rx.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.handle.state();
        state
            .writes
            .push(buf.to_vec());
        if let Some(mut responder) = state.responder.take() {
            responder(buf, &mut state.wire);
            state.responder = Some(responder);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        self.handle
            .state()
            .timeouts
            .push(timeout);
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.clear_input()
    }

    fn clear_input(&mut self) -> Result<()> {
        let mut state = self.handle.state();
        state
            .wire
            .rx
            .clear();
        state.clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.handle
            .state()
            .dtr
            .push(level);
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.handle
            .state()
            .rts
            .push(level);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.handle
            .state()
            .closes += 1;
        Ok(())
    }
}
