//! Serial link between controller and relay
//!
//! The queue only ever asks "how many bytes are waiting" before reading, so
//! the link is modelled as a non-blocking byte source plus a sink.

use embedded_io::{Read, ReadReady, Write};
use heapless::{Deque, Vec};
use log::warn;

use crate::PodError;

/// Receive buffer size of [`BufferedLink`]; larger than any fixed reply
pub const RX_CAPACITY: usize = 128;

/// Non-blocking serial link
pub trait Link {
    /// Number of bytes that can be read without blocking
    fn available(&mut self) -> usize;

    /// Next received byte, `None` when nothing is buffered
    fn read_byte(&mut self) -> Option<u8>;

    /// Transmit `bytes`
    fn write(&mut self, bytes: &[u8]) -> Result<(), PodError>;

    /// Transmit `line` followed by `\n`
    fn write_line(&mut self, line: &str) -> Result<(), PodError> {
        self.write(line.as_bytes())?;
        self.write(b"\n")
    }

    /// Fill `buf` completely, or fail without consuming anything
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), PodError> {
        if self.available() < buf.len() {
            return Err(PodError::Link);
        }
        for slot in buf.iter_mut() {
            *slot = self.read_byte().ok_or(PodError::Link)?;
        }
        Ok(())
    }
}

/// Adapts a blocking `embedded_io` serial port (e.g. an esp-hal UART) to [`Link`]
///
/// Ready bytes are drained into a local queue whenever the link is polled,
/// so `available()` reports an exact count even though the UART only says
/// "at least one".
pub struct BufferedLink<S> {
    serial: S,
    rx: Deque<u8, RX_CAPACITY>,
}

impl<S> BufferedLink<S>
where
    S: Read + ReadReady + Write,
{
    pub fn new(serial: S) -> Self {
        Self {
            serial,
            rx: Deque::new(),
        }
    }

    /// Give the serial port back
    pub fn into_inner(self) -> S {
        self.serial
    }

    fn fill(&mut self) {
        let mut chunk = [0u8; 16];
        while !self.rx.is_full() {
            match self.serial.read_ready() {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => {
                    warn!("[LINK] read_ready failed");
                    break;
                }
            }

            let room = (RX_CAPACITY - self.rx.len()).min(chunk.len());
            match self.serial.read(&mut chunk[..room]) {
                Ok(0) => break,
                Ok(n) => {
                    for &byte in &chunk[..n] {
                        // room was checked above
                        let _ = self.rx.push_back(byte);
                    }
                }
                Err(_) => {
                    warn!("[LINK] read failed");
                    break;
                }
            }
        }
    }
}

impl<S> Link for BufferedLink<S>
where
    S: Read + ReadReady + Write,
{
    fn available(&mut self) -> usize {
        self.fill();
        self.rx.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        if self.rx.is_empty() {
            self.fill();
        }
        self.rx.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), PodError> {
        self.serial.write_all(bytes).map_err(|_| PodError::Link)
    }
}

/// In-memory link: bytes injected on one side, transmitted bytes captured
///
/// Used by the unit tests and by the on-device queue self test.
pub struct Loopback {
    rx: Deque<u8, 512>,
    tx: Vec<u8, 512>,
    fail_writes: bool,
}

impl Loopback {
    pub fn new() -> Self {
        Self {
            rx: Deque::new(),
            tx: Vec::new(),
            fail_writes: false,
        }
    }

    /// Make bytes available to the reader, as if the peer had sent them
    pub fn inject(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.rx.push_back(byte).is_err() {
                warn!("[LINK] loopback rx overflow");
                return;
            }
        }
    }

    /// Everything written so far
    pub fn sent(&self) -> &[u8] {
        &self.tx
    }

    /// Forget everything written so far
    pub fn clear_sent(&mut self) {
        self.tx.clear();
    }

    /// Make every following write fail
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl Link for Loopback {
    fn available(&mut self) -> usize {
        self.rx.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), PodError> {
        if self.fail_writes {
            return Err(PodError::Link);
        }
        self.tx.extend_from_slice(bytes).map_err(|_| PodError::Link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::vec::Vec as StdVec;

    /// UART stand-in that hands out at most three bytes per read
    struct FakeUart {
        incoming: StdVec<u8>,
        outgoing: StdVec<u8>,
    }

    impl embedded_io::ErrorType for FakeUart {
        type Error = Infallible;
    }

    impl Read for FakeUart {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
            let n = buf.len().min(self.incoming.len()).min(3);
            buf[..n].copy_from_slice(&self.incoming[..n]);
            self.incoming.drain(..n);
            Ok(n)
        }
    }

    impl ReadReady for FakeUart {
        fn read_ready(&mut self) -> Result<bool, Infallible> {
            Ok(!self.incoming.is_empty())
        }
    }

    impl Write for FakeUart {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
            self.outgoing.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    #[test]
    fn buffered_link_counts_everything_ready() {
        let uart = FakeUart {
            incoming: (0u8..10).collect(),
            outgoing: StdVec::new(),
        };
        let mut link = BufferedLink::new(uart);
        assert_eq!(link.available(), 10);
        let mut first = [0u8; 4];
        link.read_exact(&mut first).unwrap();
        assert_eq!(first, [0, 1, 2, 3]);
        assert_eq!(link.available(), 6);
    }

    #[test]
    fn buffered_link_caps_at_capacity() {
        let uart = FakeUart {
            incoming: std::vec![0x55; RX_CAPACITY + 20],
            outgoing: StdVec::new(),
        };
        let mut link = BufferedLink::new(uart);
        assert_eq!(link.available(), RX_CAPACITY);
        for _ in 0..RX_CAPACITY {
            link.read_byte().unwrap();
        }
        assert_eq!(link.available(), 20);
    }

    #[test]
    fn buffered_link_writes_lines() {
        let uart = FakeUart {
            incoming: StdVec::new(),
            outgoing: StdVec::new(),
        };
        let mut link = BufferedLink::new(uart);
        link.write_line("RSP").unwrap();
        assert_eq!(link.into_inner().outgoing, b"RSP\n");
    }

    #[test]
    fn read_exact_leaves_short_input_alone() {
        let mut link = Loopback::new();
        link.inject(&[1, 2]);
        let mut buf = [0u8; 3];
        assert_eq!(link.read_exact(&mut buf), Err(PodError::Link));
        assert_eq!(link.available(), 2);
    }
}
