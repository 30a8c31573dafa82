// Copyright (C) 2026 xup authors
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::protocol::{ACK, CAN, NAK};

// ============================================================================
// Acknowledgment
// ============================================================================

/// Outcome of waiting for a single control byte from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Positive,
    Negative,
    Cancel,
    Unexpected(u8),
    Timeout,
}

// ============================================================================
// Connection Trait
// ============================================================================

/// Trait for connection operations needed by the upload protocol.
///
/// Implementors provide the two raw primitives; the line, ack and drain
/// helpers are built on top of them so they work against the mock in tests.
pub trait Connection: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Reads up to `buf.len()` bytes, waiting at most `timeout`. A timeout
    /// surfaces as `ErrorKind::TimedOut` or `WouldBlock`.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Reads exactly one byte, or `None` if nothing arrives in time.
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.read_timeout(&mut buf, timeout) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Waits for one control byte and classifies it.
    fn read_ack(&mut self, timeout: Duration) -> io::Result<Ack> {
        Ok(match self.read_byte(timeout)? {
            Some(ACK) => Ack::Positive,
            Some(NAK) => Ack::Negative,
            Some(CAN) => Ack::Cancel,
            Some(other) => Ack::Unexpected(other),
            None => Ack::Timeout,
        })
    }

    /// Discards any bytes currently buffered on the connection. Used before
    /// switching from the block protocol to a text exchange, so stale
    /// protocol bytes do not corrupt text parsing.
    fn drain_input(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 256];
        loop {
            match self.read_timeout(&mut buf, Duration::from_millis(50)) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(e) if is_timeout(&e) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Collects bytes until the connection has been quiet for `window`.
    fn read_trailing(&mut self, window: Duration) -> io::Result<Vec<u8>> {
        let mut collected = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match self.read_timeout(&mut buf, window) {
                Ok(0) => return Ok(collected),
                Ok(n) => collected.extend_from_slice(&buf[..n]),
                Err(e) if is_timeout(&e) => return Ok(collected),
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends `text` followed by a newline.
    fn send_line(&mut self, text: &str) -> io::Result<()> {
        self.write_all(text.as_bytes())?;
        self.write_all(b"\n")
    }

    /// Reads until a newline arrives or `timeout` elapses, whichever comes
    /// first, and returns whatever text was collected.
    fn read_line_or_silence(&mut self, timeout: Duration) -> io::Result<String> {
        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.read_byte(deadline - now)? {
                Some(b'\n') => break,
                Some(byte) => collected.push(byte),
                None => break,
            }
        }
        Ok(decode_text(&collected))
    }
}

/// Decodes peer text as UTF-8, degrading to a hex dump when the bytes are
/// not valid UTF-8 rather than failing the session.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim().to_string(),
        Err(_) => hex::encode(bytes),
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

// ============================================================================
// Real TCP Connection
// ============================================================================

/// TCP connection wrapping a `std::net::TcpStream`.
pub struct TcpConnection {
    stream: TcpStream,
}

impl TcpConnection {
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        Ok(TcpConnection { stream })
    }
}

impl Connection for TcpConnection {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)?;
        self.stream.flush()
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        // A zero duration would disable the timeout entirely.
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.read(buf)
    }
}

// ============================================================================
// Mock Connection for Testing
// ============================================================================

#[cfg(test)]
pub struct MockConnection {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockConnection {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockConnection {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl Connection for MockConnection {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        // Out of responses = timeout
        if self.read_pos >= self.read_buffer.len() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Mock timeout"));
        }

        // If current response is None = timeout
        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Mock timeout"));
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                None => break, // Stop at timeout marker
            }
        }

        Ok(bytes_read)
    }
}

#[cfg(test)]
impl Drop for MockConnection {
    fn drop(&mut self) {
        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockConnection dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockConnection write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
