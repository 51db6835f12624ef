//! Per-socket connection state.
//!
//! A connection owns its non-blocking socket, the bytes received but not yet
//! assembled into a protocol unit, and the bytes queued but not yet written.
//! Sockets are registered edge-triggered, so reads and writes always run
//! until the kernel reports `WouldBlock`.

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::fmt;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::trace;

/// Bytes pulled off a socket per read call.
const READ_CHUNK: usize = 16 * 1024;

/// Which side of the gateway a connection faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Browser-facing WebSocket socket.
    Client,
    /// Outbound socket to the envelope backend.
    Backend,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Backend => f.write_str("backend"),
        }
    }
}

/// Result of a single read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were appended to the inbound buffer.
    Data(usize),
    /// Socket drained for now.
    WouldBlock,
    /// Peer closed its write side.
    Eof,
}

/// A registered socket with its reassembly and output buffers.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    role: Role,
    token: Token,
    inbound: BytesMut,
    outbound: BytesMut,
    /// Whether WRITABLE is currently part of the registered interest.
    write_interest: bool,
    /// Set while `inbound` holds an incomplete unit; reset on every read.
    stalled_since: Option<Instant>,
}

impl Connection {
    pub fn new(stream: TcpStream, role: Role, token: Token) -> Self {
        Self {
            stream,
            role,
            token,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            outbound: BytesMut::new(),
            write_interest: false,
            stalled_since: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Register for readable events.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, Interest::READABLE)
    }

    /// Remove the socket from the poller. The socket closes on drop.
    pub fn deregister(&mut self, registry: &Registry) {
        if let Err(e) = registry.deregister(&mut self.stream) {
            trace!(role = %self.role, error = %e, "Deregister failed");
        }
    }

    /// Read one chunk into the inbound buffer.
    pub fn read_chunk(&mut self) -> io::Result<ReadOutcome> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    return Ok(ReadOutcome::Data(n));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::WouldBlock)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn inbound(&self) -> &BytesMut {
        &self.inbound
    }

    pub fn inbound_mut(&mut self) -> &mut BytesMut {
        &mut self.inbound
    }

    /// Append bytes to the output queue. Call [`flush`](Self::flush) to send.
    pub fn queue(&mut self, data: &[u8]) {
        self.outbound.extend_from_slice(data);
    }

    /// Bytes queued but not yet accepted by the kernel.
    pub fn pending_write(&self) -> usize {
        self.outbound.len()
    }

    /// Write queued bytes until drained or the socket would block.
    ///
    /// WRITABLE interest is held only while output remains queued.
    pub fn flush(&mut self, registry: &Registry) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.outbound.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let want_write = !self.outbound.is_empty();
        if want_write != self.write_interest {
            let interest = if want_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            registry.reregister(&mut self.stream, self.token, interest)?;
            self.write_interest = want_write;
        }
        Ok(())
    }

    /// Record whether an incomplete unit remains after processing a read.
    pub fn track_partial(&mut self, partial: bool, now: Instant) {
        self.stalled_since = if partial { Some(now) } else { None };
    }

    /// When the pending incomplete unit times out, if there is one.
    pub fn stall_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.stalled_since.map(|since| since + timeout)
    }
}
