// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The two ways `dc3ctl` can reach a board: a connected UDP socket, or
//! a serial port carrying base64 lines. Both mirror the device-side
//! endpoints in `dc3_transports::{udp,serial}`, but run as a blocking
//! client rather than an `ActiveObject` polled by a dispatcher -- there
//! is no event loop on this side, just one request waiting for one
//! reply at a time.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::TransportError;

/// A raw, already-framed message body in and out. Callers encode with
/// [`dc3_wire::codec::encode_frame`] and strip its length prefix before
/// calling [`HostTransport::send`] (see `client.rs::encode_body`),
/// matching `protocol::active_object::frame_effect`'s convention that
/// the transport itself supplies framing (a datagram boundary, or a
/// `\n`-terminated line).
pub trait HostTransport {
    fn send(&mut self, body: &[u8]) -> Result<(), TransportError>;

    /// Waits up to `timeout` for one reply. `Ok(None)` means the wait
    /// elapsed with nothing arriving; callers re-check their own
    /// overall deadline rather than treating this as a hard failure.
    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn connect(local_port: u16, remote: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port)).map_err(TransportError::Bind)?;
        socket.connect(remote).map_err(TransportError::Connect)?;
        Ok(Self { socket })
    }
}

impl HostTransport for UdpTransport {
    fn send(&mut self, body: &[u8]) -> Result<(), TransportError> {
        self.socket.send(body).map_err(TransportError::Io)?;
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        self.socket.set_read_timeout(Some(timeout)).map_err(TransportError::Io)?;
        let mut buf = [0u8; dc3_wire::codec::MAX_FRAME_LEN];
        match self.socket.recv(&mut buf) {
            Ok(len) => Ok(Some(buf[..len].to_vec())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

/// Matches `dc3_transports::serial::DEBUG_PREFIXES` -- a line opening
/// with one of these is a debug log, never a protocol reply, the same
/// split `SerialEndpoint::poll` makes on the device side.
fn is_debug_line(line: &[u8]) -> bool {
    dc3_transports::serial::DEBUG_PREFIXES.iter().any(|p| line.starts_with(p.as_bytes()))
}

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    buffer: Vec<u8>,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(200))
            .open()?;
        Ok(Self { port, buffer: Vec::new() })
    }
}

impl HostTransport for SerialTransport {
    fn send(&mut self, body: &[u8]) -> Result<(), TransportError> {
        let mut line = BASE64.encode(body).into_bytes();
        line.push(b'\n');
        self.port.write_all(&line).map_err(TransportError::Io)
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let trimmed = line.strip_suffix(b"\n").unwrap_or(&line);
                if is_debug_line(trimmed) {
                    log::info!("board: {}", String::from_utf8_lossy(trimmed));
                    continue;
                }
                let decoded = BASE64.decode(trimmed).map_err(|_| TransportError::Framing)?;
                return Ok(Some(decoded));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.port.set_timeout(remaining.min(Duration::from_millis(200))).ok();
            let mut chunk = [0u8; 4096];
            match self.port.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }
}
