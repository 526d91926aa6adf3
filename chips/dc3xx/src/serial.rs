// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The board's debug/console UART.
//!
//! `RealSerialChannel` wraps a `serialport`-crate handle the same way
//! `transports::udp`'s real socket path wraps `std::net::UdpSocket`:
//! writes happen inline, and a `poll()` the board calls once per tick
//! drains whatever bytes have arrived since the last call into the
//! registered [`SerialClient`]. There is no background reader thread
//! -- this system has exactly one thread, cooperative-tick-driven
//! throughout.

use std::cell::{Cell, RefCell};
use std::io::{Read, Write};
use std::time::Duration;

use dc3_kernel::hil::{SerialChannel, SerialClient, SerialError};

pub struct RealSerialChannel {
    port: RefCell<Box<dyn serialport::SerialPort>>,
    client: Cell<Option<&'static dyn SerialClient>>,
}

impl RealSerialChannel {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(1))
            .open()?;
        Ok(Self {
            port: RefCell::new(port),
            client: Cell::new(None),
        })
    }

    /// Reads whatever is waiting in the OS driver's receive buffer and
    /// hands it to the client, without blocking for more. Call once per
    /// board tick.
    pub fn poll(&self) {
        let mut port = self.port.borrow_mut();
        let available = match port.bytes_to_read() {
            Ok(n) if n > 0 => n as usize,
            _ => return,
        };
        let mut buf = vec![0u8; available];
        match port.read(&mut buf) {
            Ok(n) if n > 0 => {
                if let Some(client) = self.client.get() {
                    client.bytes_received(&buf[..n]);
                }
            }
            _ => {}
        }
    }
}

impl SerialChannel for RealSerialChannel {
    fn send(&self, data: Box<[u8]>) -> Result<(), SerialError> {
        let result = self.port.borrow_mut().write_all(&data).map_err(|e| {
            log::warn!("serial write failed: {e}");
            SerialError::Framing
        });
        if let Some(client) = self.client.get() {
            client.send_complete(result);
        }
        result
    }

    fn set_client(&self, client: &'static dyn SerialClient) {
        self.client.set(Some(client));
    }
}

/// An in-memory loopback-free serial channel for tests and hosted
/// development without a real port: `send` records what was written
/// and `deliver` feeds bytes to the client as if they had just arrived
/// on the wire.
#[derive(Default)]
pub struct SimulatedSerialChannel {
    sent: RefCell<Vec<u8>>,
    client: Cell<Option<&'static dyn SerialClient>>,
}

impl SimulatedSerialChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent.borrow().clone()
    }

    pub fn deliver(&self, data: &[u8]) {
        if let Some(client) = self.client.get() {
            client.bytes_received(data);
        }
    }
}

impl SerialChannel for SimulatedSerialChannel {
    fn send(&self, data: Box<[u8]>) -> Result<(), SerialError> {
        self.sent.borrow_mut().extend_from_slice(&data);
        if let Some(client) = self.client.get() {
            client.send_complete(Ok(()));
        }
        Ok(())
    }

    fn set_client(&self, client: &'static dyn SerialClient) {
        self.client.set(Some(client));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    struct RecordingClient {
        received: StdRefCell<Vec<u8>>,
        send_results: StdRefCell<Vec<Result<(), SerialError>>>,
    }

    impl SerialClient for RecordingClient {
        fn send_complete(&self, result: Result<(), SerialError>) {
            self.send_results.borrow_mut().push(result);
        }
        fn bytes_received(&self, data: &[u8]) {
            self.received.borrow_mut().extend_from_slice(data);
        }
    }

    fn leak_client() -> &'static RecordingClient {
        Box::leak(Box::new(RecordingClient {
            received: StdRefCell::new(Vec::new()),
            send_results: StdRefCell::new(Vec::new()),
        }))
    }

    #[test]
    fn simulated_channel_records_sent_bytes() {
        let channel = SimulatedSerialChannel::new();
        let client = leak_client();
        channel.set_client(client);

        channel.send(vec![1, 2, 3].into_boxed_slice()).unwrap();
        assert_eq!(channel.sent_bytes(), vec![1, 2, 3]);
        assert_eq!(client.send_results.borrow().len(), 1);
        assert!(client.send_results.borrow()[0].is_ok());
    }

    #[test]
    fn simulated_channel_delivers_incoming_bytes() {
        let channel = SimulatedSerialChannel::new();
        let client = leak_client();
        channel.set_client(client);

        channel.deliver(b"hello\n");
        assert_eq!(&*client.received.borrow(), b"hello\n");
    }
}
