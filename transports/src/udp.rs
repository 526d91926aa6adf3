// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The UDP endpoint. Binds a local port and talks
//! to one remote endpoint; send is fire-and-forget, receive is polled
//! since a hosted non-blocking socket has no interrupt of its own.

use std::net::{SocketAddr, UdpSocket};

use dc3_kernel::{ActiveObject, Effect, Event, Priority};
use dc3_protocol::{signals, FrameReceived};
use dc3_wire::{codec, Route};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UdpEndpointError {
    #[error("failed to bind udp socket: {0}")]
    Bind(std::io::Error),
    #[error("failed to configure udp socket: {0}")]
    Configure(std::io::Error),
}

pub struct UdpEndpoint {
    name: &'static str,
    priority: Priority,
    protocol_target: &'static str,
    socket: UdpSocket,
    remote: SocketAddr,
}

impl UdpEndpoint {
    pub fn bind(
        name: &'static str,
        priority: Priority,
        protocol_target: &'static str,
        local_port: u16,
        remote: SocketAddr,
    ) -> Result<Self, UdpEndpointError> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port)).map_err(UdpEndpointError::Bind)?;
        socket
            .set_nonblocking(true)
            .map_err(UdpEndpointError::Configure)?;
        Ok(Self {
            name,
            priority,
            protocol_target,
            socket,
            remote,
        })
    }

    /// Checks for one waiting datagram. The board's tick loop calls
    /// this and, on `Some`, posts the result straight into the
    /// dispatcher -- the same role an interrupt handler plays on the
    /// original target, where interrupt handlers may only post
    /// events.
    pub fn poll(&self) -> Option<(&'static str, dc3_kernel::SignalId, FrameReceived)> {
        let mut buf = [0u8; 16 * 1024];
        match self.socket.recv_from(&mut buf) {
            Ok((len, _from)) => match decode_datagram(&buf[..len]) {
                Ok(received) => Some((self.protocol_target, signals::FRAME_RECEIVED, received)),
                Err(e) => {
                    log::warn!("dropping malformed UDP datagram: {e}");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
            Err(e) => {
                log::warn!("udp recv error: {e}");
                None
            }
        }
    }
}

fn decode_datagram(bytes: &[u8]) -> Result<FrameReceived, dc3_wire::WireError> {
    let (msg, payload) = codec::decode_frame(bytes)?;
    Ok(FrameReceived {
        msg: dc3_wire::BasicMsg { route: Route::UdpClient, ..msg },
        payload,
    })
}

impl ActiveObject for UdpEndpoint {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn handle(&self, event: &Event) -> Vec<Effect> {
        if event.signal != signals::SEND_BYTES {
            return vec![];
        }
        let Some(bytes) = (match &event.payload {
            dc3_kernel::Payload::Bytes(b) => Some(b.clone()),
            _ => None,
        }) else {
            return vec![];
        };
        if let Err(e) = self.socket.send_to(&bytes, self.remote) {
            log::warn!("udp send error: {e}");
        }
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc3_wire::{BasicMsg, MessageName, Payload, PayloadDiscriminator};

    #[test]
    fn a_frame_sent_to_itself_round_trips_through_poll() {
        let a = UdpEndpoint::bind("a", Priority::new(1), "protocol", 0, "127.0.0.1:0".parse().unwrap()).unwrap();
        let a_addr = a.socket.local_addr().unwrap();
        let b = UdpEndpoint::bind("b", Priority::new(1), "protocol", 0, a_addr).unwrap();
        let b_addr = b.socket.local_addr().unwrap();

        let msg = BasicMsg::request(MessageName::GetBootMode, PayloadDiscriminator::None, 5, Route::UdpClient);
        let framed = codec::encode_frame(&msg, &Payload::None).unwrap();
        let len = u32::from_le_bytes(framed[0..4].try_into().unwrap()) as usize;
        b.socket.send_to(&framed[4..4 + len], a_addr).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let (_target, _signal, received) = a.poll().expect("expected one datagram");
        assert_eq!(received.msg.message_id, 5);
        let _ = b_addr;
    }
}
