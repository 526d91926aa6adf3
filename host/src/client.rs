// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The host-side half of a protocol state machine split across two
//! processes: the on-device and host-side halves share the same table
//! of (state, signal) -> handler in spirit; only the terminal handlers
//! differ. `dc3_protocol::fsm` is shaped for the *responder* (it reacts
//! to an arriving `Req` and produces `Ack`/`Done`); `HostClient` is its
//! mirror image, the *requester* that originates the `Req` and waits
//! out the same Ack-then-Done ordering from the other side. It is
//! deliberately a separate, smaller state machine rather than a
//! literal reuse of [`dc3_protocol::fsm::ProtocolMachine`] -- see
//! `DESIGN.md` for why.

use std::time::Instant;

use dc3_wire::envelope::{BasicMsg, MessageName, MessageType, PayloadDiscriminator, Route};
use dc3_wire::payload::Payload;

use crate::error::ClientError;
use crate::transport::HostTransport;

/// Where `HostClient::call` is in the Ack-then-Done ordering every
/// request/reply exchange follows. Mirrors `dc3_protocol::fsm::ProtoState`'s
/// Idle/BusyWithMsg split; there is no `ValidateMsg` twin here, since
/// the host never re-parses its own outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Idle,
    AwaitingAck,
    AwaitingDone,
}

pub struct HostClient<T> {
    transport: T,
    route: Route,
    timeout: std::time::Duration,
    state: HostState,
}

impl<T: HostTransport> HostClient<T> {
    pub fn new(transport: T, route: Route, timeout: std::time::Duration) -> Self {
        Self { transport, route, timeout, state: HostState::Idle }
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    /// Sends one request and blocks for its eventual `Done`, reporting
    /// any `Prog` frames along the way via `log::info!`. Progress
    /// frames are accepted whether or not `progress_requested` was set
    /// -- a board is free to send them unprompted -- but only a `Done`
    /// ends the call.
    pub fn call(
        &mut self,
        name: MessageName,
        discriminator: PayloadDiscriminator,
        payload: Payload,
        progress_requested: bool,
    ) -> Result<(PayloadDiscriminator, Payload), ClientError> {
        let message_id = rand::random::<u32>();
        let mut msg = BasicMsg::request(name, discriminator, message_id, self.route);
        msg.progress_requested = progress_requested;

        self.state = HostState::AwaitingAck;
        self.transport.send(&encode_body(&msg, &payload))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.state = HostState::Idle;
                return Err(ClientError::Timeout);
            }
            let Some(bytes) = self.transport.recv(remaining)? else {
                continue;
            };
            let (reply, reply_payload) = dc3_wire::codec::decode_frame(&bytes)?;
            if reply.message_id != message_id {
                log::debug!("ignoring reply for message {}, waiting on {}", reply.message_id, message_id);
                continue;
            }
            match reply.message_type {
                MessageType::Ack => {
                    self.state = HostState::AwaitingDone;
                }
                MessageType::Prog => {
                    log::info!("{:?}: in progress", name);
                }
                MessageType::Done => {
                    if self.state != HostState::AwaitingDone {
                        self.state = HostState::Idle;
                        return Err(ClientError::DoneBeforeAck(message_id));
                    }
                    self.state = HostState::Idle;
                    return Ok((reply.discriminator, reply_payload));
                }
                MessageType::None | MessageType::Req => {
                    log::debug!("ignoring unexpected {:?} frame while awaiting a reply", reply.message_type);
                }
            }
        }
    }
}

fn encode_body(msg: &BasicMsg, payload: &Payload) -> Vec<u8> {
    let framed = dc3_wire::codec::encode_frame(msg, payload).expect("encoding a request cannot fail");
    framed[4..].to_vec()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dc3_wire::error::StatusCode;
    use dc3_wire::payload::{BootMode, BootModePayload};

    use super::*;
    use crate::error::TransportError;

    /// Echoes whatever message id the client's first `send` carried,
    /// replying with an Ack and then a Done for it -- enough to drive
    /// `HostClient`'s state transitions without a real socket.
    struct EchoingTransport {
        sent_id: Option<u32>,
        stage: u8,
    }

    impl HostTransport for EchoingTransport {
        fn send(&mut self, body: &[u8]) -> Result<(), TransportError> {
            let (msg, _) = dc3_wire::codec::decode_frame(body).unwrap();
            self.sent_id = Some(msg.message_id);
            Ok(())
        }

        fn recv(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
            let id = self.sent_id.unwrap();
            self.stage += 1;
            let (msg, payload) = match self.stage {
                1 => (
                    BasicMsg {
                        message_type: MessageType::Ack,
                        ..BasicMsg::request(MessageName::GetBootMode, PayloadDiscriminator::None, id, Route::UdpClient)
                    },
                    Payload::None,
                ),
                _ => (
                    BasicMsg {
                        message_type: MessageType::Done,
                        discriminator: PayloadDiscriminator::BootMode,
                        ..BasicMsg::request(MessageName::GetBootMode, PayloadDiscriminator::None, id, Route::UdpClient)
                    },
                    Payload::BootMode(BootModePayload { error_code: StatusCode::Ok, mode: BootMode::Bootloader }),
                ),
            };
            let framed = dc3_wire::codec::encode_frame(&msg, &payload).unwrap();
            Ok(Some(framed[4..].to_vec()))
        }
    }

    #[test]
    fn ack_then_done_returns_the_done_payload() {
        let mut client = HostClient::new(EchoingTransport { sent_id: None, stage: 0 }, Route::UdpClient, Duration::from_millis(50));
        let (discriminator, payload) = client
            .call(MessageName::GetBootMode, PayloadDiscriminator::None, Payload::None, false)
            .unwrap();
        assert_eq!(discriminator, PayloadDiscriminator::BootMode);
        assert!(matches!(payload, Payload::BootMode(p) if p.mode == BootMode::Bootloader));
        assert_eq!(client.state(), HostState::Idle);
    }

    #[test]
    fn a_done_with_no_preceding_ack_is_rejected() {
        struct BadTransport;
        impl HostTransport for BadTransport {
            fn send(&mut self, _body: &[u8]) -> Result<(), TransportError> {
                Ok(())
            }
            fn recv(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
                let msg = BasicMsg {
                    message_type: MessageType::Done,
                    discriminator: PayloadDiscriminator::Status,
                    ..BasicMsg::request(MessageName::ResetDb, PayloadDiscriminator::None, 1, Route::UdpClient)
                };
                let payload = Payload::status(StatusCode::Ok);
                let framed = dc3_wire::codec::encode_frame(&msg, &payload).unwrap();
                Ok(Some(framed[4..].to_vec()))
            }
        }

        let mut client = HostClient::new(BadTransport, Route::UdpClient, Duration::from_millis(50));
        let err = client.call(MessageName::ResetDb, PayloadDiscriminator::None, Payload::None, false);
        assert!(matches!(err, Err(ClientError::DoneBeforeAck(_))));
    }

    #[test]
    fn replies_for_a_different_message_id_are_ignored() {
        struct StaleThenFresh {
            stage: u8,
        }
        impl HostTransport for StaleThenFresh {
            fn send(&mut self, _body: &[u8]) -> Result<(), TransportError> {
                Ok(())
            }
            fn recv(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
                self.stage += 1;
                if self.stage == 1 {
                    let msg = BasicMsg {
                        message_type: MessageType::Done,
                        discriminator: PayloadDiscriminator::Status,
                        ..BasicMsg::request(MessageName::GetBootMode, PayloadDiscriminator::None, 999, Route::UdpClient)
                    };
                    let framed = dc3_wire::codec::encode_frame(&msg, &Payload::status(StatusCode::Ok)).unwrap();
                    return Ok(Some(framed[4..].to_vec()));
                }
                Ok(None)
            }
        }

        let mut client = HostClient::new(StaleThenFresh { stage: 0 }, Route::UdpClient, Duration::from_millis(50));
        let err = client.call(MessageName::GetBootMode, PayloadDiscriminator::None, Payload::None, false);
        assert!(matches!(err, Err(ClientError::Timeout)));
    }
}
