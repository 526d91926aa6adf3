// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The serial endpoint: base64 line framing for
//! protocol frames, a debug-prefix filter for human-readable log
//! lines, and a one-transfer-at-a-time send queue with a DMA timeout.

use std::cell::RefCell;
use std::collections::VecDeque;

use base64::Engine;
use dc3_kernel::hil::{SerialChannel, SerialClient, SerialError};
use dc3_kernel::{ActiveObject, Effect, Event, Priority};
use dc3_protocol::{signals as proto_signals, FrameReceived};
use dc3_wire::{codec, BasicMsg, Route};

use crate::signals;

/// Lines starting with one of these are debug/log output, never a
/// protocol frame.
pub const DEBUG_PREFIXES: [&str; 5] = ["DBG", "LOG", "WRN", "ERR", "ISR"];

/// Default DMA send timeout, in ticks (default >= 1 s).
pub const DMA_TIMEOUT_TICKS: u32 = 100;

fn is_debug_line(line: &[u8]) -> bool {
    DEBUG_PREFIXES.iter().any(|p| line.starts_with(p.as_bytes()))
}

enum Pending {
    Line(Vec<u8>),
    SendComplete(Result<(), SerialError>),
}

pub struct SerialEndpoint {
    name: &'static str,
    priority: Priority,
    protocol_target: &'static str,
    debug_target: &'static str,
    channel: &'static dyn SerialChannel,
    inflight: RefCell<bool>,
    send_queue: RefCell<VecDeque<Vec<u8>>>,
    rx_accum: RefCell<Vec<u8>>,
    pending: RefCell<VecDeque<Pending>>,
}

impl SerialEndpoint {
    pub fn new(
        name: &'static str,
        priority: Priority,
        protocol_target: &'static str,
        debug_target: &'static str,
        channel: &'static dyn SerialChannel,
    ) -> Self {
        Self {
            name,
            priority,
            protocol_target,
            debug_target,
            channel,
            inflight: RefCell::new(false),
            send_queue: RefCell::new(VecDeque::new()),
            rx_accum: RefCell::new(Vec::new()),
            pending: RefCell::new(VecDeque::new()),
        }
    }

    fn start_send(&self, line: Vec<u8>) -> Vec<Effect> {
        *self.inflight.borrow_mut() = true;
        if let Err(e) = self.channel.send(line.into_boxed_slice()) {
            log::warn!("serial send rejected: {e}");
            *self.inflight.borrow_mut() = false;
            return self.drain_send_queue();
        }
        vec![Effect::ArmTimer {
            ticks: DMA_TIMEOUT_TICKS,
            periodic: false,
            signal: signals::DMA_TIMEOUT,
        }]
    }

    fn drain_send_queue(&self) -> Vec<Effect> {
        match self.send_queue.borrow_mut().pop_front() {
            Some(next) => self.start_send(next),
            None => vec![],
        }
    }

    fn encode_line(bytes: &[u8]) -> Vec<u8> {
        let mut line = base64::engine::general_purpose::STANDARD.encode(bytes).into_bytes();
        line.push(b'\n');
        line
    }

    /// Drains callback-recorded events (arriving line splits, send
    /// completions) into kernel-level work the board's tick loop posts
    /// to the dispatcher, the same poll-based bridge
    /// [`crate::udp::UdpEndpoint::poll`] uses.
    pub fn poll(&self) -> Vec<(&'static str, dc3_kernel::SignalId, dc3_kernel::Payload)> {
        let mut out = Vec::new();
        while let Some(p) = self.pending.borrow_mut().pop_front() {
            match p {
                Pending::Line(line) => {
                    if is_debug_line(&line) {
                        let text = String::from_utf8_lossy(&line).into_owned();
                        out.push((
                            self.debug_target,
                            signals::DEBUG_LINE,
                            dc3_kernel::Payload::custom(text),
                        ));
                    } else {
                        match decode_line(&line) {
                            Ok(received) => out.push((
                                self.protocol_target,
                                proto_signals::FRAME_RECEIVED,
                                dc3_kernel::Payload::custom(received),
                            )),
                            Err(e) => log::warn!("dropping malformed serial frame: {e}"),
                        }
                    }
                }
                Pending::SendComplete(result) => out.push((
                    self.name,
                    signals::SEND_COMPLETE_INTERNAL,
                    dc3_kernel::Payload::Status(if result.is_ok() { 0 } else { -1 }),
                )),
            }
        }
        out
    }
}

fn decode_line(line: &[u8]) -> Result<FrameReceived, DecodeError> {
    let trimmed = line.strip_suffix(b"\n").unwrap_or(line);
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(trimmed)
        .map_err(|_| DecodeError::Base64)?;
    let (msg, payload) = codec::decode_frame(&bytes).map_err(DecodeError::Wire)?;
    Ok(FrameReceived {
        msg: BasicMsg { route: Route::Serial, ..msg },
        payload,
    })
}

#[derive(Debug, thiserror::Error)]
enum DecodeError {
    #[error("invalid base64")]
    Base64,
    #[error("wire decode failed: {0}")]
    Wire(#[from] dc3_wire::WireError),
}

impl SerialClient for SerialEndpoint {
    fn send_complete(&self, result: Result<(), SerialError>) {
        self.pending.borrow_mut().push_back(Pending::SendComplete(result));
    }

    fn bytes_received(&self, data: &[u8]) {
        let mut accum = self.rx_accum.borrow_mut();
        accum.extend_from_slice(data);
        while let Some(pos) = accum.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = accum.drain(..=pos).collect();
            self.pending.borrow_mut().push_back(Pending::Line(line));
        }
    }
}

impl ActiveObject for SerialEndpoint {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn handle(&self, event: &Event) -> Vec<Effect> {
        match event.signal {
            proto_signals::SEND_BYTES => {
                let dc3_kernel::Payload::Bytes(bytes) = &event.payload else {
                    return vec![];
                };
                let line = Self::encode_line(bytes);
                if *self.inflight.borrow() {
                    self.send_queue.borrow_mut().push_back(line);
                    vec![]
                } else {
                    self.start_send(line)
                }
            }
            signals::EMIT_RAW_LINE => {
                let Some(line) = event.payload.downcast_ref::<Vec<u8>>() else {
                    return vec![];
                };
                if *self.inflight.borrow() {
                    self.send_queue.borrow_mut().push_back(line.clone());
                    vec![]
                } else {
                    self.start_send(line.clone())
                }
            }
            signals::SEND_COMPLETE_INTERNAL => {
                *self.inflight.borrow_mut() = false;
                let mut effects = vec![Effect::DisarmTimer];
                effects.extend(self.drain_send_queue());
                effects
            }
            signals::DMA_TIMEOUT => {
                *self.inflight.borrow_mut() = false;
                self.drain_send_queue()
            }
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeChannel {
        sent: RefCell<Vec<Vec<u8>>>,
        fail_next: Cell<bool>,
    }

    impl SerialChannel for FakeChannel {
        fn send(&self, data: Box<[u8]>) -> Result<(), SerialError> {
            if self.fail_next.get() {
                self.fail_next.set(false);
                return Err(SerialError::BufferFull);
            }
            self.sent.borrow_mut().push(data.into_vec());
            Ok(())
        }
        fn set_client(&self, _client: &'static dyn SerialClient) {}
    }

    #[test]
    fn debug_prefixed_line_is_not_treated_as_a_frame() {
        assert!(is_debug_line(b"DBG hello world"));
        assert!(is_debug_line(b"ISR tick"));
        assert!(!is_debug_line(b"AGFiYw==")); // arbitrary base64, no prefix match
    }

    #[test]
    fn encoded_line_is_newline_terminated_base64() {
        let encoded = SerialEndpoint::encode_line(b"abc");
        assert_eq!(encoded.last(), Some(&b'\n'));
        let body = &encoded[..encoded.len() - 1];
        assert_eq!(
            base64::engine::general_purpose::STANDARD.decode(body).unwrap(),
            b"abc"
        );
    }

    #[test]
    fn bytes_received_splits_on_newline_into_pending_lines() {
        let channel = Box::leak(Box::new(FakeChannel {
            sent: RefCell::new(vec![]),
            fail_next: Cell::new(false),
        }));
        let endpoint = SerialEndpoint::new("serial", Priority::new(1), "protocol", "debug", channel);
        endpoint.bytes_received(b"DBG one\nDBG tw");
        endpoint.bytes_received(b"o\n");
        let polled = endpoint.poll();
        assert_eq!(polled.len(), 2);
        assert_eq!(polled[0].1, signals::DEBUG_LINE);
        assert_eq!(polled[1].1, signals::DEBUG_LINE);
    }
}
