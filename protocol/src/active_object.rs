// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wraps [`crate::fsm::ProtocolMachine`] as a [`dc3_kernel::ActiveObject`],
//! handling the kernel-level concerns the pure FSM deliberately knows
//! nothing about: deferring requests that arrive while busy, arming
//! and disarming the timeout timer, and turning outgoing frames into
//! bytes posted to the transport the request arrived on.

use std::cell::RefCell;

use dc3_kernel::{ActiveObject, Effect, Event, Payload as KernelPayload, Priority};
use dc3_wire::{BasicMsg, Payload, PayloadDiscriminator, Route};

use crate::fsm::{is_request, MessageHandler, OutgoingFrame, ProtocolMachine};
use crate::signals;

/// A decoded frame handed to the protocol active object by a
/// transport.
#[derive(Debug, Clone)]
pub struct FrameReceived {
    pub msg: BasicMsg,
    pub payload: Payload,
}

/// A subsystem's asynchronous completion of an in-flight request.
#[derive(Debug, Clone)]
pub struct Completion {
    pub message_id: u32,
    pub discriminator: PayloadDiscriminator,
    pub payload: Payload,
}

pub struct ProtocolActiveObject<H> {
    name: &'static str,
    priority: Priority,
    udp_transport: &'static str,
    serial_transport: &'static str,
    machine: RefCell<ProtocolMachine<H>>,
}

impl<H: MessageHandler> ProtocolActiveObject<H> {
    /// `udp_transport`/`serial_transport` are the dispatcher-registered
    /// names of the two `dc3_transports` endpoints. A reply travels out
    /// whichever one its request arrived on, the reply route always
    /// echoing the request's route, never a single
    /// fixed transport -- a board wired for both UDP and serial clients
    /// would otherwise answer every request on just one of them.
    pub fn new(
        name: &'static str,
        priority: Priority,
        udp_transport: &'static str,
        serial_transport: &'static str,
        handler: H,
    ) -> Self {
        Self {
            name,
            priority,
            udp_transport,
            serial_transport,
            machine: RefCell::new(ProtocolMachine::new(handler)),
        }
    }

    fn transport_for(&self, route: Route) -> &'static str {
        match route {
            Route::Serial => self.serial_transport,
            _ => self.udp_transport,
        }
    }

    fn frame_effect(&self, frame: OutgoingFrame) -> Effect {
        let target = self.transport_for(frame.msg.route);
        let framed = dc3_wire::codec::encode_frame(&frame.msg, &frame.payload)
            .expect("encoding a well-formed outgoing frame cannot fail");
        // `encode_frame`'s leading length prefix is for streams with no
        // delimiting of their own; both transports below supply their
        // own (a UDP datagram's boundary, a serial line's `\n`), so it
        // is stripped here rather than carried onto the wire twice.
        let body = framed[4..].to_vec();
        Effect::Post {
            target,
            signal: signals::SEND_BYTES,
            payload: KernelPayload::bytes(body),
        }
    }
}

impl<H: MessageHandler> ActiveObject for ProtocolActiveObject<H> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn handle(&self, event: &Event) -> Vec<Effect> {
        match event.signal {
            signals::FRAME_RECEIVED => {
                let Some(received) = event.payload.downcast_ref::<FrameReceived>() else {
                    return vec![];
                };
                if !is_request(&received.msg) {
                    return vec![];
                }
                if self.machine.borrow().is_busy() {
                    // Leave it for after the current request finishes --
                    // requests are processed only after
                    // the current Done is emitted, in arrival order.
                    return vec![Effect::Defer];
                }
                let frames = self
                    .machine
                    .borrow_mut()
                    .on_request(received.msg, received.payload.clone());
                let mut effects: Vec<Effect> = frames.into_iter().map(|f| self.frame_effect(f)).collect();
                effects.extend(self.machine.borrow().drain_handler_effects());
                if self.machine.borrow().is_busy() {
                    effects.push(Effect::ArmTimer {
                        ticks: crate::fsm::DEFAULT_TIMEOUT_TICKS,
                        periodic: false,
                        signal: signals::PROCESSING_TIMEOUT,
                    });
                } else {
                    effects.push(Effect::RecallOne);
                }
                effects
            }
            signals::OPERATION_COMPLETE => {
                let Some(completion) = event.payload.downcast_ref::<Completion>() else {
                    return vec![];
                };
                let frames = self.machine.borrow_mut().on_completion(
                    completion.message_id,
                    completion.discriminator,
                    completion.payload.clone(),
                );
                let mut effects: Vec<Effect> = frames.into_iter().map(|f| self.frame_effect(f)).collect();
                if !effects.is_empty() {
                    effects.push(Effect::DisarmTimer);
                    effects.push(Effect::RecallOne);
                }
                effects
            }
            signals::PROCESSING_TIMEOUT => {
                self.machine.borrow_mut().tick();
                vec![Effect::RecallOne]
            }
            _ => vec![],
        }
    }
}
