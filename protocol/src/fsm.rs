// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The pure Idle/BusyWithMsg/ValidateMsg state machine, independent of
//! the kernel's dispatcher so it can be driven
//! and tested with plain function calls. [`super::active_object`]
//! wraps this in a [`dc3_kernel::ActiveObject`] for use on a real
//! board or host client.

use dc3_kernel::hsm::HsmState;
use dc3_kernel::Effect;
use dc3_wire::{BasicMsg, MessageType, Payload, PayloadDiscriminator, Route};

/// Default per-message processing timeout, in ticks at the kernel's
/// configured tick rate (default >= 30 s).
pub const DEFAULT_TIMEOUT_TICKS: u32 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoState {
    Idle,
    BusyWithMsg,
    ValidateMsg,
}

impl HsmState for ProtoState {
    fn parent(&self) -> Option<Self> {
        match self {
            ProtoState::Idle | ProtoState::BusyWithMsg => None,
            ProtoState::ValidateMsg => Some(ProtoState::BusyWithMsg),
        }
    }
}

/// What a [`MessageHandler`] does with a freshly validated request.
pub enum HandlerOutcome {
    /// The work completed entirely within this call; the Done payload
    /// is ready now.
    Done(PayloadDiscriminator, Payload),
    /// A subsystem operation was kicked off asynchronously; the Done
    /// payload will arrive later via [`ProtocolMachine::on_completion`].
    Pending,
}

/// The message-name-specific handler table, shared as one table of
/// (state, signal) -> handler with only the terminal handlers
/// differing. Implemented once for the device (dispatching into the bus/device/flash/settings engines)
/// and once for the host (a thin client with no real subsystems).
pub trait MessageHandler {
    fn start(&mut self, msg: &BasicMsg, payload: &Payload) -> HandlerOutcome;

    /// Effects `start` wanted carried out alongside its `HandlerOutcome`
    /// (typically `Effect::Post` kicking off the flash/i2c/settings
    /// engine that will eventually report completion) -- drained once,
    /// right after `start` returns. A synchronous handler with nothing
    /// else to do returns none.
    fn drain_effects(&self) -> Vec<Effect> {
        Vec::new()
    }
}

/// A frame this state machine wants sent on `route`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFrame {
    pub msg: BasicMsg,
    pub payload: Payload,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    id: u32,
    ticks_remaining: u32,
}

/// The protocol core itself. Holds the current state, the in-flight
/// request's envelope (needed to compose Done with the right id/route)
/// and timeout counter.
pub struct ProtocolMachine<H> {
    state: ProtoState,
    in_flight: Option<BasicMsg>,
    pending: Option<Pending>,
    timeout_ticks: u32,
    handler: H,
}

impl<H: MessageHandler> ProtocolMachine<H> {
    pub fn new(handler: H) -> Self {
        Self::with_timeout(handler, DEFAULT_TIMEOUT_TICKS)
    }

    pub fn with_timeout(handler: H, timeout_ticks: u32) -> Self {
        Self {
            state: ProtoState::Idle,
            in_flight: None,
            pending: None,
            timeout_ticks,
            handler,
        }
    }

    pub fn state(&self) -> ProtoState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self.state, ProtoState::Idle)
    }

    /// Effects the handler queued during the `start` call that just
    /// returned, for the active-object wrapper to fold into its own.
    pub fn drain_handler_effects(&self) -> Vec<Effect> {
        self.handler.drain_effects()
    }

    /// A frame arrived while Idle. The caller (the active-object
    /// wrapper) is responsible for deferring frames that arrive while
    /// busy rather than calling this out of turn.
    pub fn on_request(&mut self, msg: BasicMsg, payload: Payload) -> Vec<OutgoingFrame> {
        debug_assert_eq!(self.state, ProtoState::Idle, "on_request called while busy");

        let mut out = vec![OutgoingFrame {
            msg: msg.ack(),
            payload: Payload::None,
        }];

        self.in_flight = Some(msg);
        self.pending = Some(Pending {
            id: msg.message_id,
            ticks_remaining: self.timeout_ticks,
        });
        self.state = ProtoState::BusyWithMsg;

        match self.handler.start(&msg, &payload) {
            HandlerOutcome::Done(discriminator, done_payload) => {
                out.extend(self.finish(discriminator, done_payload));
            }
            HandlerOutcome::Pending => {}
        }
        out
    }

    /// A subsystem reported completion for `message_id`. Discarded if
    /// stale (wrong id, or not currently busy).
    pub fn on_completion(
        &mut self,
        message_id: u32,
        discriminator: PayloadDiscriminator,
        payload: Payload,
    ) -> Vec<OutgoingFrame> {
        match &self.pending {
            Some(p) if p.id == message_id && self.state != ProtoState::Idle => {
                self.finish(discriminator, payload)
            }
            _ => {
                log::debug!("discarding stale completion for message id {message_id}");
                vec![]
            }
        }
    }

    /// One timer tick elapsed. Returns `true` if the pending request
    /// timed out (the caller should then emit no further frame; Ack was
    /// already sent and no Done is emitted).
    pub fn tick(&mut self) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            return false;
        };
        if pending.ticks_remaining == 0 {
            return false;
        }
        pending.ticks_remaining -= 1;
        if pending.ticks_remaining == 0 {
            self.reset_to_idle();
            true
        } else {
            false
        }
    }

    fn finish(&mut self, discriminator: PayloadDiscriminator, payload: Payload) -> Vec<OutgoingFrame> {
        let in_flight = self
            .in_flight
            .take()
            .expect("finish called with no in-flight request");
        let done = in_flight.done(discriminator);
        self.reset_to_idle();
        vec![OutgoingFrame { msg: done, payload }]
    }

    fn reset_to_idle(&mut self) {
        self.in_flight = None;
        self.pending = None;
        self.state = ProtoState::Idle;
    }
}

/// Builds the unknown-message Done frame.
pub fn unknown_message_done(msg: &BasicMsg) -> OutgoingFrame {
    OutgoingFrame {
        msg: msg.done(PayloadDiscriminator::Status),
        payload: Payload::status(dc3_wire::StatusCode::UnknownMessage),
    }
}

/// A Prog frame, only ever sent if the originating request asked for
/// one.
pub fn progress_frame(msg: &BasicMsg) -> Option<OutgoingFrame> {
    msg.progress_requested.then(|| OutgoingFrame {
        msg: msg.prog(),
        payload: Payload::None,
    })
}

pub fn is_request(msg: &BasicMsg) -> bool {
    msg.message_type == MessageType::Req
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc3_wire::{MessageName, StatusCode};

    struct Synchronous;
    impl MessageHandler for Synchronous {
        fn start(&mut self, _msg: &BasicMsg, _payload: &Payload) -> HandlerOutcome {
            HandlerOutcome::Done(PayloadDiscriminator::Status, Payload::status(StatusCode::Ok))
        }
    }

    struct Asynchronous;
    impl MessageHandler for Asynchronous {
        fn start(&mut self, _msg: &BasicMsg, _payload: &Payload) -> HandlerOutcome {
            HandlerOutcome::Pending
        }
    }

    fn req(id: u32) -> BasicMsg {
        BasicMsg::request(MessageName::GetBootMode, PayloadDiscriminator::None, id, Route::UdpClient)
    }

    #[test]
    fn ack_then_done_in_order_for_a_synchronous_handler() {
        let mut m = ProtocolMachine::new(Synchronous);
        let frames = m.on_request(req(1), Payload::None);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].msg.message_type, MessageType::Ack);
        assert_eq!(frames[1].msg.message_type, MessageType::Done);
        assert_eq!(m.state(), ProtoState::Idle);
    }

    #[test]
    fn asynchronous_handler_only_sends_ack_until_completion_arrives() {
        let mut m = ProtocolMachine::new(Asynchronous);
        let frames = m.on_request(req(2), Payload::None);
        assert_eq!(frames.len(), 1);
        assert!(m.is_busy());

        let frames = m.on_completion(2, PayloadDiscriminator::Status, Payload::status(StatusCode::Ok));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg.message_type, MessageType::Done);
        assert!(!m.is_busy());
    }

    #[test]
    fn stale_completion_with_wrong_id_is_discarded() {
        let mut m = ProtocolMachine::new(Asynchronous);
        m.on_request(req(3), Payload::None);
        let frames = m.on_completion(999, PayloadDiscriminator::Status, Payload::status(StatusCode::Ok));
        assert!(frames.is_empty());
        assert!(m.is_busy(), "the real request is still pending");
    }

    #[test]
    fn timeout_returns_to_idle_and_discards_late_completions() {
        let mut m = ProtocolMachine::with_timeout(Asynchronous, 2);
        m.on_request(req(4), Payload::None);
        assert!(!m.tick());
        assert!(m.tick(), "second tick should fire the timeout");
        assert_eq!(m.state(), ProtoState::Idle);

        let frames = m.on_completion(4, PayloadDiscriminator::Status, Payload::status(StatusCode::Ok));
        assert!(frames.is_empty(), "completion after timeout must be discarded");
    }
}
