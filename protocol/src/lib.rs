// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The protocol state machine shared by the device and the host
//! client: Idle/BusyWithMsg/ValidateMsg framing,
//! ack-before-work, done-after-work, and timeout-based cancellation.

pub mod active_object;
pub mod fsm;
pub mod signals;

pub use active_object::{Completion, FrameReceived, ProtocolActiveObject};
pub use fsm::{HandlerOutcome, MessageHandler, OutgoingFrame, ProtocolMachine};
