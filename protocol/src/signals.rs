// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Signal identifiers this active object reacts to or emits.

use dc3_kernel::SignalId;

/// A decoded frame arrived from a transport. Payload is
/// `Payload::custom::<FrameReceived>`.
pub const FRAME_RECEIVED: SignalId = 100;
/// A subsystem finished the work behind an in-flight request. Payload
/// is `Payload::custom::<Completion>`.
pub const OPERATION_COMPLETE: SignalId = 101;
/// The per-message processing timeout elapsed.
pub const PROCESSING_TIMEOUT: SignalId = 102;

/// Ask the owning transport to send an already-encoded frame. Defined
/// here (rather than in the transports crate) because it is the
/// contract the protocol active object and every transport agree on.
pub const SEND_BYTES: SignalId = 200;
