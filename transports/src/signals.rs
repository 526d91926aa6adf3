// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use dc3_kernel::SignalId;

/// A debug-prefixed line arrived on the serial endpoint and should be
/// emitted onto the debug/trace bus verbatim.
pub const DEBUG_LINE: SignalId = 300;
/// Internal: the underlying channel finished (or failed) the
/// in-flight DMA send.
pub const SEND_COMPLETE_INTERNAL: SignalId = 301;
/// Internal: the in-flight DMA send did not complete within the
/// timeout and was abandoned.
pub const DMA_TIMEOUT: SignalId = 302;
/// A pre-formatted trace line (already prefixed and newline-
/// terminated) should go out over the serial endpoint verbatim,
/// sharing its one-transfer-at-a-time DMA queue but bypassing the
/// base64 framing that protocol frames get -- debug
/// lines are never base64-encoded, inbound or outbound.
pub const EMIT_RAW_LINE: SignalId = 303;
