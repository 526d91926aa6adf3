// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `dc3ctl` defaults, set as constants rather than read from a
//! configuration file (matching how `dc3-coupler`'s board binary pins
//! its own defaults in `src/main.rs`).

use std::time::Duration;

/// UDP port the board listens on by default (`dc3-coupler --udp-port`).
pub const DEFAULT_REMOTE_UDP_PORT: u16 = 7000;

/// 0 asks the OS for an ephemeral local port.
pub const DEFAULT_LOCAL_UDP_PORT: u16 = 0;

pub const DEFAULT_SERIAL_BAUD: u32 = 115_200;

/// How long `HostClient::call` waits for a Done before giving up. Kept
/// well above `dc3_protocol::fsm::DEFAULT_TIMEOUT_TICKS` at the
/// board's minimum tick rate, so a slow board times itself out first
/// and the CLI reports the board's own Timeout status rather than a
/// bare transport timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes per `flash` data packet. Comfortably under
/// `dc3_wire::codec::MAX_FRAME_LEN` once base64'd for the serial
/// transport (base64 inflates by 4/3).
pub const FLASH_CHUNK_SIZE: usize = 4096;
