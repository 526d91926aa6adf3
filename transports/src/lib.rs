// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The two physical transports: UDP and serial
//! (base64-framed, with a debug-prefix filter). Both are modelled as
//! kernel active objects that bridge to the dispatcher through a
//! poll-based interrupt simulation, turning OS-thread I/O into posted
//! events the way a hosted board's interrupt handlers would.

pub mod serial;
pub mod signals;
pub mod udp;

pub use serial::SerialEndpoint;
pub use udp::UdpEndpoint;
