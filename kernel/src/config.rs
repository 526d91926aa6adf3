// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Board-wide constants, set at build time rather than read from a
//! configuration file (matching how Tock boards pin values like stack
//! size and UART baud rate as `const`s in `src/main.rs`).

/// The dispatcher's tick source must run at least this fast so that the
/// shortest timeout in the protocol (the per-message ack timeout) can
/// still be represented as a whole number of ticks.
pub const MIN_TICK_RATE_HZ: u32 = 100;

/// Default capacities for the three event pool classes. Boards may size
/// these differently; these defaults comfortably cover one in-flight
/// request per active object plus headroom for a publish fan-out.
pub const DEFAULT_SMALL_POOL_CAPACITY: usize = 32;
pub const DEFAULT_MEDIUM_POOL_CAPACITY: usize = 16;
pub const DEFAULT_LARGE_POOL_CAPACITY: usize = 8;

/// Maximum number of events allowed to sit in one active object's
/// mailbox before it is considered a fatal programming error --
/// queue overflow is a fatal assertion, not a dropped event.
pub const MAILBOX_CAPACITY: usize = 16;

/// Maximum number of events an active object may keep deferred at once.
pub const DEFERRAL_CAPACITY: usize = 4;
