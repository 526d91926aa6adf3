// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Signal identifiers used between the capsules in this crate and
//! between a capsule and the protocol active object.

use dc3_kernel::SignalId;

pub mod i2c_bus {
    use super::SignalId;
    pub const REQUEST: SignalId = 400;
    pub const COMPLETE: SignalId = 401;
    pub const HW_COMPLETE_INTERNAL: SignalId = 402;
    pub const OP_TIMEOUT: SignalId = 403;
}

pub mod i2c_device {
    use super::SignalId;
    pub const READ_REQUEST: SignalId = 410;
    pub const WRITE_REQUEST: SignalId = 411;
    pub const COMPLETE: SignalId = 412;
    pub const SETTLE_TIMER: SignalId = 413;
}

pub mod flash {
    use super::SignalId;
    pub const START_INGEST: SignalId = 420;
    pub const DATA_PACKET: SignalId = 421;
    pub const COMPLETE: SignalId = 422;
    pub const RAM_TEST_REQUEST: SignalId = 423;
    pub const RAM_TEST_COMPLETE: SignalId = 424;
}

pub mod database {
    use super::SignalId;
    pub const READ_REQUEST: SignalId = 430;
    pub const WRITE_REQUEST: SignalId = 431;
    pub const COMPLETE: SignalId = 432;
}

pub mod debug {
    use super::SignalId;
    /// A trace record ready to be filtered and (if not masked out)
    /// formatted and sent.
    pub const EMIT: SignalId = 440;
    /// Replace both bitmasks wholesale, e.g. in response to a
    /// `set_dbg_modules`/`set_dbg_device` command.
    pub const SET_MASKS: SignalId = 441;
}
