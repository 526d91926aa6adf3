// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire-level types shared by the device and host protocol state
//! machines: the `BasicMsg` envelope, payload records, and a
//! length-delimited codec, superseding the fields in `Firmware/Common` headers.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod payload;

pub use envelope::{BasicMsg, MessageName, MessageType, PayloadDiscriminator, Route};
pub use error::{StatusCode, WireError};
pub use payload::{AccessMode, BootMode, ImageType, Payload};
