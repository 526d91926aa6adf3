// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host-side library for talking to a DC3 coupler board: a blocking
//! mirror of the on-device protocol state machine (`client.rs`) over
//! either a UDP socket or a base64-lines serial port (`transport.rs`).
//! `dc3ctl` (`src/bin/dc3ctl.rs`) is the CLI built on top of it.

pub mod client;
pub mod config;
pub mod error;
pub mod transport;

pub use client::{HostClient, HostState};
pub use error::{ClientError, TransportError};
pub use transport::{HostTransport, SerialTransport, UdpTransport};
