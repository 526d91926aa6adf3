// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types for the transport and client layers. `dc3ctl` itself
//! works in `anyhow::Result`, matching `dc3-coupler/src/main.rs`; these
//! per-module `thiserror` enums are what gets wrapped at that edge.

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind udp socket on local port: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to connect udp socket to the remote address: {0}")]
    Connect(#[source] std::io::Error),

    #[error("failed to open serial port: {0}")]
    Serial(#[from] serialport::Error),

    #[error("i/o error talking to the device: {0}")]
    Io(#[source] std::io::Error),

    #[error("received a line that was not valid base64")]
    Framing,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed frame from the device: {0}")]
    Wire(#[from] dc3_wire::WireError),

    #[error("timed out waiting for a reply")]
    Timeout,

    #[error("device sent a Done for message {0} before ever sending an Ack")]
    DoneBeforeAck(u32),
}
