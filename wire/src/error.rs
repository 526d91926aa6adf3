// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The error taxa, expressed as one numeric status code
//! so it can travel in a `StatusPayload` and as a typed error for
//! local callers.

use thiserror::Error;

/// A stable numeric error code, sent over the wire in a `StatusPayload`
/// and as the `status` field of several other payloads. 0 is always
/// success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,

    // Transport
    FrameTooLong = 1,
    FrameDecodingFailed = 2,
    TransportClosed = 3,

    // Protocol
    UnknownMessage = 10,
    DuplicateMessageId = 11,
    Timeout = 12,
    ProgressWhenDisallowed = 13,

    // I2C bus
    BusBusy = 20,
    StartTimeout = 21,
    AddressNack = 22,
    DataTimeout = 23,
    DmaTimeout = 24,
    Recovered = 25,

    // I2C device
    OffsetOutOfRange = 30,
    DeviceReadOnly = 31,
    InvalidDevice = 32,
    PageDecomposeFailed = 33,

    // Flash
    EraseFailed = 40,
    ProgramFailed = 41,
    ReadbackMismatch = 42,
    ImageCrcMismatch = 43,
    PacketOutOfSequence = 44,
    MetadataInvalid = 45,
    ImageSizeInvalid = 46,
    PacketCrcMismatch = 47,

    // Database
    MagicMismatch = 50,
    VersionMismatch = 51,
    ElementNotFound = 52,
    ElementReadOnly = 53,
    BufferTooSmall = 54,

    // RAM test
    DataBusFailed = 60,
    AddressBusFailed = 61,
    DeviceIntegrityFailed = 62,
}

impl StatusCode {
    pub fn is_ok(self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("frame exceeds the maximum allowed length")]
    FrameTooLong,
    #[error("frame could not be decoded")]
    FrameDecodingFailed,
    #[error("transport was closed")]
    TransportClosed,
    #[error("message name {0} is not recognized")]
    UnknownMessage(u16),
    #[error("payload discriminator {0} did not match the expected one for this message")]
    PayloadMismatch(u16),
}

impl From<WireError> for StatusCode {
    fn from(e: WireError) -> Self {
        match e {
            WireError::FrameTooLong => StatusCode::FrameTooLong,
            WireError::FrameDecodingFailed | WireError::PayloadMismatch(_) => {
                StatusCode::FrameDecodingFailed
            }
            WireError::TransportClosed => StatusCode::TransportClosed,
            WireError::UnknownMessage(_) => StatusCode::UnknownMessage,
        }
    }
}
