// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Payload records, keyed by `PayloadDiscriminator`.

use crate::error::StatusCode;

/// A 14-byte build timestamp, e.g. `"20240131120000"`. Kept as a fixed
/// array rather than a `String` so it round-trips through the wire
/// format without a length prefix, matching the original's fixed field.
pub type BuildTimestamp = [u8; 14];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    None,
    SystemRom,
    Bootloader,
    Application,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Bootloader,
    Application,
}

/// How an I²C operation is dispatched; selects among the three access
/// modes a device supports. The CLI's `acc=` argument spells these
/// `BARE`, `QPC`, `FRT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Synchronous, gated by a "kernel not yet running" witness.
    Blocking,
    /// Asynchronous, completion delivered to the caller's own mailbox.
    NativeEvent,
    /// Asynchronous, completion delivered via a secondary cooperative
    /// scheduler's task queue.
    SecondaryCooperativeEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cDeviceKind {
    Eeprom,
    SnRom,
    EuiRom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPayload {
    pub error_code: StatusCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionPayload {
    pub major: u8,
    pub minor: u8,
    pub timestamp: BuildTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootModePayload {
    pub error_code: StatusCode,
    pub mode: BootMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashMetadataPayload {
    pub error_code: StatusCode,
    pub image_type: ImageType,
    pub size: u32,
    pub crc: u32,
    pub major: u8,
    pub minor: u8,
    pub timestamp: BuildTimestamp,
    pub packet_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashDataPayload {
    pub sequence: u32,
    pub length: u32,
    pub body: Vec<u8>,
    pub body_crc: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cDataPayload {
    pub device: I2cDeviceKind,
    pub access: AccessMode,
    pub start: u32,
    pub length: u32,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabasePayload {
    pub element_id: u16,
    pub access: AccessMode,
    pub length: u32,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugPayload {
    pub modules_mask: u32,
    pub devices_mask: u8,
}

/// Which leg of the RAM self-test failed, `None` meaning all three
/// passed. Distinct from
/// `dc3_capsules::flash::RamTestStage`, which has no "nothing failed"
/// variant since it only names a stage while the test is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamTestStage {
    None,
    DataBus,
    AddressBus,
    DeviceIntegrity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamTestPayload {
    pub error_code: StatusCode,
    pub stage: RamTestStage,
    pub address: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    None,
    Status(StatusPayload),
    Version(VersionPayload),
    BootMode(BootModePayload),
    FlashMetadata(FlashMetadataPayload),
    FlashData(FlashDataPayload),
    I2cData(I2cDataPayload),
    Database(DatabasePayload),
    Debug(DebugPayload),
    RamTest(RamTestPayload),
}

impl Payload {
    pub fn status(code: StatusCode) -> Self {
        Payload::Status(StatusPayload { error_code: code })
    }
}
