// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hardware Interface Layer traits, in the style of Tock's
//! `kernel::hil` module (see `capsules/core/src/virtualizers/virtual_i2c.rs`
//! for the pattern this follows: a bus-level trait with a `Client`
//! callback, completion delivered asynchronously rather than returned).
//!
//! Implementations live in `chips/dc3xx`; callers live in `capsules`.
//! None of these traits may block -- a call either completes
//! synchronously with `Ok(())`/`Err` meaning "accepted" or "rejected",
//! or the implementor later calls back into the registered `Client`.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum I2cError {
    #[error("bus busy")]
    Busy,
    #[error("no ack received for device address")]
    AddressNack,
    #[error("no ack received for data byte")]
    DataNack,
    #[error("arbitration lost")]
    ArbitrationLost,
    #[error("bus operation timed out")]
    Timeout,
    #[error("bus controller is in an unrecoverable state and was reset")]
    BusReset,
}

/// The bus engine: owns the physical I2C
/// peripheral, issues start/stop/repeated-start, and reports one
/// completed transaction at a time. Mirrors `hil::i2c::I2CMaster`.
pub trait I2cBus {
    /// Begin a transaction: optionally write `write_len` bytes from the
    /// buffer, optionally then read `read_len` bytes into it. Returns
    /// immediately; completion is reported via `I2cBusClient::command_complete`.
    fn transfer(
        &self,
        address: u16,
        ten_bit: bool,
        buffer: Box<[u8]>,
        write_len: usize,
        read_len: usize,
    ) -> Result<(), I2cError>;

    fn set_client(&self, client: &'static dyn I2cBusClient);

    /// Briefly toggles the clock line to unwedge a slave holding SDA
    /// low, then re-issues the controller's idle state. Called at most
    /// once per failed operation.
    fn recover_bus(&self);
}

pub trait I2cBusClient {
    fn command_complete(&self, buffer: Box<[u8]>, result: Result<(), I2cError>);
}

/// A flash controller. Erase is sector granular;
/// program and read operate on the controller's native word size but
/// are exposed here as byte slices for simplicity, as
/// `hil::flash::Flash` does via its `Client<page>` buffer type.
pub trait FlashController {
    /// Erases the `size`-byte sector starting at `address`. The
    /// controller has no opinion on sector boundaries of its own --
    /// the caller (the flash engine, which owns the part's actual
    /// non-uniform sector table) is responsible for passing an
    /// address/size pair that lines up with a real sector.
    fn erase_sector(&self, address: u32, size: u32) -> Result<(), FlashError>;
    fn program(&self, address: u32, data: Box<[u8]>) -> Result<(), FlashError>;
    fn read(&self, address: u32, len: usize) -> Result<Box<[u8]>, FlashError>;

    fn set_client(&self, client: &'static dyn FlashClient);
}

pub trait FlashClient {
    fn erase_complete(&self, address: u32, result: Result<(), FlashError>);
    fn program_complete(&self, address: u32, result: Result<(), FlashError>);
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    #[error("address is outside the flash region")]
    OutOfRange,
    #[error("address or length is not aligned to the controller's word size")]
    Unaligned,
    #[error("program failed verification")]
    VerifyFailed,
    #[error("attempted to program a sector that was not erased first")]
    NotErased,
}

/// A byte-oriented serial channel. Send is posted; arriving bytes are delivered to the
/// client as they are received, matching `hil::uart::{Transmit,Receive}`
/// split into one trait since this system has no DMA ring buffer.
pub trait SerialChannel {
    fn send(&self, data: Box<[u8]>) -> Result<(), SerialError>;
    fn set_client(&self, client: &'static dyn SerialClient);
}

pub trait SerialClient {
    fn send_complete(&self, result: Result<(), SerialError>);
    fn bytes_received(&self, data: &[u8]);
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SerialError {
    #[error("transmit buffer is full")]
    BufferFull,
    #[error("framing error")]
    Framing,
}

/// The small set of board strap/status GPIOs the settings database and
/// boot-mode logic read at startup.
pub trait GpioStraps {
    fn read_boot_mode_straps(&self) -> u8;
}
