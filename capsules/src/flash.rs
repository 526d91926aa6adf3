// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The flash engine: sector-erase planning,
//! byte-program-with-verify, image trailer access, packet-sequenced
//! image ingest, and the RAM self-test.
//!
//! Sector layout and trailer offsets are grounded on
//! `Firmware/Common/bsp/flash.h` (original_source): a 24-sector,
//! 2 MiB STM32F4 flash, bootloader occupying sectors 0-5 up to
//! `0x0803FFFF`, application starting at sector 6 (`0x08040000`), and a
//! 32-byte trailer at the top of the flash (size @ top-0x20, CRC @
//! top-0x1C, major @ top-0x18, minor @ top-0x16, 14-byte timestamp @
//! top-0x14) matching `FLASH_APPL_SIZE_ADDR`/`FLASH_APPL_CRC_ADDR`/
//! `FLASH_APPL_MAJ_VER_ADDR`/`FLASH_APPL_MIN_VER_ADDR`/
//! `FLASH_APPL_BUILD_DATETIME_ADDR`.

use std::cell::RefCell;
use std::collections::VecDeque;

use crc::{Crc, CRC_32_ISO_HDLC};
use dc3_kernel::hil::{FlashClient, FlashController, FlashError};
use dc3_kernel::{ActiveObject, Effect, Event, Payload, Priority, SignalId};
use dc3_wire::payload::{BuildTimestamp, ImageType};
use dc3_wire::StatusCode;

use crate::signals::flash as signals;

pub const SECTOR_COUNT: u32 = 24;
pub const FLASH_BASE: u32 = 0x0800_0000;
pub const APPLICATION_START: u32 = 0x0804_0000;
pub const BOOTLOADER_SECTOR_COUNT: u32 = 6;

pub const TRAILER_LEN: u32 = 0x20;
pub const SIZE_OFFSET_FROM_TOP: u32 = 0x20;
pub const CRC_OFFSET_FROM_TOP: u32 = 0x1C;
pub const MAJOR_OFFSET_FROM_TOP: u32 = 0x18;
pub const MINOR_OFFSET_FROM_TOP: u32 = 0x16;
pub const TIMESTAMP_OFFSET_FROM_TOP: u32 = 0x14;

/// `MAX_APPL_FWIMAGE_SIZE` in the original bsp header (~1.76 MiB,
/// just shy of the application region's 1.875 MiB to leave the
/// trailer's sector untouched by the image itself).
pub const MAX_APPLICATION_IMAGE_SIZE: u32 = 0x1A_FFFF;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// The sector sizes of an STM32F4xx 2 MiB part, indexed 0..24
/// (`ADDR_FLASH_SECTOR_0`..`ADDR_FLASH_SECTOR_23`): four 16 KiB, one
/// 64 KiB, seven 128 KiB, four 16 KiB, one 64 KiB, seven 128 KiB.
const SECTOR_SIZES: [u32; SECTOR_COUNT as usize] = [
    16 * 1024, 16 * 1024, 16 * 1024, 16 * 1024, 64 * 1024, 128 * 1024,
    128 * 1024, 128 * 1024, 128 * 1024, 128 * 1024, 128 * 1024, 128 * 1024,
    16 * 1024, 16 * 1024, 16 * 1024, 16 * 1024, 64 * 1024, 128 * 1024,
    128 * 1024, 128 * 1024, 128 * 1024, 128 * 1024, 128 * 1024, 128 * 1024,
];

pub fn sector_base(index: u32) -> u32 {
    FLASH_BASE + SECTOR_SIZES[..index as usize].iter().sum::<u32>()
}

pub fn flash_top() -> u32 {
    FLASH_BASE + SECTOR_SIZES.iter().sum::<u32>()
}

fn region_start(image_type: ImageType) -> u32 {
    match image_type {
        ImageType::Bootloader => FLASH_BASE,
        ImageType::Application => APPLICATION_START,
    }
}

fn first_sector_index(image_type: ImageType) -> u32 {
    match image_type {
        ImageType::Bootloader => 0,
        ImageType::Application => BOOTLOADER_SECTOR_COUNT,
    }
}

/// Sector base addresses covering `size` bytes of `image_type` --
/// the application region always includes the final sector
/// holding the trailer.
pub fn sectors_to_erase(image_type: ImageType, size: u32) -> Vec<u32> {
    let start = region_start(image_type);
    let mut end = start + size;
    if matches!(image_type, ImageType::Application) {
        end = end.max(flash_top() - TRAILER_LEN).min(flash_top());
    }
    let mut sectors = Vec::new();
    let mut index = first_sector_index(image_type);
    while index < SECTOR_COUNT && sector_base(index) < end {
        sectors.push(sector_base(index));
        index += 1;
    }
    sectors
}

fn is_printable_datetime_lead(byte: u8) -> bool {
    byte == b'0' || byte == b'2'
}

#[derive(Debug, Clone)]
pub struct ImageMetadata {
    pub image_type: ImageType,
    pub total_size: u32,
    pub packet_count: u32,
    pub image_crc: u32,
    pub major: u8,
    pub minor: u8,
    pub timestamp: BuildTimestamp,
}

/// Validates incoming image metadata: the CRC
/// must not be the degenerate all-zero/all-one sentinel, the timestamp
/// must start with a digit from the two centuries this firmware has
/// ever been built in, and an application image must fit the flash
/// region reserved for it.
pub fn validate_metadata(meta: &ImageMetadata) -> Result<(), StatusCode> {
    if meta.image_crc == 0 || meta.image_crc == u32::MAX {
        return Err(StatusCode::MetadataInvalid);
    }
    if !is_printable_datetime_lead(meta.timestamp[0]) {
        return Err(StatusCode::MetadataInvalid);
    }
    if matches!(meta.image_type, ImageType::Application) && meta.total_size > MAX_APPLICATION_IMAGE_SIZE {
        return Err(StatusCode::ImageSizeInvalid);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamTestStage {
    DataBus,
    AddressBus,
    DeviceIntegrity,
}

#[derive(Debug, Clone, Copy)]
pub struct RamTestResult {
    pub stage: RamTestStage,
    pub failing_address: Option<u32>,
    pub status: StatusCode,
}

/// Walks a single-bit-set pattern across every bit of a data word,
/// writing and reading it back at one fixed address -- the classic
/// "data bus" test that catches bits stuck together or stuck at a
/// rail, independent of addressing.
fn data_bus_walk(write: impl Fn(u32, u32), read: impl Fn(u32) -> u32, address: u32) -> Option<u32> {
    let mut pattern: u32 = 1;
    while pattern != 0 {
        write(address, pattern);
        if read(address) != pattern {
            return Some(pattern);
        }
        pattern <<= 1;
    }
    None
}

/// Walks a single address bit at a time, storing a unique value at
/// each address under test and confirming no other address under test
/// was disturbed -- catches shorted or stuck address lines.
fn address_bus_walk(write: impl Fn(u32, u32), read: impl Fn(u32) -> u32, base: u32, bits: u32) -> Option<u32> {
    let addresses: Vec<u32> = (0..bits).map(|b| base + (1u32 << b)).collect();
    write(base, 0);
    for &addr in &addresses {
        write(addr, 0xFFFF_FFFF);
    }
    if read(base) != 0 {
        return Some(base);
    }
    for &addr in &addresses {
        if read(addr) != 0xFFFF_FFFF {
            return Some(addr);
        }
        write(addr, 0);
    }
    None
}

/// Runs the full three-stage self-test against a caller
/// supplied read/write pair over external RAM.
pub fn run_ram_test(
    write: impl Fn(u32, u32),
    read: impl Fn(u32) -> u32,
    base: u32,
    address_bits: u32,
) -> RamTestResult {
    if let Some(_pattern) = data_bus_walk(&write, &read, base) {
        return RamTestResult {
            stage: RamTestStage::DataBus,
            failing_address: Some(base),
            status: StatusCode::DataBusFailed,
        };
    }
    if let Some(addr) = address_bus_walk(&write, &read, base, address_bits) {
        return RamTestResult {
            stage: RamTestStage::AddressBus,
            failing_address: Some(addr),
            status: StatusCode::AddressBusFailed,
        };
    }
    for offset in 0..address_bits {
        let addr = base + offset * 4;
        let value = addr ^ 0xA5A5_A5A5;
        write(addr, value);
        if read(addr) != value {
            return RamTestResult {
                stage: RamTestStage::DeviceIntegrity,
                failing_address: Some(addr),
                status: StatusCode::DeviceIntegrityFailed,
            };
        }
    }
    RamTestResult {
        stage: RamTestStage::DeviceIntegrity,
        failing_address: None,
        status: StatusCode::Ok,
    }
}

enum IngestState {
    Idle,
    Erasing {
        caller: &'static str,
        metadata: ImageMetadata,
        remaining_sectors: VecDeque<u32>,
        write_cursor: u32,
    },
    Receiving {
        caller: &'static str,
        metadata: ImageMetadata,
        next_sequence: u32,
        write_cursor: u32,
        running_crc_input: Vec<u8>,
    },
    Programming {
        caller: &'static str,
        metadata: ImageMetadata,
        next_sequence: u32,
        write_cursor: u32,
        running_crc_input: Vec<u8>,
        program_address: u32,
        remaining: VecDeque<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct IngestCompletion {
    pub status: StatusCode,
}

pub struct FlashEngine {
    name: &'static str,
    priority: Priority,
    controller: &'static dyn FlashController,
    state: RefCell<IngestState>,
    hw_pending: RefCell<VecDeque<HwEvent>>,
}

enum HwEvent {
    EraseDone(u32, Result<(), FlashError>),
    ProgramDone(u32, Result<(), FlashError>),
}

impl FlashEngine {
    pub fn new(name: &'static str, priority: Priority, controller: &'static dyn FlashController) -> Self {
        Self {
            name,
            priority,
            controller,
            state: RefCell::new(IngestState::Idle),
            hw_pending: RefCell::new(VecDeque::new()),
        }
    }

    pub fn poll(&self) -> Vec<(&'static str, SignalId, Payload)> {
        self.hw_pending
            .borrow_mut()
            .drain(..)
            .map(|ev| match ev {
                HwEvent::EraseDone(sector, result) => (
                    self.name,
                    signals::ERASE_COMPLETE_INTERNAL,
                    Payload::custom((sector, result.map_err(|_| StatusCode::EraseFailed))),
                ),
                HwEvent::ProgramDone(addr, result) => (
                    self.name,
                    signals::PROGRAM_COMPLETE_INTERNAL,
                    Payload::custom((addr, result.map_err(|_| StatusCode::ProgramFailed))),
                ),
            })
            .collect()
    }

    fn complete_effect(&self, caller: &'static str, status: StatusCode) -> Effect {
        Effect::Post {
            target: caller,
            signal: signals::COMPLETE,
            payload: Payload::custom(IngestCompletion { status }),
        }
    }

    fn write_trailer(&self, metadata: &ImageMetadata, crc: u32) -> Result<(), FlashError> {
        let top = flash_top();
        let mut trailer = Vec::with_capacity(TRAILER_LEN as usize);
        trailer.extend_from_slice(&metadata.total_size.to_le_bytes());
        trailer.extend_from_slice(&crc.to_le_bytes());
        trailer.push(metadata.major);
        trailer.push(0);
        trailer.push(metadata.minor);
        trailer.push(0);
        trailer.extend_from_slice(&metadata.timestamp);
        // The written fields (size, crc, major, minor, timestamp plus their
        // padding bytes) only fill the first 26 bytes of the 32-byte
        // trailer region `TRAILER_LEN` describes; the remaining 6 are
        // reserved and never written.
        debug_assert_eq!(trailer.len(), 4 + 4 + 1 + 1 + 1 + 1 + metadata.timestamp.len());
        self.controller.program(top - SIZE_OFFSET_FROM_TOP, trailer.into_boxed_slice())
    }

    fn begin_program_next_byte(
        program_address: u32,
        remaining: &mut VecDeque<u8>,
        controller: &dyn FlashController,
    ) -> Result<(), FlashError> {
        let Some(&byte) = remaining.front() else {
            return Ok(());
        };
        controller.program(program_address, Box::new([byte]))
    }
}

impl FlashClient for FlashEngine {
    fn erase_complete(&self, sector: u32, result: Result<(), FlashError>) {
        self.hw_pending.borrow_mut().push_back(HwEvent::EraseDone(sector, result));
    }

    fn program_complete(&self, address: u32, result: Result<(), FlashError>) {
        self.hw_pending.borrow_mut().push_back(HwEvent::ProgramDone(address, result));
    }
}

impl ActiveObject for FlashEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn handle(&self, event: &Event) -> Vec<Effect> {
        match event.signal {
            signals::START_INGEST => {
                let Some((metadata, caller)) = event.payload.downcast_ref::<(ImageMetadata, &'static str)>() else {
                    return vec![];
                };
                if !matches!(*self.state.borrow(), IngestState::Idle) {
                    return vec![self.complete_effect(*caller, StatusCode::MetadataInvalid)];
                }
                if let Err(status) = validate_metadata(metadata) {
                    return vec![self.complete_effect(*caller, status)];
                }
                let mut sectors: VecDeque<u32> =
                    sectors_to_erase(metadata.image_type, metadata.total_size).into();
                let Some(first) = sectors.pop_front() else {
                    return vec![self.complete_effect(*caller, StatusCode::MetadataInvalid)];
                };
                match self.controller.erase_sector(first, sector_size_at(first)) {
                    Ok(()) => {
                        *self.state.borrow_mut() = IngestState::Erasing {
                            caller: *caller,
                            metadata: metadata.clone(),
                            remaining_sectors: sectors,
                            write_cursor: region_start(metadata.image_type),
                        };
                        vec![]
                    }
                    Err(_) => vec![self.complete_effect(*caller, StatusCode::EraseFailed)],
                }
            }
            signals::ERASE_COMPLETE_INTERNAL => {
                let Some((_sector, result)) = event.payload.downcast_ref::<(u32, Result<(), StatusCode>)>() else {
                    return vec![];
                };
                let IngestState::Erasing { caller, metadata, mut remaining_sectors, write_cursor } =
                    self.state.borrow_mut().take()
                else {
                    return vec![];
                };
                if result.is_err() {
                    *self.state.borrow_mut() = IngestState::Idle;
                    return vec![self.complete_effect(caller, StatusCode::EraseFailed)];
                }
                match remaining_sectors.pop_front() {
                    Some(next) => {
                        if self.controller.erase_sector(next, sector_size_at(next)).is_err() {
                            *self.state.borrow_mut() = IngestState::Idle;
                            return vec![self.complete_effect(caller, StatusCode::EraseFailed)];
                        }
                        *self.state.borrow_mut() = IngestState::Erasing {
                            caller,
                            metadata,
                            remaining_sectors,
                            write_cursor,
                        };
                        vec![]
                    }
                    None => {
                        let erase_done = self.complete_effect(caller, StatusCode::Ok);
                        *self.state.borrow_mut() = IngestState::Receiving {
                            caller,
                            metadata,
                            next_sequence: 1,
                            write_cursor,
                            running_crc_input: Vec::new(),
                        };
                        vec![erase_done]
                    }
                }
            }
            signals::DATA_PACKET => {
                let Some((sequence, body, body_crc)) =
                    event.payload.downcast_ref::<(u32, Vec<u8>, u32)>()
                else {
                    return vec![];
                };
                let IngestState::Receiving {
                    caller,
                    metadata,
                    next_sequence,
                    write_cursor,
                    mut running_crc_input,
                } = self.state.borrow_mut().take()
                else {
                    return vec![Effect::Defer];
                };
                if crc32(body) != *body_crc {
                    *self.state.borrow_mut() = IngestState::Idle;
                    return vec![self.complete_effect(caller, StatusCode::PacketCrcMismatch)];
                }
                if *sequence != next_sequence {
                    *self.state.borrow_mut() = IngestState::Idle;
                    return vec![self.complete_effect(caller, StatusCode::PacketOutOfSequence)];
                }
                running_crc_input.extend_from_slice(body);
                let mut remaining: VecDeque<u8> = body.iter().copied().collect();
                let program_address = write_cursor;
                if Self::begin_program_next_byte(program_address, &mut remaining, self.controller).is_err() {
                    *self.state.borrow_mut() = IngestState::Idle;
                    return vec![self.complete_effect(caller, StatusCode::ProgramFailed)];
                }
                *self.state.borrow_mut() = IngestState::Programming {
                    caller,
                    metadata,
                    next_sequence,
                    write_cursor,
                    running_crc_input,
                    program_address,
                    remaining,
                };
                vec![]
            }
            signals::PROGRAM_COMPLETE_INTERNAL => {
                let Some((address, result)) = event.payload.downcast_ref::<(u32, Result<(), StatusCode>)>() else {
                    return vec![];
                };
                let IngestState::Programming {
                    caller,
                    metadata,
                    next_sequence,
                    mut write_cursor,
                    running_crc_input,
                    program_address,
                    mut remaining,
                } = self.state.borrow_mut().take()
                else {
                    return vec![];
                };
                if result.is_err() {
                    *self.state.borrow_mut() = IngestState::Idle;
                    return vec![self.complete_effect(caller, StatusCode::ProgramFailed)];
                }
                match self.controller.read(*address, 1) {
                    Ok(readback) if readback.first() == remaining.front() => {}
                    _ => {
                        *self.state.borrow_mut() = IngestState::Idle;
                        return vec![self.complete_effect(caller, StatusCode::ReadbackMismatch)];
                    }
                }
                remaining.pop_front();
                write_cursor += 1;
                if !remaining.is_empty() {
                    let next_addr = program_address + 1;
                    if Self::begin_program_next_byte(next_addr, &mut remaining, self.controller).is_err() {
                        *self.state.borrow_mut() = IngestState::Idle;
                        return vec![self.complete_effect(caller, StatusCode::ProgramFailed)];
                    }
                    *self.state.borrow_mut() = IngestState::Programming {
                        caller,
                        metadata,
                        next_sequence,
                        write_cursor,
                        running_crc_input,
                        program_address: next_addr,
                        remaining,
                    };
                    return vec![];
                }
                if next_sequence == metadata.packet_count {
                    let computed = crc32(&running_crc_input);
                    if computed != metadata.image_crc {
                        *self.state.borrow_mut() = IngestState::Idle;
                        return vec![self.complete_effect(caller, StatusCode::ImageCrcMismatch)];
                    }
                    let status = match self.write_trailer(&metadata, computed) {
                        Ok(()) => StatusCode::Ok,
                        Err(_) => StatusCode::ProgramFailed,
                    };
                    *self.state.borrow_mut() = IngestState::Idle;
                    vec![self.complete_effect(caller, status)]
                } else {
                    let packet_done = self.complete_effect(caller, StatusCode::Ok);
                    *self.state.borrow_mut() = IngestState::Receiving {
                        caller,
                        metadata,
                        next_sequence: next_sequence + 1,
                        write_cursor,
                        running_crc_input,
                    };
                    vec![packet_done]
                }
            }
            // The RAM self-test needs raw read/write closures over the
            // external memory under test, which only the board has
            // (there is no HIL trait for "arbitrary memory region").
            // `run_ram_test` is called directly by board code, the
            // same way Blocking I2C access bypasses the dispatcher.
            signals::RAM_TEST_REQUEST => vec![],
            _ => vec![],
        }
    }
}

/// The size of the sector starting at `address` (every address this is
/// called with is itself one of [`sector_base`]'s outputs, since it
/// only ever comes from the erase plan `sectors_to_erase` builds).
fn sector_size_at(address: u32) -> u32 {
    (0..SECTOR_COUNT)
        .find(|&i| sector_base(i) == address)
        .map(|i| SECTOR_SIZES[i as usize])
        .expect("erase plan only ever contains sector bases")
}

impl IngestState {
    fn take(&mut self) -> IngestState {
        std::mem::replace(self, IngestState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata(crc: u32) -> ImageMetadata {
        ImageMetadata {
            image_type: ImageType::Application,
            total_size: 4096,
            packet_count: 4,
            image_crc: crc,
            major: 1,
            minor: 0,
            timestamp: *b"20240131120000",
        }
    }

    #[test]
    fn zero_crc_is_rejected() {
        assert_eq!(validate_metadata(&sample_metadata(0)), Err(StatusCode::MetadataInvalid));
    }

    #[test]
    fn all_ones_crc_is_rejected() {
        assert_eq!(validate_metadata(&sample_metadata(u32::MAX)), Err(StatusCode::MetadataInvalid));
    }

    #[test]
    fn well_formed_metadata_passes() {
        assert_eq!(validate_metadata(&sample_metadata(0x1234_5678)), Ok(()));
    }

    #[test]
    fn oversized_application_image_is_rejected() {
        let mut meta = sample_metadata(0x1234_5678);
        meta.total_size = MAX_APPLICATION_IMAGE_SIZE + 1;
        assert_eq!(validate_metadata(&meta), Err(StatusCode::ImageSizeInvalid));
    }

    #[test]
    fn application_erase_plan_always_covers_the_trailer_sector() {
        let sectors = sectors_to_erase(ImageType::Application, 4096);
        assert_eq!(*sectors.last().unwrap(), sector_base(SECTOR_COUNT - 1));
    }

    #[test]
    fn bootloader_erase_plan_starts_at_sector_zero() {
        let sectors = sectors_to_erase(ImageType::Bootloader, 4096);
        assert_eq!(sectors[0], FLASH_BASE);
    }

    #[test]
    fn ram_test_passes_on_a_perfect_model() {
        use std::cell::RefCell;
        let mem = RefCell::new(std::collections::HashMap::new());
        let write = |addr: u32, val: u32| {
            mem.borrow_mut().insert(addr, val);
        };
        let read = |addr: u32| *mem.borrow().get(&addr).unwrap_or(&0);
        let result = run_ram_test(write, read, 0x2000_0000, 16);
        assert_eq!(result.status, StatusCode::Ok);
    }
}
