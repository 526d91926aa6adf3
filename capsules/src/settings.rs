// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The settings database: one descriptor table
//! indirecting every named element to its physical storage, and the
//! magic-word/version self-repair check run at boot.
//!
//! Grounded directly on `Firmware/Common/sys/db.c`'s `settingsDB[]`
//! table and `Firmware/Common/sys/db.h`'s `DB_MAGIC_WORD_DEF`/
//! `DB_VERSION_DEF` (original_source): this module keeps that same
//! element set and storage-location split, but delegates to the device
//! engine (C3) for the EEPROM-class locations rather than talking to
//! the I2C bus directly, and reads flash-resident elements straight
//! from `FlashController::read` rather than through an event cycle --
//! flash reads are synchronous on this controller and every
//! flash-resident element is read-only, so there is no write path to
//! make asynchronous.

use std::cell::RefCell;

use dc3_kernel::hil::{FlashController, GpioStraps};
use dc3_kernel::{ActiveObject, Effect, Event, Payload, Priority};
use dc3_wire::StatusCode;

use crate::i2c_device::DeviceRequest;
use crate::signals::database as signals;
use crate::signals::i2c_device as device_signals;

pub const MAGIC_WORD: u32 = 0xdefec8db;
pub const VERSION: u16 = 0x0001;

/// Matches `settingsDB`'s layout: everything up through `dbgDevices`
/// lives in the 256-byte main EEPROM region at these byte offsets.
pub const MAGIC_WORD_OFFSET: u32 = 0;
pub const VERSION_OFFSET: u32 = 4;
pub const IP_ADDR_OFFSET: u32 = 6;
pub const BOOT_MAJ_OFFSET: u32 = 10;
pub const BOOT_MIN_OFFSET: u32 = 11;
pub const BOOT_BUILD_DATETIME_OFFSET: u32 = 12;
pub const FPGA_MAJ_OFFSET: u32 = 26;
pub const FPGA_MIN_OFFSET: u32 = 27;
pub const FPGA_BUILD_DATETIME_OFFSET: u32 = 28;
pub const DBG_MODULES_OFFSET: u32 = 42;
pub const DBG_DEVICES_OFFSET: u32 = 46;

pub const EEPROM_REGION_SIZE: usize = 256;
const BUILD_DATETIME_LEN: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    MagicWord,
    Version,
    IpAddr,
    MacAddr,
    SerialNumber,
    BootMajorVersion,
    BootMinorVersion,
    BootBuildDatetime,
    ApplMajorVersion,
    ApplMinorVersion,
    ApplBuildDatetime,
    FpgaMajorVersion,
    FpgaMinorVersion,
    FpgaBuildDatetime,
    DebugModulesMask,
    DebugDevicesMask,
    BoardPositionStrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageLocation {
    Eeprom,
    SnRom,
    UiRom,
    Gpio,
    Flash,
}

#[derive(Debug, Clone, Copy)]
pub struct ElementDescriptor {
    pub element: Element,
    pub location: StorageLocation,
    pub offset: u32,
    pub size: u32,
}

const DESCRIPTORS: &[ElementDescriptor] = &[
    ElementDescriptor { element: Element::MagicWord, location: StorageLocation::Eeprom, offset: MAGIC_WORD_OFFSET, size: 4 },
    ElementDescriptor { element: Element::Version, location: StorageLocation::Eeprom, offset: VERSION_OFFSET, size: 2 },
    ElementDescriptor { element: Element::IpAddr, location: StorageLocation::Eeprom, offset: IP_ADDR_OFFSET, size: 4 },
    ElementDescriptor { element: Element::MacAddr, location: StorageLocation::UiRom, offset: 2, size: 6 },
    ElementDescriptor { element: Element::SerialNumber, location: StorageLocation::SnRom, offset: 0, size: 16 },
    ElementDescriptor { element: Element::BootMajorVersion, location: StorageLocation::Eeprom, offset: BOOT_MAJ_OFFSET, size: 1 },
    ElementDescriptor { element: Element::BootMinorVersion, location: StorageLocation::Eeprom, offset: BOOT_MIN_OFFSET, size: 1 },
    ElementDescriptor { element: Element::BootBuildDatetime, location: StorageLocation::Eeprom, offset: BOOT_BUILD_DATETIME_OFFSET, size: BUILD_DATETIME_LEN },
    ElementDescriptor { element: Element::FpgaMajorVersion, location: StorageLocation::Eeprom, offset: FPGA_MAJ_OFFSET, size: 1 },
    ElementDescriptor { element: Element::FpgaMinorVersion, location: StorageLocation::Eeprom, offset: FPGA_MIN_OFFSET, size: 1 },
    ElementDescriptor { element: Element::FpgaBuildDatetime, location: StorageLocation::Eeprom, offset: FPGA_BUILD_DATETIME_OFFSET, size: BUILD_DATETIME_LEN },
    ElementDescriptor { element: Element::DebugModulesMask, location: StorageLocation::Eeprom, offset: DBG_MODULES_OFFSET, size: 4 },
    ElementDescriptor { element: Element::DebugDevicesMask, location: StorageLocation::Eeprom, offset: DBG_DEVICES_OFFSET, size: 1 },
    // Trailer fields: size@top-0x20, crc@top-0x1C, major@top-0x18,
    // minor@top-0x16, timestamp@top-0x14; only the version/timestamp fields are
    // exposed as named database elements.
    ElementDescriptor { element: Element::ApplMajorVersion, location: StorageLocation::Flash, offset: crate::flash::MAJOR_OFFSET_FROM_TOP, size: 1 },
    ElementDescriptor { element: Element::ApplMinorVersion, location: StorageLocation::Flash, offset: crate::flash::MINOR_OFFSET_FROM_TOP, size: 1 },
    ElementDescriptor { element: Element::ApplBuildDatetime, location: StorageLocation::Flash, offset: crate::flash::TIMESTAMP_OFFSET_FROM_TOP, size: BUILD_DATETIME_LEN },
    ElementDescriptor { element: Element::BoardPositionStrap, location: StorageLocation::Gpio, offset: 0, size: 1 },
];

pub fn descriptor(element: Element) -> ElementDescriptor {
    *DESCRIPTORS
        .iter()
        .find(|d| d.element == element)
        .expect("every Element variant has a descriptor entry")
}

pub fn is_read_only(location: StorageLocation) -> bool {
    matches!(
        location,
        StorageLocation::SnRom | StorageLocation::UiRom | StorageLocation::Gpio | StorageLocation::Flash
    )
}

/// The default EEPROM image written on self-repair.
/// Mirrors `DB_defaultEepromSettings`: magic word and version are
/// fixed; IP address and debug masks carry compiled defaults that a
/// cosmetic mismatch does not auto-correct, only a missing/invalid
/// database does.
pub fn default_eeprom_image(default_ip: [u8; 4], default_dbg_modules: u32, default_dbg_devices: u8) -> Vec<u8> {
    let mut image = vec![0u8; EEPROM_REGION_SIZE];
    image[MAGIC_WORD_OFFSET as usize..MAGIC_WORD_OFFSET as usize + 4].copy_from_slice(&MAGIC_WORD.to_le_bytes());
    image[VERSION_OFFSET as usize..VERSION_OFFSET as usize + 2].copy_from_slice(&VERSION.to_le_bytes());
    image[IP_ADDR_OFFSET as usize..IP_ADDR_OFFSET as usize + 4].copy_from_slice(&default_ip);
    image[DBG_MODULES_OFFSET as usize..DBG_MODULES_OFFSET as usize + 4]
        .copy_from_slice(&default_dbg_modules.to_le_bytes());
    image[DBG_DEVICES_OFFSET as usize] = default_dbg_devices;
    image
}

enum Outstanding {
    Read { caller: &'static str },
    Write { caller: &'static str },
    /// Re-reading the magic word and version right after a repair
    /// write, to confirm the image took.
    ValidateReread,
}

pub struct SettingsDatabase {
    name: &'static str,
    priority: Priority,
    eeprom_device: &'static str,
    sn_rom_device: &'static str,
    ui_rom_device: &'static str,
    flash: &'static dyn FlashController,
    gpio: &'static dyn GpioStraps,
    default_ip: [u8; 4],
    default_dbg_modules: u32,
    default_dbg_devices: u8,
    outstanding: RefCell<Option<Outstanding>>,
}

impl SettingsDatabase {
    pub fn new(
        name: &'static str,
        priority: Priority,
        eeprom_device: &'static str,
        sn_rom_device: &'static str,
        ui_rom_device: &'static str,
        flash: &'static dyn FlashController,
        gpio: &'static dyn GpioStraps,
        default_ip: [u8; 4],
        default_dbg_modules: u32,
        default_dbg_devices: u8,
    ) -> Self {
        Self {
            name,
            priority,
            eeprom_device,
            sn_rom_device,
            ui_rom_device,
            flash,
            gpio,
            default_ip,
            default_dbg_modules,
            default_dbg_devices,
            outstanding: RefCell::new(None),
        }
    }

    fn device_target(&self, location: StorageLocation) -> Option<&'static str> {
        match location {
            StorageLocation::Eeprom => Some(self.eeprom_device),
            StorageLocation::SnRom => Some(self.sn_rom_device),
            StorageLocation::UiRom => Some(self.ui_rom_device),
            StorageLocation::Gpio | StorageLocation::Flash => None,
        }
    }

    fn complete_effect(&self, caller: &'static str, data: Option<Vec<u8>>, status: StatusCode) -> Effect {
        Effect::Post {
            target: caller,
            signal: signals::COMPLETE,
            payload: Payload::custom(crate::i2c_device::DeviceCompletion { data, status }),
        }
    }

    /// Boot-time self-repair: given the bytes the board
    /// read straight off the EEPROM before the dispatcher started
    /// running, overwrites the whole region with the compiled default
    /// image if the magic word/version don't validate. Returns no
    /// effects when the existing image is already valid.
    pub fn check_and_repair(&self, eeprom_head: &[u8]) -> Vec<Effect> {
        if head_is_valid(eeprom_head) {
            return vec![];
        }
        *self.outstanding.borrow_mut() = Some(Outstanding::ValidateReread);
        let image = default_eeprom_image(self.default_ip, self.default_dbg_modules, self.default_dbg_devices);
        vec![Effect::Post {
            target: self.eeprom_device,
            signal: device_signals::WRITE_REQUEST,
            payload: Payload::custom(DeviceRequest::Write {
                offset: 0,
                data: image,
                caller: self.name,
            }),
        }]
    }

    fn read_synchronous(&self, d: ElementDescriptor) -> Result<Vec<u8>, StatusCode> {
        match d.location {
            StorageLocation::Gpio => Ok(vec![self.gpio.read_boot_mode_straps()]),
            StorageLocation::Flash => {
                let top = crate::flash::flash_top() - d.offset;
                self.flash
                    .read(top, d.size as usize)
                    .map(|b| b.into_vec())
                    .map_err(|_| StatusCode::ReadbackMismatch)
            }
            _ => unreachable!("eeprom-class reads are delegated, not synchronous"),
        }
    }
}

impl ActiveObject for SettingsDatabase {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn handle(&self, event: &Event) -> Vec<Effect> {
        match event.signal {
            signals::READ_REQUEST => {
                if self.outstanding.borrow().is_some() {
                    return vec![Effect::Defer];
                }
                let Some((element, caller)) = event.payload.downcast_ref::<(Element, &'static str)>() else {
                    return vec![];
                };
                let d = descriptor(*element);
                match self.device_target(d.location) {
                    Some(target) => {
                        *self.outstanding.borrow_mut() = Some(Outstanding::Read { caller: *caller });
                        vec![Effect::Post {
                            target,
                            signal: device_signals::READ_REQUEST,
                            payload: Payload::custom(DeviceRequest::Read {
                                offset: d.offset,
                                count: d.size,
                                caller: self.name,
                            }),
                        }]
                    }
                    None => match self.read_synchronous(d) {
                        Ok(data) => vec![self.complete_effect(*caller, Some(data), StatusCode::Ok)],
                        Err(status) => vec![self.complete_effect(*caller, None, status)],
                    },
                }
            }
            signals::WRITE_REQUEST => {
                if self.outstanding.borrow().is_some() {
                    return vec![Effect::Defer];
                }
                let Some((element, data, caller)) =
                    event.payload.downcast_ref::<(Element, Vec<u8>, &'static str)>()
                else {
                    return vec![];
                };
                let d = descriptor(*element);
                if is_read_only(d.location) {
                    return vec![self.complete_effect(*caller, None, StatusCode::ElementReadOnly)];
                }
                if data.len() as u32 != d.size {
                    return vec![self.complete_effect(*caller, None, StatusCode::BufferTooSmall)];
                }
                let target = self
                    .device_target(d.location)
                    .expect("writable elements are always EEPROM-class");
                *self.outstanding.borrow_mut() = Some(Outstanding::Write { caller: *caller });
                vec![Effect::Post {
                    target,
                    signal: device_signals::WRITE_REQUEST,
                    payload: Payload::custom(DeviceRequest::Write {
                        offset: d.offset,
                        data: data.clone(),
                        caller: self.name,
                    }),
                }]
            }
            device_signals::COMPLETE => {
                let Some(completion) = event.payload.downcast_ref::<crate::i2c_device::DeviceCompletion>() else {
                    return vec![];
                };
                match self.outstanding.borrow_mut().take() {
                    Some(Outstanding::Read { caller }) => {
                        vec![self.complete_effect(caller, completion.data.clone(), completion.status)]
                    }
                    Some(Outstanding::Write { caller }) => {
                        vec![self.complete_effect(caller, None, completion.status)]
                    }
                    Some(Outstanding::ValidateReread) => {
                        // Boot-time self-check: a repair write's re-read failing is
                        // unrecoverable from software; the board treats it as fatal
                        // at the call site, not here.
                        vec![]
                    }
                    None => vec![],
                }
            }
            _ => vec![],
        }
    }
}

/// Checks whether `eeprom_head` (the first `MAGIC_WORD`/`VERSION` bytes
/// read back from the EEPROM at boot) is valid: the magic word at
/// offset 0 must equal the compiled constant, and the version at that
/// offset must equal the compiled constant.
pub fn head_is_valid(eeprom_head: &[u8]) -> bool {
    if eeprom_head.len() < (VERSION_OFFSET + 2) as usize {
        return false;
    }
    let magic = u32::from_le_bytes(eeprom_head[0..4].try_into().unwrap());
    let version = u16::from_le_bytes(eeprom_head[4..6].try_into().unwrap());
    magic == MAGIC_WORD && version == VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_element_has_a_unique_descriptor() {
        let elements = [
            Element::MagicWord,
            Element::Version,
            Element::IpAddr,
            Element::MacAddr,
            Element::SerialNumber,
            Element::BootMajorVersion,
            Element::BootMinorVersion,
            Element::BootBuildDatetime,
            Element::ApplMajorVersion,
            Element::ApplMinorVersion,
            Element::ApplBuildDatetime,
            Element::FpgaMajorVersion,
            Element::FpgaMinorVersion,
            Element::FpgaBuildDatetime,
            Element::DebugModulesMask,
            Element::DebugDevicesMask,
            Element::BoardPositionStrap,
        ];
        for e in elements {
            let _ = descriptor(e);
        }
    }

    #[test]
    fn read_only_classes_match_the_spec_list() {
        assert!(is_read_only(StorageLocation::SnRom));
        assert!(is_read_only(StorageLocation::UiRom));
        assert!(is_read_only(StorageLocation::Gpio));
        assert!(is_read_only(StorageLocation::Flash));
        assert!(!is_read_only(StorageLocation::Eeprom));
    }

    #[test]
    fn default_image_head_validates() {
        let image = default_eeprom_image([192, 168, 1, 50], 0, 0);
        assert!(head_is_valid(&image));
    }

    #[test]
    fn corrupted_head_fails_validation() {
        let mut image = default_eeprom_image([10, 0, 0, 1], 0, 0);
        image[0] = 0;
        assert!(!head_is_valid(&image));
    }
}
