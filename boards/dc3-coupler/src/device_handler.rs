// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The device's [`dc3_protocol::MessageHandler`] implementation: the
//! one place that knows which subsystem (bus/device/flash/settings/debug)
//! answers which wire message -- the device and host sides of the
//! protocol state machine share the same table, differing only in
//! their terminal handlers; this module is the device's.
//!
//! Split in two because [`dc3_protocol::MessageHandler::start`] takes
//! `&mut self` while the completions it waits on arrive at a
//! [`dc3_kernel::ActiveObject`], whose `handle` takes `&self`
//! (`kernel/active_object.rs`'s three-simultaneous-holders rule, see
//! `DESIGN.md`). [`DeviceHandler`] is the `MessageHandler`, embedded by
//! value inside the board's `ProtocolActiveObject`; [`CompletionRouter`]
//! is the `ActiveObject`, registered with the dispatcher under its own
//! name so the capsules below have somewhere to post their
//! module-specific completion signals (`i2c_bus::COMPLETE`,
//! `flash::COMPLETE`, ... -- none of which match
//! `dc3_protocol::signals::OPERATION_COMPLETE`'s shape). Both share one
//! `Rc<RefCell<Inner>>`: the in-RAM boot mode and the single in-flight
//! subsystem operation this firmware ever has outstanding at once
//! (one request processed at a time).

use std::cell::RefCell;
use std::rc::Rc;

use dc3_capsules::debug::DebugBus;
use dc3_capsules::flash::{self, ImageMetadata};
use dc3_capsules::i2c_device::{DeviceCompletion, DeviceRequest};
use dc3_capsules::settings::{self, Element};
use dc3_capsules::signals::{
    database as database_signals, debug as debug_signals, flash as flash_signals,
    i2c_device as device_signals,
};
use dc3_kernel::{ActiveObject, Effect, Event, Payload as KernelPayload, Priority};
use dc3_protocol::signals::OPERATION_COMPLETE;
use dc3_protocol::{Completion, HandlerOutcome, MessageHandler};
use dc3_wire::payload::{
    AccessMode, BootModePayload, DatabasePayload, DebugPayload, I2cDataPayload, I2cDeviceKind,
    RamTestPayload, RamTestStage,
};
use dc3_wire::{BasicMsg, MessageName, Payload, PayloadDiscriminator, StatusCode};

/// Board-owned access to the external RAM the self-test exercises.
/// `dc3_capsules::flash::run_ram_test` wants raw read/write closures
/// over a memory region, which no HIL trait models (there is no
/// silicon to talk to; the board's own simulated external RAM plays
/// this role, the same before-the-dispatcher-exists exception already
/// taken for blocking I²C access).
pub trait RamTestHarness {
    fn base_address(&self) -> u32;
    fn address_bits(&self) -> u32;
    fn write(&self, address: u32, value: u32);
    fn read(&self, address: u32) -> u32;
}

/// `element_id` on the wire is this table's index, in
/// `dc3_capsules::settings::DESCRIPTORS`'s declared order, matching
/// the `get_db_elem elem=N` wire argument.
const ELEMENT_TABLE: &[Element] = &[
    Element::MagicWord,
    Element::Version,
    Element::IpAddr,
    Element::MacAddr,
    Element::SerialNumber,
    Element::BootMajorVersion,
    Element::BootMinorVersion,
    Element::BootBuildDatetime,
    Element::FpgaMajorVersion,
    Element::FpgaMinorVersion,
    Element::FpgaBuildDatetime,
    Element::DebugModulesMask,
    Element::DebugDevicesMask,
    Element::ApplMajorVersion,
    Element::ApplMinorVersion,
    Element::ApplBuildDatetime,
    Element::BoardPositionStrap,
];

fn element_by_id(id: u16) -> Option<Element> {
    ELEMENT_TABLE.get(id as usize).copied()
}

/// Maps a capsule `RamTestStage` (which has no "nothing failed"
/// variant) onto the wire's, collapsing a clean `DeviceIntegrity` pass
/// to `None` -- a healthy test reports `test=None`.
fn wire_ram_test_stage(result: &flash::RamTestResult) -> RamTestStage {
    if result.status.is_ok() {
        return RamTestStage::None;
    }
    match result.stage {
        flash::RamTestStage::DataBus => RamTestStage::DataBus,
        flash::RamTestStage::AddressBus => RamTestStage::AddressBus,
        flash::RamTestStage::DeviceIntegrity => RamTestStage::DeviceIntegrity,
    }
}

/// The registered names (and, where a synchronous read is cheaper than
/// a round trip through the dispatcher, direct references) of every
/// subsystem a wire message might need. Built once by board startup
/// code and handed to [`new`].
pub struct Targets {
    pub flash: &'static str,
    pub database: &'static str,
    pub eeprom_device: &'static str,
    pub sn_rom_device: &'static str,
    pub eui_rom_device: &'static str,
    pub debug_target: &'static str,
    pub debug: &'static DebugBus,
    pub ram_test: &'static dyn RamTestHarness,
    pub default_ip: [u8; 4],
    pub default_dbg_modules: u32,
    pub default_dbg_devices: u8,
}

impl Targets {
    fn device_target(&self, device: I2cDeviceKind) -> &'static str {
        match device {
            I2cDeviceKind::Eeprom => self.eeprom_device,
            I2cDeviceKind::SnRom => self.sn_rom_device,
            I2cDeviceKind::EuiRom => self.eui_rom_device,
        }
    }
}

/// The single subsystem operation in flight, tagged with enough
/// context for [`CompletionRouter`] to turn its raw completion into
/// the right Done payload once it arrives.
#[derive(Debug, Clone, Copy)]
enum PendingKind {
    FlashIngest,
    I2cRead {
        device: I2cDeviceKind,
        access: AccessMode,
        start: u32,
    },
    I2cWrite {
        device: I2cDeviceKind,
        access: AccessMode,
    },
    DbElemRead {
        element_id: u16,
        access: AccessMode,
    },
    /// Both masks, already resolved to their post-write values (one
    /// taken from the request, the other preserved from
    /// `DebugBus::masks()`), so the Done payload is just this struct's
    /// fields -- no second read is needed once the database write
    /// completes.
    DbgMaskSet {
        modules_mask: u32,
        devices_mask: u8,
    },
    ResetDb,
}

struct Inner {
    boot_mode: dc3_wire::payload::BootMode,
    pending: Option<(u32, PendingKind)>,
}

/// The [`MessageHandler`] half: decides what a freshly validated
/// request requires and queues the effect that kicks it off.
/// Synchronous messages (`GetBootMode`, `SetBootMode`, `GetDbgModules`,
/// `RamTest`) never touch `pending` at all.
pub struct DeviceHandler {
    inner: Rc<RefCell<Inner>>,
    router_name: &'static str,
    targets: Targets,
    queued: RefCell<Vec<Effect>>,
}

/// The [`ActiveObject`] half: registered with the dispatcher under
/// `router_name`, the target every capsule completion in this file is
/// addressed to.
pub struct CompletionRouter {
    name: &'static str,
    priority: Priority,
    protocol_target: &'static str,
    inner: Rc<RefCell<Inner>>,
}

/// Builds one device handler and its completion router, sharing the
/// in-RAM boot mode and the single pending-operation slot.
/// `router_name` is both `CompletionRouter::name()` (what the
/// dispatcher registers it as) and the `caller` every queued request
/// below carries, so a capsule's completion signal always lands back
/// here.
pub fn new(
    router_name: &'static str,
    priority: Priority,
    protocol_target: &'static str,
    targets: Targets,
    initial_boot_mode: dc3_wire::payload::BootMode,
) -> (DeviceHandler, CompletionRouter) {
    let inner = Rc::new(RefCell::new(Inner {
        boot_mode: initial_boot_mode,
        pending: None,
    }));
    let handler = DeviceHandler {
        inner: Rc::clone(&inner),
        router_name,
        targets,
        queued: RefCell::new(Vec::new()),
    };
    let router = CompletionRouter {
        name: router_name,
        priority,
        protocol_target,
        inner,
    };
    (handler, router)
}

fn unknown_payload_shape() -> HandlerOutcome {
    HandlerOutcome::Done(PayloadDiscriminator::Status, Payload::status(StatusCode::UnknownMessage))
}

impl MessageHandler for DeviceHandler {
    fn start(&mut self, msg: &BasicMsg, payload: &Payload) -> HandlerOutcome {
        match msg.name {
            MessageName::GetBootMode => {
                let mode = self.inner.borrow().boot_mode;
                HandlerOutcome::Done(
                    PayloadDiscriminator::BootMode,
                    Payload::BootMode(BootModePayload { error_code: StatusCode::Ok, mode }),
                )
            }
            MessageName::SetBootMode => {
                let Payload::BootMode(p) = payload else {
                    return unknown_payload_shape();
                };
                self.inner.borrow_mut().boot_mode = p.mode;
                HandlerOutcome::Done(
                    PayloadDiscriminator::BootMode,
                    Payload::BootMode(BootModePayload { error_code: StatusCode::Ok, mode: p.mode }),
                )
            }
            MessageName::Flash => match payload {
                Payload::FlashMetadata(p) => {
                    let metadata = ImageMetadata {
                        image_type: p.image_type,
                        total_size: p.size,
                        packet_count: p.packet_count,
                        image_crc: p.crc,
                        major: p.major,
                        minor: p.minor,
                        timestamp: p.timestamp,
                    };
                    self.inner.borrow_mut().pending = Some((msg.message_id, PendingKind::FlashIngest));
                    self.queued.borrow_mut().push(Effect::Post {
                        target: self.targets.flash,
                        signal: flash_signals::START_INGEST,
                        payload: KernelPayload::custom((metadata, self.router_name)),
                    });
                    HandlerOutcome::Pending
                }
                Payload::FlashData(p) => {
                    self.inner.borrow_mut().pending = Some((msg.message_id, PendingKind::FlashIngest));
                    self.queued.borrow_mut().push(Effect::Post {
                        target: self.targets.flash,
                        signal: flash_signals::DATA_PACKET,
                        payload: KernelPayload::custom((p.sequence, p.body.clone(), p.body_crc)),
                    });
                    HandlerOutcome::Pending
                }
                _ => unknown_payload_shape(),
            },
            MessageName::RamTest => {
                let harness = self.targets.ram_test;
                let result = flash::run_ram_test(
                    |address, value| harness.write(address, value),
                    |address| harness.read(address),
                    harness.base_address(),
                    harness.address_bits(),
                );
                let stage = wire_ram_test_stage(&result);
                let address = result.failing_address.unwrap_or(0);
                HandlerOutcome::Done(
                    PayloadDiscriminator::RamTest,
                    Payload::RamTest(RamTestPayload { error_code: result.status, stage, address }),
                )
            }
            MessageName::ReadI2c => match payload {
                Payload::I2cData(p) => {
                    self.inner.borrow_mut().pending = Some((
                        msg.message_id,
                        PendingKind::I2cRead { device: p.device, access: p.access, start: p.start },
                    ));
                    self.queued.borrow_mut().push(Effect::Post {
                        target: self.targets.device_target(p.device),
                        signal: device_signals::READ_REQUEST,
                        payload: KernelPayload::custom(DeviceRequest::Read {
                            offset: p.start,
                            count: p.length,
                            caller: self.router_name,
                        }),
                    });
                    HandlerOutcome::Pending
                }
                _ => unknown_payload_shape(),
            },
            MessageName::WriteI2c => match payload {
                Payload::I2cData(p) => {
                    self.inner.borrow_mut().pending = Some((
                        msg.message_id,
                        PendingKind::I2cWrite { device: p.device, access: p.access },
                    ));
                    self.queued.borrow_mut().push(Effect::Post {
                        target: self.targets.device_target(p.device),
                        signal: device_signals::WRITE_REQUEST,
                        payload: KernelPayload::custom(DeviceRequest::Write {
                            offset: p.start,
                            data: p.body.clone(),
                            caller: self.router_name,
                        }),
                    });
                    HandlerOutcome::Pending
                }
                _ => unknown_payload_shape(),
            },
            MessageName::GetDbgModules => {
                let (modules_mask, devices_mask) = self.targets.debug.masks();
                HandlerOutcome::Done(
                    PayloadDiscriminator::Debug,
                    Payload::Debug(DebugPayload { modules_mask, devices_mask }),
                )
            }
            MessageName::SetDbgModules => match payload {
                Payload::Debug(p) => {
                    let (_, current_devices) = self.targets.debug.masks();
                    self.start_dbg_mask_set(msg.message_id, p.modules_mask, current_devices, Element::DebugModulesMask)
                }
                _ => unknown_payload_shape(),
            },
            MessageName::SetDbgDevice => match payload {
                Payload::Debug(p) => {
                    let (current_modules, _) = self.targets.debug.masks();
                    self.start_dbg_mask_set(msg.message_id, current_modules, p.devices_mask, Element::DebugDevicesMask)
                }
                _ => unknown_payload_shape(),
            },
            MessageName::GetDbElem => match payload {
                Payload::Database(p) => {
                    let Some(element) = element_by_id(p.element_id) else {
                        return HandlerOutcome::Done(
                            PayloadDiscriminator::Status,
                            Payload::status(StatusCode::ElementNotFound),
                        );
                    };
                    self.inner.borrow_mut().pending = Some((
                        msg.message_id,
                        PendingKind::DbElemRead { element_id: p.element_id, access: p.access },
                    ));
                    self.queued.borrow_mut().push(Effect::Post {
                        target: self.targets.database,
                        signal: database_signals::READ_REQUEST,
                        payload: KernelPayload::custom((element, self.router_name)),
                    });
                    HandlerOutcome::Pending
                }
                _ => unknown_payload_shape(),
            },
            MessageName::ResetDb => {
                let image = settings::default_eeprom_image(
                    self.targets.default_ip,
                    self.targets.default_dbg_modules,
                    self.targets.default_dbg_devices,
                );
                self.inner.borrow_mut().pending = Some((msg.message_id, PendingKind::ResetDb));
                self.queued.borrow_mut().push(Effect::Post {
                    target: self.targets.eeprom_device,
                    signal: device_signals::WRITE_REQUEST,
                    payload: KernelPayload::custom(DeviceRequest::Write {
                        offset: 0,
                        data: image,
                        caller: self.router_name,
                    }),
                });
                HandlerOutcome::Pending
            }
        }
    }

    fn drain_effects(&self) -> Vec<Effect> {
        self.queued.borrow_mut().drain(..).collect()
    }
}

impl DeviceHandler {
    /// `SetDbgModules`/`SetDbgDevice` share everything but which half
    /// of the mask pair the request actually changes --
    /// `debug::SET_MASKS` replaces both at once, so the untouched half
    /// is read back from the live bus first -- and which element the
    /// change gets persisted under, since the masks are
    /// persisted as database elements.
    fn start_dbg_mask_set(
        &mut self,
        message_id: u32,
        modules_mask: u32,
        devices_mask: u8,
        persisted_as: Element,
    ) -> HandlerOutcome {
        self.queued.borrow_mut().push(Effect::Post {
            target: self.targets.debug_target,
            signal: debug_signals::SET_MASKS,
            payload: KernelPayload::custom((modules_mask, devices_mask)),
        });
        let value = match persisted_as {
            Element::DebugModulesMask => modules_mask.to_le_bytes().to_vec(),
            Element::DebugDevicesMask => vec![devices_mask],
            _ => unreachable!("only the two mask elements are ever passed here"),
        };
        self.inner.borrow_mut().pending =
            Some((message_id, PendingKind::DbgMaskSet { modules_mask, devices_mask }));
        self.queued.borrow_mut().push(Effect::Post {
            target: self.targets.database,
            signal: database_signals::WRITE_REQUEST,
            payload: KernelPayload::custom((persisted_as, value, self.router_name)),
        });
        HandlerOutcome::Pending
    }
}

impl ActiveObject for CompletionRouter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn handle(&self, event: &Event) -> Vec<Effect> {
        if !matches!(
            event.signal,
            flash_signals::COMPLETE | device_signals::COMPLETE | database_signals::COMPLETE
        ) {
            return vec![];
        }
        let Some((message_id, kind)) = self.inner.borrow().pending else {
            return vec![];
        };
        let Some((discriminator, reply)) = self.build_reply(event, kind) else {
            return vec![];
        };
        self.inner.borrow_mut().pending = None;
        vec![Effect::Post {
            target: self.protocol_target,
            signal: OPERATION_COMPLETE,
            payload: KernelPayload::custom(Completion { message_id, discriminator, payload: reply }),
        }]
    }
}

impl CompletionRouter {
    fn build_reply(&self, event: &Event, kind: PendingKind) -> Option<(PayloadDiscriminator, Payload)> {
        match event.signal {
            flash_signals::COMPLETE => {
                let completion = event.payload.downcast_ref::<dc3_capsules::flash::IngestCompletion>()?;
                Some((PayloadDiscriminator::Status, Payload::status(completion.status)))
            }
            device_signals::COMPLETE => {
                let completion = event.payload.downcast_ref::<DeviceCompletion>()?;
                self.build_device_reply(kind, completion)
            }
            database_signals::COMPLETE => {
                let completion = event.payload.downcast_ref::<DeviceCompletion>()?;
                self.build_database_reply(kind, completion)
            }
            _ => None,
        }
    }

    fn build_device_reply(
        &self,
        kind: PendingKind,
        completion: &DeviceCompletion,
    ) -> Option<(PayloadDiscriminator, Payload)> {
        match kind {
            PendingKind::ResetDb => Some((PayloadDiscriminator::Status, Payload::status(completion.status))),
            PendingKind::I2cRead { device, access, start } => {
                if !completion.status.is_ok() {
                    return Some((PayloadDiscriminator::Status, Payload::status(completion.status)));
                }
                let body = completion.data.clone().unwrap_or_default();
                Some((
                    PayloadDiscriminator::I2cData,
                    Payload::I2cData(I2cDataPayload { device, access, start, length: body.len() as u32, body }),
                ))
            }
            PendingKind::I2cWrite { device, access } => {
                if !completion.status.is_ok() {
                    return Some((PayloadDiscriminator::Status, Payload::status(completion.status)));
                }
                Some((
                    PayloadDiscriminator::I2cData,
                    Payload::I2cData(I2cDataPayload { device, access, start: 0, length: 0, body: Vec::new() }),
                ))
            }
            PendingKind::FlashIngest | PendingKind::DbElemRead { .. } | PendingKind::DbgMaskSet { .. } => None,
        }
    }

    fn build_database_reply(
        &self,
        kind: PendingKind,
        completion: &DeviceCompletion,
    ) -> Option<(PayloadDiscriminator, Payload)> {
        match kind {
            PendingKind::DbElemRead { element_id, access } => {
                if !completion.status.is_ok() {
                    return Some((PayloadDiscriminator::Status, Payload::status(completion.status)));
                }
                let body = completion.data.clone().unwrap_or_default();
                Some((
                    PayloadDiscriminator::Database,
                    Payload::Database(DatabasePayload { element_id, access, length: body.len() as u32, body }),
                ))
            }
            PendingKind::DbgMaskSet { modules_mask, devices_mask } => {
                if !completion.status.is_ok() {
                    return Some((PayloadDiscriminator::Status, Payload::status(completion.status)));
                }
                Some((PayloadDiscriminator::Debug, Payload::Debug(DebugPayload { modules_mask, devices_mask })))
            }
            PendingKind::FlashIngest | PendingKind::I2cRead { .. } | PendingKind::I2cWrite { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc3_wire::payload::{BootMode, ImageType};
    use dc3_wire::Route;

    struct FixedRam {
        memory: RefCell<std::collections::HashMap<u32, u32>>,
    }
    impl RamTestHarness for FixedRam {
        fn base_address(&self) -> u32 {
            0x2000_0000
        }
        fn address_bits(&self) -> u32 {
            8
        }
        fn write(&self, address: u32, value: u32) {
            self.memory.borrow_mut().insert(address, value);
        }
        fn read(&self, address: u32) -> u32 {
            *self.memory.borrow().get(&address).unwrap_or(&0)
        }
    }

    fn leak_debug_bus() -> &'static DebugBus {
        Box::leak(Box::new(DebugBus::new(
            "debug",
            Priority::new(1),
            "serial",
            100,
            dc3_capsules::debug::DEFAULT_MODULE_MASK,
            dc3_capsules::debug::DEFAULT_DEVICE_MASK,
        )))
    }

    fn targets() -> Targets {
        Targets {
            flash: "flash",
            database: "database",
            eeprom_device: "eeprom",
            sn_rom_device: "sn_rom",
            eui_rom_device: "eui_rom",
            debug_target: "debug",
            debug: leak_debug_bus(),
            ram_test: Box::leak(Box::new(FixedRam { memory: RefCell::new(std::collections::HashMap::new()) })),
            default_ip: [192, 168, 1, 50],
            default_dbg_modules: dc3_capsules::debug::DEFAULT_MODULE_MASK,
            default_dbg_devices: dc3_capsules::debug::DEFAULT_DEVICE_MASK,
        }
    }

    fn req(name: MessageName, discriminator: PayloadDiscriminator, id: u32) -> BasicMsg {
        BasicMsg::request(name, discriminator, id, Route::UdpClient)
    }

    #[test]
    fn get_boot_mode_is_synchronous() {
        let (mut handler, _router) = new("device_handler", Priority::new(5), "protocol", targets(), BootMode::Bootloader);
        let msg = req(MessageName::GetBootMode, PayloadDiscriminator::None, 1);
        let outcome = handler.start(&msg, &Payload::None);
        let HandlerOutcome::Done(discriminator, Payload::BootMode(p)) = outcome else {
            panic!("expected a synchronous BootMode reply");
        };
        assert_eq!(discriminator, PayloadDiscriminator::BootMode);
        assert_eq!(p.mode, BootMode::Bootloader);
    }

    #[test]
    fn set_boot_mode_updates_the_shared_state_read_back_by_get() {
        let (mut handler, _router) = new("device_handler", Priority::new(5), "protocol", targets(), BootMode::Bootloader);
        let set_payload = Payload::BootMode(BootModePayload { error_code: StatusCode::Ok, mode: BootMode::Application });
        handler.start(&req(MessageName::SetBootMode, PayloadDiscriminator::BootMode, 2), &set_payload);

        let outcome = handler.start(&req(MessageName::GetBootMode, PayloadDiscriminator::None, 3), &Payload::None);
        let HandlerOutcome::Done(_, Payload::BootMode(p)) = outcome else {
            panic!("expected BootMode reply");
        };
        assert_eq!(p.mode, BootMode::Application);
    }

    #[test]
    fn ram_test_reports_none_when_healthy() {
        let (mut handler, _router) = new("device_handler", Priority::new(5), "protocol", targets(), BootMode::Bootloader);
        let outcome = handler.start(&req(MessageName::RamTest, PayloadDiscriminator::None, 4), &Payload::None);
        let HandlerOutcome::Done(discriminator, Payload::RamTest(p)) = outcome else {
            panic!("expected a RamTest reply");
        };
        assert_eq!(discriminator, PayloadDiscriminator::RamTest);
        assert_eq!(p.error_code, StatusCode::Ok);
        assert_eq!(p.stage, RamTestStage::None);
        assert_eq!(p.address, 0);
    }

    #[test]
    fn read_i2c_queues_a_device_read_and_remembers_the_pending_message() {
        let (mut handler, _router) = new("device_handler", Priority::new(5), "protocol", targets(), BootMode::Bootloader);
        let payload = Payload::I2cData(I2cDataPayload {
            device: I2cDeviceKind::Eeprom,
            access: AccessMode::NativeEvent,
            start: 0,
            length: 4,
            body: Vec::new(),
        });
        let outcome = handler.start(&req(MessageName::ReadI2c, PayloadDiscriminator::I2cData, 7), &payload);
        assert!(matches!(outcome, HandlerOutcome::Pending));
        let effects = handler.drain_effects();
        assert_eq!(effects.len(), 1);
        let Effect::Post { target, signal, .. } = &effects[0] else {
            panic!("expected a Post effect");
        };
        assert_eq!(*target, "eeprom");
        assert_eq!(*signal, device_signals::READ_REQUEST);
    }

    #[test]
    fn flash_metadata_queues_start_ingest() {
        let (mut handler, _router) = new("device_handler", Priority::new(5), "protocol", targets(), BootMode::Bootloader);
        let payload = Payload::FlashMetadata(dc3_wire::payload::FlashMetadataPayload {
            error_code: StatusCode::Ok,
            image_type: ImageType::Application,
            size: 4096,
            crc: 0x1234_5678,
            major: 1,
            minor: 0,
            timestamp: *b"20240131120000",
        });
        let outcome = handler.start(&req(MessageName::Flash, PayloadDiscriminator::FlashMetadata, 9), &payload);
        assert!(matches!(outcome, HandlerOutcome::Pending));
        let effects = handler.drain_effects();
        assert_eq!(effects.len(), 1);
        let Effect::Post { target, signal, .. } = &effects[0] else {
            panic!("expected a Post effect");
        };
        assert_eq!(*target, "flash");
        assert_eq!(*signal, flash_signals::START_INGEST);
    }

    #[test]
    fn completion_router_ignores_events_it_has_no_pending_operation_for() {
        let (_handler, router) = new("device_handler", Priority::new(5), "protocol", targets(), BootMode::Bootloader);
        let effects = router.handle(&Event::new(
            device_signals::COMPLETE,
            KernelPayload::custom(DeviceCompletion { data: None, status: StatusCode::Ok }),
        ));
        assert!(effects.is_empty());
    }

    #[test]
    fn completion_router_translates_an_i2c_read_completion_into_operation_complete() {
        let (mut handler, router) = new("device_handler", Priority::new(5), "protocol", targets(), BootMode::Bootloader);
        let payload = Payload::I2cData(I2cDataPayload {
            device: I2cDeviceKind::Eeprom,
            access: AccessMode::NativeEvent,
            start: 0,
            length: 4,
            body: Vec::new(),
        });
        handler.start(&req(MessageName::ReadI2c, PayloadDiscriminator::I2cData, 11), &payload);
        handler.drain_effects();

        let effects = router.handle(&Event::new(
            device_signals::COMPLETE,
            KernelPayload::custom(DeviceCompletion { data: Some(vec![0xDE, 0xAD, 0xBE, 0xEF]), status: StatusCode::Ok }),
        ));
        assert_eq!(effects.len(), 1);
        let Effect::Post { target, signal, payload } = &effects[0] else {
            panic!("expected a Post effect");
        };
        assert_eq!(*target, "protocol");
        assert_eq!(*signal, OPERATION_COMPLETE);
        let completion = payload.downcast_ref::<Completion>().unwrap();
        assert_eq!(completion.message_id, 11);
        assert_eq!(completion.discriminator, PayloadDiscriminator::I2cData);
        let Payload::I2cData(p) = &completion.payload else {
            panic!("expected an I2cData reply payload");
        };
        assert_eq!(p.body, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn reset_db_bypasses_the_settings_database() {
        let (mut handler, _router) = new("device_handler", Priority::new(5), "protocol", targets(), BootMode::Bootloader);
        let outcome = handler.start(&req(MessageName::ResetDb, PayloadDiscriminator::None, 13), &Payload::None);
        assert!(matches!(outcome, HandlerOutcome::Pending));
        let effects = handler.drain_effects();
        assert_eq!(effects.len(), 1);
        let Effect::Post { target, signal, .. } = &effects[0] else {
            panic!("expected a Post effect");
        };
        assert_eq!(*target, "eeprom");
        assert_eq!(*signal, device_signals::WRITE_REQUEST);
    }

    #[test]
    fn set_dbg_modules_preserves_the_current_devices_mask() {
        let t = targets();
        let (_, current_devices) = t.debug.masks();
        let (mut handler, _router) = new("device_handler", Priority::new(5), "protocol", t, BootMode::Bootloader);
        let payload = Payload::Debug(DebugPayload { modules_mask: 0xFF, devices_mask: 0 });
        let outcome = handler.start(&req(MessageName::SetDbgModules, PayloadDiscriminator::Debug, 20), &payload);
        assert!(matches!(outcome, HandlerOutcome::Pending));
        let effects = handler.drain_effects();
        assert_eq!(effects.len(), 2);
        let Effect::Post { signal, payload, .. } = &effects[0] else {
            panic!("expected a Post effect");
        };
        assert_eq!(*signal, debug_signals::SET_MASKS);
        let (modules, devices) = payload.downcast_ref::<(u32, u8)>().unwrap();
        assert_eq!(*modules, 0xFF);
        assert_eq!(*devices, current_devices);
    }
}
