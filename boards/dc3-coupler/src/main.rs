// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The DC3 coupler board: wires every capsule, transport and chip
//! peripheral into one [`dc3_kernel::Dispatcher`] and runs it to
//! quiescence once per tick: single-threaded, cooperative,
//! no interrupt handler does more than post an event.
//!
//! Unlike a bare-metal Tock board, this firmware runs hosted: the
//! "peripherals" in `dc3_chip` talk to a real UDP socket and a real or
//! simulated serial port, and the tick source is a `sleep` loop rather
//! than a hardware systick. What stays the same as a bare-metal board
//! is the wiring idiom below -- `Box::leak` each active object once
//! and hand the resulting `&'static` reference to the dispatcher, to
//! any chip peripheral's `set_client`, and to the board's own poll
//! loop, since nothing here ever needs to reclaim ownership.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use dc3_capsules::debug::DebugBus;
use dc3_capsules::flash::FlashEngine;
use dc3_capsules::i2c_bus::I2cBusEngine;
use dc3_capsules::i2c_device::{DeviceDescriptor, I2cDeviceEngine};
use dc3_capsules::settings::{self, SettingsDatabase};
use dc3_chip::flash::SimulatedFlash;
use dc3_chip::gpio::SimulatedGpioStraps;
use dc3_chip::i2c::SimulatedI2cBus;
use dc3_chip::ram::SimulatedExternalRam;
use dc3_chip::serial::{RealSerialChannel, SimulatedSerialChannel};
use dc3_kernel::config::{
    DEFAULT_LARGE_POOL_CAPACITY, DEFAULT_MEDIUM_POOL_CAPACITY, DEFAULT_SMALL_POOL_CAPACITY,
    MIN_TICK_RATE_HZ,
};
use dc3_kernel::hil::{I2cBus, SerialChannel};
use dc3_kernel::pool::EventPools;
use dc3_kernel::{ActiveObject, Dispatcher, Payload, Priority};
use dc3_protocol::ProtocolActiveObject;
use dc3_transports::serial::SerialEndpoint;
use dc3_transports::udp::UdpEndpoint;
use dc3_wire::payload::BootMode;

mod device_handler;

use device_handler::{RamTestHarness, Targets};

/// Word count of the simulated external RAM the `ram_test` command
/// exercises. There is no real chip to size this
/// against, so a modest window is enough to drive all three stages.
const RAM_TEST_ADDRESS_BITS: u32 = 16;
const RAM_TEST_BASE: u32 = 0x2000_0000;

/// I2C bus addresses for the three devices behind the one simulated
/// bus, in the order `capsules::settings::DESCRIPTORS` expects them.
const EEPROM_ADDRESS: u16 = 0x50;
const SN_ROM_ADDRESS: u16 = 0x54;
const EUI_ROM_ADDRESS: u16 = 0x56;

/// DC3 coupler board firmware.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Local UDP port the board listens for client frames on.
    #[arg(long, default_value_t = 7000)]
    udp_port: u16,

    /// Address frames are sent back to; the board has exactly one UDP
    /// peer at a time.
    #[arg(long, default_value = "127.0.0.1:7001")]
    udp_remote: SocketAddr,

    /// Path to a real serial device. When omitted, an in-memory serial
    /// channel is used instead (useful for local development and CI).
    #[arg(long)]
    serial_port: Option<String>,

    #[arg(long, default_value_t = 115_200)]
    serial_baud: u32,

    /// Default IP address written into a freshly self-repaired
    /// settings database.
    #[arg(long, default_value = "192.168.1.50")]
    default_ip: std::net::Ipv4Addr,
}

struct SimulatedRamHarness {
    ram: &'static SimulatedExternalRam,
}

impl RamTestHarness for SimulatedRamHarness {
    fn base_address(&self) -> u32 {
        RAM_TEST_BASE
    }

    fn address_bits(&self) -> u32 {
        RAM_TEST_ADDRESS_BITS
    }

    fn write(&self, address: u32, value: u32) {
        self.ram.write_word(address, value);
    }

    fn read(&self, address: u32) -> u32 {
        self.ram.read_word(address)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let default_ip = args.default_ip.octets();

    let pools = EventPools::new(
        DEFAULT_SMALL_POOL_CAPACITY,
        DEFAULT_MEDIUM_POOL_CAPACITY,
        DEFAULT_LARGE_POOL_CAPACITY,
    );
    let mut dispatcher = Dispatcher::new(pools);

    // --- chip peripherals ---------------------------------------------
    let i2c_chip: &'static SimulatedI2cBus = Box::leak(Box::new(SimulatedI2cBus::new()));
    i2c_chip.attach_device(EEPROM_ADDRESS, 1, settings::EEPROM_REGION_SIZE, &[0u8; settings::EEPROM_REGION_SIZE]);
    i2c_chip.attach_device(SN_ROM_ADDRESS, 1, 16, &[0u8; 16]);
    i2c_chip.attach_device(EUI_ROM_ADDRESS, 1, 8, &[0u8; 8]);

    let flash_top = dc3_capsules::flash::flash_top();
    let flash_chip: &'static SimulatedFlash =
        Box::leak(Box::new(SimulatedFlash::new(dc3_capsules::flash::FLASH_BASE, (flash_top - dc3_capsules::flash::FLASH_BASE) as usize)));

    let ram: &'static SimulatedExternalRam =
        Box::leak(Box::new(SimulatedExternalRam::new(RAM_TEST_BASE, 1usize << RAM_TEST_ADDRESS_BITS)));

    let gpio_chip: &'static SimulatedGpioStraps = Box::leak(Box::new(SimulatedGpioStraps::new(0)));

    let serial_channel: &'static dyn SerialChannel = match &args.serial_port {
        Some(path) => {
            let real = RealSerialChannel::open(path, args.serial_baud)?;
            Box::leak(Box::new(real))
        }
        None => {
            log::info!("no --serial-port given, using an in-memory serial channel");
            Box::leak(Box::new(SimulatedSerialChannel::new()))
        }
    };

    // --- capsules -------------------------------------------------------
    let i2c_bus: &'static I2cBusEngine = Box::leak(Box::new(I2cBusEngine::new("i2c_bus", Priority::new(10), i2c_chip)));
    i2c_chip.set_client(i2c_bus);

    let eeprom: &'static I2cDeviceEngine = Box::leak(Box::new(I2cDeviceEngine::new(
        "eeprom",
        Priority::new(20),
        "i2c_bus",
        DeviceDescriptor {
            bus_address: EEPROM_ADDRESS,
            internal_address_width: 1,
            min_address: 0,
            max_address: settings::EEPROM_REGION_SIZE as u32,
            page_size: 8,
            read_only: false,
        },
    )));
    let sn_rom: &'static I2cDeviceEngine = Box::leak(Box::new(I2cDeviceEngine::new(
        "sn_rom",
        Priority::new(20),
        "i2c_bus",
        DeviceDescriptor {
            bus_address: SN_ROM_ADDRESS,
            internal_address_width: 1,
            min_address: 0,
            max_address: 16,
            page_size: 16,
            read_only: true,
        },
    )));
    let eui_rom: &'static I2cDeviceEngine = Box::leak(Box::new(I2cDeviceEngine::new(
        "eui_rom",
        Priority::new(20),
        "i2c_bus",
        DeviceDescriptor {
            bus_address: EUI_ROM_ADDRESS,
            internal_address_width: 1,
            min_address: 0,
            max_address: 8,
            page_size: 8,
            read_only: true,
        },
    )));

    let flash_engine: &'static FlashEngine = Box::leak(Box::new(FlashEngine::new("flash", Priority::new(15), flash_chip)));
    flash_chip.set_client(flash_engine);

    let database: &'static SettingsDatabase = Box::leak(Box::new(SettingsDatabase::new(
        "database",
        Priority::new(25),
        "eeprom",
        "sn_rom",
        "eui_rom",
        flash_chip,
        gpio_chip,
        default_ip,
        dc3_capsules::debug::DEFAULT_MODULE_MASK,
        dc3_capsules::debug::DEFAULT_DEVICE_MASK,
    )));

    let debug_bus: &'static DebugBus = Box::leak(Box::new(DebugBus::new(
        "debug",
        Priority::new(5),
        "serial",
        MIN_TICK_RATE_HZ,
        dc3_capsules::debug::DEFAULT_MODULE_MASK,
        dc3_capsules::debug::DEFAULT_DEVICE_MASK,
    )));

    let ram_harness: &'static SimulatedRamHarness = Box::leak(Box::new(SimulatedRamHarness { ram }));

    let targets = Targets {
        flash: "flash",
        database: "database",
        eeprom_device: "eeprom",
        sn_rom_device: "sn_rom",
        eui_rom_device: "eui_rom",
        debug_target: "debug",
        debug: debug_bus,
        ram_test: ram_harness,
        default_ip,
        default_dbg_modules: dc3_capsules::debug::DEFAULT_MODULE_MASK,
        default_dbg_devices: dc3_capsules::debug::DEFAULT_DEVICE_MASK,
    };
    let (handler, router) =
        device_handler::new("device_handler", Priority::new(30), "protocol", targets, BootMode::Bootloader);
    let router: &'static device_handler::CompletionRouter = Box::leak(Box::new(router));

    let protocol: &'static ProtocolActiveObject<device_handler::DeviceHandler> = Box::leak(Box::new(
        ProtocolActiveObject::new("protocol", Priority::new(1), "udp", "serial", handler),
    ));

    let udp: &'static UdpEndpoint =
        Box::leak(Box::new(UdpEndpoint::bind("udp", Priority::new(2), "protocol", args.udp_port, args.udp_remote)?));

    let serial: &'static SerialEndpoint =
        Box::leak(Box::new(SerialEndpoint::new("serial", Priority::new(3), "protocol", "debug", serial_channel)));
    serial_channel.set_client(serial);

    for object in [
        protocol as &'static dyn ActiveObject,
        udp,
        serial,
        router,
        i2c_bus,
        eeprom,
        sn_rom,
        eui_rom,
        flash_engine,
        database,
        debug_bus,
    ] {
        dispatcher.register(object);
    }

    // Boot-time self-repair: read the EEPROM head
    // straight off the chip -- the dispatcher has nothing queued yet,
    // so there is no request to route this through -- and let the
    // database decide whether to repair it.
    let eeprom_head = i2c_chip.device_memory(EEPROM_ADDRESS).unwrap_or_default();
    for effect in database.check_and_repair(&eeprom_head) {
        apply_boot_effect(&mut dispatcher, effect);
    }
    dispatcher.run_to_quiescence();

    log::info!("dc3-coupler listening on udp/{} -> {}", args.udp_port, args.udp_remote);

    let tick_duration = Duration::from_secs_f64(1.0 / MIN_TICK_RATE_HZ as f64);
    loop {
        if let Some((target, signal, received)) = udp.poll() {
            dispatcher.post(target, signal, Payload::custom(received));
        }
        for (target, signal, payload) in serial.poll() {
            dispatcher.post(target, signal, payload);
        }
        for (target, signal, payload) in i2c_bus.poll() {
            dispatcher.post(target, signal, payload);
        }
        for (target, signal, payload) in flash_engine.poll() {
            dispatcher.post(target, signal, payload);
        }
        dispatcher.tick();
        dispatcher.run_to_quiescence();
        std::thread::sleep(tick_duration);
    }
}

/// `check_and_repair` only ever returns a single `Effect::Post`
/// (the repair write); reuses `Dispatcher::post` rather
/// than a general effect-application loop since the dispatcher isn't
/// running any active object's `handle` at boot.
fn apply_boot_effect(dispatcher: &mut Dispatcher, effect: dc3_kernel::Effect) {
    if let dc3_kernel::Effect::Post { target, signal, payload } = effect {
        dispatcher.post(target, signal, payload);
    }
}
