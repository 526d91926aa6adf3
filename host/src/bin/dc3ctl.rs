// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Command-line client for a DC3 coupler board. One verb per
//! invocation, one request per verb (`flash` drives several requests
//! internally, each still following the Ack-then-Done contract).
//! Replaces the original firmware's hand-rolled `ArgParse`/`Help`/
//! `Menu`/`KTree` console with `clap` derive, matching every other
//! binary in this workspace (`dc3-coupler/src/main.rs`).

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use dc3_host::config::{DEFAULT_LOCAL_UDP_PORT, DEFAULT_REMOTE_UDP_PORT, DEFAULT_SERIAL_BAUD, FLASH_CHUNK_SIZE, REQUEST_TIMEOUT};
use dc3_host::{HostClient, SerialTransport, UdpTransport};
use dc3_wire::envelope::{MessageName, PayloadDiscriminator, Route};
use dc3_wire::error::StatusCode;
use dc3_wire::payload::{
    AccessMode, BootMode, BootModePayload, DatabasePayload, DebugPayload, FlashDataPayload, FlashMetadataPayload, I2cDataPayload,
    I2cDeviceKind, ImageType, Payload,
};

/// Connects to and drives a DC3 coupler board.
#[derive(Parser, Debug)]
#[command(name = "dc3ctl", version, about)]
struct Cli {
    /// Board IP address (UDP transport). Defaults to the loopback
    /// address when neither `--ip` nor `--serial` is given.
    #[arg(short = 'i', long, conflicts_with = "serial")]
    ip: Option<Ipv4Addr>,

    /// Remote UDP port the board listens on.
    #[arg(short = 'p', long = "remote-port", default_value_t = DEFAULT_REMOTE_UDP_PORT)]
    remote_port: u16,

    /// Local UDP port to bind; 0 picks an ephemeral port.
    #[arg(short = 'l', long = "local-port", default_value_t = DEFAULT_LOCAL_UDP_PORT)]
    local_port: u16,

    /// Serial device path (serial transport), e.g. `/dev/ttyUSB0`.
    #[arg(short = 's', long, conflicts_with = "ip")]
    serial: Option<String>,

    /// Serial baud rate.
    #[arg(short = 'b', long, default_value_t = DEFAULT_SERIAL_BAUD)]
    baud: u32,

    #[command(subcommand)]
    verb: Verb,
}

#[derive(Subcommand, Debug)]
enum Verb {
    /// Read the board's current boot mode.
    GetMode,
    /// Write the persisted boot mode.
    SetMode {
        #[arg(long, value_enum)]
        mode: BootModeArg,
    },
    /// Send a firmware image to the board and have it flashed.
    Flash {
        #[arg(long = "type", value_enum)]
        image_type: ImageTypeArg,
        #[arg(long)]
        file: PathBuf,
    },
    /// Run the on-device RAM self-test.
    RamTest,
    /// Read bytes from an I2C device.
    ReadI2c {
        #[arg(long, value_enum)]
        dev: DeviceArg,
        #[arg(long)]
        start: u32,
        #[arg(long)]
        bytes: u32,
        #[arg(long, value_enum)]
        acc: AccessArg,
    },
    /// Write bytes to an I2C device.
    WriteI2c {
        #[arg(long, value_enum)]
        dev: DeviceArg,
        #[arg(long)]
        start: u32,
        /// Comma-separated byte list, each either decimal or `0x`-hex.
        #[arg(long)]
        data: String,
        #[arg(long, value_enum)]
        acc: AccessArg,
    },
    /// Read the debug module/device bitmasks.
    GetDbgModules,
    /// Set the debug module bitmask (hex or decimal).
    SetDbgModules {
        #[arg(long)]
        mask: String,
    },
    /// Set the debug device bitmask (hex or decimal).
    SetDbgDevice {
        #[arg(long)]
        mask: String,
    },
    /// Read one settings database element.
    GetDbElem {
        #[arg(long)]
        elem: u16,
        #[arg(long, value_enum)]
        acc: AccessArg,
    },
    /// Rewrite the settings database to its default image.
    ResetDb,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BootModeArg {
    Bootloader,
    Application,
}

impl From<BootModeArg> for BootMode {
    fn from(value: BootModeArg) -> Self {
        match value {
            BootModeArg::Bootloader => BootMode::Bootloader,
            BootModeArg::Application => BootMode::Application,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ImageTypeArg {
    Bootloader,
    Application,
}

impl From<ImageTypeArg> for ImageType {
    fn from(value: ImageTypeArg) -> Self {
        match value {
            ImageTypeArg::Bootloader => ImageType::Bootloader,
            ImageTypeArg::Application => ImageType::Application,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DeviceArg {
    #[value(name = "EEPROM")]
    Eeprom,
    #[value(name = "SNROM")]
    SnRom,
    #[value(name = "EUIROM")]
    EuiRom,
}

impl From<DeviceArg> for I2cDeviceKind {
    fn from(value: DeviceArg) -> Self {
        match value {
            DeviceArg::Eeprom => I2cDeviceKind::Eeprom,
            DeviceArg::SnRom => I2cDeviceKind::SnRom,
            DeviceArg::EuiRom => I2cDeviceKind::EuiRom,
        }
    }
}

/// Spells `AccessMode`'s three variants the way the original CLI did:
/// `BARE` (blocking), `QPC` (native event loop), `FRT` (secondary
/// cooperative scheduler).
#[derive(Copy, Clone, Debug, ValueEnum)]
enum AccessArg {
    #[value(name = "BARE")]
    Bare,
    #[value(name = "QPC")]
    Qpc,
    #[value(name = "FRT")]
    Frt,
}

impl From<AccessArg> for AccessMode {
    fn from(value: AccessArg) -> Self {
        match value {
            AccessArg::Bare => AccessMode::Blocking,
            AccessArg::Qpc => AccessMode::NativeEvent,
            AccessArg::Frt => AccessMode::SecondaryCooperativeEvent,
        }
    }
}

fn parse_byte_list(s: &str) -> anyhow::Result<Vec<u8>> {
    s.split(',')
        .map(str::trim)
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            let byte = match tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
                Some(hex) => u8::from_str_radix(hex, 16),
                None => tok.parse::<u8>(),
            };
            byte.with_context(|| format!("'{tok}' is not a valid byte"))
        })
        .collect()
}

fn parse_mask(s: &str) -> anyhow::Result<u32> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).context("invalid hex mask"),
        None => s.parse::<u32>().context("invalid mask"),
    }
}

/// Reports a non-success Done status, with the verb name and the
/// numeric error code, and exits 1.
fn fail_on_status(verb: &str, code: StatusCode) -> ! {
    eprintln!("{verb}: error {} ({:?})", code as i32, code);
    std::process::exit(1);
}

fn check_status(verb: &str, code: StatusCode) {
    if !code.is_ok() {
        fail_on_status(verb, code);
    }
}

fn connect(cli: &Cli) -> anyhow::Result<Box<dyn Driver>> {
    if let Some(path) = &cli.serial {
        let transport = SerialTransport::open(path, cli.baud)?;
        Ok(Box::new(HostClient::new(transport, Route::Serial, REQUEST_TIMEOUT)))
    } else {
        let ip = cli.ip.unwrap_or(Ipv4Addr::LOCALHOST);
        let remote = SocketAddr::new(ip.into(), cli.remote_port);
        let transport = UdpTransport::connect(cli.local_port, remote)?;
        Ok(Box::new(HostClient::new(transport, Route::UdpClient, REQUEST_TIMEOUT)))
    }
}

/// Object-safe wrapper so `main` doesn't need to monomorphize its
/// dispatch over both transport types.
trait Driver {
    fn call(
        &mut self,
        name: MessageName,
        discriminator: PayloadDiscriminator,
        payload: Payload,
    ) -> anyhow::Result<(PayloadDiscriminator, Payload)>;
}

impl<T: dc3_host::HostTransport> Driver for HostClient<T> {
    fn call(
        &mut self,
        name: MessageName,
        discriminator: PayloadDiscriminator,
        payload: Payload,
    ) -> anyhow::Result<(PayloadDiscriminator, Payload)> {
        Ok(HostClient::call(self, name, discriminator, payload, false)?)
    }
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let cli = Cli::parse();
    let mut driver = connect(&cli)?;

    match &cli.verb {
        Verb::GetMode => {
            let (_, payload) = driver.call(MessageName::GetBootMode, PayloadDiscriminator::None, Payload::None)?;
            let Payload::BootMode(p) = payload else { bail!("board returned the wrong payload for get_mode") };
            check_status("get_mode", p.error_code);
            println!("{:?}", p.mode);
        }
        Verb::SetMode { mode } => {
            let payload = Payload::BootMode(BootModePayload { error_code: StatusCode::Ok, mode: (*mode).into() });
            let (_, payload) = driver.call(MessageName::SetBootMode, PayloadDiscriminator::BootMode, payload)?;
            let Payload::BootMode(p) = payload else { bail!("board returned the wrong payload for set_mode") };
            check_status("set_mode", p.error_code);
        }
        Verb::Flash { image_type, file } => run_flash(driver.as_mut(), *image_type, file)?,
        Verb::RamTest => {
            let (_, payload) = driver.call(MessageName::RamTest, PayloadDiscriminator::None, Payload::None)?;
            let Payload::RamTest(p) = payload else { bail!("board returned the wrong payload for ram_test") };
            if p.error_code.is_ok() {
                println!("ram_test: passed");
            } else {
                eprintln!("ram_test: failed at stage {:?}, address 0x{:08x}", p.stage, p.address);
                std::process::exit(1);
            }
        }
        Verb::ReadI2c { dev, start, bytes, acc } => {
            let payload = Payload::I2cData(I2cDataPayload {
                device: (*dev).into(),
                access: (*acc).into(),
                start: *start,
                length: *bytes,
                body: Vec::new(),
            });
            let (discriminator, payload) = driver.call(MessageName::ReadI2c, PayloadDiscriminator::I2cData, payload)?;
            match (discriminator, payload) {
                (PayloadDiscriminator::I2cData, Payload::I2cData(p)) => println!("{}", format_bytes(&p.body)),
                (PayloadDiscriminator::Status, Payload::Status(p)) => fail_on_status("read_i2c", p.error_code),
                _ => bail!("board returned an unexpected payload for read_i2c"),
            }
        }
        Verb::WriteI2c { dev, start, data, acc } => {
            let body = parse_byte_list(data)?;
            let payload = Payload::I2cData(I2cDataPayload {
                device: (*dev).into(),
                access: (*acc).into(),
                start: *start,
                length: body.len() as u32,
                body,
            });
            let (discriminator, payload) = driver.call(MessageName::WriteI2c, PayloadDiscriminator::I2cData, payload)?;
            if discriminator == PayloadDiscriminator::Status {
                let Payload::Status(p) = payload else { unreachable!() };
                check_status("write_i2c", p.error_code);
            }
        }
        Verb::GetDbgModules => {
            let (_, payload) = driver.call(MessageName::GetDbgModules, PayloadDiscriminator::None, Payload::None)?;
            let Payload::Debug(p) = payload else { bail!("board returned the wrong payload for get_dbg_modules") };
            println!("modules=0x{:08x} devices=0x{:02x}", p.modules_mask, p.devices_mask);
        }
        Verb::SetDbgModules { mask } => {
            let modules_mask = parse_mask(mask)?;
            let payload = Payload::Debug(DebugPayload { modules_mask, devices_mask: 0 });
            let (discriminator, payload) = driver.call(MessageName::SetDbgModules, PayloadDiscriminator::Debug, payload)?;
            if let (PayloadDiscriminator::Status, Payload::Status(p)) = (discriminator, payload) {
                check_status("set_dbg_modules", p.error_code);
            }
        }
        Verb::SetDbgDevice { mask } => {
            let devices_mask = parse_mask(mask)? as u8;
            let payload = Payload::Debug(DebugPayload { modules_mask: 0, devices_mask });
            let (discriminator, payload) = driver.call(MessageName::SetDbgDevice, PayloadDiscriminator::Debug, payload)?;
            if let (PayloadDiscriminator::Status, Payload::Status(p)) = (discriminator, payload) {
                check_status("set_dbg_device", p.error_code);
            }
        }
        Verb::GetDbElem { elem, acc } => {
            let payload = Payload::Database(DatabasePayload { element_id: *elem, access: (*acc).into(), length: 0, body: Vec::new() });
            let (discriminator, payload) = driver.call(MessageName::GetDbElem, PayloadDiscriminator::Database, payload)?;
            match (discriminator, payload) {
                (PayloadDiscriminator::Database, Payload::Database(p)) => println!("{}", format_bytes(&p.body)),
                (PayloadDiscriminator::Status, Payload::Status(p)) => fail_on_status("get_db_elem", p.error_code),
                _ => bail!("board returned an unexpected payload for get_db_elem"),
            }
        }
        Verb::ResetDb => {
            let (_, payload) = driver.call(MessageName::ResetDb, PayloadDiscriminator::None, Payload::None)?;
            let Payload::Status(p) = payload else { bail!("board returned the wrong payload for reset_db") };
            check_status("reset_db", p.error_code);
        }
    }

    Ok(())
}

fn format_bytes(body: &[u8]) -> String {
    body.iter().map(|b| format!("0x{b:02x}")).collect::<Vec<_>>().join(",")
}

/// Chunks the image into `FLASH_CHUNK_SIZE`-byte packets, sends a
/// `FlashMetadata` request describing the whole image, then one
/// `FlashData` request per packet, in order -- matching
/// `dc3_capsules::flash`'s ingest state machine, which validates each
/// packet's `body_crc` and its strictly-increasing `sequence` before
/// programming it and only checks the whole-image CRC once the final
/// packet lands.
fn run_flash(driver: &mut dyn Driver, image_type: ImageTypeArg, file: &Path) -> anyhow::Result<()> {
    let image = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let packet_count = image.len().div_ceil(FLASH_CHUNK_SIZE) as u32;
    let image_crc = dc3_wire::codec::crc32(&image);

    let metadata = Payload::FlashMetadata(FlashMetadataPayload {
        error_code: StatusCode::Ok,
        image_type: image_type.into(),
        size: image.len() as u32,
        crc: image_crc,
        major: 0,
        minor: 0,
        // No flag for a build version/timestamp exists yet, so these
        // are recorded as all-zero until one is added.
        timestamp: *b"00000000000000",
        packet_count,
    });
    let (_, payload) = driver.call(MessageName::Flash, PayloadDiscriminator::FlashMetadata, metadata)?;
    let Payload::Status(p) = payload else { bail!("board returned the wrong payload for flash metadata") };
    check_status("flash", p.error_code);

    for (index, chunk) in image.chunks(FLASH_CHUNK_SIZE).enumerate() {
        let sequence = index as u32 + 1;
        log::info!("flash: packet {sequence}/{packet_count}");
        let data = Payload::FlashData(FlashDataPayload {
            sequence,
            length: chunk.len() as u32,
            body: chunk.to_vec(),
            body_crc: dc3_wire::codec::crc32(chunk),
        });
        let (_, payload) = driver.call(MessageName::Flash, PayloadDiscriminator::FlashData, data)?;
        let Payload::Status(p) = payload else { bail!("board returned the wrong payload for a flash data packet") };
        check_status("flash", p.error_code);
    }

    println!("flash: {} bytes written", image.len());
    Ok(())
}
