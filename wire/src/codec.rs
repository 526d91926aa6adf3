// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Length-delimited frame encoding.
//!
//! A frame is a little-endian `u32` byte count followed by the
//! envelope, followed by the payload record (absent when the
//! discriminator is `None`). Multi-byte integers inside a record use a
//! plain (non-zig-zag) LEB128 varint; see `DESIGN.md` for why plain varint was chosen.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use crc::{Crc, CRC_32_ISO_HDLC};
use std::io::{self, Cursor, Read, Write};

use crate::envelope::{BasicMsg, MessageName, MessageType, PayloadDiscriminator, Route};
use crate::error::{StatusCode, WireError};
use crate::payload::{
    AccessMode, BootMode, BootModePayload, DatabasePayload, DebugPayload, FlashDataPayload,
    FlashMetadataPayload, I2cDataPayload, I2cDeviceKind, ImageType, Payload, RamTestPayload,
    RamTestStage, StatusPayload, VersionPayload,
};

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Frames longer than this are rejected outright as "frame-too-long",
/// comfortably above one flash packet's payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024;

pub fn write_varint(w: &mut impl Write, mut value: u32) -> io::Result<()> {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        w.write_u8(byte)?;
        if value == 0 {
            break;
        }
    }
    Ok(())
}

pub fn read_varint(r: &mut impl Read) -> Result<u32, WireError> {
    let mut value: u32 = 0;
    for shift in (0..35).step_by(7) {
        let byte = r.read_u8().map_err(|_| WireError::FrameDecodingFailed)?;
        value |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(WireError::FrameDecodingFailed)
}

fn write_bytes_field(w: &mut impl Write, data: &[u8]) -> io::Result<()> {
    write_varint(w, data.len() as u32)?;
    w.write_all(data)
}

fn read_bytes_field(r: &mut impl Read) -> Result<Vec<u8>, WireError> {
    let len = read_varint(r)? as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLong);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|_| WireError::FrameDecodingFailed)?;
    Ok(buf)
}

fn write_timestamp(w: &mut impl Write, ts: &[u8; 14]) -> io::Result<()> {
    w.write_all(ts)
}

fn read_timestamp(r: &mut impl Read) -> Result<[u8; 14], WireError> {
    let mut ts = [0u8; 14];
    r.read_exact(&mut ts).map_err(|_| WireError::FrameDecodingFailed)?;
    Ok(ts)
}

fn status_to_wire(code: StatusCode) -> u32 {
    code as i32 as u32
}

fn status_from_wire(value: u32) -> StatusCode {
    // Any code this build doesn't recognize collapses to a decoding
    // failure rather than silently fabricating `Ok`.
    match value as i32 {
        x if x == StatusCode::Ok as i32 => StatusCode::Ok,
        x if x == StatusCode::FrameTooLong as i32 => StatusCode::FrameTooLong,
        x if x == StatusCode::FrameDecodingFailed as i32 => StatusCode::FrameDecodingFailed,
        x if x == StatusCode::TransportClosed as i32 => StatusCode::TransportClosed,
        x if x == StatusCode::UnknownMessage as i32 => StatusCode::UnknownMessage,
        x if x == StatusCode::DuplicateMessageId as i32 => StatusCode::DuplicateMessageId,
        x if x == StatusCode::Timeout as i32 => StatusCode::Timeout,
        x if x == StatusCode::ProgressWhenDisallowed as i32 => StatusCode::ProgressWhenDisallowed,
        x if x == StatusCode::BusBusy as i32 => StatusCode::BusBusy,
        x if x == StatusCode::StartTimeout as i32 => StatusCode::StartTimeout,
        x if x == StatusCode::AddressNack as i32 => StatusCode::AddressNack,
        x if x == StatusCode::DataTimeout as i32 => StatusCode::DataTimeout,
        x if x == StatusCode::DmaTimeout as i32 => StatusCode::DmaTimeout,
        x if x == StatusCode::Recovered as i32 => StatusCode::Recovered,
        x if x == StatusCode::OffsetOutOfRange as i32 => StatusCode::OffsetOutOfRange,
        x if x == StatusCode::DeviceReadOnly as i32 => StatusCode::DeviceReadOnly,
        x if x == StatusCode::InvalidDevice as i32 => StatusCode::InvalidDevice,
        x if x == StatusCode::PageDecomposeFailed as i32 => StatusCode::PageDecomposeFailed,
        x if x == StatusCode::EraseFailed as i32 => StatusCode::EraseFailed,
        x if x == StatusCode::ProgramFailed as i32 => StatusCode::ProgramFailed,
        x if x == StatusCode::ReadbackMismatch as i32 => StatusCode::ReadbackMismatch,
        x if x == StatusCode::ImageCrcMismatch as i32 => StatusCode::ImageCrcMismatch,
        x if x == StatusCode::PacketOutOfSequence as i32 => StatusCode::PacketOutOfSequence,
        x if x == StatusCode::MetadataInvalid as i32 => StatusCode::MetadataInvalid,
        x if x == StatusCode::ImageSizeInvalid as i32 => StatusCode::ImageSizeInvalid,
        x if x == StatusCode::PacketCrcMismatch as i32 => StatusCode::PacketCrcMismatch,
        x if x == StatusCode::MagicMismatch as i32 => StatusCode::MagicMismatch,
        x if x == StatusCode::VersionMismatch as i32 => StatusCode::VersionMismatch,
        x if x == StatusCode::ElementNotFound as i32 => StatusCode::ElementNotFound,
        x if x == StatusCode::ElementReadOnly as i32 => StatusCode::ElementReadOnly,
        x if x == StatusCode::BufferTooSmall as i32 => StatusCode::BufferTooSmall,
        x if x == StatusCode::DataBusFailed as i32 => StatusCode::DataBusFailed,
        x if x == StatusCode::AddressBusFailed as i32 => StatusCode::AddressBusFailed,
        x if x == StatusCode::DeviceIntegrityFailed as i32 => StatusCode::DeviceIntegrityFailed,
        _ => StatusCode::FrameDecodingFailed,
    }
}

pub fn encode_envelope(w: &mut impl Write, msg: &BasicMsg) -> io::Result<()> {
    w.write_u16::<LE>(msg.name.to_wire())?;
    w.write_u16::<LE>(msg.discriminator.to_wire())?;
    write_varint(w, msg.message_id)?;
    w.write_u8(msg.message_type.to_wire())?;
    w.write_u8(u8::from(msg.progress_requested))?;
    w.write_u8(msg.route.to_wire())?;
    Ok(())
}

pub fn decode_envelope(r: &mut impl Read) -> Result<BasicMsg, WireError> {
    let name = MessageName::from_wire(r.read_u16::<LE>().map_err(|_| WireError::FrameDecodingFailed)?)?;
    let discriminator = PayloadDiscriminator::from_wire(
        r.read_u16::<LE>().map_err(|_| WireError::FrameDecodingFailed)?,
    )?;
    let message_id = read_varint(r)?;
    let message_type = MessageType::from_wire(r.read_u8().map_err(|_| WireError::FrameDecodingFailed)?)?;
    let progress_requested = r.read_u8().map_err(|_| WireError::FrameDecodingFailed)? != 0;
    let route = Route::from_wire(r.read_u8().map_err(|_| WireError::FrameDecodingFailed)?)?;
    Ok(BasicMsg {
        name,
        discriminator,
        message_id,
        message_type,
        progress_requested,
        route,
    })
}

pub fn encode_payload(w: &mut impl Write, payload: &Payload) -> io::Result<()> {
    match payload {
        Payload::None => Ok(()),
        Payload::Status(p) => w.write_u32::<LE>(status_to_wire(p.error_code)),
        Payload::Version(p) => {
            w.write_u8(p.major)?;
            w.write_u8(p.minor)?;
            write_timestamp(w, &p.timestamp)
        }
        Payload::BootMode(p) => {
            w.write_u32::<LE>(status_to_wire(p.error_code))?;
            w.write_u8(boot_mode_to_wire(p.mode))
        }
        Payload::FlashMetadata(p) => {
            w.write_u32::<LE>(status_to_wire(p.error_code))?;
            w.write_u8(image_type_to_wire(p.image_type))?;
            write_varint(w, p.size)?;
            w.write_u32::<LE>(p.crc)?;
            w.write_u8(p.major)?;
            w.write_u8(p.minor)?;
            write_timestamp(w, &p.timestamp)?;
            write_varint(w, p.packet_count)
        }
        Payload::FlashData(p) => {
            write_varint(w, p.sequence)?;
            write_varint(w, p.length)?;
            write_bytes_field(w, &p.body)?;
            w.write_u32::<LE>(p.body_crc)
        }
        Payload::I2cData(p) => {
            w.write_u8(device_kind_to_wire(p.device))?;
            w.write_u8(access_mode_to_wire(p.access))?;
            write_varint(w, p.start)?;
            write_varint(w, p.length)?;
            write_bytes_field(w, &p.body)
        }
        Payload::Database(p) => {
            w.write_u16::<LE>(p.element_id)?;
            w.write_u8(access_mode_to_wire(p.access))?;
            write_varint(w, p.length)?;
            write_bytes_field(w, &p.body)
        }
        Payload::Debug(p) => {
            w.write_u32::<LE>(p.modules_mask)?;
            w.write_u8(p.devices_mask)
        }
        Payload::RamTest(p) => {
            w.write_u32::<LE>(status_to_wire(p.error_code))?;
            w.write_u8(ram_test_stage_to_wire(p.stage))?;
            w.write_u32::<LE>(p.address)
        }
    }
}

pub fn decode_payload(r: &mut impl Read, discriminator: PayloadDiscriminator) -> Result<Payload, WireError> {
    let err = |_| WireError::FrameDecodingFailed;
    Ok(match discriminator {
        PayloadDiscriminator::None => Payload::None,
        PayloadDiscriminator::Status => Payload::Status(StatusPayload {
            error_code: status_from_wire(r.read_u32::<LE>().map_err(err)?),
        }),
        PayloadDiscriminator::Version => Payload::Version(VersionPayload {
            major: r.read_u8().map_err(err)?,
            minor: r.read_u8().map_err(err)?,
            timestamp: read_timestamp(r)?,
        }),
        PayloadDiscriminator::BootMode => Payload::BootMode(BootModePayload {
            error_code: status_from_wire(r.read_u32::<LE>().map_err(err)?),
            mode: boot_mode_from_wire(r.read_u8().map_err(err)?)?,
        }),
        PayloadDiscriminator::FlashMetadata => Payload::FlashMetadata(FlashMetadataPayload {
            error_code: status_from_wire(r.read_u32::<LE>().map_err(err)?),
            image_type: image_type_from_wire(r.read_u8().map_err(err)?)?,
            size: read_varint(r)?,
            crc: r.read_u32::<LE>().map_err(err)?,
            major: r.read_u8().map_err(err)?,
            minor: r.read_u8().map_err(err)?,
            timestamp: read_timestamp(r)?,
            packet_count: read_varint(r)?,
        }),
        PayloadDiscriminator::FlashData => {
            let sequence = read_varint(r)?;
            let length = read_varint(r)?;
            let body = read_bytes_field(r)?;
            let body_crc = r.read_u32::<LE>().map_err(err)?;
            Payload::FlashData(FlashDataPayload {
                sequence,
                length,
                body,
                body_crc,
            })
        }
        PayloadDiscriminator::I2cData => {
            let device = device_kind_from_wire(r.read_u8().map_err(err)?)?;
            let access = access_mode_from_wire(r.read_u8().map_err(err)?)?;
            let start = read_varint(r)?;
            let length = read_varint(r)?;
            let body = read_bytes_field(r)?;
            Payload::I2cData(I2cDataPayload {
                device,
                access,
                start,
                length,
                body,
            })
        }
        PayloadDiscriminator::Database => {
            let element_id = r.read_u16::<LE>().map_err(err)?;
            let access = access_mode_from_wire(r.read_u8().map_err(err)?)?;
            let length = read_varint(r)?;
            let body = read_bytes_field(r)?;
            Payload::Database(DatabasePayload {
                element_id,
                access,
                length,
                body,
            })
        }
        PayloadDiscriminator::Debug => Payload::Debug(DebugPayload {
            modules_mask: r.read_u32::<LE>().map_err(err)?,
            devices_mask: r.read_u8().map_err(err)?,
        }),
        PayloadDiscriminator::RamTest => Payload::RamTest(RamTestPayload {
            error_code: status_from_wire(r.read_u32::<LE>().map_err(err)?),
            stage: ram_test_stage_from_wire(r.read_u8().map_err(err)?)?,
            address: r.read_u32::<LE>().map_err(err)?,
        }),
    })
}

fn ram_test_stage_to_wire(s: RamTestStage) -> u8 {
    match s {
        RamTestStage::None => 0,
        RamTestStage::DataBus => 1,
        RamTestStage::AddressBus => 2,
        RamTestStage::DeviceIntegrity => 3,
    }
}

fn ram_test_stage_from_wire(v: u8) -> Result<RamTestStage, WireError> {
    match v {
        0 => Ok(RamTestStage::None),
        1 => Ok(RamTestStage::DataBus),
        2 => Ok(RamTestStage::AddressBus),
        3 => Ok(RamTestStage::DeviceIntegrity),
        _ => Err(WireError::FrameDecodingFailed),
    }
}

fn boot_mode_to_wire(m: BootMode) -> u8 {
    match m {
        BootMode::None => 0,
        BootMode::SystemRom => 1,
        BootMode::Bootloader => 2,
        BootMode::Application => 3,
    }
}

fn boot_mode_from_wire(v: u8) -> Result<BootMode, WireError> {
    match v {
        0 => Ok(BootMode::None),
        1 => Ok(BootMode::SystemRom),
        2 => Ok(BootMode::Bootloader),
        3 => Ok(BootMode::Application),
        _ => Err(WireError::FrameDecodingFailed),
    }
}

fn image_type_to_wire(t: ImageType) -> u8 {
    match t {
        ImageType::Bootloader => 0,
        ImageType::Application => 1,
    }
}

fn image_type_from_wire(v: u8) -> Result<ImageType, WireError> {
    match v {
        0 => Ok(ImageType::Bootloader),
        1 => Ok(ImageType::Application),
        _ => Err(WireError::FrameDecodingFailed),
    }
}

fn device_kind_to_wire(k: I2cDeviceKind) -> u8 {
    match k {
        I2cDeviceKind::Eeprom => 0,
        I2cDeviceKind::SnRom => 1,
        I2cDeviceKind::EuiRom => 2,
    }
}

fn device_kind_from_wire(v: u8) -> Result<I2cDeviceKind, WireError> {
    match v {
        0 => Ok(I2cDeviceKind::Eeprom),
        1 => Ok(I2cDeviceKind::SnRom),
        2 => Ok(I2cDeviceKind::EuiRom),
        _ => Err(WireError::FrameDecodingFailed),
    }
}

fn access_mode_to_wire(a: AccessMode) -> u8 {
    match a {
        AccessMode::Blocking => 0,
        AccessMode::NativeEvent => 1,
        AccessMode::SecondaryCooperativeEvent => 2,
    }
}

fn access_mode_from_wire(v: u8) -> Result<AccessMode, WireError> {
    match v {
        0 => Ok(AccessMode::Blocking),
        1 => Ok(AccessMode::NativeEvent),
        2 => Ok(AccessMode::SecondaryCooperativeEvent),
        _ => Err(WireError::FrameDecodingFailed),
    }
}

/// Encodes a full frame: `u32` LE length prefix, envelope, payload.
pub fn encode_frame(msg: &BasicMsg, payload: &Payload) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    encode_envelope(&mut body, msg)?;
    encode_payload(&mut body, payload)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too long"));
    }
    let mut framed = Vec::with_capacity(body.len() + 4);
    framed.write_u32::<LE>(body.len() as u32)?;
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Decodes one frame (length prefix already stripped by the caller's
/// transport framing) into its envelope and payload.
pub fn decode_frame(bytes: &[u8]) -> Result<(BasicMsg, Payload), WireError> {
    let mut cur = Cursor::new(bytes);
    let msg = decode_envelope(&mut cur)?;
    let payload = decode_payload(&mut cur, msg.discriminator)?;
    Ok((msg, payload))
}

/// Reads the `u32` LE length prefix and the frame body that follows it
/// from a byte stream that may contain more than one frame.
pub fn read_length_delimited(r: &mut impl Read) -> Result<Vec<u8>, WireError> {
    let len = r
        .read_u32::<LE>()
        .map_err(|_| WireError::FrameDecodingFailed)? as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLong);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|_| WireError::FrameDecodingFailed)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{BasicMsg, MessageName, PayloadDiscriminator, Route};

    #[test]
    fn varint_round_trips_small_and_large_values() {
        for v in [0u32, 1, 127, 128, 300, 16384, u32::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, v).unwrap();
            let mut cur = Cursor::new(buf);
            assert_eq!(read_varint(&mut cur).unwrap(), v);
        }
    }

    #[test]
    fn frame_round_trips_with_a_status_payload() {
        let msg = BasicMsg::request(MessageName::GetBootMode, PayloadDiscriminator::None, 42, Route::UdpClient)
            .ack();
        let framed = encode_frame(&msg, &Payload::None).unwrap();
        let len = u32::from_le_bytes(framed[0..4].try_into().unwrap()) as usize;
        let (decoded, payload) = decode_frame(&framed[4..4 + len]).unwrap();
        assert_eq!(decoded.message_id, 42);
        assert_eq!(payload, Payload::None);
    }

    #[test]
    fn frame_round_trips_with_i2c_data_body() {
        let msg = BasicMsg::request(MessageName::ReadI2c, PayloadDiscriminator::I2cData, 7, Route::Serial).done(
            PayloadDiscriminator::I2cData,
        );
        let payload = Payload::I2cData(I2cDataPayload {
            device: I2cDeviceKind::Eeprom,
            access: AccessMode::NativeEvent,
            start: 0,
            length: 4,
            body: vec![0xDE, 0xAD, 0xBE, 0xEF],
        });
        let framed = encode_frame(&msg, &payload).unwrap();
        let len = u32::from_le_bytes(framed[0..4].try_into().unwrap()) as usize;
        let (_decoded, decoded_payload) = decode_frame(&framed[4..4 + len]).unwrap();
        assert_eq!(decoded_payload, payload);
    }

    #[test]
    fn ram_test_payload_round_trips_a_failing_result() {
        let msg = BasicMsg::request(MessageName::RamTest, PayloadDiscriminator::None, 9, Route::UdpClient)
            .done(PayloadDiscriminator::RamTest);
        let payload = Payload::RamTest(RamTestPayload {
            error_code: StatusCode::AddressBusFailed,
            stage: RamTestStage::AddressBus,
            address: 0x2000_0010,
        });
        let framed = encode_frame(&msg, &payload).unwrap();
        let len = u32::from_le_bytes(framed[0..4].try_into().unwrap()) as usize;
        let (_decoded, decoded_payload) = decode_frame(&framed[4..4 + len]).unwrap();
        assert_eq!(decoded_payload, payload);
    }

    #[test]
    fn crc32_is_deterministic() {
        assert_eq!(crc32(b"hello"), crc32(b"hello"));
        assert_ne!(crc32(b"hello"), crc32(b"hellp"));
    }
}
