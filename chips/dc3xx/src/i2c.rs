// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! An in-memory stand-in for the STM32F4's I2C1 peripheral plus
//! whatever EEPROM/SN-ROM/UI-ROM devices are wired to it.
//!
//! A real bus controller only ever shifts bytes across the wire; it
//! has no notion of "internal address" or device memory. But there is
//! no separate simulated-peripheral-over-socket process standing in
//! for the I2C *slave* role here, so [`SimulatedI2cBus`] plays both parts:
//! it decodes the leading `address_width` bytes of every write as an
//! offset into the addressed device's own backing store (mirroring
//! what a real EEPROM's internal sequencer does), so the engine above
//! it (`capsules::i2c_bus`) never has to know it isn't talking to
//! silicon.

use std::cell::RefCell;
use std::collections::HashMap;

use dc3_kernel::hil::{I2cBus, I2cBusClient, I2cError};

struct Device {
    address_width: u8,
    memory: RefCell<Vec<u8>>,
}

/// Queue a canned failure or a "hang" (no completion until released) for
/// the next transfer, for exercising the engine's retry/timeout/bus-reset
/// paths without real hardware.
#[derive(Default)]
struct FaultInjection {
    next_result: Option<Result<(), I2cError>>,
    hang: bool,
}

pub struct SimulatedI2cBus {
    devices: RefCell<HashMap<u16, Device>>,
    client: RefCell<Option<&'static dyn I2cBusClient>>,
    fault: RefCell<FaultInjection>,
    recoveries: RefCell<u32>,
}

impl SimulatedI2cBus {
    pub fn new() -> Self {
        Self {
            devices: RefCell::new(HashMap::new()),
            client: RefCell::new(None),
            fault: RefCell::new(FaultInjection::default()),
            recoveries: RefCell::new(0),
        }
    }

    /// Attaches a simulated device at `address` with `size` bytes of
    /// backing store, initialized to `initial` (zero-padded or
    /// truncated to `size`). `address_width` is how many leading bytes
    /// of a write this device's sequencer consumes as the memory
    /// offset (1 for SN-ROM/UI-ROM-style parts, 2 for larger EEPROMs).
    pub fn attach_device(&self, address: u16, address_width: u8, size: usize, initial: &[u8]) {
        let mut memory = vec![0xFFu8; size];
        let n = initial.len().min(size);
        memory[..n].copy_from_slice(&initial[..n]);
        self.devices.borrow_mut().insert(
            address,
            Device {
                address_width,
                memory: RefCell::new(memory),
            },
        );
    }

    /// Reads back a device's current backing store, for test assertions.
    pub fn device_memory(&self, address: u16) -> Option<Vec<u8>> {
        self.devices
            .borrow()
            .get(&address)
            .map(|d| d.memory.borrow().clone())
    }

    pub fn fail_next(&self, err: I2cError) {
        self.fault.borrow_mut().next_result = Some(Err(err));
    }

    /// The next `transfer` call accepts the request but never completes
    /// it until [`Self::release_hang`] is called, simulating a wedged bus.
    pub fn hang_next(&self) {
        self.fault.borrow_mut().hang = true;
    }

    fn offset(width: u8, buffer: &[u8]) -> usize {
        buffer
            .iter()
            .take(width as usize)
            .fold(0usize, |acc, &b| (acc << 8) | b as usize)
    }
}

impl Default for SimulatedI2cBus {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cBus for SimulatedI2cBus {
    fn transfer(
        &self,
        address: u16,
        _ten_bit: bool,
        mut buffer: Box<[u8]>,
        write_len: usize,
        read_len: usize,
    ) -> Result<(), I2cError> {
        let mut fault = self.fault.borrow_mut();
        if let Some(result) = fault.next_result.take() {
            if let Some(client) = *self.client.borrow() {
                client.command_complete(buffer, result);
            }
            return Ok(());
        }
        if fault.hang {
            return Ok(());
        }
        drop(fault);

        let devices = self.devices.borrow();
        let Some(device) = devices.get(&address) else {
            if let Some(client) = *self.client.borrow() {
                client.command_complete(buffer, Err(I2cError::AddressNack));
            }
            return Ok(());
        };

        let width = device.address_width as usize;
        if write_len < width {
            if let Some(client) = *self.client.borrow() {
                client.command_complete(buffer, Err(I2cError::DataNack));
            }
            return Ok(());
        }
        let offset = Self::offset(device.address_width, &buffer);
        let mut memory = device.memory.borrow_mut();

        let result = if read_len > 0 {
            if offset + read_len > memory.len() {
                Err(I2cError::DataNack)
            } else {
                buffer[write_len..write_len + read_len]
                    .copy_from_slice(&memory[offset..offset + read_len]);
                Ok(())
            }
        } else {
            let payload = &buffer[width..write_len];
            if offset + payload.len() > memory.len() {
                Err(I2cError::DataNack)
            } else {
                memory[offset..offset + payload.len()].copy_from_slice(payload);
                Ok(())
            }
        };
        drop(memory);
        drop(devices);

        if let Some(client) = *self.client.borrow() {
            client.command_complete(buffer, result);
        }
        Ok(())
    }

    fn set_client(&self, client: &'static dyn I2cBusClient) {
        *self.client.borrow_mut() = Some(client);
    }

    fn recover_bus(&self) {
        *self.recoveries.borrow_mut() += 1;
        self.fault.borrow_mut().hang = false;
    }
}

/// Releases a bus previously wedged with [`SimulatedI2cBus::hang_next`],
/// completing the stalled transfer as if it had just finished.
impl SimulatedI2cBus {
    pub fn release_hang(&self, buffer: Box<[u8]>, result: Result<(), I2cError>) {
        self.fault.borrow_mut().hang = false;
        if let Some(client) = *self.client.borrow() {
            client.command_complete(buffer, result);
        }
    }

    pub fn recovery_count(&self) -> u32 {
        *self.recoveries.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingClient {
        last: RefCell<Option<(Vec<u8>, Result<(), I2cError>)>>,
    }

    impl I2cBusClient for RecordingClient {
        fn command_complete(&self, buffer: Box<[u8]>, result: Result<(), I2cError>) {
            *self.last.borrow_mut() = Some((buffer.to_vec(), result));
        }
    }

    fn leak_client() -> &'static RecordingClient {
        Box::leak(Box::new(RecordingClient {
            last: RefCell::new(None),
        }))
    }

    #[test]
    fn write_then_read_round_trips() {
        let bus = SimulatedI2cBus::new();
        bus.attach_device(0x50, 1, 256, &[]);
        let client = leak_client();
        bus.set_client(client);

        let write = vec![0x10u8, 0xAB, 0xCD].into_boxed_slice();
        bus.transfer(0x50, false, write, 3, 0).unwrap();
        assert!(client.last.borrow().as_ref().unwrap().1.is_ok());

        let mut read = vec![0u8; 3];
        read[0] = 0x10;
        bus.transfer(0x50, false, read.into_boxed_slice(), 1, 2)
            .unwrap();
        let (buf, result) = client.last.borrow().take().unwrap();
        assert!(result.is_ok());
        assert_eq!(&buf[1..3], &[0xAB, 0xCD]);
    }

    #[test]
    fn unattached_address_nacks() {
        let bus = SimulatedI2cBus::new();
        let client = leak_client();
        bus.set_client(client);
        bus.transfer(0x77, false, vec![0u8].into_boxed_slice(), 1, 0)
            .unwrap();
        assert_eq!(
            client.last.borrow().as_ref().unwrap().1,
            Err(I2cError::AddressNack)
        );
    }

    #[test]
    fn injected_fault_is_reported_once() {
        let bus = SimulatedI2cBus::new();
        bus.attach_device(0x50, 1, 16, &[]);
        let client = leak_client();
        bus.set_client(client);
        bus.fail_next(I2cError::ArbitrationLost);

        bus.transfer(0x50, false, vec![0u8].into_boxed_slice(), 1, 0)
            .unwrap();
        assert_eq!(
            client.last.borrow().as_ref().unwrap().1,
            Err(I2cError::ArbitrationLost)
        );

        client.last.borrow_mut().take();
        bus.transfer(0x50, false, vec![0u8].into_boxed_slice(), 1, 0)
            .unwrap();
        assert!(client.last.borrow().as_ref().unwrap().1.is_ok());
    }

    #[test]
    fn recover_bus_clears_a_hang() {
        let bus = SimulatedI2cBus::new();
        bus.attach_device(0x50, 1, 16, &[]);
        let client = leak_client();
        bus.set_client(client);
        bus.hang_next();

        bus.transfer(0x50, false, vec![0u8].into_boxed_slice(), 1, 0)
            .unwrap();
        assert!(client.last.borrow().is_none());

        bus.recover_bus();
        assert_eq!(bus.recovery_count(), 1);
        bus.transfer(0x50, false, vec![0u8].into_boxed_slice(), 1, 0)
            .unwrap();
        assert!(client.last.borrow().is_some());
    }

    #[test]
    fn device_memory_reflects_writes() {
        let bus = SimulatedI2cBus::new();
        bus.attach_device(0x50, 1, 8, &[]);
        let client = leak_client();
        bus.set_client(client);
        bus.transfer(
            0x50,
            false,
            vec![0x02u8, 0x99].into_boxed_slice(),
            2,
            0,
        )
        .unwrap();
        let mem = bus.device_memory(0x50).unwrap();
        assert_eq!(mem[2], 0x99);
    }
}
