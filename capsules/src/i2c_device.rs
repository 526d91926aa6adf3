// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The I²C device engine: translates a semantic
//! read/write-device-memory request into one or more bus operations on
//! [`crate::i2c_bus`], enforcing range checks, read-only devices, and
//! page-boundary write decomposition.
//!
//! Of the three access modes a device can support, this type only
//! implements the asynchronous two (native event, posted here as
//! `READ_REQUEST`/`WRITE_REQUEST`/`COMPLETE`; secondary cooperative
//! event is the same request shape, just consumed from a different
//! task's queue by the board). Blocking mode has no dispatcher to post
//! through by definition ("callable only before the kernel is
//! running"), so it is driven directly against `I2cBusEngine` by the
//! board's startup code rather than through this engine.

use std::cell::RefCell;
use std::collections::VecDeque;

use dc3_kernel::{ActiveObject, Effect, Event, Payload, Priority};
use dc3_wire::StatusCode;

use crate::i2c_bus::{BusCompletion, BusRequest};
use crate::signals::i2c_bus as bus_signals;
use crate::signals::i2c_device as signals;

/// Minimum settling delay between consecutive page writes --
/// a small timed event, default >= 5 ms -- expressed in ticks
/// at the kernel's minimum tick rate (`dc3_kernel::config::MIN_TICK_RATE_HZ`).
pub const PAGE_SETTLE_TICKS: u32 = 1;

/// An immutable device record.
/// The `cursor` field it also specifies (to skip redundant internal
/// address writes) is not modeled here: our bus engine always sends
/// the full internal address on every transfer, since the simulated
/// controller has no cost difference for doing so.
#[derive(Debug, Clone, Copy)]
pub struct DeviceDescriptor {
    pub bus_address: u16,
    pub internal_address_width: u8,
    pub min_address: u32,
    pub max_address: u32,
    pub page_size: u32,
    pub read_only: bool,
}

#[derive(Debug)]
pub enum DeviceRequest {
    Read {
        offset: u32,
        count: u32,
        caller: &'static str,
    },
    Write {
        offset: u32,
        data: Vec<u8>,
        caller: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct DeviceCompletion {
    pub data: Option<Vec<u8>>,
    pub status: StatusCode,
}

/// One page-sized (or smaller) write chunk queued by `plan_writes`.
struct WriteChunk {
    offset: u32,
    data: Vec<u8>,
}

/// Splits `data` (starting at absolute offset `offset`) on `page_size`
/// boundaries: a first partial page, zero or more full pages, and a
/// final partial page.
fn plan_writes(offset: u32, data: &[u8], page_size: u32) -> Vec<WriteChunk> {
    if data.is_empty() || page_size == 0 {
        return vec![WriteChunk {
            offset,
            data: data.to_vec(),
        }];
    }
    let mut chunks = Vec::new();
    let mut pos = 0usize;
    let mut cursor = offset;
    while pos < data.len() {
        let page_start = (cursor / page_size) * page_size;
        let room_in_page = (page_start + page_size - cursor) as usize;
        let take = room_in_page.min(data.len() - pos);
        chunks.push(WriteChunk {
            offset: cursor,
            data: data[pos..pos + take].to_vec(),
        });
        pos += take;
        cursor += take as u32;
    }
    chunks
}

enum Outstanding {
    Read { caller: &'static str },
    WriteSequence {
        caller: &'static str,
        remaining: VecDeque<WriteChunk>,
    },
}

pub struct I2cDeviceEngine {
    name: &'static str,
    priority: Priority,
    bus_target: &'static str,
    descriptor: DeviceDescriptor,
    outstanding: RefCell<Option<Outstanding>>,
}

impl I2cDeviceEngine {
    pub fn new(
        name: &'static str,
        priority: Priority,
        bus_target: &'static str,
        descriptor: DeviceDescriptor,
    ) -> Self {
        Self {
            name,
            priority,
            bus_target,
            descriptor,
            outstanding: RefCell::new(None),
        }
    }

    fn range_ok(&self, offset: u32, count: u32) -> bool {
        let Some(end) = offset.checked_add(count) else {
            return false;
        };
        offset >= self.descriptor.min_address && end <= self.descriptor.max_address
    }

    fn post_bus_request(&self, request: BusRequest) -> Effect {
        Effect::Post {
            target: self.bus_target,
            signal: bus_signals::REQUEST,
            payload: Payload::custom((self.name, request)),
        }
    }

    fn read_request(&self, offset: u32, count: u32) -> BusRequest {
        BusRequest::ReadMemory {
            address: self.descriptor.bus_address,
            internal_address: offset,
            internal_address_width: self.descriptor.internal_address_width,
            len: count as usize,
        }
    }

    fn complete_effect(&self, caller: &'static str, data: Option<Vec<u8>>, status: StatusCode) -> Effect {
        Effect::Post {
            target: caller,
            signal: signals::COMPLETE,
            payload: Payload::custom(DeviceCompletion { data, status }),
        }
    }

    /// Begin (or continue) the next queued page write, returning the
    /// effect that issues it to the bus engine.
    fn advance_write_sequence(&self, remaining: &mut VecDeque<WriteChunk>) -> Option<Effect> {
        let chunk = remaining.pop_front()?;
        Some(self.post_bus_request(BusRequest::WriteMemory {
            address: self.descriptor.bus_address,
            internal_address: chunk.offset,
            internal_address_width: self.descriptor.internal_address_width,
            data: chunk.data,
        }))
    }
}

impl ActiveObject for I2cDeviceEngine {
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
                let Some(request) = event.payload.downcast_ref::<DeviceRequest>() else {
                    return vec![];
                };
                let DeviceRequest::Read { offset, count, caller } = request else {
                    return vec![];
                };
                let caller = *caller;
                if !self.range_ok(*offset, *count) {
                    return vec![self.complete_effect(caller, None, StatusCode::OffsetOutOfRange)];
                }
                *self.outstanding.borrow_mut() = Some(Outstanding::Read { caller });
                vec![self.post_bus_request(self.read_request(*offset, *count))]
            }
            signals::WRITE_REQUEST => {
                if self.outstanding.borrow().is_some() {
                    return vec![Effect::Defer];
                }
                let Some(request) = event.payload.downcast_ref::<DeviceRequest>() else {
                    return vec![];
                };
                let DeviceRequest::Write { offset, data, caller } = request else {
                    return vec![];
                };
                let caller = *caller;
                if self.descriptor.read_only {
                    return vec![self.complete_effect(caller, None, StatusCode::DeviceReadOnly)];
                }
                if !self.range_ok(*offset, data.len() as u32) {
                    return vec![self.complete_effect(caller, None, StatusCode::OffsetOutOfRange)];
                }
                let mut chunks: VecDeque<WriteChunk> =
                    plan_writes(*offset, data, self.descriptor.page_size).into();
                let Some(first) = self.advance_write_sequence(&mut chunks) else {
                    return vec![self.complete_effect(caller, None, StatusCode::PageDecomposeFailed)];
                };
                *self.outstanding.borrow_mut() = Some(Outstanding::WriteSequence {
                    caller,
                    remaining: chunks,
                });
                vec![first]
            }
            bus_signals::COMPLETE => {
                let Some(completion) = event.payload.downcast_ref::<BusCompletion>() else {
                    return vec![];
                };
                let Some(outstanding) = self.outstanding.borrow_mut().take() else {
                    return vec![];
                };
                match outstanding {
                    Outstanding::Read { caller } => {
                        vec![self.complete_effect(caller, completion.data.clone(), completion.status)]
                    }
                    Outstanding::WriteSequence { caller, remaining } => {
                        if !completion.status.is_ok() {
                            return vec![self.complete_effect(caller, None, completion.status)];
                        }
                        if remaining.is_empty() {
                            return vec![self.complete_effect(caller, None, StatusCode::Ok)];
                        }
                        *self.outstanding.borrow_mut() =
                            Some(Outstanding::WriteSequence { caller, remaining });
                        vec![Effect::ArmTimer {
                            ticks: PAGE_SETTLE_TICKS,
                            periodic: false,
                            signal: signals::SETTLE_TIMER,
                        }]
                    }
                }
            }
            signals::SETTLE_TIMER => {
                let Some(Outstanding::WriteSequence { mut remaining, caller }) =
                    self.outstanding.borrow_mut().take()
                else {
                    return vec![];
                };
                match self.advance_write_sequence(&mut remaining) {
                    Some(effect) => {
                        *self.outstanding.borrow_mut() =
                            Some(Outstanding::WriteSequence { caller, remaining });
                        vec![effect]
                    }
                    None => vec![self.complete_effect(caller, None, StatusCode::Ok)],
                }
            }
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_page_write_is_not_split() {
        let chunks = plan_writes(0, &[1, 2, 3, 4], 16);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn write_crossing_a_page_boundary_splits_into_three_chunks() {
        let data = vec![0u8; 24];
        let chunks = plan_writes(12, &data, 16);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].offset, 12);
        assert_eq!(chunks[0].data.len(), 4);
        assert_eq!(chunks[1].offset, 16);
        assert_eq!(chunks[1].data.len(), 16);
        assert_eq!(chunks[2].offset, 32);
        assert_eq!(chunks[2].data.len(), 4);
    }

    #[test]
    fn write_exactly_filling_a_page_is_one_chunk() {
        let data = vec![0u8; 16];
        let chunks = plan_writes(0, &data, 16);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data.len(), 16);
    }

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            bus_address: 0x50,
            internal_address_width: 2,
            min_address: 0,
            max_address: 256,
            page_size: 16,
            read_only: false,
        }
    }

    #[test]
    fn range_check_rejects_offset_past_max_address() {
        let engine = I2cDeviceEngine::new("dev", Priority::new(5), "bus", descriptor());
        assert!(!engine.range_ok(250, 10));
        assert!(engine.range_ok(240, 16));
    }
}
