// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The debug/trace bus: two bitmasks gate every
//! trace emission, one per source module and one per output device.
//! Fast emission posts a line to the serial endpoint's raw-line queue;
//! slow (synchronous, pre-kernel-start) emission is exposed as a plain
//! function board startup code can call directly, the same
//! before-the-dispatcher-exists exception already taken for the
//! blocking I²C access mode and the RAM self-test.
//!
//! Grounded on `Firmware/Common/sys/dbg_cntrl.c`/`.h`: `glbDbgModuleConfig`
//! (one bit per module) and `glbDbgDeviceConfig` (one bit per output
//! device) there become [`module_mask`]/[`device_mask`] here, and the
//! `XXX_printf`/`xxx_slow_printf` macro pair becomes [`DebugBus::emit`]/
//! [`format_line`].

use std::cell::Cell;

use dc3_kernel::{ActiveObject, Effect, Event, Payload, Priority};

use crate::signals::debug as signals;

/// Source module bits, in `DBG_setDefaults`'s enable order
/// (original_source `dbg_cntrl.c`). Limited to 32 bits, same as the
/// original's `uint32_t glbDbgModuleConfig`.
pub mod module {
    pub const GEN: u32 = 1 << 0;
    pub const SER: u32 = 1 << 1;
    pub const TIME: u32 = 1 << 2;
    pub const ETH: u32 = 1 << 3;
    pub const I2C: u32 = 1 << 4;
    pub const I2C_DEV: u32 = 1 << 5;
    pub const NOR: u32 = 1 << 6;
    pub const SDRAM: u32 = 1 << 7;
    pub const COMM: u32 = 1 << 8;
    pub const CPLR: u32 = 1 << 9;
    pub const FLASH: u32 = 1 << 10;
    pub const SYS: u32 = 1 << 11;
    pub const DB: u32 = 1 << 12;
    pub const DBG: u32 = 1 << 13;
}

/// Output device bits (original_source `dbg_cntrl.h`'s
/// `_DC3_DBG_DEV_SER`/`_DC3_DBG_DEV_ETH`). Only the serial device has
/// a sink in this workspace: there is no second, debug-only UDP
/// socket alongside [`crate::i2c_bus`]'s sibling transport, the
/// command/response `transports::udp::UdpEndpoint`. The Ethernet bit
/// is still tracked and toggleable, it just has nowhere to go.
pub mod device {
    pub const SERIAL: u8 = 1 << 0;
    pub const ETHERNET: u8 = 1 << 1;
}

/// `DBG_MODULES_DEF`/`DBG_DEVICES_DEF`'s debug-build defaults
/// (original_source `dbg_cntrl.h`).
pub const DEFAULT_MODULE_MASK: u32 = module::GEN
    | module::I2C_DEV
    | module::FLASH
    | module::SYS
    | module::DB
    | module::ETH
    | module::NOR
    | module::SDRAM
    | module::COMM;
pub const DEFAULT_DEVICE_MASK: u8 = device::SERIAL | device::ETHERNET;

/// `DC3DbgLevel_t` (original_source `DC3DbgLevels.h`), in its original
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Dbg,
    Log,
    Wrn,
    Err,
    /// Plain console output: no prefix, no timestamp, always printed.
    Con,
    /// Same gating as `Dbg`, but `format_line` keeps the line short.
    Isr,
}

impl Level {
    fn prefix(self) -> &'static str {
        match self {
            Level::Dbg => "DBG",
            Level::Log => "LOG",
            Level::Wrn => "WRN",
            Level::Err => "ERR",
            Level::Con => "",
            Level::Isr => "ISR",
        }
    }

    /// `WRN`/`ERR` print "always" per `DC3DbgLevels.h`'s own doc
    /// comments, bypassing the module mask (the device mask still
    /// applies -- there is no way to emit with no sink at all).
    fn bypasses_module_mask(self) -> bool {
        matches!(self, Level::Wrn | Level::Err | Level::Con)
    }
}

/// One trace call site's worth of data, analogous to the arguments an
/// `XXX_printf(fmt, ...)` macro call captures: level, the calling
/// module's mask bit, `__func__`/`__LINE__`, the already-formatted
/// message, and the tick count to stamp it with (the original reads
/// the RTC-backed tick count at the call site via `time_get()`; doing
/// the same here would need every capsule to carry a clock handle, so
/// the caller passes its own notion of "now" instead).
#[derive(Debug, Clone)]
pub struct TraceRequest {
    pub level: Level,
    pub module: u32,
    pub source: &'static str,
    pub line: u32,
    pub message: String,
    pub elapsed_ticks: u64,
}

/// Formats `HH:MM:SS.mmm` from a tick count and the dispatcher's tick
/// rate, matching the sample output in `dbg_cntrl.h`'s doc comment
/// (`00:04:09:00459`, read as `HH:MM:SS:mmm` there; the `:` before the
/// millisecond field in the original is a typo we don't repeat).
fn format_timestamp(elapsed_ticks: u64, ticks_per_second: u32) -> String {
    let ticks_per_second = ticks_per_second.max(1) as u64;
    let total_millis = elapsed_ticks.saturating_mul(1000) / ticks_per_second;
    let millis = total_millis % 1000;
    let total_secs = total_millis / 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let hours = total_mins / 60;
    format!("{hours:02}:{mins:02}:{secs:02}.{millis:03}")
}

/// Renders one trace record to the exact line format the serial
/// endpoint's `DEBUG_PREFIXES` filter expects on the other end
/// (`crate::signals` siblings aside, see `transports::serial`).
pub fn format_line(request: &TraceRequest, ticks_per_second: u32) -> String {
    if request.level == Level::Con {
        return request.message.clone();
    }
    let timestamp = format_timestamp(request.elapsed_ticks, ticks_per_second);
    if request.level == Level::Isr {
        return format!("{} {}", request.level.prefix(), request.message);
    }
    format!(
        "{}-{}-{}():{}: {}",
        request.level.prefix(),
        timestamp,
        request.source,
        request.line,
        request.message
    )
}

pub struct DebugBus {
    name: &'static str,
    priority: Priority,
    serial_target: &'static str,
    ticks_per_second: u32,
    module_mask: Cell<u32>,
    device_mask: Cell<u8>,
}

impl DebugBus {
    pub fn new(
        name: &'static str,
        priority: Priority,
        serial_target: &'static str,
        ticks_per_second: u32,
        module_mask: u32,
        device_mask: u8,
    ) -> Self {
        Self {
            name,
            priority,
            serial_target,
            ticks_per_second,
            module_mask: Cell::new(module_mask),
            device_mask: Cell::new(device_mask),
        }
    }

    /// The masks as persisted in the settings database
    /// (`settings::Element::DebugModulesMask`/`DebugDevicesMask`),
    /// read synchronously for composing a `debug` payload response.
    pub fn masks(&self) -> (u32, u8) {
        (self.module_mask.get(), self.device_mask.get())
    }

    fn should_emit(&self, request: &TraceRequest) -> bool {
        if self.device_mask.get() == 0 {
            return false;
        }
        request.level.bypasses_module_mask() || self.module_mask.get() & request.module != 0
    }

    fn emit(&self, request: &TraceRequest) -> Vec<Effect> {
        if !self.should_emit(request) {
            return vec![];
        }
        if self.device_mask.get() & device::SERIAL == 0 {
            return vec![];
        }
        let mut line = format_line(request, self.ticks_per_second).into_bytes();
        line.push(b'\n');
        vec![Effect::Post {
            target: self.serial_target,
            signal: dc3_transports::signals::EMIT_RAW_LINE,
            payload: Payload::custom(line),
        }]
    }

    /// The synchronous counterpart to `emit`, for use before the
    /// dispatcher is running (`xxx_slow_printf`'s role). Writes
    /// straight to the given sink rather than through a posted event.
    pub fn emit_slow(&self, request: &TraceRequest, sink: &mut dyn std::io::Write) {
        if !self.should_emit(request) {
            return;
        }
        let line = format_line(request, self.ticks_per_second);
        let _ = writeln!(sink, "{line}");
    }
}

impl ActiveObject for DebugBus {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn handle(&self, event: &Event) -> Vec<Effect> {
        match event.signal {
            signals::EMIT => {
                let Some(request) = event.payload.downcast_ref::<TraceRequest>() else {
                    return vec![];
                };
                self.emit(request)
            }
            signals::SET_MASKS => {
                let Some((modules, devices)) = event.payload.downcast_ref::<(u32, u8)>() else {
                    return vec![];
                };
                self.module_mask.set(*modules);
                self.device_mask.set(*devices);
                vec![]
            }
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_rolls_over_hours_minutes_and_seconds() {
        // 1h 1m 1.5s at a 100 Hz tick rate.
        let ticks = 3661 * 100 + 50;
        assert_eq!(format_timestamp(ticks, 100), "01:01:01.500");
    }

    fn request(level: Level, module: u32) -> TraceRequest {
        TraceRequest {
            level,
            module,
            source: "do_thing",
            line: 42,
            message: "hello".into(),
            elapsed_ticks: 0,
        }
    }

    #[test]
    fn warnings_bypass_the_module_mask() {
        let bus = DebugBus::new("debug", Priority::new(1), "serial", 100, 0, DEFAULT_DEVICE_MASK);
        assert!(bus.should_emit(&request(Level::Wrn, module::NOR)));
        assert!(!bus.should_emit(&request(Level::Dbg, module::NOR)));
    }

    #[test]
    fn a_fully_disabled_device_mask_suppresses_everything() {
        let bus = DebugBus::new("debug", Priority::new(1), "serial", 100, DEFAULT_MODULE_MASK, 0);
        assert!(!bus.should_emit(&request(Level::Err, module::GEN)));
    }

    #[test]
    fn console_lines_have_no_prefix_or_timestamp() {
        let req = request(Level::Con, 0);
        assert_eq!(format_line(&req, 100), "hello");
    }

    #[test]
    fn set_masks_replaces_both_masks_in_one_call() {
        let mut bus = DebugBus::new("debug", Priority::new(1), "serial", 100, 0, 0);
        let effects = bus.handle(&Event::new(
            signals::SET_MASKS,
            Payload::custom((DEFAULT_MODULE_MASK, DEFAULT_DEVICE_MASK)),
        ));
        assert!(effects.is_empty());
        assert_eq!(bus.masks(), (DEFAULT_MODULE_MASK, DEFAULT_DEVICE_MASK));
    }
}
