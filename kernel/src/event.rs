// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The event envelope active objects exchange.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::pool::PoolClass;

/// Signal identifiers are a flat numeric space, the same way
/// `DC3Signals.h` partitions one global `enum` into per-manager
/// blocks (`CommSignals`, `I2CBusMgrSignals`, ...). Each active object
/// crate defines its own `#[repr(u32)] enum` and converts to/from this
/// type at its boundary rather than sharing one mega-enum, which is
/// the one departure we take from the original layout: Rust's enums
/// don't need hand-assigned contiguous ranges to stay distinct.
pub type SignalId = u32;

/// A signal-specific payload. Kept small and `Clone`-cheap (buffers are
/// `Arc`-shared) so that publish/subscribe fan-out does not require
/// copying; `Custom` is an escape hatch for a capsule's own structured
/// request/response type, downcast at the call site.
#[derive(Clone)]
pub enum Payload {
    Empty,
    Status(i32),
    U32(u32),
    Bytes(Arc<[u8]>),
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    pub fn custom<T: Any + Send + Sync>(value: T) -> Self {
        Payload::Custom(Arc::new(value))
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        match self {
            Payload::Custom(v) => v.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Payload::Bytes(data.into())
    }

    /// Which pool an event carrying this payload should be drawn from:
    /// small, medium, or large.
    pub fn suggested_class(&self) -> PoolClass {
        match self {
            Payload::Empty | Payload::Status(_) | Payload::U32(_) => PoolClass::Small,
            Payload::Bytes(b) if b.len() <= 16 => PoolClass::Medium,
            Payload::Bytes(_) => PoolClass::Large,
            Payload::Custom(_) => PoolClass::Medium,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => write!(f, "Empty"),
            Payload::Status(s) => write!(f, "Status({s})"),
            Payload::U32(v) => write!(f, "U32({v})"),
            Payload::Bytes(b) => write!(f, "Bytes[{}]", b.len()),
            Payload::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// An event: a signal plus its payload. It must never be stack-allocated
/// once the kernel is running; that is honored by the fact
/// that every live `Event` is reached only via an [`crate::pool::EventHandle`]
/// into one of the kernel's pools; see [`crate::dispatcher::Dispatcher`].
#[derive(Clone, Debug)]
pub struct Event {
    pub signal: SignalId,
    pub payload: Payload,
}

impl Event {
    pub fn new(signal: SignalId, payload: Payload) -> Self {
        Self { signal, payload }
    }

    pub fn empty(signal: SignalId) -> Self {
        Self::new(signal, Payload::Empty)
    }
}
