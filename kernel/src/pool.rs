// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fixed-size typed arenas for events.
//!
//! On the original MCU target events are allocated from one of a few
//! fixed-size pools to avoid heap fragmentation; an event is identified
//! by a handle into its pool and is reference counted so that publish
//! (fan-out to several subscribers) and garbage collection (return to
//! the pool once nothing references it) both work without copying the
//! payload. We reproduce that as an index-based arena: the allocator
//! and the host's heap both exist here, but the pool's fixed capacity
//! and the "queue overflow is a fatal assertion" rule are kept, since
//! they are the behavior under test (§8).

use std::cell::RefCell;
use std::fmt;

/// The payload-size class an event was allocated from. Determines
/// which pool backs the handle, not the Rust type of the payload
/// (payloads here are a single enum; the classes exist to mirror the
/// original fixed-size-pool design and to size each pool independently
/// at board-construction time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolClass {
    Small,
    Medium,
    Large,
}

/// A handle to an event living in a pool. Cheap to copy; does not by
/// itself grant access to the payload, which is recovered via
/// [`EventPools::peek`] or consumed via [`EventPools::release`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    class: PoolClass,
    index: usize,
    generation: u32,
}

impl fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventHandle({:?}#{}@{})",
            self.class, self.index, self.generation
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("event pool ({0:?}) exhausted")]
    Exhausted(PoolClass),
    #[error("stale or already-collected event handle")]
    StaleHandle,
}

struct Slot<T> {
    value: Option<T>,
    refcount: u32,
    generation: u32,
}

struct Pool<T> {
    class: PoolClass,
    slots: RefCell<Vec<Slot<T>>>,
    free: RefCell<Vec<usize>>,
}

impl<T> Pool<T> {
    fn new(class: PoolClass, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut free = Vec::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot {
                value: None,
                refcount: 0,
                generation: 0,
            });
            free.push(capacity - 1 - i);
        }
        Self {
            class,
            slots: RefCell::new(slots),
            free: RefCell::new(free),
        }
    }

    fn alloc(&self, value: T) -> Result<EventHandle, PoolError> {
        let index = self
            .free
            .borrow_mut()
            .pop()
            .ok_or(PoolError::Exhausted(self.class))?;
        let mut slots = self.slots.borrow_mut();
        let slot = &mut slots[index];
        debug_assert_eq!(slot.refcount, 0, "allocated a slot still in use");
        slot.value = Some(value);
        slot.refcount = 1;
        Ok(EventHandle {
            class: self.class,
            index,
            generation: slot.generation,
        })
    }

    fn retain(&self, handle: EventHandle) -> Result<(), PoolError> {
        let mut slots = self.slots.borrow_mut();
        let slot = &mut slots[handle.index];
        if slot.generation != handle.generation || slot.refcount == 0 {
            return Err(PoolError::StaleHandle);
        }
        slot.refcount += 1;
        Ok(())
    }

    /// Decrements the reference count; returns the value to the caller
    /// (for final processing) and frees the slot once the count drops
    /// to zero. `None` refcount never goes negative by construction:
    /// a second release on an already-collected handle is an error.
    fn release(&self, handle: EventHandle) -> Result<(), PoolError> {
        let mut slots = self.slots.borrow_mut();
        let slot = &mut slots[handle.index];
        if slot.generation != handle.generation || slot.refcount == 0 {
            return Err(PoolError::StaleHandle);
        }
        slot.refcount -= 1;
        if slot.refcount == 0 {
            slot.value = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.borrow_mut().push(handle.index);
        }
        Ok(())
    }

    fn peek<R>(&self, handle: EventHandle, f: impl FnOnce(&T) -> R) -> Result<R, PoolError> {
        let slots = self.slots.borrow();
        let slot = &slots[handle.index];
        if slot.generation != handle.generation || slot.refcount == 0 {
            return Err(PoolError::StaleHandle);
        }
        Ok(f(slot.value.as_ref().expect("refcount > 0 implies a value")))
    }

    fn in_use(&self) -> usize {
        self.slots.borrow().len() - self.free.borrow().len()
    }

    fn capacity(&self) -> usize {
        self.slots.borrow().len()
    }
}

/// The three fixed-capacity pools an event kernel instance owns.
pub struct EventPools<T> {
    small: Pool<T>,
    medium: Pool<T>,
    large: Pool<T>,
}

impl<T> EventPools<T> {
    pub fn new(small_capacity: usize, medium_capacity: usize, large_capacity: usize) -> Self {
        Self {
            small: Pool::new(PoolClass::Small, small_capacity),
            medium: Pool::new(PoolClass::Medium, medium_capacity),
            large: Pool::new(PoolClass::Large, large_capacity),
        }
    }

    fn pool(&self, class: PoolClass) -> &Pool<T> {
        match class {
            PoolClass::Small => &self.small,
            PoolClass::Medium => &self.medium,
            PoolClass::Large => &self.large,
        }
    }

    /// Allocates a new event. Pool exhaustion is a build-time sizing
    /// bug, not a runtime condition callers are expected to recover
    /// from, but we surface it as a `Result` rather than
    /// panicking directly so board code can choose to assert with a
    /// useful message at the call site.
    pub fn alloc(&self, class: PoolClass, value: T) -> Result<EventHandle, PoolError> {
        self.pool(class).alloc(value)
    }

    /// Used by publish/fan-out: one extra reference per additional
    /// subscriber beyond the first.
    pub fn retain(&self, handle: EventHandle) -> Result<(), PoolError> {
        self.pool(handle.class).retain(handle)
    }

    pub fn release(&self, handle: EventHandle) -> Result<(), PoolError> {
        self.pool(handle.class).release(handle)
    }

    pub fn peek<R>(&self, handle: EventHandle, f: impl FnOnce(&T) -> R) -> Result<R, PoolError> {
        self.pool(handle.class).peek(handle, f)
    }

    pub fn in_use(&self, class: PoolClass) -> usize {
        self.pool(class).in_use()
    }

    pub fn capacity(&self, class: PoolClass) -> usize {
        self.pool(class).capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_release_round_trips_through_free_list() {
        let pools: EventPools<u32> = EventPools::new(2, 0, 0);
        assert_eq!(pools.in_use(PoolClass::Small), 0);
        let h = pools.alloc(PoolClass::Small, 42).unwrap();
        assert_eq!(pools.in_use(PoolClass::Small), 1);
        assert_eq!(pools.peek(h, |v| *v).unwrap(), 42);
        pools.release(h).unwrap();
        assert_eq!(pools.in_use(PoolClass::Small), 0);
    }

    #[test]
    fn pool_exhaustion_is_reported_not_panicked() {
        let pools: EventPools<u32> = EventPools::new(1, 0, 0);
        let _h = pools.alloc(PoolClass::Small, 1).unwrap();
        let err = pools.alloc(PoolClass::Small, 2).unwrap_err();
        assert!(matches!(err, PoolError::Exhausted(PoolClass::Small)));
    }

    #[test]
    fn publish_fanout_keeps_event_alive_until_every_subscriber_releases() {
        let pools: EventPools<u32> = EventPools::new(1, 0, 0);
        let h = pools.alloc(PoolClass::Small, 9).unwrap();
        // Two subscribers: the allocator's claim counts as the first,
        // retain once more for the second.
        pools.retain(h).unwrap();
        pools.release(h).unwrap();
        assert_eq!(pools.in_use(PoolClass::Small), 1, "still referenced once");
        pools.release(h).unwrap();
        assert_eq!(pools.in_use(PoolClass::Small), 0);
    }

    #[test]
    fn stale_handle_after_gc_is_rejected() {
        let pools: EventPools<u32> = EventPools::new(1, 0, 0);
        let h = pools.alloc(PoolClass::Small, 1).unwrap();
        pools.release(h).unwrap();
        assert!(matches!(pools.release(h), Err(PoolError::StaleHandle)));
        assert!(matches!(pools.peek(h, |_| ()), Err(PoolError::StaleHandle)));
    }
}
