// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interior-mutability helpers in the style of `tock-cells`.
//!
//! The upstream Tock crate builds these on `UnsafeCell` because no_std
//! code cannot assume an allocator or runtime borrow checks are
//! affordable. This board runs hosted, so these
//! wrap `Cell`/`RefCell` instead, but keep the same call-side API:
//! `OptionalCell` for `Copy` values, `TakeCell` for borrowed buffers, and
//! `MapCell` for owned non-`Copy` values.

use std::cell::{Cell, RefCell};

/// A `Cell` that holds an `Option<T>` for `Copy` types such as handles
/// and small status values.
#[derive(Default)]
pub struct OptionalCell<T> {
    value: Cell<Option<T>>,
}

impl<T: Copy> OptionalCell<T> {
    pub const fn empty() -> Self {
        Self {
            value: Cell::new(None),
        }
    }

    pub const fn new(value: T) -> Self {
        Self {
            value: Cell::new(Some(value)),
        }
    }

    pub fn set(&self, value: T) {
        self.value.set(Some(value));
    }

    pub fn clear(&self) {
        self.value.set(None);
    }

    pub fn is_some(&self) -> bool {
        matches!(self.value.get(), Some(_))
    }

    pub fn is_none(&self) -> bool {
        !self.is_some()
    }

    pub fn get(&self) -> Option<T> {
        self.value.get()
    }

    pub fn take(&self) -> Option<T> {
        self.value.take()
    }

    pub fn map<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(T) -> R,
    {
        self.value.get().map(f)
    }

    pub fn map_or<F, R>(&self, default: R, f: F) -> R
    where
        F: FnOnce(T) -> R,
    {
        self.value.get().map_or(default, f)
    }
}

/// An owned value behind a `RefCell`, for non-`Copy` payloads (buffers,
/// structs with heap allocations) that are handed around by value.
pub struct MapCell<T> {
    value: RefCell<Option<T>>,
}

impl<T> MapCell<T> {
    pub fn empty() -> Self {
        Self {
            value: RefCell::new(None),
        }
    }

    pub fn new(value: T) -> Self {
        Self {
            value: RefCell::new(Some(value)),
        }
    }

    pub fn put(&self, value: T) {
        *self.value.borrow_mut() = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.value.borrow_mut().take()
    }

    pub fn replace(&self, value: T) -> Option<T> {
        self.value.borrow_mut().replace(value)
    }

    pub fn is_some(&self) -> bool {
        self.value.borrow().is_some()
    }

    pub fn map<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        self.value.borrow_mut().as_mut().map(f)
    }
}

impl<T> Default for MapCell<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// A cell for a buffer that is handed off to a peripheral and handed
/// back on completion, the way Tock's `TakeCell` shuttles `&'static mut
/// [u8]` buffers between a capsule and its HIL client.
pub struct TakeCell<T: ?Sized> {
    value: RefCell<Option<Box<T>>>,
}

impl<T> TakeCell<T> {
    pub fn empty() -> Self {
        Self {
            value: RefCell::new(None),
        }
    }

    pub fn new(value: T) -> Self {
        Self {
            value: RefCell::new(Some(Box::new(value))),
        }
    }

    pub fn take(&self) -> Option<Box<T>> {
        self.value.borrow_mut().take()
    }

    pub fn put(&self, value: Box<T>) {
        *self.value.borrow_mut() = Some(value);
    }

    pub fn is_some(&self) -> bool {
        self.value.borrow().is_some()
    }

    pub fn is_none(&self) -> bool {
        !self.is_some()
    }
}

impl<T> Default for TakeCell<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_cell_round_trips() {
        let cell: OptionalCell<u32> = OptionalCell::empty();
        assert!(cell.is_none());
        cell.set(7);
        assert_eq!(cell.get(), Some(7));
        assert_eq!(cell.take(), Some(7));
        assert!(cell.is_none());
    }

    #[test]
    fn map_cell_mutates_in_place() {
        let cell = MapCell::new(vec![1, 2, 3]);
        cell.map(|v| v.push(4));
        assert_eq!(cell.take(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn take_cell_transfers_ownership() {
        let cell: TakeCell<[u8; 4]> = TakeCell::new([0u8; 4]);
        let buf = cell.take().unwrap();
        assert!(cell.is_none());
        cell.put(buf);
        assert!(cell.is_some());
    }
}
