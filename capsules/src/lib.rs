// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The I²C bus/device engines, settings database, flash engine and
//! debug bus. Each is a [`dc3_kernel::ActiveObject`] the board wires into the
//! dispatcher; none of them own their hardware directly, they only
//! hold a `&'static dyn` handle into `chips::dc3xx`.

pub mod debug;
pub mod flash;
pub mod i2c_bus;
pub mod i2c_device;
pub mod settings;
pub mod signals;
