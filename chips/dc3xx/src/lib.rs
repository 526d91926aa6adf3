// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Peripheral implementations of [`dc3_kernel::hil`] for the DC3
//! coupler board. `serial` carries a real, `serialport`-backed
//! implementation for the production binary; `i2c`, `flash`, and
//! `gpio` are in-memory simulations, since this board targets a
//! hosted build throughout rather than real silicon.
//!
//! Each simulation turns real (or simulated) I/O into the same
//! `Client` callbacks a bare-metal chip driver would fire from an
//! interrupt handler.

pub mod flash;
pub mod gpio;
pub mod i2c;
pub mod ram;
pub mod serial;
