// Licensed under the Apache-2.0 license

// Enforce Copilot coding guidelines - prevent panic-prone patterns in production code only
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::indexing_slicing))]
#![cfg_attr(not(test), warn(clippy::expect_used))]

//! Device nub for ACPI-described I2C slave devices.
//!
//! A nub sits between an I2C bus controller driver and the peripheral driver
//! bound to one slave device (touchpads, touchscreens and other HID-over-I2C
//! parts). It resolves the device's bus address and interrupt wiring from the
//! firmware resource template once at attach time, routes interrupt
//! management to either a GPIO controller or the platform interrupt
//! controller, and serializes bus transactions onto a single work context.
//!
//! ```text
//! peripheral driver
//!     │  read_i2c / write_i2c / write_read_i2c / *_interrupt
//!     ▼
//! DeviceNub ── ResourceResolver (attach only)
//!     ├── InterruptRouter ──► GpioController | PlatformInterruptController
//!     └── TransactionSerializer ──► BusController
//! ```

pub mod acpi;
pub mod common;
pub mod error;
pub mod i2c;
pub mod interrupt;
pub mod nub;
pub mod traits;

#[cfg(test)]
pub(crate) mod tests;

pub use common::{
    AddressMode, DeviceAddress, I2cSpeed, NubConfig, NubConfigBuilder, Polarity, TriggerMode,
};
pub use error::{AttachError, BusError, InterruptError, ResolutionError, TransactionError};
pub use nub::{DeviceNub, NubI2c, NubState};
pub use traits::{
    BusController, BusTarget, ControllerProvider, GpioController, InterruptHandler, IrqCallback,
    PlatformInterruptController,
};
