// Licensed under the Apache-2.0 license

//! Bus side of the nub.
//!
//! [`serializer`] queues a device's transactions onto one worker thread;
//! [`hal_bus`] lets an embedded-hal I2C master stand in as the bus controller.

pub mod hal_bus;
pub mod serializer;

pub use hal_bus::HalBus;
pub use serializer::{
    PendingTransaction, Phase, SerializerHandle, TransactionKind, TransactionSerializer,
};
