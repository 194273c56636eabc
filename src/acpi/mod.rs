// Licensed under the Apache-2.0 license

//! ACPI side of the nub: the resource record a platform layer hands over for
//! one device node, and the resolver that turns it into a
//! [`resolver::DeviceDescriptor`].

pub mod resolver;
pub mod resource;

pub use resolver::{resolve, DeviceDescriptor, GpioInterrupt, InterruptSource, PlatformInterrupt};
pub use resource::{
    GpioIntDescriptor, I2cSerialBusDescriptor, InterruptDescriptor, PlatformDevice,
    ResourceDescriptor, ResourceRecord, ResourceSource,
};
