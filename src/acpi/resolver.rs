// Licensed under the Apache-2.0 license

//! Resource resolution: one [`ResourceRecord`] in, one immutable
//! [`DeviceDescriptor`] out. Runs once per attach and has no side effects.

use log::{debug, warn};

use crate::acpi::resource::{ResourceDescriptor, ResourceRecord, ResourceSource};
use crate::common::{AddressMode, DeviceAddress, I2cSpeed, Polarity, TriggerMode};
use crate::error::ResolutionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioInterrupt {
    pub pin: u16,
    pub trigger: TriggerMode,
    pub polarity: Polarity,
    /// GPIO controller the pin belongs to.
    pub controller: ResourceSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformInterrupt {
    pub line: u32,
    pub trigger: TriggerMode,
    pub polarity: Polarity,
}

/// How the device signals interrupts, if at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptSource {
    Gpio(GpioInterrupt),
    Platform(PlatformInterrupt),
    /// The device is polled.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub address: DeviceAddress,
    /// Connection speed from the serial bus descriptor, or the configured
    /// default when it carries none.
    pub speed: Option<I2cSpeed>,
    /// I2C controller the device hangs off.
    pub controller: ResourceSource,
    pub interrupt: InterruptSource,
}

impl DeviceDescriptor {
    #[must_use]
    pub fn addressing_mode(&self) -> AddressMode {
        self.address.mode
    }

    #[must_use]
    pub fn is_poll_only(&self) -> bool {
        matches!(self.interrupt, InterruptSource::None)
    }
}

/// Resolve a device's address and interrupt wiring.
///
/// The first I2C serial bus descriptor names the slave; the first `GpioInt`
/// and the first interrupt descriptor name the interrupt. A record that
/// carries both kinds of interrupt is rejected rather than guessed at.
///
/// # Errors
///
/// - [`ResolutionError::MissingAddress`] if there is no I2C serial bus
///   descriptor or its address does not fit its addressing width.
/// - [`ResolutionError::AmbiguousInterrupt`] if both a GPIO and a platform
///   interrupt are described.
/// - [`ResolutionError::Malformed`] if a `GpioInt` carries no pin.
pub fn resolve(record: &ResourceRecord) -> Result<DeviceDescriptor, ResolutionError> {
    let mut serial_buses = record.descriptors().iter().filter_map(|d| match d {
        ResourceDescriptor::I2cSerialBus(bus) => Some(bus),
        _ => None,
    });

    let bus = serial_buses.next().ok_or(ResolutionError::MissingAddress)?;
    let extra = serial_buses.count();
    if extra > 0 {
        warn!("{extra} additional I2C connection(s) ignored, using {:#x}", bus.slave_address);
    }

    let address = DeviceAddress {
        value: bus.slave_address,
        mode: if bus.ten_bit {
            AddressMode::TenBit
        } else {
            AddressMode::SevenBit
        },
    };
    if !address.is_valid() {
        debug!("slave address {:#x} does not fit {:?}", address.value, address.mode);
        return Err(ResolutionError::MissingAddress);
    }

    let gpio = record.descriptors().iter().find_map(|d| match d {
        ResourceDescriptor::GpioInt(gpio) => Some(gpio),
        _ => None,
    });
    let platform = record.descriptors().iter().find_map(|d| match d {
        ResourceDescriptor::Interrupt(irq) => Some(irq),
        _ => None,
    });

    let interrupt = match (gpio, platform) {
        (Some(_), Some(_)) => return Err(ResolutionError::AmbiguousInterrupt),
        (Some(gpio), None) => {
            let pin = *gpio
                .pins
                .first()
                .ok_or(ResolutionError::Malformed { offset: 0 })?;
            InterruptSource::Gpio(GpioInterrupt {
                pin,
                trigger: gpio.trigger,
                polarity: gpio.polarity,
                controller: gpio.resource_source.clone(),
            })
        }
        (None, Some(irq)) => match irq.lines.first() {
            Some(&line) => InterruptSource::Platform(PlatformInterrupt {
                line,
                trigger: irq.trigger,
                polarity: irq.polarity,
            }),
            None => InterruptSource::None,
        },
        (None, None) => InterruptSource::None,
    };

    let speed = match bus.connection_speed.raw() {
        0 => None,
        _ => Some(I2cSpeed::from_connection_speed(bus.connection_speed)),
    };

    let descriptor = DeviceDescriptor {
        address,
        speed,
        controller: bus.resource_source.clone(),
        interrupt,
    };
    debug!("resolved {descriptor:?}");
    Ok(descriptor)
}
