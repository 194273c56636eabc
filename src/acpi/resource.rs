// Licensed under the Apache-2.0 license

//! Resource record of one ACPI device node.
//!
//! The platform layer evaluates `_CRS` and hands the nub either the decoded
//! descriptors or the raw resource template bytes. Only the descriptors that
//! matter to an I2C slave are kept:
//!
//! | Descriptor | Tag | Kept as |
//! |---|---|---|
//! | `I2cSerialBusV2` | large 0x0E, bus type 1 | [`I2cSerialBusDescriptor`] |
//! | `GpioInt` | large 0x0C, connection type 0 | [`GpioIntDescriptor`] |
//! | `Interrupt` | large 0x09 | [`InterruptDescriptor`] |
//! | `IRQ` / `IRQNoFlags` | small 0x04 | [`InterruptDescriptor`] |
//!
//! Everything else (memory, I/O, `GpioIo`, SPI and UART connections) is
//! skipped.

use fugit::HertzU32;
use log::trace;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::common::{Polarity, TriggerMode};
use crate::error::ResolutionError;

/// Longest resource source path kept, e.g. `\_SB.PCI0.I2C1`.
pub const MAX_RESOURCE_SOURCE: usize = 64;
/// Pins kept from a `GpioInt` pin table.
pub const MAX_GPIO_PINS: usize = 8;
/// Lines kept from an interrupt descriptor.
pub const MAX_INTERRUPT_LINES: usize = 16;

pub type ResourceSource = heapless::String<MAX_RESOURCE_SOURCE>;

const END_TAG: u8 = 0x79;
const SMALL_IRQ: u8 = 0x04;
const LARGE_FLAG: u8 = 0x80;
const LARGE_EXTENDED_IRQ: u8 = 0x09;
const LARGE_GPIO: u8 = 0x0C;
const LARGE_SERIAL_BUS: u8 = 0x0E;

const SERIAL_BUS_TYPE_I2C: u8 = 1;
const I2C_FLAG_TEN_BIT: u16 = 1 << 0;
const GPIO_CONNECTION_INTERRUPT: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cSerialBusDescriptor {
    pub slave_address: u16,
    pub ten_bit: bool,
    pub connection_speed: HertzU32,
    /// Controller the device hangs off.
    pub resource_source: ResourceSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioIntDescriptor {
    pub pins: heapless::Vec<u16, MAX_GPIO_PINS>,
    pub trigger: TriggerMode,
    pub polarity: Polarity,
    pub shared: bool,
    pub wake_capable: bool,
    /// Debounce timeout in hundredths of a millisecond.
    pub debounce_timeout: u16,
    /// GPIO controller owning the pins.
    pub resource_source: ResourceSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptDescriptor {
    pub lines: heapless::Vec<u32, MAX_INTERRUPT_LINES>,
    pub trigger: TriggerMode,
    pub polarity: Polarity,
    pub shared: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceDescriptor {
    I2cSerialBus(I2cSerialBusDescriptor),
    GpioInt(GpioIntDescriptor),
    Interrupt(InterruptDescriptor),
}

/// Read-only resource record for one device node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRecord {
    descriptors: Vec<ResourceDescriptor>,
}

/// A child device node as enumerated by the platform layer.
#[derive(Debug, Clone)]
pub struct PlatformDevice {
    /// ACPI path or `_HID` of the node, used for logging.
    pub name: String,
    pub resources: ResourceRecord,
}

impl PlatformDevice {
    #[must_use]
    pub fn new(name: &str, resources: ResourceRecord) -> Self {
        Self {
            name: name.to_owned(),
            resources,
        }
    }
}

impl ResourceRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, descriptor: ResourceDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    #[must_use]
    pub fn descriptors(&self) -> &[ResourceDescriptor] {
        &self.descriptors
    }

    /// Decode a `_CRS` resource template buffer.
    ///
    /// Decoding stops at the End Tag or at the end of the buffer.
    ///
    /// # Errors
    ///
    /// [`ResolutionError::Malformed`] if a descriptor runs past the end of the
    /// buffer or a kept descriptor is internally inconsistent.
    pub fn from_crs(data: &[u8]) -> Result<Self, ResolutionError> {
        let mut record = Self::new();
        let mut pos = 0;

        while let Some(&tag) = data.get(pos) {
            if tag == END_TAG {
                break;
            }

            let (header_len, body_len) = if tag & LARGE_FLAG != 0 {
                let len = data
                    .get(pos + 1..pos + 3)
                    .and_then(|b| U16::read_from_bytes(b).ok())
                    .ok_or(ResolutionError::Malformed { offset: pos })?;
                (3, usize::from(len.get()))
            } else {
                (1, usize::from(tag & 0x07))
            };

            let end = pos + header_len + body_len;
            let descriptor = data
                .get(pos..end)
                .ok_or(ResolutionError::Malformed { offset: pos })?;
            let body = descriptor
                .get(header_len..)
                .ok_or(ResolutionError::Malformed { offset: pos })?;

            let decoded = if tag & LARGE_FLAG != 0 {
                match tag & !LARGE_FLAG {
                    LARGE_SERIAL_BUS => decode_serial_bus(body, pos)?,
                    LARGE_GPIO => decode_gpio_int(descriptor, body, pos)?,
                    LARGE_EXTENDED_IRQ => decode_extended_irq(body, pos)?,
                    _ => None,
                }
            } else if (tag >> 3) & 0x0F == SMALL_IRQ {
                decode_small_irq(body, pos)?
            } else {
                None
            };

            match decoded {
                Some(descriptor) => record.descriptors.push(descriptor),
                None => trace!("skipping resource descriptor {tag:#04x} at {pos}"),
            }
            pos = end;
        }

        Ok(record)
    }
}

#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct SerialBusHeader {
    revision: u8,
    resource_source_index: u8,
    bus_type: u8,
    general_flags: u8,
    type_specific_flags: U16,
    type_specific_revision: u8,
    type_data_length: U16,
}

#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct I2cTypeData {
    connection_speed: U32,
    slave_address: U16,
}

#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct GpioIntHeader {
    revision: u8,
    connection_type: u8,
    general_flags: U16,
    interrupt_flags: U16,
    pin_config: u8,
    output_drive_strength: U16,
    debounce_timeout: U16,
    pin_table_offset: U16,
    resource_source_index: u8,
    resource_source_offset: U16,
    vendor_data_offset: U16,
    vendor_data_length: U16,
}

#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct ExtendedIrqHeader {
    flags: u8,
    count: u8,
}

fn decode_serial_bus(body: &[u8], at: usize) -> Result<Option<ResourceDescriptor>, ResolutionError> {
    let malformed = ResolutionError::Malformed { offset: at };
    let (header, rest) = SerialBusHeader::read_from_prefix(body).map_err(|_| malformed)?;
    if header.bus_type != SERIAL_BUS_TYPE_I2C {
        return Ok(None);
    }

    let type_data_len = usize::from(header.type_data_length.get());
    let type_data = rest.get(..type_data_len).ok_or(malformed)?;
    let (i2c, _vendor) = I2cTypeData::read_from_prefix(type_data).map_err(|_| malformed)?;
    let source = rest.get(type_data_len..).ok_or(malformed)?;

    Ok(Some(ResourceDescriptor::I2cSerialBus(I2cSerialBusDescriptor {
        slave_address: i2c.slave_address.get(),
        ten_bit: header.type_specific_flags.get() & I2C_FLAG_TEN_BIT != 0,
        connection_speed: HertzU32::from_raw(i2c.connection_speed.get()),
        resource_source: resource_source(source, at)?,
    })))
}

fn decode_gpio_int(
    descriptor: &[u8],
    body: &[u8],
    at: usize,
) -> Result<Option<ResourceDescriptor>, ResolutionError> {
    let malformed = ResolutionError::Malformed { offset: at };
    let (header, _) = GpioIntHeader::read_from_prefix(body).map_err(|_| malformed)?;
    if header.connection_type != GPIO_CONNECTION_INTERRUPT {
        return Ok(None);
    }

    // Pin table and resource source offsets count from the tag byte.
    let table_start = usize::from(header.pin_table_offset.get());
    let source_start = usize::from(header.resource_source_offset.get());
    let table = descriptor.get(table_start..source_start).ok_or(malformed)?;
    if table.is_empty() || table.len() % 2 != 0 {
        return Err(malformed);
    }

    let mut pins = heapless::Vec::new();
    for pin in table.chunks_exact(2) {
        let pin = U16::read_from_bytes(pin).map_err(|_| malformed)?;
        // Pins past MAX_GPIO_PINS are dropped; a nub only uses the first.
        let _ = pins.push(pin.get());
    }

    let source = descriptor.get(source_start..).ok_or(malformed)?;
    let flags = header.interrupt_flags.get();
    Ok(Some(ResourceDescriptor::GpioInt(GpioIntDescriptor {
        pins,
        trigger: if flags & 0x01 != 0 {
            TriggerMode::Edge
        } else {
            TriggerMode::Level
        },
        polarity: match (flags >> 1) & 0x03 {
            0 => Polarity::ActiveHigh,
            1 => Polarity::ActiveLow,
            _ => Polarity::ActiveBoth,
        },
        shared: flags & 0x08 != 0,
        wake_capable: flags & 0x10 != 0,
        debounce_timeout: header.debounce_timeout.get(),
        resource_source: resource_source(source, at)?,
    })))
}

fn decode_extended_irq(body: &[u8], at: usize) -> Result<Option<ResourceDescriptor>, ResolutionError> {
    let malformed = ResolutionError::Malformed { offset: at };
    let (header, rest) = ExtendedIrqHeader::read_from_prefix(body).map_err(|_| malformed)?;
    let table = rest
        .get(..usize::from(header.count) * 4)
        .ok_or(malformed)?;
    if table.is_empty() {
        return Ok(None);
    }

    let mut lines = heapless::Vec::new();
    for line in table.chunks_exact(4) {
        let line = U32::read_from_bytes(line).map_err(|_| malformed)?;
        let _ = lines.push(line.get());
    }

    Ok(Some(ResourceDescriptor::Interrupt(InterruptDescriptor {
        lines,
        trigger: if header.flags & 0x02 != 0 {
            TriggerMode::Edge
        } else {
            TriggerMode::Level
        },
        polarity: if header.flags & 0x04 != 0 {
            Polarity::ActiveLow
        } else {
            Polarity::ActiveHigh
        },
        shared: header.flags & 0x08 != 0,
    })))
}

fn decode_small_irq(body: &[u8], at: usize) -> Result<Option<ResourceDescriptor>, ResolutionError> {
    let malformed = ResolutionError::Malformed { offset: at };
    let (mask, rest) = U16::read_from_prefix(body).map_err(|_| malformed)?;
    let mask = mask.get();
    if mask == 0 {
        return Ok(None);
    }

    // IRQNoFlags: edge, active-high, exclusive.
    let flags = rest.first().copied().unwrap_or(0x01);
    let lines = (0..16u32)
        .filter(|bit| mask & (1 << bit) != 0)
        .collect::<heapless::Vec<u32, MAX_INTERRUPT_LINES>>();

    Ok(Some(ResourceDescriptor::Interrupt(InterruptDescriptor {
        lines,
        trigger: if flags & 0x01 != 0 {
            TriggerMode::Edge
        } else {
            TriggerMode::Level
        },
        polarity: if flags & 0x08 != 0 {
            Polarity::ActiveLow
        } else {
            Polarity::ActiveHigh
        },
        shared: flags & 0x10 != 0,
    })))
}

/// NUL-terminated ASCII path, or empty when the descriptor carries none.
fn resource_source(bytes: &[u8], at: usize) -> Result<ResourceSource, ResolutionError> {
    let malformed = ResolutionError::Malformed { offset: at };
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let path = bytes
        .get(..len)
        .and_then(|b| core::str::from_utf8(b).ok())
        .ok_or(malformed)?;
    ResourceSource::try_from(path).map_err(|()| malformed)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hex_literal::hex;

    /// Touchpad at 0x15 on `\_SB.PCI0.I2C1`, 400 kHz, `GpioInt` edge
    /// active-low on pin 12 of `\_SB.GPO0`.
    pub(crate) const TOUCHPAD_CRS: [u8; 70] = hex!(
        "8E 1E 00 02 00 01 02 00 00 01 06 00 80 1A 06 00 15 00"
        "5C 5F 53 42 2E 50 43 49 30 2E 49 32 43 31 00"
        "8C 20 00 01 00 00 00 03 00 01 00 00 00 00 17 00 00 19 00 23 00 00 00"
        "0C 00"
        "5C 5F 53 42 2E 47 50 4F 30 00"
        "79 00"
    );

    /// Touchscreen at 0x10 routed through an APIC line: level, active-low,
    /// line 0x5F.
    pub(crate) const APIC_CRS: [u8; 44] = hex!(
        "8E 1E 00 02 00 01 02 00 00 01 06 00 80 1A 06 00 10 00"
        "5C 5F 53 42 2E 50 43 49 30 2E 49 32 43 31 00"
        "89 06 00 05 01 5F 00 00 00"
        "79 00"
    );

    #[test]
    fn decodes_i2c_serial_bus_and_gpio_int() {
        let record = ResourceRecord::from_crs(&TOUCHPAD_CRS).unwrap();
        assert_eq!(record.descriptors().len(), 2);

        match &record.descriptors()[0] {
            ResourceDescriptor::I2cSerialBus(bus) => {
                assert_eq!(bus.slave_address, 0x15);
                assert!(!bus.ten_bit);
                assert_eq!(bus.connection_speed.raw(), 400_000);
                assert_eq!(bus.resource_source.as_str(), "\\_SB.PCI0.I2C1");
            }
            other => panic!("unexpected descriptor {other:?}"),
        }

        match &record.descriptors()[1] {
            ResourceDescriptor::GpioInt(gpio) => {
                assert_eq!(gpio.pins.as_slice(), &[12]);
                assert_eq!(gpio.trigger, TriggerMode::Edge);
                assert_eq!(gpio.polarity, Polarity::ActiveLow);
                assert!(!gpio.shared);
                assert_eq!(gpio.resource_source.as_str(), "\\_SB.GPO0");
            }
            other => panic!("unexpected descriptor {other:?}"),
        }
    }

    #[test]
    fn decodes_extended_interrupt() {
        let record = ResourceRecord::from_crs(&APIC_CRS).unwrap();
        assert_eq!(
            record.descriptors()[1],
            ResourceDescriptor::Interrupt(InterruptDescriptor {
                lines: heapless::Vec::from_slice(&[0x5F]).unwrap(),
                trigger: TriggerMode::Level,
                polarity: Polarity::ActiveLow,
                shared: false,
            })
        );
    }

    #[test]
    fn decodes_small_irq_without_flags_as_edge_high() {
        let record = ResourceRecord::from_crs(&hex!("22 10 00 79 00")).unwrap();
        assert_eq!(
            record.descriptors(),
            &[ResourceDescriptor::Interrupt(InterruptDescriptor {
                lines: heapless::Vec::from_slice(&[4]).unwrap(),
                trigger: TriggerMode::Edge,
                polarity: Polarity::ActiveHigh,
                shared: false,
            })]
        );
    }

    #[test]
    fn ten_bit_flag_is_honoured() {
        let mut crs = APIC_CRS;
        crs[7] = 0x01; // type specific flags, bit 0
        crs[16] = 0x52;
        crs[17] = 0x02;
        let record = ResourceRecord::from_crs(&crs).unwrap();
        match &record.descriptors()[0] {
            ResourceDescriptor::I2cSerialBus(bus) => {
                assert!(bus.ten_bit);
                assert_eq!(bus.slave_address, 0x252);
            }
            other => panic!("unexpected descriptor {other:?}"),
        }
    }

    #[test]
    fn skips_unrelated_descriptors() {
        // Fixed I/O, Memory32Fixed, then a SPI serial bus (type 2).
        let data = hex!(
            "4B 60 00 01"
            "86 09 00 01 00 00 D0 FE 00 10 00 00"
            "8E 0F 00 02 00 02 02 00 00 01 06 00 00 00 00 00 00 00"
            "79 00"
        );
        let record = ResourceRecord::from_crs(&data).unwrap();
        assert!(record.descriptors().is_empty());
    }

    #[test]
    fn truncated_descriptor_is_malformed() {
        let truncated = &TOUCHPAD_CRS[..20];
        assert_eq!(
            ResourceRecord::from_crs(truncated),
            Err(ResolutionError::Malformed { offset: 0 })
        );
    }

    #[test]
    fn missing_end_tag_stops_at_buffer_end() {
        let record = ResourceRecord::from_crs(&TOUCHPAD_CRS[..68]).unwrap();
        assert_eq!(record.descriptors().len(), 2);
    }
}
