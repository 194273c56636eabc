// Licensed under the Apache-2.0 license

//! Common types shared by the resolver, the interrupt router and the
//! transaction serializer, plus the nub configuration builder.

use core::fmt;

use fugit::HertzU32;

/// Index of the only interrupt source a nub exposes.
///
/// The source parameter on the interrupt API exists for uniformity with
/// multi-source controllers; a nub recognizes exactly this one.
pub const NUB_INTERRUPT_SOURCE: usize = 0;

/// Largest 7-bit slave address.
pub const MAX_SEVEN_BIT_ADDRESS: u16 = 0x7F;

/// Largest 10-bit slave address.
pub const MAX_TEN_BIT_ADDRESS: u16 = 0x3FF;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
}

impl I2cSpeed {
    /// Highest bus mode that does not exceed `hz`. Anything slower than
    /// standard mode is clamped up to standard mode.
    #[must_use]
    pub fn from_connection_speed(hz: HertzU32) -> Self {
        match hz.raw() {
            f if f >= I2cSpeed::FastPlus as u32 => I2cSpeed::FastPlus,
            f if f >= I2cSpeed::Fast as u32 => I2cSpeed::Fast,
            _ => I2cSpeed::Standard,
        }
    }

    #[must_use]
    pub fn frequency(self) -> HertzU32 {
        HertzU32::from_raw(self as u32)
    }
}

/// Slave addressing width.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    SevenBit,
    TenBit,
}

/// A slave address together with the width it must be driven with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub value: u16,
    pub mode: AddressMode,
}

impl DeviceAddress {
    #[must_use]
    pub const fn seven_bit(value: u8) -> Self {
        Self {
            value: value as u16,
            mode: AddressMode::SevenBit,
        }
    }

    #[must_use]
    pub const fn ten_bit(value: u16) -> Self {
        Self {
            value,
            mode: AddressMode::TenBit,
        }
    }

    /// Whether the address fits the width it claims.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        match self.mode {
            AddressMode::SevenBit => self.value <= MAX_SEVEN_BIT_ADDRESS,
            AddressMode::TenBit => self.value <= MAX_TEN_BIT_ADDRESS,
        }
    }

    #[must_use]
    pub const fn is_ten_bit(&self) -> bool {
        matches!(self.mode, AddressMode::TenBit)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            AddressMode::SevenBit => write!(f, "{:#04x}", self.value),
            AddressMode::TenBit => write!(f, "{:#05x} (10-bit)", self.value),
        }
    }
}

/// Interrupt trigger mode reported by `get_interrupt_type`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TriggerMode {
    Edge,
    Level,
}

/// Active polarity of an interrupt input.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
    /// Both edges (GPIO only).
    ActiveBoth,
}

/// Runtime configuration of a nub.
#[derive(Clone, Debug)]
pub struct NubConfig {
    /// Thread name of the serialized work context.
    pub worker_name: String,
    /// Requests that may wait in the command queue before callers block on
    /// submission.
    pub queue_depth: usize,
    /// Largest single phase the nub forwards to the controller.
    pub max_transfer_len: usize,
    /// Bus speed used when the resource template carries none.
    pub default_speed: I2cSpeed,
}

impl Default for NubConfig {
    fn default() -> Self {
        NubConfigBuilder::new().build()
    }
}

pub struct NubConfigBuilder {
    worker_name: Option<String>,
    queue_depth: usize,
    max_transfer_len: usize,
    default_speed: I2cSpeed,
}

impl Default for NubConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NubConfigBuilder {
    pub const DEFAULT_QUEUE_DEPTH: usize = 16;
    pub const DEFAULT_MAX_TRANSFER_LEN: usize = 4096;

    #[must_use]
    pub fn new() -> Self {
        Self {
            worker_name: None,
            queue_depth: Self::DEFAULT_QUEUE_DEPTH,
            max_transfer_len: Self::DEFAULT_MAX_TRANSFER_LEN,
            default_speed: I2cSpeed::Standard,
        }
    }
    #[must_use]
    pub fn worker_name(mut self, name: &str) -> Self {
        self.worker_name = Some(name.to_owned());
        self
    }
    #[must_use]
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }
    #[must_use]
    pub fn max_transfer_len(mut self, len: usize) -> Self {
        self.max_transfer_len = len;
        self
    }
    #[must_use]
    pub fn default_speed(mut self, speed: I2cSpeed) -> Self {
        self.default_speed = speed;
        self
    }
    #[must_use]
    pub fn build(self) -> NubConfig {
        NubConfig {
            worker_name: self
                .worker_name
                .unwrap_or_else(|| String::from("i2c-nub-worker")),
            // A zero-depth sync channel is a rendezvous; keep at least one slot.
            queue_depth: self.queue_depth.max(1),
            max_transfer_len: self.max_transfer_len.max(1),
            default_speed: self.default_speed,
        }
    }
}
