// Licensed under the Apache-2.0 license

//! # Collaborator Traits
//!
//! The nub does not drive hardware itself. It talks to three collaborators
//! and is handed to them by a fourth:
//!
//! ```text
//! ControllerProvider (the I2C controller driver publishing nubs)
//!     ├── BusController               performs whole transactions
//!     ├── GpioController              pin mask/unmask, pin handler binding
//!     └── PlatformInterruptController line enable/disable, line handler binding
//! ```
//!
//! All collaborators are shared between every nub on a controller, so their
//! methods take `&self` and implementations are expected to serialize
//! internally. The nub only guarantees per-device ordering.

use std::sync::Arc;

use embedded_hal::i2c::Operation;

use crate::common::{DeviceAddress, I2cSpeed, TriggerMode};
use crate::error::{BusError, IrqControllerError};

/// Callback a controller invokes when the bound pin or line fires.
pub type IrqCallback = Arc<dyn Fn() + Send + Sync>;

/// Where a transaction goes: the slave address (with its width) and the bus
/// speed the device was described with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusTarget {
    pub address: DeviceAddress,
    pub speed: I2cSpeed,
}

/// I2C bus controller driver.
///
/// # Examples
///
/// ```rust,no_run
/// use embedded_hal::i2c::Operation;
/// use i2c_device_nub::{BusController, BusTarget, BusError};
///
/// fn read_register<B: BusController>(bus: &B, target: &BusTarget) -> Result<u8, BusError> {
///     let mut value = [0u8; 1];
///     bus.perform_transaction(target, &mut [Operation::Write(&[0x00]), Operation::Read(&mut value)])?;
///     Ok(value[0])
/// }
/// ```
pub trait BusController: Send + Sync {
    /// Execute all `phases` against `target` as one bus transaction,
    /// with repeated starts between phases and a single stop at the end.
    ///
    /// The controller leaves the bus idle before returning, on success and
    /// on failure.
    ///
    /// # Errors
    ///
    /// - [`BusError::Busy`] on contention (clock stretch timeout, bus held
    ///   by another master).
    /// - [`BusError::InvalidLength`] if a phase length cannot be handled.
    /// - NACK, arbitration loss and other protocol failures.
    fn perform_transaction(
        &self,
        target: &BusTarget,
        phases: &mut [Operation<'_>],
    ) -> Result<(), BusError>;
}

/// GPIO controller driver owning the pins interrupts may be routed through.
pub trait GpioController: Send + Sync {
    /// Stop delivering interrupts for `pin`.
    ///
    /// Must not return while a delivery for `pin` that started before the
    /// call is still being dispatched, beyond the one already in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin is not managed by this controller.
    fn mask_pin(&self, pin: u16) -> Result<(), IrqControllerError>;

    /// Resume delivering interrupts for `pin`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin is not managed by this controller.
    fn unmask_pin(&self, pin: u16) -> Result<(), IrqControllerError>;

    /// Bind (`Some`) or unbind (`None`) the callback for `pin`, configuring
    /// the pin for `trigger`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be configured as an interrupt.
    fn bind_pin_handler(
        &self,
        pin: u16,
        trigger: TriggerMode,
        handler: Option<IrqCallback>,
    ) -> Result<(), IrqControllerError>;

    /// Trigger mode the pin is currently configured for.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin is not managed by this controller.
    fn pin_trigger_type(&self, pin: u16) -> Result<TriggerMode, IrqControllerError>;
}

/// The platform's generic interrupt controller (IOAPIC, GIC, ...).
pub trait PlatformInterruptController: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the line is not managed by this controller.
    fn enable_line(&self, line: u32) -> Result<(), IrqControllerError>;

    /// Same quiescing contract as [`GpioController::mask_pin`].
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not managed by this controller.
    fn disable_line(&self, line: u32) -> Result<(), IrqControllerError>;

    /// # Errors
    ///
    /// Returns an error if the line cannot take a handler.
    fn bind_line_handler(
        &self,
        line: u32,
        handler: Option<IrqCallback>,
    ) -> Result<(), IrqControllerError>;

    /// # Errors
    ///
    /// Returns an error if the line is not managed by this controller.
    fn line_trigger_type(&self, line: u32) -> Result<TriggerMode, IrqControllerError>;
}

/// The I2C controller driver that creates and publishes nubs.
///
/// The provider owns its collaborators; nubs only keep weak references, so a
/// provider tearing down drops its `Arc`s and every nub's reference goes
/// stale at once.
pub trait ControllerProvider {
    /// ACPI path of the controller, e.g. `\_SB.PCI0.I2C1`.
    fn controller_name(&self) -> &str;

    /// `None` if the controller is not in a usable state.
    fn bus_controller(&self) -> Option<Arc<dyn BusController>>;

    /// GPIO controller named by a `GpioInt` resource source.
    fn gpio_controller(&self, resource_source: &str) -> Option<Arc<dyn GpioController>>;

    fn interrupt_controller(&self) -> Option<Arc<dyn PlatformInterruptController>>;
}

/// Interrupt handler registered by a peripheral driver.
///
/// The handler's own state plays the role of the registration context.
/// Called from the interrupt controller's delivery context.
pub trait InterruptHandler: Send + Sync {
    fn handle_interrupt(&self, source: usize);
}

impl<F> InterruptHandler for F
where
    F: Fn(usize) + Send + Sync,
{
    fn handle_interrupt(&self, source: usize) {
        self(source);
    }
}
