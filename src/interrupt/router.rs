// Licensed under the Apache-2.0 license

//! # Interrupt Router
//!
//! A tagged backend chosen once at attach time, plus the binding state the
//! router owns:
//!
//! ```text
//! InterruptRouter
//!     ├── InterruptBackend::Gpio      { pin, trigger }  → GpioController
//!     ├── InterruptBackend::Platform  { line }          → PlatformInterruptController
//!     └── InterruptBackend::None                        (poll-only device)
//! ```
//!
//! ## Delivery
//!
//! Registering binds a small dispatch callback at the controller. When the
//! pin or line fires, the callback looks up the current handler under the
//! binding lock, releases the lock, then calls the handler. Deliveries that
//! find the source disabled or no handler bound are dropped and counted in
//! [`InterruptRouter::spurious_count`].
//!
//! ## Lock discipline
//!
//! Two locks, never confused:
//!
//! - the control lock orders state transitions. `register`, `enable`,
//!   `disable` and teardown hold it across their controller call and the
//!   matching binding update, so the controller and the binding always agree
//!   on the outcome of the last transition.
//! - the binding lock guards the handler and the enabled flag. It is never
//!   held across a controller call: controllers may wait for an in-flight
//!   delivery to finish inside `mask_pin` / `disable_line`, and that delivery
//!   takes the binding lock.
//!
//! Delivery never takes the control lock. A handler that calls back into the
//! router waits for any transition running in another context.
//!
//! ## Enabling before registration
//!
//! Enabling a source with no handler registered is permitted: delivery is
//! armed at the controller and any interrupt arriving before a handler is
//! registered is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, trace, warn};

use crate::common::{TriggerMode, NUB_INTERRUPT_SOURCE};
use crate::error::{InterruptError, IrqControllerError};
use crate::traits::{GpioController, InterruptHandler, IrqCallback, PlatformInterruptController};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Gpio,
    Platform,
}

/// Controller the device's interrupt is routed through. Controller
/// references are weak: the I2C controller driver owns them.
pub enum InterruptBackend {
    Gpio {
        controller: Weak<dyn GpioController>,
        pin: u16,
        trigger: TriggerMode,
    },
    Platform {
        controller: Weak<dyn PlatformInterruptController>,
        line: u32,
    },
    None,
}

/// Upgraded controller reference for the duration of one call.
enum Bound {
    Gpio(Arc<dyn GpioController>, u16, TriggerMode),
    Platform(Arc<dyn PlatformInterruptController>, u32),
}

impl Bound {
    fn mask(&self) -> Result<(), IrqControllerError> {
        match self {
            Bound::Gpio(gpio, pin, _) => gpio.mask_pin(*pin),
            Bound::Platform(intc, line) => intc.disable_line(*line),
        }
    }

    fn unmask(&self) -> Result<(), IrqControllerError> {
        match self {
            Bound::Gpio(gpio, pin, _) => gpio.unmask_pin(*pin),
            Bound::Platform(intc, line) => intc.enable_line(*line),
        }
    }

    fn bind(&self, callback: Option<IrqCallback>) -> Result<(), IrqControllerError> {
        match self {
            Bound::Gpio(gpio, pin, trigger) => gpio.bind_pin_handler(*pin, *trigger, callback),
            Bound::Platform(intc, line) => intc.bind_line_handler(*line, callback),
        }
    }

    fn trigger_type(&self) -> Result<TriggerMode, IrqControllerError> {
        match self {
            Bound::Gpio(gpio, pin, _) => gpio.pin_trigger_type(*pin),
            Bound::Platform(intc, line) => intc.line_trigger_type(*line),
        }
    }
}

#[derive(Default)]
struct InterruptBinding {
    handler: Option<Arc<dyn InterruptHandler>>,
    enabled: bool,
}

pub struct InterruptRouter {
    backend: InterruptBackend,
    control: Mutex<()>,
    binding: Arc<Mutex<InterruptBinding>>,
    spurious: Arc<AtomicUsize>,
}

fn lock(binding: &Mutex<InterruptBinding>) -> MutexGuard<'_, InterruptBinding> {
    binding.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InterruptRouter {
    #[must_use]
    pub fn new(backend: InterruptBackend) -> Self {
        Self {
            backend,
            control: Mutex::new(()),
            binding: Arc::new(Mutex::new(InterruptBinding::default())),
            spurious: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn gpio(controller: &Arc<dyn GpioController>, pin: u16, trigger: TriggerMode) -> Self {
        Self::new(InterruptBackend::Gpio {
            controller: Arc::downgrade(controller),
            pin,
            trigger,
        })
    }

    #[must_use]
    pub fn platform(controller: &Arc<dyn PlatformInterruptController>, line: u32) -> Self {
        Self::new(InterruptBackend::Platform {
            controller: Arc::downgrade(controller),
            line,
        })
    }

    #[must_use]
    pub fn none() -> Self {
        Self::new(InterruptBackend::None)
    }

    #[must_use]
    pub fn kind(&self) -> Option<SourceKind> {
        match self.backend {
            InterruptBackend::Gpio { .. } => Some(SourceKind::Gpio),
            InterruptBackend::Platform { .. } => Some(SourceKind::Platform),
            InterruptBackend::None => None,
        }
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        lock(&self.binding).handler.is_some()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        lock(&self.binding).enabled
    }

    /// Deliveries dropped because the source was disabled or unbound.
    #[must_use]
    pub fn spurious_count(&self) -> usize {
        self.spurious.load(Ordering::Relaxed)
    }

    fn transition(&self) -> MutexGuard<'_, ()> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bound(&self) -> Result<Bound, InterruptError> {
        match &self.backend {
            InterruptBackend::Gpio {
                controller,
                pin,
                trigger,
            } => controller
                .upgrade()
                .map(|gpio| Bound::Gpio(gpio, *pin, *trigger))
                .ok_or(InterruptError::ControllerGone),
            InterruptBackend::Platform { controller, line } => controller
                .upgrade()
                .map(|intc| Bound::Platform(intc, *line))
                .ok_or(InterruptError::ControllerGone),
            InterruptBackend::None => Err(InterruptError::NoInterrupt),
        }
    }

    /// Wired source for register / unregister / query: poll-only devices
    /// report `NoInterrupt`, foreign indices `InvalidSource`.
    fn checked(&self, source: usize) -> Result<Bound, InterruptError> {
        if matches!(self.backend, InterruptBackend::None) {
            return Err(InterruptError::NoInterrupt);
        }
        if source != NUB_INTERRUPT_SOURCE {
            return Err(InterruptError::InvalidSource(source));
        }
        self.bound()
    }

    /// Wired source for enable / disable: any mismatch is `NoInterrupt`.
    fn armable(&self, source: usize) -> Result<Bound, InterruptError> {
        if source != NUB_INTERRUPT_SOURCE {
            return Err(InterruptError::NoInterrupt);
        }
        self.bound()
    }

    fn dispatch_callback(&self) -> IrqCallback {
        let binding = Arc::downgrade(&self.binding);
        let spurious = Arc::clone(&self.spurious);
        Arc::new(move || {
            let handler = binding.upgrade().and_then(|binding| {
                let binding = lock(&binding);
                if binding.enabled {
                    binding.handler.clone()
                } else {
                    None
                }
            });
            match handler {
                Some(handler) => handler.handle_interrupt(NUB_INTERRUPT_SOURCE),
                None => {
                    spurious.fetch_add(1, Ordering::Relaxed);
                    trace!("interrupt dropped: source disabled or unbound");
                }
            }
        })
    }

    /// Bind `handler` to `source`. The source is not enabled by this call.
    ///
    /// # Errors
    ///
    /// - [`InterruptError::NoInterrupt`] for a poll-only device.
    /// - [`InterruptError::InvalidSource`] if `source` is not this device's.
    /// - [`InterruptError::AlreadyRegistered`] if a handler is bound.
    /// - Controller failures binding the pin or line.
    pub fn register(
        &self,
        source: usize,
        handler: Arc<dyn InterruptHandler>,
    ) -> Result<(), InterruptError> {
        let bound = self.checked(source)?;
        let _transition = self.transition();
        {
            let mut binding = lock(&self.binding);
            if binding.handler.is_some() {
                return Err(InterruptError::AlreadyRegistered);
            }
            binding.handler = Some(handler);
        }

        if let Err(err) = bound.bind(Some(self.dispatch_callback())) {
            lock(&self.binding).handler = None;
            return Err(err.into());
        }
        debug!("interrupt handler registered on {:?}", self.kind());
        Ok(())
    }

    /// Arm delivery for `source`, registered or not.
    ///
    /// # Errors
    ///
    /// - [`InterruptError::NoInterrupt`] if the device has no interrupt or
    ///   `source` is not this device's.
    /// - [`InterruptError::ControllerGone`] if the controller was torn down.
    /// - Controller failures unmasking the pin or line.
    pub fn enable(&self, source: usize) -> Result<(), InterruptError> {
        let bound = self.armable(source)?;
        let _transition = self.transition();
        lock(&self.binding).enabled = true;
        if let Err(err) = bound.unmask() {
            lock(&self.binding).enabled = false;
            return Err(err.into());
        }
        Ok(())
    }

    /// Stop delivery for `source`. Returns once the controller has quiesced;
    /// at most one delivery already in flight may still complete.
    ///
    /// The source is treated as disabled even if the controller call fails.
    ///
    /// # Errors
    ///
    /// Same as [`InterruptRouter::enable`].
    pub fn disable(&self, source: usize) -> Result<(), InterruptError> {
        let bound = self.armable(source)?;
        let _transition = self.transition();
        let masked = bound.mask();
        lock(&self.binding).enabled = false;
        masked.map_err(InterruptError::from)
    }

    /// Disable `source`, then clear the handler binding.
    ///
    /// The disable is attempted even when nothing is registered, so a source
    /// armed without a handler is quiesced as well.
    ///
    /// # Errors
    ///
    /// - [`InterruptError::NoInterrupt`] for a poll-only device or when no
    ///   handler was registered.
    /// - [`InterruptError::InvalidSource`] if `source` is not this device's.
    /// - Controller failures unbinding the pin or line.
    pub fn unregister(&self, source: usize) -> Result<(), InterruptError> {
        let bound = self.checked(source)?;
        match self.release(&bound) {
            Ok(true) => {
                debug!("interrupt handler unregistered on {:?}", self.kind());
                Ok(())
            }
            Ok(false) => Err(InterruptError::NoInterrupt),
            Err(err) => Err(err.into()),
        }
    }

    /// # Errors
    ///
    /// - [`InterruptError::NoInterrupt`] for a poll-only device.
    /// - [`InterruptError::InvalidSource`] if `source` is not this device's.
    /// - Controller failures reading the trigger configuration.
    pub fn interrupt_type(&self, source: usize) -> Result<TriggerMode, InterruptError> {
        Ok(self.checked(source)?.trigger_type()?)
    }

    /// Disable and unbind whatever is bound, for teardown.
    ///
    /// Returns whether a handler was removed. Controller failures are logged;
    /// the local binding is cleared regardless.
    pub fn quiesce(&self) -> bool {
        match self.bound() {
            Ok(bound) => match self.release(&bound) {
                Ok(removed) => removed,
                Err(err) => {
                    warn!("failed to unbind interrupt during teardown: {err}");
                    true
                }
            },
            Err(InterruptError::NoInterrupt) => false,
            Err(err) => {
                // Controller already gone: nothing left to mask or unbind.
                let _transition = self.transition();
                let mut binding = lock(&self.binding);
                binding.enabled = false;
                debug!("interrupt binding dropped without controller: {err}");
                binding.handler.take().is_some()
            }
        }
    }

    /// Mask, clear the local binding, then unbind at the controller if a
    /// handler was bound.
    fn release(&self, bound: &Bound) -> Result<bool, IrqControllerError> {
        let _transition = self.transition();
        if let Err(err) = bound.mask() {
            warn!("failed to disable interrupt before unbinding: {err}");
        }

        let removed = {
            let mut binding = lock(&self.binding);
            binding.enabled = false;
            binding.handler.take().is_some()
        };

        if removed {
            bound.bind(None)?;
        }
        Ok(removed)
    }
}
