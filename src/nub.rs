// Licensed under the Apache-2.0 license

//! # Device Nub
//!
//! Composition root for one I2C slave device. Owns the resolved
//! [`DeviceDescriptor`], the [`InterruptRouter`] and the
//! [`TransactionSerializer`], and walks them through the lifecycle:
//!
//! ```text
//! Unattached ──attach──► Attaching ──► Active ──detach──► Detaching ──► Unattached
//!      ▲                     │
//!      └──── failure ────────┘
//! ```
//!
//! `start` / `stop` only publish and withdraw the device API while `Active`.
//! Every device API call outside `Active` fails with `NotAttached`.
//!
//! The state lock is held only to read or swap the components; interrupt
//! and bus calls run on clones taken out of it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use embedded_hal::i2c::{ErrorType, I2c, Operation, SevenBitAddress, TenBitAddress};
use log::{debug, info, warn};

use crate::acpi::{resolve, DeviceDescriptor, InterruptSource, PlatformDevice};
use crate::common::{DeviceAddress, NubConfig, TriggerMode};
use crate::error::{AttachError, InterruptError, TransactionError};
use crate::i2c::serializer::{SerializerHandle, TransactionSerializer};
use crate::interrupt::InterruptRouter;
use crate::traits::{BusTarget, ControllerProvider, InterruptHandler};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NubState {
    Unattached,
    Attaching,
    Active,
    Detaching,
}

struct NubInner {
    state: NubState,
    published: bool,
    device: Option<String>,
    descriptor: Option<DeviceDescriptor>,
    router: Option<Arc<InterruptRouter>>,
    serializer: Option<TransactionSerializer>,
}

/// Everything `attach` builds before the nub goes `Active`.
struct Binding {
    descriptor: DeviceDescriptor,
    router: InterruptRouter,
    serializer: TransactionSerializer,
}

pub struct DeviceNub {
    config: NubConfig,
    inner: Mutex<NubInner>,
}

impl Default for DeviceNub {
    fn default() -> Self {
        Self::new(NubConfig::default())
    }
}

impl DeviceNub {
    #[must_use]
    pub fn new(config: NubConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(NubInner {
                state: NubState::Unattached,
                published: false,
                device: None,
                descriptor: None,
                router: None,
                serializer: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn config(&self) -> &NubConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> NubState {
        self.lock().state
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.lock().published
    }

    /// Resolved description of the attached device.
    #[must_use]
    pub fn descriptor(&self) -> Option<DeviceDescriptor> {
        self.lock().descriptor.clone()
    }

    /// Resolve `child` and bind it to the collaborators of `provider`.
    ///
    /// On failure the nub is back in [`NubState::Unattached`].
    ///
    /// # Errors
    ///
    /// - [`AttachError::AlreadyAttached`] unless the nub is unattached.
    /// - [`AttachError::Resolution`] if the resource record is unusable.
    /// - [`AttachError::InvalidController`] if the provider has no bus
    ///   controller.
    /// - [`AttachError::GpioControllerMissing`] /
    ///   [`AttachError::InterruptControllerMissing`] if the controller the
    ///   interrupt is wired through is not available.
    /// - [`AttachError::WorkerSpawn`] if the work context cannot be started.
    pub fn attach(
        &self,
        provider: &dyn ControllerProvider,
        child: &PlatformDevice,
    ) -> Result<(), AttachError> {
        {
            let mut inner = self.lock();
            if inner.state != NubState::Unattached {
                return Err(AttachError::AlreadyAttached);
            }
            inner.state = NubState::Attaching;
        }

        match self.bind(provider, child) {
            Ok(Binding {
                descriptor,
                router,
                serializer,
            }) => {
                info!(
                    "{} attached at {} on {}",
                    child.name,
                    descriptor.address,
                    provider.controller_name()
                );
                let mut inner = self.lock();
                inner.device = Some(child.name.clone());
                inner.descriptor = Some(descriptor);
                inner.router = Some(Arc::new(router));
                inner.serializer = Some(serializer);
                inner.state = NubState::Active;
                Ok(())
            }
            Err(err) => {
                warn!("{} failed to attach: {err}", child.name);
                self.lock().state = NubState::Unattached;
                Err(err)
            }
        }
    }

    fn bind(
        &self,
        provider: &dyn ControllerProvider,
        child: &PlatformDevice,
    ) -> Result<Binding, AttachError> {
        let descriptor = resolve(&child.resources)?;
        let bus = provider
            .bus_controller()
            .ok_or(AttachError::InvalidController)?;

        if descriptor.controller.as_str() != provider.controller_name() {
            warn!(
                "{} names controller {} but is attached to {}",
                child.name,
                descriptor.controller,
                provider.controller_name()
            );
        }

        let router = match &descriptor.interrupt {
            InterruptSource::Gpio(gpio) => {
                let controller = provider
                    .gpio_controller(gpio.controller.as_str())
                    .ok_or_else(|| AttachError::GpioControllerMissing(gpio.controller.to_string()))?;
                InterruptRouter::gpio(&controller, gpio.pin, gpio.trigger)
            }
            InterruptSource::Platform(irq) => {
                let controller = provider
                    .interrupt_controller()
                    .ok_or(AttachError::InterruptControllerMissing)?;
                InterruptRouter::platform(&controller, irq.line)
            }
            InterruptSource::None => {
                debug!("{} has no interrupt, poll only", child.name);
                InterruptRouter::none()
            }
        };

        let target = BusTarget {
            address: descriptor.address,
            speed: descriptor.speed.unwrap_or(self.config.default_speed),
        };
        let serializer = TransactionSerializer::spawn(&bus, target, &self.config)?;

        Ok(Binding {
            descriptor,
            router,
            serializer,
        })
    }

    /// Publish the device API. Resolution is not repeated.
    ///
    /// Publication is advisory: it is reported by [`DeviceNub::is_published`]
    /// for discovery, but the device API is gated only on the nub being
    /// active, so calls made before `start` or after `stop` still succeed
    /// while the nub is attached.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::NotAttached`] unless the nub is active.
    pub fn start(&self) -> Result<(), AttachError> {
        let mut inner = self.lock();
        if inner.state != NubState::Active {
            return Err(AttachError::NotAttached);
        }
        inner.published = true;
        info!("{} started", inner.device.as_deref().unwrap_or("device"));
        Ok(())
    }

    /// Withdraw the device API. Any still-bound interrupt handler is disabled
    /// and unregistered before this returns.
    pub fn stop(&self) {
        let router = {
            let mut inner = self.lock();
            inner.published = false;
            inner.router.clone()
        };
        if let Some(router) = router {
            if router.quiesce() {
                info!("interrupt handler released on stop");
            }
        }
    }

    /// Tear the binding down and return to [`NubState::Unattached`].
    /// A nub that is not active is left alone.
    pub fn detach(&self) {
        let (router, serializer) = {
            let mut inner = self.lock();
            match inner.state {
                NubState::Active => {}
                NubState::Unattached | NubState::Detaching => return,
                NubState::Attaching => {
                    warn!("detach while attaching ignored");
                    return;
                }
            }
            inner.state = NubState::Detaching;
            inner.published = false;
            (inner.router.take(), inner.serializer.take())
        };

        if let Some(router) = router {
            router.quiesce();
        }
        if let Some(serializer) = serializer {
            serializer.shutdown();
        }

        let mut inner = self.lock();
        inner.descriptor = None;
        inner.state = NubState::Unattached;
        info!(
            "{} detached",
            inner.device.take().as_deref().unwrap_or("device")
        );
    }

    fn router(&self) -> Result<Arc<InterruptRouter>, InterruptError> {
        let inner = self.lock();
        match (inner.state, &inner.router) {
            (NubState::Active, Some(router)) => Ok(Arc::clone(router)),
            _ => Err(InterruptError::NotAttached),
        }
    }

    fn serializer(&self) -> Result<SerializerHandle, TransactionError> {
        let inner = self.lock();
        match (inner.state, &inner.serializer) {
            (NubState::Active, Some(serializer)) => Ok(serializer.handle()),
            _ => Err(TransactionError::NotAttached),
        }
    }

    /// # Errors
    ///
    /// See [`InterruptRouter::enable`].
    pub fn enable_interrupt(&self, source: usize) -> Result<(), InterruptError> {
        self.router()?.enable(source)
    }

    /// # Errors
    ///
    /// See [`InterruptRouter::disable`].
    pub fn disable_interrupt(&self, source: usize) -> Result<(), InterruptError> {
        self.router()?.disable(source)
    }

    /// # Errors
    ///
    /// See [`InterruptRouter::interrupt_type`].
    pub fn interrupt_type(&self, source: usize) -> Result<TriggerMode, InterruptError> {
        self.router()?.interrupt_type(source)
    }

    /// # Errors
    ///
    /// See [`InterruptRouter::register`].
    pub fn register_interrupt(
        &self,
        source: usize,
        handler: Arc<dyn InterruptHandler>,
    ) -> Result<(), InterruptError> {
        self.router()?.register(source, handler)
    }

    /// # Errors
    ///
    /// See [`InterruptRouter::unregister`].
    pub fn unregister_interrupt(&self, source: usize) -> Result<(), InterruptError> {
        self.router()?.unregister(source)
    }

    /// Interrupts dropped because the source was disabled or unbound.
    #[must_use]
    pub fn spurious_interrupts(&self) -> usize {
        self.router().map_or(0, |router| router.spurious_count())
    }

    /// Fill `buffer` from the device.
    ///
    /// # Errors
    ///
    /// See [`SerializerHandle::submit`].
    pub fn read_i2c(&self, buffer: &mut [u8]) -> Result<(), TransactionError> {
        self.serializer()?.read(buffer)
    }

    /// # Errors
    ///
    /// See [`SerializerHandle::submit`].
    pub fn write_i2c(&self, data: &[u8]) -> Result<(), TransactionError> {
        self.serializer()?.write(data)
    }

    /// Write `data`, then fill `buffer`, without releasing the bus between
    /// the two.
    ///
    /// # Errors
    ///
    /// See [`SerializerHandle::submit`].
    pub fn write_read_i2c(&self, data: &[u8], buffer: &mut [u8]) -> Result<(), TransactionError> {
        self.serializer()?.write_read(data, buffer)
    }

    fn transaction(
        &self,
        address: DeviceAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), TransactionError> {
        let serializer = self.serializer()?;
        if serializer.target().address != address {
            return Err(TransactionError::AddressMismatch(address.value));
        }
        serializer.transaction(operations)
    }

    /// embedded-hal view of the device, for drivers written against
    /// [`embedded_hal::i2c::I2c`]. Only the device's own address is accepted.
    #[must_use]
    pub fn i2c(&self) -> NubI2c<'_> {
        NubI2c { nub: self }
    }
}

impl Drop for DeviceNub {
    fn drop(&mut self) {
        self.detach();
    }
}

pub struct NubI2c<'a> {
    nub: &'a DeviceNub,
}

impl ErrorType for NubI2c<'_> {
    type Error = TransactionError;
}

impl I2c<SevenBitAddress> for NubI2c<'_> {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.nub
            .transaction(DeviceAddress::seven_bit(address), operations)
    }
}

impl I2c<TenBitAddress> for NubI2c<'_> {
    fn transaction(
        &mut self,
        address: TenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.nub
            .transaction(DeviceAddress::ten_bit(address), operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acpi::resource::tests::APIC_CRS;
    use crate::acpi::{ResourceDescriptor, ResourceRecord};
    use crate::common::{I2cSpeed, NubConfigBuilder};
    use crate::error::ResolutionError;
    use crate::tests::mock::{
        gpio_int, platform_irq, serial_bus, touchpad, BusEvent, MockBus, MockGpio, MockIntc,
        MockProvider, GPIO_CONTROLLER_NAME,
    };
    use fugit::HertzU32;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    struct Rig {
        bus: Arc<MockBus>,
        gpio: Arc<MockGpio>,
        provider: MockProvider,
    }

    fn rig_with_bus(bus: Arc<MockBus>) -> Rig {
        let gpio = MockGpio::new(&[(12, TriggerMode::Edge)]);
        let provider = MockProvider::new(&bus).with_gpio(GPIO_CONTROLLER_NAME, &gpio);
        Rig {
            bus,
            gpio,
            provider,
        }
    }

    fn rig() -> Rig {
        rig_with_bus(MockBus::new())
    }

    fn attached(rig: &Rig) -> DeviceNub {
        let _ = env_logger::builder().is_test(true).try_init();
        let nub = DeviceNub::default();
        nub.attach(&rig.provider, &touchpad()).unwrap();
        nub
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn InterruptHandler>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handler: Arc<dyn InterruptHandler> = Arc::new(move |_source: usize| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn touchpad_attaches_with_edge_gpio_interrupt() {
        let rig = rig();
        let nub = attached(&rig);

        assert_eq!(nub.state(), NubState::Active);
        let descriptor = nub.descriptor().unwrap();
        assert_eq!(descriptor.address, DeviceAddress::seven_bit(0x2C));
        assert_eq!(nub.interrupt_type(0), Ok(TriggerMode::Edge));

        // Enabling ahead of registration is accepted.
        nub.enable_interrupt(0).unwrap();
        assert!(!rig.gpio.fire(12));

        let (count, handler) = counter();
        nub.register_interrupt(0, handler).unwrap();
        assert!(rig.gpio.fire(12));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        nub.disable_interrupt(0).unwrap();
        assert!(!rig.gpio.fire(12));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transactions_carry_address_and_speed() {
        let rig = rig();
        let nub = attached(&rig);

        nub.write_i2c(&[0x01, 0x02]).unwrap();
        let target = rig.bus.targets()[0];
        assert_eq!(target.address, DeviceAddress::seven_bit(0x2C));
        assert_eq!(target.speed, I2cSpeed::Fast);
    }

    #[test]
    fn zero_length_write_is_invalid() {
        let rig = rig();
        let nub = attached(&rig);
        assert_eq!(nub.write_i2c(&[]), Err(TransactionError::InvalidLength));
        assert_eq!(rig.bus.transaction_count(), 0);
    }

    #[test]
    fn simultaneous_readers_get_their_own_bytes() {
        let rig = rig_with_bus(MockBus::with_delay(Duration::from_millis(2)));
        let nub = attached(&rig);
        let barrier = Barrier::new(2);

        let (first, second) = thread::scope(|s| {
            let read = || {
                barrier.wait();
                let mut buffer = [0u8; 8];
                nub.read_i2c(&mut buffer).unwrap();
                buffer
            };
            let a = s.spawn(read);
            let b = s.spawn(read);
            (a.join().unwrap(), b.join().unwrap())
        });

        assert!(first.iter().all(|&b| b == first[0]));
        assert!(second.iter().all(|&b| b == second[0]));
        assert_ne!(first[0], second[0]);
        assert!(!rig.bus.overlapped());
    }

    #[test]
    fn mixed_concurrent_traffic_never_interleaves() {
        const CALLERS: usize = 4;

        let rig = rig_with_bus(MockBus::with_delay(Duration::from_millis(1)));
        let nub = attached(&rig);
        let barrier = Barrier::new(CALLERS);

        thread::scope(|s| {
            for caller in 0..CALLERS {
                let nub = &nub;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    for round in 0..4u8 {
                        if caller % 2 == 0 {
                            let mut buffer = [0u8; 2];
                            nub.write_read_i2c(&[round], &mut buffer).unwrap();
                        } else {
                            nub.write_i2c(&[round, caller as u8]).unwrap();
                        }
                    }
                });
            }
        });

        assert!(!rig.bus.overlapped());
        let events = rig.bus.events();
        // Every read directly follows the write of the same transaction.
        for (i, event) in events.iter().enumerate() {
            if let BusEvent::Read { txn, .. } = event {
                assert!(i > 0);
                assert!(matches!(events[i - 1], BusEvent::Write { .. }));
                assert_eq!(events[i - 1].txn(), *txn);
            }
        }
        assert_eq!(rig.bus.transaction_count(), CALLERS * 4);
    }

    #[test]
    fn interrupt_api_misuse_is_reported() {
        let rig = rig();
        let nub = attached(&rig);

        assert_eq!(nub.unregister_interrupt(0), Err(InterruptError::NoInterrupt));
        nub.register_interrupt(0, counter().1).unwrap();
        assert_eq!(
            nub.register_interrupt(0, counter().1),
            Err(InterruptError::AlreadyRegistered)
        );
        assert_eq!(
            nub.register_interrupt(1, counter().1),
            Err(InterruptError::InvalidSource(1))
        );
        assert_eq!(nub.enable_interrupt(1), Err(InterruptError::NoInterrupt));
        assert_eq!(nub.disable_interrupt(5), Err(InterruptError::NoInterrupt));
        nub.unregister_interrupt(0).unwrap();
        assert!(!rig.gpio.has_handler(12));
    }

    #[test]
    fn stop_releases_bound_handler() {
        let rig = rig();
        let nub = attached(&rig);
        nub.start().unwrap();
        assert!(nub.is_published());

        let (count, handler) = counter();
        nub.register_interrupt(0, handler).unwrap();
        nub.enable_interrupt(0).unwrap();

        nub.stop();
        assert!(!nub.is_published());
        assert!(!rig.gpio.has_handler(12));
        assert!(rig.gpio.is_masked(12));
        assert!(!rig.gpio.fire(12));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        // Still attached; the driver may register again after a restart.
        assert_eq!(nub.state(), NubState::Active);
        nub.register_interrupt(0, counter().1).unwrap();
    }

    #[test]
    fn detach_is_idempotent() {
        let rig = rig();
        let nub = attached(&rig);
        nub.register_interrupt(0, counter().1).unwrap();

        nub.detach();
        assert_eq!(nub.state(), NubState::Unattached);
        assert!(nub.descriptor().is_none());
        assert!(!rig.gpio.has_handler(12));

        let calls = rig.gpio.calls().len();
        nub.detach();
        assert_eq!(nub.state(), NubState::Unattached);
        assert_eq!(rig.gpio.calls().len(), calls);

        assert_eq!(nub.read_i2c(&mut [0; 1]), Err(TransactionError::NotAttached));
        assert_eq!(nub.enable_interrupt(0), Err(InterruptError::NotAttached));
        assert_eq!(nub.start(), Err(AttachError::NotAttached));
    }

    #[test]
    fn nub_can_attach_again_after_detach() {
        let rig = rig();
        let nub = attached(&rig);
        assert_eq!(
            nub.attach(&rig.provider, &touchpad()),
            Err(AttachError::AlreadyAttached)
        );
        nub.detach();
        nub.attach(&rig.provider, &touchpad()).unwrap();
        nub.write_i2c(&[0x01]).unwrap();
    }

    #[test]
    fn ambiguous_wiring_fails_attach_and_reverts() {
        let rig = rig();
        let nub = DeviceNub::default();
        let ambiguous = PlatformDevice::new(
            "TPD1",
            ResourceRecord::new()
                .with(serial_bus(0x2C, false))
                .with(gpio_int(12, TriggerMode::Edge))
                .with(platform_irq(0x20, TriggerMode::Level)),
        );

        assert_eq!(
            nub.attach(&rig.provider, &ambiguous),
            Err(AttachError::Resolution(ResolutionError::AmbiguousInterrupt))
        );
        assert_eq!(nub.state(), NubState::Unattached);
        assert!(!nub.is_published());
        nub.attach(&rig.provider, &touchpad()).unwrap();
    }

    #[test]
    fn missing_collaborators_fail_attach() {
        let bus = MockBus::new();
        let nub = DeviceNub::default();

        let no_gpio = MockProvider::new(&bus);
        assert_eq!(
            nub.attach(&no_gpio, &touchpad()),
            Err(AttachError::GpioControllerMissing(String::from(
                GPIO_CONTROLLER_NAME
            )))
        );

        let mut no_bus = MockProvider::new(&bus);
        no_bus.bus = None;
        assert_eq!(
            nub.attach(&no_bus, &touchpad()),
            Err(AttachError::InvalidController)
        );

        let screen = PlatformDevice::new("TSC0", ResourceRecord::from_crs(&APIC_CRS).unwrap());
        assert_eq!(
            nub.attach(&no_gpio, &screen),
            Err(AttachError::InterruptControllerMissing)
        );
        assert_eq!(nub.state(), NubState::Unattached);
    }

    #[test]
    fn platform_wired_device_routes_to_interrupt_controller() {
        let bus = MockBus::new();
        let intc = MockIntc::new(&[(0x5F, TriggerMode::Level)]);
        let provider = MockProvider::new(&bus).with_intc(&intc);
        let nub = DeviceNub::default();
        let screen = PlatformDevice::new("TSC0", ResourceRecord::from_crs(&APIC_CRS).unwrap());
        nub.attach(&provider, &screen).unwrap();

        assert_eq!(nub.interrupt_type(0), Ok(TriggerMode::Level));
        let (count, handler) = counter();
        nub.register_interrupt(0, handler).unwrap();
        nub.enable_interrupt(0).unwrap();
        assert!(intc.fire(0x5F));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        nub.disable_interrupt(0).unwrap();
        assert!(intc.force_fire(0x5F));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(nub.spurious_interrupts(), 1);

        nub.detach();
        assert!(!intc.has_handler(0x5F));
    }

    #[test]
    fn poll_only_device_reports_no_interrupt() {
        let bus = MockBus::new();
        let provider = MockProvider::new(&bus);
        let nub = DeviceNub::new(NubConfigBuilder::new().default_speed(I2cSpeed::FastPlus).build());
        let eeprom = PlatformDevice::new("EEP0", ResourceRecord::new().with(serial_bus(0x50, false)));
        nub.attach(&provider, &eeprom).unwrap();
        assert_eq!(nub.descriptor().unwrap().speed, Some(I2cSpeed::Fast));

        assert_eq!(nub.interrupt_type(0), Err(InterruptError::NoInterrupt));
        assert_eq!(nub.enable_interrupt(0), Err(InterruptError::NoInterrupt));
        nub.write_i2c(&[0x00]).unwrap();
    }

    #[test]
    fn undescribed_speed_falls_back_to_configured_default() {
        let rig = rig();
        let nub = DeviceNub::new(NubConfigBuilder::new().default_speed(I2cSpeed::FastPlus).build());
        let mut bus = serial_bus(0x50, false);
        if let ResourceDescriptor::I2cSerialBus(serial) = &mut bus {
            serial.connection_speed = HertzU32::from_raw(0);
        }
        let eeprom = PlatformDevice::new("EEP1", ResourceRecord::new().with(bus));
        nub.attach(&rig.provider, &eeprom).unwrap();
        assert_eq!(nub.descriptor().unwrap().speed, None);

        nub.write_i2c(&[0x00]).unwrap();
        let used = rig.bus.targets()[0].speed;
        assert_eq!(used, nub.config().default_speed);
        assert_eq!(used.frequency(), HertzU32::from_raw(1_000_000));
    }

    #[test]
    fn device_api_is_served_whether_or_not_published() {
        let rig = rig();
        let nub = attached(&rig);
        assert!(!nub.is_published());
        nub.write_i2c(&[0x01]).unwrap();

        nub.start().unwrap();
        assert!(nub.is_published());
        nub.stop();
        assert!(!nub.is_published());
        nub.write_i2c(&[0x02]).unwrap();
        assert_eq!(rig.bus.transaction_count(), 2);

        nub.detach();
        assert_eq!(nub.start(), Err(AttachError::NotAttached));
        assert_eq!(nub.write_i2c(&[0x03]), Err(TransactionError::NotAttached));
    }

    #[test]
    fn vanished_controllers_are_reported() {
        let Rig {
            bus,
            gpio,
            provider,
        } = rig();
        let nub = DeviceNub::default();
        nub.attach(&provider, &touchpad()).unwrap();
        drop(provider);
        drop(bus);
        drop(gpio);

        assert_eq!(nub.write_i2c(&[0x01]), Err(TransactionError::ControllerGone));
        assert_eq!(nub.enable_interrupt(0), Err(InterruptError::ControllerGone));
        nub.detach();
        assert_eq!(nub.state(), NubState::Unattached);
    }

    #[test]
    fn embedded_hal_handle_targets_only_this_device() {
        let rig = rig();
        let nub = attached(&rig);
        let mut i2c = nub.i2c();

        let mut buffer = [0u8; 2];
        i2c.write_read(0x2C_u8, &[0x10], &mut buffer).unwrap();
        assert_eq!(buffer, [crate::tests::mock::read_byte(0); 2]);
        assert_eq!(
            i2c.write(0x2D_u8, &[0x10]),
            Err(TransactionError::AddressMismatch(0x2D))
        );
        // Same value, wrong width.
        assert_eq!(
            i2c.write(0x2C_u16, &[0x10]),
            Err(TransactionError::AddressMismatch(0x2C))
        );
        assert_eq!(rig.bus.transaction_count(), 1);
    }

    #[test]
    fn ten_bit_device_is_addressed_with_ten_bits() {
        let rig = rig();
        let nub = DeviceNub::default();
        let device = PlatformDevice::new(
            "TPD2",
            ResourceRecord::new()
                .with(serial_bus(0x2A5, true))
                .with(gpio_int(12, TriggerMode::Edge)),
        );
        nub.attach(&rig.provider, &device).unwrap();

        nub.i2c().write(0x2A5_u16, &[0x01]).unwrap();
        assert_eq!(
            rig.bus.targets()[0].address,
            DeviceAddress::ten_bit(0x2A5)
        );
    }

    #[test]
    fn dropping_the_nub_releases_its_handler() {
        let rig = rig();
        let nub = attached(&rig);
        nub.register_interrupt(0, counter().1).unwrap();
        drop(nub);
        assert!(!rig.gpio.has_handler(12));
    }
}
