// Licensed under the Apache-2.0 license

//! Adapter exposing any embedded-hal I2C master as a [`BusController`].

use std::sync::{Mutex, PoisonError};

use embedded_hal::i2c::{Error as _, I2c, Operation, SevenBitAddress};
use log::trace;

use crate::error::BusError;
use crate::traits::{BusController, BusTarget};

/// A 7-bit embedded-hal bus shared by every nub on the controller.
///
/// The bus is clocked by whoever configured `T`; the per-transaction speed
/// in [`BusTarget`] is not applied here.
pub struct HalBus<T> {
    bus: Mutex<T>,
}

impl<T> HalBus<T>
where
    T: I2c<SevenBitAddress> + Send,
{
    pub fn new(bus: T) -> Self {
        Self {
            bus: Mutex::new(bus),
        }
    }

    pub fn into_inner(self) -> T {
        self.bus.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> BusController for HalBus<T>
where
    T: I2c<SevenBitAddress> + Send,
{
    fn perform_transaction(
        &self,
        target: &BusTarget,
        phases: &mut [Operation<'_>],
    ) -> Result<(), BusError> {
        if target.address.is_ten_bit() {
            return Err(BusError::AddressModeUnsupported);
        }
        let address = u8::try_from(target.address.value).map_err(|_| BusError::Other)?;

        trace!("{} phase(s) to {}", phases.len(), target.address);
        self.bus
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transaction(address, phases)
            .map_err(|e| BusError::from(e.kind()))
    }
}
