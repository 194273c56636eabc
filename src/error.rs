// Licensed under the Apache-2.0 license

//! Error taxonomy of the nub.
//!
//! - [`ResolutionError`]: the firmware description of the device is unusable.
//!   Fatal to attach.
//! - [`InterruptError`]: misuse of the interrupt API. Returned to the caller.
//! - [`TransactionError`]: a bus-level failure of one transaction. Later
//!   transactions are unaffected.
//! - [`AttachError`]: lifecycle failures, wrapping resolution errors.
//!
//! Collaborators report through [`BusError`] and [`IrqControllerError`].

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("resource template carries no valid I2C slave address")]
    MissingAddress,
    #[error("both a GPIO interrupt and a platform interrupt are described")]
    AmbiguousInterrupt,
    #[error("malformed resource descriptor at offset {offset}")]
    Malformed { offset: usize },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqControllerError {
    #[error("pin or line {0} is not managed by this controller")]
    UnknownSource(u32),
    #[error("controller rejected the request")]
    Rejected,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptError {
    #[error("interrupt source {0} is not provided by this device")]
    InvalidSource(usize),
    #[error("a handler is already registered")]
    AlreadyRegistered,
    #[error("no interrupt is wired or registered for this source")]
    NoInterrupt,
    #[error("interrupt controller is gone")]
    ControllerGone,
    #[error("device is not attached")]
    NotAttached,
    #[error("interrupt controller error: {0}")]
    Controller(#[from] IrqControllerError),
}

/// Failure reported by the bus controller for one transaction.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("bus busy")]
    Busy,
    #[error("transfer length rejected by controller")]
    InvalidLength,
    #[error("no acknowledge ({0:?})")]
    NoAcknowledge(NoAcknowledgeSource),
    #[error("arbitration lost")]
    ArbitrationLoss,
    #[error("bus error")]
    Bus,
    #[error("data overrun")]
    Overrun,
    #[error("addressing mode not supported by controller")]
    AddressModeUnsupported,
    #[error("controller error")]
    Other,
}

impl embedded_hal::i2c::Error for BusError {
    fn kind(&self) -> ErrorKind {
        match *self {
            BusError::NoAcknowledge(source) => ErrorKind::NoAcknowledge(source),
            BusError::ArbitrationLoss => ErrorKind::ArbitrationLoss,
            BusError::Bus => ErrorKind::Bus,
            BusError::Overrun => ErrorKind::Overrun,
            BusError::Busy
            | BusError::InvalidLength
            | BusError::AddressModeUnsupported
            | BusError::Other => ErrorKind::Other,
        }
    }
}

impl From<ErrorKind> for BusError {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NoAcknowledge(source) => BusError::NoAcknowledge(source),
            ErrorKind::ArbitrationLoss => BusError::ArbitrationLoss,
            ErrorKind::Bus => BusError::Bus,
            ErrorKind::Overrun => BusError::Overrun,
            _ => BusError::Other,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    #[error("bus controller reports contention")]
    BusBusy,
    #[error("invalid transfer length")]
    InvalidLength,
    #[error("I/O failure: {0:?}")]
    IoFailure(ErrorKind),
    #[error("address {0:#x} does not belong to this device")]
    AddressMismatch(u16),
    #[error("bus controller is gone")]
    ControllerGone,
    #[error("device is not attached")]
    NotAttached,
}

impl From<BusError> for TransactionError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Busy => TransactionError::BusBusy,
            BusError::InvalidLength => TransactionError::InvalidLength,
            other => TransactionError::IoFailure(embedded_hal::i2c::Error::kind(&other)),
        }
    }
}

impl embedded_hal::i2c::Error for TransactionError {
    fn kind(&self) -> ErrorKind {
        match *self {
            TransactionError::IoFailure(kind) => kind,
            _ => ErrorKind::Other,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    #[error("nub is already attached")]
    AlreadyAttached,
    #[error("nub is not attached")]
    NotAttached,
    #[error("controller provides no usable bus controller")]
    InvalidController,
    #[error("GPIO controller {0} not found")]
    GpioControllerMissing(String),
    #[error("platform interrupt controller not available")]
    InterruptControllerMissing,
    #[error("resource resolution failed: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("failed to spawn work context: {0}")]
    WorkerSpawn(String),
}
