// Licensed under the Apache-2.0 license

//! # Transaction Serializer
//!
//! Every bus access of one device is funneled through a single worker thread:
//!
//! ```text
//! caller A ──┐
//! caller B ──┼──► sync_channel (FIFO) ──► worker ──► BusController::perform_transaction
//! caller C ──┘        ▲                      │
//!                     └──── reply channel ◄──┘  (caller blocks until its own reply)
//! ```
//!
//! A request carries every phase of its transaction, so the phases of a
//! write-then-read reach the controller in one `perform_transaction` call and
//! nothing can be scheduled between them. Requests are executed strictly in
//! the order the channel accepted them.
//!
//! The serializer never reports busy on its own: a full queue blocks the
//! submitting caller instead. `TransactionError::BusBusy` only ever comes
//! from the controller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use embedded_hal::i2c::Operation;
use log::{debug, error, trace};

use crate::common::NubConfig;
use crate::error::{AttachError, TransactionError};
use crate::traits::{BusController, BusTarget};

/// One phase of a transaction. Read phases own the buffer the worker fills;
/// the submitting caller copies it out on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Write(Vec<u8>),
    Read(Vec<u8>),
}

impl Phase {
    fn len(&self) -> usize {
        match self {
            Phase::Write(data) | Phase::Read(data) => data.len(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    Read,
    Write,
    WriteRead,
    /// Any other phase sequence, as issued through the embedded-hal surface.
    Sequence,
}

/// A bus operation in flight between a caller and the worker.
#[derive(Debug)]
pub struct PendingTransaction {
    kind: TransactionKind,
    phases: Vec<Phase>,
    status: Option<Result<(), TransactionError>>,
}

impl PendingTransaction {
    #[must_use]
    pub fn read(len: usize) -> Self {
        Self::from_phases(vec![Phase::Read(vec![0; len])])
    }

    #[must_use]
    pub fn write(data: &[u8]) -> Self {
        Self::from_phases(vec![Phase::Write(data.to_vec())])
    }

    #[must_use]
    pub fn write_read(data: &[u8], read_len: usize) -> Self {
        Self::from_phases(vec![
            Phase::Write(data.to_vec()),
            Phase::Read(vec![0; read_len]),
        ])
    }

    /// Snapshot of `operations`: write payloads are copied, read phases are
    /// sized after their buffers.
    #[must_use]
    pub fn from_operations(operations: &[Operation<'_>]) -> Self {
        Self::from_phases(
            operations
                .iter()
                .map(|op| match op {
                    Operation::Write(data) => Phase::Write(data.to_vec()),
                    Operation::Read(buffer) => Phase::Read(vec![0; buffer.len()]),
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn from_phases(phases: Vec<Phase>) -> Self {
        let kind = match phases.as_slice() {
            [Phase::Read(_)] => TransactionKind::Read,
            [Phase::Write(_)] => TransactionKind::Write,
            [Phase::Write(_), Phase::Read(_)] => TransactionKind::WriteRead,
            _ => TransactionKind::Sequence,
        };
        Self {
            kind,
            phases,
            status: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// `None` until the worker has executed the transaction.
    #[must_use]
    pub fn status(&self) -> Option<Result<(), TransactionError>> {
        self.status
    }

    /// Data of the read phases, in phase order.
    pub fn into_reads(self) -> impl Iterator<Item = Vec<u8>> {
        self.phases.into_iter().filter_map(|phase| match phase {
            Phase::Read(data) => Some(data),
            Phase::Write(_) => None,
        })
    }

    fn validate(&self, max_transfer_len: usize) -> Result<(), TransactionError> {
        if self.phases.is_empty()
            || self
                .phases
                .iter()
                .any(|phase| phase.len() == 0 || phase.len() > max_transfer_len)
        {
            return Err(TransactionError::InvalidLength);
        }
        Ok(())
    }

    fn execute(&mut self, bus: &Weak<dyn BusController>, target: &BusTarget) {
        let Some(bus) = bus.upgrade() else {
            self.status = Some(Err(TransactionError::ControllerGone));
            return;
        };

        let result = {
            let mut operations: Vec<Operation<'_>> = self
                .phases
                .iter_mut()
                .map(|phase| match phase {
                    Phase::Write(data) => Operation::Write(data.as_slice()),
                    Phase::Read(data) => Operation::Read(data.as_mut_slice()),
                })
                .collect();
            bus.perform_transaction(target, &mut operations)
        };

        trace!("{:?} to {} -> {result:?}", self.kind, target.address);
        self.status = Some(result.map_err(TransactionError::from));
    }

    fn into_result(self) -> Result<Self, TransactionError> {
        match self.status {
            Some(Ok(())) => Ok(self),
            Some(Err(err)) => Err(err),
            None => Err(TransactionError::NotAttached),
        }
    }
}

struct Request {
    transaction: PendingTransaction,
    reply: SyncSender<PendingTransaction>,
}

fn run(requests: Receiver<Request>, bus: Weak<dyn BusController>, target: BusTarget) {
    debug!(
        "serializer for {} running at {} Hz",
        target.address,
        target.speed.frequency().raw()
    );
    for Request {
        mut transaction,
        reply,
    } in requests
    {
        transaction.execute(&bus, &target);
        if reply.send(transaction).is_err() {
            debug!("caller left before completion");
        }
    }
    debug!("serializer for {} stopped", target.address);
}

/// Queue entry point shared by every handle. `None` once shut down.
type RequestQueue = Arc<Mutex<Option<SyncSender<Request>>>>;

/// Submission side of a serializer. Cheap to clone; every clone feeds the
/// same worker.
#[derive(Clone)]
pub struct SerializerHandle {
    requests: RequestQueue,
    accepted: Arc<AtomicUsize>,
    worker: ThreadId,
    bus: Weak<dyn BusController>,
    target: BusTarget,
    max_transfer_len: usize,
}

impl SerializerHandle {
    #[must_use]
    pub fn target(&self) -> BusTarget {
        self.target
    }

    /// Requests the queue has accepted so far, across every handle. Requests
    /// execute in acceptance order.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Queue `transaction` and block until the worker has executed it.
    ///
    /// Called from the worker thread itself, the transaction runs inline.
    ///
    /// # Errors
    ///
    /// - [`TransactionError::InvalidLength`] if there are no phases or a
    ///   phase is empty or longer than the configured maximum. Nothing is
    ///   queued.
    /// - [`TransactionError::NotAttached`] if the worker has shut down.
    /// - [`TransactionError::ControllerGone`] if the bus controller was torn
    ///   down.
    /// - Any bus failure reported by the controller.
    pub fn submit(
        &self,
        mut transaction: PendingTransaction,
    ) -> Result<PendingTransaction, TransactionError> {
        transaction.validate(self.max_transfer_len)?;

        if thread::current().id() == self.worker {
            transaction.execute(&self.bus, &self.target);
            return transaction.into_result();
        }

        let (reply, completion) = mpsc::sync_channel(1);
        {
            let requests = self
                .requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .ok_or(TransactionError::NotAttached)?;
            requests
                .send(Request { transaction, reply })
                .map_err(|_| TransactionError::NotAttached)?;
        }
        let position = self.accepted.fetch_add(1, Ordering::SeqCst);
        trace!("request {position} queued for {}", self.target.address);
        completion
            .recv()
            .map_err(|_| TransactionError::NotAttached)?
            .into_result()
    }

    /// # Errors
    ///
    /// See [`SerializerHandle::submit`].
    pub fn read(&self, buffer: &mut [u8]) -> Result<(), TransactionError> {
        let done = self.submit(PendingTransaction::read(buffer.len()))?;
        if let Some(data) = done.into_reads().next() {
            buffer.copy_from_slice(&data);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// See [`SerializerHandle::submit`].
    pub fn write(&self, data: &[u8]) -> Result<(), TransactionError> {
        self.submit(PendingTransaction::write(data)).map(drop)
    }

    /// Write then read with a repeated start, as one atomic transaction.
    ///
    /// # Errors
    ///
    /// See [`SerializerHandle::submit`].
    pub fn write_read(&self, data: &[u8], buffer: &mut [u8]) -> Result<(), TransactionError> {
        let done = self.submit(PendingTransaction::write_read(data, buffer.len()))?;
        if let Some(read) = done.into_reads().next() {
            buffer.copy_from_slice(&read);
        }
        Ok(())
    }

    /// Execute `operations` as one atomic transaction, filling their read
    /// buffers.
    ///
    /// # Errors
    ///
    /// See [`SerializerHandle::submit`].
    pub fn transaction(&self, operations: &mut [Operation<'_>]) -> Result<(), TransactionError> {
        let done = self.submit(PendingTransaction::from_operations(operations))?;
        let buffers = operations.iter_mut().filter_map(|op| match op {
            Operation::Read(buffer) => Some(buffer),
            Operation::Write(_) => None,
        });
        for (buffer, data) in buffers.zip(done.into_reads()) {
            buffer.copy_from_slice(&data);
        }
        Ok(())
    }
}

/// Owner of the worker thread.
pub struct TransactionSerializer {
    handle: SerializerHandle,
    worker: JoinHandle<()>,
}

impl TransactionSerializer {
    /// Start the worker for `target` on `bus`. Only a weak reference to the
    /// bus is kept.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::WorkerSpawn`] if the thread cannot be created.
    pub fn spawn(
        bus: &Arc<dyn BusController>,
        target: BusTarget,
        config: &NubConfig,
    ) -> Result<Self, AttachError> {
        let (requests, queue) = mpsc::sync_channel(config.queue_depth);
        let weak = Arc::downgrade(bus);
        let worker_bus = weak.clone();
        let worker = thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || run(queue, worker_bus, target))
            .map_err(|e| AttachError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            handle: SerializerHandle {
                requests: Arc::new(Mutex::new(Some(requests))),
                accepted: Arc::new(AtomicUsize::new(0)),
                worker: worker.thread().id(),
                bus: weak,
                target,
                max_transfer_len: config.max_transfer_len,
            },
            worker,
        })
    }

    #[must_use]
    pub fn handle(&self) -> SerializerHandle {
        self.handle.clone()
    }

    /// Close the queue and wait for the worker to drain it.
    ///
    /// Requests already queued still execute; later submissions through any
    /// handle fail with [`TransactionError::NotAttached`].
    pub fn shutdown(self) {
        let Self { handle, worker } = self;
        handle
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if worker.thread().id() == thread::current().id() {
            // Shutting down from inside a transaction: the loop ends on its own.
            return;
        }
        if worker.join().is_err() {
            error!("serializer worker panicked");
        }
    }
}
