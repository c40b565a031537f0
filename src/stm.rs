// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The engine: global clock, transaction ids, and the retry loop that turns
//! conflicts into fresh attempts.

use crate::{
    atom::Atom,
    breaker::BusyBreaker,
    clock::VersionClock,
    error::TxError,
    transaction::Transaction,
};
use lazy_static::lazy_static;
use log::*;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

/// How the engine reacts to an aborted attempt.
pub enum Strategy {
    /// Retry until the transaction commits. The default: conflicts are the
    /// engine's own control flow, not something the caller sees.
    Retry,

    /// Allow this many consecutive aborted attempts; the next abort yields
    /// the terminal [`TxError::RetriesExceeded`].
    Bounded(usize),

    /// Retry with an exponential spin backoff between attempts. A tripped
    /// breaker is terminal.
    RetryWithBreaker(BusyBreaker),
}

/// Result of a successfully committed transaction.
pub struct TxResult<U> {
    /// Id of the transaction that committed.
    pub tx_id: usize,

    /// Return value of the transactional closure.
    pub res: U,

    /// Transaction-scoped allocations that survived to commit, now owned by
    /// the caller.
    pub allocations: Vec<Box<[u8]>>,
}

/// A transactional memory engine. Cheap to clone; clones share the clock and
/// the bookkeeping counters. Most programs use one engine, either a local
/// instance or the process-global one behind [`init`].
#[derive(Clone, Default)]
pub struct Stm {
    clock: VersionClock,
    transaction_ids: Arc<AtomicUsize>,
    residency: Arc<AtomicUsize>,
}

impl Stm {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current global version, mostly for diagnostics.
    pub fn clock(&self) -> u64 {
        self.clock.version()
    }

    /// Outstanding transaction-scoped allocation bytes across all live
    /// transactions of this engine. Zero whenever no transaction is running.
    pub fn allocated_bytes(&self) -> usize {
        self.residency.load(Ordering::SeqCst)
    }

    /// Wraps a copy of `value` as a fresh atom. Must be called outside any
    /// transaction touching the same logical cell.
    pub fn atomize<T>(&self, value: T) -> Atom
    where
        T: Copy,
    {
        Atom::atomize(value)
    }

    /// Byte-level counterpart of [`Stm::atomize`].
    pub fn atomize_bytes(&self, bytes: &[u8]) -> Atom {
        Atom::atomize_bytes(bytes)
    }

    /// Runs a read-write transaction until it commits.
    ///
    /// Each attempt gets a fresh [`Transaction`] with a new read-version
    /// sample; conflict errors forwarded out of the closure (or hit during
    /// commit) abort the attempt, roll back its allocation log and retry.
    /// Fatal errors reach the caller unchanged.
    pub fn read_write<F, U>(&self, name: &str, transaction: F) -> Result<TxResult<U>, TxError>
    where
        F: Fn(&mut Transaction) -> Result<U, TxError>,
    {
        self.run(name, transaction, Strategy::Retry, false)
    }

    /// [`Stm::read_write`] with an explicit retry strategy.
    pub fn read_write_with_strategy<F, U>(
        &self,
        name: &str,
        transaction: F,
        strategy: Strategy,
    ) -> Result<TxResult<U>, TxError>
    where
        F: Fn(&mut Transaction) -> Result<U, TxError>,
    {
        self.run(name, transaction, strategy, false)
    }

    /// Runs a read-only transaction. Reads validate incrementally against the
    /// read version, and the end of the block revalidates the read set as one
    /// snapshot; no lock is held at the end and the clock is not advanced
    /// beyond the begin sample. Staging a write is the fatal
    /// [`TxError::WriteInReadOnly`].
    pub fn read_only<F, U>(&self, name: &str, transaction: F) -> Result<TxResult<U>, TxError>
    where
        F: Fn(&mut Transaction) -> Result<U, TxError>,
    {
        self.run(name, transaction, Strategy::Retry, true)
    }

    /// [`Stm::read_only`] with an explicit retry strategy.
    pub fn read_only_with_strategy<F, U>(
        &self,
        name: &str,
        transaction: F,
        strategy: Strategy,
    ) -> Result<TxResult<U>, TxError>
    where
        F: Fn(&mut Transaction) -> Result<U, TxError>,
    {
        self.run(name, transaction, strategy, true)
    }

    fn next_tx_id(&self) -> usize {
        self.transaction_ids.fetch_add(1, Ordering::SeqCst)
    }

    fn run<F, U>(
        &self,
        name: &str,
        transaction: F,
        strategy: Strategy,
        read_only: bool,
    ) -> Result<TxResult<U>, TxError>
    where
        F: Fn(&mut Transaction) -> Result<U, TxError>,
    {
        let tx_id = self.next_tx_id();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let rv = self.clock.sample_and_advance();
            let mut tx = Transaction::new(name, tx_id, rv, attempt, read_only, self.residency.clone());

            info!(
                "TX({}, '{}'): attempt {} at read version {}",
                tx_id, name, attempt, rv
            );

            let aborted = match transaction(&mut tx) {
                Ok(res) => match tx.commit(&self.clock) {
                    Ok(()) => {
                        return Ok(TxResult {
                            tx_id,
                            res,
                            allocations: tx.into_allocations(),
                        })
                    }
                    Err(e) => e,
                },
                Err(e) => e,
            };

            if !aborted.is_conflict() {
                return Err(aborted);
            }

            info!("TX({}, '{}'): aborted ({}), retrying", tx_id, name, aborted);

            match &strategy {
                Strategy::Retry => {}
                Strategy::Bounded(cap) => {
                    if attempt > *cap {
                        return Err(TxError::RetriesExceeded(*cap));
                    }
                }
                Strategy::RetryWithBreaker(breaker) => {
                    // waits for a concurrent committer before the next try;
                    // a tripped breaker bounds the whole loop
                    breaker.spin()?;
                }
            }
        }
    }
}

lazy_static! {
    static ref GLOBAL: Stm = Stm::default();
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// One-shot initialisation of the process-global engine. Must be called
/// before the first use of [`global`]; calling it twice is fatal.
pub fn init() -> Result<(), TxError> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(TxError::AlreadyInitialized);
    }

    lazy_static::initialize(&GLOBAL);

    Ok(())
}

/// The process-global engine set up by [`init`].
pub fn global() -> Result<&'static Stm, TxError> {
    if !INITIALIZED.load(Ordering::SeqCst) {
        return Err(TxError::Uninitialized);
    }

    Ok(&GLOBAL)
}
