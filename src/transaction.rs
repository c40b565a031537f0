// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! One transaction attempt: the read and write logs, the allocation log, and
//! the two-phase commit that publishes the write set.

use crate::{
    alloc::{AllocLog, TxMem},
    atom::{bytes_of, value_from_bytes, Atom},
    clock::VersionClock,
    error::TxError,
    readset::{ReadOp, ReadSet},
    writeset::{WriteOp, WriteSet},
};
use log::*;
use std::{
    collections::HashMap,
    mem,
    sync::{atomic::AtomicUsize, Arc},
};

/// A single attempt at executing a transactional block.
///
/// Constructed by the engine with a fresh read-version sample; user code
/// interacts with it through the read/write/allocate primitives and gives it
/// back by returning from the closure. Dropping an attempt rolls back its
/// allocation log; buffered writes never touched shared memory in the first
/// place.
pub struct Transaction {
    id: usize,
    name: String,
    rv: u64,
    attempt: usize,
    read_only: bool,
    reads: ReadSet,
    writes: WriteSet,
    allocations: AllocLog,
}

impl Transaction {
    pub(crate) fn new(
        name: &str,
        id: usize,
        rv: u64,
        attempt: usize,
        read_only: bool,
        residency: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            rv,
            attempt,
            read_only,
            reads: ReadSet::default(),
            writes: WriteSet::default(),
            allocations: AllocLog::new(residency),
        }
    }

    /// The name tag given at begin, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// The global clock sample this attempt started from.
    pub fn read_version(&self) -> u64 {
        self.rv
    }

    /// Which attempt of the surrounding block this is, starting at 1.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Transactional read of a typed value.
    ///
    /// A value this transaction already staged for the atom is returned
    /// directly; otherwise the read is logged, validated against the read
    /// version and the payload copied out. `T` must match the atom's payload
    /// size exactly.
    pub fn read<T>(&mut self, atom: &Atom) -> Result<T, TxError>
    where
        T: Copy,
    {
        if mem::size_of::<T>() != atom.size() {
            return Err(TxError::SizeMismatch {
                expected: atom.size(),
                actual: mem::size_of::<T>(),
            });
        }

        let mut dest = vec![0u8; atom.size()];
        self.read_bytes(atom, &mut dest)?;

        Ok(value_from_bytes(&dest))
    }

    /// Byte-level transactional read into `dest`.
    pub fn read_bytes(&mut self, atom: &Atom, dest: &mut [u8]) -> Result<(), TxError> {
        if dest.len() != atom.size() {
            return Err(TxError::SizeMismatch {
                expected: atom.size(),
                actual: dest.len(),
            });
        }

        // a write staged by this transaction wins over shared memory
        if let Some(bytes) = self.writes.lookup(atom) {
            dest.copy_from_slice(bytes);
            return Ok(());
        }

        self.reads.append(ReadOp::new(atom, self.rv));
        self.reads.validate_last()?;

        match self.reads.last() {
            Some(op) => op.read_into(dest),
            None => Err(TxError::Failed),
        }
    }

    /// Stages a typed write. Nothing reaches the atom before commit.
    pub fn write<T>(&mut self, atom: &Atom, value: T) -> Result<(), TxError>
    where
        T: Copy,
    {
        self.write_bytes(atom, bytes_of(&value))
    }

    /// Byte-level staged write. The source must match the atom's payload size
    /// exactly; a mismatch is fatal rather than retried.
    pub fn write_bytes(&mut self, atom: &Atom, src: &[u8]) -> Result<(), TxError> {
        if self.read_only {
            return Err(TxError::WriteInReadOnly);
        }

        self.writes.append(WriteOp::new(atom, src, self.rv)?);
        self.writes.validate_last()?;

        Ok(())
    }

    /// Allocates `size` zeroed bytes scoped to this transaction. Rolled back
    /// on abort; surviving buffers graduate to the caller on commit.
    pub fn allocate(&mut self, size: usize) -> TxMem {
        self.allocations.allocate(size)
    }

    /// Releases an allocation before the transaction ends.
    pub fn free(&mut self, mem: TxMem) {
        self.allocations.free(mem);
    }

    pub fn mem(&self, mem: TxMem) -> Option<&[u8]> {
        self.allocations.get(mem)
    }

    pub fn mem_mut(&mut self, mem: TxMem) -> Option<&mut [u8]> {
        self.allocations.get_mut(mem)
    }

    /// A conflict for callers that want to abandon the current attempt and
    /// have the engine retry it: `return Err(tx.abort());`.
    pub fn abort(&self) -> TxError {
        TxError::Failed
    }

    /// The two-phase commit. Locks the write set in cell-identity order,
    /// samples the write version, revalidates the read set (unless the clock
    /// shows no interleaving sample at all), validates the write set, then
    /// publishes payloads and versions and releases every lock.
    ///
    /// Every exit path releases all acquired locks; a failed commit leaves
    /// every atom byte-identical to before.
    pub(crate) fn commit(&mut self, clock: &VersionClock) -> Result<(), TxError> {
        // nothing to publish, nothing to lock or tick; the reads must still
        // form one consistent snapshot
        if self.writes.is_empty() {
            if let Err(e) = self.reads.validate_all(&HashMap::new()) {
                info!("TX({}, '{}'): read set validation failed", self.id, self.name);
                return Err(e);
            }

            debug!(
                "TX({}, '{}'): read-only commit ({} validated reads)",
                self.id,
                self.name,
                self.reads.len()
            );
            return Ok(());
        }

        let mut guards = self.writes.lock_all().map_err(|e| {
            info!("TX({}, '{}'): locking write set failed", self.id, self.name);
            e
        })?;

        let wv = clock.sample_and_advance();

        // rv + 1 == wv means no other clock sample happened since begin, so
        // no commit can have invalidated the read set
        if wv != self.rv + 1 {
            if let Err(e) = self.reads.validate_all(&guards) {
                info!("TX({}, '{}'): read set validation failed", self.id, self.name);
                drop(guards);
                return Err(e);
            }
        }

        if let Err(e) = self.writes.validate_all(&guards) {
            info!("TX({}, '{}'): write set validation failed", self.id, self.name);
            drop(guards);
            return Err(e);
        }

        self.writes.commit_all(&mut guards, wv);
        drop(guards);

        info!(
            "TX({}, '{}'): committed {} write(s) at version {}",
            self.id,
            self.name,
            self.writes.len(),
            wv
        );

        Ok(())
    }

    /// Consumes the attempt after a successful commit, graduating surviving
    /// allocations to the caller.
    pub(crate) fn into_allocations(mut self) -> Vec<Box<[u8]>> {
        self.allocations.take_all()
    }

    #[cfg(test)]
    pub(crate) fn read_set_len(&self) -> usize {
        self.reads.len()
    }
}
