// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The write log. Writes are buffered here until commit; nothing reaches
//! shared memory before the whole set has been locked and validated. The set
//! doubles as a lookup table so reads inside the same transaction observe
//! their own pending writes.

use crate::{
    atom::{Atom, AtomCell},
    error::TxError,
};
use std::{collections::HashMap, sync::MutexGuard};

/// Descriptor of one pending write: the target atom and an owned copy of the
/// bytes to publish.
pub(crate) struct WriteOp {
    atom: Atom,
    buffer: Box<[u8]>,
    rv: u64,
}

impl WriteOp {
    /// Buffers a copy of `src`. A size mismatch against the atom's payload is
    /// a programmer error, not a conflict.
    pub(crate) fn new(atom: &Atom, src: &[u8], rv: u64) -> Result<Self, TxError> {
        if src.len() != atom.size() {
            return Err(TxError::SizeMismatch {
                expected: atom.size(),
                actual: src.len(),
            });
        }

        Ok(Self {
            atom: atom.clone(),
            buffer: src.to_vec().into_boxed_slice(),
            rv,
        })
    }

    pub(crate) fn atom_id(&self) -> usize {
        self.atom.id()
    }

    /// Commit-time validation. The committer already holds the atom's lock,
    /// so the version is read through the guard.
    pub(crate) fn validate(&self, cell: &AtomCell) -> Result<(), TxError> {
        if cell.version > self.rv {
            return Err(TxError::StaleObject);
        }

        Ok(())
    }

    /// Publishes the buffered bytes and the write version. The guard proves
    /// the atom is locked.
    pub(crate) fn write(&self, cell: &mut AtomCell, wv: u64) {
        cell.store(&self.buffer, wv);
    }
}

/// Insertion-ordered log of write operations with an identity index for the
/// read-your-own-writes lookup. A second write to the same atom replaces the
/// buffered bytes in place, so each atom's lock is acquired exactly once at
/// commit.
#[derive(Default)]
pub(crate) struct WriteSet {
    ops: Vec<WriteOp>,
    index: HashMap<usize, usize>,
    last: Option<usize>,
}

impl WriteSet {
    pub(crate) fn append(&mut self, op: WriteOp) {
        match self.index.get(&op.atom_id()) {
            Some(&at) => {
                self.ops[at] = op;
                self.last = Some(at);
            }
            None => {
                self.index.insert(op.atom_id(), self.ops.len());
                self.last = Some(self.ops.len());
                self.ops.push(op);
            }
        }
    }

    /// The buffered bytes for `atom`, if this transaction already wrote it.
    pub(crate) fn lookup(&self, atom: &Atom) -> Option<&[u8]> {
        self.index.get(&atom.id()).map(|&at| &*self.ops[at].buffer)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.ops.len()
    }

    /// Fail-fast validation of the most recently staged write: the target may
    /// not be locked elsewhere or carry a version beyond the read version.
    pub(crate) fn validate_last(&self) -> Result<(), TxError> {
        let op = match self.last {
            Some(at) => &self.ops[at],
            None => return Ok(()),
        };

        let cell = op.atom.try_lock()?;
        op.validate(&cell)
    }

    /// Acquires every target atom's lock, in ascending cell-identity order so
    /// two committers can never hold locks in opposite order. Any failed
    /// attempt releases everything acquired so far and aborts the commit.
    pub(crate) fn lock_all(&self) -> Result<HashMap<usize, MutexGuard<'_, AtomCell>>, TxError> {
        let mut order: Vec<&WriteOp> = self.ops.iter().collect();
        order.sort_by_key(|op| op.atom_id());

        let mut guards = HashMap::with_capacity(order.len());
        for op in order {
            // guards are dropped, and the locks released, on early return
            let guard = op.atom.try_lock()?;
            guards.insert(op.atom_id(), guard);
        }

        Ok(guards)
    }

    /// Commit-time validation of every buffered write through the held
    /// guards.
    pub(crate) fn validate_all(
        &self,
        guards: &HashMap<usize, MutexGuard<'_, AtomCell>>,
    ) -> Result<(), TxError> {
        for op in &self.ops {
            let cell = guards.get(&op.atom_id()).ok_or(TxError::Failed)?;
            op.validate(cell)?;
        }

        Ok(())
    }

    /// Publishes every buffered write under the held guards, stamping each
    /// atom with the write version.
    pub(crate) fn commit_all(
        &self,
        guards: &mut HashMap<usize, MutexGuard<'_, AtomCell>>,
        wv: u64,
    ) {
        for op in &self.ops {
            if let Some(cell) = guards.get_mut(&op.atom_id()) {
                op.write(cell, wv);
            }
        }
    }
}
