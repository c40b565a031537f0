// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The read log. Every transactional read appends a [`ReadOp`] recording the
//! atom and the transaction's read version, validates it immediately to fail
//! fast, and the whole set is revalidated during commit.

use crate::{
    atom::{Atom, AtomCell},
    error::TxError,
};
use std::{collections::HashMap, sync::MutexGuard};

/// Descriptor of one transactional read.
pub(crate) struct ReadOp {
    atom: Atom,
    rv: u64,
}

impl ReadOp {
    pub(crate) fn new(atom: &Atom, rv: u64) -> Self {
        Self { atom: atom.clone(), rv }
    }

    pub(crate) fn atom_id(&self) -> usize {
        self.atom.id()
    }

    /// A read is valid while the atom is unlocked and its version does not
    /// exceed the read version. A failed lock attempt means another
    /// transaction is committing the atom and counts as a conflict.
    pub(crate) fn validate(&self) -> Result<(), TxError> {
        let cell = self.atom.try_lock()?;

        if cell.version > self.rv {
            return Err(TxError::StaleObject);
        }

        Ok(())
    }

    /// Copies the atom's payload into `dest` and confirms the copy still
    /// belongs to this transaction's snapshot.
    pub(crate) fn read_into(&self, dest: &mut [u8]) -> Result<(), TxError> {
        if dest.len() != self.atom.size() {
            return Err(TxError::SizeMismatch {
                expected: self.atom.size(),
                actual: dest.len(),
            });
        }

        let cell = self.atom.try_lock()?;
        dest.copy_from_slice(&cell.bytes);

        // payload and version share the lock, so this check covers the copy
        // above; a version past rv means a newer commit slipped in between
        // validation and the copy
        if cell.version > self.rv {
            return Err(TxError::StaleObject);
        }

        Ok(())
    }
}

/// Insertion-ordered log of read operations. Duplicate entries for the same
/// atom are kept and validated independently.
#[derive(Default)]
pub(crate) struct ReadSet {
    ops: Vec<ReadOp>,
}

impl ReadSet {
    pub(crate) fn append(&mut self, op: ReadOp) {
        self.ops.push(op);
    }

    pub(crate) fn last(&self) -> Option<&ReadOp> {
        self.ops.last()
    }

    pub(crate) fn len(&self) -> usize {
        self.ops.len()
    }

    /// Fail-fast validation of the most recently appended read.
    pub(crate) fn validate_last(&self) -> Result<(), TxError> {
        match self.ops.last() {
            Some(op) => op.validate(),
            None => Ok(()),
        }
    }

    /// Commit-time revalidation of every entry. An atom the transaction is
    /// itself committing is checked through the already-held write guard;
    /// every other entry must pass a fresh lock attempt.
    pub(crate) fn validate_all(
        &self,
        write_guards: &HashMap<usize, MutexGuard<'_, AtomCell>>,
    ) -> Result<(), TxError> {
        for op in &self.ops {
            match write_guards.get(&op.atom_id()) {
                Some(cell) => {
                    if cell.version > op.rv {
                        return Err(TxError::StaleObject);
                    }
                }
                None => op.validate()?,
            }
        }

        Ok(())
    }
}
