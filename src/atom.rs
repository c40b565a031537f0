// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The versioned memory cell. An [`Atom`] pairs a fixed-size byte payload
//! with a version number, both guarded by a single mutex. The version always
//! carries the write version of the last transaction that committed the atom.

use crate::error::TxError;
use std::{
    fmt,
    hash::{Hash, Hasher},
    mem,
    sync::{Arc, Mutex, MutexGuard},
};

/// Payload bytes and version, updated together under the atom's lock.
pub(crate) struct AtomCell {
    pub(crate) bytes: Box<[u8]>,
    pub(crate) version: u64,
}

impl AtomCell {
    /// Store new payload bytes and publish the given write version.
    /// Only reachable through a held [`MutexGuard`].
    pub(crate) fn store(&mut self, src: &[u8], wv: u64) {
        self.bytes.copy_from_slice(src);
        self.version = wv;
    }
}

/// A single transactional memory cell.
///
/// The payload size is fixed at creation and every subsequent read or write
/// must match it exactly. Handles are cheap to clone and compare by cell
/// identity, so two atoms created from equal values are still distinct cells.
/// The underlying cell must not be read through [`Atom::snapshot`] or
/// [`Atom::value`] while transactions touching it may be in flight.
pub struct Atom {
    cell: Arc<Mutex<AtomCell>>,
    size: usize,
}

impl Atom {
    /// Wraps a copy of `bytes` as a fresh cell with version 0.
    pub fn atomize_bytes(bytes: &[u8]) -> Self {
        Self {
            size: bytes.len(),
            cell: Arc::new(Mutex::new(AtomCell {
                bytes: bytes.to_vec().into_boxed_slice(),
                version: 0,
            })),
        }
    }

    /// Wraps a copy of `value` as a fresh cell with version 0.
    ///
    /// Calling this twice on the same value produces two independent atoms;
    /// the engine never checks for such aliases.
    pub fn atomize<T>(value: T) -> Self
    where
        T: Copy,
    {
        Self::atomize_bytes(bytes_of(&value))
    }

    /// The fixed payload size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Cell identity. Also the total order `lock_all` acquires locks in.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.cell) as *const () as usize
    }

    /// Blocks until the cell's lock is held. The engine itself only blocks
    /// here from [`Atom::snapshot`] and [`Atom::value`]; the commit path is
    /// try-lock only.
    pub(crate) fn lock(&self) -> MutexGuard<'_, AtomCell> {
        self.cell.lock().expect("atom mutex poisoned")
    }

    /// Single lock attempt. A held lock reports as [`TxError::LockPresent`],
    /// which the transaction layer treats as a conflict.
    pub(crate) fn try_lock(&self) -> Result<MutexGuard<'_, AtomCell>, TxError> {
        self.cell.try_lock().map_err(|_| TxError::LockPresent)
    }

    /// The current version. Sampled under a lock attempt, so a concurrent
    /// committer shows up as [`TxError::LockPresent`] rather than a torn read.
    pub fn version(&self) -> Result<u64, TxError> {
        self.try_lock().map(|cell| cell.version)
    }

    /// Quiesced copy of payload and version, for use after all transactions
    /// touching this atom have joined.
    pub fn snapshot(&self) -> (Vec<u8>, u64) {
        let cell = self.lock();
        (cell.bytes.to_vec(), cell.version)
    }

    /// Quiesced typed read of the payload.
    pub fn value<T>(&self) -> Result<T, TxError>
    where
        T: Copy,
    {
        if mem::size_of::<T>() != self.size {
            return Err(TxError::SizeMismatch {
                expected: self.size,
                actual: mem::size_of::<T>(),
            });
        }

        let cell = self.lock();
        Ok(value_from_bytes(&cell.bytes))
    }
}

impl Clone for Atom {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            size: self.size,
        }
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.id())
            .field("size", &self.size)
            .finish()
    }
}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Atom {}

/// The raw bytes of a `Copy` value.
pub(crate) fn bytes_of<T>(value: &T) -> &[u8]
where
    T: Copy,
{
    // a Copy value is plain bytes; the slice lives as long as the borrow
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, mem::size_of::<T>()) }
}

/// Reassembles a `Copy` value from bytes previously produced by [`bytes_of`].
/// Callers must have checked that `bytes.len() == size_of::<T>()`.
pub(crate) fn value_from_bytes<T>(bytes: &[u8]) -> T
where
    T: Copy,
{
    debug_assert_eq!(bytes.len(), mem::size_of::<T>());

    // the payload buffer is byte-aligned, so read unaligned
    unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) }
}
