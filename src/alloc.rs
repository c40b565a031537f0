// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Transaction-scoped allocation. Buffers handed out inside a transaction are
//! logged so an abort can roll every one of them back; a committed
//! transaction hands the surviving buffers to the caller. Rolled-back buffers
//! are zeroed before release.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use zeroize::Zeroize;

/// Handle to one transaction-scoped allocation. Only meaningful for the
/// transaction that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxMem(usize);

/// Log of the allocations one transaction attempt has performed. The
/// `residency` counter is shared with the owning engine, so tests and callers
/// can observe that aborted transactions leave nothing behind.
pub(crate) struct AllocLog {
    slots: Vec<Option<Box<[u8]>>>,
    residency: Arc<AtomicUsize>,
}

impl AllocLog {
    pub(crate) fn new(residency: Arc<AtomicUsize>) -> Self {
        Self {
            slots: Vec::new(),
            residency,
        }
    }

    /// Allocates a zero-filled buffer and logs it for rollback.
    pub(crate) fn allocate(&mut self, size: usize) -> TxMem {
        self.residency.fetch_add(size, Ordering::SeqCst);
        self.slots.push(Some(vec![0u8; size].into_boxed_slice()));

        TxMem(self.slots.len() - 1)
    }

    pub(crate) fn get(&self, mem: TxMem) -> Option<&[u8]> {
        self.slots.get(mem.0).and_then(|slot| slot.as_deref())
    }

    pub(crate) fn get_mut(&mut self, mem: TxMem) -> Option<&mut [u8]> {
        self.slots.get_mut(mem.0).and_then(|slot| slot.as_deref_mut())
    }

    /// Releases one allocation early. Handles not produced by this log, or
    /// already freed, are ignored.
    pub(crate) fn free(&mut self, mem: TxMem) {
        if let Some(mut buffer) = self.slots.get_mut(mem.0).and_then(Option::take) {
            self.residency.fetch_sub(buffer.len(), Ordering::SeqCst);
            buffer.zeroize();
        }
    }

    /// Hands every surviving buffer to the caller; they stop counting as
    /// transaction residency. Used by the commit path.
    pub(crate) fn take_all(&mut self) -> Vec<Box<[u8]>> {
        let mut survivors = Vec::new();
        for slot in &mut self.slots {
            if let Some(buffer) = slot.take() {
                self.residency.fetch_sub(buffer.len(), Ordering::SeqCst);
                survivors.push(buffer);
            }
        }

        survivors
    }
}

impl Drop for AllocLog {
    /// The abort path: everything still logged is zeroed and released.
    fn drop(&mut self) {
        for slot in &mut self.slots {
            if let Some(mut buffer) = slot.take() {
                self.residency.fetch_sub(buffer.len(), Ordering::SeqCst);
                buffer.zeroize();
            }
        }
    }
}
