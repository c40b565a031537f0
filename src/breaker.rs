// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::error::TxError;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Highest backoff step; one step past this trips the breaker.
const SPIN_LIMIT: usize = 7;

/// An exponential busy-wait between transaction retries.
///
/// Each call to [`BusyBreaker::spin`] burns twice as many cycles as the one
/// before, giving a concurrent committer room to finish without descheduling
/// the calling thread. Once the backoff step passes `SPIN_LIMIT` the breaker
/// trips, which turns a persistently contended retry loop into the terminal
/// [`TxError::BreakerTripped`] instead of an unbounded busy wait.
#[derive(Default)]
pub struct BusyBreaker {
    step: AtomicUsize,
}

impl BusyBreaker {
    /// Busy-waits for the current backoff step, then escalates it.
    pub fn spin(&self) -> Result<(), TxError> {
        let step = self.step.load(Ordering::Acquire);
        if step > SPIN_LIMIT {
            return Err(TxError::BreakerTripped);
        }

        let mut spins = 1usize << step;
        while spins > 0 {
            core::hint::spin_loop();
            spins -= 1;
        }

        self.step.store(step + 1, Ordering::Release);

        Ok(())
    }

    /// Drops back to the shortest wait.
    pub fn reset(&self) {
        self.step.store(0, Ordering::Release);
    }
}
