// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The global version clock. Every transaction samples it once at begin (the
//! read version) and every writing transaction samples it once more at commit
//! (the write version), so all commits are totally ordered by their sample.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// A process-wide monotonic counter. 64 bits wide, so wrap-around is not a
/// concern within a program lifetime.
#[derive(Clone, Default)]
pub struct VersionClock {
    atomic: Arc<AtomicU64>,
}

impl VersionClock {
    pub fn new(version: u64) -> Self {
        Self {
            atomic: Arc::new(AtomicU64::new(version)),
        }
    }

    /// Atomically advances the clock and returns the previous value.
    pub fn sample_and_advance(&self) -> u64 {
        self.atomic.fetch_add(1, Ordering::SeqCst)
    }

    /// Returns the current version without advancing the clock.
    pub fn version(&self) -> u64 {
        self.atomic.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::VersionClock;
    use threadpool::ThreadPool;

    #[test]
    fn test_sample_returns_prior_value() {
        let clock = VersionClock::default();

        assert_eq!(clock.sample_and_advance(), 0);
        assert_eq!(clock.sample_and_advance(), 1);
        assert_eq!(clock.version(), 2);

        let clock = VersionClock::new(100);
        assert_eq!(clock.sample_and_advance(), 100);
        assert_eq!(clock.version(), 101);
    }

    #[test]
    fn test_clock_threaded() {
        let clock = VersionClock::default();
        let runs = 0xFFF;

        let pool = ThreadPool::new(8);
        for _ in 0..runs {
            let inner = clock.clone();
            pool.execute(move || {
                inner.sample_and_advance();
            });
        }
        pool.join();

        assert_eq!(clock.version(), runs);
    }
}
