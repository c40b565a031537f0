// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # Software Transactional Memory (TL2)
//!
//! This crate implements the TL2 algorithm described by Dice, Shalev and
//! Shavit. Shared memory cells ("atoms") pair a fixed-size payload with a
//! version number behind a mutex, and a global version clock totally orders
//! all commits. A transaction samples the clock at begin, buffers its writes,
//! validates every read against the sample, and publishes the write set in a
//! two-phase commit: lock the write set in a deterministic order, revalidate
//! the read set, store the payloads under a fresh clock sample and release.
//! Any conflict aborts the attempt and the engine retries the whole block
//! with a fresh snapshot, so user code composes reads and writes without
//! designing a lock hierarchy.
//!
//! Transactional code must be free of side effects other than engine-mediated
//! memory access: an aborted attempt reruns the closure from the top.
//! Heap memory needed inside a transaction comes from
//! [`Transaction::allocate`], which is rolled back on abort.
//!
//! ```
//! use stronghold_tl2::Stm;
//!
//! let stm = Stm::new();
//! let balance = stm.atomize(100u64);
//!
//! let b = balance.clone();
//! stm.read_write("withdraw", move |tx| {
//!     let amount: u64 = tx.read(&b)?;
//!     tx.write(&b, amount - 30)
//! })
//! .expect("transaction failed");
//!
//! assert_eq!(balance.value::<u64>(), Ok(70));
//! ```

pub mod alloc;
pub mod atom;
pub mod breaker;
pub mod clock;
pub mod error;
pub mod stm;
pub mod transaction;

mod readset;
mod writeset;

pub use alloc::TxMem;
pub use atom::Atom;
pub use breaker::BusyBreaker;
pub use clock::VersionClock;
pub use error::TxError;
pub use stm::{global, init, Stm, Strategy, TxResult};
pub use transaction::Transaction;
