// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use rand::{seq::SliceRandom, Rng};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};
use stm::{Strategy, Stm, TxError, TxResult};
use stronghold_tl2 as stm;
use threadpool::ThreadPool;

#[ctor::ctor]
/// This function will be run before any of the tests
fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

#[test]
fn test_increment_race() {
    let stm = Stm::new();
    let x = stm.atomize(0usize);

    let mut threads = Vec::new();
    for _ in 0..2 {
        let stm = stm.clone();
        let x = x.clone();

        threads.push(thread::spawn(move || {
            stm.read_write("increment", move |tx| {
                let y: usize = tx.read(&x)?;
                tx.write(&x, y + 1)
            })
            .expect("Failed to run transaction");
        }));
    }

    for handle in threads {
        handle.join().expect("Failed to join thread");
    }

    assert_eq!(x.value::<usize>(), Ok(2));
}

#[test]
fn test_conditional_update() {
    let stm = Stm::new();
    let x = stm.atomize(0usize);

    let mut threads = Vec::new();
    for _ in 0..2 {
        let stm = stm.clone();
        let x = x.clone();

        threads.push(thread::spawn(move || {
            stm.read_write("conditional", move |tx| {
                let seen: usize = tx.read(&x)?;
                match seen {
                    0 => tx.write(&x, 1usize),
                    _ => tx.write(&x, 2usize),
                }
            })
            .expect("Failed to run transaction");
        }));
    }

    for handle in threads {
        handle.join().expect("Failed to join thread");
    }

    // at most one thread may have observed 0
    assert_eq!(x.value::<usize>(), Ok(2));
}

#[test]
fn test_paired_update_consistency() {
    let stm = Stm::new();
    let a = stm.atomize(0usize);
    let b = stm.atomize(0usize);

    let writer = {
        let stm = stm.clone();
        let a = a.clone();
        let b = b.clone();

        thread::spawn(move || {
            stm.read_write("pair_writer", move |tx| {
                tx.write(&a, 1usize)?;
                tx.write(&b, 1usize)
            })
            .expect("Failed to run transaction");
        })
    };

    let reader = {
        let stm = stm.clone();
        let a = a.clone();
        let b = b.clone();

        thread::spawn(move || {
            for _ in 0..1000 {
                let pair = stm
                    .read_only("pair_reader", |tx| {
                        let ra: usize = tx.read(&a)?;
                        let rb: usize = tx.read(&b)?;
                        Ok((ra, rb))
                    })
                    .expect("Failed to run transaction");

                let (ra, rb) = pair.res;
                assert_eq!(ra, rb, "observed a half-applied pair update");
            }
        })
    };

    writer.join().expect("Failed to join writer thread");
    reader.join().expect("Failed to join reader thread");

    assert_eq!(a.value::<usize>(), Ok(1));
    assert_eq!(b.value::<usize>(), Ok(1));
}

#[test]
fn test_retry_cap_is_terminal() {
    let stm = Stm::new();
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let result: Result<TxResult<()>, TxError> = stm.read_write_with_strategy(
        "doomed",
        move |tx| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.allocate(1024);
            Err(tx.abort())
        },
        Strategy::Bounded(3),
    );

    assert_eq!(result.err(), Some(TxError::RetriesExceeded(3)));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    // every attempt's allocation was rolled back
    assert_eq!(stm.allocated_bytes(), 0);
}

#[test]
fn test_allocation_rollback_on_abort() {
    let stm = Stm::new();

    let observer = stm.clone();
    let result: Result<TxResult<()>, TxError> = stm.read_write_with_strategy(
        "rollback",
        move |tx| {
            let mem = tx.allocate(1 << 20);
            tx.mem_mut(mem).expect("allocation missing").fill(0xAB);
            assert_eq!(observer.allocated_bytes(), 1 << 20);

            Err(tx.abort())
        },
        Strategy::Bounded(0),
    );

    assert_eq!(result.err(), Some(TxError::RetriesExceeded(0)));
    assert_eq!(stm.allocated_bytes(), 0);
}

#[test]
fn test_allocations_graduate_on_commit() {
    let stm = Stm::new();
    let atom = stm.atomize(0usize);

    let target = atom.clone();
    let result = stm
        .read_write("graduate", move |tx| {
            let mem = tx.allocate(8);
            tx.mem_mut(mem).expect("allocation missing").fill(3);

            let scratch = tx.allocate(16);
            tx.free(scratch);

            tx.write(&target, 1usize)?;
            Ok(())
        })
        .expect("Failed to run transaction");

    assert_eq!(result.allocations.len(), 1);
    assert_eq!(&*result.allocations[0], &[3u8; 8]);
    assert_eq!(stm.allocated_bytes(), 0);
}

#[test]
fn test_contention_makes_progress() {
    const THREADS: usize = 8;
    const RUNS: usize = 10_000;

    let stm = Stm::new();
    let atoms: Vec<_> = (0..4).map(|_| stm.atomize(0usize)).collect();

    let mut threads = Vec::new();
    for _ in 0..THREADS {
        let stm = stm.clone();
        let atoms = atoms.clone();

        threads.push(thread::spawn(move || {
            for _ in 0..RUNS {
                stm.read_write("contention", |tx| {
                    let mut order: Vec<usize> = (0..atoms.len()).collect();
                    order.shuffle(&mut rand::thread_rng());

                    for &at in &order {
                        let count: usize = tx.read(&atoms[at])?;
                        tx.write(&atoms[at], count + 1)?;
                    }

                    Ok(())
                })
                .expect("Failed to run transaction");
            }
        }));
    }

    for handle in threads {
        handle.join().expect("Failed to join thread");
    }

    for atom in &atoms {
        assert_eq!(atom.value::<usize>(), Ok(THREADS * RUNS));
    }
}

#[test]
fn test_atom_versions_are_monotone() {
    let stm = Stm::new();
    let atom = stm.atomize(0usize);
    let done = Arc::new(AtomicBool::new(false));

    let sampler = {
        let atom = atom.clone();
        let done = done.clone();

        thread::spawn(move || {
            let mut versions = Vec::new();
            while !done.load(Ordering::SeqCst) {
                let (_, version) = atom.snapshot();
                versions.push(version);
            }
            versions
        })
    };

    let mut writers = Vec::new();
    for _ in 0..4 {
        let stm = stm.clone();
        let atom = atom.clone();

        writers.push(thread::spawn(move || {
            for _ in 0..250 {
                stm.read_write("bump", |tx| {
                    let value: usize = tx.read(&atom)?;
                    tx.write(&atom, value + 1)
                })
                .expect("Failed to run transaction");
            }
        }));
    }

    for handle in writers {
        handle.join().expect("Failed to join writer thread");
    }
    done.store(true, Ordering::SeqCst);

    let versions = sampler.join().expect("Failed to join sampler thread");
    assert!(
        versions.windows(2).all(|pair| pair[0] <= pair[1]),
        "atom version went backwards"
    );

    assert_eq!(atom.value::<usize>(), Ok(1000));
}

#[test]
fn test_aborted_transaction_leaves_atoms_untouched() {
    let stm = Stm::new();
    let a = stm.atomize(10usize);
    let b = stm.atomize(20usize);

    let (wa, wb) = (a.clone(), b.clone());
    let result: Result<TxResult<()>, TxError> = stm.read_write_with_strategy(
        "no_trace",
        move |tx| {
            tx.write(&wa, 77usize)?;
            tx.write(&wb, 88usize)?;
            Err(tx.abort())
        },
        Strategy::Bounded(0),
    );

    assert_eq!(result.err(), Some(TxError::RetriesExceeded(0)));

    assert_eq!(a.snapshot(), (10usize.to_ne_bytes().to_vec(), 0));
    assert_eq!(b.snapshot(), (20usize.to_ne_bytes().to_vec(), 0));
}

#[test]
fn test_self_write_is_visible() {
    let stm = Stm::new();
    let atom = stm.atomize(1usize);

    let target = atom.clone();
    let result = stm
        .read_write("self_read", move |tx| {
            tx.write(&target, 42usize)?;
            tx.read::<usize>(&target)
        })
        .expect("Failed to run transaction");

    assert_eq!(result.res, 42);
    assert_eq!(atom.value::<usize>(), Ok(42));
}

#[test]
fn test_size_enforcement_is_fatal() {
    let stm = Stm::new();
    let atom = stm.atomize(0u32);

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let target = atom.clone();

    let result: Result<TxResult<()>, TxError> = stm.read_write("mismatch", move |tx| {
        counter.fetch_add(1, Ordering::SeqCst);
        tx.write(&target, 1u64)?;
        Ok(())
    });

    assert_eq!(
        result.err(),
        Some(TxError::SizeMismatch { expected: 4, actual: 8 })
    );

    // fatal errors are never retried
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(atom.value::<u32>(), Ok(0));
}

#[test]
fn test_breaker_strategy_bounds_contention() {
    let stm = Stm::new();

    let result: Result<TxResult<()>, TxError> = stm.read_write_with_strategy(
        "doomed",
        |tx| Err(tx.abort()),
        Strategy::RetryWithBreaker(Default::default()),
    );

    assert_eq!(result.err(), Some(TxError::BreakerTripped));
}

#[test]
fn test_transfers_preserve_total() {
    const ACCOUNTS: usize = 4;
    const TRANSFERS: usize = 200;

    let stm = Stm::new();
    let accounts: Vec<_> = (0..ACCOUNTS).map(|_| stm.atomize(100usize)).collect();

    let pool = ThreadPool::new(8);
    for _ in 0..TRANSFERS {
        let stm = stm.clone();
        let accounts = accounts.clone();

        pool.execute(move || {
            let mut rng = rand::thread_rng();
            let from = rng.gen_range(0..ACCOUNTS);
            let to = (from + rng.gen_range(1..ACCOUNTS)) % ACCOUNTS;
            let amount = rng.gen_range(1..10usize);

            stm.read_write("transfer", move |tx| {
                let balance: usize = tx.read(&accounts[from])?;
                let target: usize = tx.read(&accounts[to])?;

                // skip transfers the balance cannot cover
                if balance >= amount {
                    tx.write(&accounts[from], balance - amount)?;
                    tx.write(&accounts[to], target + amount)?;
                }

                Ok(())
            })
            .expect("Failed to run transaction");
        });
    }

    pool.join();

    let total: usize = accounts
        .iter()
        .map(|account| account.value::<usize>().expect("account locked after join"))
        .sum();
    assert_eq!(total, ACCOUNTS * 100);
}

#[test]
fn test_global_engine_lifecycle() {
    assert_eq!(stm::global().err(), Some(TxError::Uninitialized));

    stm::init().expect("first init must succeed");
    assert_eq!(stm::init().err(), Some(TxError::AlreadyInitialized));

    let engine = stm::global().expect("engine must be available after init");
    let atom = engine.atomize(5usize);

    engine
        .read_write("global", |tx| {
            let value: usize = tx.read(&atom)?;
            tx.write(&atom, value * 2)
        })
        .expect("Failed to run transaction");

    assert_eq!(atom.value::<usize>(), Ok(10));
}
