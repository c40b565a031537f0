// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # Transactional memory benchmarks
//!
//! Test subjects:
//! - uncontended read-modify-write commits
//! - read-only transactions
//! - commits racing a background writer

use criterion::{criterion_group, criterion_main, Criterion};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};
use stm::Stm;
use stronghold_tl2 as stm;

pub fn bnc_uncontended_commit(c: &mut Criterion) {
    let stm = Stm::new();
    let atom = stm.atomize(0usize);

    c.bench_function("uncontended_commit", |b| {
        b.iter(|| {
            stm.read_write("bench_rw", |tx| {
                let value: usize = tx.read(&atom)?;
                tx.write(&atom, value + 1)
            })
            .expect("transaction failed")
        })
    });
}

pub fn bnc_read_only(c: &mut Criterion) {
    let stm = Stm::new();
    let atom = stm.atomize(0usize);

    c.bench_function("read_only", |b| {
        b.iter(|| {
            stm.read_only("bench_ro", |tx| tx.read::<usize>(&atom))
                .expect("transaction failed")
        })
    });
}

pub fn bnc_contended_commit(c: &mut Criterion) {
    let stm = Stm::new();
    let atom = stm.atomize(0usize);
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let stm = stm.clone();
        let atom = atom.clone();
        let done = done.clone();

        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                stm.read_write("bench_noise", |tx| {
                    let value: usize = tx.read(&atom)?;
                    tx.write(&atom, value + 1)
                })
                .expect("transaction failed");
            }
        })
    };

    c.bench_function("contended_commit", |b| {
        b.iter(|| {
            stm.read_write("bench_contended", |tx| {
                let value: usize = tx.read(&atom)?;
                tx.write(&atom, value + 1)
            })
            .expect("transaction failed")
        })
    });

    done.store(true, Ordering::Relaxed);
    writer.join().expect("failed to join writer thread");
}

criterion_group!(
    benches,
    bnc_uncontended_commit,
    bnc_read_only,
    bnc_contended_commit
);
criterion_main!(benches);
