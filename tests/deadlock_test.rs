// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! Every test drives the real [`Engine`] from many threads at once and then
//! checks that no pass was created or lost along the way. Lock order inside
//! the ledger is recipient entry, then share shard, then the share's mutex;
//! these tests exercise every path that takes more than one of them.

use pass_ledger_rs::{Engine, PassError, PoolRequest, ScannerIdentity, ShareRecord, Token};
use parking_lot::deadlock;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

// === Helpers ===

fn mobile(n: usize) -> String {
    format!("98{n:08}")
}

fn engine(available: i64) -> Arc<Engine> {
    let engine = Engine::new();
    engine
        .create_pool(PoolRequest::new("uploads/pass.png", available))
        .unwrap();
    Arc::new(engine)
}

/// `remaining + sum(children.issued) == issued` for every share, and the
/// pool plus root issuance equals what the pool started with.
fn assert_conserved(engine: &Engine, initial: u64) {
    let records: Vec<ShareRecord> = engine.ledger().records();
    let mut handed_down: HashMap<Token, u64> = HashMap::new();
    for record in &records {
        if let Some(parent) = &record.parent_token {
            *handed_down.entry(parent.clone()).or_default() += u64::from(record.issued);
        }
    }
    for record in &records {
        let remaining = u64::from(record.remaining.unwrap());
        let downstream = handed_down.get(&record.token).copied().unwrap_or(0);
        assert_eq!(
            remaining + downstream,
            u64::from(record.issued),
            "share {} leaked passes",
            record.token
        );
        assert!(remaining >= 1, "share {} was drained", record.token);
    }

    let summary = engine.summary();
    assert_eq!(summary.total, initial);
}

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

// === Tests ===

/// Many threads drain a small pool; it must never be oversold.
#[test]
fn no_oversell_under_contention() {
    let detector = start_deadlock_detector();
    let engine = engine(500);

    const NUM_THREADS: usize = 40;
    const OPS_PER_THREAD: usize = 25;

    let granted = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::with_capacity(NUM_THREADS);
    for t in 0..NUM_THREADS {
        let engine = engine.clone();
        let granted = granted.clone();
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                match engine.allocate_root(&mobile(t * OPS_PER_THREAD + i), "Guest", 1, None) {
                    Ok(_) => {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(PassError::ResourceExhausted { .. }) => {}
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_eq!(granted.load(Ordering::SeqCst), 500);
    assert_eq!(engine.pool().unwrap().available, 0);
    assert_eq!(engine.ledger().len(), 500);
    assert_conserved(&engine, 500);
}

/// Re-shares racing on one parent leave it exactly one pass.
#[test]
fn no_double_spend_of_parent() {
    let detector = start_deadlock_detector();
    let engine = engine(1_000);
    let parent = engine
        .allocate_root(&mobile(0), "Host", 101, None)
        .unwrap();

    let succeeded: usize = (1..=400)
        .into_par_iter()
        .filter(|&n| {
            match engine.reshare(&parent.token, &mobile(n), "Guest", 1, None) {
                Ok(_) => true,
                Err(PassError::WouldExhaustSender { .. }) => false,
                Err(err) => panic!("unexpected error: {err}"),
            }
        })
        .count();

    stop_deadlock_detector(detector);

    assert_eq!(succeeded, 100);
    assert_eq!(engine.get_share(&parent.token).unwrap().remaining, Some(1));
    assert_conserved(&engine, 1_000);
}

/// Racing claims on one mobile produce one share.
#[test]
fn duplicate_recipient_race() {
    let detector = start_deadlock_detector();
    let engine = engine(100);

    const NUM_THREADS: usize = 32;
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.allocate_root(&mobile(7), "Guest", 3, None).is_ok())
        })
        .collect();
    let wins = handles
        .into_iter()
        .map(|handle| handle.join().expect("Thread panicked"))
        .filter(|won| *won)
        .count();

    stop_deadlock_detector(detector);

    assert_eq!(wins, 1);
    assert_eq!(engine.pool().unwrap().available, 97);
}

/// A pass admits exactly one holder no matter how many gates scan it.
#[test]
fn mark_used_exactly_once() {
    let detector = start_deadlock_detector();
    let engine = engine(10);
    let gates: Vec<_> = (0..8)
        .map(|n| engine.register_employee("Gate", &format!("90{n:08}")).unwrap())
        .collect();
    let share = engine.allocate_root(&mobile(1), "Guest", 1, None).unwrap();

    let handles: Vec<_> = gates
        .iter()
        .flat_map(|gate| std::iter::repeat_n(gate.id, 4))
        .map(|id| {
            let engine = engine.clone();
            let token = share.token.clone();
            thread::spawn(move || engine.redeem(&token, &ScannerIdentity::id(id)).is_ok())
        })
        .collect();
    let admitted = handles
        .into_iter()
        .map(|handle| handle.join().expect("Thread panicked"))
        .filter(|ok| *ok)
        .count();

    stop_deadlock_detector(detector);

    assert_eq!(admitted, 1);
    assert!(engine.get_share(&share.token).unwrap().used);
}

/// Issuing, re-sharing, redeeming, revoking, and granting all at once.
#[test]
fn no_deadlock_mixed_workload() {
    let detector = start_deadlock_detector();
    let engine = engine(10_000);

    const NUM_THREADS: usize = 16;
    const OPS_PER_THREAD: usize = 200;

    let roots: Vec<Token> = (0..8)
        .map(|n| {
            engine
                .allocate_root(&mobile(n), "Host", 500, None)
                .unwrap()
                .token
        })
        .collect();
    let roots = Arc::new(roots);

    let mut handles = Vec::with_capacity(NUM_THREADS);
    for t in 0..NUM_THREADS {
        let engine = engine.clone();
        let roots = roots.clone();
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let n = 1_000 + t * OPS_PER_THREAD + i;
                let parent = &roots[i % roots.len()];
                match i % 6 {
                    0 => {
                        let _ = engine.allocate_root(&mobile(n), "Guest", 2, None);
                    }
                    1 | 2 => {
                        let _ = engine.reshare(parent, &mobile(n), "Guest", 2, None);
                    }
                    3 => {
                        // Revoke the share issued two steps ago, if any.
                        let _ = engine.revoke(&mobile(n - 2));
                    }
                    4 => {
                        let root = &roots[(i / 6) % roots.len()];
                        let _ = engine.mark_used(root);
                        let _ = engine.lookup(root);
                    }
                    _ => {
                        if i % 60 == 5 {
                            let _ = engine.register_employee("Gate", &format!("91{n:08}"));
                        }
                        let _ = engine.summary();
                        let _ = engine.sales();
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_conserved(&engine, 10_000);
    for root in roots.iter() {
        assert!(engine.get_share(root).unwrap().used);
    }
}

/// Revoking a child while its siblings are issued keeps the parent whole.
#[test]
fn revoke_races_reshare() {
    let detector = start_deadlock_detector();
    let engine = engine(1_000);
    let parent = engine.allocate_root(&mobile(0), "Host", 200, None).unwrap();
    for n in 1..=50 {
        engine
            .reshare(&parent.token, &mobile(n), "Guest", 1, None)
            .unwrap();
    }

    let revoker = {
        let engine = engine.clone();
        thread::spawn(move || {
            (1..=50)
                .filter(|&n| engine.revoke(&mobile(n)).is_ok())
                .count()
        })
    };
    let issuer = {
        let engine = engine.clone();
        let parent = parent.token.clone();
        thread::spawn(move || {
            (51..=100)
                .filter(|&n| engine.reshare(&parent, &mobile(n), "Guest", 1, None).is_ok())
                .count()
        })
    };
    let revoked = revoker.join().expect("Thread panicked");
    let issued = issuer.join().expect("Thread panicked");

    stop_deadlock_detector(detector);

    assert_eq!(revoked, 50);
    assert_eq!(issued, 50);
    assert_eq!(
        engine.get_share(&parent.token).unwrap().remaining,
        Some(150)
    );
    assert_conserved(&engine, 1_000);
}

/// Totals read while roots are issued and revoked never drift.
#[test]
fn summary_total_is_stable_under_churn() {
    let detector = start_deadlock_detector();
    let engine = engine(200);
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let engine = engine.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                assert_eq!(engine.summary().total, 200);
            }
        })
    };

    let writers: Vec<_> = (0..8)
        .map(|t| {
            let engine = engine.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let recipient = mobile(t * 1_000 + i % 10);
                    if engine.allocate_root(&recipient, "Guest", 3, None).is_err() {
                        let _ = engine.revoke(&recipient);
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().expect("Thread panicked");
    }
    done.store(true, Ordering::SeqCst);
    reader.join().expect("Reader saw a drifting total");

    stop_deadlock_detector(detector);

    assert_conserved(&engine, 200);
}
