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

//! Engine public API integration tests.

use pass_ledger_rs::{
    EmployeeId, Engine, InputError, PassError, PoolRequest, ScanReason, ScannerIdentity,
    ShareRecord, Token,
};
use std::collections::BTreeSet;

const ALICE: &str = "9999900000";
const BOB: &str = "9999900001";
const CAROL: &str = "9999900002";

fn engine(available: i64) -> Engine {
    let engine = Engine::new();
    engine
        .create_pool(PoolRequest::new("uploads/pass.png", available))
        .unwrap();
    engine
}

fn allocate(engine: &Engine, mobile: &str, name: &str, quantity: i64) -> ShareRecord {
    engine.allocate_root(mobile, name, quantity, None).unwrap()
}

fn reshare(engine: &Engine, parent: &Token, mobile: &str, name: &str, quantity: i64) -> ShareRecord {
    engine.reshare(parent, mobile, name, quantity, None).unwrap()
}

fn remaining(engine: &Engine, token: &Token) -> Option<u32> {
    engine.get_share(token).unwrap().remaining
}

// === Scenarios ===

#[test]
fn scenario_a_root_allocation() {
    let engine = engine(100);
    let alice = allocate(&engine, ALICE, "Alice", 10);

    assert_eq!(engine.pool().unwrap().available, 90);
    assert_eq!(alice.issued, 10);
    assert_eq!(alice.remaining, Some(10));
    assert_eq!(alice.parent_token, None);
    assert!(!alice.used);
}

#[test]
fn scenario_b_reshare_leaves_sender_one() {
    let engine = engine(100);
    let alice = allocate(&engine, ALICE, "Alice", 10);

    assert_eq!(
        engine.reshare(&alice.token, BOB, "Bob", 10, None),
        Err(PassError::WouldExhaustSender { max: 9 })
    );
    assert_eq!(remaining(&engine, &alice.token), Some(10));

    let bob = reshare(&engine, &alice.token, BOB, "Bob", 9);
    assert_eq!(remaining(&engine, &alice.token), Some(1));
    assert_eq!(bob.issued, 9);
    assert_eq!(bob.remaining, Some(9));
    assert_eq!(bob.parent_token, Some(alice.token.clone()));
}

#[test]
fn scenario_c_duplicate_recipient() {
    let engine = engine(100);
    allocate(&engine, ALICE, "Alice", 10);

    for mobile in [ALICE, "+919999900000", "91 99999 00000"] {
        assert_eq!(
            engine.allocate_root(mobile, "Alice", 1, None),
            Err(PassError::DuplicateRecipient)
        );
    }
    assert_eq!(engine.pool().unwrap().available, 90);
}

#[test]
fn scenario_d_mark_used_exactly_once() {
    let engine = engine(100);
    let alice = allocate(&engine, ALICE, "Alice", 10);
    let bob = reshare(&engine, &alice.token, BOB, "Bob", 9);

    let used = engine.mark_used(&bob.token).unwrap();
    assert!(used.used);
    assert_eq!(engine.mark_used(&bob.token), Err(PassError::AlreadyUsed));
    assert!(engine.get_share(&bob.token).unwrap().used);
    assert!(!engine.get_share(&alice.token).unwrap().used);
}

#[test]
fn scenario_e_scan_by_unlisted_scanner_is_forbidden() {
    let engine = engine(100);
    let listed = engine.register_employee("Gate A", "9000000001").unwrap();
    let alice = engine
        .allocate_root(ALICE, "Alice", 2, Some(BTreeSet::from([listed.id])))
        .unwrap();
    let unlisted = engine.directory().add("Gate B", "9000000002").unwrap();

    let outcome = engine
        .scan(&alice.token, &ScannerIdentity::id(unlisted.id))
        .unwrap();
    assert!(!outcome.allowed);
    assert_eq!(outcome.reason, ScanReason::Forbidden);
    assert!(!engine.get_share(&alice.token).unwrap().used);
}

// === Allocation ===

#[test]
fn allocation_exhausting_pool_is_rejected() {
    let engine = engine(5);
    allocate(&engine, ALICE, "Alice", 5);
    assert_eq!(engine.pool().unwrap().available, 0);

    assert_eq!(
        engine.allocate_root(BOB, "Bob", 1, None),
        Err(PassError::ResourceExhausted {
            available: 0,
            requested: 1
        })
    );
    assert!(engine.ledger().find_by_mobile(&BOB.parse().unwrap()).is_none());
}

#[test]
fn allocation_without_pool_fails() {
    let engine = Engine::new();
    assert_eq!(
        engine.allocate_root(ALICE, "Alice", 1, None),
        Err(PassError::PoolNotFound)
    );
}

#[test]
fn allocation_validates_input() {
    let engine = engine(10);
    assert_eq!(
        engine.allocate_root(ALICE, "", 1, None),
        Err(PassError::InvalidInput(InputError::MissingName))
    );
    assert_eq!(
        engine.allocate_root(ALICE, "Alice", -1, None),
        Err(PassError::InvalidInput(InputError::InvalidQuantity))
    );
    assert_eq!(
        engine.allocate_root("555-0100", "Alice", 1, None),
        Err(PassError::InvalidInput(InputError::InvalidMobile))
    );
    assert_eq!(engine.pool().unwrap().available, 10);
}

// === Re-sharing ===

#[test]
fn reshare_from_unknown_parent() {
    let engine = engine(10);
    assert_eq!(
        engine.reshare(&Token::from("nope"), BOB, "Bob", 1, None),
        Err(PassError::ParentNotFound)
    );
    assert!(engine.ledger().is_empty());
}

#[test]
fn reshare_more_than_balance_would_exhaust() {
    let engine = engine(10);
    let alice = allocate(&engine, ALICE, "Alice", 5);
    assert_eq!(
        engine.reshare(&alice.token, BOB, "Bob", 6, None),
        Err(PassError::WouldExhaustSender { max: 4 })
    );
    reshare(&engine, &alice.token, BOB, "Bob", 4);
    assert_eq!(remaining(&engine, &alice.token), Some(1));
}

#[test]
fn single_pass_holder_cannot_reshare() {
    let engine = engine(10);
    let alice = allocate(&engine, ALICE, "Alice", 1);
    assert_eq!(
        engine.reshare(&alice.token, BOB, "Bob", 1, None),
        Err(PassError::WouldExhaustSender { max: 0 })
    );
}

#[test]
fn reshare_to_existing_holder_is_duplicate() {
    let engine = engine(10);
    let alice = allocate(&engine, ALICE, "Alice", 5);
    allocate(&engine, BOB, "Bob", 1);
    assert_eq!(
        engine.reshare(&alice.token, BOB, "Bob", 2, None),
        Err(PassError::DuplicateRecipient)
    );
    assert_eq!(
        engine.reshare(&alice.token, ALICE, "Alice", 2, None),
        Err(PassError::DuplicateRecipient)
    );
    assert_eq!(remaining(&engine, &alice.token), Some(5));
}

#[test]
fn reshare_tree_does_not_touch_pool() {
    let engine = engine(100);
    let alice = allocate(&engine, ALICE, "Alice", 10);
    let bob = reshare(&engine, &alice.token, BOB, "Bob", 6);
    let carol = reshare(&engine, &bob.token, CAROL, "Carol", 3);

    assert_eq!(engine.pool().unwrap().available, 90);
    assert_eq!(remaining(&engine, &alice.token), Some(4));
    assert_eq!(remaining(&engine, &bob.token), Some(3));
    assert_eq!(carol.parent_token, Some(bob.token));

    let summary = engine.summary();
    assert_eq!(summary.sold, 10);
    assert_eq!(summary.total, 100);
}

// === Scanning and redemption ===

#[test]
fn scan_allows_then_reports_already_used() {
    let engine = engine(10);
    let gate = engine.register_employee("Gate", "9000000001").unwrap();
    let alice = allocate(&engine, ALICE, "Alice", 2);
    let scanner = ScannerIdentity::mobile("+91 90000 00001");

    let first = engine.scan(&alice.token, &scanner).unwrap();
    let second = engine.scan(&alice.token, &scanner).unwrap();
    assert!(first.allowed);
    assert_eq!(first.reason, ScanReason::Entry);
    assert_eq!(first, second);
    assert_eq!(first.name, "Alice");
    assert!(!engine.get_share(&alice.token).unwrap().used);

    engine.mark_used(&alice.token).unwrap();
    let after = engine
        .scan(&alice.token, &ScannerIdentity::id(gate.id))
        .unwrap();
    assert!(!after.allowed);
    assert_eq!(after.reason, ScanReason::AlreadyUsed);
    assert!(after.used);
}

#[test]
fn forbidden_takes_precedence_over_already_used() {
    let engine = engine(10);
    let alice = engine
        .allocate_root(ALICE, "Alice", 2, Some(BTreeSet::new()))
        .unwrap();
    let gate = engine.directory().add("Gate", "9000000001").unwrap();
    engine.mark_used(&alice.token).unwrap();

    let outcome = engine
        .scan(&alice.token, &ScannerIdentity::id(gate.id))
        .unwrap();
    assert_eq!(outcome.reason, ScanReason::Forbidden);
}

#[test]
fn scan_errors() {
    let engine = engine(10);
    let alice = allocate(&engine, ALICE, "Alice", 2);
    let gate = engine.register_employee("Gate", "9000000001").unwrap();

    assert_eq!(
        engine.scan(&Token::from("nope"), &ScannerIdentity::id(gate.id)),
        Err(PassError::ShareNotFound)
    );
    assert_eq!(
        engine.scan(&alice.token, &ScannerIdentity::id(EmployeeId(999))),
        Err(PassError::Unauthorized)
    );
    assert_eq!(
        engine.scan(&alice.token, &ScannerIdentity::default()),
        Err(PassError::Unauthorized)
    );
}

#[test]
fn mark_used_unknown_token() {
    let engine = engine(10);
    assert_eq!(
        engine.mark_used(&Token::from("nope")),
        Err(PassError::ShareNotFound)
    );
}

// === Revocation ===

#[test]
fn revoke_root_restores_pool() {
    let engine = engine(10);
    allocate(&engine, ALICE, "Alice", 4);
    let revoked = engine.revoke("+919999900000").unwrap();

    assert_eq!(revoked.issued, 4);
    assert_eq!(engine.pool().unwrap().available, 10);
    assert!(engine.ledger().is_empty());

    // The mobile is free again.
    allocate(&engine, ALICE, "Alice", 2);
}

#[test]
fn revoke_rules() {
    let engine = engine(10);
    let alice = allocate(&engine, ALICE, "Alice", 5);
    let bob = reshare(&engine, &alice.token, BOB, "Bob", 2);

    assert_eq!(engine.revoke(CAROL), Err(PassError::ShareNotFound));
    assert_eq!(engine.revoke(ALICE), Err(PassError::HasDependents));

    engine.mark_used(&bob.token).unwrap();
    assert_eq!(engine.revoke(BOB), Err(PassError::AlreadyUsed));
    assert_eq!(remaining(&engine, &alice.token), Some(3));
    assert_eq!(engine.ledger().len(), 2);
}

#[test]
fn revoke_without_pool_loses_nothing() {
    let engine = engine(10);
    allocate(&engine, ALICE, "Alice", 4);
    let restored = Engine::from_snapshot(pass_ledger_rs::Snapshot {
        pool: None,
        ..engine.snapshot()
    })
    .unwrap();

    let before = restored.summary();
    assert_eq!(restored.revoke(ALICE), Err(PassError::PoolNotFound));
    assert_eq!(restored.summary(), before);
    assert_eq!(restored.ledger().len(), 1);
}

#[test]
fn snapshot_with_orphan_child_is_rejected() {
    let engine = engine(10);
    let alice = allocate(&engine, ALICE, "Alice", 5);
    reshare(&engine, &alice.token, BOB, "Bob", 2);

    let mut snapshot = engine.snapshot();
    for share in &mut snapshot.shares {
        if share.parent_token.is_some() {
            share.parent_token = Some(Token::from("ghost"));
        }
    }
    assert!(matches!(
        Engine::from_snapshot(snapshot),
        Err(PassError::Storage(_))
    ));
}

// === Reporting ===

#[test]
fn summary_without_pool() {
    let engine = Engine::new();
    let summary = engine.summary();
    assert_eq!((summary.total, summary.available, summary.sold), (0, 0, 0));
}

#[test]
fn sales_are_newest_first() {
    let engine = engine(100);
    let alice = allocate(&engine, ALICE, "Alice", 10);
    let bob = reshare(&engine, &alice.token, BOB, "Bob", 3);
    let carol = allocate(&engine, CAROL, "Carol", 1);

    let tokens: Vec<Token> = engine.sales().into_iter().map(|sale| sale.token).collect();
    assert_eq!(tokens, vec![carol.token, bob.token, alice.token.clone()]);

    let directory: Vec<Token> = engine
        .shared_tokens()
        .into_iter()
        .map(|entry| entry.token)
        .collect();
    assert_eq!(directory.first(), Some(&alice.token));
}

#[test]
fn lookup_includes_pool_image_and_is_stable() {
    let engine = engine(100);
    let alice = allocate(&engine, ALICE, "Alice", 10);

    let first = engine.lookup(&alice.token).unwrap();
    let second = engine.lookup(&alice.token).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.image.0, "uploads/pass.png");
    assert_eq!(first.count, 10);
    assert_eq!(first.remaining, 10);

    assert_eq!(
        engine.lookup(&Token::from("nope")),
        Err(PassError::ShareNotFound)
    );
}

#[test]
fn lookup_without_pool() {
    let engine = engine(10);
    let alice = allocate(&engine, ALICE, "Alice", 2);
    let snapshot = engine.snapshot();
    let restored = Engine::from_snapshot(pass_ledger_rs::Snapshot {
        pool: None,
        ..snapshot
    })
    .unwrap();
    assert_eq!(restored.lookup(&alice.token), Err(PassError::PoolNotFound));
}

#[test]
fn lookup_backfill_does_not_persist() {
    let engine = engine(10);
    let alice = allocate(&engine, ALICE, "Alice", 4);

    let mut snapshot = engine.snapshot();
    snapshot.shares[0].remaining = None;
    let legacy = Engine::from_snapshot(snapshot).unwrap();

    assert_eq!(legacy.lookup(&alice.token).unwrap().remaining, 4);
    assert_eq!(legacy.lookup(&alice.token).unwrap().remaining, 4);
    assert_eq!(legacy.get_share(&alice.token).unwrap().remaining, None);
    assert_eq!(
        legacy.reshare(&alice.token, BOB, "Bob", 1, None),
        Err(PassError::InsufficientBalance)
    );
}

// === Pool administration ===

#[test]
fn pool_replace_and_update() {
    let engine = engine(10);
    allocate(&engine, ALICE, "Alice", 4);

    let pool = engine
        .update_pool(PoolRequest {
            image: None,
            count: Some(50),
        })
        .unwrap();
    assert_eq!(pool.available, 50);
    assert_eq!(pool.image.0, "uploads/pass.png");

    let pool = engine.create_pool(PoolRequest::new("new.png", 7)).unwrap();
    assert_eq!(pool.available, 7);
    assert_eq!(engine.ledger().len(), 1);
    assert_eq!(engine.summary().total, 11);

    assert_eq!(
        Engine::new().update_pool(PoolRequest::new("x.png", 1)),
        Err(PassError::PoolNotFound)
    );
}
