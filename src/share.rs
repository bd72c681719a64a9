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

//! Share management.
//!
//! A share is one recipient's allocation, either drawn from the pool (root)
//! or re-shared from another share (child).
//!
//! Redemption state machine:
//!
//! ```text
//!   Unused ──mark_used──► Used (terminal)
//! ```
//!
//! # Example
//!
//! ```
//! use pass_ledger_rs::{Mobile, Share, ShareRecord};
//! use std::collections::BTreeSet;
//!
//! let mobile = Mobile::parse("9999900000").unwrap();
//! let share = Share::new(ShareRecord::issue(mobile, "Alice", 10, None, BTreeSet::new(), 0));
//! assert_eq!(share.remaining(), Some(10));
//! assert!(!share.used());
//! ```

use crate::base::{EmployeeId, Token};
use crate::error::PassError;
use crate::mobile::Mobile;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Plain data of one share.
///
/// `remaining` is optional only because records written before balances were
/// tracked lack it. Every share created by this crate has it set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub token: Token,
    pub mobile: Mobile,
    pub name: String,
    pub issued: u32,
    #[serde(default)]
    pub remaining: Option<u32>,
    #[serde(default)]
    pub parent_token: Option<Token>,
    #[serde(default)]
    pub used: bool,
    #[serde(default)]
    pub scanners: BTreeSet<EmployeeId>,
    pub created_at: DateTime<Utc>,
    /// Creation order, breaks ties between equal timestamps.
    #[serde(default)]
    pub sequence: u64,
}

impl ShareRecord {
    /// Builds a fresh unused share with `issued == remaining == quantity`.
    pub fn issue(
        mobile: Mobile,
        name: impl Into<String>,
        quantity: u32,
        parent_token: Option<Token>,
        scanners: BTreeSet<EmployeeId>,
        sequence: u64,
    ) -> Self {
        Self {
            token: Token::generate(),
            mobile,
            name: name.into(),
            issued: quantity,
            remaining: Some(quantity),
            parent_token,
            used: false,
            scanners,
            created_at: Utc::now(),
            sequence,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_token.is_none()
    }

    /// Nothing of this share is outstanding downstream.
    fn is_leaf(&self) -> bool {
        self.remaining.is_none_or(|remaining| remaining == self.issued)
    }

    fn assert_invariants(&self) {
        debug_assert!(self.issued >= 1, "Invariant violated: share issued zero passes");
        debug_assert!(
            self.remaining.is_none_or(|remaining| remaining <= self.issued),
            "Invariant violated: remaining {:?} exceeds issued {}",
            self.remaining,
            self.issued
        );
    }

    /// Moves `quantity` out of this share's balance for a child share.
    ///
    /// The sender must keep at least one pass, so `quantity` must be
    /// strictly below the balance.
    fn debit(&mut self, quantity: u32) -> Result<(), PassError> {
        let Some(remaining) = self.remaining else {
            return Err(PassError::InsufficientBalance);
        };
        if quantity >= remaining {
            return Err(PassError::WouldExhaustSender {
                max: remaining.saturating_sub(1),
            });
        }
        self.remaining = Some(remaining - quantity);
        self.assert_invariants();
        Ok(())
    }

    /// Returns units from a revoked child share.
    fn credit(&mut self, quantity: u32) {
        if let Some(remaining) = self.remaining {
            self.remaining = Some(remaining.saturating_add(quantity).min(self.issued));
        }
        self.assert_invariants();
    }

    /// The single `Unused -> Used` transition.
    fn mark_used(&mut self) -> Result<(), PassError> {
        if self.used {
            return Err(PassError::AlreadyUsed);
        }
        self.used = true;
        Ok(())
    }

    fn check_revocable(&self) -> Result<(), PassError> {
        if self.used {
            return Err(PassError::AlreadyUsed);
        }
        if !self.is_leaf() {
            return Err(PassError::HasDependents);
        }
        Ok(())
    }
}

/// A live share in the ledger.
///
/// All mutation happens under the inner lock, so each state change is a
/// single compare-and-set on this record.
#[derive(Debug)]
pub struct Share {
    inner: Mutex<ShareRecord>,
}

impl Share {
    pub fn new(record: ShareRecord) -> Self {
        Self {
            inner: Mutex::new(record),
        }
    }

    /// Copy of the current state.
    pub fn record(&self) -> ShareRecord {
        self.inner.lock().clone()
    }

    pub fn issued(&self) -> u32 {
        self.inner.lock().issued
    }

    pub fn remaining(&self) -> Option<u32> {
        self.inner.lock().remaining
    }

    pub fn used(&self) -> bool {
        self.inner.lock().used
    }

    pub fn is_root(&self) -> bool {
        self.inner.lock().is_root()
    }

    pub(crate) fn debit(&self, quantity: u32) -> Result<(), PassError> {
        self.inner.lock().debit(quantity)
    }

    pub(crate) fn credit(&self, quantity: u32) {
        self.inner.lock().credit(quantity);
    }

    pub(crate) fn mark_used(&self) -> Result<ShareRecord, PassError> {
        let mut data = self.inner.lock();
        data.mark_used()?;
        Ok(data.clone())
    }

    pub(crate) fn check_revocable(&self) -> Result<(), PassError> {
        self.inner.lock().check_revocable()
    }

    /// Adds a scanner to the allow-list. Returns false if already present.
    pub(crate) fn grant(&self, employee: EmployeeId) -> bool {
        self.inner.lock().scanners.insert(employee)
    }

    /// Replaces an empty allow-list. Returns false if the list was non-empty.
    pub(crate) fn fill_scanners(&self, employees: &BTreeSet<EmployeeId>) -> bool {
        let mut data = self.inner.lock();
        if !data.scanners.is_empty() {
            return false;
        }
        data.scanners = employees.clone();
        true
    }
}
