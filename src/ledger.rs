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

//! Ledger store: the singleton pool and every issued share.
//!
//! Shares are keyed by token, with a secondary unique index from canonical
//! mobile to token. Uniqueness is enforced with the [`DashMap`] entry API so
//! the check and the insert happen under one shard lock.
//!
//! Locks are always taken in the same order: recipient index entry, then
//! the pool mutex, then share table shard, then a share's mutex. No path
//! holds a share table shard while reaching for the pool.

use crate::base::{EmployeeId, ImageAsset, Token};
use crate::error::PassError;
use crate::mobile::Mobile;
use crate::pool::Pool;
use crate::share::{Share, ShareRecord};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct Ledger {
    /// The singleton pool. `None` until an administrator creates one.
    pool: Mutex<Option<Pool>>,
    /// Live shares indexed by token.
    shares: DashMap<Token, Share>,
    /// Live recipients, at most one share each.
    recipients: DashMap<Mobile, Token>,
    /// Creation counter for stable ordering.
    sequence: AtomicU64,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(None),
            shares: DashMap::new(),
            recipients: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    // === Pool ===

    pub fn pool(&self) -> Option<Pool> {
        self.pool.lock().clone()
    }

    /// Runs `f` with the pool locked. Root shares are neither issued nor
    /// revoked meanwhile, so `f` sees the pool and the shares in step.
    pub(crate) fn with_pool<R>(&self, f: impl FnOnce(Option<&Pool>) -> R) -> R {
        f(self.pool.lock().as_ref())
    }

    /// Replaces the pool; `available` restarts at the given count.
    pub fn replace_pool(&self, pool: Pool) {
        *self.pool.lock() = Some(pool);
    }

    /// Updates the image and/or count of the existing pool.
    pub fn update_pool(
        &self,
        image: Option<ImageAsset>,
        available: Option<u32>,
    ) -> Result<Pool, PassError> {
        let mut guard = self.pool.lock();
        let pool = guard.as_mut().ok_or(PassError::PoolNotFound)?;
        if let Some(image) = image {
            pool.image = image;
        }
        if let Some(available) = available {
            pool.available = available;
        }
        Ok(pool.clone())
    }

    // === Issuing ===

    /// Moves `quantity` from the pool into a new root share.
    ///
    /// # Errors
    ///
    /// - [`PassError::DuplicateRecipient`] - Mobile already holds a share.
    /// - [`PassError::PoolNotFound`] - No pool exists.
    /// - [`PassError::ResourceExhausted`] - Pool cannot cover `quantity`.
    pub(crate) fn issue_root(
        &self,
        mobile: Mobile,
        name: &str,
        quantity: u32,
        scanners: BTreeSet<EmployeeId>,
    ) -> Result<ShareRecord, PassError> {
        match self.recipients.entry(mobile) {
            Entry::Occupied(_) => Err(PassError::DuplicateRecipient),
            Entry::Vacant(slot) => {
                // Held until the share is in the table so pool readers never
                // see the units in neither place.
                let mut pool = self.pool.lock();
                pool.as_mut()
                    .ok_or(PassError::PoolNotFound)?
                    .withdraw(quantity)?;

                let record = ShareRecord::issue(
                    slot.key().clone(),
                    name,
                    quantity,
                    None,
                    scanners,
                    self.next_sequence(),
                );
                self.shares
                    .insert(record.token.clone(), Share::new(record.clone()));
                drop(pool);
                slot.insert(record.token.clone());
                Ok(record)
            }
        }
    }

    /// Moves `quantity` from a parent share into a new child share.
    ///
    /// # Errors
    ///
    /// - [`PassError::DuplicateRecipient`] - Mobile already holds a share.
    /// - [`PassError::ParentNotFound`] - No share has `parent_token`.
    /// - [`PassError::WouldExhaustSender`] - Parent would keep nothing.
    /// - [`PassError::InsufficientBalance`] - Parent balance is unknown.
    pub(crate) fn issue_child(
        &self,
        parent_token: &Token,
        mobile: Mobile,
        name: &str,
        quantity: u32,
        scanners: BTreeSet<EmployeeId>,
    ) -> Result<ShareRecord, PassError> {
        match self.recipients.entry(mobile) {
            Entry::Occupied(_) => Err(PassError::DuplicateRecipient),
            Entry::Vacant(slot) => {
                // The parent's shard guard must be gone before inserting the
                // child, which may hash to the same shard.
                {
                    let parent = self
                        .shares
                        .get(parent_token)
                        .ok_or(PassError::ParentNotFound)?;
                    parent.debit(quantity)?;
                }

                let record = ShareRecord::issue(
                    slot.key().clone(),
                    name,
                    quantity,
                    Some(parent_token.clone()),
                    scanners,
                    self.next_sequence(),
                );
                self.shares
                    .insert(record.token.clone(), Share::new(record.clone()));
                slot.insert(record.token.clone());
                Ok(record)
            }
        }
    }

    // === Redemption ===

    pub(crate) fn mark_used(&self, token: &Token) -> Result<ShareRecord, PassError> {
        self.shares
            .get(token)
            .ok_or(PassError::ShareNotFound)?
            .mark_used()
    }

    // === Reversal ===

    /// Deletes the share held by `mobile` and returns its units upstream.
    ///
    /// Root shares return to the pool, child shares to their parent. Only
    /// unused shares with nothing outstanding downstream qualify, and the
    /// share is kept when the units have nowhere to go.
    ///
    /// # Errors
    ///
    /// - [`PassError::ShareNotFound`] - The mobile holds no share.
    /// - [`PassError::HasDependents`] / [`PassError::AlreadyUsed`] - Not revocable.
    /// - [`PassError::PoolNotFound`] - Root share but no pool exists.
    /// - [`PassError::ParentNotFound`] - Child share whose parent is missing.
    pub(crate) fn revoke(&self, mobile: &Mobile) -> Result<ShareRecord, PassError> {
        let Entry::Occupied(slot) = self.recipients.entry(mobile.clone()) else {
            return Err(PassError::ShareNotFound);
        };

        let current = self
            .shares
            .get(slot.get())
            .ok_or(PassError::ShareNotFound)?
            .record();

        // Without a recorded balance the leaf check cannot see children, and
        // such a share can no longer gain any.
        if current.remaining.is_none() && self.has_children(&current.token) {
            return Err(PassError::HasDependents);
        }

        // A parent stays while its children are live, so checking it up
        // front is enough. The pool lock is held through the removal.
        let mut pool = match &current.parent_token {
            None => {
                let pool = self.pool.lock();
                if pool.is_none() {
                    return Err(PassError::PoolNotFound);
                }
                Some(pool)
            }
            Some(parent) => {
                if !self.shares.contains_key(parent) {
                    return Err(PassError::ParentNotFound);
                }
                None
            }
        };

        let mut verdict = Err(PassError::ShareNotFound);
        let removed = self.shares.remove_if(slot.get(), |_, share| {
            verdict = share.check_revocable();
            verdict.is_ok()
        });
        verdict?;
        let (_, share) = removed.ok_or(PassError::ShareNotFound)?;
        let record = share.record();

        if let Some(pool) = pool.as_deref_mut().and_then(Option::as_mut) {
            pool.restore(record.issued);
        } else if let Some(parent) = record
            .parent_token
            .as_ref()
            .and_then(|token| self.shares.get(token))
        {
            parent.credit(record.issued);
        }
        drop(pool);
        slot.remove();
        Ok(record)
    }

    fn has_children(&self, token: &Token) -> bool {
        self.shares
            .iter()
            .any(|entry| entry.value().record().parent_token.as_ref() == Some(token))
    }

    // === Scanner grants ===

    /// Adds `employees` to one share's allow-list and returns its new state.
    pub(crate) fn grant(&self, token: &Token, employees: &[EmployeeId]) -> Option<ShareRecord> {
        let share = self.shares.get(token)?;
        for employee in employees {
            share.grant(*employee);
        }
        Some(share.record())
    }

    /// Adds `employee` to every share's allow-list. Returns how many changed.
    pub(crate) fn grant_all(&self, employee: EmployeeId) -> usize {
        self.shares
            .iter()
            .filter(|entry| entry.value().grant(employee))
            .count()
    }

    /// Fills every empty allow-list with `employees`. Returns how many changed.
    pub(crate) fn fill_empty_scanners(&self, employees: &BTreeSet<EmployeeId>) -> usize {
        self.shares
            .iter()
            .filter(|entry| entry.value().fill_scanners(employees))
            .count()
    }

    // === Reads ===

    pub fn get(&self, token: &Token) -> Option<ShareRecord> {
        self.shares.get(token).map(|share| share.record())
    }

    pub fn find_by_mobile(&self, mobile: &Mobile) -> Option<ShareRecord> {
        let token = self.recipients.get(mobile)?.value().clone();
        self.get(&token)
    }

    /// Returns an iterator over all live shares.
    pub fn shares(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, Token, Share>> {
        self.shares.iter()
    }

    /// Copies of all live shares, in no particular order.
    pub fn records(&self) -> Vec<ShareRecord> {
        self.shares.iter().map(|entry| entry.value().record()).collect()
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    // === Restore ===

    /// Loads persisted state into an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns [`PassError::Storage`] when records repeat a token or mobile,
    /// or name a parent that is not among them; nothing is loaded in that
    /// case.
    pub(crate) fn load(
        &self,
        pool: Option<Pool>,
        records: Vec<ShareRecord>,
    ) -> Result<(), PassError> {
        let mut mobiles = HashSet::new();
        let mut tokens = HashSet::new();
        for record in &records {
            if !mobiles.insert(&record.mobile) {
                return Err(PassError::Storage(format!(
                    "duplicate recipient {} in stored ledger",
                    record.mobile
                )));
            }
            if !tokens.insert(&record.token) {
                return Err(PassError::Storage(format!(
                    "duplicate token {} in stored ledger",
                    record.token
                )));
            }
        }
        for record in &records {
            if let Some(parent) = &record.parent_token {
                if !tokens.contains(parent) {
                    return Err(PassError::Storage(format!(
                        "share {} names unknown parent {parent} in stored ledger",
                        record.token
                    )));
                }
            }
        }

        for record in records {
            self.sequence
                .fetch_max(record.sequence + 1, Ordering::Relaxed);
            self.recipients
                .insert(record.mobile.clone(), record.token.clone());
            self.shares.insert(record.token.clone(), Share::new(record));
        }
        *self.pool.lock() = pool;
        Ok(())
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
