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

//! Pass distribution engine.
//!
//! The [`Engine`] is the entry point for every ledger operation:
//!
//! - **Allocation**: issue passes from the pool to a recipient.
//! - **Re-sharing**: a holder hands part of their balance to someone else,
//!   always keeping at least one pass.
//! - **Scanning**: gate staff check a token; this never consumes the pass.
//! - **Redemption**: an explicit second step marks the pass used, once.
//! - **Revocation**: delete an untouched leaf share and return its units.
//!
//! # Thread Safety
//!
//! Shares live in a [`DashMap`](dashmap::DashMap) with a lock per share, and
//! the pool sits behind its own lock. Every mutation is a single
//! check-and-write under one lock, so concurrent callers cannot double-spend
//! the pool, a parent's balance, or a redemption.

use crate::base::{EmployeeId, Token};
use crate::directory::{Employee, EmployeeDirectory, Roster, ScannerIdentity};
use crate::error::PassError;
use crate::ledger::Ledger;
use crate::mobile::Mobile;
use crate::pool::Pool;
use crate::report::{self, PassView, SaleEntry, Summary, TokenEntry};
use crate::request::{Operation, PoolRequest, Receipt, ShareRequest, ValidShare};
use crate::share::ShareRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Why a scan was allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanReason {
    /// Unused pass, authorized scanner.
    Entry,
    /// Scanner is not on this pass's allow-list.
    Forbidden,
    /// The pass was already redeemed.
    AlreadyUsed,
}

/// Verdict of a scan. A denial is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanOutcome {
    pub allowed: bool,
    pub reason: ScanReason,
    pub token: Token,
    pub name: String,
    pub mobile: Mobile,
    pub used: bool,
}

/// Pass distribution engine over a ledger and an employee directory.
///
/// # Invariants
///
/// - `Pool.available` never goes negative.
/// - Every unit moved into a share was taken from the pool or a parent.
/// - A re-sharing parent always keeps at least one pass.
/// - A share goes from unused to used at most once.
pub struct Engine<D: EmployeeDirectory = Roster> {
    ledger: Ledger,
    directory: D,
}

impl Engine<Roster> {
    /// Creates an engine with an empty ledger and an empty roster.
    pub fn new() -> Self {
        Self::with_directory(Roster::new())
    }

    /// Adds an employee and lets them scan every existing share.
    ///
    /// A share issued concurrently is covered by the issuing side, which
    /// re-reads the directory once the share is in the ledger.
    pub fn register_employee(&self, name: &str, mobile: &str) -> Result<Employee, PassError> {
        let employee = self.directory.add(name, mobile)?;
        let granted = self.ledger.grant_all(employee.id);
        info!(employee = %employee.id, mobile = %employee.mobile, granted, "employee registered");
        Ok(employee)
    }

    pub fn employees(&self) -> Vec<Employee> {
        self.directory.employees()
    }
}

impl Default for Engine<Roster> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: EmployeeDirectory> Engine<D> {
    /// Creates an engine backed by an external employee directory.
    pub fn with_directory(directory: D) -> Self {
        Engine {
            ledger: Ledger::new(),
            directory,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    // === Pool administration ===

    /// Replaces the pool. Existing shares are untouched.
    pub fn create_pool(&self, request: PoolRequest) -> Result<Pool, PassError> {
        let (image, available) = request.validate_create()?;
        let pool = Pool::new(image, available);
        self.ledger.replace_pool(pool.clone());
        info!(available, image = %pool.image, "pool replaced");
        Ok(pool)
    }

    /// Edits the image and/or the available count of the current pool.
    pub fn update_pool(&self, request: PoolRequest) -> Result<Pool, PassError> {
        let (image, available) = request.validate_update()?;
        let pool = self.ledger.update_pool(image, available)?;
        info!(available = pool.available, image = %pool.image, "pool updated");
        Ok(pool)
    }

    pub fn pool(&self) -> Result<Pool, PassError> {
        self.ledger.pool().ok_or(PassError::PoolNotFound)
    }

    // === Issuing ===

    /// Issues `quantity` passes from the pool to a new root share.
    ///
    /// `scanners` defaults to every employee known to the directory.
    ///
    /// # Errors
    ///
    /// - [`PassError::InvalidInput`] - Bad mobile, blank name, or `quantity < 1`.
    /// - [`PassError::DuplicateRecipient`] - The mobile already holds a share.
    /// - [`PassError::PoolNotFound`] - No pool exists.
    /// - [`PassError::ResourceExhausted`] - The pool cannot cover `quantity`.
    pub fn allocate_root(
        &self,
        mobile: &str,
        name: &str,
        quantity: i64,
        scanners: Option<BTreeSet<EmployeeId>>,
    ) -> Result<ShareRecord, PassError> {
        let mut request = ShareRequest::root(mobile, name, quantity);
        request.scanners = scanners;
        self.share(request)
    }

    /// Re-shares `quantity` passes from the share `parent_token`.
    ///
    /// The parent must keep at least one pass: with a balance of 5 at most 4
    /// can be re-shared.
    ///
    /// # Errors
    ///
    /// - [`PassError::InvalidInput`] - Bad mobile, blank name, or `quantity < 1`.
    /// - [`PassError::DuplicateRecipient`] - The mobile already holds a share.
    /// - [`PassError::ParentNotFound`] - No share has `parent_token`.
    /// - [`PassError::WouldExhaustSender`] - `quantity >= parent.remaining`.
    /// - [`PassError::InsufficientBalance`] - The parent's balance is unknown.
    pub fn reshare(
        &self,
        parent_token: &Token,
        mobile: &str,
        name: &str,
        quantity: i64,
        scanners: Option<BTreeSet<EmployeeId>>,
    ) -> Result<ShareRecord, PassError> {
        let mut request = ShareRequest::child(parent_token.clone(), mobile, name, quantity);
        request.scanners = scanners;
        self.share(request)
    }

    /// Issues passes from the pool or from `request.parent_token` if set.
    pub fn share(&self, request: ShareRequest) -> Result<ShareRecord, PassError> {
        let ValidShare {
            mobile,
            name,
            quantity,
            parent_token,
            scanners,
        } = request.validate()?;
        let known = self.directory.list_all();
        let scanners = scanners.unwrap_or_else(|| known.clone());

        let share = match parent_token {
            None => {
                let share = self.ledger.issue_root(mobile, &name, quantity, scanners)?;
                info!(token = %share.token, mobile = %share.mobile, quantity, "passes allocated");
                share
            }
            Some(parent_token) => {
                let share =
                    self.ledger
                        .issue_child(&parent_token, mobile, &name, quantity, scanners)?;
                info!(
                    token = %share.token,
                    parent = %parent_token,
                    mobile = %share.mobile,
                    quantity,
                    "passes re-shared"
                );
                share
            }
        };
        Ok(self.grant_late_employees(share, &known))
    }

    /// An employee registered while `share` was being issued can miss the
    /// grant over existing shares; such employees are granted here.
    fn grant_late_employees(&self, share: ShareRecord, known: &BTreeSet<EmployeeId>) -> ShareRecord {
        let late: Vec<EmployeeId> = self
            .directory
            .list_all()
            .difference(known)
            .copied()
            .collect();
        if late.is_empty() {
            return share;
        }
        debug!(token = %share.token, late = late.len(), "granting employees registered mid-issue");
        self.ledger.grant(&share.token, &late).unwrap_or(share)
    }

    // === Redemption ===

    /// Checks whether `scanner` may let the holder of `token` in.
    ///
    /// Never changes the share; see [`Engine::mark_used`].
    ///
    /// # Errors
    ///
    /// - [`PassError::ShareNotFound`] - Unknown token.
    /// - [`PassError::Unauthorized`] - The scanner is not a known employee.
    pub fn scan(&self, token: &Token, scanner: &ScannerIdentity) -> Result<ScanOutcome, PassError> {
        let share = self.ledger.get(token).ok_or(PassError::ShareNotFound)?;
        let employee = self
            .directory
            .resolve(scanner)
            .ok_or(PassError::Unauthorized)?;

        let reason = if !share.scanners.contains(&employee) {
            ScanReason::Forbidden
        } else if share.used {
            ScanReason::AlreadyUsed
        } else {
            ScanReason::Entry
        };
        if reason != ScanReason::Entry {
            debug!(token = %token, employee = %employee, ?reason, "scan denied");
        }

        Ok(ScanOutcome {
            allowed: reason == ScanReason::Entry,
            reason,
            token: share.token,
            name: share.name,
            mobile: share.mobile,
            used: share.used,
        })
    }

    /// Marks the share used. Succeeds at most once per token.
    ///
    /// # Errors
    ///
    /// - [`PassError::ShareNotFound`] - Unknown token.
    /// - [`PassError::AlreadyUsed`] - The share was already redeemed.
    pub fn mark_used(&self, token: &Token) -> Result<ShareRecord, PassError> {
        let share = self.ledger.mark_used(token)?;
        info!(token = %token, mobile = %share.mobile, "pass redeemed");
        Ok(share)
    }

    /// Scans and, if entry is allowed, marks the share used.
    ///
    /// A `Forbidden` verdict becomes [`PassError::Forbidden`].
    pub fn redeem(&self, token: &Token, scanner: &ScannerIdentity) -> Result<ShareRecord, PassError> {
        match self.scan(token, scanner)?.reason {
            ScanReason::Entry => self.mark_used(token),
            ScanReason::Forbidden => Err(PassError::Forbidden),
            ScanReason::AlreadyUsed => Err(PassError::AlreadyUsed),
        }
    }

    // === Reversal ===

    /// Deletes the share held by `mobile` and returns its passes upstream.
    ///
    /// # Errors
    ///
    /// - [`PassError::InvalidInput`] - Bad mobile.
    /// - [`PassError::ShareNotFound`] - The mobile holds no share.
    /// - [`PassError::HasDependents`] - Part of the share was re-shared.
    /// - [`PassError::AlreadyUsed`] - The share was redeemed.
    pub fn revoke(&self, mobile: &str) -> Result<ShareRecord, PassError> {
        let mobile = Mobile::parse(mobile)?;
        let share = self.ledger.revoke(&mobile)?;
        warn!(
            token = %share.token,
            mobile = %share.mobile,
            restored = share.issued,
            root = share.is_root(),
            "share revoked"
        );
        Ok(share)
    }

    // === Scanner grants ===

    /// Lets `employee` scan every existing share. Returns how many changed.
    pub fn grant_scanner(&self, employee: EmployeeId) -> usize {
        let granted = self.ledger.grant_all(employee);
        debug!(employee = %employee, granted, "scanner granted");
        granted
    }

    /// Gives every share with an empty allow-list all known employees.
    pub fn backfill_scanners(&self) -> usize {
        let employees = self.directory.list_all();
        let updated = self.ledger.fill_empty_scanners(&employees);
        info!(updated, employees = employees.len(), "scanner lists backfilled");
        updated
    }

    // === Batch ===

    /// Applies one [`Operation`].
    ///
    /// | Operation | Behavior |
    /// |-----------|----------|
    /// | Allocate | Issues from the pool |
    /// | Reshare | Issues from a parent share |
    /// | Use | Marks a share used |
    /// | Revoke | Deletes a leaf share, returns its passes |
    pub fn process(&self, operation: Operation) -> Result<Receipt, PassError> {
        match operation {
            Operation::Allocate {
                mobile,
                name,
                count,
            } => {
                let share = self.share(ShareRequest::root(mobile, name, count))?;
                Ok(Receipt::Issued {
                    token: share.token,
                    issued: share.issued,
                })
            }
            Operation::Reshare {
                parent_token,
                mobile,
                name,
                count,
            } => {
                let share = self.share(ShareRequest::child(parent_token, mobile, name, count))?;
                Ok(Receipt::Issued {
                    token: share.token,
                    issued: share.issued,
                })
            }
            Operation::Use { token } => {
                let share = self.mark_used(&token)?;
                Ok(Receipt::Used { token: share.token })
            }
            Operation::Revoke { mobile } => {
                let share = self.revoke(&mobile)?;
                Ok(Receipt::Revoked {
                    token: share.token,
                    restored: share.issued,
                })
            }
        }
    }

    // === Queries ===

    /// `total = available + sold`, where `sold` counts root shares only.
    pub fn summary(&self) -> Summary {
        report::summary(&self.ledger)
    }

    /// All shares, newest first.
    pub fn sales(&self) -> Vec<SaleEntry> {
        report::sales(&self.ledger)
    }

    pub fn shared_tokens(&self) -> Vec<TokenEntry> {
        report::shared_tokens(&self.ledger)
    }

    /// The pass a recipient sees, with the pool artwork.
    ///
    /// # Errors
    ///
    /// - [`PassError::ShareNotFound`] - Unknown token.
    /// - [`PassError::PoolNotFound`] - No pool exists.
    pub fn lookup(&self, token: &Token) -> Result<PassView, PassError> {
        report::lookup(&self.ledger, token)
    }

    /// Stored state of a share, without display adjustments.
    pub fn get_share(&self, token: &Token) -> Option<ShareRecord> {
        self.ledger.get(token)
    }
}
