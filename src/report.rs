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

//! Read-only projections over the ledger.
//!
//! Nothing here mutates state. The `remaining` backfill in [`PassView`] is
//! computed at read time and never written back.

use crate::base::{ImageAsset, Token};
use crate::error::PassError;
use crate::ledger::Ledger;
use crate::mobile::Mobile;
use crate::share::ShareRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Pool totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// `available + sold`.
    pub total: u64,
    pub available: u32,
    /// Passes issued directly from the pool.
    pub sold: u64,
}

/// One row of the sales list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleEntry {
    pub token: Token,
    pub name: String,
    pub mobile: Mobile,
    pub count: u32,
    pub parent_token: Option<Token>,
    pub created_at: DateTime<Utc>,
}

/// Token directory row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenEntry {
    pub token: Token,
    pub name: String,
    pub mobile: Mobile,
}

/// What a recipient sees when opening their pass link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassView {
    pub token: Token,
    pub name: String,
    pub mobile: Mobile,
    pub count: u32,
    pub remaining: u32,
    pub parent_token: Option<Token>,
    pub used: bool,
    pub shared_at: DateTime<Utc>,
    pub image: ImageAsset,
}

/// Remaining balance as displayed.
///
/// Records from before balances were tracked can lack `remaining` or carry
/// zero; for multi-pass shares those show the issued count instead.
pub fn display_remaining(issued: u32, remaining: Option<u32>) -> u32 {
    match remaining {
        Some(remaining) if remaining >= 1 => remaining,
        _ if issued > 1 => issued,
        remaining => remaining.unwrap_or(0),
    }
}

/// Taken under the pool lock, so a concurrent allocation or revocation is
/// counted either fully or not at all.
pub(crate) fn summary(ledger: &Ledger) -> Summary {
    ledger.with_pool(|pool| {
        let available = pool.map_or(0, |pool| pool.available);
        let sold: u64 = ledger
            .shares()
            .filter(|entry| entry.value().is_root())
            .map(|entry| u64::from(entry.value().issued()))
            .sum();
        Summary {
            total: u64::from(available) + sold,
            available,
            sold,
        }
    })
}

/// Newest first; equal timestamps fall back to creation order.
pub(crate) fn sales(ledger: &Ledger) -> Vec<SaleEntry> {
    let mut records = ledger.records();
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then(b.sequence.cmp(&a.sequence))
    });
    records
        .into_iter()
        .map(|record| SaleEntry {
            token: record.token,
            name: record.name,
            mobile: record.mobile,
            count: record.issued,
            parent_token: record.parent_token,
            created_at: record.created_at,
        })
        .collect()
}

pub(crate) fn shared_tokens(ledger: &Ledger) -> Vec<TokenEntry> {
    let mut records = ledger.records();
    records.sort_by_key(|record| record.sequence);
    records
        .into_iter()
        .map(|record| TokenEntry {
            token: record.token,
            name: record.name,
            mobile: record.mobile,
        })
        .collect()
}

pub(crate) fn lookup(ledger: &Ledger, token: &Token) -> Result<PassView, PassError> {
    let record = ledger.get(token).ok_or(PassError::ShareNotFound)?;
    let pool = ledger.pool().ok_or(PassError::PoolNotFound)?;
    Ok(view(record, pool.image))
}

fn view(record: ShareRecord, image: ImageAsset) -> PassView {
    PassView {
        remaining: display_remaining(record.issued, record.remaining),
        token: record.token,
        name: record.name,
        mobile: record.mobile,
        count: record.issued,
        parent_token: record.parent_token,
        used: record.used,
        shared_at: record.created_at,
        image,
    }
}
