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

//! One-time codes bound to a recipient mobile.
//!
//! Codes live only in memory for the lifetime of the process. Expiry is
//! checked when a code is read; there is no background sweeper.

use crate::error::PassError;
use crate::mobile::Mobile;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use std::time::{Duration, Instant};

/// Default lifetime of an issued code.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

const CODE_RANGE: std::ops::RangeInclusive<u32> = 100_000..=999_999;

#[derive(Debug, Clone)]
struct PendingCode {
    code: String,
    expires_at: Instant,
}

/// Pending codes keyed by mobile; issuing again replaces the previous code.
#[derive(Debug)]
pub struct OtpStore {
    pending: DashMap<Mobile, PendingCode>,
    ttl: Duration,
}

impl OtpStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a fresh six-digit code for `mobile`.
    pub fn issue(&self, mobile: &Mobile) -> String {
        self.issue_at(mobile, Instant::now())
    }

    /// Issues a code as of `now`, dropping every code already expired.
    pub fn issue_at(&self, mobile: &Mobile, now: Instant) -> String {
        self.pending.retain(|_, pending| now <= pending.expires_at);
        let code = rand::thread_rng().gen_range(CODE_RANGE).to_string();
        self.pending.insert(
            mobile.clone(),
            PendingCode {
                code: code.clone(),
                expires_at: now + self.ttl,
            },
        );
        code
    }

    /// Checks `code` against the pending code for `mobile`.
    ///
    /// A matching code is consumed. An expired code is evicted.
    ///
    /// # Errors
    ///
    /// - [`PassError::CodeNotFound`] - Nothing pending for `mobile`.
    /// - [`PassError::CodeExpired`] - The pending code is past its expiry.
    /// - [`PassError::CodeMismatch`] - Wrong code; the pending one stays.
    pub fn verify(&self, mobile: &Mobile, code: &str) -> Result<(), PassError> {
        self.verify_at(mobile, code, Instant::now())
    }

    pub fn verify_at(&self, mobile: &Mobile, code: &str, now: Instant) -> Result<(), PassError> {
        let Entry::Occupied(entry) = self.pending.entry(mobile.clone()) else {
            return Err(PassError::CodeNotFound);
        };
        if now > entry.get().expires_at {
            entry.remove();
            return Err(PassError::CodeExpired);
        }
        if entry.get().code != code.trim() {
            return Err(PassError::CodeMismatch);
        }
        entry.remove();
        Ok(())
    }

    /// Number of codes currently held. Expired codes linger until the next
    /// issue or a verify for the same mobile.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for OtpStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
