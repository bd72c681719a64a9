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

//! Error types for pass allocation, re-sharing, and redemption.

use thiserror::Error;

/// Reasons a request is rejected as malformed before any state is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// Mobile number is missing or does not canonicalize.
    #[error("enter a valid 10-digit mobile number")]
    InvalidMobile,

    /// Recipient or employee name is missing or blank.
    #[error("name is required")]
    MissingName,

    /// Pass count is missing, zero, or negative.
    #[error("a valid pass count is required")]
    InvalidQuantity,

    /// Pool image reference is missing.
    #[error("image required")]
    MissingImage,

    /// Pool update carried neither an image nor a count.
    #[error("no updates provided")]
    NoUpdates,
}

/// Pass ledger errors.
///
/// Everything except [`PassError::Storage`] is an expected, recoverable
/// condition that the caller can act on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PassError {
    /// Malformed or missing request field
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InputError),

    /// No pool has been created
    #[error("no pass found")]
    PoolNotFound,

    /// No share exists for the token or mobile
    #[error("invalid or expired link")]
    ShareNotFound,

    /// The share named as parent does not exist
    #[error("parent pass not found")]
    ParentNotFound,

    /// The recipient already holds a live share
    #[error("this mobile already has a pass assigned")]
    DuplicateRecipient,

    /// An employee with this mobile already exists
    #[error("employee with this mobile number already exists")]
    DuplicateEmployee,

    /// The pool cannot cover the allocation
    #[error("not enough passes available ({available} left, {requested} requested)")]
    ResourceExhausted { available: u32, requested: u32 },

    /// The parent does not hold enough passes
    #[error("not enough passes left to share")]
    InsufficientBalance,

    /// The transfer would leave the sender with nothing
    #[error("you can only share up to {max} passes")]
    WouldExhaustSender { max: u32 },

    /// The share has already been re-shared downward
    #[error("pass has been shared onward and cannot be revoked")]
    HasDependents,

    /// Scanner identity does not resolve to a known employee
    #[error("scanner is not a known employee")]
    Unauthorized,

    /// Scanner is known but not on the share's allow-list
    #[error("you are not authorized to scan this pass")]
    Forbidden,

    /// The pass was already redeemed
    #[error("pass already used")]
    AlreadyUsed,

    /// No one-time code is pending for the mobile
    #[error("code not found or expired")]
    CodeNotFound,

    /// The pending one-time code has expired
    #[error("code expired")]
    CodeExpired,

    /// The presented one-time code does not match
    #[error("invalid code")]
    CodeMismatch,

    /// Persistent storage could not be read or written
    #[error("storage failure: {0}")]
    Storage(String),
}

impl PassError {
    /// Returns true for the single fatal class.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PassError::Storage(_))
    }
}
