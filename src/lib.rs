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

//! # Pass Ledger
//!
//! This library distributes a finite pool of entry passes and validates them
//! at the gate: an administrator allocates passes to recipients by mobile
//! number, recipients re-share part of their allocation, and employees scan
//! tokens to let holders in exactly once.
//!
//! ## Core Components
//!
//! - [`Engine`]: Allocation, re-sharing, scanning, redemption, and reporting
//! - [`Ledger`]: The singleton [`Pool`] and every issued [`Share`]
//! - [`EmployeeDirectory`]: Who may scan; [`Roster`] keeps employees in memory
//! - [`PassError`]: Error types for rejected operations
//! - [`OtpStore`]: Short-lived one-time codes for the sharing flow
//!
//! ## Example
//!
//! ```
//! use pass_ledger_rs::{Engine, PoolRequest, ScanReason, ScannerIdentity};
//!
//! let engine = Engine::new();
//! let gate = engine.register_employee("Gate 1", "9000000001").unwrap();
//! engine.create_pool(PoolRequest::new("uploads/pass.png", 100)).unwrap();
//!
//! // Allocate from the pool, then re-share part of it.
//! let alice = engine.allocate_root("9999900000", "Alice", 10, None).unwrap();
//! let bob = engine.reshare(&alice.token, "9999900001", "Bob", 9, None).unwrap();
//! assert_eq!(engine.pool().unwrap().available, 90);
//! assert_eq!(engine.get_share(&alice.token).unwrap().remaining, Some(1));
//!
//! // Scanning previews; marking used consumes.
//! let scan = engine.scan(&bob.token, &ScannerIdentity::id(gate.id)).unwrap();
//! assert_eq!(scan.reason, ScanReason::Entry);
//! engine.mark_used(&bob.token).unwrap();
//! assert!(engine.mark_used(&bob.token).is_err());
//! ```
//!
//! ## Thread Safety
//!
//! The engine is `Sync`. Each mutation is a check-and-write under a single
//! lock, so concurrent allocations, re-shares, and redemptions never
//! double-spend.

pub mod base;
pub mod config;
pub mod directory;
mod engine;
pub mod error;
mod ledger;
pub mod mobile;
pub mod otp;
mod pool;
pub mod report;
mod request;
mod share;
pub mod snapshot;

pub use base::{EmployeeId, ImageAsset, Token};
pub use config::Settings;
pub use directory::{Employee, EmployeeDirectory, Roster, ScannerIdentity};
pub use engine::{Engine, ScanOutcome, ScanReason};
pub use error::{InputError, PassError};
pub use ledger::Ledger;
pub use mobile::Mobile;
pub use otp::OtpStore;
pub use pool::Pool;
pub use report::{PassView, SaleEntry, Summary, TokenEntry};
pub use request::{Operation, PoolRequest, Receipt, ShareRequest};
pub use share::{Share, ShareRecord};
pub use snapshot::Snapshot;
