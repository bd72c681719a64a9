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

//! The singleton pass pool.
//!
//! The pool holds the passes nobody has been allocated yet. Root
//! allocations draw from it; revoking a root share returns units to it.

use crate::base::ImageAsset;
use crate::error::PassError;
use serde::{Deserialize, Serialize};

/// Unallocated passes plus the artwork every pass is printed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub image: ImageAsset,
    pub available: u32,
}

impl Pool {
    pub fn new(image: ImageAsset, available: u32) -> Self {
        Self { image, available }
    }

    /// Decrements `available` if it covers `quantity`.
    ///
    /// Leaves the pool untouched on failure.
    pub(crate) fn withdraw(&mut self, quantity: u32) -> Result<(), PassError> {
        if self.available < quantity {
            return Err(PassError::ResourceExhausted {
                available: self.available,
                requested: quantity,
            });
        }
        self.available -= quantity;
        Ok(())
    }

    /// Returns units from a revoked root share.
    pub(crate) fn restore(&mut self, quantity: u32) {
        self.available = self.available.saturating_add(quantity);
    }
}
