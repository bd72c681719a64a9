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

//! Typed requests.
//!
//! Requests carry raw caller input. Each is validated into a checked form
//! before any state is touched, so a malformed request never mutates the
//! ledger.

use crate::base::{EmployeeId, ImageAsset, Token};
use crate::error::{InputError, PassError};
use crate::mobile::Mobile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Issue passes to a recipient.
///
/// Without `parent_token` the passes come from the pool; with it they are
/// re-shared from that share. `scanners` defaults to every known employee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRequest {
    pub mobile: String,
    #[serde(default)]
    pub name: String,
    pub count: i64,
    #[serde(default)]
    pub parent_token: Option<Token>,
    #[serde(default)]
    pub scanners: Option<BTreeSet<EmployeeId>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ValidShare {
    pub mobile: Mobile,
    pub name: String,
    pub quantity: u32,
    pub parent_token: Option<Token>,
    pub scanners: Option<BTreeSet<EmployeeId>>,
}

impl ShareRequest {
    pub fn root(mobile: impl Into<String>, name: impl Into<String>, count: i64) -> Self {
        Self {
            mobile: mobile.into(),
            name: name.into(),
            count,
            ..Self::default()
        }
    }

    pub fn child(
        parent_token: Token,
        mobile: impl Into<String>,
        name: impl Into<String>,
        count: i64,
    ) -> Self {
        Self {
            parent_token: Some(parent_token),
            ..Self::root(mobile, name, count)
        }
    }

    pub fn with_scanners(mut self, scanners: impl IntoIterator<Item = EmployeeId>) -> Self {
        self.scanners = Some(scanners.into_iter().collect());
        self
    }

    pub(crate) fn validate(self) -> Result<ValidShare, PassError> {
        let mobile = Mobile::parse(&self.mobile)?;
        let quantity = validate_quantity(self.count)?;
        let name = self.name.trim();
        if name.is_empty() {
            return Err(InputError::MissingName.into());
        }
        Ok(ValidShare {
            mobile,
            name: name.to_string(),
            quantity,
            parent_token: self.parent_token,
            scanners: self.scanners,
        })
    }
}

fn validate_quantity(count: i64) -> Result<u32, PassError> {
    u32::try_from(count)
        .ok()
        .filter(|quantity| *quantity >= 1)
        .ok_or_else(|| InputError::InvalidQuantity.into())
}

/// Create or edit the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub count: Option<i64>,
}

impl PoolRequest {
    pub fn new(image: impl Into<String>, count: i64) -> Self {
        Self {
            image: Some(image.into()),
            count: Some(count),
        }
    }

    fn image(&self) -> Option<ImageAsset> {
        self.image
            .as_deref()
            .map(str::trim)
            .filter(|image| !image.is_empty())
            .map(|image| ImageAsset(image.to_string()))
    }

    fn count(&self) -> Result<Option<u32>, PassError> {
        self.count
            .map(|count| u32::try_from(count).map_err(|_| InputError::InvalidQuantity.into()))
            .transpose()
    }

    /// Both fields are required when replacing the pool; zero is allowed.
    pub(crate) fn validate_create(&self) -> Result<(ImageAsset, u32), PassError> {
        let image = self.image().ok_or(InputError::MissingImage)?;
        let count = self.count()?.ok_or(InputError::InvalidQuantity)?;
        Ok((image, count))
    }

    /// At least one field is required when editing.
    pub(crate) fn validate_update(&self) -> Result<(Option<ImageAsset>, Option<u32>), PassError> {
        let image = self.image();
        let count = self.count()?;
        if image.is_none() && count.is_none() {
            return Err(InputError::NoUpdates.into());
        }
        Ok((image, count))
    }
}

/// One ledger mutation, as read from a batch file or an API body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Allocate {
        mobile: String,
        name: String,
        count: i64,
    },
    Reshare {
        parent_token: Token,
        mobile: String,
        name: String,
        count: i64,
    },
    Use {
        token: Token,
    },
    Revoke {
        mobile: String,
    },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Allocate { .. } => "allocate",
            Self::Reshare { .. } => "reshare",
            Self::Use { .. } => "use",
            Self::Revoke { .. } => "revoke",
        }
    }
}

/// What a successful [`Operation`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum Receipt {
    Issued { token: Token, issued: u32 },
    Used { token: Token },
    Revoked { token: Token, restored: u32 },
}
