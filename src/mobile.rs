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

//! Recipient mobile numbers in canonical form.
//!
//! Every lookup and uniqueness check on recipients goes through [`Mobile`],
//! so `98765 43210`, `+91-9876543210` and `919876543210` all address the
//! same holder.

use crate::error::{InputError, PassError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Country calling code prefixed to bare national numbers.
pub const COUNTRY_CODE: &str = "91";

const NATIONAL_DIGITS: usize = 10;

/// A canonical mobile number, always `+<country code><10 digits>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mobile(String);

impl Mobile {
    /// Canonicalizes a raw mobile number.
    ///
    /// Non-digits are stripped. A bare 10-digit number gets the country code;
    /// a number already carrying the country code is accepted as-is.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::InvalidMobile`] for anything else.
    pub fn parse(raw: &str) -> Result<Self, PassError> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

        let national = if digits.len() == NATIONAL_DIGITS {
            digits.as_str()
        } else if digits.len() == COUNTRY_CODE.len() + NATIONAL_DIGITS
            && digits.starts_with(COUNTRY_CODE)
        {
            &digits[COUNTRY_CODE.len()..]
        } else {
            return Err(InputError::InvalidMobile.into());
        };

        Ok(Mobile(format!("+{COUNTRY_CODE}{national}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Mobile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Mobile {
    type Err = PassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mobile::parse(s)
    }
}

impl TryFrom<String> for Mobile {
    type Error = PassError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Mobile::parse(&value)
    }
}

impl From<Mobile> for String {
    fn from(value: Mobile) -> Self {
        value.0
    }
}
