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

//! Employee directory.
//!
//! The engine only needs two things from the employee store: resolving a
//! scanner identity and listing everyone for default allow-lists. Both are
//! behind [`EmployeeDirectory`]; [`Roster`] is the in-memory implementation.

use crate::base::EmployeeId;
use crate::error::{InputError, PassError};
use crate::mobile::Mobile;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

/// Who is holding the scanner.
///
/// An explicit employee id wins; the mobile is the fallback when the id is
/// absent or unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerIdentity {
    pub employee_id: Option<EmployeeId>,
    pub mobile: Option<String>,
}

impl ScannerIdentity {
    pub fn id(employee_id: EmployeeId) -> Self {
        Self {
            employee_id: Some(employee_id),
            mobile: None,
        }
    }

    pub fn mobile(mobile: impl Into<String>) -> Self {
        Self {
            employee_id: None,
            mobile: Some(mobile.into()),
        }
    }
}

/// Lookup surface the engine consumes.
pub trait EmployeeDirectory: Send + Sync {
    /// Resolves a scanner to a known employee.
    fn resolve(&self, identity: &ScannerIdentity) -> Option<EmployeeId>;

    /// Every known employee.
    fn list_all(&self) -> BTreeSet<EmployeeId>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub mobile: Mobile,
}

/// In-memory employee store with unique canonical mobiles.
#[derive(Debug)]
pub struct Roster {
    employees: DashMap<EmployeeId, Employee>,
    by_mobile: DashMap<Mobile, EmployeeId>,
    next_id: AtomicU32,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            employees: DashMap::new(),
            by_mobile: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Registers a new employee.
    ///
    /// # Errors
    ///
    /// - [`InputError::MissingName`] - Name is blank.
    /// - [`InputError::InvalidMobile`] - Mobile does not canonicalize.
    /// - [`PassError::DuplicateEmployee`] - Mobile already registered.
    pub fn add(&self, name: &str, mobile: &str) -> Result<Employee, PassError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(InputError::MissingName.into());
        }
        let mobile = Mobile::parse(mobile)?;

        match self.by_mobile.entry(mobile.clone()) {
            Entry::Occupied(_) => Err(PassError::DuplicateEmployee),
            Entry::Vacant(slot) => {
                let id = EmployeeId(self.next_id.fetch_add(1, Ordering::Relaxed));
                let employee = Employee {
                    id,
                    name: name.to_string(),
                    mobile,
                };
                self.employees.insert(id, employee.clone());
                slot.insert(id);
                Ok(employee)
            }
        }
    }

    /// Re-inserts a previously persisted employee, keeping its id.
    pub fn insert(&self, employee: Employee) -> Result<(), PassError> {
        match self.by_mobile.entry(employee.mobile.clone()) {
            Entry::Occupied(_) => Err(PassError::DuplicateEmployee),
            Entry::Vacant(slot) => {
                self.next_id.fetch_max(employee.id.0 + 1, Ordering::Relaxed);
                slot.insert(employee.id);
                self.employees.insert(employee.id, employee);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: EmployeeId) -> Option<Employee> {
        self.employees.get(&id).map(|entry| entry.value().clone())
    }

    /// All employees ordered by id.
    pub fn employees(&self) -> Vec<Employee> {
        let mut employees: Vec<Employee> = self
            .employees
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        employees.sort_by_key(|employee| employee.id);
        employees
    }

    pub fn len(&self) -> usize {
        self.employees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl EmployeeDirectory for Roster {
    fn resolve(&self, identity: &ScannerIdentity) -> Option<EmployeeId> {
        if let Some(id) = identity.employee_id {
            if self.employees.contains_key(&id) {
                return Some(id);
            }
        }
        let mobile = Mobile::parse(identity.mobile.as_deref()?).ok()?;
        self.by_mobile.get(&mobile).map(|entry| *entry.value())
    }

    fn list_all(&self) -> BTreeSet<EmployeeId> {
        self.employees.iter().map(|entry| *entry.key()).collect()
    }
}
