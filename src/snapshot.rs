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

//! Durable ledger state.
//!
//! The whole ledger and roster are written as one JSON document. Saving goes
//! through a temporary file and a rename, so a failed save leaves the
//! previous state file intact.

use crate::directory::{Employee, Roster};
use crate::engine::Engine;
use crate::error::PassError;
use crate::pool::Pool;
use crate::share::ShareRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Serializable state of an [`Engine`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub pool: Option<Pool>,
    #[serde(default)]
    pub shares: Vec<ShareRecord>,
    #[serde(default)]
    pub employees: Vec<Employee>,
}

fn storage_error(context: &str, path: &Path, err: impl std::fmt::Display) -> PassError {
    PassError::Storage(format!("{context} '{}': {err}", path.display()))
}

impl Engine<Roster> {
    /// Copies the current state, shares in creation order.
    pub fn snapshot(&self) -> Snapshot {
        let mut shares = self.ledger().records();
        shares.sort_by_key(|share| share.sequence);
        Snapshot {
            pool: self.ledger().pool(),
            shares,
            employees: self.employees(),
        }
    }

    /// Rebuilds an engine from persisted state.
    ///
    /// # Errors
    ///
    /// Returns [`PassError::Storage`] if the snapshot repeats a token, a
    /// recipient mobile, or an employee mobile, or if a share names a parent
    /// the snapshot does not contain.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, PassError> {
        let roster = Roster::new();
        for employee in snapshot.employees {
            let mobile = employee.mobile.clone();
            roster.insert(employee).map_err(|_| {
                PassError::Storage(format!("duplicate employee {mobile} in stored roster"))
            })?;
        }
        let engine = Engine::with_directory(roster);
        engine.ledger().load(snapshot.pool, snapshot.shares)?;
        Ok(engine)
    }

    /// Loads state from `path`; a missing file yields an empty engine.
    pub fn load(path: &Path) -> Result<Self, PassError> {
        if !path.exists() {
            debug!(path = %path.display(), "no state file, starting empty");
            return Ok(Engine::new());
        }
        let file = fs::File::open(path).map_err(|e| storage_error("cannot open", path, e))?;
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| storage_error("cannot parse", path, e))?;
        debug!(path = %path.display(), shares = snapshot.shares.len(), "state loaded");
        Engine::from_snapshot(snapshot)
    }

    /// Writes state to `path`, replacing it atomically.
    pub fn save(&self, path: &Path) -> Result<(), PassError> {
        let snapshot = self.snapshot();
        let staging = path.with_extension("tmp");

        let file =
            fs::File::create(&staging).map_err(|e| storage_error("cannot create", &staging, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &snapshot)
            .map_err(|e| storage_error("cannot write", &staging, e))?;
        writer
            .flush()
            .map_err(|e| storage_error("cannot write", &staging, e))?;
        drop(writer);

        fs::rename(&staging, path).map_err(|e| storage_error("cannot replace", path, e))?;
        debug!(path = %path.display(), shares = snapshot.shares.len(), "state saved");
        Ok(())
    }
}
