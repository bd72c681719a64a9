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

//! Runtime settings shared by the command-line tool and the demo server.
//!
//! Every setting can come from a flag or an environment variable.

use crate::otp::OtpStore;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// JSON file holding the pool, shares, and employees
    #[arg(long, env = "PASS_LEDGER_STATE", default_value = "pass-ledger.json")]
    pub state: PathBuf,

    /// Log filter, e.g. `info` or `pass_ledger_rs=debug`
    #[arg(long, env = "PASS_LEDGER_LOG", default_value = "info")]
    pub log: String,

    /// Lifetime of one-time codes, in seconds
    #[arg(long, env = "PASS_LEDGER_OTP_TTL_SECS", default_value_t = 300)]
    pub otp_ttl_secs: u64,

    /// Address the demo server listens on
    #[arg(long, env = "PASS_LEDGER_ADDR", default_value = "127.0.0.1:5000")]
    pub addr: SocketAddr,

    /// Echo one-time codes in API responses instead of sending them
    #[arg(long, env = "PASS_LEDGER_DEMO_CODES", default_value_t = false)]
    pub demo_codes: bool,
}

impl Settings {
    pub fn otp_ttl(&self) -> Duration {
        Duration::from_secs(self.otp_ttl_secs)
    }

    pub fn otp_store(&self) -> OtpStore {
        OtpStore::new(self.otp_ttl())
    }

    /// Installs the global stderr subscriber.
    ///
    /// Falls back to `info` when the filter does not parse. Safe to call more
    /// than once; later calls are ignored.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_new(&self.log).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }
}
