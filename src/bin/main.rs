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

use clap::{Parser, Subcommand};
use csv::{ReaderBuilder, Trim, Writer};
use pass_ledger_rs::{
    EmployeeId, Engine, Operation, PassError, PoolRequest, ScannerIdentity, Settings,
    ShareRequest, Token,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing::warn;

/// Pass Ledger - Distribute entry passes and validate them at the gate
///
/// State is read from the state file before each command and written back
/// after commands that change it.
#[derive(Parser, Debug)]
#[command(name = "pass-ledger-rs")]
#[command(about = "Allocate, re-share, and redeem entry passes", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create, edit, or show the pass pool
    Pool {
        #[command(subcommand)]
        command: PoolCommand,
    },
    /// Register or list employees
    Employee {
        #[command(subcommand)]
        command: EmployeeCommand,
    },
    /// Issue passes from the pool, or from a parent share with --parent
    Share {
        mobile: String,
        name: String,
        count: i64,
        #[arg(long)]
        parent: Option<String>,
        /// Employee allowed to scan; repeat for several. Defaults to everyone.
        #[arg(long = "scanner")]
        scanners: Vec<u32>,
    },
    /// Check a token without consuming it
    Scan {
        token: String,
        #[arg(long)]
        employee: Option<u32>,
        #[arg(long)]
        employee_mobile: Option<String>,
    },
    /// Mark a token used
    Use { token: String },
    /// Delete a recipient's share and return its passes
    Revoke { mobile: String },
    /// Show a pass as its holder sees it
    Lookup { token: String },
    /// Pool totals
    Summary,
    /// All shares as CSV, newest first
    Sales,
    /// Apply operations from a CSV file
    ///
    /// Expected format: op,token,mobile,name,count
    Batch {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// Give shares with no scanners every known employee
    BackfillScanners,
}

#[derive(Subcommand, Debug)]
enum PoolCommand {
    Create {
        image: String,
        count: i64,
    },
    Update {
        #[arg(long)]
        image: Option<String>,
        #[arg(long)]
        count: Option<i64>,
    },
    Show,
}

#[derive(Subcommand, Debug)]
enum EmployeeCommand {
    Add { name: String, mobile: String },
    List,
}

fn main() {
    let cli = Cli::parse();
    cli.settings.init_logging();

    let engine = match Engine::load(&cli.settings.state) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error loading state: {}", e);
            process::exit(1);
        }
    };

    let mutated = match run(&engine, cli.command) {
        Ok(mutated) => mutated,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if mutated {
        if let Err(e) = engine.save(&cli.settings.state) {
            eprintln!("Error saving state: {}", e);
            process::exit(1);
        }
    }
}

/// Runs one command. Returns whether state changed.
fn run(engine: &Engine, command: Command) -> Result<bool, CliError> {
    match command {
        Command::Pool { command } => match command {
            PoolCommand::Create { image, count } => {
                print_json(&engine.create_pool(PoolRequest::new(image, count))?)?;
                Ok(true)
            }
            PoolCommand::Update { image, count } => {
                print_json(&engine.update_pool(PoolRequest { image, count })?)?;
                Ok(true)
            }
            PoolCommand::Show => {
                print_json(&engine.pool()?)?;
                Ok(false)
            }
        },
        Command::Employee { command } => match command {
            EmployeeCommand::Add { name, mobile } => {
                print_json(&engine.register_employee(&name, &mobile)?)?;
                Ok(true)
            }
            EmployeeCommand::List => {
                print_json(&engine.employees())?;
                Ok(false)
            }
        },
        Command::Share {
            mobile,
            name,
            count,
            parent,
            scanners,
        } => {
            let mut request = match parent {
                Some(parent) => ShareRequest::child(Token(parent), mobile, name, count),
                None => ShareRequest::root(mobile, name, count),
            };
            if !scanners.is_empty() {
                request = request.with_scanners(scanners.into_iter().map(EmployeeId));
            }
            print_json(&engine.share(request)?)?;
            Ok(true)
        }
        Command::Scan {
            token,
            employee,
            employee_mobile,
        } => {
            let scanner = ScannerIdentity {
                employee_id: employee.map(EmployeeId),
                mobile: employee_mobile,
            };
            print_json(&engine.scan(&Token(token), &scanner)?)?;
            Ok(false)
        }
        Command::Use { token } => {
            print_json(&engine.mark_used(&Token(token))?)?;
            Ok(true)
        }
        Command::Revoke { mobile } => {
            print_json(&engine.revoke(&mobile)?)?;
            Ok(true)
        }
        Command::Lookup { token } => {
            print_json(&engine.lookup(&Token(token))?)?;
            Ok(false)
        }
        Command::Summary => {
            print_json(&engine.summary())?;
            Ok(false)
        }
        Command::Sales => {
            write_sales(engine, std::io::stdout())?;
            Ok(false)
        }
        Command::Batch { input } => {
            let file = File::open(&input).map_err(|e| {
                CliError::Io(format!("cannot open '{}': {}", input.display(), e))
            })?;
            let report = process_operations(engine, BufReader::new(file))?;
            print_json(&report)?;
            Ok(report.applied > 0)
        }
        Command::BackfillScanners => {
            let updated = engine.backfill_scanners();
            print_json(&serde_json::json!({ "updated": updated }))?;
            Ok(updated > 0)
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Pass(#[from] PassError),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Io(String),
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout).map_err(|e| CliError::Io(e.to_string()))
}

/// Raw CSV record matching the batch format.
///
/// Fields: `op, token, mobile, name, count`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    mobile: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    count: Option<i64>,
}

impl CsvRecord {
    /// Converts a CSV record to an [`Operation`].
    ///
    /// Returns `None` for unknown operations or missing required fields.
    fn into_operation(self) -> Option<Operation> {
        let present = |field: Option<String>| field.filter(|value| !value.is_empty());

        match self.op.to_lowercase().as_str() {
            "allocate" => Some(Operation::Allocate {
                mobile: present(self.mobile)?,
                name: self.name.unwrap_or_default(),
                count: self.count?,
            }),
            "reshare" => Some(Operation::Reshare {
                parent_token: Token(present(self.token)?),
                mobile: present(self.mobile)?,
                name: self.name.unwrap_or_default(),
                count: self.count?,
            }),
            "use" => Some(Operation::Use {
                token: Token(present(self.token)?),
            }),
            "revoke" => Some(Operation::Revoke {
                mobile: present(self.mobile)?,
            }),
            _ => None,
        }
    }
}

/// Outcome counts of a batch run.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
struct BatchReport {
    applied: usize,
    rejected: usize,
    malformed: usize,
}

/// Apply operations from a CSV reader.
///
/// Rows are streamed, so arbitrarily large files are fine. Malformed rows
/// and rejected operations are logged and skipped; processing continues.
///
/// # CSV Format
///
/// ```csv
/// op,token,mobile,name,count
/// allocate,,9999900000,Alice,10
/// reshare,<alice token>,9999900001,Bob,9
/// use,<bob token>,,,
/// revoke,,9999900001,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the header is unreadable.
fn process_operations<R: Read>(engine: &Engine, reader: R) -> Result<BatchReport, csv::Error> {
    let mut report = BatchReport::default();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping malformed row");
                report.malformed += 1;
                continue;
            }
        };
        let Some(operation) = record.into_operation() else {
            warn!(line = line + 2, "skipping invalid operation record");
            report.malformed += 1;
            continue;
        };

        let kind = operation.kind();
        match engine.process(operation) {
            Ok(_) => report.applied += 1,
            Err(e) => {
                warn!(line = line + 2, op = kind, error = %e, "skipping rejected operation");
                report.rejected += 1;
            }
        }
    }

    Ok(report)
}

/// Write the sales list to a CSV writer.
///
/// # CSV Format
///
/// Columns: `token, name, mobile, count, parent_token, created_at`
fn write_sales<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for sale in engine.sales() {
        wtr.serialize(&sale)?;
    }
    wtr.flush()?;
    Ok(())
}
