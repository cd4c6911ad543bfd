//! CLI module for tapstation
//!
//! Provides command-line interface for:
//! - init: Create the data directory and event log
//! - run: Run the station (taps on stdin, peer monitor, health server)
//! - export: CSV dump of live events
//! - anomalies: Anomaly report for a session
//! - manual-add / remove: Operator corrections
//! - next-id: Issue an auto-init token id

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{
    anomalies, audit_log_path, export, init, manual_add, next_id, remove, run, run_command,
    run_station, ManualAddRequest, AUDIT_LOG_FILE_NAME,
};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
