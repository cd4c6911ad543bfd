//! CLI argument definitions using clap
//!
//! Commands:
//! - tapstation init --config <path>
//! - tapstation run --config <path>
//! - tapstation export --config <path> [--session <id>] [--output <file>]
//! - tapstation anomalies --config <path> [--session <id>]
//! - tapstation manual-add --config <path> --token <id> --stage <stage> --operator <id> --reason <text>
//! - tapstation remove --config <path> --event-id <id> --operator <id> --reason <text>
//! - tapstation next-id --config <path> [--session <id>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tapstation - NFC check-in station core
#[derive(Parser, Debug)]
#[command(name = "tapstation")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the station's data directory and empty event log
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./tapstation.json")]
        config: PathBuf,
    },

    /// Run the station: read taps from stdin, monitor the peer, serve /health
    Run {
        /// Path to configuration file
        #[arg(long, default_value = "./tapstation.json")]
        config: PathBuf,
    },

    /// Export live events as CSV
    Export {
        /// Path to configuration file
        #[arg(long, default_value = "./tapstation.json")]
        config: PathBuf,

        /// Only this session (all sessions when omitted)
        #[arg(long)]
        session: Option<String>,

        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the anomaly report for a session
    Anomalies {
        /// Path to configuration file
        #[arg(long, default_value = "./tapstation.json")]
        config: PathBuf,

        /// Session to scan (configured session when omitted)
        #[arg(long)]
        session: Option<String>,
    },

    /// Record a correction on behalf of an operator
    ManualAdd {
        /// Path to configuration file
        #[arg(long, default_value = "./tapstation.json")]
        config: PathBuf,

        #[arg(long)]
        token: String,

        #[arg(long)]
        stage: String,

        #[arg(long)]
        operator: String,

        #[arg(long)]
        reason: String,

        /// RFC 3339 timestamp (now when omitted)
        #[arg(long)]
        timestamp: Option<String>,

        /// Session (configured session when omitted)
        #[arg(long)]
        session: Option<String>,
    },

    /// Remove an event, archiving it
    Remove {
        /// Path to configuration file
        #[arg(long, default_value = "./tapstation.json")]
        config: PathBuf,

        #[arg(long)]
        event_id: u64,

        #[arg(long)]
        operator: String,

        #[arg(long)]
        reason: String,
    },

    /// Issue the next auto-init token id
    NextId {
        /// Path to configuration file
        #[arg(long, default_value = "./tapstation.json")]
        config: PathBuf,

        /// Session (configured session when omitted)
        #[arg(long)]
        session: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
