//! # Cursus CLI Module
//!
//! This module implements the CLI interface for Cursus.
//!
//! ## Available Commands
//!
//! - `daemon` - Run the daily sweep scheduler until Ctrl+C
//! - `sweep` - Run the sweep once for a given day
//! - `close-module` - Close a module immediately
//! - `approve` - Record an administrator decision on a recovery record
//! - `grade` - Record an instructor grade on a recovery attempt
//! - `status` - Show store totals or one student's statuses
//! - `records` - List failed-subject records
//! - `ingest` - Load directory data from a JSON file
//! - `export` - Export the store to a file
//! - `import` - Replace an empty store from an export
//! - `init` - Initialize a new database
//! - `hash` - Compute checksums of the store

mod commands;

use crate::config::{Backend, CursusConfig};
use clap::{Parser, Subcommand};
use cursus_core::CursusError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Cursus - academic progression engine
///
/// Closes modules on schedule, runs the recovery approval pipeline and
/// resolves promotion, graduation or removal at each recovery deadline.
#[derive(Parser, Debug)]
#[command(name = "cursus")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to ./cursus.toml when present)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the database, overriding the config file
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend: "file" (snapshot file) or "redb" (ACID database)
    #[arg(short = 'B', long, global = true)]
    pub backend: Option<String>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler and sweep once a day until interrupted
    Daemon {
        /// Earliest UTC hour for the daily run
        #[arg(long)]
        run_hour: Option<u32>,

        /// Seconds between schedule checks
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Run the scheduled sweep once
    Sweep {
        /// Day to sweep as YYYY-MM-DD (defaults to today, UTC)
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Close a module now for one program or all programs
    CloseModule {
        /// Module number (starting at 1)
        #[arg(short, long)]
        module: u32,

        /// Restrict to one program
        #[arg(short, long)]
        program: Option<u64>,
    },

    /// Administrator decision on a recovery record
    Approve {
        /// Recovery record ID
        #[arg(short, long)]
        record: u64,

        /// Reject instead of approve (removes the student from the course)
        #[arg(long)]
        reject: bool,
    },

    /// Instructor grade on a recovery attempt
    Grade {
        /// Student ID
        #[arg(short, long)]
        student: u64,

        /// Course ID
        #[arg(short, long)]
        course: u64,

        /// Subject ID (omit for course-level records)
        #[arg(long)]
        subject: Option<u64>,

        /// Outcome: approved or rejected
        #[arg(short, long)]
        outcome: String,
    },

    /// Show store totals, or one student's program statuses
    Status {
        /// Student ID
        #[arg(short, long)]
        student: Option<u64>,
    },

    /// List failed-subject records
    Records {
        /// Only records of this student
        #[arg(short, long)]
        student: Option<u64>,
    },

    /// Ingest directory data (programs, subjects, courses, grades, students)
    Ingest {
        /// Path to the JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Export the store
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Export format (snapshot, json)
        #[arg(short = 't', long, default_value = "snapshot")]
        format: String,
    },

    /// Import an export into an empty store
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Input format (snapshot, json)
        #[arg(short = 't', long, default_value = "snapshot")]
        format: String,
    },

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Compute the FNV-1a checksum and BLAKE3 hash of the store
    Hash,
}

// =============================================================================
// CONFIGURATION
// =============================================================================

impl Cli {
    /// Config file settings with command-line overrides applied.
    pub fn resolve_config(&self) -> Result<CursusConfig, CursusError> {
        let mut config = CursusConfig::resolve(self.config.as_deref())?;
        if let Some(database) = &self.database {
            config.storage.database = database.clone();
        }
        if let Some(backend) = &self.backend {
            config.storage.backend = Backend::parse(backend)?;
        }
        if let Some(Commands::Daemon {
            run_hour,
            interval_secs,
        }) = &self.command
        {
            if let Some(hour) = run_hour {
                config.schedule.run_hour_utc = *hour;
            }
            if let Some(secs) = interval_secs {
                config.schedule.check_interval_secs = *secs;
            }
        }
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), CursusError> {
    let config = cli.resolve_config()?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Daemon { .. }) => cmd_daemon(&config).await,
        Some(Commands::Sweep { date }) => cmd_sweep(&config, json_mode, date.as_deref()).await,
        Some(Commands::CloseModule { module, program }) => {
            cmd_close_module(&config, json_mode, module, program)
        }
        Some(Commands::Approve { record, reject }) => {
            cmd_approve(&config, json_mode, record, !reject)
        }
        Some(Commands::Grade {
            student,
            course,
            subject,
            outcome,
        }) => cmd_grade(&config, json_mode, student, course, subject, &outcome),
        Some(Commands::Status { student }) => cmd_status(&config, json_mode, student),
        Some(Commands::Records { student }) => cmd_records(&config, json_mode, student),
        Some(Commands::Ingest { file }) => cmd_ingest(&config, json_mode, &file),
        Some(Commands::Export { output, format }) => cmd_export(&config, &output, &format),
        Some(Commands::Import { input, format }) => cmd_import(&config, &input, &format),
        Some(Commands::Init { force }) => cmd_init(&config, force),
        Some(Commands::Hash) => cmd_hash(&config, json_mode),
        None => {
            // No subcommand - show status by default
            cmd_status(&config, json_mode, None)
        }
    }
}
