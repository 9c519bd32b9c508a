use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::calendar::CalendarDate;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT_SHORT"), ")");

/// Watch a booking calendar and get notified when a slot opens up.
#[derive(Parser, Debug)]
#[command(name = "slotwatch", version = VERSION, about, long_about = None)]
pub struct Args {
    /// TOML config file; defaults to ./slotwatch.toml when present
    #[arg(long, short, global = true, env = "SLOTWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, global = true, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Check on a fixed interval until interrupted
    Start,
    /// Run a single check and exit
    Check,
    /// Print the earliest open day without recording anything
    Earliest,
    /// Show the stored appointments and recent notifications
    Status {
        /// Number of history records to show
        #[arg(long, short = 'n', default_value_t = 10)]
        limit: usize,
    },
    /// Send a test notification through every configured channel
    Test,
    /// Create the state file
    Init {
        /// Date of the appointment already booked (YYYY-MM-DD)
        #[arg(long)]
        next_appointment: Option<CalendarDate>,
        /// Look for slots in the week of this date instead of the configured window
        #[arg(long)]
        target_week: Option<CalendarDate>,
        /// Overwrite an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Clear the notification history, keeping appointments and target
    Reset,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable, colored output
    Pretty,
    /// One JSON object per event
    Json,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}
