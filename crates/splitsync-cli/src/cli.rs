use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use splitsync_core::models::{EntryStatus, FaultType, TimingPoint};

#[derive(Parser)]
#[command(name = "splitsync")]
#[command(about = "Record race timing events and keep devices in sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local store document
    #[arg(long, global = true, value_name = "PATH")]
    pub store_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a timing observation
    #[command(alias = "rec")]
    Record {
        /// Bib number
        bib: String,
        /// Timing point
        #[arg(value_enum)]
        point: PointArg,
        /// Run number (defaults to 1)
        #[arg(short, long)]
        run: Option<u32>,
    },
    /// Record a gate fault
    Fault {
        /// Bib number
        bib: String,
        /// Gate number
        gate: u32,
        /// Fault type
        #[arg(value_enum)]
        fault_type: FaultTypeArg,
        /// Run number (defaults to 1)
        #[arg(short, long)]
        run: Option<u32>,
        /// First gate assigned to this judge
        #[arg(long, default_value = "1")]
        gates_from: u32,
        /// Last gate assigned to this judge
        #[arg(long, default_value = "99")]
        gates_to: u32,
        /// Free-text notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// List recorded entries
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recorded faults
    Faults {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing entry
    Edit {
        /// Entry ID or unique ID prefix
        id: String,
        /// New bib number
        #[arg(long)]
        bib: Option<String>,
        /// New status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// New run number
        #[arg(long)]
        run: Option<u32>,
    },
    /// Delete an entry (propagates a tombstone on the next sync)
    Delete {
        /// Entry ID or unique ID prefix
        id: String,
    },
    /// Edit an existing fault, appending a new version
    FaultEdit {
        /// Fault ID or unique ID prefix
        id: String,
        /// New gate number
        #[arg(long)]
        gate: Option<u32>,
        /// Replacement notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// Show a fault's version history, newest first
    History {
        /// Fault ID or unique ID prefix
        id: String,
    },
    /// Restore a fault to a prior version
    Restore {
        /// Fault ID or unique ID prefix
        id: String,
        /// Version number to restore
        version: u32,
    },
    /// Mark or unmark a fault for deletion (chief judge approves elsewhere)
    Mark {
        /// Fault ID or unique ID prefix
        id: String,
        /// Withdraw an existing mark instead
        #[arg(long)]
        undo: bool,
    },
    /// Rename this device
    Device {
        /// New operator-facing device name
        name: String,
    },
    /// Show outbox diagnostics
    Queue,
    /// Sync with the race server
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Manage the device profile
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Run a reconciliation pass (or keep syncing with --watch)
    Run {
        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Show sync configuration and queue state
    Status,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create the device profile
    Init {
        /// Race server base URL
        endpoint: String,
        /// Operator-facing device name
        device_name: String,
    },
    /// Show the current profile
    Show,
    /// Store the bearer token obtained from the race organizer
    SetToken { token: String },
    /// Select the active race
    SetRace { race_id: String },
    /// Enable or disable sync (disabling pauses the outbox, never drains it)
    SetSync {
        #[arg(value_parser = clap::value_parser!(bool))]
        enabled: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PointArg {
    Start,
    Finish,
}

impl From<PointArg> for TimingPoint {
    fn from(value: PointArg) -> Self {
        match value {
            PointArg::Start => Self::Start,
            PointArg::Finish => Self::Finish,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Ok,
    Dns,
    Dnf,
    Dsq,
    Fault,
}

impl From<StatusArg> for EntryStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Ok => Self::Ok,
            StatusArg::Dns => Self::DidNotStart,
            StatusArg::Dnf => Self::DidNotFinish,
            StatusArg::Dsq => Self::Disqualified,
            StatusArg::Fault => Self::FaultPenalty,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum FaultTypeArg {
    MissedGate,
    Straddle,
    BindingRelease,
}

impl From<FaultTypeArg> for FaultType {
    fn from(value: FaultTypeArg) -> Self {
        match value {
            FaultTypeArg::MissedGate => Self::MissedGate,
            FaultTypeArg::Straddle => Self::Straddle,
            FaultTypeArg::BindingRelease => Self::BindingRelease,
        }
    }
}
