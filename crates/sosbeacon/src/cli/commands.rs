//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Default number of events shown by `history list`.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Activate command arguments.
#[derive(Debug, Args)]
pub struct ActivateCommand {
    /// Print timeline entries and the final snapshot as JSON lines
    #[arg(short, long)]
    pub json: bool,
}

/// SOS history commands.
#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    /// List recent SOS events, newest first
    List {
        /// Maximum number of events
        #[arg(short, long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,

        /// Only show events filed by this user
        #[arg(short, long)]
        user: Option<String>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show a single SOS event
    Show {
        /// Event ID
        id: i64,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Delete an SOS event record
    Delete {
        /// Event ID
        id: i64,
    },
}

impl HistoryCommand {
    /// Whether the command writes JSON.
    #[must_use]
    pub fn json(&self) -> bool {
        match self {
            Self::List { json, .. } | Self::Show { json, .. } => *json,
            Self::Delete { .. } => false,
        }
    }
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
