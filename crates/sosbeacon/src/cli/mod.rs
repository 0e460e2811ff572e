//! Command-line interface for sosbeacon.
//!
//! This module provides the CLI structure for the `sosctl` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ActivateCommand, ConfigCommand, HistoryCommand, StatusCommand, DEFAULT_HISTORY_LIMIT,
};

use crate::logging::Verbosity;

/// sosctl - Send an SOS alert with your location and a short audio clip
///
/// Runs one SOS activation against the configured devices and keeps a local
/// history of every alert that was sent.
#[derive(Debug, Parser)]
#[command(name = "sosctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send an SOS alert (Ctrl-C cancels)
    Activate(ActivateCommand),

    /// Browse or delete sent SOS alerts
    #[command(subcommand)]
    History(HistoryCommand),

    /// Show storage and device status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }
}
