//! Logging setup for sosbeacon.
//!
//! Diagnostics go to stderr through `tracing`. Timeline output printed by
//! `sosctl` goes to stdout, so the two never interleave in pipes.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crate target used in the default filter.
const LOG_TARGET: &str = "sosbeacon";

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Warnings and errors. Keeps activation output readable.
    #[default]
    Normal,
    /// Phase transitions and provider activity.
    Verbose,
    /// Everything, including per-tick recording updates.
    Trace,
}

impl Verbosity {
    /// Derive the verbosity from `-v` count and `-q` flag. Quiet wins.
    #[must_use]
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Trace,
        }
    }

    /// Tracing level for this verbosity.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::WARN,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Default filter directive, e.g. `sosbeacon=debug`.
    #[must_use]
    pub fn directive(self) -> String {
        format!("{LOG_TARGET}={}", self.level()).to_lowercase()
    }
}

/// Initialize the logging system.
///
/// Call once at startup. `RUST_LOG` takes precedence over `verbosity`.
///
/// ```no_run
/// use sosbeacon::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbosity >= Verbosity::Verbose)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    // Already set by an earlier call.
    let _ = subscriber.try_init();
}
