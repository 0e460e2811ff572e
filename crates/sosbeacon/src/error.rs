//! Error types for sosbeacon.
//!
//! This module defines all error types used throughout the sosbeacon crate.
//! Activation errors carry a short cause suitable for the status timeline;
//! the remaining variants cover storage, configuration and I/O plumbing.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A device permission the activation depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Foreground location access.
    Location,
    /// Microphone access for audio capture.
    Microphone,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Location => write!(f, "location"),
            Self::Microphone => write!(f, "microphone"),
        }
    }
}

/// The main error type for sosbeacon operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Activation Errors ===
    /// The user denied a permission the activation needs.
    #[error("{permission} permission denied")]
    PermissionDenied {
        /// Which permission was refused.
        permission: Permission,
    },

    /// The location fix timed out or was unavailable.
    #[error("location unavailable: {0}")]
    Location(String),

    /// Recording could not be started or stopped, or produced no file.
    #[error("audio recording failed: {0}")]
    Audio(String),

    /// The recording could not be uploaded.
    #[error("upload failed: {0}")]
    Upload(String),

    /// The SOS event record could not be inserted.
    #[error("failed to save SOS event: {0}")]
    Persist(String),

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for sosbeacon operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a permission denied error.
    #[must_use]
    pub fn permission_denied(permission: Permission) -> Self {
        Self::PermissionDenied { permission }
    }

    /// Create a location error.
    #[must_use]
    pub fn location(message: impl Into<String>) -> Self {
        Self::Location(message.into())
    }

    /// Create an audio error.
    #[must_use]
    pub fn audio(message: impl Into<String>) -> Self {
        Self::Audio(message.into())
    }

    /// Create an upload error.
    #[must_use]
    pub fn upload(message: impl Into<String>) -> Self {
        Self::Upload(message.into())
    }

    /// Create a persistence error.
    #[must_use]
    pub fn persist(message: impl Into<String>) -> Self {
        Self::Persist(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is a permission issue.
    #[must_use]
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// Check if this error belongs to the activation taxonomy.
    #[must_use]
    pub fn is_activation_error(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. }
                | Self::Location(_)
                | Self::Audio(_)
                | Self::Upload(_)
                | Self::Persist(_)
        )
    }

    /// Short human-readable cause for the status timeline.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied {
                permission: Permission::Location,
            } => "Location permission denied".to_string(),
            Self::PermissionDenied {
                permission: Permission::Microphone,
            } => "Microphone permission denied".to_string(),
            Self::Location(msg) => format!("Could not get your location: {msg}"),
            Self::Audio(msg) => format!("Audio recording failed: {msg}"),
            Self::Upload(msg) => format!("Could not upload recording: {msg}"),
            Self::Persist(msg) => format!("Could not save SOS alert: {msg}"),
            other => other.to_string(),
        }
    }
}
