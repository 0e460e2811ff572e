//! Collaborator contracts for the SOS orchestrator.
//!
//! The orchestrator drives device and backend services only through these
//! traits. Every call is awaited in sequence and reports failure through the
//! crate [`Error`](crate::Error) taxonomy.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::event::{LocationFix, NewSosEvent, SosEvent};

/// Outcome of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionStatus {
    /// The user allowed access.
    Granted,
    /// The user refused access.
    Denied,
}

impl PermissionStatus {
    /// Whether access was granted.
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl From<bool> for PermissionStatus {
    fn from(granted: bool) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::Denied
        }
    }
}

/// A recording in progress.
///
/// The orchestrator holds at most one of these at a time and hands it back to
/// [`AudioCapture::stop`] exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingHandle {
    /// Provider-assigned identifier.
    pub id: u64,
    /// Where the provider writes the clip.
    pub path: PathBuf,
    /// When recording started.
    pub started_at: DateTime<Utc>,
}

impl RecordingHandle {
    /// Create a handle for a recording that starts now.
    #[must_use]
    pub fn new(id: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
            started_at: Utc::now(),
        }
    }
}

/// On-device positioning.
#[async_trait::async_trait]
pub trait LocationProvider: Send + Sync {
    /// Ask for foreground location access.
    async fn request_permission(&self) -> PermissionStatus;

    /// Resolve a single position fix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Location`](crate::Error::Location) if no fix is available.
    async fn current_fix(&self) -> Result<LocationFix>;
}

/// On-device microphone recording.
#[async_trait::async_trait]
pub trait AudioCapture: Send + Sync {
    /// Ask for microphone access.
    async fn request_permission(&self) -> PermissionStatus;

    /// Begin recording.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`](crate::Error::Audio) if the recorder cannot start.
    async fn start_recording(&self) -> Result<RecordingHandle>;

    /// Stop recording and return the local file holding the clip.
    ///
    /// Must tolerate a handle that was already stopped or is otherwise
    /// invalid by returning an error rather than panicking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`](crate::Error::Audio) if stopping fails or no file exists.
    async fn stop(&self, handle: &RecordingHandle) -> Result<PathBuf>;

    /// Remove a clip that will never be uploaded.
    ///
    /// Called after a successful upload, on cancel, and when a held recording
    /// is released after a failure. A clip whose upload failed is not
    /// discarded: it stays where [`AudioCapture::stop`] left it as local
    /// evidence until the user removes it. `sosctl status` lists the count.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    async fn discard(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Remote object storage plus the SOS event table.
#[async_trait::async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Upload a local clip on behalf of `user_id` and return its public URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upload`](crate::Error::Upload) on storage or network failure.
    async fn upload_audio(&self, path: &Path, user_id: &str) -> Result<String>;

    /// Insert an SOS event record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persist`](crate::Error::Persist) if the insert fails.
    async fn insert_sos_event(&self, event: NewSosEvent) -> Result<SosEvent>;
}
