//! Activation state machine and session state.
//!
//! An [`ActivationSession`] is the single source of truth for the current
//! activation: its phase, the fix and recording it owns, and the timeline
//! shown to the user. [`ActivationSnapshot`] is the read-only view handed to
//! presentation code.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::error::{Error, Result};
use crate::event::LocationFix;
use crate::providers::RecordingHandle;
use crate::timeline::{EntryKind, Timeline, TimelineEntry};

/// Phase of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for the user to activate.
    #[default]
    Ready,
    /// Requesting location permission and a fix.
    AcquiringLocation,
    /// Capturing audio for the fixed window.
    Recording,
    /// Stopping the recorder and uploading the clip.
    Uploading,
    /// Inserting the SOS event record.
    Persisting,
    /// The SOS event was saved.
    Sent,
    /// The activation failed.
    Failed,
    /// The user cancelled the activation.
    Cancelled,
}

impl Phase {
    /// Whether the activation has finished and needs a reset.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }

    /// Whether an activation is currently running.
    #[must_use]
    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != Self::Ready
    }

    /// Whether the user may cancel in this phase.
    #[must_use]
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::AcquiringLocation | Self::Recording)
    }

    /// Label of the primary action control.
    #[must_use]
    pub fn action_label(self) -> &'static str {
        match self {
            Self::Ready => "Activate",
            Self::AcquiringLocation | Self::Recording | Self::Uploading | Self::Persisting => {
                "Sending…"
            }
            Self::Sent | Self::Failed | Self::Cancelled => "Reset",
        }
    }

    /// Whether `next` is a legal successor of this phase.
    #[must_use]
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::{
            AcquiringLocation, Cancelled, Failed, Persisting, Ready, Recording, Sent, Uploading,
        };
        matches!(
            (self, next),
            (Ready, AcquiringLocation)
                | (AcquiringLocation, Recording | Failed | Cancelled)
                | (Recording, Uploading | Cancelled)
                | (Uploading, Persisting | Failed)
                | (Persisting, Sent | Failed)
                | (Sent | Failed | Cancelled, Ready)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::AcquiringLocation => write!(f, "acquiring_location"),
            Self::Recording => write!(f, "recording"),
            Self::Uploading => write!(f, "uploading"),
            Self::Persisting => write!(f, "persisting"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A choice offered by the failure alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertAction {
    /// Reset to `Ready` and activate again.
    TryAgain,
    /// Close the alert, leaving the session terminal.
    Dismiss,
}

impl AlertAction {
    /// Button label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::TryAgain => "Try again",
            Self::Dismiss => "Dismiss",
        }
    }
}

/// Blocking alert raised when an activation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureAlert {
    /// Alert heading.
    pub title: String,
    /// The failure cause.
    pub message: String,
    /// Offered choices, primary first.
    pub actions: Vec<AlertAction>,
}

impl FailureAlert {
    /// Alert for a failed activation.
    #[must_use]
    pub fn for_error(error: &Error) -> Self {
        Self {
            title: "SOS not sent".to_string(),
            message: error.user_message(),
            actions: vec![AlertAction::TryAgain, AlertAction::Dismiss],
        }
    }
}

/// Mutable state of the current activation.
#[derive(Debug, Default)]
pub struct ActivationSession {
    pub(crate) phase: Phase,
    pub(crate) recording_elapsed_seconds: u64,
    pub(crate) recording_window_secs: u64,
    pub(crate) location_fix: Option<LocationFix>,
    pub(crate) recording_handle: Option<RecordingHandle>,
    pub(crate) timeline: Timeline,
    pub(crate) alert: Option<FailureAlert>,
    pub(crate) cancel_tx: Option<watch::Sender<bool>>,
}

impl ActivationSession {
    /// Create a session in `Ready`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `next`, rejecting illegal transitions.
    pub(crate) fn transition(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::internal(format!(
                "illegal phase transition {} -> {}",
                self.phase, next
            )));
        }
        info!(from = %self.phase, to = %next, "SOS phase change");
        self.phase = next;
        Ok(())
    }

    /// Fail the activation from whatever phase it is in.
    ///
    /// Unlike [`transition`](Self::transition) this also accepts `Recording`,
    /// since an internal error may surface at any step.
    pub(crate) fn mark_failed(&mut self) {
        info!(from = %self.phase, to = %Phase::Failed, "SOS phase change");
        self.phase = Phase::Failed;
    }

    /// Start a fresh activation from `Ready`, returning the cancellation receiver.
    pub(crate) fn begin(&mut self, recording_window_secs: u64) -> Result<watch::Receiver<bool>> {
        self.transition(Phase::AcquiringLocation)?;
        self.timeline.clear();
        self.recording_elapsed_seconds = 0;
        self.recording_window_secs = recording_window_secs;
        self.location_fix = None;
        self.recording_handle = None;
        self.alert = None;
        let (tx, rx) = watch::channel(false);
        self.cancel_tx = Some(tx);
        Ok(rx)
    }

    /// Return a terminal session to `Ready`.
    pub(crate) fn reset(&mut self) -> Result<()> {
        self.transition(Phase::Ready)?;
        self.timeline.clear();
        self.recording_elapsed_seconds = 0;
        self.location_fix = None;
        self.alert = None;
        self.cancel_tx = None;
        Ok(())
    }

    /// Append a timeline entry.
    pub(crate) fn note(&mut self, kind: EntryKind, message: impl Into<String>) -> TimelineEntry {
        self.timeline.push(kind, message)
    }

    /// Wake the timer wait of the running activation, if any.
    pub(crate) fn signal_cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            // No receiver means the activation already finished waiting.
            let _ = tx.send(true);
        }
    }

    fn status_line(&self) -> String {
        match self.phase {
            Phase::Ready => "Press Activate to send an SOS alert".to_string(),
            Phase::Recording => format!(
                "Recording audio… {}s / {}s",
                self.recording_elapsed_seconds, self.recording_window_secs
            ),
            _ => self
                .timeline
                .latest()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
        }
    }

    /// Read-only view for presentation.
    #[must_use]
    pub fn snapshot(&self) -> ActivationSnapshot {
        ActivationSnapshot {
            phase: self.phase,
            action_label: self.phase.action_label().to_string(),
            status_line: self.status_line(),
            location: self.location_fix,
            location_readout: self.location_fix.map(|fix| fix.to_string()),
            recording_elapsed_seconds: self.recording_elapsed_seconds,
            recording_active: self.recording_handle.is_some(),
            timeline: self.timeline.newest_first(),
            cancel_visible: self.phase.is_cancellable(),
            alert: self.alert.clone(),
        }
    }
}

/// Everything a screen needs to render the current activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationSnapshot {
    /// Current phase.
    pub phase: Phase,
    /// Label of the primary action control.
    pub action_label: String,
    /// One-line status text.
    pub status_line: String,
    /// Fix once acquired.
    pub location: Option<LocationFix>,
    /// Formatted fix once acquired.
    pub location_readout: Option<String>,
    /// Seconds recorded so far in the fixed window.
    pub recording_elapsed_seconds: u64,
    /// Whether a recording handle is currently held.
    pub recording_active: bool,
    /// Timeline, newest first.
    pub timeline: Vec<TimelineEntry>,
    /// Whether the cancel control is shown.
    pub cancel_visible: bool,
    /// Pending failure alert.
    pub alert: Option<FailureAlert>,
}
