//! The SOS activation workflow.
//!
//! [`SosOrchestrator`] runs one activation at a time:
//!
//! 1. request location permission and take a fix
//! 2. request microphone permission and start recording
//! 3. wait out the fixed recording window
//! 4. stop the recorder and upload the clip
//! 5. insert the SOS event
//!
//! Every step appends to the session timeline. Any failure is terminal for
//! the activation. [`SosOrchestrator::cancel`] is honoured while acquiring a
//! location or recording, and whichever path takes the recording handle out
//! of the session is the one that stops it.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Permission, Result};
use crate::event::{LocationFix, NewSosEvent, SosEvent};
use crate::providers::{AudioCapture, EvidenceStore, LocationProvider, RecordingHandle};
use crate::session::{ActivationSession, ActivationSnapshot, FailureAlert, Phase};
use crate::timeline::{EntryKind, TimelineEntry};

/// Capacity of the timeline broadcast channel.
const TIMELINE_CHANNEL_CAPACITY: usize = 64;

/// How often the elapsed recording time is refreshed.
const ELAPSED_TICK: Duration = Duration::from_secs(1);

/// Tunables for an orchestrator instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// The user SOS events are filed under.
    pub user_id: String,
    /// Length of the evidentiary audio clip.
    pub recording_window: Duration,
    /// Upper bound on waiting for a location fix.
    pub location_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            user_id: "local-user".to_string(),
            recording_window: Duration::from_secs(10),
            location_timeout: Duration::from_secs(15),
        }
    }
}

impl OrchestratorSettings {
    /// Settings from the `[sos]` configuration section.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            user_id: config.sos.user_id.clone(),
            recording_window: config.recording_window(),
            location_timeout: config.location_timeout(),
        }
    }
}

/// How an activation ended, when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The SOS event was saved.
    Sent(SosEvent),
    /// The user cancelled before anything was uploaded.
    Cancelled,
    /// An activation was already running or awaiting reset; nothing happened.
    Ignored,
}

/// Coordinates one SOS activation at a time.
pub struct SosOrchestrator {
    location: Arc<dyn LocationProvider>,
    audio: Arc<dyn AudioCapture>,
    store: Arc<dyn EvidenceStore>,
    settings: OrchestratorSettings,
    session: Mutex<ActivationSession>,
    timeline_tx: broadcast::Sender<TimelineEntry>,
}

impl fmt::Debug for SosOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SosOrchestrator")
            .field("settings", &self.settings)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl SosOrchestrator {
    /// Create an orchestrator in `Ready`.
    #[must_use]
    pub fn new(
        location: Arc<dyn LocationProvider>,
        audio: Arc<dyn AudioCapture>,
        store: Arc<dyn EvidenceStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (timeline_tx, _) = broadcast::channel(TIMELINE_CHANNEL_CAPACITY);
        Self {
            location,
            audio,
            store,
            settings,
            session: Mutex::new(ActivationSession::new()),
            timeline_tx,
        }
    }

    /// The settings this orchestrator runs with.
    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.session().phase()
    }

    /// Read-only view of the current activation.
    #[must_use]
    pub fn snapshot(&self) -> ActivationSnapshot {
        self.session().snapshot()
    }

    /// Receive timeline entries as they are appended.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TimelineEntry> {
        self.timeline_tx.subscribe()
    }

    /// Run one activation to completion.
    ///
    /// Does nothing and returns [`Outcome::Ignored`] unless the session is
    /// `Ready`.
    ///
    /// # Errors
    ///
    /// Returns the activation error that moved the session to `Failed`. No
    /// SOS event exists in that case.
    pub async fn activate(&self) -> Result<Outcome> {
        let mut cancel_rx = {
            let mut session = self.session();
            if session.phase() != Phase::Ready {
                debug!(phase = %session.phase(), "Ignoring activation, session not ready");
                return Ok(Outcome::Ignored);
            }
            let rx = session.begin(self.settings.recording_window.as_secs())?;
            self.note(
                &mut session,
                EntryKind::Processing,
                "SOS activated, getting your location…",
            );
            rx
        };
        info!(user_id = %self.settings.user_id, "SOS activation started");

        match self.run(&mut cancel_rx).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => match self.fail(error).await {
                Some(error) => Err(error),
                None => Ok(Outcome::Cancelled),
            },
        }
    }

    /// Cancel the running activation.
    ///
    /// Only honoured while acquiring a location or recording. Returns whether
    /// the activation was cancelled.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the session rejects the transition.
    pub async fn cancel(&self) -> Result<bool> {
        let handle = {
            let mut session = self.session();
            if !session.phase().is_cancellable() {
                debug!(phase = %session.phase(), "Ignoring cancel, nothing to cancel");
                return Ok(false);
            }
            let handle = session.recording_handle.take();
            session.transition(Phase::Cancelled)?;
            session.signal_cancel();
            self.note(&mut session, EntryKind::Processing, "SOS cancelled");
            handle
        };
        info!("SOS activation cancelled");

        if let Some(handle) = handle {
            self.release(handle).await;
        }
        Ok(true)
    }

    /// Return a finished session to `Ready`. Returns whether anything changed.
    pub fn reset(&self) -> bool {
        let mut session = self.session();
        if !session.phase().is_terminal() {
            return false;
        }
        session.reset().is_ok()
    }

    /// The alert's "try again": reset, then activate.
    ///
    /// # Errors
    ///
    /// Same as [`SosOrchestrator::activate`].
    pub async fn retry(&self) -> Result<Outcome> {
        self.reset();
        self.activate().await
    }

    /// Close the failure alert, leaving the session terminal.
    pub fn dismiss_alert(&self) -> Option<FailureAlert> {
        self.session().alert.take()
    }

    async fn run(&self, cancel_rx: &mut watch::Receiver<bool>) -> Result<Outcome> {
        let Some(fix) = until_cancelled(cancel_rx, self.acquire_location()).await else {
            return Ok(Outcome::Cancelled);
        };
        let fix = fix?;
        if !self.record_fix(fix) {
            return Ok(Outcome::Cancelled);
        }

        let Some(permission) =
            until_cancelled(cancel_rx, self.audio.request_permission()).await
        else {
            return Ok(Outcome::Cancelled);
        };
        if !permission.is_granted() {
            return Err(Error::permission_denied(Permission::Microphone));
        }

        // Not raced against cancel: a dropped start could leave the recorder running.
        let handle = self.audio.start_recording().await?;
        if let Some(orphan) = self.hold_recording(handle)? {
            self.release(orphan).await;
            return Ok(Outcome::Cancelled);
        }

        if !self.wait_recording_window(cancel_rx).await {
            return Ok(Outcome::Cancelled);
        }

        let Some(handle) = self.begin_upload()? else {
            return Ok(Outcome::Cancelled);
        };
        let clip = match self.audio.stop(&handle).await {
            Ok(clip) => clip,
            Err(e) => {
                self.discard(&handle).await;
                return Err(e);
            }
        };
        debug!(handle = handle.id, path = %clip.display(), "Recording stopped");

        let audio_url = self.store.upload_audio(&clip, &self.settings.user_id).await?;
        info!(url = %audio_url, "Recording uploaded");
        if let Err(e) = self.audio.discard(&clip).await {
            warn!(path = %clip.display(), error = %e, "Failed to remove uploaded clip");
        }

        let fix = self.begin_persist()?;
        let event = self
            .store
            .insert_sos_event(NewSosEvent::new(&self.settings.user_id, fix, audio_url))
            .await?;

        {
            let mut session = self.session();
            session.transition(Phase::Sent)?;
            self.note(&mut session, EntryKind::Success, "SOS alert sent");
        }
        info!(event_id = event.id, "SOS activation complete");
        Ok(Outcome::Sent(event))
    }

    async fn acquire_location(&self) -> Result<LocationFix> {
        if !self.location.request_permission().await.is_granted() {
            return Err(Error::permission_denied(Permission::Location));
        }
        let timeout = self.settings.location_timeout;
        match tokio::time::timeout(timeout, self.location.current_fix()).await {
            Ok(fix) => fix,
            Err(_) => Err(Error::location(format!(
                "timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Store the fix. Returns `false` if the activation was cancelled meanwhile.
    fn record_fix(&self, fix: LocationFix) -> bool {
        let mut session = self.session();
        if session.phase() != Phase::AcquiringLocation {
            return false;
        }
        session.location_fix = Some(fix);
        self.note(
            &mut session,
            EntryKind::Processing,
            format!("Location acquired: {fix}"),
        );
        true
    }

    /// Hand the new recording to the session and enter `Recording`.
    ///
    /// If the activation was cancelled while the recorder was starting, the
    /// handle is returned so the caller can release it.
    fn hold_recording(&self, handle: RecordingHandle) -> Result<Option<RecordingHandle>> {
        let mut session = self.session();
        if session.phase() != Phase::AcquiringLocation {
            return Ok(Some(handle));
        }
        debug!(handle = handle.id, path = %handle.path.display(), "Recording started");
        session.recording_handle = Some(handle);
        session.transition(Phase::Recording)?;
        let secs = self.settings.recording_window.as_secs();
        self.note(
            &mut session,
            EntryKind::Processing,
            format!("Recording audio for {secs}s…"),
        );
        Ok(None)
    }

    /// Sleep for the recording window. Returns `false` if cancelled first.
    async fn wait_recording_window(&self, cancel_rx: &mut watch::Receiver<bool>) -> bool {
        let window = self.settings.recording_window;
        let start = Instant::now();
        let deadline = tokio::time::sleep_until(start + window);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval_at(start + ELAPSED_TICK, ELAPSED_TICK);

        loop {
            tokio::select! {
                biased;
                () = cancelled(cancel_rx) => return false,
                () = &mut deadline => {
                    self.session().recording_elapsed_seconds = window.as_secs();
                    return true;
                }
                _ = ticker.tick() => {
                    let elapsed = start.elapsed().as_secs().min(window.as_secs());
                    self.session().recording_elapsed_seconds = elapsed;
                    debug!(elapsed, "Recording");
                }
            }
        }
    }

    /// Take the handle and enter `Uploading`. `None` if cancelled meanwhile.
    fn begin_upload(&self) -> Result<Option<RecordingHandle>> {
        let mut session = self.session();
        if session.phase() != Phase::Recording {
            return Ok(None);
        }
        let handle = session
            .recording_handle
            .take()
            .ok_or_else(|| Error::audio("no recording in progress"))?;
        session.transition(Phase::Uploading)?;
        session.cancel_tx = None;
        self.note(&mut session, EntryKind::Processing, "Uploading recording…");
        Ok(Some(handle))
    }

    fn begin_persist(&self) -> Result<LocationFix> {
        let mut session = self.session();
        let fix = session
            .location_fix
            .ok_or_else(|| Error::internal("location fix missing at persist"))?;
        session.transition(Phase::Persisting)?;
        self.note(&mut session, EntryKind::Processing, "Saving SOS alert…");
        Ok(fix)
    }

    /// Move an active session to `Failed`.
    ///
    /// Returns `None` when the session is no longer active, i.e. the user
    /// cancelled while the failing step was in flight.
    async fn fail(&self, error: Error) -> Option<Error> {
        let handle = {
            let mut session = self.session();
            if !session.phase().is_active() {
                debug!(error = %error, "Dropping error from cancelled activation");
                return None;
            }
            let handle = session.recording_handle.take();
            session.cancel_tx = None;
            session.mark_failed();
            self.note(&mut session, EntryKind::Error, error.user_message());
            session.alert = Some(FailureAlert::for_error(&error));
            handle
        };
        warn!(error = %error, "SOS activation failed");

        if let Some(handle) = handle {
            self.release(handle).await;
        }
        Some(error)
    }

    /// Stop and discard a recording that will not be uploaded.
    ///
    /// The clip is discarded even when stop fails. Errors are logged and
    /// swallowed.
    async fn release(&self, handle: RecordingHandle) {
        match self.audio.stop(&handle).await {
            Ok(path) => {
                if let Err(e) = self.audio.discard(&path).await {
                    warn!(handle = handle.id, error = %e, "Failed to discard recording");
                }
            }
            Err(e) => {
                warn!(handle = handle.id, error = %e, "Failed to stop recording during cleanup");
                self.discard(&handle).await;
            }
        }
    }

    /// Best-effort removal of the file a failed stop left behind.
    async fn discard(&self, handle: &RecordingHandle) {
        if let Err(e) = self.audio.discard(&handle.path).await {
            warn!(handle = handle.id, path = %handle.path.display(), error = %e, "Failed to discard recording");
        }
    }

    fn note(
        &self,
        session: &mut ActivationSession,
        kind: EntryKind,
        message: impl Into<String>,
    ) {
        let entry = session.note(kind, message);
        debug!(kind = %entry.kind, message = %entry.message, "Timeline");
        // No subscribers is fine.
        let _ = self.timeline_tx.send(entry);
    }

    fn session(&self) -> MutexGuard<'_, ActivationSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolve once the activation's cancel flag is set.
async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    let closed = cancel_rx.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        // Sender gone without cancelling: never fires.
        std::future::pending::<()>().await;
    }
}

/// Run `fut` unless the activation is cancelled first.
async fn until_cancelled<F: Future>(
    cancel_rx: &mut watch::Receiver<bool>,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = cancelled(cancel_rx) => None,
        out = fut => Some(out),
    }
}
