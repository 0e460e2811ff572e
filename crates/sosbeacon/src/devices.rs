//! Headless device implementations.
//!
//! These stand in for platform positioning and microphone services when
//! sosbeacon runs from the command line.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tracing::debug;

use crate::config::{Config, DeviceConfig};
use crate::error::{Error, Result};
use crate::event::LocationFix;
use crate::providers::{AudioCapture, LocationProvider, PermissionStatus, RecordingHandle};

/// Sample rate of generated clips.
const SAMPLE_RATE: u32 = 8_000;

/// Generated clips never exceed this many seconds.
const MAX_GENERATED_SECS: u32 = 300;

/// Location provider that always reports the configured position.
#[derive(Debug, Clone)]
pub struct StaticLocationProvider {
    fix: LocationFix,
    permission: PermissionStatus,
}

impl StaticLocationProvider {
    /// Create a provider reporting `fix`.
    #[must_use]
    pub fn new(fix: LocationFix, permission: PermissionStatus) -> Self {
        Self { fix, permission }
    }

    /// Build from the `[device]` configuration section.
    #[must_use]
    pub fn from_config(device: &DeviceConfig) -> Self {
        let fix = LocationFix::new(device.latitude, device.longitude)
            .with_accuracy(device.accuracy_m);
        Self::new(fix, device.location_permission.into())
    }
}

#[async_trait::async_trait]
impl LocationProvider for StaticLocationProvider {
    async fn request_permission(&self) -> PermissionStatus {
        self.permission
    }

    async fn current_fix(&self) -> Result<LocationFix> {
        let valid = (-90.0..=90.0).contains(&self.fix.latitude)
            && (-180.0..=180.0).contains(&self.fix.longitude);
        if !valid {
            return Err(Error::location(format!("invalid position {}", self.fix)));
        }
        Ok(self.fix)
    }
}

/// Audio capture that writes clips into a working directory.
///
/// Each recording gets its own file at start. On stop the file is filled
/// from the source clip, or with silence matching the recording length.
#[derive(Debug)]
pub struct ClipAudioCapture {
    recordings_dir: PathBuf,
    source_clip: Option<PathBuf>,
    permission: PermissionStatus,
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, PathBuf>>,
}

impl ClipAudioCapture {
    /// Create a capture writing into `recordings_dir`.
    #[must_use]
    pub fn new(recordings_dir: impl Into<PathBuf>, permission: PermissionStatus) -> Self {
        Self {
            recordings_dir: recordings_dir.into(),
            source_clip: None,
            permission,
            next_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Fill stopped recordings from `clip` instead of generating silence.
    #[must_use]
    pub fn with_source_clip(mut self, clip: impl Into<PathBuf>) -> Self {
        self.source_clip = Some(clip.into());
        self
    }

    /// Build from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let capture = Self::new(
            config.recordings_dir(),
            config.device.microphone_permission.into(),
        );
        match &config.device.clip_path {
            Some(clip) => capture.with_source_clip(clip),
            None => capture,
        }
    }

    /// Number of recordings started but not yet stopped.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn extension(&self) -> &str {
        self.source_clip
            .as_deref()
            .and_then(Path::extension)
            .and_then(|ext| ext.to_str())
            .unwrap_or("wav")
    }
}

#[async_trait::async_trait]
impl AudioCapture for ClipAudioCapture {
    async fn request_permission(&self) -> PermissionStatus {
        self.permission
    }

    async fn start_recording(&self) -> Result<RecordingHandle> {
        tokio::fs::create_dir_all(&self.recordings_dir)
            .await
            .map_err(|e| {
                Error::audio(format!(
                    "cannot create {}: {e}",
                    self.recordings_dir.display()
                ))
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let path = self
            .recordings_dir
            .join(format!("sos-{stamp}-{id}.{}", self.extension()));

        tokio::fs::File::create(&path)
            .await
            .map_err(|e| Error::audio(format!("cannot create {}: {e}", path.display())))?;

        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, path.clone());

        debug!(id, path = %path.display(), "Recording started");
        Ok(RecordingHandle::new(id, path))
    }

    async fn stop(&self, handle: &RecordingHandle) -> Result<PathBuf> {
        let path = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id)
            .ok_or_else(|| Error::audio(format!("recording {} is not active", handle.id)))?;

        let bytes = match &self.source_clip {
            Some(clip) => tokio::fs::read(clip)
                .await
                .map_err(|e| Error::audio(format!("cannot read {}: {e}", clip.display())))?,
            None => {
                let elapsed = (Utc::now() - handle.started_at).num_seconds();
                let secs = u32::try_from(elapsed)
                    .unwrap_or(0)
                    .clamp(1, MAX_GENERATED_SECS);
                silent_wav(secs)
            }
        };

        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| Error::audio(format!("cannot write {}: {e}", path.display())))?;

        debug!(id = handle.id, bytes = bytes.len(), "Recording stopped");
        Ok(path)
    }
}

/// Clips left in a recordings directory, oldest name first.
///
/// Only clips whose upload failed remain after an activation ends. A missing
/// directory has none.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub fn retained_clips(recordings_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(recordings_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut clips = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            clips.push(path);
        }
    }
    clips.sort();
    Ok(clips)
}

/// A mono 16-bit PCM WAV file of `secs` seconds of silence.
fn silent_wav(secs: u32) -> Vec<u8> {
    let data_len = SAMPLE_RATE * 2 * secs;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(out.len() + data_len as usize, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sosbeacon_devices_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn test_static_location_reports_configured_fix() {
        let device = DeviceConfig {
            latitude: 12.9,
            longitude: 77.6,
            accuracy_m: 5.0,
            ..DeviceConfig::default()
        };
        let provider = StaticLocationProvider::from_config(&device);

        assert!(provider.request_permission().await.is_granted());
        let fix = provider.current_fix().await.unwrap();
        assert_eq!(fix, LocationFix::new(12.9, 77.6).with_accuracy(5.0));
    }

    #[tokio::test]
    async fn test_static_location_permission_denied() {
        let device = DeviceConfig {
            location_permission: false,
            ..DeviceConfig::default()
        };
        let provider = StaticLocationProvider::from_config(&device);
        assert!(!provider.request_permission().await.is_granted());
    }

    #[tokio::test]
    async fn test_static_location_rejects_invalid_position() {
        let provider =
            StaticLocationProvider::new(LocationFix::new(120.0, 0.0), PermissionStatus::Granted);
        let err = provider.current_fix().await.unwrap_err();
        assert!(matches!(err, Error::Location(_)));
    }

    #[tokio::test]
    async fn test_clip_capture_generates_silence() {
        let dir = scratch_dir("silence");
        let capture = ClipAudioCapture::new(&dir, PermissionStatus::Granted);

        let handle = capture.start_recording().await.unwrap();
        assert!(handle.path.exists());
        assert_eq!(capture.active_count(), 1);

        let path = capture.stop(&handle).await.unwrap();
        assert_eq!(path, handle.path);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(bytes.len(), 44 + (SAMPLE_RATE * 2) as usize);
        assert_eq!(capture.active_count(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_clip_capture_copies_source_clip() {
        let dir = scratch_dir("source");
        std::fs::create_dir_all(&dir).unwrap();
        let clip = dir.join("voice.m4a");
        std::fs::write(&clip, b"recorded voice").unwrap();

        let capture =
            ClipAudioCapture::new(dir.join("rec"), PermissionStatus::Granted).with_source_clip(&clip);
        let handle = capture.start_recording().await.unwrap();
        assert_eq!(handle.path.extension().unwrap(), "m4a");

        let path = capture.stop(&handle).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"recorded voice");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_clip_capture_double_stop_is_error() {
        let dir = scratch_dir("double");
        let capture = ClipAudioCapture::new(&dir, PermissionStatus::Granted);

        let handle = capture.start_recording().await.unwrap();
        capture.stop(&handle).await.unwrap();
        let err = capture.stop(&handle).await.unwrap_err();
        assert!(matches!(err, Error::Audio(_)));

        let unknown = RecordingHandle::new(999, dir.join("ghost.wav"));
        assert!(capture.stop(&unknown).await.is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_clip_capture_discard_removes_file() {
        let dir = scratch_dir("discard");
        let capture = ClipAudioCapture::new(&dir, PermissionStatus::Granted);

        let handle = capture.start_recording().await.unwrap();
        let path = capture.stop(&handle).await.unwrap();
        capture.discard(&path).await.unwrap();
        assert!(!path.exists());

        // Discarding again is fine.
        capture.discard(&path).await.unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_clip_capture_missing_source_clip() {
        let dir = scratch_dir("missing");
        let capture = ClipAudioCapture::new(&dir, PermissionStatus::Granted)
            .with_source_clip(dir.join("absent.m4a"));

        let handle = capture.start_recording().await.unwrap();
        assert!(matches!(capture.stop(&handle).await, Err(Error::Audio(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_from_config_permissions() {
        let mut config = Config::default();
        config.device.microphone_permission = false;
        config.device.clip_path = Some(PathBuf::from("/tmp/voice.ogg"));

        let capture = ClipAudioCapture::from_config(&config);
        assert_eq!(capture.permission, PermissionStatus::Denied);
        assert_eq!(capture.extension(), "ogg");
    }

    #[tokio::test]
    async fn test_retained_clips_lists_stopped_recordings() {
        let dir = scratch_dir("retained");
        assert!(retained_clips(&dir).unwrap().is_empty());

        let capture = ClipAudioCapture::new(&dir, PermissionStatus::Granted);
        let kept = capture.start_recording().await.unwrap();
        let kept_path = capture.stop(&kept).await.unwrap();
        let dropped = capture.start_recording().await.unwrap();
        let dropped_path = capture.stop(&dropped).await.unwrap();
        capture.discard(&dropped_path).await.unwrap();

        assert_eq!(retained_clips(&dir).unwrap(), vec![kept_path]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_silent_wav_header() {
        let wav = silent_wav(2);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(wav.len(), 44 + 32_000);
    }
}
