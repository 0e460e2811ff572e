//! Local evidence storage.
//!
//! [`MediaStore`] keeps uploaded clips in a content-addressed directory tree
//! and [`LocalEvidenceStore`] pairs it with the SOS event database so the
//! orchestrator can run without any remote backend.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{NewSosEvent, SosEvent};
use crate::providers::EvidenceStore;
use crate::storage::Storage;

/// Extension used when the clip's own is missing or unusable.
const DEFAULT_EXTENSION: &str = "m4a";

/// Folder used when a user id has no usable characters.
const ANONYMOUS_FOLDER: &str = "anonymous";

/// Content-addressed clip storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    base_url: String,
}

impl MediaStore {
    /// Create a media store that writes under `root` and publishes URLs
    /// under `base_url`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            root: root.into(),
            base_url,
        }
    }

    /// Root directory of stored clips.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy a clip into the store and return its public URL.
    ///
    /// The object key is `<user>/<blake3>.<ext>`, keeping the clip's own
    /// extension, so uploading the same clip twice yields the same URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upload`] if the clip is missing, empty or cannot be written.
    pub async fn upload(&self, path: &Path, user_id: &str) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::upload(format!("cannot read {}: {e}", path.display())))?;
        if bytes.is_empty() {
            return Err(Error::upload(format!("{} is empty", path.display())));
        }

        let hash = blake3::hash(&bytes).to_hex().to_string();
        let folder = sanitize_user_id(user_id);
        let extension = clip_extension(path);
        let key = format!("{folder}/{hash}.{extension}");

        let dir = self.root.join(&folder);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::upload(format!("cannot create {}: {e}", dir.display())))?;

        let dest = dir.join(format!("{hash}.{extension}"));
        tokio::fs::write(&dest, &bytes)
            .await
            .map_err(|e| Error::upload(format!("cannot write {}: {e}", dest.display())))?;

        debug!(bytes = bytes.len(), key = %key, "Stored clip");
        Ok(format!("{}/{key}", self.base_url))
    }
}

/// Lowercased extension of `path`, if it is short and alphanumeric.
fn clip_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map_or_else(|| DEFAULT_EXTENSION.to_string(), str::to_ascii_lowercase)
}

/// Map a user id onto a single safe path component.
fn sanitize_user_id(user_id: &str) -> String {
    let cleaned: String = user_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.chars().all(|c| c == '_') {
        ANONYMOUS_FOLDER.to_string()
    } else {
        cleaned
    }
}

/// Evidence store backed by the local filesystem and `SQLite`.
#[derive(Debug)]
pub struct LocalEvidenceStore {
    media: MediaStore,
    storage: Mutex<Storage>,
}

impl LocalEvidenceStore {
    /// Combine a media store with an open event database.
    #[must_use]
    pub fn new(media: MediaStore, storage: Storage) -> Self {
        Self {
            media,
            storage: Mutex::new(storage),
        }
    }

    /// Open the media directory and database named by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = Storage::open(config.database_path())?;
        let media = MediaStore::new(config.media_dir(), config.public_base_url());
        info!(media_dir = %media.root().display(), "Local evidence store ready");
        Ok(Self::new(media, storage))
    }

    /// The clip store.
    #[must_use]
    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    /// Run `f` against the event database.
    pub fn with_storage<T>(&self, f: impl FnOnce(&Storage) -> T) -> T {
        let storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
        f(&storage)
    }
}

#[async_trait::async_trait]
impl EvidenceStore for LocalEvidenceStore {
    async fn upload_audio(&self, path: &Path, user_id: &str) -> Result<String> {
        self.media.upload(path, user_id).await
    }

    async fn insert_sos_event(&self, event: NewSosEvent) -> Result<SosEvent> {
        self.with_storage(|storage| storage.insert(&event))
            .map_err(|e| Error::persist(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LocationFix;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sosbeacon_media_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_sanitize_user_id() {
        assert_eq!(sanitize_user_id("user-1_a"), "user-1_a");
        assert_eq!(sanitize_user_id("../etc"), "___etc");
        assert_eq!(sanitize_user_id("a/b"), "a_b");
        assert_eq!(sanitize_user_id(""), "anonymous");
        assert_eq!(sanitize_user_id(".."), "anonymous");
    }

    #[test]
    fn test_clip_extension() {
        assert_eq!(clip_extension(Path::new("/r/sos-1.wav")), "wav");
        assert_eq!(clip_extension(Path::new("/r/sos-1.M4A")), "m4a");
        assert_eq!(clip_extension(Path::new("/r/sos-1")), "m4a");
        assert_eq!(clip_extension(Path::new("/r/sos-1.a b")), "m4a");
    }

    #[tokio::test]
    async fn test_upload_keeps_wav_extension() {
        let dir = scratch_dir("wav");
        let clip = dir.join("sos-1.wav");
        std::fs::write(&clip, b"RIFF....WAVE").unwrap();

        let store = MediaStore::new(dir.join("media"), "https://x");
        let url = store.upload(&clip, "user-1").await.unwrap();

        let hash = blake3::hash(b"RIFF....WAVE").to_hex().to_string();
        assert_eq!(url, format!("https://x/user-1/{hash}.wav"));
        assert!(dir.join("media").join("user-1").join(format!("{hash}.wav")).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let store = MediaStore::new("/tmp/x", "https://cdn.example/clips/");
        assert_eq!(store.base_url, "https://cdn.example/clips");
    }

    #[tokio::test]
    async fn test_upload_is_content_addressed() {
        let dir = scratch_dir("upload");
        let clip = dir.join("clip.m4a");
        std::fs::write(&clip, b"audio bytes").unwrap();

        let store = MediaStore::new(dir.join("media"), "https://x");
        let url = store.upload(&clip, "user-1").await.unwrap();

        let hash = blake3::hash(b"audio bytes").to_hex().to_string();
        assert_eq!(url, format!("https://x/user-1/{hash}.m4a"));
        let stored = dir.join("media").join("user-1").join(format!("{hash}.m4a"));
        assert_eq!(std::fs::read(stored).unwrap(), b"audio bytes");

        let again = store.upload(&clip, "user-1").await.unwrap();
        assert_eq!(again, url);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let dir = scratch_dir("missing");
        let store = MediaStore::new(dir.join("media"), "https://x");

        let err = store.upload(&dir.join("nope.m4a"), "u").await.unwrap_err();
        assert!(matches!(err, Error::Upload(_)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_upload_empty_file() {
        let dir = scratch_dir("empty");
        let clip = dir.join("clip.m4a");
        std::fs::write(&clip, b"").unwrap();
        let store = MediaStore::new(dir.join("media"), "https://x");

        let err = store.upload(&clip, "u").await.unwrap_err();
        assert!(matches!(err, Error::Upload(ref m) if m.contains("empty")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_local_evidence_store_round_trip() {
        let dir = scratch_dir("local");
        let clip = dir.join("clip.m4a");
        std::fs::write(&clip, b"sos").unwrap();

        let store = LocalEvidenceStore::new(
            MediaStore::new(dir.join("media"), "https://x"),
            Storage::open_in_memory().unwrap(),
        );

        let url = store.upload_audio(&clip, "user-1").await.unwrap();
        let event = store
            .insert_sos_event(NewSosEvent::new(
                "user-1",
                LocationFix::new(12.9, 77.6),
                url.clone(),
            ))
            .await
            .unwrap();

        assert_eq!(event.audio_url, url);
        assert_eq!(event.latitude, 12.9);
        let stored = store.with_storage(|s| s.get(event.id)).unwrap().unwrap();
        assert_eq!(stored, event);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_from_config_uses_configured_paths() {
        let dir = scratch_dir("config");
        let mut config = Config::default();
        config.storage.database_path = Some(dir.join("events.db"));
        config.storage.media_dir = Some(dir.join("media"));
        config.storage.public_base_url = Some("https://cdn/".to_string());

        let store = LocalEvidenceStore::from_config(&config).unwrap();
        assert_eq!(store.media().root(), dir.join("media"));
        assert_eq!(store.media().base_url, "https://cdn");
        assert!(dir.join("events.db").exists());

        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
