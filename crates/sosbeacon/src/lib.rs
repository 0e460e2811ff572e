//! `sosbeacon` - SOS activation engine with local evidence storage
//!
//! An activation takes a location fix, records a short audio clip, uploads
//! it and files an SOS event, reporting every step on a timeline. Device and
//! storage access sit behind the traits in [`providers`].

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod devices;
pub mod error;
pub mod event;
pub mod logging;
pub mod media;
pub mod orchestrator;
pub mod providers;
pub mod session;
pub mod storage;
pub mod timeline;

pub use config::Config;
pub use devices::{retained_clips, ClipAudioCapture, StaticLocationProvider};
pub use error::{Error, Permission, Result};
pub use event::{LocationFix, NewSosEvent, SosEvent};
pub use logging::init_logging;
pub use media::{LocalEvidenceStore, MediaStore};
pub use orchestrator::{OrchestratorSettings, Outcome, SosOrchestrator};
pub use providers::{AudioCapture, EvidenceStore, LocationProvider, PermissionStatus, RecordingHandle};
pub use session::{ActivationSnapshot, AlertAction, FailureAlert, Phase};
pub use storage::{Storage, StorageStats};
pub use timeline::{EntryKind, TimelineEntry};
