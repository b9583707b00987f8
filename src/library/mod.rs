//! Media library seam: what the browser and the disposition step need from the
//! store that owns the user's videos.

mod directory;

use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::error::AppError;
use crate::ffmpeg::ffprobe::VideoMetadata;

pub use directory::DirectoryLibrary;

/// Stable identifier of a library item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MediaItemId(String);

impl MediaItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a video owned by the library.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaItem {
    pub id: MediaItemId,
    /// The playable resource.
    pub primary: PathBuf,
    /// Every file backing the item, primary first.
    pub resources: Vec<PathBuf>,
    pub created_at: SystemTime,
    pub duration_secs: Option<f64>,
    /// Sum of all resource sizes.
    pub byte_size: u64,
}

/// A library item resolved to something a player can open.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableAsset {
    pub item_id: MediaItemId,
    pub path: PathBuf,
    pub metadata: VideoMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationStatus {
    NotDetermined,
    Authorized,
    Limited,
    Denied,
}

impl AuthorizationStatus {
    pub fn grants_access(self) -> bool {
        matches!(self, Self::Authorized | Self::Limited)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryChange {
    pub inserted: Vec<MediaItemId>,
    pub removed: Vec<MediaItemId>,
}

impl LibraryChange {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// A grouped library mutation: applied completely or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LibraryChangeRequest {
    pub create_from: Option<PathBuf>,
    /// File name for the created item; the library may adjust it to stay unique.
    pub preferred_name: Option<String>,
    pub delete: Vec<MediaItemId>,
}

impl LibraryChangeRequest {
    pub fn create(file: impl Into<PathBuf>) -> Self {
        Self {
            create_from: Some(file.into()),
            preferred_name: None,
            delete: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.preferred_name = Some(name.into());
        self
    }

    pub fn deleting(mut self, id: MediaItemId) -> Self {
        self.delete.push(id);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryCommit {
    pub created: Option<MediaItem>,
    pub deleted: Vec<MediaItemId>,
}

pub trait MediaLibrary: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;

    fn request_authorization(&self) -> AuthorizationStatus;

    /// All videos, newest first.
    fn fetch_videos(&self) -> Result<Vec<MediaItem>, AppError>;

    fn item(&self, id: &MediaItemId) -> Result<Option<MediaItem>, AppError> {
        Ok(self.fetch_videos()?.into_iter().find(|item| &item.id == id))
    }

    /// Resolve an item for preview and compression.
    fn request_asset(&self, item: &MediaItem) -> Result<PlayableAsset, AppError>;

    fn perform_changes(&self, request: LibraryChangeRequest) -> Result<LibraryCommit, AppError>;

    /// Receive a notification after every change to the item list.
    fn subscribe(&self) -> Receiver<LibraryChange>;

    /// Pick up edits made outside the app. Stores that push their own
    /// notifications have nothing to do here.
    fn refresh(&self) -> Result<LibraryChange, AppError> {
        Ok(LibraryChange::default())
    }
}

/// Fan-out of library changes to every live subscriber.
#[derive(Default)]
pub struct ChangeBroadcaster {
    subscribers: Mutex<Vec<Sender<LibraryChange>>>,
}

impl ChangeBroadcaster {
    pub fn subscribe(&self) -> Receiver<LibraryChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn notify(&self, change: LibraryChange) {
        if change.is_empty() {
            return;
        }
        // Dropped receivers are pruned on send failure.
        self.subscribers
            .lock()
            .retain(|tx| tx.send(change.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
