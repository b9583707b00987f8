//! Library browser state: permission plus the newest-first item list.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError};

use crate::error::AppError;
use crate::library::{AuthorizationStatus, LibraryChange, MediaItem, MediaLibrary};

pub struct LibraryBrowser {
    library: Arc<dyn MediaLibrary>,
    status: AuthorizationStatus,
    items: Vec<MediaItem>,
    changes: Receiver<LibraryChange>,
}

impl LibraryBrowser {
    /// Subscribes before the first fetch so no change can slip in between.
    pub fn new(library: Arc<dyn MediaLibrary>) -> Self {
        let changes = library.subscribe();
        let status = library.authorization_status();
        Self {
            library,
            status,
            items: Vec::new(),
            changes,
        }
    }

    pub fn status(&self) -> AuthorizationStatus {
        self.status
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    /// True once access is granted and the library holds no videos.
    pub fn is_empty(&self) -> bool {
        self.status.grants_access() && self.items.is_empty()
    }

    /// Ask for access if undecided, then load the list.
    pub fn request_access(&mut self) -> Result<AuthorizationStatus, AppError> {
        if self.status == AuthorizationStatus::NotDetermined {
            self.status = self.library.request_authorization();
            log::info!(
                target: "video_minifier::browser",
                "Library authorization: {:?}",
                self.status
            );
        }
        if self.status.grants_access() {
            self.reload()?;
        }
        Ok(self.status)
    }

    pub fn reload(&mut self) -> Result<&[MediaItem], AppError> {
        self.status = self.library.authorization_status();
        if !self.status.grants_access() {
            self.items.clear();
            return Err(AppError::PermissionDenied);
        }
        self.items = self.library.fetch_videos()?;
        log::debug!(
            target: "video_minifier::browser",
            "Loaded {} videos",
            self.items.len()
        );
        Ok(&self.items)
    }

    /// Drain pending change notifications; re-fetch once if any arrived.
    pub fn sync(&mut self) -> Result<bool, AppError> {
        let mut changed = false;
        loop {
            match self.changes.try_recv() {
                Ok(_) => changed = true,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.changes = self.library.subscribe();
                    break;
                }
            }
        }
        if changed {
            self.reload()?;
        }
        Ok(changed)
    }
}

/// Duration badge text: `m:ss`, `0:00` when unknown.
pub fn format_duration(seconds: Option<f64>) -> String {
    let total = match seconds {
        Some(s) if s.is_finite() && s > 0.0 => s as u64,
        _ => 0,
    };
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{DirectoryLibrary, LibraryChangeRequest};
    use std::fs;

    #[test]
    fn durations_are_minutes_and_padded_seconds() {
        assert_eq!(format_duration(Some(5.0)), "0:05");
        assert_eq!(format_duration(Some(65.9)), "1:05");
        assert_eq!(format_duration(Some(600.0)), "10:00");
        assert_eq!(format_duration(None), "0:00");
        assert_eq!(format_duration(Some(f64::NAN)), "0:00");
    }

    #[test]
    fn access_request_creates_library_and_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("Videos");
        let library = Arc::new(DirectoryLibrary::new(&root).without_duration_probe());
        let mut browser = LibraryBrowser::new(library);
        assert_eq!(browser.status(), AuthorizationStatus::NotDetermined);
        assert!(!browser.is_empty());

        let status = browser.request_access().unwrap();

        assert_eq!(status, AuthorizationStatus::Authorized);
        assert!(browser.is_empty());
    }

    #[test]
    fn sync_picks_up_committed_items() {
        let dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let library = Arc::new(DirectoryLibrary::new(dir.path()).without_duration_probe());
        let mut browser = LibraryBrowser::new(library.clone());
        browser.request_access().unwrap();
        assert!(!browser.sync().unwrap());

        let file = staging.path().join("new.mp4");
        fs::write(&file, b"data").unwrap();
        library
            .perform_changes(LibraryChangeRequest::create(&file))
            .unwrap();

        assert!(browser.sync().unwrap());
        assert_eq!(browser.items().len(), 1);
        assert!(!browser.is_empty());
    }

    #[test]
    fn reload_without_permission_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(DirectoryLibrary::new(dir.path().join("missing")));
        let mut browser = LibraryBrowser::new(library);
        assert!(matches!(browser.reload(), Err(AppError::PermissionDenied)));
        assert!(browser.items().is_empty());
    }
}
