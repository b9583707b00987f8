//! `MediaLibrary` backed by one flat directory of video files.
//!
//! Items are keyed by file name. Sidecar files sharing a video's stem (edit
//! data, thumbnails, subtitles) are resources of that item: they count towards
//! its size and are deleted with it. When several videos share a stem, the
//! sidecars belong to the first of them by file name and to no other.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::SystemTime;

use parking_lot::Mutex;

use super::{
    AuthorizationStatus, ChangeBroadcaster, LibraryChange, LibraryChangeRequest, LibraryCommit,
    MediaItem, MediaItemId, MediaLibrary, PlayableAsset,
};
use crate::error::AppError;
use crate::ffmpeg::ffprobe::get_video_metadata;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "mkv", "webm", "avi"];
const SIDECAR_EXTENSIONS: &[&str] = &["aae", "xmp", "thm", "srt"];
const PENDING_DELETE_PREFIX: &str = ".pending-delete-";
const LOAD_FAILED_MESSAGE: &str = "Could not load video.";

pub struct DirectoryLibrary {
    root: PathBuf,
    probe_durations: bool,
    changes: ChangeBroadcaster,
    /// Item ids seen by the last `refresh`, to detect edits made outside the app.
    snapshot: Mutex<Option<BTreeSet<MediaItemId>>>,
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn stem_key(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn is_video_file(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.as_str()))
}

fn is_sidecar_file(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| SIDECAR_EXTENSIONS.contains(&e.as_str()))
}

fn created_at(meta: &fs::Metadata) -> SystemTime {
    meta.created()
        .or_else(|_| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn is_cross_device_rename_error(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(18) // EXDEV
    }
    #[cfg(windows)]
    {
        e.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = e;
        false
    }
}

/// Rename, falling back to copy+remove when source and library sit on different devices.
fn move_file(source: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_rename_error(&e) => {
            if let Err(copy_err) = fs::copy(source, dest) {
                let _ = fs::remove_file(dest);
                return Err(copy_err);
            }
            if let Err(remove_err) = fs::remove_file(source) {
                log::warn!(
                    target: "video_minifier::library",
                    "Copied {} but could not remove it: {}",
                    source.display(),
                    remove_err
                );
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// A resource renamed out of the listing, waiting for the transaction to finish.
struct StagedDeletion {
    original: PathBuf,
    staged: PathBuf,
}

fn restore_staged(staged: &[StagedDeletion]) {
    for entry in staged.iter().rev() {
        if let Err(e) = fs::rename(&entry.staged, &entry.original) {
            log::error!(
                target: "video_minifier::library",
                "Failed to restore {} during rollback: {}",
                entry.original.display(),
                e
            );
        }
    }
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            probe_durations: true,
            changes: ChangeBroadcaster::default(),
            snapshot: Mutex::new(None),
        }
    }

    /// Skip ffprobe when listing; items then carry no duration.
    pub fn without_duration_probe(mut self) -> Self {
        self.probe_durations = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn require_access(&self) -> Result<(), AppError> {
        if self.authorization_status().grants_access() {
            Ok(())
        } else {
            Err(AppError::PermissionDenied)
        }
    }

    fn scan(&self) -> Result<Vec<MediaItem>, AppError> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            AppError::library(format!("Failed to read {}: {}", self.root.display(), e))
        })?;

        let mut videos: Vec<(PathBuf, fs::Metadata)> = Vec::new();
        let mut sidecars: BTreeMap<String, Vec<(PathBuf, u64)>> = BTreeMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let hidden = entry
                .file_name()
                .to_str()
                .is_none_or(|name| name.starts_with('.'));
            if hidden {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            if is_video_file(&path) {
                videos.push((path, meta));
            } else if is_sidecar_file(&path)
                && let Some(key) = stem_key(&path)
            {
                sidecars.entry(key).or_default().push((path, meta.len()));
            }
        }

        videos.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
        let mut items: Vec<MediaItem> = videos
            .into_iter()
            .filter_map(|(path, meta)| {
                let name = path.file_name()?.to_str()?.to_string();
                let mut resources = vec![path.clone()];
                let mut byte_size = meta.len();
                // Taken, not borrowed: a sidecar never belongs to two items.
                if let Some(extra) = stem_key(&path).and_then(|key| sidecars.remove(&key)) {
                    for (sidecar, len) in extra {
                        resources.push(sidecar);
                        byte_size += len;
                    }
                }
                let duration_secs = if self.probe_durations {
                    get_video_metadata(&path)
                        .ok()
                        .map(|m| m.duration)
                        .filter(|d| *d > 0.0)
                } else {
                    None
                };
                Some(MediaItem {
                    id: MediaItemId::new(name),
                    primary: path,
                    resources,
                    created_at: created_at(&meta),
                    duration_secs,
                    byte_size,
                })
            })
            .collect();

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    /// `preferred`, or `stem (n).ext` for the first n that is free.
    fn unique_destination(&self, preferred: &str) -> PathBuf {
        let candidate = self.root.join(preferred);
        if !candidate.exists() {
            return candidate;
        }
        let path = Path::new(preferred);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("video");
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
        (1..)
            .map(|n| self.root.join(format!("{} ({}).{}", stem, n, ext)))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }

    fn stage_deletions(&self, items: &[MediaItem]) -> Result<Vec<StagedDeletion>, AppError> {
        let mut staged = Vec::new();
        for resource in items.iter().flat_map(|item| item.resources.iter()) {
            let name = resource
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let target = self.root.join(format!("{}{}", PENDING_DELETE_PREFIX, name));
            if let Err(e) = fs::rename(resource, &target) {
                restore_staged(&staged);
                return Err(AppError::library(format!(
                    "Failed to remove {}: {}",
                    resource.display(),
                    e
                )));
            }
            staged.push(StagedDeletion {
                original: resource.clone(),
                staged: target,
            });
        }
        Ok(staged)
    }

    fn record_change(&self, change: &LibraryChange) {
        if let Some(snapshot) = self.snapshot.lock().as_mut() {
            for id in &change.removed {
                snapshot.remove(id);
            }
            snapshot.extend(change.inserted.iter().cloned());
        }
    }
}

impl MediaLibrary for DirectoryLibrary {
    fn authorization_status(&self) -> AuthorizationStatus {
        let meta = match fs::metadata(&self.root) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return AuthorizationStatus::NotDetermined;
            }
            Err(_) => return AuthorizationStatus::Denied,
        };
        if !meta.is_dir() || fs::read_dir(&self.root).is_err() {
            return AuthorizationStatus::Denied;
        }
        if meta.permissions().readonly() {
            AuthorizationStatus::Limited
        } else {
            AuthorizationStatus::Authorized
        }
    }

    fn request_authorization(&self) -> AuthorizationStatus {
        let status = self.authorization_status();
        if status != AuthorizationStatus::NotDetermined {
            return status;
        }
        match fs::create_dir_all(&self.root) {
            Ok(()) => {
                log::info!(
                    target: "video_minifier::library",
                    "Created library directory {}",
                    self.root.display()
                );
                self.authorization_status()
            }
            Err(e) => {
                log::warn!(
                    target: "video_minifier::library",
                    "Could not create library directory {}: {}",
                    self.root.display(),
                    e
                );
                AuthorizationStatus::Denied
            }
        }
    }

    fn fetch_videos(&self) -> Result<Vec<MediaItem>, AppError> {
        self.require_access()?;
        self.scan()
    }

    fn request_asset(&self, item: &MediaItem) -> Result<PlayableAsset, AppError> {
        if !item.primary.is_file() {
            log::warn!(
                target: "video_minifier::library",
                "Asset for {} is gone: {}",
                item.id,
                item.primary.display()
            );
            return Err(AppError::load_failed(LOAD_FAILED_MESSAGE));
        }
        let metadata = get_video_metadata(&item.primary).map_err(|e| {
            log::warn!(
                target: "video_minifier::library",
                "Probe failed for {}: {}",
                item.id,
                e
            );
            AppError::load_failed(LOAD_FAILED_MESSAGE)
        })?;
        if !metadata.is_playable() {
            log::warn!(
                target: "video_minifier::library",
                "{} has no playable video stream",
                item.id
            );
            return Err(AppError::load_failed(LOAD_FAILED_MESSAGE));
        }
        Ok(PlayableAsset {
            item_id: item.id.clone(),
            path: item.primary.clone(),
            metadata,
        })
    }

    fn perform_changes(&self, request: LibraryChangeRequest) -> Result<LibraryCommit, AppError> {
        match self.authorization_status() {
            AuthorizationStatus::Authorized => {}
            AuthorizationStatus::Limited => {
                return Err(AppError::library("The library is read-only"));
            }
            _ => return Err(AppError::PermissionDenied),
        }

        let existing = self.scan()?;
        let mut doomed = Vec::with_capacity(request.delete.len());
        for id in &request.delete {
            let item = existing
                .iter()
                .find(|item| &item.id == id)
                .ok_or_else(|| AppError::library(format!("Item not found: {}", id)))?;
            doomed.push(item.clone());
        }

        if let Some(source) = request.create_from.as_ref()
            && !source.is_file()
        {
            return Err(AppError::library(format!(
                "File to add does not exist: {}",
                source.display()
            )));
        }

        // Originals go first so a replacement may take over the original name.
        let staged = self.stage_deletions(&doomed)?;

        let mut created_path = None;
        if let Some(source) = request.create_from.as_ref() {
            let preferred = request
                .preferred_name
                .clone()
                .or_else(|| source.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .unwrap_or_else(|| "video.mp4".to_string());
            let dest = self.unique_destination(&preferred);
            if let Err(e) = move_file(source, &dest) {
                restore_staged(&staged);
                return Err(AppError::library(format!(
                    "Failed to add {} to the library: {}",
                    dest.display(),
                    e
                )));
            }
            created_path = Some(dest);
        }

        for entry in &staged {
            if let Err(e) = fs::remove_file(&entry.staged) {
                log::warn!(
                    target: "video_minifier::library",
                    "Failed to purge {}: {}",
                    entry.staged.display(),
                    e
                );
            }
        }

        let created = match created_path {
            Some(path) => self.scan()?.into_iter().find(|item| item.primary == path),
            None => None,
        };
        let deleted: Vec<MediaItemId> = doomed.into_iter().map(|item| item.id).collect();
        let change = LibraryChange {
            inserted: created.iter().map(|item| item.id.clone()).collect(),
            removed: deleted.clone(),
        };
        log::info!(
            target: "video_minifier::library",
            "Committed library change: inserted={:?}, removed={:?}",
            change.inserted,
            change.removed
        );
        self.record_change(&change);
        self.changes.notify(change);

        Ok(LibraryCommit { created, deleted })
    }

    fn subscribe(&self) -> Receiver<LibraryChange> {
        self.changes.subscribe()
    }

    /// Rescan and broadcast anything added or removed since the previous refresh.
    /// The first call only records a baseline.
    fn refresh(&self) -> Result<LibraryChange, AppError> {
        let current: BTreeSet<MediaItemId> =
            self.scan()?.into_iter().map(|item| item.id).collect();
        let mut guard = self.snapshot.lock();
        let change = match guard.as_ref() {
            Some(previous) => LibraryChange {
                inserted: current.difference(previous).cloned().collect(),
                removed: previous.difference(&current).cloned().collect(),
            },
            None => LibraryChange::default(),
        };
        *guard = Some(current);
        drop(guard);
        self.changes.notify(change.clone());
        Ok(change)
    }
}
