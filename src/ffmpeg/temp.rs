//! Scratch files for compression outputs. Outputs live here until a disposition
//! commits them to the library or discards them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::quality::QualityTier;

const SCRATCH_PREFIX: &str = "minified-";

pub struct ScratchSpace {
    dir: PathBuf,
    outstanding: Mutex<Vec<PathBuf>>,
}

fn sanitize_stem(raw: &str) -> String {
    let stem = Path::new(raw)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(raw);
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned
    }
}

impl ScratchSpace {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            outstanding: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh destination for compressing `source_id` at `tier`. The path is stable
    /// per (source, tier); a leftover file from an earlier attempt is removed first.
    pub fn destination_for(&self, source_id: &str, tier: QualityTier) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!(
            "{}{}-{}.mp4",
            SCRATCH_PREFIX,
            sanitize_stem(source_id),
            tier.slug()
        ));
        match fs::remove_file(&path) {
            Ok(()) => log::debug!(
                target: "video_minifier::ffmpeg::temp",
                "Removed stale scratch output {}",
                path.display()
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let mut guard = self.outstanding.lock();
        if !guard.contains(&path) {
            guard.push(path.clone());
        }
        Ok(path)
    }

    /// Stop tracking a path whose file now belongs to the library.
    pub fn release(&self, path: &Path) {
        self.outstanding.lock().retain(|p| p != path);
    }

    /// Delete a scratch output and stop tracking it.
    pub fn discard(&self, path: &Path) {
        self.release(path);
        if let Err(e) = fs::remove_file(path)
            && e.kind() != io::ErrorKind::NotFound
        {
            log::warn!(
                target: "video_minifier::ffmpeg::temp",
                "Failed to remove scratch output {}: {}",
                path.display(),
                e
            );
        }
    }

    /// Remove every tracked output. Called on exit.
    pub fn cleanup_all(&self) {
        let paths: Vec<PathBuf> = self.outstanding.lock().drain(..).collect();
        for path in paths {
            let _ = fs::remove_file(path);
        }
    }

    /// Remove scratch outputs left by earlier runs that are older than `max_age`.
    pub fn cleanup_older_than(&self, max_age: Duration) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let is_ours = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(SCRATCH_PREFIX));
            if !is_ours {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| now.duration_since(t).ok())
                .unwrap_or_default();
            if age > max_age && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!(
                target: "video_minifier::ffmpeg::temp",
                "Removed {} stale scratch file(s) from {}",
                removed,
                self.dir.display()
            );
        }
        removed
    }
}
