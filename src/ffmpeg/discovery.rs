use crate::error::AppError;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

#[cfg(target_os = "windows")]
const LOOKUP_COMMAND: &str = "where";
#[cfg(not(target_os = "windows"))]
const LOOKUP_COMMAND: &str = "which";

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let output = Command::new(LOOKUP_COMMAND).arg(binary).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(PathBuf::from(first))
    }
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

fn resolve_ffmpeg_path() -> Result<PathBuf, AppError> {
    if let Ok(env_path) = std::env::var("FFMPEG_PATH") {
        let p = PathBuf::from(&env_path);
        if p.exists() {
            log::debug!(
                target: "video_minifier::ffmpeg::discovery",
                "FFmpeg path from FFMPEG_PATH env: {}",
                p.display()
            );
            return Ok(p);
        }
        log::warn!(
            target: "video_minifier::ffmpeg::discovery",
            "FFMPEG_PATH points to a missing file, ignoring: {}",
            env_path
        );
    }

    if let Some(p) = common_paths().into_iter().find(|p| p.exists()) {
        log::debug!(
            target: "video_minifier::ffmpeg::discovery",
            "FFmpeg found at common path: {}",
            p.display()
        );
        return Ok(p);
    }

    if let Some(p) = find_in_path("ffmpeg").filter(|p| p.exists()) {
        log::debug!(
            target: "video_minifier::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    log::error!(
        target: "video_minifier::ffmpeg::discovery",
        "FFmpeg not found in PATH or common locations"
    );
    Err(AppError::FfmpegNotFound(
        "FFmpeg not found. Install FFmpeg or set FFMPEG_PATH:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// Get FFmpeg path. Cached for process lifetime.
/// FFMPEG_PATH takes precedence, then common install locations, then PATH.
pub fn get_ffmpeg_path() -> Result<&'static Path, AppError> {
    if let Some(path) = FFMPEG_PATH_CACHE.get() {
        return Ok(path.as_path());
    }
    let path = resolve_ffmpeg_path()?;
    Ok(FFMPEG_PATH_CACHE.get_or_init(|| path).as_path())
}

pub fn is_ffmpeg_available() -> bool {
    get_ffmpeg_path().is_ok()
}

/// Paths to try for ffprobe next to a given ffmpeg binary (suffixed first, then plain).
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let exe = if cfg!(target_os = "windows") { ".exe" } else { "" };
    let mut candidates = Vec::with_capacity(2);
    // Only `.exe` is an extension here; `ffmpeg-7.1` keeps its `.1`.
    if let Some(suffix) = ffmpeg_path
        .file_name()
        .and_then(|s| s.to_str())
        .map(|name| name.strip_suffix(".exe").unwrap_or(name))
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        .filter(|suffix| !suffix.is_empty())
    {
        candidates.push(parent.join(format!("ffprobe{suffix}{exe}")));
    }
    candidates.push(parent.join(format!("ffprobe{exe}")));
    candidates
}

/// Get ffprobe path. ffprobe ships next to ffmpeg; PATH is the last resort.
pub fn get_ffprobe_path() -> Result<PathBuf, AppError> {
    let ffmpeg = get_ffmpeg_path()?;
    if let Some(found) = ffprobe_candidates(ffmpeg).into_iter().find(|c| c.exists()) {
        return Ok(found);
    }
    find_in_path("ffprobe").ok_or_else(|| {
        AppError::FfmpegNotFound(format!(
            "ffprobe not found next to {} or in PATH",
            ffmpeg.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn ffprobe_candidates_plain_ffmpeg() {
        let candidates = ffprobe_candidates(Path::new("/usr/bin/ffmpeg"));
        assert_eq!(candidates, vec![PathBuf::from("/usr/bin/ffprobe")]);
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn ffprobe_candidates_suffixed_ffmpeg() {
        let candidates = ffprobe_candidates(Path::new("/opt/bin/ffmpeg-7.1"));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/opt/bin/ffprobe-7.1"),
                PathBuf::from("/opt/bin/ffprobe"),
            ]
        );
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn ffprobe_candidates_keep_version_dots_and_drop_exe() {
        let candidates = ffprobe_candidates(Path::new("/opt/bin/ffmpeg-6.0.exe"));
        assert_eq!(candidates[0], PathBuf::from("/opt/bin/ffprobe-6.0"));
        let plain = ffprobe_candidates(Path::new("/opt/bin/ffmpeg.exe"));
        assert_eq!(plain, vec![PathBuf::from("/opt/bin/ffprobe")]);
    }

    #[test]
    fn ffprobe_candidates_without_parent_is_empty() {
        assert!(ffprobe_candidates(Path::new("")).is_empty());
    }
}
