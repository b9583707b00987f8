//! Runtime configuration, resolved from the environment once at startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const LIBRARY_ENV: &str = "VIDEO_MINIFIER_LIBRARY";
pub const SCRATCH_ENV: &str = "VIDEO_MINIFIER_SCRATCH";

/// Scratch outputs older than this are removed on startup.
pub const STALE_SCRATCH_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub library_dir: PathBuf,
    pub scratch_dir: PathBuf,
}

fn non_empty_var(name: &str) -> Option<PathBuf> {
    env::var_os(name)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn home_dir() -> PathBuf {
    non_empty_var("HOME")
        .or_else(|| non_empty_var("USERPROFILE"))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            library_dir: non_empty_var(LIBRARY_ENV)
                .unwrap_or_else(|| home_dir().join("Videos")),
            scratch_dir: non_empty_var(SCRATCH_ENV)
                .unwrap_or_else(|| env::temp_dir().join("video-minifier")),
        };
        log::debug!(
            target: "video_minifier::config",
            "library={} scratch={}",
            config.library_dir.display(),
            config.scratch_dir.display()
        );
        config
    }
}
