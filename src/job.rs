//! Compression job lifecycle as a tagged state, plus the progress and
//! remaining-time bookkeeping sampled while it runs.

use std::path::PathBuf;
use std::time::Duration;

use crate::library::MediaItemId;
use crate::quality::QualityTier;
use crate::summary::ResultSummary;

/// Running samples never reach 1.0; only completion does.
pub const RUNNING_PROGRESS_CEILING: f64 = 0.99;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    /// Underlying error text, shown to the user as-is.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum JobState {
    Pending,
    Running { progress: f64 },
    Completed { summary: ResultSummary },
    Failed { failure: JobFailure },
}

impl JobState {
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Running { .. })
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn progress(&self) -> f64 {
        match self {
            JobState::Pending | JobState::Failed { .. } => 0.0,
            JobState::Running { progress } => *progress,
            JobState::Completed { .. } => 1.0,
        }
    }
}

/// What a job was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionJob {
    pub source: MediaItemId,
    pub source_path: PathBuf,
    pub source_bytes: u64,
    pub source_dims: Option<(u32, u32)>,
    pub duration_secs: Option<f64>,
    pub tier: QualityTier,
    pub destination: PathBuf,
}

/// Keeps reported progress monotonic and below 1.0 until completion.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    current: f64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a raw sample and return the value to report.
    pub fn observe(&mut self, raw: f64) -> f64 {
        if raw.is_finite() {
            let capped = raw.clamp(0.0, RUNNING_PROGRESS_CEILING);
            if capped > self.current {
                self.current = capped;
            }
        }
        self.current
    }

    pub fn complete(&mut self) -> f64 {
        self.current = 1.0;
        self.current
    }

    pub fn current(&self) -> f64 {
        self.current
    }
}

/// Straight projection `elapsed / progress - elapsed`. No smoothing, so uneven
/// encoding speed makes it jump.
pub fn estimate_remaining(elapsed: Duration, progress: f64) -> Option<Duration> {
    if !progress.is_finite() || progress <= 0.0 {
        return None;
    }
    let elapsed_secs = elapsed.as_secs_f64();
    let remaining = elapsed_secs / progress.min(1.0) - elapsed_secs;
    Duration::try_from_secs_f64(remaining.max(0.0)).ok()
}

/// `"42s"` under a minute, `"m:ss"` otherwise.
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.as_secs_f64().round() as u64;
    if total < 60 {
        format!("{}s", total)
    } else {
        format!("{}:{:02}", total / 60, total % 60)
    }
}
