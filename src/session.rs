//! Per-item screen state: preview, tier choice, the running job and the
//! pending disposition.

use std::path::PathBuf;

use crate::disposition::{DispositionOutcome, PendingResult, apply_disposition};
use crate::error::AppError;
use crate::ffmpeg::ScratchSpace;
use crate::job::{CompressionJob, JobState};
use crate::library::{MediaItem, MediaLibrary, PlayableAsset};
use crate::quality::QualityTier;
use crate::runner::{CompressionRunner, JobEvent};
use crate::summary::Disposition;

pub const LOAD_FAILED_ALERT: &str = "Could not load video.";

#[derive(Debug, Clone, PartialEq)]
pub enum PreviewState {
    Loading,
    Ready(PlayableAsset),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Playback {
    Playing,
    Paused,
}

#[derive(Debug)]
pub struct CompressorSession {
    item: MediaItem,
    preview: PreviewState,
    tier: QualityTier,
    playback: Playback,
    job: Option<JobState>,
    output: Option<PathBuf>,
    remaining: Option<String>,
    alert: Option<String>,
    pending: Option<PendingResult>,
}

impl CompressorSession {
    pub fn new(item: MediaItem) -> Self {
        Self {
            item,
            preview: PreviewState::Loading,
            tier: QualityTier::default(),
            playback: Playback::Paused,
            job: None,
            output: None,
            remaining: None,
            alert: None,
            pending: None,
        }
    }

    pub fn item(&self) -> &MediaItem {
        &self.item
    }

    pub fn preview(&self) -> &PreviewState {
        &self.preview
    }

    pub fn tier(&self) -> QualityTier {
        self.tier
    }

    pub fn playback(&self) -> Playback {
        self.playback
    }

    pub fn job(&self) -> Option<&JobState> {
        self.job.as_ref()
    }

    pub fn remaining(&self) -> Option<&str> {
        self.remaining.as_deref()
    }

    pub fn pending_result(&self) -> Option<&PendingResult> {
        self.pending.as_ref()
    }

    /// Show-once alert; reading it clears it.
    pub fn take_alert(&mut self) -> Option<String> {
        self.alert.take()
    }

    pub fn is_compressing(&self) -> bool {
        self.job.as_ref().is_some_and(JobState::is_active)
    }

    /// Resolve the item to a playable asset. Playback starts once it is ready.
    pub fn load_preview(&mut self, library: &dyn MediaLibrary) -> Result<PlayableAsset, AppError> {
        self.preview = PreviewState::Loading;
        let asset = match library.request_asset(&self.item) {
            Ok(asset) => asset,
            Err(e) => {
                log::warn!(
                    target: "video_minifier::session",
                    "Preview for {} failed: {}",
                    self.item.id,
                    e
                );
                self.preview = PreviewState::Failed;
                self.alert = Some(LOAD_FAILED_ALERT.to_string());
                return Err(AppError::load_failed(LOAD_FAILED_ALERT));
            }
        };
        self.playback = Playback::Playing;
        self.preview = PreviewState::Ready(asset.clone());
        Ok(asset)
    }

    pub fn select_tier(&mut self, tier: QualityTier) -> Result<(), AppError> {
        if self.is_compressing() {
            return Err(AppError::invalid_request(
                "Quality cannot change while compressing",
            ));
        }
        self.tier = tier;
        Ok(())
    }

    pub fn can_start_compression(&self) -> bool {
        matches!(self.preview, PreviewState::Ready(_)) && !self.is_compressing()
    }

    pub fn back_navigation_allowed(&self) -> bool {
        !self.is_compressing()
    }

    /// Prepare a job for the selected tier and enter the running state.
    /// An undecided earlier result is discarded first.
    pub fn begin_compression(&mut self, runner: &CompressionRunner) -> Result<CompressionJob, AppError> {
        if self.is_compressing() {
            return Err(AppError::invalid_request("A compression is already running"));
        }
        let PreviewState::Ready(asset) = &self.preview else {
            return Err(AppError::invalid_request("The video has not loaded"));
        };
        let job = runner.prepare(&self.item, asset, self.tier)?;
        if let Some(previous) = self.pending.take() {
            if previous.output != job.destination {
                runner.scratch().discard(&previous.output);
            }
        }
        self.playback = Playback::Paused;
        self.job = Some(JobState::Pending);
        self.output = Some(job.destination.clone());
        self.remaining = None;
        self.alert = None;
        Ok(job)
    }

    /// Mirror a runner event into the screen state.
    pub fn apply_event(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Progress {
                progress,
                remaining,
                ..
            } => {
                self.job = Some(JobState::Running {
                    progress: *progress,
                });
                self.remaining = remaining.clone();
            }
            JobEvent::Finished { state } => {
                self.remaining = None;
                match state {
                    JobState::Completed { summary } => {
                        if let Some(output) = self.output.take() {
                            self.pending = Some(PendingResult {
                                source: self.item.clone(),
                                output,
                                summary: summary.clone(),
                            });
                        }
                    }
                    JobState::Failed { failure } => {
                        self.output = None;
                        self.alert = Some(failure.message.clone());
                    }
                    JobState::Pending | JobState::Running { .. } => {}
                }
                self.job = Some(state.clone());
            }
        }
    }

    /// Apply the user's decision for the completed job.
    pub fn dispose(
        &mut self,
        action: Disposition,
        library: &dyn MediaLibrary,
        scratch: &ScratchSpace,
    ) -> Result<DispositionOutcome, AppError> {
        let Some(pending) = self.pending.as_ref() else {
            return Err(AppError::invalid_request("There is no result to save"));
        };
        match apply_disposition(library, scratch, pending, action) {
            Ok(outcome) => {
                self.pending = None;
                self.job = None;
                Ok(outcome)
            }
            Err(e) => {
                self.alert = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Leave the screen. Refused while compressing; an undecided result is discarded.
    pub fn close(&mut self, scratch: &ScratchSpace) -> Result<(), AppError> {
        if self.is_compressing() {
            return Err(AppError::invalid_request(
                "Cannot close while compression is running",
            ));
        }
        if let Some(pending) = self.pending.take() {
            scratch.discard(&pending.output);
        }
        self.playback = Playback::Paused;
        Ok(())
    }
}
