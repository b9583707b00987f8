use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::{Duration, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::browser::{LibraryBrowser, format_duration};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::ffmpeg::ffprobe::VideoMetadata;
use crate::ffmpeg::{ScratchSpace, terminate_all_ffmpeg};
use crate::job::{CompressionJob, JobFailure, JobState};
use crate::library::{
    AuthorizationStatus, DirectoryLibrary, LibraryChange, MediaItem, MediaItemId, MediaLibrary,
};
use crate::quality::{QualityTier, QualityTierInfo, tier_catalog};
use crate::runner::{CompressionRunner, JobEvent, block_on};
use crate::session::{CompressorSession, Playback, PreviewState};
use crate::summary::{Disposition, ResultSummary, format_bytes};
use crate::transcode::{FfmpegTranscoder, Transcoder};

const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub tiers: Vec<QualityTierInfo>,
    pub default_tier: QualityTier,
    pub ffmpeg_available: bool,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationResult {
    pub status: AuthorizationStatus,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItemResult {
    pub id: MediaItemId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// `m:ss` badge text.
    pub duration: String,
    pub byte_size: u64,
    pub size: String,
    pub created_at_ms: u64,
}

impl From<&MediaItem> for MediaItemResult {
    fn from(item: &MediaItem) -> Self {
        Self {
            id: item.id.clone(),
            duration_secs: item.duration_secs,
            duration: format_duration(item.duration_secs),
            byte_size: item.byte_size,
            size: format_bytes(item.byte_size),
            created_at_ms: item
                .created_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryListResult {
    pub items: Vec<MediaItemResult>,
    /// Access granted and nothing to show.
    pub empty: bool,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaOpenResult {
    pub item: MediaItemResult,
    pub metadata: VideoMetadata,
    pub quality: QualityTier,
    pub playing: bool,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressResult {
    pub summary: ResultSummary,
    pub actions: Vec<Disposition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
    pub original_size: String,
    pub output_size: String,
}

/// How a `media.compress` call ended. Failures are job outcomes, not request errors.
#[derive(Debug)]
pub enum CompressOutcome {
    Completed(CompressResult),
    Failed(JobFailure),
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisposeResult {
    pub action: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_item_id: Option<MediaItemId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_item_id: Option<MediaItemId>,
}

pub fn app_capabilities() -> AppCapabilitiesResult {
    AppCapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        tiers: tier_catalog(),
        default_tier: QualityTier::default(),
        ffmpeg_available: crate::ffmpeg::discovery::is_ffmpeg_available(),
    }
}

pub fn ffmpeg_terminate() {
    terminate_all_ffmpeg();
}

/// State behind the sidecar's RPC methods: the library, the browser list, and
/// at most one open compressor session.
pub struct SidecarApp {
    library: Arc<dyn MediaLibrary>,
    browser: Mutex<LibraryBrowser>,
    runner: CompressionRunner,
    session: Mutex<Option<CompressorSession>>,
}

impl SidecarApp {
    pub fn from_config(config: &AppConfig) -> Self {
        let library: Arc<dyn MediaLibrary> = Arc::new(DirectoryLibrary::new(&config.library_dir));
        let scratch = Arc::new(ScratchSpace::new(&config.scratch_dir));
        Self::with_parts(library, Arc::new(FfmpegTranscoder), scratch)
    }

    pub fn with_parts(
        library: Arc<dyn MediaLibrary>,
        transcoder: Arc<dyn Transcoder>,
        scratch: Arc<ScratchSpace>,
    ) -> Self {
        let browser = LibraryBrowser::new(Arc::clone(&library));
        Self {
            library,
            browser: Mutex::new(browser),
            runner: CompressionRunner::new(transcoder, scratch),
            session: Mutex::new(None),
        }
    }

    /// Override the progress sample interval; tests use a short one.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.runner = self.runner.with_sample_interval(interval);
        self
    }

    pub fn scratch(&self) -> &ScratchSpace {
        self.runner.scratch()
    }

    pub fn subscribe_library_changes(&self) -> Receiver<LibraryChange> {
        self.library.subscribe()
    }

    pub fn library_authorization(&self) -> AuthorizationResult {
        AuthorizationResult {
            status: self.browser.lock().status(),
        }
    }

    pub fn library_request_authorization(&self) -> Result<AuthorizationResult, AppError> {
        let status = self.browser.lock().request_access()?;
        Ok(AuthorizationResult { status })
    }

    pub fn library_list(&self) -> Result<LibraryListResult, AppError> {
        if let Err(e) = self.library.refresh() {
            log::warn!(
                target: "video_minifier::sidecar",
                "Library refresh failed: {}",
                e
            );
        }
        let mut browser = self.browser.lock();
        if !browser.sync()? {
            browser.reload()?;
        }
        Ok(LibraryListResult {
            items: browser.items().iter().map(MediaItemResult::from).collect(),
            empty: browser.is_empty(),
        })
    }

    /// Open `item_id` for preview. Any previously open item is closed first.
    pub fn media_open(&self, item_id: &MediaItemId) -> Result<MediaOpenResult, AppError> {
        let mut slot = self.session.lock();
        if let Some(current) = slot.as_mut() {
            current.close(self.scratch())?;
        }
        *slot = None;

        if !self.library.authorization_status().grants_access() {
            return Err(AppError::PermissionDenied);
        }
        let item = self
            .library
            .item(item_id)?
            .ok_or_else(|| AppError::invalid_request(format!("Item not found: {}", item_id)))?;
        let mut session = CompressorSession::new(item);
        let loaded = session.load_preview(self.library.as_ref());
        let result = loaded.map(|asset| MediaOpenResult {
            item: MediaItemResult::from(session.item()),
            metadata: asset.metadata,
            quality: session.tier(),
            playing: session.playback() == Playback::Playing,
        });
        // A failed preview still leaves the screen open showing the alert.
        *slot = Some(session);
        result
    }

    pub fn media_select_quality(&self, tier: QualityTier) -> Result<QualityTier, AppError> {
        let mut slot = self.session.lock();
        let session = slot.as_mut().ok_or_else(no_open_item)?;
        session.select_tier(tier)?;
        Ok(session.tier())
    }

    /// Run a compression for the open item to a terminal state. Blocks the
    /// calling thread; `on_event` sees every progress sample and the final state.
    pub fn media_compress(
        &self,
        tier: Option<QualityTier>,
        on_event: impl FnMut(&JobEvent),
    ) -> Result<CompressOutcome, AppError> {
        let job = self.media_begin_compress(tier)?;
        self.media_run_compress(&job, on_event)
    }

    /// Put the open item into the compressing state and describe its job. From
    /// here on the item cannot be closed and its tier cannot change, so a
    /// caller that runs the job elsewhere must do this step first.
    pub fn media_begin_compress(
        &self,
        tier: Option<QualityTier>,
    ) -> Result<CompressionJob, AppError> {
        let mut slot = self.session.lock();
        let session = slot.as_mut().ok_or_else(no_open_item)?;
        if let Some(tier) = tier {
            session.select_tier(tier)?;
        }
        if !session.can_start_compression() {
            return Err(match session.preview() {
                PreviewState::Ready(_) => {
                    AppError::invalid_request("A compression is already running")
                }
                _ => AppError::invalid_request("The video has not loaded"),
            });
        }
        session.begin_compression(&self.runner)
    }

    /// Drive a job from [`media_begin_compress`](Self::media_begin_compress) to its end.
    pub fn media_run_compress(
        &self,
        job: &CompressionJob,
        mut on_event: impl FnMut(&JobEvent),
    ) -> Result<CompressOutcome, AppError> {
        let ran = block_on(self.runner.run(job, |event| {
            if let Some(session) = self.session.lock().as_mut() {
                session.apply_event(event);
            }
            on_event(event);
        }));
        let state = match ran {
            Ok(state) => state,
            Err(e) => {
                self.media_abandon_compress(job, &e);
                return Err(e);
            }
        };

        match state {
            JobState::Completed { summary } => Ok(CompressOutcome::Completed(CompressResult {
                actions: summary.offered_actions(),
                note: summary.note(),
                original_size: format_bytes(summary.original_bytes),
                output_size: format_bytes(summary.output_bytes),
                summary,
            })),
            JobState::Failed { failure } => {
                // The screen shows the failure once; the RPC error carries it.
                if let Some(session) = self.session.lock().as_mut() {
                    session.take_alert();
                }
                Ok(CompressOutcome::Failed(failure))
            }
            JobState::Pending | JobState::Running { .. } => {
                Err(AppError::from("Compression ended without a result"))
            }
        }
    }

    /// End a begun job that never ran: the item leaves the compressing state
    /// and its scratch output is dropped.
    pub fn media_abandon_compress(&self, job: &CompressionJob, error: &AppError) {
        log::error!(
            target: "video_minifier::sidecar",
            "Compression for {} could not run: {}",
            job.source,
            error
        );
        self.scratch().discard(&job.destination);
        if let Some(session) = self.session.lock().as_mut() {
            session.apply_event(&JobEvent::Finished {
                state: JobState::Failed {
                    failure: JobFailure {
                        message: error.to_string(),
                        detail: None,
                        cancelled: error.is_aborted(),
                    },
                },
            });
            session.take_alert();
        }
    }

    pub fn media_dispose(&self, action: Disposition) -> Result<DisposeResult, AppError> {
        let mut slot = self.session.lock();
        let session = slot.as_mut().ok_or_else(no_open_item)?;
        let outcome = session.dispose(action, self.library.as_ref(), self.scratch())?;
        // The open item no longer exists once it has been replaced.
        if outcome.removed_item_id.is_some() {
            *slot = None;
        }
        Ok(DisposeResult {
            action: outcome.action,
            saved_item_id: outcome.saved_item_id,
            removed_item_id: outcome.removed_item_id,
        })
    }

    /// Close the open item. Refused while its compression is running.
    pub fn media_close(&self) -> Result<bool, AppError> {
        let mut slot = self.session.lock();
        let Some(session) = slot.as_mut() else {
            return Ok(false);
        };
        session.close(self.scratch())?;
        *slot = None;
        Ok(true)
    }

    /// True from `media_begin_compress` until the job is terminal.
    pub fn is_compressing(&self) -> bool {
        self.runner.is_busy()
            || self
                .session
                .lock()
                .as_ref()
                .is_some_and(CompressorSession::is_compressing)
    }

    /// Stop a running job, and any begun job that has not reached the runner
    /// yet. It ends as cancelled and nothing is committed. No job runs after this.
    pub fn shutdown(&self) {
        if self.is_compressing() {
            log::info!(
                target: "video_minifier::sidecar",
                "Input closed while compressing; stopping FFmpeg"
            );
        }
        self.runner.cancel_handle().cancel();
        ffmpeg_terminate();
    }

    pub fn cleanup_on_exit(&self) {
        self.session.lock().take();
        self.scratch().cleanup_all();
    }

    pub fn cleanup_startup_temp(&self, max_age: Duration) {
        let removed = self.scratch().cleanup_older_than(max_age);
        if removed > 0 {
            log::info!(
                target: "video_minifier::sidecar",
                "Removed {} stale scratch file(s)",
                removed
            );
        }
    }
}

fn no_open_item() -> AppError {
    AppError::invalid_request("No video is open")
}
