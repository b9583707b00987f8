//! Drives one compression job from trigger to terminal state.
//!
//! The transcode itself runs on the session's worker; this task only samples
//! it on a fixed interval and is the sole writer of the job state.

use std::fs;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use crate::error::AppError;
use crate::ffmpeg::{ScratchSpace, error_headline, parse_ffmpeg_error};
use crate::job::{
    CompressionJob, JobFailure, JobState, ProgressTracker, estimate_remaining, format_remaining,
};
use crate::library::{MediaItem, PlayableAsset};
use crate::quality::QualityTier;
use crate::summary::{ResultSummary, format_bytes};
use crate::transcode::{SessionStatus, TranscodeSession, Transcoder};

pub const PROGRESS_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Emitted while a job runs, in order: any number of `Progress`, then one `Finished`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum JobEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        progress: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_secs: Option<f64>,
    },
    Finished {
        state: JobState,
    },
}

/// Stops the running job and every job after it; used when the process is
/// going away. A stopped job ends as a cancelled failure.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct CompressionRunner {
    transcoder: Arc<dyn Transcoder>,
    scratch: Arc<ScratchSpace>,
    sample_interval: Duration,
    cancel: CancelHandle,
    busy: AtomicBool,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Run a future to completion on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output, AppError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::from(format!("Failed to initialize async runtime: {}", e)))?;
    Ok(runtime.block_on(future))
}

fn failure_from_error(error: &AppError) -> JobFailure {
    match error {
        AppError::Aborted => JobFailure {
            message: "Compression was cancelled.".to_string(),
            detail: None,
            cancelled: true,
        },
        AppError::FfmpegFailed { code, stderr } if *code != -1 => {
            let payload = parse_ffmpeg_error(stderr, Some(*code));
            JobFailure {
                message: error_headline(stderr, *code).unwrap_or(payload.summary),
                detail: Some(payload.detail).filter(|d| !d.is_empty()),
                cancelled: false,
            }
        }
        AppError::FfmpegFailed { stderr, .. } => JobFailure {
            message: stderr.clone(),
            detail: None,
            cancelled: false,
        },
        other => JobFailure {
            message: other.to_string(),
            detail: None,
            cancelled: false,
        },
    }
}

impl CompressionRunner {
    pub fn new(transcoder: Arc<dyn Transcoder>, scratch: Arc<ScratchSpace>) -> Self {
        Self {
            transcoder,
            scratch,
            sample_interval: PROGRESS_SAMPLE_INTERVAL,
            cancel: CancelHandle::default(),
            busy: AtomicBool::new(false),
        }
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn scratch(&self) -> &Arc<ScratchSpace> {
        &self.scratch
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Describe a job for `item` at `tier` with a fresh scratch destination.
    pub fn prepare(
        &self,
        item: &MediaItem,
        asset: &PlayableAsset,
        tier: QualityTier,
    ) -> Result<CompressionJob, AppError> {
        let destination = self.scratch.destination_for(item.id.as_str(), tier)?;
        let meta = &asset.metadata;
        Ok(CompressionJob {
            source: item.id.clone(),
            source_path: asset.path.clone(),
            source_bytes: item.byte_size,
            source_dims: (meta.width > 0 && meta.height > 0).then_some((meta.width, meta.height)),
            duration_secs: Some(meta.duration).filter(|d| *d > 0.0),
            tier,
            destination,
        })
    }

    /// Run `job` until it is terminal. `on_event` sees every progress sample and
    /// the final state. Only one job runs at a time; a second call fails at once.
    pub async fn run(&self, job: &CompressionJob, mut on_event: impl FnMut(&JobEvent)) -> JobState {
        if self.busy.swap(true, Ordering::SeqCst) {
            let state = JobState::Failed {
                failure: JobFailure {
                    message: "Another compression is already running".to_string(),
                    detail: None,
                    cancelled: false,
                },
            };
            on_event(&JobEvent::Finished {
                state: state.clone(),
            });
            return state;
        }
        let _busy = BusyGuard(&self.busy);

        log::info!(
            target: "video_minifier::runner",
            "Compressing {} at {} -> {}",
            job.source,
            job.tier.slug(),
            job.destination.display()
        );

        let started = Instant::now();
        let state = if self.cancel.is_cancelled() {
            self.fail(job, AppError::aborted())
        } else {
            match self.transcoder.start(job) {
                Ok(session) => self.drive(job, session, started, &mut on_event).await,
                Err(e) => self.fail(job, e),
            }
        };

        log::info!(
            target: "video_minifier::runner",
            "Job for {} finished after {:.1}s: {:?}",
            job.source,
            started.elapsed().as_secs_f64(),
            state
        );
        on_event(&JobEvent::Finished {
            state: state.clone(),
        });
        state
    }

    async fn drive(
        &self,
        job: &CompressionJob,
        mut session: Box<dyn TranscodeSession>,
        started: Instant,
        on_event: &mut impl FnMut(&JobEvent),
    ) -> JobState {
        let mut tracker = ProgressTracker::new();
        let mut ticker = tokio::time::interval(self.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cancel_logged = false;

        loop {
            ticker.tick().await;
            // Repeated each tick: the encoder process may register after the first kill.
            if self.cancel.is_cancelled() {
                if !cancel_logged {
                    log::info!(
                        target: "video_minifier::runner",
                        "Cancelling job for {}",
                        job.source
                    );
                    cancel_logged = true;
                }
                session.cancel();
            }
            match session.poll_status() {
                SessionStatus::Running => {
                    let progress = tracker.observe(session.progress());
                    let remaining = estimate_remaining(started.elapsed(), progress);
                    on_event(&JobEvent::Progress {
                        progress,
                        remaining: remaining.map(format_remaining),
                        remaining_secs: remaining.map(|r| r.as_secs_f64()),
                    });
                }
                SessionStatus::Completed => {
                    tracker.complete();
                    return self.complete(job);
                }
                SessionStatus::Failed(e) => return self.fail(job, e),
            }
        }
    }

    fn complete(&self, job: &CompressionJob) -> JobState {
        let output_bytes = match fs::metadata(&job.destination) {
            Ok(meta) if meta.len() > 0 => meta.len(),
            Ok(_) => return self.fail(job, AppError::from("Compression produced no output")),
            Err(e) => return self.fail(job, AppError::from(e)),
        };
        let summary = ResultSummary::new(job.source_bytes, output_bytes);
        log::info!(
            target: "video_minifier::runner",
            "{}: {} -> {} ({:+.1}% saved)",
            job.source,
            format_bytes(summary.original_bytes),
            format_bytes(summary.output_bytes),
            summary.savings_percent
        );
        JobState::Completed { summary }
    }

    fn fail(&self, job: &CompressionJob, error: AppError) -> JobState {
        if error.is_aborted() {
            log::warn!(target: "video_minifier::runner", "Job for {} was cancelled", job.source);
        } else {
            log::error!(target: "video_minifier::runner", "Job for {} failed: {}", job.source, error);
        }
        self.scratch.discard(&job.destination);
        JobState::Failed {
            failure: failure_from_error(&error),
        }
    }
}
