//! Transcode session seam. A session is started for one job, then polled for
//! progress and status until it reaches a terminal state.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use parking_lot::Mutex;

use crate::error::AppError;
use crate::ffmpeg::ffprobe::get_video_metadata;
use crate::ffmpeg::{
    ProgressCallback, build_compress_command, format_args_for_display, path_to_string,
    run_ffmpeg_blocking, terminate_all_ffmpeg,
};
use crate::job::CompressionJob;

#[derive(Debug)]
pub enum SessionStatus {
    Running,
    Completed,
    Failed(AppError),
}

pub trait TranscodeSession: Send {
    /// Latest raw progress fraction reported by the encoder.
    fn progress(&self) -> f64;

    /// Non-blocking status check. The terminal status is handed out once;
    /// callers stop polling after receiving it.
    fn poll_status(&mut self) -> SessionStatus;

    fn cancel(&mut self);
}

pub trait Transcoder: Send + Sync {
    fn start(&self, job: &CompressionJob) -> Result<Box<dyn TranscodeSession>, AppError>;
}

/// Runs the export with an FFmpeg child process on a worker thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegTranscoder;

struct FfmpegSession {
    progress_bits: Arc<AtomicU64>,
    outcome: Arc<Mutex<Option<Result<(), AppError>>>>,
    worker: Option<thread::JoinHandle<()>>,
    delivered: bool,
}

/// The export is only usable if it opens as a video with a duration.
fn validate_output(path: &Path) -> Result<(), AppError> {
    let len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        return Err(AppError::from("Compression produced no output"));
    }
    let meta = get_video_metadata(path)?;
    if !meta.is_playable() {
        return Err(AppError::from("Compressed output is not a playable video"));
    }
    Ok(())
}

impl Transcoder for FfmpegTranscoder {
    fn start(&self, job: &CompressionJob) -> Result<Box<dyn TranscodeSession>, AppError> {
        let args = build_compress_command(
            &path_to_string(&job.source_path),
            &path_to_string(&job.destination),
            job.tier,
            job.source_dims,
        );
        log::debug!(
            target: "video_minifier::transcode",
            "ffmpeg\n{}",
            format_args_for_display(&args)
        );

        let progress_bits = Arc::new(AtomicU64::new(0.0_f64.to_bits()));
        let outcome = Arc::new(Mutex::new(None));

        let bits = Arc::clone(&progress_bits);
        let callback: ProgressCallback = Arc::new(move |p: f64| {
            bits.store(p.to_bits(), Ordering::Relaxed);
        });
        let worker_outcome = Arc::clone(&outcome);
        let duration = job.duration_secs;
        let destination = job.destination.clone();
        let worker = thread::Builder::new()
            .name("ffmpeg-export".into())
            .spawn(move || {
                let result = run_ffmpeg_blocking(args, duration, Some(callback))
                    .and_then(|()| validate_output(&destination));
                *worker_outcome.lock() = Some(result);
            })?;

        Ok(Box::new(FfmpegSession {
            progress_bits,
            outcome,
            worker: Some(worker),
            delivered: false,
        }))
    }
}

impl TranscodeSession for FfmpegSession {
    fn progress(&self) -> f64 {
        f64::from_bits(self.progress_bits.load(Ordering::Relaxed))
    }

    fn poll_status(&mut self) -> SessionStatus {
        if self.delivered {
            return SessionStatus::Failed(AppError::from("Session already finished"));
        }
        let Some(result) = self.outcome.lock().take() else {
            return SessionStatus::Running;
        };
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.delivered = true;
        match result {
            Ok(()) => SessionStatus::Completed,
            Err(e) => SessionStatus::Failed(e),
        }
    }

    fn cancel(&mut self) {
        terminate_all_ffmpeg();
    }
}
