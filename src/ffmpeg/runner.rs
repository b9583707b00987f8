//! FFmpeg process spawning and progress parsing.
//!
//! Spawns FFmpeg as a child process and reads both output streams on background
//! threads: stdout carries `-progress pipe:1` key=value lines, stderr carries the
//! banner (for the input duration) and error text. The calling thread blocks
//! until the process exits.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use parking_lot::Mutex;

use super::discovery::get_ffmpeg_path;
use super::progress::{ProgressLine, parse_progress_line};
use crate::error::AppError;

/// AtomicU64 cannot hold Option<f64>, so the duration is stored as f64 bits
/// with u64::MAX meaning "not yet known".
const NONE_DURATION_BITS: u64 = u64::MAX;
/// Keep only the tail of stderr.
const MAX_STDERR_BYTES: usize = 64 * 1024;

pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Single active FFmpeg process. Only one compression runs at a time.
static ACTIVE_FFMPEG_PROCESS: Mutex<Option<Child>> = Mutex::new(None);

struct ReadStreamConfig {
    collect_stderr: Option<Arc<Mutex<Vec<u8>>>>,
    duration: Arc<AtomicU64>,
    progress_callback: Option<ProgressCallback>,
}

fn load_duration(bits: &AtomicU64) -> Option<f64> {
    match bits.load(Ordering::Relaxed) {
        NONE_DURATION_BITS => None,
        b => Some(f64::from_bits(b)),
    }
}

fn read_stream<R: std::io::Read + Send + 'static>(
    reader: R,
    config: ReadStreamConfig,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut stream_reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while stream_reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let line = String::from_utf8_lossy(&line_buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(ref buf) = config.collect_stderr {
                let mut guard = buf.lock();
                guard.extend_from_slice(line.as_bytes());
                guard.push(b'\n');
                if guard.len() > MAX_STDERR_BYTES {
                    let excess = guard.len() - MAX_STDERR_BYTES;
                    guard.drain(..excess);
                }
            }
            match parse_progress_line(line, load_duration(&config.duration)) {
                Some(ProgressLine::Duration(d)) if d > 0.0 => {
                    // A caller-provided duration wins over the banner.
                    let _ = config.duration.compare_exchange(
                        NONE_DURATION_BITS,
                        d.to_bits(),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    );
                }
                Some(ProgressLine::Fraction(p)) => {
                    if let Some(ref cb) = config.progress_callback {
                        cb(p);
                    }
                }
                // Encoding is done even if the duration was never known.
                Some(ProgressLine::End) => {
                    if let Some(ref cb) = config.progress_callback {
                        cb(1.0);
                    }
                }
                Some(ProgressLine::Duration(_)) | None => {}
            }
            line_buf.clear();
        }
    })
}

/// Run FFmpeg and block until it exits.
///
/// - `duration_secs`: input length if known up front, so out_time lines convert
///   to a fraction before the stderr banner has been read.
/// - `progress_callback`: receives raw fractions in [0,1] as FFmpeg reports them.
///
/// Returns `AppError::Aborted` if the process was taken away by
/// [`terminate_all_ffmpeg`] while running.
pub fn run_ffmpeg_blocking(
    args: Vec<String>,
    duration_secs: Option<f64>,
    progress_callback: Option<ProgressCallback>,
) -> Result<(), AppError> {
    let ffmpeg_path = get_ffmpeg_path()?;

    let input_arg = args
        .iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1));
    log::debug!(
        target: "video_minifier::ffmpeg::runner",
        "Spawning FFmpeg: path={}, input={:?}, output={:?}",
        ffmpeg_path.display(),
        input_arg,
        args.last()
    );

    let mut cmd = Command::new(ffmpeg_path);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| format!("Failed to spawn FFmpeg: {}", e))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(AppError::from("Failed to capture FFmpeg output"));
    };

    *ACTIVE_FFMPEG_PROCESS.lock() = Some(child);

    let duration = Arc::new(AtomicU64::new(
        duration_secs
            .filter(|&d| d > 0.0)
            .map(f64::to_bits)
            .unwrap_or(NONE_DURATION_BITS),
    ));
    let stderr_buffer = Arc::new(Mutex::new(Vec::new()));

    let stdout_handle = read_stream(
        stdout,
        ReadStreamConfig {
            collect_stderr: None,
            duration: Arc::clone(&duration),
            progress_callback,
        },
    );
    let stderr_handle = read_stream(
        stderr,
        ReadStreamConfig {
            collect_stderr: Some(Arc::clone(&stderr_buffer)),
            duration: Arc::clone(&duration),
            progress_callback: None,
        },
    );

    let _ = stdout_handle.join();
    let _ = stderr_handle.join();

    let child = ACTIVE_FFMPEG_PROCESS.lock().take();
    let status = match child {
        Some(mut c) => c.wait()?,
        None => {
            log::warn!(
                target: "video_minifier::ffmpeg::runner",
                "FFmpeg process was terminated before completion"
            );
            return Err(AppError::aborted());
        }
    };

    if status.success() {
        log::info!(
            target: "video_minifier::ffmpeg::runner",
            "FFmpeg completed successfully"
        );
        return Ok(());
    }

    let stderr_str = String::from_utf8_lossy(&stderr_buffer.lock()).to_string();
    let code = status.code().unwrap_or(-1);
    let tail = stderr_str
        .lines()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .join("; ");
    log::error!(
        target: "video_minifier::ffmpeg::runner",
        "FFmpeg failed (code={}): {}",
        code,
        tail
    );
    Err(AppError::ffmpeg_failed(code, stderr_str))
}

/// Kill the active FFmpeg process, if any. The blocked runner then returns `Aborted`.
pub fn terminate_all_ffmpeg() -> bool {
    let mut guard = ACTIVE_FFMPEG_PROCESS.lock();
    let Some(mut child) = guard.take() else {
        return false;
    };
    log::info!(
        target: "video_minifier::ffmpeg::runner",
        "Terminating FFmpeg process"
    );
    let _ = child.kill();
    let _ = child.wait();
    true
}
