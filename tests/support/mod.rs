#![allow(dead_code)]

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use video_minifier_core::error::AppError;
use video_minifier_core::ffmpeg::ScratchSpace;
use video_minifier_core::ffmpeg::ffprobe::VideoMetadata;
use video_minifier_core::job::CompressionJob;
use video_minifier_core::library::{
    AuthorizationStatus, DirectoryLibrary, LibraryChange, LibraryChangeRequest, LibraryCommit,
    MediaItem, MediaLibrary, PlayableAsset,
};
use video_minifier_core::sidecar_api::SidecarApp;
use video_minifier_core::transcode::{SessionStatus, TranscodeSession, Transcoder};

/// A directory library whose assets resolve without ffprobe, for tests that
/// never touch a real video.
pub struct UnprobedLibrary(pub DirectoryLibrary);

impl MediaLibrary for UnprobedLibrary {
    fn authorization_status(&self) -> AuthorizationStatus {
        self.0.authorization_status()
    }

    fn request_authorization(&self) -> AuthorizationStatus {
        self.0.request_authorization()
    }

    fn fetch_videos(&self) -> Result<Vec<MediaItem>, AppError> {
        self.0.fetch_videos()
    }

    fn request_asset(&self, item: &MediaItem) -> Result<PlayableAsset, AppError> {
        if !item.primary.is_file() {
            return Err(AppError::load_failed("Could not load video."));
        }
        Ok(PlayableAsset {
            item_id: item.id.clone(),
            path: item.primary.clone(),
            metadata: VideoMetadata {
                duration: 4.0,
                width: 1920,
                height: 1080,
                size: item.byte_size,
                has_video: true,
                ..Default::default()
            },
        })
    }

    fn perform_changes(&self, request: LibraryChangeRequest) -> Result<LibraryCommit, AppError> {
        self.0.perform_changes(request)
    }

    fn subscribe(&self) -> Receiver<LibraryChange> {
        self.0.subscribe()
    }

    fn refresh(&self) -> Result<LibraryChange, AppError> {
        self.0.refresh()
    }
}

/// Finishes after two progress samples with an output of a fixed size, or
/// fails with the given message.
pub struct FakeTranscoder {
    output_bytes: usize,
    failure: Option<&'static str>,
    started: Mutex<Vec<CompressionJob>>,
}

impl FakeTranscoder {
    pub fn producing(output_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            output_bytes,
            failure: None,
            started: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            output_bytes: 0,
            failure: Some(message),
            started: Mutex::new(Vec::new()),
        })
    }

    pub fn started_jobs(&self) -> Vec<CompressionJob> {
        self.started.lock().clone()
    }
}

struct FakeSession {
    destination: PathBuf,
    output_bytes: usize,
    failure: Option<&'static str>,
    polls: u32,
    progress: f64,
}

impl Transcoder for FakeTranscoder {
    fn start(&self, job: &CompressionJob) -> Result<Box<dyn TranscodeSession>, AppError> {
        self.started.lock().push(job.clone());
        Ok(Box::new(FakeSession {
            destination: job.destination.clone(),
            output_bytes: self.output_bytes,
            failure: self.failure,
            polls: 0,
            progress: 0.0,
        }))
    }
}

impl TranscodeSession for FakeSession {
    fn progress(&self) -> f64 {
        self.progress
    }

    fn poll_status(&mut self) -> SessionStatus {
        self.polls += 1;
        match self.polls {
            1 => {
                self.progress = 0.25;
                SessionStatus::Running
            }
            2 => {
                self.progress = 0.75;
                fs::write(&self.destination, b"partial").expect("write partial output");
                SessionStatus::Running
            }
            _ => match self.failure {
                Some(message) => SessionStatus::Failed(AppError::from(message)),
                None => {
                    fs::write(&self.destination, vec![0u8; self.output_bytes])
                        .expect("write output");
                    SessionStatus::Completed
                }
            },
        }
    }

    fn cancel(&mut self) {
        self.failure = Some("Aborted");
    }
}

/// Stays running at half progress until released or cancelled, so a test can
/// act while a job is in flight.
pub struct HeldTranscoder {
    output_bytes: usize,
    released: Arc<AtomicBool>,
    started: Mutex<Vec<CompressionJob>>,
}

impl HeldTranscoder {
    pub fn producing(output_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            output_bytes,
            released: Arc::new(AtomicBool::new(false)),
            started: Mutex::new(Vec::new()),
        })
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    pub fn started_jobs(&self) -> Vec<CompressionJob> {
        self.started.lock().clone()
    }
}

struct HeldSession {
    destination: PathBuf,
    output_bytes: usize,
    released: Arc<AtomicBool>,
    cancelled: bool,
}

impl Transcoder for HeldTranscoder {
    fn start(&self, job: &CompressionJob) -> Result<Box<dyn TranscodeSession>, AppError> {
        self.started.lock().push(job.clone());
        fs::write(&job.destination, b"partial").expect("write partial output");
        Ok(Box::new(HeldSession {
            destination: job.destination.clone(),
            output_bytes: self.output_bytes,
            released: Arc::clone(&self.released),
            cancelled: false,
        }))
    }
}

impl TranscodeSession for HeldSession {
    fn progress(&self) -> f64 {
        0.5
    }

    fn poll_status(&mut self) -> SessionStatus {
        if self.cancelled {
            return SessionStatus::Failed(AppError::aborted());
        }
        if !self.released.load(Ordering::SeqCst) {
            return SessionStatus::Running;
        }
        fs::write(&self.destination, vec![0u8; self.output_bytes]).expect("write output");
        SessionStatus::Completed
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

/// In-memory sink for RPC output, readable while the server still holds it.
#[derive(Clone, Default)]
pub struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    /// Every JSON line written so far.
    pub fn messages(&self) -> Vec<Value> {
        let bytes = self.0.lock().clone();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).expect("each line is JSON"))
            .collect()
    }

    pub fn response(&self, id: u64) -> Option<Value> {
        self.messages()
            .into_iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(id))
    }

    pub fn events(&self, name: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m.get("event").and_then(Value::as_str) == Some(name))
            .map(|m| m["payload"].clone())
            .collect()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Temporary library plus scratch directory.
pub struct LibraryEnv {
    dir: tempfile::TempDir,
}

impl LibraryEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("Videos")).expect("create library dir");
        Self { dir }
    }

    pub fn library_dir(&self) -> PathBuf {
        self.dir.path().join("Videos")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    pub fn add_video(&self, name: &str, bytes: usize) -> PathBuf {
        let path = self.library_dir().join(name);
        fs::write(&path, vec![7u8; bytes]).expect("write library video");
        path
    }

    pub fn library_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.library_dir())
            .expect("read library dir")
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    pub fn scratch_files(&self) -> Vec<PathBuf> {
        match fs::read_dir(self.scratch_dir()) {
            Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn app_with(&self, library: Arc<dyn MediaLibrary>, transcoder: Arc<dyn Transcoder>) -> SidecarApp {
        SidecarApp::with_parts(
            library,
            transcoder,
            Arc::new(ScratchSpace::new(self.scratch_dir())),
        )
        .with_sample_interval(Duration::from_millis(2))
    }

    pub fn fake_app(&self, transcoder: Arc<dyn Transcoder>) -> SidecarApp {
        let library = UnprobedLibrary(DirectoryLibrary::new(self.library_dir()).without_duration_probe());
        self.app_with(Arc::new(library), transcoder)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn ffmpeg_path() -> PathBuf {
    video_minifier_core::ffmpeg::discovery::get_ffmpeg_path()
        .expect("FFmpeg not found")
        .to_path_buf()
}

/// Synthetic clip with a test pattern and a sine tone.
pub fn create_test_video(
    ffmpeg: &Path,
    output_path: &Path,
    duration_secs: f32,
    size: &str,
) -> std::io::Result<ExitStatus> {
    let duration_arg = format!("{}", duration_secs);
    Command::new(ffmpeg)
        .args([
            "-loglevel",
            "error",
            "-y",
            "-f",
            "lavfi",
            "-i",
            &format!("testsrc=duration={}:size={}:rate=30", duration_arg, size),
            "-f",
            "lavfi",
            "-i",
            &format!("sine=frequency=440:duration={}", duration_arg),
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-shortest",
            output_path.to_string_lossy().as_ref(),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}
