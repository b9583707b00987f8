mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
mod progress;
mod runner;
mod temp;

pub use builder::{build_compress_command, format_args_for_display, scale_filter, target_box};
pub use error::{FfmpegErrorPayload, error_headline, parse_ffmpeg_error};
pub use progress::{ProgressLine, parse_progress_line};
pub use runner::{ProgressCallback, run_ffmpeg_blocking, terminate_all_ffmpeg};
pub use temp::ScratchSpace;

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
