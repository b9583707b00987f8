//! Map FFmpeg exit codes to short messages for the alert shown after a failed job.
//!
//! Exit codes come from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). -1 is used when the process never started.

use serde::Serialize;

/// Error payload sent to the frontend. `summary` goes in the alert, `detail` is kept for diagnostics.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

const ELLIPSIS: &str = "…";
const SUMMARY_MAX_BYTES: usize = 120;

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = match exit_code {
        Some(code) => known_exit_code_summary(code)
            .map(str::to_string)
            .unwrap_or_else(|| format!("FFmpeg failed (exit code {}).", code)),
        None => first_line_truncated(stderr, SUMMARY_MAX_BYTES),
    };
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

/// FFmpeg's own error text: the last non-empty stderr line that is not one of
/// its generic trailers. `None` for signal exits, where that line only names the signal.
pub fn error_headline(stderr: &str, exit_code: i32) -> Option<String> {
    if matches!(exit_code, 123 | 255) {
        return None;
    }
    let line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty() && !GENERIC_TRAILERS.contains(l))?;
    Some(truncate_line(line, SUMMARY_MAX_BYTES))
}

const GENERIC_TRAILERS: &[&str] = &["Conversion failed!", "Exiting normally."];

fn known_exit_code_summary(code: i32) -> Option<&'static str> {
    match code {
        -1 => Some("FFmpeg not found or failed to start."),
        1 => Some("FFmpeg failed."),
        69 => Some("Encoding rate limit exceeded."),
        123 | 255 => Some("Compression was stopped."),
        _ => None,
    }
}

fn first_line_truncated(stderr: &str, max_len: usize) -> String {
    let first = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    truncate_line(first, max_len)
}

fn truncate_line(line: &str, max_len: usize) -> String {
    if line.len() <= max_len {
        return line.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &line[..cut], ELLIPSIS)
}
