use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d+):(\d+):([\d.]+)").expect("invalid duration regex")
});
static OUT_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^out_time_(?:ms|us)=(\d+)").expect("invalid time regex"));
static PROGRESS_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^progress=end").expect("invalid progress regex"));

/// One interpreted line of FFmpeg output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressLine {
    /// Input duration in seconds, from the stderr banner.
    Duration(f64),
    /// Fraction in [0, 1] of the known duration.
    Fraction(f64),
    /// `progress=end` from the `-progress` stream.
    End,
}

/// Parse a line from either FFmpeg stream. `duration` is the total input length
/// in seconds if already known; without it out_time lines cannot be converted.
pub fn parse_progress_line(line: &str, duration: Option<f64>) -> Option<ProgressLine> {
    if let Some(caps) = DURATION_RE.captures(line) {
        let hours: f64 = caps[1].parse().unwrap_or(0.0);
        let minutes: f64 = caps[2].parse().unwrap_or(0.0);
        let seconds: f64 = caps[3].parse().unwrap_or(0.0);
        return Some(ProgressLine::Duration(hours * 3600.0 + minutes * 60.0 + seconds));
    }
    let trimmed = line.trim();
    if PROGRESS_END_RE.is_match(trimmed) {
        return Some(ProgressLine::End);
    }
    let caps = OUT_TIME_RE.captures(trimmed)?;
    let dur = duration.filter(|d| *d > 0.0)?;
    // FFmpeg reports out_time_ms in microseconds despite the name.
    let micros: u64 = caps[1].parse().ok()?;
    let seconds = micros as f64 / 1_000_000.0;
    Some(ProgressLine::Fraction((seconds / dur).clamp(0.0, 1.0)))
}
