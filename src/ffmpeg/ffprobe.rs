//! FFprobe-based metadata extraction. Used to decide whether a library file is a
//! playable video and to validate a finished compression output.

use crate::error::AppError;
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

use super::discovery::get_ffprobe_path;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 { None } else { Some(num / den) }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub fps: f64,
    pub has_video: bool,
    pub audio_stream_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u64>,
}

impl VideoMetadata {
    /// A video stream with a positive duration; what a player needs to open it.
    pub fn is_playable(&self) -> bool {
        self.has_video && self.duration > 0.0
    }
}

pub fn parse_ffprobe_json(json: &str) -> Result<VideoMetadata, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::from(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let format = output.format.as_ref();
    let duration = format
        .and_then(|f| f.duration.as_deref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    let size = format
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    let bit_rate = format
        .and_then(|f| f.bit_rate.as_deref())
        .and_then(|s| s.trim().parse::<u64>().ok());

    let streams = output.streams.unwrap_or_default();
    let video_stream = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio_streams: Vec<&FfprobeStream> = streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .collect();

    Ok(VideoMetadata {
        duration,
        width: video_stream.and_then(|s| s.width).unwrap_or(0),
        height: video_stream.and_then(|s| s.height).unwrap_or(0),
        size,
        fps: video_stream
            .and_then(|s| s.r_frame_rate.as_deref())
            .and_then(parse_frame_rate)
            .unwrap_or(0.0),
        has_video: video_stream.is_some(),
        audio_stream_count: audio_streams.len() as u32,
        codec_name: video_stream.and_then(|s| s.codec_name.clone()),
        audio_codec_name: audio_streams.first().and_then(|s| s.codec_name.clone()),
        format_name: format.and_then(|f| f.format_name.clone()),
        bit_rate,
    })
}

/// Run ffprobe on a video file and return metadata.
pub fn get_video_metadata(path: &Path) -> Result<VideoMetadata, AppError> {
    let ffprobe = get_ffprobe_path()?;
    let path_str = path.to_string_lossy();

    log::debug!(
        target: "video_minifier::ffmpeg::ffprobe",
        "probing: path={}",
        path_str
    );

    let output = Command::new(&ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            &path_str,
        ])
        .output()
        .map_err(|e| AppError::from(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::from(format!("ffprobe failed: {}", stderr.trim())));
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|_| AppError::from("ffprobe output was not valid UTF-8"))?;
    parse_ffprobe_json(&json)
}
