use crate::quality::{EncoderProfile, QualityTier};

/// Bounding box for the output. Portrait sources get the box rotated so a tall
/// phone clip is limited by its long edge, not squeezed into a landscape box.
pub fn target_box(profile: &EncoderProfile, source_dims: Option<(u32, u32)>) -> (u32, u32) {
    match source_dims {
        Some((w, h)) if h > w => (profile.height, profile.width),
        _ => (profile.width, profile.height),
    }
}

/// Fit inside the box, keep aspect ratio, never upscale, keep dimensions even for yuv420p.
pub fn scale_filter(box_width: u32, box_height: u32) -> String {
    format!(
        "scale='min({w},iw)':'min({h},ih)':force_original_aspect_ratio=decrease:force_divisible_by=2",
        w = box_width,
        h = box_height
    )
}

/// Build the H.264/AAC MP4 export command for a tier. Progress is written to stdout
/// as key=value lines (`-progress pipe:1`); the output is overwritten if present.
pub fn build_compress_command(
    input_path: &str,
    output_path: &str,
    tier: QualityTier,
    source_dims: Option<(u32, u32)>,
) -> Vec<String> {
    let profile = tier.profile();
    let (box_w, box_h) = target_box(&profile, source_dims);
    let video_rate = format!("{}k", profile.video_bitrate_kbps);

    log::debug!(
        target: "video_minifier::ffmpeg::builder",
        "Building export command: tier={}, box={}x{}, bitrate={}, input={} -> output={}",
        tier.slug(),
        box_w,
        box_h,
        video_rate,
        input_path,
        output_path
    );

    let mut args: Vec<String> = [
        "-nostdin",
        "-y",
        "-hide_banner",
        "-threads",
        "0",
        "-progress",
        "pipe:1",
        "-i",
        input_path,
        "-map",
        "0:v:0",
        "-map",
        "0:a:0?",
        "-c:v",
        "libx264",
        "-preset",
        "medium",
        "-profile:v",
        "high",
        "-pix_fmt",
        "yuv420p",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.extend([
        "-b:v".to_string(),
        video_rate.clone(),
        "-maxrate".to_string(),
        video_rate,
        "-bufsize".to_string(),
        format!("{}k", profile.video_bitrate_kbps * 2),
        "-vf".to_string(),
        scale_filter(box_w, box_h),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", profile.audio_bitrate_kbps),
        "-map_metadata".to_string(),
        "0".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-f".to_string(),
        "mp4".to_string(),
        output_path.to_string(),
    ]);
    args
}

/// Render args one flag per line, for debug logs.
pub fn format_args_for_display(args: &[String]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let takes_value = arg.starts_with('-')
            && iter.peek().is_some_and(|next| !next.starts_with('-') || next.len() == 1);
        if takes_value {
            if let Some(value) = iter.next() {
                lines.push(format!("  {} {}", arg, value));
                continue;
            }
        }
        lines.push(format!("  {}", arg));
    }
    lines.join(" \\\n")
}
