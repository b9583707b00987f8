#![cfg(feature = "integration-test-api")]

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serial_test::serial;
use support::{LibraryEnv, create_test_video, ffmpeg_path};
use video_minifier_core::ffmpeg::ffprobe::get_video_metadata;
use video_minifier_core::library::{DirectoryLibrary, MediaItemId, MediaLibrary};
use video_minifier_core::quality::QualityTier;
use video_minifier_core::runner::JobEvent;
use video_minifier_core::sidecar_api::CompressOutcome;
use video_minifier_core::summary::Disposition;
use video_minifier_core::transcode::FfmpegTranscoder;

const TERMINAL_BOUND: Duration = Duration::from_secs(120);

fn env_with_clip(size: &str) -> LibraryEnv {
    let env = LibraryEnv::new();
    let status = create_test_video(&ffmpeg_path(), &env.library_dir().join("clip.mp4"), 2.0, size)
        .expect("failed to create test video");
    assert!(status.success(), "ffmpeg failed to create test video");
    env
}

#[test]
#[serial]
fn every_tier_reaches_a_terminal_state() {
    for tier in QualityTier::ALL {
        let env = env_with_clip("640x360");
        let library: Arc<dyn MediaLibrary> = Arc::new(DirectoryLibrary::new(env.library_dir()));
        let app = env.app_with(library, Arc::new(FfmpegTranscoder));
        app.library_request_authorization().expect("authorize");
        app.media_open(&MediaItemId::new("clip.mp4")).expect("open");

        let started = Instant::now();
        let mut last_progress = 0.0;
        let outcome = app
            .media_compress(Some(tier), |event| {
                if let JobEvent::Progress { progress, .. } = event {
                    assert!(*progress >= last_progress, "progress went backwards");
                    last_progress = *progress;
                }
            })
            .expect("compression ran");
        assert!(started.elapsed() < TERMINAL_BOUND, "{} took too long", tier);

        let CompressOutcome::Completed(result) = outcome else {
            panic!("{} compression failed", tier);
        };
        let action = if result.actions.contains(&Disposition::KeepBoth) {
            Disposition::KeepBoth
        } else {
            Disposition::Discard
        };
        let disposed = app.media_dispose(action).expect("dispose");
        if let Some(saved) = disposed.saved_item_id {
            let meta = get_video_metadata(&env.library_dir().join(saved.as_str())).expect("probe");
            assert!(meta.is_playable());
            assert_eq!(meta.codec_name.as_deref(), Some("h264"));
        }
        app.cleanup_on_exit();
    }
}

#[test]
#[serial]
fn output_fits_the_tier_box_without_upscaling() {
    let env = env_with_clip("1280x720");
    let library: Arc<dyn MediaLibrary> = Arc::new(DirectoryLibrary::new(env.library_dir()));
    let app = env.app_with(library, Arc::new(FfmpegTranscoder));
    app.library_request_authorization().expect("authorize");
    app.media_open(&MediaItemId::new("clip.mp4")).expect("open");

    let outcome = app
        .media_compress(Some(QualityTier::Low), |_| {})
        .expect("compression ran");
    assert!(matches!(outcome, CompressOutcome::Completed(_)));

    let output = env
        .scratch_files()
        .into_iter()
        .find(|p| p.extension().is_some_and(|e| e == "mp4"))
        .expect("scratch output");
    let meta = get_video_metadata(&output).expect("probe output");
    assert_eq!((meta.width, meta.height), (960, 540));
    assert!(meta.audio_stream_count >= 1);
    app.media_close().expect("close");
    assert!(env.scratch_files().is_empty());
}

#[test]
#[serial]
fn unplayable_source_fails_to_load() {
    let env = LibraryEnv::new();
    env.add_video("corrupt.mp4", 2_048);
    let library: Arc<dyn MediaLibrary> = Arc::new(DirectoryLibrary::new(env.library_dir()));
    let app = env.app_with(library, Arc::new(FfmpegTranscoder));
    app.library_request_authorization().expect("authorize");

    let err = app
        .media_open(&MediaItemId::new("corrupt.mp4"))
        .expect_err("corrupt source");
    assert_eq!(err.to_string(), "Could not load video.");
}
