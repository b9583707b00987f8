mod support;

use serial_test::serial;
use support::{FakeTranscoder, LibraryEnv};
use video_minifier_core::library::MediaItemId;
use video_minifier_core::quality::QualityTier;
use video_minifier_core::runner::JobEvent;
use video_minifier_core::sidecar_api::CompressOutcome;
use video_minifier_core::summary::Disposition;

fn progress_of(events: &[JobEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress { progress, .. } => Some(*progress),
            JobEvent::Finished { .. } => None,
        })
        .collect()
}

#[test]
#[serial]
fn smaller_output_replaces_original() {
    let env = LibraryEnv::new();
    env.add_video("holiday.mov", 10_000);
    let transcoder = FakeTranscoder::producing(2_500);
    let app = env.fake_app(transcoder.clone());

    app.library_request_authorization().expect("authorize");
    assert_eq!(app.library_list().expect("list").items.len(), 1);
    app.media_open(&MediaItemId::new("holiday.mov")).expect("open");

    let mut events = Vec::new();
    let outcome = app
        .media_compress(Some(QualityTier::High), |e| events.push(e.clone()))
        .expect("compress");

    let CompressOutcome::Completed(result) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(result.summary.output_bytes, 2_500);
    assert_eq!(result.summary.savings_percent, 75.0);
    assert_eq!(result.actions, vec![Disposition::Replace, Disposition::KeepBoth]);
    assert_eq!(result.note, None);
    assert_eq!(transcoder.started_jobs()[0].tier, QualityTier::High);

    let progress = progress_of(&events);
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|p| *p < 1.0));
    assert!(matches!(events.last(), Some(JobEvent::Finished { .. })));

    let disposed = app.media_dispose(Disposition::Replace).expect("replace");
    assert_eq!(disposed.saved_item_id, Some(MediaItemId::new("holiday.mp4")));
    assert_eq!(env.library_files(), vec!["holiday.mp4"]);
    assert!(env.scratch_files().is_empty());
    // The replaced item's screen is gone.
    assert!(!app.media_close().expect("close"));
}

#[test]
#[serial]
fn larger_output_only_offers_discard() {
    let env = LibraryEnv::new();
    env.add_video("tiny.mp4", 1_000);
    let app = env.fake_app(FakeTranscoder::producing(4_000));

    app.library_request_authorization().expect("authorize");
    app.media_open(&MediaItemId::new("tiny.mp4")).expect("open");
    let CompressOutcome::Completed(result) = app.media_compress(None, |_| {}).expect("compress")
    else {
        panic!("expected completion");
    };

    assert_eq!(result.actions, vec![Disposition::Discard]);
    assert!(result.note.is_some());
    assert!(app.media_dispose(Disposition::Replace).is_err());
    assert!(app.media_dispose(Disposition::KeepBoth).is_err());

    app.media_dispose(Disposition::Discard).expect("discard");
    assert_eq!(env.library_files(), vec!["tiny.mp4"]);
    assert!(env.scratch_files().is_empty());
}

#[test]
#[serial]
fn keep_both_adds_a_second_item() {
    let env = LibraryEnv::new();
    env.add_video("concert.mp4", 8_000);
    let app = env.fake_app(FakeTranscoder::producing(1_000));
    let changes = app.subscribe_library_changes();

    app.library_request_authorization().expect("authorize");
    app.media_open(&MediaItemId::new("concert.mp4")).expect("open");
    app.media_compress(Some(QualityTier::Low), |_| {}).expect("compress");
    app.media_dispose(Disposition::KeepBoth).expect("keep both");

    assert_eq!(env.library_files(), vec!["concert-minified.mp4", "concert.mp4"]);
    let change = changes.try_recv().expect("library change");
    assert_eq!(change.inserted, vec![MediaItemId::new("concert-minified.mp4")]);
    assert!(change.removed.is_empty());
    assert_eq!(app.library_list().expect("list").items.len(), 2);
    assert!(app.media_close().expect("close"));
}

#[test]
#[serial]
fn failed_job_surfaces_message_and_commits_nothing() {
    let env = LibraryEnv::new();
    env.add_video("party.mov", 5_000);
    let app = env.fake_app(FakeTranscoder::failing("The operation could not be completed"));

    app.library_request_authorization().expect("authorize");
    app.media_open(&MediaItemId::new("party.mov")).expect("open");
    let outcome = app.media_compress(None, |_| {}).expect("job ran");

    let CompressOutcome::Failed(failure) = outcome else {
        panic!("expected failure");
    };
    assert_eq!(failure.message, "The operation could not be completed");
    assert!(!failure.cancelled);
    assert!(app.media_dispose(Disposition::Discard).is_err());
    assert_eq!(env.library_files(), vec!["party.mov"]);
    assert!(env.scratch_files().is_empty());

    // No retry state is kept; a new attempt starts from scratch.
    assert!(!app.is_compressing());
    assert!(app.media_close().expect("close"));
}

#[test]
#[serial]
fn unknown_tier_strings_are_rejected() {
    let parsed: Result<QualityTier, _> = serde_json::from_str("\"ultra\"");
    assert!(parsed.is_err());
    assert!("ultra".parse::<QualityTier>().is_err());
    assert_eq!("LOW".parse::<QualityTier>().expect("tier"), QualityTier::Low);
}
