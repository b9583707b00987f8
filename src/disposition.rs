//! Apply the user's choice for a finished job to the library.

use std::path::PathBuf;

use crate::error::AppError;
use crate::ffmpeg::ScratchSpace;
use crate::library::{LibraryChangeRequest, MediaItem, MediaItemId, MediaLibrary};
use crate::summary::{Disposition, ResultSummary};

/// Generic message for a failed library commit; the cause goes to the log.
pub const SAVE_FAILED_MESSAGE: &str = "Could not save the compressed video.";

/// A completed job waiting for the user's decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingResult {
    pub source: MediaItem,
    pub output: PathBuf,
    pub summary: ResultSummary,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispositionOutcome {
    pub action: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_item_id: Option<MediaItemId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_item_id: Option<MediaItemId>,
}

/// Name for the committed file: the original's stem, with a marker when both are kept.
fn committed_name(source: &MediaItem, action: Disposition) -> String {
    let stem = source
        .primary
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video");
    match action {
        Disposition::KeepBoth => format!("{}-minified.mp4", stem),
        _ => format!("{}.mp4", stem),
    }
}

fn commit_output(
    library: &dyn MediaLibrary,
    pending: &PendingResult,
    action: Disposition,
) -> Result<MediaItemId, AppError> {
    let mut request =
        LibraryChangeRequest::create(&pending.output).named(committed_name(&pending.source, action));
    if action == Disposition::Replace {
        request = request.deleting(pending.source.id.clone());
    }
    let commit = library.perform_changes(request)?;
    let created = commit
        .created
        .ok_or_else(|| AppError::library("Library did not report the new item"))?;
    // Success is only reported for an item the library can actually serve.
    let visible = library.item(&created.id)?.is_some_and(|item| item.primary.is_file());
    if !visible {
        return Err(AppError::library(format!(
            "Committed item {} is missing from the library",
            created.id
        )));
    }
    Ok(created.id)
}

/// Carry out `action` for `pending`. Actions the summary does not offer are rejected
/// without touching the library or the scratch output.
pub fn apply_disposition(
    library: &dyn MediaLibrary,
    scratch: &ScratchSpace,
    pending: &PendingResult,
    action: Disposition,
) -> Result<DispositionOutcome, AppError> {
    if !pending.summary.offers(action) {
        return Err(AppError::invalid_request(format!(
            "Action {} is not available for this result",
            action.as_str()
        )));
    }

    if action == Disposition::Discard {
        log::info!(
            target: "video_minifier::disposition",
            "Discarding result for {}",
            pending.source.id
        );
        scratch.discard(&pending.output);
        return Ok(DispositionOutcome {
            action,
            saved_item_id: None,
            removed_item_id: None,
        });
    }

    match commit_output(library, pending, action) {
        Ok(saved) => {
            scratch.release(&pending.output);
            log::info!(
                target: "video_minifier::disposition",
                "{} {} -> {}",
                action.as_str(),
                pending.source.id,
                saved
            );
            Ok(DispositionOutcome {
                action,
                saved_item_id: Some(saved),
                removed_item_id: (action == Disposition::Replace)
                    .then(|| pending.source.id.clone()),
            })
        }
        Err(e) => {
            log::error!(
                target: "video_minifier::disposition",
                "Failed to {} {}: {}",
                action.as_str(),
                pending.source.id,
                e
            );
            if !pending.output.is_file() {
                scratch.release(&pending.output);
            }
            Err(AppError::library(SAVE_FAILED_MESSAGE))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::DirectoryLibrary;
    use std::fs;

    struct Fixture {
        _library_dir: tempfile::TempDir,
        _scratch_dir: tempfile::TempDir,
        library: DirectoryLibrary,
        scratch: ScratchSpace,
        pending: PendingResult,
    }

    fn fixture(original: &[u8], output: &[u8]) -> Fixture {
        let library_dir = tempfile::tempdir().expect("library dir");
        let scratch_dir = tempfile::tempdir().expect("scratch dir");
        fs::write(library_dir.path().join("trip.mov"), original).unwrap();
        let library = DirectoryLibrary::new(library_dir.path()).without_duration_probe();
        let scratch = ScratchSpace::new(scratch_dir.path());
        let source = library.fetch_videos().unwrap().remove(0);
        let out = scratch
            .destination_for(source.id.as_str(), crate::quality::QualityTier::Low)
            .unwrap();
        fs::write(&out, output).unwrap();
        let summary = ResultSummary::new(source.byte_size, output.len() as u64);
        Fixture {
            _library_dir: library_dir,
            _scratch_dir: scratch_dir,
            library,
            scratch,
            pending: PendingResult {
                source,
                output: out,
                summary,
            },
        }
    }

    #[test]
    fn replace_commits_output_and_removes_original() {
        let f = fixture(b"0123456789", b"0123");
        let outcome =
            apply_disposition(&f.library, &f.scratch, &f.pending, Disposition::Replace).unwrap();

        assert_eq!(outcome.saved_item_id, Some(MediaItemId::new("trip.mp4")));
        assert_eq!(outcome.removed_item_id, Some(MediaItemId::new("trip.mov")));
        let ids: Vec<String> = f
            .library
            .fetch_videos()
            .unwrap()
            .into_iter()
            .map(|i| i.id.to_string())
            .collect();
        assert_eq!(ids, vec!["trip.mp4"]);
        assert!(!f.pending.output.exists());
    }

    #[test]
    fn keep_both_leaves_original() {
        let f = fixture(b"0123456789", b"0123");
        let outcome =
            apply_disposition(&f.library, &f.scratch, &f.pending, Disposition::KeepBoth).unwrap();

        assert_eq!(outcome.saved_item_id, Some(MediaItemId::new("trip-minified.mp4")));
        assert_eq!(outcome.removed_item_id, None);
        assert_eq!(f.library.fetch_videos().unwrap().len(), 2);
    }

    #[test]
    fn replace_is_rejected_when_output_is_not_smaller() {
        let f = fixture(b"0123", b"0123456789");
        let err = apply_disposition(&f.library, &f.scratch, &f.pending, Disposition::Replace)
            .expect_err("replace withheld");
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert!(f.pending.output.exists());
        assert_eq!(f.library.fetch_videos().unwrap().len(), 1);
    }

    #[test]
    fn discard_removes_output_without_library_change() {
        let f = fixture(b"0123", b"0123");
        let rx = f.library.subscribe();
        let outcome =
            apply_disposition(&f.library, &f.scratch, &f.pending, Disposition::Discard).unwrap();

        assert_eq!(outcome.saved_item_id, None);
        assert!(!f.pending.output.exists());
        assert!(rx.try_recv().is_err());
        assert_eq!(f.library.fetch_videos().unwrap().len(), 1);
    }

    #[test]
    fn commit_failure_is_generic_and_keeps_original() {
        let f = fixture(b"0123456789", b"0123");
        fs::remove_file(&f.pending.output).unwrap();

        let err = apply_disposition(&f.library, &f.scratch, &f.pending, Disposition::Replace)
            .expect_err("output gone");

        assert_eq!(err.to_string(), SAVE_FAILED_MESSAGE);
        let ids: Vec<String> = f
            .library
            .fetch_videos()
            .unwrap()
            .into_iter()
            .map(|i| i.id.to_string())
            .collect();
        assert_eq!(ids, vec!["trip.mov"]);
    }
}
