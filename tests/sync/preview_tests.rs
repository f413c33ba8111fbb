// Tests for sync previews
// A preview must predict exactly what a real sync with the same options does

use assetsync::sync::{FileMappingRule, FilterRule, FolderPair, NoProgress, SyncEngine, SyncError, SyncOptions};

use super::common::{set_mtime, sorted, Fixture};

fn relative_paths(entries: &[assetsync::sync::PreviewEntry]) -> Vec<String> {
    sorted(entries.iter().map(|e| e.relative_path.clone()).collect())
}

#[test]
fn test_preview_matches_real_sync() {
    let fx = Fixture::new();
    fx.source_file("new.png", "new");
    let stale = fx.source_file("stale.png", "stale-src");
    let current = fx.source_file("ui/current.png", "current");
    fx.source_file("notes.tmp", "ignored");
    set_mtime(&stale, 2_000);
    set_mtime(&current, 2_000);
    set_mtime(&fx.target_file("stale.png", "stale-dst"), 1_000);
    set_mtime(&fx.target_file("ui/current.png", "current"), 2_000);

    let pair = FolderPair::new("art", &fx.source, &fx.target)
        .with_filter(FilterRule::new(vec![], vec!["*.tmp".into()]));
    let options = SyncOptions::default();
    let engine = SyncEngine::new();

    let preview = engine.preview_sync(&pair, &options).unwrap();

    assert_eq!(relative_paths(&preview.files_to_copy), vec!["new.png", "stale.png"]);
    assert_eq!(relative_paths(&preview.files_to_skip), vec!["ui/current.png"]);
    assert_eq!(preview.total_size, ("new".len() + "stale-src".len()) as u64);
    assert!(preview.files_to_skip[0].target_exists);

    // Nothing was written by the preview
    assert_eq!(std::fs::read_to_string(fx.target.join("stale.png")).unwrap(), "stale-dst");

    let result = engine.sync_folder_pair(&pair, &options, &NoProgress);
    assert_eq!(sorted(result.copied), relative_paths(&preview.files_to_copy));
    assert_eq!(sorted(result.skipped), relative_paths(&preview.files_to_skip));
    assert_eq!(result.total_bytes, preview.total_size);
}

#[test]
fn test_preview_reports_mapped_destination() {
    let fx = Fixture::new();
    fx.source_file("button_ok.png", "ok");
    let pair = FolderPair::new("art", &fx.source, &fx.target).with_mapping(FileMappingRule::new("button_*", "ui/buttons"));

    let preview = SyncEngine::new().preview_sync(&pair, &SyncOptions::default()).unwrap();

    let entry = &preview.files_to_copy[0];
    assert_eq!(entry.destination, fx.target.join("ui").join("buttons").join("button_ok.png"));
    assert!(!entry.target_exists);
    assert_eq!(entry.size, 2);
    assert!(entry.modified.is_some());
    // The target folder is not created by a preview
    assert!(!fx.target.exists());
}

#[test]
fn test_forced_preview_copies_everything() {
    let fx = Fixture::new();
    let src = fx.source_file("a.png", "a");
    set_mtime(&src, 1_000);
    set_mtime(&fx.target_file("a.png", "a"), 2_000);
    let pair = FolderPair::new("art", &fx.source, &fx.target);

    let normal = SyncEngine::new().preview_sync(&pair, &SyncOptions::default()).unwrap();
    let forced = SyncEngine::new()
        .preview_sync(
            &pair,
            &SyncOptions {
                force_copy: true,
                ..SyncOptions::default()
            },
        )
        .unwrap();

    assert_eq!((normal.copy_count(), normal.skip_count()), (0, 1));
    assert_eq!((forced.copy_count(), forced.skip_count()), (1, 0));
}

#[test]
fn test_preview_lists_files_sync_would_fail_on() {
    let fx = Fixture::new();
    fx.source_file("ok.png", "ok");
    fx.source_file("ui/blocked.png", "blocked");
    // A plain file where the ui folder should be
    fx.target_file("ui", "not a folder");
    let pair = FolderPair::new("art", &fx.source, &fx.target);
    let options = SyncOptions {
        create_backup: false,
        ..SyncOptions::default()
    };
    let engine = SyncEngine::new();

    let preview = engine.preview_sync(&pair, &options).unwrap();
    assert_eq!(preview.files_with_errors, vec!["ui/blocked.png"]);
    assert_eq!(relative_paths(&preview.files_to_copy), vec!["ok.png"]);
    assert_eq!(preview.error_count(), 1);

    let result = engine.sync_folder_pair(&pair, &options, &NoProgress);
    assert_eq!(result.errored, preview.files_with_errors);
    assert_eq!(sorted(result.copied), relative_paths(&preview.files_to_copy));
}

#[test]
fn test_preview_missing_source() {
    let fx = Fixture::new();
    let pair = FolderPair::new("art", fx.source.join("nope"), &fx.target);

    let err = SyncEngine::new().preview_sync(&pair, &SyncOptions::default()).unwrap_err();

    assert!(matches!(err, SyncError::SourceNotFound { .. }));
    assert!(err.is_configuration());
}
