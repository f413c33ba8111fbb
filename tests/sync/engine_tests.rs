// Tests for the sync engine
// Full scan → map → copy runs over temporary folders

use assetsync::sync::{
    CancelHandle, FileMappingRule, FileOutcome, FileRenameRule, FilterRule, FolderPair, NoProgress, SyncEngine,
    SyncOptions, SyncPhase, SyncProgress, SyncResult, SyncStateStore,
};
use chrono::{DateTime, Local};
use std::cell::{Cell, RefCell};
use std::fs;
use std::sync::{Arc, Mutex};

use super::common::{set_mtime, sorted, Fixture};

fn sequential() -> SyncOptions {
    SyncOptions {
        max_workers: 1,
        ..SyncOptions::default()
    }
}

/// Cancels the run once `after` files have completed.
struct CancelAfter {
    handle: CancelHandle,
    after: usize,
    seen: Cell<usize>,
    completed: Cell<bool>,
}

impl SyncProgress for CancelAfter {
    fn on_file_progress(&self, _current: usize, _total: usize, _relative_path: &str, _outcome: FileOutcome) {
        self.seen.set(self.seen.get() + 1);
        if self.seen.get() == self.after {
            self.handle.cancel();
        }
    }

    fn on_complete(&self, _result: &SyncResult) {
        self.completed.set(true);
    }
}

/// Cancels before any file is dispatched.
struct CancelOnStart(CancelHandle);

impl SyncProgress for CancelOnStart {
    fn on_start(&self, _total: usize) {
        self.0.cancel();
    }
}

#[derive(Default)]
struct Events {
    started: RefCell<Vec<usize>>,
    files: RefCell<Vec<(usize, usize, String)>>,
    errors: RefCell<Vec<String>>,
    completed: Cell<usize>,
}

impl SyncProgress for Events {
    fn on_start(&self, total: usize) {
        self.started.borrow_mut().push(total);
    }

    fn on_file_progress(&self, current: usize, total: usize, relative_path: &str, _outcome: FileOutcome) {
        self.files.borrow_mut().push((current, total, relative_path.to_string()));
    }

    fn on_complete(&self, _result: &SyncResult) {
        self.completed.set(self.completed.get() + 1);
    }

    fn on_error(&self, message: &str) {
        self.errors.borrow_mut().push(message.to_string());
    }
}

#[derive(Default)]
struct MemoryStore {
    records: Mutex<Vec<String>>,
}

impl SyncStateStore for MemoryStore {
    fn record_sync(&self, pair_id: &str, _at: DateTime<Local>) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(pair_id.to_string());
        Ok(())
    }
}

#[test]
fn test_excluded_file_appears_in_no_list() {
    let fx = Fixture::new();
    fx.source_file("a.png", "a");
    fx.source_file("b.tmp", "b");
    let pair = FolderPair::new("art", &fx.source, &fx.target)
        .with_filter(FilterRule::new(vec![], vec!["*.tmp".into()]));

    let result = SyncEngine::new().sync_folder_pair(&pair, &SyncOptions::default(), &NoProgress);

    assert!(result.success);
    assert_eq!(result.copied, vec!["a.png"]);
    assert!(result.skipped.is_empty());
    assert!(result.errored.is_empty());
    assert_eq!(fx.target_listing(), vec!["a.png"]);
}

#[test]
fn test_mapping_rule_relocates_file() {
    let fx = Fixture::new();
    fx.source_file("raw/button_ok.png", "ok");
    fx.source_file("raw/hero.png", "hero");
    let pair = FolderPair::new("art", &fx.source, &fx.target).with_mapping(FileMappingRule::new("button_*", "ui/buttons"));

    let result = SyncEngine::new().sync_folder_pair(&pair, &sequential(), &NoProgress);

    assert_eq!(result.copied, vec!["raw/button_ok.png", "raw/hero.png"]);
    assert_eq!(fx.target_listing(), vec!["raw/hero.png", "ui/buttons/button_ok.png"]);
}

#[test]
fn test_rename_rule_changes_only_name() {
    let fx = Fixture::new();
    fx.source_file("icon.png", "icon");
    let pair = FolderPair::new("art", &fx.source, &fx.target).with_rename(FileRenameRule::new("icon.png", "icon_final.png"));

    SyncEngine::new().sync_folder_pair(&pair, &SyncOptions::default(), &NoProgress);

    assert_eq!(fx.target_listing(), vec!["icon_final.png"]);
    assert_eq!(fs::read_to_string(fx.target.join("icon_final.png")).unwrap(), "icon");
}

#[test]
fn test_rename_rule_cannot_escape_target() {
    let fx = Fixture::new();
    fx.source_file("icon.png", "icon");
    let pair = FolderPair::new("art", &fx.source, &fx.target).with_rename(FileRenameRule::new("icon.png", "../../escaped.png"));

    let result = SyncEngine::new().sync_folder_pair(&pair, &SyncOptions::default(), &NoProgress);

    assert!(result.success);
    assert_eq!(result.copied, vec!["icon.png"]);
    assert_eq!(fx.target_listing(), vec!["icon.png"]);
    assert!(!fx.target.join("../../escaped.png").exists());
}

#[test]
fn test_second_run_skips_everything() {
    let fx = Fixture::new();
    for name in ["a.png", "b.png", "ui/c.png"] {
        fx.source_file(name, name);
    }
    let pair = FolderPair::new("art", &fx.source, &fx.target);
    let engine = SyncEngine::new();

    let first = engine.sync_folder_pair(&pair, &SyncOptions::default(), &NoProgress);
    let second = engine.sync_folder_pair(&pair, &SyncOptions::default(), &NoProgress);

    assert_eq!(first.copied.len(), 3);
    assert!(second.copied.is_empty());
    assert_eq!(sorted(second.skipped), vec!["a.png", "b.png", "ui/c.png"]);
    assert_eq!(second.total_bytes, 0);
}

#[test]
fn test_staleness_uses_strictly_newer() {
    let fx = Fixture::new();
    let newer = fx.source_file("newer.png", "new");
    let same = fx.source_file("same.png", "same");
    let older = fx.source_file("older.png", "old");
    set_mtime(&newer, 2_000);
    set_mtime(&same, 2_000);
    set_mtime(&older, 1_000);
    for name in ["newer.png", "same.png", "older.png"] {
        let dest = fx.target_file(name, "existing");
        set_mtime(&dest, if name == "newer.png" { 1_000 } else { 2_000 });
    }
    let pair = FolderPair::new("art", &fx.source, &fx.target);
    let options = SyncOptions {
        create_backup: false,
        ..sequential()
    };

    let result = SyncEngine::new().sync_folder_pair(&pair, &options, &NoProgress);

    assert_eq!(result.copied, vec!["newer.png"]);
    assert_eq!(result.skipped, vec!["older.png", "same.png"]);
    assert_eq!(fs::read_to_string(fx.target.join("same.png")).unwrap(), "existing");

    let forced = SyncOptions {
        force_copy: true,
        ..options
    };
    let result = SyncEngine::new().sync_folder_pair(&pair, &forced, &NoProgress);
    assert_eq!(result.copied.len(), 3);
    assert_eq!(fs::read_to_string(fx.target.join("older.png")).unwrap(), "old");
}

#[test]
fn test_sequential_cancel_after_three_of_ten() {
    let fx = Fixture::new();
    for i in 0..10 {
        fx.source_file(&format!("file_{:02}.png", i), "x");
    }
    let pair = FolderPair::new("art", &fx.source, &fx.target);
    let engine = SyncEngine::new();
    let sink = CancelAfter {
        handle: engine.cancel_handle(),
        after: 3,
        seen: Cell::new(0),
        completed: Cell::new(false),
    };

    let result = engine.sync_folder_pair(&pair, &sequential(), &sink);

    assert!(result.cancelled);
    assert!(result.success);
    assert_eq!(result.total_files(), 3);
    assert_eq!(result.copied, vec!["file_00.png", "file_01.png", "file_02.png"]);
    assert_eq!(fx.target_listing().len(), 3);
    assert!(!sink.completed.get());
    assert_eq!(engine.phase(), SyncPhase::Cancelled);
}

#[test]
fn test_parallel_cancel_before_dispatch() {
    let fx = Fixture::new();
    for i in 0..8 {
        fx.source_file(&format!("{}.png", i), "x");
    }
    let pair = FolderPair::new("art", &fx.source, &fx.target);
    let engine = SyncEngine::new();

    let result = engine.sync_folder_pair(&pair, &SyncOptions::default(), &CancelOnStart(engine.cancel_handle()));

    assert!(result.cancelled);
    assert_eq!(result.total_files(), 0);
    assert!(fx.target_listing().is_empty());
}

#[test]
fn test_parallel_cancel_mid_run() {
    let fx = Fixture::new();
    let content = "x".repeat(256 * 1024);
    for i in 0..100 {
        fx.source_file(&format!("tile_{:03}.png", i), &content);
    }
    let pair = FolderPair::new("art", &fx.source, &fx.target);
    let engine = SyncEngine::new();
    let sink = CancelAfter {
        handle: engine.cancel_handle(),
        after: 2,
        seen: Cell::new(0),
        completed: Cell::new(false),
    };
    let options = SyncOptions {
        max_workers: 2,
        ..SyncOptions::default()
    };

    let result = engine.sync_folder_pair(&pair, &options, &sink);

    assert!(result.cancelled);
    assert!(!sink.completed.get());
    assert!(result.total_files() >= 2);
    assert!(result.total_files() < 100);

    // Every finished file is recorded once and nothing else reached the target
    let mut recorded = result.copied.clone();
    recorded.extend(result.skipped.clone());
    recorded.extend(result.errored.clone());
    let mut unique = sorted(recorded.clone());
    unique.dedup();
    assert_eq!(unique.len(), recorded.len());
    assert_eq!(fx.target_listing(), sorted(result.copied.clone()));
}

#[test]
fn test_parallel_copies_to_one_destination_do_not_collide() {
    let fx = Fixture::new();
    for folder in ["a", "b", "c", "d"] {
        fx.source_file(&format!("{}/icon.png", folder), folder);
    }
    let pair = FolderPair::new("art", &fx.source, &fx.target).with_mapping(FileMappingRule::new("icon.png", "ui"));
    let options = SyncOptions {
        force_copy: true,
        create_backup: false,
        max_workers: 4,
        ..SyncOptions::default()
    };
    let engine = SyncEngine::new();

    for _ in 0..25 {
        let result = engine.sync_folder_pair(&pair, &options, &NoProgress);
        assert!(result.errored.is_empty(), "errored: {:?}", result.errored);
        assert_eq!(result.copied.len(), 4);
    }

    assert_eq!(fx.target_listing(), vec!["ui/icon.png"]);
    let content = fs::read_to_string(fx.target.join("ui/icon.png")).unwrap();
    assert!(["a", "b", "c", "d"].contains(&content.as_str()));
}

#[test]
fn test_cancel_flag_resets_for_next_run() {
    let fx = Fixture::new();
    fx.source_file("a.png", "a");
    let pair = FolderPair::new("art", &fx.source, &fx.target);
    let engine = SyncEngine::new();

    engine.cancel();
    let result = engine.sync_folder_pair(&pair, &SyncOptions::default(), &NoProgress);

    assert!(!result.cancelled);
    assert_eq!(result.copied, vec!["a.png"]);
}

#[test]
fn test_parallel_run_covers_every_file() {
    let fx = Fixture::new();
    let mut expected = Vec::new();
    for i in 0..24 {
        let rel = format!("set_{}/tile_{:02}.png", i % 3, i);
        fx.source_file(&rel, &rel);
        expected.push(rel);
    }
    let pair = FolderPair::new("art", &fx.source, &fx.target);
    let events = Events::default();
    let options = SyncOptions {
        max_workers: 4,
        ..SyncOptions::default()
    };

    let result = SyncEngine::new().sync_folder_pair(&pair, &options, &events);

    assert!(result.success);
    assert_eq!(sorted(result.copied.clone()), sorted(expected.clone()));
    assert_eq!(fx.target_listing(), sorted(expected));
    let counters: Vec<usize> = events.files.borrow().iter().map(|(c, _, _)| *c).collect();
    assert_eq!(counters, (1..=24).collect::<Vec<_>>());
    assert_eq!(events.completed.get(), 1);
}

#[test]
fn test_blocked_destination_is_errored_and_run_continues() {
    let fx = Fixture::new();
    fx.source_file("a.png", "a");
    fx.source_file("b.png", "b");
    // A folder sits where a.png should land
    fs::create_dir_all(fx.target.join("a.png")).unwrap();
    let pair = FolderPair::new("art", &fx.source, &fx.target);
    let options = SyncOptions {
        force_copy: true,
        create_backup: false,
        ..sequential()
    };

    let result = SyncEngine::new().sync_folder_pair(&pair, &options, &NoProgress);

    assert!(!result.success);
    assert_eq!(result.errored, vec!["a.png"]);
    assert_eq!(result.copied, vec!["b.png"]);
    assert_eq!(result.total_files(), 2);
}

#[test]
fn test_backup_follows_pair_setting() {
    let fx = Fixture::new();
    fx.source_file("hero.png", "new");
    let dest = fx.target_file("hero.png", "old");
    set_mtime(&dest, 1_000);
    let mut pair = FolderPair::new("art", &fx.source, &fx.target);

    SyncEngine::new().sync_folder_pair(&pair, &sequential(), &NoProgress);
    let listing = fx.target_listing();
    assert_eq!(listing.len(), 2);
    assert!(listing[0].starts_with("backup/hero_"));
    assert_eq!(listing[1], "hero.png");

    // Pair-level switch wins over the run option
    fs::remove_dir_all(fx.target.join("backup")).unwrap();
    set_mtime(&dest, 1_000);
    pair.backup_enabled = false;
    let result = SyncEngine::new().sync_folder_pair(&pair, &sequential(), &NoProgress);
    assert_eq!(result.copied, vec!["hero.png"]);
    assert_eq!(fx.target_listing(), vec!["hero.png"]);
}

#[test]
fn test_dry_run_reports_without_writing() {
    let fx = Fixture::new();
    fx.source_file("a.png", "aaaa");
    fx.source_file("b.png", "bb");
    let pair = FolderPair::new("art", &fx.source, &fx.target);
    let store = Arc::new(MemoryStore::default());
    let engine = SyncEngine::with_store(store.clone());
    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };

    let result = engine.sync_folder_pair(&pair, &options, &NoProgress);

    assert!(result.success);
    assert_eq!(sorted(result.copied), vec!["a.png", "b.png"]);
    assert_eq!(result.total_bytes, 6);
    assert!(!fx.target.exists());
    assert!(store.records.lock().unwrap().is_empty());
}

#[test]
fn test_store_records_successful_runs_only() {
    let fx = Fixture::new();
    fx.source_file("a.png", "a");
    let good = FolderPair::new("art", &fx.source, &fx.target);
    let bad = FolderPair::new("gone", fx.source.join("missing"), &fx.target);
    let store = Arc::new(MemoryStore::default());
    let engine = SyncEngine::with_store(store.clone());

    engine.sync_folder_pair(&good, &SyncOptions::default(), &NoProgress);
    engine.sync_folder_pair(&bad, &SyncOptions::default(), &NoProgress);

    assert_eq!(*store.records.lock().unwrap(), vec![good.id.clone()]);
}

#[test]
fn test_multiple_pairs_keep_per_file_detail() {
    let fx = Fixture::new();
    fx.source_file("ui/ok.png", "ok");
    fx.source_file("ui/cancel.png", "cancel");
    fx.source_file("chars/hero.png", "hero");

    let ui = FolderPair::new("ui", fx.source.join("ui"), fx.target.join("ui"));
    let chars = FolderPair::new("chars", fx.source.join("chars"), fx.target.join("chars"));
    let broken = FolderPair::new("broken", fx.source.join("missing"), fx.target.join("broken"));
    let mut disabled = FolderPair::new("disabled", fx.source.join("ui"), fx.target.join("disabled"));
    disabled.enabled = false;

    let events = Events::default();
    let result = SyncEngine::new().sync_multiple_pairs(
        &[ui, broken, disabled, chars],
        &sequential(),
        &events,
    );

    assert!(!result.success);
    assert_eq!(result.failed_pairs(), 1);
    assert!(result.pair_errors[0].starts_with("broken: "));
    assert_eq!(result.copied, vec!["ui/cancel.png", "ui/ok.png", "chars/hero.png"]);
    assert!(!fx.target.join("disabled").exists());

    assert_eq!(*events.started.borrow(), vec![3]);
    assert_eq!(events.errors.borrow().len(), 1);
    assert_eq!(events.completed.get(), 1);
    assert_eq!(
        *events.files.borrow(),
        vec![
            (1, 3, "ui/cancel.png".to_string()),
            (2, 3, "ui/ok.png".to_string()),
            (3, 3, "chars/hero.png".to_string()),
        ]
    );
}

#[test]
fn test_multiple_pairs_stop_between_pairs_on_cancel() {
    let fx = Fixture::new();
    fx.source_file("one/a.png", "a");
    fx.source_file("two/b.png", "b");
    let one = FolderPair::new("one", fx.source.join("one"), fx.target.join("one"));
    let two = FolderPair::new("two", fx.source.join("two"), fx.target.join("two"));
    let engine = SyncEngine::new();
    let sink = CancelAfter {
        handle: engine.cancel_handle(),
        after: 1,
        seen: Cell::new(0),
        completed: Cell::new(false),
    };

    let result = engine.sync_multiple_pairs(&[one, two], &sequential(), &sink);

    assert!(result.cancelled);
    assert_eq!(result.copied, vec!["one/a.png"]);
    assert!(!fx.target.join("two").exists());
    assert!(!sink.completed.get());
}
