//! Folder pair synchronization
//!
//! This module selects files by name pattern, maps them to their destination,
//! copies what is stale and watches source folders for further changes.

pub mod copier;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod model;
pub mod path_utils;
pub mod pattern;
pub mod scanner;
pub mod watcher;

pub use copier::{sync_file, FileOutcome};
pub use engine::{
    CancelHandle, NoProgress, PreviewEntry, SyncEngine, SyncOptions, SyncPhase, SyncPreview, SyncProgress,
    SyncResult, SyncStateStore,
};
pub use error::SyncError;
pub use mapper::{map_destination, PathMapper};
pub use model::{FileMappingRule, FileRenameRule, FilterRule, FolderPair};
pub use pattern::{matches, Pattern, PatternMatcher};
pub use scanner::{scan, DirectoryScanner};
pub use watcher::{ChangeWatcher, EventDebouncer, ListenerId, PairHandler, WatchEvent, WatchEventKind, WatchStats};
