//! Sync engine for one-way folder pair synchronization.
//!
//! Drives scan → map → copy for one or many folder pairs, either on the
//! calling thread or on a bounded worker pool. Results and progress hooks are
//! always handled on the calling thread; workers only report outcomes back
//! over a channel.

use chrono::{DateTime, Local};
use rayon::ThreadPoolBuilder;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::sync::copier::{self, FileOutcome};
use crate::sync::error::SyncError;
use crate::sync::mapper::PathMapper;
use crate::sync::model::FolderPair;
use crate::sync::path_utils;
use crate::sync::scanner::DirectoryScanner;

/// Per-run sync settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Copy even when the destination is up to date.
    pub force_copy: bool,
    /// Back up destinations before overwriting them.
    pub create_backup: bool,
    /// Carry the source access/modification times over to the copy.
    pub preserve_timestamp: bool,
    /// Worker threads for copying. 1 runs on the calling thread.
    pub max_workers: usize,
    /// Report what would happen without writing anything.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force_copy: false,
            create_backup: true,
            preserve_timestamp: true,
            max_workers: 4,
            dry_run: false,
        }
    }
}

impl SyncOptions {
    /// Effective worker count, never below one.
    pub fn workers(&self) -> usize {
        self.max_workers.max(1)
    }
}

/// Outcome of a sync run.
#[derive(Debug, Clone)]
pub struct SyncResult {
    /// True when the run started and no file errored.
    pub success: bool,
    /// Relative paths written (or that would be, in a dry run).
    pub copied: Vec<String>,
    /// Relative paths already up to date.
    pub skipped: Vec<String>,
    /// Relative paths that failed.
    pub errored: Vec<String>,
    /// Bytes copied.
    pub total_bytes: u64,
    pub duration: Duration,
    pub completed_at: DateTime<Local>,
    /// The run stopped early because of a cancel request.
    pub cancelled: bool,
    /// Folder pairs that could not start, as `"<pair>: <reason>"`.
    pub pair_errors: Vec<String>,
}

impl SyncResult {
    fn empty() -> Self {
        Self {
            success: true,
            copied: Vec::new(),
            skipped: Vec::new(),
            errored: Vec::new(),
            total_bytes: 0,
            duration: Duration::ZERO,
            completed_at: Local::now(),
            cancelled: false,
            pair_errors: Vec::new(),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            pair_errors: vec![message],
            ..Self::empty()
        }
    }

    /// Number of files with an outcome.
    pub fn total_files(&self) -> usize {
        self.copied.len() + self.skipped.len() + self.errored.len()
    }

    /// Number of folder pairs that failed before copying anything.
    pub fn failed_pairs(&self) -> usize {
        self.pair_errors.len()
    }

    fn record(&mut self, relative_path: String, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Copied { bytes } => {
                self.total_bytes += bytes;
                self.copied.push(relative_path);
            }
            FileOutcome::Skipped => self.skipped.push(relative_path),
            FileOutcome::Errored => self.errored.push(relative_path),
        }
    }

    /// Fold a per-pair result into a batch result, prefixing its paths.
    fn absorb(&mut self, pair_name: &str, other: SyncResult) {
        let prefix = |path: String| format!("{}/{}", pair_name, path);
        self.copied.extend(other.copied.into_iter().map(prefix));
        self.skipped.extend(other.skipped.into_iter().map(prefix));
        self.errored.extend(other.errored.into_iter().map(prefix));
        self.total_bytes += other.total_bytes;
    }

    fn finish(&mut self, started: Instant, cancelled: bool) {
        self.cancelled = cancelled;
        self.success = self.errored.is_empty() && self.pair_errors.is_empty();
        self.duration = started.elapsed();
        self.completed_at = Local::now();
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Scanning,
    Copying,
    Completed,
    Cancelled,
    Failed,
}

/// Progress hooks, invoked synchronously on the thread that called the engine.
pub trait SyncProgress {
    fn on_start(&self, _total: usize) {}

    /// `current` counts completed files, starting at 1.
    fn on_file_progress(&self, _current: usize, _total: usize, _relative_path: &str, _outcome: FileOutcome) {}

    /// Not called for cancelled runs.
    fn on_complete(&self, _result: &SyncResult) {}

    fn on_error(&self, _message: &str) {}
}

/// Progress sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl SyncProgress for NoProgress {}

/// Receives the timestamp of each successful sync of a folder pair.
pub trait SyncStateStore: Send + Sync {
    fn record_sync(&self, pair_id: &str, at: DateTime<Local>) -> anyhow::Result<()>;
}

/// Cloneable handle that can cancel a running sync from any thread.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Would-copy or would-skip entry of a preview.
#[derive(Debug, Clone)]
pub struct PreviewEntry {
    pub relative_path: String,
    pub destination: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
    pub target_exists: bool,
}

/// What a sync with the same options would do, computed without writing.
#[derive(Debug, Clone, Default)]
pub struct SyncPreview {
    pub files_to_copy: Vec<PreviewEntry>,
    pub files_to_skip: Vec<PreviewEntry>,
    /// Relative paths a real sync would report as errored.
    pub files_with_errors: Vec<String>,
    /// Bytes that would be copied.
    pub total_size: u64,
}

impl SyncPreview {
    pub fn copy_count(&self) -> usize {
        self.files_to_copy.len()
    }

    pub fn skip_count(&self) -> usize {
        self.files_to_skip.len()
    }

    pub fn error_count(&self) -> usize {
        self.files_with_errors.len()
    }
}

/// One file ready for the copy stage.
struct Job {
    relative: String,
    source: PathBuf,
    destination: Result<PathBuf, SyncError>,
}

impl Job {
    fn run(&self, options: &SyncOptions) -> FileOutcome {
        match &self.destination {
            Ok(destination) => copier::sync_file(&self.source, destination, options),
            Err(e) => {
                warn!(file = %self.relative, error = %e, "cannot map destination");
                FileOutcome::Errored
            }
        }
    }
}

/// Rewrites per-pair progress into batch-wide progress.
struct BatchProgress<'a> {
    inner: &'a dyn SyncProgress,
    pair_name: &'a str,
    offset: usize,
    total: usize,
}

impl SyncProgress for BatchProgress<'_> {
    fn on_file_progress(&self, current: usize, _total: usize, relative_path: &str, outcome: FileOutcome) {
        let current = self.offset + current;
        self.inner.on_file_progress(
            current,
            self.total.max(current),
            &format!("{}/{}", self.pair_name, relative_path),
            outcome,
        );
    }
}

/// Sync engine for orchestrating folder pair syncs.
pub struct SyncEngine {
    cancelled: Arc<AtomicBool>,
    phase: Mutex<SyncPhase>,
    store: Option<Arc<dyn SyncStateStore>>,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngine {
    /// Create an engine that does not persist sync timestamps.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            phase: Mutex::new(SyncPhase::Idle),
            store: None,
        }
    }

    /// Create an engine that reports successful syncs to `store`.
    pub fn with_store(store: Arc<dyn SyncStateStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    /// Ask the current run to stop. Files already in flight still finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Sync one folder pair.
    ///
    /// Configuration problems are reported through `progress.on_error` and
    /// yield an unsuccessful result with no file outcomes.
    pub fn sync_folder_pair(
        &self,
        pair: &FolderPair,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> SyncResult {
        self.cancelled.store(false, Ordering::SeqCst);
        let started = Instant::now();
        info!(pair = %pair.name, source = %pair.source.display(), target = %pair.target.display(), "sync started");

        let mut result = match self.run_pair(pair, options, progress) {
            Ok(result) => result,
            Err(e) => {
                error!(pair = %pair.name, error = %e, "sync aborted");
                progress.on_error(&e.to_string());
                self.set_phase(SyncPhase::Failed);
                let mut result = SyncResult::failed(format!("{}: {}", pair.name, e));
                result.finish(started, false);
                return result;
            }
        };

        result.finish(started, self.is_cancelled());
        self.record_last_sync(pair, options, &result);
        self.finish_phase(&result);
        log_summary(&pair.name, &result);

        if !result.cancelled {
            progress.on_complete(&result);
        }
        result
    }

    /// Sync several folder pairs one after another. Disabled pairs are skipped.
    ///
    /// File paths in the combined result and in progress reports are prefixed
    /// with the pair's name. A pair that fails to start is counted in
    /// [`SyncResult::failed_pairs`] and the batch moves on.
    pub fn sync_multiple_pairs(
        &self,
        pairs: &[FolderPair],
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> SyncResult {
        self.cancelled.store(false, Ordering::SeqCst);
        let started = Instant::now();
        self.set_phase(SyncPhase::Scanning);

        let enabled: Vec<&FolderPair> = pairs.iter().filter(|pair| pair.enabled).collect();
        let total: usize = enabled.iter().map(|pair| count_candidates(pair)).sum();
        info!(pairs = enabled.len(), files = total, "batch sync started");
        progress.on_start(total);

        let mut combined = SyncResult::empty();
        let mut offset = 0;

        for pair in &enabled {
            if self.is_cancelled() {
                debug!("batch cancelled between pairs");
                break;
            }

            let batch = BatchProgress {
                inner: progress,
                pair_name: &pair.name,
                offset,
                total,
            };

            match self.run_pair(pair, options, &batch) {
                Ok(mut result) => {
                    result.finish(started, self.is_cancelled());
                    self.record_last_sync(pair, options, &result);
                    offset += result.total_files();
                    combined.absorb(&pair.name, result);
                }
                Err(e) => {
                    error!(pair = %pair.name, error = %e, "pair skipped");
                    let message = format!("{}: {}", pair.name, e);
                    progress.on_error(&message);
                    combined.pair_errors.push(message);
                }
            }
        }

        combined.finish(started, self.is_cancelled());
        if !combined.cancelled && !enabled.is_empty() && combined.failed_pairs() == enabled.len() {
            self.set_phase(SyncPhase::Failed);
        } else {
            self.finish_phase(&combined);
        }
        log_summary("batch", &combined);

        if !combined.cancelled {
            progress.on_complete(&combined);
        }
        combined
    }

    /// Classify every selected file as would-copy or would-skip without
    /// touching the filesystem. Files a real sync would fail on are listed
    /// separately. The target folder is not created.
    pub fn preview_sync(&self, pair: &FolderPair, options: &SyncOptions) -> Result<SyncPreview, SyncError> {
        prepare(pair, false)?;

        let mapper = PathMapper::new(&pair.mappings, &pair.renames);
        let scanner = DirectoryScanner::new(pair.filter.matcher());
        let mut preview = SyncPreview::default();

        for file in scanner.scan(&pair.source) {
            let relative = path_utils::relative_to(&file, &pair.source)
                .map(|rel| path_utils::to_slash(&rel))
                .unwrap_or_else(|_| file.display().to_string());
            let destination = match mapper.map(&file, &pair.source, &pair.target) {
                Ok(destination) => destination,
                Err(e) => {
                    debug!(file = %file.display(), error = %e, "preview cannot map file");
                    preview.files_with_errors.push(relative);
                    continue;
                }
            };
            let inspected = fs::metadata(&file).and_then(|meta| {
                copier::needs_copy(&meta, &destination, options.force_copy).map(|copy| (meta, copy))
            });
            let (meta, would_copy) = match inspected {
                Ok(inspected) => inspected,
                Err(e) => {
                    debug!(file = %file.display(), error = %e, "preview cannot inspect file");
                    preview.files_with_errors.push(relative);
                    continue;
                }
            };

            let entry = PreviewEntry {
                relative_path: relative,
                target_exists: destination.exists(),
                destination,
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Local>::from),
            };

            if would_copy {
                preview.total_size += entry.size;
                preview.files_to_copy.push(entry);
            } else {
                preview.files_to_skip.push(entry);
            }
        }

        Ok(preview)
    }

    /// Scan and copy one pair. Does not call `on_complete`.
    fn run_pair(
        &self,
        pair: &FolderPair,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<SyncResult, SyncError> {
        self.set_phase(SyncPhase::Scanning);
        prepare(pair, !options.dry_run)?;

        let mapper = PathMapper::new(&pair.mappings, &pair.renames);
        let scanner = DirectoryScanner::new(pair.filter.matcher());
        let jobs: Vec<Job> = scanner
            .scan(&pair.source)
            .map(|source| {
                let relative = path_utils::relative_to(&source, &pair.source)
                    .map(|rel| path_utils::to_slash(&rel))
                    .unwrap_or_else(|_| source.display().to_string());
                let destination = mapper.map(&source, &pair.source, &pair.target);
                Job {
                    relative,
                    source,
                    destination,
                }
            })
            .collect();

        let total = jobs.len();
        debug!(pair = %pair.name, files = total, "scan complete");
        progress.on_start(total);

        let mut result = SyncResult::empty();
        if total == 0 {
            return Ok(result);
        }

        let options = SyncOptions {
            create_backup: options.create_backup && pair.backup_enabled,
            ..options.clone()
        };

        self.set_phase(SyncPhase::Copying);
        if options.workers() == 1 {
            self.run_sequential(jobs, &options, progress, &mut result);
        } else {
            self.run_parallel(jobs, &options, progress, &mut result);
        }
        Ok(result)
    }

    fn run_sequential(
        &self,
        jobs: Vec<Job>,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
        result: &mut SyncResult,
    ) {
        let total = jobs.len();
        for (index, job) in jobs.into_iter().enumerate() {
            if self.is_cancelled() {
                debug!(remaining = total - index, "sync cancelled");
                break;
            }
            let outcome = job.run(options);
            progress.on_file_progress(index + 1, total, &job.relative, outcome);
            result.record(job.relative, outcome);
        }
    }

    fn run_parallel(
        &self,
        jobs: Vec<Job>,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
        result: &mut SyncResult,
    ) {
        let pool = match ThreadPoolBuilder::new()
            .num_threads(options.workers())
            .thread_name(|i| format!("assetsync-copy-{}", i))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                warn!(error = %e, "worker pool unavailable, copying sequentially");
                return self.run_sequential(jobs, options, progress, result);
            }
        };

        let total = jobs.len();
        let (tx, rx) = crossbeam_channel::unbounded::<(String, FileOutcome)>();

        for job in jobs {
            if self.is_cancelled() {
                break;
            }
            let tx = tx.clone();
            let cancelled = Arc::clone(&self.cancelled);
            let options = options.clone();
            pool.spawn(move || {
                if cancelled.load(Ordering::SeqCst) {
                    return;
                }
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| job.run(&options))) {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(file = %job.relative, "copy worker panicked");
                        FileOutcome::Errored
                    }
                };
                let _ = tx.send((job.relative, outcome));
            });
        }
        // Senders now live only in pending jobs; the loop ends with the last one
        drop(tx);

        for (completed, (relative, outcome)) in rx.iter().enumerate() {
            progress.on_file_progress(completed + 1, total, &relative, outcome);
            result.record(relative, outcome);
        }
    }

    fn record_last_sync(&self, pair: &FolderPair, options: &SyncOptions, result: &SyncResult) {
        if !result.success || result.cancelled || options.dry_run {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.record_sync(&pair.id, result.completed_at) {
                warn!(pair = %pair.name, error = %e, "failed to record sync time");
            }
        }
    }

    fn finish_phase(&self, result: &SyncResult) {
        self.set_phase(if result.cancelled {
            SyncPhase::Cancelled
        } else {
            SyncPhase::Completed
        });
    }
}

/// Validate a pair before any file is touched.
fn prepare(pair: &FolderPair, create_target: bool) -> Result<(), SyncError> {
    if !pair.source.exists() {
        return Err(SyncError::SourceNotFound {
            path: pair.source.clone(),
        });
    }
    if !pair.source.is_dir() {
        return Err(SyncError::SourceNotDirectory {
            path: pair.source.clone(),
        });
    }
    pair.check_paths()?;

    if create_target {
        fs::create_dir_all(&pair.target).map_err(|source| SyncError::TargetCreate {
            path: pair.target.clone(),
            source,
        })?;
    }
    Ok(())
}

/// Files a pair would scan right now, for upfront batch totals.
fn count_candidates(pair: &FolderPair) -> usize {
    if !is_dir(&pair.source) {
        return 0;
    }
    DirectoryScanner::new(pair.filter.matcher()).scan(&pair.source).count()
}

fn is_dir(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_dir()).unwrap_or(false)
}

fn log_summary(label: &str, result: &SyncResult) {
    info!(
        run = label,
        copied = result.copied.len(),
        skipped = result.skipped.len(),
        errored = result.errored.len(),
        bytes = result.total_bytes,
        cancelled = result.cancelled,
        elapsed_ms = result.duration.as_millis() as u64,
        "sync finished"
    );
}
