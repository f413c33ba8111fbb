//! File system watcher driving automatic re-sync.
//!
//! One `notify` watcher per auto-sync folder pair feeds a single bounded
//! queue. A consumer thread drains the queue and hands every event to the
//! registered listeners. Create and modify events are filtered by the pair's
//! patterns and debounced per path; delete events are passed through.

use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::sync::error::SyncError;
use crate::sync::model::FolderPair;
use crate::sync::pattern::PatternMatcher;

/// Repeat events for one path inside this window are dropped.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

const QUEUE_CAPACITY: usize = 1024;
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Type of file system change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
}

/// A change to one file under a watched folder pair.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// Absolute path of the changed file.
    pub path: PathBuf,
    /// Id of the folder pair whose source contains the file.
    pub pair_id: String,
    pub timestamp: DateTime<Local>,
}

/// Callback receiving delivered events on the consumer thread.
pub type Listener = Arc<dyn Fn(&WatchEvent) -> anyhow::Result<()> + Send + Sync>;

/// Token returned by [`ChangeWatcher::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listeners = Arc<Mutex<Vec<(ListenerId, Listener)>>>;

/// Suppresses repeat events for the same path within a time window.
#[derive(Debug)]
pub struct EventDebouncer {
    window: Duration,
    recent: Mutex<HashMap<PathBuf, Instant>>,
}

impl EventDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check if an event for `path` should be processed now.
    pub fn should_process(&self, path: &Path) -> bool {
        self.should_process_at(path, Instant::now())
    }

    /// Same as [`EventDebouncer::should_process`] with an explicit clock.
    /// A suppressed event does not extend the window.
    pub fn should_process_at(&self, path: &Path, now: Instant) -> bool {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = recent.get(path) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        recent.insert(path.to_path_buf(), now);
        true
    }

    /// Forget entries older than twice the window.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    pub fn sweep_at(&self, now: Instant) {
        let cutoff = self.window * 2;
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, last| now.saturating_duration_since(*last) <= cutoff);
    }

    pub fn len(&self) -> usize {
        self.recent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns raw `notify` events for one folder pair into queued [`WatchEvent`]s.
pub struct PairHandler {
    pair_id: String,
    matcher: PatternMatcher,
    debouncer: Arc<EventDebouncer>,
    /// Paths already reported through a `From`/`To` rename half. Some backends
    /// follow the halves with a `Both` event for the same rename.
    rename_halves: Mutex<HashMap<PathBuf, Instant>>,
    queue: Sender<WatchEvent>,
}

impl PairHandler {
    pub fn new(pair: &FolderPair, debounce: Duration, queue: Sender<WatchEvent>) -> Self {
        Self {
            pair_id: pair.id.clone(),
            matcher: pair.filter.matcher(),
            debouncer: Arc::new(EventDebouncer::new(debounce)),
            rename_halves: Mutex::new(HashMap::new()),
            queue,
        }
    }

    pub fn debouncer(&self) -> &Arc<EventDebouncer> {
        &self.debouncer
    }

    /// Classify, filter and enqueue one raw event. Returns how many
    /// [`WatchEvent`]s were queued.
    pub fn handle(&self, event: Event) -> usize {
        let mut changes = classify(&event);
        match &event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::To)) => {
                self.note_rename_halves(&event.paths);
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                changes.retain(|(_, path)| !self.take_rename_half(path));
            }
            _ => {}
        }

        let mut queued = 0;
        for (kind, path) in changes {
            if self.accept(kind, &path) && self.enqueue(kind, &path) {
                queued += 1;
            }
        }
        queued
    }

    fn note_rename_halves(&self, paths: &[PathBuf]) {
        let now = Instant::now();
        let keep = (self.debouncer.window() * 2).max(Duration::from_secs(1));
        let mut halves = self.rename_halves.lock().unwrap_or_else(|e| e.into_inner());
        // Halves older than twice the window are forgotten
        halves.retain(|_, seen| now.saturating_duration_since(*seen) <= keep);
        for path in paths {
            halves.insert(path.clone(), now);
        }
    }

    fn take_rename_half(&self, path: &Path) -> bool {
        self.rename_halves
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path)
            .is_some()
    }

    fn accept(&self, kind: WatchEventKind, path: &Path) -> bool {
        match kind {
            WatchEventKind::Created | WatchEventKind::Modified => {
                if !path.is_file() {
                    return false;
                }
                let name = match path.file_name() {
                    Some(name) => name.to_string_lossy(),
                    None => return false,
                };
                self.matcher.is_match(&name) && self.debouncer.should_process(path)
            }
            // The path is gone, so this only catches a folder recreated in between
            WatchEventKind::Deleted => !path.is_dir(),
        }
    }

    fn enqueue(&self, kind: WatchEventKind, path: &Path) -> bool {
        let event = WatchEvent {
            kind,
            path: path.to_path_buf(),
            pair_id: self.pair_id.clone(),
            timestamp: Local::now(),
        };
        match self.queue.send_timeout(event, ENQUEUE_TIMEOUT) {
            Ok(()) => {
                debug!(pair = %self.pair_id, path = %path.display(), ?kind, "change queued");
                true
            }
            Err(e) => {
                warn!(pair = %self.pair_id, path = %path.display(), error = %e, "dropping change event");
                false
            }
        }
    }
}

/// Map a raw event onto (kind, path) pairs. Renames become a delete of the
/// old path and a create of the new one.
fn classify(event: &Event) -> Vec<(WatchEventKind, PathBuf)> {
    let all = |kind: WatchEventKind| -> Vec<(WatchEventKind, PathBuf)> {
        event.paths.iter().map(|p| (kind, p.clone())).collect()
    };

    match &event.kind {
        EventKind::Create(_) => all(WatchEventKind::Created),
        EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Remove(_) => all(WatchEventKind::Deleted),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => all(WatchEventKind::Deleted),
            RenameMode::To => all(WatchEventKind::Created),
            RenameMode::Both => {
                let mut out = Vec::new();
                if let Some(from) = event.paths.first() {
                    out.push((WatchEventKind::Deleted, from.clone()));
                }
                if let Some(to) = event.paths.get(1) {
                    out.push((WatchEventKind::Created, to.clone()));
                }
                out
            }
            // Side unknown: decide by whether the path is still there
            _ => event
                .paths
                .iter()
                .map(|p| {
                    let kind = if p.exists() {
                        WatchEventKind::Created
                    } else {
                        WatchEventKind::Deleted
                    };
                    (kind, p.clone())
                })
                .collect(),
        },
        EventKind::Modify(_) => all(WatchEventKind::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Snapshot of watcher activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchStats {
    pub watchers: usize,
    pub queued_events: usize,
    pub listeners: usize,
}

struct PairWatch {
    pair_id: String,
    _watcher: RecommendedWatcher,
}

struct Running {
    watches: Vec<PairWatch>,
    queue: Receiver<WatchEvent>,
    shutdown: Option<Sender<()>>,
    done: Receiver<()>,
    consumer: Option<JoinHandle<()>>,
}

/// Watches the source folders of auto-sync pairs and notifies listeners.
pub struct ChangeWatcher {
    available: bool,
    debounce: Duration,
    listeners: Listeners,
    next_listener: AtomicU64,
    running: Option<Running>,
}

impl Default for ChangeWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeWatcher {
    /// Create a watcher, probing whether the platform can deliver events.
    pub fn new() -> Self {
        let available = RecommendedWatcher::new(|_: notify::Result<Event>| {}, Config::default()).is_ok();
        if !available {
            warn!("file watching is not available on this system");
        }
        Self {
            available,
            debounce: DEFAULT_DEBOUNCE,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(0),
            running: None,
        }
    }

    /// Use a different debounce window for pairs started afterwards.
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&WatchEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the listener was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Start watching every enabled auto-sync pair, replacing any previous
    /// watch set. Pairs whose source folder is missing or cannot be watched
    /// are skipped with a warning. Returns the number of pairs watched.
    pub fn start(&mut self, pairs: &[FolderPair]) -> Result<usize, SyncError> {
        if !self.available {
            return Err(SyncError::WatcherUnavailable);
        }
        self.stop();

        let (tx, rx) = bounded::<WatchEvent>(QUEUE_CAPACITY);
        let mut watches = Vec::new();
        let mut debouncers = Vec::new();

        for pair in pairs.iter().filter(|pair| pair.is_watched()) {
            if !pair.source.is_dir() {
                warn!(pair = %pair.name, source = %pair.source.display(), "source folder missing, not watching");
                continue;
            }
            let handler = PairHandler::new(pair, self.debounce, tx.clone());
            let debouncer = Arc::clone(handler.debouncer());

            match watch_pair(pair, handler) {
                Ok(watcher) => {
                    info!(pair = %pair.name, source = %pair.source.display(), "watching");
                    debouncers.push(debouncer);
                    watches.push(PairWatch {
                        pair_id: pair.id.clone(),
                        _watcher: watcher,
                    });
                }
                Err(e) => warn!(pair = %pair.name, error = %e, "cannot watch folder pair"),
            }
        }
        drop(tx);

        if watches.is_empty() {
            info!("no folder pairs to watch");
            return Ok(0);
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = bounded::<()>(1);
        let listeners = Arc::clone(&self.listeners);
        let queue = rx.clone();
        let window = self.debounce;

        let consumer = thread::Builder::new()
            .name("assetsync-watch".to_string())
            .spawn(move || {
                consume(&queue, &shutdown_rx, &listeners, &debouncers, window);
                let _ = done_tx.send(());
            })
            .map_err(|e| SyncError::io(e, "spawning", "watch consumer"))?;

        let count = watches.len();
        self.running = Some(Running {
            watches,
            queue: rx,
            shutdown: Some(shutdown_tx),
            done: done_rx,
            consumer: Some(consumer),
        });
        Ok(count)
    }

    /// Stop watching. Pending events are discarded. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        // Dropping the watchers ends event production
        running.watches.clear();
        drop(running.shutdown.take());

        match running.done.recv_timeout(STOP_TIMEOUT) {
            Ok(()) => {
                if let Some(handle) = running.consumer.take() {
                    let _ = handle.join();
                }
            }
            Err(_) => warn!("watch consumer did not stop in time, detaching"),
        }

        let dropped = running.queue.try_iter().count();
        info!(dropped, "stopped watching");
    }

    pub fn is_watching(&self) -> bool {
        self.running.is_some()
    }

    /// Ids of the folder pairs currently watched.
    pub fn watched_pairs(&self) -> Vec<String> {
        self.running
            .as_ref()
            .map(|running| running.watches.iter().map(|w| w.pair_id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn statistics(&self) -> WatchStats {
        let (watchers, queued_events) = self
            .running
            .as_ref()
            .map(|running| (running.watches.len(), running.queue.len()))
            .unwrap_or((0, 0));
        WatchStats {
            watchers,
            queued_events,
            listeners: self.lock_listeners().len(),
        }
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn unavailable() -> Self {
        let mut watcher = Self::new();
        watcher.available = false;
        watcher
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_pair(pair: &FolderPair, handler: PairHandler) -> Result<RecommendedWatcher, SyncError> {
    let watch_err = |source: notify::Error| SyncError::Watch {
        path: pair.source.clone(),
        source,
    };
    let pair_name = pair.name.clone();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                handler.handle(event);
            }
            Err(e) => warn!(pair = %pair_name, error = %e, "watch error"),
        },
        Config::default(),
    )
    .map_err(watch_err)?;
    watcher
        .watch(&pair.source, RecursiveMode::Recursive)
        .map_err(watch_err)?;
    Ok(watcher)
}

fn consume(
    queue: &Receiver<WatchEvent>,
    shutdown: &Receiver<()>,
    listeners: &Mutex<Vec<(ListenerId, Listener)>>,
    debouncers: &[Arc<EventDebouncer>],
    window: Duration,
) {
    let mut last_sweep = Instant::now();
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(queue) -> msg => match msg {
                Ok(event) => deliver(listeners, &event),
                Err(_) => break,
            },
            default(POLL_INTERVAL) => {}
        }

        if last_sweep.elapsed() >= window {
            for debouncer in debouncers {
                debouncer.sweep();
            }
            last_sweep = Instant::now();
        }
    }
    debug!("watch consumer exiting");
}

/// Call every listener with `event`. A failing or panicking listener does not
/// affect the others.
fn deliver(listeners: &Mutex<Vec<(ListenerId, Listener)>>, event: &WatchEvent) {
    let snapshot: Vec<Listener> = listeners
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .map(|(_, listener)| Arc::clone(listener))
        .collect();

    for listener in snapshot {
        match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(path = %event.path.display(), error = %e, "watch listener failed"),
            Err(_) => error!(path = %event.path.display(), "watch listener panicked"),
        }
    }
}
