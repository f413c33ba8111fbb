// Directory scanning for sync sources
// Walks a source tree and yields the regular files selected by a PatternMatcher

use jwalk::{Parallelism, WalkDir};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::pattern::PatternMatcher;

type WalkEntry = Result<jwalk::DirEntry<((), ())>, jwalk::Error>;

/// Lazily enumerates the files a folder pair would sync.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    matcher: PatternMatcher,
    recursive: bool,
}

impl DirectoryScanner {
    /// Create a recursive scanner using the given matcher
    pub fn new(matcher: PatternMatcher) -> Self {
        Self {
            matcher,
            recursive: true,
        }
    }

    /// Create a recursive scanner from raw include/exclude patterns
    pub fn from_patterns<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Self {
        Self::new(PatternMatcher::new(include, exclude))
    }

    /// Enable or disable descending into subdirectories
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Walk `root` and yield selected regular files in sorted order.
    ///
    /// Directories are never yielded and symlinks are not followed.
    /// Unreadable subtrees are skipped and the walk carries on with their
    /// siblings.
    pub fn scan<'a>(&'a self, root: &Path) -> impl Iterator<Item = PathBuf> + 'a {
        walker(root, self.recursive)
            .into_iter()
            .filter_map(move |entry| select(entry, &self.matcher))
    }

    /// Same as [`DirectoryScanner::scan`] but the iterator owns the scanner.
    pub fn into_scan(self, root: &Path) -> impl Iterator<Item = PathBuf> {
        let matcher = self.matcher;
        walker(root, self.recursive)
            .into_iter()
            .filter_map(move |entry| select(entry, &matcher))
    }
}

/// Scan `root` for files whose names pass the include/exclude patterns
pub fn scan<S: AsRef<str>>(
    root: &Path,
    include: &[S],
    exclude: &[S],
    recursive: bool,
) -> impl Iterator<Item = PathBuf> {
    DirectoryScanner::from_patterns(include, exclude)
        .recursive(recursive)
        .into_scan(root)
}

fn walker(root: &Path, recursive: bool) -> WalkDir {
    // Serial traversal keeps the yield order stable; the copy stage is
    // where parallelism pays off
    let walker = WalkDir::new(root)
        .parallelism(Parallelism::Serial)
        .sort(true)
        .skip_hidden(false)
        .follow_links(false);

    if recursive {
        walker
    } else {
        walker.max_depth(1)
    }
}

fn select(entry: WalkEntry, matcher: &PatternMatcher) -> Option<PathBuf> {
    match entry {
        Ok(entry) => {
            if !entry.file_type().is_file() {
                return None;
            }
            let name = entry.file_name().to_string_lossy();
            if matcher.is_match(&name) {
                Some(entry.path())
            } else {
                None
            }
        }
        Err(e) => {
            // Permission problems and races with deletions land here
            debug!(error = %e, "skipping unreadable entry");
            None
        }
    }
}
