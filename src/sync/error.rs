//! Error types for sync and watch operations.
//!
//! Configuration problems stop a run before any file is touched. Everything
//! that goes wrong for a single file is recorded on the result instead of
//! being returned through these types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source folder does not exist: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("source is not a folder: {}", path.display())]
    SourceNotDirectory { path: PathBuf },

    #[error("source and target resolve to the same folder: {}", path.display())]
    SamePath { path: PathBuf },

    #[error("failed to create target folder {}: {source}", path.display())]
    TargetCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not inside {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("I/O error while {operation} {}: {source}", path.display())]
    Io {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("file watching is not available on this system")]
    WatcherUnavailable,

    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

impl SyncError {
    /// Wrap an I/O error with the operation and path it happened on.
    pub fn io(source: io::Error, operation: &'static str, path: impl Into<PathBuf>) -> Self {
        SyncError::Io {
            path: path.into(),
            operation,
            source,
        }
    }

    /// True for errors that prevent a run from starting at all.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SyncError::SourceNotFound { .. }
                | SyncError::SourceNotDirectory { .. }
                | SyncError::SamePath { .. }
                | SyncError::TargetCreate { .. }
        )
    }
}
