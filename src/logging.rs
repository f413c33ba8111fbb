//! Logging setup for the command line front end.
//!
//! Log lines go to stderr and, when a log directory is configured, to
//! `assetsync.log` in that directory. The file is rotated once it grows past
//! a size limit, keeping a fixed number of older files next to it.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Name of the active log file.
pub const LOG_FILE_NAME: &str = "assetsync.log";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set, e.g. `info` or
    /// `assetsync=debug`.
    pub level: String,
    /// Folder for the log file. No file is written when unset.
    pub directory: Option<PathBuf>,
    /// Rotate the file after it exceeds this many megabytes.
    pub max_size_mb: u64,
    /// Files kept in total, the active one included.
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            max_size_mb: 10,
            max_files: 5,
        }
    }
}

impl LogConfig {
    /// Per-user log folder, e.g. `~/.local/share/assetsync/logs` on Linux.
    pub fn default_directory() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("assetsync").join("logs"))
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `config.level`.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("invalid log level: {}", config.level))?,
    };

    let file_layer = match &config.directory {
        Some(dir) => {
            let writer = RotatingFileWriter::new(dir, config.max_size_mb * 1024 * 1024, config.max_files)
                .with_context(|| format!("failed to open log file in {}", dir.display()))?;
            Some(fmt::layer().with_writer(writer).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(file_layer)
        .try_init()
        .context("logging is already initialized")?;

    Ok(())
}

/// Size-rotated log file usable as a `tracing_subscriber` writer.
///
/// `assetsync.log` is renamed to `assetsync.log.1` when full, `.1` moves to
/// `.2` and so on; the oldest file beyond `max_files` is dropped.
#[derive(Debug, Clone)]
pub struct RotatingFileWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

#[derive(Debug)]
struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
    file: Option<File>,
    written: u64,
}

impl RotatingFileWriter {
    pub fn new(dir: &Path, max_bytes: u64, max_files: usize) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);
        let (file, written) = open_append(&path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(RotatingFile {
                path,
                max_bytes: max_bytes.max(1),
                max_files: max_files.max(1),
                file: Some(file),
                written,
            })),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RotatingFile> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RotatingFile {
    fn rotated(&self, index: usize) -> PathBuf {
        self.path.with_file_name(format!("{}.{}", LOG_FILE_NAME, index))
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file = None;

        if self.max_files > 1 {
            let oldest = self.rotated(self.max_files - 1);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for index in (1..self.max_files - 1).rev() {
                let from = self.rotated(index);
                if from.exists() {
                    fs::rename(&from, self.rotated(index + 1))?;
                }
            }
            fs::rename(&self.path, self.rotated(1))?;
        } else {
            fs::remove_file(&self.path)?;
        }

        let (file, written) = open_append(&self.path)?;
        self.file = Some(file);
        self.written = written;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok((file, len))
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        if inner.written > 0 && inner.written + buf.len() as u64 > inner.max_bytes {
            inner.rotate()?;
        }
        let file = match inner.file.as_mut() {
            Some(file) => file,
            None => return Err(io::Error::other("log file is not open")),
        };
        file.write_all(buf)?;
        inner.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
