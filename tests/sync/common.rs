// Shared fixtures for sync tests

use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct Fixture {
    _dir: TempDir,
    pub source: PathBuf,
    pub target: PathBuf,
}

impl Fixture {
    /// Empty source folder; the target folder is not created.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("art");
        let target = dir.path().join("game").join("assets");
        fs::create_dir_all(&source).unwrap();
        Self {
            _dir: dir,
            source,
            target,
        }
    }

    pub fn source_file(&self, relative: &str, content: &str) -> PathBuf {
        write(&self.source.join(relative), content)
    }

    pub fn target_file(&self, relative: &str, content: &str) -> PathBuf {
        write(&self.target.join(relative), content)
    }

    /// Every file under the target, relative and slash separated, sorted.
    pub fn target_listing(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.target.exists() {
            collect(&self.target, &self.target, &mut out);
        }
        out.sort();
        out
    }
}

pub fn write(path: &Path, content: &str) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
    path.to_path_buf()
}

pub fn set_mtime(path: &Path, unix_seconds: i64) {
    set_file_mtime(path, FileTime::from_unix_time(unix_seconds, 0)).unwrap();
}

pub fn sorted(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<String>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(root, &path, out);
        } else {
            let rel = path.strip_prefix(root).unwrap();
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}
