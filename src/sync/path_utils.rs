// Path helpers shared by the engine, the mapper and the project store
// Handles resolution of paths that may not exist yet and slash-normalized relative names

use std::path::{Component, Path, PathBuf};

use super::error::SyncError;

/// Canonicalize a path if it exists, otherwise make it absolute against the
/// current directory without touching the filesystem further.
pub fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Check whether two paths point at the same location once resolved.
pub fn same_location(a: &Path, b: &Path) -> bool {
    resolve(a) == resolve(b)
}

/// Path of `path` relative to `root`, or an error when it lies outside.
pub fn relative_to(path: &Path, root: &Path) -> Result<PathBuf, SyncError> {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .map_err(|_| SyncError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })
}

/// Render a relative path with `/` separators regardless of platform.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Turn a configured sub-path such as `ui/buttons` or `ui\buttons` into a
/// relative path. Empty, `.` and `..` segments and any root prefix are dropped
/// so the result always stays below the directory it is joined onto.
pub fn normalize_subpath(subpath: &str) -> PathBuf {
    subpath
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .filter(|segment| !(cfg!(windows) && segment.ends_with(':')))
        .collect()
}

/// True when `name` is a single file name that cannot leave the folder it is
/// placed in: not empty, not `.` or `..`, and free of path separators.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !(cfg!(windows) && name.contains(':'))
}
