//! Destination path computation.
//!
//! A file keeps its position relative to the source root unless a mapping
//! rule moves it into another sub-directory of the target root. A rename rule
//! can then replace the final file name. No filesystem access happens here.

use std::path::{Path, PathBuf};
use tracing::warn;

use super::error::SyncError;
use super::model::{FileMappingRule, FileRenameRule};
use super::path_utils;
use super::pattern::Pattern;

/// Compiled mapping and rename rules for one folder pair.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    /// Enabled mapping rules in configured order, with their target sub-path.
    mappings: Vec<(Pattern, PathBuf)>,
    /// Enabled rename rules in configured order, as (source name, target name).
    renames: Vec<(String, String)>,
}

impl PathMapper {
    /// Compile the rules. Disabled rules, malformed mapping patterns and rename
    /// targets that are not a plain file name are dropped up front; order is
    /// otherwise preserved exactly.
    pub fn new(mappings: &[FileMappingRule], renames: &[FileRenameRule]) -> Self {
        Self {
            mappings: mappings
                .iter()
                .filter(|rule| rule.enabled)
                .filter_map(|rule| {
                    Pattern::compile_or_warn(&rule.pattern)
                        .map(|pattern| (pattern, path_utils::normalize_subpath(&rule.target_subpath)))
                })
                .collect(),
            renames: renames
                .iter()
                .filter(|rule| rule.enabled)
                .filter(|rule| {
                    let plain = path_utils::is_plain_file_name(&rule.target_name);
                    if !plain {
                        warn!(from = %rule.source_name, to = %rule.target_name, "ignoring rename to a non file name");
                    }
                    plain
                })
                .map(|rule| (rule.source_name.clone(), rule.target_name.clone()))
                .collect(),
        }
    }

    /// Compute where `source_file` lands under `target_root`.
    pub fn map(
        &self,
        source_file: &Path,
        source_root: &Path,
        target_root: &Path,
    ) -> Result<PathBuf, SyncError> {
        let relative = path_utils::relative_to(source_file, source_root)?;
        let file_name = match source_file.file_name() {
            Some(name) => name,
            None => {
                return Err(SyncError::OutsideRoot {
                    path: source_file.to_path_buf(),
                    root: source_root.to_path_buf(),
                })
            }
        };
        let name = file_name.to_string_lossy();

        // First matching mapping rule moves the file, keeping its name
        let mut destination = match self.mappings.iter().find(|(pattern, _)| pattern.is_match(&name)) {
            Some((_, subpath)) => target_root.join(subpath).join(file_name),
            None => target_root.join(relative),
        };

        // First matching rename rule swaps only the final component
        if let Some((_, target_name)) = self.renames.iter().find(|(source_name, _)| source_name.as_str() == &*name) {
            destination.set_file_name(target_name);
        }

        Ok(destination)
    }
}

/// One-shot destination computation for a single file.
pub fn map_destination(
    source_file: &Path,
    source_root: &Path,
    target_root: &Path,
    mappings: &[FileMappingRule],
    renames: &[FileRenameRule],
) -> Result<PathBuf, SyncError> {
    PathMapper::new(mappings, renames).map(source_file, source_root, target_root)
}
