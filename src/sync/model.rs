//! Folder pair configuration and the rules attached to it.
//!
//! These records are owned by a project file and handed to the engine and the
//! watcher as read-only input. The only field the engine ever writes back is
//! `last_sync`, through [`crate::sync::SyncStateStore`].

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::error::SyncError;
use super::path_utils;
use super::pattern::PatternMatcher;

fn default_true() -> bool {
    true
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Include/exclude patterns applied to file names.
///
/// Patterns are globs unless prefixed with `regex:`. Excludes are checked
/// first; an empty include list selects everything not excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for FilterRule {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            enabled: true,
        }
    }
}

impl FilterRule {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include,
            exclude,
            enabled: true,
        }
    }

    /// Compile the rule. A disabled rule selects every file.
    pub fn matcher(&self) -> PatternMatcher {
        if self.enabled {
            PatternMatcher::new(&self.include, &self.exclude)
        } else {
            PatternMatcher::match_all()
        }
    }
}

/// Redirects files whose name matches `pattern` into `target_subpath` below
/// the pair's target root. The file name itself is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMappingRule {
    #[serde(default = "new_id")]
    pub id: String,
    pub pattern: String,
    pub target_subpath: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl FileMappingRule {
    pub fn new(pattern: impl Into<String>, target_subpath: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            pattern: pattern.into(),
            target_subpath: target_subpath.into(),
            description: String::new(),
            enabled: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Replaces the destination file name of a file whose name is exactly
/// `source_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRenameRule {
    pub source_name: String,
    pub target_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl FileRenameRule {
    pub fn new(source_name: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            target_name: target_name.into(),
            enabled: true,
        }
    }
}

/// A configured source → target mapping with its own filters and rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderPair {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    pub source: PathBuf,
    pub target: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_sync: bool,
    #[serde(default = "default_true")]
    pub backup_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Local>>,
    #[serde(default)]
    pub filter: FilterRule,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mappings: Vec<FileMappingRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub renames: Vec<FileRenameRule>,
}

impl FolderPair {
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            source: source.into(),
            target: target.into(),
            enabled: true,
            auto_sync: false,
            backup_enabled: true,
            last_sync: None,
            filter: FilterRule::default(),
            mappings: Vec::new(),
            renames: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: FilterRule) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_mapping(mut self, rule: FileMappingRule) -> Self {
        self.mappings.push(rule);
        self
    }

    pub fn with_rename(mut self, rule: FileRenameRule) -> Self {
        self.renames.push(rule);
        self
    }

    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    /// Source and target must not resolve to the same folder.
    pub fn check_paths(&self) -> Result<(), SyncError> {
        if path_utils::same_location(&self.source, &self.target) {
            return Err(SyncError::SamePath {
                path: path_utils::resolve(&self.source),
            });
        }
        Ok(())
    }

    /// Whether the watcher should observe this pair.
    pub fn is_watched(&self) -> bool {
        self.enabled && self.auto_sync
    }
}
