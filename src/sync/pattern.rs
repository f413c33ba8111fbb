//! File name pattern matching for filter and mapping rules.
//!
//! A pattern is either a glob (`*.png`, `button_*`) or a regular expression
//! tagged with the `regex:` prefix. Regular expressions are searched
//! case-insensitively anywhere in the name; globs must match the whole name and
//! follow the platform's case rules (case-insensitive on Windows only).
//!
//! Patterns are always evaluated against a file's base name, never its path.

use globset::{GlobBuilder, GlobMatcher};
use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::error::SyncError;

/// Prefix that switches a pattern into regular expression mode.
pub const REGEX_PREFIX: &str = "regex:";

#[derive(Debug, Clone)]
enum Compiled {
    Glob(GlobMatcher),
    Regex(Regex),
}

/// A single compiled glob or regex pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    compiled: Compiled,
}

impl Pattern {
    /// Compile a pattern string.
    pub fn new(raw: &str) -> Result<Self, SyncError> {
        let compiled = match raw.strip_prefix(REGEX_PREFIX) {
            Some(expr) => RegexBuilder::new(expr)
                .case_insensitive(true)
                .build()
                .map(Compiled::Regex)
                .map_err(|e| SyncError::InvalidPattern {
                    pattern: raw.to_string(),
                    reason: e.to_string(),
                })?,
            None => GlobBuilder::new(raw)
                .case_insensitive(cfg!(windows))
                .literal_separator(false)
                .build()
                .map(|glob| Compiled::Glob(glob.compile_matcher()))
                .map_err(|e| SyncError::InvalidPattern {
                    pattern: raw.to_string(),
                    reason: e.to_string(),
                })?,
        };

        Ok(Self {
            raw: raw.to_string(),
            compiled,
        })
    }

    /// Compile a pattern, logging and discarding it when malformed.
    pub fn compile_or_warn(raw: &str) -> Option<Self> {
        match Self::new(raw) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(pattern = raw, error = %e, "ignoring malformed pattern");
                None
            }
        }
    }

    pub fn is_match(&self, file_name: &str) -> bool {
        match &self.compiled {
            Compiled::Glob(glob) => glob.is_match(file_name),
            Compiled::Regex(regex) => regex.is_match(file_name),
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self.compiled, Compiled::Regex(_))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Compiled include/exclude pattern lists.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    /// Whether any include pattern was configured, valid or not. A list made
    /// only of malformed includes must select nothing rather than everything.
    has_include: bool,
}

impl PatternMatcher {
    /// Compile both lists. Malformed patterns are logged once here and skipped.
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Self {
        Self {
            include: include
                .iter()
                .filter_map(|p| Pattern::compile_or_warn(p.as_ref()))
                .collect(),
            exclude: exclude
                .iter()
                .filter_map(|p| Pattern::compile_or_warn(p.as_ref()))
                .collect(),
            has_include: !include.is_empty(),
        }
    }

    /// A matcher that selects every file.
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Decide whether a file name is selected. Excludes always win.
    pub fn is_match(&self, file_name: &str) -> bool {
        if self.exclude.iter().any(|p| p.is_match(file_name)) {
            return false;
        }
        if !self.has_include {
            return true;
        }
        self.include.iter().any(|p| p.is_match(file_name))
    }

    pub fn include_patterns(&self) -> impl Iterator<Item = &str> {
        self.include.iter().map(Pattern::as_str)
    }

    pub fn exclude_patterns(&self) -> impl Iterator<Item = &str> {
        self.exclude.iter().map(Pattern::as_str)
    }
}

/// One-shot check of a file name against include and exclude lists.
pub fn matches<S: AsRef<str>>(file_name: &str, include: &[S], exclude: &[S]) -> bool {
    PatternMatcher::new(include, exclude).is_match(file_name)
}
