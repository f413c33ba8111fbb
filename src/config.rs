//! Project files.
//!
//! A project is a TOML file listing folder pairs and their rules. The sync
//! engine only ever writes back `last_sync`, through the
//! [`SyncStateStore`] implementation on [`ProjectStore`].

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::sync::{FilterRule, FolderPair, SyncStateStore};

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A named set of folder pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "Local::now")]
    pub created_at: DateTime<Local>,
    #[serde(default = "Local::now")]
    pub updated_at: DateTime<Local>,
    #[serde(default)]
    pub folder_pairs: Vec<FolderPair>,
}

impl Project {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            id: new_id(),
            name: name.into(),
            description: description.into(),
            created_at: now,
            updated_at: now,
            folder_pairs: Vec::new(),
        }
    }

    /// Add a folder pair with the given filter patterns.
    ///
    /// Fails when the name is already taken or source and target resolve to
    /// the same folder.
    pub fn add_folder_pair(
        &mut self,
        name: &str,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        include: Vec<String>,
        exclude: Vec<String>,
    ) -> Result<&mut FolderPair> {
        if self.folder_pair_by_name(name).is_some() {
            bail!("folder pair '{}' already exists", name);
        }
        let pair = FolderPair::new(name, source, target).with_filter(FilterRule::new(include, exclude));
        pair.check_paths()?;

        info!(pair = %pair.name, id = %pair.id, "folder pair added");
        self.folder_pairs.push(pair);
        self.touch();
        let index = self.folder_pairs.len() - 1;
        Ok(&mut self.folder_pairs[index])
    }

    /// Edit the pair with `id` in place. The id cannot change. The edit is
    /// discarded when it would clash with another pair's name or point source
    /// and target at the same folder.
    pub fn update_folder_pair<F>(&mut self, id: &str, change: F) -> Result<&FolderPair>
    where
        F: FnOnce(&mut FolderPair),
    {
        let index = self
            .folder_pairs
            .iter()
            .position(|pair| pair.id == id)
            .with_context(|| format!("no folder pair with id {}", id))?;

        let mut edited = self.folder_pairs[index].clone();
        change(&mut edited);
        edited.id = id.to_string();

        if self.folder_pairs.iter().any(|pair| pair.id != id && pair.name == edited.name) {
            bail!("folder pair '{}' already exists", edited.name);
        }
        edited.check_paths()?;

        info!(pair = %edited.name, id, "folder pair updated");
        self.folder_pairs[index] = edited;
        self.touch();
        Ok(&self.folder_pairs[index])
    }

    /// Returns the removed pair, if any.
    pub fn remove_folder_pair(&mut self, id: &str) -> Option<FolderPair> {
        let index = self.folder_pairs.iter().position(|pair| pair.id == id)?;
        self.touch();
        Some(self.folder_pairs.remove(index))
    }

    pub fn folder_pair(&self, id: &str) -> Option<&FolderPair> {
        self.folder_pairs.iter().find(|pair| pair.id == id)
    }

    pub fn folder_pair_by_name(&self, name: &str) -> Option<&FolderPair> {
        self.folder_pairs.iter().find(|pair| pair.name == name)
    }

    /// Record a successful sync. Returns false for an unknown pair id.
    pub fn update_sync_timestamp(&mut self, id: &str, at: DateTime<Local>) -> bool {
        match self.folder_pairs.iter_mut().find(|pair| pair.id == id) {
            Some(pair) => {
                pair.last_sync = Some(at);
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Pairs the watcher should observe.
    pub fn auto_sync_pairs(&self) -> impl Iterator<Item = &FolderPair> {
        self.folder_pairs.iter().filter(|pair| pair.is_watched())
    }

    fn touch(&mut self) {
        self.updated_at = Local::now();
    }
}

/// Loads and saves one project file.
#[derive(Debug)]
pub struct ProjectStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ProjectStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<Project> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read project file {}", self.path.display()))?;
        let project: Project = toml::from_str(&content)
            .with_context(|| format!("failed to parse project file {}", self.path.display()))?;
        debug!(path = %self.path.display(), pairs = project.folder_pairs.len(), "project loaded");
        Ok(project)
    }

    /// Write the project through a temporary file so readers never see a
    /// half-written file.
    pub fn save(&self, project: &Project) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write(project)
    }

    /// Create a new project file. Refuses to overwrite an existing one.
    pub fn create(&self, name: &str, description: &str) -> Result<Project> {
        if self.exists() {
            bail!("project file {} already exists", self.path.display());
        }
        let project = Project::new(name, description);
        self.save(&project)?;
        info!(path = %self.path.display(), name, "project created");
        Ok(project)
    }

    /// Load, modify and save under the store's lock.
    pub fn update<F>(&self, change: F) -> Result<Project>
    where
        F: FnOnce(&mut Project) -> Result<()>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut project = self.load()?;
        change(&mut project)?;
        self.write(&project)?;
        Ok(project)
    }

    fn write(&self, project: &Project) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(project).context("failed to serialize project")?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace project file {}", self.path.display()))?;
        Ok(())
    }
}

impl SyncStateStore for ProjectStore {
    fn record_sync(&self, pair_id: &str, at: DateTime<Local>) -> Result<()> {
        self.update(|project| {
            if !project.update_sync_timestamp(pair_id, at) {
                bail!("folder pair {} is not in the project", pair_id);
            }
            Ok(())
        })?;
        Ok(())
    }
}
