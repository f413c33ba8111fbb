use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use crossbeam_channel::{bounded, select, unbounded};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use assetsync::config::{Project, ProjectStore};
use assetsync::logging::{self, LogConfig};
use assetsync::sync::{
    ChangeWatcher, FileMappingRule, FileOutcome, FileRenameRule, FolderPair, NoProgress, SyncEngine, SyncOptions,
    SyncPreview, SyncProgress, SyncResult,
};

#[derive(Parser)]
#[command(version, about = "Mirror selected game assets from an artist folder into a project asset tree")]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also write size-rotated log files into this folder
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new project file
    Init {
        project: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Add a folder pair to a project
    AddPair {
        project: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        target: PathBuf,
        /// Include pattern (glob, or `regex:` prefixed); repeatable
        #[arg(long)]
        include: Vec<String>,
        /// Exclude pattern; repeatable
        #[arg(long)]
        exclude: Vec<String>,
        /// Mapping rule as PATTERN=SUBPATH, e.g. `button_*=ui/buttons`; repeatable
        #[arg(long = "map")]
        mappings: Vec<String>,
        /// Rename rule as FROM=TO, e.g. `icon.png=icon_final.png`; repeatable
        #[arg(long = "rename")]
        renames: Vec<String>,
        /// Re-sync this pair automatically in `watch`
        #[arg(long)]
        auto_sync: bool,
        /// Never back up files this pair overwrites
        #[arg(long)]
        no_backup: bool,
    },

    /// Change settings of an existing folder pair
    EditPair {
        project: PathBuf,
        /// Pair to edit, by name
        #[arg(long)]
        name: String,
        #[command(flatten)]
        edits: PairEdits,
    },

    /// Remove a folder pair from a project
    RemovePair {
        project: PathBuf,
        #[arg(long)]
        name: String,
    },

    /// Sync folder pairs now
    Sync {
        project: PathBuf,
        /// Pair to sync, by name; repeatable. Defaults to every enabled pair
        #[arg(long = "pair")]
        pairs: Vec<String>,
        #[command(flatten)]
        flags: SyncFlags,
    },

    /// Show what a sync would copy and skip
    Preview {
        project: PathBuf,
        #[arg(long = "pair")]
        pairs: Vec<String>,
        /// Treat every file as out of date
        #[arg(long)]
        force: bool,
    },

    /// Watch auto-sync pairs and re-sync on change until Enter is pressed
    Watch {
        project: PathBuf,
        #[command(flatten)]
        flags: SyncFlags,
        /// Seconds to ignore repeat events for the same file
        #[arg(long, default_value_t = 2)]
        debounce: u64,
    },
}

#[derive(Args)]
struct SyncFlags {
    /// Copy even when the destination is up to date
    #[arg(long)]
    force: bool,
    /// Do not back up overwritten files
    #[arg(long)]
    no_backup: bool,
    /// Do not carry over modification times
    #[arg(long)]
    no_preserve_timestamp: bool,
    /// Copy worker threads; 1 copies in scan order
    #[arg(long, default_value_t = 4)]
    workers: usize,
    /// Report what would be copied without writing
    #[arg(long)]
    dry_run: bool,
}

/// Settings to change on a folder pair; anything left out stays as it is.
#[derive(Args)]
struct PairEdits {
    #[arg(long)]
    new_name: Option<String>,
    #[arg(long)]
    source: Option<PathBuf>,
    #[arg(long)]
    target: Option<PathBuf>,
    /// Replace the include patterns; repeatable
    #[arg(long)]
    include: Vec<String>,
    /// Replace the exclude patterns; repeatable
    #[arg(long)]
    exclude: Vec<String>,
    /// Replace the mapping rules, as PATTERN=SUBPATH; repeatable
    #[arg(long = "map")]
    mappings: Vec<String>,
    /// Replace the rename rules, as FROM=TO; repeatable
    #[arg(long = "rename")]
    renames: Vec<String>,
    /// Drop every pattern, mapping and rename rule before applying the above
    #[arg(long)]
    clear_rules: bool,
    #[arg(long)]
    enabled: Option<bool>,
    #[arg(long)]
    auto_sync: Option<bool>,
    #[arg(long)]
    backup: Option<bool>,
    /// Turn pattern filtering on or off without losing the patterns
    #[arg(long)]
    filter_enabled: Option<bool>,
}

impl PairEdits {
    fn apply(self, pair: &mut FolderPair, mappings: Vec<FileMappingRule>, renames: Vec<FileRenameRule>) {
        if self.clear_rules {
            pair.filter.include.clear();
            pair.filter.exclude.clear();
            pair.mappings.clear();
            pair.renames.clear();
        }
        if let Some(name) = self.new_name {
            pair.name = name;
        }
        if let Some(source) = self.source {
            pair.source = source;
        }
        if let Some(target) = self.target {
            pair.target = target;
        }
        if !self.include.is_empty() {
            pair.filter.include = self.include;
        }
        if !self.exclude.is_empty() {
            pair.filter.exclude = self.exclude;
        }
        if !mappings.is_empty() {
            pair.mappings = mappings;
        }
        if !renames.is_empty() {
            pair.renames = renames;
        }
        if let Some(enabled) = self.enabled {
            pair.enabled = enabled;
        }
        if let Some(auto_sync) = self.auto_sync {
            pair.auto_sync = auto_sync;
        }
        if let Some(backup) = self.backup {
            pair.backup_enabled = backup;
        }
        if let Some(filter_enabled) = self.filter_enabled {
            pair.filter.enabled = filter_enabled;
        }
    }
}

impl SyncFlags {
    fn options(&self) -> SyncOptions {
        SyncOptions {
            force_copy: self.force,
            create_backup: !self.no_backup,
            preserve_timestamp: !self.no_preserve_timestamp,
            max_workers: self.workers,
            dry_run: self.dry_run,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: cli.log_level.clone(),
        directory: cli.log_dir.clone(),
        ..LogConfig::default()
    };
    if let Err(e) = logging::init(&log_config) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        return ExitCode::FAILURE;
    }

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Returns false when the command ran but something failed along the way.
fn run(command: Command) -> Result<bool> {
    match command {
        Command::Init {
            project,
            name,
            description,
        } => {
            let store = ProjectStore::open(project);
            let created = store.create(&name, &description)?;
            println!("{} {} ({})", "Created".green().bold(), created.name, store.path().display());
            Ok(true)
        }
        Command::AddPair {
            project,
            name,
            source,
            target,
            include,
            exclude,
            mappings,
            renames,
            auto_sync,
            no_backup,
        } => {
            let mappings = parse_mappings(&mappings)?;
            let renames = parse_renames(&renames)?;

            let store = ProjectStore::open(project);
            store.update(|project| {
                let pair = project.add_folder_pair(&name, &source, &target, include, exclude)?;
                pair.auto_sync = auto_sync;
                pair.backup_enabled = !no_backup;
                pair.mappings = mappings;
                pair.renames = renames;
                Ok(())
            })?;
            println!("{} folder pair {}", "Added".green().bold(), name);
            Ok(true)
        }
        Command::EditPair { project, name, edits } => {
            let mappings = parse_mappings(&edits.mappings)?;
            let renames = parse_renames(&edits.renames)?;
            let store = ProjectStore::open(project);
            store.update(|project| {
                let id = pair_id_by_name(project, &name)?;
                project.update_folder_pair(&id, |pair| edits.apply(pair, mappings, renames))?;
                Ok(())
            })?;
            println!("{} folder pair {}", "Updated".green().bold(), name);
            Ok(true)
        }
        Command::RemovePair { project, name } => {
            let store = ProjectStore::open(project);
            store.update(|project| {
                let id = pair_id_by_name(project, &name)?;
                project.remove_folder_pair(&id);
                Ok(())
            })?;
            println!("{} folder pair {}", "Removed".green().bold(), name);
            Ok(true)
        }
        Command::Sync { project, pairs, flags } => sync(project, &pairs, &flags.options()),
        Command::Preview { project, pairs, force } => preview(project, &pairs, force),
        Command::Watch {
            project,
            flags,
            debounce,
        } => watch(project, &flags.options(), Duration::from_secs(debounce)),
    }
}

fn split_rule(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((left, right)) if !left.is_empty() && !right.is_empty() => Ok((left, right)),
        _ => bail!("expected LEFT=RIGHT, got '{}'", raw),
    }
}

fn parse_mappings(raw: &[String]) -> Result<Vec<FileMappingRule>> {
    raw.iter()
        .map(|raw| split_rule(raw).map(|(pattern, subpath)| FileMappingRule::new(pattern, subpath)))
        .collect()
}

fn parse_renames(raw: &[String]) -> Result<Vec<FileRenameRule>> {
    raw.iter()
        .map(|raw| split_rule(raw).map(|(from, to)| FileRenameRule::new(from, to)))
        .collect()
}

fn pair_id_by_name(project: &Project, name: &str) -> Result<String> {
    project
        .folder_pair_by_name(name)
        .map(|pair| pair.id.clone())
        .with_context(|| format!("no folder pair named '{}'", name))
}

/// Pairs named on the command line, or every enabled pair when none are.
fn select_pairs(project: &Project, names: &[String]) -> Result<Vec<FolderPair>> {
    if names.is_empty() {
        return Ok(project.folder_pairs.iter().filter(|pair| pair.enabled).cloned().collect());
    }
    names
        .iter()
        .map(|name| {
            project
                .folder_pair_by_name(name)
                .cloned()
                .with_context(|| format!("no folder pair named '{}'", name))
        })
        .collect()
}

fn sync(project_path: PathBuf, names: &[String], options: &SyncOptions) -> Result<bool> {
    let store = Arc::new(ProjectStore::open(project_path));
    let project = store.load()?;
    let pairs = select_pairs(&project, names)?;
    if pairs.is_empty() {
        println!("No enabled folder pairs in {}", project.name);
        return Ok(true);
    }

    let engine = SyncEngine::with_store(store);
    let progress = BarProgress::new();
    let result = match pairs.as_slice() {
        [pair] => engine.sync_folder_pair(pair, options, &progress),
        _ => engine.sync_multiple_pairs(&pairs, options, &progress),
    };
    progress.bar.finish_and_clear();

    print_summary(&result, options.dry_run);
    Ok(result.success)
}

fn preview(project_path: PathBuf, names: &[String], force: bool) -> Result<bool> {
    let project = ProjectStore::open(project_path).load()?;
    let options = SyncOptions {
        force_copy: force,
        ..SyncOptions::default()
    };
    let engine = SyncEngine::new();
    let mut ok = true;

    for pair in select_pairs(&project, names)? {
        match engine.preview_sync(&pair, &options) {
            Ok(preview) => print_preview(&pair, &preview),
            Err(e) => {
                ok = false;
                eprintln!("{} {}: {}", "error:".red().bold(), pair.name, e);
            }
        }
    }
    Ok(ok)
}

fn watch(project_path: PathBuf, options: &SyncOptions, debounce: Duration) -> Result<bool> {
    let store = Arc::new(ProjectStore::open(project_path));
    let mut project = store.load()?;

    let (changes_tx, changes_rx) = unbounded::<String>();
    let mut watcher = ChangeWatcher::new().with_debounce(debounce);
    watcher.add_listener(move |event| {
        debug!(path = %event.path.display(), kind = ?event.kind, "change detected");
        changes_tx
            .send(event.pair_id.clone())
            .context("sync loop has stopped")?;
        Ok(())
    });

    let watched = watcher.start(&project.folder_pairs)?;
    if watched == 0 {
        bail!("no enabled folder pairs have auto-sync turned on");
    }
    println!(
        "{} {} folder pair(s). Press Enter to stop.",
        "Watching".cyan().bold(),
        watched
    );

    let (stop_tx, stop_rx) = bounded::<()>(1);
    thread::spawn(move || {
        let mut line = String::new();
        let _ = io::stdin().read_line(&mut line);
        let _ = stop_tx.send(());
    });

    let engine = SyncEngine::with_store(store.clone());
    let mut ok = true;

    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(changes_rx) -> msg => {
                let Ok(first) = msg else { break };
                // Coalesce a burst of changes into one sync per pair
                let mut pending = BTreeSet::from([first]);
                pending.extend(changes_rx.try_iter());

                match store.load() {
                    Ok(latest) => project = latest,
                    Err(e) => warn!(error = %e, "could not reload project, using previous copy"),
                }

                for id in pending {
                    let Some(pair) = project.folder_pair(&id) else { continue };
                    let result = engine.sync_folder_pair(pair, options, &NoProgress);
                    ok &= result.success;
                    print_watch_line(pair, &result);
                }
            }
        }
    }

    watcher.stop();
    Ok(ok)
}

/// Progress bar sink for interactive runs.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }
}

impl SyncProgress for BarProgress {
    fn on_start(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_file_progress(&self, current: usize, total: usize, relative_path: &str, outcome: FileOutcome) {
        if self.bar.length() != Some(total as u64) {
            self.bar.set_length(total as u64);
        }
        self.bar.set_position(current as u64);
        self.bar.set_message(format!("{} {}", outcome.label(), relative_path));
    }

    fn on_complete(&self, _result: &SyncResult) {
        self.bar.finish_and_clear();
    }

    fn on_error(&self, message: &str) {
        self.bar.println(format!("{} {}", "error:".red().bold(), message));
    }
}

fn print_summary(result: &SyncResult, dry_run: bool) {
    let heading = if result.cancelled {
        "Sync cancelled".yellow().bold()
    } else if result.success {
        "Sync complete".green().bold()
    } else {
        "Sync finished with errors".red().bold()
    };
    println!("{}{}", heading, if dry_run { " (dry run)" } else { "" });
    println!(
        "  copied:  {} ({})",
        result.copied.len(),
        format_size(result.total_bytes, BINARY)
    );
    println!("  skipped: {}", result.skipped.len());
    println!("  errors:  {}", result.errored.len());
    for path in &result.errored {
        println!("    {}", path.red());
    }
    for message in &result.pair_errors {
        println!("  {} {}", "failed:".red().bold(), message);
    }
    println!("  time:    {:.2}s", result.duration.as_secs_f64());
}

fn print_preview(pair: &FolderPair, preview: &SyncPreview) {
    println!(
        "{} {} copy, {} skip, {} error, {}",
        pair.name.bold(),
        preview.copy_count(),
        preview.skip_count(),
        preview.error_count(),
        format_size(preview.total_size, BINARY)
    );
    for entry in &preview.files_to_copy {
        let marker = if entry.target_exists { "update".yellow() } else { "new".green() };
        println!(
            "  {:>6} {} -> {} ({})",
            marker,
            entry.relative_path,
            entry.destination.display(),
            format_size(entry.size, BINARY)
        );
    }
    for entry in &preview.files_to_skip {
        println!("  {:>6} {}", "skip".dimmed(), entry.relative_path);
    }
    for path in &preview.files_with_errors {
        println!("  {:>6} {}", "error".red(), path);
    }
}

fn print_watch_line(pair: &FolderPair, result: &SyncResult) {
    let status = if result.success { "synced".green() } else { "failed".red() };
    println!(
        "[{}] {} {}: {} copied, {} skipped, {} errors",
        result.completed_at.format("%H:%M:%S"),
        status,
        pair.name,
        result.copied.len(),
        result.skipped.len(),
        result.errored.len() + result.failed_pairs()
    );
}
