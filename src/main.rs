// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Taxis: local AI-assisted file categorizer
//!
//! Scans a directory, proposes a category for every file and moves the
//! selected files into per-category folders.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use taxis::config::AppConfig;
use taxis::db::SessionStore;
use taxis::descriptor::scan_directory;
use taxis::history::MoveJournal;
use taxis::ollama::OllamaClient;
use taxis::outcome::{CategorizationState, DecisionSource};
use taxis::pipeline::{ApplyResult, Pipeline, PipelineEvent, ResumedSession, SessionRun};
use taxis::relocation::{MoveProgress, RelocationReport};
use taxis::settings::SettingsStore;
use taxis::watcher::{collect_batch, wait_for_stable, FileWatcher};
use taxis::{Result, TaxisError};

/// Taxis CLI - local AI-assisted file categorizer
#[derive(Parser, Debug)]
#[command(name = "taxis")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Sort files into categories with rules and a local model", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the files a categorization run would look at
    Scan {
        directory: PathBuf,

        #[arg(short, long)]
        recursive: bool,
    },

    /// Categorize a directory and store the proposed moves as a session
    Categorize {
        directory: PathBuf,

        #[arg(short, long)]
        recursive: bool,

        /// Never contact the model server
        #[arg(long)]
        offline: bool,

        /// Where category folders are created (default: the scanned directory)
        #[arg(short, long)]
        base: Option<PathBuf>,

        /// Move the selected files right away
        #[arg(long)]
        apply: bool,

        /// With --apply, only show what would be moved
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the outcomes and plans of a session (default: the last unfinished one)
    Plans {
        session: Option<String>,
    },

    /// Change which plans of a session are selected
    Select {
        session: String,

        /// Toggle the plan at this index (repeatable)
        #[arg(short, long, conflicts_with_all = ["all", "none"])]
        index: Vec<usize>,

        /// Select every plan
        #[arg(long, conflicts_with = "none")]
        all: bool,

        /// Deselect every plan
        #[arg(long)]
        none: bool,
    },

    /// Execute the selected plans of a session (default: the last unfinished one)
    Apply {
        session: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },

    /// List recent sessions
    Sessions {
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Remove sessions not touched for this many days (default: database.retention_days)
        #[arg(long, value_name = "DAYS", num_args = 0..=1)]
        cleanup: Option<Option<u32>>,
    },

    /// Move history and undo operations
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },

    /// Watch directories and categorize files as they arrive
    Watch {
        /// Directories to watch (overrides settings)
        #[arg(short, long)]
        dir: Vec<PathBuf>,

        /// Move confidently categorized files immediately
        #[arg(long)]
        apply: bool,

        /// Skip model server health check on startup
        #[arg(long)]
        skip_health_check: bool,

        #[arg(short, long)]
        recursive: bool,
    },

    /// Watched-directory settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },

    /// List the active categories
    Categories,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show model server and store status
    Status,

    /// Initialize a new Taxis project
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recent moves
    List {
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Move recent files back
    Undo {
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Dry run (show what would be undone)
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear all history
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCommands {
    Show,
    AddDir { directory: PathBuf },
    RemoveDir { directory: PathBuf },
    /// Turn directory watching on
    Enable,
    /// Turn directory watching off
    Disable,
    /// Categorize arrivals automatically
    AutoCategorize {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)?;
    let format = cli.format.as_str();

    match cli.command {
        Commands::Scan { directory, recursive } => run_scan(config, &directory, recursive, format),
        Commands::Categorize { directory, recursive, offline, base, apply, dry_run } => {
            run_categorize(config, &directory, recursive, offline, base, apply, dry_run, format).await
        }
        Commands::Plans { session } => run_plans(config, session, format).await,
        Commands::Select { session, index, all, none } => run_select(config, &session, index, all, none),
        Commands::Apply { session, dry_run } => run_apply(config, session, dry_run, format).await,
        Commands::Sessions { limit, cleanup } => run_sessions(config, limit, cleanup, format),
        Commands::History { action } => run_history_command(config, action, format),
        Commands::Watch { dir, apply, skip_health_check, recursive } => {
            run_watch(config, dir, apply, skip_health_check, recursive).await
        }
        Commands::Settings { action } => run_settings_command(config, action, format),
        Commands::Categories => run_categories(config, format),
        Commands::Config { action } => run_config_command(config, action, &cli.config),
        Commands::Status => run_status(config).await,
        Commands::Init { dir, force } => run_init(dir, force),
    }
}

/// Print `items` in the requested format, using `line` for text output
fn emit<T, F>(format: &str, items: &[T], line: F) -> Result<()>
where
    T: Serialize,
    F: Fn(&T) -> String,
{
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(items)?),
        "jsonl" => {
            for item in items {
                println!("{}", serde_json::to_string(item)?);
            }
        }
        _ => {
            for item in items {
                println!("{}", line(item));
            }
        }
    }
    Ok(())
}

fn run_scan(config: AppConfig, directory: &Path, recursive: bool, format: &str) -> Result<()> {
    let recursive = recursive || config.scan.include_subdirectories;
    let files = scan_directory(directory, recursive, &config.scan)?;

    emit(format, &files, |f| {
        format!("{:>10}  {:<12}  {}", f.size_formatted(), f.kind().display_name(), f.path.display())
    })?;
    if format == "text" {
        println!("\n{} files", files.len());
    }
    Ok(())
}

/// Log pipeline progress until the sender side goes away
fn spawn_progress_logger() -> mpsc::UnboundedSender<PipelineEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::State(CategorizationState::CategorizingFiles { progress, current_file }) => {
                    debug!("[{:>3.0}%] {}", progress * 100.0, current_file)
                }
                PipelineEvent::State(CategorizationState::Failed(e)) => error!("{}", e),
                PipelineEvent::State(state) => debug!("{}", state.describe()),
                PipelineEvent::Scanned { total } => debug!("Scanned {} files", total),
                PipelineEvent::Partial(outcomes) => info!("Categorized {} files so far", outcomes.len()),
                PipelineEvent::Move(MoveProgress::MoveFailed { file_name, error }) => {
                    warn!("Failed to move {}: {}", file_name, error)
                }
                PipelineEvent::Move(progress) => debug!("{:?}", progress),
            }
        }
    });

    tx
}

#[allow(clippy::too_many_arguments)]
async fn run_categorize(
    mut config: AppConfig,
    directory: &Path,
    recursive: bool,
    offline: bool,
    base: Option<PathBuf>,
    apply: bool,
    dry_run: bool,
    format: &str,
) -> Result<()> {
    config.categorization.offline |= offline;
    let recursive = recursive || config.scan.include_subdirectories;

    let pipeline = Pipeline::from_config(config)?.with_events(spawn_progress_logger());
    let run = pipeline.run_session(directory, recursive, base.as_deref()).await?;
    print_run(&run, format)?;

    if apply {
        if let Some(id) = &run.session_id {
            let result = pipeline.apply_session(id, dry_run).await?;
            print_apply(&result, format)?;
        }
    }
    Ok(())
}

fn print_run(run: &SessionRun, format: &str) -> Result<()> {
    emit(format, &run.outcomes, |o| {
        format!(
            "{:<40} {:<14} {:>4.0}%  {}",
            o.descriptor.name,
            o.category.name,
            o.confidence * 100.0,
            o.reasoning
        )
    })?;

    if format == "text" {
        let selected = run.plans.iter().filter(|p| p.selected).count();
        println!(
            "\n{} files categorized, {} moves selected",
            run.outcomes.len(),
            selected
        );
        if let Some(id) = &run.session_id {
            println!("Session: {}", id);
        }
    }
    Ok(())
}

fn print_apply(result: &ApplyResult, format: &str) -> Result<()> {
    match result {
        ApplyResult::Preview(moves) => emit(format, moves, |(from, to)| {
            format!("Would move: {} -> {}", from.display(), to.display())
        }),
        ApplyResult::Executed(report) => print_report(report, format),
    }
}

fn print_report(report: &RelocationReport, format: &str) -> Result<()> {
    if format != "text" {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for (from, to) in &report.moved {
        println!("Moved: {} -> {}", from.display(), to.display());
    }
    for e in &report.errors {
        println!("Failed: {}", e);
    }
    println!(
        "\n{} moved, {} failed, {} skipped ({} directories created) in {:.1}s",
        report.successful_moves,
        report.failed_moves,
        report.skipped_moves,
        report.created_directories.len(),
        report.duration.as_secs_f64()
    );
    Ok(())
}

/// The given session, or the most recent one that is not completed
fn resolve_session(store: &SessionStore, session: Option<String>) -> Result<String> {
    match session {
        Some(id) => Ok(id),
        None => store
            .last_open_session()?
            .map(|s| s.id)
            .ok_or_else(|| TaxisError::SessionNotFound("no open session".to_string())),
    }
}

/// One row of `taxis plans`
#[derive(Serialize)]
struct PlanRow<'a> {
    index: usize,
    executed: bool,
    selected: bool,
    category: &'a str,
    source: Option<DecisionSource>,
    confidence: f64,
    reasoning: &'a str,
    from: &'a Path,
    to: PathBuf,
}

fn plan_rows(resumed: &ResumedSession) -> Vec<PlanRow<'_>> {
    resumed
        .plans
        .iter()
        .map(|stored| {
            let outcome = resumed.outcomes.get(stored.index);
            PlanRow {
                index: stored.index,
                executed: stored.executed,
                selected: stored.plan.selected,
                category: &stored.plan.category_name,
                source: outcome.map(|o| o.source),
                confidence: stored.plan.confidence,
                reasoning: outcome.map_or(stored.plan.reasoning.as_str(), |o| o.reasoning.as_str()),
                from: &stored.plan.source,
                to: stored.plan.destination(),
            }
        })
        .collect()
}

async fn run_plans(mut config: AppConfig, session: Option<String>, format: &str) -> Result<()> {
    config.categorization.offline = true;
    let pipeline = Pipeline::from_config(config)?;
    let resumed = pipeline.resume_session(session.as_deref()).await?;

    if format == "text" {
        println!("Session {} ({})\n", resumed.session.id, resumed.session.directory.display());
    }
    emit(format, &plan_rows(&resumed), |row| {
        let mark = if row.executed {
            "done"
        } else if row.selected {
            "[x]"
        } else {
            "[ ]"
        };
        let source = row.source.map(|s| s.to_string()).unwrap_or_default();
        format!(
            "{:>4} {:<5} {:<14} {:>4.0}% {:<16} {} -> {}\n            {}",
            row.index,
            mark,
            row.category,
            row.confidence * 100.0,
            source,
            row.from.display(),
            row.to.display(),
            row.reasoning
        )
    })
}

fn run_select(config: AppConfig, session: &str, index: Vec<usize>, all: bool, none: bool) -> Result<()> {
    let store = SessionStore::open(&config.database.path)?;
    store.require_session(session)?;

    let mut plans = store.load_plan_set(session)?;

    if all {
        plans.select_all();
    } else if none {
        plans.deselect_all();
    } else {
        for i in index {
            match plans.toggle(i) {
                Some(selected) => println!(
                    "{} {}",
                    if selected { "Selected" } else { "Deselected" },
                    plans.plans()[i].file_name
                ),
                None => warn!("No plan with index {}", i),
            }
        }
    }

    let changed = store.save_selection(session, &plans)?;
    println!("{} of {} plans selected ({} changed)", plans.selected().count(), plans.len(), changed);
    Ok(())
}

async fn run_apply(config: AppConfig, session: Option<String>, dry_run: bool, format: &str) -> Result<()> {
    let pipeline = Pipeline::from_config(config)?.with_events(spawn_progress_logger());
    let store = pipeline
        .store()
        .ok_or_else(|| TaxisError::Config("No session store configured".to_string()))?;
    let id = resolve_session(store, session)?;

    let result = pipeline.apply_session(&id, dry_run).await?;
    print_apply(&result, format)
}

fn run_sessions(config: AppConfig, limit: usize, cleanup: Option<Option<u32>>, format: &str) -> Result<()> {
    let store = SessionStore::open(&config.database.path)?;

    if let Some(days) = cleanup {
        let days = days.unwrap_or(config.database.retention_days);
        let removed = store.cleanup_older_than(days)?;
        println!("Removed {} sessions older than {} days", removed, days);
        return Ok(());
    }

    let sessions = store.list_sessions(limit)?;
    emit(format, &sessions, |s| {
        format!(
            "{}  {}  {}  scanned {} / moved {} / failed {}{}",
            s.id,
            s.created_at.format("%Y-%m-%d %H:%M"),
            s.directory.display(),
            s.files_scanned,
            s.files_moved,
            s.files_failed,
            if s.completed { "  [completed]" } else { "" }
        )
    })
}

fn run_history_command(config: AppConfig, action: HistoryCommands, format: &str) -> Result<()> {
    let journal = MoveJournal::new(PathBuf::from(&config.history.path));

    match action {
        HistoryCommands::List { count } => {
            let records = journal.recent(count)?;
            emit(format, &records, |r| {
                format!(
                    "  {} {} -> {} {}",
                    r.timestamp.format("%Y-%m-%d %H:%M"),
                    r.source.display(),
                    r.destination.display(),
                    if r.undone { "[UNDONE]" } else { "" }
                )
            })?;
        }
        HistoryCommands::Undo { count, dry_run } => {
            let report = journal.undo_recent(count, dry_run)?;
            let verb = if dry_run { "Would undo" } else { "Undone" };
            for (from, to) in &report.restored {
                println!("{}: {} -> {}", verb, from.display(), to.display());
            }
            for (path, reason) in &report.skipped {
                warn!("Skipped {:?}: {}", path, reason);
            }
            for (path, e) in &report.failed {
                error!("Could not restore {:?}: {}", path, e);
            }
            if report.restored.is_empty() {
                println!("No moves to undo");
            }
        }
        HistoryCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing history");
                return Ok(());
            }
            journal.clear()?;
            println!("History cleared");
        }
    }

    Ok(())
}

fn run_settings_command(config: AppConfig, action: SettingsCommands, format: &str) -> Result<()> {
    let store = SettingsStore::open(PathBuf::from(&config.settings_path))?;

    match action {
        SettingsCommands::Show => {
            let settings = store.current();
            if format == "text" {
                println!("Watching enabled: {}", settings.watching_enabled);
                println!("Auto-categorize: {}", settings.auto_categorize);
                println!("Watched directories:");
                for dir in &settings.watched_directories {
                    println!("  {}", dir.display());
                }
            } else {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
        }
        SettingsCommands::AddDir { directory } => {
            if !store.add_directory(&directory)? {
                println!("{} is already watched", directory.display());
            }
        }
        SettingsCommands::RemoveDir { directory } => {
            if !store.remove_directory(&directory)? {
                println!("{} was not watched", directory.display());
            }
        }
        SettingsCommands::Enable => {
            store.set_watching_enabled(true)?;
        }
        SettingsCommands::Disable => {
            store.set_watching_enabled(false)?;
        }
        SettingsCommands::AutoCategorize { enabled } => {
            store.set_auto_categorize(enabled)?;
        }
    }

    Ok(())
}

fn run_categories(config: AppConfig, format: &str) -> Result<()> {
    let categories = config.category_set()?;
    emit(format, categories.as_slice(), |c| {
        format!("{:<10} {:<14} {}", c.id, c.name, c.description)
    })
}

/// Directories the watcher should follow right now
fn watch_targets(overrides: &[PathBuf], store: &SettingsStore, config: &AppConfig) -> Vec<PathBuf> {
    if !overrides.is_empty() {
        return overrides.to_vec();
    }
    let settings = store.current();
    if !settings.watching_enabled {
        return Vec::new();
    }
    if settings.watched_directories.is_empty() {
        config.watch_paths.iter().map(PathBuf::from).collect()
    } else {
        settings.watched_directories
    }
}

/// Run the watch mode
async fn run_watch(
    config: AppConfig,
    dir_overrides: Vec<PathBuf>,
    apply: bool,
    skip_health_check: bool,
    recursive: bool,
) -> Result<()> {
    let settings = SettingsStore::open(PathBuf::from(&config.settings_path))?;
    if dir_overrides.is_empty() && !settings.current().watching_enabled {
        return Err(TaxisError::Config(
            "Watching is disabled. Run `taxis settings enable` or pass --dir".to_string(),
        ));
    }

    if !skip_health_check && !config.categorization.offline {
        let client = OllamaClient::from_config(&config.engine)?;
        info!("Checking Ollama availability...");
        client.health_check().await?;
        if !client.model_available(&config.engine.model).await? {
            warn!("Model '{}' not found. Try: ollama pull {}", config.engine.model, config.engine.model);
        }
    }

    let debounce = Duration::from_millis(config.watcher.debounce_ms);
    let stable_wait = Duration::from_secs(config.watcher.stable_wait_secs);
    let max_batch = Duration::from_secs(config.watcher.max_batch_secs);
    let mut watcher = FileWatcher::new(config.watcher.max_depth)?;
    watcher.sync_directories(&watch_targets(&dir_overrides, &settings, &config), recursive);
    let pipeline = Pipeline::from_config(config.clone())?.with_events(spawn_progress_logger());

    // Setup graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down...");
        let _ = shutdown_tx.send(true);
    });

    info!("Watching {:?}. Press Ctrl+C to stop.", watcher.watched_paths());

    while !*shutdown_rx.borrow() {
        if dir_overrides.is_empty() {
            match settings.reload() {
                Ok(true) => {
                    watcher.sync_directories(&watch_targets(&dir_overrides, &settings, &config), recursive)
                }
                Ok(false) => {}
                Err(e) => warn!("Could not reload settings: {}", e),
            }
        }

        let arrivals = tokio::task::block_in_place(|| collect_batch(&watcher, debounce, max_batch))?;
        if arrivals.is_empty() || !settings.current().auto_categorize {
            continue;
        }

        for root in watcher.watched_paths() {
            let mut ready = Vec::new();
            for path in arrivals.iter().filter(|p| p.starts_with(&root)) {
                if wait_for_stable(path, stable_wait).await {
                    ready.push(path.clone());
                } else {
                    debug!("File disappeared during stability check: {:?}", path);
                }
            }
            if ready.is_empty() {
                continue;
            }

            info!("{} new files in {:?}", ready.len(), root);
            match pipeline.run_arrivals(&root, &ready).await {
                Ok(run) => {
                    for outcome in &run.outcomes {
                        info!(
                            "{} -> {} ({:.0}%)",
                            outcome.descriptor.name,
                            outcome.category.name,
                            outcome.confidence * 100.0
                        );
                    }
                    if let (true, Some(id)) = (apply, &run.session_id) {
                        if let Err(e) = pipeline.apply_session(id, false).await {
                            error!("Failed to apply session {}: {}", id, e);
                        }
                    }
                }
                Err(e) => error!("Failed to categorize arrivals in {:?}: {}", root, e),
            }
        }
    }

    info!("Taxis stopped.");
    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Model: {} at {}", config.engine.model, config.engine.url);
            println!("  Categories: {}", config.categories.len());
            println!("  Auto-select above: {}", config.categorization.auto_select_threshold);
            println!("  Database: {}", config.database.path);
        }
    }

    Ok(())
}

/// Run status check
async fn run_status(config: AppConfig) -> Result<()> {
    let client = OllamaClient::from_config(&config.engine)?;

    println!("Taxis v{} Status", env!("CARGO_PKG_VERSION"));
    println!("==================");

    match client.health_check().await {
        Ok(()) => println!("Ollama: Running at {}", client.base_url()),
        Err(e) => println!("Ollama: Error - {}", e),
    }

    match client.list_models().await {
        Ok(models) => {
            println!("\nAvailable models:");
            for m in &models {
                let marker = if m.starts_with(config.engine.model.as_str()) { "*" } else { " " };
                println!("  {} {}", marker, m);
            }
        }
        Err(e) => println!("  Error listing models: {}", e),
    }

    match SessionStore::open(&config.database.path) {
        Ok(store) => {
            let sessions = store.list_sessions(1000)?;
            println!("\nSession store ({}):", config.database.path);
            println!("  Sessions: {}", sessions.len());
            if let Some(last) = sessions.first() {
                println!("  Last: {} ({})", last.id, last.directory.display());
            }
        }
        Err(e) => println!("\nSession store: Error - {}", e),
    }

    let settings = SettingsStore::open(PathBuf::from(&config.settings_path))?.current();
    println!("\nWatching: {}", if settings.watching_enabled { "enabled" } else { "disabled" });
    println!("  Directories: {:?}", settings.watched_directories);

    Ok(())
}

/// Initialize a new Taxis project
fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        return Err(TaxisError::Config(
            "config.json already exists. Use --force to overwrite".to_string()
        ));
    }

    let inbox = target.join("inbox");
    std::fs::create_dir_all(&inbox)?;

    let config = AppConfig {
        watch_paths: vec![inbox.to_string_lossy().to_string()],
        ..AppConfig::default()
    };
    config.save(&config_path)?;

    println!("Taxis initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - inbox/");
    println!("\nNext steps:");
    println!("  1. Start Ollama and pull {}", config.engine.model);
    println!("  2. Categorize: taxis categorize inbox");

    Ok(())
}
