// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! File system watcher for monitoring directories

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{Result, TaxisError};

/// Events emitted by the watcher
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// A file was created or moved into a watched directory
    FileCreated(PathBuf),
    /// A file was modified
    FileModified(PathBuf),
    /// A file was deleted or moved away
    FileDeleted(PathBuf),
    /// Watcher error
    Error(String),
    /// The notify backend went away; no further events will arrive
    Disconnected,
}

/// Anything `collect_batch` can pull watch events from
pub trait EventSource {
    /// Next event, or `None` once `timeout` passes quietly
    fn next_event(&self, timeout: Duration) -> Option<WatchEvent>;
}

struct WatchedRoot {
    path: PathBuf,
    recursive: bool,
}

/// File system watcher
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    roots: Vec<WatchedRoot>,
    max_depth: usize,
    event_rx: Receiver<notify::Result<Event>>,
}

impl FileWatcher {
    /// Create a new file watcher
    pub fn new(max_depth: usize) -> Result<Self> {
        let (tx, rx) = channel();

        let config = Config::default()
            .with_poll_interval(Duration::from_secs(2));

        let watcher = RecommendedWatcher::new(tx, config)?;

        Ok(Self {
            watcher,
            roots: Vec::new(),
            max_depth,
            event_rx: rx,
        })
    }

    /// Add a directory to watch
    pub fn watch(&mut self, path: &Path, recursive: bool) -> Result<()> {
        if self.roots.iter().any(|r| r.path == path) {
            return Ok(());
        }

        // Create directory if it doesn't exist
        if !path.exists() {
            std::fs::create_dir_all(path)?;
            info!("Created watch directory: {:?}", path);
        }

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        self.watcher.watch(path, mode)?;
        self.roots.push(WatchedRoot {
            path: path.to_path_buf(),
            recursive,
        });
        info!("Watching: {:?}", path);

        Ok(())
    }

    /// Stop watching a directory
    pub fn unwatch(&mut self, path: &Path) -> Result<()> {
        self.watcher.unwatch(path)?;
        self.roots.retain(|r| r.path != path);
        info!("Stopped watching: {:?}", path);
        Ok(())
    }

    /// Make the watched set equal `desired`; failures are logged per directory
    pub fn sync_directories(&mut self, desired: &[PathBuf], recursive: bool) {
        let stale: Vec<PathBuf> = self
            .roots
            .iter()
            .filter(|r| !desired.contains(&r.path))
            .map(|r| r.path.clone())
            .collect();

        for path in stale {
            if let Err(e) = self.unwatch(&path) {
                warn!("Failed to unwatch {:?}: {}", path, e);
                self.roots.retain(|r| r.path != path);
            }
        }

        for path in desired {
            if let Err(e) = self.watch(path, recursive) {
                warn!("Failed to watch {:?}: {}", path, e);
            }
        }
    }

    /// Get the next event (blocking with timeout)
    pub fn next_event(&self, timeout: Duration) -> Option<WatchEvent> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(Ok(event)) => self.convert_event(event),
            Ok(Err(e)) => Some(WatchEvent::Error(e.to_string())),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => None,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Some(WatchEvent::Disconnected),
        }
    }

    fn convert_event(&self, event: Event) -> Option<WatchEvent> {
        let converted = classify_event(&event)?;
        let path = match &converted {
            WatchEvent::FileCreated(p) | WatchEvent::FileModified(p) | WatchEvent::FileDeleted(p) => p,
            WatchEvent::Error(_) | WatchEvent::Disconnected => return Some(converted),
        };

        let in_range = self.roots.iter().any(|root| {
            let depth = if root.recursive { self.max_depth } else { 1 };
            within_depth(&root.path, path, depth)
        });

        if in_range {
            Some(converted)
        } else {
            debug!("Ignoring event outside watch depth: {:?}", path);
            None
        }
    }

    /// Get currently watched paths
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.roots.iter().map(|r| r.path.clone()).collect()
    }
}

/// Map a notify event onto our event type
pub fn classify_event(event: &Event) -> Option<WatchEvent> {
    match &event.kind {
        EventKind::Create(_) => {
            event.paths.first().map(|p| WatchEvent::FileCreated(p.clone()))
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.first().map(|p| WatchEvent::FileCreated(p.clone()))
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1).map(|p| WatchEvent::FileCreated(p.clone()))
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.first().map(|p| WatchEvent::FileDeleted(p.clone()))
        }
        EventKind::Modify(_) => {
            event.paths.first().map(|p| WatchEvent::FileModified(p.clone()))
        }
        EventKind::Remove(_) => {
            event.paths.first().map(|p| WatchEvent::FileDeleted(p.clone()))
        }
        _ => None,
    }
}

/// True when `path` lies below `root` at most `max_depth` levels deep
pub fn within_depth(root: &Path, path: &Path, max_depth: usize) -> bool {
    match path.strip_prefix(root) {
        Ok(relative) => {
            let depth = relative.components().count();
            depth >= 1 && depth <= max_depth
        }
        Err(_) => false,
    }
}

impl EventSource for FileWatcher {
    fn next_event(&self, timeout: Duration) -> Option<WatchEvent> {
        FileWatcher::next_event(self, timeout)
    }
}

/// Gather new files until the source stays quiet for `debounce` or
/// `max_window` has passed, whichever comes first
pub fn collect_batch<S: EventSource + ?Sized>(
    source: &S,
    debounce: Duration,
    max_window: Duration,
) -> Result<Vec<PathBuf>> {
    let started = Instant::now();
    let mut batch: Vec<PathBuf> = Vec::new();

    loop {
        let elapsed = started.elapsed();
        if elapsed >= max_window {
            debug!("Batch window of {:?} reached with {} files", max_window, batch.len());
            break;
        }
        let Some(event) = source.next_event(debounce.min(max_window - elapsed)) else {
            break;
        };

        match event {
            WatchEvent::FileCreated(path) => {
                if should_process(&path) && !batch.contains(&path) {
                    debug!("New file: {:?}", path);
                    batch.push(path);
                }
            }
            WatchEvent::FileDeleted(path) => batch.retain(|p| p != &path),
            WatchEvent::FileModified(_) => {}
            WatchEvent::Error(e) => warn!("Watcher error: {}", e),
            WatchEvent::Disconnected => {
                return Err(TaxisError::Watch(notify::Error::generic("watcher disconnected")));
            }
        }
    }

    Ok(batch)
}

/// Check if a file should be processed
pub fn should_process(path: &Path) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    // Skip hidden files
    if filename.starts_with('.') {
        return false;
    }

    // Skip partial downloads and temporary files
    let temp_extensions = [".tmp", ".part", ".crdownload", ".partial", ".download"];
    let lower = filename.to_lowercase();
    if temp_extensions.iter().any(|ext| lower.ends_with(ext)) {
        return false;
    }

    // Skip system files
    let skip_names = ["desktop.ini", "thumbs.db", ".ds_store"];
    if skip_names.iter().any(|n| filename.eq_ignore_ascii_case(n)) {
        return false;
    }

    true
}

/// Wait for file to be stable (not being written)
pub async fn wait_for_stable(path: &Path, max_wait: Duration) -> bool {
    let check_interval = Duration::from_millis(500);
    let start = Instant::now();

    let mut last_size = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return false,
    };

    loop {
        tokio::time::sleep(check_interval).await;

        if start.elapsed() > max_wait {
            warn!("File stability check timed out for {:?}", path);
            return true; // Proceed anyway
        }

        let current_size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(_) => return false, // File was deleted
        };

        if current_size == last_size {
            return true;
        }

        last_size = current_size;
        debug!("File {:?} still being written, size: {}", path, current_size);
    }
}
