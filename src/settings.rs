// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Watched-directory settings, persisted as JSON and observable

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::Result;

/// User-facing watcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSettings {
    #[serde(default)]
    pub watching_enabled: bool,
    #[serde(default)]
    pub watched_directories: Vec<PathBuf>,
    #[serde(default = "default_auto_categorize")]
    pub auto_categorize: bool,
}

fn default_auto_categorize() -> bool {
    true
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            watching_enabled: false,
            watched_directories: Vec::new(),
            auto_categorize: default_auto_categorize(),
        }
    }
}

/// Owns the settings file and broadcasts every change
pub struct SettingsStore {
    path: PathBuf,
    tx: watch::Sender<WatchSettings>,
}

fn read_settings(path: &Path) -> Result<WatchSettings> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        info!("Settings file not found at {:?}, using defaults", path);
        Ok(WatchSettings::default())
    }
}

impl SettingsStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let settings = read_settings(&path)?;
        let (tx, _rx) = watch::channel(settings);
        Ok(Self { path, tx })
    }

    pub fn current(&self) -> WatchSettings {
        self.tx.borrow().clone()
    }

    /// Receiver that sees every later change
    pub fn subscribe(&self) -> watch::Receiver<WatchSettings> {
        self.tx.subscribe()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update<F>(&self, change: F) -> Result<bool>
    where
        F: FnOnce(&mut WatchSettings),
    {
        let mut next = self.current();
        change(&mut next);
        if next == *self.tx.borrow() {
            return Ok(false);
        }

        std::fs::write(&self.path, serde_json::to_string_pretty(&next)?)?;
        debug!("Settings updated: {:?}", next);
        self.tx.send_replace(next);
        Ok(true)
    }

    pub fn set_watching_enabled(&self, enabled: bool) -> Result<bool> {
        self.update(|s| s.watching_enabled = enabled)
    }

    pub fn set_auto_categorize(&self, enabled: bool) -> Result<bool> {
        self.update(|s| s.auto_categorize = enabled)
    }

    /// Returns false when the directory was already watched
    pub fn add_directory(&self, directory: &Path) -> Result<bool> {
        let directory = directory.to_path_buf();
        self.update(|s| {
            if !s.watched_directories.contains(&directory) {
                s.watched_directories.push(directory);
            }
        })
    }

    pub fn remove_directory(&self, directory: &Path) -> Result<bool> {
        self.update(|s| s.watched_directories.retain(|d| d != directory))
    }

    /// Re-read the file; subscribers are only notified on a real change
    pub fn reload(&self) -> Result<bool> {
        let on_disk = read_settings(&self.path)?;
        Ok(self.tx.send_if_modified(|current| {
            if *current == on_disk {
                false
            } else {
                *current = on_disk;
                true
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.json")).unwrap();
        let settings = store.current();
        assert!(!settings.watching_enabled);
        assert!(settings.auto_categorize);
        assert!(settings.watched_directories.is_empty());
    }

    #[test]
    fn test_changes_persist_and_notify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::open(path.clone()).unwrap();
        let mut rx = store.subscribe();

        assert!(store.add_directory(Path::new("/data/in")).unwrap());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().watched_directories, vec![PathBuf::from("/data/in")]);

        assert!(!store.add_directory(Path::new("/data/in")).unwrap());
        assert!(!rx.has_changed().unwrap());

        store.set_watching_enabled(true).unwrap();
        let reopened = SettingsStore::open(path).unwrap();
        assert!(reopened.current().watching_enabled);

        assert!(store.remove_directory(Path::new("/data/in")).unwrap());
        assert!(store.current().watched_directories.is_empty());
    }

    #[test]
    fn test_reload_only_notifies_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::open(path.clone()).unwrap();
        store.set_auto_categorize(false).unwrap();
        let mut rx = store.subscribe();

        assert!(!store.reload().unwrap());
        assert!(!rx.has_changed().unwrap());

        std::fs::write(&path, r#"{ "watching_enabled": true }"#).unwrap();
        assert!(store.reload().unwrap());
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert!(seen.watching_enabled);
        assert!(seen.auto_categorize);
    }
}
