// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Taxis

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::categories::{default_categories, CategoryDefinition, CategorySet};
use crate::classifier::FieldPolicy;
use crate::rules::RuleSet;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Directories watched when the settings store has none
    #[serde(default)]
    pub watch_paths: Vec<String>,

    /// Where category folders are created (defaults to the scanned directory)
    #[serde(default)]
    pub base_directory: Option<String>,

    /// Local model server configuration
    pub engine: EngineConfig,

    #[serde(default)]
    pub categorization: CategorizationConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    /// Tier 1 / Tier 2 rule tables
    #[serde(default)]
    pub rules: RuleSet,

    /// Active category set
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryDefinition>,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    /// Watched-directory settings file
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// HTTP request timeout for non-streaming calls
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CategorizationConfig {
    /// Plans above this confidence start out selected
    #[serde(default = "default_auto_select_threshold")]
    pub auto_select_threshold: f64,
    /// Tokens to receive before an early parse is attempted
    #[serde(default = "default_early_parse_min_tokens")]
    pub early_parse_min_tokens: usize,
    /// Bounded wait for one model response
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
    /// Which occurrence wins when the model repeats a field
    #[serde(default)]
    pub field_policy: FieldPolicy,
    /// Publish partial results every N categorized files
    #[serde(default = "default_emit_every")]
    pub emit_every: usize,
    /// Never contact the model server
    #[serde(default)]
    pub offline: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScanConfig {
    #[serde(default)]
    pub include_subdirectories: bool,
    /// Files larger than this never get a content preview
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: u64,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_scan_depth")]
    pub max_depth: usize,
    /// Glob patterns matched against file names
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_watch_depth")]
    pub max_depth: usize,
    #[serde(default = "default_stable_wait")]
    pub stable_wait_secs: u64,
    /// Longest a batch of arrivals is held open while events keep coming
    #[serde(default = "default_max_batch")]
    pub max_batch_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: String,
}

// Default value functions
fn default_model() -> String { "gemma2:2b".to_string() }
fn default_timeout() -> u64 { 120 }
fn default_retries() -> u32 { 3 }
fn default_auto_select_threshold() -> f64 { 0.7 }
fn default_early_parse_min_tokens() -> usize { 10 }
fn default_response_timeout() -> u64 { 30 }
fn default_emit_every() -> usize { 3 }
fn default_max_content_bytes() -> u64 { 1024 * 1024 }
fn default_preview_chars() -> usize { 500 }
fn default_max_files() -> usize { 10_000 }
fn default_batch_size() -> usize { 100 }
fn default_scan_depth() -> usize { 16 }
fn default_debounce_ms() -> u64 { 2000 }
fn default_watch_depth() -> usize { 5 }
fn default_stable_wait() -> u64 { 10 }
fn default_max_batch() -> u64 { 30 }
fn default_db_path() -> String { "taxis.db".to_string() }
fn default_retention_days() -> u32 { 30 }
fn default_history_path() -> String { "taxis_history.jsonl".to_string() }
fn default_settings_path() -> String { "taxis_settings.json".to_string() }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_paths: vec!["./inbox".to_string()],
            base_directory: None,
            engine: EngineConfig {
                url: "http://localhost:11434".to_string(),
                model: default_model(),
                timeout_secs: default_timeout(),
                retries: default_retries(),
            },
            categorization: CategorizationConfig::default(),
            scan: ScanConfig::default(),
            rules: RuleSet::default(),
            categories: default_categories(),
            watcher: WatcherConfig::default(),
            database: DatabaseConfig::default(),
            history: HistoryConfig::default(),
            settings_path: default_settings_path(),
        }
    }
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            auto_select_threshold: default_auto_select_threshold(),
            early_parse_min_tokens: default_early_parse_min_tokens(),
            response_timeout_secs: default_response_timeout(),
            field_policy: FieldPolicy::default(),
            emit_every: default_emit_every(),
            offline: false,
        }
    }
}

impl CategorizationConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_subdirectories: false,
            max_content_bytes: default_max_content_bytes(),
            preview_chars: default_preview_chars(),
            max_files: default_max_files(),
            batch_size: default_batch_size(),
            max_depth: default_scan_depth(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_depth: default_watch_depth(),
            stable_wait_secs: default_stable_wait(),
            max_batch_secs: default_max_batch(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::TaxisError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        let threshold = self.categorization.auto_select_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(crate::TaxisError::Config(format!(
                "auto_select_threshold must be within 0.0..=1.0, got {}",
                threshold
            )));
        }
        if self.scan.batch_size == 0 {
            return Err(crate::TaxisError::Config("scan.batch_size must be positive".to_string()));
        }
        for pattern in &self.scan.ignore_patterns {
            glob::Pattern::new(pattern)?;
        }
        self.category_set()?;
        Ok(())
    }

    pub fn category_set(&self) -> crate::Result<CategorySet> {
        CategorySet::new(self.categories.clone())
    }

    /// Base directory for relocation, given the directory that was scanned
    pub fn base_directory_for(&self, scanned: &Path) -> PathBuf {
        self.base_directory
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| scanned.to_path_buf())
    }
}
