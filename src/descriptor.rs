// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! File metadata extraction and directory scanning

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

use crate::categories::FileKind;
use crate::config::ScanConfig;
use crate::watcher::should_process;
use crate::{Result, TaxisError};

/// Extensions whose leading text is kept as a preview
const PREVIEW_EXTENSIONS: &[&str] = &["txt", "md", "log", "csv"];

/// Immutable snapshot of one filesystem entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
    /// Lowercase, without the dot; empty when the name has none
    pub extension: String,
    pub mime_type: Option<String>,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
    pub content_preview: Option<String>,
}

impl FileDescriptor {
    /// Describe a file on disk
    pub fn from_path(path: &Path, config: &ScanConfig) -> Result<Self> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let metadata = std::fs::metadata(&path)?;

        let mut descriptor = Self::detached(&path);
        descriptor.size_bytes = metadata.len();
        descriptor.is_dir = metadata.is_dir();
        descriptor.modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(UNIX_EPOCH));

        if !descriptor.is_dir && descriptor.size_bytes <= config.max_content_bytes {
            descriptor.content_preview = content_preview(&descriptor, config.preview_chars);
        }

        Ok(descriptor)
    }

    /// Descriptor built from the path alone, without touching the filesystem
    pub fn detached(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let mime_type = if extension.is_empty() {
            None
        } else {
            mime_guess::from_ext(&extension).first().map(|m| m.to_string())
        };

        Self {
            path,
            name,
            size_bytes: 0,
            extension,
            mime_type,
            modified: DateTime::<Utc>::from(UNIX_EPOCH),
            is_dir: false,
            content_preview: None,
        }
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_extension(&self.extension)
    }

    /// File name without its final extension
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }

    pub fn size_formatted(&self) -> String {
        format_size(self.size_bytes)
    }
}

fn content_preview(descriptor: &FileDescriptor, max_chars: usize) -> Option<String> {
    let ext = descriptor.extension.as_str();
    if PREVIEW_EXTENSIONS.contains(&ext) {
        match std::fs::read_to_string(&descriptor.path) {
            Ok(text) => Some(text.chars().take(max_chars).collect()),
            Err(e) => {
                debug!("No preview for {:?}: {}", descriptor.path, e);
                None
            }
        }
    } else if ext == "pdf" {
        Some(format!("PDF document: {}", descriptor.stem()))
    } else {
        None
    }
}

/// Human readable size with one decimal
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let kb = bytes as f64 / 1024.0;
    if kb < 1024.0 {
        return format!("{:.1} KB", kb);
    }
    let mb = kb / 1024.0;
    if mb < 1024.0 {
        return format!("{:.1} MB", mb);
    }
    format!("{:.1} GB", mb / 1024.0)
}

/// Iterator over batches of descriptors below a root directory
pub struct ScanBatches<'a> {
    entries: walkdir::IntoIter,
    config: &'a ScanConfig,
    ignore: Vec<glob::Pattern>,
    described: usize,
}

impl<'a> ScanBatches<'a> {
    fn is_ignored(&self, path: &Path) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => return true,
        };
        self.ignore.iter().any(|p| p.matches(name))
    }
}

impl<'a> Iterator for ScanBatches<'a> {
    type Item = Vec<FileDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::new();

        while batch.len() < self.config.batch_size.max(1) && self.described < self.config.max_files {
            let entry = match self.entries.next() {
                None => break,
                Some(Err(e)) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
                Some(Ok(entry)) => entry,
            };

            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if entry.file_type().is_dir() {
                if hidden {
                    self.entries.skip_current_dir();
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !should_process(path) || self.is_ignored(path) {
                continue;
            }

            match FileDescriptor::from_path(path, self.config) {
                Ok(descriptor) => {
                    batch.push(descriptor);
                    self.described += 1;
                }
                Err(e) => warn!("Error describing {:?}: {}", path, e),
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

/// Walk `root` and yield descriptors in batches of `config.batch_size`
pub fn scan_batches<'a>(root: &Path, recursive: bool, config: &'a ScanConfig) -> Result<ScanBatches<'a>> {
    if !root.is_dir() {
        return Err(TaxisError::NotADirectory(root.to_path_buf()));
    }

    let ignore = config
        .ignore_patterns
        .iter()
        .map(|p| glob::Pattern::new(p))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let max_depth = if recursive { config.max_depth.max(1) } else { 1 };
    let entries = walkdir::WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter();

    debug!("Scanning {:?} (recursive: {}, depth: {})", root, recursive, max_depth);

    Ok(ScanBatches {
        entries,
        config,
        ignore,
        described: 0,
    })
}

/// Describe every processable file below `root`
pub fn scan_directory(root: &Path, recursive: bool, config: &ScanConfig) -> Result<Vec<FileDescriptor>> {
    let files: Vec<FileDescriptor> = scan_batches(root, recursive, config)?.flatten().collect();
    info!("Found {} files in {:?}", files.len(), root);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_descriptor_fields_and_preview() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Notes.TXT");
        fs::write(&path, "a".repeat(800)).unwrap();

        let descriptor = FileDescriptor::from_path(&path, &ScanConfig::default()).unwrap();
        assert_eq!(descriptor.name, "Notes.TXT");
        assert_eq!(descriptor.extension, "txt");
        assert_eq!(descriptor.size_bytes, 800);
        assert_eq!(descriptor.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(descriptor.content_preview.as_ref().map(|p| p.chars().count()), Some(500));
        assert!(!descriptor.is_dir);
    }

    #[test]
    fn test_preview_only_for_small_text_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig {
            max_content_bytes: 10,
            ..ScanConfig::default()
        };

        let big = dir.path().join("big.md");
        fs::write(&big, "0123456789abcdef").unwrap();
        assert!(FileDescriptor::from_path(&big, &config).unwrap().content_preview.is_none());

        let image = dir.path().join("a.png");
        fs::write(&image, [0u8; 4]).unwrap();
        assert!(FileDescriptor::from_path(&image, &config).unwrap().content_preview.is_none());

        let pdf = dir.path().join("manual.pdf");
        fs::write(&pdf, b"%PDF").unwrap();
        assert_eq!(
            FileDescriptor::from_path(&pdf, &config).unwrap().content_preview.as_deref(),
            Some("PDF document: manual")
        );
    }

    #[test]
    fn test_scan_skips_hidden_and_ignored_and_batches() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.pdf", "c.jpg", ".hidden", "d.part", "skip.bak"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("e.txt"), b"x").unwrap();

        let config = ScanConfig {
            batch_size: 2,
            ignore_patterns: vec!["*.bak".to_string()],
            ..ScanConfig::default()
        };

        let batches: Vec<_> = scan_batches(dir.path(), false, &config).unwrap().collect();
        assert_eq!(batches.len(), 2);
        let names: Vec<String> = batches.into_iter().flatten().map(|d| d.name).collect();
        assert_eq!(names, vec!["a.txt", "b.pdf", "c.jpg"]);

        let all = scan_directory(dir.path(), true, &config).unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_scan_respects_max_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("f{}.txt", i)), b"x").unwrap();
        }
        let config = ScanConfig {
            max_files: 3,
            ..ScanConfig::default()
        };
        assert_eq!(scan_directory(dir.path(), false, &config).unwrap().len(), 3);
    }

    #[test]
    fn test_scan_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            scan_directory(&missing, false, &ScanConfig::default()),
            Err(TaxisError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
