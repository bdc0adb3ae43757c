// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Journal of executed moves, for undo support

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::Result;

/// A single executed move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: String,
    /// blake3 of the file at its destination, checked before undoing
    pub file_hash: String,
    pub undone: bool,
}

/// What an undo pass did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UndoReport {
    /// (moved-from destination, restored source)
    pub restored: Vec<(PathBuf, PathBuf)>,
    /// (destination, reason)
    pub skipped: Vec<(PathBuf, String)>,
    pub failed: Vec<(PathBuf, String)>,
}

/// blake3 hex digest of a file's contents
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Append-only JSON-lines journal
pub struct MoveJournal {
    path: PathBuf,
}

impl MoveJournal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append a record to the journal
    pub fn append(&self, record: &MoveRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(record)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Journal a completed move; the destination must already exist
    pub fn record_move(
        &self,
        session_id: Option<&str>,
        source: &Path,
        destination: &Path,
        category: &str,
    ) -> Result<MoveRecord> {
        let record = MoveRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            session_id: session_id.map(str::to_string),
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            category: category.to_string(),
            file_hash: hash_file(destination)?,
            undone: false,
        };
        self.append(&record)?;
        Ok(record)
    }

    /// Read all journal records
    pub fn read_all(&self) -> Result<Vec<MoveRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Failed to parse journal entry: {}", e);
                }
            }
        }

        Ok(records)
    }

    /// The most recent `count` records, newest first
    pub fn recent(&self, count: usize) -> Result<Vec<MoveRecord>> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(count);
        Ok(records)
    }

    /// Records not yet undone, oldest first
    pub fn undoable(&self) -> Result<Vec<MoveRecord>> {
        let records = self.read_all()?;
        Ok(records.into_iter().filter(|r| !r.undone).collect())
    }

    /// Flag one record as undone; every other line is kept as written
    pub fn mark_undone(&self, id: &str) -> Result<()> {
        let content = fs::read_to_string(&self.path)?;

        let file = File::create(&self.path)?;
        let mut writer = std::io::BufWriter::new(file);

        for line in content.lines() {
            match serde_json::from_str::<MoveRecord>(line) {
                Ok(mut record) if record.id == id => {
                    record.undone = true;
                    writeln!(writer, "{}", serde_json::to_string(&record)?)?;
                }
                _ => writeln!(writer, "{}", line)?,
            }
        }
        writer.flush()?;

        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the `count` most recent files back where they came from
    pub fn undo_recent(&self, count: usize, dry_run: bool) -> Result<UndoReport> {
        let mut candidates = self.undoable()?;
        candidates.reverse();
        candidates.truncate(count);

        let mut report = UndoReport::default();

        for record in candidates {
            if !record.destination.exists() {
                report
                    .skipped
                    .push((record.destination.clone(), "file no longer exists".to_string()));
                continue;
            }
            if record.source.exists() {
                report
                    .skipped
                    .push((record.destination.clone(), "original path is occupied".to_string()));
                continue;
            }
            match hash_file(&record.destination) {
                Ok(hash) if hash == record.file_hash => {}
                Ok(_) => {
                    report
                        .skipped
                        .push((record.destination.clone(), "file changed since it was moved".to_string()));
                    continue;
                }
                Err(e) => {
                    report.failed.push((record.destination.clone(), e.to_string()));
                    continue;
                }
            }

            if dry_run {
                report.restored.push((record.destination, record.source));
                continue;
            }

            let restored = record
                .source
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|_| fs::rename(&record.destination, &record.source));

            match restored {
                Ok(()) => {
                    info!("Restored {:?} -> {:?}", record.destination, record.source);
                    self.mark_undone(&record.id)?;
                    report.restored.push((record.destination, record.source));
                }
                Err(e) => {
                    warn!("Could not restore {:?}: {}", record.destination, e);
                    report.failed.push((record.destination, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moved_file(dir: &Path, name: &str, contents: &[u8]) -> (PathBuf, PathBuf) {
        let source = dir.join(name);
        let destination = dir.join("Sorted").join(name);
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::write(&destination, contents).unwrap();
        (source, destination)
    }

    #[test]
    fn test_append_and_read_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let journal = MoveJournal::new(dir.path().join("journal.jsonl"));
        let (source, destination) = moved_file(dir.path(), "a.txt", b"a");

        let record = journal.record_move(Some("s1"), &source, &destination, "documents").unwrap();
        let mut file = OpenOptions::new().append(true).open(journal.path()).unwrap();
        writeln!(file, "{{ not json").unwrap();

        let records = journal.read_all().unwrap();
        assert_eq!(records, vec![record]);
        assert_eq!(records[0].file_hash, hash_file(&destination).unwrap());
    }

    #[test]
    fn test_undo_restores_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let journal = MoveJournal::new(dir.path().join("journal.jsonl"));
        let (src_a, dst_a) = moved_file(dir.path(), "a.txt", b"a");
        let (src_b, dst_b) = moved_file(dir.path(), "b.txt", b"b");
        journal.record_move(None, &src_a, &dst_a, "documents").unwrap();
        journal.record_move(None, &src_b, &dst_b, "documents").unwrap();

        let preview = journal.undo_recent(1, true).unwrap();
        assert_eq!(preview.restored, vec![(dst_b.clone(), src_b.clone())]);
        assert!(dst_b.exists());

        let report = journal.undo_recent(1, false).unwrap();
        assert_eq!(report.restored, vec![(dst_b.clone(), src_b.clone())]);
        assert!(src_b.exists());
        assert!(!dst_b.exists());

        let undoable = journal.undoable().unwrap();
        assert_eq!(undoable.len(), 1);
        assert_eq!(undoable[0].destination, dst_a);
    }

    #[test]
    fn test_mark_undone_keeps_unreadable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let journal = MoveJournal::new(dir.path().join("journal.jsonl"));
        let (source, destination) = moved_file(dir.path(), "a.txt", b"a");

        let record = journal.record_move(None, &source, &destination, "documents").unwrap();
        let mut file = OpenOptions::new().append(true).open(journal.path()).unwrap();
        writeln!(file, "{{\"id\": \"written by a newer version\"").unwrap();
        drop(file);

        journal.mark_undone(&record.id).unwrap();

        let content = fs::read_to_string(journal.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "{\"id\": \"written by a newer version\"");
        assert!(journal.read_all().unwrap()[0].undone);
    }

    #[test]
    fn test_undo_skips_changed_missing_or_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let journal = MoveJournal::new(dir.path().join("journal.jsonl"));

        let (src_a, dst_a) = moved_file(dir.path(), "a.txt", b"a");
        journal.record_move(None, &src_a, &dst_a, "documents").unwrap();
        fs::write(&dst_a, b"edited").unwrap();

        let (src_b, dst_b) = moved_file(dir.path(), "b.txt", b"b");
        journal.record_move(None, &src_b, &dst_b, "documents").unwrap();
        fs::remove_file(&dst_b).unwrap();

        let (src_c, dst_c) = moved_file(dir.path(), "c.txt", b"c");
        journal.record_move(None, &src_c, &dst_c, "documents").unwrap();
        fs::write(&src_c, b"new file in the old spot").unwrap();

        let report = journal.undo_recent(10, false).unwrap();
        assert!(report.restored.is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(journal.undoable().unwrap().len(), 3);
    }

    #[test]
    fn test_recent_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let journal = MoveJournal::new(dir.path().join("journal.jsonl"));
        for name in ["a.txt", "b.txt", "c.txt"] {
            let (source, destination) = moved_file(dir.path(), name, name.as_bytes());
            journal.record_move(None, &source, &destination, "work").unwrap();
        }

        let recent = journal.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].destination.ends_with("c.txt"));

        journal.clear().unwrap();
        assert!(journal.read_all().unwrap().is_empty());
    }
}
