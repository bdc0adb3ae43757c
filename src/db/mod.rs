// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Session store: categorization runs, their outcomes and relocation plans

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::categories::CategorySet;
use crate::descriptor::FileDescriptor;
use crate::outcome::{CategorizationOutcome, DecisionSource};
use crate::relocation::{PlanSet, RelocationPlan};
use crate::{Result, TaxisError};

/// Session store (thread-safe wrapper)
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

/// One categorization run over a directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub directory: PathBuf,
    pub files_scanned: usize,
    pub files_categorized: usize,
    pub files_moved: usize,
    pub files_failed: usize,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
}

/// A persisted plan with its execution status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPlan {
    pub index: usize,
    pub plan: RelocationPlan,
    pub executed: bool,
    pub succeeded: Option<bool>,
    pub result: Option<String>,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const SESSION_COLUMNS: &str = "id, directory, files_scanned, files_categorized, files_moved, \
     files_failed, completed, created_at, completed_at, last_accessed_at";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let directory: String = row.get(1)?;
    let created: String = row.get(7)?;
    let completed_at: Option<String> = row.get(8)?;
    let accessed: String = row.get(9)?;
    Ok(SessionRecord {
        id: row.get(0)?,
        directory: PathBuf::from(directory),
        files_scanned: row.get::<_, i64>(2)? as usize,
        files_categorized: row.get::<_, i64>(3)? as usize,
        files_moved: row.get::<_, i64>(4)? as usize,
        files_failed: row.get::<_, i64>(5)? as usize,
        completed: row.get(6)?,
        created_at: parse_timestamp(&created),
        completed_at: completed_at.as_deref().map(parse_timestamp),
        last_accessed_at: parse_timestamp(&accessed),
    })
}

impl SessionStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        Ok(store)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| TaxisError::Config("Database lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                directory TEXT NOT NULL,
                files_scanned INTEGER NOT NULL DEFAULT 0,
                files_categorized INTEGER NOT NULL DEFAULT 0,
                files_moved INTEGER NOT NULL DEFAULT 0,
                files_failed INTEGER NOT NULL DEFAULT 0,
                completed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                last_accessed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS outcomes (
                session_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                category_id TEXT NOT NULL,
                confidence REAL NOT NULL,
                reasoning TEXT NOT NULL,
                confirmed INTEGER NOT NULL DEFAULT 0,
                source TEXT NOT NULL,
                descriptor TEXT NOT NULL,
                PRIMARY KEY (session_id, idx)
            );

            CREATE TABLE IF NOT EXISTS plans (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                source TEXT NOT NULL,
                destination_dir TEXT NOT NULL,
                file_name TEXT NOT NULL,
                category_id TEXT NOT NULL,
                category_name TEXT NOT NULL,
                selected INTEGER NOT NULL,
                confidence REAL NOT NULL,
                reasoning TEXT NOT NULL,
                executed INTEGER NOT NULL DEFAULT 0,
                succeeded INTEGER,
                result TEXT,
                executed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_accessed ON sessions(last_accessed_at);
            CREATE INDEX IF NOT EXISTS idx_plans_session ON plans(session_id, idx);
        "#)?;
        Ok(())
    }

    /// Start a new session for `directory`
    pub fn create_session(&self, directory: &Path) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());
        let conn = self.lock_conn()?;
        conn.execute(
            r#"INSERT INTO sessions (id, directory, created_at, last_accessed_at)
               VALUES (?1, ?2, ?3, ?3)"#,
            params![id, directory.to_string_lossy(), now],
        )?;
        debug!("Created session {} for {:?}", id, directory);
        Ok(id)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
        let record = conn.query_row(&sql, params![id], session_from_row).optional()?;
        Ok(record)
    }

    /// Like `get_session`, but a missing session is an error
    pub fn require_session(&self, id: &str) -> Result<SessionRecord> {
        self.get_session(id)?
            .ok_or_else(|| TaxisError::SessionNotFound(id.to_string()))
    }

    /// Most recently accessed session
    pub fn last_session(&self) -> Result<Option<SessionRecord>> {
        Ok(self.list_sessions(1)?.into_iter().next())
    }

    /// Most recently accessed session that has not been completed
    pub fn last_open_session(&self) -> Result<Option<SessionRecord>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {} FROM sessions WHERE completed = 0 ORDER BY last_accessed_at DESC LIMIT 1",
            SESSION_COLUMNS
        );
        let record = conn.query_row(&sql, [], session_from_row).optional()?;
        Ok(record)
    }

    pub fn list_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {} FROM sessions ORDER BY last_accessed_at DESC LIMIT ?1",
            SESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params![limit as i64], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    pub fn update_session_stats(
        &self,
        id: &str,
        scanned: usize,
        categorized: usize,
        moved: usize,
        failed: usize,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            r#"UPDATE sessions SET files_scanned = ?2, files_categorized = ?3, files_moved = ?4,
               files_failed = ?5, last_accessed_at = ?6 WHERE id = ?1"#,
            params![
                id,
                scanned as i64,
                categorized as i64,
                moved as i64,
                failed as i64,
                timestamp(Utc::now())
            ],
        )?;
        if changed == 0 {
            return Err(TaxisError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn complete_session(&self, id: &str) -> Result<()> {
        let now = timestamp(Utc::now());
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE sessions SET completed = 1, completed_at = ?2, last_accessed_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        if changed == 0 {
            return Err(TaxisError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Replace the stored outcomes of a session
    pub fn save_outcomes(&self, session_id: &str, outcomes: &[CategorizationOutcome]) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM outcomes WHERE session_id = ?1", params![session_id])?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO outcomes (session_id, idx, file_path, category_id, confidence, reasoning, confirmed, source, descriptor)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            )?;
            for (index, outcome) in outcomes.iter().enumerate() {
                stmt.execute(params![
                    session_id,
                    index as i64,
                    outcome.descriptor.path.to_string_lossy(),
                    outcome.category.id,
                    outcome.confidence,
                    outcome.reasoning,
                    outcome.confirmed,
                    outcome.source.as_str(),
                    serde_json::to_string(&outcome.descriptor)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Outcomes of a session; unknown category ids resolve to the fallback
    pub fn load_outcomes(&self, session_id: &str, categories: &CategorySet) -> Result<Vec<CategorizationOutcome>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT file_path, category_id, confidence, reasoning, confirmed, source, descriptor
               FROM outcomes WHERE session_id = ?1 ORDER BY idx"#,
        )?;

        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let outcomes = rows
            .into_iter()
            .map(|(path, category_id, confidence, reasoning, confirmed, source, descriptor)| {
                let descriptor = serde_json::from_str::<FileDescriptor>(&descriptor)
                    .unwrap_or_else(|_| FileDescriptor::detached(path));
                let mut outcome = CategorizationOutcome::new(
                    descriptor,
                    categories.resolve(&category_id).clone(),
                    confidence,
                    reasoning,
                    DecisionSource::parse(&source).unwrap_or(DecisionSource::Model),
                );
                outcome.confirm(confirmed);
                outcome
            })
            .collect();
        Ok(outcomes)
    }

    /// Replace the stored plans of a session
    pub fn save_plans(&self, session_id: &str, plans: &[RelocationPlan]) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM plans WHERE session_id = ?1", params![session_id])?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO plans (id, session_id, idx, source, destination_dir, file_name, category_id, category_name, selected, confidence, reasoning)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            )?;
            for (index, plan) in plans.iter().enumerate() {
                stmt.execute(params![
                    format!("{}_{}", session_id, index),
                    session_id,
                    index as i64,
                    plan.source.to_string_lossy(),
                    plan.destination_dir.to_string_lossy(),
                    plan.file_name,
                    plan.category_id,
                    plan.category_name,
                    plan.selected,
                    plan.confidence,
                    plan.reasoning,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Plans of a session in their original order
    pub fn load_plans(&self, session_id: &str) -> Result<Vec<StoredPlan>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT idx, source, destination_dir, file_name, category_id, category_name, selected,
                      confidence, reasoning, executed, succeeded, result
               FROM plans WHERE session_id = ?1 ORDER BY idx"#,
        )?;

        let plans = stmt
            .query_map(params![session_id], |row| {
                let source: String = row.get(1)?;
                let destination_dir: String = row.get(2)?;
                Ok(StoredPlan {
                    index: row.get::<_, i64>(0)? as usize,
                    plan: RelocationPlan {
                        source: PathBuf::from(source),
                        destination_dir: PathBuf::from(destination_dir),
                        file_name: row.get(3)?,
                        category_id: row.get(4)?,
                        category_name: row.get(5)?,
                        selected: row.get(6)?,
                        confidence: row.get(7)?,
                        reasoning: row.get(8)?,
                    },
                    executed: row.get(9)?,
                    succeeded: row.get(10)?,
                    result: row.get(11)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(plans)
    }

    /// All plans of a session as an editable selection
    pub fn load_plan_set(&self, session_id: &str) -> Result<PlanSet> {
        let plans = self.load_plans(session_id)?;
        Ok(PlanSet::new(plans.into_iter().map(|p| p.plan).collect()))
    }

    /// Persist the selection flags of `plans`; returns how many changed
    pub fn save_selection(&self, session_id: &str, plans: &PlanSet) -> Result<usize> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE plans SET selected = ?3 WHERE session_id = ?1 AND idx = ?2 AND selected != ?3",
            )?;
            for (index, plan) in plans.plans().iter().enumerate() {
                changed += stmt.execute(params![session_id, index as i64, plan.selected])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    pub fn mark_plan_executed(&self, session_id: &str, index: usize, succeeded: bool, result: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"UPDATE plans SET executed = 1, succeeded = ?3, result = ?4, executed_at = ?5
               WHERE session_id = ?1 AND idx = ?2"#,
            params![session_id, index as i64, succeeded, result, timestamp(Utc::now())],
        )?;
        Ok(())
    }

    /// Drop sessions not accessed within `days`, with their outcomes and plans
    pub fn cleanup_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = timestamp(Utc::now() - ChronoDuration::days(i64::from(days)));
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let stale = "SELECT id FROM sessions WHERE last_accessed_at < ?1";
        tx.execute(
            &format!("DELETE FROM outcomes WHERE session_id IN ({})", stale),
            params![cutoff],
        )?;
        tx.execute(
            &format!("DELETE FROM plans WHERE session_id IN ({})", stale),
            params![cutoff],
        )?;
        let removed = tx.execute("DELETE FROM sessions WHERE last_accessed_at < ?1", params![cutoff])?;
        tx.commit()?;
        if removed > 0 {
            info!("Removed {} stale sessions", removed);
        }
        Ok(removed)
    }

    /// Set a session's last access time
    pub fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE sessions SET last_accessed_at = ?2 WHERE id = ?1",
            params![id, timestamp(at)],
        )?;
        if changed == 0 {
            return Err(TaxisError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relocation::build_plans;

    fn outcomes() -> Vec<CategorizationOutcome> {
        let categories = CategorySet::builtin();
        vec![
            CategorizationOutcome::new(
                FileDescriptor::detached("/in/a.pdf"),
                categories.resolve("documents").clone(),
                0.95,
                "File type: PDF -> Documents",
                DecisionSource::FileType,
            ),
            CategorizationOutcome::new(
                FileDescriptor::detached("/in/b.dat"),
                categories.resolve("to_delete").clone(),
                0.4,
                "AI-powered categorization",
                DecisionSource::Model,
            ),
        ]
    }

    #[test]
    fn test_session_lifecycle() {
        let store = SessionStore::in_memory().unwrap();
        let id = store.create_session(Path::new("/in")).unwrap();

        let session = store.require_session(&id).unwrap();
        assert_eq!(session.directory, PathBuf::from("/in"));
        assert!(!session.completed);

        store.update_session_stats(&id, 5, 4, 3, 1).unwrap();
        store.complete_session(&id).unwrap();

        let session = store.last_session().unwrap().unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.files_scanned, 5);
        assert_eq!(session.files_failed, 1);
        assert!(session.completed);
        assert!(session.completed_at.is_some());

        assert!(matches!(
            store.complete_session("missing"),
            Err(TaxisError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_last_open_session_skips_completed() {
        let store = SessionStore::in_memory().unwrap();
        assert!(store.last_open_session().unwrap().is_none());

        let open = store.create_session(Path::new("/open")).unwrap();
        let done = store.create_session(Path::new("/done")).unwrap();
        store.touch_session(&open, Utc::now() - ChronoDuration::hours(1)).unwrap();
        store.complete_session(&done).unwrap();

        assert_eq!(store.last_session().unwrap().unwrap().id, done);
        assert_eq!(store.last_open_session().unwrap().unwrap().id, open);

        store.complete_session(&open).unwrap();
        assert!(store.last_open_session().unwrap().is_none());
        assert!(matches!(
            store.touch_session("missing", Utc::now()),
            Err(TaxisError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_outcomes_round_trip_with_unknown_category() {
        let store = SessionStore::in_memory().unwrap();
        let id = store.create_session(Path::new("/in")).unwrap();
        store.save_outcomes(&id, &outcomes()).unwrap();

        let loaded = store.load_outcomes(&id, &CategorySet::builtin()).unwrap();
        assert_eq!(loaded, outcomes());

        let reduced = CategorySet::new(
            crate::categories::default_categories()
                .into_iter()
                .filter(|c| c.id != "to_delete")
                .collect(),
        )
        .unwrap();
        let loaded = store.load_outcomes(&id, &reduced).unwrap();
        assert_eq!(loaded[1].category.id, "downloads");
    }

    #[test]
    fn test_plans_selection_and_execution() {
        let store = SessionStore::in_memory().unwrap();
        let id = store.create_session(Path::new("/in")).unwrap();
        let plans = build_plans(&outcomes(), Path::new("/out"), 0.7);
        store.save_plans(&id, &plans).unwrap();

        let stored = store.load_plans(&id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].plan, plans[0]);
        assert!(stored[0].plan.selected);
        assert!(!stored[1].plan.selected);

        let mut selection = store.load_plan_set(&id).unwrap();
        assert_eq!(selection.toggle(1), Some(true));
        assert_eq!(selection.toggle(7), None);
        assert_eq!(store.save_selection(&id, &selection).unwrap(), 1);
        assert!(store.load_plans(&id).unwrap()[1].plan.selected);

        selection.deselect_all();
        assert_eq!(store.save_selection(&id, &selection).unwrap(), 2);
        assert!(store.load_plans(&id).unwrap().iter().all(|p| !p.plan.selected));
        assert_eq!(store.save_selection(&id, &selection).unwrap(), 0);

        store.mark_plan_executed(&id, 0, true, "/out/Documents/a.pdf").unwrap();
        let stored = store.load_plans(&id).unwrap();
        assert!(stored[0].executed);
        assert_eq!(stored[0].succeeded, Some(true));
        assert_eq!(stored[1].succeeded, None);
    }

    #[test]
    fn test_cleanup_removes_stale_sessions() {
        let store = SessionStore::in_memory().unwrap();
        let old = store.create_session(Path::new("/old")).unwrap();
        let fresh = store.create_session(Path::new("/fresh")).unwrap();
        store.save_outcomes(&old, &outcomes()).unwrap();
        store.touch_session(&old, Utc::now() - ChronoDuration::days(45)).unwrap();

        assert_eq!(store.cleanup_older_than(30).unwrap(), 1);
        assert!(store.get_session(&old).unwrap().is_none());
        assert!(store.get_session(&fresh).unwrap().is_some());
        assert!(store.load_outcomes(&old, &CategorySet::builtin()).unwrap().is_empty());
    }
}
