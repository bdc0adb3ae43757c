// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Scan, categorize, plan and relocate, with progress reporting

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::classifier::Categorizer;
use crate::config::AppConfig;
use crate::db::{SessionRecord, SessionStore, StoredPlan};
use crate::descriptor::{scan_batches, FileDescriptor};
use crate::history::MoveJournal;
use crate::ollama::{OllamaClient, TextGenerator};
use crate::outcome::{CategorizationOutcome, CategorizationState};
use crate::relocation::{
    build_plans, execute_plans, preview_plans, MoveProgress, PlanResult, RelocationPlan,
    RelocationReport,
};
use crate::{Result, TaxisError};

/// Headroom on top of the response timeout before a file is given up on
const OUTER_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Progress published while the pipeline runs
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    State(CategorizationState),
    /// Running count of described files
    Scanned { total: usize },
    /// Snapshot of the outcomes so far
    Partial(Vec<CategorizationOutcome>),
    Move(MoveProgress),
}

/// Result of categorizing a directory
#[derive(Debug, Clone)]
pub struct SessionRun {
    pub session_id: Option<String>,
    pub directory: PathBuf,
    pub outcomes: Vec<CategorizationOutcome>,
    pub plans: Vec<RelocationPlan>,
}

/// A stored session read back with its outcomes and plans
#[derive(Debug, Clone)]
pub struct ResumedSession {
    pub session: SessionRecord,
    pub outcomes: Vec<CategorizationOutcome>,
    pub plans: Vec<StoredPlan>,
}

/// Result of applying a stored session
#[derive(Debug, Clone)]
pub enum ApplyResult {
    Preview(Vec<(PathBuf, PathBuf)>),
    Executed(RelocationReport),
}

pub struct Pipeline {
    config: AppConfig,
    categorizer: Arc<Categorizer>,
    store: Option<SessionStore>,
    journal: Option<MoveJournal>,
    events: Option<UnboundedSender<PipelineEvent>>,
}

impl Pipeline {
    pub fn new(config: AppConfig, categorizer: Categorizer) -> Self {
        Self {
            config,
            categorizer: Arc::new(categorizer),
            store: None,
            journal: None,
            events: None,
        }
    }

    /// Wire everything up from configuration
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let generator: Option<Arc<dyn TextGenerator>> = if config.categorization.offline {
            info!("Offline mode: the model server will not be contacted");
            None
        } else {
            Some(Arc::new(OllamaClient::from_config(&config.engine)?))
        };

        let categorizer = Categorizer::new(
            config.rules.clone(),
            config.category_set()?,
            generator,
            config.categorization.clone(),
        );
        let store = SessionStore::open(&config.database.path)?;
        let journal = MoveJournal::new(PathBuf::from(&config.history.path));

        Ok(Self::new(config, categorizer)
            .with_store(store)
            .with_journal(journal))
    }

    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_journal(mut self, journal: MoveJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&SessionStore> {
        self.store.as_ref()
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            // receiver may be gone
            let _ = tx.send(event);
        }
    }

    fn require_store(&self) -> Result<&SessionStore> {
        self.store
            .as_ref()
            .ok_or_else(|| TaxisError::Config("No session store configured".to_string()))
    }

    /// Describe every processable file below `directory`
    pub async fn scan(&self, directory: &Path, recursive: bool) -> Result<Vec<FileDescriptor>> {
        self.emit(PipelineEvent::State(CategorizationState::ScanningDirectory));

        let root = directory.to_path_buf();
        let scan_config = self.config.scan.clone();
        let events = self.events.clone();

        let files = tokio::task::spawn_blocking(move || -> Result<Vec<FileDescriptor>> {
            let mut files = Vec::new();
            for batch in scan_batches(&root, recursive, &scan_config)? {
                files.extend(batch);
                if let Some(tx) = &events {
                    let _ = tx.send(PipelineEvent::Scanned { total: files.len() });
                }
            }
            Ok(files)
        })
        .await??;

        info!("Scanned {} files in {:?}", files.len(), directory);
        Ok(files)
    }

    /// Categorize files one after another
    pub async fn categorize(&self, files: &[FileDescriptor]) -> Vec<CategorizationOutcome> {
        let settings = self.categorizer.config();
        let emit_every = settings.emit_every.max(1);
        let outer_timeout = settings.response_timeout() + OUTER_TIMEOUT_MARGIN;
        let mut outcomes = Vec::with_capacity(files.len());

        for (index, descriptor) in files.iter().enumerate() {
            self.emit(PipelineEvent::State(CategorizationState::CategorizingFiles {
                progress: index as f32 / files.len() as f32,
                current_file: descriptor.name.clone(),
            }));

            let outcome =
                match tokio::time::timeout(outer_timeout, self.categorizer.categorize(descriptor)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!("Categorization of {} exceeded {:?}", descriptor.name, outer_timeout);
                        self.categorizer.error_outcome(
                            descriptor,
                            &format!("timed out after {}s", outer_timeout.as_secs()),
                        )
                    }
                };

            debug!(
                "{} -> {} ({:.2}, {})",
                descriptor.name, outcome.category.id, outcome.confidence, outcome.source
            );
            outcomes.push(outcome);

            if outcomes.len() % emit_every == 0 {
                self.emit(PipelineEvent::Partial(outcomes.clone()));
            }
        }

        self.emit(PipelineEvent::State(CategorizationState::CategorizationComplete(
            outcomes.clone(),
        )));
        outcomes
    }

    pub fn plan(&self, outcomes: &[CategorizationOutcome], base_dir: &Path) -> Vec<RelocationPlan> {
        build_plans(outcomes, base_dir, self.config.categorization.auto_select_threshold)
    }

    /// Run the executor on the blocking pool, forwarding progress
    pub async fn execute(&self, plans: Vec<RelocationPlan>) -> Result<RelocationReport> {
        let events = self.events.clone();

        let report = tokio::task::spawn_blocking(move || {
            execute_plans(&plans, |event| {
                if let Some(tx) = &events {
                    if let MoveProgress::Moving { progress, current_file } = &event {
                        let _ = tx.send(PipelineEvent::State(CategorizationState::MovingFiles {
                            progress: *progress,
                            current_file: current_file.clone(),
                        }));
                    }
                    let _ = tx.send(PipelineEvent::Move(event));
                }
            })
        })
        .await?;

        self.emit(PipelineEvent::State(CategorizationState::FilesMoved(report.clone())));
        Ok(report)
    }

    /// Scan, categorize and plan a directory, persisting the session
    pub async fn run_session(
        &self,
        directory: &Path,
        recursive: bool,
        base_dir: Option<&Path>,
    ) -> Result<SessionRun> {
        let files = match self.scan(directory, recursive).await {
            Ok(files) => files,
            Err(e) => {
                self.emit(PipelineEvent::State(CategorizationState::Failed(e.to_string())));
                return Err(e);
            }
        };
        self.run_files(directory, files, base_dir).await
    }

    /// Categorize already described files as a session rooted at `directory`
    pub async fn run_files(
        &self,
        directory: &Path,
        files: Vec<FileDescriptor>,
        base_dir: Option<&Path>,
    ) -> Result<SessionRun> {
        let session_id = match &self.store {
            Some(store) => Some(store.create_session(directory)?),
            None => None,
        };

        let mut outcomes = self.categorize(&files).await;
        let base = base_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.base_directory_for(directory));
        let plans = self.plan(&outcomes, &base);

        for (outcome, plan) in outcomes.iter_mut().zip(&plans) {
            outcome.confirm(plan.selected);
        }

        if let (Some(store), Some(id)) = (&self.store, &session_id) {
            store.save_outcomes(id, &outcomes)?;
            store.save_plans(id, &plans)?;
            store.update_session_stats(id, files.len(), outcomes.len(), 0, 0)?;
            info!("Session {} saved with {} plans", id, plans.len());
        }

        Ok(SessionRun {
            session_id,
            directory: directory.to_path_buf(),
            outcomes,
            plans,
        })
    }

    /// Describe freshly arrived files and run them as a session
    pub async fn run_arrivals(&self, directory: &Path, paths: &[PathBuf]) -> Result<SessionRun> {
        let files: Vec<FileDescriptor> = paths
            .iter()
            .filter_map(|path| match FileDescriptor::from_path(path, &self.config.scan) {
                Ok(descriptor) if !descriptor.is_dir => Some(descriptor),
                Ok(_) => None,
                Err(e) => {
                    warn!("Error describing {:?}: {}", path, e);
                    None
                }
            })
            .collect();
        self.run_files(directory, files, None).await
    }

    /// Reload a session; without an id, the most recent one not yet completed
    pub async fn resume_session(&self, session_id: Option<&str>) -> Result<ResumedSession> {
        let store = self.require_store()?;
        let session = match session_id {
            Some(id) => store.require_session(id)?,
            None => store
                .last_open_session()?
                .ok_or_else(|| TaxisError::SessionNotFound("no open session".to_string()))?,
        };

        store.touch_session(&session.id, Utc::now())?;
        let outcomes = store.load_outcomes(&session.id, self.categorizer.categories())?;
        let plans = store.load_plans(&session.id)?;
        info!(
            "Resumed session {} ({} outcomes, {} pending plans)",
            session.id,
            outcomes.len(),
            plans.iter().filter(|p| !p.executed).count()
        );

        Ok(ResumedSession { session, outcomes, plans })
    }

    /// Execute the pending, selected plans of a stored session
    pub async fn apply_session(&self, session_id: &str, dry_run: bool) -> Result<ApplyResult> {
        let store = self.require_store()?;
        let session = store.require_session(session_id)?;

        let pending: Vec<_> = store
            .load_plans(session_id)?
            .into_iter()
            .filter(|p| !p.executed)
            .collect();
        let plans: Vec<RelocationPlan> = pending.iter().map(|p| p.plan.clone()).collect();

        if dry_run {
            return Ok(ApplyResult::Preview(preview_plans(&plans)));
        }

        let report = self.execute(plans).await?;

        for (stored, result) in pending.iter().zip(&report.results) {
            match result {
                PlanResult::Moved { destination } => {
                    store.mark_plan_executed(session_id, stored.index, true, &destination.to_string_lossy())?;
                    if let Some(journal) = &self.journal {
                        if let Err(e) = journal.record_move(
                            Some(session_id),
                            &stored.plan.source,
                            destination,
                            &stored.plan.category_id,
                        ) {
                            warn!("Could not journal move of {:?}: {}", stored.plan.source, e);
                        }
                    }
                }
                PlanResult::Failed { error } => {
                    store.mark_plan_executed(session_id, stored.index, false, error)?;
                }
                PlanResult::Skipped { .. } if stored.plan.selected => {
                    store.mark_plan_executed(session_id, stored.index, true, "already in place")?;
                }
                PlanResult::Skipped { .. } => {}
            }
        }

        store.update_session_stats(
            session_id,
            session.files_scanned,
            session.files_categorized,
            session.files_moved + report.successful_moves,
            session.files_failed + report.failed_moves,
        )?;
        store.complete_session(session_id)?;

        Ok(ApplyResult::Executed(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::CategorySet;
    use crate::config::CategorizationConfig;
    use crate::outcome::DecisionSource;
    use crate::ollama::{GenerationEvent, TokenStream};
    use async_trait::async_trait;
    use futures_util::stream::{self, StreamExt};
    use std::fs;
    use tokio::sync::mpsc;

    /// Answers every prompt with the same category
    struct Fixed(&'static str);

    #[async_trait]
    impl TextGenerator for Fixed {
        async fn generate(&self, _prompt: &str, _chat: bool) -> Result<TokenStream> {
            let events = vec![
                GenerationEvent::Token(format!("CATEGORY: {}\n", self.0)),
                GenerationEvent::Token("CONFIDENCE: 0.9".to_string()),
                GenerationEvent::Completed,
            ];
            Ok(stream::iter(events).boxed())
        }
    }

    /// Never answers, never closes
    struct Hung;

    #[async_trait]
    impl TextGenerator for Hung {
        async fn generate(&self, _prompt: &str, _chat: bool) -> Result<TokenStream> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn pipeline(generator: Arc<dyn TextGenerator>, settings: CategorizationConfig) -> Pipeline {
        let config = AppConfig {
            categorization: settings.clone(),
            ..AppConfig::default()
        };
        let categorizer = Categorizer::new(
            config.rules.clone(),
            CategorySet::builtin(),
            Some(generator),
            settings,
        );
        Pipeline::new(config, categorizer)
    }

    fn inbox(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_partial_snapshots_every_three() {
        let dir = inbox(&["a.dat", "b.dat", "c.dat", "d.dat", "e.dat", "f.dat", "g.dat"]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline = pipeline(Arc::new(Fixed("work")), CategorizationConfig::default()).with_events(tx);

        let files = pipeline.scan(dir.path(), false).await.unwrap();
        let outcomes = pipeline.categorize(&files).await;
        assert_eq!(outcomes.len(), 7);
        assert!(outcomes.iter().all(|o| o.category.id == "work"));
        drop(pipeline);

        let mut partial_sizes = Vec::new();
        let mut scanned = 0;
        let mut completed = false;
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::Partial(snapshot) => partial_sizes.push(snapshot.len()),
                PipelineEvent::Scanned { total } => scanned = total,
                PipelineEvent::State(CategorizationState::CategorizationComplete(all)) => {
                    completed = all.len() == 7
                }
                _ => {}
            }
        }
        assert_eq!(partial_sizes, vec![3, 6]);
        assert_eq!(scanned, 7);
        assert!(completed);
    }

    #[tokio::test]
    async fn test_hung_generator_hits_outer_guard() {
        let settings = CategorizationConfig {
            response_timeout_secs: 0,
            ..CategorizationConfig::default()
        };
        let pipeline = pipeline(Arc::new(Hung), settings);
        let files = vec![FileDescriptor::detached("/tmp/xyz.dat")];

        let outcomes = pipeline.categorize(&files).await;
        assert_eq!(outcomes[0].confidence, 0.1);
        assert_eq!(outcomes[0].reasoning, "Error during categorization: timed out after 5s");
    }

    #[tokio::test]
    async fn test_session_apply_and_journal() {
        let dir = inbox(&["invoice_march.dat", "notes.txt", "mystery.dat"]);
        let journal_path = dir.path().join("journal.jsonl");
        let base = tempfile::tempdir().unwrap();

        let pipeline = pipeline(Arc::new(Fixed("to_delete")), CategorizationConfig::default())
            .with_store(SessionStore::in_memory().unwrap())
            .with_journal(MoveJournal::new(journal_path.clone()));

        let run = pipeline
            .run_session(dir.path(), false, Some(base.path()))
            .await
            .unwrap();
        let id = run.session_id.clone().unwrap();
        assert_eq!(run.plans.len(), 3);
        assert!(run.plans.iter().all(|p| p.selected));

        match pipeline.apply_session(&id, true).await.unwrap() {
            ApplyResult::Preview(moves) => assert_eq!(moves.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        assert!(dir.path().join("notes.txt").exists());

        let report = match pipeline.apply_session(&id, false).await.unwrap() {
            ApplyResult::Executed(report) => report,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(report.successful_moves, 3);
        assert!(base.path().join("Receipts").join("invoice_march.dat").exists());
        assert!(base.path().join("Documents").join("notes.txt").exists());
        assert!(base.path().join("To Delete").join("mystery.dat").exists());

        let store = pipeline.store().unwrap();
        let session = store.require_session(&id).unwrap();
        assert!(session.completed);
        assert_eq!(session.files_moved, 3);
        assert!(store.load_plans(&id).unwrap().iter().all(|p| p.executed));

        let journal = MoveJournal::new(journal_path);
        assert_eq!(journal.read_all().unwrap().len(), 3);

        // a second apply has nothing left to do
        match pipeline.apply_session(&id, false).await.unwrap() {
            ApplyResult::Executed(report) => assert_eq!(report.total_operations, 0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resume_restores_open_session() {
        let dir = inbox(&["invoice_march.dat", "mystery.dat"]);
        let base = tempfile::tempdir().unwrap();
        let pipeline = pipeline(Arc::new(Fixed("to_delete")), CategorizationConfig::default())
            .with_store(SessionStore::in_memory().unwrap());

        let run = pipeline
            .run_session(dir.path(), false, Some(base.path()))
            .await
            .unwrap();
        let id = run.session_id.clone().unwrap();

        let resumed = pipeline.resume_session(None).await.unwrap();
        assert_eq!(resumed.session.id, id);
        assert_eq!(resumed.outcomes, run.outcomes);
        assert_eq!(resumed.outcomes[0].source, DecisionSource::FilenamePattern);
        assert_eq!(resumed.outcomes[1].reasoning, "AI-powered categorization");
        let plans: Vec<RelocationPlan> = resumed.plans.iter().map(|p| p.plan.clone()).collect();
        assert_eq!(plans, run.plans);
        assert!(resumed.plans.iter().all(|p| !p.executed));

        pipeline.apply_session(&id, false).await.unwrap();
        assert!(matches!(
            pipeline.resume_session(None).await,
            Err(TaxisError::SessionNotFound(_))
        ));
        let finished = pipeline.resume_session(Some(&id)).await.unwrap();
        assert!(finished.session.completed);
        assert!(finished.plans.iter().all(|p| p.executed));
    }

    #[tokio::test]
    async fn test_apply_unknown_session() {
        let pipeline = pipeline(Arc::new(Fixed("work")), CategorizationConfig::default())
            .with_store(SessionStore::in_memory().unwrap());
        assert!(matches!(
            pipeline.apply_session("nope", false).await,
            Err(TaxisError::SessionNotFound(_))
        ));
    }
}
