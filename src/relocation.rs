// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Relocation plans and the executor that carries them out

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::outcome::CategorizationOutcome;

/// A proposed move of one file into its category folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelocationPlan {
    pub source: PathBuf,
    pub destination_dir: PathBuf,
    pub file_name: String,
    pub category_id: String,
    pub category_name: String,
    pub selected: bool,
    pub confidence: f64,
    pub reasoning: String,
}

impl RelocationPlan {
    pub fn from_outcome(outcome: &CategorizationOutcome, base_dir: &Path, threshold: f64) -> Self {
        let category = &outcome.category;
        let destination_dir = match &category.folder_path {
            Some(folder) => base_dir.join(folder),
            None => base_dir.join(&category.name),
        };

        Self {
            source: outcome.descriptor.path.clone(),
            destination_dir,
            file_name: outcome.descriptor.name.clone(),
            category_id: category.id.clone(),
            category_name: category.name.clone(),
            selected: outcome.confidence > threshold,
            confidence: outcome.confidence,
            reasoning: outcome.reasoning.clone(),
        }
    }

    pub fn destination(&self) -> PathBuf {
        self.destination_dir.join(&self.file_name)
    }
}

/// One plan per outcome; confident ones start out selected
pub fn build_plans(
    outcomes: &[CategorizationOutcome],
    base_dir: &Path,
    threshold: f64,
) -> Vec<RelocationPlan> {
    outcomes
        .iter()
        .map(|o| RelocationPlan::from_outcome(o, base_dir, threshold))
        .collect()
}

/// Ordered plans with selection helpers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSet {
    plans: Vec<RelocationPlan>,
}

impl PlanSet {
    pub fn new(plans: Vec<RelocationPlan>) -> Self {
        Self { plans }
    }

    /// Flip one plan's selection; `None` when the index is out of range
    pub fn toggle(&mut self, index: usize) -> Option<bool> {
        let plan = self.plans.get_mut(index)?;
        plan.selected = !plan.selected;
        Some(plan.selected)
    }

    pub fn select_all(&mut self) {
        self.plans.iter_mut().for_each(|p| p.selected = true);
    }

    pub fn deselect_all(&mut self) {
        self.plans.iter_mut().for_each(|p| p.selected = false);
    }

    pub fn selected(&self) -> impl Iterator<Item = &RelocationPlan> {
        self.plans.iter().filter(|p| p.selected)
    }

    pub fn plans(&self) -> &[RelocationPlan] {
        &self.plans
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// Progress of an executing batch
#[derive(Debug, Clone, PartialEq)]
pub enum MoveProgress {
    Moving { progress: f32, current_file: String },
    Moved { file_name: String, new_path: PathBuf },
    Skipped { file_name: String, reason: String },
    MoveFailed { file_name: String, error: String },
    AllProcessed,
}

/// What happened to one plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlanResult {
    Moved { destination: PathBuf },
    Skipped { reason: String },
    Failed { error: String },
}

/// Summary of one executed batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelocationReport {
    /// Selected plans, i.e. moves that were attempted
    pub total_operations: usize,
    pub successful_moves: usize,
    pub failed_moves: usize,
    pub skipped_moves: usize,
    pub created_directories: Vec<PathBuf>,
    pub errors: Vec<String>,
    /// (source, final destination) of every successful move
    pub moved: Vec<(PathBuf, PathBuf)>,
    /// One entry per input plan, in plan order
    pub results: Vec<PlanResult>,
    pub duration: Duration,
}

impl RelocationReport {
    pub fn is_success(&self) -> bool {
        self.failed_moves == 0
    }
}

/// First free variant of `path`: `name.ext`, `name_1.ext`, `name_2.ext`, ...
pub fn unique_destination(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().to_string());

    let mut counter = 1;
    loop {
        let name = match &extension {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Where each selected plan would land, without touching anything
pub fn preview_plans(plans: &[RelocationPlan]) -> Vec<(PathBuf, PathBuf)> {
    plans
        .iter()
        .filter(|p| p.selected && p.source != p.destination())
        .map(|p| (p.source.clone(), unique_destination(&p.destination())))
        .collect()
}

fn relocate(plan: &RelocationPlan, created: &mut Vec<PathBuf>) -> std::io::Result<PathBuf> {
    if !plan.destination_dir.exists() {
        fs::create_dir_all(&plan.destination_dir)?;
        if !created.contains(&plan.destination_dir) {
            debug!("Created {:?}", plan.destination_dir);
            created.push(plan.destination_dir.clone());
        }
    }

    let target = unique_destination(&plan.destination());
    fs::rename(&plan.source, &target)?;
    Ok(target)
}

/// Execute plans in order. Failures are recorded and never stop the batch.
pub fn execute_plans<F>(plans: &[RelocationPlan], mut on_progress: F) -> RelocationReport
where
    F: FnMut(MoveProgress),
{
    let started = Instant::now();
    let mut report = RelocationReport {
        total_operations: plans.iter().filter(|p| p.selected).count(),
        ..RelocationReport::default()
    };

    for (index, plan) in plans.iter().enumerate() {
        if !plan.selected {
            report.skipped_moves += 1;
            report.results.push(PlanResult::Skipped {
                reason: "not selected".to_string(),
            });
            on_progress(MoveProgress::Skipped {
                file_name: plan.file_name.clone(),
                reason: "not selected".to_string(),
            });
            continue;
        }

        on_progress(MoveProgress::Moving {
            progress: index as f32 / plans.len() as f32,
            current_file: plan.file_name.clone(),
        });

        if plan.source == plan.destination() {
            report.skipped_moves += 1;
            report.results.push(PlanResult::Skipped {
                reason: "already in place".to_string(),
            });
            on_progress(MoveProgress::Skipped {
                file_name: plan.file_name.clone(),
                reason: "already in place".to_string(),
            });
            continue;
        }

        match relocate(plan, &mut report.created_directories) {
            Ok(target) => {
                info!("Moved {:?} -> {:?}", plan.source, target);
                report.successful_moves += 1;
                report.moved.push((plan.source.clone(), target.clone()));
                report.results.push(PlanResult::Moved {
                    destination: target.clone(),
                });
                on_progress(MoveProgress::Moved {
                    file_name: plan.file_name.clone(),
                    new_path: target,
                });
            }
            Err(e) => {
                warn!("Failed to move {:?}: {}", plan.source, e);
                report.failed_moves += 1;
                report.errors.push(format!("{}: {}", plan.file_name, e));
                report.results.push(PlanResult::Failed {
                    error: e.to_string(),
                });
                on_progress(MoveProgress::MoveFailed {
                    file_name: plan.file_name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    on_progress(MoveProgress::AllProcessed);
    report.duration = started.elapsed();

    info!(
        "Relocation finished: {} moved, {} failed, {} skipped",
        report.successful_moves, report.failed_moves, report.skipped_moves
    );

    report
}
