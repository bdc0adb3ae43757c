// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Categorization outcomes and pipeline states

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::categories::CategoryDefinition;
use crate::descriptor::FileDescriptor;
use crate::relocation::RelocationReport;

/// Which stage decided an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    FileType,
    FilenamePattern,
    Model,
    RuleFallback,
    Error,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::FileType => "file_type",
            DecisionSource::FilenamePattern => "filename_pattern",
            DecisionSource::Model => "model",
            DecisionSource::RuleFallback => "rule_fallback",
            DecisionSource::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "file_type" => Some(DecisionSource::FileType),
            "filename_pattern" => Some(DecisionSource::FilenamePattern),
            "model" => Some(DecisionSource::Model),
            "rule_fallback" => Some(DecisionSource::RuleFallback),
            "error" => Some(DecisionSource::Error),
            _ => None,
        }
    }
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of assigning a category to one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationOutcome {
    pub descriptor: FileDescriptor,
    pub category: CategoryDefinition,
    /// Always within 0.0..=1.0
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub confirmed: bool,
    pub source: DecisionSource,
}

impl CategorizationOutcome {
    pub fn new(
        descriptor: FileDescriptor,
        category: CategoryDefinition,
        confidence: f64,
        reasoning: impl Into<String>,
        source: DecisionSource,
    ) -> Self {
        Self {
            descriptor,
            category,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            confirmed: false,
            source,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn confirm(&mut self, confirmed: bool) {
        self.confirmed = confirmed;
    }
}

/// Coarse state of a categorization run, as shown to an observer
#[derive(Debug, Clone)]
pub enum CategorizationState {
    Idle,
    ScanningDirectory,
    CategorizingFiles { progress: f32, current_file: String },
    CategorizationComplete(Vec<CategorizationOutcome>),
    MovingFiles { progress: f32, current_file: String },
    FilesMoved(RelocationReport),
    Failed(String),
}

impl CategorizationState {
    /// Short human readable status line
    pub fn describe(&self) -> String {
        match self {
            CategorizationState::Idle => "idle".to_string(),
            CategorizationState::ScanningDirectory => "scanning directory".to_string(),
            CategorizationState::CategorizingFiles { progress, current_file } => {
                format!("categorizing {} ({:.0}%)", current_file, progress * 100.0)
            }
            CategorizationState::CategorizationComplete(results) => {
                format!("categorized {} files", results.len())
            }
            CategorizationState::MovingFiles { progress, current_file } => {
                format!("moving {} ({:.0}%)", current_file, progress * 100.0)
            }
            CategorizationState::FilesMoved(report) => format!(
                "moved {} of {} files",
                report.successful_moves, report.total_operations
            ),
            CategorizationState::Failed(error) => format!("failed: {}", error),
        }
    }
}
