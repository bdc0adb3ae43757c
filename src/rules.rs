// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Heuristic categorization: file-type rules, then filename patterns
//!
//! Both tiers are pure lookups over the descriptor. When neither matches,
//! the caller defers to the model. The rule-based fallback at the bottom is
//! what the model path degrades to when it cannot produce an answer.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::categories::{CategorySet, FileKind};
use crate::descriptor::FileDescriptor;
use crate::outcome::{CategorizationOutcome, DecisionSource};

/// Confidence assigned by the rule-based fallback
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

pub const FALLBACK_REASONING: &str =
    "Rule-based fallback categorization (AI model not available or failed)";

/// Tier 1 entry: a class of extensions mapped to a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRule {
    pub label: String,
    pub extensions: Vec<String>,
    pub category: String,
    pub confidence: f64,
    /// Target folder label for files outside a downloads folder
    pub folder: String,
    /// Target folder label for files found under a downloads folder
    pub download_folder: String,
}

/// Tier 2 entry: filename keywords mapped to a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub label: String,
    pub keywords: Vec<String>,
    pub category: String,
    pub confidence: f64,
}

/// Ordered rule tables for both heuristic tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default = "default_type_rules")]
    pub type_rules: Vec<TypeRule>,
    #[serde(default = "default_pattern_rules")]
    pub pattern_rules: Vec<PatternRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            type_rules: default_type_rules(),
            pattern_rules: default_pattern_rules(),
        }
    }
}

fn type_rule(
    label: &str,
    extensions: &[&str],
    category: &str,
    confidence: f64,
    folder: &str,
    download_folder: &str,
) -> TypeRule {
    TypeRule {
        label: label.to_string(),
        extensions: extensions.iter().map(|e| e.to_string()).collect(),
        category: category.to_string(),
        confidence,
        folder: folder.to_string(),
        download_folder: download_folder.to_string(),
    }
}

fn pattern_rule(label: &str, keywords: &[&str], category: &str, confidence: f64) -> PatternRule {
    PatternRule {
        label: label.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        category: category.to_string(),
        confidence,
    }
}

pub fn default_type_rules() -> Vec<TypeRule> {
    vec![
        type_rule("PDF", &["pdf"], "documents", 0.95, "Documents", "Documents/PDF"),
        type_rule("Word", &["doc", "docx", "odt", "rtf"], "documents", 0.95, "Documents", "Documents/Word"),
        type_rule("Spreadsheet", &["xls", "xlsx", "ods", "csv"], "documents", 0.95, "Documents", "Documents/Spreadsheets"),
        type_rule("Presentation", &["ppt", "pptx", "odp"], "documents", 0.95, "Documents", "Documents/Presentations"),
        type_rule("Image", &["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"], "media", 0.9, "Pictures", "Pictures/Downloads"),
        type_rule("Video", &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm"], "media", 0.9, "Movies", "Movies/Downloads"),
        type_rule("Audio", &["mp3", "wav", "flac", "aac", "ogg", "m4a"], "media", 0.9, "Music", "Music/Downloads"),
        type_rule("Archive", &["zip", "rar", "7z", "tar", "gz", "bz2"], "downloads", 0.85, "Downloads", "Downloads/Archives"),
        type_rule("Installer", &["exe", "msi", "dmg", "pkg", "deb", "rpm", "apk"], "downloads", 0.9, "Downloads", "Downloads/Software"),
        type_rule("Text", &["txt", "md", "log"], "documents", 0.8, "Documents", "Documents/Text"),
    ]
}

pub fn default_pattern_rules() -> Vec<PatternRule> {
    vec![
        pattern_rule("Financial document", &["receipt", "invoice", "bill"], "receipts", 0.95),
        pattern_rule(
            "Work document",
            &["meeting", "work", "project", "report", "presentation"],
            "work",
            0.9,
        ),
        pattern_rule(
            "ID document",
            &["passport", "license", "id", "certificate", "driver"],
            "id_docs",
            0.95,
        ),
        pattern_rule("Personal document", &["vacation", "personal", "family"], "personal", 0.85),
    ]
}

/// True when some component of the path looks like a downloads folder
pub fn is_in_downloads(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(part) => part.to_string_lossy().to_lowercase().starts_with("download"),
        _ => false,
    })
}

impl RuleSet {
    /// Tier 1 then Tier 2; `None` means the model has to decide
    pub fn quick_categorize(
        &self,
        descriptor: &FileDescriptor,
        categories: &CategorySet,
    ) -> Option<CategorizationOutcome> {
        self.by_file_type(descriptor, categories)
            .or_else(|| self.by_filename_pattern(descriptor, categories))
    }

    /// Tier 1: first rule listing the extension whose category exists
    pub fn by_file_type(
        &self,
        descriptor: &FileDescriptor,
        categories: &CategorySet,
    ) -> Option<CategorizationOutcome> {
        let extension = descriptor.extension.to_lowercase();
        if extension.is_empty() {
            return None;
        }

        let in_downloads = is_in_downloads(&descriptor.path);

        self.type_rules
            .iter()
            .filter(|rule| rule.extensions.iter().any(|e| e.eq_ignore_ascii_case(&extension)))
            .find_map(|rule| {
                let category = categories.find_by_id(&rule.category)?;
                let folder = if in_downloads { &rule.download_folder } else { &rule.folder };
                Some(CategorizationOutcome::new(
                    descriptor.clone(),
                    category.clone(),
                    rule.confidence,
                    format!("File type: {} -> {}", rule.label, folder),
                    DecisionSource::FileType,
                ))
            })
    }

    /// Tier 2: first rule with a keyword contained in the lowercased name
    pub fn by_filename_pattern(
        &self,
        descriptor: &FileDescriptor,
        categories: &CategorySet,
    ) -> Option<CategorizationOutcome> {
        let file_name = descriptor.name.to_lowercase();

        self.pattern_rules
            .iter()
            .filter(|rule| rule.keywords.iter().any(|k| file_name.contains(&k.to_lowercase())))
            .find_map(|rule| {
                let category = categories.find_by_id(&rule.category)?;
                Some(CategorizationOutcome::new(
                    descriptor.clone(),
                    category.clone(),
                    rule.confidence,
                    format!("Pattern: {}", rule.label),
                    DecisionSource::FilenamePattern,
                ))
            })
    }
}

/// Coarse keyword/type guess used when the model path gives no answer
pub fn rule_based_fallback(descriptor: &FileDescriptor, categories: &CategorySet) -> CategorizationOutcome {
    let name = descriptor.name.to_lowercase();
    let contains_any = |words: &[&str]| words.iter().any(|w| name.contains(w));

    let id = if contains_any(&["receipt", "invoice", "bill"]) {
        "receipts"
    } else if contains_any(&["work", "office", "business"]) {
        "work"
    } else if contains_any(&["id", "license", "passport"]) {
        "id_docs"
    } else {
        match descriptor.kind() {
            FileKind::Image | FileKind::Video => "personal",
            FileKind::Audio => "media",
            _ => "downloads",
        }
    };

    CategorizationOutcome::new(
        descriptor.clone(),
        categories.resolve(id).clone(),
        FALLBACK_CONFIDENCE,
        FALLBACK_REASONING,
        DecisionSource::RuleFallback,
    )
}
