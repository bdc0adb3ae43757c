// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Category definitions and the built-in category set

use serde::{Deserialize, Serialize};

use crate::{Result, TaxisError};

/// Coarse file classes derived from the extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Document,
    Image,
    Video,
    Audio,
    Archive,
    Spreadsheet,
    Presentation,
    Code,
    Other,
}

impl FileKind {
    const TABLE: &'static [(FileKind, &'static [&'static str])] = &[
        (FileKind::Document, &["pdf", "doc", "docx", "txt", "rtf", "odt"]),
        (FileKind::Image, &["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"]),
        (FileKind::Video, &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm"]),
        (FileKind::Audio, &["mp3", "wav", "flac", "aac", "ogg", "m4a"]),
        (FileKind::Archive, &["zip", "rar", "7z", "tar", "gz", "bz2"]),
        (FileKind::Spreadsheet, &["xls", "xlsx", "csv", "ods"]),
        (FileKind::Presentation, &["ppt", "pptx", "odp"]),
        (FileKind::Code, &["java", "kt", "py", "js", "html", "css", "cpp", "c", "h"]),
    ];

    /// Classify an extension (case-insensitive, without the dot)
    pub fn from_extension(extension: &str) -> Self {
        let ext = extension.to_lowercase();
        Self::TABLE
            .iter()
            .find(|(_, exts)| exts.contains(&ext.as_str()))
            .map(|(kind, _)| *kind)
            .unwrap_or(FileKind::Other)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FileKind::Document => "Document",
            FileKind::Image => "Image",
            FileKind::Video => "Video",
            FileKind::Audio => "Audio",
            FileKind::Archive => "Archive",
            FileKind::Spreadsheet => "Spreadsheet",
            FileKind::Presentation => "Presentation",
            FileKind::Code => "Code",
            FileKind::Other => "Other",
        }
    }
}

/// A named bucket files are sorted into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub file_kinds: Vec<FileKind>,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub folder_path: Option<String>,
}

fn default_color() -> String {
    "#6200EE".to_string()
}

fn builtin(
    id: &str,
    name: &str,
    description: &str,
    keywords: &[&str],
    file_kinds: &[FileKind],
    color: &str,
) -> CategoryDefinition {
    CategoryDefinition {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        file_kinds: file_kinds.to_vec(),
        color: color.to_string(),
        is_default: true,
        folder_path: None,
    }
}

/// The eight built-in categories, in display order
pub fn default_categories() -> Vec<CategoryDefinition> {
    use FileKind::*;

    vec![
        builtin(
            "receipts",
            "Receipts",
            "Purchase receipts, invoices, and transaction records",
            &["receipt", "invoice", "purchase", "payment", "transaction", "bill"],
            &[Document, Image],
            "#4CAF50",
        ),
        builtin(
            "work",
            "Work",
            "Work-related documents, presentations, and files",
            &["work", "office", "business", "meeting", "project", "report", "presentation"],
            &[Document, Presentation, Spreadsheet],
            "#2196F3",
        ),
        builtin(
            "id_docs",
            "ID Documents",
            "Identity documents, licenses, certificates",
            &["id", "license", "passport", "certificate", "identity", "driver", "social security"],
            &[Document, Image],
            "#FF9800",
        ),
        builtin(
            "personal",
            "Personal",
            "Personal photos, documents, and files",
            &["personal", "family", "photo", "vacation", "birthday", "wedding"],
            &[Image, Video, Document],
            "#E91E63",
        ),
        builtin(
            "downloads",
            "Downloads",
            "Downloaded files, installers, and temporary files",
            &["download", "installer", "setup", "temp", "cache"],
            &[Archive, Other],
            "#9C27B0",
        ),
        builtin(
            "media",
            "Media",
            "Entertainment media files",
            &["movie", "music", "song", "video", "entertainment", "media"],
            &[Video, Audio],
            "#F44336",
        ),
        builtin(
            "documents",
            "Documents",
            "General documents, PDFs, text files, and office files",
            &["document", "pdf", "text", "word", "excel", "powerpoint", "office"],
            &[Document],
            "#795548",
        ),
        builtin(
            "to_delete",
            "To Delete",
            "Files that can be safely deleted",
            &["temp", "cache", "old", "duplicate", "trash", "junk"],
            &[Other],
            "#607D8B",
        ),
    ]
}

/// Id of the category used when nothing else matches
pub const FALLBACK_CATEGORY_ID: &str = "downloads";

/// Non-empty, ordered set of active categories
#[derive(Debug, Clone, PartialEq)]
pub struct CategorySet {
    categories: Vec<CategoryDefinition>,
}

impl CategorySet {
    pub fn new(categories: Vec<CategoryDefinition>) -> Result<Self> {
        if categories.is_empty() {
            return Err(TaxisError::EmptyCategorySet);
        }
        Ok(Self { categories })
    }

    pub fn builtin() -> Self {
        Self {
            categories: default_categories(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CategoryDefinition> {
        self.categories.iter()
    }

    pub fn as_slice(&self) -> &[CategoryDefinition] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Exact id lookup, used by the rule tables
    pub fn find_by_id(&self, id: &str) -> Option<&CategoryDefinition> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn find_by_id_ignore_case(&self, id: &str) -> Option<&CategoryDefinition> {
        self.categories.iter().find(|c| c.id.eq_ignore_ascii_case(id))
    }

    pub fn find_by_name_ignore_case(&self, name: &str) -> Option<&CategoryDefinition> {
        self.categories
            .iter()
            .find(|c| c.name.to_lowercase() == name.to_lowercase())
    }

    /// The "downloads" category, or the first one when it is absent
    pub fn fallback(&self) -> &CategoryDefinition {
        self.find_by_id(FALLBACK_CATEGORY_ID)
            .unwrap_or(&self.categories[0])
    }

    /// Resolve an id, falling back when it is unknown
    pub fn resolve(&self, id: &str) -> &CategoryDefinition {
        self.find_by_id(id).unwrap_or_else(|| self.fallback())
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self::builtin()
    }
}
