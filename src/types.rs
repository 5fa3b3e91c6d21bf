//! Core data types shared across the crawl, extraction, and search pipeline.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Per-page plain text produced for one file by an extraction service.
///
/// `pages` may be empty, meaning the file is indexed by path/name only.
/// Consumed exactly once by the index builder, then discarded.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub file: PathBuf,
    pub pages: Vec<String>,
}

impl ExtractionResult {
    /// A result carrying no page text. The file is still indexed by path.
    pub fn empty(file: &Path) -> Self {
        Self {
            file: file.to_path_buf(),
            pages: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Whether a file's indexed content is current relative to its mtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Meta document exists and its timestamp matches the file.
    Current,
    /// Meta document exists but records a different modification time.
    Stale,
    /// No meta document for this file.
    Missing,
}

impl Staleness {
    pub fn needs_index(self) -> bool {
        !matches!(self, Self::Current)
    }
}

/// One search hit: a page of a file plus its matching fragments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// Best-matching text fragments, possibly empty on a highlighting failure.
    pub snippets: Vec<String>,
    /// Zero-based page index within the source file.
    pub page: u64,
    /// Path of the file this page belongs to.
    pub source_path: String,
}

/// The stored bookkeeping record for one indexed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRecord {
    pub path: String,
    pub last_modified: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_has_no_pages() {
        let result = ExtractionResult::empty(Path::new("/tmp/a.pdf"));
        assert!(result.is_empty());
        assert_eq!(result.file, Path::new("/tmp/a.pdf"));
    }

    #[test]
    fn only_current_skips_reindexing() {
        assert!(!Staleness::Current.needs_index());
        assert!(Staleness::Stale.needs_index());
        assert!(Staleness::Missing.needs_index());
    }

    #[test]
    fn page_result_serializes_with_stable_field_names() {
        let result = PageResult {
            snippets: vec!["<b>invoice</b> total".to_string()],
            page: 3,
            source_path: "/docs/report.pdf".to_string(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["page"], 3);
        assert_eq!(json["source_path"], "/docs/report.pdf");
        assert_eq!(json["snippets"][0], "<b>invoice</b> total");

        let back: PageResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.page, result.page);
        assert_eq!(back.source_path, result.source_path);
    }
}
