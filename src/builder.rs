//! Staleness-aware index writes.
//!
//! The builder owns the store's single writer and is driven from the
//! consumer thread draining the task queue. Re-indexing a file always
//! replaces its previous documents; it never duplicates them.

use std::path::Path;
use std::sync::Arc;

use tantivy::{doc, IndexWriter, Term};

use crate::error::Result;
use crate::store::{file_modified_millis, meta_doc_id, page_doc_id, IndexStore, StoreFields};
use crate::types::{ExtractionResult, Staleness};

pub struct IndexBuilder {
    store: Arc<IndexStore>,
    writer: IndexWriter,
    fields: StoreFields,
}

impl IndexBuilder {
    pub fn new(store: Arc<IndexStore>) -> Result<Self> {
        let writer = store.writer()?;
        let fields = store.fields();
        Ok(Self {
            store,
            writer,
            fields,
        })
    }

    /// See [`IndexStore::check_staleness`].
    pub fn check_staleness(&self, path: &Path, file_modified_millis: u64) -> Result<Staleness> {
        self.store.check_staleness(path, file_modified_millis)
    }

    /// Writes one page document per extracted page plus a fresh meta
    /// document, replacing anything previously indexed for the file.
    ///
    /// A result with no pages indexes the file by path only, so it is
    /// still discoverable by name.
    pub fn build_index(&mut self, result: &ExtractionResult) -> Result<()> {
        let path = result.file.as_path();
        let path_str = path.display().to_string();
        self.delete_documents_for(path);
        for (page, text) in result.pages.iter().enumerate() {
            self.writer.add_document(doc!(
                self.fields.id => page_doc_id(path, page),
                self.fields.path => path_str.clone(),
                self.fields.page => page as u64,
                self.fields.text => text.clone(),
            ))?;
        }
        self.add_meta_document(path)?;
        self.writer.commit()?;
        log::debug!(
            "indexed {} ({} page(s))",
            path.display(),
            result.pages.len()
        );
        Ok(())
    }

    /// Fallback when no extraction is available: writes only the meta
    /// document, marking the file indexed-without-content.
    pub fn build_meta_only(&mut self, path: &Path) -> Result<()> {
        self.delete_documents_for(path);
        self.add_meta_document(path)?;
        self.writer.commit()?;
        log::debug!("indexed {} (metadata only)", path.display());
        Ok(())
    }

    /// Deletes all page documents and the meta document for `path`.
    pub fn remove_index(&mut self, path: &Path) -> Result<()> {
        self.delete_documents_for(path);
        self.writer.commit()?;
        Ok(())
    }

    /// Flushes pending writes and releases the writer. Must be called once,
    /// after the crawl is fully drained.
    pub fn close(mut self) -> Result<()> {
        self.writer.commit()?;
        self.writer.wait_merging_threads()?;
        Ok(())
    }

    fn delete_documents_for(&mut self, path: &Path) {
        // one path term covers every page document and the meta document
        let term = Term::from_field_text(self.fields.path, &path.display().to_string());
        self.writer.delete_term(term);
    }

    fn add_meta_document(&mut self, path: &Path) -> Result<()> {
        let last_modified = match file_modified_millis(path) {
            Ok(millis) => millis,
            Err(error) => {
                // stays stale, retried on the next crawl
                log::warn!(
                    "unable to read mtime for {}: {}",
                    path.display(),
                    error
                );
                0
            }
        };
        self.writer.add_document(doc!(
            self.fields.id => meta_doc_id(path),
            self.fields.path => path.display().to_string(),
            self.fields.last_modified => last_modified,
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    use tantivy::collector::Count;

    use crate::store::exact_term_query;

    fn fixture() -> (tempfile::TempDir, Arc<IndexStore>, IndexBuilder, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(IndexStore::open(&dir.path().join("index")).unwrap());
        let builder = IndexBuilder::new(store.clone()).unwrap();
        let file = dir.path().join("report.pdf");
        fs::write(&file, b"raw bytes").unwrap();
        (dir, store, builder, file)
    }

    fn docs_for_path(store: &IndexStore, path: &Path) -> usize {
        store.reload().unwrap();
        let query = exact_term_query(store.fields().path, &path.display().to_string());
        store.searcher().search(&query, &Count).unwrap()
    }

    fn result_with_pages(file: &Path, pages: &[&str]) -> ExtractionResult {
        ExtractionResult {
            file: file.to_path_buf(),
            pages: pages.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn build_writes_one_doc_per_page_plus_meta() {
        let (_dir, store, mut builder, file) = fixture();
        builder
            .build_index(&result_with_pages(&file, &["alpha", "beta", "gamma"]))
            .unwrap();
        assert_eq!(docs_for_path(&store, &file), 4);
    }

    #[test]
    fn reindex_replaces_prior_documents() {
        let (_dir, store, mut builder, file) = fixture();
        builder
            .build_index(&result_with_pages(&file, &["a", "b", "c"]))
            .unwrap();
        builder
            .build_index(&result_with_pages(&file, &["only"]))
            .unwrap();
        // one page doc + one meta doc, nothing from the first version
        assert_eq!(docs_for_path(&store, &file), 2);
    }

    #[test]
    fn staleness_is_current_immediately_after_build() {
        let (_dir, store, mut builder, file) = fixture();
        let mtime = file_modified_millis(&file).unwrap();
        assert_eq!(
            builder.check_staleness(&file, mtime).unwrap(),
            Staleness::Missing
        );
        builder
            .build_index(&result_with_pages(&file, &["page text"]))
            .unwrap();
        store.reload().unwrap();
        assert_eq!(
            builder.check_staleness(&file, mtime).unwrap(),
            Staleness::Current
        );
        assert_eq!(
            builder.check_staleness(&file, mtime + 5).unwrap(),
            Staleness::Stale
        );
    }

    #[test]
    fn empty_result_writes_meta_only() {
        let (_dir, store, mut builder, file) = fixture();
        builder
            .build_index(&ExtractionResult::empty(&file))
            .unwrap();
        assert_eq!(docs_for_path(&store, &file), 1);
        store.reload().unwrap();
        let meta = store.fetch_meta(&file).unwrap().unwrap();
        assert_eq!(meta.path, file.display().to_string());
        assert!(meta.last_modified > 0);
    }

    #[test]
    fn meta_only_fallback_matches_empty_result() {
        let (_dir, store, mut builder, file) = fixture();
        builder.build_meta_only(&file).unwrap();
        assert_eq!(docs_for_path(&store, &file), 1);
    }

    #[test]
    fn remove_deletes_pages_and_meta() {
        let (_dir, store, mut builder, file) = fixture();
        builder
            .build_index(&result_with_pages(&file, &["a", "b"]))
            .unwrap();
        assert_eq!(docs_for_path(&store, &file), 3);
        builder.remove_index(&file).unwrap();
        assert_eq!(docs_for_path(&store, &file), 0);
        store.reload().unwrap();
        assert!(store.fetch_meta(&file).unwrap().is_none());
    }

    #[test]
    fn builds_are_isolated_per_file() {
        let (dir, store, mut builder, file) = fixture();
        let other = dir.path().join("notes.txt");
        fs::write(&other, b"text").unwrap();
        builder
            .build_index(&result_with_pages(&file, &["a"]))
            .unwrap();
        builder
            .build_index(&result_with_pages(&other, &["b", "c"]))
            .unwrap();
        builder.remove_index(&file).unwrap();
        assert_eq!(docs_for_path(&store, &other), 3);
    }
}
