//! Tantivy-backed document store.
//!
//! Two document shapes share one index:
//! - page documents: `id` = `path:page`, with `path`, `page`, and `text`
//! - meta documents: `id` = `path:meta`, with `path` and `lastModified`
//!
//! Field names are a stable contract; other tooling reads them as-is.
//! The store is single-writer (the index builder) and multi-reader;
//! readers observe a recent snapshot and must reload to see new commits.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, Value, FAST, INDEXED, STORED, STRING, TEXT,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::error::Result;
use crate::types::{MetaRecord, Staleness};

pub const FIELD_ID: &str = "id";
pub const FIELD_PATH: &str = "path";
pub const FIELD_PAGE: &str = "page";
pub const FIELD_TEXT: &str = "text";
pub const FIELD_LAST_MODIFIED: &str = "lastModified";

/// Heap budget handed to the single tantivy writer.
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Resolved schema fields for the index.
#[derive(Debug, Clone, Copy)]
pub struct StoreFields {
    pub id: Field,
    pub path: Field,
    pub page: Field,
    pub text: Field,
    pub last_modified: Field,
}

/// An open document store rooted at a storage directory.
pub struct IndexStore {
    index: Index,
    reader: IndexReader,
    fields: StoreFields,
    storage_dir: PathBuf,
}

impl IndexStore {
    /// Opens the store at `storage_dir`, creating it (and the directory)
    /// if absent. Failure here is fatal to the crawl session.
    pub fn open(storage_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(storage_dir)?;
        let schema = build_schema();
        let directory = MmapDirectory::open(storage_dir).map_err(tantivy::TantivyError::from)?;
        let index = Index::open_or_create(directory, schema.clone())?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let fields = resolve_fields(&schema);
        Ok(Self {
            index,
            reader,
            fields,
            storage_dir: storage_dir.to_path_buf(),
        })
    }

    pub fn fields(&self) -> StoreFields {
        self.fields
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Resolves a contract field name (`id`, `path`, `page`, `text`,
    /// `lastModified`) to its schema field.
    pub fn field(&self, name: &str) -> Result<Field> {
        Ok(self.index.schema().get_field(name)?)
    }

    /// Creates the single index writer. At most one may exist at a time.
    pub fn writer(&self) -> Result<IndexWriter> {
        Ok(self.index.writer(WRITER_HEAP_BYTES)?)
    }

    /// Picks up commits made since the last reload.
    pub fn reload(&self) -> Result<()> {
        self.reader.reload()?;
        Ok(())
    }

    pub fn searcher(&self) -> tantivy::Searcher {
        self.reader.searcher()
    }

    /// Compares the stored meta timestamp for `path` against the file's
    /// modification time. Reads the current reader snapshot; callers
    /// wanting fresh results reload first.
    pub fn check_staleness(&self, path: &Path, file_modified_millis: u64) -> Result<Staleness> {
        match self.fetch_meta(path)? {
            None => Ok(Staleness::Missing),
            Some(meta) if meta.last_modified == file_modified_millis => Ok(Staleness::Current),
            Some(_) => Ok(Staleness::Stale),
        }
    }

    /// Fetches the meta document for `path`, if one exists.
    pub fn fetch_meta(&self, path: &Path) -> Result<Option<MetaRecord>> {
        let meta_id = meta_doc_id(path);
        let query = exact_term_query(self.fields.id, &meta_id);
        let searcher = self.reader.searcher();
        let hits = searcher.search(&query, &TopDocs::with_limit(1))?;
        let Some((_score, address)) = hits.first() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(*address)?;
        let path = doc
            .get_first(self.fields.path)
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string();
        let last_modified = doc
            .get_first(self.fields.last_modified)
            .and_then(|value| value.as_u64())
            .unwrap_or(0);
        Ok(Some(MetaRecord {
            path,
            last_modified,
        }))
    }
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field(FIELD_ID, STRING | STORED);
    builder.add_text_field(FIELD_PATH, STRING | STORED);
    builder.add_u64_field(FIELD_PAGE, INDEXED | STORED | FAST);
    builder.add_text_field(FIELD_TEXT, TEXT | STORED);
    builder.add_u64_field(FIELD_LAST_MODIFIED, INDEXED | STORED);
    builder.build()
}

fn resolve_fields(schema: &Schema) -> StoreFields {
    StoreFields {
        id: schema.get_field(FIELD_ID).expect("schema field id"),
        path: schema.get_field(FIELD_PATH).expect("schema field path"),
        page: schema.get_field(FIELD_PAGE).expect("schema field page"),
        text: schema.get_field(FIELD_TEXT).expect("schema field text"),
        last_modified: schema
            .get_field(FIELD_LAST_MODIFIED)
            .expect("schema field lastModified"),
    }
}

/// `path:page` composite id for one page document.
pub fn page_doc_id(path: &Path, page: usize) -> String {
    format!("{}:{}", path.display(), page)
}

/// `path:meta` id for a file's bookkeeping document.
pub fn meta_doc_id(path: &Path) -> String {
    format!("{}:meta", path.display())
}

/// A single required exact-term match wrapped as a boolean query.
pub fn exact_term_query(field: Field, value: &str) -> BooleanQuery {
    let term: Box<dyn Query> = Box::new(TermQuery::new(
        Term::from_field_text(field, value),
        IndexRecordOption::Basic,
    ));
    BooleanQuery::new(vec![(Occur::Must, term)])
}

/// Converts a file modification time to epoch milliseconds.
pub fn modified_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

/// Reads a file's modification time as epoch milliseconds.
pub fn file_modified_millis(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path)?;
    Ok(modified_millis(metadata.modified()?))
}
