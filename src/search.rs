//! Query execution against the document store.
//!
//! Searches run against the reader's current snapshot (reloaded at the
//! start of each call) with a mandatory constraint filter, windowed paging,
//! optional "start at page N" ordering, and snippet highlighting for parsed
//! queries. Cancellation is cooperative: an interrupt flag is checked at
//! each major stage, and a cancelled call returns `Ok(None)` with the flag
//! left set — callers reset it explicitly before reuse.

pub mod order;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, RegexQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{SnippetGenerator, TantivyDocument, Term};

use crate::error::{IndexError, Result};
use crate::store::IndexStore;
use crate::types::PageResult;
use order::paged_ordering;

/// How the `term` of a request is turned into a store query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Wildcard containment (`*term*`) on the target field; no highlighting,
    /// the literal term is returned as the single snippet.
    Boolean,
    /// `term` is parsed as a structured query expression; hits are
    /// highlighted.
    Standard,
}

/// One search invocation. Immutable, never persisted.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub term: String,
    /// Contract field name the query targets (usually `text` or `path`).
    pub field: String,
    /// Field the mandatory constraint applies to.
    pub constraint_field: String,
    /// Required exact matches on `constraint_field`, all of which must hold.
    pub constraint_values: Vec<String>,
    pub results_per_page: usize,
    /// Zero-based window index over the full hit set.
    pub page_set: usize,
    pub kind: QueryKind,
    /// When set, hits with `page >= start_page` sort before earlier pages.
    pub start_page: Option<u64>,
}

struct Hit {
    page: Option<u64>,
    path: String,
    doc: TantivyDocument,
}

/// Read-side search engine over the shared store.
pub struct Searcher {
    store: Arc<IndexStore>,
    interrupt: AtomicBool,
}

impl Searcher {
    pub fn new(store: Arc<IndexStore>) -> Self {
        Self {
            store,
            interrupt: AtomicBool::new(false),
        }
    }

    /// Requests cancellation of the in-progress search. Returns the previous
    /// flag value. The flag stays set until [`Self::reset_interrupt`].
    pub fn interrupt(&self) -> bool {
        self.interrupt.swap(true, Ordering::SeqCst)
    }

    pub fn reset_interrupt(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Executes `request` and returns the hits of its result window, or
    /// `Ok(None)` if the call observed an interrupt.
    pub fn find(&self, request: &QueryRequest) -> Result<Option<Vec<PageResult>>> {
        if self.interrupted() {
            return Ok(None);
        }
        let query = self.build_query(request)?;
        if self.interrupted() {
            return Ok(None);
        }

        self.store.reload()?;
        let searcher = self.store.searcher();
        let hits = match self.windowed_hits(&searcher, query.as_ref(), request)? {
            Some(hits) => hits,
            None => return Ok(None),
        };

        let highlighter = match request.kind {
            QueryKind::Boolean => None,
            QueryKind::Standard => self.make_highlighter(&searcher, query.as_ref()),
        };

        let mut results = Vec::new();
        let mut produced = 0usize;
        for hit in hits {
            if self.interrupted() {
                return Ok(None);
            }
            if produced >= request.results_per_page {
                break;
            }
            // bookkeeping documents carry no page and are never returned
            let Some(page) = hit.page else {
                continue;
            };
            let snippets = match (&highlighter, request.kind) {
                (_, QueryKind::Boolean) => vec![request.term.clone()],
                (Some(generator), QueryKind::Standard) => {
                    let fragment = generator.snippet_from_doc(&hit.doc);
                    let fragment = fragment.fragment().trim();
                    if fragment.is_empty() {
                        Vec::new()
                    } else {
                        vec![fragment.to_string()]
                    }
                }
                // highlighter construction failed: degrade, don't abort
                (None, QueryKind::Standard) => Vec::new(),
            };
            produced += snippets.len();
            results.push(PageResult {
                snippets,
                page,
                source_path: hit.path,
            });
        }
        if self.interrupted() {
            return Ok(None);
        }
        log::debug!("search for {:?} produced {} hit(s)", request.term, results.len());
        Ok(Some(results))
    }

    /// Like [`Self::find`] but returns only the distinct matching file
    /// paths of the result window, without highlighting.
    pub fn find_paths(&self, request: &QueryRequest) -> Result<Option<Vec<String>>> {
        if self.interrupted() {
            return Ok(None);
        }
        let query = self.build_query(request)?;
        if self.interrupted() {
            return Ok(None);
        }

        self.store.reload()?;
        let searcher = self.store.searcher();
        let hits = match self.windowed_hits(&searcher, query.as_ref(), request)? {
            Some(hits) => hits,
            None => return Ok(None),
        };

        let mut paths = Vec::new();
        for hit in hits {
            if self.interrupted() {
                return Ok(None);
            }
            if !paths.contains(&hit.path) {
                paths.push(hit.path);
            }
        }
        Ok(Some(paths))
    }

    /// Fetches the first stored document matching an exact term, if any.
    pub fn get_document(&self, field: &str, value: &str) -> Result<Option<TantivyDocument>> {
        self.store.reload()?;
        let field = self.store.field(field)?;
        let query = crate::store::exact_term_query(field, value);
        let searcher = self.store.searcher();
        let hits = searcher.search(&query, &TopDocs::with_limit(1))?;
        match hits.first() {
            Some((_score, address)) => Ok(Some(searcher.doc(*address)?)),
            None => Ok(None),
        }
    }

    /// Single-hit existence probe for an exact term.
    pub fn check_exists(&self, field: &str, value: &str) -> Result<bool> {
        Ok(self.get_document(field, value)?.is_some())
    }

    fn build_query(&self, request: &QueryRequest) -> Result<Box<dyn Query>> {
        let field = self.store.field(&request.field)?;
        let main: Box<dyn Query> = match request.kind {
            QueryKind::Boolean => Box::new(containment_query(field, &request.term)?),
            QueryKind::Standard => QueryParser::for_index(self.store.index(), vec![field])
                .parse_query(&request.term)
                .map_err(|error| IndexError::QueryParse(error.to_string()))?,
        };
        if request.constraint_values.is_empty() {
            return Ok(main);
        }
        let constraint_field = self.store.field(&request.constraint_field)?;
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, main)];
        for value in &request.constraint_values {
            let term: Box<dyn Query> = Box::new(TermQuery::new(
                Term::from_field_text(constraint_field, value),
                IndexRecordOption::Basic,
            ));
            clauses.push((Occur::Must, term));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    /// Runs the query with a hit limit covering the requested window, applies
    /// the paged ordering when asked for, and returns the window's hits.
    /// Returns `Ok(None)` on interrupt.
    fn windowed_hits(
        &self,
        searcher: &tantivy::Searcher,
        query: &dyn Query,
        request: &QueryRequest,
    ) -> Result<Option<Vec<Hit>>> {
        // a window that cannot be addressed in usize is past every hit
        let Some(window_start) = request.page_set.checked_mul(request.results_per_page) else {
            return Ok(Some(Vec::new()));
        };
        let Some(limit) = window_start.checked_add(request.results_per_page) else {
            return Ok(Some(Vec::new()));
        };
        let limit = limit.max(1);
        let addresses = searcher.search(query, &TopDocs::with_limit(limit))?;
        if self.interrupted() {
            return Ok(None);
        }

        let fields = self.store.fields();
        let mut hits = Vec::with_capacity(addresses.len());
        for (_score, address) in addresses {
            if self.interrupted() {
                return Ok(None);
            }
            let doc: TantivyDocument = searcher.doc(address)?;
            let page = doc.get_first(fields.page).and_then(|value| value.as_u64());
            let path = doc
                .get_first(fields.path)
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string();
            hits.push(Hit { page, path, doc });
        }

        if let Some(start_page) = request.start_page {
            hits.sort_by(|a, b| paged_ordering(a.page, b.page, start_page));
        }

        let window: Vec<Hit> = hits
            .into_iter()
            .skip(window_start)
            .take(request.results_per_page)
            .collect();
        Ok(Some(window))
    }

    fn make_highlighter(
        &self,
        searcher: &tantivy::Searcher,
        query: &dyn Query,
    ) -> Option<SnippetGenerator> {
        match SnippetGenerator::create(searcher, query, self.store.fields().text) {
            Ok(generator) => Some(generator),
            Err(error) => {
                log::warn!("highlighter unavailable, returning bare hits: {}", error);
                None
            }
        }
    }
}

/// Wildcard containment (`*term*`) compiled as a regex over the field's
/// term dictionary. The term itself is escaped literally.
fn containment_query(field: Field, term: &str) -> Result<RegexQuery> {
    let pattern = format!(".*{}.*", regex::escape(term));
    Ok(RegexQuery::from_pattern(&pattern, field)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use std::path::{Path, PathBuf};

    use crate::builder::IndexBuilder;
    use crate::store::{meta_doc_id, page_doc_id};
    use crate::types::ExtractionResult;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<IndexStore>,
        files: Vec<PathBuf>,
    }

    /// Indexes `page_counts.len()` files; file `i` gets `page_counts[i]`
    /// pages, each mentioning "invoice".
    fn fixture(page_counts: &[usize]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(IndexStore::open(&dir.path().join("index")).unwrap());
        let mut builder = IndexBuilder::new(store.clone()).unwrap();
        let mut files = Vec::new();
        for (i, count) in page_counts.iter().enumerate() {
            let file = dir.path().join(format!("doc{i}.txt"));
            fs::write(&file, b"source").unwrap();
            let pages = (0..*count)
                .map(|p| format!("invoice total page {p} of file {i}"))
                .collect();
            builder
                .build_index(&ExtractionResult {
                    file: file.clone(),
                    pages,
                })
                .unwrap();
            files.push(file);
        }
        builder.close().unwrap();
        Fixture {
            _dir: dir,
            store,
            files,
        }
    }

    fn standard_request(term: &str, k: usize, set: usize) -> QueryRequest {
        QueryRequest {
            term: term.to_string(),
            field: "text".to_string(),
            constraint_field: "path".to_string(),
            constraint_values: Vec::new(),
            results_per_page: k,
            page_set: set,
            kind: QueryKind::Standard,
            start_page: None,
        }
    }

    #[test]
    fn standard_query_returns_window_with_snippets() {
        let fx = fixture(&[12]);
        let searcher = Searcher::new(fx.store.clone());
        let results = searcher
            .find(&standard_request("invoice", 5, 0))
            .unwrap()
            .unwrap();
        assert_eq!(results.len(), 5);
        for result in &results {
            assert!(!result.snippets.is_empty());
            assert!(result.snippets[0].contains("invoice"));
        }
    }

    #[test]
    fn pagination_windows_cover_every_hit_exactly_once() {
        let fx = fixture(&[12]);
        let searcher = Searcher::new(fx.store.clone());
        let mut seen = HashSet::new();
        let mut sizes = Vec::new();
        for set in 0..4 {
            let results = searcher
                .find(&standard_request("invoice", 5, set))
                .unwrap()
                .unwrap();
            sizes.push(results.len());
            for result in results {
                assert!(
                    seen.insert((result.source_path.clone(), result.page)),
                    "hit repeated across windows"
                );
            }
        }
        assert_eq!(sizes, vec![5, 5, 2, 0]);
        assert_eq!(seen.len(), 12);
    }

    #[test]
    fn constraint_restricts_hits_to_one_file() {
        let fx = fixture(&[3, 3]);
        let searcher = Searcher::new(fx.store.clone());
        let target = fx.files[1].display().to_string();
        let mut request = standard_request("invoice", 10, 0);
        request.constraint_values = vec![target.clone()];
        let results = searcher.find(&request).unwrap().unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.source_path == target));
    }

    #[test]
    fn boolean_query_returns_term_as_snippet() {
        let fx = fixture(&[2]);
        let searcher = Searcher::new(fx.store.clone());
        let mut request = standard_request("invoice", 10, 0);
        request.kind = QueryKind::Boolean;
        let results = searcher.find(&request).unwrap().unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.snippets == vec!["invoice"]));
    }

    #[test]
    fn paged_variant_partitions_around_start_page() {
        let fx = fixture(&[8]);
        let searcher = Searcher::new(fx.store.clone());
        let mut request = standard_request("invoice", 8, 0);
        request.constraint_values = vec![fx.files[0].display().to_string()];
        request.start_page = Some(5);
        let results = searcher.find(&request).unwrap().unwrap();
        assert_eq!(results.len(), 8);
        let pages: Vec<u64> = results.iter().map(|r| r.page).collect();
        assert_eq!(pages, vec![5, 6, 7, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn unparseable_standard_query_reports_parse_error() {
        let fx = fixture(&[1]);
        let searcher = Searcher::new(fx.store.clone());
        let request = standard_request("invoice AND ((", 5, 0);
        match searcher.find(&request) {
            Err(IndexError::QueryParse(_)) => {}
            other => panic!("expected QueryParse error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_field_is_invalid_input() {
        let fx = fixture(&[1]);
        let searcher = Searcher::new(fx.store.clone());
        let mut request = standard_request("invoice", 5, 0);
        request.field = "nonsense".to_string();
        assert!(searcher.find(&request).is_err());
    }

    #[test]
    fn interrupt_cancels_and_flag_stays_set() {
        let fx = fixture(&[4]);
        let searcher = Searcher::new(fx.store.clone());
        assert!(!searcher.interrupt());
        assert!(searcher
            .find(&standard_request("invoice", 5, 0))
            .unwrap()
            .is_none());
        // flag is not auto-reset: the next call is cancelled too
        assert!(searcher
            .find(&standard_request("invoice", 5, 0))
            .unwrap()
            .is_none());
        assert!(searcher.interrupt());
        searcher.reset_interrupt();
        assert!(searcher
            .find(&standard_request("invoice", 5, 0))
            .unwrap()
            .is_some());
    }

    #[test]
    fn find_paths_returns_distinct_paths() {
        let fx = fixture(&[3, 2]);
        let searcher = Searcher::new(fx.store.clone());
        let paths = searcher
            .find_paths(&standard_request("invoice", 20, 0))
            .unwrap()
            .unwrap();
        assert_eq!(paths.len(), 2);
        let expected: HashSet<String> = fx
            .files
            .iter()
            .map(|f| f.display().to_string())
            .collect();
        assert_eq!(paths.into_iter().collect::<HashSet<_>>(), expected);
    }

    #[test]
    fn check_exists_probes_by_id() {
        let fx = fixture(&[2]);
        let searcher = Searcher::new(fx.store.clone());
        let file = Path::new(&fx.files[0]);
        assert!(searcher.check_exists("id", &meta_doc_id(file)).unwrap());
        assert!(searcher.check_exists("id", &page_doc_id(file, 1)).unwrap());
        assert!(!searcher.check_exists("id", &page_doc_id(file, 9)).unwrap());
    }

    #[test]
    fn out_of_range_window_is_empty() {
        let fx = fixture(&[3]);
        let searcher = Searcher::new(fx.store.clone());
        let request = standard_request("invoice", 5, usize::MAX);
        assert!(searcher.find(&request).unwrap().unwrap().is_empty());
        assert!(searcher.find_paths(&request).unwrap().unwrap().is_empty());

        let request = standard_request("invoice", usize::MAX, 1);
        assert!(searcher.find(&request).unwrap().unwrap().is_empty());
    }

    #[test]
    fn get_document_fetches_stored_fields_by_id() {
        let fx = fixture(&[2]);
        let searcher = Searcher::new(fx.store.clone());
        let doc = searcher
            .get_document("id", &page_doc_id(&fx.files[0], 1))
            .unwrap()
            .unwrap();
        let fields = fx.store.fields();
        let text = doc.get_first(fields.text).and_then(|v| v.as_str()).unwrap();
        assert!(text.contains("page 1"));
        assert_eq!(
            doc.get_first(fields.page).and_then(|v| v.as_u64()),
            Some(1)
        );
        assert!(searcher.get_document("id", "/no/such:doc").unwrap().is_none());
    }

    #[test]
    fn meta_documents_never_appear_in_results() {
        let fx = fixture(&[2]);
        let searcher = Searcher::new(fx.store.clone());
        // boolean containment on path matches page and meta docs alike;
        // only page-bearing documents may be returned
        let mut request = standard_request("doc0", 20, 0);
        request.field = "path".to_string();
        request.kind = QueryKind::Boolean;
        let results = searcher.find(&request).unwrap().unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.page < 2));
    }
}
