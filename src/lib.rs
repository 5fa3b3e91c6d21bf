//! Paginated full-text indexing and search for crawled files.
//!
//! This crate provides the core indexing pipeline:
//! - Manifest-based discovery of text-extraction services
//! - Filesystem crawl with staleness checks and task admission
//! - Page-granular document store with replace-on-reindex writes
//! - Windowed, highlighted search with page-anchored ordering
//! - Session lifecycle tying crawl, extraction, and indexing together

pub mod builder;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod queue;
pub mod registry;
pub mod search;
pub mod session;
pub mod store;
pub mod types;

// Re-export main types
pub use builder::IndexBuilder;
pub use crawler::{Crawler, MAX_OUTSTANDING_TASKS};
pub use error::{IndexError, Result};
pub use extract::{ExtractionClient, ExtractorConnection, ExtractorConnector};
pub use queue::TaskQueue;
pub use registry::{ServiceDescriptor, ServiceRegistry, MANIFEST_SUFFIX};
pub use search::{QueryKind, QueryRequest, Searcher};
pub use session::{CrawlState, IndexSession, SessionConfig};
pub use store::IndexStore;
pub use types::{ExtractionResult, MetaRecord, PageResult, Staleness};
