//! Asynchronous out-of-process text extraction.
//!
//! An extraction service is an external component reached through a
//! transient connection: load the file, ask for the page count, then fetch
//! each page's text in order. Any failure along the way degrades to a
//! zero-page result so the crawl pipeline never stalls on a bad extractor.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ExtractionResult;

/// Opens transient connections to named extraction services.
#[async_trait]
pub trait ExtractorConnector: Send + Sync {
    async fn connect(&self, service_name: &str) -> Result<Box<dyn ExtractorConnection>>;
}

/// One live connection to an extraction service.
///
/// The remote call contract: `load_file`, then `page_count`, then
/// `words_for_page` for `0..page_count`. Dropping the connection releases it.
#[async_trait]
pub trait ExtractorConnection: Send {
    async fn load_file(&mut self, path: &Path) -> Result<()>;
    async fn page_count(&mut self) -> Result<u32>;
    async fn words_for_page(&mut self, page: u32) -> Result<String>;
}

/// Dispatches files to extraction services and collects per-page text.
pub struct ExtractionClient {
    connector: Arc<dyn ExtractorConnector>,
}

impl ExtractionClient {
    pub fn new(connector: Arc<dyn ExtractorConnector>) -> Self {
        Self { connector }
    }

    /// Extracts per-page text for `file` via the named service.
    ///
    /// Resolves immediately with a zero-page result when no service matched,
    /// and degrades to a zero-page result on any connection or remote
    /// failure. Never fails the pipeline.
    pub async fn extract(&self, file: &Path, service: Option<&str>) -> ExtractionResult {
        let Some(service_name) = service else {
            return ExtractionResult::empty(file);
        };
        match self.try_extract(file, service_name).await {
            Ok(result) => result,
            Err(error) => {
                log::warn!(
                    "extraction via {:?} failed for {}, indexing metadata only: {}",
                    service_name,
                    file.display(),
                    error
                );
                ExtractionResult::empty(file)
            }
        }
    }

    async fn try_extract(&self, file: &Path, service_name: &str) -> Result<ExtractionResult> {
        let mut connection = self.connector.connect(service_name).await?;
        connection.load_file(file).await?;
        let page_count = connection.page_count().await?;
        let mut pages = Vec::with_capacity(page_count as usize);
        for page in 0..page_count {
            pages.push(connection.words_for_page(page).await?);
        }
        // connection dropped here; no persistent per-file binding
        Ok(ExtractionResult {
            file: file.to_path_buf(),
            pages,
        })
    }
}
