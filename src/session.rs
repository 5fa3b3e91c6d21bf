//! Crawl session lifecycle.
//!
//! Ties the registry, crawler, extraction client, task queue, and index
//! builder together behind a plain state machine:
//! `Idle -> Crawling -> Draining -> Stopped`. A session accepts one crawl
//! at a time; shutdown is deferred until the queue and outstanding tasks
//! are drained, then the writer is flushed and released exactly once.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::builder::IndexBuilder;
use crate::crawler::{Crawler, MAX_OUTSTANDING_TASKS};
use crate::error::{IndexError, Result};
use crate::extract::{ExtractionClient, ExtractorConnector};
use crate::queue::TaskQueue;
use crate::registry::ServiceRegistry;
use crate::search::Searcher;
use crate::store::IndexStore;

/// How long the consumer idles when the queue is empty.
const DRAIN_IDLE: Duration = Duration::from_millis(1);

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum CrawlState {
    Idle = 0,
    Crawling = 1,
    Draining = 2,
    Stopped = 3,
}

impl CrawlState {
    fn load(atomic: &AtomicU8) -> Self {
        match atomic.load(Ordering::SeqCst) {
            1 => Self::Crawling,
            2 => Self::Draining,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Crawling => "crawling",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where the document store lives. The crawler never descends here.
    pub storage_dir: PathBuf,
    /// Root of the service-manifest tree scanned at startup.
    pub manifest_dir: PathBuf,
    /// Admission ceiling for outstanding extraction tasks.
    pub max_outstanding_tasks: usize,
}

impl SessionConfig {
    pub fn new(storage_dir: PathBuf, manifest_dir: PathBuf) -> Self {
        Self {
            storage_dir,
            manifest_dir,
            max_outstanding_tasks: MAX_OUTSTANDING_TASKS,
        }
    }
}

struct SessionShared {
    state: AtomicU8,
    crawl_done: AtomicBool,
    stop_requested: AtomicBool,
    indexed_files: AtomicUsize,
    index_errors: AtomicUsize,
}

/// An open crawl-and-index session over one document store.
pub struct IndexSession {
    config: SessionConfig,
    store: Arc<IndexStore>,
    registry: Arc<ServiceRegistry>,
    client: Arc<ExtractionClient>,
    queue: Arc<TaskQueue>,
    outstanding: Arc<AtomicUsize>,
    abort: Arc<AtomicBool>,
    shared: Arc<SessionShared>,
    runtime: tokio::runtime::Runtime,
    consumer: Option<thread::JoinHandle<()>>,
    crawl_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl IndexSession {
    /// Opens the store, discovers extraction services, and starts the
    /// consumer thread. Store or writer initialization failure is fatal.
    pub fn open(config: SessionConfig, connector: Arc<dyn ExtractorConnector>) -> Result<Self> {
        let store = Arc::new(IndexStore::open(&config.storage_dir)?);
        let registry = Arc::new(ServiceRegistry::discover(&config.manifest_dir));
        let client = Arc::new(ExtractionClient::new(connector));
        let queue = Arc::new(TaskQueue::new());
        let outstanding = Arc::new(AtomicUsize::new(0));
        let abort = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(SessionShared {
            state: AtomicU8::new(CrawlState::Idle as u8),
            crawl_done: AtomicBool::new(true),
            stop_requested: AtomicBool::new(false),
            indexed_files: AtomicUsize::new(0),
            index_errors: AtomicUsize::new(0),
        });
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .map_err(IndexError::Io)?;

        let builder = IndexBuilder::new(store.clone())?;
        let consumer = spawn_consumer(
            builder,
            queue.clone(),
            outstanding.clone(),
            abort.clone(),
            shared.clone(),
        );

        Ok(Self {
            config,
            store,
            registry,
            client,
            queue,
            outstanding,
            abort,
            shared,
            runtime,
            consumer: Some(consumer),
            crawl_thread: Mutex::new(None),
        })
    }

    pub fn state(&self) -> CrawlState {
        CrawlState::load(&self.shared.state)
    }

    /// Files indexed so far in this session.
    pub fn indexed_files(&self) -> usize {
        self.shared.indexed_files.load(Ordering::SeqCst)
    }

    /// Per-file write failures so far; those files stay stale for retry.
    pub fn index_errors(&self) -> usize {
        self.shared.index_errors.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> Arc<IndexStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// A new independent reader over this session's store.
    pub fn searcher(&self) -> Searcher {
        Searcher::new(self.store.clone())
    }

    /// Starts crawling `root` on a dedicated thread.
    ///
    /// Refused while another crawl is active, once a stop has been
    /// requested, or after the session stopped.
    pub fn start_crawl(&self, root: &Path) -> Result<()> {
        if self.shared.stop_requested.load(Ordering::SeqCst) {
            return Err(IndexError::InvalidInput(
                "crawl refused, session stop already requested".to_string(),
            ));
        }
        if self
            .shared
            .state
            .compare_exchange(
                CrawlState::Idle as u8,
                CrawlState::Crawling as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(IndexError::InvalidInput(format!(
                "crawl refused while session is {}",
                self.state().as_str()
            )));
        }
        self.shared.crawl_done.store(false, Ordering::SeqCst);
        // a stop that raced the transition above must win, otherwise the
        // consumer could drain and close the store underneath this crawl
        if self.shared.stop_requested.load(Ordering::SeqCst) {
            self.shared.crawl_done.store(true, Ordering::SeqCst);
            let _ = self.shared.state.compare_exchange(
                CrawlState::Crawling as u8,
                CrawlState::Idle as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            return Err(IndexError::InvalidInput(
                "crawl refused, session stop already requested".to_string(),
            ));
        }

        let crawler = Crawler::new(
            self.registry.clone(),
            self.client.clone(),
            self.queue.clone(),
            self.store.clone(),
            self.outstanding.clone(),
            self.abort.clone(),
            self.runtime.handle().clone(),
            self.config.max_outstanding_tasks,
        );
        let root = root.to_path_buf();
        let shared = self.shared.clone();
        let handle = thread::spawn(move || {
            if let Err(error) = crawler.crawl(&root) {
                log::error!("crawl of {} failed: {}", root.display(), error);
            }
            shared.crawl_done.store(true, Ordering::SeqCst);
            let next = if shared.stop_requested.load(Ordering::SeqCst) {
                CrawlState::Draining
            } else {
                CrawlState::Idle
            };
            // the consumer finishes the Draining -> Stopped transition
            let _ = shared.state.compare_exchange(
                CrawlState::Crawling as u8,
                next as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        });

        let mut slot = self.crawl_thread.lock();
        if let Some(previous) = slot.take() {
            let _ = previous.join();
        }
        *slot = Some(handle);
        Ok(())
    }

    /// Asks the session to shut down once the crawl and queue are drained.
    pub fn stop_when_idle(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Stops as soon as possible, abandoning undrained work.
    pub fn force_stop(&self) {
        self.abort.store(true, Ordering::SeqCst);
        self.shared.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Blocks until the consumer has flushed and released the store.
    pub fn wait_until_stopped(mut self) -> Result<()> {
        if let Some(handle) = self.crawl_thread.lock().take() {
            handle
                .join()
                .map_err(|_| IndexError::Internal("crawl thread panicked".to_string()))?;
        }
        if let Some(handle) = self.consumer.take() {
            handle
                .join()
                .map_err(|_| IndexError::Internal("consumer thread panicked".to_string()))?;
        }
        Ok(())
    }
}

fn spawn_consumer(
    mut builder: IndexBuilder,
    queue: Arc<TaskQueue>,
    outstanding: Arc<AtomicUsize>,
    abort: Arc<AtomicBool>,
    shared: Arc<SessionShared>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        loop {
            let mut worked = false;
            while let Some(result) = queue.poll() {
                worked = true;
                let build_result = if result.is_empty() {
                    builder.build_meta_only(&result.file)
                } else {
                    builder.build_index(&result)
                };
                match build_result {
                    Ok(()) => {
                        shared.indexed_files.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(error) => {
                        shared.index_errors.fetch_add(1, Ordering::SeqCst);
                        log::warn!(
                            "index write failed for {}, left stale for retry: {}",
                            result.file.display(),
                            error
                        );
                    }
                }
                outstanding.fetch_sub(1, Ordering::SeqCst);
                if abort.load(Ordering::SeqCst) {
                    break;
                }
            }

            if shared.stop_requested.load(Ordering::SeqCst)
                && shared.crawl_done.load(Ordering::SeqCst)
            {
                let drained =
                    queue.is_empty() && outstanding.load(Ordering::SeqCst) == 0;
                if drained || abort.load(Ordering::SeqCst) {
                    break;
                }
                shared
                    .state
                    .store(CrawlState::Draining as u8, Ordering::SeqCst);
            }

            if !worked {
                thread::sleep(DRAIN_IDLE);
            }
        }

        // nothing will be consumed past this point; release any crawl
        // thread parked at the admission ceiling
        abort.store(true, Ordering::SeqCst);
        log::info!("crawl session drained, closing store");
        if let Err(error) = builder.close() {
            log::error!("store close failed: {}", error);
        }
        shared
            .state
            .store(CrawlState::Stopped as u8, Ordering::SeqCst);
    })
}
