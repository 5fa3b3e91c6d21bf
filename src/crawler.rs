//! Filesystem crawl and work admission.
//!
//! Walks a tree depth-first, files before subdirectories, skipping the
//! store's own storage subtree and any directory whose canonical path
//! differs from its absolute path (symlink-cycle guard). Stale or missing
//! files are dispatched to the extraction client as ephemeral async tasks;
//! an outstanding-task ceiling provides backpressure against the
//! extraction subsystem.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::extract::ExtractionClient;
use crate::queue::TaskQueue;
use crate::registry::ServiceRegistry;
use crate::store::{modified_millis, IndexStore};
use crate::types::Staleness;

/// Admission ceiling: the crawler pauses while this many extraction tasks
/// are outstanding.
pub const MAX_OUTSTANDING_TASKS: usize = 30;

/// How long the crawler sleeps between admission retries.
const ADMISSION_RETRY: Duration = Duration::from_millis(10);

pub struct Crawler {
    registry: Arc<ServiceRegistry>,
    client: Arc<ExtractionClient>,
    queue: Arc<TaskQueue>,
    store: Arc<IndexStore>,
    outstanding: Arc<AtomicUsize>,
    abort: Arc<AtomicBool>,
    runtime: tokio::runtime::Handle,
    max_outstanding: usize,
}

impl Crawler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ServiceRegistry>,
        client: Arc<ExtractionClient>,
        queue: Arc<TaskQueue>,
        store: Arc<IndexStore>,
        outstanding: Arc<AtomicUsize>,
        abort: Arc<AtomicBool>,
        runtime: tokio::runtime::Handle,
        max_outstanding: usize,
    ) -> Self {
        Self {
            registry,
            client,
            queue,
            store,
            outstanding,
            abort,
            runtime,
            max_outstanding,
        }
    }

    /// Walks `root` and dispatches every stale or missing readable file.
    ///
    /// Only an unusable root is fatal; per-file and per-directory failures
    /// are logged and skipped.
    pub fn crawl(&self, root: &Path) -> Result<()> {
        let root = fs::canonicalize(root)?;
        self.store.reload()?;
        log::info!("crawl started at {}", root.display());
        self.crawl_dir(&root);
        log::info!("crawl finished at {}", root.display());
        Ok(())
    }

    fn crawl_dir(&self, dir: &Path) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                log::warn!("skipping unreadable directory {}: {}", dir.display(), error);
                return;
            }
        };
        let mut files: Vec<PathBuf> = Vec::new();
        let mut dirs: Vec<PathBuf> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => dirs.push(path),
                Ok(file_type) if file_type.is_file() => files.push(path),
                Ok(_) => {}
                Err(error) => {
                    log::debug!("skipping {}: {}", path.display(), error);
                }
            }
        }

        // files before subdirectories at each level
        for path in files {
            if self.abort.load(Ordering::SeqCst) {
                return;
            }
            if self.is_excluded(&path) {
                continue;
            }
            self.admission_wait();
            self.visit_file(&path);
        }
        for path in dirs {
            if self.abort.load(Ordering::SeqCst) {
                return;
            }
            if self.is_excluded(&path) {
                log::debug!("not descending into own storage {}", path.display());
                continue;
            }
            // recurse only when the canonical path matches, so symlinked
            // directories cannot create cycles
            if fs::canonicalize(&path).map(|c| c == path).unwrap_or(false) {
                self.crawl_dir(&path);
            }
        }
    }

    /// The index never describes its own storage subtree.
    fn is_excluded(&self, path: &Path) -> bool {
        path.starts_with(self.store.storage_dir())
    }

    /// Blocks while outstanding extraction tasks are at the ceiling.
    fn admission_wait(&self) {
        while self.outstanding.load(Ordering::SeqCst) >= self.max_outstanding {
            if self.abort.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(ADMISSION_RETRY);
        }
    }

    fn visit_file(&self, path: &Path) {
        let modified = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified_millis(modified),
            Err(error) => {
                log::debug!("skipping unreadable file {}: {}", path.display(), error);
                return;
            }
        };
        match self.store.check_staleness(path, modified) {
            Ok(Staleness::Current) => {
                log::debug!("index current for {}, skipping", path.display());
            }
            Ok(state) => {
                log::debug!("index {state:?} for {}, dispatching", path.display());
                self.dispatch(path);
            }
            Err(error) => {
                log::warn!(
                    "staleness check failed for {}, skipping: {}",
                    path.display(),
                    error
                );
            }
        }
    }

    /// Spawns one ephemeral extraction task; the outstanding counter is
    /// decremented by the consumer once the result has been indexed.
    fn dispatch(&self, path: &Path) {
        let service = self
            .registry
            .match_path(path)
            .map(|descriptor| descriptor.name().to_string());
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let client = self.client.clone();
        let queue = self.queue.clone();
        let path = path.to_path_buf();
        self.runtime.spawn(async move {
            let result = client.extract(&path, service.as_deref()).await;
            queue.enqueue(result);
        });
    }
}
