//! Buffer of completed extraction results awaiting indexing.
//!
//! Decouples crawl-time discovery from index-build-time writes. The queue
//! itself is unbounded; admission control lives in the crawler's
//! outstanding-task ceiling. No ordering is guaranteed across results.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::types::ExtractionResult;

/// Thread-safe buffer of extraction results.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<VecDeque<ExtractionResult>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, result: ExtractionResult) {
        self.inner.lock().push_back(result);
    }

    /// Removes and returns one pending result, if any.
    pub fn poll(&self) -> Option<ExtractionResult> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
