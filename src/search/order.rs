//! Ordering for the "start at page N" search variant.
//!
//! Hits at or after the start page come first, earlier pages wrap to the
//! end; both partitions are in ascending page order. Documents with no
//! page value (bookkeeping records) sort last.

use std::cmp::Ordering;

/// Compares two page values for a search started at `start_page`.
///
/// Stateless and overflow-free: ranks are compared, never subtracted.
pub fn paged_ordering(page_a: Option<u64>, page_b: Option<u64>, start_page: u64) -> Ordering {
    rank(page_a, start_page).cmp(&rank(page_b, start_page))
}

fn rank(page: Option<u64>, start_page: u64) -> (u8, u64) {
    match page {
        Some(page) if page >= start_page => (0, page),
        Some(page) => (1, page),
        None => (2, u64::MAX),
    }
}
