//! Bounded recency cache of processed message ids
//!
//! Holds at most `capacity` ids; inserting into a full cache evicts the
//! least-recently-used id. Eviction means a very late duplicate can be
//! processed again, so suppression holds only within the retention window.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

/// Default number of remembered ids.
pub const DEFAULT_CAPACITY: usize = 256;

/// Self-synchronizing LRU set of message ids
pub struct DedupCache {
    inner: Mutex<DedupInner>,
}

struct DedupInner {
    ids: HashSet<u64>,
    /// LRU order: front = oldest, back = newest
    order: VecDeque<u64>,
    capacity: usize,
}

impl DedupInner {
    fn promote(&mut self, id: u64) {
        if let Some(pos) = self.order.iter().position(|k| *k == id) {
            self.order.remove(pos);
        }
        self.order.push_back(id);
    }
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(DedupInner {
                ids: HashSet::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
                capacity,
            }),
        }
    }

    /// Record `id` as processed. Returns true if it was already present.
    ///
    /// The check and the insert are one atomic step, so exactly one of several
    /// racing callers observes `false`.
    pub fn insert(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();

        if inner.ids.contains(&id) {
            inner.promote(id);
            return true;
        }

        if inner.ids.len() >= inner.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.ids.remove(&oldest);
            }
        }

        inner.ids.insert(id);
        inner.order.push_back(id);
        false
    }

    /// Check whether `id` was processed, promoting it if so.
    pub fn contains(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.ids.contains(&id) {
            inner.promote(id);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_reports_presence() {
        let cache = DedupCache::new(4);
        assert!(!cache.insert(1));
        assert!(cache.insert(1));
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = DedupCache::new(3);
        cache.insert(1);
        cache.insert(2);
        cache.insert(3);

        // touching 1 makes 2 the oldest
        assert!(cache.contains(1));
        cache.insert(4);

        assert_eq!(cache.len(), 3);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert!(cache.contains(3));
        assert!(cache.contains(4));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = DedupCache::new(0);
        assert!(!cache.insert(7));
        assert!(cache.insert(7));
    }

    #[tokio::test]
    async fn test_concurrent_insert_single_winner() {
        let cache = Arc::new(DedupCache::default());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.insert(1001) }));
        }

        let mut fresh = 0;
        for handle in handles {
            if !handle.await.unwrap() {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }
}
