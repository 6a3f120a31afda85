//! Result cache for derived views
//!
//! Deltas and time series are pure functions of the store contents, so they
//! can be memoized per store generation. Writers call [`ResultCache::invalidate`]
//! while holding the store's write lock; results computed from an older
//! generation are refused on insert, so a stale view is never served.

use crate::snapshot::diff::Delta;
use crate::snapshot::models::SnapshotId;
use crate::trend::analyzer::{Metric, TimeSeries};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Key of a cached time series: metric plus the requested bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub metric: Metric,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct CacheInner {
    generation: u64,
    deltas: HashMap<(SnapshotId, SnapshotId), Arc<Delta>>,
    series: HashMap<SeriesKey, Arc<TimeSeries>>,
}

impl CacheInner {
    fn len(&self) -> usize {
        self.deltas.len() + self.series.len()
    }

    fn clear(&mut self) {
        self.deltas.clear();
        self.series.clear();
    }
}

pub struct ResultCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // A panic while holding the lock cannot leave the maps half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop every entry and move to `generation`
    pub fn invalidate(&self, generation: u64) {
        let mut inner = self.lock();
        let dropped = inner.len();
        inner.clear();
        inner.generation = generation;
        debug!("Result cache invalidated at generation {} ({} entries dropped)", generation, dropped);
    }

    pub fn delta(&self, base: SnapshotId, target: SnapshotId) -> Option<Arc<Delta>> {
        self.lock().deltas.get(&(base, target)).cloned()
    }

    pub fn put_delta(&self, generation: u64, delta: Arc<Delta>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        if inner.len() >= self.capacity {
            inner.clear();
        }
        inner.deltas.insert((delta.base_id, delta.target_id), delta);
    }

    pub fn series(&self, key: &SeriesKey) -> Option<Arc<TimeSeries>> {
        self.lock().series.get(key).cloned()
    }

    pub fn put_series(&self, generation: u64, key: SeriesKey, series: Arc<TimeSeries>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        if inner.len() >= self.capacity {
            inner.clear();
        }
        inner.series.insert(key, series);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
