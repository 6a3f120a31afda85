//! Health Snapshot Store
//!
//! Append-only repository of immutable snapshots, ordered by timestamp.
//! Think of this as "git commits" for codebase health: the write API is
//! append, delete and annotate; nothing ever edits a stored snapshot.

use crate::db::SnapshotRepository;
use crate::error::AppError;
use crate::snapshot::cache::ResultCache;
use crate::snapshot::models::{NewSnapshot, Snapshot, SnapshotDetail, SnapshotId, SnapshotSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;
pub const MAX_ANNOTATION_LEN: usize = 2000;

/// Listing parameters; `after` is an exclusive timestamp cursor
#[derive(Debug, Clone, Default)]
pub struct SnapshotQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// One page of a listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPage {
    pub items: Vec<SnapshotSummary>,
    /// Pass back as `after` to continue; absent on the last page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<DateTime<Utc>>,
}

/// Everything a comparison needs, read under a single lock
pub struct ComparisonView {
    pub generation: u64,
    pub base: Arc<Snapshot>,
    pub target: Arc<Snapshot>,
    /// Trailing snapshots ending at the target, oldest first
    pub history: Vec<Arc<Snapshot>>,
}

/// A consistent, ordered slice of the timeline
pub struct TimelineView {
    pub generation: u64,
    pub snapshots: Vec<Arc<Snapshot>>,
}

#[derive(Default)]
struct StoreInner {
    generation: u64,
    next_id: u64,
    by_id: HashMap<SnapshotId, Arc<Snapshot>>,
    timeline: BTreeMap<DateTime<Utc>, SnapshotId>,
    annotations: HashMap<SnapshotId, String>,
}

impl StoreInner {
    fn resolve(&self, id: SnapshotId) -> Result<Arc<Snapshot>, AppError> {
        self.by_id
            .get(&id)
            .cloned()
            .ok_or(AppError::SnapshotNotFound(id))
    }

    fn range(&self, from: Bound<DateTime<Utc>>, to: Bound<DateTime<Utc>>) -> Vec<Arc<Snapshot>> {
        self.timeline
            .range((from, to))
            .filter_map(|(_, id)| self.by_id.get(id).cloned())
            .collect()
    }

    fn predecessor(&self, timestamp: DateTime<Utc>) -> Option<&Snapshot> {
        self.timeline
            .range(..timestamp)
            .next_back()
            .and_then(|(_, id)| self.by_id.get(id))
            .map(|s| s.as_ref())
    }

    fn summary(&self, snapshot: &Snapshot) -> SnapshotSummary {
        SnapshotSummary::new(snapshot, self.annotations.get(&snapshot.id).cloned())
    }
}

/// Store for managing health snapshots
pub struct SnapshotStore {
    inner: RwLock<StoreInner>,
    cache: ResultCache,
    repository: Option<SnapshotRepository>,
}

impl SnapshotStore {
    /// In-memory store
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                next_id: 1,
                ..StoreInner::default()
            }),
            cache: ResultCache::new(cache_capacity),
            repository: None,
        }
    }

    /// Store backed by Postgres; existing rows are loaded into memory.
    pub async fn with_repository(repository: SnapshotRepository, cache_capacity: usize) -> Result<Self, AppError> {
        repository.init_schema().await?;
        let stored = repository.load_all().await?;

        let mut inner = StoreInner {
            next_id: 1,
            ..StoreInner::default()
        };
        for row in stored {
            let id = row.snapshot.id;
            inner.next_id = inner.next_id.max(id.0 + 1);
            inner.timeline.insert(row.snapshot.timestamp, id);
            if let Some(note) = row.annotation {
                inner.annotations.insert(id, note);
            }
            inner.by_id.insert(id, Arc::new(row.snapshot));
        }

        info!("Loaded {} snapshots from database", inner.by_id.len());

        Ok(Self {
            inner: RwLock::new(inner),
            cache: ResultCache::new(cache_capacity),
            repository: Some(repository),
        })
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Append a snapshot.
    ///
    /// A timestamp collision fails with `DuplicateTimestamp` unless
    /// `overwrite` is set, in which case the existing snapshot is deleted and
    /// the new one appended under a fresh id.
    pub async fn append(&self, payload: NewSnapshot, overwrite: bool) -> Result<SnapshotSummary, AppError> {
        let mut inner = self.inner.write().await;

        let replaced = inner.timeline.get(&payload.timestamp).copied();
        if let Some(existing) = replaced {
            if !overwrite {
                warn!("Rejected snapshot at {}: timestamp taken by {}", payload.timestamp, existing);
                return Err(AppError::DuplicateTimestamp(payload.timestamp));
            }
        }

        // An overwritten snapshot shares the timestamp, so it is never its
        // own replacement's predecessor
        let id = SnapshotId(inner.next_id);
        let timestamp = payload.timestamp;
        let snapshot = payload.into_snapshot(id, inner.predecessor(timestamp))?;

        if let Some(repository) = &self.repository {
            match replaced {
                Some(existing) => repository.replace(existing, &snapshot).await?,
                None => repository.insert(&snapshot).await?,
            }
        }

        if let Some(existing) = replaced {
            inner.by_id.remove(&existing);
            inner.annotations.remove(&existing);
            info!("Snapshot {} superseded by {} at {}", existing, id, snapshot.timestamp);
        }

        inner.next_id += 1;
        inner.timeline.insert(snapshot.timestamp, id);
        let summary = inner.summary(&snapshot);
        inner.by_id.insert(id, Arc::new(snapshot));
        inner.generation += 1;
        self.cache.invalidate(inner.generation);

        info!(
            "Saved snapshot {} at {}: health {:.2}, {} files, {} findings",
            id, summary.timestamp, summary.health, summary.file_count, summary.finding_count
        );

        Ok(summary)
    }

    pub async fn get(&self, id: SnapshotId) -> Result<SnapshotDetail, AppError> {
        let inner = self.inner.read().await;
        let snapshot = inner.resolve(id)?;

        Ok(SnapshotDetail {
            snapshot: snapshot.as_ref().clone(),
            annotation: inner.annotations.get(&id).cloned(),
        })
    }

    /// List snapshot summaries in timestamp order, one page at a time
    pub async fn list(&self, query: &SnapshotQuery) -> Result<SnapshotPage, AppError> {
        if let (Some(from), Some(to)) = (query.from, query.to) {
            if from > to {
                return Err(AppError::InvalidInput("range:from_after_to".to_string()));
            }
        }
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(AppError::InvalidInput("limit".to_string()));
        }

        let lower = match (query.from, query.after) {
            (Some(from), Some(after)) if after >= from => Bound::Excluded(after),
            (Some(from), _) => Bound::Included(from),
            (None, Some(after)) => Bound::Excluded(after),
            (None, None) => Bound::Unbounded,
        };
        let upper = query.to.map(Bound::Included).unwrap_or(Bound::Unbounded);
        if let (Bound::Excluded(lo), Bound::Included(hi)) = (lower, upper) {
            if lo >= hi {
                return Ok(SnapshotPage {
                    items: Vec::new(),
                    next_cursor: None,
                });
            }
        }

        let inner = self.inner.read().await;
        let mut items: Vec<SnapshotSummary> = inner
            .timeline
            .range((lower, upper))
            .take(limit + 1)
            .filter_map(|(_, id)| inner.by_id.get(id))
            .map(|s| inner.summary(s))
            .collect();

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|s| s.timestamp)
        } else {
            None
        };

        Ok(SnapshotPage { items, next_cursor })
    }

    /// Delete a snapshot (retention policy); remaining order is unaffected
    pub async fn delete(&self, id: SnapshotId) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let snapshot = inner.resolve(id)?;

        if let Some(repository) = &self.repository {
            repository.delete(id).await?;
        }

        inner.by_id.remove(&id);
        inner.timeline.remove(&snapshot.timestamp);
        inner.annotations.remove(&id);
        inner.generation += 1;
        self.cache.invalidate(inner.generation);

        info!("Deleted snapshot {} ({})", id, snapshot.timestamp);
        Ok(())
    }

    /// Attach (or clear, with an empty note) a free-text annotation
    pub async fn annotate(&self, id: SnapshotId, note: &str) -> Result<(), AppError> {
        if note.chars().count() > MAX_ANNOTATION_LEN {
            return Err(AppError::InvalidInput("note".to_string()));
        }

        let mut inner = self.inner.write().await;
        inner.resolve(id)?;

        let note = note.trim();
        let stored = if note.is_empty() { None } else { Some(note) };
        if let Some(repository) = &self.repository {
            repository.set_annotation(id, stored).await?;
        }

        match stored {
            Some(note) => inner.annotations.insert(id, note.to_string()),
            None => inner.annotations.remove(&id),
        };

        debug!("Annotated snapshot {}", id);
        Ok(())
    }

    /// Read base, target and at most `depth` snapshots ending at target
    /// under one lock
    pub async fn comparison_view(
        &self,
        base: SnapshotId,
        target: SnapshotId,
        depth: usize,
    ) -> Result<ComparisonView, AppError> {
        let inner = self.inner.read().await;
        let base = inner.resolve(base)?;
        let target = inner.resolve(target)?;

        let mut history: Vec<Arc<Snapshot>> = inner
            .timeline
            .range(..=target.timestamp)
            .rev()
            .take(depth)
            .filter_map(|(_, id)| inner.by_id.get(id).cloned())
            .collect();
        history.reverse();

        Ok(ComparisonView {
            generation: inner.generation,
            base,
            target,
            history,
        })
    }

    /// Snapshots within `[from, to]`, oldest first
    pub async fn timeline(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<TimelineView, AppError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(AppError::InvalidInput("range:from_after_to".to_string()));
            }
        }

        let inner = self.inner.read().await;
        let lower = from.map(Bound::Included).unwrap_or(Bound::Unbounded);
        let upper = to.map(Bound::Included).unwrap_or(Bound::Unbounded);

        Ok(TimelineView {
            generation: inner.generation,
            snapshots: inner.range(lower, upper),
        })
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::models::fixtures::*;
    use crate::snapshot::models::Severity;
    use tokio_test::{assert_err, assert_ok};

    fn store() -> SnapshotStore {
        SnapshotStore::new(64)
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = store();
        let a = assert_ok!(store.append(payload(0, 7.0, vec![], vec![]), false).await);
        let b = assert_ok!(store.append(payload(1, 7.1, vec![], vec![]), false).await);
        assert!(b.id > a.id);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_duplicate_timestamp_rejected_without_overwrite() {
        let store = store();
        assert_ok!(store.append(payload(0, 7.0, vec![], vec![]), false).await);
        let err = store.append(payload(0, 8.0, vec![], vec![]), false).await.unwrap_err();
        assert_eq!(err, AppError::DuplicateTimestamp(ts(0)));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_with_new_id() {
        let store = store();
        let first = assert_ok!(store.append(payload(0, 7.0, vec![], vec![]), false).await);
        let second = assert_ok!(store.append(payload(0, 8.0, vec![], vec![]), true).await);

        assert_ne!(first.id, second.id);
        assert_err!(store.get(first.id).await);
        assert_eq!(store.get(second.id).await.unwrap().snapshot.health_score, 8.0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_first_seen_uses_timestamp_predecessor() {
        let store = store();
        let findings = || vec![finding("a.py", "God File", Severity::High)];
        let first = assert_ok!(store.append(payload(0, 7.0, vec![], findings()), false).await);
        let second = assert_ok!(store.append(payload(5, 7.0, vec![], findings()), false).await);

        let detail = store.get(second.id).await.unwrap();
        assert_eq!(detail.snapshot.findings[0].first_seen_snapshot_id, first.id);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = store();
        assert_eq!(
            store.get(SnapshotId(42)).await.unwrap_err(),
            AppError::SnapshotNotFound(SnapshotId(42))
        );
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_paginated() {
        let store = store();
        // Appended out of order on purpose
        for day in [3, 1, 4, 0, 2] {
            assert_ok!(store.append(payload(day, 7.0 + day as f64, vec![], vec![]), false).await);
        }

        let query = SnapshotQuery {
            limit: Some(2),
            ..SnapshotQuery::default()
        };
        let first = store.list(&query).await.unwrap();
        assert_eq!(first.items.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![ts(0), ts(1)]);
        assert_eq!(first.next_cursor, Some(ts(1)));

        let second = store
            .list(&SnapshotQuery {
                after: first.next_cursor,
                ..query.clone()
            })
            .await
            .unwrap();
        assert_eq!(second.items.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![ts(2), ts(3)]);

        let last = store
            .list(&SnapshotQuery {
                after: second.next_cursor,
                ..query
            })
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_list_cursor_survives_delete() {
        let store = store();
        let mut ids = Vec::new();
        for day in 0..4 {
            ids.push(assert_ok!(store.append(payload(day, 7.0, vec![], vec![]), false).await).id);
        }

        let query = SnapshotQuery {
            limit: Some(2),
            ..SnapshotQuery::default()
        };
        let first = store.list(&query).await.unwrap();
        assert_ok!(store.delete(ids[1]).await);

        let rest = store
            .list(&SnapshotQuery {
                after: first.next_cursor,
                ..query
            })
            .await
            .unwrap();
        assert_eq!(rest.items.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ids[2], ids[3]]);
    }

    #[tokio::test]
    async fn test_list_rejects_inverted_range() {
        let store = store();
        let query = SnapshotQuery {
            from: Some(ts(5)),
            to: Some(ts(1)),
            ..SnapshotQuery::default()
        };
        assert!(matches!(store.list(&query).await, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_delete_then_get_fails() {
        let store = store();
        let summary = assert_ok!(store.append(payload(0, 7.0, vec![], vec![]), false).await);
        assert_ok!(store.delete(summary.id).await);
        assert_err!(store.get(summary.id).await);
        assert_eq!(
            store.delete(summary.id).await.unwrap_err(),
            AppError::SnapshotNotFound(summary.id)
        );
    }

    #[tokio::test]
    async fn test_annotation_does_not_touch_snapshot() {
        let store = store();
        let summary = assert_ok!(store.append(payload(0, 7.0, vec![], vec![]), false).await);
        let before = store.get(summary.id).await.unwrap().snapshot;

        assert_ok!(store.annotate(summary.id, "release 2.3").await);
        let detail = store.get(summary.id).await.unwrap();
        assert_eq!(detail.annotation.as_deref(), Some("release 2.3"));
        assert_eq!(detail.snapshot, before);

        assert_ok!(store.annotate(summary.id, "  ").await);
        assert!(store.get(summary.id).await.unwrap().annotation.is_none());

        assert_err!(store.annotate(SnapshotId(99), "x").await);
    }

    #[tokio::test]
    async fn test_comparison_view_history_ends_at_target() {
        let store = store();
        let a = assert_ok!(store.append(payload(0, 7.0, vec![], vec![]), false).await);
        let b = assert_ok!(store.append(payload(1, 7.0, vec![], vec![]), false).await);
        assert_ok!(store.append(payload(2, 7.0, vec![], vec![]), false).await);

        let view = store.comparison_view(b.id, a.id, 3).await.unwrap();
        assert_eq!(view.history.len(), 1);
        assert_eq!(view.target.id, a.id);
    }

    #[tokio::test]
    async fn test_comparison_view_history_is_bounded_by_depth() {
        let store = store();
        let mut ids = Vec::new();
        for day in 0..20 {
            ids.push(assert_ok!(store.append(payload(day, 7.0, vec![], vec![]), false).await).id);
        }

        let view = store.comparison_view(ids[18], ids[19], 3).await.unwrap();
        assert_eq!(
            view.history.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![ids[17], ids[18], ids[19]]
        );
    }

    #[tokio::test]
    async fn test_failed_overwrite_leaves_store_unchanged() {
        let mut store = store();
        let first = assert_ok!(store.append(payload(0, 7.0, vec![], vec![]), false).await);
        store.repository = Some(unreachable_repository());

        let err = store.append(payload(0, 8.0, vec![], vec![]), true).await.unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));

        let detail = assert_ok!(store.get(first.id).await);
        assert_eq!(detail.snapshot.health_score, 7.0);
        assert_eq!(store.len().await, 1);
    }

    fn unreachable_repository() -> SnapshotRepository {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.host = Some("127.0.0.1".to_string());
        cfg.port = Some(1);
        cfg.user = Some("codepulse".to_string());
        cfg.dbname = Some("codepulse".to_string());
        let pool = cfg
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), tokio_postgres::NoTls)
            .unwrap();
        SnapshotRepository::new(pool)
    }

    #[tokio::test]
    async fn test_writes_invalidate_cache_generation() {
        let store = store();
        let a = assert_ok!(store.append(payload(0, 7.0, vec![], vec![]), false).await);
        let before = store.timeline(None, None).await.unwrap().generation;
        assert_ok!(store.delete(a.id).await);
        let after = store.timeline(None, None).await.unwrap().generation;
        assert!(after > before);
    }
}
