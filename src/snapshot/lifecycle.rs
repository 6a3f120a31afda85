//! Finding lifecycle tracking
//!
//! Replays a timestamp-ordered run of snapshots and reconstructs, for each
//! finding id, when it was introduced, resolved and reintroduced.
//!
//! A finding whose derived id reappears after it was resolved keeps the
//! same id and reopens its lifecycle: a `reintroduced` event is recorded,
//! the consecutive run restarts at 1 and `occurrences` is incremented. The
//! earlier run never counts toward chronicity.

use crate::snapshot::models::{FindingId, Severity, Snapshot, SnapshotId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Active,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    Introduced,
    Resolved,
    Reintroduced,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub snapshot_id: SnapshotId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingLifecycle {
    pub id: FindingId,
    #[serde(rename = "type")]
    pub finding_type: String,
    pub path: String,
    /// Severity at the last snapshot the finding was present in
    pub severity: Severity,
    pub status: FindingStatus,
    pub events: Vec<LifecycleEvent>,
    /// How many times the finding has been (re)opened
    pub occurrences: usize,
    /// Start of the current (or most recent) occurrence
    pub first_seen_snapshot_id: SnapshotId,
    pub last_seen_snapshot_id: SnapshotId,
    /// Consecutive snapshots in the current occurrence, 0 once resolved
    pub current_run: usize,
    pub longest_run: usize,
    pub chronic: bool,
}

impl FindingLifecycle {
    fn push(&mut self, kind: LifecycleEventKind, snapshot: &Snapshot) {
        self.events.push(LifecycleEvent {
            kind,
            snapshot_id: snapshot.id,
            timestamp: snapshot.timestamp,
        });
    }
}

/// Rebuilds finding lifecycles from snapshot history
pub struct LifecycleTracker {
    chronic_after: usize,
}

impl LifecycleTracker {
    /// A finding is chronic once present in more than `chronic_after`
    /// consecutive snapshots.
    pub fn new(chronic_after: usize) -> Self {
        Self { chronic_after }
    }

    /// `timeline` must be ordered by timestamp.
    pub fn track(&self, timeline: &[Arc<Snapshot>]) -> BTreeMap<FindingId, FindingLifecycle> {
        let mut states: BTreeMap<FindingId, FindingLifecycle> = BTreeMap::new();

        for snapshot in timeline {
            for finding in &snapshot.findings {
                match states.get_mut(&finding.id) {
                    None => {
                        let mut state = FindingLifecycle {
                            id: finding.id.clone(),
                            finding_type: finding.finding_type.clone(),
                            path: finding.path.clone(),
                            severity: finding.severity,
                            status: FindingStatus::Active,
                            events: Vec::new(),
                            occurrences: 1,
                            first_seen_snapshot_id: snapshot.id,
                            last_seen_snapshot_id: snapshot.id,
                            current_run: 1,
                            longest_run: 1,
                            chronic: false,
                        };
                        state.push(LifecycleEventKind::Introduced, snapshot);
                        states.insert(finding.id.clone(), state);
                    }
                    Some(state) => {
                        if state.status == FindingStatus::Resolved {
                            state.push(LifecycleEventKind::Reintroduced, snapshot);
                            state.status = FindingStatus::Active;
                            state.occurrences += 1;
                            state.first_seen_snapshot_id = snapshot.id;
                            state.current_run = 1;
                        } else {
                            state.current_run += 1;
                        }
                        state.severity = finding.severity;
                        state.last_seen_snapshot_id = snapshot.id;
                        state.longest_run = state.longest_run.max(state.current_run);
                    }
                }
            }

            for state in states.values_mut() {
                if state.status == FindingStatus::Active && state.last_seen_snapshot_id != snapshot.id {
                    state.push(LifecycleEventKind::Resolved, snapshot);
                    state.status = FindingStatus::Resolved;
                    state.current_run = 0;
                }
            }
        }

        for state in states.values_mut() {
            state.chronic = state.status == FindingStatus::Active && state.current_run > self.chronic_after;
        }
        states
    }

    /// Ids that are chronic as of the last snapshot in `timeline`
    pub fn chronic_ids(&self, timeline: &[Arc<Snapshot>]) -> HashSet<FindingId> {
        self.track(timeline)
            .into_values()
            .filter(|state| state.chronic)
            .map(|state| state.id)
            .collect()
    }

    /// Chronic findings, longest-running first
    pub fn chronic(&self, timeline: &[Arc<Snapshot>]) -> Vec<FindingLifecycle> {
        let mut chronic: Vec<FindingLifecycle> = self
            .track(timeline)
            .into_values()
            .filter(|state| state.chronic)
            .collect();

        chronic.sort_by(|a, b| {
            b.current_run
                .cmp(&a.current_run)
                .then_with(|| b.severity.cmp(&a.severity))
                .then_with(|| a.id.cmp(&b.id))
        });
        chronic
    }
}
