//! Snapshot Diff Engine
//!
//! The core comparison engine that computes a structured delta between two
//! health snapshots. Entity identity comes from the [`EntityMatcher`]; this
//! module only turns matched pairs into per-field deltas.

use crate::error::AppError;
use crate::snapshot::matcher::{EntityMatcher, ProbableRename};
use crate::snapshot::models::{FileRecord, FindingId, FindingRecord, Severity, Snapshot, SnapshotId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// Maximum number of movers reported per delta
pub const MAX_MOVERS: usize = 10;

/// Knobs for a single comparison
#[derive(Debug, Clone, Copy)]
pub struct DiffOptions {
    pub rename_threshold: f64,
    pub mover_threshold: f64,
    pub max_elements: usize,
}

/// Signed change of one numeric field
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDelta {
    pub before: f64,
    pub after: f64,
    pub delta: f64,
}

impl FieldDelta {
    fn new(before: f64, after: f64) -> Self {
        Self {
            before,
            after,
            delta: after - before,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.delta == 0.0
    }
}

/// A file present in both snapshots with at least one changed field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    pub risk_score: FieldDelta,
    pub loc: FieldDelta,
    pub complexity: FieldDelta,
    pub finding_count: FieldDelta,
    /// The set of findings attached to the file changed
    pub findings_changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityDirection {
    Worsened,
    Improved,
}

/// A finding present in both snapshots whose severity changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingChange {
    pub id: FindingId,
    #[serde(rename = "type")]
    pub finding_type: String,
    pub path: String,
    pub severity_before: Severity,
    pub severity_after: Severity,
    pub severity_changed: bool,
    pub direction: SeverityDirection,
}

/// A file whose risk moved significantly
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mover {
    pub path: String,
    pub risk_before: f64,
    pub risk_after: f64,
    pub delta: f64,
}

/// Summary counts for the delta
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaSummary {
    pub files_added: usize,
    pub files_removed: usize,
    pub files_changed: usize,
    pub findings_added: usize,
    pub findings_resolved: usize,
    pub findings_changed: usize,
    pub chronic_unchanged: usize,
    pub probable_renames: usize,
}

/// Complete comparison of a base snapshot against a target snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub base_id: SnapshotId,
    pub target_id: SnapshotId,
    pub base_timestamp: DateTime<Utc>,
    pub target_timestamp: DateTime<Utc>,
    /// target.health_score - base.health_score, unsmoothed
    pub health_delta: f64,
    pub file_count_delta: i64,
    pub finding_count_delta: i64,
    pub files_added: Vec<String>,
    pub files_removed: Vec<String>,
    pub files_changed: Vec<FileChange>,
    /// Heuristic only; the files involved stay in added/removed
    pub probable_renames: Vec<ProbableRename>,
    pub findings_added: Vec<FindingRecord>,
    pub findings_resolved: Vec<FindingRecord>,
    pub findings_changed: Vec<FindingChange>,
    /// Chronic findings present in both snapshots with no change
    pub chronic_unchanged: Vec<FindingId>,
    pub movers: Vec<Mover>,
    /// |findings_added| - |findings_resolved|
    pub debt_velocity: i64,
    pub summary: DeltaSummary,
}

/// The diff engine that compares snapshots
pub struct DiffEngine;

impl DiffEngine {
    /// Compare `base` to `target`.
    ///
    /// `chronic` holds the ids that are chronic as of `target`. Comparing a
    /// snapshot with itself is allowed and yields an all-zero delta.
    pub fn compare(
        base: &Snapshot,
        target: &Snapshot,
        chronic: &HashSet<FindingId>,
        options: &DiffOptions,
    ) -> Result<Delta, AppError> {
        let elements = base.element_count() + target.element_count();
        if elements > options.max_elements {
            return Err(AppError::ComparisonTooLarge {
                elements,
                limit: options.max_elements,
            });
        }

        let matcher = EntityMatcher::new(options.rename_threshold);
        let files = matcher.match_files(&base.files, &target.files);
        let findings = matcher.match_findings(&base.findings, &target.findings);

        let files_changed: Vec<FileChange> = files
            .exact
            .matched
            .iter()
            .filter_map(|(before, after)| Self::compare_files(before, after))
            .collect();

        let movers = Self::movers(&files.exact.matched, options.mover_threshold);

        let mut findings_changed = Vec::new();
        let mut chronic_unchanged = Vec::new();
        for (before, after) in &findings.matched {
            match Self::compare_findings(before, after) {
                Some(change) => findings_changed.push(change),
                None if chronic.contains(&after.id) => chronic_unchanged.push(after.id.clone()),
                None => {}
            }
        }

        let files_added: Vec<String> = files.exact.only_target.iter().map(|f| f.path.clone()).collect();
        let files_removed: Vec<String> = files.exact.only_base.iter().map(|f| f.path.clone()).collect();
        let findings_added: Vec<FindingRecord> = findings.only_target.into_iter().cloned().collect();
        let findings_resolved: Vec<FindingRecord> = findings.only_base.into_iter().cloned().collect();

        let summary = DeltaSummary {
            files_added: files_added.len(),
            files_removed: files_removed.len(),
            files_changed: files_changed.len(),
            findings_added: findings_added.len(),
            findings_resolved: findings_resolved.len(),
            findings_changed: findings_changed.len(),
            chronic_unchanged: chronic_unchanged.len(),
            probable_renames: files.probable_renames.len(),
        };

        Ok(Delta {
            base_id: base.id,
            target_id: target.id,
            base_timestamp: base.timestamp,
            target_timestamp: target.timestamp,
            health_delta: target.health_score - base.health_score,
            file_count_delta: target.file_count as i64 - base.file_count as i64,
            finding_count_delta: target.finding_count as i64 - base.finding_count as i64,
            debt_velocity: findings_added.len() as i64 - findings_resolved.len() as i64,
            files_added,
            files_removed,
            files_changed,
            probable_renames: files.probable_renames,
            findings_added,
            findings_resolved,
            findings_changed,
            chronic_unchanged,
            movers,
            summary,
        })
    }

    fn compare_files(before: &FileRecord, after: &FileRecord) -> Option<FileChange> {
        let change = FileChange {
            path: after.path.clone(),
            risk_score: FieldDelta::new(before.risk_score, after.risk_score),
            loc: FieldDelta::new(before.loc as f64, after.loc as f64),
            complexity: FieldDelta::new(before.complexity, after.complexity),
            finding_count: FieldDelta::new(before.finding_ids.len() as f64, after.finding_ids.len() as f64),
            findings_changed: before.finding_ids != after.finding_ids,
        };

        let unchanged = change.risk_score.is_zero()
            && change.loc.is_zero()
            && change.complexity.is_zero()
            && change.finding_count.is_zero()
            && !change.findings_changed;

        if unchanged {
            None
        } else {
            Some(change)
        }
    }

    fn compare_findings(before: &FindingRecord, after: &FindingRecord) -> Option<FindingChange> {
        if before.severity == after.severity {
            return None;
        }

        Some(FindingChange {
            id: after.id.clone(),
            finding_type: after.finding_type.clone(),
            path: after.path.clone(),
            severity_before: before.severity,
            severity_after: after.severity,
            severity_changed: true,
            direction: if after.severity > before.severity {
                SeverityDirection::Worsened
            } else {
                SeverityDirection::Improved
            },
        })
    }

    fn movers(matched: &[(&FileRecord, &FileRecord)], threshold: f64) -> Vec<Mover> {
        let mut movers: Vec<Mover> = matched
            .iter()
            .map(|(before, after)| Mover {
                path: after.path.clone(),
                risk_before: before.risk_score,
                risk_after: after.risk_score,
                delta: after.risk_score - before.risk_score,
            })
            .filter(|m| m.delta != 0.0 && m.delta.abs() >= threshold)
            .collect();

        movers.sort_by(|a, b| {
            b.delta
                .abs()
                .total_cmp(&a.delta.abs())
                .then_with(|| a.path.cmp(&b.path))
        });
        movers.truncate(MAX_MOVERS);
        movers
    }
}
