//! Snapshot data model
//!
//! Snapshots are immutable value objects. Identity across snapshots is never
//! stored as a link between them; it is recomputed from stable keys (file
//! path, derived finding id) whenever two snapshots are compared.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// Opaque, monotonically assigned snapshot identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable finding identity, derived from (path, type, location)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingId(pub String);

impl FindingId {
    /// Derive the identity key for a finding.
    ///
    /// The same (path, type, location) always yields the same id, in every
    /// snapshot. Path separators and surrounding whitespace are normalized
    /// first so analyzers running on different platforms agree.
    pub fn derive(path: &str, finding_type: &str, location: &str) -> Self {
        let path = normalize_path(path);
        let mut hasher = Sha256::new();
        // Length-prefixed so no separator inside a component can collide
        for part in [path.as_str(), finding_type.trim(), location.trim()] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }

        let digest = format!("{:x}", hasher.finalize());
        FindingId(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_path(path: &str) -> String {
    path.trim().replace('\\', "/")
}

/// Finding severity, ordered low < medium < high < critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Per-file health record inside a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Identity key within a snapshot
    pub path: String,
    /// 0.0 - 1.0
    pub risk_score: f64,
    pub loc: u64,
    pub complexity: f64,
    pub finding_ids: BTreeSet<FindingId>,
}

/// A detected code-health issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingRecord {
    pub id: FindingId,
    #[serde(rename = "type")]
    pub finding_type: String,
    pub severity: Severity,
    /// Start of the unbroken run this occurrence belongs to, as known at append time
    pub first_seen_snapshot_id: SnapshotId,
    pub path: String,
    pub location: String,
}

/// Immutable point-in-time capture of codebase health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: SnapshotId,
    pub timestamp: DateTime<Utc>,
    pub health_score: f64,
    pub file_count: usize,
    pub finding_count: usize,
    /// Sorted by path
    pub files: Vec<FileRecord>,
    /// Sorted by id
    pub findings: Vec<FindingRecord>,
}

impl Snapshot {
    pub fn finding(&self, id: &FindingId) -> Option<&FindingRecord> {
        self.findings
            .binary_search_by(|f| f.id.cmp(id))
            .ok()
            .map(|idx| &self.findings[idx])
    }

    /// File record at `path`, which is normalized like stored paths
    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        let path = normalize_path(path);
        self.files
            .binary_search_by(|f| f.path.as_str().cmp(&path))
            .ok()
            .map(|idx| &self.files[idx])
    }

    /// Number of entities a comparison involving this snapshot must touch
    pub fn element_count(&self) -> usize {
        self.files.len() + self.findings.len()
    }
}

/// Lightweight listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: SnapshotId,
    pub timestamp: DateTime<Utc>,
    pub health: f64,
    pub file_count: usize,
    pub finding_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl SnapshotSummary {
    pub fn new(snapshot: &Snapshot, annotation: Option<String>) -> Self {
        Self {
            id: snapshot.id,
            timestamp: snapshot.timestamp,
            health: snapshot.health_score,
            file_count: snapshot.file_count,
            finding_count: snapshot.finding_count,
            annotation,
        }
    }
}

/// Full snapshot as returned by a point-in-time fetch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDetail {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

// ==================== Analyzer payload ====================

/// File entry as produced by the external analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFile {
    pub path: String,
    pub risk_score: f64,
    pub loc: u64,
    pub complexity: f64,
}

/// Finding entry as produced by the external analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFinding {
    #[serde(rename = "type")]
    pub finding_type: String,
    pub severity: Severity,
    pub path: String,
    #[serde(default)]
    pub location: String,
}

/// Raw snapshot payload accepted by `append`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSnapshot {
    pub timestamp: DateTime<Utc>,
    pub health_score: f64,
    #[serde(default)]
    pub files: Vec<NewFile>,
    #[serde(default)]
    pub findings: Vec<NewFinding>,
}

impl NewSnapshot {
    /// Validate the payload and build the immutable snapshot.
    ///
    /// `predecessor` is the snapshot immediately before `timestamp`; findings
    /// it already contained keep their `first_seen_snapshot_id`.
    pub fn into_snapshot(
        self,
        id: SnapshotId,
        predecessor: Option<&Snapshot>,
    ) -> Result<Snapshot, AppError> {
        if !self.health_score.is_finite() {
            return Err(AppError::InvalidInput("healthScore".to_string()));
        }

        let mut findings: BTreeMap<FindingId, FindingRecord> = BTreeMap::new();
        for finding in self.findings {
            let path = normalize_path(&finding.path);
            if path.is_empty() {
                return Err(AppError::InvalidInput("findings.path".to_string()));
            }
            if finding.finding_type.trim().is_empty() {
                return Err(AppError::InvalidInput("findings.type".to_string()));
            }

            let finding_id = FindingId::derive(&path, &finding.finding_type, &finding.location);
            let first_seen = predecessor
                .and_then(|prev| prev.finding(&finding_id))
                .map(|prev| prev.first_seen_snapshot_id)
                .unwrap_or(id);

            let record = FindingRecord {
                id: finding_id.clone(),
                finding_type: finding.finding_type.trim().to_string(),
                severity: finding.severity,
                first_seen_snapshot_id: first_seen,
                path,
                location: finding.location.trim().to_string(),
            };
            if findings.insert(finding_id.clone(), record).is_some() {
                return Err(AppError::InvalidInput(format!("findings.duplicate:{}", finding_id)));
            }
        }

        let mut by_path: BTreeMap<&str, BTreeSet<FindingId>> = BTreeMap::new();
        for finding in findings.values() {
            by_path
                .entry(finding.path.as_str())
                .or_default()
                .insert(finding.id.clone());
        }

        let mut seen_paths = HashSet::new();
        let mut files = Vec::with_capacity(self.files.len());
        for file in self.files {
            let path = normalize_path(&file.path);
            if path.is_empty() {
                return Err(AppError::InvalidInput("files.path".to_string()));
            }
            if !(0.0..=1.0).contains(&file.risk_score) {
                return Err(AppError::InvalidInput(format!("files.riskScore:{}", path)));
            }
            if !file.complexity.is_finite() || file.complexity < 0.0 {
                return Err(AppError::InvalidInput(format!("files.complexity:{}", path)));
            }
            if !seen_paths.insert(path.clone()) {
                return Err(AppError::InvalidInput(format!("files.duplicate:{}", path)));
            }

            let finding_ids = by_path.get(path.as_str()).cloned().unwrap_or_default();
            files.push(FileRecord {
                path,
                risk_score: file.risk_score,
                loc: file.loc,
                complexity: file.complexity,
                finding_ids,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let findings: Vec<FindingRecord> = findings.into_values().collect();

        Ok(Snapshot {
            id,
            timestamp: self.timestamp,
            health_score: self.health_score,
            file_count: files.len(),
            finding_count: findings.len(),
            files,
            findings,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Builders shared by the test modules

    use super::*;
    use chrono::{Duration, TimeZone};

    pub fn ts(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    pub fn file(path: &str, risk: f64, loc: u64, complexity: f64) -> NewFile {
        NewFile {
            path: path.to_string(),
            risk_score: risk,
            loc,
            complexity,
        }
    }

    pub fn finding(path: &str, finding_type: &str, severity: Severity) -> NewFinding {
        NewFinding {
            finding_type: finding_type.to_string(),
            severity,
            path: path.to_string(),
            location: String::new(),
        }
    }

    pub fn payload(day: i64, health: f64, files: Vec<NewFile>, findings: Vec<NewFinding>) -> NewSnapshot {
        NewSnapshot {
            timestamp: ts(day),
            health_score: health,
            files,
            findings,
        }
    }

    pub fn snapshot(id: u64, day: i64, health: f64, files: Vec<NewFile>, findings: Vec<NewFinding>) -> Snapshot {
        payload(day, health, files, findings)
            .into_snapshot(SnapshotId(id), None)
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_finding_id_is_deterministic() {
        let a = FindingId::derive("src/lib.rs", "God File", "");
        let b = FindingId::derive("src/lib.rs", "God File", "");
        let c = FindingId::derive("src\\lib.rs", " God File ", "");

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn test_finding_id_depends_on_every_component() {
        let base = FindingId::derive("a.py", "God File", "L10");
        assert_ne!(base, FindingId::derive("b.py", "God File", "L10"));
        assert_ne!(base, FindingId::derive("a.py", "High Risk Hub", "L10"));
        assert_ne!(base, FindingId::derive("a.py", "God File", "L11"));
    }

    #[test]
    fn test_finding_id_separator_inside_component_does_not_collide() {
        assert_ne!(
            FindingId::derive("a|b", "c", ""),
            FindingId::derive("a", "b|c", "")
        );
        assert_ne!(
            FindingId::derive("a.py", "God File|L1", ""),
            FindingId::derive("a.py", "God File", "L1")
        );
    }

    #[test]
    fn test_into_snapshot_sorts_and_links_findings() {
        let snap = snapshot(
            1,
            0,
            7.0,
            vec![file("z.py", 0.2, 10, 1.0), file("a.py", 0.5, 100, 4.0)],
            vec![finding("a.py", "God File", Severity::High)],
        );

        assert_eq!(snap.files[0].path, "a.py");
        assert_eq!(snap.file_count, 2);
        assert_eq!(snap.finding_count, 1);
        assert_eq!(snap.files[0].finding_ids.len(), 1);
        assert!(snap.files[1].finding_ids.is_empty());
        assert_eq!(snap.findings[0].first_seen_snapshot_id, SnapshotId(1));
    }

    #[test]
    fn test_first_seen_inherited_from_predecessor() {
        let first = snapshot(1, 0, 7.0, vec![], vec![finding("a.py", "God File", Severity::High)]);
        let second = payload(1, 7.0, vec![], vec![
            finding("a.py", "God File", Severity::Critical),
            finding("b.py", "God File", Severity::Low),
        ])
        .into_snapshot(SnapshotId(2), Some(&first))
        .unwrap();

        let kept = second.finding(&FindingId::derive("a.py", "God File", "")).unwrap();
        let fresh = second.finding(&FindingId::derive("b.py", "God File", "")).unwrap();
        assert_eq!(kept.first_seen_snapshot_id, SnapshotId(1));
        assert_eq!(fresh.first_seen_snapshot_id, SnapshotId(2));
    }

    #[test]
    fn test_rejects_invalid_payloads() {
        let bad_risk = payload(0, 7.0, vec![file("a.py", 1.5, 1, 1.0)], vec![]);
        assert!(matches!(
            bad_risk.into_snapshot(SnapshotId(1), None),
            Err(AppError::InvalidInput(_))
        ));

        let dup = payload(0, 7.0, vec![file("a.py", 0.1, 1, 1.0), file("a.py", 0.2, 1, 1.0)], vec![]);
        assert!(matches!(dup.into_snapshot(SnapshotId(1), None), Err(AppError::InvalidInput(_))));

        let dup_finding = payload(0, 7.0, vec![], vec![
            finding("a.py", "God File", Severity::Low),
            finding("a.py", "God File", Severity::High),
        ]);
        assert!(matches!(
            dup_finding.into_snapshot(SnapshotId(1), None),
            Err(AppError::InvalidInput(_))
        ));

        let nan = payload(0, f64::NAN, vec![], vec![]);
        assert!(matches!(nan.into_snapshot(SnapshotId(1), None), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
