//! Trend Analyzer
//!
//! Turns an ordered run of snapshots into a single-metric time series and
//! measures how fast it is moving.

use crate::error::AppError;
use crate::snapshot::models::{FileRecord, Severity, Snapshot, SnapshotId};
use crate::trend::regression;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Metrics a series can be extracted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Health,
    FileCount,
    FindingCount,
    MeanRisk,
    MaxRisk,
    TotalLoc,
    MeanComplexity,
    CriticalFindings,
    HighFindings,
}

impl Metric {
    pub const ALL: [Metric; 9] = [
        Metric::Health,
        Metric::FileCount,
        Metric::FindingCount,
        Metric::MeanRisk,
        Metric::MaxRisk,
        Metric::TotalLoc,
        Metric::MeanComplexity,
        Metric::CriticalFindings,
        Metric::HighFindings,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Health => "health",
            Metric::FileCount => "file_count",
            Metric::FindingCount => "finding_count",
            Metric::MeanRisk => "mean_risk",
            Metric::MaxRisk => "max_risk",
            Metric::TotalLoc => "total_loc",
            Metric::MeanComplexity => "mean_complexity",
            Metric::CriticalFindings => "critical_findings",
            Metric::HighFindings => "high_findings",
        }
    }

    /// Value of this metric in one snapshot
    pub fn value(&self, snapshot: &Snapshot) -> f64 {
        match self {
            Metric::Health => snapshot.health_score,
            Metric::FileCount => snapshot.file_count as f64,
            Metric::FindingCount => snapshot.finding_count as f64,
            Metric::MeanRisk => mean(snapshot.files.iter().map(|f| f.risk_score)),
            Metric::MaxRisk => snapshot
                .files
                .iter()
                .map(|f| f.risk_score)
                .fold(0.0, f64::max),
            Metric::TotalLoc => snapshot.files.iter().map(|f| f.loc as f64).sum(),
            Metric::MeanComplexity => mean(snapshot.files.iter().map(|f| f.complexity)),
            Metric::CriticalFindings => count_severity(snapshot, Severity::Critical),
            Metric::HighFindings => count_severity(snapshot, Severity::High),
        }
    }

    /// Whether a rising value means the codebase is getting healthier
    pub fn higher_is_better(&self) -> bool {
        matches!(self, Metric::Health)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Metric::ALL
            .iter()
            .copied()
            .find(|m| m.name() == normalized)
            .ok_or_else(|| AppError::UnknownMetric(s.to_string()))
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn count_severity(snapshot: &Snapshot, severity: Severity) -> f64 {
    snapshot.findings.iter().filter(|f| f.severity == severity).count() as f64
}

/// Metrics tracked for a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileMetric {
    RiskScore,
    Loc,
    Complexity,
    FindingCount,
}

impl FileMetric {
    pub const ALL: [FileMetric; 4] = [
        FileMetric::RiskScore,
        FileMetric::Loc,
        FileMetric::Complexity,
        FileMetric::FindingCount,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FileMetric::RiskScore => "risk_score",
            FileMetric::Loc => "loc",
            FileMetric::Complexity => "complexity",
            FileMetric::FindingCount => "finding_count",
        }
    }

    pub fn value(&self, file: &FileRecord) -> f64 {
        match self {
            FileMetric::RiskScore => file.risk_score,
            FileMetric::Loc => file.loc as f64,
            FileMetric::Complexity => file.complexity,
            FileMetric::FindingCount => file.finding_ids.len() as f64,
        }
    }
}

impl fmt::Display for FileMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileMetric {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        FileMetric::ALL
            .iter()
            .copied()
            .find(|m| m.name() == normalized)
            .ok_or_else(|| AppError::UnknownMetric(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub snapshot_id: SnapshotId,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Ordered `(timestamp, value)` view over a run of snapshots
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    pub metric: Metric,
    pub points: Vec<SeriesPoint>,
}

impl TimeSeries {
    pub fn last(&self) -> Option<&SeriesPoint> {
        self.points.last()
    }

    /// The trailing `window` points (the whole series if shorter)
    pub fn tail(&self, window: usize) -> &[SeriesPoint] {
        let start = self.points.len().saturating_sub(window);
        &self.points[start..]
    }
}

/// Extract `metric` from timestamp-ordered snapshots
pub fn extract_series(metric: Metric, snapshots: &[Arc<Snapshot>]) -> Result<TimeSeries, AppError> {
    if snapshots.is_empty() {
        return Err(AppError::EmptyRange);
    }

    let points = snapshots
        .iter()
        .map(|s| SeriesPoint {
            snapshot_id: s.id,
            timestamp: s.timestamp,
            value: metric.value(s),
        })
        .collect();

    Ok(TimeSeries { metric, points })
}

/// One snapshot's value for a file; `None` where the file is absent
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePoint {
    pub snapshot_id: SnapshotId,
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

/// A file's metric across the timeline, with gaps kept in place
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSeries {
    pub path: String,
    pub metric: FileMetric,
    pub points: Vec<FilePoint>,
}

impl FileSeries {
    /// Points where the file exists
    pub fn present(&self) -> Vec<SeriesPoint> {
        self.points
            .iter()
            .filter_map(|p| {
                p.value.map(|value| SeriesPoint {
                    snapshot_id: p.snapshot_id,
                    timestamp: p.timestamp,
                    value,
                })
            })
            .collect()
    }
}

/// Extract one file's `metric` from timestamp-ordered snapshots.
///
/// Every snapshot contributes a point; the file must exist in at least one.
pub fn extract_file_series(
    path: &str,
    metric: FileMetric,
    snapshots: &[Arc<Snapshot>],
) -> Result<FileSeries, AppError> {
    if snapshots.is_empty() {
        return Err(AppError::EmptyRange);
    }

    let points: Vec<FilePoint> = snapshots
        .iter()
        .map(|s| FilePoint {
            snapshot_id: s.id,
            timestamp: s.timestamp,
            value: s.file(path).map(|file| metric.value(file)),
        })
        .collect();

    if points.iter().all(|p| p.value.is_none()) {
        return Err(AppError::FileNotFound(path.to_string()));
    }

    Ok(FileSeries {
        path: path.to_string(),
        metric,
        points,
    })
}

/// Least-squares slope over the trailing `window` points, per day
pub fn velocity(series: &TimeSeries, window: usize) -> Result<f64, AppError> {
    if window < 2 {
        return Err(AppError::InsufficientData {
            required: 2,
            available: window,
        });
    }
    let fit = regression::fit(series.tail(window))?;
    Ok(fit.slope)
}

/// Slope over the trailing `window` points where the file exists, per day
pub fn file_velocity(series: &FileSeries, window: usize) -> Result<f64, AppError> {
    if window < 2 {
        return Err(AppError::InsufficientData {
            required: 2,
            available: window,
        });
    }
    let present = series.present();
    let start = present.len().saturating_sub(window);
    let fit = regression::fit(&present[start..])?;
    Ok(fit.slope)
}

/// Trailing moving average, same length as the series
pub fn smooth(series: &TimeSeries, window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut sum = 0.0;
    series
        .points
        .iter()
        .enumerate()
        .map(|(i, point)| {
            sum += point.value;
            if i >= window {
                sum -= series.points[i - window].value;
            }
            sum / (i + 1).min(window) as f64
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

/// Slopes smaller than this per day count as flat
const STABLE_SLOPE: f64 = 1e-6;

pub fn direction(metric: Metric, slope: f64) -> TrendDirection {
    classify(slope, metric.higher_is_better())
}

/// Rising file metrics always mean more risk
pub fn file_direction(slope: f64) -> TrendDirection {
    classify(slope, false)
}

fn classify(slope: f64, higher_is_better: bool) -> TrendDirection {
    if slope.abs() < STABLE_SLOPE {
        return TrendDirection::Stable;
    }
    if (slope > 0.0) == higher_is_better {
        TrendDirection::Improving
    } else {
        TrendDirection::Degrading
    }
}
