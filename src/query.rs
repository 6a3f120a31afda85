//! Query façade
//!
//! The single entry point handlers talk to. It wires the store to the
//! matcher, diff, lifecycle, trend and forecast computations and keeps the
//! result cache honest. Reads never write anything except cache entries.

use crate::config::AnalysisConfig;
use crate::error::AppError;
use crate::snapshot::cache::SeriesKey;
use crate::snapshot::diff::{Delta, DiffEngine, DiffOptions};
use crate::snapshot::lifecycle::{FindingLifecycle, LifecycleTracker};
use crate::snapshot::models::{FindingId, NewSnapshot, SnapshotDetail, SnapshotId, SnapshotSummary};
use crate::snapshot::store::{SnapshotPage, SnapshotQuery, SnapshotStore};
use crate::trend::analyzer::{self, FileMetric, FilePoint, Metric, SeriesPoint, TimeSeries, TrendDirection};
use crate::trend::forecast::{self, Forecast};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// A series with its rate of change
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendReport {
    pub metric: Metric,
    pub points: Vec<SeriesPoint>,
    /// Trailing moving average over `window` points
    pub smoothed: Vec<f64>,
    pub window: usize,
    /// Change per day; absent with fewer than two points
    pub velocity: Option<f64>,
    pub direction: Option<TrendDirection>,
}

/// One file's metric over time
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTrendReport {
    pub path: String,
    pub metric: FileMetric,
    /// One point per snapshot in range; `value` is null where the file is absent
    pub points: Vec<FilePoint>,
    pub window: usize,
    pub velocity: Option<f64>,
    pub direction: Option<TrendDirection>,
}

pub struct QueryFacade {
    store: Arc<SnapshotStore>,
    config: AnalysisConfig,
}

impl QueryFacade {
    pub fn new(store: Arc<SnapshotStore>, config: AnalysisConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            rename_threshold: self.config.rename_threshold,
            mover_threshold: self.config.mover_threshold,
            max_elements: self.config.max_comparison_elements,
        }
    }

    fn tracker(&self) -> LifecycleTracker {
        LifecycleTracker::new(self.config.chronic_after)
    }

    pub async fn list_snapshots(&self, query: &SnapshotQuery) -> Result<SnapshotPage, AppError> {
        self.store.list(query).await
    }

    pub async fn get_snapshot(&self, id: SnapshotId) -> Result<SnapshotDetail, AppError> {
        self.store.get(id).await
    }

    pub async fn append_snapshot(&self, payload: NewSnapshot, overwrite: bool) -> Result<SnapshotSummary, AppError> {
        self.store.append(payload, overwrite).await
    }

    pub async fn delete_snapshot(&self, id: SnapshotId) -> Result<(), AppError> {
        self.store.delete(id).await
    }

    pub async fn annotate_snapshot(&self, id: SnapshotId, note: &str) -> Result<(), AppError> {
        self.store.annotate(id, note).await
    }

    /// Structured difference from `base` to `target`
    pub async fn compare(&self, base: SnapshotId, target: SnapshotId) -> Result<Arc<Delta>, AppError> {
        if let Some(delta) = self.store.cache().delta(base, target) {
            debug!("Comparison {} -> {} served from cache", base, target);
            return Ok(delta);
        }

        // A finding is chronic once present in more than `chronic_after`
        // consecutive snapshots, so that trailing window decides it
        let depth = self.config.chronic_after.saturating_add(1);
        let view = self.store.comparison_view(base, target, depth).await?;
        let chronic = self.tracker().chronic_ids(&view.history);
        let delta = Arc::new(DiffEngine::compare(
            &view.base,
            &view.target,
            &chronic,
            &self.diff_options(),
        )?);

        self.store.cache().put_delta(view.generation, delta.clone());
        debug!(
            "Compared {} -> {}: {} files added, {} removed, {} findings added, {} resolved",
            base,
            target,
            delta.files_added.len(),
            delta.files_removed.len(),
            delta.findings_added.len(),
            delta.findings_resolved.len()
        );
        Ok(delta)
    }

    async fn series(
        &self,
        metric: Metric,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Arc<TimeSeries>, AppError> {
        let key = SeriesKey { metric, from, to };
        if let Some(series) = self.store.cache().series(&key) {
            return Ok(series);
        }

        let view = self.store.timeline(from, to).await?;
        let series = Arc::new(analyzer::extract_series(metric, &view.snapshots)?);
        self.store.cache().put_series(view.generation, key, series.clone());
        Ok(series)
    }

    /// Series for `metric` in `[from, to]` with its velocity
    pub async fn trend(
        &self,
        metric: Metric,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        window: Option<usize>,
    ) -> Result<TrendReport, AppError> {
        let window = window.unwrap_or(self.config.velocity_window);
        if window < 2 {
            return Err(AppError::InsufficientData {
                required: 2,
                available: window,
            });
        }

        let series = self.series(metric, from, to).await?;
        let velocity = match analyzer::velocity(&series, window) {
            Ok(slope) => Some(slope),
            Err(AppError::InsufficientData { .. }) => None,
            Err(e) => return Err(e),
        };

        debug!("Trend for {}: {} points, velocity {:?}", metric, series.points.len(), velocity);

        Ok(TrendReport {
            metric,
            points: series.points.clone(),
            smoothed: analyzer::smooth(&series, window),
            window,
            velocity,
            direction: velocity.map(|slope| analyzer::direction(metric, slope)),
        })
    }

    /// Series for one file's `metric` in `[from, to]`
    pub async fn file_trend(
        &self,
        path: &str,
        metric: FileMetric,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        window: Option<usize>,
    ) -> Result<FileTrendReport, AppError> {
        if path.trim().is_empty() {
            return Err(AppError::InvalidInput("path".to_string()));
        }
        let window = window.unwrap_or(self.config.velocity_window);
        if window < 2 {
            return Err(AppError::InsufficientData {
                required: 2,
                available: window,
            });
        }

        let view = self.store.timeline(from, to).await?;
        let series = analyzer::extract_file_series(path, metric, &view.snapshots)?;
        let velocity = match analyzer::file_velocity(&series, window) {
            Ok(slope) => Some(slope),
            Err(AppError::InsufficientData { .. }) => None,
            Err(e) => return Err(e),
        };

        debug!("File trend for {} ({}): {} points, velocity {:?}", path, metric, series.points.len(), velocity);

        Ok(FileTrendReport {
            path: series.path,
            metric,
            points: series.points,
            window,
            velocity,
            direction: velocity.map(analyzer::file_direction),
        })
    }

    /// Project `metric` `horizon_days` past the latest snapshot
    pub async fn forecast(
        &self,
        metric: Metric,
        horizon_days: f64,
        alert_threshold: Option<f64>,
    ) -> Result<Forecast, AppError> {
        if !horizon_days.is_finite() || horizon_days <= 0.0 {
            return Err(AppError::InvalidInput("horizonDays".to_string()));
        }
        let horizon = Duration::try_milliseconds((horizon_days * MILLIS_PER_DAY).round() as i64)
            .ok_or_else(|| AppError::InvalidInput("horizonDays".to_string()))?;
        if alert_threshold.is_some_and(|t| !t.is_finite()) {
            return Err(AppError::InvalidInput("alertThreshold".to_string()));
        }

        let series = self.series(metric, None, None).await?;
        let forecast = forecast::forecast(&series, horizon, alert_threshold)?;
        debug!(
            "Forecast for {} at {}: {:.3}",
            metric, forecast.projection.projected_at, forecast.projection.projected_value
        );
        Ok(forecast)
    }

    /// Findings present for more than `chronic_after` consecutive snapshots
    pub async fn chronic_findings(&self) -> Result<Vec<FindingLifecycle>, AppError> {
        let view = self.store.timeline(None, None).await?;
        Ok(self.tracker().chronic(&view.snapshots))
    }

    pub async fn finding_lifecycle(&self, id: &FindingId) -> Result<FindingLifecycle, AppError> {
        let view = self.store.timeline(None, None).await?;
        self.tracker()
            .track(&view.snapshots)
            .remove(id)
            .ok_or_else(|| AppError::FindingNotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::lifecycle::{FindingStatus, LifecycleEventKind};
    use crate::snapshot::models::fixtures::*;
    use crate::snapshot::models::Severity;
    use pretty_assertions::assert_eq;
    use tokio_test::assert_ok;

    fn facade() -> QueryFacade {
        QueryFacade::new(Arc::new(SnapshotStore::new(64)), AnalysisConfig::default())
    }

    #[tokio::test]
    async fn test_rising_health_trend() {
        let facade = facade();
        for (day, health) in [(0, 7.0), (7, 7.1), (14, 7.2)] {
            assert_ok!(facade.append_snapshot(payload(day, health, vec![], vec![]), false).await);
        }

        let report = facade.trend(Metric::Health, None, None, None).await.unwrap();
        assert_eq!(report.points.iter().map(|p| p.value).collect::<Vec<_>>(), vec![7.0, 7.1, 7.2]);
        assert!(report.velocity.unwrap() > 0.0);
        assert_eq!(report.direction, Some(TrendDirection::Improving));
    }

    #[tokio::test]
    async fn test_trend_empty_range() {
        let facade = facade();
        assert_eq!(
            facade.trend(Metric::Health, None, None, None).await.unwrap_err(),
            AppError::EmptyRange
        );
    }

    #[tokio::test]
    async fn test_single_point_trend_has_no_velocity() {
        let facade = facade();
        assert_ok!(facade.append_snapshot(payload(0, 7.0, vec![], vec![]), false).await);
        let report = facade.trend(Metric::Health, None, None, None).await.unwrap();
        assert_eq!(report.points.len(), 1);
        assert!(report.velocity.is_none());
    }

    #[tokio::test]
    async fn test_file_trend_tracks_one_path() {
        let facade = facade();
        let days = [
            (0, vec![file("src/core.py", 0.3, 100, 4.0)]),
            (1, vec![file("src/util.py", 0.1, 40, 1.0)]),
            (2, vec![file("src/core.py", 0.5, 140, 6.0)]),
            (3, vec![file("src/core.py", 0.7, 180, 8.0)]),
        ];
        for (day, files) in days {
            assert_ok!(facade.append_snapshot(payload(day, 7.0, files, vec![]), false).await);
        }

        let report = facade
            .file_trend("src/core.py", FileMetric::RiskScore, None, None, None)
            .await
            .unwrap();
        assert_eq!(report.points.len(), 4);
        assert_eq!(report.points[1].value, None);
        assert!(report.velocity.unwrap() > 0.0);
        assert_eq!(report.direction, Some(TrendDirection::Degrading));

        let recent = facade
            .file_trend("src/core.py", FileMetric::Loc, Some(ts(3)), None, None)
            .await
            .unwrap();
        assert_eq!(recent.points.len(), 1);
        assert!(recent.velocity.is_none());

        assert_eq!(
            facade
                .file_trend("src/missing.py", FileMetric::Loc, None, None, None)
                .await
                .unwrap_err(),
            AppError::FileNotFound("src/missing.py".to_string())
        );
        assert_eq!(
            facade
                .file_trend("src/core.py", FileMetric::Loc, None, None, Some(1))
                .await
                .unwrap_err(),
            AppError::InsufficientData { required: 2, available: 1 }
        );
    }

    #[tokio::test]
    async fn test_forecast_needs_three_snapshots() {
        let facade = facade();
        assert_ok!(facade.append_snapshot(payload(0, 7.0, vec![], vec![]), false).await);
        assert_ok!(facade.append_snapshot(payload(1, 7.1, vec![], vec![]), false).await);

        assert_eq!(
            facade.forecast(Metric::Health, 30.0, None).await.unwrap_err(),
            AppError::InsufficientData { required: 3, available: 2 }
        );
        assert_eq!(
            facade.forecast(Metric::Health, 0.0, None).await.unwrap_err(),
            AppError::InvalidInput("horizonDays".to_string())
        );
    }

    #[tokio::test]
    async fn test_forecast_projects_from_latest_snapshot() {
        let facade = facade();
        for (day, health) in [(0, 5.0), (1, 6.0), (2, 7.0)] {
            assert_ok!(facade.append_snapshot(payload(day, health, vec![], vec![]), false).await);
        }
        let forecast = facade.forecast(Metric::Health, 1.0, Some(9.0)).await.unwrap();
        assert_eq!(forecast.projection.projected_at, ts(3));
        assert_eq!(forecast.threshold_crossing_estimate, Some(ts(4)));
        assert!(forecast.advisory);
    }

    #[tokio::test]
    async fn test_delete_invalidates_cached_comparison() {
        let facade = facade();
        let a = assert_ok!(
            facade
                .append_snapshot(payload(0, 7.0, vec![file("x.py", 0.1, 10, 1.0)], vec![]), false)
                .await
        );
        let b = assert_ok!(
            facade
                .append_snapshot(payload(1, 7.0, vec![file("y.py", 0.1, 10, 1.0)], vec![]), false)
                .await
        );

        let first = facade.compare(a.id, b.id).await.unwrap();
        let again = facade.compare(a.id, b.id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        assert_ok!(facade.delete_snapshot(a.id).await);
        assert_eq!(
            facade.compare(a.id, b.id).await.unwrap_err(),
            AppError::SnapshotNotFound(a.id)
        );
    }

    #[tokio::test]
    async fn test_compare_reports_file_sets() {
        let facade = facade();
        let files = |names: &[&str]| names.iter().map(|n| file(n, 0.2, 100, 3.0)).collect::<Vec<_>>();
        let a = assert_ok!(facade.append_snapshot(payload(0, 7.0, files(&["x.py", "y.py"]), vec![]), false).await);
        let b = assert_ok!(facade.append_snapshot(payload(1, 7.0, files(&["y.py", "z.py"]), vec![]), false).await);

        let delta = facade.compare(a.id, b.id).await.unwrap();
        assert_eq!(delta.files_added, vec!["z.py".to_string()]);
        assert_eq!(delta.files_removed, vec!["x.py".to_string()]);
    }

    #[tokio::test]
    async fn test_compare_ignores_history_beyond_chronic_window() {
        // The element guard is tight enough that replaying the whole
        // history through it would be rejected
        let config = AnalysisConfig {
            max_comparison_elements: 10,
            ..AnalysisConfig::default()
        };
        let facade = QueryFacade::new(Arc::new(SnapshotStore::new(64)), config);

        let mut ids = Vec::new();
        for day in 0..40 {
            let mut findings = vec![finding("steady.py", "God File", Severity::High)];
            if day < 30 {
                findings.extend((0..20).map(|i| finding(&format!("legacy{}.py", i), "Dead Code", Severity::Low)));
            }
            if day >= 37 {
                findings.push(finding("core.py", "Hub File", Severity::Medium));
            }
            if day >= 38 {
                findings.push(finding("late.py", "Hub File", Severity::Medium));
            }
            ids.push(assert_ok!(facade.append_snapshot(payload(day, 7.0, vec![], findings), false).await).id);
        }

        let delta = facade.compare(ids[38], ids[39]).await.unwrap();
        let mut chronic = delta.chronic_unchanged.clone();
        chronic.sort();
        let mut expected = vec![
            FindingId::derive("steady.py", "God File", ""),
            FindingId::derive("core.py", "Hub File", ""),
        ];
        expected.sort();
        assert_eq!(chronic, expected);
    }

    #[tokio::test]
    async fn test_missing_ids_surface_uniformly() {
        let facade = facade();
        let a = assert_ok!(facade.append_snapshot(payload(0, 7.0, vec![], vec![]), false).await);
        let missing = SnapshotId(404);

        assert_eq!(facade.get_snapshot(missing).await.unwrap_err(), AppError::SnapshotNotFound(missing));
        assert_eq!(facade.compare(a.id, missing).await.unwrap_err(), AppError::SnapshotNotFound(missing));
        assert_eq!(facade.compare(missing, a.id).await.unwrap_err(), AppError::SnapshotNotFound(missing));
        assert_eq!(facade.delete_snapshot(missing).await.unwrap_err(), AppError::SnapshotNotFound(missing));
    }

    #[tokio::test]
    async fn test_chronic_and_lifecycle() {
        let facade = facade();
        let god_file = || finding("core.py", "God File", Severity::High);
        for day in 0..7 {
            let findings = if day == 5 { vec![] } else { vec![god_file()] };
            assert_ok!(facade.append_snapshot(payload(day, 7.0, vec![], findings), false).await);
        }

        let id = FindingId::derive("core.py", "God File", "");
        let lifecycle = facade.finding_lifecycle(&id).await.unwrap();
        assert_eq!(lifecycle.status, FindingStatus::Active);
        assert_eq!(
            lifecycle.events.iter().map(|e| e.kind).collect::<Vec<_>>(),
            vec![
                LifecycleEventKind::Introduced,
                LifecycleEventKind::Resolved,
                LifecycleEventKind::Reintroduced
            ]
        );
        assert!(!lifecycle.chronic);
        assert!(facade.chronic_findings().await.unwrap().is_empty());

        let unknown = FindingId::derive("nope.py", "God File", "");
        assert_eq!(
            facade.finding_lifecycle(&unknown).await.unwrap_err(),
            AppError::FindingNotFound(unknown)
        );
    }

    #[tokio::test]
    async fn test_chronic_findings_listed() {
        let facade = facade();
        for day in 0..3 {
            let findings = vec![finding("core.py", "God File", Severity::High)];
            assert_ok!(facade.append_snapshot(payload(day, 7.0, vec![], findings), false).await);
        }
        let chronic = facade.chronic_findings().await.unwrap();
        assert_eq!(chronic.len(), 1);
        assert_eq!(chronic[0].current_run, 3);
    }

    #[tokio::test]
    async fn test_concurrent_reads_and_writes() {
        let facade = Arc::new(facade());
        let first = assert_ok!(facade.append_snapshot(payload(0, 7.0, vec![], vec![]), false).await);

        let mut handles = Vec::new();
        for day in 1..20 {
            let facade = facade.clone();
            handles.push(tokio::spawn(async move {
                facade
                    .append_snapshot(payload(day, 7.0 + day as f64 / 10.0, vec![], vec![]), false)
                    .await
                    .map(|s| s.id)
            }));
        }
        for _ in 0..20 {
            let facade = facade.clone();
            let base = first.id;
            handles.push(tokio::spawn(async move {
                facade.compare(base, base).await.map(|_| base)
            }));
        }
        for handle in handles {
            assert_ok!(handle.await.unwrap());
        }

        let report = facade.trend(Metric::Health, None, None, Some(20)).await.unwrap();
        assert_eq!(report.points.len(), 20);
        assert!(report.points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}
