//! Trend and forecast API routes

use crate::error::{validation_error, ApiResult};
use crate::query::{FileTrendReport, TrendReport};
use crate::routes::extract::{ApiPath, ApiQuery};
use crate::state::SharedState;
use crate::trend::analyzer::{FileMetric, Metric};
use crate::trend::forecast::Forecast;
use axum::{
    extract::State,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

const DEFAULT_HORIZON_DAYS: f64 = 30.0;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Smoothing window; below 2 is reported as insufficient data
    pub window: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ForecastParams {
    #[validate(range(exclusive_min = 0.0, message = "horizonDays must be positive"))]
    pub horizon_days: Option<f64>,
    pub alert_threshold: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendResponse {
    pub success: bool,
    pub trend: TrendReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTrendResponse {
    pub success: bool,
    pub trend: FileTrendReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResponse {
    pub success: bool,
    pub metric: Metric,
    pub forecast: Forecast,
}

/// Time series and velocity for one metric
pub async fn get_trend(
    State(state): State<SharedState>,
    ApiPath(metric): ApiPath<String>,
    ApiQuery(params): ApiQuery<TrendParams>,
) -> ApiResult<Json<TrendResponse>> {
    let metric: Metric = metric.parse()?;

    let trend = state
        .facade
        .trend(metric, params.from, params.to, params.window)
        .await?;

    Ok(Json(TrendResponse { success: true, trend }))
}

/// One file's metric over time; `path` arrives percent-encoded
pub async fn get_file_trend(
    State(state): State<SharedState>,
    ApiPath((path, metric)): ApiPath<(String, String)>,
    ApiQuery(params): ApiQuery<TrendParams>,
) -> ApiResult<Json<FileTrendResponse>> {
    let metric: FileMetric = metric.parse()?;

    let trend = state
        .facade
        .file_trend(&path, metric, params.from, params.to, params.window)
        .await?;

    Ok(Json(FileTrendResponse { success: true, trend }))
}

/// Advisory projection of one metric
pub async fn get_forecast(
    State(state): State<SharedState>,
    ApiPath(metric): ApiPath<String>,
    ApiQuery(params): ApiQuery<ForecastParams>,
) -> ApiResult<Json<ForecastResponse>> {
    let metric: Metric = metric.parse()?;
    params.validate().map_err(|e| validation_error(e.to_string()))?;

    let forecast = state
        .facade
        .forecast(
            metric,
            params.horizon_days.unwrap_or(DEFAULT_HORIZON_DAYS),
            params.alert_threshold,
        )
        .await?;

    Ok(Json(ForecastResponse {
        success: true,
        metric,
        forecast,
    }))
}
