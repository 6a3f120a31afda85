//! Forecaster
//!
//! Extrapolates the least-squares line of a series. Every output here is
//! advisory: a straight line through noisy history is an estimate, and
//! callers are told so in the response.

use crate::error::AppError;
use crate::trend::analyzer::TimeSeries;
use crate::trend::regression::{self, LinearFit};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Fewest points a forecast is made from
pub const MIN_FORECAST_POINTS: usize = 3;

pub const CONFIDENCE_LEVEL: f64 = 0.95;

/// Two-sided 95% Student-t critical values for 1..=30 degrees of freedom
const T_975: [f64; 30] = [
    12.706, 4.303, 3.182, 2.776, 2.571, 2.447, 2.365, 2.306, 2.262, 2.228, 2.201, 2.179, 2.160,
    2.145, 2.131, 2.120, 2.110, 2.101, 2.093, 2.086, 2.080, 2.074, 2.069, 2.064, 2.060, 2.056,
    2.052, 2.048, 2.045, 2.042,
];

const Z_975: f64 = 1.96;

fn t_critical(degrees_of_freedom: usize) -> f64 {
    match degrees_of_freedom {
        0 => f64::INFINITY,
        df if df <= T_975.len() => T_975[df - 1],
        _ => Z_975,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub projected_value: f64,
    pub confidence_interval: ConfidenceInterval,
    pub projected_at: DateTime<Utc>,
    /// Fit slope, per day
    pub slope: f64,
    pub r_squared: f64,
    pub samples: usize,
}

fn fit_for_forecast(series: &TimeSeries) -> Result<LinearFit, AppError> {
    if series.points.len() < MIN_FORECAST_POINTS {
        return Err(AppError::InsufficientData {
            required: MIN_FORECAST_POINTS,
            available: series.points.len(),
        });
    }
    regression::fit(&series.points)
}

/// Project the series `horizon` past its latest point.
pub fn project(series: &TimeSeries, horizon: Duration) -> Result<Projection, AppError> {
    if horizon <= Duration::zero() {
        return Err(AppError::InvalidInput("horizon".to_string()));
    }
    let fit = fit_for_forecast(series)?;

    let anchor = series
        .last()
        .map(|p| p.timestamp)
        .ok_or(AppError::EmptyRange)?;
    let projected_at = anchor
        .checked_add_signed(horizon)
        .ok_or_else(|| AppError::InvalidInput("horizon".to_string()))?;

    let x0 = fit.days_since_origin(projected_at);
    let projected_value = fit.value_at_x(x0);

    let n = fit.samples as f64;
    let s = fit.residual_variance.sqrt();
    let spread = (1.0 + 1.0 / n + (x0 - fit.mean_x).powi(2) / fit.sxx).sqrt();
    let margin = t_critical(fit.samples - 2) * s * spread;

    Ok(Projection {
        projected_value,
        confidence_interval: ConfidenceInterval {
            lower: projected_value - margin,
            upper: projected_value + margin,
            level: CONFIDENCE_LEVEL,
        },
        projected_at,
        slope: fit.slope,
        r_squared: fit.r_squared,
        samples: fit.samples,
    })
}

/// When the fitted line reaches `threshold`, if it is heading there.
///
/// `None` when the line is flat or moving away from the threshold. A
/// crossing is never placed before the latest point: if the line has
/// already passed the threshold the answer is the latest point itself.
pub fn threshold_crossing(series: &TimeSeries, threshold: f64) -> Result<Option<DateTime<Utc>>, AppError> {
    let fit = fit_for_forecast(series)?;
    Ok(crossing(&fit, threshold))
}

fn crossing(fit: &LinearFit, threshold: f64) -> Option<DateTime<Utc>> {
    if fit.slope.abs() < f64::EPSILON {
        return None;
    }

    let current = fit.value_at_x(fit.last_x);
    let gap = threshold - current;
    if gap == 0.0 {
        return fit.timestamp_at(fit.last_x);
    }
    // Moving away from the threshold
    if gap.signum() != fit.slope.signum() {
        return None;
    }

    let x = (threshold - fit.intercept) / fit.slope;
    fit.timestamp_at(x.max(fit.last_x))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    #[serde(flatten)]
    pub projection: Projection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_crossing_estimate: Option<DateTime<Utc>>,
    pub advisory: bool,
}

/// Projection plus, when asked, the threshold crossing from the same fit
pub fn forecast(series: &TimeSeries, horizon: Duration, alert_threshold: Option<f64>) -> Result<Forecast, AppError> {
    let projection = project(series, horizon)?;
    let threshold_crossing_estimate = match alert_threshold {
        Some(threshold) => threshold_crossing(series, threshold)?,
        None => None,
    };

    Ok(Forecast {
        projection,
        alert_threshold,
        threshold_crossing_estimate,
        advisory: true,
    })
}
