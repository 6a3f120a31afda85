//! Ordinary least squares over (timestamp, value) points.
//!
//! The regressor is elapsed time in days since the first point, never the
//! index, so irregular snapshot spacing is handled correctly.

use crate::error::AppError;
use crate::trend::analyzer::SeriesPoint;
use chrono::{DateTime, Duration, Utc};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Fitted line `value = intercept + slope * days_since(origin)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub origin: DateTime<Utc>,
    /// Change per day
    pub slope: f64,
    pub intercept: f64,
    pub samples: usize,
    pub mean_x: f64,
    /// Sum of squared deviations of x
    pub sxx: f64,
    /// SSR / (n - 2); zero when n == 2
    pub residual_variance: f64,
    pub r_squared: f64,
    /// x of the last point
    pub last_x: f64,
}

impl LinearFit {
    pub fn days_since_origin(&self, at: DateTime<Utc>) -> f64 {
        elapsed_days(self.origin, at)
    }

    pub fn value_at_x(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    /// Timestamp at `x` days after the origin, `None` when out of range
    pub fn timestamp_at(&self, x: f64) -> Option<DateTime<Utc>> {
        let seconds = x * SECONDS_PER_DAY;
        if !seconds.is_finite() || seconds.abs() > i64::MAX as f64 / 1000.0 {
            return None;
        }
        let offset = Duration::try_milliseconds((seconds * 1000.0).round() as i64)?;
        self.origin.checked_add_signed(offset)
    }
}

pub fn elapsed_days(origin: DateTime<Utc>, at: DateTime<Utc>) -> f64 {
    (at - origin).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY
}

/// Least-squares fit; needs at least two points at distinct timestamps.
pub fn fit(points: &[SeriesPoint]) -> Result<LinearFit, AppError> {
    let n = points.len();
    if n < 2 {
        return Err(AppError::InsufficientData {
            required: 2,
            available: n,
        });
    }

    let origin = points[0].timestamp;
    let xs: Vec<f64> = points.iter().map(|p| elapsed_days(origin, p.timestamp)).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.value).collect();

    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (x, y) in xs.iter().zip(&ys) {
        sxx += (x - mean_x).powi(2);
        sxy += (x - mean_x) * (y - mean_y);
        syy += (y - mean_y).powi(2);
    }

    if sxx <= f64::EPSILON {
        return Err(AppError::InsufficientData {
            required: 2,
            available: 1,
        });
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let ssr: f64 = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    let residual_variance = if n > 2 { ssr / (n - 2) as f64 } else { 0.0 };
    let r_squared = if syy > 0.0 { 1.0 - ssr / syy } else { 1.0 };

    Ok(LinearFit {
        origin,
        slope,
        intercept,
        samples: n,
        mean_x,
        sxx,
        residual_variance,
        r_squared,
        last_x: xs[n - 1],
    })
}
