//! Trend analysis and forecasting over snapshot history
//!
//! - `analyzer`: metric extraction, velocity and smoothing
//! - `regression`: ordinary least squares on elapsed time
//! - `forecast`: projections with prediction intervals and threshold alerts

pub mod analyzer;
pub mod forecast;
pub mod regression;

#[allow(unused_imports)]
pub use analyzer::{Metric, SeriesPoint, TimeSeries, TrendDirection};
#[allow(unused_imports)]
pub use forecast::{Forecast, Projection};
