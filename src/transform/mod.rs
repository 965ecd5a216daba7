//! Record cleaning and derived metrics.
//!
//! The transform runs in a fixed order:
//! raw batch -> clean -> execution rate -> monthly variance -> annual variance
//!
//! Data-quality problems never escape this module: they degrade to nulls,
//! dropped rows, or a logged pass-through.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{AnnualVarianceMode, Batch, Field, RawBatch};
use crate::report::Reporter;

pub mod clean;
pub mod metrics;

pub use clean::clean_batch;
pub use metrics::{calculate_annual_variance, calculate_execution_rate, calculate_monthly_variance};

#[derive(Debug, Error)]
pub enum TransformError {
    /// The batch has rows but lacks a column every record needs.
    #[error("input batch has no `{0}` column; records cannot be scored or grouped")]
    MissingColumn(Field),
}

/// Clean a raw batch and derive every metric.
pub fn transform_batch(
    raw: RawBatch,
    now: DateTime<Utc>,
    annual_mode: AnnualVarianceMode,
    reporter: &dyn Reporter,
) -> Result<Batch, TransformError> {
    let batch = clean_batch(raw, now, reporter)?;
    let batch = calculate_execution_rate(batch, reporter);
    let batch = calculate_monthly_variance(batch, reporter);
    Ok(calculate_annual_variance(batch, annual_mode, reporter))
}
