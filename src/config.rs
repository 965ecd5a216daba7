//! Environment-based pipeline configuration.
//!
//! Values come from the process environment, after loading `.env` (if any)
//! with `dotenvy`. Parsing goes through a key lookup function so tests never
//! touch the real environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{AnnualVarianceMode, WriteMode};
use crate::io::TableId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value `{0}` (set it in the environment or .env)")]
    Missing(&'static str),
    #[error("invalid value for `{key}`: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
    /// Directory of the file-backed warehouse.
    pub warehouse_root: PathBuf,
    /// When set, batches are posted to this endpoint instead of the file warehouse.
    pub warehouse_url: Option<String>,

    pub source_file: PathBuf,
    pub siafem_api_url: Option<String>,
    pub sigeo_api_url: Option<String>,
    pub siafem_year: Option<i32>,
    pub siafem_month: Option<u32>,
    pub sigeo_municipality: Option<String>,

    pub log_level: String,
    pub write_mode: WriteMode,
    /// Total load attempts.
    pub max_retries: u32,
    /// Per-write timeout handed to the warehouse backend.
    pub timeout: Duration,
    pub annual_variance: AnnualVarianceMode,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let write_mode = match get("WRITE_DISPOSITION") {
            None => WriteMode::Truncate,
            Some(raw) => WriteMode::from_disposition(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "WRITE_DISPOSITION",
                value: raw,
                reason: "expected WRITE_TRUNCATE or WRITE_APPEND".to_string(),
            })?,
        };

        let annual_variance = match get("ANNUAL_VARIANCE_MODE") {
            None => AnnualVarianceMode::default(),
            Some(raw) => AnnualVarianceMode::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "ANNUAL_VARIANCE_MODE",
                value: raw,
                reason: "expected year_over_year or legacy".to_string(),
            })?,
        };

        let max_retries: u32 = parse_or("MAX_RETRIES", get("MAX_RETRIES"), 3)?;
        if max_retries == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_RETRIES",
                value: "0".to_string(),
                reason: "at least one load attempt is required".to_string(),
            });
        }

        let siafem_month: Option<u32> = parse_opt("SIAFEM_MONTH", get("SIAFEM_MONTH"))?;
        if let Some(month) = siafem_month {
            if !(1..=12).contains(&month) {
                return Err(ConfigError::Invalid {
                    key: "SIAFEM_MONTH",
                    value: month.to_string(),
                    reason: "month must be within 1..=12".to_string(),
                });
            }
        }

        Ok(Self {
            project_id: required("WAREHOUSE_PROJECT_ID")?,
            dataset_id: required("WAREHOUSE_DATASET_ID")?,
            table_id: required("WAREHOUSE_TABLE_ID")?,
            warehouse_root: get("WAREHOUSE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("warehouse")),
            warehouse_url: get("WAREHOUSE_URL"),
            source_file: get("SOURCE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/input.csv")),
            siafem_api_url: get("SIAFEM_API_URL"),
            sigeo_api_url: get("SIGEO_API_URL"),
            siafem_year: parse_opt("SIAFEM_YEAR", get("SIAFEM_YEAR"))?,
            siafem_month,
            sigeo_municipality: get("SIGEO_MUNICIPALITY"),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string()),
            write_mode,
            max_retries,
            timeout: Duration::from_secs(parse_or("TIMEOUT_SECONDS", get("TIMEOUT_SECONDS"), 300)?),
            annual_variance,
        })
    }

    pub fn table(&self) -> TableId {
        TableId::new(&self.project_id, &self.dataset_id, &self.table_id)
    }

    /// Whether extraction should use the HTTP sources instead of the flat file.
    pub fn uses_api_sources(&self) -> bool {
        self.siafem_api_url.is_some() || self.sigeo_api_url.is_some()
    }
}

fn parse_opt<T: FromStr>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        })
    })
    .transpose()
}

fn parse_or<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(key, raw)?.unwrap_or(default))
}
