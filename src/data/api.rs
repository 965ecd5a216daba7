//! SIAFEM and SIGEO HTTP sources.
//!
//! SIAFEM serves budget execution (spending by function/program), SIGEO serves
//! municipal budget planning and allocations. Both answer with a JSON array of
//! row objects, or a single object for one row.

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;

use crate::config::PipelineConfig;
use crate::data::ExtractError;
use crate::domain::{Field, RawBatch, RawRecord, SourceSystem};
use crate::report::{Reporter, Stage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoints and filters for one combined extraction.
#[derive(Debug, Clone, Default)]
pub struct SourceQuery {
    pub siafem_url: Option<String>,
    pub sigeo_url: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub municipality: Option<String>,
}

impl SourceQuery {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            siafem_url: config.siafem_api_url.clone(),
            sigeo_url: config.sigeo_api_url.clone(),
            year: config.siafem_year,
            month: config.siafem_month,
            municipality: config.sigeo_municipality.clone(),
        }
    }
}

pub struct SourceClient {
    client: Client,
}

impl SourceClient {
    pub fn new() -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExtractError::Request {
                system: "HTTP",
                message: format!("failed to build client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Budget execution rows, optionally filtered by year (`ano`) and month (`mes`).
    pub fn fetch_siafem(
        &self,
        endpoint: Option<&str>,
        year: Option<i32>,
        month: Option<u32>,
        reporter: &dyn Reporter,
    ) -> Result<RawBatch, ExtractError> {
        let mut params = Vec::new();
        if let Some(year) = year {
            params.push(("ano", year.to_string()));
        }
        if let Some(month) = month {
            params.push(("mes", month.to_string()));
        }
        self.fetch(SourceSystem::Siafem, endpoint, &params, reporter)
    }

    /// Budget planning rows, optionally filtered by municipality (`municipio`).
    pub fn fetch_sigeo(
        &self,
        endpoint: Option<&str>,
        municipality: Option<&str>,
        reporter: &dyn Reporter,
    ) -> Result<RawBatch, ExtractError> {
        let mut params = Vec::new();
        if let Some(municipality) = municipality {
            params.push(("municipio", municipality.to_string()));
        }
        self.fetch(SourceSystem::Sigeo, endpoint, &params, reporter)
    }

    /// Both sources concatenated, SIAFEM rows first.
    pub fn fetch_combined(&self, query: &SourceQuery, reporter: &dyn Reporter) -> Result<RawBatch, ExtractError> {
        reporter.info(Stage::Extract, "Extracting combined SIAFEM and SIGEO financial data");
        let mut combined = RawBatch::default();

        if query.siafem_url.is_some() {
            combined.extend(self.fetch_siafem(
                query.siafem_url.as_deref(),
                query.year,
                query.month,
                reporter,
            )?);
        }
        if query.sigeo_url.is_some() {
            combined.extend(self.fetch_sigeo(
                query.sigeo_url.as_deref(),
                query.municipality.as_deref(),
                reporter,
            )?);
        }

        if combined.is_empty() {
            reporter.warn(Stage::Extract, "No data retrieved from either SIAFEM or SIGEO");
        } else {
            reporter.info(
                Stage::Extract,
                &format!("Combined {} records from SIAFEM and SIGEO", combined.len()),
            );
        }
        Ok(combined)
    }

    fn fetch(
        &self,
        system: SourceSystem,
        endpoint: Option<&str>,
        params: &[(&str, String)],
        reporter: &dyn Reporter,
    ) -> Result<RawBatch, ExtractError> {
        let tag = system.tag();
        let Some(endpoint) = endpoint else {
            reporter.warn(
                Stage::Extract,
                &format!("No {tag} API endpoint provided, returning empty batch"),
            );
            return Ok(RawBatch::default());
        };

        reporter.info(Stage::Extract, &format!("Fetching {tag} budget data from {endpoint}"));
        let resp = self
            .client
            .get(endpoint)
            .query(params)
            .send()
            .map_err(|e| ExtractError::Request {
                system: tag,
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ExtractError::Status {
                system: tag,
                status: resp.status().as_u16(),
            });
        }

        let body: Value = resp.json().map_err(|e| ExtractError::Decode {
            system: tag,
            message: e.to_string(),
        })?;
        let mut rows = decode_rows(system, body)?;
        tag_rows(&mut rows, system);

        reporter.info(Stage::Extract, &format!("Successfully fetched {} {tag} records", rows.len()));
        Ok(RawBatch::new(rows))
    }
}

/// Accept either an array of row objects or one row object.
fn decode_rows(system: SourceSystem, body: Value) -> Result<Vec<RawRecord>, ExtractError> {
    let not_an_object = |found: &Value| ExtractError::Decode {
        system: system.tag(),
        message: format!("expected a JSON object per row, found {found}"),
    };
    match body {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(not_an_object(&other)),
            })
            .collect(),
        Value::Object(row) => Ok(vec![row]),
        other => Err(not_an_object(&other)),
    }
}

/// Stamp each row with its origin, replacing any source-provided tag.
fn tag_rows(rows: &mut [RawRecord], system: SourceSystem) {
    for row in rows {
        row.remove("fonte_dados");
        row.insert(
            Field::SourceSystem.name().to_string(),
            Value::String(system.tag().to_string()),
        );
    }
}
