//! Raw record extraction.
//!
//! Sources return an untransformed `RawBatch`. Any fatal problem (missing file,
//! network failure, undecodable response) is an `ExtractError` and aborts the
//! run before the transform starts.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::PipelineConfig;
use crate::domain::RawBatch;
use crate::report::{Reporter, Stage};

pub mod api;
pub mod file;

pub use api::{SourceClient, SourceQuery};
pub use file::read_csv;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("source file not found or unreadable '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("error parsing CSV '{path}': {message}")]
    Csv { path: PathBuf, message: String },
    #[error("{system} request failed: {message}")]
    Request { system: &'static str, message: String },
    #[error("{system} request failed with status {status}")]
    Status { system: &'static str, status: u16 },
    #[error("failed to decode {system} response: {message}")]
    Decode { system: &'static str, message: String },
}

/// Pull the run's raw batch from the configured source.
///
/// The HTTP sources take precedence; the flat file is the fallback when no
/// API endpoint is configured.
pub fn extract(config: &PipelineConfig, reporter: &dyn Reporter) -> Result<RawBatch, ExtractError> {
    if config.uses_api_sources() {
        let client = SourceClient::new()?;
        client.fetch_combined(&SourceQuery::from_config(config), reporter)
    } else {
        reporter.info(
            Stage::Extract,
            &format!("Extracting data from {}", config.source_file.display()),
        );
        let batch = read_csv(&config.source_file)?;
        reporter.info(
            Stage::Extract,
            &format!("Successfully extracted {} rows", batch.len()),
        );
        Ok(batch)
    }
}
