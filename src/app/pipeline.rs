//! The ETL pipeline shared by the CLI and library callers.
//!
//! extract -> clean -> execution rate -> monthly variance -> annual variance -> load
//!
//! `run_pipeline` wires the configured source and warehouse; `run_with` takes an
//! already-extracted batch and explicit collaborators so the whole flow can be
//! exercised without network or real delays.

use std::time::Duration;

use chrono::Utc;

use crate::config::PipelineConfig;
use crate::data::extract;
use crate::domain::{Batch, RawBatch, SchemaRegistry, WriteMode};
use crate::error::AppError;
use crate::io::{FileWarehouse, HttpWarehouse, LoadTarget, TableId, WarehouseWriter};
use crate::load::{LoadReport, RetryPolicy, RetryingLoader, Sleeper, ThreadSleeper};
use crate::report::{Reporter, Stage};
use crate::transform::transform_batch;

/// All outputs of a single pipeline run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub table: TableId,
    pub write_mode: WriteMode,
    pub rows_extracted: usize,
    pub rows_dropped: usize,
    /// Loaded records that fail the completeness rule.
    pub incomplete: usize,
    pub batch: Batch,
    pub load: LoadReport,
}

/// Run the full pipeline against the configured source and warehouse.
pub fn run_pipeline(config: &PipelineConfig, reporter: &dyn Reporter) -> Result<RunOutput, AppError> {
    reporter.info(
        Stage::Config,
        &format!("Configuration loaded: table={}", config.table()),
    );

    reporter.info(Stage::Pipeline, "PHASE 1: EXTRACT");
    let raw = extract(config, reporter)?;

    let writer = build_writer(config)?;
    run_with(raw, config, writer.as_ref(), &ThreadSleeper, reporter)
}

/// HTTP warehouse when `WAREHOUSE_URL` is set, the file warehouse otherwise.
pub fn build_writer(config: &PipelineConfig) -> Result<Box<dyn WarehouseWriter>, AppError> {
    match &config.warehouse_url {
        Some(url) => {
            let writer = HttpWarehouse::new(url.clone())
                .map_err(|e| AppError::new(5, format!("Load failed: {e}")))?;
            Ok(Box::new(writer))
        }
        None => Ok(Box::new(FileWarehouse::new(config.warehouse_root.clone()))),
    }
}

/// Transform and load an extracted batch.
pub fn run_with(
    raw: RawBatch,
    config: &PipelineConfig,
    writer: &dyn WarehouseWriter,
    sleeper: &dyn Sleeper,
    reporter: &dyn Reporter,
) -> Result<RunOutput, AppError> {
    let rows_extracted = raw.len();

    reporter.info(Stage::Pipeline, "PHASE 2: TRANSFORM");
    let batch = transform_batch(raw, Utc::now(), config.annual_variance, reporter)?;

    let incomplete = batch
        .records
        .iter()
        .filter(|r| !SchemaRegistry::is_complete(r))
        .count();
    if incomplete > 0 {
        reporter.warn(
            Stage::Pipeline,
            &format!("{incomplete} records lack source_system or municipality_code; loading them with NULLs"),
        );
    }

    reporter.info(Stage::Pipeline, "PHASE 3: LOAD");
    let target = LoadTarget::new(config.table(), config.write_mode, config.timeout);
    let load = if batch.is_empty() {
        // A truncate with zero rows would wipe the table.
        reporter.warn(
            Stage::Load,
            &format!("No records to load; leaving {} untouched", target.table),
        );
        LoadReport {
            attempts: 0,
            rows_written: 0,
            backoff: Duration::ZERO,
        }
    } else {
        let loader = RetryingLoader::with_sleeper(writer, sleeper, RetryPolicy::new(config.max_retries));
        loader.load(&batch, &target, reporter)?
    };

    reporter.info(Stage::Pipeline, "ETL pipeline completed successfully");
    Ok(RunOutput {
        table: target.table,
        write_mode: config.write_mode,
        rows_extracted,
        rows_dropped: rows_extracted - batch.len(),
        incomplete,
        batch,
        load,
    })
}
