//! Flat-file (CSV) extraction.
//!
//! Cells are kept as strings; typing happens in the cleaner. Empty cells are
//! treated as absent values rather than empty strings.

use std::fs::File;
use std::path::Path;

use serde_json::Value;

use crate::data::ExtractError;
use crate::domain::{RawBatch, RawRecord};

pub fn read_csv(path: &Path) -> Result<RawBatch, ExtractError> {
    let file = File::open(path).map_err(|source| ExtractError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| ExtractError::Csv {
            path: path.to_path_buf(),
            message: format!("failed to read headers: {e}"),
        })?
        .clone();

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        // +2: records start after the header line, and lines are 1-based.
        let line = idx + 2;
        let record = result.map_err(|e| ExtractError::Csv {
            path: path.to_path_buf(),
            message: format!("line {line}: {e}"),
        })?;

        let row: RawRecord = headers
            .iter()
            .zip(record.iter())
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(name, cell)| (name.to_string(), Value::String(cell.to_string())))
            .collect();
        rows.push(row);
    }

    Ok(RawBatch::new(rows))
}
