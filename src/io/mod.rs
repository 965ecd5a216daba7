//! Warehouse output.
//!
//! - the write contract every warehouse backend implements (`WarehouseWriter`)
//! - NDJSON table files with whole-batch commits (`file_store`)
//! - an HTTP load endpoint (`http_store`)

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{Batch, ColumnSpec, SchemaRegistry, WriteMode};

pub mod file_store;
pub mod http_store;

pub use file_store::*;
pub use http_store::*;

/// Fully qualified table identity (`project.dataset.table`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Everything a backend needs to perform one write.
#[derive(Debug, Clone)]
pub struct LoadTarget {
    pub table: TableId,
    /// Always the registry's schema; carried so backends never build their own.
    pub schema: Vec<ColumnSpec>,
    pub write_mode: WriteMode,
    /// Upper bound for one write attempt, enforced by the backend.
    pub timeout: Duration,
}

impl LoadTarget {
    pub fn new(table: TableId, write_mode: WriteMode, timeout: Duration) -> Self {
        Self {
            table,
            schema: SchemaRegistry::target_schema(),
            write_mode,
            timeout,
        }
    }
}

/// Result of one successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    pub rows_written: usize,
}

#[derive(Debug, Error)]
pub enum WriteError {
    /// Worth retrying: I/O hiccups, timeouts, overloaded endpoints.
    #[error("transient warehouse error: {0}")]
    Transient(String),
    /// Retrying cannot help: rejected payloads, bad credentials, bad schema.
    #[error("warehouse rejected the write: {0}")]
    Fatal(String),
}

impl WriteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteError::Transient(_))
    }
}

/// One write attempt of a whole batch.
///
/// Implementations commit the batch entirely or not at all.
pub trait WarehouseWriter {
    fn write(&self, batch: &Batch, target: &LoadTarget) -> Result<WriteReceipt, WriteError>;
}

impl<W: WarehouseWriter + ?Sized> WarehouseWriter for &W {
    fn write(&self, batch: &Batch, target: &LoadTarget) -> Result<WriteReceipt, WriteError> {
        (**self).write(batch, target)
    }
}

impl<W: WarehouseWriter + ?Sized> WarehouseWriter for Box<W> {
    fn write(&self, batch: &Batch, target: &LoadTarget) -> Result<WriteReceipt, WriteError> {
        (**self).write(batch, target)
    }
}
