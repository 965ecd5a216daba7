//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the canonical record and batch types (`FinancialRecord`, `Batch`, `RawBatch`)
//! - the closed set of target columns (`Field`, `FieldType`)
//! - the fixed target schema and completeness rule (`SchemaRegistry`)

pub mod schema;
pub mod types;

pub use schema::*;
pub use types::*;
