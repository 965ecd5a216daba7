//! `budget-etl` library crate.
//!
//! The binary (`budget-etl`) is a thin wrapper around this library so that:
//!
//! - the cleaning, metric and retry logic is testable without spawning processes
//! - the pipeline can be driven with in-memory sources and warehouses

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod io;
pub mod load;
pub mod report;
pub mod transform;
