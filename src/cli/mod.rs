//! Command-line parsing for the budget-execution ETL.
//!
//! Parsing and dispatch stay separate from the pipeline code; every flag here
//! is an override of an environment setting.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::WriteMode;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "budget-etl",
    version,
    about = "Municipal budget-execution ETL (SIAFEM/SIGEO to warehouse)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract, clean, compute metrics and load into the warehouse table.
    Run(RunArgs),
    /// Print the target table schema as JSON.
    Schema,
}

#[derive(Debug, Parser, Clone, Default)]
pub struct RunArgs {
    /// Load environment from this file instead of `./.env`.
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// CSV input used when no SIAFEM/SIGEO endpoint is configured (overrides SOURCE_FILE).
    #[arg(long, value_name = "PATH")]
    pub source_file: Option<PathBuf>,

    /// Replace or extend the target table (overrides WRITE_DISPOSITION).
    #[arg(long, value_enum)]
    pub write_mode: Option<WriteMode>,

    /// Total load attempts (overrides MAX_RETRIES).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_retries: Option<u32>,

    /// Show the N highest execution rates after the summary.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Print nothing on success.
    #[arg(short, long)]
    pub quiet: bool,
}
