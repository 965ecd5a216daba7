//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the real main that:
//! - parses CLI arguments
//! - loads `.env` and installs the tracing subscriber
//! - runs the ETL pipeline and prints the summary

use std::path::Path;

use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::{Command, RunArgs};
use crate::config::PipelineConfig;
use crate::domain::SchemaRegistry;
use crate::error::AppError;
use crate::report::{Reporter, Stage, TracingReporter};

pub mod pipeline;

/// Entry point for the `budget-etl` binary.
pub fn run() -> Result<(), AppError> {
    // Clap requires a subcommand name, so `budget-etl` and `budget-etl --flag`
    // are rewritten to `budget-etl run ...` before parsing.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Schema => handle_schema(),
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    load_env(args.env_file.as_deref())?;
    let config = config_from_args(&args)?;
    init_tracing(&config.log_level);

    let reporter = TracingReporter::new(run_id());
    reporter.info(Stage::Pipeline, "Starting ETL pipeline execution");

    let output = match pipeline::run_pipeline(&config, &reporter) {
        Ok(output) => output,
        Err(err) => {
            reporter.error(Stage::Pipeline, &format!("Pipeline execution failed: {err}"));
            return Err(err);
        }
    };

    if !args.quiet {
        println!("{}", crate::report::format_run_summary(&output, reporter.run_id()));
        if args.top > 0 && !output.batch.is_empty() {
            println!("{}", crate::report::format_execution_table(&output.batch.records, args.top));
        }
    }
    Ok(())
}

fn handle_schema() -> Result<(), AppError> {
    let schema = serde_json::to_string_pretty(&SchemaRegistry::target_schema())
        .map_err(|e| AppError::new(1, format!("Failed to serialize schema: {e}")))?;
    println!("{schema}");
    Ok(())
}

fn load_env(env_file: Option<&Path>) -> Result<(), AppError> {
    match env_file {
        Some(path) => {
            dotenvy::from_path(path).map_err(|e| {
                AppError::new(2, format!("Failed to load env file '{}': {e}", path.display()))
            })?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

/// Environment configuration with CLI overrides applied.
pub fn config_from_args(args: &RunArgs) -> Result<PipelineConfig, AppError> {
    let mut config = PipelineConfig::from_lookup(|key| std::env::var(key).ok())?;
    apply_overrides(&mut config, args);
    Ok(config)
}

fn apply_overrides(config: &mut PipelineConfig, args: &RunArgs) {
    if let Some(path) = &args.source_file {
        config.source_file = path.clone();
    }
    if let Some(mode) = args.write_mode {
        config.write_mode = mode;
    }
    if let Some(n) = args.max_retries {
        config.max_retries = n;
    }
}

/// `RUST_LOG` wins over `LOG_LEVEL` when both are set.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_ascii_lowercase()));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

/// Rewrite argv so `budget-etl` defaults to `budget-etl run`.
///
/// Rules:
/// - `budget-etl`                     -> `budget-etl run`
/// - `budget-etl --write-mode append` -> `budget-etl run --write-mode append`
/// - `budget-etl --help/--version/-h` -> unchanged
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("run".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        arg1.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    if is_top_level_help_or_version {
        return argv;
    }

    if matches!(arg1.as_str(), "run" | "schema") {
        return argv;
    }

    if arg1.starts_with('-') {
        argv.insert(1, "run".to_string());
        return argv;
    }

    argv
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::domain::WriteMode;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_invocation_runs_pipeline() {
        assert_eq!(rewrite_args(argv(&["budget-etl"])), argv(&["budget-etl", "run"]));
    }

    #[test]
    fn leading_flags_are_run_flags() {
        assert_eq!(
            rewrite_args(argv(&["budget-etl", "--write-mode", "append"])),
            argv(&["budget-etl", "run", "--write-mode", "append"])
        );
    }

    #[test]
    fn subcommands_and_help_are_untouched() {
        for args in [
            &["budget-etl", "schema"][..],
            &["budget-etl", "run", "--quiet"][..],
            &["budget-etl", "--help"][..],
            &["budget-etl", "-V"][..],
        ] {
            assert_eq!(rewrite_args(argv(args)), argv(args));
        }
    }

    #[test]
    fn rewritten_args_parse() {
        let cli = crate::cli::Cli::parse_from(rewrite_args(argv(&[
            "budget-etl",
            "--max-retries",
            "5",
            "--source-file",
            "exports/jan.csv",
        ])));
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.max_retries, Some(5));
        assert_eq!(args.source_file, Some(PathBuf::from("exports/jan.csv")));
        assert_eq!(args.top, 10);
    }

    #[test]
    fn zero_retries_is_rejected_by_the_parser() {
        let result = crate::cli::Cli::try_parse_from(argv(&["budget-etl", "run", "--max-retries", "0"]));
        assert!(result.is_err());
    }

    #[test]
    fn cli_flags_override_environment() {
        let mut config = PipelineConfig::from_lookup(|key| match key {
            "WAREHOUSE_PROJECT_ID" | "WAREHOUSE_DATASET_ID" | "WAREHOUSE_TABLE_ID" => Some("x".to_string()),
            "WRITE_DISPOSITION" => Some("WRITE_TRUNCATE".to_string()),
            _ => None,
        })
        .unwrap();
        let args = RunArgs {
            source_file: Some(PathBuf::from("other.csv")),
            write_mode: Some(WriteMode::Append),
            max_retries: Some(7),
            ..RunArgs::default()
        };

        apply_overrides(&mut config, &args);
        assert_eq!(config.source_file, PathBuf::from("other.csv"));
        assert_eq!(config.write_mode, WriteMode::Append);
        assert_eq!(config.max_retries, 7);
    }
}
