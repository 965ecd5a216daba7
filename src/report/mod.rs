//! Run reporting: the logger handed to each pipeline stage, and formatted
//! terminal output.
//!
//! Stages never log through global state. They receive a `&dyn Reporter`
//! scoped to one pipeline run, so callers decide where output goes:
//! - `TracingReporter` forwards to `tracing` (the binary's default)
//! - `MemoryReporter` captures entries (tests, embedding)
//! - `SilentReporter` drops everything

use std::sync::Mutex;

pub mod format;

pub use format::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Pipeline stage that emitted an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Extract,
    Clean,
    Metrics,
    Load,
    Pipeline,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Extract => "extract",
            Stage::Clean => "clean",
            Stage::Metrics => "metrics",
            Stage::Load => "load",
            Stage::Pipeline => "pipeline",
        }
    }
}

pub trait Reporter {
    fn log(&self, level: Level, stage: Stage, message: &str);

    fn debug(&self, stage: Stage, message: &str) {
        self.log(Level::Debug, stage, message);
    }

    fn info(&self, stage: Stage, message: &str) {
        self.log(Level::Info, stage, message);
    }

    fn warn(&self, stage: Stage, message: &str) {
        self.log(Level::Warn, stage, message);
    }

    fn error(&self, stage: Stage, message: &str) {
        self.log(Level::Error, stage, message);
    }
}

/// Forwards entries to `tracing`, tagged with the run id.
#[derive(Debug, Clone)]
pub struct TracingReporter {
    run_id: String,
}

impl TracingReporter {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl Reporter for TracingReporter {
    fn log(&self, level: Level, stage: Stage, message: &str) {
        let run_id = self.run_id.as_str();
        let stage = stage.as_str();
        match level {
            Level::Debug => tracing::debug!(run_id, stage, "{message}"),
            Level::Info => tracing::info!(run_id, stage, "{message}"),
            Level::Warn => tracing::warn!(run_id, stage, "{message}"),
            Level::Error => tracing::error!(run_id, stage, "{message}"),
        }
    }
}

/// One captured entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub level: Level,
    pub stage: Stage,
    pub message: String,
}

/// Keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    entries: Mutex<Vec<ReportEntry>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ReportEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Entries at `level` or above, as plain messages.
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.level >= level)
            .map(|e| e.message)
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == Level::Warn)
            .map(|e| e.message)
            .collect()
    }
}

impl Reporter for MemoryReporter {
    fn log(&self, level: Level, stage: Stage, message: &str) {
        let entry = ReportEntry {
            level,
            stage,
            message: message.to_string(),
        };
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn log(&self, _level: Level, _stage: Stage, _message: &str) {}
}
