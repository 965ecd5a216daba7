//! Retrying batch load.
//!
//! The retry loop's outcome is a value: `LoadReport` on success, `LoadError`
//! (with the attempt count and last failure) otherwise. After failed attempt
//! `n` the loader sleeps `2^n` backoff units before trying again; nothing is
//! slept after a success or after the final attempt.

use std::time::Duration;

use thiserror::Error;

use crate::domain::Batch;
use crate::io::{LoadTarget, WarehouseWriter, WriteError};
use crate::report::{Reporter, Stage};

/// Blocks the calling thread between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total write attempts, including the first one. Values below 1 act as 1.
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_unit: Duration::from_secs(1),
        }
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Delay slept after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Outcome of a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub attempts: u32,
    pub rows_written: usize,
    /// Total time slept between attempts.
    pub backoff: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("load into {table} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        table: String,
        attempts: u32,
        #[source]
        last: WriteError,
    },
    #[error("load into {table} stopped on attempt {attempts}, error is not retryable: {last}")]
    Rejected {
        table: String,
        attempts: u32,
        #[source]
        last: WriteError,
    },
}

impl LoadError {
    pub fn attempts(&self) -> u32 {
        match self {
            LoadError::Exhausted { attempts, .. } | LoadError::Rejected { attempts, .. } => *attempts,
        }
    }

    pub fn last_error(&self) -> &WriteError {
        match self {
            LoadError::Exhausted { last, .. } | LoadError::Rejected { last, .. } => last,
        }
    }
}

pub struct RetryingLoader<W, S> {
    writer: W,
    sleeper: S,
    policy: RetryPolicy,
}

impl<W: WarehouseWriter, S: Sleeper> RetryingLoader<W, S> {
    pub fn with_sleeper(writer: W, sleeper: S, policy: RetryPolicy) -> Self {
        Self {
            writer,
            sleeper,
            policy,
        }
    }

    /// Write `batch` to `target`, retrying transient failures.
    pub fn load(
        &self,
        batch: &Batch,
        target: &LoadTarget,
        reporter: &dyn Reporter,
    ) -> Result<LoadReport, LoadError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let table = target.table.to_string();
        let mut backoff = Duration::ZERO;
        let mut attempt = 1u32;

        reporter.info(
            Stage::Load,
            &format!(
                "Loading {} rows to {table} ({})",
                batch.len(),
                target.write_mode.disposition()
            ),
        );

        loop {
            match self.writer.write(batch, target) {
                Ok(receipt) => {
                    reporter.info(
                        Stage::Load,
                        &format!(
                            "Load attempt {attempt}/{max_attempts} succeeded: {} rows written to {table}",
                            receipt.rows_written
                        ),
                    );
                    return Ok(LoadReport {
                        attempts: attempt,
                        rows_written: receipt.rows_written,
                        backoff,
                    });
                }
                Err(err) => {
                    reporter.warn(
                        Stage::Load,
                        &format!("Load attempt {attempt}/{max_attempts} failed: {err}"),
                    );

                    if !err.is_transient() {
                        reporter.error(Stage::Load, "Write error is not retryable; giving up");
                        return Err(LoadError::Rejected {
                            table,
                            attempts: attempt,
                            last: err,
                        });
                    }
                    if attempt >= max_attempts {
                        reporter.error(Stage::Load, &format!("Failed after {max_attempts} attempts"));
                        return Err(LoadError::Exhausted {
                            table,
                            attempts: attempt,
                            last: err,
                        });
                    }

                    let delay = self.policy.delay_after(attempt);
                    reporter.info(Stage::Load, &format!("Retrying in {}s...", delay.as_secs_f64()));
                    self.sleeper.sleep(delay);
                    backoff += delay;
                    attempt += 1;
                }
            }
        }
    }
}
