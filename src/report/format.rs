//! Formatted terminal output for a finished run.
//!
//! Kept apart from the pipeline so output changes stay localized.

use chrono::NaiveDate;

use crate::app::pipeline::RunOutput;
use crate::domain::FinancialRecord;

/// Format the run summary (extraction counts, target and load outcome).
pub fn format_run_summary(output: &RunOutput, run_id: &str) -> String {
    let mut out = String::new();

    out.push_str("=== budget-etl - run summary ===\n");
    out.push_str(&format!("Run: {run_id}\n"));
    out.push_str(&format!(
        "Target: {} ({})\n",
        output.table,
        output.write_mode.disposition()
    ));
    out.push_str(&format!(
        "Rows: extracted={} | loaded={} | dropped={} | incomplete={}\n",
        output.rows_extracted,
        output.batch.len(),
        output.rows_dropped,
        output.incomplete,
    ));

    match period_range(&output.batch.records) {
        Some((first, last)) => out.push_str(&format!("Periods: [{first}, {last}]\n")),
        None => out.push_str("Periods: none\n"),
    }

    out.push_str(&format!(
        "Load: attempts={} | rows_written={} | backoff={:.1}s\n",
        output.load.attempts,
        output.load.rows_written,
        output.load.backoff.as_secs_f64(),
    ));

    out
}

/// Highest execution rates, one line per record.
pub fn format_execution_table(records: &[FinancialRecord], top_n: usize) -> String {
    let mut rows: Vec<&FinancialRecord> = records.iter().filter(|r| r.execution_rate.is_some()).collect();
    rows.sort_by(|a, b| {
        b.execution_rate
            .partial_cmp(&a.execution_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut out = String::new();
    out.push_str(&format!(
        "{:<10} {:<8} {:<10} {:>16} {:>16} {:>8} {:>8} {:>8}",
        "municipio", "program", "period", "budgeted", "executed", "rate%", "mom%", "yoy%"
    ));
    out.push('\n');
    out.push_str(&format!(
        "{:-<10} {:-<8} {:-<10} {:-<16} {:-<16} {:-<8} {:-<8} {:-<8}",
        "", "", "", "", "", "", "", ""
    ));
    out.push('\n');

    for r in rows.into_iter().take(top_n) {
        let line = format!(
            "{:<10} {:<8} {:<10} {:>16} {:>16} {:>8} {:>8} {:>8}",
            truncate(r.municipality_code.as_deref().unwrap_or("-"), 10),
            truncate(r.program_code.as_deref().unwrap_or("-"), 8),
            r.reference_period.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
            fmt_opt(r.budgeted_amount, 2),
            fmt_opt(r.executed_amount, 2),
            fmt_opt(r.execution_rate, 1),
            fmt_opt(r.monthly_variance, 1),
            fmt_opt(r.annual_variance, 1),
        );
        out.push_str(line.trim_end());
        out.push('\n');
    }

    out
}

fn period_range(records: &[FinancialRecord]) -> Option<(NaiveDate, NaiveDate)> {
    let mut periods = records.iter().filter_map(|r| r.reference_period);
    let first = periods.next()?;
    Some(periods.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
}

fn fmt_opt(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(v) => format!("{v:.decimals$}"),
        None => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::{Batch, Field, WriteMode};
    use crate::io::TableId;
    use crate::load::LoadReport;

    fn record(municipality: &str, period: (i32, u32), rate: Option<f64>) -> FinancialRecord {
        FinancialRecord {
            municipality_code: Some(municipality.to_string()),
            program_code: Some("001".to_string()),
            budgeted_amount: Some(1000.0),
            executed_amount: rate.map(|r| r * 10.0),
            reference_period: NaiveDate::from_ymd_opt(period.0, period.1, 1),
            execution_rate: rate,
            ..FinancialRecord::default()
        }
    }

    #[test]
    fn run_summary_lists_counts_and_period_range() {
        let records = vec![
            record("3106200", (2024, 3), Some(50.0)),
            record("3106200", (2023, 11), Some(75.0)),
        ];
        let output = RunOutput {
            table: TableId::new("gov", "budget", "execution"),
            write_mode: WriteMode::Append,
            rows_extracted: 3,
            rows_dropped: 1,
            incomplete: 0,
            batch: Batch::new(records, Vec::<Field>::new()),
            load: LoadReport {
                attempts: 2,
                rows_written: 2,
                backoff: Duration::from_secs(2),
            },
        };

        let text = format_run_summary(&output, "run-1");
        assert!(text.starts_with("=== budget-etl - run summary ===\n"));
        assert!(text.contains("Target: gov.budget.execution (WRITE_APPEND)"));
        assert!(text.contains("extracted=3 | loaded=2 | dropped=1 | incomplete=0"));
        assert!(text.contains("Periods: [2023-11-01, 2024-03-01]"));
        assert!(text.contains("attempts=2 | rows_written=2 | backoff=2.0s"));
    }

    #[test]
    fn execution_table_ranks_by_rate() {
        let records = vec![
            record("A", (2024, 1), Some(10.0)),
            record("B", (2024, 1), Some(90.0)),
            record("C", (2024, 1), None),
        ];
        let text = format_execution_table(&records, 5);
        let lines: Vec<&str> = text.lines().collect();
        // Header, rule, two ranked rows; the record without a rate is skipped.
        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with("B "));
        assert!(lines[3].starts_with("A "));
        assert!(lines[2].contains("90.0"));
    }

    #[test]
    fn truncate_marks_cut_values() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdefgh", 5), "abcd.");
    }
}
