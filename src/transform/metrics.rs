//! Derived financial metrics: execution rate and period-over-period variances.
//!
//! Each operation declares the columns it needs. When the batch lacks any of
//! them the operation logs a warning and returns the batch untouched, so the
//! pipeline still runs against partial source data.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};

use crate::domain::{AnnualVarianceMode, Batch, Field, FinancialRecord};
use crate::report::{Reporter, Stage};

/// Inputs of the execution-rate computation.
pub const EXECUTION_RATE_INPUTS: [Field; 2] = [Field::BudgetedAmount, Field::ExecutedAmount];

/// Inputs of both variance computations (grouping key, value, ordering key).
pub const VARIANCE_INPUTS: [Field; 4] = [
    Field::MunicipalityCode,
    Field::ProgramCode,
    Field::ExpenseValue,
    Field::ReferencePeriod,
];

/// Monthly periods between a record and its year-over-year comparison.
const YEAR_LAG_PERIODS: i32 = 12;

type GroupKey = (String, String);

/// `executed / budgeted × 100`, or `0.0` for a zero budget.
pub fn execution_rate(budgeted: f64, executed: f64) -> f64 {
    if budgeted == 0.0 {
        0.0
    } else {
        (executed / budgeted) * 100.0
    }
}

/// Percentage change from `previous` to `current`.
///
/// `None` when either side is missing or `previous` is zero.
pub fn percent_change(previous: Option<f64>, current: Option<f64>) -> Option<f64> {
    let (previous, current) = (previous?, current?);
    if previous == 0.0 {
        return None;
    }
    let change = (current - previous) / previous * 100.0;
    change.is_finite().then_some(change)
}

pub fn calculate_execution_rate(mut batch: Batch, reporter: &dyn Reporter) -> Batch {
    if !passes_requirements(&batch, &EXECUTION_RATE_INPUTS, "execution rate", reporter) {
        return batch;
    }

    let mut computed = 0usize;
    for record in &mut batch.records {
        if let (Some(budgeted), Some(executed)) = (record.budgeted_amount, record.executed_amount) {
            record.execution_rate = Some(execution_rate(budgeted, executed));
            computed += 1;
        }
    }
    batch.add_column(Field::ExecutionRate);

    reporter.info(
        Stage::Metrics,
        &format!("Calculated budget execution rates for {computed} records"),
    );
    batch
}

/// Set `monthly_variance` against the preceding record of the same group.
///
/// The batch comes back sorted by `reference_period` ascending.
pub fn calculate_monthly_variance(mut batch: Batch, reporter: &dyn Reporter) -> Batch {
    if !passes_requirements(&batch, &VARIANCE_INPUTS, "monthly variance", reporter) {
        return batch;
    }

    sort_by_period(&mut batch.records);
    let variances = previous_record_changes(&batch.records);
    for (record, variance) in batch.records.iter_mut().zip(variances) {
        record.monthly_variance = variance;
    }
    batch.add_column(Field::MonthlyVariance);

    reporter.info(Stage::Metrics, "Calculated monthly variances");
    batch
}

/// Set `annual_variance`.
///
/// In `YearOverYear` mode each record is compared with the record of the same
/// group whose reference period lies exactly 12 months earlier. `Legacy` mode
/// repeats the previous-record change used for monthly variance.
pub fn calculate_annual_variance(
    mut batch: Batch,
    mode: AnnualVarianceMode,
    reporter: &dyn Reporter,
) -> Batch {
    if !passes_requirements(&batch, &VARIANCE_INPUTS, "annual variance", reporter) {
        return batch;
    }

    sort_by_period(&mut batch.records);
    let variances = match mode {
        AnnualVarianceMode::YearOverYear => year_over_year_changes(&batch.records),
        AnnualVarianceMode::Legacy => {
            reporter.warn(
                Stage::Metrics,
                "Annual variance in legacy mode: values are period-over-period, not year-over-year",
            );
            previous_record_changes(&batch.records)
        }
    };
    for (record, variance) in batch.records.iter_mut().zip(variances) {
        record.annual_variance = variance;
    }
    batch.add_column(Field::AnnualVariance);

    reporter.info(Stage::Metrics, "Calculated annual variances");
    batch
}

fn passes_requirements(
    batch: &Batch,
    required: &[Field],
    metric: &str,
    reporter: &dyn Reporter,
) -> bool {
    let missing = batch.missing_columns(required);
    if missing.is_empty() {
        return true;
    }
    let names: Vec<&str> = missing.iter().map(|f| f.name()).collect();
    reporter.warn(
        Stage::Metrics,
        &format!(
            "Required columns for {metric} calculation not found ({}); leaving batch unchanged",
            names.join(", ")
        ),
    );
    false
}

/// Stable ascending sort on `reference_period`, nulls last.
fn sort_by_period(records: &mut [FinancialRecord]) {
    records.sort_by(|a, b| match (a.reference_period, b.reference_period) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

fn owned_key(record: &FinancialRecord) -> Option<GroupKey> {
    record
        .group_key()
        .map(|(municipality, program)| (municipality.to_string(), program.to_string()))
}

/// Change of `expense_value` against the previous record of each group.
///
/// Expects records sorted by period. Records without a full group key get `None`.
fn previous_record_changes(records: &[FinancialRecord]) -> Vec<Option<f64>> {
    let mut last_value: HashMap<GroupKey, Option<f64>> = HashMap::new();
    records
        .iter()
        .map(|record| {
            let key = owned_key(record)?;
            let previous = last_value.insert(key, record.expense_value)?;
            percent_change(previous, record.expense_value)
        })
        .collect()
}

fn month_index(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

/// Change of `expense_value` against the same group 12 monthly periods earlier.
///
/// When a group has several records for one month, the last one in period
/// order is the comparison base.
fn year_over_year_changes(records: &[FinancialRecord]) -> Vec<Option<f64>> {
    let mut by_month: HashMap<(GroupKey, i32), Option<f64>> = HashMap::new();
    for record in records {
        if let (Some(key), Some(period)) = (owned_key(record), record.reference_period) {
            by_month.insert((key, month_index(period)), record.expense_value);
        }
    }

    records
        .iter()
        .map(|record| {
            let key = owned_key(record)?;
            let period = record.reference_period?;
            let base = by_month.get(&(key, month_index(period) - YEAR_LAG_PERIODS))?;
            percent_change(*base, record.expense_value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{MemoryReporter, SilentReporter};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(municipality: &str, program: &str, period: NaiveDate, expense: f64) -> FinancialRecord {
        FinancialRecord {
            municipality_code: Some(municipality.to_string()),
            program_code: Some(program.to_string()),
            budgeted_amount: Some(1_000.0),
            expense_value: Some(expense),
            reference_period: Some(period),
            ..FinancialRecord::default()
        }
    }

    fn variance_batch(records: Vec<FinancialRecord>) -> Batch {
        Batch::new(records, VARIANCE_INPUTS)
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("expected a value");
        assert!((actual - expected).abs() < 1e-9, "expected {expected}, got {actual}");
    }

    #[test]
    fn execution_rate_is_percentage_of_budget() {
        let batch = Batch::new(
            vec![FinancialRecord {
                budgeted_amount: Some(1_000_000.0),
                executed_amount: Some(850_000.0),
                ..FinancialRecord::default()
            }],
            EXECUTION_RATE_INPUTS,
        );
        let batch = calculate_execution_rate(batch, &SilentReporter);
        assert_close(batch.records[0].execution_rate, 85.0);
        assert!(batch.has_column(Field::ExecutionRate));
    }

    #[test]
    fn zero_budget_yields_zero_rate() {
        for executed in [500.0, 0.0, -10.0] {
            assert_eq!(execution_rate(0.0, executed), 0.0);
        }
        let batch = Batch::new(
            vec![FinancialRecord {
                budgeted_amount: Some(0.0),
                executed_amount: Some(500.0),
                ..FinancialRecord::default()
            }],
            EXECUTION_RATE_INPUTS,
        );
        let batch = calculate_execution_rate(batch, &SilentReporter);
        assert_eq!(batch.records[0].execution_rate, Some(0.0));
    }

    #[test]
    fn missing_executed_amount_keeps_previous_rate() {
        let batch = Batch::new(
            vec![FinancialRecord {
                budgeted_amount: Some(100.0),
                executed_amount: None,
                execution_rate: Some(42.0),
                ..FinancialRecord::default()
            }],
            EXECUTION_RATE_INPUTS,
        );
        let batch = calculate_execution_rate(batch, &SilentReporter);
        assert_eq!(batch.records[0].execution_rate, Some(42.0));
    }

    #[test]
    fn execution_rate_passes_through_without_columns() {
        let input = Batch::new(
            vec![FinancialRecord {
                budgeted_amount: Some(100.0),
                ..FinancialRecord::default()
            }],
            [Field::BudgetedAmount],
        );
        let reporter = MemoryReporter::new();
        let output = calculate_execution_rate(input.clone(), &reporter);
        assert_eq!(output, input);
        assert_eq!(reporter.warnings().len(), 1);
        assert!(reporter.warnings()[0].contains("executed_amount"));
    }

    #[test]
    fn monthly_variance_against_predecessor() {
        let batch = variance_batch(vec![
            record("3106200", "001", ymd(2024, 2, 29), 600_000.0),
            record("3106200", "001", ymd(2024, 1, 31), 500_000.0),
        ]);
        let batch = calculate_monthly_variance(batch, &SilentReporter);

        assert_eq!(batch.records[0].reference_period, Some(ymd(2024, 1, 31)));
        assert_eq!(batch.records[0].monthly_variance, None);
        assert_close(batch.records[1].monthly_variance, 20.0);
    }

    #[test]
    fn monthly_variance_is_grouped_by_municipality_and_program() {
        let batch = variance_batch(vec![
            record("A", "001", ymd(2024, 1, 31), 100.0),
            record("A", "002", ymd(2024, 1, 31), 1_000.0),
            record("B", "001", ymd(2024, 2, 29), 50.0),
            record("A", "001", ymd(2024, 2, 29), 150.0),
            record("A", "002", ymd(2024, 3, 31), 900.0),
            record("A", "001", ymd(2024, 3, 31), 75.0),
        ]);
        let batch = calculate_monthly_variance(batch, &SilentReporter);

        let periods: Vec<_> = batch.records.iter().map(|r| r.reference_period.unwrap()).collect();
        assert!(periods.windows(2).all(|w| w[0] <= w[1]));

        let find = |m: &str, p: &str, d: NaiveDate| {
            batch
                .records
                .iter()
                .find(|r| r.group_key() == Some((m, p)) && r.reference_period == Some(d))
                .unwrap()
                .monthly_variance
        };
        assert_eq!(find("A", "001", ymd(2024, 1, 31)), None);
        assert_eq!(find("A", "002", ymd(2024, 1, 31)), None);
        assert_eq!(find("B", "001", ymd(2024, 2, 29)), None);
        assert_close(find("A", "001", ymd(2024, 2, 29)), 50.0);
        assert_close(find("A", "001", ymd(2024, 3, 31)), -50.0);
        assert_close(find("A", "002", ymd(2024, 3, 31)), -10.0);
    }

    #[test]
    fn zero_predecessor_gives_null_variance() {
        let batch = variance_batch(vec![
            record("A", "001", ymd(2024, 1, 31), 0.0),
            record("A", "001", ymd(2024, 2, 29), 10.0),
        ]);
        let batch = calculate_monthly_variance(batch, &SilentReporter);
        assert_eq!(batch.records[1].monthly_variance, None);
    }

    #[test]
    fn variance_passes_through_without_expense_column() {
        let input = Batch::new(
            vec![record("A", "001", ymd(2024, 2, 29), 1.0), record("A", "001", ymd(2024, 1, 31), 1.0)],
            [Field::MunicipalityCode, Field::ProgramCode, Field::ReferencePeriod],
        );
        let reporter = MemoryReporter::new();
        let output = calculate_monthly_variance(input.clone(), &reporter);
        assert_eq!(output, input);
        let output = calculate_annual_variance(output, AnnualVarianceMode::YearOverYear, &reporter);
        assert_eq!(output, input);
        assert_eq!(reporter.warnings().len(), 2);
    }

    #[test]
    fn empty_batch_is_fine() {
        let batch = calculate_monthly_variance(variance_batch(Vec::new()), &SilentReporter);
        let batch = calculate_annual_variance(batch, AnnualVarianceMode::YearOverYear, &SilentReporter);
        assert!(batch.is_empty());
    }

    #[test]
    fn annual_variance_looks_back_twelve_periods() {
        let mut records = Vec::new();
        for month in 1..=12 {
            let period = ymd(2023, month, 1);
            records.push(record("A", "001", period, 100.0 + month as f64));
        }
        records.push(record("A", "001", ymd(2024, 1, 1), 202.0));
        records.push(record("A", "001", ymd(2024, 3, 1), 103.0));
        records.push(record("B", "001", ymd(2024, 1, 1), 500.0));

        let batch = calculate_annual_variance(
            variance_batch(records),
            AnnualVarianceMode::YearOverYear,
            &SilentReporter,
        );

        let find = |m: &str, d: NaiveDate| {
            batch
                .records
                .iter()
                .find(|r| r.group_key() == Some((m, "001")) && r.reference_period == Some(d))
                .unwrap()
                .annual_variance
        };
        // 2024-01 against 2023-01 (101.0).
        assert_close(find("A", ymd(2024, 1, 1)), 100.0);
        // 2024-03 against 2023-03 (103.0).
        assert_close(find("A", ymd(2024, 3, 1)), 0.0);
        // Nothing a year before 2023 or for group B.
        assert_eq!(find("A", ymd(2023, 6, 1)), None);
        assert_eq!(find("B", ymd(2024, 1, 1)), None);
    }

    #[test]
    fn annual_variance_matches_month_end_dates() {
        let batch = calculate_annual_variance(
            variance_batch(vec![
                record("A", "001", ymd(2023, 2, 28), 100.0),
                record("A", "001", ymd(2024, 2, 29), 110.0),
            ]),
            AnnualVarianceMode::YearOverYear,
            &SilentReporter,
        );
        assert_close(batch.records[1].annual_variance, 10.0);
    }

    #[test]
    fn legacy_annual_variance_mirrors_monthly() {
        let records = vec![
            record("A", "001", ymd(2024, 1, 31), 500_000.0),
            record("A", "001", ymd(2024, 2, 29), 600_000.0),
        ];
        let reporter = MemoryReporter::new();
        let batch = calculate_annual_variance(variance_batch(records), AnnualVarianceMode::Legacy, &reporter);
        assert_eq!(batch.records[0].annual_variance, None);
        assert_close(batch.records[1].annual_variance, 20.0);
        assert_eq!(reporter.warnings().len(), 1);
    }
}
