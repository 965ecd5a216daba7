//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - built from heterogeneous raw rows during cleaning
//! - mutated in place by the metric stages
//! - written to the warehouse as JSON rows

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Semantic storage type of a canonical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Float64,
    Int64,
    Timestamp,
    Date,
}

/// A canonical column of the target table.
///
/// Declaration order is the column order of the target schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    SourceSystem,
    MunicipalityCode,
    MunicipalityName,
    BudgetedAmount,
    ExecutedAmount,
    ExecutionRate,
    ExpenseCategory,
    ExpenseValue,
    ProgramCode,
    ProgramName,
    BudgetLineItem,
    ReferencePeriod,
    MonthlyVariance,
    AnnualVariance,
    ValidationStatus,
    CollectedAt,
    ProcessedAt,
}

impl Field {
    pub const ALL: [Field; 17] = [
        Field::SourceSystem,
        Field::MunicipalityCode,
        Field::MunicipalityName,
        Field::BudgetedAmount,
        Field::ExecutedAmount,
        Field::ExecutionRate,
        Field::ExpenseCategory,
        Field::ExpenseValue,
        Field::ProgramCode,
        Field::ProgramName,
        Field::BudgetLineItem,
        Field::ReferencePeriod,
        Field::MonthlyVariance,
        Field::AnnualVariance,
        Field::ValidationStatus,
        Field::CollectedAt,
        Field::ProcessedAt,
    ];

    /// Canonical column name in the target table.
    pub fn name(self) -> &'static str {
        match self {
            Field::SourceSystem => "source_system",
            Field::MunicipalityCode => "municipality_code",
            Field::MunicipalityName => "municipality_name",
            Field::BudgetedAmount => "budgeted_amount",
            Field::ExecutedAmount => "executed_amount",
            Field::ExecutionRate => "execution_rate",
            Field::ExpenseCategory => "expense_category",
            Field::ExpenseValue => "expense_value",
            Field::ProgramCode => "program_code",
            Field::ProgramName => "program_name",
            Field::BudgetLineItem => "budget_line_item",
            Field::ReferencePeriod => "reference_period",
            Field::MonthlyVariance => "monthly_variance",
            Field::AnnualVariance => "annual_variance",
            Field::ValidationStatus => "validation_status",
            Field::CollectedAt => "collected_at",
            Field::ProcessedAt => "processed_at",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Marker stamped on records that arrive without a validation status.
pub const DEFAULT_VALIDATION_STATUS: &str = "VALID";

/// One row of the canonical batch.
///
/// Every field is optional: the warehouse columns are all NULLABLE and
/// the source systems deliver partial rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub source_system: Option<String>,
    pub municipality_code: Option<String>,
    pub municipality_name: Option<String>,
    pub budgeted_amount: Option<f64>,
    pub executed_amount: Option<f64>,
    /// Executed amount as a percentage of the budgeted amount.
    pub execution_rate: Option<f64>,
    pub expense_category: Option<String>,
    pub expense_value: Option<f64>,
    pub program_code: Option<String>,
    pub program_name: Option<String>,
    pub budget_line_item: Option<String>,
    pub reference_period: Option<NaiveDate>,
    /// Percentage change of `expense_value` against the previous period of the group.
    pub monthly_variance: Option<f64>,
    /// Percentage change of `expense_value` against the same period one year earlier.
    pub annual_variance: Option<f64>,
    pub validation_status: Option<String>,
    pub collected_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl FinancialRecord {
    /// Whether the given column holds a non-null value on this record.
    pub fn has_value(&self, field: Field) -> bool {
        match field {
            Field::SourceSystem => self.source_system.is_some(),
            Field::MunicipalityCode => self.municipality_code.is_some(),
            Field::MunicipalityName => self.municipality_name.is_some(),
            Field::BudgetedAmount => self.budgeted_amount.is_some(),
            Field::ExecutedAmount => self.executed_amount.is_some(),
            Field::ExecutionRate => self.execution_rate.is_some(),
            Field::ExpenseCategory => self.expense_category.is_some(),
            Field::ExpenseValue => self.expense_value.is_some(),
            Field::ProgramCode => self.program_code.is_some(),
            Field::ProgramName => self.program_name.is_some(),
            Field::BudgetLineItem => self.budget_line_item.is_some(),
            Field::ReferencePeriod => self.reference_period.is_some(),
            Field::MonthlyVariance => self.monthly_variance.is_some(),
            Field::AnnualVariance => self.annual_variance.is_some(),
            Field::ValidationStatus => self.validation_status.is_some(),
            Field::CollectedAt => self.collected_at.is_some(),
            Field::ProcessedAt => self.processed_at.is_some(),
        }
    }

    /// Variance grouping key: (municipality, program).
    pub fn group_key(&self) -> Option<(&str, &str)> {
        Some((self.municipality_code.as_deref()?, self.program_code.as_deref()?))
    }
}

/// One untyped input row, keyed by whatever column names the source used.
pub type RawRecord = Map<String, Value>;

/// An untransformed batch as returned by an extraction source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    pub rows: Vec<RawRecord>,
}

impl RawBatch {
    pub fn new(rows: Vec<RawRecord>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn extend(&mut self, other: RawBatch) {
        self.rows.extend(other.rows);
    }
}

/// A canonical batch: records plus the set of columns present in it.
///
/// Column presence is a property of the batch, not of individual
/// records: a column can be present while some records hold null in it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub records: Vec<FinancialRecord>,
    columns: BTreeSet<Field>,
}

impl Batch {
    pub fn new(records: Vec<FinancialRecord>, columns: impl IntoIterator<Item = Field>) -> Self {
        Self {
            records,
            columns: columns.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, field: Field) -> bool {
        self.columns.contains(&field)
    }

    pub fn has_columns(&self, fields: &[Field]) -> bool {
        fields.iter().all(|f| self.columns.contains(f))
    }

    /// Required columns not present in this batch.
    pub fn missing_columns(&self, fields: &[Field]) -> Vec<Field> {
        fields
            .iter()
            .copied()
            .filter(|f| !self.columns.contains(f))
            .collect()
    }

    pub fn add_column(&mut self, field: Field) {
        self.columns.insert(field);
    }
}

/// Which source system a raw row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSystem {
    /// Budget execution (state financial administration system).
    Siafem,
    /// Municipal budget planning and allocation.
    Sigeo,
}

impl SourceSystem {
    pub fn tag(self) -> &'static str {
        match self {
            SourceSystem::Siafem => "SIAFEM",
            SourceSystem::Sigeo => "SIGEO",
        }
    }
}

/// Whether a load replaces the table contents or appends to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Truncate,
    Append,
}

impl WriteMode {
    /// Parse the warehouse-style disposition names (`WRITE_TRUNCATE`, `WRITE_APPEND`).
    pub fn from_disposition(raw: &str) -> Option<WriteMode> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "WRITE_TRUNCATE" | "TRUNCATE" => Some(WriteMode::Truncate),
            "WRITE_APPEND" | "APPEND" => Some(WriteMode::Append),
            _ => None,
        }
    }

    pub fn disposition(self) -> &'static str {
        match self {
            WriteMode::Truncate => "WRITE_TRUNCATE",
            WriteMode::Append => "WRITE_APPEND",
        }
    }
}

/// How `annual_variance` is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnualVarianceMode {
    /// Compare against the same group's record exactly 12 monthly periods earlier.
    #[default]
    YearOverYear,
    /// Plain period-over-period change within the group (same as monthly variance).
    ///
    /// Reproduces what older loads of the table contain.
    Legacy,
}

impl AnnualVarianceMode {
    pub fn parse(raw: &str) -> Option<AnnualVarianceMode> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "year_over_year" | "yoy" => Some(AnnualVarianceMode::YearOverYear),
            "legacy" => Some(AnnualVarianceMode::Legacy),
            _ => None,
        }
    }
}
