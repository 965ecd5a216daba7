//! The fixed target schema.
//!
//! `SchemaRegistry` is the single source of truth for both the warehouse
//! column list and the record-completeness rule.

use serde::Serialize;

use crate::domain::types::{Field, FieldType, FinancialRecord};

/// Fields a record must carry to be considered complete.
pub const MANDATORY_FIELDS: [Field; 4] = [
    Field::SourceSystem,
    Field::MunicipalityCode,
    Field::BudgetedAmount,
    Field::ReferencePeriod,
];

/// A column descriptor as handed to the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub mode: &'static str,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaRegistry;

impl SchemaRegistry {
    /// Semantic type of each canonical column.
    pub fn field_type(field: Field) -> FieldType {
        match field {
            Field::BudgetedAmount
            | Field::ExecutedAmount
            | Field::ExecutionRate
            | Field::ExpenseValue
            | Field::MonthlyVariance
            | Field::AnnualVariance => FieldType::Float64,
            Field::ReferencePeriod => FieldType::Date,
            Field::CollectedAt | Field::ProcessedAt => FieldType::Timestamp,
            Field::SourceSystem
            | Field::MunicipalityCode
            | Field::MunicipalityName
            | Field::ExpenseCategory
            | Field::ProgramCode
            | Field::ProgramName
            | Field::BudgetLineItem
            | Field::ValidationStatus => FieldType::String,
        }
    }

    /// Ordered `(field, type)` mapping for every column.
    pub fn fields() -> impl Iterator<Item = (Field, FieldType)> {
        Field::ALL.into_iter().map(|f| (f, Self::field_type(f)))
    }

    /// Column descriptors for the load target, all NULLABLE.
    pub fn target_schema() -> Vec<ColumnSpec> {
        Self::fields()
            .map(|(field, field_type)| ColumnSpec {
                name: field.name(),
                field_type,
                mode: "NULLABLE",
            })
            .collect()
    }

    pub fn is_complete(record: &FinancialRecord) -> bool {
        MANDATORY_FIELDS.iter().all(|f| record.has_value(*f))
    }
}
