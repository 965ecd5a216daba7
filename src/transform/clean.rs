//! Turn heterogeneous source rows into canonical `FinancialRecord`s.
//!
//! Design goals:
//! - **Tolerant coercion**: an unparsable cell becomes null, never an error
//! - **One drop rule**: rows without a budgeted amount or reference period are removed
//! - **Reprocessing-safe stamps**: `collected_at` survives, `processed_at` is refreshed

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::domain::{Batch, DEFAULT_VALIDATION_STATUS, Field, FinancialRecord, RawBatch};
use crate::report::{Reporter, Stage};
use crate::transform::TransformError;

/// Source-native column names and the canonical field they stand for.
///
/// When several aliases of the same field are present, the first one
/// listed here wins.
const COLUMN_ALIASES: [(&str, Field); 22] = [
    ("fonte_dados", Field::SourceSystem),
    ("municipio_codigo", Field::MunicipalityCode),
    ("municipio_nome", Field::MunicipalityName),
    ("municipio", Field::MunicipalityName),
    ("orcamento_previsto", Field::BudgetedAmount),
    ("orcamento", Field::BudgetedAmount),
    ("orcamento_executado", Field::ExecutedAmount),
    ("executado", Field::ExecutedAmount),
    ("taxa_execucao", Field::ExecutionRate),
    ("despesa_por_funcao", Field::ExpenseCategory),
    ("funcao", Field::ExpenseCategory),
    ("valor_despesa", Field::ExpenseValue),
    ("valor", Field::ExpenseValue),
    ("programa_codigo", Field::ProgramCode),
    ("programa_nome", Field::ProgramName),
    ("rubrica_orcamentaria", Field::BudgetLineItem),
    ("periodo_referencia", Field::ReferencePeriod),
    ("variacao_mensal", Field::MonthlyVariance),
    ("variacao_anual", Field::AnnualVariance),
    ("validacao_status", Field::ValidationStatus),
    ("data_coleta", Field::CollectedAt),
    ("processed_timestamp", Field::ProcessedAt),
];

/// Text fields that are trimmed and upper-cased.
const NORMALIZED_TEXT_FIELDS: [Field; 5] = [
    Field::MunicipalityName,
    Field::ExpenseCategory,
    Field::ProgramName,
    Field::BudgetLineItem,
    Field::SourceSystem,
];

/// Columns whose absence makes the whole batch unusable.
const REQUIRED_COLUMNS: [Field; 2] = [Field::BudgetedAmount, Field::ReferencePeriod];

/// Clean a raw batch into the canonical shape.
///
/// `now` is used for the `collected_at` / `processed_at` stamps.
pub fn clean_batch(
    raw: RawBatch,
    now: DateTime<Utc>,
    reporter: &dyn Reporter,
) -> Result<Batch, TransformError> {
    reporter.info(Stage::Clean, &format!("Starting transformation on {} rows", raw.len()));

    if raw.is_empty() {
        reporter.warn(Stage::Clean, "Received an empty batch; nothing to clean");
        return Ok(Batch::default());
    }

    let names: BTreeSet<String> = raw
        .rows
        .iter()
        .flat_map(|row| row.keys())
        .map(|name| normalize_column_name(name))
        .collect();
    let column_map = resolve_columns(&names);

    let ignored: Vec<&str> = names
        .iter()
        .filter(|name| !column_map.contains_key(*name))
        .map(String::as_str)
        .collect();
    if !ignored.is_empty() {
        reporter.debug(
            Stage::Clean,
            &format!("Ignoring columns outside the target schema: {}", ignored.join(", ")),
        );
    }

    let present: BTreeSet<Field> = column_map.values().copied().collect();
    if let Some(missing) = REQUIRED_COLUMNS.iter().find(|f| !present.contains(*f)) {
        return Err(TransformError::MissingColumn(*missing));
    }

    let mut nulled: BTreeMap<Field, usize> = BTreeMap::new();
    let mut records = Vec::with_capacity(raw.len());
    for row in &raw.rows {
        let values: HashMap<Field, &Value> = row
            .iter()
            .filter_map(|(name, value)| {
                column_map
                    .get(&normalize_column_name(name))
                    .map(|field| (*field, value))
            })
            .collect();
        records.push(build_record(&values, &mut nulled));
    }

    for (field, count) in &nulled {
        reporter.warn(
            Stage::Clean,
            &format!("Converted {count} invalid values to NULL in {field}"),
        );
    }

    let before = records.len();
    records.retain(|r| r.budgeted_amount.is_some() && r.reference_period.is_some());
    let dropped = before - records.len();
    if dropped > 0 {
        reporter.info(
            Stage::Clean,
            &format!("Removed {dropped} rows with missing budgeted_amount or reference_period"),
        );
    }

    for record in &mut records {
        normalize_text_fields(record);
        if record.collected_at.is_none() {
            record.collected_at = Some(now);
        }
        if record.validation_status.is_none() {
            record.validation_status = Some(DEFAULT_VALIDATION_STATUS.to_string());
        }
        record.processed_at = Some(now);
    }

    let mut batch = Batch::new(records, present);
    batch.add_column(Field::CollectedAt);
    batch.add_column(Field::ValidationStatus);
    batch.add_column(Field::ProcessedAt);

    reporter.info(
        Stage::Clean,
        &format!("Transformation complete: {} rows processed", batch.len()),
    );
    Ok(batch)
}

/// Lower-case, trim, strip a UTF-8 BOM and snake-case separators.
pub fn normalize_column_name(name: &str) -> String {
    name.trim()
        .trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Map each normalized column name to its canonical field.
///
/// Canonical names always win. An alias is only used when neither the
/// canonical name nor an earlier alias already provides the field.
fn resolve_columns(names: &BTreeSet<String>) -> HashMap<String, Field> {
    let mut resolved = HashMap::new();
    let mut claimed = BTreeSet::new();

    for name in names {
        if let Some(field) = Field::from_name(name) {
            resolved.insert(name.clone(), field);
            claimed.insert(field);
        }
    }

    for (alias, field) in COLUMN_ALIASES {
        if names.contains(alias) && claimed.insert(field) {
            resolved.insert(alias.to_string(), field);
        }
    }

    resolved
}

fn build_record(
    values: &HashMap<Field, &Value>,
    nulled: &mut BTreeMap<Field, usize>,
) -> FinancialRecord {
    let text = |field: Field| values.get(&field).and_then(|v| value_to_text(v));

    let budgeted_amount = coerce(values, nulled, Field::BudgetedAmount, parse_f64);
    let executed_amount = coerce(values, nulled, Field::ExecutedAmount, parse_f64);
    let execution_rate = coerce(values, nulled, Field::ExecutionRate, parse_f64);
    let expense_value = coerce(values, nulled, Field::ExpenseValue, parse_f64);
    let monthly_variance = coerce(values, nulled, Field::MonthlyVariance, parse_f64);
    let annual_variance = coerce(values, nulled, Field::AnnualVariance, parse_f64);
    let reference_period = coerce(values, nulled, Field::ReferencePeriod, parse_date_value);
    let collected_at = coerce(values, nulled, Field::CollectedAt, parse_timestamp_value);

    FinancialRecord {
        source_system: text(Field::SourceSystem),
        municipality_code: text(Field::MunicipalityCode),
        municipality_name: text(Field::MunicipalityName),
        budgeted_amount,
        executed_amount,
        execution_rate,
        expense_category: text(Field::ExpenseCategory),
        expense_value,
        program_code: text(Field::ProgramCode),
        program_name: text(Field::ProgramName),
        budget_line_item: text(Field::BudgetLineItem),
        reference_period,
        monthly_variance,
        annual_variance,
        validation_status: text(Field::ValidationStatus),
        collected_at,
        processed_at: None,
    }
}

/// Parse one cell; a present but unparsable value is counted against `field`.
fn coerce<T>(
    values: &HashMap<Field, &Value>,
    nulled: &mut BTreeMap<Field, usize>,
    field: Field,
    parse: fn(&Value) -> Option<T>,
) -> Option<T> {
    let value = values.get(&field)?;
    let parsed = parse(value);
    if parsed.is_none() && !is_blank(value) {
        *nulled.entry(field).or_default() += 1;
    }
    parsed
}

fn normalize_text_fields(record: &mut FinancialRecord) {
    for field in NORMALIZED_TEXT_FIELDS {
        let slot = match field {
            Field::MunicipalityName => &mut record.municipality_name,
            Field::ExpenseCategory => &mut record.expense_category,
            Field::ProgramName => &mut record.program_name,
            Field::BudgetLineItem => &mut record.budget_line_item,
            Field::SourceSystem => &mut record.source_system,
            _ => continue,
        };
        if let Some(text) = slot.as_mut() {
            *text = normalize_text(text);
        }
    }
}

pub fn normalize_text(s: &str) -> String {
    s.trim().to_uppercase()
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn parse_f64(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if v.is_finite() { Some(v) } else { None }
}

fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            parse_datetime(s).or_else(|| {
                parse_date(s)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc())
            })
        }
        _ => None,
    }
}

/// Best-effort date parsing; any time-of-day component is discarded.
///
/// Source exports mix ISO dates, Brazilian `DD/MM/YYYY`, bare `YYYY-MM`
/// periods and full timestamps.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    const FMTS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];
    for fmt in FMTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    // The calendar date is taken in the value's own offset, not in UTC.
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Some(ts) = parse_datetime(s) {
        return Some(ts.date_naive());
    }
    // `YYYY-MM` denotes the first day of the month.
    NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").ok()
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    const FMTS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
    FMTS.iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::domain::RawRecord;
    use crate::report::{MemoryReporter, SilentReporter};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn raw(rows: serde_json::Value) -> RawBatch {
        let rows = rows
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect::<Vec<RawRecord>>();
        RawBatch::new(rows)
    }

    fn sample() -> RawBatch {
        raw(json!([
            {
                "municipio_codigo": "3106200", "municipio_nome": "são paulo", "fonte_dados": "siafem",
                "orcamento_previsto": 1000000.0, "orcamento_executado": 850000.0,
                "valor_despesa": 500000.0, "programa_codigo": "001", "programa_nome": "educacao",
                "periodo_referencia": "2024-01-31"
            },
            {
                "municipio_codigo": "3106200", "municipio_nome": "são paulo", "fonte_dados": "siafem",
                "orcamento_previsto": 1500000.0, "orcamento_executado": 1200000.0,
                "valor_despesa": 600000.0, "programa_codigo": "002", "programa_nome": "saude",
                "periodo_referencia": "2024-02-29"
            },
            {
                "municipio_codigo": "3504008", "municipio_nome": "rio de janeiro", "fonte_dados": "sigeo",
                "orcamento_previsto": 2000000.0, "orcamento_executado": 1800000.0,
                "valor_despesa": 750000.0, "programa_codigo": "001", "programa_nome": "educacao",
                "periodo_referencia": "2024-01-31"
            }
        ]))
    }

    #[test]
    fn cleans_source_native_rows() {
        let batch = clean_batch(sample(), now(), &SilentReporter).unwrap();
        assert_eq!(batch.len(), 3);

        let first = &batch.records[0];
        assert_eq!(first.municipality_name.as_deref(), Some("SÃO PAULO"));
        assert_eq!(first.source_system.as_deref(), Some("SIAFEM"));
        assert_eq!(first.program_name.as_deref(), Some("EDUCACAO"));
        assert_eq!(first.budgeted_amount, Some(1_000_000.0));
        assert_eq!(first.reference_period, NaiveDate::from_ymd_opt(2024, 1, 31));
        assert_eq!(first.validation_status.as_deref(), Some(DEFAULT_VALIDATION_STATUS));
        assert_eq!(first.processed_at, Some(now()));
        assert_eq!(first.collected_at, Some(now()));

        assert!(batch.has_columns(&[Field::ValidationStatus, Field::ProcessedAt, Field::CollectedAt]));
    }

    #[test]
    fn drops_rows_without_budget_or_period() {
        let mut input = sample();
        input.rows[0].insert("orcamento_previsto".to_string(), Value::Null);
        input.rows[1].insert("periodo_referencia".to_string(), json!("not a date"));

        let reporter = MemoryReporter::new();
        let batch = clean_batch(input, now(), &reporter).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records[0].municipality_code.as_deref(), Some("3504008"));
        assert!(
            reporter
                .warnings()
                .iter()
                .any(|w| w.contains("1 invalid values to NULL in reference_period"))
        );
    }

    #[test]
    fn unparsable_numbers_become_null_and_are_counted() {
        let mut input = sample();
        input.rows[0].insert("orcamento_executado".to_string(), json!("n/a"));
        input.rows[1].insert("orcamento_executado".to_string(), json!("abc"));
        input.rows[2].insert("orcamento_executado".to_string(), json!(" 1800000.5 "));

        let reporter = MemoryReporter::new();
        let batch = clean_batch(input, now(), &reporter).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.records[0].executed_amount, None);
        assert_eq!(batch.records[2].executed_amount, Some(1_800_000.5));
        assert_eq!(
            reporter.warnings(),
            vec!["Converted 2 invalid values to NULL in executed_amount".to_string()]
        );
    }

    #[test]
    fn alias_never_overwrites_canonical_column() {
        let input = raw(json!([
            {
                "Budgeted_Amount": "100", "orcamento": "999",
                "reference_period": "2024-01", "valor": "10", "valor_despesa": "20"
            }
        ]));
        let batch = clean_batch(input, now(), &SilentReporter).unwrap();
        let record = &batch.records[0];
        assert_eq!(record.budgeted_amount, Some(100.0));
        assert_eq!(record.expense_value, Some(20.0));
        assert_eq!(record.reference_period, NaiveDate::from_ymd_opt(2024, 1, 1));
    }

    #[test]
    fn short_aliases_are_renamed() {
        let input = raw(json!([
            {
                "orcamento": 10, "executado": 5, "funcao": " saude ", "municipio": "belo horizonte",
                "valor": "7.5", "periodo_referencia": "15/03/2024"
            }
        ]));
        let batch = clean_batch(input, now(), &SilentReporter).unwrap();
        let record = &batch.records[0];
        assert_eq!(record.budgeted_amount, Some(10.0));
        assert_eq!(record.executed_amount, Some(5.0));
        assert_eq!(record.expense_category.as_deref(), Some("SAUDE"));
        assert_eq!(record.municipality_name.as_deref(), Some("BELO HORIZONTE"));
        assert_eq!(record.expense_value, Some(7.5));
        assert_eq!(record.reference_period, NaiveDate::from_ymd_opt(2024, 3, 15));
    }

    #[test]
    fn cleaning_twice_keeps_text_and_collection_time() {
        let first = clean_batch(sample(), now(), &SilentReporter).unwrap();
        let collected = first.records[0].collected_at;

        // Re-serialize the cleaned batch as raw rows and run it through again later.
        let rows = first
            .records
            .iter()
            .map(|r| serde_json::to_value(r).unwrap().as_object().unwrap().clone())
            .collect();
        let later = now() + chrono::Duration::hours(5);
        let second = clean_batch(RawBatch::new(rows), later, &SilentReporter).unwrap();

        for (a, b) in first.records.iter().zip(&second.records) {
            assert_eq!(a.municipality_name, b.municipality_name);
            assert_eq!(a.program_name, b.program_name);
            assert_eq!(a.source_system, b.source_system);
        }
        assert_eq!(second.records[0].collected_at, collected);
        assert_eq!(second.records[0].processed_at, Some(later));
    }

    #[test]
    fn keeps_existing_validation_status() {
        let mut input = sample();
        input.rows[0].insert("validacao_status".to_string(), json!("PENDING"));
        let batch = clean_batch(input, now(), &SilentReporter).unwrap();
        assert_eq!(batch.records[0].validation_status.as_deref(), Some("PENDING"));
        assert_eq!(batch.records[1].validation_status.as_deref(), Some("VALID"));
    }

    #[test]
    fn absent_text_fields_stay_absent() {
        let input = raw(json!([{ "orcamento_previsto": 1, "periodo_referencia": "2024-01-31" }]));
        let batch = clean_batch(input, now(), &SilentReporter).unwrap();
        assert_eq!(batch.records[0].municipality_name, None);
        assert!(!batch.has_column(Field::MunicipalityName));
    }

    #[test]
    fn batch_without_budget_column_is_structural_failure() {
        let input = raw(json!([{ "periodo_referencia": "2024-01-31", "valor": 1 }]));
        let err = clean_batch(input, now(), &SilentReporter).unwrap_err();
        assert!(matches!(err, TransformError::MissingColumn(Field::BudgetedAmount)));
    }

    #[test]
    fn empty_batch_is_valid() {
        let batch = clean_batch(RawBatch::default(), now(), &SilentReporter).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn offset_period_keeps_its_local_month() {
        let input = raw(json!([
            { "orcamento_previsto": 1, "periodo_referencia": "2024-01-31T22:00:00-03:00" }
        ]));
        let batch = clean_batch(input, now(), &SilentReporter).unwrap();
        assert_eq!(batch.records[0].reference_period, NaiveDate::from_ymd_opt(2024, 1, 31));
    }

    #[test]
    fn parse_date_accepts_common_shapes() {
        let jan31 = NaiveDate::from_ymd_opt(2024, 1, 31);
        assert_eq!(parse_date("2024-01-31"), jan31);
        assert_eq!(parse_date("31/01/2024"), jan31);
        assert_eq!(parse_date("2024/01/31"), jan31);
        assert_eq!(parse_date("2024-01-31T18:30:00Z"), jan31);
        assert_eq!(parse_date("2024-01-31 23:59:59"), jan31);
        assert_eq!(parse_date("2024-01-31T22:00:00-03:00"), jan31);
        assert_eq!(parse_date("2024-02-01T01:00:00+03:00"), NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(parse_date("2024-01"), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(parse_date("janeiro"), None);
    }

    #[test]
    fn normalize_text_is_idempotent() {
        let once = normalize_text("  são paulo ");
        assert_eq!(once, "SÃO PAULO");
        assert_eq!(normalize_text(&once), once);
    }
}
